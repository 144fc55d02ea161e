//! Rolling per-tool execution statistics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    FileNotFound,
    PermissionDenied,
    Timeout,
    ParameterError,
    Unknown,
}

impl ErrorCategory {
    /// Bucket an error message by keyword.
    pub fn categorize(message: &str) -> Self {
        let m = message.to_lowercase();
        if m.contains("not found") || m.contains("no such file") || m.contains("does not exist") {
            Self::FileNotFound
        } else if m.contains("permission") || m.contains("access denied") {
            Self::PermissionDenied
        } else if m.contains("timeout") || m.contains("timed out") {
            Self::Timeout
        } else if m.contains("parameter") || m.contains("invalid") || m.contains("missing") || m.contains("must") {
            Self::ParameterError
        } else {
            Self::Unknown
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FileNotFound => "file_not_found",
            Self::PermissionDenied => "permission_denied",
            Self::Timeout => "timeout",
            Self::ParameterError => "parameter_error",
            Self::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolPerformance {
    pub total_executions: u64,
    pub successes: u64,
    pub success_rate: f64,
    pub avg_latency_ms: f64,
    pub error_counts: BTreeMap<ErrorCategory, u64>,
    pub last_success: Option<DateTime<Utc>>,
    pub last_used: Option<DateTime<Utc>>,
}

impl ToolPerformance {
    pub fn record(&mut self, success: bool, elapsed: Duration, error: Option<&str>) {
        let now = Utc::now();
        self.total_executions += 1;
        let n = self.total_executions as f64;
        self.avg_latency_ms += (elapsed.as_secs_f64() * 1000.0 - self.avg_latency_ms) / n;

        if success {
            self.successes += 1;
            self.last_success = Some(now);
        } else {
            let category = ErrorCategory::categorize(error.unwrap_or_default());
            *self.error_counts.entry(category).or_default() += 1;
        }
        self.success_rate = self.successes as f64 / n;
        self.last_used = Some(now);
    }

    /// Whether the last success happened within `window` of `now`.
    pub fn succeeded_within(&self, window: chrono::Duration, now: DateTime<Utc>) -> bool {
        self.last_success.is_some_and(|t| now - t <= window)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categorize_by_keyword() {
        assert_eq!(ErrorCategory::categorize("note not found: a.md"), ErrorCategory::FileNotFound);
        assert_eq!(ErrorCategory::categorize("Permission denied"), ErrorCategory::PermissionDenied);
        assert_eq!(ErrorCategory::categorize("request timed out"), ErrorCategory::Timeout);
        assert_eq!(
            ErrorCategory::categorize("missing required parameter 'query'"),
            ErrorCategory::ParameterError
        );
        assert_eq!(ErrorCategory::categorize("boom"), ErrorCategory::Unknown);
    }

    #[test]
    fn rolling_rates() {
        let mut perf = ToolPerformance::default();
        perf.record(true, Duration::from_millis(100), None);
        perf.record(false, Duration::from_millis(300), Some("note not found"));
        assert_eq!(perf.total_executions, 2);
        assert!((perf.success_rate - 0.5).abs() < 1e-9);
        assert!((perf.avg_latency_ms - 200.0).abs() < 1e-6);
        assert_eq!(perf.error_counts[&ErrorCategory::FileNotFound], 1);
        assert!(perf.succeeded_within(chrono::Duration::hours(1), Utc::now()));
    }
}
