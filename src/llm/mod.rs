//! Text generation backends and model comparison.

mod ollama;

pub use ollama::OllamaGenerator;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Instant;

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    /// The backend could not be reached at all (connection refused, timeout).
    #[error("LLM backend unreachable at {url}: {reason}")]
    Unreachable { url: String, reason: String },
    /// The backend answered with a non-success status.
    #[error("LLM backend returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("invalid response from LLM backend: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub prompt: String,
    /// Backend default when `None`.
    pub model: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            model: None,
            temperature: 0.7,
            max_tokens: 1024,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, LlmError>;

    fn default_model(&self) -> &str;
}

// ── Model comparison ────────────────────────────────────────────────

const LENGTH_WEIGHT: f64 = 0.6;
const LATENCY_WEIGHT: f64 = 0.4;
/// Output length at which the length score saturates.
const LENGTH_CAP: f64 = 2000.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRun {
    pub model: String,
    pub output: Option<String>,
    pub error: Option<String>,
    pub latency_ms: u64,
    pub chars: usize,
    /// Filled in once every run has finished; 0.0 for failed runs.
    pub score: f64,
}

impl ModelRun {
    pub fn succeeded(&self) -> bool {
        self.output.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelComparison {
    pub prompt: String,
    pub runs: Vec<ModelRun>,
}

impl ModelComparison {
    /// Highest scoring successful run. Earlier runs win ties.
    pub fn best(&self) -> Option<&ModelRun> {
        self.runs
            .iter()
            .filter(|r| r.succeeded())
            .fold(None, |best: Option<&ModelRun>, run| match best {
                Some(b) if b.score >= run.score => Some(b),
                _ => Some(run),
            })
    }
}

/// Run `prompt` on every model in turn and score the successful runs by
/// output length and relative latency.
pub async fn compare_models(
    generator: &dyn TextGenerator,
    prompt: &str,
    models: &[String],
) -> ModelComparison {
    let mut runs = Vec::with_capacity(models.len());
    for model in models {
        let request = GenerationRequest::new(prompt).with_model(model.clone());
        let start = Instant::now();
        let result = generator.generate(&request).await;
        let latency_ms = start.elapsed().as_millis() as u64;

        let run = match result {
            Ok(output) => ModelRun {
                model: model.clone(),
                chars: output.chars().count(),
                output: Some(output),
                error: None,
                latency_ms,
                score: 0.0,
            },
            Err(e) => {
                tracing::warn!(model = %model, error = %e, "model comparison run failed");
                ModelRun {
                    model: model.clone(),
                    output: None,
                    error: Some(e.to_string()),
                    latency_ms,
                    chars: 0,
                    score: 0.0,
                }
            }
        };
        runs.push(run);
    }

    score_runs(&mut runs);
    ModelComparison {
        prompt: prompt.to_string(),
        runs,
    }
}

fn score_runs(runs: &mut [ModelRun]) {
    let fastest = runs
        .iter()
        .filter(|r| r.succeeded())
        .map(|r| r.latency_ms.max(1))
        .min();
    let Some(fastest) = fastest else {
        return;
    };
    for run in runs.iter_mut().filter(|r| r.succeeded()) {
        let length_score = (run.chars as f64).min(LENGTH_CAP) / LENGTH_CAP;
        let latency_score = fastest as f64 / run.latency_ms.max(1) as f64;
        run.score = LENGTH_WEIGHT * length_score + LATENCY_WEIGHT * latency_score;
    }
}
