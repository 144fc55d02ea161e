use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use crate::nlp::types::Params;

static PLACEHOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid regex"));

// ── Enums ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    InputCollection,
    Confirmation,
    ToolExecution,
    DecisionPoint,
    InformationDisplay,
    Branching,
    Loop,
    Completion,
}

impl StepType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InputCollection => "input_collection",
            Self::Confirmation => "confirmation",
            Self::ToolExecution => "tool_execution",
            Self::DecisionPoint => "decision_point",
            Self::InformationDisplay => "information_display",
            Self::Branching => "branching",
            Self::Loop => "loop",
            Self::Completion => "completion",
        }
    }
}

impl fmt::Display for StepType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowState {
    #[default]
    Idle,
    Active,
    WaitingInput,
    WaitingConfirmation,
    Executing,
    Completed,
    Error,
    Paused,
}

impl FlowState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Active => "active",
            Self::WaitingInput => "waiting_input",
            Self::WaitingConfirmation => "waiting_confirmation",
            Self::Executing => "executing",
            Self::Completed => "completed",
            Self::Error => "error",
            Self::Paused => "paused",
        }
    }

    /// States in which the execution reacts to user input.
    pub fn accepts_input(&self) -> bool {
        matches!(
            self,
            Self::Active | Self::WaitingInput | Self::WaitingConfirmation | Self::Executing
        )
    }

    pub fn can_pause(&self) -> bool {
        matches!(self, Self::Active | Self::WaitingInput | Self::WaitingConfirmation)
    }
}

impl fmt::Display for FlowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FlowState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(Self::Idle),
            "active" => Ok(Self::Active),
            "waiting_input" => Ok(Self::WaitingInput),
            "waiting_confirmation" => Ok(Self::WaitingConfirmation),
            "executing" => Ok(Self::Executing),
            "completed" => Ok(Self::Completed),
            "error" => Ok(Self::Error),
            "paused" => Ok(Self::Paused),
            other => Err(format!("unknown flow state: {other}")),
        }
    }
}

// ── Templates ───────────────────────────────────────────────────────

/// Branch selection as data, so templates stay serializable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BranchingLogic {
    /// Route on a collected value: the first route key (in key order) that
    /// occurs in the lowercased value wins, else `fallback`.
    ByParameter {
        parameter: String,
        routes: BTreeMap<String, String>,
        #[serde(default)]
        fallback: Option<String>,
    },
}

impl BranchingLogic {
    /// The parameter whose value decides the branch.
    pub fn parameter(&self) -> &str {
        match self {
            Self::ByParameter { parameter, .. } => parameter,
        }
    }

    pub fn evaluate(&self, execution: &FlowExecution) -> Option<String> {
        match self {
            Self::ByParameter {
                parameter,
                routes,
                fallback,
            } => {
                let Some(value) = execution.collected_data.get(parameter) else {
                    return None;
                };
                let value = value_text(value).to_lowercase();
                routes
                    .iter()
                    .find(|(key, _)| value.contains(key.to_lowercase().as_str()))
                    .map(|(_, step)| step.clone())
                    .or_else(|| fallback.clone())
            }
        }
    }

    /// Every step id this logic can route to.
    pub fn targets(&self) -> Vec<&str> {
        match self {
            Self::ByParameter { routes, fallback, .. } => routes
                .values()
                .map(String::as_str)
                .chain(fallback.as_deref())
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowStep {
    pub step_id: String,
    pub step_type: StepType,
    /// Shown on entering the step. `{key}` placeholders are filled from the
    /// execution's collected data.
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub required_parameters: Vec<String>,
    #[serde(default)]
    pub next_steps: Vec<String>,
    #[serde(default)]
    pub branching_logic: Option<BranchingLogic>,
    #[serde(default)]
    pub tool_name: Option<String>,
    /// Templated tool arguments for tool-execution steps.
    #[serde(default)]
    pub tool_parameters: Params,
    /// Collected key ← JSON pointer into the tool result metadata.
    #[serde(default)]
    pub result_bindings: BTreeMap<String, String>,
    /// Collected key that must hold a value before this step can be entered.
    #[serde(default)]
    pub available_if: Option<String>,
}

impl FlowStep {
    pub fn new(step_id: &str, step_type: StepType, prompt: &str) -> Self {
        Self {
            step_id: step_id.to_string(),
            step_type,
            prompt: prompt.to_string(),
            required_parameters: Vec::new(),
            next_steps: Vec::new(),
            branching_logic: None,
            tool_name: None,
            tool_parameters: Params::new(),
            result_bindings: BTreeMap::new(),
            available_if: None,
        }
    }

    pub fn requires(mut self, parameters: &[&str]) -> Self {
        self.required_parameters = parameters.iter().map(|p| p.to_string()).collect();
        self
    }

    pub fn then(mut self, next: &[&str]) -> Self {
        self.next_steps = next.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn branching(mut self, logic: BranchingLogic) -> Self {
        self.branching_logic = Some(logic);
        self
    }

    pub fn tool(mut self, name: &str, parameters: Params) -> Self {
        self.tool_name = Some(name.to_string());
        self.tool_parameters = parameters;
        self
    }

    pub fn bind(mut self, key: &str, pointer: &str) -> Self {
        self.result_bindings.insert(key.to_string(), pointer.to_string());
        self
    }

    pub fn only_if(mut self, key: &str) -> Self {
        self.available_if = Some(key.to_string());
        self
    }

    /// False when `available_if` names a key that is missing, null, zero or empty.
    pub fn is_available(&self, data: &Params) -> bool {
        let Some(key) = &self.available_if else {
            return true;
        };
        match data.get(key) {
            None | Some(Value::Null) => false,
            Some(Value::String(s)) => !s.is_empty(),
            Some(Value::Array(items)) => !items.is_empty(),
            Some(Value::Number(n)) => n.as_f64().is_some_and(|n| n != 0.0),
            Some(_) => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationFlow {
    pub flow_id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub steps: BTreeMap<String, FlowStep>,
    pub start_step: String,
    /// Phrase groups that start this flow; every phrase of one group must
    /// appear in the message.
    #[serde(default)]
    pub triggers: Vec<Vec<String>>,
}

impl ConversationFlow {
    pub fn step(&self, step_id: &str) -> Option<&FlowStep> {
        self.steps.get(step_id)
    }

    pub fn is_triggered_by(&self, message: &str) -> bool {
        let lower = message.to_lowercase();
        self.triggers
            .iter()
            .any(|group| !group.is_empty() && group.iter().all(|phrase| lower.contains(phrase.as_str())))
    }

    /// Every step reference must resolve. Returns the first dangling one.
    pub fn dangling_reference(&self) -> Option<String> {
        if !self.steps.contains_key(&self.start_step) {
            return Some(self.start_step.clone());
        }
        for step in self.steps.values() {
            let branch_targets = step.branching_logic.iter().flat_map(|b| b.targets());
            for target in step.next_steps.iter().map(String::as_str).chain(branch_targets) {
                if !self.steps.contains_key(target) {
                    return Some(target.to_string());
                }
            }
        }
        None
    }
}

// ── Executions ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub step_id: String,
    pub step_type: StepType,
    pub input: String,
    pub action: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowExecution {
    pub execution_id: String,
    pub flow_id: String,
    pub user_id: String,
    pub current_step: String,
    pub state: FlowState,
    pub collected_data: Params,
    pub step_history: Vec<StepRecord>,
    pub started_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub cancel_reason: Option<String>,
    /// State to restore on resume.
    #[serde(default)]
    pub paused_from: Option<FlowState>,
}

impl FlowExecution {
    pub fn new(flow: &ConversationFlow, user_id: &str, initial_data: Params) -> Self {
        let now = Utc::now();
        Self {
            execution_id: uuid::Uuid::now_v7().to_string(),
            flow_id: flow.flow_id.clone(),
            user_id: user_id.to_string(),
            current_step: flow.start_step.clone(),
            state: FlowState::Active,
            collected_data: initial_data,
            step_history: Vec::new(),
            started_at: now,
            last_activity: now,
            completed_at: None,
            cancel_reason: None,
            paused_from: None,
        }
    }

    pub fn record(&mut self, step: &FlowStep, input: &str, action: &str) {
        self.step_history.push(StepRecord {
            step_id: step.step_id.clone(),
            step_type: step.step_type,
            input: input.to_string(),
            action: action.to_string(),
            timestamp: Utc::now(),
        });
    }

    pub fn touch(&mut self) {
        self.last_activity = Utc::now();
    }
}

/// Outcome of handling input at one step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepAction {
    AdvanceStep,
    AdvanceTo(String),
    CancelFlow,
    Wait,
}

impl fmt::Display for StepAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AdvanceStep => f.write_str("advance_step"),
            Self::AdvanceTo(step) => write!(f, "advance_to:{step}"),
            Self::CancelFlow => f.write_str("cancel_flow"),
            Self::Wait => f.write_str("wait"),
        }
    }
}

/// A tool call the caller must run on the flow's behalf.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolRequest {
    pub tool_name: String,
    pub parameters: Params,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowResponse {
    pub execution_id: String,
    pub message: String,
    pub action: StepAction,
    pub state: FlowState,
    pub current_step: String,
    #[serde(default)]
    pub tool_request: Option<ToolRequest>,
}

impl FlowResponse {
    pub fn is_finished(&self) -> bool {
        self.state == FlowState::Completed || self.action == StepAction::CancelFlow
    }
}

/// Read-only snapshot of an execution for display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowContext {
    pub execution_id: String,
    pub flow_id: String,
    pub flow_name: String,
    pub current_step: String,
    pub step_type: StepType,
    pub state: FlowState,
    pub progress: f64,
    pub collected_data: Params,
    pub prompt: String,
}

/// Serializable template set for export and import.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowExport {
    pub version: u32,
    pub flows: Vec<ConversationFlow>,
}

#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    #[error("unknown flow: {0}")]
    UnknownFlow(String),

    #[error("unknown flow execution: {0}")]
    UnknownExecution(String),

    #[error("flow '{flow_id}' has no step '{step_id}'")]
    UnknownStep { flow_id: String, step_id: String },

    #[error("user '{user_id}' already has {limit} active flows")]
    TooManyFlows { user_id: String, limit: usize },

    #[error("cannot {action} a flow that is {state}")]
    InvalidTransition { state: FlowState, action: &'static str },
}

// ── Helpers ─────────────────────────────────────────────────────────

/// Plain text for a JSON value: strings unquoted, arrays joined by ", ".
pub fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Array(items) => items.iter().map(value_text).collect::<Vec<_>>().join(", "),
        other => other.to_string(),
    }
}

/// Fill `{key}` placeholders from `data`. Unknown keys stay as written.
pub fn render(template: &str, data: &Params) -> String {
    PLACEHOLDER_RE
        .replace_all(template, |caps: &regex::Captures<'_>| match data.get(&caps[1]) {
            Some(value) => value_text(value),
            None => caps[0].to_string(),
        })
        .into_owned()
}

/// Like [`render`], but a value that is exactly one placeholder keeps the
/// collected value's JSON type.
pub fn render_parameters(parameters: &Params, data: &Params) -> Params {
    parameters
        .iter()
        .map(|(key, value)| {
            let rendered = match value {
                Value::String(s) => {
                    let whole = PLACEHOLDER_RE
                        .captures(s)
                        .filter(|c| c.get(0).is_some_and(|m| m.as_str() == s.as_str()))
                        .and_then(|c| data.get(&c[1]).cloned());
                    whole.unwrap_or_else(|| Value::String(render(s, data)))
                }
                other => other.clone(),
            };
            (key.clone(), rendered)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn data() -> Params {
        let mut data = Params::new();
        data.insert("title".into(), json!("Weekly Review"));
        data.insert("count".into(), json!(3));
        data
    }

    #[test]
    fn render_fills_known_placeholders() {
        assert_eq!(render("{title} has {count} parts, {missing}", &data()), "Weekly Review has 3 parts, {missing}");
    }

    #[test]
    fn whole_placeholder_keeps_type() {
        let mut params = Params::new();
        params.insert("limit".into(), json!("{count}"));
        params.insert("note_path".into(), json!("{title}.md"));
        let rendered = render_parameters(&params, &data());
        assert_eq!(rendered["limit"], json!(3));
        assert_eq!(rendered["note_path"], json!("Weekly Review.md"));
    }

    #[test]
    fn branching_routes_by_substring() {
        let logic = BranchingLogic::ByParameter {
            parameter: "choice".into(),
            routes: BTreeMap::from([("create".into(), "a".into()), ("enhance".into(), "b".into())]),
            fallback: None,
        };
        let flow = ConversationFlow {
            flow_id: "f".into(),
            name: "f".into(),
            description: String::new(),
            steps: BTreeMap::from([("s".into(), FlowStep::new("s", StepType::Completion, ""))]),
            start_step: "s".into(),
            triggers: vec![],
        };
        let mut exec = FlowExecution::new(&flow, "u", Params::new());
        assert_eq!(logic.evaluate(&exec), None);
        exec.collected_data.insert("choice".into(), json!("Please ENHANCE it"));
        assert_eq!(logic.evaluate(&exec).as_deref(), Some("b"));
        exec.collected_data.insert("choice".into(), json!("neither"));
        assert_eq!(logic.evaluate(&exec), None);
    }

    #[test]
    fn guarded_step_needs_a_value() {
        let step = FlowStep::new("enhance", StepType::ToolExecution, "").only_if("first_match");
        let mut data = Params::new();
        assert!(!step.is_available(&data));
        data.insert("first_match".into(), json!(""));
        assert!(!step.is_available(&data));
        data.insert("first_match".into(), json!("a.md"));
        assert!(step.is_available(&data));
        assert!(FlowStep::new("open", StepType::Completion, "").is_available(&Params::new()));
    }

    #[test]
    fn state_strings_round_trip() {
        for state in [FlowState::Idle, FlowState::WaitingConfirmation, FlowState::Paused] {
            assert_eq!(state.as_str().parse::<FlowState>().unwrap(), state);
        }
    }

    #[test]
    fn action_display() {
        assert_eq!(StepAction::AdvanceTo("x".into()).to_string(), "advance_to:x");
    }
}
