use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::LazyLock;
use tracing::{debug, info, warn};

use super::templates::builtin_flows;
use super::types::{
    render, render_parameters, ConversationFlow, FlowContext, FlowError, FlowExecution, FlowExport,
    FlowResponse, FlowState, FlowStep, StepAction, StepType, ToolRequest,
};
use crate::config::FlowConfig;
use crate::nlp::types::{EnhancedProcessingResult, Params};
use crate::tools::ToolResult;

pub const MAX_COMPLETED_HISTORY: usize = 100;
const EXPORT_VERSION: u32 = 1;

static POSITIVE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:yes|y|yeah|yep|ok|okay|sure|confirm|confirmed|proceed|go ahead|do it|correct|absolutely)\b")
        .expect("valid regex")
});
static NEGATIVE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:no|n|nope|nah|cancel|stop|abort|don't|do not|never)\b").expect("valid regex")
});
static CANCEL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(?:cancel|stop|exit|quit)(?:\s+(?:it|this|that|flow|the\s+flow))?\s*[.!]*\s*$")
        .expect("valid regex")
});

/// Positive, negative, or `None` when the reply is ambiguous.
pub fn classify_confirmation(input: &str) -> Option<bool> {
    match (POSITIVE_RE.is_match(input), NEGATIVE_RE.is_match(input)) {
        (true, false) => Some(true),
        (false, true) => Some(false),
        _ => None,
    }
}

pub fn is_cancel_request(input: &str) -> bool {
    CANCEL_RE.is_match(input)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlowStatistics {
    pub active: usize,
    pub started: u64,
    pub completed: u64,
    pub cancelled: u64,
    pub timed_out: u64,
    pub errored: u64,
    pub average_completion_secs: f64,
    pub starts_by_flow: BTreeMap<String, u64>,
    pub completions_by_flow: BTreeMap<String, u64>,
}

/// Runs multi-turn flows. Not internally synchronized: share one manager
/// across sessions only behind an external lock.
pub struct ConversationFlowManager {
    flows: BTreeMap<String, ConversationFlow>,
    active_executions: HashMap<String, FlowExecution>,
    /// user id → execution ids, oldest first.
    user_executions: HashMap<String, Vec<String>>,
    completed: VecDeque<FlowExecution>,
    stats: FlowStatistics,
    timeout: chrono::Duration,
    max_flows_per_user: usize,
}

impl ConversationFlowManager {
    /// A manager with the built-in templates registered.
    pub fn new(config: &FlowConfig) -> Self {
        let mut manager = Self::empty(config);
        for flow in builtin_flows() {
            manager.flows.insert(flow.flow_id.clone(), flow);
        }
        manager
    }

    pub fn empty(config: &FlowConfig) -> Self {
        Self {
            flows: BTreeMap::new(),
            active_executions: HashMap::new(),
            user_executions: HashMap::new(),
            completed: VecDeque::new(),
            stats: FlowStatistics::default(),
            timeout: chrono::Duration::minutes(config.timeout_minutes),
            max_flows_per_user: config.max_flows_per_user,
        }
    }

    // ── Templates ───────────────────────────────────────────────────

    /// Register or replace a template after checking its step references.
    pub fn register_flow(&mut self, flow: ConversationFlow) -> Result<(), FlowError> {
        if let Some(step_id) = flow.dangling_reference() {
            return Err(FlowError::UnknownStep {
                flow_id: flow.flow_id,
                step_id,
            });
        }
        debug!(flow_id = %flow.flow_id, steps = flow.steps.len(), "flow registered");
        self.flows.insert(flow.flow_id.clone(), flow);
        Ok(())
    }

    pub fn flow(&self, flow_id: &str) -> Option<&ConversationFlow> {
        self.flows.get(flow_id)
    }

    pub fn flows(&self) -> impl Iterator<Item = &ConversationFlow> {
        self.flows.values()
    }

    /// First template whose trigger phrases all occur in `message`.
    pub fn find_triggered_flow(&self, message: &str) -> Option<&ConversationFlow> {
        self.flows.values().find(|f| f.is_triggered_by(message))
    }

    pub fn export_flow_data(&self) -> FlowExport {
        FlowExport {
            version: EXPORT_VERSION,
            flows: self.flows.values().cloned().collect(),
        }
    }

    /// Register every flow in `data`. Nothing is registered if any is invalid.
    pub fn import_flow_data(&mut self, data: FlowExport) -> Result<usize, FlowError> {
        for flow in &data.flows {
            if let Some(step_id) = flow.dangling_reference() {
                return Err(FlowError::UnknownStep {
                    flow_id: flow.flow_id.clone(),
                    step_id,
                });
            }
        }
        let count = data.flows.len();
        for flow in data.flows {
            self.flows.insert(flow.flow_id.clone(), flow);
        }
        info!(count, "flows imported");
        Ok(count)
    }

    // ── Executions ──────────────────────────────────────────────────

    pub fn execution(&self, execution_id: &str) -> Option<&FlowExecution> {
        self.active_executions.get(execution_id)
    }

    pub fn active_executions(&self) -> impl Iterator<Item = &FlowExecution> {
        self.active_executions.values()
    }

    /// The user's most recently started active flow.
    pub fn active_flow_for_user(&self, user_id: &str) -> Option<&FlowExecution> {
        self.user_executions
            .get(user_id)
            .and_then(|ids| ids.last())
            .and_then(|id| self.active_executions.get(id))
    }

    /// Finished and cancelled executions, oldest first.
    pub fn completed_history(&self) -> impl Iterator<Item = &FlowExecution> {
        self.completed.iter()
    }

    pub fn statistics(&self) -> FlowStatistics {
        FlowStatistics {
            active: self.active_executions.len(),
            ..self.stats.clone()
        }
    }

    pub fn start_flow(&mut self, flow_id: &str, user_id: &str, initial_data: Params) -> Result<FlowResponse, FlowError> {
        let flow = self
            .flows
            .get(flow_id)
            .ok_or_else(|| FlowError::UnknownFlow(flow_id.to_string()))?;

        let running = self.user_executions.get(user_id).map_or(0, Vec::len);
        if running >= self.max_flows_per_user {
            return Err(FlowError::TooManyFlows {
                user_id: user_id.to_string(),
                limit: self.max_flows_per_user,
            });
        }

        let execution = FlowExecution::new(flow, user_id, initial_data);
        let execution_id = execution.execution_id.clone();
        let start = flow
            .step(&flow.start_step)
            .cloned()
            .ok_or_else(|| FlowError::UnknownStep {
                flow_id: flow_id.to_string(),
                step_id: flow.start_step.clone(),
            })?;

        info!(flow_id, user_id, execution_id = %execution_id, "flow started");
        self.stats.started += 1;
        *self.stats.starts_by_flow.entry(flow_id.to_string()).or_default() += 1;
        self.user_executions
            .entry(user_id.to_string())
            .or_default()
            .push(execution_id.clone());
        self.active_executions.insert(execution_id.clone(), execution);

        self.enter_step(&execution_id, &start, StepAction::AdvanceStep)
    }

    /// Handle one user message at the execution's current step.
    pub fn process_flow_input(
        &mut self,
        execution_id: &str,
        user_input: &str,
        processing_result: Option<&EnhancedProcessingResult>,
    ) -> Result<FlowResponse, FlowError> {
        let execution = self
            .active_executions
            .get_mut(execution_id)
            .ok_or_else(|| FlowError::UnknownExecution(execution_id.to_string()))?;
        if !execution.state.accepts_input() {
            return Err(FlowError::InvalidTransition {
                state: execution.state,
                action: "process input for",
            });
        }
        let flow = self
            .flows
            .get(&execution.flow_id)
            .ok_or_else(|| FlowError::UnknownFlow(execution.flow_id.clone()))?;
        let step = flow
            .step(&execution.current_step)
            .cloned()
            .ok_or_else(|| FlowError::UnknownStep {
                flow_id: execution.flow_id.clone(),
                step_id: execution.current_step.clone(),
            })?;
        execution.touch();

        let (action, message) = if step.step_type != StepType::Confirmation && is_cancel_request(user_input) {
            (StepAction::CancelFlow, String::new())
        } else {
            handle_step(&step, execution, user_input, processing_result)
        };
        execution.record(&step, user_input, &action.to_string());
        debug!(
            execution_id,
            step = %step.step_id,
            step_type = %step.step_type,
            action = %action,
            "flow input handled"
        );

        match action {
            StepAction::Wait => {
                if step.step_type == StepType::Confirmation {
                    execution.state = FlowState::WaitingConfirmation;
                } else {
                    execution.state = FlowState::WaitingInput;
                }
                Ok(FlowResponse {
                    execution_id: execution_id.to_string(),
                    message,
                    action: StepAction::Wait,
                    state: execution.state,
                    current_step: execution.current_step.clone(),
                    tool_request: None,
                })
            }
            StepAction::AdvanceStep => self.advance_flow(execution_id, None),
            StepAction::AdvanceTo(target) => self.advance_flow(execution_id, Some(&target)),
            StepAction::CancelFlow => {
                let reason = if step.step_type == StepType::Confirmation {
                    "declined"
                } else {
                    "cancelled by user"
                };
                self.cancel_flow(execution_id, reason)
            }
        }
    }

    /// Move to `next_step`, or to the step implied by the current one. An
    /// unresolvable choice leaves the execution waiting for input; a target
    /// that does not exist puts it in the error state without moving it.
    pub fn advance_flow(&mut self, execution_id: &str, next_step: Option<&str>) -> Result<FlowResponse, FlowError> {
        let execution = self
            .active_executions
            .get_mut(execution_id)
            .ok_or_else(|| FlowError::UnknownExecution(execution_id.to_string()))?;
        if matches!(execution.state, FlowState::Paused | FlowState::Completed) {
            return Err(FlowError::InvalidTransition {
                state: execution.state,
                action: "advance",
            });
        }
        let flow = self
            .flows
            .get(&execution.flow_id)
            .ok_or_else(|| FlowError::UnknownFlow(execution.flow_id.clone()))?;
        let current = flow
            .step(&execution.current_step)
            .ok_or_else(|| FlowError::UnknownStep {
                flow_id: execution.flow_id.clone(),
                step_id: execution.current_step.clone(),
            })?;

        let target = match next_step {
            Some(target) => Some(target.to_string()),
            None if current.next_steps.len() == 1 => Some(current.next_steps[0].clone()),
            None => current
                .branching_logic
                .as_ref()
                .and_then(|logic| logic.evaluate(execution)),
        };

        let Some(target) = target else {
            execution.state = FlowState::WaitingInput;
            return Ok(FlowResponse {
                execution_id: execution_id.to_string(),
                message: with_choices(&render(&current.prompt, &execution.collected_data), &current.next_steps),
                action: StepAction::Wait,
                state: execution.state,
                current_step: execution.current_step.clone(),
                tool_request: None,
            });
        };

        // A guarded step whose data is missing gives way to the first open sibling.
        let mut detour = None;
        let target = match flow.step(&target) {
            Some(step) if !step.is_available(&execution.collected_data) => {
                let open = current
                    .next_steps
                    .iter()
                    .filter(|id| **id != target)
                    .find(|id| flow.step(id).is_some_and(|s| s.is_available(&execution.collected_data)))
                    .cloned();
                let Some(open) = open else {
                    execution.state = FlowState::WaitingInput;
                    return Ok(FlowResponse {
                        execution_id: execution_id.to_string(),
                        message: format!("I can't {} right now.", target.replace('_', " ")),
                        action: StepAction::Wait,
                        state: execution.state,
                        current_step: execution.current_step.clone(),
                        tool_request: None,
                    });
                };
                debug!(execution_id, wanted = %target, step = %open, "guarded step unavailable");
                detour = Some(format!(
                    "I can't {} here, so I'll {} instead.",
                    target.replace('_', " "),
                    open.replace('_', " ")
                ));
                open
            }
            _ => target,
        };

        let Some(next) = flow.step(&target).cloned() else {
            warn!(execution_id, step = %target, "flow advanced to an unknown step");
            execution.state = FlowState::Error;
            self.stats.errored += 1;
            return Err(FlowError::UnknownStep {
                flow_id: execution.flow_id.clone(),
                step_id: target,
            });
        };

        execution.current_step = target.clone();
        execution.touch();
        let action = match next_step {
            Some(_) => StepAction::AdvanceTo(target),
            None => StepAction::AdvanceStep,
        };
        let mut response = self.enter_step(execution_id, &next, action)?;
        if let Some(note) = detour {
            response.message = format!("{note}\n{}", response.message);
        }
        Ok(response)
    }

    /// Set the state for a freshly entered step and build its prompt.
    fn enter_step(&mut self, execution_id: &str, step: &FlowStep, action: StepAction) -> Result<FlowResponse, FlowError> {
        let execution = self
            .active_executions
            .get_mut(execution_id)
            .ok_or_else(|| FlowError::UnknownExecution(execution_id.to_string()))?;

        let mut message = render(&step.prompt, &execution.collected_data);
        if step.step_type == StepType::Completion {
            execution.record(step, "", "complete");
            return Ok(self.complete(execution_id, message, action));
        }

        let mut tool_request = None;
        execution.state = match step.step_type {
            StepType::InputCollection => FlowState::WaitingInput,
            StepType::Confirmation => FlowState::WaitingConfirmation,
            StepType::ToolExecution => {
                tool_request = step.tool_name.as_ref().map(|name| ToolRequest {
                    tool_name: name.clone(),
                    parameters: render_parameters(&step.tool_parameters, &execution.collected_data),
                });
                FlowState::Executing
            }
            StepType::DecisionPoint | StepType::Branching => {
                message = with_choices(&message, &step.next_steps);
                FlowState::WaitingInput
            }
            StepType::InformationDisplay | StepType::Loop | StepType::Completion => FlowState::Active,
        };

        Ok(FlowResponse {
            execution_id: execution_id.to_string(),
            message,
            action,
            state: execution.state,
            current_step: execution.current_step.clone(),
            tool_request,
        })
    }

    fn complete(&mut self, execution_id: &str, message: String, action: StepAction) -> FlowResponse {
        let now = Utc::now();
        let Some(mut execution) = self.detach(execution_id) else {
            return FlowResponse {
                execution_id: execution_id.to_string(),
                message,
                action,
                state: FlowState::Completed,
                current_step: String::new(),
                tool_request: None,
            };
        };
        execution.state = FlowState::Completed;
        execution.completed_at = Some(now);

        let secs = (now - execution.started_at).num_milliseconds() as f64 / 1000.0;
        self.stats.completed += 1;
        self.stats.average_completion_secs +=
            (secs - self.stats.average_completion_secs) / self.stats.completed as f64;
        *self
            .stats
            .completions_by_flow
            .entry(execution.flow_id.clone())
            .or_default() += 1;
        info!(execution_id, flow_id = %execution.flow_id, secs, "flow completed");

        let response = FlowResponse {
            execution_id: execution_id.to_string(),
            message,
            action,
            state: FlowState::Completed,
            current_step: execution.current_step.clone(),
            tool_request: None,
        };
        self.archive(execution);
        response
    }

    pub fn cancel_flow(&mut self, execution_id: &str, reason: &str) -> Result<FlowResponse, FlowError> {
        let mut execution = self
            .detach(execution_id)
            .ok_or_else(|| FlowError::UnknownExecution(execution_id.to_string()))?;
        let name = self
            .flows
            .get(&execution.flow_id)
            .map(|f| f.name.clone())
            .unwrap_or_else(|| execution.flow_id.clone());

        execution.state = FlowState::Idle;
        execution.cancel_reason = Some(reason.to_string());
        if reason == "timeout" {
            self.stats.timed_out += 1;
        } else {
            self.stats.cancelled += 1;
        }
        info!(execution_id, flow_id = %execution.flow_id, reason, "flow cancelled");

        let response = FlowResponse {
            execution_id: execution_id.to_string(),
            message: format!("Cancelled {name}."),
            action: StepAction::CancelFlow,
            state: execution.state,
            current_step: execution.current_step.clone(),
            tool_request: None,
        };
        self.archive(execution);
        Ok(response)
    }

    /// End an execution whose tool step failed. It is archived in the error
    /// state and never counts as completed.
    pub fn fail_flow(&mut self, execution_id: &str, error: &str) -> Result<FlowResponse, FlowError> {
        let mut execution = self
            .detach(execution_id)
            .ok_or_else(|| FlowError::UnknownExecution(execution_id.to_string()))?;
        let name = self
            .flows
            .get(&execution.flow_id)
            .map(|f| f.name.clone())
            .unwrap_or_else(|| execution.flow_id.clone());

        execution.state = FlowState::Error;
        execution.cancel_reason = Some(format!("failed: {error}"));
        self.stats.errored += 1;
        warn!(execution_id, flow_id = %execution.flow_id, step = %execution.current_step, error, "flow step failed");

        let response = FlowResponse {
            execution_id: execution_id.to_string(),
            message: format!("That step failed: {error}\nI've stopped {name}."),
            action: StepAction::CancelFlow,
            state: execution.state,
            current_step: execution.current_step.clone(),
            tool_request: None,
        };
        self.archive(execution);
        Ok(response)
    }

    pub fn pause_flow(&mut self, execution_id: &str) -> Result<FlowResponse, FlowError> {
        let execution = self
            .active_executions
            .get_mut(execution_id)
            .ok_or_else(|| FlowError::UnknownExecution(execution_id.to_string()))?;
        if !execution.state.can_pause() {
            return Err(FlowError::InvalidTransition {
                state: execution.state,
                action: "pause",
            });
        }
        execution.paused_from = Some(execution.state);
        execution.state = FlowState::Paused;
        execution.touch();
        debug!(execution_id, "flow paused");
        Ok(FlowResponse {
            execution_id: execution_id.to_string(),
            message: "Paused. Resume whenever you're ready.".to_string(),
            action: StepAction::Wait,
            state: execution.state,
            current_step: execution.current_step.clone(),
            tool_request: None,
        })
    }

    pub fn resume_flow(&mut self, execution_id: &str) -> Result<FlowResponse, FlowError> {
        let execution = self
            .active_executions
            .get_mut(execution_id)
            .ok_or_else(|| FlowError::UnknownExecution(execution_id.to_string()))?;
        if execution.state != FlowState::Paused {
            return Err(FlowError::InvalidTransition {
                state: execution.state,
                action: "resume",
            });
        }
        execution.state = execution.paused_from.take().unwrap_or(FlowState::Active);
        execution.touch();
        let prompt = self
            .flows
            .get(&execution.flow_id)
            .and_then(|f| f.step(&execution.current_step))
            .map(|s| render(&s.prompt, &execution.collected_data))
            .unwrap_or_default();
        debug!(execution_id, state = %execution.state, "flow resumed");
        Ok(FlowResponse {
            execution_id: execution_id.to_string(),
            message: prompt,
            action: StepAction::Wait,
            state: execution.state,
            current_step: execution.current_step.clone(),
            tool_request: None,
        })
    }

    /// Fold a tool result into the collected data, applying the current
    /// step's result bindings.
    pub fn record_tool_result(&mut self, execution_id: &str, result: &ToolResult) -> Result<(), FlowError> {
        let execution = self
            .active_executions
            .get_mut(execution_id)
            .ok_or_else(|| FlowError::UnknownExecution(execution_id.to_string()))?;
        let data = &mut execution.collected_data;
        data.insert("last_tool_status".into(), Value::String(result.status.as_str().to_string()));
        data.insert("last_tool_result".into(), Value::String(result.content.clone()));
        if !result.is_success() {
            data.insert("last_tool_error".into(), Value::String(result.error_text().to_string()));
        }

        let bindings = self
            .flows
            .get(&execution.flow_id)
            .and_then(|f| f.step(&execution.current_step))
            .map(|s| s.result_bindings.clone())
            .unwrap_or_default();
        let metadata = Value::Object(result.metadata.clone());
        for (key, pointer) in bindings {
            if let Some(value) = metadata.pointer(&pointer) {
                execution.collected_data.insert(key, value.clone());
            }
        }
        execution.touch();
        Ok(())
    }

    /// Read-only; repeated calls return the same snapshot.
    pub fn get_flow_context(&self, execution_id: &str) -> Result<FlowContext, FlowError> {
        let execution = self
            .active_executions
            .get(execution_id)
            .ok_or_else(|| FlowError::UnknownExecution(execution_id.to_string()))?;
        let flow = self
            .flows
            .get(&execution.flow_id)
            .ok_or_else(|| FlowError::UnknownFlow(execution.flow_id.clone()))?;
        let step = flow
            .step(&execution.current_step)
            .ok_or_else(|| FlowError::UnknownStep {
                flow_id: flow.flow_id.clone(),
                step_id: execution.current_step.clone(),
            })?;

        let visited: HashSet<&str> = execution
            .step_history
            .iter()
            .map(|r| r.step_id.as_str())
            .chain(std::iter::once(execution.current_step.as_str()))
            .collect();
        let progress = (visited.len() as f64 / flow.steps.len().max(1) as f64).min(1.0);

        Ok(FlowContext {
            execution_id: execution.execution_id.clone(),
            flow_id: flow.flow_id.clone(),
            flow_name: flow.name.clone(),
            current_step: execution.current_step.clone(),
            step_type: step.step_type,
            state: execution.state,
            progress,
            collected_data: execution.collected_data.clone(),
            prompt: render(&step.prompt, &execution.collected_data),
        })
    }

    pub fn cleanup_expired_flows(&mut self) -> Vec<String> {
        self.cleanup_expired_flows_at(Utc::now())
    }

    /// Cancel every execution idle for longer than the timeout at `now`.
    pub fn cleanup_expired_flows_at(&mut self, now: DateTime<Utc>) -> Vec<String> {
        let expired: Vec<String> = self
            .active_executions
            .values()
            .filter(|e| now - e.last_activity > self.timeout)
            .map(|e| e.execution_id.clone())
            .collect();
        for id in &expired {
            if let Err(e) = self.cancel_flow(id, "timeout") {
                warn!(execution_id = %id, error = %e, "failed to expire flow");
            }
        }
        if !expired.is_empty() {
            info!(count = expired.len(), "expired flows cleaned up");
        }
        expired
    }

    fn detach(&mut self, execution_id: &str) -> Option<FlowExecution> {
        let execution = self.active_executions.remove(execution_id)?;
        if let Some(ids) = self.user_executions.get_mut(&execution.user_id) {
            ids.retain(|id| id != execution_id);
            if ids.is_empty() {
                self.user_executions.remove(&execution.user_id);
            }
        }
        Some(execution)
    }

    fn archive(&mut self, execution: FlowExecution) {
        self.completed.push_back(execution);
        while self.completed.len() > MAX_COMPLETED_HISTORY {
            self.completed.pop_front();
        }
    }
}

// ── Step handlers ───────────────────────────────────────────────────

fn handle_step(
    step: &FlowStep,
    execution: &mut FlowExecution,
    input: &str,
    processing_result: Option<&EnhancedProcessingResult>,
) -> (StepAction, String) {
    match step.step_type {
        StepType::InputCollection => collect_input(step, execution, input, processing_result),
        StepType::Confirmation => match classify_confirmation(input) {
            Some(true) => (StepAction::AdvanceStep, String::new()),
            Some(false) => (StepAction::CancelFlow, String::new()),
            None => (
                StepAction::Wait,
                format!("Please answer yes or no. {}", render(&step.prompt, &execution.collected_data)),
            ),
        },
        StepType::DecisionPoint | StepType::Branching => decide(step, execution, input),
        StepType::ToolExecution | StepType::InformationDisplay | StepType::Loop | StepType::Completion => {
            (StepAction::AdvanceStep, String::new())
        }
    }
}

fn collect_input(
    step: &FlowStep,
    execution: &mut FlowExecution,
    input: &str,
    processing_result: Option<&EnhancedProcessingResult>,
) -> (StepAction, String) {
    let data = &mut execution.collected_data;

    if let Some(result) = processing_result {
        for name in &step.required_parameters {
            if let Some(value) = result.parameters().get(name) {
                data.entry(name.clone()).or_insert_with(|| value.clone());
            }
        }
    }

    for name in &step.required_parameters {
        if data.contains_key(name) {
            continue;
        }
        if let Some(value) = labelled_value(name, input) {
            data.insert(name.clone(), Value::String(value));
        }
    }

    // A single open parameter takes the whole reply.
    let missing: Vec<&String> = step
        .required_parameters
        .iter()
        .filter(|name| !data.contains_key(name.as_str()))
        .collect();
    let reply = clean_reply(input);
    if missing.len() == 1 && !reply.is_empty() {
        let value = if missing[0] == "title" {
            reply.trim_end_matches(".md").to_string()
        } else {
            reply
        };
        data.insert(missing[0].clone(), Value::String(value));
    }

    let still_missing: Vec<&str> = step
        .required_parameters
        .iter()
        .filter(|name| !data.contains_key(name.as_str()))
        .map(String::as_str)
        .collect();
    if still_missing.is_empty() {
        (StepAction::AdvanceStep, String::new())
    } else {
        (
            StepAction::Wait,
            format!(
                "I still need: {}. {}",
                still_missing.join(", "),
                render(&step.prompt, data)
            ),
        )
    }
}

/// `name: value`, `name = value` or `name is value`.
fn labelled_value(name: &str, input: &str) -> Option<String> {
    let pattern = format!(r"(?i)\b{}\s*(?::|=|\bis\b)\s*(.+)", regex::escape(name));
    let re = Regex::new(&pattern).ok()?;
    re.captures(input)
        .and_then(|c| c.get(1))
        .map(|m| clean_reply(m.as_str()))
        .filter(|v| !v.is_empty())
}

fn clean_reply(input: &str) -> String {
    input.trim().trim_matches(|c| c == '"' || c == '\'').trim().to_string()
}

fn decide(step: &FlowStep, execution: &mut FlowExecution, input: &str) -> (StepAction, String) {
    let reply = input.trim();
    if let Some(logic) = &step.branching_logic {
        if !reply.is_empty() {
            execution
                .collected_data
                .insert(logic.parameter().to_string(), Value::String(reply.to_string()));
        }
        if let Some(target) = logic.evaluate(execution) {
            return (StepAction::AdvanceTo(target), String::new());
        }
    }
    if let Some(target) = pick_choice(&step.next_steps, reply) {
        return (StepAction::AdvanceTo(target), String::new());
    }
    (
        StepAction::Wait,
        with_choices(&render(&step.prompt, &execution.collected_data), &step.next_steps),
    )
}

/// A 1-based number or a step id (spaces allowed for underscores).
fn pick_choice(choices: &[String], reply: &str) -> Option<String> {
    if let Ok(n) = reply.parse::<usize>() {
        return n.checked_sub(1).and_then(|i| choices.get(i)).cloned();
    }
    let normalized = reply.to_lowercase().replace(' ', "_");
    choices.iter().find(|c| **c == normalized).cloned()
}

fn with_choices(message: &str, choices: &[String]) -> String {
    if choices.len() < 2 {
        return message.to_string();
    }
    let list: Vec<String> = choices
        .iter()
        .enumerate()
        .map(|(i, c)| format!("{}. {}", i + 1, c.replace('_', " ")))
        .collect();
    format!("{message}\n{}", list.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::templates::{CREATE_NOTE_FLOW, RESEARCH_FLOW};
    use serde_json::json;

    fn manager() -> ConversationFlowManager {
        ConversationFlowManager::new(&FlowConfig::default())
    }

    #[test]
    fn confirmation_words() {
        assert_eq!(classify_confirmation("YES please"), Some(true));
        assert_eq!(classify_confirmation("ok"), Some(true));
        assert_eq!(classify_confirmation("no"), Some(false));
        assert_eq!(classify_confirmation("nope, cancel"), Some(false));
        assert_eq!(classify_confirmation("maybe"), None);
        assert_eq!(classify_confirmation("know what, now"), None);
    }

    #[test]
    fn cancel_requests() {
        assert!(is_cancel_request("cancel"));
        assert!(is_cancel_request(" Stop this! "));
        assert!(!is_cancel_request("stop procrastinating on the report"));
    }

    #[test]
    fn create_note_flow_walks_to_completion() {
        let mut m = manager();
        let start = m.start_flow(CREATE_NOTE_FLOW, "u1", Params::new()).unwrap();
        let id = start.execution_id.clone();
        assert_eq!(start.state, FlowState::WaitingInput);
        assert_eq!(start.current_step, "title");

        let r = m.process_flow_input(&id, "Weekly Review", None).unwrap();
        assert_eq!(r.current_step, "content");
        assert!(r.message.contains("Weekly Review"));

        let r = m.process_flow_input(&id, "Check the budget", None).unwrap();
        assert_eq!(r.state, FlowState::WaitingConfirmation);

        let r = m.process_flow_input(&id, "Yes", None).unwrap();
        assert_eq!(r.state, FlowState::Executing);
        let request = r.tool_request.unwrap();
        assert_eq!(request.tool_name, "write_note");
        assert_eq!(request.parameters["note_path"], "Weekly Review.md");
        assert_eq!(request.parameters["content"], "Check the budget");

        let result = ToolResult::success("written").with_metadata("note_path", "Weekly Review.md");
        m.record_tool_result(&id, &result).unwrap();
        let r = m.process_flow_input(&id, "", None).unwrap();
        assert_eq!(r.state, FlowState::Completed);
        assert_eq!(r.message, "Created Weekly Review.md.");
        assert!(m.execution(&id).is_none());

        let done = m.completed_history().last().unwrap();
        let types: Vec<StepType> = done.step_history.iter().map(|s| s.step_type).collect();
        assert_eq!(
            types,
            vec![
                StepType::InputCollection,
                StepType::InputCollection,
                StepType::Confirmation,
                StepType::ToolExecution,
                StepType::Completion,
            ]
        );
        assert_eq!(m.statistics().completed, 1);
        assert_eq!(m.statistics().active, 0);
    }

    #[test]
    fn ambiguous_confirmation_reprompts_and_no_cancels() {
        let mut m = manager();
        let id = m.start_flow(CREATE_NOTE_FLOW, "u1", Params::new()).unwrap().execution_id;
        m.process_flow_input(&id, "a", None).unwrap();
        m.process_flow_input(&id, "b", None).unwrap();

        let r = m.process_flow_input(&id, "maybe", None).unwrap();
        assert_eq!(r.action, StepAction::Wait);
        assert_eq!(r.current_step, "confirm");

        let r = m.process_flow_input(&id, "no", None).unwrap();
        assert_eq!(r.action, StepAction::CancelFlow);
        assert!(m.execution(&id).is_none());
        assert_eq!(m.completed_history().last().unwrap().cancel_reason.as_deref(), Some("declined"));
    }

    #[test]
    fn per_user_cap() {
        let mut m = manager();
        for _ in 0..3 {
            m.start_flow(CREATE_NOTE_FLOW, "u1", Params::new()).unwrap();
        }
        assert!(matches!(
            m.start_flow(CREATE_NOTE_FLOW, "u1", Params::new()),
            Err(FlowError::TooManyFlows { limit: 3, .. })
        ));
        assert!(m.start_flow(CREATE_NOTE_FLOW, "u2", Params::new()).is_ok());
    }

    #[test]
    fn unknown_target_sets_error_without_moving() {
        let mut m = manager();
        let id = m.start_flow(CREATE_NOTE_FLOW, "u1", Params::new()).unwrap().execution_id;
        let err = m.advance_flow(&id, Some("nowhere")).unwrap_err();
        assert!(matches!(err, FlowError::UnknownStep { .. }));
        let exec = m.execution(&id).unwrap();
        assert_eq!(exec.state, FlowState::Error);
        assert_eq!(exec.current_step, "title");
    }

    #[test]
    fn flow_context_is_idempotent() {
        let mut m = manager();
        let id = m.start_flow(CREATE_NOTE_FLOW, "u1", Params::new()).unwrap().execution_id;
        m.process_flow_input(&id, "Plans", None).unwrap();
        let a = m.get_flow_context(&id).unwrap();
        let b = m.get_flow_context(&id).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.current_step, "content");
        assert!((a.progress - 0.4).abs() < 1e-9);
    }

    #[test]
    fn research_flow_branches_on_choice() {
        let mut m = manager();
        let id = m.start_flow(RESEARCH_FLOW, "u1", Params::new()).unwrap().execution_id;
        let r = m.process_flow_input(&id, "tokio", None).unwrap();
        assert_eq!(r.tool_request.unwrap().parameters["limit"], 5);

        let search = ToolResult::success("a.md: tokio")
            .with_metadata("matches", json!(["a.md"]))
            .with_metadata("count", 1);
        m.record_tool_result(&id, &search).unwrap();
        let r = m.process_flow_input(&id, "", None).unwrap();
        assert_eq!(r.current_step, "decide");
        assert!(r.message.contains("found 1 related"));
        assert!(r.message.contains("2. enhance existing"));

        let r = m.process_flow_input(&id, "hmm", None).unwrap();
        assert_eq!(r.action, StepAction::Wait);

        let r = m.process_flow_input(&id, "enhance it", None).unwrap();
        assert_eq!(r.current_step, "enhance_existing");
        let request = r.tool_request.unwrap();
        assert_eq!(request.tool_name, "ai_process");
        assert_eq!(request.parameters["note_path"], "a.md");
    }

    #[test]
    fn enhance_without_matches_falls_back_to_create() {
        let mut m = manager();
        let id = m.start_flow(RESEARCH_FLOW, "u1", Params::new()).unwrap().execution_id;
        m.process_flow_input(&id, "zzqqxx", None).unwrap();

        let search = ToolResult::success("")
            .with_metadata("matches", json!([]))
            .with_metadata("count", 0);
        m.record_tool_result(&id, &search).unwrap();
        m.process_flow_input(&id, "", None).unwrap();

        let r = m.process_flow_input(&id, "enhance", None).unwrap();
        assert_eq!(r.current_step, "create_new");
        assert!(r.message.starts_with("I can't enhance existing here"), "{}", r.message);
        let request = r.tool_request.unwrap();
        assert_eq!(request.tool_name, "write_note");
        assert_eq!(request.parameters["note_path"], "zzqqxx.md");
    }

    #[test]
    fn failed_tool_step_ends_in_error() {
        let mut m = manager();
        let id = m.start_flow(CREATE_NOTE_FLOW, "u1", Params::new()).unwrap().execution_id;
        m.process_flow_input(&id, "recipes", None).unwrap();
        m.process_flow_input(&id, "eggs", None).unwrap();
        m.process_flow_input(&id, "yes", None).unwrap();

        let r = m.fail_flow(&id, "note already exists: recipes.md").unwrap();
        assert_eq!(r.state, FlowState::Error);
        assert!(r.is_finished());
        assert!(r.message.contains("note already exists"));
        assert!(m.execution(&id).is_none());

        let stats = m.statistics();
        assert_eq!((stats.completed, stats.errored, stats.active), (0, 1, 0));
        let archived = m.completed_history().last().unwrap();
        assert_eq!(archived.state, FlowState::Error);
        assert_eq!(archived.current_step, "create");
    }

    #[test]
    fn pause_and_resume() {
        let mut m = manager();
        let id = m.start_flow(CREATE_NOTE_FLOW, "u1", Params::new()).unwrap().execution_id;
        m.pause_flow(&id).unwrap();
        assert!(m.process_flow_input(&id, "x", None).is_err());
        assert!(m.pause_flow(&id).is_err());
        let r = m.resume_flow(&id).unwrap();
        assert_eq!(r.state, FlowState::WaitingInput);
        assert_eq!(r.message, "What should the new note be called?");
    }

    #[test]
    fn expired_flows_are_cancelled() {
        let mut m = manager();
        let id = m.start_flow(CREATE_NOTE_FLOW, "u1", Params::new()).unwrap().execution_id;
        assert!(m.cleanup_expired_flows().is_empty());
        let later = Utc::now() + chrono::Duration::minutes(31);
        assert_eq!(m.cleanup_expired_flows_at(later), vec![id.clone()]);
        assert!(m.active_flow_for_user("u1").is_none());
        assert_eq!(m.statistics().timed_out, 1);
    }

    #[test]
    fn cancel_word_ends_flow() {
        let mut m = manager();
        let id = m.start_flow(RESEARCH_FLOW, "u1", Params::new()).unwrap().execution_id;
        let r = m.process_flow_input(&id, "quit", None).unwrap();
        assert!(r.is_finished());
        assert_eq!(m.statistics().cancelled, 1);
    }

    #[test]
    fn export_import_round_trip() {
        let m = manager();
        let exported = m.export_flow_data();
        let json = serde_json::to_string(&exported).unwrap();
        let parsed: FlowExport = serde_json::from_str(&json).unwrap();

        let mut other = ConversationFlowManager::empty(&FlowConfig::default());
        assert_eq!(other.import_flow_data(parsed).unwrap(), 2);
        for flow in m.flows() {
            let copy = other.flow(&flow.flow_id).unwrap();
            assert_eq!(copy.steps, flow.steps);
            assert_eq!(copy.start_step, flow.start_step);
        }
    }

    #[test]
    fn register_rejects_dangling_steps() {
        let mut m = manager();
        let mut flow = crate::flow::templates::create_note_flow();
        flow.flow_id = "broken".into();
        flow.start_step = "missing".into();
        assert!(m.register_flow(flow).is_err());
        assert!(m.flow("broken").is_none());
    }
}
