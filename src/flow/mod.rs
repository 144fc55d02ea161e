//! Multi-turn conversation flows.
//!
//! A [`ConversationFlow`] is a template of typed steps; a [`FlowExecution`]
//! is one user's run through it. [`ConversationFlowManager`] drives the state
//! machine: input collection and confirmation steps wait on the user,
//! decision steps branch, tool steps hand a [`ToolRequest`] back to the
//! caller and completion steps retire the execution.

pub mod manager;
pub mod templates;
pub mod types;

pub use manager::{classify_confirmation, is_cancel_request, ConversationFlowManager, FlowStatistics};
pub use templates::{builtin_flows, CREATE_NOTE_FLOW, RESEARCH_FLOW};
pub use types::{
    BranchingLogic, ConversationFlow, FlowContext, FlowError, FlowExecution, FlowExport, FlowResponse, FlowState,
    FlowStep, StepAction, StepRecord, StepType, ToolRequest,
};
