//! Built-in flow templates.

use serde_json::json;
use std::collections::BTreeMap;

use super::types::{BranchingLogic, ConversationFlow, FlowStep, StepType};
use crate::nlp::types::Params;

pub const CREATE_NOTE_FLOW: &str = "create_note_flow";
pub const RESEARCH_FLOW: &str = "research_flow";

pub fn builtin_flows() -> Vec<ConversationFlow> {
    vec![create_note_flow(), research_flow()]
}

fn params(value: serde_json::Value) -> Params {
    match value {
        serde_json::Value::Object(map) => map,
        _ => Params::new(),
    }
}

fn flow(
    flow_id: &str,
    name: &str,
    description: &str,
    start_step: &str,
    steps: Vec<FlowStep>,
    triggers: &[&[&str]],
) -> ConversationFlow {
    ConversationFlow {
        flow_id: flow_id.to_string(),
        name: name.to_string(),
        description: description.to_string(),
        steps: steps.into_iter().map(|s| (s.step_id.clone(), s)).collect(),
        start_step: start_step.to_string(),
        triggers: triggers
            .iter()
            .map(|group| group.iter().map(|p| p.to_string()).collect())
            .collect(),
    }
}

/// title → content → confirm → create → done
pub fn create_note_flow() -> ConversationFlow {
    flow(
        CREATE_NOTE_FLOW,
        "Guided note creation",
        "Collects a title and content, confirms, then writes the note.",
        "title",
        vec![
            FlowStep::new("title", StepType::InputCollection, "What should the new note be called?")
                .requires(&["title"])
                .then(&["content"]),
            FlowStep::new("content", StepType::InputCollection, "What should \"{title}\" say?")
                .requires(&["content"])
                .then(&["confirm"]),
            FlowStep::new(
                "confirm",
                StepType::Confirmation,
                "Create \"{title}.md\" with this content?\n\n{content}\n\nReply yes or no.",
            )
            .then(&["create"]),
            FlowStep::new("create", StepType::ToolExecution, "Creating {title}.md...")
                .tool(
                    "write_note",
                    params(json!({ "note_path": "{title}.md", "content": "{content}" })),
                )
                .bind("note_path", "/note_path")
                .then(&["done"]),
            FlowStep::new("done", StepType::Completion, "Created {note_path}."),
        ],
        &[
            &["create a note", "guide"],
            &["create a note", "help"],
            &["new note", "guide"],
            &["guided note"],
        ],
    )
}

/// topic → search → decide → (create_new | enhance_existing) → done
pub fn research_flow() -> ConversationFlow {
    flow(
        RESEARCH_FLOW,
        "Topic research",
        "Searches the vault for a topic, then starts a new note or enhances an existing one.",
        "topic",
        vec![
            FlowStep::new("topic", StepType::InputCollection, "What topic do you want to research?")
                .requires(&["topic"])
                .then(&["search"]),
            FlowStep::new("search", StepType::ToolExecution, "Searching your notes for {topic}...")
                .tool("search_notes", params(json!({ "query": "{topic}", "limit": 5 })))
                .bind("matches", "/matches")
                .bind("match_count", "/count")
                .bind("first_match", "/matches/0")
                .then(&["decide"]),
            FlowStep::new(
                "decide",
                StepType::DecisionPoint,
                "I found {match_count} related note(s) on {topic}. Create a new note or enhance an existing one?",
            )
            .then(&["create_new", "enhance_existing"])
            .branching(BranchingLogic::ByParameter {
                parameter: "choice".to_string(),
                routes: BTreeMap::from([
                    ("create".to_string(), "create_new".to_string()),
                    ("enhance".to_string(), "enhance_existing".to_string()),
                    ("existing".to_string(), "enhance_existing".to_string()),
                    ("new".to_string(), "create_new".to_string()),
                ]),
                fallback: None,
            }),
            FlowStep::new("create_new", StepType::ToolExecution, "Starting a note on {topic}...")
                .tool(
                    "write_note",
                    params(json!({
                        "note_path": "{topic}.md",
                        "content": "# {topic}\n\n## Related notes\n\n{matches}\n"
                    })),
                )
                .then(&["done"]),
            FlowStep::new("enhance_existing", StepType::ToolExecution, "Enhancing {first_match}...")
                .tool(
                    "ai_process",
                    params(json!({ "note_path": "{first_match}", "task": "enhance" })),
                )
                .only_if("first_match")
                .then(&["done"]),
            FlowStep::new("done", StepType::Completion, "Research on {topic} is wrapped up."),
        ],
        &[&["research", "topic"], &["start", "research"], &["help me research"]],
    )
}
