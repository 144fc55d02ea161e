mod helpers;

use helpers::{test_config, test_vault};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use vaultmind::nlp::types::{EnhancedProcessingResult, Intent, Params, ProcessingResult};
use vaultmind::nlp::{ConversationContext, EnhancedLanguageProcessor};
use vaultmind::profile::{InMemoryProfileStore, UserProfileStore};
use vaultmind::selection::SmartToolSelector;
use vaultmind::vault::Vault;

async fn processor_over_vault() -> (tempfile::TempDir, EnhancedLanguageProcessor) {
    let (tmp, vault) = test_vault();
    let config = test_config(tmp.path());
    let profiles: Arc<dyn UserProfileStore> = Arc::new(InMemoryProfileStore::new());
    let mut processor = EnhancedLanguageProcessor::new(&config.nlp, Some(config.resolved_vault_root()), profiles);
    processor.set_vault_files(vault.list("**/*.md").await.unwrap());
    (tmp, processor)
}

fn search_result(query: &str) -> EnhancedProcessingResult {
    let mut parameters = Params::new();
    parameters.insert("query".into(), json!(query));
    EnhancedProcessingResult::from_base(ProcessingResult {
        intent: Intent::SearchNotes,
        tool_name: Some("search_notes".into()),
        parameters,
        confidence: 0.9,
        missing_parameters: vec![],
        suggestions: vec![],
        needs_confirmation: false,
        context_used: false,
    })
}

#[tokio::test]
async fn read_request_resolves_to_vault_note() {
    let (_tmp, processor) = processor_over_vault().await;
    let result = processor.process_message("read my daily notes", None);

    assert_eq!(result.intent(), Intent::ReadNote);
    assert_eq!(result.tool_name(), Some("read_note"));
    assert!(
        result.file_matches.iter().any(|m| m.path == "daily-notes.md"),
        "matches: {:?}",
        result.file_matches
    );
}

#[tokio::test]
async fn empty_message_is_unknown_with_suggestions() {
    let (_tmp, processor) = processor_over_vault().await;
    let result = processor.process_message("", None);

    assert_eq!(result.intent(), Intent::Unknown);
    assert_eq!(result.confidence(), 0.0);
    assert!(!result.base.suggestions.is_empty());
}

#[tokio::test]
async fn processed_read_selects_read_note_with_path() {
    let (_tmp, processor) = processor_over_vault().await;
    let profiles: Arc<dyn UserProfileStore> = Arc::new(InMemoryProfileStore::new());
    let selector = SmartToolSelector::new(
        &["read_note", "write_note", "search_notes", "list_notes"],
        &Default::default(),
        profiles,
    );

    let result = processor.process_message("read my daily notes", None);
    let selection = selector.select_tool(&result, processor.context(), None).await;

    assert_eq!(selection.selected_tool, "read_note");
    assert_eq!(selection.parameters["note_path"], "daily-notes.md");
    assert!(selection.is_valid(), "errors: {:?}", selection.validation_errors);
    assert!(selection.confidence > 0.6, "confidence {}", selection.confidence);
}

#[tokio::test]
async fn better_track_record_wins_a_tied_search() {
    let profiles: Arc<dyn UserProfileStore> = Arc::new(InMemoryProfileStore::new());
    let mut selector = SmartToolSelector::new(&["search_notes", "vector_search"], &Default::default(), profiles);
    let result = search_result("ownership");
    let context = ConversationContext::new();

    let outcomes = [
        ("search_notes", true),
        ("search_notes", false),
        ("search_notes", false),
        ("search_notes", false),
        ("vector_search", true),
        ("vector_search", true),
    ];
    for (tool, success) in outcomes {
        let error = (!success).then_some("permission denied");
        selector.record_tool_execution_result(tool, success, Duration::from_millis(3), error, Intent::SearchNotes, None);
    }

    let selection = selector.select_tool(&result, &context, None).await;
    assert_eq!(selection.selected_tool, "vector_search");
    assert_eq!(selection.parameters["query"], "ownership");
    assert_eq!(selection.alternative_tools.len(), 1);
    assert_eq!(selection.alternative_tools[0].0, "search_notes");

    let stats = selector.get_tool_statistics();
    assert_eq!(stats["search_notes"].total_executions, 4);
    assert!((stats["search_notes"].success_rate - 0.25).abs() < 1e-9);
    assert_eq!(stats["vector_search"].success_rate, 1.0);
}
