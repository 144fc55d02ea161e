mod helpers;

use helpers::{test_config, test_vault, DownGenerator, FakeGenerator, FakeVectorSearch, RECIPES};
use serde_json::{json, Value};
use std::sync::Arc;

use vaultmind::llm::compare_models;
use vaultmind::nlp::types::Params;
use vaultmind::tools::{ToolRegistry, ToolStatus};
use vaultmind::vault::Vault;

fn params(value: Value) -> Params {
    match value {
        Value::Object(map) => map,
        _ => panic!("params must be an object"),
    }
}

#[tokio::test]
async fn default_registry_without_backends() {
    let (tmp, vault) = test_vault();
    let registry = ToolRegistry::with_defaults(vault, None, None, &test_config(tmp.path()));
    assert_eq!(
        registry.names(),
        vec!["read_note", "write_note", "update_note", "search_notes", "list_notes"]
    );
}

#[tokio::test]
async fn read_write_update_through_registry() {
    let (tmp, vault) = test_vault();
    let registry = ToolRegistry::with_defaults(vault.clone(), None, None, &test_config(tmp.path()));

    let read = registry.execute("read_note", &params(json!({ "note_path": "recipes.md" }))).await;
    assert!(read.is_success(), "read failed: {}", read.error_text());
    assert_eq!(read.content, RECIPES);

    let write = registry
        .execute(
            "write_note",
            &params(json!({ "note_path": "inbox/todo.md", "content": "- call Sam" })),
        )
        .await;
    assert!(write.is_success(), "write failed: {}", write.error_text());
    assert_eq!(write.metadata["note_path"], "inbox/todo.md");

    let again = registry
        .execute("write_note", &params(json!({ "note_path": "inbox/todo.md", "content": "x" })))
        .await;
    assert_eq!(again.status, ToolStatus::Error, "existing note must not be overwritten");

    let update = registry
        .execute(
            "update_note",
            &params(json!({ "note_path": "inbox/todo.md", "content": "- buy milk", "backup": false })),
        )
        .await;
    assert!(update.is_success(), "update failed: {}", update.error_text());
    assert_eq!(vault.read("inbox/todo.md").await.unwrap(), "- call Sam\n- buy milk");
}

#[tokio::test]
async fn missing_required_parameter_is_rejected_before_running() {
    let (tmp, vault) = test_vault();
    let registry = ToolRegistry::with_defaults(vault, None, None, &test_config(tmp.path()));
    let result = registry.execute("write_note", &params(json!({ "note_path": "a.md" }))).await;
    assert_eq!(result.status, ToolStatus::Error);
    assert!(result.error_text().contains("content"), "got: {}", result.error_text());
}

#[tokio::test]
async fn disabled_and_unknown_tools_fail() {
    let (tmp, vault) = test_vault();
    let mut registry = ToolRegistry::with_defaults(vault, None, None, &test_config(tmp.path()));
    assert!(registry.set_enabled("list_notes", false));
    assert!(!registry.set_enabled("teleport", false));

    let listed = registry.execute("list_notes", &Params::new()).await;
    assert!(listed.error_text().contains("disabled"));
    let unknown = registry.execute("teleport", &Params::new()).await;
    assert!(unknown.error_text().contains("unknown tool"));
    assert!(!registry.enabled_names().contains(&"list_notes"));
}

#[tokio::test]
async fn search_finds_note_lines() {
    let (tmp, vault) = test_vault();
    let registry = ToolRegistry::with_defaults(vault, None, None, &test_config(tmp.path()));
    let result = registry.execute("search_notes", &params(json!({ "query": "OWNER" }))).await;
    assert!(result.is_success());
    assert_eq!(result.metadata["count"], 1);
    assert_eq!(result.metadata["matches"], json!(["projects/rust-ownership.md"]));
}

#[tokio::test]
async fn ai_process_reads_the_note_into_the_prompt() {
    let (tmp, vault) = test_vault();
    let generator = Arc::new(FakeGenerator::new("Pancakes need flour, eggs and milk."));
    let registry =
        ToolRegistry::with_defaults(vault, Some(generator.clone()), None, &test_config(tmp.path()));

    let result = registry
        .execute("ai_process", &params(json!({ "note_path": "recipes.md", "task": "summarize" })))
        .await;
    assert!(result.is_success(), "ai_process failed: {}", result.error_text());
    assert_eq!(result.metadata["task"], "summarize");
    assert_eq!(result.metadata["model"], "fake-model");
    let prompts = generator.prompts.lock().unwrap();
    assert!(prompts[0].contains("Pancakes: flour, eggs, milk."));
}

#[tokio::test]
async fn ai_process_rejects_unknown_task() {
    let (tmp, vault) = test_vault();
    let generator = Arc::new(FakeGenerator::new("unused"));
    let registry =
        ToolRegistry::with_defaults(vault, Some(generator.clone()), None, &test_config(tmp.path()));
    let result = registry
        .execute("ai_process", &params(json!({ "note_path": "recipes.md", "task": "translate" })))
        .await;
    assert_eq!(result.status, ToolStatus::Error);
    assert_eq!(generator.prompt_count(), 0);
}

#[tokio::test]
async fn unreachable_backend_is_reported() {
    let (tmp, vault) = test_vault();
    let registry =
        ToolRegistry::with_defaults(vault, Some(Arc::new(DownGenerator)), None, &test_config(tmp.path()));
    let result = registry
        .execute("ai_process", &params(json!({ "note_path": "recipes.md", "task": "enhance" })))
        .await;
    assert!(result.error_text().starts_with("AI backend unavailable"));
}

#[tokio::test]
async fn vector_search_respects_k() {
    let (tmp, vault) = test_vault();
    let search = Arc::new(FakeVectorSearch::with_ids(&[
        ("projects/rust-ownership.md", 0.91),
        ("daily-notes.md", 0.42),
        ("recipes.md", 0.10),
    ]));
    let registry = ToolRegistry::with_defaults(vault, None, Some(search), &test_config(tmp.path()));

    let result = registry
        .execute("vector_search", &params(json!({ "query": "borrowing", "k": 2 })))
        .await;
    assert!(result.is_success());
    assert_eq!(result.metadata["count"], 2);
    assert_eq!(
        result.metadata["matches"],
        json!(["projects/rust-ownership.md", "daily-notes.md"])
    );
}

#[tokio::test]
async fn function_schemas_skip_disabled_tools() {
    let (tmp, vault) = test_vault();
    let mut registry = ToolRegistry::with_defaults(vault, None, None, &test_config(tmp.path()));
    registry.set_enabled("update_note", false);

    let schemas = registry.function_schemas();
    let names: Vec<&str> = schemas
        .iter()
        .filter_map(|s| s["function"]["name"].as_str())
        .collect();
    assert_eq!(names, vec!["read_note", "write_note", "search_notes", "list_notes"]);
}

#[tokio::test]
async fn model_comparison_skips_failed_runs() {
    let comparison = compare_models(&DownGenerator, "hello", &["a".to_string(), "b".to_string()]).await;
    assert_eq!(comparison.runs.len(), 2);
    assert!(comparison.runs.iter().all(|r| r.error.is_some()));
    assert!(comparison.best().is_none());

    let generator = FakeGenerator::new("a long enough answer");
    let comparison = compare_models(&generator, "hello", &["x".to_string()]).await;
    assert_eq!(comparison.best().map(|r| r.model.as_str()), Some("x"));
    assert_eq!(generator.prompt_count(), 1);
}
