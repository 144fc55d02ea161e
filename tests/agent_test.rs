mod helpers;

use helpers::{test_agent, test_config, test_vault, RECIPES};
use std::sync::Arc;

use vaultmind::history::{ConversationLog, InMemoryConversationLog, MessageRole};
use vaultmind::profile::UserProfileStore;
use vaultmind::vault::Vault;

#[tokio::test]
async fn read_request_runs_read_note() {
    let (tmp, vault) = test_vault();
    let (mut agent, _) = test_agent(&test_config(tmp.path()), vault, None);

    let reply = agent.chat("read my daily notes").await;
    assert!(reply.contains("Monday: planned the sprint."), "reply: {reply}");
    assert_eq!(agent.stats().tools_executed, 1);
    assert_eq!(agent.stats().tool_failures, 0);
    assert_eq!(agent.selector().get_tool_statistics()["read_note"].total_executions, 1);
}

#[tokio::test]
async fn search_request_lists_matching_note() {
    let (tmp, vault) = test_vault();
    let (mut agent, _) = test_agent(&test_config(tmp.path()), vault, None);

    let reply = agent.chat("search my notes for borrowing").await;
    assert!(reply.contains("projects/rust-ownership.md"), "reply: {reply}");
}

#[tokio::test]
async fn empty_and_nonsense_messages_still_get_replies() {
    let (tmp, vault) = test_vault();
    let (mut agent, _) = test_agent(&test_config(tmp.path()), vault, None);

    for message in ["", "   ", "qwzx plorb", "?!"] {
        let reply = agent.chat(message).await;
        assert!(!reply.trim().is_empty(), "no reply for {message:?}");
    }
    assert_eq!(agent.stats().tools_executed, 0);
    assert_eq!(agent.stats().messages_processed, 4);
}

#[tokio::test]
async fn disabled_tool_is_never_run() {
    let (tmp, vault) = test_vault();
    let (mut agent, _) = test_agent(&test_config(tmp.path()), vault, None);
    assert!(agent.set_tool_enabled("read_note", false));

    let reply = agent.chat("read my daily notes").await;
    assert!(!reply.contains("Monday: planned the sprint."), "reply: {reply}");
    assert_eq!(agent.stats().tools_executed, 0);
}

#[tokio::test]
async fn guided_note_flow_creates_the_note() {
    let (tmp, vault) = test_vault();
    let (mut agent, _) = test_agent(&test_config(tmp.path()), vault.clone(), None);

    let reply = agent.chat("guided note").await;
    assert!(reply.contains("What should the new note be called?"), "reply: {reply}");
    assert!(agent.active_flow_id().is_some());

    let reply = agent.chat("groceries").await;
    assert!(reply.contains("groceries"), "reply: {reply}");

    let reply = agent.chat("eggs and milk").await;
    assert!(reply.contains("Reply yes or no"), "reply: {reply}");

    let reply = agent.chat("yes").await;
    assert!(reply.contains("Created groceries.md."), "reply: {reply}");
    assert!(agent.active_flow_id().is_none());

    assert_eq!(vault.read("groceries.md").await.unwrap(), "eggs and milk");
    let stats = agent.stats();
    assert_eq!(stats.flows_started, 1);
    assert_eq!(stats.flows_completed, 1);
    assert_eq!(agent.flows().statistics().completed, 1);
    assert!(agent.flows().active_executions().next().is_none());
}

#[tokio::test]
async fn failed_write_stops_the_flow_without_completing_it() {
    let (tmp, vault) = test_vault();
    let (mut agent, _) = test_agent(&test_config(tmp.path()), vault.clone(), None);

    agent.chat("guided note").await;
    agent.chat("recipes").await;
    agent.chat("waffles").await;
    let reply = agent.chat("yes").await;

    assert!(reply.contains("note already exists"), "reply: {reply}");
    assert!(!reply.contains("Created recipes.md"), "reply: {reply}");
    assert!(agent.active_flow_id().is_none());
    assert_eq!(vault.read("recipes.md").await.unwrap(), RECIPES);

    let stats = agent.stats();
    assert_eq!(stats.flows_completed, 0);
    assert_eq!(stats.tool_failures, 1);
    assert_eq!(agent.flows().statistics().errored, 1);
    assert_eq!(agent.flows().statistics().completed, 0);
}

#[tokio::test]
async fn research_with_no_matches_creates_instead_of_enhancing() {
    let (tmp, vault) = test_vault();
    let (mut agent, _) = test_agent(&test_config(tmp.path()), vault.clone(), None);

    agent.chat("help me research quantum").await;
    let reply = agent.chat("zzqqxx").await;
    assert!(reply.contains("found 0 related"), "reply: {reply}");

    let reply = agent.chat("enhance").await;
    assert!(!reply.contains("{first_match}"), "reply: {reply}");
    assert!(reply.contains("Research on zzqqxx is wrapped up."), "reply: {reply}");
    assert!(vault.read("zzqqxx.md").await.unwrap().starts_with("# zzqqxx"));
    assert_eq!(agent.stats().tool_failures, 0);
    assert_eq!(agent.stats().flows_completed, 1);
}

#[tokio::test]
async fn cancel_word_leaves_the_flow() {
    let (tmp, vault) = test_vault();
    let (mut agent, _) = test_agent(&test_config(tmp.path()), vault.clone(), None);

    agent.chat("guided note").await;
    agent.chat("shopping").await;
    agent.chat("cancel").await;

    assert!(agent.active_flow_id().is_none());
    assert_eq!(agent.stats().flows_completed, 0);
    assert_eq!(agent.flows().statistics().cancelled, 1);
    assert!(vault.read("shopping.md").await.is_err());

    // Normal routing resumes after the flow is gone.
    let reply = agent.chat("read my daily notes").await;
    assert!(reply.contains("Monday: planned the sprint."), "reply: {reply}");
}

#[tokio::test]
async fn slash_commands() {
    let (tmp, vault) = test_vault();
    let (mut agent, _) = test_agent(&test_config(tmp.path()), vault, None);

    assert!(agent.chat("/help").await.starts_with("Here's what I can do"));
    assert!(agent.chat("/flows").await.contains("Guided note creation"));
    assert!(agent.chat("/features").await.contains("read_note"));
    assert!(agent.chat("/stats").await.contains("Messages processed: 4"));
    assert!(agent.chat("/cancel").await.contains("no active flow"));
    assert!(agent.chat("/teleport").await.starts_with("Unknown command /teleport"));
    assert!(agent.chat("/patterns").await.contains("--user"));

    assert_eq!(agent.chat("/reset").await, "Conversation reset.");
    assert_eq!(agent.stats().messages_processed, 0);
}

#[tokio::test]
async fn reset_cancels_an_active_flow() {
    let (tmp, vault) = test_vault();
    let (mut agent, _) = test_agent(&test_config(tmp.path()), vault, None);

    agent.chat("guided note").await;
    assert_eq!(agent.chat("/reset").await, "Conversation reset.");
    assert!(agent.active_flow_id().is_none());
    assert_eq!(agent.flows().statistics().cancelled, 1);
    assert_eq!(agent.flows().completed_history().last().unwrap().cancel_reason.as_deref(), Some("reset"));
}

#[tokio::test]
async fn patterns_reflect_what_the_user_did() {
    let (tmp, vault) = test_vault();
    let (agent, profiles) = test_agent(&test_config(tmp.path()), vault, None);
    let mut agent = agent.with_user("alice");

    agent.chat("read my daily notes").await;
    let report = agent.chat("/patterns").await;
    assert!(report.contains("Most used tool: read_note"), "report: {report}");

    let profile = profiles.get("alice").unwrap();
    assert_eq!(profile.tool_usage["read_note"], 1);
}

#[tokio::test]
async fn every_exchange_is_logged() {
    let (tmp, vault) = test_vault();
    let (agent, _) = test_agent(&test_config(tmp.path()), vault, None);
    let log = Arc::new(InMemoryConversationLog::new());
    let mut agent = agent.with_log(log.clone());

    let reply = agent.chat("list my notes").await;
    let messages = log.recent(10).unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].role, MessageRole::User);
    assert_eq!(messages[0].content, "list my notes");
    assert_eq!(messages[1].role, MessageRole::Assistant);
    assert_eq!(messages[1].content, reply);
}
