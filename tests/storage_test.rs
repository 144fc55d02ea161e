use tempfile::TempDir;

use vaultmind::db;
use vaultmind::history::{ConversationLog, MessageRole, SqliteConversationLog};
use vaultmind::nlp::types::Intent;
use vaultmind::profile::{SqliteProfileStore, UserProfileStore};

#[test]
fn open_creates_new_db_at_nonexistent_path() {
    let tmp = TempDir::new().unwrap();
    let db_path = tmp.path().join("subdir").join("vaultmind.db");
    assert!(!db_path.exists());

    let conn = db::open_database(&db_path).unwrap();
    assert!(db_path.exists());

    let messages: i64 = conn
        .query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))
        .unwrap();
    let profiles: i64 = conn
        .query_row("SELECT COUNT(*) FROM user_profiles", [], |row| row.get(0))
        .unwrap();
    assert_eq!((messages, profiles), (0, 0));
    assert_eq!(
        db::migrations::get_schema_version(&conn).unwrap(),
        db::migrations::CURRENT_SCHEMA_VERSION
    );
}

#[test]
fn reopening_keeps_schema_version() {
    let tmp = TempDir::new().unwrap();
    let db_path = tmp.path().join("vaultmind.db");
    drop(db::open_database(&db_path).unwrap());
    let conn = db::open_database(&db_path).unwrap();
    assert_eq!(
        db::migrations::get_schema_version(&conn).unwrap(),
        db::migrations::CURRENT_SCHEMA_VERSION
    );
}

#[test]
fn profiles_survive_reopen() {
    let tmp = TempDir::new().unwrap();
    let db_path = tmp.path().join("vaultmind.db");

    {
        let store = SqliteProfileStore::new(db::open_database(&db_path).unwrap());
        store.update("alice", &mut |p| {
            p.record_intent(Intent::ReadNote, 12);
            p.record_file_access("recipes.md");
            p.record_tool_use("read_note");
        });
    }

    let store = SqliteProfileStore::new(db::open_database(&db_path).unwrap());
    let profile = store.get("alice").expect("profile should be persisted");
    assert_eq!(profile.recent_files, vec!["recipes.md"]);
    assert_eq!(profile.preferred_tool(), Some("read_note"));
    assert_eq!(profile.most_common_intent(), Some(Intent::ReadNote));
    assert!(store.get("bob").is_none());
}

#[test]
fn conversation_log_is_per_session() {
    let tmp = TempDir::new().unwrap();
    let db_path = tmp.path().join("vaultmind.db");

    let first = SqliteConversationLog::new(db::open_database(&db_path).unwrap(), "session-a");
    first.append(MessageRole::User, "read recipes.md").unwrap();
    first.append(MessageRole::Assistant, "Here's recipes.md:").unwrap();

    let second = SqliteConversationLog::new(db::open_database(&db_path).unwrap(), "session-b");
    second.append(MessageRole::User, "hello").unwrap();

    let recent = first.recent(10).unwrap();
    assert_eq!(recent.len(), 2);
    assert_eq!(recent[0].role, MessageRole::User);
    assert_eq!(recent[1].content, "Here's recipes.md:");

    let last_only = first.recent(1).unwrap();
    assert_eq!(last_only[0].role, MessageRole::Assistant);
    assert_eq!(second.recent(10).unwrap().len(), 1);
}
