use std::sync::Arc;

use strata_core::guardrails::{GuardrailEngine, DEFAULT_MAX_VALUE_SIZE};
use strata_core::memory::{MemoryError, MemoryStore};
use strata_db::{connect_with_settings, migrations, SqlMemoryBackend};

async fn open_store(url: &str) -> MemoryStore {
    let pool = connect_with_settings(url, 1, 30).await.expect("connect");
    migrations::run_pending(&pool).await.expect("migrate");
    MemoryStore::open(Arc::new(SqlMemoryBackend::new(pool)), Arc::new(GuardrailEngine::default()))
        .await
        .expect("open store")
}

#[tokio::test]
async fn committed_writes_survive_a_restart() {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = format!("sqlite://{}", dir.path().join("strata.db").display());

    {
        let store = open_store(&url).await;
        assert!(store.is_empty().await);
        store.put("language", "Python").await.expect("put");
        store.put("language", "Rust").await.expect("replace");
        store.put("editor", "helix").await.expect("put");
        assert!(store.delete("editor", true).await.expect("delete"));
    }

    let reopened = open_store(&url).await;
    assert_eq!(reopened.get("language").await.as_deref(), Some("Rust"));
    assert_eq!(reopened.get("editor").await, None);
    assert_eq!(reopened.keys().await, vec!["language".to_string()]);
}

#[tokio::test]
async fn blocked_write_leaves_persisted_state_unchanged() {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = format!("sqlite://{}", dir.path().join("strata.db").display());

    {
        let store = open_store(&url).await;
        store.put("bigdata", "x".repeat(DEFAULT_MAX_VALUE_SIZE)).await.expect("at limit");
        let error = store
            .put("bigdata", "y".repeat(DEFAULT_MAX_VALUE_SIZE + 1))
            .await
            .expect_err("over limit");
        assert!(matches!(error, MemoryError::GuardrailBlocked { .. }));
    }

    let reopened = open_store(&url).await;
    let value = reopened.get("bigdata").await.expect("value persisted");
    assert_eq!(value, "x".repeat(DEFAULT_MAX_VALUE_SIZE));
}
