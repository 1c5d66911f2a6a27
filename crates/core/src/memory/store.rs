use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::backend::{BackendError, MemoryBackend};
use super::record::{MemoryRecord, DEFAULT_CATEGORY};
use crate::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink};
use crate::guardrails::{ActionRequest, GuardrailEngine, GuardrailHit, SizeLimit, Verdict};

const MOST_ACCESSED_LIMIT: usize = 5;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum MemoryError {
    #[error("memory write blocked by `{rule_id}`: {message}")]
    GuardrailBlocked { rule_id: String, message: String, limit: Option<SizeLimit> },
    #[error("confirmation required by `{rule_id}`: {message}")]
    ConfirmationRequired { rule_id: String, message: String },
    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl MemoryError {
    pub fn rule_id(&self) -> Option<&str> {
        match self {
            Self::GuardrailBlocked { rule_id, .. } | Self::ConfirmationRequired { rule_id, .. } => {
                Some(rule_id)
            }
            Self::Backend(_) => None,
        }
    }

    pub fn limit_exceeded(&self) -> Option<SizeLimit> {
        match self {
            Self::GuardrailBlocked { limit, .. } => *limit,
            _ => None,
        }
    }

    fn blocked(hit: GuardrailHit) -> Self {
        Self::GuardrailBlocked {
            rule_id: hit.rule_id,
            message: hit.user_message,
            limit: hit.size_limit,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AccessCount {
    pub key: String,
    pub access_count: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MemoryStats {
    pub total_entries: usize,
    pub categories: Vec<String>,
    /// Up to five records, most recalled first.
    pub most_accessed: Vec<AccessCount>,
}

/// Whether a guardrail hit on a mutation is emitted to the audit sink here, or
/// was already emitted by the caller that evaluated the same request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum HitAudit {
    Emit,
    AlreadyEmitted,
}

/// Guarded, durable key-value memory.
///
/// Every mutation is evaluated by the guardrail engine under the write lock; a
/// BLOCK (or an unconfirmed CONFIRM on delete) returns before anything is touched.
/// The backend is written first and the in-process map only after it succeeds,
/// so a failed write leaves both unchanged.
pub struct MemoryStore {
    guardrails: Arc<GuardrailEngine>,
    backend: Arc<dyn MemoryBackend>,
    records: RwLock<BTreeMap<String, MemoryRecord>>,
    audit: Option<Arc<dyn AuditSink>>,
}

impl MemoryStore {
    pub async fn open(
        backend: Arc<dyn MemoryBackend>,
        guardrails: Arc<GuardrailEngine>,
    ) -> Result<Self, MemoryError> {
        let loaded = backend.load_all().await?;
        let records: BTreeMap<String, MemoryRecord> =
            loaded.into_iter().map(|record| (record.key.clone(), record)).collect();
        info!(event_name = "memory.store.opened", records = records.len(), "memory store loaded");

        Ok(Self { guardrails, backend, records: RwLock::new(records), audit: None })
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Stores `value` under `key` in the default category, replacing any prior
    /// value. Returns the verdict the write was admitted under so callers can
    /// surface warnings.
    pub async fn put(
        &self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<Verdict, MemoryError> {
        self.put_with(key.into(), value.into(), DEFAULT_CATEGORY.to_string(), HitAudit::Emit).await
    }

    pub async fn put_in(
        &self,
        key: impl Into<String>,
        value: impl Into<String>,
        category: impl Into<String>,
    ) -> Result<Verdict, MemoryError> {
        self.put_with(key.into(), value.into(), category.into(), HitAudit::Emit).await
    }

    /// Same as [`MemoryStore::put_in`] for a caller that already evaluated and
    /// audited this exact write. The guardrail is still enforced; only the audit
    /// event is not repeated.
    pub async fn put_cleared(
        &self,
        key: impl Into<String>,
        value: impl Into<String>,
        category: impl Into<String>,
    ) -> Result<Verdict, MemoryError> {
        self.put_with(key.into(), value.into(), category.into(), HitAudit::AlreadyEmitted).await
    }

    async fn put_with(
        &self,
        key: String,
        value: String,
        category: String,
        hit_audit: HitAudit,
    ) -> Result<Verdict, MemoryError> {
        let mut records = self.records.write().await;

        let request = ActionRequest::MemoryWrite { key: key.clone(), value: value.clone() };
        let verdict = self.guardrails.evaluate(&request);
        if hit_audit == HitAudit::Emit {
            self.audit_verdict(&verdict, &request);
        }
        if let Verdict::Block(hit) = verdict {
            warn!(
                event_name = "memory.put.blocked",
                key = %key,
                rule_id = %hit.rule_id,
                "memory write rejected by guardrail"
            );
            return Err(MemoryError::blocked(hit));
        }

        let record = match records.get(&key) {
            Some(existing) => existing.replaced_with(value, category),
            None => MemoryRecord::new(key.clone(), value).in_category(category),
        };
        self.backend.upsert(&record).await?;
        records.insert(key.clone(), record);

        debug!(event_name = "memory.put.committed", key = %key, verdict = verdict.as_str(), "memory write committed");
        Ok(verdict)
    }

    /// Plain read; does not count as an access.
    pub async fn get(&self, key: &str) -> Option<String> {
        self.records.read().await.get(key).map(|record| record.value.clone())
    }

    /// Reads `key` and records the access durably. Takes the write lock.
    pub async fn recall(&self, key: &str) -> Result<Option<String>, MemoryError> {
        let mut records = self.records.write().await;
        let Some(existing) = records.get(key) else {
            return Ok(None);
        };
        let mut accessed = existing.clone();
        accessed.access_count = accessed.access_count.saturating_add(1);
        self.backend.upsert(&accessed).await?;

        let value = accessed.value.clone();
        records.insert(key.to_string(), accessed);
        Ok(Some(value))
    }

    pub async fn record(&self, key: &str) -> Option<MemoryRecord> {
        self.records.read().await.get(key).cloned()
    }

    pub async fn all(&self) -> BTreeMap<String, MemoryRecord> {
        self.records.read().await.clone()
    }

    /// Removes `key`. Deletes are gated by `no_silent_delete`, so an unconfirmed
    /// call fails with `ConfirmationRequired` and leaves the record in place.
    pub async fn delete(&self, key: &str, confirmed: bool) -> Result<bool, MemoryError> {
        self.delete_with(key, confirmed, HitAudit::Emit).await
    }

    /// Delete counterpart of [`MemoryStore::put_cleared`].
    pub async fn delete_cleared(&self, key: &str, confirmed: bool) -> Result<bool, MemoryError> {
        self.delete_with(key, confirmed, HitAudit::AlreadyEmitted).await
    }

    async fn delete_with(
        &self,
        key: &str,
        confirmed: bool,
        hit_audit: HitAudit,
    ) -> Result<bool, MemoryError> {
        let mut records = self.records.write().await;

        let request = ActionRequest::MemoryDelete { key: key.to_string(), confirmed };
        self.admit_delete(&request, hit_audit)?;

        if !records.contains_key(key) {
            return Ok(false);
        }
        self.backend.remove(key).await?;
        records.remove(key);

        info!(event_name = "memory.delete.committed", key = %key, "memory record deleted");
        Ok(true)
    }

    /// Removes every record, or only those in `category`. Gated like a delete.
    pub async fn clear(&self, category: Option<&str>, confirmed: bool) -> Result<usize, MemoryError> {
        let mut records = self.records.write().await;

        let target = match category {
            Some(category) => format!("category:{category}"),
            None => "*".to_string(),
        };
        let request = ActionRequest::MemoryDelete { key: target, confirmed };
        self.admit_delete(&request, HitAudit::Emit)?;

        let keys: Vec<String> = records
            .values()
            .filter(|record| category.map_or(true, |category| record.category == category))
            .map(|record| record.key.clone())
            .collect();
        if keys.is_empty() {
            return Ok(0);
        }
        self.backend.remove_many(&keys).await?;
        for key in &keys {
            records.remove(key);
        }

        info!(event_name = "memory.clear.committed", category = ?category, removed = keys.len(), "memory cleared");
        Ok(keys.len())
    }

    /// Writes `imported` as one batch. Each record passes the write guardrails;
    /// a single BLOCK rejects the whole batch and nothing is written.
    pub async fn import(&self, imported: Vec<MemoryRecord>) -> Result<usize, MemoryError> {
        let mut records = self.records.write().await;

        for record in &imported {
            let request =
                ActionRequest::MemoryWrite { key: record.key.clone(), value: record.value.clone() };
            let verdict = self.guardrails.evaluate(&request);
            self.audit_verdict(&verdict, &request);
            if let Verdict::Block(hit) = verdict {
                warn!(
                    event_name = "memory.import.blocked",
                    key = %record.key,
                    rule_id = %hit.rule_id,
                    "memory import rejected by guardrail"
                );
                return Err(MemoryError::blocked(hit));
            }
        }

        self.backend.upsert_many(&imported).await?;
        let count = imported.len();
        for record in imported {
            records.insert(record.key.clone(), record);
        }

        info!(event_name = "memory.import.committed", records = count, "memory records imported");
        Ok(count)
    }

    /// Every record, ordered by key.
    pub async fn export(&self) -> Vec<MemoryRecord> {
        self.records.read().await.values().cloned().collect()
    }

    pub async fn by_category(&self, category: &str) -> Vec<MemoryRecord> {
        self.records
            .read()
            .await
            .values()
            .filter(|record| record.category == category)
            .cloned()
            .collect()
    }

    pub async fn categories(&self) -> Vec<String> {
        let records = self.records.read().await;
        let categories: BTreeSet<&str> =
            records.values().map(|record| record.category.as_str()).collect();
        categories.into_iter().map(str::to_string).collect()
    }

    pub async fn stats(&self) -> MemoryStats {
        let records = self.records.read().await;
        let categories: BTreeSet<&str> =
            records.values().map(|record| record.category.as_str()).collect();

        let mut most_accessed: Vec<AccessCount> = records
            .values()
            .map(|record| AccessCount { key: record.key.clone(), access_count: record.access_count })
            .collect();
        most_accessed.sort_by(|a, b| b.access_count.cmp(&a.access_count).then_with(|| a.key.cmp(&b.key)));
        most_accessed.truncate(MOST_ACCESSED_LIMIT);

        MemoryStats {
            total_entries: records.len(),
            categories: categories.into_iter().map(str::to_string).collect(),
            most_accessed,
        }
    }

    /// Case-insensitive match on key or value, ordered by key.
    pub async fn search(&self, query: &str) -> Vec<MemoryRecord> {
        let needle = query.to_lowercase();
        self.records
            .read()
            .await
            .values()
            .filter(|record| record.matches(&needle))
            .cloned()
            .collect()
    }

    pub async fn keys(&self) -> Vec<String> {
        self.records.read().await.keys().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    fn admit_delete(&self, request: &ActionRequest, hit_audit: HitAudit) -> Result<(), MemoryError> {
        let verdict = self.guardrails.evaluate(request);
        if hit_audit == HitAudit::Emit {
            self.audit_verdict(&verdict, request);
        }
        match verdict {
            Verdict::Block(hit) => Err(MemoryError::blocked(hit)),
            Verdict::Confirm(hit) => Err(MemoryError::ConfirmationRequired {
                rule_id: hit.rule_id,
                message: hit.user_message,
            }),
            Verdict::Allow | Verdict::Warn(_) => Ok(()),
        }
    }

    fn audit_verdict(&self, verdict: &Verdict, request: &ActionRequest) {
        let (Some(audit), Some(hit)) = (&self.audit, verdict.hit()) else {
            return;
        };
        let outcome = match verdict {
            Verdict::Warn(_) => AuditOutcome::Warned,
            _ => AuditOutcome::Rejected,
        };
        audit.emit(
            AuditEvent::new(
                format!("guardrail.{}", verdict.as_str()),
                AuditCategory::Guardrail,
                "memory-store",
                outcome,
            )
            .with_metadata("rule_id", hit.rule_id.clone())
            .with_metadata("severity", hit.severity.as_str())
            .with_metadata("request", request.summary()),
        );
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;

    use super::{AccessCount, MemoryError, MemoryStore};
    use crate::audit::{AuditCategory, InMemoryAuditSink};
    use crate::guardrails::{GuardrailEngine, Verdict, DEFAULT_MAX_VALUE_SIZE};
    use crate::memory::{BackendError, InMemoryBackend, MemoryBackend, MemoryRecord};

    async fn open(backend: &InMemoryBackend) -> MemoryStore {
        match MemoryStore::open(Arc::new(backend.clone()), Arc::new(GuardrailEngine::default()))
            .await
        {
            Ok(store) => store,
            Err(error) => panic!("store should open: {error}"),
        }
    }

    #[tokio::test]
    async fn put_then_get_survives_restart() {
        let backend = InMemoryBackend::new();
        let store = open(&backend).await;
        assert!(store.is_empty().await);

        let verdict = store.put("language", "python").await;
        assert_eq!(verdict, Ok(Verdict::Allow));
        assert_eq!(store.get("language").await.as_deref(), Some("python"));

        let restarted = open(&backend).await;
        assert_eq!(restarted.get("language").await.as_deref(), Some("python"));
        assert_eq!(restarted.all().await, store.all().await);
    }

    #[tokio::test]
    async fn size_limit_boundary_leaves_prior_value_untouched() {
        let backend = InMemoryBackend::new();
        let store = open(&backend).await;
        let accepted = "a".repeat(DEFAULT_MAX_VALUE_SIZE);

        assert!(store.put("bigdata", accepted.clone()).await.is_ok());
        let before = store.record("bigdata").await;

        let result = store.put("bigdata", "b".repeat(DEFAULT_MAX_VALUE_SIZE + 1)).await;
        let error = match result {
            Err(error) => error,
            Ok(verdict) => panic!("oversized write should be blocked, got {verdict:?}"),
        };
        assert_eq!(error.rule_id(), Some("memory_size_limit"));
        let limit = error.limit_exceeded().map(|limit| (limit.size, limit.limit));
        assert_eq!(limit, Some((DEFAULT_MAX_VALUE_SIZE + 1, DEFAULT_MAX_VALUE_SIZE)));

        assert_eq!(store.record("bigdata").await, before);
        assert_eq!(open(&backend).await.get("bigdata").await, Some(accepted));
    }

    #[tokio::test]
    async fn overwrite_keeps_created_at_and_refreshes_updated_at() {
        let store = open(&InMemoryBackend::new()).await;
        assert!(store.put("framework", "django").await.is_ok());
        let first = store.record("framework").await;
        assert!(store.put("framework", "flask").await.is_ok());
        let second = store.record("framework").await;

        let (Some(first), Some(second)) = (first, second) else {
            panic!("records should exist");
        };
        assert_eq!(second.value, "flask");
        assert_eq!(second.created_at, first.created_at);
        assert!(second.updated_at >= first.updated_at);
    }

    #[tokio::test]
    async fn delete_requires_confirmation() {
        let audit = InMemoryAuditSink::default();
        let store = open(&InMemoryBackend::new()).await.with_audit(Arc::new(audit.clone()));
        assert!(store.put("draft", "notes").await.is_ok());

        let unconfirmed = store.delete("draft", false).await;
        assert!(matches!(
            unconfirmed,
            Err(MemoryError::ConfirmationRequired { ref rule_id, .. }) if rule_id == "no_silent_delete"
        ));
        assert_eq!(store.get("draft").await.as_deref(), Some("notes"));
        assert_eq!(audit.events_in(AuditCategory::Guardrail).len(), 1);

        assert_eq!(store.delete("draft", true).await, Ok(true));
        assert_eq!(store.delete("draft", true).await, Ok(false));
        assert!(store.get("draft").await.is_none());
    }

    #[tokio::test]
    async fn search_matches_keys_and_values_case_insensitively() {
        let store = open(&InMemoryBackend::new()).await;
        for (key, value) in [("Language", "Python"), ("editor", "helix"), ("shell", "fish")] {
            assert!(store.put(key, value).await.is_ok());
        }

        let hits: Vec<String> =
            store.search("PYTH").await.into_iter().map(|record| record.key).collect();
        assert_eq!(hits, vec!["Language".to_string()]);
        assert_eq!(store.search("e").await.len(), 3);
        assert_eq!(store.keys().await, vec!["Language", "editor", "shell"]);
        assert_eq!(store.len().await, 3);
    }

    #[tokio::test]
    async fn categories_recall_counts_and_stats() {
        let backend = InMemoryBackend::new();
        let store = open(&backend).await;
        assert!(store.put("language", "rust").await.is_ok());
        assert!(store.put_in("current_goal", "ship 1.0", "task").await.is_ok());
        assert!(store.put_in("editor", "helix", "user").await.is_ok());

        assert_eq!(store.record("language").await.map(|record| record.category), Some("general".to_string()));
        assert_eq!(store.categories().await, vec!["general", "task", "user"]);
        let task: Vec<String> =
            store.by_category("task").await.into_iter().map(|record| record.key).collect();
        assert_eq!(task, vec!["current_goal".to_string()]);

        assert_eq!(store.recall("editor").await, Ok(Some("helix".to_string())));
        assert_eq!(store.recall("editor").await, Ok(Some("helix".to_string())));
        assert_eq!(store.recall("language").await, Ok(Some("rust".to_string())));
        assert_eq!(store.recall("missing").await, Ok(None));
        assert_eq!(store.get("editor").await.as_deref(), Some("helix"));

        let stats = store.stats().await;
        assert_eq!(stats.total_entries, 3);
        assert_eq!(stats.categories.len(), 3);
        assert_eq!(
            stats.most_accessed[..2],
            [
                AccessCount { key: "editor".to_string(), access_count: 2 },
                AccessCount { key: "language".to_string(), access_count: 1 },
            ]
        );

        let restarted = open(&backend).await;
        assert_eq!(restarted.record("editor").await.map(|record| record.access_count), Some(2));

        assert!(store.put_in("editor", "vim", "user").await.is_ok());
        assert_eq!(store.record("editor").await.map(|record| record.access_count), Some(2));
    }

    #[tokio::test]
    async fn clear_by_category_requires_confirmation() {
        let store = open(&InMemoryBackend::new()).await;
        assert!(store.put_in("current_goal", "ship", "task").await.is_ok());
        assert!(store.put_in("current_step", "2", "task").await.is_ok());
        assert!(store.put("language", "rust").await.is_ok());

        assert!(matches!(
            store.clear(Some("task"), false).await,
            Err(MemoryError::ConfirmationRequired { .. })
        ));
        assert_eq!(store.len().await, 3);

        assert_eq!(store.clear(Some("task"), true).await, Ok(2));
        assert_eq!(store.keys().await, vec!["language"]);
        assert_eq!(store.clear(Some("task"), true).await, Ok(0));
        assert_eq!(store.clear(None, true).await, Ok(1));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn import_is_all_or_nothing_under_the_size_limit() {
        let source = open(&InMemoryBackend::new()).await;
        assert!(source.put_in("editor", "helix", "user").await.is_ok());
        assert!(source.put("language", "rust").await.is_ok());
        let exported = source.export().await;
        assert_eq!(exported.len(), 2);

        let backend = InMemoryBackend::new();
        let target = open(&backend).await;
        let mut oversized = exported.clone();
        oversized.push(MemoryRecord::new("bigdata", "z".repeat(DEFAULT_MAX_VALUE_SIZE + 1)));
        let rejected = target.import(oversized).await;
        assert_eq!(rejected.as_ref().err().and_then(MemoryError::rule_id), Some("memory_size_limit"));
        assert!(target.is_empty().await);

        assert_eq!(target.import(exported.clone()).await, Ok(2));
        assert_eq!(open(&backend).await.export().await, exported);
    }

    #[tokio::test]
    async fn cleared_writes_skip_the_duplicate_audit_event() {
        let audit = InMemoryAuditSink::default();
        let store = open(&InMemoryBackend::new()).await.with_audit(Arc::new(audit.clone()));
        assert!(store.put("draft", "notes").await.is_ok());

        assert!(store.delete_cleared("draft", false).await.is_err());
        assert!(audit.events_in(AuditCategory::Guardrail).is_empty());
        assert_eq!(store.get("draft").await.as_deref(), Some("notes"));

        assert!(store.delete("draft", false).await.is_err());
        assert_eq!(audit.events_in(AuditCategory::Guardrail).len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_puts_on_one_key_serialize() {
        let store = Arc::new(open(&InMemoryBackend::new()).await);
        let first = "x".repeat(4_000);
        let second = "y".repeat(4_000);

        let a = tokio::spawn({
            let store = Arc::clone(&store);
            let value = first.clone();
            async move { store.put("shared", value).await }
        });
        let b = tokio::spawn({
            let store = Arc::clone(&store);
            let value = second.clone();
            async move { store.put("shared", value).await }
        });
        let reader = tokio::spawn({
            let store = Arc::clone(&store);
            async move {
                let mut seen = Vec::new();
                for _ in 0..50 {
                    if let Some(value) = store.get("shared").await {
                        seen.push(value);
                    }
                    tokio::task::yield_now().await;
                }
                seen
            }
        });

        let (a, b, seen) = (a.await, b.await, reader.await);
        assert!(matches!(a, Ok(Ok(_))));
        assert!(matches!(b, Ok(Ok(_))));
        let seen = seen.unwrap_or_default();
        for value in seen {
            assert!(value == first || value == second, "observed an interleaved value");
        }
        let last = store.get("shared").await;
        assert!(last == Some(first) || last == Some(second));
    }

    struct FailingBackend;

    #[async_trait]
    impl MemoryBackend for FailingBackend {
        async fn load_all(&self) -> Result<Vec<MemoryRecord>, BackendError> {
            Ok(Vec::new())
        }

        async fn upsert(&self, _record: &MemoryRecord) -> Result<(), BackendError> {
            Err(BackendError::Storage("disk full".to_string()))
        }

        async fn remove(&self, _key: &str) -> Result<bool, BackendError> {
            Err(BackendError::Storage("disk full".to_string()))
        }
    }

    #[tokio::test]
    async fn backend_failure_leaves_map_unchanged() {
        let store = match MemoryStore::open(
            Arc::new(FailingBackend),
            Arc::new(GuardrailEngine::default()),
        )
        .await
        {
            Ok(store) => store,
            Err(error) => panic!("store should open: {error}"),
        };

        let result = store.put("key", "value").await;
        assert!(matches!(result, Err(MemoryError::Backend(BackendError::Storage(_)))));
        assert!(store.get("key").await.is_none());
    }
}
