use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const DEFAULT_AUDIT_CAPACITY: usize = 50;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditCategory {
    Guardrail,
    Memory,
    Plan,
    Pipeline,
    Context,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditOutcome {
    Success,
    Warned,
    Rejected,
    Failed,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: String,
    pub session_id: Option<String>,
    pub run_id: Option<String>,
    pub event_type: String,
    pub category: AuditCategory,
    pub actor: String,
    pub outcome: AuditOutcome,
    pub metadata: BTreeMap<String, String>,
    pub occurred_at: DateTime<Utc>,
    #[serde(default)]
    pub resolution: Option<String>,
}

impl AuditEvent {
    pub fn new(
        event_type: impl Into<String>,
        category: AuditCategory,
        actor: impl Into<String>,
        outcome: AuditOutcome,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            session_id: None,
            run_id: None,
            event_type: event_type.into(),
            category,
            actor: actor.into(),
            outcome,
            metadata: BTreeMap::new(),
            occurred_at: Utc::now(),
            resolution: None,
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_run(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

pub trait AuditSink: Send + Sync {
    fn emit(&self, event: AuditEvent);
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AuditStats {
    pub total: usize,
    pub unresolved: usize,
    pub resolved: usize,
    pub event_types: Vec<String>,
}

/// Bounded in-process audit log, oldest evicted first. Clones share the log.
#[derive(Clone)]
pub struct InMemoryAuditSink {
    capacity: usize,
    events: Arc<Mutex<VecDeque<AuditEvent>>>,
}

impl InMemoryAuditSink {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self { capacity, events: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))) }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.lock().iter().cloned().collect()
    }

    pub fn events_in(&self, category: AuditCategory) -> Vec<AuditEvent> {
        self.lock().iter().filter(|event| event.category == category).cloned().collect()
    }

    pub fn unresolved(&self) -> Vec<AuditEvent> {
        self.lock().iter().filter(|event| event.resolution.is_none()).cloned().collect()
    }

    /// Attaches `resolution` to the event. `false` when the id is unknown or
    /// already evicted.
    pub fn resolve(&self, event_id: &str, resolution: impl Into<String>) -> bool {
        let mut events = self.lock();
        match events.iter_mut().find(|event| event.event_id == event_id) {
            Some(event) => {
                event.resolution = Some(resolution.into());
                true
            }
            None => false,
        }
    }

    pub fn stats(&self) -> AuditStats {
        let events = self.lock();
        let resolved = events.iter().filter(|event| event.resolution.is_some()).count();
        let event_types: BTreeSet<&str> = events.iter().map(|event| event.event_type.as_str()).collect();
        AuditStats {
            total: events.len(),
            unresolved: events.len() - resolved,
            resolved,
            event_types: event_types.into_iter().map(str::to_string).collect(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<AuditEvent>> {
        match self.events.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Default for InMemoryAuditSink {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_AUDIT_CAPACITY)
    }
}

impl AuditSink for InMemoryAuditSink {
    fn emit(&self, event: AuditEvent) {
        let mut events = self.lock();
        while events.len() >= self.capacity {
            events.pop_front();
        }
        events.push_back(event);
    }
}

/// Forwards audit events to the tracing subscriber.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn emit(&self, event: AuditEvent) {
        let metadata = serde_json::to_string(&event.metadata).unwrap_or_default();
        tracing::info!(
            event_name = "audit.event",
            audit_event_type = %event.event_type,
            category = ?event.category,
            outcome = ?event.outcome,
            actor = %event.actor,
            session_id = event.session_id.as_deref().unwrap_or(""),
            run_id = event.run_id.as_deref().unwrap_or(""),
            metadata = %metadata,
            "audit event"
        );
    }
}

/// Fans one event out to several sinks.
#[derive(Clone, Default)]
pub struct CompositeAuditSink {
    sinks: Vec<Arc<dyn AuditSink>>,
}

impl CompositeAuditSink {
    pub fn new(sinks: Vec<Arc<dyn AuditSink>>) -> Self {
        Self { sinks }
    }
}

impl AuditSink for CompositeAuditSink {
    fn emit(&self, event: AuditEvent) {
        for sink in &self.sinks {
            sink.emit(event.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::audit::{
        AuditCategory, AuditEvent, AuditOutcome, AuditSink, CompositeAuditSink,
        InMemoryAuditSink, TracingAuditSink,
    };

    #[test]
    fn in_memory_sink_records_events_with_correlation_fields() {
        let sink = InMemoryAuditSink::default();
        sink.emit(
            AuditEvent::new(
                "guardrail.blocked",
                AuditCategory::Guardrail,
                "memory-store",
                AuditOutcome::Rejected,
            )
            .with_session("session-1")
            .with_run("run-42")
            .with_metadata("rule_id", "memory_size_limit")
            .with_metadata("key", "bigdata"),
        );

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].session_id.as_deref(), Some("session-1"));
        assert_eq!(events[0].run_id.as_deref(), Some("run-42"));
        assert_eq!(events[0].metadata.get("rule_id").map(String::as_str), Some("memory_size_limit"));
    }

    #[test]
    fn composite_sink_fans_out_and_filters_by_category() {
        let memory = InMemoryAuditSink::default();
        let composite = CompositeAuditSink::new(vec![
            Arc::new(memory.clone()) as Arc<dyn AuditSink>,
            Arc::new(TracingAuditSink),
        ]);

        composite.emit(AuditEvent::new(
            "plan.goal_started",
            AuditCategory::Plan,
            "plan-tracker",
            AuditOutcome::Success,
        ));
        composite.emit(AuditEvent::new(
            "guardrail.warned",
            AuditCategory::Guardrail,
            "pipeline",
            AuditOutcome::Warned,
        ));

        assert_eq!(memory.events().len(), 2);
        assert_eq!(memory.events_in(AuditCategory::Guardrail).len(), 1);
    }

    #[test]
    fn in_memory_sink_evicts_oldest_at_capacity() {
        let sink = InMemoryAuditSink::with_capacity(3);
        for index in 0..5 {
            sink.emit(
                AuditEvent::new(
                    "guardrail.block",
                    AuditCategory::Guardrail,
                    "pipeline",
                    AuditOutcome::Rejected,
                )
                .with_metadata("index", index.to_string()),
            );
        }

        let kept: Vec<String> = sink
            .events()
            .iter()
            .filter_map(|event| event.metadata.get("index").cloned())
            .collect();
        assert_eq!(kept, vec!["2", "3", "4"]);
        assert_eq!(InMemoryAuditSink::default().capacity(), 50);
    }

    #[test]
    fn resolved_events_leave_the_unresolved_view() {
        let sink = InMemoryAuditSink::default();
        sink.emit(AuditEvent::new("guardrail.block", AuditCategory::Guardrail, "pipeline", AuditOutcome::Rejected));
        sink.emit(AuditEvent::new("guardrail.warn", AuditCategory::Guardrail, "pipeline", AuditOutcome::Warned));
        let first = sink.events()[0].event_id.clone();

        assert!(sink.resolve(&first, "used a safer command"));
        assert!(!sink.resolve("unknown", "nothing"));

        let unresolved = sink.unresolved();
        assert_eq!(unresolved.len(), 1);
        assert_eq!(unresolved[0].event_type, "guardrail.warn");

        let stats = sink.stats();
        assert_eq!((stats.total, stats.resolved, stats.unresolved), (2, 1, 1));
        assert_eq!(stats.event_types, vec!["guardrail.block", "guardrail.warn"]);
    }
}
