use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::layer::{ContextLayer, ContextScope, ContextValue};
use super::resolver::{resolve, ContextSnapshot};

pub const MESSAGE_COUNT_KEY: &str = "message_count";
pub const ERROR_COUNT_KEY: &str = "error_count";
pub const TASK_TITLE_KEY: &str = "task_title";
pub const TASK_STATUS_KEY: &str = "task_status";

/// Process-wide Global, Project and Task layers.
///
/// Global is fixed at construction. Project and Task are replaced wholesale by
/// operator commands; writers are serialized by the per-layer lock.
#[derive(Debug)]
pub struct ContextStore {
    global: ContextLayer,
    project: RwLock<ContextLayer>,
    task: RwLock<ContextLayer>,
}

impl ContextStore {
    pub fn new(global: ContextLayer) -> Self {
        let global = ContextLayer::from_entries(ContextScope::Global, global.entries().clone());
        Self {
            global,
            project: RwLock::new(ContextLayer::new(ContextScope::Project)),
            task: RwLock::new(ContextLayer::new(ContextScope::Task)),
        }
    }

    pub fn global(&self) -> &ContextLayer {
        &self.global
    }

    pub fn project(&self) -> ContextLayer {
        read(&self.project).clone()
    }

    pub fn task(&self) -> ContextLayer {
        read(&self.task).clone()
    }

    pub fn set_project(&self, name: impl Into<String>, entries: BTreeMap<String, ContextValue>) {
        let mut layer = ContextLayer::from_entries(ContextScope::Project, entries);
        layer.set("project_name", name.into());
        *write(&self.project) = layer;
    }

    pub fn set_task(&self, title: impl Into<String>, entries: BTreeMap<String, ContextValue>) {
        let mut layer = ContextLayer::from_entries(ContextScope::Task, entries);
        layer.set(TASK_TITLE_KEY, title.into());
        layer.set(TASK_STATUS_KEY, "in_progress");
        layer.set("task_started_at", Utc::now().to_rfc3339());
        *write(&self.task) = layer;
    }

    /// Marks the current task completed. Returns false when no task is set.
    pub fn complete_task(&self) -> bool {
        let mut task = write(&self.task);
        if task.get(TASK_TITLE_KEY).is_none() {
            return false;
        }
        task.set(TASK_STATUS_KEY, "completed");
        task.set("task_completed_at", Utc::now().to_rfc3339());
        true
    }

    pub fn clear_task(&self) {
        *write(&self.task) = ContextLayer::new(ContextScope::Task);
    }

    pub fn resolve(&self, session: &Session) -> ContextSnapshot {
        let project = read(&self.project);
        let task = read(&self.task);
        resolve(Some(&self.global), Some(&*project), Some(&*task), Some(session.layer()))
    }
}

fn read(lock: &RwLock<ContextLayer>) -> RwLockReadGuard<'_, ContextLayer> {
    match lock.read() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn write(lock: &RwLock<ContextLayer>) -> RwLockWriteGuard<'_, ContextLayer> {
    match lock.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// One conversation. Owns its Session layer exclusively.
#[derive(Clone, Debug)]
pub struct Session {
    id: String,
    started_at: DateTime<Utc>,
    layer: ContextLayer,
}

impl Session {
    pub fn new() -> Self {
        Self::with_id(Uuid::new_v4().to_string())
    }

    pub fn with_id(id: impl Into<String>) -> Self {
        let id = id.into();
        let started_at = Utc::now();
        let layer = ContextLayer::new(ContextScope::Session)
            .with("session_id", id.clone())
            .with("session_started_at", started_at.to_rfc3339())
            .with(MESSAGE_COUNT_KEY, 0_i64)
            .with(ERROR_COUNT_KEY, 0_i64);
        Self { id, started_at, layer }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn layer(&self) -> &ContextLayer {
        &self.layer
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<ContextValue>) {
        self.layer.set(key, value);
    }

    pub fn message_count(&self) -> i64 {
        self.counter(MESSAGE_COUNT_KEY)
    }

    pub fn error_count(&self) -> i64 {
        self.counter(ERROR_COUNT_KEY)
    }

    pub fn increment_messages(&mut self) {
        self.bump(MESSAGE_COUNT_KEY);
    }

    pub fn increment_errors(&mut self) {
        self.bump(ERROR_COUNT_KEY);
    }

    fn counter(&self, key: &str) -> i64 {
        self.layer.get(key).and_then(ContextValue::as_integer).unwrap_or(0)
    }

    fn bump(&mut self, key: &str) {
        let next = self.counter(key).saturating_add(1);
        self.layer.set(key, next);
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}
