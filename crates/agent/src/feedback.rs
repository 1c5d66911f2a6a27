use std::sync::{Arc, Mutex};

use crate::action::Action;

/// What a hook sees after a run committed its state update.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FeedbackEvent {
    pub run_id: String,
    pub session_id: String,
    pub input: String,
    pub action: Action,
    pub response: String,
}

/// Invoked after a successful UpdateState. Hooks observe; they cannot alter the run.
pub trait FeedbackHook: Send + Sync {
    fn after_update(&self, event: &FeedbackEvent);
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoopFeedback;

impl FeedbackHook for NoopFeedback {
    fn after_update(&self, _event: &FeedbackEvent) {}
}

/// Keeps every event in memory, for asserting on hook calls.
#[derive(Clone, Debug, Default)]
pub struct RecordingFeedback {
    events: Arc<Mutex<Vec<FeedbackEvent>>>,
}

impl RecordingFeedback {
    pub fn events(&self) -> Vec<FeedbackEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl FeedbackHook for RecordingFeedback {
    fn after_update(&self, event: &FeedbackEvent) {
        match self.events.lock() {
            Ok(mut events) => events.push(event.clone()),
            Err(poisoned) => poisoned.into_inner().push(event.clone()),
        }
    }
}
