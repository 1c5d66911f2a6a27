use std::collections::VecDeque;
use std::fmt;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_TRACE_HISTORY_CAP: usize = 50;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    InitContext,
    Interpret,
    Decide,
    Invoke,
    UpdateState,
    Done,
}

/// The five working stages, in the only order a run may visit them.
pub const PIPELINE_STAGES: [Stage; 5] =
    [Stage::InitContext, Stage::Interpret, Stage::Decide, Stage::Invoke, Stage::UpdateState];

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InitContext => "init_context",
            Self::Interpret => "interpret",
            Self::Decide => "decide",
            Self::Invoke => "invoke",
            Self::UpdateState => "update_state",
            Self::Done => "done",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StageStatus {
    Completed,
    Failed { error: String },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceEntry {
    pub stage: Stage,
    pub input_digest: String,
    pub output_digest: String,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub status: StageStatus,
}

/// Short content fingerprint: the first 16 hex characters of a blake3 hash.
pub fn digest(text: &str) -> String {
    let hash = blake3::hash(text.as_bytes()).to_hex();
    hash.as_str().chars().take(16).collect()
}

/// Append-only record of one pipeline run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionTrace {
    pub run_id: String,
    pub session_id: String,
    pub input: String,
    pub entries: Vec<TraceEntry>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl ExecutionTrace {
    pub fn new(
        run_id: impl Into<String>,
        session_id: impl Into<String>,
        input: impl Into<String>,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            session_id: session_id.into(),
            input: input.into(),
            entries: Vec::with_capacity(PIPELINE_STAGES.len()),
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn record(&mut self, stage: Stage, input: &str, output: &str) {
        self.push(stage, input, output, StageStatus::Completed);
    }

    pub fn record_failure(&mut self, stage: Stage, input: &str, error: &str) {
        self.push(stage, input, error, StageStatus::Failed { error: error.to_string() });
    }

    fn push(&mut self, stage: Stage, input: &str, output: &str, status: StageStatus) {
        if self.finished_at.is_some() {
            return;
        }
        self.entries.push(TraceEntry {
            stage,
            input_digest: digest(input),
            output_digest: digest(output),
            timestamp: Utc::now(),
            status,
        });
    }

    pub fn finish(&mut self) {
        if self.finished_at.is_none() {
            self.finished_at = Some(Utc::now());
        }
    }

    pub fn stages(&self) -> Vec<Stage> {
        self.entries.iter().map(|entry| entry.stage).collect()
    }

    pub fn is_success(&self) -> bool {
        self.entries.iter().all(|entry| entry.status == StageStatus::Completed)
    }

    pub fn failed_stage(&self) -> Option<Stage> {
        self.entries.iter().find_map(|entry| match entry.status {
            StageStatus::Failed { .. } => Some(entry.stage),
            StageStatus::Completed => None,
        })
    }
}

/// Bounded in-memory history of finished traces, oldest evicted first.
#[derive(Debug)]
pub struct TraceHistory {
    cap: usize,
    traces: Mutex<VecDeque<ExecutionTrace>>,
}

impl TraceHistory {
    pub fn new(cap: usize) -> Self {
        let cap = cap.max(1);
        Self { cap, traces: Mutex::new(VecDeque::with_capacity(cap)) }
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    pub fn push(&self, trace: ExecutionTrace) {
        let mut traces = self.lock();
        while traces.len() >= self.cap {
            traces.pop_front();
        }
        traces.push_back(trace);
    }

    /// Up to `limit` traces, newest first.
    pub fn recent(&self, limit: usize) -> Vec<ExecutionTrace> {
        self.lock().iter().rev().take(limit).cloned().collect()
    }

    pub fn last(&self) -> Option<ExecutionTrace> {
        self.lock().back().cloned()
    }

    pub fn find(&self, run_id: &str) -> Option<ExecutionTrace> {
        self.lock().iter().find(|trace| trace.run_id == run_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<ExecutionTrace>> {
        match self.traces.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Default for TraceHistory {
    fn default() -> Self {
        Self::new(DEFAULT_TRACE_HISTORY_CAP)
    }
}
