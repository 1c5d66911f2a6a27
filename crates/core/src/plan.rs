use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::info;

use crate::errors::CapabilityError;

/// Injected goal decomposition capability.
#[async_trait]
pub trait Planner: Send + Sync {
    async fn plan(&self, goal: &str) -> Result<Vec<String>, CapabilityError>;
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PlanError {
    #[error("no active goal")]
    PlanNotFound,
    #[error(transparent)]
    Planning(#[from] CapabilityError),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanStep {
    /// Zero-based position in the plan.
    pub index: usize,
    pub description: String,
}

impl PlanStep {
    pub fn number(&self) -> usize {
        self.index + 1
    }
}

/// Why the step at `index` could not be carried out. The cursor stays on it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepFailure {
    pub index: usize,
    pub reason: String,
    pub failed_at: DateTime<Utc>,
}

/// Ordered step list with a cursor. `0 <= cursor <= steps.len()` always holds;
/// `cursor == steps.len()` means the goal is complete.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub goal_description: String,
    pub steps: Vec<String>,
    pub cursor: usize,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub last_failure: Option<StepFailure>,
}

impl Plan {
    pub fn new(goal_description: impl Into<String>, steps: Vec<String>) -> Self {
        Self {
            goal_description: goal_description.into(),
            steps,
            cursor: 0,
            started_at: Utc::now(),
            last_failure: None,
        }
    }

    pub fn current(&self) -> Option<PlanStep> {
        let description = self.steps.get(self.cursor)?.clone();
        Some(PlanStep { index: self.cursor, description })
    }

    pub fn is_complete(&self) -> bool {
        self.cursor >= self.steps.len()
    }

    pub fn remaining(&self) -> &[String] {
        self.steps.get(self.cursor..).unwrap_or(&[])
    }

    pub fn completed(&self) -> &[String] {
        self.steps.get(..self.cursor).unwrap_or(&[])
    }

    fn advance(&mut self) -> Option<PlanStep> {
        let step = self.current()?;
        self.cursor += 1;
        self.last_failure = None;
        Some(step)
    }
}

/// Splits planner output into trimmed, non-empty steps, falling back to a single
/// `Complete: <goal>` step when nothing usable remains.
pub fn normalize_steps(goal: &str, steps: Vec<String>) -> Vec<String> {
    let steps: Vec<String> = steps
        .into_iter()
        .map(|step| step.trim().to_string())
        .filter(|step| !step.is_empty())
        .collect();
    if steps.is_empty() {
        vec![format!("Complete: {}", goal.trim())]
    } else {
        steps
    }
}

/// Holds at most one active plan. All cursor moves go through one async mutex,
/// so `start_goal`, `next` and `run_all` are serialized against each other.
pub struct PlanTracker {
    planner: Arc<dyn Planner>,
    active: Mutex<Option<Plan>>,
}

impl PlanTracker {
    pub fn new(planner: Arc<dyn Planner>) -> Self {
        Self { planner, active: Mutex::new(None) }
    }

    /// Decomposes `goal` and replaces any prior plan with a fresh one at cursor 0.
    pub async fn start_goal(&self, goal: &str) -> Result<Plan, PlanError> {
        let mut active = self.active.lock().await;
        let steps = self.decompose(goal).await?;
        let plan = Plan::new(goal, steps);
        self.log_started(&plan, active.is_some());
        *active = Some(plan.clone());
        Ok(plan)
    }

    /// Runs the planning capability without touching the active plan.
    pub async fn decompose(&self, goal: &str) -> Result<Vec<String>, PlanError> {
        let steps = self.planner.plan(goal).await?;
        Ok(normalize_steps(goal, steps))
    }

    /// Installs a plan whose steps were decomposed earlier, replacing any prior plan.
    pub async fn install(&self, goal: &str, steps: Vec<String>) -> Plan {
        let plan = Plan::new(goal, normalize_steps(goal, steps));
        let mut active = self.active.lock().await;
        self.log_started(&plan, active.is_some());
        *active = Some(plan.clone());
        plan
    }

    /// Returns the step at the cursor and advances. `Ok(None)` once the plan is
    /// complete, on every subsequent call.
    pub async fn next(&self) -> Result<Option<PlanStep>, PlanError> {
        let mut active = self.active.lock().await;
        let plan = active.as_mut().ok_or(PlanError::PlanNotFound)?;
        Ok(plan.advance())
    }

    /// The step at the cursor, without advancing.
    pub async fn current(&self) -> Result<Option<PlanStep>, PlanError> {
        let active = self.active.lock().await;
        let plan = active.as_ref().ok_or(PlanError::PlanNotFound)?;
        Ok(plan.current())
    }

    /// Advances past `index` if it is still the current step. Returns `false`
    /// when the cursor already moved on.
    pub async fn complete_current(&self, index: usize) -> Result<bool, PlanError> {
        let mut active = self.active.lock().await;
        let plan = active.as_mut().ok_or(PlanError::PlanNotFound)?;
        if plan.cursor != index {
            return Ok(false);
        }
        Ok(plan.advance().is_some())
    }

    /// Records that the step at `index` failed. The cursor does not move, so the
    /// step is retried by the next call.
    pub async fn fail_current(&self, index: usize, reason: impl Into<String>) -> Result<(), PlanError> {
        let mut active = self.active.lock().await;
        let plan = active.as_mut().ok_or(PlanError::PlanNotFound)?;
        if plan.cursor == index {
            plan.last_failure = Some(StepFailure { index, reason: reason.into(), failed_at: Utc::now() });
        }
        Ok(())
    }

    pub async fn run_all(&self) -> Result<Vec<PlanStep>, PlanError> {
        let mut active = self.active.lock().await;
        let plan = active.as_mut().ok_or(PlanError::PlanNotFound)?;
        let mut drained = Vec::with_capacity(plan.remaining().len());
        while let Some(step) = plan.advance() {
            drained.push(step);
        }
        Ok(drained)
    }

    pub async fn status(&self) -> Result<Plan, PlanError> {
        self.active.lock().await.clone().ok_or(PlanError::PlanNotFound)
    }

    pub async fn abandon(&self) -> Option<Plan> {
        self.active.lock().await.take()
    }

    fn log_started(&self, plan: &Plan, replaced: bool) {
        info!(
            event_name = "plan.goal.started",
            goal = %plan.goal_description,
            steps = plan.steps.len(),
            replaced_previous = replaced,
            "goal plan installed"
        );
    }
}
