//! The five-stage execution pipeline.
//!
//! Every run walks `InitContext -> Interpret -> Decide -> Invoke -> UpdateState`
//! once, in order. A failing stage records one failed trace entry and the run
//! ends there. Nothing is mutated before UpdateState, and UpdateState only runs
//! after the guardrail engine cleared the action at Invoke.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use strata_core::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink, TracingAuditSink};
use strata_core::context::{ContextLayer, ContextScope, ContextSnapshot, ContextStore, Session};
use strata_core::errors::{CapabilityError, RunError};
use strata_core::guardrails::{ActionRequest, GuardrailEngine, GuardrailHit, Verdict};
use strata_core::memory::MemoryStore;
use strata_core::plan::{PlanTracker, PlanStep};
use strata_core::trace::{ExecutionTrace, Stage, TraceHistory, DEFAULT_TRACE_HISTORY_CAP};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::action::{decide, Action};
use crate::feedback::{FeedbackEvent, FeedbackHook, NoopFeedback};
use crate::reasoner::{Reasoner, ReasonerPlanner};
use crate::tools::{unknown_command_request, ToolContext, ToolRegistry};

pub const DEFAULT_CAPABILITY_TIMEOUT: Duration = Duration::from_secs(30);

/// A mutation produced at Invoke and committed at UpdateState.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "effect", rename_all = "snake_case")]
pub enum StateEffect {
    MemoryWrite { key: String, value: String, category: String },
    MemoryDelete { key: String, confirmed: bool },
    MemoryAccess { key: String },
    StartPlan { goal: String, steps: Vec<String> },
}

impl StateEffect {
    fn summary(&self) -> String {
        match self {
            Self::MemoryWrite { key, value, category } => format!(
                "memory_write key={key} category={category} value_chars={}",
                value.chars().count()
            ),
            Self::MemoryDelete { key, confirmed } => {
                format!("memory_delete key={key} confirmed={confirmed}")
            }
            Self::MemoryAccess { key } => format!("memory_access key={key}"),
            Self::StartPlan { goal, steps } => format!("start_plan goal={goal} steps={}", steps.len()),
        }
    }
}

/// Result of one pipeline run. The trace is always present, success or not.
#[derive(Clone, Debug)]
pub struct RunOutcome {
    pub run_id: String,
    pub action: Option<Action>,
    pub response: Result<String, RunError>,
    pub warnings: Vec<GuardrailHit>,
    pub trace: ExecutionTrace,
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        self.response.is_ok()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StepExecution {
    pub step: PlanStep,
    pub output: String,
}

struct Invocation {
    response: String,
    effect: Option<StateEffect>,
}

/// Per-run mutable bookkeeping threaded through the stages.
struct RunState {
    run_id: String,
    session_id: String,
    trace: ExecutionTrace,
    action: Option<Action>,
    warnings: Vec<GuardrailHit>,
}

impl RunState {
    fn fail(&mut self, stage: Stage, input: &str, error: RunError) -> RunError {
        self.trace.record_failure(stage, input, &error.to_string());
        error
    }
}

pub struct RuntimeBuilder {
    context: ContextStore,
    memory: Arc<MemoryStore>,
    guardrails: Arc<GuardrailEngine>,
    reasoner: Arc<dyn Reasoner>,
    tools: ToolRegistry,
    audit: Arc<dyn AuditSink>,
    feedback: Arc<dyn FeedbackHook>,
    trace_history_cap: usize,
    capability_timeout: Duration,
}

impl RuntimeBuilder {
    pub fn context(mut self, context: ContextStore) -> Self {
        self.context = context;
        self
    }

    pub fn tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    pub fn audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn feedback(mut self, feedback: Arc<dyn FeedbackHook>) -> Self {
        self.feedback = feedback;
        self
    }

    pub fn trace_history_cap(mut self, cap: usize) -> Self {
        self.trace_history_cap = cap;
        self
    }

    pub fn capability_timeout(mut self, timeout: Duration) -> Self {
        self.capability_timeout = timeout;
        self
    }

    pub fn build(self) -> AgentRuntime {
        let plans = PlanTracker::new(Arc::new(ReasonerPlanner(Arc::clone(&self.reasoner))));
        AgentRuntime {
            inner: Arc::new(RuntimeInner {
                context: self.context,
                memory: self.memory,
                plans,
                guardrails: self.guardrails,
                reasoner: self.reasoner,
                tools: self.tools,
                history: TraceHistory::new(self.trace_history_cap),
                audit: self.audit,
                feedback: self.feedback,
                capability_timeout: self.capability_timeout,
            }),
        }
    }
}

struct RuntimeInner {
    context: ContextStore,
    memory: Arc<MemoryStore>,
    plans: PlanTracker,
    guardrails: Arc<GuardrailEngine>,
    reasoner: Arc<dyn Reasoner>,
    tools: ToolRegistry,
    history: TraceHistory,
    audit: Arc<dyn AuditSink>,
    feedback: Arc<dyn FeedbackHook>,
    capability_timeout: Duration,
}

/// Shared handle to the runtime. Clones are cheap and share all state, so
/// concurrent sessions each drive their own runs against one runtime.
#[derive(Clone)]
pub struct AgentRuntime {
    inner: Arc<RuntimeInner>,
}

impl AgentRuntime {
    pub fn builder(
        memory: Arc<MemoryStore>,
        guardrails: Arc<GuardrailEngine>,
        reasoner: Arc<dyn Reasoner>,
    ) -> RuntimeBuilder {
        RuntimeBuilder {
            context: ContextStore::new(ContextLayer::new(ContextScope::Global)),
            memory,
            guardrails,
            reasoner,
            tools: ToolRegistry::with_builtins(),
            audit: Arc::new(TracingAuditSink),
            feedback: Arc::new(NoopFeedback),
            trace_history_cap: DEFAULT_TRACE_HISTORY_CAP,
            capability_timeout: DEFAULT_CAPABILITY_TIMEOUT,
        }
    }

    pub fn context(&self) -> &ContextStore {
        &self.inner.context
    }

    pub fn memory(&self) -> &MemoryStore {
        &self.inner.memory
    }

    pub fn plans(&self) -> &PlanTracker {
        &self.inner.plans
    }

    pub fn guardrails(&self) -> &GuardrailEngine {
        &self.inner.guardrails
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.inner.tools
    }

    pub fn history(&self) -> &TraceHistory {
        &self.inner.history
    }

    /// Runs one input through the pipeline for `session`.
    pub async fn run(&self, session: &mut Session, input: &str) -> RunOutcome {
        let run_id = Uuid::new_v4().to_string();
        let mut state = RunState {
            run_id: run_id.clone(),
            session_id: session.id().to_string(),
            trace: ExecutionTrace::new(run_id.clone(), session.id(), input),
            action: None,
            warnings: Vec::new(),
        };

        let response = self.drive(session, input, &mut state).await;
        if let Err(error) = &response {
            session.increment_errors();
            warn!(
                event_name = "pipeline.run.failed",
                run_id = %state.run_id,
                session_id = %state.session_id,
                error_kind = error.kind(),
                failed_stage = ?state.trace.failed_stage(),
                "pipeline run aborted"
            );
            self.inner.audit.emit(
                AuditEvent::new(
                    "pipeline.run_failed",
                    AuditCategory::Pipeline,
                    "pipeline",
                    if error.is_policy() { AuditOutcome::Rejected } else { AuditOutcome::Failed },
                )
                .with_session(state.session_id.clone())
                .with_run(state.run_id.clone())
                .with_metadata("error_kind", error.kind())
                .with_metadata("error", error.to_string()),
            );
        } else {
            info!(
                event_name = "pipeline.run.completed",
                run_id = %state.run_id,
                session_id = %state.session_id,
                action = state.action.as_ref().map(Action::kind).unwrap_or("none"),
                warnings = state.warnings.len(),
                "pipeline run completed"
            );
        }

        state.trace.finish();
        self.inner.history.push(state.trace.clone());

        RunOutcome {
            run_id,
            action: state.action,
            response,
            warnings: state.warnings,
            trace: state.trace,
        }
    }

    async fn drive(
        &self,
        session: &mut Session,
        input: &str,
        state: &mut RunState,
    ) -> Result<String, RunError> {
        let snapshot = self.inner.context.resolve(session);
        let rendered = serde_json::to_string(&snapshot).unwrap_or_default();
        state.trace.record(Stage::InitContext, input, &rendered);

        let intent = match self.bounded(self.inner.reasoner.interpret(input, &snapshot)).await {
            Ok(intent) => intent,
            Err(error) => {
                let error = RunError::InterpretationFailed(error.to_string());
                return Err(state.fail(Stage::Interpret, input, error));
            }
        };
        let intent_json = serde_json::to_string(&intent).unwrap_or_default();
        state.trace.record(Stage::Interpret, input, &intent_json);

        let action = decide(&intent, input);
        let action_json = serde_json::to_string(&action).unwrap_or_default();
        state.trace.record(Stage::Decide, &intent_json, &action_json);
        debug!(event_name = "pipeline.decide", run_id = %state.run_id, action = action.kind(), "action decided");
        state.action = Some(action.clone());

        let invocation = match self.invoke(&action, &snapshot, state).await {
            Ok(invocation) => invocation,
            Err(error) => return Err(state.fail(Stage::Invoke, &action_json, error)),
        };
        state.trace.record(Stage::Invoke, &action_json, &invocation.response);

        let effect_summary =
            invocation.effect.as_ref().map(StateEffect::summary).unwrap_or_else(|| "none".to_string());
        if let Some(effect) = invocation.effect {
            if let Err(error) = self.commit(effect).await {
                return Err(state.fail(Stage::UpdateState, &effect_summary, error));
            }
        }
        session.increment_messages();
        state.trace.record(Stage::UpdateState, &effect_summary, &invocation.response);

        self.inner.feedback.after_update(&FeedbackEvent {
            run_id: state.run_id.clone(),
            session_id: state.session_id.clone(),
            input: input.to_string(),
            action,
            response: invocation.response.clone(),
        });

        Ok(invocation.response)
    }

    async fn invoke(
        &self,
        action: &Action,
        snapshot: &ContextSnapshot,
        state: &mut RunState,
    ) -> Result<Invocation, RunError> {
        match action {
            Action::Question { text } => {
                let response = self.generate(text, snapshot).await?;
                Ok(Invocation { response, effect: None })
            }
            Action::Goal { description } => {
                self.gate(&ActionRequest::generic("start_goal", description.as_str()), state)?;
                let timeout = self.inner.capability_timeout;
                let steps =
                    match tokio::time::timeout(timeout, self.inner.plans.decompose(description)).await {
                        Ok(result) => result?,
                        Err(_) => {
                            return Err(RunError::PlanningFailed(
                                CapabilityError::Timeout(timeout).to_string(),
                            ))
                        }
                    };
                let listing: Vec<String> = steps
                    .iter()
                    .enumerate()
                    .map(|(index, step)| format!("{}. {step}", index + 1))
                    .collect();
                Ok(Invocation {
                    response: format!("Plan for: {description}\n{}", listing.join("\n")),
                    effect: Some(StateEffect::StartPlan { goal: description.clone(), steps }),
                })
            }
            Action::Command { name, args } => match self.inner.tools.get(name) {
                Some(tool) => {
                    let request = tool.action_request(args).map_err(|error| RunError::ToolFailed {
                        tool: name.clone(),
                        reason: format!("{error:#}"),
                    })?;
                    self.gate(&request, state)?;
                    let ctx = ToolContext {
                        memory: &self.inner.memory,
                        context: snapshot,
                        registry: &self.inner.tools,
                    };
                    let output = tool.invoke(args, &ctx).await.map_err(|error| {
                        RunError::ToolFailed { tool: name.clone(), reason: format!("{error:#}") }
                    })?;
                    Ok(Invocation { response: output.message, effect: output.effect })
                }
                None => {
                    self.gate(&unknown_command_request(name, args), state)?;
                    let prompt = format!(
                        "The user issued the command `{name}` with arguments `{args}`. \
                         No tool handles it; explain how to accomplish it."
                    );
                    let response = self.generate(&prompt, snapshot).await?;
                    Ok(Invocation { response, effect: None })
                }
            },
        }
    }

    /// Evaluates `request`. WARN hits are collected on the run; BLOCK and
    /// CONFIRM abort it.
    fn gate(&self, request: &ActionRequest, state: &mut RunState) -> Result<(), RunError> {
        let verdict = self.inner.guardrails.evaluate(request);
        if let Some(hit) = verdict.hit() {
            self.audit_hit(&verdict, hit, request, state);
        }

        match verdict {
            Verdict::Allow => Ok(()),
            Verdict::Warn(hit) => {
                state.warnings.push(hit);
                Ok(())
            }
            Verdict::Block(hit) => Err(match hit.size_limit {
                Some(limit) => RunError::MemoryLimitExceeded {
                    rule_id: hit.rule_id,
                    size: limit.size,
                    limit: limit.limit,
                },
                None => RunError::GuardrailBlocked { rule_id: hit.rule_id, message: hit.user_message },
            }),
            Verdict::Confirm(hit) => Err(RunError::ConfirmationRequired {
                rule_id: hit.rule_id,
                message: hit.user_message,
            }),
        }
    }

    fn audit_hit(
        &self,
        verdict: &Verdict,
        hit: &GuardrailHit,
        request: &ActionRequest,
        state: &RunState,
    ) {
        let outcome = match verdict {
            Verdict::Warn(_) => AuditOutcome::Warned,
            _ => AuditOutcome::Rejected,
        };
        warn!(
            event_name = "guardrail.triggered",
            run_id = %state.run_id,
            rule_id = %hit.rule_id,
            verdict = verdict.as_str(),
            severity = hit.severity.as_str(),
            "guardrail matched proposed action"
        );
        self.inner.audit.emit(
            AuditEvent::new(
                format!("guardrail.{}", verdict.as_str()),
                AuditCategory::Guardrail,
                "pipeline",
                outcome,
            )
            .with_session(state.session_id.clone())
            .with_run(state.run_id.clone())
            .with_metadata("rule_id", hit.rule_id.clone())
            .with_metadata("severity", hit.severity.as_str())
            .with_metadata("request", request.summary()),
        );
    }

    /// Memory effects were gated and audited at Invoke, so the store re-checks
    /// them without a second audit event.
    async fn commit(&self, effect: StateEffect) -> Result<(), RunError> {
        match effect {
            StateEffect::MemoryWrite { key, value, category } => {
                self.inner.memory.put_cleared(key, value, category).await?;
            }
            StateEffect::MemoryDelete { key, confirmed } => {
                self.inner.memory.delete_cleared(&key, confirmed).await?;
            }
            StateEffect::MemoryAccess { key } => {
                self.inner.memory.recall(&key).await?;
            }
            StateEffect::StartPlan { goal, steps } => {
                self.inner.plans.install(&goal, steps).await;
            }
        }
        Ok(())
    }

    async fn generate(&self, prompt: &str, snapshot: &ContextSnapshot) -> Result<String, RunError> {
        self.bounded(self.inner.reasoner.generate(prompt, snapshot))
            .await
            .map_err(|error| RunError::GenerationFailed(error.to_string()))
    }

    /// Applies the capability timeout to an external call.
    async fn bounded<T, F>(&self, call: F) -> Result<T, CapabilityError>
    where
        F: Future<Output = Result<T, CapabilityError>>,
    {
        match tokio::time::timeout(self.inner.capability_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(CapabilityError::Timeout(self.inner.capability_timeout)),
        }
    }

    /// Asks the reasoner to carry out the current plan step. The cursor only
    /// moves once the step produced output; a failed step stays current and is
    /// retried by the next call. Each call is traced like a pipeline run.
    /// `Ok(None)` once the plan is complete.
    pub async fn execute_next_step(
        &self,
        session: &Session,
    ) -> Result<Option<StepExecution>, RunError> {
        let Some(step) = self.inner.plans.current().await? else {
            return Ok(None);
        };
        let plan = self.inner.plans.status().await?;
        let run_id = Uuid::new_v4().to_string();
        let label = format!("step {}: {}", step.number(), step.description);
        let mut trace = ExecutionTrace::new(run_id.clone(), session.id(), label.as_str());

        let snapshot = self.inner.context.resolve(session);
        let rendered = serde_json::to_string(&snapshot).unwrap_or_default();
        trace.record(Stage::InitContext, &label, &rendered);

        let prompt = format!(
            "Execute this step: {}\n\nOverall goal: {}",
            step.description, plan.goal_description
        );
        let result = match self.generate(&prompt, &snapshot).await {
            Ok(output) => {
                trace.record(Stage::Invoke, &prompt, &output);
                match self.inner.plans.complete_current(step.index).await {
                    Ok(advanced) => {
                        trace.record(Stage::UpdateState, &label, &format!("advanced={advanced}"));
                        info!(
                            event_name = "plan.step.executed",
                            run_id = %run_id,
                            session_id = %session.id(),
                            step = step.number(),
                            total = plan.steps.len(),
                            advanced,
                            "plan step executed"
                        );
                        Ok(Some(StepExecution { step, output }))
                    }
                    Err(error) => {
                        let error = RunError::from(error);
                        trace.record_failure(Stage::UpdateState, &label, &error.to_string());
                        Err(error)
                    }
                }
            }
            Err(error) => {
                trace.record_failure(Stage::Invoke, &prompt, &error.to_string());
                if let Err(plan_error) =
                    self.inner.plans.fail_current(step.index, error.to_string()).await
                {
                    debug!(event_name = "plan.step.fail_unrecorded", error = %plan_error, "plan was replaced");
                }
                warn!(
                    event_name = "plan.step.failed",
                    run_id = %run_id,
                    session_id = %session.id(),
                    step = step.number(),
                    error_kind = error.kind(),
                    "plan step failed; cursor kept"
                );
                Err(error)
            }
        };

        trace.finish();
        self.inner.history.push(trace);
        result
    }
}
