//! Agent runtime for Strata.
//!
//! Every input walks a fixed five-stage pipeline:
//! 1. **InitContext** - resolve the layered context for the session
//! 2. **Interpret** - the reasoner turns text into an `Intent`
//! 3. **Decide** - classify the intent into exactly one `Action`
//! 4. **Invoke** - guardrail-gate the action, then run a tool, plan a goal or answer
//! 5. **UpdateState** - commit the deferred effect to memory or the plan tracker
//!
//! The language model is only ever consulted through the `Reasoner` seam. It
//! never bypasses the guardrail engine, and it never writes state directly.

pub mod action;
pub mod feedback;
pub mod llm;
pub mod reasoner;
pub mod runtime;
pub mod tools;

pub use action::{decide, Action};
pub use feedback::{FeedbackEvent, FeedbackHook, NoopFeedback, RecordingFeedback};
pub use llm::{ChatMessage, ChatRole, LlmClient, OpenAiCompatibleClient};
pub use reasoner::{ChatReasoner, Intent, IntentHint, KeywordReasoner, Reasoner, ReasonerPlanner};
pub use runtime::{AgentRuntime, RunOutcome, RuntimeBuilder, StateEffect, StepExecution};
pub use tools::{Tool, ToolContext, ToolOutput, ToolRegistry};
