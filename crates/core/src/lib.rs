pub mod audit;
pub mod config;
pub mod context;
pub mod errors;
pub mod guardrails;
pub mod memory;
pub mod plan;
pub mod trace;

pub use audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink, InMemoryAuditSink};
pub use context::{ContextLayer, ContextScope, ContextSnapshot, ContextStore, ContextValue, Session};
pub use errors::{ApplicationError, CapabilityError, InterfaceError, RunError};
pub use guardrails::{ActionRequest, GuardrailEngine, GuardrailRule, Verdict};
pub use memory::{InMemoryBackend, MemoryBackend, MemoryError, MemoryRecord, MemoryStore};
pub use plan::{Plan, PlanError, PlanStep, PlanTracker, Planner};
pub use trace::{ExecutionTrace, Stage, TraceEntry, TraceHistory};
