//! Guardrails gate proposed actions before they may mutate state.

mod engine;
mod request;
mod rules;

pub use engine::{GuardrailEngine, GuardrailHit, SizeLimit, Verdict};
pub use request::ActionRequest;
pub use rules::{
    default_rules, is_sensitive_path, is_system_path, GuardrailRule, RuleCategory, RuleCheck,
    RuleEffect, Severity, DEFAULT_MAX_VALUE_SIZE, MEMORY_SIZE_LIMIT, NO_SHELL_EXEC,
    NO_SILENT_DELETE, NO_SYSTEM_MODIFICATION, SENSITIVE_FILE_WARNING,
};
