use std::time::Duration;

use thiserror::Error;

use crate::memory::MemoryError;
use crate::plan::PlanError;

/// Failure of an injected reasoning or planning capability.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CapabilityError {
    #[error("capability call timed out after {0:?}")]
    Timeout(Duration),
    #[error("capability unavailable: {0}")]
    Unavailable(String),
    #[error("capability returned malformed output: {0}")]
    Malformed(String),
}

/// Why a pipeline run aborted. Every variant is local and recoverable.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RunError {
    #[error("interpretation failed: {0}")]
    InterpretationFailed(String),
    #[error("blocked by guardrail `{rule_id}`: {message}")]
    GuardrailBlocked { rule_id: String, message: String },
    #[error("confirmation required by guardrail `{rule_id}`: {message}")]
    ConfirmationRequired { rule_id: String, message: String },
    #[error("memory value of {size} characters exceeds limit of {limit} (`{rule_id}`)")]
    MemoryLimitExceeded { rule_id: String, size: usize, limit: usize },
    #[error("generation failed: {0}")]
    GenerationFailed(String),
    #[error("planning failed: {0}")]
    PlanningFailed(String),
    #[error("no active goal")]
    PlanNotFound,
    #[error("tool `{tool}` failed: {reason}")]
    ToolFailed { tool: String, reason: String },
    #[error("state update could not be persisted: {0}")]
    PersistenceFailed(String),
}

impl RunError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InterpretationFailed(_) => "interpretation_failed",
            Self::GuardrailBlocked { .. } => "guardrail_blocked",
            Self::ConfirmationRequired { .. } => "confirmation_required",
            Self::MemoryLimitExceeded { .. } => "memory_limit_exceeded",
            Self::GenerationFailed(_) => "generation_failed",
            Self::PlanningFailed(_) => "planning_failed",
            Self::PlanNotFound => "plan_not_found",
            Self::ToolFailed { .. } => "tool_failed",
            Self::PersistenceFailed(_) => "persistence_failed",
        }
    }

    pub fn rule_id(&self) -> Option<&str> {
        match self {
            Self::GuardrailBlocked { rule_id, .. }
            | Self::ConfirmationRequired { rule_id, .. }
            | Self::MemoryLimitExceeded { rule_id, .. } => Some(rule_id),
            _ => None,
        }
    }

    /// Guardrail outcomes the caller can resolve by changing or confirming the request.
    pub fn is_policy(&self) -> bool {
        self.rule_id().is_some()
    }
}

impl From<MemoryError> for RunError {
    fn from(value: MemoryError) -> Self {
        match value {
            MemoryError::GuardrailBlocked { rule_id, limit: Some(limit), .. } => {
                Self::MemoryLimitExceeded { rule_id, size: limit.size, limit: limit.limit }
            }
            MemoryError::GuardrailBlocked { rule_id, message, limit: None } => {
                Self::GuardrailBlocked { rule_id, message }
            }
            MemoryError::ConfirmationRequired { rule_id, message } => {
                Self::ConfirmationRequired { rule_id, message }
            }
            MemoryError::Backend(error) => Self::PersistenceFailed(error.to_string()),
        }
    }
}

impl From<PlanError> for RunError {
    fn from(value: PlanError) -> Self {
        match value {
            PlanError::PlanNotFound => Self::PlanNotFound,
            PlanError::Planning(error) => Self::PlanningFailed(error.to_string()),
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Run(#[from] RunError),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("integration failure: {0}")]
    Integration(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

impl From<MemoryError> for ApplicationError {
    fn from(value: MemoryError) -> Self {
        Self::Run(value.into())
    }
}

impl From<PlanError> for ApplicationError {
    fn from(value: PlanError) -> Self {
        Self::Run(value.into())
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::BadRequest { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id,
        }
    }
}

impl ApplicationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        let unassigned = "unassigned".to_owned();
        match value {
            ApplicationError::Run(
                error @ (RunError::GuardrailBlocked { .. }
                | RunError::ConfirmationRequired { .. }
                | RunError::MemoryLimitExceeded { .. }
                | RunError::PlanNotFound),
            ) => Self::BadRequest { message: error.to_string(), correlation_id: unassigned },
            ApplicationError::Run(
                error @ (RunError::InterpretationFailed(_)
                | RunError::GenerationFailed(_)
                | RunError::PlanningFailed(_)
                | RunError::PersistenceFailed(_)),
            ) => Self::ServiceUnavailable { message: error.to_string(), correlation_id: unassigned },
            ApplicationError::Run(error @ RunError::ToolFailed { .. }) => {
                Self::Internal { message: error.to_string(), correlation_id: unassigned }
            }
            ApplicationError::Persistence(message) | ApplicationError::Integration(message) => {
                Self::ServiceUnavailable { message, correlation_id: unassigned }
            }
            ApplicationError::Configuration(message) => {
                Self::Internal { message, correlation_id: unassigned }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::errors::{ApplicationError, InterfaceError, RunError};
    use crate::guardrails::SizeLimit;
    use crate::memory::{BackendError, MemoryError};
    use crate::plan::PlanError;

    #[test]
    fn guardrail_block_maps_to_bad_request_interface_error() {
        let interface = ApplicationError::from(RunError::GuardrailBlocked {
            rule_id: "no_shell_exec".to_owned(),
            message: "Prevent direct shell command execution".to_owned(),
        })
        .into_interface("run-1");

        assert!(matches!(
            interface,
            InterfaceError::BadRequest {
                ref correlation_id,
                ..
            } if correlation_id == "run-1"
        ));
        assert_eq!(
            interface.user_message(),
            "The request could not be processed. Check inputs and try again."
        );
    }

    #[test]
    fn oversized_memory_block_surfaces_size_and_limit() {
        let error = RunError::from(MemoryError::GuardrailBlocked {
            rule_id: "memory_size_limit".to_owned(),
            message: "Limit size of stored memory values".to_owned(),
            limit: Some(SizeLimit { size: 10_001, limit: 10_000 }),
        });

        assert_eq!(
            error,
            RunError::MemoryLimitExceeded {
                rule_id: "memory_size_limit".to_owned(),
                size: 10_001,
                limit: 10_000,
            }
        );
        assert_eq!(error.rule_id(), Some("memory_size_limit"));
        assert!(error.is_policy());
    }

    #[test]
    fn backend_failure_maps_to_service_unavailable() {
        let run = RunError::from(MemoryError::Backend(BackendError::Storage(
            "database lock timeout".to_owned(),
        )));
        assert_eq!(run.kind(), "persistence_failed");

        let interface = ApplicationError::from(run).into_interface("run-3");
        assert!(matches!(interface, InterfaceError::ServiceUnavailable { .. }));
        assert_eq!(
            interface.user_message(),
            "The service is temporarily unavailable. Please retry shortly."
        );
    }

    #[test]
    fn missing_plan_is_reported_not_fatal() {
        let error = ApplicationError::from(PlanError::PlanNotFound);
        assert_eq!(error, ApplicationError::Run(RunError::PlanNotFound));
        assert!(matches!(error.into_interface("run-4"), InterfaceError::BadRequest { .. }));
    }

    #[test]
    fn configuration_error_maps_to_internal() {
        let interface = ApplicationError::Configuration("missing api key".to_owned())
            .into_interface("run-5");

        assert!(matches!(interface, InterfaceError::Internal { .. }));
        assert_eq!(interface.correlation_id(), "run-5");
        assert_eq!(interface.user_message(), "An unexpected internal error occurred.");
    }
}
