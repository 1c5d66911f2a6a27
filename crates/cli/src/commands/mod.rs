pub mod chat;
pub mod config;
pub mod context;
pub mod doctor;
pub mod guardrails;
pub mod memory;
pub mod migrate;
pub mod run;

use std::future::Future;

use serde::Serialize;
use serde_json::Value;
use strata_core::config::LoadOptions;
use strata_core::errors::RunError;

use crate::bootstrap::{bootstrap, Application, BootstrapError};

pub const EXIT_CONFIG: u8 = 2;
pub const EXIT_RUNTIME_INIT: u8 = 3;
pub const EXIT_GUARDRAIL: u8 = 6;
pub const EXIT_RUN_FAILURE: u8 = 7;

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: u8,
    pub output: String,
}

#[derive(Debug, Serialize)]
struct CommandOutcome {
    command: String,
    status: String,
    error_class: Option<String>,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

impl CommandResult {
    pub fn success(command: &str, message: impl Into<String>) -> Self {
        Self::success_with(command, message, Value::Null)
    }

    pub fn success_with(command: &str, message: impl Into<String>, data: impl Serialize) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "ok".to_string(),
            error_class: None,
            message: message.into(),
            data: to_data(data),
        };
        Self { exit_code: 0, output: serialize_payload(payload) }
    }

    pub fn failure(
        command: &str,
        error_class: &str,
        message: impl Into<String>,
        exit_code: u8,
    ) -> Self {
        Self::failure_with(command, error_class, message, exit_code, Value::Null)
    }

    pub fn failure_with(
        command: &str,
        error_class: &str,
        message: impl Into<String>,
        exit_code: u8,
        data: impl Serialize,
    ) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "error".to_string(),
            error_class: Some(error_class.to_string()),
            message: message.into(),
            data: to_data(data),
        };
        Self { exit_code, output: serialize_payload(payload) }
    }

    pub fn bootstrap_failure(command: &str, error: &BootstrapError) -> Self {
        Self::failure(command, error.error_class(), error.to_string(), error.exit_code())
    }

    /// Policy refusals exit with 6, every other run failure with 7.
    pub fn run_failure(command: &str, error: &RunError, data: impl Serialize) -> Self {
        let exit_code = if error.is_policy() { EXIT_GUARDRAIL } else { EXIT_RUN_FAILURE };
        Self::failure_with(command, error.kind(), error.to_string(), exit_code, data)
    }
}

fn to_data(data: impl Serialize) -> Option<Value> {
    match serde_json::to_value(data) {
        Ok(Value::Null) => None,
        Ok(value) => Some(value),
        Err(error) => Some(Value::String(format!("unserializable payload: {error}"))),
    }
}

fn serialize_payload(payload: CommandOutcome) -> String {
    serde_json::to_string(&payload).unwrap_or_else(|error| {
        format!(
            "{{\"command\":\"unknown\",\"status\":\"error\",\"error_class\":\"serialization\",\"message\":\"{}\"}}",
            error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
        )
    })
}

/// Drives `task` on a fresh current-thread runtime.
pub(crate) fn block_on<F>(command: &str, task: F) -> CommandResult
where
    F: Future<Output = CommandResult>,
{
    match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime.block_on(task),
        Err(error) => CommandResult::failure(
            command,
            "runtime_init",
            format!("failed to initialize async runtime: {error}"),
            EXIT_RUNTIME_INIT,
        ),
    }
}

/// Bootstraps the application with default load options, or renders the
/// bootstrap failure as the command result.
pub(crate) async fn application(command: &str) -> Result<Application, CommandResult> {
    bootstrap(LoadOptions::default())
        .await
        .map_err(|error| CommandResult::bootstrap_failure(command, &error))
}
