use serde_json::json;
use strata_core::config::{AppConfig, LoadOptions};
use strata_core::guardrails::{ActionRequest, GuardrailEngine, Verdict};

use super::{CommandResult, EXIT_CONFIG, EXIT_GUARDRAIL, EXIT_RUN_FAILURE};

const USAGE_CLASS: &str = "usage";

fn engine(command: &str) -> Result<GuardrailEngine, CommandResult> {
    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => Ok(GuardrailEngine::with_defaults(config.memory.max_value_size)),
        Err(error) => Err(CommandResult::failure(
            command,
            "config_validation",
            format!("configuration issue: {error}"),
            EXIT_CONFIG,
        )),
    }
}

pub fn list() -> CommandResult {
    let engine = match engine("guardrails.list") {
        Ok(engine) => engine,
        Err(result) => return result,
    };

    CommandResult::success_with(
        "guardrails.list",
        format!("{} rules registered", engine.rules().len()),
        json!({ "rules": engine.rules() }),
    )
}

/// Evaluates a proposed action without performing it. BLOCK and CONFIRM
/// verdicts exit non-zero.
pub fn check(kind: &str, args: &[String], confirmed: bool) -> CommandResult {
    let request = match request_from_args(kind, args, confirmed) {
        Ok(request) => request,
        Err(message) => {
            return CommandResult::failure(
                "guardrails.check",
                USAGE_CLASS,
                message,
                EXIT_RUN_FAILURE,
            )
        }
    };
    let engine = match engine("guardrails.check") {
        Ok(engine) => engine,
        Err(result) => return result,
    };

    let verdict = engine.evaluate(&request);
    let data = json!({ "request": request, "verdict": verdict });
    match &verdict {
        Verdict::Allow => CommandResult::success_with("guardrails.check", "allowed", data),
        Verdict::Warn(hit) => {
            CommandResult::success_with("guardrails.check", hit.user_message.clone(), data)
        }
        Verdict::Block(hit) | Verdict::Confirm(hit) => CommandResult::failure_with(
            "guardrails.check",
            verdict.as_str(),
            hit.user_message.clone(),
            EXIT_GUARDRAIL,
            data,
        ),
    }
}

pub fn request_from_args(
    kind: &str,
    args: &[String],
    confirmed: bool,
) -> Result<ActionRequest, String> {
    let first = args.first().cloned().unwrap_or_default();
    let rest = args.iter().skip(1).cloned().collect::<Vec<_>>().join(" ");
    let joined = args.join(" ");
    let require = |value: String, what: &str| {
        if value.trim().is_empty() {
            Err(format!("`{kind}` requires {what}"))
        } else {
            Ok(value)
        }
    };

    Ok(match kind {
        "memory_write" => {
            ActionRequest::MemoryWrite { key: require(first, "a key")?, value: rest }
        }
        "memory_delete" => ActionRequest::MemoryDelete { key: require(first, "a key")?, confirmed },
        "shell_exec" => ActionRequest::ShellExec { command: require(joined, "a command")? },
        "file_read" => ActionRequest::FileRead { path: require(first, "a path")? },
        "file_write" => ActionRequest::FileWrite { path: require(first, "a path")? },
        "file_delete" => ActionRequest::FileDelete { path: require(first, "a path")?, confirmed },
        other => ActionRequest::generic(other, joined),
    })
}

#[cfg(test)]
mod tests {
    use strata_core::guardrails::ActionRequest;

    use super::request_from_args;

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[test]
    fn memory_write_splits_key_from_value() {
        assert_eq!(
            request_from_args("memory_write", &args(&["language", "Rust", "2021"]), false),
            Ok(ActionRequest::MemoryWrite {
                key: "language".to_string(),
                value: "Rust 2021".to_string()
            })
        );
    }

    #[test]
    fn unknown_kinds_become_generic_requests() {
        assert_eq!(
            request_from_args("start_goal", &args(&["ship", "it"]), false),
            Ok(ActionRequest::generic("start_goal", "ship it"))
        );
    }

    #[test]
    fn path_kinds_require_a_path() {
        assert!(request_from_args("file_write", &[], false).is_err());
        assert_eq!(
            request_from_args("file_delete", &args(&["/tmp/x"]), true),
            Ok(ActionRequest::FileDelete { path: "/tmp/x".to_string(), confirmed: true })
        );
    }
}
