use std::sync::Arc;

use serde::Serialize;
use strata_agent::OpenAiCompatibleClient;
use strata_core::config::{AppConfig, LlmProvider, LoadOptions};
use strata_core::guardrails::GuardrailEngine;
use strata_core::memory::MemoryStore;
use strata_db::{connect_from_config, migrations, SqlMemoryBackend};

use super::{CommandResult, EXIT_CONFIG, EXIT_RUNTIME_INIT};

const EXIT_DB: u8 = 4;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

impl DoctorCheck {
    fn pass(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Pass, details: details.into() }
    }

    fn fail(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Fail, details: details.into() }
    }

    fn skipped(name: &'static str, reason: &str) -> Self {
        Self { name, status: CheckStatus::Skipped, details: format!("skipped because {reason}") }
    }
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

pub fn run(json_output: bool) -> CommandResult {
    let (report, exit_code) = build_report();

    let output = if json_output {
        serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        })
    } else {
        render_human(&report)
    };

    CommandResult { exit_code, output }
}

fn build_report() -> (DoctorReport, u8) {
    let mut checks = Vec::new();
    let mut exit_code = 0;

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck::pass("config_validation", "configuration loaded and validated"));
            let reasoner = check_reasoner(&config);
            if reasoner.status == CheckStatus::Fail {
                exit_code = EXIT_RUNTIME_INIT;
            }
            checks.push(reasoner);
            let storage = check_storage(&config);
            if storage.iter().any(|check| check.status == CheckStatus::Fail) {
                exit_code = EXIT_DB;
            }
            checks.extend(storage);
        }
        Err(error) => {
            exit_code = EXIT_CONFIG;
            checks.push(DoctorCheck::fail("config_validation", error.to_string()));
            for name in ["reasoning_backend", "database_connectivity", "migrations", "memory_load"] {
                checks.push(DoctorCheck::skipped(name, "configuration did not load"));
            }
        }
    }

    let all_pass = checks.iter().all(|check| check.status == CheckStatus::Pass);
    let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_pass {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    (DoctorReport { overall_status, summary, checks }, exit_code)
}

fn check_reasoner(config: &AppConfig) -> DoctorCheck {
    const NAME: &str = "reasoning_backend";
    match config.llm.provider {
        LlmProvider::Offline => DoctorCheck::pass(NAME, "offline keyword reasoner (no network)"),
        LlmProvider::OpenAi | LlmProvider::Ollama => {
            match OpenAiCompatibleClient::from_config(&config.llm) {
                Ok(client) => DoctorCheck::pass(
                    NAME,
                    format!(
                        "{} client for model `{}` at {}",
                        config.llm.provider.as_str(),
                        client.model(),
                        client.endpoint()
                    ),
                ),
                Err(error) => DoctorCheck::fail(NAME, format!("{error:#}")),
            }
        }
    }
}

fn check_storage(config: &AppConfig) -> Vec<DoctorCheck> {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return vec![
                DoctorCheck::fail(
                    "database_connectivity",
                    format!("failed to initialize async runtime: {error}"),
                ),
                DoctorCheck::skipped("migrations", "the async runtime did not start"),
                DoctorCheck::skipped("memory_load", "the async runtime did not start"),
            ];
        }
    };

    runtime.block_on(async {
        let pool = match connect_from_config(&config.database).await {
            Ok(pool) => pool,
            Err(error) => {
                return vec![
                    DoctorCheck::fail(
                        "database_connectivity",
                        format!("failed to connect to database: {error}"),
                    ),
                    DoctorCheck::skipped("migrations", "the database is unreachable"),
                    DoctorCheck::skipped("memory_load", "the database is unreachable"),
                ];
            }
        };
        let mut checks = vec![DoctorCheck::pass(
            "database_connectivity",
            format!("connected using `{}`", config.database.url),
        )];

        if let Err(error) = migrations::run_pending(&pool).await {
            checks.push(DoctorCheck::fail("migrations", error.to_string()));
            checks.push(DoctorCheck::skipped("memory_load", "migrations failed"));
            pool.close().await;
            return checks;
        }
        checks.push(DoctorCheck::pass("migrations", "schema up to date"));

        let guardrails = Arc::new(GuardrailEngine::with_defaults(config.memory.max_value_size));
        match MemoryStore::open(Arc::new(SqlMemoryBackend::new(pool.clone())), guardrails).await {
            Ok(store) => checks.push(DoctorCheck::pass(
                "memory_load",
                format!("{} memory records loaded", store.len().await),
            )),
            Err(error) => checks.push(DoctorCheck::fail("memory_load", error.to_string())),
        }

        pool.close().await;
        checks
    })
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
