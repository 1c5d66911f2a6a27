use std::sync::Arc;
use std::time::Duration;

use strata_agent::{
    AgentRuntime, ChatReasoner, KeywordReasoner, OpenAiCompatibleClient, Reasoner, ToolRegistry,
};
use strata_core::audit::{AuditSink, CompositeAuditSink, InMemoryAuditSink, TracingAuditSink};
use strata_core::config::{AppConfig, ConfigError, LlmConfig, LlmProvider, LoadOptions};
use strata_core::context::ContextStore;
use strata_core::guardrails::GuardrailEngine;
use strata_core::memory::{MemoryError, MemoryStore};
use strata_db::{connect_from_config, migrations, DbPool, SqlMemoryBackend};
use thiserror::Error;
use tracing::info;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub runtime: AgentRuntime,
    /// Guardrail and pipeline events of this process, newest last.
    pub violations: Arc<InMemoryAuditSink>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("memory could not be loaded: {0}")]
    MemoryLoad(#[source] MemoryError),
    #[error("reasoning backend could not be initialised: {0}")]
    Reasoner(String),
}

impl BootstrapError {
    pub fn error_class(&self) -> &'static str {
        match self {
            Self::Config(_) => "config_validation",
            Self::DatabaseConnect(_) => "db_connectivity",
            Self::Migration(_) => "migration",
            Self::MemoryLoad(_) => "memory_load",
            Self::Reasoner(_) => "runtime_init",
        }
    }

    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Config(_) => 2,
            Self::Reasoner(_) => 3,
            Self::DatabaseConnect(_) | Self::MemoryLoad(_) => 4,
            Self::Migration(_) => 5,
        }
    }
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(event_name = "system.bootstrap.start", "starting runtime bootstrap");

    let db_pool =
        connect_from_config(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(event_name = "system.bootstrap.migrations_applied", "database ready");

    let violations = Arc::new(InMemoryAuditSink::default());
    let audit: Arc<dyn AuditSink> = Arc::new(CompositeAuditSink::new(vec![
        violations.clone() as Arc<dyn AuditSink>,
        Arc::new(TracingAuditSink),
    ]));

    let guardrails = Arc::new(GuardrailEngine::with_defaults(config.memory.max_value_size));
    let memory = MemoryStore::open(
        Arc::new(SqlMemoryBackend::new(db_pool.clone())),
        Arc::clone(&guardrails),
    )
    .await
    .map_err(BootstrapError::MemoryLoad)?
    .with_audit(Arc::clone(&audit));

    let tools = ToolRegistry::with_builtins();
    let reasoner = build_reasoner(&config.llm, tools.names())?;

    let runtime = AgentRuntime::builder(Arc::new(memory), guardrails, reasoner)
        .context(ContextStore::new(config.global_layer()))
        .tools(tools)
        .audit(audit)
        .trace_history_cap(config.runtime.trace_history_cap)
        .capability_timeout(Duration::from_secs(config.runtime.interpret_timeout_secs))
        .build();

    info!(
        event_name = "system.bootstrap.ready",
        llm_provider = config.llm.provider.as_str(),
        "runtime ready"
    );

    Ok(Application { config, db_pool, runtime, violations })
}

fn build_reasoner(
    config: &LlmConfig,
    command_names: Vec<String>,
) -> Result<Arc<dyn Reasoner>, BootstrapError> {
    match config.provider {
        LlmProvider::Offline => Ok(Arc::new(KeywordReasoner::new().with_commands(command_names))),
        LlmProvider::OpenAi | LlmProvider::Ollama => {
            let client = OpenAiCompatibleClient::from_config(config)
                .map_err(|error| BootstrapError::Reasoner(format!("{error:#}")))?;
            Ok(Arc::new(ChatReasoner::new(client)))
        }
    }
}
