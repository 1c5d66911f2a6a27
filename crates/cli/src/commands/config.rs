use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use strata_core::config::{resolve_config_path, AppConfig, LoadOptions};
use toml::Value;

struct Field {
    key_path: &'static str,
    env_keys: &'static [&'static str],
    value: String,
}

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = resolve_config_path(None);
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for field in fields(&config) {
        let source = field_source(
            field.key_path,
            field.env_keys,
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        lines.push(render_line(field.key_path, &field.value, source));
    }

    for (key, value) in &config.context.global {
        let key_path = format!("context.global.{key}");
        let source = field_source(&key_path, &[], config_file_doc.as_ref(), config_file_path.as_deref());
        lines.push(render_line(&key_path, &value.to_string(), source));
    }

    lines.join("\n")
}

fn fields(config: &AppConfig) -> Vec<Field> {
    vec![
        Field {
            key_path: "database.url",
            env_keys: &["STRATA_DATABASE_URL"],
            value: config.database.url.clone(),
        },
        Field {
            key_path: "database.max_connections",
            env_keys: &["STRATA_DATABASE_MAX_CONNECTIONS"],
            value: config.database.max_connections.to_string(),
        },
        Field {
            key_path: "database.timeout_secs",
            env_keys: &["STRATA_DATABASE_TIMEOUT_SECS"],
            value: config.database.timeout_secs.to_string(),
        },
        Field {
            key_path: "llm.provider",
            env_keys: &["STRATA_LLM_PROVIDER"],
            value: config.llm.provider.as_str().to_string(),
        },
        Field {
            key_path: "llm.model",
            env_keys: &["STRATA_LLM_MODEL"],
            value: config.llm.model.clone(),
        },
        Field {
            key_path: "llm.base_url",
            env_keys: &["STRATA_LLM_BASE_URL"],
            value: config.llm.endpoint().unwrap_or_else(|| "<unset>".to_string()),
        },
        Field {
            key_path: "llm.api_key",
            env_keys: &["STRATA_LLM_API_KEY"],
            value: if config.llm.api_key.is_some() { "<redacted>" } else { "<unset>" }.to_string(),
        },
        Field {
            key_path: "llm.timeout_secs",
            env_keys: &["STRATA_LLM_TIMEOUT_SECS"],
            value: config.llm.timeout_secs.to_string(),
        },
        Field {
            key_path: "memory.max_value_size",
            env_keys: &["STRATA_MEMORY_MAX_VALUE_SIZE"],
            value: config.memory.max_value_size.to_string(),
        },
        Field {
            key_path: "runtime.trace_history_cap",
            env_keys: &["STRATA_RUNTIME_TRACE_HISTORY_CAP"],
            value: config.runtime.trace_history_cap.to_string(),
        },
        Field {
            key_path: "runtime.interpret_timeout_secs",
            env_keys: &["STRATA_RUNTIME_INTERPRET_TIMEOUT_SECS"],
            value: config.runtime.interpret_timeout_secs.to_string(),
        },
        Field {
            key_path: "logging.level",
            env_keys: &["STRATA_LOGGING_LEVEL", "STRATA_LOG_LEVEL"],
            value: config.logging.level.clone(),
        },
        Field {
            key_path: "logging.format",
            env_keys: &["STRATA_LOGGING_FORMAT", "STRATA_LOG_FORMAT"],
            value: format!("{:?}", config.logging.format).to_lowercase(),
        },
    ]
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("config file"));
            return format!("file ({})", file_path.display());
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

#[cfg(test)]
mod tests {
    use super::contains_path;

    #[test]
    fn nested_key_paths_resolve_against_the_document() {
        let doc: toml::Value = "[memory]\nmax_value_size = 20\n[context.global]\nteam = \"core\""
            .parse()
            .expect("toml");

        assert!(contains_path(&doc, "memory.max_value_size"));
        assert!(contains_path(&doc, "context.global.team"));
        assert!(!contains_path(&doc, "llm.model"));
    }
}
