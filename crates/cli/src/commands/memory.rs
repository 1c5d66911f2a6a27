use std::collections::BTreeMap;
use std::path::Path;

use serde_json::json;
use strata_core::errors::RunError;
use strata_core::memory::{MemoryRecord, DEFAULT_CATEGORY};
use tracing::info;

use super::{application, block_on, CommandResult, EXIT_RUN_FAILURE};

/// Exported files map each key to its full record.
type ExportDocument = BTreeMap<String, MemoryRecord>;

pub fn get(key: &str) -> CommandResult {
    block_on("memory.get", async {
        let app = match application("memory.get").await {
            Ok(app) => app,
            Err(result) => return result,
        };
        let memory = app.runtime.memory();
        let recalled = match memory.recall(key).await {
            Ok(recalled) => recalled,
            Err(error) => {
                app.db_pool.close().await;
                return CommandResult::run_failure("memory.get", &RunError::from(error), json!({ "key": key }));
            }
        };
        let record = match recalled {
            Some(_) => memory.record(key).await,
            None => None,
        };
        app.db_pool.close().await;

        match record {
            Some(record) => CommandResult::success_with("memory.get", record.value.clone(), record),
            None => CommandResult::failure(
                "memory.get",
                "not_found",
                format!("nothing stored under `{key}`"),
                EXIT_RUN_FAILURE,
            ),
        }
    })
}

pub fn put(key: &str, value: &str, category: Option<&str>) -> CommandResult {
    block_on("memory.put", async {
        let app = match application("memory.put").await {
            Ok(app) => app,
            Err(result) => return result,
        };
        let category = category.unwrap_or(DEFAULT_CATEGORY);
        let result = app.runtime.memory().put_in(key, value, category).await;
        app.db_pool.close().await;

        match result {
            Ok(verdict) => CommandResult::success_with(
                "memory.put",
                format!("stored `{key}`"),
                json!({ "key": key, "category": category, "verdict": verdict }),
            ),
            Err(error) => {
                CommandResult::run_failure("memory.put", &RunError::from(error), json!({ "key": key }))
            }
        }
    })
}

pub fn list(category: Option<&str>) -> CommandResult {
    block_on("memory.list", async {
        let app = match application("memory.list").await {
            Ok(app) => app,
            Err(result) => return result,
        };
        let records: Vec<MemoryRecord> = match category {
            Some(category) => app.runtime.memory().by_category(category).await,
            None => app.runtime.memory().export().await,
        };
        app.db_pool.close().await;

        CommandResult::success_with(
            "memory.list",
            format!("{} records", records.len()),
            json!({ "records": records }),
        )
    })
}

pub fn forget(key: &str, confirmed: bool) -> CommandResult {
    block_on("memory.forget", async {
        let app = match application("memory.forget").await {
            Ok(app) => app,
            Err(result) => return result,
        };
        let result = app.runtime.memory().delete(key, confirmed).await;
        app.db_pool.close().await;

        match result {
            Ok(true) => CommandResult::success("memory.forget", format!("forgot `{key}`")),
            Ok(false) => CommandResult::success("memory.forget", format!("nothing stored under `{key}`")),
            Err(error) => CommandResult::run_failure(
                "memory.forget",
                &RunError::from(error),
                json!({ "key": key, "hint": "re-run with --confirm" }),
            ),
        }
    })
}

pub fn search(query: &str) -> CommandResult {
    block_on("memory.search", async {
        let app = match application("memory.search").await {
            Ok(app) => app,
            Err(result) => return result,
        };
        let hits = app.runtime.memory().search(query).await;
        app.db_pool.close().await;

        CommandResult::success_with(
            "memory.search",
            format!("{} matches for `{query}`", hits.len()),
            json!({ "records": hits }),
        )
    })
}

pub fn stats() -> CommandResult {
    block_on("memory.stats", async {
        let app = match application("memory.stats").await {
            Ok(app) => app,
            Err(result) => return result,
        };
        let stats = app.runtime.memory().stats().await;
        app.db_pool.close().await;

        CommandResult::success_with(
            "memory.stats",
            format!("{} records in {} categories", stats.total_entries, stats.categories.len()),
            json!({ "stats": stats }),
        )
    })
}

pub fn clear(category: Option<&str>, confirmed: bool) -> CommandResult {
    block_on("memory.clear", async {
        let app = match application("memory.clear").await {
            Ok(app) => app,
            Err(result) => return result,
        };
        let result = app.runtime.memory().clear(category, confirmed).await;
        app.db_pool.close().await;

        match result {
            Ok(removed) => CommandResult::success_with(
                "memory.clear",
                format!("removed {removed} records"),
                json!({ "category": category, "removed": removed }),
            ),
            Err(error) => CommandResult::run_failure(
                "memory.clear",
                &RunError::from(error),
                json!({ "category": category, "hint": "re-run with --confirm" }),
            ),
        }
    })
}

pub fn export(path: &Path) -> CommandResult {
    block_on("memory.export", async {
        let app = match application("memory.export").await {
            Ok(app) => app,
            Err(result) => return result,
        };
        let document: ExportDocument = app.runtime.memory().all().await;
        app.db_pool.close().await;

        let body = match serde_json::to_string_pretty(&document) {
            Ok(body) => body,
            Err(error) => {
                return CommandResult::failure("memory.export", "serialization", error.to_string(), EXIT_RUN_FAILURE)
            }
        };
        if let Err(error) = tokio::fs::write(path, body).await {
            return CommandResult::failure(
                "memory.export",
                "io",
                format!("failed to write `{}`: {error}", path.display()),
                EXIT_RUN_FAILURE,
            );
        }

        info!(event_name = "memory.export.written", path = %path.display(), records = document.len(), "memory exported");
        CommandResult::success_with(
            "memory.export",
            format!("exported {} records", document.len()),
            json!({ "path": path.display().to_string(), "records": document.len() }),
        )
    })
}

pub fn import(path: &Path) -> CommandResult {
    block_on("memory.import", async {
        let raw = match tokio::fs::read_to_string(path).await {
            Ok(raw) => raw,
            Err(error) => {
                return CommandResult::failure(
                    "memory.import",
                    "io",
                    format!("failed to read `{}`: {error}", path.display()),
                    EXIT_RUN_FAILURE,
                )
            }
        };
        let records = match parse_export(&raw) {
            Ok(records) => records,
            Err(error) => {
                return CommandResult::failure(
                    "memory.import",
                    "invalid_import",
                    format!("`{}` is not a memory export: {error}", path.display()),
                    EXIT_RUN_FAILURE,
                )
            }
        };

        let app = match application("memory.import").await {
            Ok(app) => app,
            Err(result) => return result,
        };
        let result = app.runtime.memory().import(records).await;
        app.db_pool.close().await;

        match result {
            Ok(count) => CommandResult::success_with(
                "memory.import",
                format!("imported {count} records"),
                json!({ "path": path.display().to_string(), "records": count }),
            ),
            Err(error) => CommandResult::run_failure(
                "memory.import",
                &RunError::from(error),
                json!({ "path": path.display().to_string() }),
            ),
        }
    })
}

/// Parses an export document. The map key is authoritative for each record.
fn parse_export(raw: &str) -> Result<Vec<MemoryRecord>, serde_json::Error> {
    let document: ExportDocument = serde_json::from_str(raw)?;
    Ok(document
        .into_iter()
        .map(|(key, mut record)| {
            record.key = key;
            record
        })
        .collect())
}
