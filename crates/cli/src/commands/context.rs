use serde_json::json;
use strata_core::context::Session;

use super::{application, block_on, CommandResult};

/// Resolved global context as a fresh session would see it.
pub fn run() -> CommandResult {
    block_on("context", async {
        let app = match application("context").await {
            Ok(app) => app,
            Err(result) => return result,
        };

        let snapshot = app.runtime.context().resolve(&Session::new());
        let entries: Vec<_> = snapshot
            .iter()
            .map(|(key, entry)| {
                json!({
                    "key": key,
                    "value": entry.value,
                    "scope": entry.scope.as_str(),
                })
            })
            .collect();
        app.db_pool.close().await;

        CommandResult::success_with(
            "context",
            format!("{} context keys resolved", entries.len()),
            json!({ "entries": entries, "prompt": snapshot.render_prompt() }),
        )
    })
}
