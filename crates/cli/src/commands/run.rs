use serde_json::{json, Value};
use strata_agent::RunOutcome;
use strata_core::context::Session;

use super::{application, block_on, CommandResult};

pub fn run(input: &str) -> CommandResult {
    block_on("run", async {
        let app = match application("run").await {
            Ok(app) => app,
            Err(result) => return result,
        };

        let mut session = Session::new();
        let outcome = app.runtime.run(&mut session, input).await;
        let data = outcome_payload(&outcome);
        app.db_pool.close().await;

        match &outcome.response {
            Ok(response) => CommandResult::success_with("run", response.clone(), data),
            Err(error) => CommandResult::run_failure("run", error, data),
        }
    })
}

pub(crate) fn outcome_payload(outcome: &RunOutcome) -> Value {
    json!({
        "run_id": outcome.run_id,
        "action": outcome.action,
        "warnings": outcome.warnings,
        "trace": outcome.trace,
    })
}
