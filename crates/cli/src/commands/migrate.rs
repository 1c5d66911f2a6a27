use strata_core::config::{AppConfig, LoadOptions};
use strata_db::{connect_from_config, migrations};

use super::{block_on, CommandResult, EXIT_CONFIG};

pub fn run() -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "migrate",
                "config_validation",
                format!("configuration issue: {error}"),
                EXIT_CONFIG,
            );
        }
    };

    block_on("migrate", async {
        let result = async {
            let pool = connect_from_config(&config.database)
                .await
                .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;
            migrations::run_pending(&pool)
                .await
                .map_err(|error| ("migration", error.to_string(), 5u8))?;
            pool.close().await;
            Ok::<(), (&'static str, String, u8)>(())
        }
        .await;

        match result {
            Ok(()) => CommandResult::success("migrate", "applied pending migrations"),
            Err((error_class, message, exit_code)) => {
                CommandResult::failure("migrate", error_class, message, exit_code)
            }
        }
    })
}
