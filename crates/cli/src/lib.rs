pub mod bootstrap;
pub mod commands;
pub mod logging;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use strata_core::config::{AppConfig, LoadOptions};

#[derive(Debug, Parser)]
#[command(
    name = "strata",
    about = "Strata agent runtime CLI",
    long_about = "Run inputs through the guarded agent pipeline, inspect memory, guardrails and context, and check runtime readiness.",
    after_help = "Examples:\n  strata run \"What is Python?\"\n  strata memory put language Rust\n  strata guardrails check shell_exec \"rm -rf /\"\n  strata chat"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Run one input through the pipeline and print action, response and trace")]
    Run {
        #[arg(required = true, num_args = 1.., help = "Instruction text")]
        input: Vec<String>,
    },
    #[command(about = "Start an interactive session")]
    Chat,
    #[command(subcommand, about = "Read and write persistent memory through the guardrails")]
    Memory(MemoryCommand),
    #[command(subcommand, about = "List guardrail rules or evaluate a proposed action")]
    Guardrails(GuardrailsCommand),
    #[command(about = "Show the resolved global context")]
    Context,
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, reasoning backend and database readiness")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
}

#[derive(Debug, Subcommand)]
enum MemoryCommand {
    Get {
        key: String,
    },
    Put {
        key: String,
        #[arg(required = true, num_args = 1..)]
        value: Vec<String>,
        #[arg(long, short = 'c', help = "Record category (default: general)")]
        category: Option<String>,
    },
    List {
        #[arg(long, short = 'c', help = "Only records in this category")]
        category: Option<String>,
    },
    Forget {
        key: String,
        #[arg(long, short = 'y', help = "Confirm the deletion")]
        confirm: bool,
    },
    Search {
        query: String,
    },
    #[command(about = "Record counts, categories and most recalled keys")]
    Stats,
    #[command(about = "Delete every record, or every record in one category")]
    Clear {
        #[arg(long, short = 'c')]
        category: Option<String>,
        #[arg(long, short = 'y', help = "Confirm the deletion")]
        confirm: bool,
    },
    #[command(about = "Write all records to a JSON file")]
    Export { path: PathBuf },
    #[command(about = "Load records from a JSON export; all or nothing")]
    Import { path: PathBuf },
}

#[derive(Debug, Subcommand)]
enum GuardrailsCommand {
    List,
    Check {
        #[arg(help = "memory_write | memory_delete | shell_exec | file_read | file_write | file_delete | <generic kind>")]
        kind: String,
        #[arg(num_args = 0.., help = "Key and value, command text, path, or payload")]
        args: Vec<String>,
        #[arg(long, help = "Mark a delete request as confirmed")]
        confirmed: bool,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    if let Ok(config) = AppConfig::load(LoadOptions::default()) {
        logging::init(&config.logging);
    }

    let result = match cli.command {
        Command::Run { input } => commands::run::run(&input.join(" ")),
        Command::Chat => commands::chat::run(),
        Command::Memory(command) => match command {
            MemoryCommand::Get { key } => commands::memory::get(&key),
            MemoryCommand::Put { key, value, category } => {
                commands::memory::put(&key, &value.join(" "), category.as_deref())
            }
            MemoryCommand::List { category } => commands::memory::list(category.as_deref()),
            MemoryCommand::Forget { key, confirm } => commands::memory::forget(&key, confirm),
            MemoryCommand::Search { query } => commands::memory::search(&query),
            MemoryCommand::Stats => commands::memory::stats(),
            MemoryCommand::Clear { category, confirm } => {
                commands::memory::clear(category.as_deref(), confirm)
            }
            MemoryCommand::Export { path } => commands::memory::export(&path),
            MemoryCommand::Import { path } => commands::memory::import(&path),
        },
        Command::Guardrails(command) => match command {
            GuardrailsCommand::List => commands::guardrails::list(),
            GuardrailsCommand::Check { kind, args, confirmed } => {
                commands::guardrails::check(&kind, &args, confirmed)
            }
        },
        Command::Context => commands::context::run(),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => commands::doctor::run(json),
        Command::Migrate => commands::migrate::run(),
    };

    if !result.output.is_empty() {
        println!("{}", result.output);
    }
    ExitCode::from(result.exit_code)
}
