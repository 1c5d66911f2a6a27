use std::collections::BTreeMap;
use std::io::Write;
use std::sync::Arc;

use serde_json::json;
use strata_agent::{AgentRuntime, RunOutcome};
use strata_core::audit::{AuditCategory, InMemoryAuditSink};
use strata_core::context::{ContextValue, Session};
use strata_core::errors::RunError;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

use super::{application, block_on, CommandResult, EXIT_RUN_FAILURE};
use crate::bootstrap::Application;

const HISTORY_LIMIT: usize = 10;

const HELP: &str = "\
commands:
  project <name> [key=value ...]   set the project context
  task <title> | task done         set or complete the current task
  goal: <description>              plan a goal
  next | all | status              execute the next step, all steps, or show the plan
  trace | history                  last execution trace, recent runs
  guardrails | violations          rules, and guardrail hits this session
  resolve <n> <note>               mark violation n as handled
  context                          resolved context
  /help                            built-in tools
  quit";

#[derive(Clone, Debug, PartialEq)]
pub enum ChatCommand {
    Quit,
    Help,
    Project { name: String, entries: BTreeMap<String, ContextValue> },
    Task(String),
    CompleteTask,
    Next,
    All,
    Status,
    Trace,
    History,
    Guardrails,
    Violations,
    Resolve { index: usize, note: String },
    Context,
    Input(String),
}

/// Classifies one line of chat input. Blank lines yield `None`; anything that
/// is not a session command goes to the pipeline unchanged.
pub fn parse_line(line: &str) -> Option<ChatCommand> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let (head, rest) = match line.split_once(char::is_whitespace) {
        Some((head, rest)) => (head, rest.trim()),
        None => (line, ""),
    };

    let command = match (head.to_ascii_lowercase().as_str(), rest.is_empty()) {
        ("quit" | "exit", true) => ChatCommand::Quit,
        ("help", true) => ChatCommand::Help,
        ("next", true) => ChatCommand::Next,
        ("all", true) => ChatCommand::All,
        ("status", true) => ChatCommand::Status,
        ("trace", true) => ChatCommand::Trace,
        ("history", true) => ChatCommand::History,
        ("guardrails", true) => ChatCommand::Guardrails,
        ("violations", true) => ChatCommand::Violations,
        ("context", true) => ChatCommand::Context,
        ("resolve", false) => match parse_resolve(rest) {
            Some(command) => command,
            None => ChatCommand::Input(line.to_string()),
        },
        ("task", false) if rest.eq_ignore_ascii_case("done") => ChatCommand::CompleteTask,
        ("task", false) => ChatCommand::Task(rest.to_string()),
        ("project", false) => parse_project(rest),
        ("goal", false) if !rest.starts_with(':') => ChatCommand::Input(format!("goal: {rest}")),
        _ => ChatCommand::Input(line.to_string()),
    };
    Some(command)
}

fn parse_resolve(rest: &str) -> Option<ChatCommand> {
    let (index, note) = rest.split_once(char::is_whitespace).unwrap_or((rest, "resolved"));
    let index = index.parse::<usize>().ok().filter(|index| *index > 0)?;
    Some(ChatCommand::Resolve { index, note: note.trim().to_string() })
}

fn parse_project(rest: &str) -> ChatCommand {
    let mut tokens = rest.split_whitespace();
    let name = tokens.next().unwrap_or_default().to_string();
    let entries = tokens
        .filter_map(|token| token.split_once('='))
        .filter(|(key, _)| !key.is_empty())
        .map(|(key, value)| (key.to_string(), ContextValue::parse_loose(value)))
        .collect();
    ChatCommand::Project { name, entries }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChatReply {
    pub text: String,
    pub quit: bool,
}

impl ChatReply {
    fn text(text: impl Into<String>) -> Self {
        Self { text: text.into(), quit: false }
    }
}

/// One interactive conversation over a shared runtime.
pub struct ChatSession {
    runtime: AgentRuntime,
    violations: Arc<InMemoryAuditSink>,
    session: Session,
}

impl ChatSession {
    pub fn new(app: &Application) -> Self {
        Self {
            runtime: app.runtime.clone(),
            violations: Arc::clone(&app.violations),
            session: Session::new(),
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub async fn handle(&mut self, command: ChatCommand) -> ChatReply {
        match command {
            ChatCommand::Quit => ChatReply { text: "bye".to_string(), quit: true },
            ChatCommand::Help => ChatReply::text(HELP),
            ChatCommand::Project { name, entries } => {
                let keys = entries.len();
                self.runtime.context().set_project(name.clone(), entries);
                ChatReply::text(format!("project set: {name} ({keys} keys)"))
            }
            ChatCommand::Task(title) => {
                self.runtime.context().set_task(title.clone(), BTreeMap::new());
                ChatReply::text(format!("task set: {title}"))
            }
            ChatCommand::CompleteTask => {
                if self.runtime.context().complete_task() {
                    ChatReply::text("task completed")
                } else {
                    ChatReply::text("no task is set")
                }
            }
            ChatCommand::Next => match self.runtime.execute_next_step(&self.session).await {
                Ok(Some(execution)) => ChatReply::text(format!(
                    "step {}: {}\n{}",
                    execution.step.number(),
                    execution.step.description,
                    execution.output
                )),
                Ok(None) => ChatReply::text("plan complete"),
                Err(error) => ChatReply::text(render_error(&error)),
            },
            ChatCommand::All => self.run_all_steps().await,
            ChatCommand::Status => match self.runtime.plans().status().await {
                Ok(plan) => {
                    let mut lines = vec![format!(
                        "goal: {} ({}/{} steps done)",
                        plan.goal_description,
                        plan.cursor,
                        plan.steps.len()
                    )];
                    for (index, step) in plan.steps.iter().enumerate() {
                        let marker = if index < plan.cursor { "x" } else { " " };
                        lines.push(format!("[{marker}] {}. {step}", index + 1));
                    }
                    if let Some(failure) = &plan.last_failure {
                        lines.push(format!(
                            "step {} failed at {}: {}",
                            failure.index + 1,
                            failure.failed_at.format("%H:%M:%S"),
                            failure.reason
                        ));
                    }
                    ChatReply::text(lines.join("\n"))
                }
                Err(error) => ChatReply::text(render_error(&RunError::from(error))),
            },
            ChatCommand::Trace => match self.runtime.history().last() {
                Some(trace) => {
                    let mut lines = vec![format!("run {}: {}", trace.run_id, trace.input)];
                    for entry in &trace.entries {
                        lines.push(format!(
                            "  {:<12} in={} out={} {}",
                            entry.stage.as_str(),
                            entry.input_digest,
                            entry.output_digest,
                            if trace.failed_stage() == Some(entry.stage) { "FAILED" } else { "ok" }
                        ));
                    }
                    ChatReply::text(lines.join("\n"))
                }
                None => ChatReply::text("no runs yet"),
            },
            ChatCommand::History => {
                let recent = self.runtime.history().recent(HISTORY_LIMIT);
                if recent.is_empty() {
                    return ChatReply::text("no runs yet");
                }
                let lines: Vec<String> = recent
                    .iter()
                    .map(|trace| {
                        let status = if trace.is_success() { "ok" } else { "failed" };
                        format!("{} [{status}] {}", trace.started_at.format("%H:%M:%S"), trace.input)
                    })
                    .collect();
                ChatReply::text(lines.join("\n"))
            }
            ChatCommand::Guardrails => {
                let lines: Vec<String> = self
                    .runtime
                    .guardrails()
                    .rules()
                    .iter()
                    .map(|rule| format!("{} [{}] {}", rule.id, rule.severity, rule.description))
                    .collect();
                ChatReply::text(lines.join("\n"))
            }
            ChatCommand::Violations => {
                let events = self.violations.events_in(AuditCategory::Guardrail);
                if events.is_empty() {
                    return ChatReply::text("no guardrail violations");
                }
                let mut lines: Vec<String> = events
                    .iter()
                    .enumerate()
                    .map(|(index, event)| {
                        let rule = event.metadata.get("rule_id").map(String::as_str).unwrap_or("?");
                        let state = match &event.resolution {
                            Some(note) => format!("resolved: {note}"),
                            None => "open".to_string(),
                        };
                        format!(
                            "{}. {} {} ({rule}) [{state}]",
                            index + 1,
                            event.occurred_at.format("%H:%M:%S"),
                            event.event_type
                        )
                    })
                    .collect();
                let open = events.iter().filter(|event| event.resolution.is_none()).count();
                lines.push(format!("{open} open of {}", events.len()));
                ChatReply::text(lines.join("\n"))
            }
            ChatCommand::Resolve { index, note } => {
                let events = self.violations.events_in(AuditCategory::Guardrail);
                let Some(event) = events.get(index - 1) else {
                    return ChatReply::text(format!("no violation {index}"));
                };
                if self.violations.resolve(&event.event_id, note.clone()) {
                    ChatReply::text(format!("violation {index} resolved"))
                } else {
                    ChatReply::text(format!("violation {index} is no longer retained"))
                }
            }
            ChatCommand::Context => {
                let snapshot = self.runtime.context().resolve(&self.session);
                ChatReply::text(snapshot.render_prompt())
            }
            ChatCommand::Input(text) => {
                let outcome = self.runtime.run(&mut self.session, &text).await;
                ChatReply::text(render_outcome(&outcome))
            }
        }
    }

    async fn run_all_steps(&self) -> ChatReply {
        let mut lines = Vec::new();
        loop {
            match self.runtime.execute_next_step(&self.session).await {
                Ok(Some(execution)) => lines.push(format!(
                    "step {}: {}\n{}",
                    execution.step.number(),
                    execution.step.description,
                    execution.output
                )),
                Ok(None) => {
                    lines.push("plan complete".to_string());
                    break;
                }
                Err(error) => {
                    lines.push(render_error(&error));
                    break;
                }
            }
        }
        ChatReply::text(lines.join("\n"))
    }
}

fn render_outcome(outcome: &RunOutcome) -> String {
    let mut lines: Vec<String> =
        outcome.warnings.iter().map(|hit| format!("warning: {}", hit.user_message)).collect();
    match &outcome.response {
        Ok(response) => lines.push(response.clone()),
        Err(error) => lines.push(render_error(error)),
    }
    lines.join("\n")
}

fn render_error(error: &RunError) -> String {
    match error {
        RunError::ConfirmationRequired { message, .. } => {
            format!("{message}\nre-run with --confirm to proceed")
        }
        RunError::GuardrailBlocked { message, .. } => message.clone(),
        other => format!("error: {other}"),
    }
}

pub fn run() -> CommandResult {
    block_on("chat", async {
        let app = match application("chat").await {
            Ok(app) => app,
            Err(result) => return result,
        };
        let mut chat = ChatSession::new(&app);
        info!(event_name = "chat.session.started", session_id = %chat.session().id(), "chat started");

        let system_name = app
            .config
            .global_layer()
            .get("system_name")
            .map(ToString::to_string)
            .unwrap_or_else(|| "strata".to_string());
        println!("{system_name} ready. Type `help` for commands.");
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            print!("> ");
            let _ = std::io::stdout().flush();

            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(error) => {
                    return CommandResult::failure("chat", "io", error.to_string(), EXIT_RUN_FAILURE);
                }
            };
            let Some(command) = parse_line(&line) else {
                continue;
            };
            let reply = chat.handle(command).await;
            println!("{}", reply.text);
            if reply.quit {
                break;
            }
        }

        let summary = json!({
            "session_id": chat.session().id(),
            "messages": chat.session().message_count(),
            "errors": chat.session().error_count(),
        });
        app.db_pool.close().await;
        CommandResult::success_with("chat", "session ended", summary)
    })
}

#[cfg(test)]
mod tests {
    use strata_core::context::ContextValue;

    use super::{parse_line, ChatCommand};

    #[test]
    fn session_commands_are_recognised() {
        assert_eq!(parse_line("  "), None);
        assert_eq!(parse_line("quit"), Some(ChatCommand::Quit));
        assert_eq!(parse_line("NEXT"), Some(ChatCommand::Next));
        assert_eq!(parse_line("task done"), Some(ChatCommand::CompleteTask));
        assert_eq!(parse_line("task write docs"), Some(ChatCommand::Task("write docs".to_string())));
        assert_eq!(
            parse_line("resolve 2 false alarm"),
            Some(ChatCommand::Resolve { index: 2, note: "false alarm".to_string() })
        );
        assert_eq!(
            parse_line("resolve 0 nope"),
            Some(ChatCommand::Input("resolve 0 nope".to_string()))
        );
    }

    #[test]
    fn project_line_parses_typed_entries() {
        let Some(ChatCommand::Project { name, entries }) =
            parse_line("project atlas language=rust retries=3 strict=true")
        else {
            panic!("expected project command");
        };
        assert_eq!(name, "atlas");
        assert_eq!(entries.get("language"), Some(&ContextValue::Text("rust".to_string())));
        assert_eq!(entries.get("retries"), Some(&ContextValue::Integer(3)));
        assert_eq!(entries.get("strict"), Some(&ContextValue::Bool(true)));
    }

    #[test]
    fn goal_shorthand_and_free_text_go_to_the_pipeline() {
        assert_eq!(
            parse_line("goal ship the release"),
            Some(ChatCommand::Input("goal: ship the release".to_string()))
        );
        assert_eq!(
            parse_line("goal: ship it"),
            Some(ChatCommand::Input("goal: ship it".to_string()))
        );
        assert_eq!(
            parse_line("status of the build?"),
            Some(ChatCommand::Input("status of the build?".to_string()))
        );
    }
}
