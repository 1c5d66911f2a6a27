//! Reasoning capabilities consumed by the runtime: interpret, generate and plan.
//!
//! `KeywordReasoner` is deterministic and offline. `ChatReasoner` delegates to a
//! chat-completions model through [`LlmClient`].

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use strata_core::context::ContextSnapshot;
use strata_core::errors::CapabilityError;
use strata_core::plan::Planner;

use crate::llm::{ChatMessage, LlmClient};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentHint {
    Question,
    Command,
    Goal,
    Clarification,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandToken {
    pub name: String,
    pub args: String,
}

/// Structured reading of one user input.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Intent {
    pub hint: IntentHint,
    pub action: String,
    pub details: String,
    /// Explicit goal marker, e.g. `goal: ship v2`.
    pub goal: Option<String>,
    /// Explicit command token, e.g. `/remember lang rust`.
    pub command: Option<CommandToken>,
}

impl Intent {
    pub fn question(text: impl Into<String>) -> Self {
        Self {
            hint: IntentHint::Question,
            action: text.into(),
            details: String::new(),
            goal: None,
            command: None,
        }
    }
}

#[async_trait]
pub trait Reasoner: Send + Sync {
    async fn interpret(
        &self,
        text: &str,
        context: &ContextSnapshot,
    ) -> Result<Intent, CapabilityError>;

    async fn generate(
        &self,
        prompt: &str,
        context: &ContextSnapshot,
    ) -> Result<String, CapabilityError>;

    async fn plan(&self, goal: &str) -> Result<Vec<String>, CapabilityError>;
}

/// Exposes a reasoner's planning capability to the plan tracker.
pub struct ReasonerPlanner(pub Arc<dyn Reasoner>);

#[async_trait]
impl Planner for ReasonerPlanner {
    async fn plan(&self, goal: &str) -> Result<Vec<String>, CapabilityError> {
        self.0.plan(goal).await
    }
}

const GOAL_PREFIXES: [&str; 2] = ["goal:", "plan:"];
const CLAUSE_SEPARATORS: [&str; 2] = ["then", "and"];

/// Offline, deterministic reasoner.
#[derive(Clone, Debug, Default)]
pub struct KeywordReasoner {
    commands: BTreeSet<String>,
}

impl KeywordReasoner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Command names recognised without a leading `/`.
    pub fn with_commands<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.commands.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn read(&self, text: &str) -> Intent {
        let trimmed = text.trim();
        let lowered = trimmed.to_ascii_lowercase();

        for prefix in GOAL_PREFIXES {
            if lowered.starts_with(prefix) {
                let goal = trimmed[prefix.len()..].trim();
                if goal.is_empty() {
                    return Intent::question(trimmed);
                }
                return Intent {
                    hint: IntentHint::Goal,
                    action: goal.to_string(),
                    details: String::new(),
                    goal: Some(goal.to_string()),
                    command: None,
                };
            }
        }

        let command = match trimmed.strip_prefix('/') {
            Some(rest) => split_command(rest),
            None => split_command(trimmed)
                .filter(|token| self.commands.contains(&token.name.to_ascii_lowercase())),
        };

        match command {
            Some(command) => Intent {
                hint: IntentHint::Command,
                action: command.name.clone(),
                details: command.args.clone(),
                goal: None,
                command: Some(command),
            },
            None => Intent::question(trimmed),
        }
    }
}

fn split_command(text: &str) -> Option<CommandToken> {
    let text = text.trim();
    let (name, args) = match text.split_once(char::is_whitespace) {
        Some((name, args)) => (name, args.trim()),
        None => (text, ""),
    };
    if name.is_empty() {
        return None;
    }
    Some(CommandToken { name: name.to_ascii_lowercase(), args: args.to_string() })
}

/// Splits a goal into clauses on `,`, `then` and `and`. A goal with a single
/// clause gets an outline, implement, verify scaffold.
pub fn decompose_goal(goal: &str) -> Vec<String> {
    let mut clauses = Vec::new();
    for part in goal.split(',') {
        let mut current: Vec<&str> = Vec::new();
        for word in part.split_whitespace() {
            let separator =
                CLAUSE_SEPARATORS.iter().any(|candidate| word.eq_ignore_ascii_case(candidate));
            if separator {
                if !current.is_empty() {
                    clauses.push(current.join(" "));
                    current.clear();
                }
            } else {
                current.push(word);
            }
        }
        if !current.is_empty() {
            clauses.push(current.join(" "));
        }
    }

    match clauses.len() {
        0 => Vec::new(),
        1 => {
            let goal = clauses.remove(0);
            vec![
                format!("Outline the approach: {goal}"),
                format!("Implement: {goal}"),
                format!("Verify: {goal}"),
            ]
        }
        _ => clauses,
    }
}

#[async_trait]
impl Reasoner for KeywordReasoner {
    async fn interpret(
        &self,
        text: &str,
        _context: &ContextSnapshot,
    ) -> Result<Intent, CapabilityError> {
        Ok(self.read(text))
    }

    async fn generate(
        &self,
        prompt: &str,
        context: &ContextSnapshot,
    ) -> Result<String, CapabilityError> {
        let scope = context
            .get("project_name")
            .map(|project| format!(" for project {project}"))
            .unwrap_or_default();
        Ok(format!(
            "[offline] No language model is configured{scope}. Recorded request: {}",
            prompt.trim()
        ))
    }

    async fn plan(&self, goal: &str) -> Result<Vec<String>, CapabilityError> {
        Ok(decompose_goal(goal))
    }
}

/// Reasoner backed by a chat-completions model.
pub struct ChatReasoner<C> {
    client: C,
}

#[derive(Deserialize)]
struct RawIntent {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    action: Option<String>,
    #[serde(default)]
    details: Option<serde_json::Value>,
    #[serde(default)]
    command: Option<String>,
    #[serde(default)]
    args: Option<String>,
}

impl<C: LlmClient> ChatReasoner<C> {
    pub fn new(client: C) -> Self {
        Self { client }
    }

    async fn ask(
        &self,
        prompt: String,
        context: Option<&ContextSnapshot>,
        temperature: f32,
    ) -> Result<String, CapabilityError> {
        let mut messages = Vec::with_capacity(2);
        if let Some(context) = context.filter(|context| !context.is_empty()) {
            messages.push(ChatMessage::system(format!("Context:\n{}", context.render_prompt())));
        }
        messages.push(ChatMessage::user(prompt));

        self.client
            .chat(&messages, temperature)
            .await
            .map_err(|error| CapabilityError::Unavailable(format!("{error:#}")))
    }
}

/// Reads the first JSON object in a model reply. Unparseable replies fall back
/// to a question about the raw input.
pub fn parse_intent(reply: &str, user_input: &str) -> Intent {
    let parsed = match (reply.find('{'), reply.rfind('}')) {
        (Some(start), Some(end)) if end > start => {
            serde_json::from_str::<RawIntent>(&reply[start..=end]).ok()
        }
        _ => None,
    };
    let Some(raw) = parsed else {
        return Intent::question(user_input);
    };

    let action = raw.action.unwrap_or_else(|| user_input.to_string());
    let details = match raw.details {
        Some(serde_json::Value::String(text)) => text,
        Some(serde_json::Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    };
    let hint = match raw.kind.as_deref().map(str::to_ascii_lowercase).as_deref() {
        Some("goal") => IntentHint::Goal,
        Some("command") => IntentHint::Command,
        Some("clarification") => IntentHint::Clarification,
        _ => IntentHint::Question,
    };
    let command = raw
        .command
        .filter(|name| !name.trim().is_empty())
        .map(|name| CommandToken {
            name: name.trim().trim_start_matches('/').to_ascii_lowercase(),
            args: raw.args.unwrap_or_default().trim().to_string(),
        });
    let goal = (hint == IntentHint::Goal).then(|| action.clone());

    Intent { hint, action, details, goal, command }
}

/// Keeps numbered lines (`1. step`, `2) step`) with the numbering removed.
pub fn parse_numbered_steps(reply: &str) -> Vec<String> {
    reply
        .lines()
        .map(str::trim)
        .filter(|line| line.chars().next().is_some_and(|first| first.is_ascii_digit()))
        .filter_map(|line| {
            let rest = line.trim_start_matches(|c: char| c.is_ascii_digit());
            let rest = rest.strip_prefix('.').or_else(|| rest.strip_prefix(')')).unwrap_or(rest);
            let step = rest.trim();
            (!step.is_empty()).then(|| step.to_string())
        })
        .collect()
}

#[async_trait]
impl<C: LlmClient> Reasoner for ChatReasoner<C> {
    async fn interpret(
        &self,
        text: &str,
        context: &ContextSnapshot,
    ) -> Result<Intent, CapabilityError> {
        let prompt = format!(
            "Analyze this user input and determine their intent.\n\n\
             User input: {text}\n\n\
             Return a JSON object with:\n\
             - \"type\": one of [\"question\", \"command\", \"goal\", \"clarification\"]\n\
             - \"action\": what they want to do\n\
             - \"details\": any specific details\n\
             - \"command\": the command name when type is command, otherwise null\n\
             - \"args\": the command arguments as one string, otherwise null\n\n\
             Only return the JSON, nothing else."
        );
        let reply = self.ask(prompt, Some(context), 0.3).await?;
        Ok(parse_intent(&reply, text))
    }

    async fn generate(
        &self,
        prompt: &str,
        context: &ContextSnapshot,
    ) -> Result<String, CapabilityError> {
        let prompt = format!(
            "You are a helpful coding assistant. Answer this query:\n\n{prompt}\n\n\
             Be concise and provide code examples when appropriate."
        );
        self.ask(prompt, Some(context), 0.7).await
    }

    async fn plan(&self, goal: &str) -> Result<Vec<String>, CapabilityError> {
        let prompt = format!(
            "Create a plan to achieve this goal:\n\nGoal: {goal}\n\n\
             Return a numbered list of 3-5 concrete steps.\n\
             Only return the list, nothing else."
        );
        let reply = self.ask(prompt, None, 0.3).await?;
        Ok(parse_numbered_steps(&reply))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use anyhow::Result;
    use async_trait::async_trait;
    use strata_core::context::ContextSnapshot;

    use super::{
        decompose_goal, parse_intent, parse_numbered_steps, ChatReasoner, IntentHint,
        KeywordReasoner, Reasoner,
    };
    use crate::llm::{ChatMessage, LlmClient};

    #[test]
    fn goal_prefix_marks_goal() {
        let intent = KeywordReasoner::new().read("Goal: Build a simple calculator class");
        assert_eq!(intent.hint, IntentHint::Goal);
        assert_eq!(intent.goal.as_deref(), Some("Build a simple calculator class"));
    }

    #[test]
    fn slash_and_known_names_mark_commands() {
        let reasoner = KeywordReasoner::new().with_commands(["remember"]);

        let slash = reasoner.read("/Recall language");
        assert_eq!(slash.command.as_ref().map(|c| c.name.as_str()), Some("recall"));

        let bare = reasoner.read("remember language rust 2021");
        let command = bare.command.unwrap_or_else(|| panic!("expected command"));
        assert_eq!(command.name, "remember");
        assert_eq!(command.args, "language rust 2021");

        let unknown = reasoner.read("tell me about lifetimes");
        assert_eq!(unknown.hint, IntentHint::Question);
        assert!(unknown.command.is_none());
    }

    #[test]
    fn empty_goal_marker_is_a_question() {
        let intent = KeywordReasoner::new().read("plan:   ");
        assert_eq!(intent.hint, IntentHint::Question);
    }

    #[test]
    fn goals_split_on_clause_separators() {
        assert_eq!(
            decompose_goal("write the parser, add tests then publish and announce"),
            vec!["write the parser", "add tests", "publish", "announce"]
        );
        assert_eq!(decompose_goal("Build a simple calculator class").len(), 3);
        assert!(decompose_goal("  ,  ").is_empty());
    }

    #[test]
    fn intent_json_is_extracted_from_noisy_reply() {
        let reply = "Sure! {\"type\": \"command\", \"action\": \"store\", \"details\": {\"k\": 1}, \
                     \"command\": \"/Remember\", \"args\": \" lang rust \"} Hope that helps.";
        let intent = parse_intent(reply, "remember lang rust");
        assert_eq!(intent.hint, IntentHint::Command);
        assert_eq!(intent.details, "{\"k\":1}");
        let command = intent.command.unwrap_or_else(|| panic!("expected command"));
        assert_eq!((command.name.as_str(), command.args.as_str()), ("remember", "lang rust"));

        let fallback = parse_intent("I am not JSON", "What is Python?");
        assert_eq!(fallback.hint, IntentHint::Question);
        assert_eq!(fallback.action, "What is Python?");
    }

    #[test]
    fn numbered_steps_are_parsed() {
        let reply = "Here is the plan:\n1. Design the API\n2) Implement it\n\n3.   \n10. Ship";
        assert_eq!(parse_numbered_steps(reply), vec!["Design the API", "Implement it", "Ship"]);
    }

    struct ScriptedClient {
        reply: String,
        seen: Mutex<Vec<Vec<ChatMessage>>>,
    }

    #[async_trait]
    impl LlmClient for ScriptedClient {
        async fn chat(&self, messages: &[ChatMessage], _temperature: f32) -> Result<String> {
            if let Ok(mut seen) = self.seen.lock() {
                seen.push(messages.to_vec());
            }
            Ok(self.reply.clone())
        }
    }

    #[tokio::test]
    async fn chat_reasoner_plans_from_numbered_reply() {
        let reasoner = ChatReasoner::new(ScriptedClient {
            reply: "1. Sketch\n2. Build\n3. Test".to_string(),
            seen: Mutex::new(Vec::new()),
        });

        let steps = reasoner.plan("Build a simple calculator class").await;
        assert_eq!(steps, Ok(vec!["Sketch".to_string(), "Build".to_string(), "Test".to_string()]));

        let answer = reasoner.generate("What is Python?", &ContextSnapshot::default()).await;
        assert!(answer.is_ok());
        let seen = reasoner.client.seen.lock().map(|seen| seen.len()).unwrap_or_default();
        assert_eq!(seen, 2);
    }
}
