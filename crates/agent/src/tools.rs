use std::collections::BTreeMap;

use anyhow::{bail, Result};
use async_trait::async_trait;
use strata_core::context::ContextSnapshot;
use strata_core::guardrails::ActionRequest;
use strata_core::memory::MemoryStore;

use crate::runtime::StateEffect;

/// Category the `remember` tool files user-supplied facts under.
pub const USER_CATEGORY: &str = "user";

/// Read access a tool gets during Invoke. Tools never mutate state directly;
/// mutations are returned as a [`StateEffect`] and committed at UpdateState.
pub struct ToolContext<'a> {
    pub memory: &'a MemoryStore,
    pub context: &'a ContextSnapshot,
    pub registry: &'a ToolRegistry,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ToolOutput {
    pub message: String,
    pub effect: Option<StateEffect>,
}

impl ToolOutput {
    pub fn message(message: impl Into<String>) -> Self {
        Self { message: message.into(), effect: None }
    }

    pub fn with_effect(message: impl Into<String>, effect: StateEffect) -> Self {
        Self { message: message.into(), effect: Some(effect) }
    }
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;
    fn usage(&self) -> &'static str;
    fn description(&self) -> &'static str;

    /// The request the guardrail engine evaluates before `invoke` runs.
    fn action_request(&self, args: &str) -> Result<ActionRequest>;

    async fn invoke(&self, args: &str, ctx: &ToolContext<'_>) -> Result<ToolOutput>;
}

#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding `remember`, `recall`, `forget`, `search_memory`, `echo` and `help`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(RememberTool);
        registry.register(RecallTool);
        registry.register(ForgetTool);
        registry.register(SearchMemoryTool);
        registry.register(EchoTool);
        registry.register(HelpTool);
        registry
    }

    pub fn register<T>(&mut self, tool: T)
    where
        T: Tool + 'static,
    {
        self.tools.insert(tool.name().to_string(), Box::new(tool));
    }

    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|tool| tool.as_ref())
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn Tool> {
        self.tools.values().map(|tool| tool.as_ref())
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

const SHELL_COMMAND_NAMES: [&str; 5] = ["shell", "sh", "bash", "exec", "run"];

/// Guardrail request for a command no registered tool handles.
pub fn unknown_command_request(name: &str, args: &str) -> ActionRequest {
    if SHELL_COMMAND_NAMES.contains(&name) {
        let command = if args.is_empty() { name.to_string() } else { args.to_string() };
        return ActionRequest::ShellExec { command };
    }
    ActionRequest::generic(name, args)
}

fn split_key(args: &str) -> (&str, &str) {
    let args = args.trim();
    match args.split_once(char::is_whitespace) {
        Some((key, rest)) => (key, rest.trim()),
        None => (args, ""),
    }
}

pub struct RememberTool;

#[async_trait]
impl Tool for RememberTool {
    fn name(&self) -> &'static str {
        "remember"
    }

    fn usage(&self) -> &'static str {
        "remember <key> <value>"
    }

    fn description(&self) -> &'static str {
        "Store a value in persistent memory"
    }

    fn action_request(&self, args: &str) -> Result<ActionRequest> {
        let (key, value) = split_key(args);
        if key.is_empty() || value.is_empty() {
            bail!("usage: {}", self.usage());
        }
        Ok(ActionRequest::MemoryWrite { key: key.to_string(), value: value.to_string() })
    }

    async fn invoke(&self, args: &str, _ctx: &ToolContext<'_>) -> Result<ToolOutput> {
        let (key, value) = split_key(args);
        Ok(ToolOutput::with_effect(
            format!("Remembered `{key}`."),
            StateEffect::MemoryWrite {
                key: key.to_string(),
                value: value.to_string(),
                category: USER_CATEGORY.to_string(),
            },
        ))
    }
}

pub struct RecallTool;

#[async_trait]
impl Tool for RecallTool {
    fn name(&self) -> &'static str {
        "recall"
    }

    fn usage(&self) -> &'static str {
        "recall <key>"
    }

    fn description(&self) -> &'static str {
        "Read a value from persistent memory"
    }

    fn action_request(&self, args: &str) -> Result<ActionRequest> {
        let (key, _) = split_key(args);
        if key.is_empty() {
            bail!("usage: {}", self.usage());
        }
        Ok(ActionRequest::generic("memory_read", key))
    }

    async fn invoke(&self, args: &str, ctx: &ToolContext<'_>) -> Result<ToolOutput> {
        let (key, _) = split_key(args);
        Ok(match ctx.memory.get(key).await {
            Some(value) => ToolOutput::with_effect(
                format!("{key}: {value}"),
                StateEffect::MemoryAccess { key: key.to_string() },
            ),
            None => ToolOutput::message(format!("Nothing stored under `{key}`.")),
        })
    }
}

pub struct ForgetTool;

impl ForgetTool {
    fn parse(args: &str) -> (Option<&str>, bool) {
        let mut key = None;
        let mut confirmed = false;
        for token in args.split_whitespace() {
            match token {
                "--confirm" | "-y" => confirmed = true,
                other if key.is_none() => key = Some(other),
                _ => {}
            }
        }
        (key, confirmed)
    }
}

#[async_trait]
impl Tool for ForgetTool {
    fn name(&self) -> &'static str {
        "forget"
    }

    fn usage(&self) -> &'static str {
        "forget <key> [--confirm]"
    }

    fn description(&self) -> &'static str {
        "Delete a value from memory; requires --confirm"
    }

    fn action_request(&self, args: &str) -> Result<ActionRequest> {
        match Self::parse(args) {
            (Some(key), confirmed) => {
                Ok(ActionRequest::MemoryDelete { key: key.to_string(), confirmed })
            }
            (None, _) => bail!("usage: {}", self.usage()),
        }
    }

    async fn invoke(&self, args: &str, ctx: &ToolContext<'_>) -> Result<ToolOutput> {
        let (Some(key), confirmed) = Self::parse(args) else {
            bail!("usage: {}", self.usage());
        };
        if ctx.memory.get(key).await.is_none() {
            return Ok(ToolOutput::message(format!("Nothing stored under `{key}`.")));
        }
        Ok(ToolOutput::with_effect(
            format!("Forgot `{key}`."),
            StateEffect::MemoryDelete { key: key.to_string(), confirmed },
        ))
    }
}

pub struct SearchMemoryTool;

#[async_trait]
impl Tool for SearchMemoryTool {
    fn name(&self) -> &'static str {
        "search_memory"
    }

    fn usage(&self) -> &'static str {
        "search_memory <query>"
    }

    fn description(&self) -> &'static str {
        "Find memory entries whose key or value contains the query"
    }

    fn action_request(&self, args: &str) -> Result<ActionRequest> {
        Ok(ActionRequest::generic("memory_search", args.trim()))
    }

    async fn invoke(&self, args: &str, ctx: &ToolContext<'_>) -> Result<ToolOutput> {
        let query = args.trim();
        let hits = ctx.memory.search(query).await;
        if hits.is_empty() {
            return Ok(ToolOutput::message(format!("No memory matches `{query}`.")));
        }
        let lines: Vec<String> =
            hits.iter().map(|record| format!("{}: {}", record.key, record.value)).collect();
        Ok(ToolOutput::message(lines.join("\n")))
    }
}

pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &'static str {
        "echo"
    }

    fn usage(&self) -> &'static str {
        "echo <text>"
    }

    fn description(&self) -> &'static str {
        "Repeat the given text"
    }

    fn action_request(&self, args: &str) -> Result<ActionRequest> {
        Ok(ActionRequest::generic("echo", args))
    }

    async fn invoke(&self, args: &str, _ctx: &ToolContext<'_>) -> Result<ToolOutput> {
        Ok(ToolOutput::message(args.trim()))
    }
}

pub struct HelpTool;

#[async_trait]
impl Tool for HelpTool {
    fn name(&self) -> &'static str {
        "help"
    }

    fn usage(&self) -> &'static str {
        "help"
    }

    fn description(&self) -> &'static str {
        "List available commands"
    }

    fn action_request(&self, args: &str) -> Result<ActionRequest> {
        Ok(ActionRequest::generic("help", args))
    }

    async fn invoke(&self, _args: &str, ctx: &ToolContext<'_>) -> Result<ToolOutput> {
        let lines: Vec<String> = ctx
            .registry
            .iter()
            .map(|tool| format!("/{:<28} {}", tool.usage(), tool.description()))
            .collect();
        Ok(ToolOutput::message(format!(
            "Commands:\n{}\nPrefix a request with `goal:` to plan it.",
            lines.join("\n")
        )))
    }
}
