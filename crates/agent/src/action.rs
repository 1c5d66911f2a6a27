use serde::{Deserialize, Serialize};

use crate::reasoner::{Intent, IntentHint};

/// What the pipeline decided to do with one input.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Action {
    Command { name: String, args: String },
    Goal { description: String },
    Question { text: String },
}

impl Action {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Command { .. } => "command",
            Self::Goal { .. } => "goal",
            Self::Question { .. } => "question",
        }
    }
}

/// Classifies an intent into exactly one action.
///
/// Precedence is goal marker, then command token, then question. Input carrying
/// both a goal marker and a command token is a goal. Anything unrecognised,
/// including clarification requests, is a question about the raw input.
pub fn decide(intent: &Intent, input: &str) -> Action {
    let goal = intent
        .goal
        .as_deref()
        .or((intent.hint == IntentHint::Goal).then_some(intent.action.as_str()))
        .map(str::trim)
        .filter(|goal| !goal.is_empty());
    if let Some(description) = goal {
        return Action::Goal { description: description.to_string() };
    }

    if let Some(command) = intent.command.as_ref().filter(|command| !command.name.is_empty()) {
        return Action::Command { name: command.name.clone(), args: command.args.clone() };
    }

    Action::Question { text: input.trim().to_string() }
}

#[cfg(test)]
mod tests {
    use super::{decide, Action};
    use crate::reasoner::{CommandToken, Intent, IntentHint};

    fn command(name: &str, args: &str) -> Option<CommandToken> {
        Some(CommandToken { name: name.to_string(), args: args.to_string() })
    }

    #[test]
    fn goal_marker_wins_over_command_token() {
        let intent = Intent {
            hint: IntentHint::Command,
            action: "remember".to_string(),
            details: String::new(),
            goal: Some("ship the release".to_string()),
            command: command("remember", "k v"),
        };
        assert_eq!(
            decide(&intent, "anything"),
            Action::Goal { description: "ship the release".to_string() }
        );
    }

    #[test]
    fn command_token_yields_command() {
        let intent = Intent {
            hint: IntentHint::Command,
            action: "recall".to_string(),
            details: String::new(),
            goal: None,
            command: command("recall", "language"),
        };
        assert_eq!(
            decide(&intent, "/recall language"),
            Action::Command { name: "recall".to_string(), args: "language".to_string() }
        );
    }

    #[test]
    fn ambiguous_input_defaults_to_question() {
        let mut intent = Intent::question("What is Python?");
        intent.hint = IntentHint::Clarification;
        assert_eq!(
            decide(&intent, "  What is Python? "),
            Action::Question { text: "What is Python?".to_string() }
        );

        let empty_goal = Intent { hint: IntentHint::Goal, action: "  ".to_string(), ..intent };
        assert_eq!(decide(&empty_goal, "goal:").kind(), "question");
    }
}
