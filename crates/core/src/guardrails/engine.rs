use serde::Serialize;

use super::request::ActionRequest;
use super::rules::{default_rules, GuardrailRule, RuleCheck, RuleEffect, Severity};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct SizeLimit {
    pub size: usize,
    pub limit: usize,
}

/// The rule that produced a non-allow verdict.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct GuardrailHit {
    pub rule_id: String,
    pub severity: Severity,
    pub effect: RuleEffect,
    pub user_message: String,
    pub size_limit: Option<SizeLimit>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "verdict", content = "hit", rename_all = "snake_case")]
pub enum Verdict {
    Allow,
    Warn(GuardrailHit),
    Block(GuardrailHit),
    Confirm(GuardrailHit),
}

impl Verdict {
    pub fn hit(&self) -> Option<&GuardrailHit> {
        match self {
            Self::Allow => None,
            Self::Warn(hit) | Self::Block(hit) | Self::Confirm(hit) => Some(hit),
        }
    }

    pub fn is_allow(&self) -> bool {
        matches!(self, Self::Allow)
    }

    pub fn is_block(&self) -> bool {
        matches!(self, Self::Block(_))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Warn(_) => "warn",
            Self::Block(_) => "block",
            Self::Confirm(_) => "confirm",
        }
    }
}

/// Evaluates proposed actions against an ordered rule list.
///
/// The first matching BLOCK rule wins immediately, whatever its severity. Without
/// a block, the highest-severity WARN or CONFIRM match is returned (earliest
/// registered on ties), otherwise ALLOW. Evaluation reads no external state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GuardrailEngine {
    rules: Vec<GuardrailRule>,
}

impl GuardrailEngine {
    pub fn new(rules: Vec<GuardrailRule>) -> Self {
        Self { rules }
    }

    pub fn with_defaults(max_value_size: usize) -> Self {
        Self::new(default_rules(max_value_size))
    }

    pub fn with_rule(mut self, rule: GuardrailRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn remove_rule(&mut self, rule_id: &str) -> bool {
        let before = self.rules.len();
        self.rules.retain(|rule| rule.id != rule_id);
        self.rules.len() < before
    }

    pub fn rules(&self) -> &[GuardrailRule] {
        &self.rules
    }

    pub fn rule(&self, rule_id: &str) -> Option<&GuardrailRule> {
        self.rules.iter().find(|rule| rule.id == rule_id)
    }

    pub fn evaluate(&self, request: &ActionRequest) -> Verdict {
        let mut strongest: Option<&GuardrailRule> = None;

        for rule in self.rules.iter().filter(|rule| rule.matches(request)) {
            match rule.effect {
                RuleEffect::Block => return Verdict::Block(hit_for(rule, request)),
                RuleEffect::Warn | RuleEffect::RequireConfirmation => {
                    let stronger = strongest.map_or(true, |current| rule.severity > current.severity);
                    if stronger {
                        strongest = Some(rule);
                    }
                }
            }
        }

        match strongest {
            None => Verdict::Allow,
            Some(rule) => {
                let hit = hit_for(rule, request);
                match rule.effect {
                    RuleEffect::Warn => Verdict::Warn(hit),
                    RuleEffect::RequireConfirmation => Verdict::Confirm(hit),
                    RuleEffect::Block => Verdict::Block(hit),
                }
            }
        }
    }
}

fn hit_for(rule: &GuardrailRule, request: &ActionRequest) -> GuardrailHit {
    let size_limit = match (&rule.check, request) {
        (RuleCheck::MemoryValueSize { max_chars }, ActionRequest::MemoryWrite { value, .. }) => {
            Some(SizeLimit { size: value.chars().count(), limit: *max_chars })
        }
        _ => None,
    };

    let user_message = match (rule.effect, size_limit) {
        (_, Some(limit)) => format!(
            "{}: value has {} characters, limit is {}",
            rule.description, limit.size, limit.limit
        ),
        (RuleEffect::Block, None) => format!("BLOCKED by {}: {}", rule.id, rule.description),
        (RuleEffect::Warn, None) => format!("WARNING from {}: {}", rule.id, rule.description),
        (RuleEffect::RequireConfirmation, None) => {
            format!("CONFIRMATION required by {}: {}", rule.id, rule.description)
        }
    };

    GuardrailHit {
        rule_id: rule.id.clone(),
        severity: rule.severity,
        effect: rule.effect,
        user_message,
        size_limit,
    }
}

impl Default for GuardrailEngine {
    fn default() -> Self {
        Self::with_defaults(super::rules::DEFAULT_MAX_VALUE_SIZE)
    }
}
