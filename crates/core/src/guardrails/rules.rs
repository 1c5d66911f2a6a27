use std::fmt;

use serde::{Deserialize, Serialize};

use super::request::ActionRequest;

pub const DEFAULT_MAX_VALUE_SIZE: usize = 10_000;

pub const NO_SILENT_DELETE: &str = "no_silent_delete";
pub const NO_SHELL_EXEC: &str = "no_shell_exec";
pub const SENSITIVE_FILE_WARNING: &str = "sensitive_file_warning";
pub const NO_SYSTEM_MODIFICATION: &str = "no_system_modification";
pub const MEMORY_SIZE_LIMIT: &str = "memory_size_limit";

const SENSITIVE_PATTERNS: &[&str] =
    &[".env", "password", "secret", "key", "token", "credential", "private", ".pem", ".key"];

const SYSTEM_PATH_PATTERNS: &[&str] = &[
    "/etc/",
    "/usr/",
    "/bin/",
    "/sbin/",
    "C:\\Windows",
    "C:\\Program Files",
    "/System/",
    "/Library/",
];

/// Informational ranking carried on verdicts. Only `RuleEffect` decides enforcement.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleEffect {
    Block,
    Warn,
    RequireConfirmation,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleCategory {
    Actions,
    System,
    Data,
}

/// Closed set of rule predicates, evaluated by exhaustive match.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "check", rename_all = "snake_case")]
pub enum RuleCheck {
    UnconfirmedDelete,
    ShellExecution,
    SensitivePath,
    SystemPathWrite,
    MemoryValueSize { max_chars: usize },
    RequestKind { kind: String },
}

impl RuleCheck {
    pub fn matches(&self, request: &ActionRequest) -> bool {
        match self {
            Self::UnconfirmedDelete => request.is_delete() && !request.is_confirmed(),
            Self::ShellExecution => matches!(request, ActionRequest::ShellExec { .. }),
            Self::SensitivePath => match request {
                ActionRequest::FileRead { path } | ActionRequest::FileWrite { path } => {
                    is_sensitive_path(path)
                }
                _ => false,
            },
            Self::SystemPathWrite => match request {
                ActionRequest::FileWrite { path } | ActionRequest::FileDelete { path, .. } => {
                    is_system_path(path)
                }
                _ => false,
            },
            Self::MemoryValueSize { max_chars } => match request {
                ActionRequest::MemoryWrite { value, .. } => value.chars().count() > *max_chars,
                _ => false,
            },
            Self::RequestKind { kind } => request.kind() == kind,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardrailRule {
    pub id: String,
    pub description: String,
    pub category: RuleCategory,
    pub severity: Severity,
    pub effect: RuleEffect,
    pub check: RuleCheck,
}

impl GuardrailRule {
    pub fn new(
        id: impl Into<String>,
        description: impl Into<String>,
        category: RuleCategory,
        severity: Severity,
        effect: RuleEffect,
        check: RuleCheck,
    ) -> Self {
        Self { id: id.into(), description: description.into(), category, severity, effect, check }
    }

    pub fn matches(&self, request: &ActionRequest) -> bool {
        self.check.matches(request)
    }
}

/// The fixed rule set installed at process start, in registration order.
pub fn default_rules(max_value_size: usize) -> Vec<GuardrailRule> {
    vec![
        GuardrailRule::new(
            NO_SILENT_DELETE,
            "Prevent deletion without explicit confirmation",
            RuleCategory::Actions,
            Severity::High,
            RuleEffect::RequireConfirmation,
            RuleCheck::UnconfirmedDelete,
        ),
        GuardrailRule::new(
            NO_SHELL_EXEC,
            "Prevent direct shell command execution",
            RuleCategory::System,
            Severity::Critical,
            RuleEffect::Block,
            RuleCheck::ShellExecution,
        ),
        GuardrailRule::new(
            SENSITIVE_FILE_WARNING,
            "Warn when accessing potentially sensitive files",
            RuleCategory::Data,
            Severity::Medium,
            RuleEffect::Warn,
            RuleCheck::SensitivePath,
        ),
        GuardrailRule::new(
            NO_SYSTEM_MODIFICATION,
            "Prevent modification of system files",
            RuleCategory::System,
            Severity::Critical,
            RuleEffect::Block,
            RuleCheck::SystemPathWrite,
        ),
        GuardrailRule::new(
            MEMORY_SIZE_LIMIT,
            "Limit size of stored memory values",
            RuleCategory::Data,
            Severity::Low,
            RuleEffect::Block,
            RuleCheck::MemoryValueSize { max_chars: max_value_size },
        ),
    ]
}

pub fn is_sensitive_path(path: &str) -> bool {
    let lowered = path.to_ascii_lowercase();
    SENSITIVE_PATTERNS.iter().any(|pattern| lowered.contains(pattern))
}

pub fn is_system_path(path: &str) -> bool {
    SYSTEM_PATH_PATTERNS.iter().any(|pattern| path.contains(pattern))
}

#[cfg(test)]
mod tests {
    use super::{is_sensitive_path, is_system_path, RuleCheck};
    use crate::guardrails::ActionRequest;

    #[test]
    fn sensitive_patterns_are_case_insensitive() {
        assert!(is_sensitive_path("config/.ENV"));
        assert!(is_sensitive_path("certs/server.pem"));
        assert!(is_sensitive_path("Secrets.yaml"));
        assert!(!is_sensitive_path("src/main.rs"));
    }

    #[test]
    fn system_paths_match_known_prefixes() {
        assert!(is_system_path("/etc/hosts"));
        assert!(is_system_path("C:\\Windows\\system32\\drivers"));
        assert!(!is_system_path("/home/dev/project/etc.txt"));
    }

    #[test]
    fn memory_size_check_counts_characters_not_bytes() {
        let check = RuleCheck::MemoryValueSize { max_chars: 3 };
        let three_wide_chars = ActionRequest::MemoryWrite {
            key: "k".to_string(),
            value: "\u{e9}\u{e9}\u{e9}".to_string(),
        };
        let four_chars =
            ActionRequest::MemoryWrite { key: "k".to_string(), value: "abcd".to_string() };

        assert!(!check.matches(&three_wide_chars));
        assert!(check.matches(&four_chars));
    }

    #[test]
    fn confirmed_delete_does_not_match_unconfirmed_check() {
        let check = RuleCheck::UnconfirmedDelete;
        assert!(check.matches(&ActionRequest::MemoryDelete {
            key: "k".to_string(),
            confirmed: false
        }));
        assert!(!check.matches(&ActionRequest::MemoryDelete {
            key: "k".to_string(),
            confirmed: true
        }));
        assert!(check.matches(&ActionRequest::FileDelete {
            path: "notes.md".to_string(),
            confirmed: false
        }));
    }
}
