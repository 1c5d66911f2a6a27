use serde::{Deserialize, Serialize};

/// Describes what is about to happen. Guardrail input only; never persisted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "request", rename_all = "snake_case")]
pub enum ActionRequest {
    MemoryWrite { key: String, value: String },
    MemoryDelete { key: String, confirmed: bool },
    ShellExec { command: String },
    FileRead { path: String },
    FileWrite { path: String },
    FileDelete { path: String, confirmed: bool },
    Generic { kind: String, payload: String },
}

impl ActionRequest {
    pub fn generic(kind: impl Into<String>, payload: impl Into<String>) -> Self {
        Self::Generic { kind: kind.into(), payload: payload.into() }
    }

    pub fn kind(&self) -> &str {
        match self {
            Self::MemoryWrite { .. } => "memory_write",
            Self::MemoryDelete { .. } => "memory_delete",
            Self::ShellExec { .. } => "shell_exec",
            Self::FileRead { .. } => "file_read",
            Self::FileWrite { .. } => "file_write",
            Self::FileDelete { .. } => "file_delete",
            Self::Generic { kind, .. } => kind,
        }
    }

    pub fn path(&self) -> Option<&str> {
        match self {
            Self::FileRead { path } | Self::FileWrite { path } | Self::FileDelete { path, .. } => {
                Some(path)
            }
            _ => None,
        }
    }

    pub fn is_delete(&self) -> bool {
        matches!(self, Self::MemoryDelete { .. } | Self::FileDelete { .. })
    }

    pub fn is_confirmed(&self) -> bool {
        match self {
            Self::MemoryDelete { confirmed, .. } | Self::FileDelete { confirmed, .. } => *confirmed,
            _ => false,
        }
    }

    /// Short human-readable description used in logs and audit metadata.
    pub fn summary(&self) -> String {
        match self {
            Self::MemoryWrite { key, value } => {
                format!("memory_write key={key} value_chars={}", value.chars().count())
            }
            Self::MemoryDelete { key, confirmed } => {
                format!("memory_delete key={key} confirmed={confirmed}")
            }
            Self::ShellExec { command } => format!("shell_exec command={command}"),
            Self::FileRead { path } => format!("file_read path={path}"),
            Self::FileWrite { path } => format!("file_write path={path}"),
            Self::FileDelete { path, confirmed } => {
                format!("file_delete path={path} confirmed={confirmed}")
            }
            Self::Generic { kind, payload } => {
                let preview: String = payload.chars().take(80).collect();
                format!("{kind} payload={preview}")
            }
        }
    }
}
