use std::collections::btree_map;
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Context scopes ordered from least to most specific.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextScope {
    Global,
    Project,
    Task,
    Session,
}

impl ContextScope {
    /// Merge order used by the resolver. Later scopes override earlier ones.
    pub const MERGE_ORDER: [ContextScope; 4] =
        [ContextScope::Global, ContextScope::Project, ContextScope::Task, ContextScope::Session];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Global => "global",
            Self::Project => "project",
            Self::Task => "task",
            Self::Session => "session",
        }
    }
}

impl fmt::Display for ContextScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ContextValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl ContextValue {
    /// Interprets operator input such as `safe_mode=true` or `retries=3`.
    pub fn parse_loose(raw: &str) -> Self {
        let trimmed = raw.trim();
        match trimmed {
            "true" => return Self::Bool(true),
            "false" => return Self::Bool(false),
            _ => {}
        }
        if let Ok(value) = trimmed.parse::<i64>() {
            return Self::Integer(value);
        }
        if let Ok(value) = trimmed.parse::<f64>() {
            if value.is_finite() {
                return Self::Float(value);
            }
        }
        Self::Text(raw.to_string())
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(*value),
            _ => None,
        }
    }
}

impl fmt::Display for ContextValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(value) => write!(f, "{value}"),
            Self::Integer(value) => write!(f, "{value}"),
            Self::Float(value) => write!(f, "{value}"),
            Self::Text(value) => f.write_str(value),
        }
    }
}

impl From<&str> for ContextValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for ContextValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for ContextValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<bool> for ContextValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<f64> for ContextValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

/// One named scope of key/value settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ContextLayer {
    scope: ContextScope,
    entries: BTreeMap<String, ContextValue>,
}

impl ContextLayer {
    pub fn new(scope: ContextScope) -> Self {
        Self { scope, entries: BTreeMap::new() }
    }

    pub fn from_entries(scope: ContextScope, entries: BTreeMap<String, ContextValue>) -> Self {
        Self { scope, entries }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<ContextValue>) -> Self {
        self.set(key, value);
        self
    }

    pub fn scope(&self) -> ContextScope {
        self.scope
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<ContextValue>) {
        self.entries.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<ContextValue> {
        self.entries.remove(key)
    }

    pub fn get(&self, key: &str) -> Option<&ContextValue> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, ContextValue> {
        self.entries.iter()
    }

    pub fn entries(&self) -> &BTreeMap<String, ContextValue> {
        &self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::{ContextLayer, ContextScope, ContextValue};

    #[test]
    fn parse_loose_recognises_scalars() {
        assert_eq!(ContextValue::parse_loose("true"), ContextValue::Bool(true));
        assert_eq!(ContextValue::parse_loose("42"), ContextValue::Integer(42));
        assert_eq!(ContextValue::parse_loose("0.5"), ContextValue::Float(0.5));
        assert_eq!(ContextValue::parse_loose("rust"), ContextValue::Text("rust".to_string()));
        assert_eq!(ContextValue::parse_loose("NaN"), ContextValue::Text("NaN".to_string()));
    }

    #[test]
    fn layer_set_overwrites_existing_key() {
        let mut layer = ContextLayer::new(ContextScope::Project).with("language", "python");
        layer.set("language", "rust");

        assert_eq!(layer.len(), 1);
        assert_eq!(layer.get("language").and_then(ContextValue::as_text), Some("rust"));
    }
}
