use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_CATEGORY: &str = "general";

fn default_category() -> String {
    DEFAULT_CATEGORY.to_string()
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub key: String,
    pub value: String,
    #[serde(default = "default_category")]
    pub category: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Number of recalls since the record was created.
    #[serde(default)]
    pub access_count: u64,
}

impl MemoryRecord {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            key: key.into(),
            value: value.into(),
            category: default_category(),
            created_at: now,
            updated_at: now,
            access_count: 0,
        }
    }

    pub fn in_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    /// Successor record for a put over `self`: keeps `created_at` and the access
    /// count, refreshes `updated_at`.
    pub fn replaced_with(&self, value: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            key: self.key.clone(),
            value: value.into(),
            category: category.into(),
            created_at: self.created_at,
            updated_at: Utc::now(),
            access_count: self.access_count,
        }
    }

    pub fn matches(&self, needle_lowercase: &str) -> bool {
        self.key.to_lowercase().contains(needle_lowercase)
            || self.value.to_lowercase().contains(needle_lowercase)
    }
}
