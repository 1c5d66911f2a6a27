use std::collections::BTreeMap;

use serde::Serialize;

use super::layer::{ContextLayer, ContextScope, ContextValue};

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ResolvedEntry {
    pub value: ContextValue,
    pub scope: ContextScope,
}

/// Read-only merged view of the four context layers for one pipeline run.
///
/// A snapshot exposes no mutating methods; a new one is resolved per request.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ContextSnapshot {
    entries: BTreeMap<String, ResolvedEntry>,
}

/// Merges the layers Global, Project, Task, Session in that order, so the most
/// specific layer wins on key collisions. Absent layers contribute nothing.
///
/// The scope recorded for each key is taken from the argument position, not from
/// the layer's own tag.
pub fn resolve(
    global: Option<&ContextLayer>,
    project: Option<&ContextLayer>,
    task: Option<&ContextLayer>,
    session: Option<&ContextLayer>,
) -> ContextSnapshot {
    let mut entries = BTreeMap::new();
    let layers = [global, project, task, session];

    for (scope, layer) in ContextScope::MERGE_ORDER.into_iter().zip(layers) {
        let Some(layer) = layer else {
            continue;
        };
        for (key, value) in layer.iter() {
            entries.insert(key.clone(), ResolvedEntry { value: value.clone(), scope });
        }
    }

    ContextSnapshot { entries }
}

impl ContextSnapshot {
    pub fn get(&self, key: &str) -> Option<&ContextValue> {
        self.entries.get(key).map(|entry| &entry.value)
    }

    pub fn source_of(&self, key: &str) -> Option<ContextScope> {
        self.entries.get(key).map(|entry| entry.scope)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ResolvedEntry)> {
        self.entries.iter().map(|(key, entry)| (key.as_str(), entry))
    }

    pub fn to_values(&self) -> BTreeMap<String, ContextValue> {
        self.entries.iter().map(|(key, entry)| (key.clone(), entry.value.clone())).collect()
    }

    /// Renders the snapshot as the context block handed to the reasoning capability,
    /// grouped by the scope that supplied each value.
    pub fn render_prompt(&self) -> String {
        let mut sections = Vec::new();
        for scope in ContextScope::MERGE_ORDER {
            let lines: Vec<String> = self
                .entries
                .iter()
                .filter(|(_, entry)| entry.scope == scope)
                .map(|(key, entry)| format!("{key}: {}", entry.value))
                .collect();
            if lines.is_empty() {
                continue;
            }
            sections.push(format!(
                "[{} CONTEXT]\n{}",
                scope.as_str().to_ascii_uppercase(),
                lines.join("\n")
            ));
        }

        if sections.is_empty() {
            return "No context available.".to_string();
        }
        sections.join("\n\n")
    }
}
