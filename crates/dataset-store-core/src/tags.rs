//! Tag mappings attached to datasets and series.
//!
//! A tag value is either a single string or a list of strings; a tag mapping
//! is an ordered map from attribute name to value. Matching is conjunctive
//! set-containment: a candidate matches the criteria when every queried key
//! is present and every queried value is contained in the candidate's value
//! set for that key.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A tag value: one string or a list of strings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TagValue {
    /// A single string value.
    One(String),
    /// A list of string values.
    Many(Vec<String>),
}

impl TagValue {
    /// All values, regardless of representation.
    pub fn values(&self) -> Vec<&str> {
        match self {
            TagValue::One(v) => vec![v.as_str()],
            TagValue::Many(vs) => vs.iter().map(String::as_str).collect(),
        }
    }

    /// Whether `value` is among this tag's values.
    pub fn contains(&self, value: &str) -> bool {
        match self {
            TagValue::One(v) => v == value,
            TagValue::Many(vs) => vs.iter().any(|v| v == value),
        }
    }

    /// Add a value, promoting a single value to a list when needed.
    /// Adding an already-present value is a no-op.
    pub fn add(&mut self, value: impl Into<String>) {
        let value = value.into();
        if self.contains(&value) {
            return;
        }
        match self {
            TagValue::One(existing) => {
                *self = TagValue::Many(vec![std::mem::take(existing), value]);
            }
            TagValue::Many(vs) => vs.push(value),
        }
    }
}

impl From<&str> for TagValue {
    fn from(v: &str) -> Self {
        TagValue::One(v.to_string())
    }
}

impl From<String> for TagValue {
    fn from(v: String) -> Self {
        TagValue::One(v)
    }
}

impl From<Vec<String>> for TagValue {
    fn from(vs: Vec<String>) -> Self {
        TagValue::Many(vs)
    }
}

/// An ordered mapping of tag names to values.
pub type TagMap = BTreeMap<String, TagValue>;

/// Add `value` under `key`, merging into an existing value if present.
pub fn add_tag(tags: &mut TagMap, key: impl Into<String>, value: impl Into<String>) {
    let key = key.into();
    match tags.get_mut(&key) {
        Some(existing) => existing.add(value),
        None => {
            tags.insert(key, TagValue::One(value.into()));
        }
    }
}

/// Check whether `tags` satisfies `criteria`.
///
/// Every criteria key must be present in `tags`, and every criteria value
/// must be contained in the tag's value set for that key. Empty criteria
/// match everything.
pub fn matches(tags: &TagMap, criteria: &TagMap) -> bool {
    criteria.iter().all(|(key, wanted)| match tags.get(key) {
        Some(present) => wanted.values().into_iter().all(|v| present.contains(v)),
        None => false,
    })
}
