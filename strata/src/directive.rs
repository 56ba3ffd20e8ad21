use std::collections::BTreeMap;

use crate::instruction::value::Value;

/// Key of the directive that memoizes completed renders.
pub const CACHE: &str = "cache";

/// Directives declared by a template with `--@(key)` or `--@(key: value)`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Directives {
    entries: BTreeMap<String, String>,
}

impl Directives {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(|s| s.as_str())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// How a cached render is keyed.
#[derive(Debug, Clone)]
pub enum CacheKey {
    /// `--@(cache)` or `--@(cache:)`: every run shares the empty key.
    Default,
    /// `--@(cache: expr)`: the key is `expr` evaluated against the run parameters.
    Expression(Value),
}
