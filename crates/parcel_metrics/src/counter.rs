//! Named event counters

use std::collections::BTreeMap;

/// Monotonic counters keyed by name, e.g. `"redistribute.sent"`.
#[derive(Debug, Clone, Default)]
pub struct Counter {
    counters: BTreeMap<String, usize>,
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&mut self, name: &str, value: usize) {
        *self.counters.entry(name.to_string()).or_insert(0) += value;
    }

    pub fn get(&self, name: &str) -> usize {
        self.counters.get(name).copied().unwrap_or(0)
    }

    /// Counters in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, usize)> {
        self.counters.iter().map(|(k, v)| (k.as_str(), *v))
    }
}
