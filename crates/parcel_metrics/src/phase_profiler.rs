//! Wall-clock timing of named phases

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PhaseTiming {
    pub total: Duration,
    pub calls: u32,
}

impl PhaseTiming {
    pub fn mean(&self) -> Duration {
        if self.calls == 0 {
            Duration::ZERO
        } else {
            self.total / self.calls
        }
    }
}

/// Accumulates time spent in each named phase across calls.
#[derive(Debug, Clone, Default)]
pub struct PhaseProfiler {
    timings: BTreeMap<&'static str, PhaseTiming>,
}

impl PhaseProfiler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn time_phase<F, R>(&mut self, name: &'static str, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let start = Instant::now();
        let result = f();
        self.record(name, start.elapsed());
        result
    }

    fn record(&mut self, name: &'static str, elapsed: Duration) {
        let entry = self.timings.entry(name).or_default();
        entry.total += elapsed;
        entry.calls += 1;
    }

    pub fn get(&self, name: &str) -> Option<PhaseTiming> {
        self.timings.get(name).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, PhaseTiming)> + '_ {
        self.timings.iter().map(|(k, v)| (*k, *v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phases_accumulate_calls() {
        let mut p = PhaseProfiler::new();
        let v = p.time_phase("classify", || 21 * 2);
        assert_eq!(v, 42);
        p.record("classify", Duration::from_millis(4));
        let t = p.get("classify").unwrap();
        assert_eq!(t.calls, 2);
        assert!(t.total >= Duration::from_millis(4));
        assert!(t.mean() <= t.total);
        assert_eq!(p.get("exchange"), None);
    }
}
