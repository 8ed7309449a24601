//! Parcel Metrics - counters and phase timers for the particle engine
//!
//! Collection is behind the `metrics` feature. Without it every type below is
//! a zero-sized stub and `time_phase!` expands to the bare body, so instrumented
//! code compiles to nothing.
//!
//! The macro tests the feature of the *calling* crate, so crates that use
//! them forward a `metrics` feature of their own to this one.

#[cfg(feature = "metrics")]
mod counter;
#[cfg(feature = "metrics")]
mod phase_profiler;

#[cfg(feature = "metrics")]
pub use counter::Counter;
#[cfg(feature = "metrics")]
pub use phase_profiler::{PhaseProfiler, PhaseTiming};

/// Time a block under `name` (plain block when metrics are disabled)
#[macro_export]
macro_rules! time_phase {
    ($profiler:expr, $name:expr, $body:block) => {{
        #[cfg(feature = "metrics")]
        let result = $profiler.time_phase($name, || $body);
        #[cfg(not(feature = "metrics"))]
        let result = $body;
        result
    }};
}

// No-op stubs when metrics disabled

#[cfg(not(feature = "metrics"))]
#[derive(Debug, Clone, Default)]
pub struct Counter;

#[cfg(not(feature = "metrics"))]
impl Counter {
    pub fn new() -> Self { Self }
    pub fn increment(&mut self, _name: &str, _value: usize) {}
    pub fn get(&self, _name: &str) -> usize { 0 }
    pub fn iter(&self) -> impl Iterator<Item = (&str, usize)> { std::iter::empty() }
}

#[cfg(not(feature = "metrics"))]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PhaseTiming {
    pub total: std::time::Duration,
    pub calls: u32,
}

#[cfg(not(feature = "metrics"))]
impl PhaseTiming {
    pub fn mean(&self) -> std::time::Duration { std::time::Duration::ZERO }
}

#[cfg(not(feature = "metrics"))]
#[derive(Debug, Clone, Default)]
pub struct PhaseProfiler;

#[cfg(not(feature = "metrics"))]
impl PhaseProfiler {
    pub fn new() -> Self { Self }
    pub fn time_phase<F, R>(&mut self, _name: &'static str, f: F) -> R where F: FnOnce() -> R { f() }
    pub fn get(&self, _name: &str) -> Option<PhaseTiming> { None }
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, PhaseTiming)> + '_ { std::iter::empty() }
}
