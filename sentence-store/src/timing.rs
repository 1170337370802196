//! Per-phase wall-clock accumulators.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use serde::Serialize;

/// Cumulative elapsed time per named phase.
///
/// Unseen phases read as zero. Values only grow for the life of the
/// accumulator; a fresh owner starts from an empty one.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Timings {
    phases: BTreeMap<String, Duration>,
}

impl Timings {
    /// Create an empty accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `elapsed` to the phase total.
    pub fn record(&mut self, phase: &str, elapsed: Duration) {
        *self.phases.entry(phase.to_string()).or_default() += elapsed;
    }

    /// Add the time elapsed since `started` to the phase total.
    pub fn record_since(&mut self, phase: &str, started: Instant) {
        self.record(phase, started.elapsed());
    }

    /// Cumulative time spent in a phase.
    pub fn get(&self, phase: &str) -> Duration {
        self.phases.get(phase).copied().unwrap_or_default()
    }

    /// Whether a phase has been recorded at least once.
    pub fn contains(&self, phase: &str) -> bool {
        self.phases.contains_key(phase)
    }

    /// Iterate over `(phase, total)` pairs in phase order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, Duration)> {
        self.phases.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Whether no phase has been recorded.
    pub fn is_empty(&self) -> bool {
        self.phases.is_empty()
    }

    /// Fold `other` into `self` with every key prefixed by `owner`.
    ///
    /// Keys from different owners never collide, so a phase named `load` in
    /// two components stays two entries (`embedder.load`, `index.load`).
    pub fn merge_namespaced(&mut self, owner: &str, other: &Timings) {
        for (phase, elapsed) in other.iter() {
            self.record(&format!("{owner}.{phase}"), elapsed);
        }
    }

    /// Phase totals as seconds, for display.
    pub fn as_seconds(&self) -> BTreeMap<String, f64> {
        self.phases
            .iter()
            .map(|(k, v)| (k.clone(), v.as_secs_f64()))
            .collect()
    }
}
