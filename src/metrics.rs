//! Per-function call metrics

use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use crate::core::CallResult;

/// Timing samples kept per function by default.
pub const DEFAULT_SAMPLE_LIMIT: usize = 4096;

/// Timing samples and outcome counters keyed by function name.
///
/// Only the most recent `sample_limit` timings per function are kept, so
/// statistics describe a sliding window. Counters are exact.
pub struct CallMetrics {
    timings: RwLock<HashMap<String, VecDeque<Duration>>>,
    counters: RwLock<HashMap<String, u64>>,
    sample_limit: usize,
    start_time: Instant,
}

impl CallMetrics {
    pub fn new() -> Self {
        Self::with_sample_limit(DEFAULT_SAMPLE_LIMIT)
    }

    /// Keep at most `limit` (at least one) timings per function.
    pub fn with_sample_limit(limit: usize) -> Self {
        Self {
            timings: RwLock::new(HashMap::new()),
            counters: RwLock::new(HashMap::new()),
            sample_limit: limit.max(1),
            start_time: Instant::now(),
        }
    }

    /// Record one finished call.
    pub fn record(&self, function: &str, elapsed: Duration, result: &CallResult) {
        {
            let mut timings = self.timings.write();
            let samples = timings.entry(function.to_string()).or_default();
            if samples.len() == self.sample_limit {
                samples.pop_front();
            }
            samples.push_back(elapsed);
        }

        let outcome = match result.error() {
            None => "success",
            Some(err) => err.kind().as_str(),
        };
        self.increment(format!("{}.{}", function, outcome));
    }

    pub fn increment(&self, name: impl Into<String>) {
        *self.counters.write().entry(name.into()).or_default() += 1;
    }

    pub fn get_counter(&self, name: &str) -> u64 {
        self.counters.read().get(name).copied().unwrap_or(0)
    }

    pub fn get_timing_stats(&self, function: &str) -> Option<TimingStats> {
        self.timings
            .read()
            .get(function)
            .map(|samples| TimingStats::from_samples(samples))
    }

    /// Timings currently held for `function`.
    pub fn sample_count(&self, function: &str) -> usize {
        self.timings.read().get(function).map_or(0, VecDeque::len)
    }

    pub fn function_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.timings.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn reset(&self) {
        self.timings.write().clear();
        self.counters.write().clear();
    }

    pub fn summary(&self) -> MetricsSummary {
        let timings = self
            .timings
            .read()
            .iter()
            .map(|(name, samples)| (name.clone(), TimingStats::from_samples(samples)))
            .collect();

        MetricsSummary {
            uptime: self.uptime(),
            timings,
            counters: self.counters.read().clone(),
        }
    }
}

impl Default for CallMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Statistics over timing samples
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimingStats {
    pub count: usize,
    pub total: Duration,
    pub mean: Duration,
    pub min: Duration,
    pub max: Duration,
    pub p50: Duration,
    pub p95: Duration,
    pub p99: Duration,
}

impl TimingStats {
    fn from_samples(samples: &VecDeque<Duration>) -> Self {
        let durations: Vec<Duration> = samples.iter().copied().collect();
        Self::from_durations(&durations)
    }

    pub fn from_durations(durations: &[Duration]) -> Self {
        if durations.is_empty() {
            return Self {
                count: 0,
                total: Duration::ZERO,
                mean: Duration::ZERO,
                min: Duration::ZERO,
                max: Duration::ZERO,
                p50: Duration::ZERO,
                p95: Duration::ZERO,
                p99: Duration::ZERO,
            };
        }

        let mut sorted = durations.to_vec();
        sorted.sort();

        let count = sorted.len();
        let total: Duration = sorted.iter().sum();
        let percentile = |p: f64| {
            let idx = ((count as f64 * p) as usize).min(count - 1);
            sorted[idx]
        };

        Self {
            count,
            total,
            mean: total / count as u32,
            min: sorted[0],
            max: sorted[count - 1],
            p50: percentile(0.50),
            p95: percentile(0.95),
            p99: percentile(0.99),
        }
    }
}

impl std::fmt::Display for TimingStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "n={} mean={:?} min={:?} p50={:?} p95={:?} p99={:?} max={:?}",
            self.count, self.mean, self.min, self.p50, self.p95, self.p99, self.max
        )
    }
}

#[derive(Debug, Clone)]
pub struct MetricsSummary {
    pub uptime: Duration,
    pub timings: HashMap<String, TimingStats>,
    pub counters: HashMap<String, u64>,
}
