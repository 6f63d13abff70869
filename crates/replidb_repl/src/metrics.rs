//! Metrics emission for batch application.
//!
//! The executor reports through a [`MetricsSink`]. [`TracingMetrics`] emits
//! structured events under the `metrics` target; [`InMemoryMetrics`]
//! captures them for tests and summaries. Recording never fails.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Timer of a single-operation batch, suffixed with the operation key.
pub const SINGLE_PREFIX: &str = "single.";
/// Histogram of the original operation count of CUD batches.
pub const CUD_BATCH_SIZE: &str = "cud_batch_size";
/// Timer of a whole CUD batch.
pub const CUD_TIMER: &str = "cud_timer";
/// Timer of one namespace job.
pub const NAMESPACE_TIMER: &str = "namespace_timer";
/// Counter of optimistic jobs re-run pessimistically.
pub const UNIQUENESS_FALLBACKS: &str = "uniqueness_fallbacks";
/// Counter of units re-applied after a write conflict.
pub const WRITE_CONFLICT_RETRIES: &str = "write_conflict_retries";

/// Destination of executor metrics.
pub trait MetricsSink: Send + Sync {
    /// Records one timing sample.
    fn record_timer(&self, name: &str, duration: Duration);

    /// Records one histogram sample.
    fn record_histogram(&self, name: &str, value: u64);

    /// Adds one to a counter.
    fn increment(&self, name: &str);
}

impl<S: MetricsSink + ?Sized> MetricsSink for Arc<S> {
    fn record_timer(&self, name: &str, duration: Duration) {
        (**self).record_timer(name, duration);
    }

    fn record_histogram(&self, name: &str, value: u64) {
        (**self).record_histogram(name, value);
    }

    fn increment(&self, name: &str) {
        (**self).increment(name);
    }
}

fn duration_us(duration: Duration) -> u64 {
    u64::try_from(duration.as_micros()).unwrap_or(u64::MAX)
}

/// Sink that emits every sample as a `tracing` event.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingMetrics;

impl MetricsSink for TracingMetrics {
    fn record_timer(&self, name: &str, duration: Duration) {
        tracing::debug!(target: "metrics", metric = name, micros = duration_us(duration));
    }

    fn record_histogram(&self, name: &str, value: u64) {
        tracing::debug!(target: "metrics", metric = name, value);
    }

    fn increment(&self, name: &str) {
        tracing::debug!(target: "metrics", metric = name, value = 1u64);
    }
}

/// Aggregate of the samples of one timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimerSummary {
    /// Number of samples.
    pub count: u64,
    /// Sum of all samples.
    pub total: Duration,
    /// Largest sample.
    pub max: Duration,
}

#[derive(Debug, Default)]
struct Recorded {
    timers: HashMap<String, TimerSummary>,
    histograms: HashMap<String, Vec<u64>>,
    counters: HashMap<String, u64>,
}

/// Sink that keeps every sample in memory.
#[derive(Debug, Default)]
pub struct InMemoryMetrics {
    recorded: Mutex<Recorded>,
}

impl InMemoryMetrics {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the summary of a timer, if it was recorded.
    pub fn timer(&self, name: &str) -> Option<TimerSummary> {
        self.recorded.lock().timers.get(name).copied()
    }

    /// Returns the number of samples of a timer.
    pub fn timer_count(&self, name: &str) -> u64 {
        self.timer(name).map_or(0, |t| t.count)
    }

    /// Returns the samples of a histogram in recording order.
    pub fn histogram(&self, name: &str) -> Vec<u64> {
        self.recorded
            .lock()
            .histograms
            .get(name)
            .cloned()
            .unwrap_or_default()
    }

    /// Returns the value of a counter.
    pub fn counter(&self, name: &str) -> u64 {
        self.recorded.lock().counters.get(name).copied().unwrap_or(0)
    }

    /// Returns the names of all recorded timers, sorted.
    pub fn timer_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.recorded.lock().timers.keys().cloned().collect();
        names.sort();
        names
    }
}

impl MetricsSink for InMemoryMetrics {
    fn record_timer(&self, name: &str, duration: Duration) {
        let mut recorded = self.recorded.lock();
        let timer = recorded.timers.entry(name.to_string()).or_default();
        timer.count += 1;
        timer.total += duration;
        timer.max = timer.max.max(duration);
    }

    fn record_histogram(&self, name: &str, value: u64) {
        self.recorded
            .lock()
            .histograms
            .entry(name.to_string())
            .or_default()
            .push(value);
    }

    fn increment(&self, name: &str) {
        *self
            .recorded
            .lock()
            .counters
            .entry(name.to_string())
            .or_default() += 1;
    }
}

/// Records the time since its creation when dropped, so that every exit
/// path of a scope is timed.
#[must_use = "the timer records when dropped"]
pub struct TimerGuard<'a> {
    sink: &'a dyn MetricsSink,
    name: String,
    start: Instant,
}

impl<'a> TimerGuard<'a> {
    /// Starts a timer.
    pub fn start(sink: &'a dyn MetricsSink, name: impl Into<String>) -> Self {
        Self {
            sink,
            name: name.into(),
            start: Instant::now(),
        }
    }
}

impl Drop for TimerGuard<'_> {
    fn drop(&mut self) {
        self.sink.record_timer(&self.name, self.start.elapsed());
    }
}
