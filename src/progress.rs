//! Progress reporting and cooperative cancellation.
//!
//! Long operations (read, rescan, range walk, search, merge) never block on
//! a UI. They call into a [`ProgressReporter`] through a [`ProgressGate`],
//! which suppresses the progress display until the operation has run for a
//! while and throttles updates afterwards. Cancellation is a [`StopFlag`]
//! polled once at the top of every per-frame iteration.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::Preferences;

/// How a long-running operation ended when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Every frame the operation covers was processed
    Completed,
    /// The stop flag was raised; partial results are kept
    Aborted,
}

impl Outcome {
    pub fn is_aborted(&self) -> bool {
        matches!(self, Outcome::Aborted)
    }
}

/// Receiver for progress of a long-running operation.
pub trait ProgressReporter {
    /// The operation has run long enough to be worth showing.
    fn begin(&mut self, task: &str, item: &str);

    /// `fraction` is in `0.0..=1.0`.
    fn update(&mut self, fraction: f32, status: &str);

    fn end(&mut self);
}

/// Reporter that discards everything. Used for headless operation.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullReporter;

impl ProgressReporter for NullReporter {
    fn begin(&mut self, _task: &str, _item: &str) {}
    fn update(&mut self, _fraction: f32, _status: &str) {}
    fn end(&mut self) {}
}

/// Monotonic time source.
pub trait Clock: Send + Sync {
    /// Time elapsed since an arbitrary fixed origin.
    fn now(&self) -> Duration;
}

/// Wall clock backed by [`Instant`].
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    nanos: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        self.nanos
            .fetch_add(by.as_nanos() as u64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        Duration::from_nanos(self.nanos.load(Ordering::SeqCst))
    }
}

/// Shared cancellation flag.
///
/// Clones observe the same flag, so one can be handed to a signal handler
/// while the pipeline polls another.
#[derive(Debug, Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request that the running operation stop at its next checkpoint.
    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Time-gating in front of a [`ProgressReporter`].
///
/// Nothing reaches the reporter until `begin_delay` has passed since the
/// gate was created; after that, updates are forwarded at most once per
/// `update_interval`.
pub struct ProgressGate {
    clock: Arc<dyn Clock>,
    task: String,
    item: String,
    started_at: Duration,
    begin_delay: Duration,
    update_interval: Duration,
    last_update: Option<Duration>,
}

impl ProgressGate {
    pub fn new(
        clock: Arc<dyn Clock>,
        prefs: &Preferences,
        task: impl Into<String>,
        item: impl Into<String>,
    ) -> Self {
        let started_at = clock.now();
        Self {
            clock,
            task: task.into(),
            item: item.into(),
            started_at,
            begin_delay: prefs.progress_begin_delay(),
            update_interval: prefs.progress_update_interval(),
            last_update: None,
        }
    }

    /// Whether the reporter has been shown.
    pub fn is_visible(&self) -> bool {
        self.last_update.is_some()
    }

    /// Report progress if the gate allows it. `status` is only evaluated
    /// when an update is actually delivered.
    pub fn tick<F>(&mut self, reporter: &mut dyn ProgressReporter, fraction: f32, status: F)
    where
        F: FnOnce() -> String,
    {
        let now = self.clock.now();
        match self.last_update {
            None => {
                if now.saturating_sub(self.started_at) < self.begin_delay {
                    return;
                }
                reporter.begin(&self.task, &self.item);
            }
            Some(last) => {
                if now.saturating_sub(last) < self.update_interval {
                    return;
                }
            }
        }
        self.last_update = Some(now);
        reporter.update(fraction.clamp(0.0, 1.0), &status());
    }

    /// Tear down the display if it was ever shown.
    pub fn finish(self, reporter: &mut dyn ProgressReporter) {
        if self.is_visible() {
            reporter.end();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        begins: usize,
        updates: Vec<f32>,
        ends: usize,
    }

    impl ProgressReporter for Recorder {
        fn begin(&mut self, _task: &str, _item: &str) {
            self.begins += 1;
        }
        fn update(&mut self, fraction: f32, _status: &str) {
            self.updates.push(fraction);
        }
        fn end(&mut self) {
            self.ends += 1;
        }
    }

    fn gate(clock: &ManualClock) -> ProgressGate {
        ProgressGate::new(
            Arc::new(clock.clone()),
            &Preferences::default(),
            "Loading",
            "capture.pcap",
        )
    }

    #[test]
    fn test_gate_hides_fast_operations() {
        let clock = ManualClock::new();
        let mut rec = Recorder::default();
        let mut gate = gate(&clock);

        for _ in 0..10 {
            clock.advance(Duration::from_millis(40));
            gate.tick(&mut rec, 0.5, String::new);
        }
        gate.finish(&mut rec);

        assert_eq!(rec.begins, 0);
        assert!(rec.updates.is_empty());
        assert_eq!(rec.ends, 0);
    }

    #[test]
    fn test_gate_throttles_after_begin() {
        let clock = ManualClock::new();
        let mut rec = Recorder::default();
        let mut gate = gate(&clock);

        clock.advance(Duration::from_millis(500));
        gate.tick(&mut rec, 0.1, String::new);
        assert_eq!(rec.begins, 1);
        assert_eq!(rec.updates.len(), 1);

        clock.advance(Duration::from_millis(100));
        gate.tick(&mut rec, 0.2, String::new);
        assert_eq!(rec.updates.len(), 1);

        clock.advance(Duration::from_millis(50));
        gate.tick(&mut rec, 0.3, String::new);
        assert_eq!(rec.updates, vec![0.1, 0.3]);

        gate.finish(&mut rec);
        assert_eq!(rec.begins, 1);
        assert_eq!(rec.ends, 1);
    }

    #[test]
    fn test_gate_clamps_fraction() {
        let clock = ManualClock::new();
        let mut rec = Recorder::default();
        let mut gate = gate(&clock);

        clock.advance(Duration::from_secs(1));
        gate.tick(&mut rec, 1.7, String::new);
        assert_eq!(rec.updates, vec![1.0]);
    }

    #[test]
    fn test_stop_flag_shared_between_clones() {
        let flag = StopFlag::new();
        let other = flag.clone();
        assert!(!flag.is_set());
        other.stop();
        assert!(flag.is_set());
        flag.clear();
        assert!(!other.is_set());
    }
}
