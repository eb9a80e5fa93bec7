//! Weighted, best-effort progress reporting.
//!
//! Each phase owns a fixed share of the run. Roles report local progress
//! within their phase through [`ProgressTracker::emit_sub_progress`] and the
//! tracker maps it onto the overall `[0, 1]` scale, adding elapsed time and
//! an ETA. Emission never blocks: with no sink registered it is a no-op, and
//! the channel sink drops events when its queue is full.
//!
//! Reported progress never decreases across a tracker and its clones: an
//! emit below the highest value seen so far reports that value instead.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::{Map, Value, json};
use tokio::sync::mpsc;

/// Share of the run spent planning.
pub const PLANNING_WEIGHT: f64 = 0.20;
/// Share of the run spent writing sections.
pub const WRITING_WEIGHT: f64 = 0.60;
/// Share of the run spent editing.
pub const EDITING_WEIGHT: f64 = 0.20;

/// Queue depth of [`progress_channel`].
pub const PROGRESS_CHANNEL_CAPACITY: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Initializing,
    Researching,
    Planning,
    Writing,
    Editing,
    Attributing,
    Completed,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::Researching => "researching",
            Self::Planning => "planning",
            Self::Writing => "writing",
            Self::Editing => "editing",
            Self::Attributing => "attributing",
            Self::Completed => "completed",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cumulative weight of the phases strictly before `phase`.
///
/// Researching runs inside planning and attributing inside editing, so they
/// share the base of their enclosing phase.
pub fn base_phase_progress(phase: Phase) -> f64 {
    match phase {
        Phase::Initializing | Phase::Researching | Phase::Planning => 0.0,
        Phase::Writing => PLANNING_WEIGHT,
        Phase::Editing | Phase::Attributing => PLANNING_WEIGHT + WRITING_WEIGHT,
        Phase::Completed => 1.0,
    }
}

/// Weight of a phase's own share of the run (0 for bookkeeping phases).
pub fn phase_weight(phase: Phase) -> f64 {
    match phase {
        Phase::Planning | Phase::Researching => PLANNING_WEIGHT,
        Phase::Writing => WRITING_WEIGHT,
        Phase::Editing | Phase::Attributing => EDITING_WEIGHT,
        Phase::Initializing | Phase::Completed => 0.0,
    }
}

/// One progress snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressEvent {
    pub phase: Phase,
    pub step: String,
    /// Overall fraction of the run, in `[0, 1]`.
    pub progress: f64,
    pub elapsed: Duration,
    pub estimated_remaining: Duration,
    pub details: Map<String, Value>,
}

/// Receiver of progress events. Implementations must not block.
pub trait ProgressSink: Send + Sync {
    fn send(&self, event: ProgressEvent);
}

impl<F> ProgressSink for F
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    fn send(&self, event: ProgressEvent) {
        self(event)
    }
}

/// Sink backed by a bounded queue; full queue means the event is dropped.
pub struct ChannelSink {
    tx: mpsc::Sender<ProgressEvent>,
}

impl ProgressSink for ChannelSink {
    fn send(&self, event: ProgressEvent) {
        if let Err(e) = self.tx.try_send(event) {
            tracing::trace!(error = %e, "progress event dropped");
        }
    }
}

/// A sink and its consumer queue of [`PROGRESS_CHANNEL_CAPACITY`] events.
pub fn progress_channel() -> (Arc<dyn ProgressSink>, mpsc::Receiver<ProgressEvent>) {
    let (tx, rx) = mpsc::channel(PROGRESS_CHANNEL_CAPACITY);
    (Arc::new(ChannelSink { tx }), rx)
}

/// Maps per-step progress onto the whole run. Cheap to clone.
#[derive(Clone)]
pub struct ProgressTracker {
    started: Instant,
    sink: Option<Arc<dyn ProgressSink>>,
    /// Highest progress emitted so far, as `f64` bits.
    high_water: Arc<AtomicU64>,
}

impl std::fmt::Debug for ProgressTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressTracker")
            .field("started", &self.started)
            .field("has_sink", &self.sink.is_some())
            .finish()
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new(None)
    }
}

impl ProgressTracker {
    /// Start the clock now. With `None`, every emit is a no-op.
    pub fn new(sink: Option<Arc<dyn ProgressSink>>) -> Self {
        Self {
            started: Instant::now(),
            sink,
            high_water: Arc::new(AtomicU64::new(0f64.to_bits())),
        }
    }

    /// Record `progress` and return it, or the higher value already seen.
    fn raise_to(&self, progress: f64) -> f64 {
        let seen = self
            .high_water
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |bits| {
                (progress > f64::from_bits(bits)).then_some(progress.to_bits())
            });
        match seen {
            Ok(_) => progress,
            Err(bits) => f64::from_bits(bits),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Emit an event with an overall progress value.
    pub fn emit_progress(
        &self,
        phase: Phase,
        step: impl Into<String>,
        progress: f64,
        details: Map<String, Value>,
    ) {
        let Some(sink) = &self.sink else {
            return;
        };

        let progress = self.raise_to(if phase == Phase::Completed {
            1.0
        } else {
            progress.clamp(0.0, 1.0)
        });
        let elapsed = self.started.elapsed();

        sink.send(ProgressEvent {
            phase,
            step: step.into(),
            progress,
            elapsed,
            estimated_remaining: estimate_remaining(elapsed, progress),
            details,
        });
    }

    /// Emit progress local to a phase: `base + sub * weight`.
    pub fn emit_sub_progress(
        &self,
        phase: Phase,
        step: impl Into<String>,
        base: f64,
        sub: f64,
        weight: f64,
        mut details: Map<String, Value>,
    ) {
        if self.sink.is_none() {
            return;
        }
        let sub = sub.clamp(0.0, 1.0);
        details.insert("sub_progress".into(), json!(sub));
        details.insert("phase_weight".into(), json!(weight));
        self.emit_progress(phase, step, base + sub * weight, details);
    }

    pub fn emit_phase_start(&self, phase: Phase, step: impl Into<String>) {
        let mut details = Map::new();
        details.insert("phase_start".into(), Value::Bool(true));
        self.emit_progress(phase, step, base_phase_progress(phase), details);
    }

    pub fn emit_phase_complete(&self, phase: Phase, step: impl Into<String>) {
        let mut details = Map::new();
        details.insert("phase_complete".into(), Value::Bool(true));
        let done = base_phase_progress(phase) + phase_weight(phase);
        self.emit_progress(phase, step, done, details);
    }
}

/// `elapsed / progress - elapsed` inside `(0, 1)`, zero at either end.
pub fn estimate_remaining(elapsed: Duration, progress: f64) -> Duration {
    if progress <= 0.0 || progress >= 1.0 {
        return Duration::ZERO;
    }
    let total = elapsed.as_secs_f64() / progress;
    Duration::from_secs_f64((total - elapsed.as_secs_f64()).max(0.0))
}

/// Build a details map from `(key, value)` pairs.
pub fn details<const N: usize>(pairs: [(&str, Value); N]) -> Map<String, Value> {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    fn recording() -> (Arc<Mutex<Vec<ProgressEvent>>>, Arc<dyn ProgressSink>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink_events = Arc::clone(&events);
        let sink: Arc<dyn ProgressSink> = Arc::new(move |e: ProgressEvent| {
            sink_events.lock().unwrap().push(e);
        });
        (events, sink)
    }

    #[test]
    fn phase_bases_accumulate_weights() {
        assert_eq!(base_phase_progress(Phase::Initializing), 0.0);
        assert_eq!(base_phase_progress(Phase::Planning), 0.0);
        assert_eq!(
            base_phase_progress(Phase::Writing),
            base_phase_progress(Phase::Planning) + PLANNING_WEIGHT
        );
        assert!((base_phase_progress(Phase::Editing) - 0.8).abs() < 1e-9);
        assert_eq!(base_phase_progress(Phase::Completed), 1.0);
        assert_eq!(base_phase_progress(Phase::Researching), 0.0);
        assert_eq!(
            base_phase_progress(Phase::Attributing),
            base_phase_progress(Phase::Editing)
        );
        assert!((PLANNING_WEIGHT + WRITING_WEIGHT + EDITING_WEIGHT - 1.0).abs() < 1e-9);
    }

    #[test]
    fn full_progress_has_no_eta() {
        let (events, sink) = recording();
        let tracker = ProgressTracker::new(Some(sink));
        tracker.emit_progress(Phase::Editing, "done", 1.0, Map::new());

        let events = events.lock().unwrap();
        assert_eq!(events[0].estimated_remaining, Duration::ZERO);
    }

    #[test]
    fn eta_scales_with_progress() {
        let eta = estimate_remaining(Duration::from_secs(10), 0.25);
        assert_eq!(eta, Duration::from_secs(30));
        assert_eq!(estimate_remaining(Duration::from_secs(10), 0.0), Duration::ZERO);
    }

    #[test]
    fn sub_progress_maps_into_phase_window() {
        let (events, sink) = recording();
        let tracker = ProgressTracker::new(Some(sink));
        tracker.emit_sub_progress(
            Phase::Writing,
            "section 1/2",
            base_phase_progress(Phase::Writing),
            0.5,
            WRITING_WEIGHT,
            details([("section", json!("intro"))]),
        );

        let events = events.lock().unwrap();
        let event = &events[0];
        assert!((event.progress - 0.5).abs() < 1e-9);
        assert_eq!(event.details["sub_progress"], json!(0.5));
        assert_eq!(event.details["section"], json!("intro"));
    }

    #[test]
    fn completed_always_reports_full() {
        let (events, sink) = recording();
        let tracker = ProgressTracker::new(Some(sink));
        tracker.emit_progress(Phase::Completed, "done", 0.3, Map::new());
        assert_eq!(events.lock().unwrap()[0].progress, 1.0);
    }

    #[test]
    fn progress_never_goes_backwards_across_clones() {
        let (events, sink) = recording();
        let tracker = ProgressTracker::new(Some(sink));
        let writer = tracker.clone();

        tracker.emit_sub_progress(Phase::Writing, "2/3 done", 0.2, 2.0 / 3.0, WRITING_WEIGHT, Map::new());
        writer.emit_progress(Phase::Writing, "[writer_2] researching", 0.2, Map::new());
        tracker.emit_sub_progress(Phase::Writing, "3/3 done", 0.2, 1.0, WRITING_WEIGHT, Map::new());

        let events = events.lock().unwrap();
        let values: Vec<f64> = events.iter().map(|e| e.progress).collect();
        assert!((values[0] - 0.6).abs() < 1e-9);
        assert_eq!(values[1], values[0]);
        assert_eq!(events[1].step, "[writer_2] researching");
        assert!((values[2] - 0.8).abs() < 1e-9);
    }

    #[test]
    fn no_sink_is_a_noop() {
        let tracker = ProgressTracker::default();
        tracker.emit_progress(Phase::Planning, "x", 0.1, Map::new());
        tracker.emit_phase_start(Phase::Writing, "y");
    }

    #[tokio::test]
    async fn full_channel_drops_instead_of_blocking() {
        let (sink, mut rx) = progress_channel();
        let tracker = ProgressTracker::new(Some(sink));
        for i in 0..(PROGRESS_CHANNEL_CAPACITY + 5) {
            tracker.emit_progress(Phase::Writing, format!("step {i}"), 0.5, Map::new());
        }

        let mut received = 0;
        while rx.try_recv().is_ok() {
            received += 1;
        }
        assert_eq!(received, PROGRESS_CHANNEL_CAPACITY);
    }
}
