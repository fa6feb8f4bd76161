//! Progress reporting
//!
//! The storage API does not expose transfer telemetry, so while an attempt is
//! in flight the observer sees a synthetic estimate: a small starting value,
//! then small random steps on a fixed tick, capped at [`SYNTHETIC_CAP`].
//! Real checkpoints (92, 95, 100) come from the pipeline after the transfer
//! settles.
//!
//! Estimation sits behind [`ProgressEstimator`] so a transport with real
//! byte counts can replace it. Nothing in here influences control flow;
//! swapping in [`NoProgress`] must not change any upload outcome.

use super::{FailureKind, MIB};
use parking_lot::Mutex;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Highest value the estimate may reach before the transfer settles
pub const SYNTHETIC_CAP: u8 = 88;

/// First value reported when an attempt is dispatched
pub const SYNTHETIC_START: u8 = 5;

/// Transfer confirmed by the store
pub const CHECKPOINT_STORED: u8 = 92;

/// Public reference being written to the owning record
pub const CHECKPOINT_PERSISTING: u8 = 95;

/// How an upload ended, from the observer's point of view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressEnd {
    Succeeded,
    Failed(FailureKind),
    Cancelled,
}

/// Event delivered to the observer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressEvent {
    Percent(u8),
    Finished(ProgressEnd),
}

type Callback = dyn Fn(ProgressEvent) + Send + Sync;

struct SinkInner {
    callback: Option<Box<Callback>>,
    finished: Mutex<bool>,
}

/// Caller-owned observer handle.
///
/// Delivers at most one [`ProgressEvent::Finished`]; percentages after that
/// are dropped. The callback runs under the sink's lock and must not call
/// back into the sink.
#[derive(Clone)]
pub struct ProgressSink {
    inner: Arc<SinkInner>,
}

impl std::fmt::Debug for ProgressSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressSink")
            .field("finished", &self.is_finished())
            .finish()
    }
}

impl ProgressSink {
    /// Sink that forwards every event to `callback`
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(ProgressEvent) + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(SinkInner {
                callback: Some(Box::new(callback)),
                finished: Mutex::new(false),
            }),
        }
    }

    /// Sink with no observer
    pub fn discard() -> Self {
        Self {
            inner: Arc::new(SinkInner {
                callback: None,
                finished: Mutex::new(false),
            }),
        }
    }

    /// Sink feeding an unbounded channel
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = Self::new(move |event| {
            let _ = tx.send(event);
        });
        (sink, rx)
    }

    /// Report a percentage (clamped to 100)
    pub fn report(&self, percent: u8) {
        let finished = self.inner.finished.lock();
        if *finished {
            return;
        }
        if let Some(callback) = &self.inner.callback {
            callback(ProgressEvent::Percent(percent.min(100)));
        }
    }

    /// Deliver the terminal event. Returns `false` if one was already sent.
    pub fn finish(&self, end: ProgressEnd) -> bool {
        let mut finished = self.inner.finished.lock();
        if *finished {
            return false;
        }
        *finished = true;
        if let Some(callback) = &self.inner.callback {
            callback(ProgressEvent::Finished(end));
        }
        true
    }

    pub fn is_finished(&self) -> bool {
        *self.inner.finished.lock()
    }
}

/// Produces progress estimates for one attempt
pub trait ProgressEstimator: Send + Sync {
    /// Start estimating for an attempt at a file of `declared_size` bytes
    fn begin(&self, declared_size: u64, sink: &ProgressSink) -> Box<dyn ProgressTicker>;
}

/// Running estimate for one attempt
pub trait ProgressTicker: Send {
    /// Stop estimating. No estimate is delivered after this returns.
    fn settle(&mut self);
}

/// Tick interval for synthetic estimates; larger files tick slower
pub fn tick_interval(declared_size: u64) -> Duration {
    if declared_size <= 5 * MIB {
        Duration::from_millis(150)
    } else if declared_size <= 20 * MIB {
        Duration::from_millis(200)
    } else {
        Duration::from_millis(300)
    }
}

/// Random-walk estimate, capped at [`SYNTHETIC_CAP`]
#[derive(Debug, Clone, Copy, Default)]
pub struct SyntheticProgress;

struct TickState {
    settled: bool,
    percent: u8,
}

struct SyntheticTicker {
    state: Arc<Mutex<TickState>>,
    handle: Option<JoinHandle<()>>,
}

impl ProgressEstimator for SyntheticProgress {
    fn begin(&self, declared_size: u64, sink: &ProgressSink) -> Box<dyn ProgressTicker> {
        let state = Arc::new(Mutex::new(TickState {
            settled: false,
            percent: SYNTHETIC_START,
        }));
        sink.report(SYNTHETIC_START);

        let period = tick_interval(declared_size);
        let task_state = Arc::clone(&state);
        let sink = sink.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // first tick completes immediately
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let step: u8 = rand::rng().random_range(1..=4);

                let mut state = task_state.lock();
                if state.settled || state.percent >= SYNTHETIC_CAP {
                    break;
                }
                state.percent = state.percent.saturating_add(step).min(SYNTHETIC_CAP);
                sink.report(state.percent);
            }
        });

        Box::new(SyntheticTicker {
            state,
            handle: Some(handle),
        })
    }
}

impl ProgressTicker for SyntheticTicker {
    fn settle(&mut self) {
        self.state.lock().settled = true;
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl Drop for SyntheticTicker {
    fn drop(&mut self) {
        self.settle();
    }
}

/// Estimator that reports nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

struct IdleTicker;

impl ProgressTicker for IdleTicker {
    fn settle(&mut self) {}
}

impl ProgressEstimator for NoProgress {
    fn begin(&self, _declared_size: u64, _sink: &ProgressSink) -> Box<dyn ProgressTicker> {
        Box::new(IdleTicker)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(rx: &mut mpsc::UnboundedReceiver<ProgressEvent>) -> Vec<ProgressEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn percents(events: &[ProgressEvent]) -> Vec<u8> {
        events
            .iter()
            .filter_map(|e| match e {
                ProgressEvent::Percent(p) => Some(*p),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_tick_interval_bands() {
        assert_eq!(tick_interval(MIB), Duration::from_millis(150));
        assert_eq!(tick_interval(15 * MIB), Duration::from_millis(200));
        assert_eq!(tick_interval(40 * MIB), Duration::from_millis(300));
    }

    #[test]
    fn test_sink_finishes_once() {
        let (sink, mut rx) = ProgressSink::channel();
        assert!(sink.finish(ProgressEnd::Succeeded));
        assert!(!sink.finish(ProgressEnd::Cancelled));
        sink.report(50);

        assert_eq!(
            drain(&mut rx),
            vec![ProgressEvent::Finished(ProgressEnd::Succeeded)]
        );
    }

    #[test]
    fn test_sink_clamps_to_hundred() {
        let (sink, mut rx) = ProgressSink::channel();
        sink.report(250);
        assert_eq!(drain(&mut rx), vec![ProgressEvent::Percent(100)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_synthetic_progress_is_monotonic_and_capped() {
        let (sink, mut rx) = ProgressSink::channel();
        let mut ticker = SyntheticProgress.begin(MIB, &sink);

        tokio::time::sleep(Duration::from_secs(60)).await;
        ticker.settle();

        let values = percents(&drain(&mut rx));
        assert_eq!(values.first(), Some(&SYNTHETIC_START));
        assert!(values.windows(2).all(|w| w[0] <= w[1]));
        assert!(values.iter().all(|p| *p <= SYNTHETIC_CAP));
        assert_eq!(values.last(), Some(&SYNTHETIC_CAP));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_ticks_after_settle() {
        let (sink, mut rx) = ProgressSink::channel();
        let mut ticker = SyntheticProgress.begin(MIB, &sink);

        tokio::time::sleep(Duration::from_millis(500)).await;
        ticker.settle();
        let before = drain(&mut rx).len();

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(before >= 1);
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_ticker_stops_it() {
        let (sink, mut rx) = ProgressSink::channel();
        drop(SyntheticProgress.begin(MIB, &sink));
        drain(&mut rx);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_no_progress_reports_nothing() {
        let (sink, mut rx) = ProgressSink::channel();
        let mut ticker = NoProgress.begin(MIB, &sink);
        ticker.settle();
        assert!(drain(&mut rx).is_empty());
    }
}
