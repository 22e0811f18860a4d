use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use frame_describe_common::snapshot::{PayloadTooLarge, SizeGuard};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::camera::FrameSource;
use crate::encoder::SnapshotEncoder;
use crate::transport::{DescriptionResult, FailureReason, Transport};

/// How one capture cycle ended.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// The snapshot reached the transport; carries what came back.
    Submitted(DescriptionResult),
    NoFrame,
    EncodeFailed,
    /// Oversized snapshot dropped before any network call.
    TooLarge(PayloadTooLarge),
}

/// The capture → encode → guard → submit sequence run on every tick.
pub struct CaptureCycle {
    source: Arc<dyn FrameSource>,
    encoder: SnapshotEncoder,
    guard: SizeGuard,
    transport: Arc<dyn Transport>,
}

impl CaptureCycle {
    pub fn new(
        source: Arc<dyn FrameSource>,
        encoder: SnapshotEncoder,
        guard: SizeGuard,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            source,
            encoder,
            guard,
            transport,
        }
    }

    pub async fn run(&self) -> CycleOutcome {
        let frame = match self.source.capture().await {
            Ok(f) => f,
            Err(e) => {
                warn!(error = %e, "capture failed, skipping cycle");
                return CycleOutcome::NoFrame;
            }
        };
        debug!(captured_at_ms = frame.captured_at_ms, "frame captured");

        let snapshot = match self.encoder.encode(&frame) {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "encoding failed, skipping cycle");
                return CycleOutcome::EncodeFailed;
            }
        };

        let snapshot = match self.guard.check(snapshot) {
            Ok(s) => s,
            Err(rejected) => {
                warn!(
                    size_kb = format!("{:.1}", rejected.size_kb),
                    max_kb = rejected.max_kb,
                    "snapshot exceeds size ceiling, not transmitting"
                );
                return CycleOutcome::TooLarge(rejected);
            }
        };

        CycleOutcome::Submitted(self.transport.submit(&snapshot).await)
    }
}

/// Fires a [`CaptureCycle`] once per period until stopped.
///
/// At most one cycle executes at a time. A tick that lands while the previous
/// cycle is still running is dropped, not queued.
pub struct CaptureScheduler {
    cancel: CancellationToken,
    driver: Option<JoinHandle<()>>,
    latest: watch::Receiver<String>,
    completed: Arc<AtomicU64>,
}

impl CaptureScheduler {
    /// Start the stream. The first cycle fires one `period` from now.
    pub fn start(period: Duration, cycle: Arc<CaptureCycle>) -> Self {
        let cancel = CancellationToken::new();
        let (latest_tx, latest) = watch::channel(String::new());
        let completed = Arc::new(AtomicU64::new(0));

        let driver = tokio::spawn(drive(
            period,
            cycle,
            cancel.clone(),
            latest_tx,
            Arc::clone(&completed),
        ));

        info!(period_secs = period.as_secs_f64(), "capture scheduler started");
        Self {
            cancel,
            driver: Some(driver),
            latest,
            completed,
        }
    }

    pub fn is_active(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    /// Latest description text, updated after every submitted cycle.
    pub fn latest_description(&self) -> watch::Receiver<String> {
        self.latest.clone()
    }

    /// Number of cycles that have run to completion.
    pub fn completed_cycles(&self) -> u64 {
        self.completed.load(Ordering::Acquire)
    }

    /// Cancel the periodic trigger. Once this returns no new cycle will start;
    /// a cycle already in flight is left to finish.
    pub async fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(driver) = self.driver.take() {
            let _ = driver.await;
        }
        info!("capture scheduler stopped");
    }
}

impl Drop for CaptureScheduler {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Clears the in-flight flag when a cycle task ends, panics included.
struct InFlight(Arc<AtomicBool>);

impl InFlight {
    fn claim(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(Arc::clone(flag)))
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

async fn drive(
    period: Duration,
    cycle: Arc<CaptureCycle>,
    cancel: CancellationToken,
    latest_tx: watch::Sender<String>,
    completed: Arc<AtomicU64>,
) {
    let in_flight = Arc::new(AtomicBool::new(false));
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut seq: u64 = 0;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                seq += 1;
                let Some(guard) = InFlight::claim(&in_flight) else {
                    debug!(seq, "previous cycle still in flight, dropping tick");
                    continue;
                };

                let cycle = Arc::clone(&cycle);
                let latest_tx = latest_tx.clone();
                let completed = Arc::clone(&completed);
                tokio::spawn(async move {
                    let _guard = guard;
                    let outcome = cycle.run().await;
                    report(seq, &outcome, &latest_tx);
                    completed.fetch_add(1, Ordering::AcqRel);
                });
            }
        }
    }

    debug!(ticks = seq, "capture driver exiting");
}

fn report(seq: u64, outcome: &CycleOutcome, latest_tx: &watch::Sender<String>) {
    match outcome {
        CycleOutcome::Submitted(result) => {
            match result {
                DescriptionResult::Described(text) => {
                    info!(seq, chars = text.len(), "cycle complete");
                }
                DescriptionResult::Failed(FailureReason::Transport(detail)) => {
                    warn!(seq, detail, "cycle failed in transport");
                }
            }
            latest_tx.send_replace(result.display_text().to_string());
        }
        CycleOutcome::NoFrame | CycleOutcome::EncodeFailed | CycleOutcome::TooLarge(_) => {
            debug!(seq, ?outcome, "cycle ended before transmission");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{CaptureError, VideoFrame};
    use async_trait::async_trait;
    use frame_describe_common::protocol::FALLBACK_DESCRIPTION;
    use frame_describe_common::snapshot::EncodedSnapshot;
    use image::{Rgb, RgbImage};
    use std::sync::atomic::AtomicUsize;

    struct StillSource;

    #[async_trait]
    impl FrameSource for StillSource {
        async fn capture(&self) -> Result<VideoFrame, CaptureError> {
            Ok(VideoFrame::new(RgbImage::from_pixel(16, 16, Rgb([200, 100, 50]))))
        }
    }

    struct DeadSource;

    #[async_trait]
    impl FrameSource for DeadSource {
        async fn capture(&self) -> Result<VideoFrame, CaptureError> {
            Err(CaptureError::NoFrame("no active track".into()))
        }
    }

    /// Counts submissions and tracks how many overlap.
    #[derive(Default)]
    struct RecordingTransport {
        delay: Duration,
        fail: bool,
        calls: AtomicUsize,
        running: AtomicUsize,
        max_running: AtomicUsize,
    }

    impl RecordingTransport {
        fn slow(delay: Duration) -> Self {
            Self {
                delay,
                ..Self::default()
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn submit(&self, _snapshot: &EncodedSnapshot) -> DescriptionResult {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_running.fetch_max(running, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.running.fetch_sub(1, Ordering::SeqCst);
            if self.fail {
                DescriptionResult::Failed(FailureReason::Transport("connection refused".into()))
            } else {
                DescriptionResult::Described(format!("scene #{n}"))
            }
        }
    }

    fn cycle_with(
        source: Arc<dyn FrameSource>,
        max_kb: f64,
        transport: Arc<RecordingTransport>,
    ) -> Arc<CaptureCycle> {
        Arc::new(CaptureCycle::new(
            source,
            SnapshotEncoder::new(0.5, 0.5).unwrap(),
            SizeGuard::new(max_kb),
            transport,
        ))
    }

    #[tokio::test]
    async fn oversized_snapshot_never_reaches_transport() {
        let transport = Arc::new(RecordingTransport::default());
        // Any JPEG is larger than a 0.01 KB ceiling.
        let cycle = cycle_with(Arc::new(StillSource), 0.01, Arc::clone(&transport));

        let outcome = cycle.run().await;
        assert!(matches!(outcome, CycleOutcome::TooLarge(r) if r.max_kb == 0.01));
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn missing_frame_skips_transport() {
        let transport = Arc::new(RecordingTransport::default());
        let cycle = cycle_with(Arc::new(DeadSource), 5120.0, Arc::clone(&transport));

        assert_eq!(cycle.run().await, CycleOutcome::NoFrame);
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn successful_cycle_submits_once() {
        let transport = Arc::new(RecordingTransport::default());
        let cycle = cycle_with(Arc::new(StillSource), 5120.0, Arc::clone(&transport));

        let outcome = cycle.run().await;
        assert_eq!(
            outcome,
            CycleOutcome::Submitted(DescriptionResult::Described("scene #1".into()))
        );
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn fires_once_per_period() {
        let transport = Arc::new(RecordingTransport::default());
        let cycle = cycle_with(Arc::new(StillSource), 5120.0, Arc::clone(&transport));
        let mut scheduler = CaptureScheduler::start(Duration::from_secs(10), cycle);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(transport.calls(), 0, "first cycle waits a full period");

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(transport.calls(), 3);
        assert_eq!(scheduler.completed_cycles(), 3);

        scheduler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn overlapping_ticks_are_dropped() {
        let transport = Arc::new(RecordingTransport::slow(Duration::from_secs(25)));
        let cycle = cycle_with(Arc::new(StillSource), 5120.0, Arc::clone(&transport));
        let mut scheduler = CaptureScheduler::start(Duration::from_secs(10), cycle);

        // Cycle one runs from t=10 to t=35; ticks at 20 and 30 are dropped.
        tokio::time::sleep(Duration::from_secs(34)).await;
        assert_eq!(transport.calls(), 1);

        // The tick at t=40 finds the slot free again.
        tokio::time::sleep(Duration::from_secs(8)).await;
        assert_eq!(transport.calls(), 2);
        assert_eq!(transport.max_running.load(Ordering::SeqCst), 1);

        scheduler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stop_cancels_future_cycles() {
        let transport = Arc::new(RecordingTransport::default());
        let cycle = cycle_with(Arc::new(StillSource), 5120.0, Arc::clone(&transport));
        let mut scheduler = CaptureScheduler::start(Duration::from_secs(10), cycle);
        assert!(scheduler.is_active());

        tokio::time::sleep(Duration::from_secs(15)).await;
        assert_eq!(transport.calls(), 1);

        scheduler.stop().await;
        assert!(!scheduler.is_active());

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn publishes_latest_description() {
        let transport = Arc::new(RecordingTransport::default());
        let cycle = cycle_with(Arc::new(StillSource), 5120.0, Arc::clone(&transport));
        let mut scheduler = CaptureScheduler::start(Duration::from_secs(10), cycle);
        let mut latest = scheduler.latest_description();

        latest.changed().await.unwrap();
        assert_eq!(*latest.borrow_and_update(), "scene #1");

        scheduler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn transport_failure_shows_placeholder_and_keeps_running() {
        let transport = Arc::new(RecordingTransport {
            fail: true,
            ..RecordingTransport::default()
        });
        let cycle = cycle_with(Arc::new(StillSource), 5120.0, Arc::clone(&transport));
        let mut scheduler = CaptureScheduler::start(Duration::from_secs(10), cycle);
        let latest = scheduler.latest_description();

        tokio::time::sleep(Duration::from_secs(25)).await;
        assert_eq!(transport.calls(), 2);
        assert_eq!(*latest.borrow(), FALLBACK_DESCRIPTION);

        scheduler.stop().await;
    }
}
