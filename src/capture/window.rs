use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{info, warn};

use super::classifier::EmotionClassifier;
use crate::error::CaptureError;
use crate::media::{MediaConstraints, MediaDevices, MediaLease};
use crate::session::{CapturePhase, CaptureSample};

/// Output of a capture window
#[derive(Debug)]
pub enum CaptureEvent {
    /// Real-time sample for live display
    Sample(CaptureSample),
    /// The window closed; media is already released
    Finished(CaptureOutcome),
}

/// Samples accumulated over one window
#[derive(Debug, Clone, Default)]
pub struct CaptureOutcome {
    pub samples: Vec<CaptureSample>,
    pub duration_secs: u32,
    /// Cadence ticks elapsed, including frames that failed to classify
    pub ticks: u32,
    pub stopped_early: bool,
}

struct ActiveWindow {
    stop: Option<oneshot::Sender<()>>,
    events: mpsc::UnboundedReceiver<CaptureEvent>,
    progress: watch::Receiver<f32>,
    duration_secs: u32,
    task: JoinHandle<()>,
}

/// Time-boxed sampling of the local camera.
///
/// `idle -> capturing -> completed -> idle`; the last step happens through
/// [`CaptureWindow::rearm`] when a new prompt becomes current.
pub struct CaptureWindow {
    media: Arc<dyn MediaDevices>,
    classifier: Arc<dyn EmotionClassifier>,
    interval: Duration,
    phase: CapturePhase,
    active: Option<ActiveWindow>,
}

impl CaptureWindow {
    pub fn new(media: Arc<dyn MediaDevices>, classifier: Arc<dyn EmotionClassifier>, interval: Duration) -> Self {
        Self {
            media,
            classifier,
            interval,
            phase: CapturePhase::Idle,
            active: None,
        }
    }

    pub fn phase(&self) -> CapturePhase {
        self.phase
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Fraction of the window elapsed, for display only
    pub fn progress(&self) -> f32 {
        match (&self.active, self.phase) {
            (Some(active), _) => *active.progress.borrow(),
            (None, CapturePhase::Completed) => 1.0,
            (None, _) => 0.0,
        }
    }

    /// Open the camera and start sampling
    pub async fn start(&mut self, duration_secs: u32) -> Result<(), CaptureError> {
        if self.phase != CapturePhase::Idle {
            return Err(CaptureError::NotIdle);
        }

        let stream = self.media.acquire(&MediaConstraints::camera_only()).await?;
        let lease = MediaLease::new(stream);

        let (stop_tx, stop_rx) = oneshot::channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (progress_tx, progress_rx) = watch::channel(0.0);

        let task = tokio::spawn(run_window(
            lease,
            Arc::clone(&self.classifier),
            self.interval,
            duration_secs,
            stop_rx,
            events_tx,
            progress_tx,
        ));

        info!("Capture window opened for {}s via {} media", duration_secs, self.media.name());

        self.phase = CapturePhase::Capturing;
        self.active = Some(ActiveWindow {
            stop: Some(stop_tx),
            events: events_rx,
            progress: progress_rx,
            duration_secs,
            task,
        });
        Ok(())
    }

    /// Next sample or the final outcome; `None` when no window is open
    pub async fn next_event(&mut self) -> Option<CaptureEvent> {
        let active = self.active.as_mut()?;
        match active.events.recv().await {
            Some(CaptureEvent::Finished(outcome)) => {
                self.finish();
                Some(CaptureEvent::Finished(outcome))
            }
            Some(event) => Some(event),
            None => {
                let duration_secs = active.duration_secs;
                warn!("Capture task ended without an outcome");
                self.finish();
                Some(CaptureEvent::Finished(CaptureOutcome {
                    duration_secs,
                    stopped_early: true,
                    ..CaptureOutcome::default()
                }))
            }
        }
    }

    /// Close the window early and collect what was sampled so far
    pub async fn stop(&mut self) -> Option<CaptureOutcome> {
        let mut active = self.active.take()?;
        if let Some(stop) = active.stop.take() {
            let _ = stop.send(());
        }

        let mut outcome = None;
        while let Some(event) = active.events.recv().await {
            if let CaptureEvent::Finished(finished) = event {
                outcome = Some(finished);
                break;
            }
        }

        self.phase = CapturePhase::Completed;
        Some(outcome.unwrap_or(CaptureOutcome {
            duration_secs: active.duration_secs,
            stopped_early: true,
            ..CaptureOutcome::default()
        }))
    }

    /// Back to idle for a new prompt, abandoning any open window
    pub fn rearm(&mut self) {
        self.teardown();
        self.phase = CapturePhase::Idle;
    }

    /// Cancel timers and release the camera without producing an outcome
    pub fn teardown(&mut self) {
        if let Some(active) = self.active.take() {
            // Aborting drops the task's media lease, which releases the device
            active.task.abort();
            info!("Capture window torn down");
        }
        if self.phase == CapturePhase::Capturing {
            self.phase = CapturePhase::Idle;
        }
    }

    fn finish(&mut self) {
        self.active = None;
        self.phase = CapturePhase::Completed;
    }
}

impl Drop for CaptureWindow {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn ticks_for(duration_secs: u32, interval: Duration) -> u32 {
    let interval_ms = interval.as_millis().max(1);
    let total_ms = u128::from(duration_secs) * 1000;
    ((total_ms + interval_ms - 1) / interval_ms) as u32
}

async fn run_window(
    mut lease: MediaLease,
    classifier: Arc<dyn EmotionClassifier>,
    interval: Duration,
    duration_secs: u32,
    mut stop: oneshot::Receiver<()>,
    events: mpsc::UnboundedSender<CaptureEvent>,
    progress: watch::Sender<f32>,
) {
    let total_ticks = ticks_for(duration_secs, interval);
    let mut samples = Vec::new();
    let mut ticks = 0;
    let mut stopped_early = false;

    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    while ticks < total_ticks {
        tokio::select! {
            _ = &mut stop => {
                stopped_early = true;
                break;
            }
            _ = ticker.tick() => {}
        }
        ticks += 1;

        match lease.grab_frame().await {
            Ok(frame) => match classifier.classify(&frame).await {
                Ok(verdict) => {
                    let sample = CaptureSample::new(verdict.label, verdict.confidence);
                    samples.push(sample.clone());
                    let _ = events.send(CaptureEvent::Sample(sample));
                }
                Err(e) => warn!("Skipping frame {}: classifier failed: {}", ticks, e),
            },
            Err(e) => warn!("Skipping frame {}: {}", ticks, e),
        }

        progress.send_replace(ticks as f32 / total_ticks as f32);
    }

    lease.release();
    if total_ticks == 0 || !stopped_early {
        progress.send_replace(1.0);
    }

    info!(
        "Capture window closed: {} samples over {} ticks (stopped early: {})",
        samples.len(),
        ticks,
        stopped_early
    );

    let _ = events.send(CaptureEvent::Finished(CaptureOutcome {
        samples,
        duration_secs,
        ticks,
        stopped_early,
    }));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ticks_for_whole_seconds() {
        assert_eq!(ticks_for(10, Duration::from_secs(1)), 10);
        assert_eq!(ticks_for(0, Duration::from_secs(1)), 0);
    }

    #[test]
    fn test_ticks_for_rounds_up() {
        assert_eq!(ticks_for(3, Duration::from_millis(2000)), 2);
        assert_eq!(ticks_for(1, Duration::from_millis(300)), 4);
    }
}
