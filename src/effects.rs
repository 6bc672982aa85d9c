//! Effect runner for realtime check-in sessions
//!
//! The engine applies most effects inline. The ones that need the async
//! runtime land here: stage deadlines and the microphone capture pump.
//! Completion is reported back through the engine's input queue.

use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::time::{interval, sleep, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::audio::{resample, LevelMeter, MicrophoneSource, REALTIME_SAMPLE_RATE};
use crate::engine::Input;
use crate::state_machine::Effect;
use crate::streaming::StageTimeouts;

/// Default capture and metering period
pub const DEFAULT_CAPTURE_INTERVAL: Duration = Duration::from_millis(100);

/// Trait for running effects asynchronously.
/// Completion events are sent back via the provided channel.
pub trait EffectRunner: Send + Sync + 'static {
    fn spawn(&self, effect: Effect, tx: mpsc::UnboundedSender<Input>);
}

type SharedMicrophone = Arc<Mutex<Box<dyn MicrophoneSource>>>;

/// Runs timers and microphone capture on the tokio runtime.
pub struct TokioEffectRunner {
    timeouts: StageTimeouts,
    microphone: Option<SharedMicrophone>,
    /// Cancels the running capture pump, if any
    capture: StdMutex<Option<CancellationToken>>,
    capture_interval: Duration,
}

impl TokioEffectRunner {
    pub fn new(timeouts: StageTimeouts) -> Self {
        Self {
            timeouts,
            microphone: None,
            capture: StdMutex::new(None),
            capture_interval: DEFAULT_CAPTURE_INTERVAL,
        }
    }

    pub fn with_microphone(mut self, microphone: Box<dyn MicrophoneSource>) -> Self {
        self.microphone = Some(Arc::new(Mutex::new(microphone)));
        self
    }

    pub fn with_capture_interval(mut self, capture_interval: Duration) -> Self {
        self.capture_interval = capture_interval;
        self
    }

    /// Swap in a new capture token, cancelling the previous pump
    fn replace_capture(&self, token: Option<CancellationToken>) {
        let mut guard = self.capture.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = guard.take() {
            previous.cancel();
        }
        *guard = token;
    }
}

impl EffectRunner for TokioEffectRunner {
    fn spawn(&self, effect: Effect, tx: mpsc::UnboundedSender<Input>) {
        match effect {
            Effect::ArmTimeout { attempt, stage } => {
                let Some(deadline) = self.timeouts.for_stage(stage) else {
                    return;
                };
                tokio::spawn(async move {
                    sleep(deadline).await;
                    log::debug!("Deadline elapsed for {} (attempt {})", stage, attempt);
                    // Engine drops it if the stage has moved on
                    let _ = tx.send(Input::Timeout { attempt, stage });
                });
            }

            Effect::StartCapture { attempt } => {
                let Some(microphone) = self.microphone.clone() else {
                    log::info!("No microphone source configured, capture skipped");
                    return;
                };
                let token = CancellationToken::new();
                self.replace_capture(Some(token.clone()));
                tokio::spawn(run_capture(
                    attempt,
                    microphone,
                    tx,
                    token,
                    self.capture_interval,
                ));
            }

            Effect::StopCapture => {
                self.replace_capture(None);
            }

            other => {
                log::warn!("Effect {:?} is applied by the engine, not the runner", other);
            }
        }
    }
}

/// Periodic capture + metering task
///
/// Every tick reads one interval's worth of samples, meters it, resamples to
/// 24kHz and hands both to the engine. Ends on cancellation, when the source
/// is exhausted, or when the engine is gone.
async fn run_capture(
    attempt: Uuid,
    microphone: SharedMicrophone,
    tx: mpsc::UnboundedSender<Input>,
    cancel: CancellationToken,
    period: Duration,
) {
    let mut tick = interval(period);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut meter = LevelMeter::new();
    let mut frames: u64 = 0;

    log::info!("Capture started (attempt {})", attempt);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                log::debug!("Capture cancelled");
                break;
            }
            _ = tick.tick() => {
                let (frame, rate) = {
                    let mut mic = microphone.lock().await;
                    let rate = mic.sample_rate();
                    let wanted = (rate as u128 * period.as_millis() / 1000) as usize;
                    (mic.read_frame(wanted.max(1)), rate)
                };

                let Some(samples) = frame else {
                    log::info!("Microphone source exhausted after {} frames", frames);
                    let _ = tx.send(Input::AudioLevel(0.0));
                    break;
                };

                let level = meter.push(&samples);
                let samples = resample(&samples, rate, REALTIME_SAMPLE_RATE);
                frames += 1;

                if tx.send(Input::MicFrame { attempt, samples }).is_err()
                    || tx.send(Input::AudioLevel(level)).is_err()
                {
                    log::debug!("Engine gone, stopping capture");
                    break;
                }
            }
        }
    }

    log::info!("Capture stopped");
}
