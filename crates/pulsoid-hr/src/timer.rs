//! # Processor Timer
//!
//! Background task that runs [`SignalProcessor::tick`] on a fixed cadence.
//!
//! The interval is re-read from settings before every wait, and a change to
//! `scan_interval_ms` restarts the current wait immediately. Stopping is
//! cooperative: [`ProcessorTimer::stop`] cancels and then awaits the loop, so
//! once it returns no further tick can run.

use std::time::{Duration, Instant};

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::processing::SignalProcessor;
use crate::state::{SharedState, StateField};

/// Lower bound on the tick interval, so a zero setting cannot spin.
const MIN_INTERVAL: Duration = Duration::from_millis(10);

/// How long [`ProcessorTimer::stop`] waits for the loop to exit.
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Handle to the running tick loop.
pub struct ProcessorTimer {
    handle: Option<JoinHandle<()>>,
    cancel: CancellationToken,
}

impl ProcessorTimer {
    /// Spawn the tick loop for `processor`.
    pub fn start(mut processor: SignalProcessor, state: &SharedState) -> Self {
        let cancel = CancellationToken::new();
        let mut changes = state.subscribe();

        let handle = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tracing::debug!("Processor timer started");

                'ticks: loop {
                    let interval = processor.interval().max(MIN_INTERVAL);
                    let sleep = tokio::time::sleep(interval);
                    tokio::pin!(sleep);

                    loop {
                        tokio::select! {
                            () = cancel.cancelled() => break 'ticks,
                            () = &mut sleep => break,
                            change = changes.recv() => match change {
                                Ok(StateField::ScanInterval) => {
                                    tracing::debug!("Tick interval changed, restarting wait");
                                    continue 'ticks;
                                }
                                Ok(_) | Err(RecvError::Lagged(_)) => {}
                                Err(RecvError::Closed) => {
                                    // Sleep out the remaining interval.
                                    (&mut sleep).await;
                                    break;
                                }
                            },
                        }
                    }

                    if cancel.is_cancelled() {
                        break;
                    }
                    processor.tick(Instant::now());
                }

                tracing::debug!("Processor timer stopped");
            })
        };

        Self {
            handle: Some(handle),
            cancel,
        }
    }

    /// Stop the loop and wait for it to exit.
    pub async fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            if tokio::time::timeout(STOP_TIMEOUT, handle).await.is_err() {
                tracing::warn!("Processor timer did not stop in time");
            }
        }
    }

    /// Returns whether the loop has not been asked to stop.
    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled() && self.handle.is_some()
    }
}

impl Drop for ProcessorTimer {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::sample::RawSampleSlot;
    use crate::state::MonitorSettings;

    fn fast_state() -> SharedState {
        SharedState::new(MonitorSettings {
            scan_interval_ms: 20,
            ..MonitorSettings::default()
        })
    }

    #[tokio::test]
    async fn test_timer_ticks_and_publishes() {
        let state = fast_state();
        let slot = Arc::new(RawSampleSlot::new());
        let processor = SignalProcessor::new(state.clone(), Arc::clone(&slot));

        slot.publish(77, Instant::now());
        let mut timer = ProcessorTimer::start(processor, &state);
        tokio::time::sleep(Duration::from_millis(150)).await;
        timer.stop().await;

        let out = state.outputs();
        assert!(out.device_online);
        assert_eq!(out.heart_rate, 77);
        assert!(!timer.is_running());
    }

    #[tokio::test]
    async fn test_no_tick_after_stop() {
        let state = fast_state();
        let slot = Arc::new(RawSampleSlot::new());
        let processor = SignalProcessor::new(state.clone(), Arc::clone(&slot));

        let mut timer = ProcessorTimer::start(processor, &state);
        timer.stop().await;

        slot.publish(90, Instant::now());
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(state.outputs().heart_rate, 0);
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let state = fast_state();
        let processor = SignalProcessor::new(state.clone(), Arc::new(RawSampleSlot::new()));
        let mut timer = ProcessorTimer::start(processor, &state);
        assert!(timer.is_running());
        timer.stop().await;
        timer.stop().await;
        assert!(!timer.is_running());
    }

    #[tokio::test]
    async fn test_interval_change_applies_to_running_timer() {
        let state = SharedState::new(MonitorSettings {
            scan_interval_ms: 60_000,
            ..MonitorSettings::default()
        });
        let slot = Arc::new(RawSampleSlot::new());
        let processor = SignalProcessor::new(state.clone(), Arc::clone(&slot));
        slot.publish(64, Instant::now());

        let mut timer = ProcessorTimer::start(processor, &state);
        tokio::time::sleep(Duration::from_millis(20)).await;
        state.update_settings(|s| s.scan_interval_ms = 20);
        tokio::time::sleep(Duration::from_millis(150)).await;
        timer.stop().await;

        assert_eq!(state.outputs().heart_rate, 64);
    }
}
