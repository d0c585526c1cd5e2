//! # Signal Processing
//!
//! [`SignalProcessor`] turns the latest raw sample into display values once
//! per tick:
//!
//! 1. Missing, non-positive or stale sample → device offline, nothing else.
//! 2. Optional moving average over a time span ([`SmoothingWindow`]).
//! 3. Optional trend arrow from the least-squares slope of the last N values
//!    ([`TrendWindow`]).
//! 4. Heart icon, optionally cycling, optionally annotated when the value is
//!    outside the low/high thresholds.
//! 5. Heart rate published only when it changed.
//!
//! Settings are read from [`SharedState`] at every tick.

pub mod symbols;
pub mod window;

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::sample::RawSampleSlot;
use crate::state::{MonitorSettings, SharedState};

pub use symbols::{TrendSymbolSet, resolve_trend_symbols, to_superscript, trend_symbol_catalog};
pub use window::{SmoothingWindow, TrendWindow, least_squares_slope};

/// Result of a single tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// No usable sample; only the online flag was touched.
    Offline,
    /// A value was processed; `heart_rate` is the working value after smoothing.
    Online { heart_rate: i32 },
}

/// Stateful per-session processor.
#[derive(Debug)]
pub struct SignalProcessor {
    state: SharedState,
    slot: Arc<RawSampleSlot>,
    smoothing: SmoothingWindow,
    trend: TrendWindow,
    icon_index: usize,
}

impl SignalProcessor {
    /// Create a processor reading from `slot` and publishing into `state`.
    ///
    /// Re-resolves the selected trend symbol set against the catalog, falling
    /// back to the first entry if the stored selection no longer exists.
    pub fn new(state: SharedState, slot: Arc<RawSampleSlot>) -> Self {
        let catalog = trend_symbol_catalog();
        state.update_settings(|s| {
            s.trend_symbols = resolve_trend_symbols(&s.trend_symbols, &catalog);
        });

        Self {
            state,
            slot,
            smoothing: SmoothingWindow::new(),
            trend: TrendWindow::new(),
            icon_index: 0,
        }
    }

    /// Current tick interval from settings.
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.state.settings().scan_interval_ms)
    }

    /// Run one processing step at `now`.
    pub fn tick(&mut self, now: Instant) -> TickOutcome {
        let settings = self.state.settings();

        let sample = self
            .slot
            .latest(now)
            .filter(|s| s.heart_rate > 0)
            .filter(|s| {
                settings.stale_after_secs == 0
                    || s.age(now) <= Duration::from_secs(settings.stale_after_secs)
            });

        let Some(sample) = sample else {
            self.state.update_outputs(|o| o.device_online = false);
            return TickOutcome::Offline;
        };

        let mut heart_rate = sample.heart_rate;

        if settings.smoothing_enabled {
            let span = Duration::from_secs(settings.smoothing_span_secs);
            heart_rate = truncate(self.smoothing.record(now, heart_rate, span));
        }

        let trend_indicator = self.trend_indicator(&settings, heart_rate);
        let heart_icon = self.heart_icon(&settings, heart_rate);

        self.state.update_outputs(|o| {
            o.device_online = true;
            o.last_update = Some(sample.received_at);
            if let Some(indicator) = trend_indicator {
                o.trend_indicator = indicator;
            }
            o.heart_icon = heart_icon;
            if o.heart_rate != heart_rate {
                o.heart_rate = heart_rate;
            }
        });

        tracing::trace!(
            raw = sample.heart_rate,
            heart_rate,
            "Processed heart-rate sample"
        );

        TickOutcome::Online { heart_rate }
    }

    /// `None` leaves the published indicator untouched (fewer than two
    /// values so far).
    fn trend_indicator(
        &mut self,
        settings: &MonitorSettings,
        heart_rate: i32,
    ) -> Option<String> {
        if !settings.trend_enabled {
            self.trend.clear();
            return Some(String::new());
        }

        self.trend.push(heart_rate, settings.trend_sample_rate);
        let slope = self.trend.slope()?;
        let sensitivity = settings.trend_sensitivity;

        let symbols = &settings.trend_symbols;
        Some(if slope > sensitivity {
            symbols.upward.clone()
        } else if slope < -sensitivity {
            symbols.downward.clone()
        } else {
            String::new()
        })
    }

    fn heart_icon(&mut self, settings: &MonitorSettings, heart_rate: i32) -> String {
        let icons = &settings.heart_icons;
        let mut icon = if icons.is_empty() {
            String::new()
        } else {
            icons[self.icon_index % icons.len()].clone()
        };

        if settings.cycle_icons && !icons.is_empty() {
            self.icon_index = (self.icon_index + 1) % icons.len();
        }

        if settings.threshold_text_enabled {
            if heart_rate < settings.low_threshold {
                icon.push_str(&to_superscript(&settings.low_text));
            } else if heart_rate >= settings.high_threshold {
                icon.push_str(&to_superscript(&settings.high_text));
            }
        }

        icon
    }
}

#[allow(clippy::cast_possible_truncation)]
fn truncate(value: f64) -> i32 {
    value as i32
}
