//! # Shared Observable State
//!
//! [`SharedState`] is the handle through which the surrounding application
//! feeds configuration in ([`MonitorSettings`]) and reads computed values out
//! ([`DisplayOutputs`]). It is passed explicitly to every component.
//!
//! All fields live behind one mutex, so a processor tick or a settings edit
//! is applied as a unit. Every mutation diffs the old and new values and
//! broadcasts one [`StateField`] per changed field; the session controller
//! drives start/stop decisions from these notifications.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::processing::symbols::{TrendSymbolSet, default_heart_icons};

/// Capacity of the change-notification channel.
const CHANGE_CHANNEL_CAPACITY: usize = 256;

/// Inputs owned by the surrounding application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorSettings {
    /// Master switch for the heart-rate integration.
    pub enabled: bool,
    /// Foreground context: `true` while a VR runtime is active.
    pub in_vr: bool,
    /// Run while in VR.
    pub enabled_in_vr: bool,
    /// Run while on the desktop.
    pub enabled_on_desktop: bool,
    /// Stored OAuth bearer token.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,

    pub smoothing_enabled: bool,
    /// Moving-average span in seconds.
    pub smoothing_span_secs: u64,

    pub trend_enabled: bool,
    /// Number of values used for the slope.
    pub trend_sample_rate: usize,
    /// Minimum absolute slope that counts as a trend.
    pub trend_sensitivity: f64,
    pub trend_symbols: TrendSymbolSet,

    /// Advance through `heart_icons` on every tick.
    pub cycle_icons: bool,
    pub heart_icons: Vec<String>,

    /// Append a superscript annotation outside the low/high thresholds.
    pub threshold_text_enabled: bool,
    pub low_threshold: i32,
    pub high_threshold: i32,
    pub low_text: String,
    pub high_text: String,

    /// Add `adjustment` to every received value.
    pub adjustment_enabled: bool,
    pub adjustment: i32,

    /// Processor tick interval in milliseconds.
    pub scan_interval_ms: u64,
    /// A sample older than this is treated as missing.
    pub stale_after_secs: u64,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            in_vr: false,
            enabled_in_vr: true,
            enabled_on_desktop: true,
            access_token: None,
            smoothing_enabled: false,
            smoothing_span_secs: 5,
            trend_enabled: false,
            trend_sample_rate: 4,
            trend_sensitivity: 0.5,
            trend_symbols: TrendSymbolSet::default(),
            cycle_icons: false,
            heart_icons: default_heart_icons(),
            threshold_text_enabled: false,
            low_threshold: 60,
            high_threshold: 100,
            low_text: "sleepy".into(),
            high_text: "hot".into(),
            adjustment_enabled: false,
            adjustment: 0,
            scan_interval_ms: 1000,
            stale_after_secs: 5,
        }
    }
}

impl MonitorSettings {
    /// Whether monitoring should be running for the current context.
    pub fn should_run(&self) -> bool {
        self.enabled
            && if self.in_vr {
                self.enabled_in_vr
            } else {
                self.enabled_on_desktop
            }
    }

    /// The stored token, if present and non-blank.
    pub fn token(&self) -> Option<&str> {
        self.access_token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }
}

/// Values computed by this crate for display.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DisplayOutputs {
    pub device_online: bool,
    /// Last published heart rate (beats per minute).
    pub heart_rate: i32,
    /// Wall-clock arrival time of the sample behind `heart_rate`.
    pub last_update: Option<SystemTime>,
    pub trend_indicator: String,
    /// Icon plus optional threshold annotation.
    pub heart_icon: String,
    pub access_error: bool,
    pub access_error_text: String,
}

/// Identifies a field that changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateField {
    Enabled,
    InVr,
    EnabledInVr,
    EnabledOnDesktop,
    AccessToken,
    ScanInterval,
    /// Any other processing setting (smoothing, trend, icons, thresholds).
    ProcessingSettings,
    DeviceOnline,
    HeartRate,
    LastUpdate,
    TrendIndicator,
    HeartIcon,
    AccessError,
}

impl StateField {
    /// Fields whose change may start or stop a session.
    pub fn affects_session(self) -> bool {
        matches!(
            self,
            StateField::Enabled
                | StateField::InVr
                | StateField::EnabledInVr
                | StateField::EnabledOnDesktop
                | StateField::AccessToken
        )
    }
}

#[derive(Debug, Default)]
struct StateInner {
    settings: MonitorSettings,
    outputs: DisplayOutputs,
}

/// Cloneable handle to the shared state.
#[derive(Debug, Clone)]
pub struct SharedState {
    inner: Arc<Mutex<StateInner>>,
    changes: broadcast::Sender<StateField>,
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new(MonitorSettings::default())
    }
}

impl SharedState {
    pub fn new(settings: MonitorSettings) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Mutex::new(StateInner {
                settings,
                outputs: DisplayOutputs::default(),
            })),
            changes,
        }
    }

    /// Receive change notifications from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<StateField> {
        self.changes.subscribe()
    }

    /// Snapshot of the current settings.
    pub fn settings(&self) -> MonitorSettings {
        self.lock().settings.clone()
    }

    /// Snapshot of the current outputs.
    pub fn outputs(&self) -> DisplayOutputs {
        self.lock().outputs.clone()
    }

    /// Edit settings and notify about every field that changed.
    pub fn update_settings<F>(&self, edit: F)
    where
        F: FnOnce(&mut MonitorSettings),
    {
        let changed = {
            let mut inner = self.lock();
            let before = inner.settings.clone();
            edit(&mut inner.settings);
            diff_settings(&before, &inner.settings)
        };
        self.notify(&changed);
    }

    /// Edit outputs and notify about every field that changed.
    pub fn update_outputs<F>(&self, edit: F)
    where
        F: FnOnce(&mut DisplayOutputs),
    {
        let changed = {
            let mut inner = self.lock();
            let before = inner.outputs.clone();
            edit(&mut inner.outputs);
            diff_outputs(&before, &inner.outputs)
        };
        self.notify(&changed);
    }

    /// Raise the user-visible access error.
    pub fn set_access_error(&self, message: impl Into<String>) {
        let message = message.into();
        self.update_outputs(|o| {
            o.access_error = true;
            o.access_error_text = message;
        });
    }

    /// Clear the user-visible access error.
    pub fn clear_access_error(&self) {
        self.update_outputs(|o| {
            o.access_error = false;
            o.access_error_text.clear();
        });
    }

    fn notify(&self, changed: &[StateField]) {
        for field in changed {
            // No receivers is fine.
            let _ = self.changes.send(*field);
        }
    }

    fn lock(&self) -> MutexGuard<'_, StateInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn diff_settings(a: &MonitorSettings, b: &MonitorSettings) -> Vec<StateField> {
    let mut changed = Vec::new();
    if a.enabled != b.enabled {
        changed.push(StateField::Enabled);
    }
    if a.in_vr != b.in_vr {
        changed.push(StateField::InVr);
    }
    if a.enabled_in_vr != b.enabled_in_vr {
        changed.push(StateField::EnabledInVr);
    }
    if a.enabled_on_desktop != b.enabled_on_desktop {
        changed.push(StateField::EnabledOnDesktop);
    }
    if a.access_token != b.access_token {
        changed.push(StateField::AccessToken);
    }
    if a.scan_interval_ms != b.scan_interval_ms {
        changed.push(StateField::ScanInterval);
    }

    let mut a_rest = a.clone();
    let mut b_rest = b.clone();
    for s in [&mut a_rest, &mut b_rest] {
        s.enabled = false;
        s.in_vr = false;
        s.enabled_in_vr = false;
        s.enabled_on_desktop = false;
        s.access_token = None;
        s.scan_interval_ms = 0;
    }
    if a_rest != b_rest {
        changed.push(StateField::ProcessingSettings);
    }
    changed
}

fn diff_outputs(a: &DisplayOutputs, b: &DisplayOutputs) -> Vec<StateField> {
    let mut changed = Vec::new();
    if a.device_online != b.device_online {
        changed.push(StateField::DeviceOnline);
    }
    if a.heart_rate != b.heart_rate {
        changed.push(StateField::HeartRate);
    }
    if a.last_update != b.last_update {
        changed.push(StateField::LastUpdate);
    }
    if a.trend_indicator != b.trend_indicator {
        changed.push(StateField::TrendIndicator);
    }
    if a.heart_icon != b.heart_icon {
        changed.push(StateField::HeartIcon);
    }
    if a.access_error != b.access_error || a.access_error_text != b.access_error_text {
        changed.push(StateField::AccessError);
    }
    changed
}
