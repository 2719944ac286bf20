//! Built-in remedies, one per recoverable error kind, each with an
//! independent post-recovery check.

use std::time::Duration;

use tracing::{debug, warn};

use super::ErrorContext;
use crate::config::RecoveryConfig;
use crate::desktop::{Desktop, InputAction};

/// A remedial action attempted after a classified failure.
pub trait RecoveryStrategy: Send + Sync {
    /// Returns `true` when the remedy was applied.
    fn recover(&self, ctx: &ErrorContext) -> bool;
}

/// Confirms, after a successful recovery, that the condition is gone.
pub trait RecoveryValidator: Send + Sync {
    fn validate(&self, ctx: &ErrorContext) -> bool;
}

impl<F> RecoveryStrategy for F
where
    F: Fn(&ErrorContext) -> bool + Send + Sync,
{
    fn recover(&self, ctx: &ErrorContext) -> bool {
        self(ctx)
    }
}

impl<F> RecoveryValidator for F
where
    F: Fn(&ErrorContext) -> bool + Send + Sync,
{
    fn validate(&self, ctx: &ErrorContext) -> bool {
        self(ctx)
    }
}

/// `base * (retry_count + 1)`
fn linear_backoff(base: Duration, retry_count: u32) -> Duration {
    base.saturating_mul(retry_count.saturating_add(1))
}

/// `base * 2^retry_count`, capped at `ceiling`.
pub fn exponential_backoff(base: Duration, retry_count: u32, ceiling: Duration) -> Duration {
    let factor = 2u32.checked_pow(retry_count).unwrap_or(u32::MAX);
    base.saturating_mul(factor).min(ceiling)
}

/// TEMPLATE_MATCHING: back off, then take a fresh frame so the next lookup
/// sees the current screen.
pub struct TemplateRecapture {
    desktop: Desktop,
    backoff: Duration,
}

impl TemplateRecapture {
    pub fn new(desktop: Desktop, config: &RecoveryConfig) -> Self {
        Self {
            desktop,
            backoff: Duration::from_millis(config.template_backoff_ms),
        }
    }
}

impl RecoveryStrategy for TemplateRecapture {
    fn recover(&self, ctx: &ErrorContext) -> bool {
        let wait = linear_backoff(self.backoff, ctx.retry_count);
        debug!(wait_ms = wait.as_millis() as u64, "template recovery: waiting before recapture");
        self.desktop.clock.sleep(wait);
        match self.desktop.screen.capture(None) {
            Ok(_) => true,
            Err(e) => {
                warn!(error = %e, "template recovery: recapture failed");
                false
            }
        }
    }
}

impl RecoveryValidator for TemplateRecapture {
    fn validate(&self, _ctx: &ErrorContext) -> bool {
        self.desktop
            .screen
            .capture(None)
            .map(|frame| !frame.is_empty())
            .unwrap_or(false)
    }
}

/// WINDOW_CONNECTION: reactivate the target window, waiting once if it is
/// not there yet.
pub struct WindowReconnect {
    desktop: Desktop,
    title: String,
    retry_wait: Duration,
}

impl WindowReconnect {
    pub fn new(desktop: Desktop, title: impl Into<String>, config: &RecoveryConfig) -> Self {
        Self {
            desktop,
            title: title.into(),
            retry_wait: Duration::from_millis(config.window_retry_wait_ms),
        }
    }

    fn try_activate(&self) -> bool {
        match self.desktop.windows.activate(&self.title) {
            Ok(found) => found,
            Err(e) => {
                warn!(window = %self.title, error = %e, "window recovery: activation failed");
                false
            }
        }
    }
}

impl RecoveryStrategy for WindowReconnect {
    fn recover(&self, _ctx: &ErrorContext) -> bool {
        if self.try_activate() {
            return true;
        }
        debug!(window = %self.title, "window recovery: not found, waiting");
        self.desktop.clock.sleep(self.retry_wait);
        self.try_activate()
    }
}

impl RecoveryValidator for WindowReconnect {
    fn validate(&self, _ctx: &ErrorContext) -> bool {
        self.desktop
            .windows
            .is_foreground(&self.title)
            .unwrap_or(false)
    }
}

/// SAP_NAVIGATION: escape out of whatever dialog is open, then wait longer
/// on each attempt.
pub struct NavigationReset {
    desktop: Desktop,
    backoff: Duration,
}

impl NavigationReset {
    pub fn new(desktop: Desktop, config: &RecoveryConfig) -> Self {
        Self {
            desktop,
            backoff: Duration::from_millis(config.navigation_backoff_ms),
        }
    }
}

impl RecoveryStrategy for NavigationReset {
    fn recover(&self, ctx: &ErrorContext) -> bool {
        if let Err(e) = self.desktop.input.perform(&InputAction::press("esc")) {
            warn!(error = %e, "navigation recovery: escape failed");
            return false;
        }
        self.desktop
            .clock
            .sleep(linear_backoff(self.backoff, ctx.retry_count));
        true
    }
}

/// DATA_PROCESSING: clear the focused field so the value can be typed again.
pub struct FieldClear {
    desktop: Desktop,
    settle: Duration,
}

impl FieldClear {
    pub fn new(desktop: Desktop, config: &RecoveryConfig) -> Self {
        Self {
            desktop,
            settle: Duration::from_millis(config.data_settle_ms),
        }
    }
}

impl RecoveryStrategy for FieldClear {
    fn recover(&self, _ctx: &ErrorContext) -> bool {
        let cleared = self.desktop.perform_all(&[
            InputAction::hotkey(&["ctrl", "a"]),
            InputAction::press("delete"),
        ]);
        if let Err(e) = cleared {
            warn!(error = %e, "data recovery: could not clear field");
            return false;
        }
        self.desktop.clock.sleep(self.settle);
        true
    }
}

/// TIMEOUT_ERROR: exponential wait, then check the screen responds quickly.
pub struct TimeoutBackoff {
    desktop: Desktop,
    base: Duration,
    ceiling: Duration,
    latency_threshold: Duration,
}

impl TimeoutBackoff {
    pub fn new(desktop: Desktop, config: &RecoveryConfig) -> Self {
        Self {
            desktop,
            base: Duration::from_millis(config.timeout_base_ms),
            ceiling: Duration::from_millis(config.timeout_ceiling_ms),
            latency_threshold: Duration::from_millis(config.latency_threshold_ms),
        }
    }
}

impl RecoveryStrategy for TimeoutBackoff {
    fn recover(&self, ctx: &ErrorContext) -> bool {
        let wait = exponential_backoff(self.base, ctx.retry_count, self.ceiling);
        debug!(wait_ms = wait.as_millis() as u64, "timeout recovery: backing off");
        self.desktop.clock.sleep(wait);
        true
    }
}

impl RecoveryValidator for TimeoutBackoff {
    fn validate(&self, _ctx: &ErrorContext) -> bool {
        let started = self.desktop.clock.now();
        if self.desktop.screen.capture(None).is_err() {
            return false;
        }
        let latency = self.desktop.clock.now().duration_since(started);
        if latency >= self.latency_threshold {
            warn!(
                latency_ms = latency.as_millis() as u64,
                threshold_ms = self.latency_threshold.as_millis() as u64,
                "timeout recovery: screen still slow"
            );
            return false;
        }
        true
    }
}
