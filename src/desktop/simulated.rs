use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tracing::debug;

use super::{
    Clock, Desktop, Frame, InputAction, InputDriver, Point, Region, ScreenLocator, TemplateId,
    WindowManager,
};
use crate::error::{Result, RpaError};

const SCREEN_WIDTH: u32 = 64;
const SCREEN_HEIGHT: u32 = 48;

/// In-process stand-in for a real screen, keyboard and window system.
///
/// Every template is visible at a fixed point and every window exists unless
/// a fault has been injected. Actions are recorded for assertions and logged
/// at DEBUG so a dry run shows what would have been typed.
#[derive(Clone, Default)]
pub struct SimulatedDesktop {
    inner: Arc<Mutex<SimState>>,
}

#[derive(Default)]
struct SimState {
    clock: Option<Arc<dyn Clock>>,
    template_misses: HashMap<String, u32>,
    hidden_templates: HashSet<String>,
    locate_calls: HashMap<String, u32>,
    capture_failures: u32,
    capture_latency: Duration,
    captures: u32,
    window_misses: HashMap<String, u32>,
    missing_windows: HashSet<String>,
    foreground: Option<String>,
    input_failures: u32,
    actions: Vec<InputAction>,
}

impl SimulatedDesktop {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Build a [`Desktop`] backed by this simulation.
    pub fn desktop(&self, clock: Arc<dyn Clock>) -> Desktop {
        self.state().clock = Some(clock.clone());
        Desktop {
            screen: Arc::new(self.clone()),
            input: Arc::new(self.clone()),
            windows: Arc::new(self.clone()),
            clock,
        }
    }

    /// Where every visible template is reported.
    pub fn template_position(&self) -> Point {
        Point::new(640, 360)
    }

    /// The next `times` lookups of `template` find nothing.
    pub fn fail_template(&self, template: &str, times: u32) {
        *self
            .state()
            .template_misses
            .entry(template.to_string())
            .or_insert(0) += times;
    }

    /// `template` is never found.
    pub fn hide_template(&self, template: &str) {
        self.state().hidden_templates.insert(template.to_string());
    }

    /// The next `times` captures fail.
    pub fn fail_capture(&self, times: u32) {
        self.state().capture_failures += times;
    }

    /// Each capture takes this long on the attached clock.
    pub fn set_capture_latency(&self, latency: Duration) {
        self.state().capture_latency = latency;
    }

    /// The next `times` activations of `title` find no window.
    pub fn fail_window(&self, title: &str, times: u32) {
        *self
            .state()
            .window_misses
            .entry(title.to_string())
            .or_insert(0) += times;
    }

    /// No window called `title` exists.
    pub fn remove_window(&self, title: &str) {
        self.state().missing_windows.insert(title.to_string());
    }

    /// The next `times` input actions fail.
    pub fn fail_input(&self, times: u32) {
        self.state().input_failures += times;
    }

    pub fn actions(&self) -> Vec<InputAction> {
        self.state().actions.clone()
    }

    /// Text typed so far, in order.
    pub fn typed_text(&self) -> Vec<String> {
        self.state()
            .actions
            .iter()
            .filter_map(|a| match a {
                InputAction::TypeText(text) => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn locate_calls(&self, template: &str) -> u32 {
        self.state()
            .locate_calls
            .get(template)
            .copied()
            .unwrap_or(0)
    }

    pub fn captures(&self) -> u32 {
        self.state().captures
    }
}

impl ScreenLocator for SimulatedDesktop {
    fn locate(
        &self,
        template: &TemplateId,
        confidence: f32,
        _region: Option<Region>,
    ) -> Result<Option<Point>> {
        let mut state = self.state();
        *state
            .locate_calls
            .entry(template.as_str().to_string())
            .or_insert(0) += 1;

        if state.hidden_templates.contains(template.as_str()) {
            debug!(template = %template, confidence, "simulated locate: hidden");
            return Ok(None);
        }
        if let Some(misses) = state.template_misses.get_mut(template.as_str())
            && *misses > 0
        {
            *misses -= 1;
            debug!(template = %template, confidence, "simulated locate: miss");
            return Ok(None);
        }
        debug!(template = %template, confidence, "simulated locate: found");
        Ok(Some(self.template_position()))
    }

    fn capture(&self, region: Option<Region>) -> Result<Frame> {
        let (clock, latency) = {
            let mut state = self.state();
            state.captures += 1;
            if state.capture_failures > 0 {
                state.capture_failures -= 1;
                return Err(RpaError::Desktop("screen capture unavailable".into()));
            }
            (state.clock.clone(), state.capture_latency)
        };
        if let Some(clock) = clock
            && !latency.is_zero()
        {
            clock.sleep(latency);
        }

        let (width, height) = region
            .map(|r| (r.width, r.height))
            .unwrap_or((SCREEN_WIDTH, SCREEN_HEIGHT));
        Ok(Frame {
            width,
            height,
            data: vec![0xC0; (width * height * 4) as usize],
        })
    }
}

impl InputDriver for SimulatedDesktop {
    fn perform(&self, action: &InputAction) -> Result<()> {
        let mut state = self.state();
        if state.input_failures > 0 {
            state.input_failures -= 1;
            return Err(RpaError::Desktop(format!("input rejected: {action:?}")));
        }
        debug!(?action, "simulated input");
        state.actions.push(action.clone());
        Ok(())
    }
}

impl WindowManager for SimulatedDesktop {
    fn activate(&self, title: &str) -> Result<bool> {
        let mut state = self.state();
        if state.missing_windows.contains(title) {
            return Ok(false);
        }
        if let Some(misses) = state.window_misses.get_mut(title)
            && *misses > 0
        {
            *misses -= 1;
            return Ok(false);
        }
        state.foreground = Some(title.to_string());
        Ok(true)
    }

    fn is_foreground(&self, title: &str) -> Result<bool> {
        Ok(self.state().foreground.as_deref() == Some(title))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::desktop::ManualClock;

    #[test]
    fn injected_template_misses_are_consumed() {
        let sim = SimulatedDesktop::new();
        sim.fail_template("grid", 1);
        let id = TemplateId::new("grid");

        assert_eq!(sim.locate(&id, 0.9, None).unwrap(), None);
        assert!(sim.locate(&id, 0.9, None).unwrap().is_some());
        assert_eq!(sim.locate_calls("grid"), 2);
    }

    #[test]
    fn capture_latency_advances_attached_clock() {
        let sim = SimulatedDesktop::new();
        let clock = Arc::new(ManualClock::new());
        let _desktop = sim.desktop(clock.clone());
        sim.set_capture_latency(Duration::from_millis(300));

        let frame = sim.capture(None).unwrap();
        assert!(!frame.is_empty());
        assert_eq!(clock.elapsed(), Duration::from_millis(300));
    }

    #[test]
    fn activation_sets_foreground() {
        let sim = SimulatedDesktop::new();
        sim.fail_window("RDP", 1);

        assert!(!sim.activate("RDP").unwrap());
        assert!(!sim.is_foreground("RDP").unwrap());
        assert!(sim.activate("RDP").unwrap());
        assert!(sim.is_foreground("RDP").unwrap());
    }

    #[test]
    fn failed_input_is_not_recorded() {
        let sim = SimulatedDesktop::new();
        sim.fail_input(1);

        assert!(sim.perform(&InputAction::TypeText("a".into())).is_err());
        sim.perform(&InputAction::TypeText("b".into())).unwrap();
        assert_eq!(sim.typed_text(), vec!["b".to_string()]);
    }
}
