use tracing::{debug, info};

use super::{StepEnv, step_failure};
use crate::desktop::{InputAction, TemplateId, templates};
use crate::recovery::{ErrorType, Failure, Severity};
use crate::state_machine::{Event, StateContext, StateHandler};
use crate::work_item::WorkItem;

/// CONNECTING_REMOTE_DESKTOP: bring the remote session window to the front.
pub struct ConnectRemoteDesktop {
    env: StepEnv,
}

impl ConnectRemoteDesktop {
    pub fn new(env: StepEnv) -> Self {
        Self { env }
    }
}

impl StateHandler for ConnectRemoteDesktop {
    fn execute(&self, _ctx: &mut StateContext, _item: &WorkItem) -> Result<Event, Failure> {
        let title = &self.env.automation.remote_desktop_title;
        match self.env.desktop.windows.activate(title) {
            Ok(true) => {
                self.env.settle();
                info!(window = %title, "remote desktop connected");
                Ok(Event::Connected)
            }
            Ok(false) => Err(Failure::new(
                ErrorType::WindowConnection,
                Severity::High,
                format!("window '{title}' not found"),
            )),
            Err(e) => Err(step_failure(ErrorType::WindowConnection, Severity::High, &e)),
        }
    }
}

/// LAUNCHING_APPLICATION: open the ERP client unless it is already up.
pub struct LaunchApplication {
    env: StepEnv,
}

impl LaunchApplication {
    pub fn new(env: StepEnv) -> Self {
        Self { env }
    }
}

impl StateHandler for LaunchApplication {
    fn execute(&self, _ctx: &mut StateContext, _item: &WorkItem) -> Result<Event, Failure> {
        let desktop = &self.env.desktop;
        let confidence = self.env.automation.confidence;
        let main_window = TemplateId::new(templates::MAIN_WINDOW);

        let visible = desktop
            .screen
            .locate(&main_window, confidence, None)
            .map_err(|e| step_failure(ErrorType::SystemError, Severity::High, &e))?;
        if visible.is_some() {
            debug!("application already open");
            return Ok(Event::ApplicationLaunched);
        }

        let icon = desktop
            .screen
            .locate(&TemplateId::new(templates::LAUNCHER_ICON), confidence, None)
            .map_err(|e| step_failure(ErrorType::SystemError, Severity::High, &e))?
            .ok_or_else(|| {
                Failure::new(
                    ErrorType::TemplateMatching,
                    Severity::Medium,
                    "launcher icon not found",
                )
            })?;
        desktop
            .input
            .perform(&InputAction::DoubleClick(icon))
            .map_err(|e| step_failure(ErrorType::SystemError, Severity::High, &e))?;

        desktop
            .wait_for_template(
                &main_window,
                confidence,
                self.env.automation.startup_timeout(),
                self.env.automation.poll_interval(),
            )
            .map_err(|e| step_failure(ErrorType::TimeoutError, Severity::Medium, &e))?;
        info!("application launched");
        Ok(Event::ApplicationLaunched)
    }
}

/// NAVIGATING_TO_FORM: open the sales order form through its hotkey.
pub struct NavigateToForm {
    env: StepEnv,
}

impl NavigateToForm {
    pub fn new(env: StepEnv) -> Self {
        Self { env }
    }
}

impl StateHandler for NavigateToForm {
    fn execute(&self, _ctx: &mut StateContext, _item: &WorkItem) -> Result<Event, Failure> {
        let hotkey = InputAction::hotkey(&self.env.automation.form_hotkey);
        self.env
            .desktop
            .input
            .perform(&hotkey)
            .map_err(|e| step_failure(ErrorType::SapNavigation, Severity::Medium, &e))?;
        self.env
            .find(templates::SALES_ORDER_FORM)
            .map_err(|e| step_failure(ErrorType::SapNavigation, Severity::Medium, &e))?;
        Ok(Event::NavigationSuccess)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::steps::testing::rig;

    #[test]
    fn connect_activates_remote_window() {
        let rig = rig(false);
        let handler = ConnectRemoteDesktop::new(rig.env.clone());
        let item = WorkItem::sample("order1.json");

        let event = handler.execute(&mut StateContext::default(), &item).unwrap();

        assert_eq!(event, Event::Connected);
        assert!(
            rig.env
                .desktop
                .windows
                .is_foreground("Remote Desktop Connection")
                .unwrap()
        );
    }

    #[test]
    fn missing_window_is_a_connection_failure() {
        let rig = rig(false);
        rig.sim.remove_window("Remote Desktop Connection");
        let handler = ConnectRemoteDesktop::new(rig.env.clone());

        let failure = handler
            .execute(&mut StateContext::default(), &WorkItem::sample("order1.json"))
            .unwrap_err();

        assert_eq!(failure.error_type, ErrorType::WindowConnection);
        assert_eq!(failure.severity, Severity::High);
    }

    #[test]
    fn launch_skips_when_main_window_visible() {
        let rig = rig(false);
        let handler = LaunchApplication::new(rig.env.clone());

        let event = handler
            .execute(&mut StateContext::default(), &WorkItem::sample("order1.json"))
            .unwrap();

        assert_eq!(event, Event::ApplicationLaunched);
        assert!(rig.sim.actions().is_empty());
        assert_eq!(rig.sim.locate_calls(templates::LAUNCHER_ICON), 0);
    }

    #[test]
    fn launch_double_clicks_icon_and_waits() {
        let rig = rig(false);
        // first check plus two polls
        rig.sim.fail_template(templates::MAIN_WINDOW, 3);
        let handler = LaunchApplication::new(rig.env.clone());

        let event = handler
            .execute(&mut StateContext::default(), &WorkItem::sample("order1.json"))
            .unwrap();

        assert_eq!(event, Event::ApplicationLaunched);
        assert_eq!(
            rig.sim.actions(),
            vec![InputAction::DoubleClick(rig.sim.template_position())]
        );
        assert_eq!(rig.clock.elapsed(), Duration::from_millis(1000));
    }

    #[test]
    fn launch_times_out() {
        let rig = rig(false);
        rig.sim.hide_template(templates::MAIN_WINDOW);
        let handler = LaunchApplication::new(rig.env.clone());

        let failure = handler
            .execute(&mut StateContext::default(), &WorkItem::sample("order1.json"))
            .unwrap_err();

        assert_eq!(failure.error_type, ErrorType::TimeoutError);
        assert_eq!(rig.clock.elapsed(), Duration::from_secs(30));
    }

    #[test]
    fn navigation_sends_hotkey_then_waits_for_form() {
        let rig = rig(false);
        let handler = NavigateToForm::new(rig.env.clone());

        let event = handler
            .execute(&mut StateContext::default(), &WorkItem::sample("order1.json"))
            .unwrap();
        assert_eq!(event, Event::NavigationSuccess);
        assert_eq!(rig.sim.actions(), vec![InputAction::hotkey(&["alt", "m"])]);

        rig.sim.hide_template(templates::SALES_ORDER_FORM);
        let failure = handler
            .execute(&mut StateContext::default(), &WorkItem::sample("order1.json"))
            .unwrap_err();
        assert_eq!(failure.error_type, ErrorType::SapNavigation);
    }
}
