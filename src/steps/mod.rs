//! Handlers for the order-entry pipeline, one per working state.

mod entry;
mod proof;
mod session;

use std::path::PathBuf;
use std::sync::Arc;

use crate::config::{AutomationConfig, PilotConfig};
use crate::desktop::{ArtifactUploader, Desktop, Point, TemplateId};
use crate::error::RpaError;
use crate::recovery::{ErrorType, Failure, Severity};
use crate::state_machine::{Event, HandlerRegistry, State};

pub use entry::{FieldEntry, LoadItems, OrderField, PositionMouse};
pub use proof::{ArchiveWorkItem, TakeScreenshot, UploadArtifact};
pub use session::{ConnectRemoteDesktop, LaunchApplication, NavigateToForm};

/// Stats keys written by the handlers.
pub mod stats {
    pub const NIT: &str = "nit";
    pub const ORDER_NUMBER: &str = "order_number";
    pub const DELIVERY_DATE: &str = "delivery_date";
    pub const GRID_ORIGIN: &str = "grid_origin";
    pub const ITEMS_LOADED: &str = "items_loaded";
    pub const SCREENSHOT: &str = "screenshot";
    pub const RECEIPT: &str = "receipt";
    pub const ARTIFACT: &str = "artifact";
}

/// What every handler needs from the outside world.
#[derive(Clone)]
pub struct StepEnv {
    pub desktop: Desktop,
    pub automation: AutomationConfig,
    pub screenshots_dir: PathBuf,
    pub archive_dir: PathBuf,
    /// `None` turns UPLOADING_ARTIFACT into a no-op.
    pub uploader: Option<Arc<dyn ArtifactUploader>>,
}

impl StepEnv {
    pub fn from_config(
        desktop: Desktop,
        config: &PilotConfig,
        uploader: Option<Arc<dyn ArtifactUploader>>,
    ) -> Self {
        Self {
            desktop,
            automation: config.automation.clone(),
            screenshots_dir: config.screenshots_dir(),
            archive_dir: config.archive_dir(),
            uploader,
        }
    }

    /// Wait for `template` with the configured confidence and timeout.
    fn find(&self, template: &str) -> crate::error::Result<Point> {
        self.desktop.wait_for_template(
            &TemplateId::new(template),
            self.automation.confidence,
            self.automation.template_timeout(),
            self.automation.poll_interval(),
        )
    }

    fn settle(&self) {
        self.desktop.clock.sleep(self.automation.settle());
    }
}

/// A driver error attributed to the step that hit it.
fn step_failure(kind: ErrorType, severity: Severity, err: &RpaError) -> Failure {
    Failure::new(kind, severity, err.to_string()).with_info("cause", err.to_string())
}

/// A driver error classified by its own kind.
fn classified_failure(severity: Severity, err: &RpaError) -> Failure {
    Failure::from_error(err, severity).with_info("cause", err.to_string())
}

/// The handler set for the standard pipeline.
pub fn standard_registry(env: &StepEnv) -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    registry
        .register(State::ConnectingRemoteDesktop, ConnectRemoteDesktop::new(env.clone()))
        .register(State::LaunchingApplication, LaunchApplication::new(env.clone()))
        .register(State::NavigatingToForm, NavigateToForm::new(env.clone()))
        .register(
            State::LoadingNit,
            FieldEntry::new(env.clone(), OrderField::Nit, Event::NitLoaded),
        )
        .register(
            State::LoadingOrder,
            FieldEntry::new(env.clone(), OrderField::OrderNumber, Event::OrderLoaded),
        )
        .register(
            State::LoadingDate,
            FieldEntry::new(env.clone(), OrderField::DeliveryDate, Event::DateLoaded),
        )
        .register(State::PositioningMouse, PositionMouse::new(env.clone()))
        .register(State::LoadingItems, LoadItems::new(env.clone()))
        .register(State::TakingScreenshot, TakeScreenshot::new(env.clone()))
        .register(State::ArchivingWorkItem, ArchiveWorkItem::new(env.clone()))
        .register(State::UploadingArtifact, UploadArtifact::new(env.clone()));
    registry
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;

    use super::*;
    use crate::desktop::{LocalUploader, ManualClock, SimulatedDesktop};

    pub struct Rig {
        pub sim: SimulatedDesktop,
        pub clock: Arc<ManualClock>,
        pub env: StepEnv,
        pub dir: tempfile::TempDir,
    }

    pub fn rig(upload: bool) -> Rig {
        let dir = tempfile::tempdir().unwrap();
        let sim = SimulatedDesktop::new();
        let clock = Arc::new(ManualClock::new());
        let desktop = sim.desktop(clock.clone());
        let mut config = PilotConfig::default();
        config.queue.base_dir = dir.path().to_path_buf();
        let uploader: Option<Arc<dyn ArtifactUploader>> = if upload {
            Some(Arc::new(LocalUploader::new(dir.path().join("uploaded"))))
        } else {
            None
        };
        let env = StepEnv::from_config(desktop, &config, uploader);
        Rig {
            sim,
            clock,
            env,
            dir,
        }
    }
}
