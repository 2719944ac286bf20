//! Action primitives consumed by the step handlers and recovery strategies.
//!
//! Template matching, input injection and window management live behind the
//! narrow traits in this module so the state machine and the recovery engine
//! can run against [`SimulatedDesktop`] instead of a real display.

mod clock;
mod simulated;
mod upload;

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, RpaError};

pub use clock::{Clock, ManualClock, SystemClock};
pub use simulated::SimulatedDesktop;
pub use upload::LocalUploader;

/// Screen coordinate in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    pub fn offset(self, dx: i32, dy: i32) -> Self {
        Self {
            x: self.x + dx,
            y: self.y + dy,
        }
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// Rectangular area of the screen used to narrow a search or capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

/// Name of a reference image the locator matches against the screen.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TemplateId(String);

impl TemplateId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TemplateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TemplateId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// Templates the standard order-entry pipeline looks for.
pub mod templates {
    pub const LAUNCHER_ICON: &str = "sap_launcher_icon";
    pub const MAIN_WINDOW: &str = "sap_main_window";
    pub const SALES_ORDER_FORM: &str = "sales_order_form";
    pub const NIT_FIELD: &str = "nit_field";
    pub const ORDER_FIELD: &str = "order_number_field";
    pub const DATE_FIELD: &str = "delivery_date_field";
    pub const ITEMS_GRID: &str = "items_grid";
}

/// A keyboard or mouse action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InputAction {
    TypeText(String),
    Press(String),
    Hotkey(Vec<String>),
    Click(Point),
    DoubleClick(Point),
    Drag { from: Point, to: Point },
}

impl InputAction {
    pub fn press(key: &str) -> Self {
        InputAction::Press(key.to_string())
    }

    pub fn hotkey<S: AsRef<str>>(keys: &[S]) -> Self {
        InputAction::Hotkey(keys.iter().map(|k| k.as_ref().to_string()).collect())
    }
}

/// A captured screen image. `data` is RGBA, row-major.
#[derive(Debug, Clone)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl Frame {
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0 || self.data.is_empty()
    }

    /// Encode the frame as PNG at `path`.
    pub fn save_png(&self, path: &Path) -> Result<()> {
        image::save_buffer(
            path,
            &self.data,
            self.width,
            self.height,
            image::ExtendedColorType::Rgba8,
        )?;
        Ok(())
    }
}

/// Finds templates on screen and captures frames.
pub trait ScreenLocator: Send + Sync {
    /// Center of the best match at or above `confidence`, or `None`.
    /// Errors only when the screen itself cannot be read.
    fn locate(
        &self,
        template: &TemplateId,
        confidence: f32,
        region: Option<Region>,
    ) -> Result<Option<Point>>;

    fn capture(&self, region: Option<Region>) -> Result<Frame>;
}

/// Injects keyboard and mouse input.
pub trait InputDriver: Send + Sync {
    fn perform(&self, action: &InputAction) -> Result<()>;
}

/// Finds and focuses top-level windows by title.
pub trait WindowManager: Send + Sync {
    /// Bring the window to the foreground. `Ok(false)` when no window matches.
    fn activate(&self, title: &str) -> Result<bool>;

    fn is_foreground(&self, title: &str) -> Result<bool>;
}

/// Sends a proof artifact somewhere durable.
pub trait ArtifactUploader: Send + Sync {
    /// Returns a reference to the uploaded artifact (URL, id or path).
    fn upload(&self, path: &Path) -> Result<String>;
}

/// The set of capabilities the automation runs against.
#[derive(Clone)]
pub struct Desktop {
    pub screen: Arc<dyn ScreenLocator>,
    pub input: Arc<dyn InputDriver>,
    pub windows: Arc<dyn WindowManager>,
    pub clock: Arc<dyn Clock>,
}

impl Desktop {
    /// Shorthand for performing a sequence of input actions.
    pub fn perform_all(&self, actions: &[InputAction]) -> Result<()> {
        for action in actions {
            self.input.perform(action)?;
        }
        Ok(())
    }

    /// Poll `locate` until the template shows up or `timeout` elapses.
    pub fn wait_for_template(
        &self,
        template: &TemplateId,
        confidence: f32,
        timeout: Duration,
        poll: Duration,
    ) -> Result<Point> {
        let started = self.clock.now();
        loop {
            if let Some(point) = self.screen.locate(template, confidence, None)? {
                return Ok(point);
            }
            let waited = self.clock.now().duration_since(started);
            if waited >= timeout {
                return Err(RpaError::Timeout {
                    what: format!("template '{template}'"),
                    waited_ms: waited.as_millis() as u64,
                });
            }
            self.clock.sleep(poll.min(timeout - waited));
        }
    }
}

impl fmt::Debug for Desktop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Desktop").finish_non_exhaustive()
    }
}
