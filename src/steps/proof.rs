use std::path::PathBuf;

use chrono::{Local, Utc};
use serde::Serialize;
use tracing::info;

use super::{StepEnv, classified_failure, stats, step_failure};
use crate::error::RpaError;
use crate::recovery::{ErrorType, Failure, Severity};
use crate::state_machine::{Event, StateContext, StateHandler};
use crate::work_item::{SalesOrder, WorkItem};

/// TAKING_SCREENSHOT: capture the filled form as proof of entry.
pub struct TakeScreenshot {
    env: StepEnv,
}

impl TakeScreenshot {
    pub fn new(env: StepEnv) -> Self {
        Self { env }
    }

    fn target(&self, item: &WorkItem) -> PathBuf {
        let stamp = Local::now().format("%Y%m%d_%H%M%S");
        self.env
            .screenshots_dir
            .join(format!("{}_{stamp}.png", item.stem()))
    }
}

impl StateHandler for TakeScreenshot {
    fn execute(&self, ctx: &mut StateContext, item: &WorkItem) -> Result<Event, Failure> {
        let frame = self
            .env
            .desktop
            .screen
            .capture(None)
            .map_err(|e| step_failure(ErrorType::TemplateMatching, Severity::Medium, &e))?;
        if frame.is_empty() {
            return Err(Failure::new(
                ErrorType::TemplateMatching,
                Severity::Medium,
                "captured an empty frame",
            ));
        }

        let path = self.target(item);
        std::fs::create_dir_all(&self.env.screenshots_dir)
            .map_err(|e| file_failure(&RpaError::from(e)))?;
        frame.save_png(&path).map_err(|e| file_failure(&e))?;

        info!(item = %item.id, path = %path.display(), "screenshot saved");
        ctx.set_stat(stats::SCREENSHOT, path.display().to_string());
        Ok(Event::ScreenshotTaken)
    }
}

/// What gets written next to the archived order.
#[derive(Debug, Serialize)]
struct Receipt<'a> {
    work_item: &'a str,
    order: &'a SalesOrder,
    screenshot: Option<&'a str>,
    stats: &'a std::collections::BTreeMap<String, serde_json::Value>,
    completed_at: String,
}

/// ARCHIVING_WORK_ITEM: record what was entered into the archive directory.
pub struct ArchiveWorkItem {
    env: StepEnv,
}

impl ArchiveWorkItem {
    pub fn new(env: StepEnv) -> Self {
        Self { env }
    }
}

impl StateHandler for ArchiveWorkItem {
    fn execute(&self, ctx: &mut StateContext, item: &WorkItem) -> Result<Event, Failure> {
        let receipt = Receipt {
            work_item: &item.id,
            order: &item.payload,
            screenshot: ctx.stat_str(stats::SCREENSHOT),
            stats: &ctx.processing_stats,
            completed_at: Utc::now().to_rfc3339(),
        };
        let body = serde_json::to_vec_pretty(&receipt).map_err(|e| file_failure(&RpaError::from(e)))?;

        let path = self
            .env
            .archive_dir
            .join(format!("{}.receipt.json", item.stem()));
        std::fs::create_dir_all(&self.env.archive_dir).map_err(|e| file_failure(&RpaError::from(e)))?;
        std::fs::write(&path, body).map_err(|e| file_failure(&RpaError::from(e)))?;

        info!(item = %item.id, receipt = %path.display(), "work item archived");
        ctx.set_stat(stats::RECEIPT, path.display().to_string());
        Ok(Event::WorkItemArchived)
    }
}

/// UPLOADING_ARTIFACT: ship the screenshot when an uploader is configured.
pub struct UploadArtifact {
    env: StepEnv,
}

impl UploadArtifact {
    pub fn new(env: StepEnv) -> Self {
        Self { env }
    }
}

impl StateHandler for UploadArtifact {
    fn execute(&self, ctx: &mut StateContext, item: &WorkItem) -> Result<Event, Failure> {
        let Some(uploader) = &self.env.uploader else {
            return Ok(Event::ProcessingComplete);
        };
        let screenshot = ctx.stat_str(stats::SCREENSHOT).map(PathBuf::from).ok_or_else(|| {
            Failure::new(
                ErrorType::FileOperation,
                Severity::High,
                "no screenshot recorded for upload",
            )
        })?;

        let reference = uploader
            .upload(&screenshot)
            .map_err(|e| step_failure(ErrorType::FileOperation, Severity::Medium, &e))?;
        info!(item = %item.id, %reference, "artifact uploaded");
        ctx.set_stat(stats::ARTIFACT, reference);
        Ok(Event::ArtifactUploaded)
    }
}

fn file_failure(err: &RpaError) -> Failure {
    classified_failure(Severity::High, err)
}
