use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::RpaError;

/// The kind of thing that went wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorType {
    TemplateMatching,
    WindowConnection,
    /// Navigation inside the ERP client.
    SapNavigation,
    DataProcessing,
    FileOperation,
    SystemError,
    TimeoutError,
    ConfigurationError,
}

impl ErrorType {
    pub const ALL: [ErrorType; 8] = [
        ErrorType::TemplateMatching,
        ErrorType::WindowConnection,
        ErrorType::SapNavigation,
        ErrorType::DataProcessing,
        ErrorType::FileOperation,
        ErrorType::SystemError,
        ErrorType::TimeoutError,
        ErrorType::ConfigurationError,
    ];
}

impl fmt::Display for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorType::TemplateMatching => "TEMPLATE_MATCHING",
            ErrorType::WindowConnection => "WINDOW_CONNECTION",
            ErrorType::SapNavigation => "SAP_NAVIGATION",
            ErrorType::DataProcessing => "DATA_PROCESSING",
            ErrorType::FileOperation => "FILE_OPERATION",
            ErrorType::SystemError => "SYSTEM_ERROR",
            ErrorType::TimeoutError => "TIMEOUT_ERROR",
            ErrorType::ConfigurationError => "CONFIGURATION_ERROR",
        };
        f.pad(name)
    }
}

/// How bad a failure is.
///
/// - `Low`: log and continue
/// - `Medium`: retry the operation
/// - `High`: abort the current work item if recovery is not possible
/// - `Critical`: never attempt recovery
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Low => write!(f, "LOW"),
            Severity::Medium => write!(f, "MEDIUM"),
            Severity::High => write!(f, "HIGH"),
            Severity::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// The error side of a state handler's result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Failure {
    pub error_type: ErrorType,
    pub severity: Severity,
    pub message: String,
    pub item_index: Option<usize>,
    pub additional_info: BTreeMap<String, serde_json::Value>,
}

impl Failure {
    pub fn new(error_type: ErrorType, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            error_type,
            severity,
            message: message.into(),
            item_index: None,
            additional_info: BTreeMap::new(),
        }
    }

    /// Classify a crate error, keeping its message.
    pub fn from_error(err: &RpaError, severity: Severity) -> Self {
        Self::new(ErrorType::from(err), severity, err.to_string())
    }

    pub fn at_item(mut self, index: usize) -> Self {
        self.item_index = Some(index);
        self
    }

    pub fn with_info(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.additional_info.insert(key.to_string(), value.into());
        self
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}/{}] {}", self.error_type, self.severity, self.message)?;
        if let Some(index) = self.item_index {
            write!(f, " (item {index})")?;
        }
        Ok(())
    }
}

/// Everything the recovery engine needs to decide about one failure.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorContext {
    pub error_type: ErrorType,
    pub severity: Severity,
    /// Human name of the action that failed.
    pub operation: String,
    pub file_name: Option<String>,
    pub item_index: Option<usize>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub additional_info: BTreeMap<String, serde_json::Value>,
}

impl ErrorContext {
    pub fn new(error_type: ErrorType, severity: Severity, operation: impl Into<String>) -> Self {
        Self {
            error_type,
            severity,
            operation: operation.into(),
            file_name: None,
            item_index: None,
            retry_count: 0,
            max_retries: 3,
            additional_info: BTreeMap::new(),
        }
    }

    /// Build a context from a handler failure.
    pub fn from_failure(failure: &Failure, operation: impl Into<String>) -> Self {
        Self {
            item_index: failure.item_index,
            additional_info: failure.additional_info.clone(),
            ..Self::new(failure.error_type, failure.severity, operation)
        }
    }

    pub fn with_file(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = Some(file_name.into());
        self
    }

    pub fn with_retries(mut self, retry_count: u32, max_retries: u32) -> Self {
        self.retry_count = retry_count;
        self.max_retries = max_retries;
        self
    }

    pub fn retries_exhausted(&self) -> bool {
        self.retry_count >= self.max_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_type_serializes_screaming() {
        let json = serde_json::to_string(&ErrorType::SapNavigation).unwrap();
        assert_eq!(json, "\"SAP_NAVIGATION\"");
        assert_eq!(ErrorType::SapNavigation.to_string(), "SAP_NAVIGATION");
    }

    #[test]
    fn severity_orders_by_impact() {
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::High < Severity::Critical);
    }

    #[test]
    fn failure_display_includes_item() {
        let failure = Failure::new(ErrorType::DataProcessing, Severity::Medium, "bad qty").at_item(2);
        assert_eq!(failure.to_string(), "[DATA_PROCESSING/MEDIUM] bad qty (item 2)");
    }

    #[test]
    fn context_from_failure_carries_details() {
        let failure = Failure::new(ErrorType::TemplateMatching, Severity::Medium, "nit field")
            .at_item(1)
            .with_info("template", "nit_field");
        let ctx = ErrorContext::from_failure(&failure, "LOADING_NIT")
            .with_file("order1.json")
            .with_retries(2, 3);

        assert_eq!(ctx.operation, "LOADING_NIT");
        assert_eq!(ctx.file_name.as_deref(), Some("order1.json"));
        assert_eq!(ctx.item_index, Some(1));
        assert_eq!(ctx.additional_info["template"], "nit_field");
        assert!(!ctx.retries_exhausted());
        assert!(ctx.clone().with_retries(3, 3).retries_exhausted());
    }
}
