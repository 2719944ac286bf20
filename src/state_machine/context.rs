use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::State;

/// Progress of one work item through the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateContext {
    pub current_file: Option<String>,
    pub current_state: State,
    pub retry_count: u32,
    pub max_retries: u32,
    pub error_message: Option<String>,
    pub last_successful_state: Option<State>,
    /// Free-form values handlers record along the way (typed text, paths,
    /// item counters).
    pub processing_stats: BTreeMap<String, serde_json::Value>,
    /// Seconds since the Unix epoch of the last checkpoint write.
    pub timestamp: f64,
}

impl StateContext {
    pub fn new(max_retries: u32) -> Self {
        Self {
            current_file: None,
            current_state: State::Idle,
            retry_count: 0,
            max_retries,
            error_message: None,
            last_successful_state: None,
            processing_stats: BTreeMap::new(),
            timestamp: 0.0,
        }
    }

    pub fn file_name(&self) -> &str {
        self.current_file.as_deref().unwrap_or("-")
    }

    pub fn set_stat(&mut self, key: &str, value: impl Into<serde_json::Value>) {
        self.processing_stats.insert(key.to_string(), value.into());
    }

    pub fn stat(&self, key: &str) -> Option<&serde_json::Value> {
        self.processing_stats.get(key)
    }

    pub fn stat_u64(&self, key: &str) -> Option<u64> {
        self.stat(key).and_then(serde_json::Value::as_u64)
    }

    pub fn stat_str(&self, key: &str) -> Option<&str> {
        self.stat(key).and_then(serde_json::Value::as_str)
    }
}

impl Default for StateContext {
    fn default() -> Self {
        Self::new(3)
    }
}

/// Current time as fractional seconds since the Unix epoch.
pub fn epoch_seconds() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}
