//! Per-work-item progress snapshots that survive a process restart.
//!
//! One JSON file per item, `checkpoint_<item_id>.json`, replaced atomically
//! on every write. Bytes of the id outside `[A-Za-z0-9_.-]` are written as
//! `%XX`, so distinct ids never share a file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::Result;
use crate::state_machine::{State, StateContext};

/// On-disk snapshot of a [`StateContext`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub current_file: String,
    pub current_state: State,
    pub retry_count: u32,
    pub max_retries: u32,
    pub error_message: Option<String>,
    pub last_successful_state: Option<State>,
    pub timestamp: f64,
    #[serde(default)]
    pub processing_stats: BTreeMap<String, serde_json::Value>,
}

impl Checkpoint {
    pub fn from_context(item_id: &str, ctx: &StateContext) -> Self {
        Self {
            current_file: item_id.to_string(),
            current_state: ctx.current_state,
            retry_count: ctx.retry_count,
            max_retries: ctx.max_retries,
            error_message: ctx.error_message.clone(),
            last_successful_state: ctx.last_successful_state,
            timestamp: ctx.timestamp,
            processing_stats: ctx.processing_stats.clone(),
        }
    }

    pub fn age_at(&self, now: f64) -> Duration {
        Duration::from_secs_f64((now - self.timestamp).max(0.0))
    }
}

/// Keyed file store of checkpoints.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
    expiry: Duration,
}

impl CheckpointStore {
    pub fn new(dir: impl Into<PathBuf>, expiry: Duration) -> Self {
        Self {
            dir: dir.into(),
            expiry,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `checkpoint_order1.json.json` for item `order1.json`.
    pub fn path_for(&self, item_id: &str) -> PathBuf {
        self.dir.join(format!("checkpoint_{}.json", encode_id(item_id)))
    }

    pub fn is_expired(&self, checkpoint: &Checkpoint, now: f64) -> bool {
        checkpoint.age_at(now) >= self.expiry
    }

    /// Write through a temporary file and rename over the old snapshot.
    pub fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.path_for(&checkpoint.current_file);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(checkpoint)?)?;
        std::fs::rename(&tmp, &path)?;
        debug!(
            item = %checkpoint.current_file,
            state = %checkpoint.current_state,
            retry_count = checkpoint.retry_count,
            "checkpoint saved"
        );
        Ok(())
    }

    pub fn load(&self, item_id: &str) -> Result<Option<Checkpoint>> {
        let path = self.path_for(item_id);
        match std::fs::read(&path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// A checkpoint that may be resumed at `now`. Expired or unreadable
    /// snapshots are deleted and reported as absent.
    pub fn resume(&self, item_id: &str, now: f64) -> Result<Option<Checkpoint>> {
        let checkpoint = match self.load(item_id) {
            Ok(Some(cp)) => cp,
            Ok(None) => return Ok(None),
            Err(e) => {
                warn!(item = item_id, error = %e, "discarding unreadable checkpoint");
                self.delete(item_id)?;
                return Ok(None);
            }
        };
        if checkpoint.current_file != item_id {
            warn!(
                item = item_id,
                owner = %checkpoint.current_file,
                "checkpoint belongs to another item, ignoring it"
            );
            return Ok(None);
        }
        if self.is_expired(&checkpoint, now) {
            debug!(
                item = item_id,
                age_secs = checkpoint.age_at(now).as_secs(),
                "checkpoint expired"
            );
            self.delete(item_id)?;
            return Ok(None);
        }
        Ok(Some(checkpoint))
    }

    /// `Ok(true)` when a file was removed.
    pub fn delete(&self, item_id: &str) -> Result<bool> {
        match std::fs::remove_file(self.path_for(item_id)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Every readable checkpoint, sorted by item id.
    pub fn list(&self) -> Result<Vec<Checkpoint>> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut checkpoints = Vec::new();
        for entry in entries {
            let path = entry?.path();
            let is_checkpoint = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("checkpoint_") && n.ends_with(".json"));
            if !is_checkpoint {
                continue;
            }
            match std::fs::read(&path).map(|b| serde_json::from_slice::<Checkpoint>(&b)) {
                Ok(Ok(cp)) => checkpoints.push(cp),
                Ok(Err(e)) => warn!(path = %path.display(), error = %e, "skipping unreadable checkpoint"),
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable checkpoint"),
            }
        }
        checkpoints.sort_by(|a, b| a.current_file.cmp(&b.current_file));
        Ok(checkpoints)
    }

    /// Delete expired checkpoints; returns how many were removed.
    pub fn purge_expired(&self, now: f64) -> Result<usize> {
        let mut removed = 0;
        for cp in self.list()? {
            if self.is_expired(&cp, now) && self.delete(&cp.current_file)? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Delete every checkpoint; returns how many were removed.
    pub fn clear(&self) -> Result<usize> {
        let mut removed = 0;
        for cp in self.list()? {
            if self.delete(&cp.current_file)? {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

fn encode_id(item_id: &str) -> String {
    let mut encoded = String::with_capacity(item_id.len());
    for byte in item_id.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.') {
            encoded.push(char::from(byte));
        } else {
            encoded.push_str(&format!("%{byte:02X}"));
        }
    }
    encoded
}
