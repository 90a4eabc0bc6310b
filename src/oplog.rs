// src/oplog.rs

//! Append-only operation log
//!
//! A human-readable audit trail of install activity, separate from the
//! crash-recovery journal. The writer is wrapped in a mutex so the log
//! can be shared across the orchestrator and its helpers.

use crate::error::Result;
use chrono::Utc;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

pub struct OperationLog {
    file: Mutex<File>,
}

impl OperationLog {
    /// Open (or create) the log file, appending to existing content
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }

    /// Append one timestamped entry
    pub fn record(&self, operation: &str, detail: &str) -> Result<()> {
        let mut file = self
            .file
            .lock()
            .map_err(|_| crate::Error::IoError("operation log mutex poisoned".into()))?;
        writeln!(
            file,
            "{} [{}] {}",
            Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ"),
            operation,
            detail
        )?;
        Ok(())
    }
}
