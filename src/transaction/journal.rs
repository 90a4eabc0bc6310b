// src/transaction/journal.rs

//! Append-only transaction journal for crash recovery
//!
//! Each record is one line, `{crc32_hex}|{json}`, so a torn final write
//! is detected and ignored on replay. State-changing records are written
//! through `write_barrier`, which fsyncs before the caller proceeds to
//! destructive work.

use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

use super::TransactionState;

/// A record in the transaction journal
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum JournalRecord {
    /// Transaction opened
    Begin {
        tx_uuid: String,
        package: String,
        target_root: PathBuf,
        timestamp: DateTime<Utc>,
    },

    /// One file landed in the target tree
    FileCopied { dest: PathBuf },

    /// All staging work finished
    Staged { files_copied: usize },

    /// Transaction committed
    Committed { timestamp: DateTime<Utc> },

    /// Transaction rolled back by the caller
    Aborted { reason: String },

    /// Transaction failed mid-flight
    Failed { error: String },
}

impl JournalRecord {
    /// State this record moves the transaction to, when it is a state
    /// change at all
    pub fn to_state(&self) -> Option<TransactionState> {
        match self {
            Self::Begin { .. } => Some(TransactionState::Initiated),
            Self::FileCopied { .. } => None,
            Self::Staged { .. } => Some(TransactionState::Staged),
            Self::Committed { .. } => Some(TransactionState::Committed),
            Self::Aborted { .. } => Some(TransactionState::Aborted),
            Self::Failed { .. } => Some(TransactionState::Failed),
        }
    }
}

/// Append-only journal with fsync barriers
pub struct TransactionJournal {
    path: PathBuf,
    file: File,
}

impl TransactionJournal {
    /// Create a fresh journal for a transaction
    pub fn create(journal_dir: &Path, tx_uuid: &str) -> Result<Self> {
        fs::create_dir_all(journal_dir)?;

        let path = journal_dir.join(format!("tx-{}.journal", tx_uuid));
        let file = OpenOptions::new()
            .create_new(true)
            .append(true)
            .open(&path)?;

        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a record without fsync
    pub fn write(&mut self, record: JournalRecord) -> Result<()> {
        let json = serde_json::to_string(&record).map_err(|e| {
            crate::Error::IoError(format!("failed to serialize journal record: {}", e))
        })?;
        let crc = crc32fast::hash(json.as_bytes());
        writeln!(self.file, "{:08x}|{}", crc, json)?;
        Ok(())
    }

    /// Append a record and fsync (state changes only)
    pub fn write_barrier(&mut self, record: JournalRecord) -> Result<()> {
        self.write(record)?;
        self.file.flush()?;
        self.file.sync_all()?;
        Ok(())
    }

    /// Replay all intact records; stops at the first corrupted line
    pub fn read_all(&self) -> Result<Vec<JournalRecord>> {
        read_records(&self.path)
    }

    /// Move the journal into the archive subdirectory after a commit
    pub fn archive(self) -> Result<()> {
        let archive_dir = self
            .path
            .parent()
            .unwrap_or(Path::new("."))
            .join("archive");
        fs::create_dir_all(&archive_dir)?;

        let name = self.path.file_name().unwrap_or_default().to_os_string();
        fs::rename(&self.path, archive_dir.join(name))?;
        Ok(())
    }

    /// Delete the journal after a clean rollback
    pub fn delete(self) -> Result<()> {
        if self.path.exists() {
            fs::remove_file(&self.path)?;
        }
        Ok(())
    }
}

/// Replay the records of a journal file on disk
pub fn read_records(path: &Path) -> Result<Vec<JournalRecord>> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let mut records = Vec::new();

    for (line_num, line_result) in reader.lines().enumerate() {
        let line = line_result?;
        if line.is_empty() {
            continue;
        }

        let Some((crc_hex, json)) = line.split_once('|') else {
            warn!("malformed journal line {}: missing delimiter", line_num + 1);
            continue;
        };

        let expected = match u32::from_str_radix(crc_hex, 16) {
            Ok(c) => c,
            Err(_) => {
                warn!("invalid CRC at journal line {}", line_num + 1);
                break;
            }
        };
        if expected != crc32fast::hash(json.as_bytes()) {
            warn!("CRC mismatch at journal line {}, stopping replay", line_num + 1);
            break;
        }

        let record: JournalRecord = serde_json::from_str(json).map_err(|e| {
            crate::Error::IoError(format!(
                "failed to parse journal record at line {}: {}",
                line_num + 1,
                e
            ))
        })?;
        records.push(record);
    }

    Ok(records)
}

/// Journals of transactions that never reached a terminal record.
/// Evidence of a crash; reported at startup.
pub fn find_incomplete_journals(journal_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut incomplete = Vec::new();
    if !journal_dir.exists() {
        return Ok(incomplete);
    }

    for entry in fs::read_dir(journal_dir)? {
        let path = entry?.path();
        if !path.is_file() || path.extension().is_none_or(|e| e != "journal") {
            continue;
        }

        let terminal = read_records(&path)?.iter().any(|r| {
            matches!(
                r.to_state(),
                Some(
                    TransactionState::Committed
                        | TransactionState::Aborted
                        | TransactionState::Failed
                )
            )
        });
        if !terminal {
            incomplete.push(path);
        }
    }

    Ok(incomplete)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn begin_record() -> JournalRecord {
        JournalRecord::Begin {
            tx_uuid: "0000-test".to_string(),
            package: "Pkg_1.0_neutral".to_string(),
            target_root: PathBuf::from("/target"),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_write_and_read_round_trip() {
        let dir = TempDir::new().unwrap();
        let mut journal = TransactionJournal::create(dir.path(), "0000-test").unwrap();
        journal.write_barrier(begin_record()).unwrap();
        journal
            .write(JournalRecord::FileCopied {
                dest: PathBuf::from("/target/Windows/foo.dll"),
            })
            .unwrap();
        journal
            .write_barrier(JournalRecord::Staged { files_copied: 1 })
            .unwrap();

        let records = journal.read_all().unwrap();
        assert_eq!(records.len(), 3);
        assert!(matches!(records[2], JournalRecord::Staged { files_copied: 1 }));
    }

    #[test]
    fn test_corrupted_tail_stops_replay() {
        let dir = TempDir::new().unwrap();
        let mut journal = TransactionJournal::create(dir.path(), "0000-test").unwrap();
        journal.write_barrier(begin_record()).unwrap();

        // Simulate a torn write
        let path = journal.path().to_path_buf();
        let mut contents = fs::read_to_string(&path).unwrap();
        contents.push_str("deadbeef|{\"type\":\"Staged\",\"files_co");
        fs::write(&path, contents).unwrap();

        let records = read_records(&path).unwrap();
        assert_eq!(records.len(), 1);
        assert!(matches!(records[0], JournalRecord::Begin { .. }));
    }

    #[test]
    fn test_incomplete_journal_detection() {
        let dir = TempDir::new().unwrap();

        let mut open = TransactionJournal::create(dir.path(), "open").unwrap();
        open.write_barrier(begin_record()).unwrap();

        let mut done = TransactionJournal::create(dir.path(), "done").unwrap();
        done.write_barrier(begin_record()).unwrap();
        done.write_barrier(JournalRecord::Committed {
            timestamp: Utc::now(),
        })
        .unwrap();

        let incomplete = find_incomplete_journals(dir.path()).unwrap();
        assert_eq!(incomplete.len(), 1);
        assert!(incomplete[0].to_string_lossy().contains("tx-open"));
    }

    #[test]
    fn test_archive_moves_journal() {
        let dir = TempDir::new().unwrap();
        let mut journal = TransactionJournal::create(dir.path(), "arch").unwrap();
        journal.write_barrier(begin_record()).unwrap();
        let path = journal.path().to_path_buf();

        journal.archive().unwrap();
        assert!(!path.exists());
        assert!(dir.path().join("archive/tx-arch.journal").exists());
    }
}
