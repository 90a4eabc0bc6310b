// src/transaction/mod.rs

//! Transactional install state machine
//!
//! One install maps to one transaction: `None → Initiated → Staged →
//! Committed`, with `Aborted` (explicit rollback) and `Failed` (error
//! mid-flight) as terminal states reachable from Initiated or Staged.
//!
//! While open, a transaction holds an exclusive lock file (fs2) under the
//! work directory and appends to a CRC-checked journal. The journal is
//! archived on commit and deleted on rollback; a journal without a
//! terminal record is evidence of a crash and is reported at startup.

pub mod journal;

use crate::error::{Error, Result};
use chrono::Utc;
use fs2::FileExt;
use journal::{JournalRecord, TransactionJournal};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionState {
    None,
    Initiated,
    Staged,
    Committed,
    Aborted,
    Failed,
}

impl TransactionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Committed | Self::Aborted | Self::Failed)
    }
}

struct ActiveTransaction {
    uuid: String,
    state: TransactionState,
    journal: TransactionJournal,
    lock_file: File,
    copied_files: Vec<PathBuf>,
}

/// Manages the single open transaction of an install run
pub struct TransactionManager {
    work_dir: PathBuf,
    current: Option<ActiveTransaction>,
    last_state: TransactionState,
}

impl TransactionManager {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
            current: None,
            last_state: TransactionState::None,
        }
    }

    /// Observable state: the open transaction's state, or the terminal
    /// state of the last one.
    pub fn state(&self) -> TransactionState {
        self.current
            .as_ref()
            .map(|t| t.state)
            .unwrap_or(self.last_state)
    }

    pub fn journal_dir(&self) -> PathBuf {
        self.work_dir.join("journal")
    }

    /// Journals of transactions that crashed before reaching a terminal
    /// state.
    pub fn incomplete_journals(&self) -> Result<Vec<PathBuf>> {
        journal::find_incomplete_journals(&self.journal_dir())
    }

    /// Open a transaction for one package install.
    ///
    /// Fails with `TransactionAlreadyOpen` if one is open in this manager,
    /// and with `TransactionError` if another process holds the lock.
    pub fn begin(&mut self, package: &str, target_root: &Path) -> Result<String> {
        if self.current.is_some() {
            return Err(Error::TransactionAlreadyOpen);
        }

        fs::create_dir_all(&self.work_dir)?;
        let lock_file = File::create(self.work_dir.join("install.lock"))?;
        Self::acquire_lock(&lock_file)?;

        let uuid = Uuid::new_v4().to_string();
        let mut journal = TransactionJournal::create(&self.journal_dir(), &uuid)?;
        journal.write_barrier(JournalRecord::Begin {
            tx_uuid: uuid.clone(),
            package: package.to_string(),
            target_root: target_root.to_path_buf(),
            timestamp: Utc::now(),
        })?;

        info!("transaction {} opened for {}", uuid, package);
        self.current = Some(ActiveTransaction {
            uuid: uuid.clone(),
            state: TransactionState::Initiated,
            journal,
            lock_file,
            copied_files: Vec::new(),
        });
        Ok(uuid)
    }

    /// Lock acquisition with retry backoff: 0ms, 100ms, 200ms, 400ms,
    /// 800ms before giving up.
    fn acquire_lock(lock_file: &File) -> Result<()> {
        const MAX_RETRIES: u32 = 5;
        let mut last_error = None;

        for attempt in 0..MAX_RETRIES {
            match lock_file.try_lock_exclusive() {
                Ok(()) => {
                    last_error = None;
                    break;
                }
                Err(e) => {
                    last_error = Some(e);
                    if attempt < MAX_RETRIES - 1 {
                        std::thread::sleep(std::time::Duration::from_millis(100 * (1 << attempt)));
                    }
                }
            }
        }

        if let Some(e) = last_error {
            return Err(Error::TransactionError(format!(
                "could not acquire install lock after {} attempts; \
                 another install may be in progress: {}",
                MAX_RETRIES, e
            )));
        }
        Ok(())
    }

    /// Record one file landed in the target tree (journal only, no fsync)
    pub fn record_copied(&mut self, dest: &Path) -> Result<()> {
        let txn = self.open_mut()?;
        txn.journal.write(JournalRecord::FileCopied {
            dest: dest.to_path_buf(),
        })?;
        txn.copied_files.push(dest.to_path_buf());
        Ok(())
    }

    /// Mark staging complete: `Initiated → Staged`
    pub fn stage(&mut self) -> Result<()> {
        let txn = self.open_mut()?;
        if txn.state != TransactionState::Initiated {
            return Err(Error::TransactionError(format!(
                "cannot stage from state {:?}",
                txn.state
            )));
        }
        let count = txn.copied_files.len();
        txn.journal
            .write_barrier(JournalRecord::Staged { files_copied: count })?;
        txn.state = TransactionState::Staged;
        debug!("transaction {} staged with {} files", txn.uuid, count);
        Ok(())
    }

    /// Commit the staged transaction. Fails with `NoStagedTransaction`
    /// unless the state is exactly Staged.
    pub fn commit(&mut self) -> Result<()> {
        let mut txn = match self.current.take() {
            Some(txn) if txn.state == TransactionState::Staged => txn,
            Some(txn) => {
                self.current = Some(txn);
                return Err(Error::NoStagedTransaction);
            }
            None => return Err(Error::NoStagedTransaction),
        };
        if let Err(e) = txn.journal.write_barrier(JournalRecord::Committed {
            timestamp: Utc::now(),
        }) {
            let _ = fs2::FileExt::unlock(&txn.lock_file);
            self.last_state = TransactionState::Failed;
            return Err(Error::CommitFailed(e.to_string()));
        }
        if let Err(e) = txn.journal.archive() {
            let _ = fs2::FileExt::unlock(&txn.lock_file);
            self.last_state = TransactionState::Failed;
            return Err(Error::CommitFailed(e.to_string()));
        }

        let _ = fs2::FileExt::unlock(&txn.lock_file);
        info!("transaction {} committed", txn.uuid);
        self.last_state = TransactionState::Committed;
        Ok(())
    }

    /// Roll the open transaction back: copied files are removed
    /// best-effort in reverse order, the journal is deleted, the state
    /// becomes Aborted.
    pub fn rollback(&mut self, reason: &str) -> Result<()> {
        let mut txn = self
            .current
            .take()
            .ok_or_else(|| Error::TransactionError("no open transaction to roll back".into()))?;

        warn!("rolling back transaction {}: {}", txn.uuid, reason);
        txn.journal.write_barrier(JournalRecord::Aborted {
            reason: reason.to_string(),
        })?;

        for dest in txn.copied_files.iter().rev() {
            if let Err(e) = fs::remove_file(dest) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("rollback could not remove {}: {}", dest.display(), e);
                }
            }
        }

        txn.journal.delete()?;
        let _ = fs2::FileExt::unlock(&txn.lock_file);
        self.last_state = TransactionState::Aborted;
        Ok(())
    }

    /// Mark the open transaction failed. The journal is kept for
    /// diagnosis; copied files stay in place.
    pub fn fail(&mut self, error: &str) -> Result<()> {
        let mut txn = self
            .current
            .take()
            .ok_or_else(|| Error::TransactionError("no open transaction to fail".into()))?;

        warn!("transaction {} failed: {}", txn.uuid, error);
        txn.journal.write_barrier(JournalRecord::Failed {
            error: error.to_string(),
        })?;
        let _ = fs2::FileExt::unlock(&txn.lock_file);
        self.last_state = TransactionState::Failed;
        Ok(())
    }

    fn open_mut(&mut self) -> Result<&mut ActiveTransaction> {
        self.current
            .as_mut()
            .ok_or_else(|| Error::TransactionError("no open transaction".into()))
    }
}

impl Drop for TransactionManager {
    fn drop(&mut self) {
        if let Some(ref txn) = self.current {
            let _ = fs2::FileExt::unlock(&txn.lock_file);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn manager(dir: &TempDir) -> TransactionManager {
        TransactionManager::new(dir.path().join("work"))
    }

    #[test]
    fn test_begin_stage_commit() {
        let dir = TempDir::new().unwrap();
        let mut mgr = manager(&dir);
        assert_eq!(mgr.state(), TransactionState::None);

        mgr.begin("Pkg_1.0_neutral", Path::new("/target")).unwrap();
        assert_eq!(mgr.state(), TransactionState::Initiated);

        mgr.stage().unwrap();
        assert_eq!(mgr.state(), TransactionState::Staged);

        mgr.commit().unwrap();
        assert_eq!(mgr.state(), TransactionState::Committed);
    }

    #[test]
    fn test_double_begin_rejected() {
        let dir = TempDir::new().unwrap();
        let mut mgr = manager(&dir);
        mgr.begin("Pkg", Path::new("/t")).unwrap();
        assert!(matches!(
            mgr.begin("Pkg2", Path::new("/t")),
            Err(Error::TransactionAlreadyOpen)
        ));
    }

    #[test]
    fn test_commit_requires_staged() {
        let dir = TempDir::new().unwrap();
        let mut mgr = manager(&dir);
        mgr.begin("Pkg", Path::new("/t")).unwrap();
        assert!(matches!(mgr.commit(), Err(Error::NoStagedTransaction)));
    }

    #[test]
    fn test_rollback_removes_copied_files() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("target");
        fs::create_dir_all(&target).unwrap();
        let file = target.join("copied.dll");

        let mut mgr = manager(&dir);
        mgr.begin("Pkg", &target).unwrap();
        fs::write(&file, b"payload").unwrap();
        mgr.record_copied(&file).unwrap();

        mgr.rollback("test rollback").unwrap();
        assert!(!file.exists());
        assert_eq!(mgr.state(), TransactionState::Aborted);

        // Rollback deletes its journal
        assert!(mgr.incomplete_journals().unwrap().is_empty());
    }

    #[test]
    fn test_fail_keeps_journal() {
        let dir = TempDir::new().unwrap();
        let mut mgr = manager(&dir);
        mgr.begin("Pkg", Path::new("/t")).unwrap();
        mgr.fail("disk full").unwrap();
        assert_eq!(mgr.state(), TransactionState::Failed);

        // Terminal record present, so the journal is not "incomplete"
        assert!(mgr.incomplete_journals().unwrap().is_empty());
        let journals: Vec<_> = fs::read_dir(mgr.journal_dir())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_file())
            .collect();
        assert_eq!(journals.len(), 1);
    }

    #[test]
    fn test_commit_archives_journal() {
        let dir = TempDir::new().unwrap();
        let mut mgr = manager(&dir);
        mgr.begin("Pkg", Path::new("/t")).unwrap();
        mgr.stage().unwrap();
        mgr.commit().unwrap();

        let archive = mgr.journal_dir().join("archive");
        assert_eq!(fs::read_dir(archive).unwrap().count(), 1);
    }

    #[test]
    fn test_failed_commit_reports_failed_state() {
        let dir = TempDir::new().unwrap();
        let mut mgr = manager(&dir);
        mgr.begin("Pkg", Path::new("/t")).unwrap();
        mgr.stage().unwrap();

        // Occupy the archive path so the journal cannot be moved aside
        fs::write(mgr.journal_dir().join("archive"), b"in the way").unwrap();

        assert!(matches!(mgr.commit(), Err(Error::CommitFailed(_))));
        assert_eq!(mgr.state(), TransactionState::Failed);
    }

    #[test]
    fn test_new_transaction_after_commit() {
        let dir = TempDir::new().unwrap();
        let mut mgr = manager(&dir);
        mgr.begin("Pkg", Path::new("/t")).unwrap();
        mgr.stage().unwrap();
        mgr.commit().unwrap();

        // A committed manager can open the next transaction
        mgr.begin("Pkg2", Path::new("/t")).unwrap();
        assert_eq!(mgr.state(), TransactionState::Initiated);
    }
}
