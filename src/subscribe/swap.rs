//! Backup, promote and rollback of subscription documents
//!
//! Promotion only ever renames files, so the active document is either the
//! previous version or the new one, never a partial write:
//!
//! 1. active → `<active>-<timestamp>.backup` (skipped when there is no active)
//! 2. staging → active
//! 3. if 2 failed and a backup exists: backup → active
//!
//! Between steps 1 and 2 the active path briefly does not exist. Readers may
//! see it missing but never see it torn.

use chrono::{DateTime, Local};
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

use crate::config::{backup_path_for, BACKUP_TIMESTAMP_FORMAT};
use crate::models::UpdateStage;
use crate::utils::error::PromoteError;

/// Filesystem operations used by the swap engine
pub trait FileOps: Send + Sync {
    /// Whether `path` exists
    fn exists(&self, path: &Path) -> bool;

    /// Rename `from` to `to`, replacing `to` if it exists
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;
}

/// [`FileOps`] backed by `std::fs`
#[derive(Debug, Clone, Copy, Default)]
pub struct StdFileOps;

impl FileOps for StdFileOps {
    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        std::fs::rename(from, to)
    }
}

/// Result of a successful promotion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromoteOutcome {
    /// Where the previous document went, if there was one
    pub backup: Option<PathBuf>,
}

/// Swaps staged documents into place
#[derive(Debug, Clone, Default)]
pub struct SwapEngine<F = StdFileOps> {
    ops: F,
}

impl SwapEngine<StdFileOps> {
    /// Engine working on the real filesystem
    pub fn new() -> Self {
        Self { ops: StdFileOps }
    }
}

impl<F: FileOps> SwapEngine<F> {
    /// Engine with custom filesystem operations
    pub fn with_ops(ops: F) -> Self {
        Self { ops }
    }

    /// Filesystem operations in use
    pub fn ops(&self) -> &F {
        &self.ops
    }

    /// Promote `staging` to `active`, stamping the backup with the current time
    pub fn promote(
        &self,
        name: &str,
        staging: &Path,
        active: &Path,
    ) -> Result<PromoteOutcome, PromoteError> {
        self.promote_at(name, staging, active, Local::now())
    }

    /// Promote `staging` to `active`, stamping the backup with `at`
    pub fn promote_at(
        &self,
        name: &str,
        staging: &Path,
        active: &Path,
        at: DateTime<Local>,
    ) -> Result<PromoteOutcome, PromoteError> {
        let backup = if self.ops.exists(active) {
            let backup = self.free_backup_path(active, at);
            if let Err(source) = self.ops.rename(active, &backup) {
                error!(
                    subscription = %name,
                    stage = %UpdateStage::Backup,
                    error = %source,
                    "Failed to back up active document"
                );
                return Err(PromoteError::Backup {
                    active: active.to_path_buf(),
                    backup,
                    source,
                });
            }
            info!(
                subscription = %name,
                stage = %UpdateStage::Backup,
                backup = %backup.display(),
                "Backed up active document"
            );
            Some(backup)
        } else {
            info!(
                subscription = %name,
                stage = %UpdateStage::Backup,
                "No active document, nothing to back up"
            );
            None
        };

        let Err(source) = self.ops.rename(staging, active) else {
            info!(
                subscription = %name,
                stage = %UpdateStage::Write,
                active = %active.display(),
                "Promoted staged document"
            );
            return Ok(PromoteOutcome { backup });
        };

        warn!(
            subscription = %name,
            stage = %UpdateStage::Write,
            error = %source,
            "Failed to promote staged document"
        );

        let Some(backup) = backup else {
            return Err(PromoteError::Write {
                staging: staging.to_path_buf(),
                active: active.to_path_buf(),
                restored: false,
                source,
            });
        };

        match self.ops.rename(&backup, active) {
            Ok(()) => {
                info!(
                    subscription = %name,
                    stage = %UpdateStage::Rollback,
                    "Restored previous document"
                );
                Err(PromoteError::Write {
                    staging: staging.to_path_buf(),
                    active: active.to_path_buf(),
                    restored: true,
                    source,
                })
            }
            Err(rollback) => {
                error!(
                    subscription = %name,
                    stage = %UpdateStage::Rollback,
                    backup = %backup.display(),
                    error = %rollback,
                    "Rollback failed, subscription has no active document"
                );
                Err(PromoteError::RollbackFailed {
                    active: active.to_path_buf(),
                    backup,
                    rollback,
                    source,
                })
            }
        }
    }

    /// Backup path for `at`, with a `-N` suffix if one already exists for that second
    fn free_backup_path(&self, active: &Path, at: DateTime<Local>) -> PathBuf {
        let candidate = backup_path_for(active, at);
        if !self.ops.exists(&candidate) {
            return candidate;
        }

        let stamp = at.format(BACKUP_TIMESTAMP_FORMAT).to_string();
        (1u32..)
            .map(|n| {
                let mut file_name = OsString::from(active.as_os_str());
                file_name.push(format!("-{stamp}-{n}.backup"));
                PathBuf::from(file_name)
            })
            .find(|path| !self.ops.exists(path))
            .unwrap_or(candidate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_promote_without_active() {
        let dir = tempfile::tempdir().unwrap();
        let staging = dir.path().join("a.yaml.update");
        let active = dir.path().join("a.yaml");
        std::fs::write(&staging, "new").unwrap();

        let outcome = SwapEngine::new()
            .promote_at("a", &staging, &active, at())
            .unwrap();

        assert_eq!(outcome.backup, None);
        assert_eq!(std::fs::read_to_string(&active).unwrap(), "new");
        assert!(!staging.exists());
    }

    #[test]
    fn test_promote_backs_up_previous() {
        let dir = tempfile::tempdir().unwrap();
        let staging = dir.path().join("a.yaml.update");
        let active = dir.path().join("a.yaml");
        std::fs::write(&staging, "new").unwrap();
        std::fs::write(&active, "old").unwrap();

        let outcome = SwapEngine::new()
            .promote_at("a", &staging, &active, at())
            .unwrap();

        let backup = outcome.backup.unwrap();
        assert_eq!(
            backup.file_name().unwrap().to_str().unwrap(),
            "a.yaml-20240601-120000.backup"
        );
        assert_eq!(std::fs::read_to_string(&backup).unwrap(), "old");
        assert_eq!(std::fs::read_to_string(&active).unwrap(), "new");
    }

    #[test]
    fn test_backup_name_collision() {
        let dir = tempfile::tempdir().unwrap();
        let active = dir.path().join("a.yaml");
        let engine = SwapEngine::new();

        for (i, content) in ["v1", "v2", "v3"].iter().enumerate() {
            let staging = dir.path().join("a.yaml.update");
            std::fs::write(&staging, content).unwrap();
            let outcome = engine.promote_at("a", &staging, &active, at()).unwrap();
            assert_eq!(outcome.backup.is_some(), i > 0);
        }

        assert!(dir.path().join("a.yaml-20240601-120000.backup").exists());
        assert!(dir.path().join("a.yaml-20240601-120000-1.backup").exists());
        assert_eq!(std::fs::read_to_string(&active).unwrap(), "v3");
    }

    #[test]
    fn test_missing_staging_restores_active() {
        let dir = tempfile::tempdir().unwrap();
        let staging = dir.path().join("a.yaml.update");
        let active = dir.path().join("a.yaml");
        std::fs::write(&active, "old").unwrap();

        let err = SwapEngine::new()
            .promote_at("a", &staging, &active, at())
            .unwrap_err();

        assert!(matches!(err, PromoteError::Write { restored: true, .. }));
        assert_eq!(std::fs::read_to_string(&active).unwrap(), "old");
    }
}
