//! Fault-injection tests for the swap engine
//!
//! Every rename in a promotion is made to fail in turn; the active document
//! must always end up as either the previous or the new version.

use chrono::{Local, TimeZone};
use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use subkeeper::subscribe::{FileOps, StdFileOps, SwapEngine};
use subkeeper::utils::error::PromoteError;

/// Real filesystem, except that the listed rename calls (1-based) fail
struct FaultyOps {
    fail_on: HashSet<usize>,
    calls: AtomicUsize,
}

impl FaultyOps {
    fn failing(calls: &[usize]) -> Self {
        Self {
            fail_on: calls.iter().copied().collect(),
            calls: AtomicUsize::new(0),
        }
    }
}

impl FileOps for FaultyOps {
    fn exists(&self, path: &Path) -> bool {
        StdFileOps.exists(path)
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_on.contains(&call) {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "injected"));
        }
        StdFileOps.rename(from, to)
    }
}

struct Fixture {
    _dir: tempfile::TempDir,
    staging: PathBuf,
    active: PathBuf,
    dir: PathBuf,
}

const OLD: &[u8] = b"proxies:\n  - old\n\xF0\x9F\x94\x92 binary-safe tail\n";
const NEW: &[u8] = b"proxies:\n  - new\n";

fn fixture(with_active: bool) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let staging = dir.path().join("work.yaml.update");
    let active = dir.path().join("work.yaml");
    std::fs::write(&staging, NEW).unwrap();
    if with_active {
        std::fs::write(&active, OLD).unwrap();
    }
    Fixture {
        dir: dir.path().to_path_buf(),
        _dir: dir,
        staging,
        active,
    }
}

fn backups(dir: &Path) -> Vec<PathBuf> {
    let mut found: Vec<PathBuf> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .filter(|p| p.to_str().unwrap().ends_with(".backup"))
        .collect();
    found.sort();
    found
}

#[test]
fn test_backup_failure_leaves_everything_in_place() {
    let f = fixture(true);
    let engine = SwapEngine::with_ops(FaultyOps::failing(&[1]));

    let err = engine.promote("work", &f.staging, &f.active).unwrap_err();

    assert!(matches!(err, PromoteError::Backup { .. }));
    assert_eq!(std::fs::read(&f.active).unwrap(), OLD);
    assert_eq!(std::fs::read(&f.staging).unwrap(), NEW);
    assert!(backups(&f.dir).is_empty());
}

#[test]
fn test_write_failure_rolls_back_byte_for_byte() {
    let f = fixture(true);
    let engine = SwapEngine::with_ops(FaultyOps::failing(&[2]));

    let err = engine.promote("work", &f.staging, &f.active).unwrap_err();

    assert!(matches!(err, PromoteError::Write { restored: true, .. }));
    assert!(!err.lost_active_document());
    assert_eq!(std::fs::read(&f.active).unwrap(), OLD);
    assert!(f.staging.exists(), "staging is kept after a failed promotion");
    assert!(backups(&f.dir).is_empty());
}

#[test]
fn test_rollback_failure_is_reported() {
    let f = fixture(true);
    let engine = SwapEngine::with_ops(FaultyOps::failing(&[2, 3]));

    let err = engine.promote("work", &f.staging, &f.active).unwrap_err();

    assert!(err.lost_active_document());
    let PromoteError::RollbackFailed { backup, .. } = err else {
        panic!("expected RollbackFailed");
    };
    assert!(!f.active.exists());
    assert_eq!(std::fs::read(backup).unwrap(), OLD);
}

#[test]
fn test_write_failure_without_previous_document() {
    let f = fixture(false);
    let engine = SwapEngine::with_ops(FaultyOps::failing(&[1]));

    let err = engine.promote("work", &f.staging, &f.active).unwrap_err();

    assert!(matches!(err, PromoteError::Write { restored: false, .. }));
    assert!(!f.active.exists());
}

#[test]
fn test_successful_promotion_keeps_backup() {
    let f = fixture(true);
    let at = Local.with_ymd_and_hms(2024, 2, 29, 23, 59, 59).unwrap();

    let outcome = SwapEngine::new()
        .promote_at("work", &f.staging, &f.active, at)
        .unwrap();

    let backup = outcome.backup.unwrap();
    assert_eq!(backup, f.dir.join("work.yaml-20240229-235959.backup"));
    assert_eq!(std::fs::read(&backup).unwrap(), OLD);
    assert_eq!(std::fs::read(&f.active).unwrap(), NEW);
    assert!(!f.staging.exists());
}

/// A reader polling the active path never sees a partial document
#[test]
fn test_concurrent_reader_never_sees_torn_document() {
    const SIZE: usize = 256 * 1024;
    const ROUNDS: u8 = 40;

    let dir = tempfile::tempdir().unwrap();
    let active = dir.path().join("work.yaml");
    let staging = dir.path().join("work.yaml.update");
    std::fs::write(&active, vec![b'@'; SIZE]).unwrap();

    let done = Arc::new(AtomicBool::new(false));
    let reader = {
        let done = Arc::clone(&done);
        let active = active.clone();
        std::thread::spawn(move || {
            let mut reads = 0usize;
            loop {
                let finished = done.load(Ordering::SeqCst);
                match std::fs::read(&active) {
                    Ok(content) => {
                        assert_eq!(content.len(), SIZE, "torn read");
                        let first = content[0];
                        assert!(content.iter().all(|b| *b == first), "mixed read");
                        reads += 1;
                    }
                    // between the backup and the write rename
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(e) => panic!("unexpected read error: {e}"),
                }
                if finished {
                    break;
                }
            }
            reads
        })
    };

    let engine = SwapEngine::new();
    for round in 0..ROUNDS {
        std::fs::write(&staging, vec![b'a' + (round % 26); SIZE]).unwrap();
        engine.promote("work", &staging, &active).unwrap();
    }

    done.store(true, Ordering::SeqCst);
    let reads = reader.join().unwrap();
    assert!(reads > 0);
    assert_eq!(
        std::fs::read(&active).unwrap()[0],
        b'a' + ((ROUNDS - 1) % 26)
    );
}
