//! Common test utilities

#![allow(dead_code)]

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use subkeeper::config::{Config, FetchConfig, Home};
use subkeeper::engine::ConfigApplier;
use subkeeper::manager::SubscriptionManager;
use subkeeper::subscribe::{SubscriptionFetcher, SubscriptionUpdater, YamlDocumentValidator};
use subkeeper::utils::error::ApplyError;
use subkeeper::utils::retry::RetryPolicy;
use tempfile::TempDir;

/// A small document the validator accepts
pub const VALID_DOC: &str = "mixed-port: 7890\nproxies:\n  - { name: a, type: ss, server: 1.2.3.4, port: 443 }\nrules:\n  - MATCH,DIRECT\n";

/// Valid document tagged with a version so tests can tell them apart
pub fn versioned_doc(version: u32) -> String {
    format!("# version {version}\n{VALID_DOC}")
}

/// Retry policy with millisecond backoff
pub fn fast_policy(attempts: u32) -> RetryPolicy {
    RetryPolicy::with_delays(attempts, Duration::from_millis(1), Duration::from_millis(5))
}

/// Fetcher with the default transport and a fast retry policy
pub fn fast_fetcher(attempts: u32) -> SubscriptionFetcher {
    SubscriptionFetcher::with_policy(&FetchConfig::default(), fast_policy(attempts)).unwrap()
}

/// Fresh home directory with an empty `subscribe/`
pub fn temp_home() -> (TempDir, Home) {
    let dir = tempfile::tempdir().unwrap();
    let home = Home::new(dir.path());
    std::fs::create_dir_all(home.subscribe_dir()).unwrap();
    (dir, home)
}

/// Updater over `home` with the YAML validator and a fast fetcher
pub fn fast_updater(home: &Home, attempts: u32) -> SubscriptionUpdater {
    SubscriptionUpdater::new(
        home.clone(),
        fast_fetcher(attempts),
        Arc::new(YamlDocumentValidator),
    )
}

/// Manager over `home` built from `yaml`, recording every apply
pub fn manager_with(
    home: &Home,
    yaml: &str,
) -> (SubscriptionManager, Arc<RecordingApplier>) {
    let config = Config::from_yaml_str(yaml).unwrap();
    let applier = Arc::new(RecordingApplier::default());
    let manager = SubscriptionManager::new(config, fast_updater(home, 3), applier.clone());
    (manager, applier)
}

/// Applier that remembers every applied path
#[derive(Debug, Default)]
pub struct RecordingApplier {
    applied: Mutex<Vec<PathBuf>>,
}

impl RecordingApplier {
    pub fn applied(&self) -> Vec<PathBuf> {
        self.applied.lock().unwrap().clone()
    }
}

#[async_trait]
impl ConfigApplier for RecordingApplier {
    async fn apply(&self, path: &Path) -> Result<(), ApplyError> {
        self.applied.lock().unwrap().push(path.to_path_buf());
        Ok(())
    }
}

/// Modification time of `path`
pub fn mtime(path: &Path) -> std::time::SystemTime {
    std::fs::metadata(path).unwrap().modified().unwrap()
}
