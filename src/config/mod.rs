//! Configuration management
//!
//! This module resolves the home directory layout and loads `config.yaml`,
//! which lists the subscriptions and names the currently selected one.
//!
//! ```text
//! <home>/config.yaml
//! <home>/subscribe/<name>.yaml                      active document
//! <home>/subscribe/<name>.yaml.update               staging file
//! <home>/subscribe/<name>.yaml-<timestamp>.backup   backups
//! <home>/dns.yaml, <home>/general.yaml              optional presets
//! <home>/applied.yaml                               document with presets laid over
//! ```

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::models::Subscription;
use crate::scheduler::expression;
use crate::utils::error::ConfigError;
use crate::utils::retry::RetryPolicy;

/// Configuration file name inside the home directory
pub const CONFIG_FILE: &str = "config.yaml";

/// Directory holding active, staging and backup documents
pub const SUBSCRIBE_DIR: &str = "subscribe";

/// Preset whose `dns` section replaces the subscription's
pub const DNS_PRESET_FILE: &str = "dns.yaml";

/// Preset whose top-level settings replace the subscription's
pub const GENERAL_PRESET_FILE: &str = "general.yaml";

/// Document handed to the engine when presets are present
pub const APPLIED_FILE: &str = "applied.yaml";

/// Environment variable consulted when no home directory is given
pub const HOME_ENV: &str = "CLASH_HOME_DIR";

/// Home directory used when neither flag nor environment provide one
pub const DEFAULT_HOME: &str = "data";

/// Timestamp format embedded in backup file names
pub const BACKUP_TIMESTAMP_FORMAT: &str = "%Y%m%d-%H%M%S";

/// Resolved home directory and every path derived from it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Home {
    root: PathBuf,
}

impl Home {
    /// Use `root` as given
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Make `root` absolute against the current directory
    pub fn resolve(root: impl AsRef<Path>) -> io::Result<Self> {
        Ok(Self::new(std::path::absolute(root.as_ref())?))
    }

    /// Home directory root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `<home>/config.yaml`
    pub fn config_file(&self) -> PathBuf {
        self.root.join(CONFIG_FILE)
    }

    /// `<home>/subscribe`
    pub fn subscribe_dir(&self) -> PathBuf {
        self.root.join(SUBSCRIBE_DIR)
    }

    /// `<home>/dns.yaml`
    pub fn dns_preset_file(&self) -> PathBuf {
        self.root.join(DNS_PRESET_FILE)
    }

    /// `<home>/general.yaml`
    pub fn general_preset_file(&self) -> PathBuf {
        self.root.join(GENERAL_PRESET_FILE)
    }

    /// `<home>/applied.yaml`
    pub fn applied_path(&self) -> PathBuf {
        self.root.join(APPLIED_FILE)
    }

    /// Active document for a subscription
    pub fn active_path(&self, name: &str) -> PathBuf {
        self.subscribe_dir().join(format!("{name}.yaml"))
    }

    /// Staging file for a subscription
    pub fn staging_path(&self, name: &str) -> PathBuf {
        self.subscribe_dir().join(format!("{name}.yaml.update"))
    }

    /// Backup file for a subscription stamped with `at`
    pub fn backup_path(&self, name: &str, at: DateTime<Local>) -> PathBuf {
        backup_path_for(&self.active_path(name), at)
    }

    /// Existing backups for a subscription, oldest first
    pub fn list_backups(&self, name: &str) -> io::Result<Vec<PathBuf>> {
        let prefix = backup_prefix(name);
        let mut backups: Vec<((String, u32), PathBuf)> = Vec::new();

        let entries = match std::fs::read_dir(self.subscribe_dir()) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        for entry in entries {
            let entry = entry?;
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            let key = file_name
                .strip_prefix(&prefix)
                .and_then(|rest| rest.strip_suffix(".backup"))
                .and_then(backup_sort_key);
            if let Some(key) = key {
                backups.push((key, entry.path()));
            }
        }

        backups.sort();
        Ok(backups.into_iter().map(|(_, path)| path).collect())
    }
}

/// `YYYYMMDD-HHMMSS` with an optional `-N` collision suffix.
///
/// Digits and dashes only, so "work.yaml-x" backups never count as "work".
fn backup_sort_key(stamp: &str) -> Option<(String, u32)> {
    if stamp.is_empty() || !stamp.chars().all(|c| c.is_ascii_digit() || c == '-') {
        return None;
    }
    let (date, rest) = stamp.split_once('-')?;
    match rest.split_once('-') {
        Some((time, n)) => Some((format!("{date}-{time}"), n.parse().ok()?)),
        None => Some((stamp.to_string(), 0)),
    }
}

fn backup_prefix(name: &str) -> String {
    format!("{name}.yaml-")
}

/// `<active>-<timestamp>.backup`, next to the active document
pub fn backup_path_for(active: &Path, at: DateTime<Local>) -> PathBuf {
    let mut file_name = active.as_os_str().to_os_string();
    file_name.push(format!("-{}.backup", at.format(BACKUP_TIMESTAMP_FORMAT)));
    PathBuf::from(file_name)
}

/// Main configuration structure, mirrors `config.yaml`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Name of the subscription handed to the proxy engine
    pub current: String,

    /// Configured subscriptions
    pub subscribe: Vec<Subscription>,

    /// Download tuning
    pub fetch: FetchConfig,

    /// Backup retention
    pub backup: BackupConfig,

    /// Proxy engine controller to notify after a promotion
    #[serde(skip_serializing_if = "Option::is_none")]
    pub controller: Option<ControllerConfig>,
}

/// Download tuning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Attempts per download, first one included
    pub max_attempts: u32,

    /// Whole-request timeout per attempt
    pub timeout_secs: u64,

    /// Connection (and TLS handshake) timeout
    pub connect_timeout_secs: u64,

    /// TCP keep-alive interval
    pub keepalive_secs: u64,

    /// Backoff unit; attempt `n` waits `backoff_base_ms * 2^n`
    pub backoff_base_ms: u64,

    /// Backoff ceiling
    pub backoff_max_secs: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            timeout_secs: 10,
            connect_timeout_secs: 5,
            keepalive_secs: 30,
            backoff_base_ms: 1000,
            backoff_max_secs: 15,
        }
    }
}

impl FetchConfig {
    /// Retry policy described by this section
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::with_delays(
            self.max_attempts,
            Duration::from_millis(self.backoff_base_ms),
            Duration::from_secs(self.backoff_max_secs),
        )
    }

    /// Get request timeout as Duration
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Get connect timeout as Duration
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Get keep-alive interval as Duration
    #[must_use]
    pub fn keepalive(&self) -> Duration {
        Duration::from_secs(self.keepalive_secs)
    }
}

/// Backup retention
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    /// Backups kept per subscription; unset keeps all of them
    pub keep: Option<usize>,
}

/// Proxy engine external controller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Base url, e.g. `http://127.0.0.1:9090`
    pub url: String,

    /// Bearer secret
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub secret: String,
}

impl Config {
    /// Load, normalize and validate `<home>/config.yaml`
    pub fn load(home: &Home) -> Result<Self, ConfigError> {
        let path = home.config_file();
        let content =
            std::fs::read_to_string(&path).map_err(|source| ConfigError::Read { path, source })?;

        let mut config = Self::from_yaml_str(&content)?;
        config.recover_last_updated(home);
        Ok(config)
    }

    /// Parse, normalize and validate a YAML document
    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        let mut config: Self = if content.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(content)?
        };

        config.normalize();
        config.validate()?;
        Ok(config)
    }

    /// Derive missing names and resolve the current selection.
    ///
    /// An unknown or empty `current` falls back to the first subscription.
    pub fn normalize(&mut self) {
        for subscription in &mut self.subscribe {
            subscription.normalize();
        }

        let resolved = self
            .find(&self.current)
            .or_else(|| self.subscribe.first())
            .map(|s| s.name.clone());

        if let Some(name) = resolved {
            self.current = name;
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen: Vec<String> = Vec::new();

        for subscription in &self.subscribe {
            let name = &subscription.name;
            if name.is_empty() {
                continue;
            }

            if name == "." || name == ".." || name.contains(['/', '\\']) {
                return Err(ConfigError::Invalid(format!(
                    "subscription name '{name}' is not a valid file name"
                )));
            }

            let folded = name.to_lowercase();
            if seen.contains(&folded) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate subscription name '{name}'"
                )));
            }
            seen.push(folded);

            if !subscription.cron.trim().is_empty() {
                expression::compile(&subscription.cron).map_err(|e| ConfigError::InvalidCron {
                    name: name.clone(),
                    expression: subscription.cron.clone(),
                    reason: e.to_string(),
                })?;
            }
        }

        if self.fetch.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "fetch.max_attempts must be greater than 0".to_string(),
            ));
        }

        if self.backup.keep == Some(0) {
            return Err(ConfigError::Invalid(
                "backup.keep must be greater than 0 when set".to_string(),
            ));
        }

        Ok(())
    }

    /// Find a subscription by case-insensitive name
    pub fn find(&self, name: &str) -> Option<&Subscription> {
        if name.is_empty() {
            return None;
        }
        self.subscribe.iter().find(|s| s.is_named(name))
    }

    /// The currently selected subscription
    pub fn current_subscription(&self) -> Option<&Subscription> {
        self.find(&self.current)
    }

    /// Fill `last_updated` from the mtime of each active document
    pub fn recover_last_updated(&mut self, home: &Home) {
        for subscription in &mut self.subscribe {
            if subscription.name.is_empty() {
                continue;
            }
            subscription.last_updated = std::fs::metadata(home.active_path(&subscription.name))
                .and_then(|meta| meta.modified())
                .ok()
                .map(DateTime::<Local>::from);
        }
    }
}
