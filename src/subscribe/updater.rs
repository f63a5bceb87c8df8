//! One update cycle: download → validate → promote
//!
//! Every stage logs a line carrying the subscription name and the stage. A
//! failed download or validation removes the staging file and leaves the
//! active document untouched. A failed promotion leaves the staging file in
//! place for inspection.

use chrono::Local;
use std::io;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::fetcher::SubscriptionFetcher;
use super::swap::SwapEngine;
use super::validator::DocumentValidator;
use crate::config::{Config, Home};
use crate::models::{Subscription, UpdateReport, UpdateStage};
use crate::shutdown::ShutdownListener;
use crate::utils::error::{FetchError, UpdateError, ValidationError};

/// Runs update cycles against one home directory
#[derive(Clone)]
pub struct SubscriptionUpdater {
    home: Home,
    fetcher: SubscriptionFetcher,
    validator: Arc<dyn DocumentValidator>,
    swap: SwapEngine,
    backup_keep: Option<usize>,
}

impl SubscriptionUpdater {
    /// Create an updater
    pub fn new(
        home: Home,
        fetcher: SubscriptionFetcher,
        validator: Arc<dyn DocumentValidator>,
    ) -> Self {
        Self {
            home,
            fetcher,
            validator,
            swap: SwapEngine::new(),
            backup_keep: None,
        }
    }

    /// Create an updater using the `fetch` and `backup` sections of `config`
    pub fn from_config(
        home: Home,
        config: &Config,
        validator: Arc<dyn DocumentValidator>,
    ) -> Result<Self, FetchError> {
        let fetcher = SubscriptionFetcher::new(&config.fetch)?;
        Ok(Self::new(home, fetcher, validator).with_backup_keep(config.backup.keep))
    }

    /// Keep at most `keep` backups per subscription; `None` keeps all
    pub fn with_backup_keep(mut self, keep: Option<usize>) -> Self {
        self.backup_keep = keep;
        self
    }

    /// Home directory this updater writes to
    pub fn home(&self) -> &Home {
        &self.home
    }

    /// Run one update cycle for `subscription`
    pub async fn update(
        &self,
        subscription: &Subscription,
        shutdown: &mut ShutdownListener,
    ) -> Result<UpdateReport, UpdateError> {
        let result = self.run_cycle(subscription, shutdown).await;
        if let Err(e) = &result {
            error!(
                subscription = %subscription.name,
                stage = %e.stage(),
                error = %e,
                "Update failed"
            );
        }
        result
    }

    async fn run_cycle(
        &self,
        subscription: &Subscription,
        shutdown: &mut ShutdownListener,
    ) -> Result<UpdateReport, UpdateError> {
        let name = subscription.name.as_str();
        if subscription.url.trim().is_empty() {
            return Err(UpdateError::MissingUrl(name.to_string()));
        }

        let staging = self.home.staging_path(name);
        let active = self.home.active_path(name);

        info!(subscription = %name, stage = %UpdateStage::Download, "Starting update");
        if let Err(e) = self
            .fetcher
            .fetch_subscription(subscription, &staging, shutdown)
            .await
        {
            discard_staging(name, &staging).await;
            return Err(e.into());
        }

        info!(subscription = %name, stage = %UpdateStage::Validate, "Validating document");
        if let Err(e) = self.validate(&staging).await {
            discard_staging(name, &staging).await;
            return Err(e.into());
        }

        let outcome = self.swap.promote(name, &staging, &active)?;

        if let Some(keep) = self.backup_keep {
            self.prune_backups(name, keep);
        }

        info!(
            subscription = %name,
            stage = %UpdateStage::Complete,
            active = %active.display(),
            "Update complete"
        );

        Ok(UpdateReport {
            name: name.to_string(),
            active,
            backup: outcome.backup,
            finished_at: Local::now(),
        })
    }

    /// Run the validator over `path` off the async runtime
    pub async fn validate(&self, path: &Path) -> Result<(), ValidationError> {
        let validator = Arc::clone(&self.validator);
        let path = path.to_path_buf();

        tokio::task::spawn_blocking(move || validator.validate(&path))
            .await
            .unwrap_or_else(|e| {
                Err(ValidationError::Rejected(format!(
                    "validator task failed: {e}"
                )))
            })
    }

    /// Delete the oldest backups beyond `keep`
    fn prune_backups(&self, name: &str, keep: usize) {
        let backups = match self.home.list_backups(name) {
            Ok(backups) => backups,
            Err(e) => {
                warn!(subscription = %name, error = %e, "Failed to list backups");
                return;
            }
        };

        let excess = backups.len().saturating_sub(keep);
        for backup in backups.iter().take(excess) {
            match std::fs::remove_file(backup) {
                Ok(()) => debug!(subscription = %name, backup = %backup.display(), "Pruned backup"),
                Err(e) => warn!(
                    subscription = %name,
                    backup = %backup.display(),
                    error = %e,
                    "Failed to prune backup"
                ),
            }
        }
    }
}

async fn discard_staging(name: &str, staging: &Path) {
    match tokio::fs::remove_file(staging).await {
        Ok(()) => debug!(subscription = %name, staging = %staging.display(), "Removed staging file"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(
            subscription = %name,
            staging = %staging.display(),
            error = %e,
            "Failed to remove staging file"
        ),
    }
}
