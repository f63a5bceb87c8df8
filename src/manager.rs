//! Subscription manager
//!
//! Ties configuration, the update pipeline, the scheduler and the proxy
//! engine together:
//!
//! 1. bootstrap: make sure the current subscription has a valid active
//!    document, then publish it
//! 2. run the scheduler until shutdown, re-publishing whenever the current
//!    subscription is promoted

use async_trait::async_trait;
use chrono::{DateTime, Local};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::{Config, Home};
use crate::engine::{self, ConfigApplier, Publisher};
use crate::error::{Error, Result};
use crate::models::{Subscription, UpdateReport};
use crate::preset::Presets;
use crate::scheduler::{expression, Scheduler, SchedulerError, UpdateDispatcher};
use crate::shutdown::ShutdownListener;
use crate::subscribe::{SubscriptionUpdater, YamlDocumentValidator};
use crate::utils::error::UpdateError;

/// Row of the `list` command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionStatus {
    pub name: String,
    pub current: bool,
    pub cron: String,
    pub last_updated: Option<DateTime<Local>>,
    pub next_due: Option<DateTime<Local>>,
}

/// Owns the configuration and every component acting on it
pub struct SubscriptionManager {
    config: Config,
    updater: SubscriptionUpdater,
    publisher: Publisher,
}

impl SubscriptionManager {
    /// Assemble a manager from its parts, without presets
    pub fn new(
        config: Config,
        updater: SubscriptionUpdater,
        applier: Arc<dyn ConfigApplier>,
    ) -> Self {
        let publisher = Publisher::new(applier, updater.home().applied_path());
        Self {
            config,
            updater,
            publisher,
        }
    }

    /// Lay `presets` over every document handed to the engine
    pub fn with_presets(mut self, presets: Presets) -> Self {
        self.publisher = self.publisher.with_presets(presets);
        self
    }

    /// Load `config.yaml` and the presets from `home` and build the default components
    pub fn from_home(home: Home) -> Result<Self> {
        let config = Config::load(&home)?;
        let presets = Presets::load(&home)?;
        let updater =
            SubscriptionUpdater::from_config(home, &config, Arc::new(YamlDocumentValidator))
                .map_err(|e| Error::with_source("Failed to create HTTP client", e))?;
        let applier = engine::applier_for(config.controller.as_ref())?;

        Ok(Self::new(config, updater, applier).with_presets(presets))
    }

    /// Loaded configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Home directory
    pub fn home(&self) -> &Home {
        self.updater.home()
    }

    fn current(&self) -> Result<&Subscription> {
        self.config.current_subscription().ok_or(Error::NoSubscription)
    }

    /// Ensure the current subscription has a valid active document, then publish it
    ///
    /// Runs an update first when the document is missing. Any failure here is
    /// fatal to the caller.
    pub async fn bootstrap(&self, shutdown: &mut ShutdownListener) -> Result<PathBuf> {
        let current = self.current()?;
        let active = self.home().active_path(&current.name);

        if tokio::fs::try_exists(&active).await? {
            self.updater
                .validate(&active)
                .await
                .map_err(|e| Error::update(&current.name, UpdateError::Validate(e)))?;
            info!(subscription = %current.name, "Using existing active document");
        } else {
            info!(subscription = %current.name, "No active document, running bootstrap update");
            self.updater
                .update(current, shutdown)
                .await
                .map_err(|e| Error::update(&current.name, e))?;
        }

        self.publisher.publish(&active).await?;
        Ok(active)
    }

    /// Update one subscription now; `None` means the current one
    ///
    /// The document is re-published when the updated subscription is the current one.
    pub async fn update_now(
        &self,
        name: Option<&str>,
        shutdown: &mut ShutdownListener,
    ) -> Result<UpdateReport> {
        let subscription = match name {
            Some(name) => self
                .config
                .find(name)
                .ok_or_else(|| Error::UnknownSubscription(name.to_string()))?,
            None => self.current()?,
        };

        let report = self
            .updater
            .update(subscription, shutdown)
            .await
            .map_err(|e| Error::update(&subscription.name, e))?;

        if subscription.is_named(&self.config.current) {
            self.publisher.publish(&report.active).await?;
        }
        Ok(report)
    }

    /// Per-subscription summary as of `now`
    pub fn status(&self, now: DateTime<Local>) -> Vec<SubscriptionStatus> {
        self.config
            .subscribe
            .iter()
            .map(|subscription| {
                let next_due = if subscription.is_periodic() {
                    expression::compile(&subscription.cron)
                        .ok()
                        .and_then(|schedule| expression::next_after(&schedule, now))
                } else {
                    None
                };

                SubscriptionStatus {
                    name: subscription.name.clone(),
                    current: subscription.is_named(&self.config.current),
                    cron: subscription.cron.clone(),
                    last_updated: subscription.last_updated,
                    next_due,
                }
            })
            .collect()
    }

    /// Bootstrap, then run the scheduler until shutdown
    pub async fn run(self, mut shutdown: ShutdownListener) -> Result<()> {
        self.bootstrap(&mut shutdown).await?;

        let scheduler = Scheduler::new(self.config.subscribe.iter().cloned())?;
        if scheduler.is_empty() {
            info!("No subscription has a cron expression, waiting for shutdown");
            shutdown.recv().await;
            return Ok(());
        }

        let dispatcher = Arc::new(ManagedDispatcher {
            updater: self.updater,
            publisher: self.publisher,
            current: self.config.current,
        });

        tokio::spawn(scheduler.run(dispatcher, shutdown))
            .await
            .map_err(|e| SchedulerError::TaskFailed {
                reason: e.to_string(),
            })??;
        Ok(())
    }
}

/// Runs scheduled cycles and re-publishes the current subscription
struct ManagedDispatcher {
    updater: SubscriptionUpdater,
    publisher: Publisher,
    current: String,
}

#[async_trait]
impl UpdateDispatcher for ManagedDispatcher {
    async fn update(&self, subscription: Subscription, mut shutdown: ShutdownListener) -> bool {
        // failures are logged by the updater with their stage
        let Ok(report) = self.updater.update(&subscription, &mut shutdown).await else {
            return false;
        };

        if subscription.is_named(&self.current) {
            if let Err(e) = self.publisher.publish(&report.active).await {
                warn!(
                    subscription = %subscription.name,
                    error = %e,
                    "Failed to apply updated document"
                );
            }
        }
        true
    }
}
