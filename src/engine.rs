//! Hand-off of the active document to the proxy engine
//!
//! The proxy engine is an external process. After the current subscription's
//! document changes (and once at startup) a [`Publisher`] lays the local
//! [`Presets`] over it and a [`ConfigApplier`] tells the engine which file to
//! load.

use async_trait::async_trait;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info};

use crate::config::ControllerConfig;
use crate::preset::Presets;
use crate::utils::error::ApplyError;

/// Applies a configuration document to the proxy engine
#[async_trait]
pub trait ConfigApplier: Send + Sync {
    /// Make the engine load the document at `path`
    async fn apply(&self, path: &Path) -> Result<(), ApplyError>;
}

/// Applier used when no controller is configured: records and logs the path
#[derive(Debug, Default)]
pub struct LogApplier {
    last: Mutex<Option<PathBuf>>,
}

impl LogApplier {
    /// Create a new applier
    pub fn new() -> Self {
        Self::default()
    }

    /// Path of the last applied document
    pub fn last_applied(&self) -> Option<PathBuf> {
        self.last.lock().ok().and_then(|last| last.clone())
    }
}

#[async_trait]
impl ConfigApplier for LogApplier {
    async fn apply(&self, path: &Path) -> Result<(), ApplyError> {
        info!(path = %path.display(), "Active document ready for the proxy engine");
        if let Ok(mut last) = self.last.lock() {
            *last = Some(path.to_path_buf());
        }
        Ok(())
    }
}

#[derive(Serialize)]
struct ReloadRequest<'a> {
    path: &'a str,
}

/// Reloads the proxy engine through its external controller
///
/// Sends `PUT {url}/configs?force=true` with `{"path": ...}`, authenticated
/// with the bearer secret when one is configured.
#[derive(Debug, Clone)]
pub struct ControllerApplier {
    client: reqwest::Client,
    endpoint: reqwest::Url,
    secret: String,
}

impl ControllerApplier {
    /// Create an applier for `config`
    pub fn new(config: &ControllerConfig) -> Result<Self, ApplyError> {
        let base = config.url.trim_end_matches('/');
        let endpoint = reqwest::Url::parse(&format!("{base}/configs?force=true"))
            .map_err(|_| ApplyError::InvalidUrl(config.url.clone()))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            endpoint,
            secret: config.secret.clone(),
        })
    }

    /// Full reload url
    pub fn endpoint(&self) -> &reqwest::Url {
        &self.endpoint
    }
}

#[async_trait]
impl ConfigApplier for ControllerApplier {
    async fn apply(&self, path: &Path) -> Result<(), ApplyError> {
        let path_str = path.to_string_lossy();
        debug!(endpoint = %self.endpoint, path = %path_str, "Requesting engine reload");

        let mut request = self
            .client
            .put(self.endpoint.clone())
            .json(&ReloadRequest { path: &path_str });
        if !self.secret.is_empty() {
            request = request.bearer_auth(&self.secret);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApplyError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        info!(path = %path_str, "Proxy engine reloaded");
        Ok(())
    }
}

/// Publishes active documents to the engine
#[derive(Clone)]
pub struct Publisher {
    applier: Arc<dyn ConfigApplier>,
    presets: Presets,
    rendered: PathBuf,
}

impl Publisher {
    /// Publish through `applier`; merged documents are written to `rendered`
    pub fn new(applier: Arc<dyn ConfigApplier>, rendered: impl Into<PathBuf>) -> Self {
        Self {
            applier,
            presets: Presets::default(),
            rendered: rendered.into(),
        }
    }

    /// Lay `presets` over every published document
    pub fn with_presets(mut self, presets: Presets) -> Self {
        self.presets = presets;
        self
    }

    /// Presets in use
    pub fn presets(&self) -> &Presets {
        &self.presets
    }

    /// Hand `active` to the engine, returning the path it was told to load
    ///
    /// Without presets the active document is applied as is.
    pub async fn publish(&self, active: &Path) -> Result<PathBuf, ApplyError> {
        let target = if self.presets.is_empty() {
            active.to_path_buf()
        } else {
            self.presets.render(active, &self.rendered).await?;
            debug!(
                active = %active.display(),
                rendered = %self.rendered.display(),
                "Presets laid over active document"
            );
            self.rendered.clone()
        };

        self.applier.apply(&target).await?;
        Ok(target)
    }
}

/// Applier for `controller`, or a [`LogApplier`] when none is configured
pub fn applier_for(
    controller: Option<&ControllerConfig>,
) -> Result<Arc<dyn ConfigApplier>, ApplyError> {
    Ok(match controller {
        Some(config) => Arc::new(ControllerApplier::new(config)?),
        None => Arc::new(LogApplier::new()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_log_applier_records_path() {
        let applier = LogApplier::new();
        assert!(applier.last_applied().is_none());

        applier.apply(Path::new("/tmp/a.yaml")).await.unwrap();
        assert_eq!(applier.last_applied(), Some(PathBuf::from("/tmp/a.yaml")));
    }

    #[test]
    fn test_controller_endpoint() {
        let applier = ControllerApplier::new(&ControllerConfig {
            url: "http://127.0.0.1:9090/".to_string(),
            secret: String::new(),
        })
        .unwrap();
        assert_eq!(
            applier.endpoint().as_str(),
            "http://127.0.0.1:9090/configs?force=true"
        );
    }

    #[test]
    fn test_controller_rejects_bad_url() {
        let result = ControllerApplier::new(&ControllerConfig {
            url: "not a url".to_string(),
            secret: String::new(),
        });
        assert!(matches!(result, Err(ApplyError::InvalidUrl(_))));
    }
}
