// Core data structures for subscription management

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One configured remote source, as listed in `config.yaml`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Subscription {
    /// Display name; derived from the url basename when empty
    pub name: String,

    /// Update link
    pub url: String,

    /// HTTP method used for updates (empty means GET)
    #[serde(skip_serializing_if = "String::is_empty")]
    pub method: String,

    /// Request headers as `key=value` entries; the value may be omitted
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub headers: Vec<String>,

    /// Request body, only sent with non-GET methods
    #[serde(skip_serializing_if = "String::is_empty")]
    pub body: String,

    /// Standard five-field cron expression; empty means never auto-updated
    #[serde(skip_serializing_if = "String::is_empty")]
    pub cron: String,

    /// Modification time of the active document, recovered at load time
    #[serde(skip)]
    pub last_updated: Option<DateTime<Local>>,
}

impl Subscription {
    /// Create a subscription with a name and url
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            ..Default::default()
        }
    }

    /// Set the cron expression
    pub fn with_cron(mut self, cron: impl Into<String>) -> Self {
        self.cron = cron.into();
        self
    }

    /// Set the HTTP method and body
    pub fn with_request(mut self, method: impl Into<String>, body: impl Into<String>) -> Self {
        self.method = method.into();
        self.body = body.into();
        self
    }

    /// Add a `key=value` header entry
    pub fn with_header(mut self, header: impl Into<String>) -> Self {
        self.headers.push(header.into());
        self
    }

    /// Fill in the name from the url if it was left empty
    pub fn normalize(&mut self) {
        if self.name.trim().is_empty() && !self.url.is_empty() {
            if let Some(name) = derive_name(&self.url) {
                self.name = name;
            }
        }
        self.name = self.name.trim().to_string();
    }

    /// Case-insensitive name comparison
    pub fn is_named(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }

    /// Whether the subscription takes part in periodic updates
    pub fn is_periodic(&self) -> bool {
        !self.url.trim().is_empty() && !self.cron.trim().is_empty()
    }
}

/// Derive a display name from the last path segment of a url.
///
/// Query string and fragment are ignored, so `https://h/a/sub.yaml?token=x`
/// and `https://h/a/sub.yaml` both yield `sub.yaml`. A url without a path
/// falls back to its host.
pub fn derive_name(url: &str) -> Option<String> {
    if let Ok(parsed) = url::Url::parse(url) {
        let segment = parsed
            .path_segments()
            .and_then(|mut segments| segments.rfind(|s| !s.is_empty()))
            .map(str::to_string);
        return segment.or_else(|| parsed.host_str().map(str::to_string));
    }

    let base = url.split(['?', '#']).next().unwrap_or_default();
    base.trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Stage of an update cycle, carried on every log line and failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateStage {
    Download,
    Validate,
    Backup,
    Write,
    Rollback,
    Complete,
}

impl UpdateStage {
    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Download => "download",
            Self::Validate => "validate",
            Self::Backup => "backup",
            Self::Write => "write",
            Self::Rollback => "rollback",
            Self::Complete => "complete",
        }
    }
}

impl fmt::Display for UpdateStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a successful update cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateReport {
    /// Subscription name
    pub name: String,

    /// Path of the new active document
    pub active: std::path::PathBuf,

    /// Where the previous document was moved, if there was one
    pub backup: Option<std::path::PathBuf>,

    /// Completion time
    pub finished_at: DateTime<Local>,
}
