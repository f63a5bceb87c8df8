//! Error types for the subscription pipeline
//!
//! Each stage of an update cycle (download, validation, promotion) has its own
//! error type. [`UpdateError`] ties them together and remembers the stage at
//! which the cycle stopped.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::models::UpdateStage;

/// Errors that can occur while downloading a subscription document
#[derive(Error, Debug)]
pub enum FetchError {
    /// HTTP request error (connection refused, reset, TLS failure, ...)
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Request timeout
    #[error("Request timeout")]
    Timeout,

    /// Server answered with something other than 200
    #[error("Unexpected status: {0}")]
    Status(u16),

    /// Request could not be built (bad method, header or url)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Streaming the body into the staging file failed
    #[error("Failed to write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Attempt budget exhausted
    #[error("Giving up after {attempts} attempts: {last}")]
    MaxRetriesExceeded { attempts: u32, last: Box<FetchError> },

    /// Shutdown requested while the download was in flight
    #[error("Download cancelled")]
    Cancelled,
}

impl FetchError {
    /// Whether another attempt could succeed.
    ///
    /// Status codes up to 404 and server errors are retried; the remaining
    /// client errors (405..=499) are treated as a definitive rejection.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Http(_) | Self::Timeout | Self::Write { .. } => true,
            Self::Status(code) => is_retryable_status(*code),
            Self::InvalidRequest(_) | Self::MaxRetriesExceeded { .. } | Self::Cancelled => false,
        }
    }
}

/// Retryable-status predicate used by the fetcher
pub fn is_retryable_status(status: u16) -> bool {
    status <= 404 || status >= 500
}

/// Errors reported by the document validator
#[derive(Error, Debug)]
pub enum ValidationError {
    /// Staging file could not be read
    #[error("Failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Document is not valid YAML
    #[error("Invalid YAML: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// Document parsed but was rejected
    #[error("Rejected document: {0}")]
    Rejected(String),
}

/// Errors raised while swapping a staged document into place
#[derive(Error, Debug)]
pub enum PromoteError {
    /// Previous document could not be moved aside; nothing changed
    #[error("Backup of {} to {} failed: {source}", .active.display(), .backup.display())]
    Backup {
        active: PathBuf,
        backup: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Final rename failed; `restored` tells whether the previous document is back
    #[error(
        "Rename of {} to {} failed (previous document {}): {source}",
        .staging.display(),
        .active.display(),
        restore_label(.restored)
    )]
    Write {
        staging: PathBuf,
        active: PathBuf,
        restored: bool,
        #[source]
        source: io::Error,
    },

    /// Final rename failed and the backup could not be moved back
    #[error(
        "Rollback of {} to {} failed ({rollback}) after write error: {source}",
        .backup.display(),
        .active.display()
    )]
    RollbackFailed {
        active: PathBuf,
        backup: PathBuf,
        rollback: io::Error,
        #[source]
        source: io::Error,
    },
}

fn restore_label(restored: &bool) -> &'static str {
    if *restored {
        "restored"
    } else {
        "absent"
    }
}

impl PromoteError {
    /// Stage at which the promotion stopped
    pub fn stage(&self) -> UpdateStage {
        match self {
            Self::Backup { .. } => UpdateStage::Backup,
            Self::Write { .. } => UpdateStage::Write,
            Self::RollbackFailed { .. } => UpdateStage::Rollback,
        }
    }

    /// True when the subscription is left without an active document
    pub fn lost_active_document(&self) -> bool {
        matches!(self, Self::RollbackFailed { .. })
    }
}

/// Failure of one fetch → validate → promote cycle
#[derive(Error, Debug)]
pub enum UpdateError {
    /// Subscription has no url to fetch from
    #[error("Subscription '{0}' has no url")]
    MissingUrl(String),

    /// Download stage failed
    #[error("Download failed: {0}")]
    Download(#[from] FetchError),

    /// Validator rejected the staged document
    #[error("Validation failed: {0}")]
    Validate(#[from] ValidationError),

    /// Swap stage failed
    #[error("Promotion failed: {0}")]
    Promote(#[from] PromoteError),
}

impl UpdateError {
    /// Stage at which the cycle stopped
    pub fn stage(&self) -> UpdateStage {
        match self {
            Self::MissingUrl(_) | Self::Download(_) => UpdateStage::Download,
            Self::Validate(_) => UpdateStage::Validate,
            Self::Promote(e) => e.stage(),
        }
    }
}

/// Errors raised while loading `config.yaml`
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Configuration file could not be read
    #[error("Failed to read config file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Configuration file is not valid YAML for the expected shape
    #[error("Failed to parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// Configuration parsed but is inconsistent
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    /// A subscription carries a cron expression that does not parse
    #[error("Invalid cron expression '{expression}' for subscription '{name}': {reason}")]
    InvalidCron {
        name: String,
        expression: String,
        reason: String,
    },
}

/// Errors raised while handing a promoted document to the proxy engine
#[derive(Error, Debug)]
pub enum ApplyError {
    /// Controller could not be reached
    #[error("Controller request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Controller refused the document
    #[error("Controller rejected the document with status {status}: {body}")]
    Rejected { status: u16, body: String },

    /// Controller url is not usable
    #[error("Invalid controller url '{0}'")]
    InvalidUrl(String),

    /// Preset or applied document could not be read or written
    #[error("Failed to access {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Preset or active document is not a YAML mapping
    #[error("Invalid document {}: {reason}", .path.display())]
    Document { path: PathBuf, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_status() {
        assert!(is_retryable_status(301));
        assert!(is_retryable_status(403));
        assert!(is_retryable_status(404));
        assert!(is_retryable_status(500));
        assert!(is_retryable_status(503));

        assert!(!is_retryable_status(405));
        assert!(!is_retryable_status(410));
        assert!(!is_retryable_status(429));
    }

    #[test]
    fn test_update_error_stage() {
        let err = UpdateError::from(FetchError::Status(410));
        assert_eq!(err.stage(), UpdateStage::Download);

        let err = UpdateError::from(ValidationError::Rejected("empty".to_string()));
        assert_eq!(err.stage(), UpdateStage::Validate);

        let err = UpdateError::from(PromoteError::RollbackFailed {
            active: PathBuf::from("a.yaml"),
            backup: PathBuf::from("a.yaml-1.backup"),
            rollback: io::Error::from(io::ErrorKind::NotFound),
            source: io::Error::from(io::ErrorKind::PermissionDenied),
        });
        assert_eq!(err.stage(), UpdateStage::Rollback);
    }

    #[test]
    fn test_write_error_message_mentions_restore() {
        let err = PromoteError::Write {
            staging: PathBuf::from("a.yaml.update"),
            active: PathBuf::from("a.yaml"),
            restored: true,
            source: io::Error::from(io::ErrorKind::PermissionDenied),
        };
        assert!(err.to_string().contains("restored"));
        assert!(!err.lost_active_document());
    }
}
