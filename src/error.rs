//! Unified error handling for the subkeeper crate
//!
//! Each stage keeps its own error type (see [`crate::utils::error`]). This
//! module wraps them into a single [`Error`] for callers that cross module
//! boundaries, such as the manager and the CLI.
//!
//! - [`SubkeeperErrorTrait`]: common interface implemented by all error types
//! - [`ErrorCategory`]: classification of errors for handling strategies
//! - [`Error`]: unified error enum wrapping all domain-specific errors

use std::fmt;
use std::io;
use thiserror::Error;

pub use crate::scheduler::error::SchedulerError;
pub use crate::utils::error::{
    ApplyError, ConfigError, FetchError, PromoteError, UpdateError, ValidationError,
};

/// Common trait for all subkeeper error types
pub trait SubkeeperErrorTrait: std::error::Error {
    /// Check if this error is recoverable (can be retried)
    fn is_recoverable(&self) -> bool;

    /// Get the error category for handling strategies
    fn category(&self) -> ErrorCategory;
}

/// Classification of errors for handling strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Download errors (HTTP, timeout, status)
    Network,
    /// Staged document was rejected
    Validation,
    /// Backup, promote or rollback failed
    Storage,
    /// Proxy engine did not accept the document
    Engine,
    /// Configuration errors
    Config,
    /// Scheduler errors
    Scheduler,
    /// Other/unknown errors
    Other,
}

impl ErrorCategory {
    /// Short label used in logs
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Validation => "validation",
            Self::Storage => "storage",
            Self::Engine => "engine",
            Self::Config => "config",
            Self::Scheduler => "scheduler",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unified error type for the subkeeper crate
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration could not be loaded
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// An update cycle failed
    #[error("Update of '{name}' failed: {source}")]
    Update {
        name: String,
        #[source]
        source: UpdateError,
    },

    /// Scheduler errors
    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    /// Proxy engine rejected or missed the document
    #[error("Apply error: {0}")]
    Apply(#[from] ApplyError),

    /// Subscription name not found in the configuration
    #[error("Unknown subscription '{0}'")]
    UnknownSubscription(String),

    /// No subscription is configured at all
    #[error("No subscription configured")]
    NoSubscription,

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Generic error with context
    #[error("{context}")]
    Other {
        context: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl SubkeeperErrorTrait for FetchError {
    fn is_recoverable(&self) -> bool {
        FetchError::is_recoverable(self)
    }

    fn category(&self) -> ErrorCategory {
        ErrorCategory::Network
    }
}

impl SubkeeperErrorTrait for UpdateError {
    fn is_recoverable(&self) -> bool {
        match self {
            Self::MissingUrl(_) | Self::Validate(_) => false,
            Self::Download(e) => matches!(e, FetchError::MaxRetriesExceeded { .. }),
            Self::Promote(e) => !e.lost_active_document(),
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::MissingUrl(_) => ErrorCategory::Config,
            Self::Download(_) => ErrorCategory::Network,
            Self::Validate(_) => ErrorCategory::Validation,
            Self::Promote(_) => ErrorCategory::Storage,
        }
    }
}

impl SubkeeperErrorTrait for Error {
    fn is_recoverable(&self) -> bool {
        match self {
            // a later cycle may succeed where this one did not
            Self::Update { source, .. } => source.is_recoverable(),
            Self::Scheduler(e) => e.is_recoverable(),
            Self::Apply(e) => matches!(e, ApplyError::Http(_)),
            Self::Io(_) => true,
            Self::Config(_)
            | Self::UnknownSubscription(_)
            | Self::NoSubscription
            | Self::Other { .. } => false,
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Config(_) | Self::UnknownSubscription(_) | Self::NoSubscription => {
                ErrorCategory::Config
            }
            Self::Update { source, .. } => source.category(),
            Self::Scheduler(_) => ErrorCategory::Scheduler,
            Self::Apply(_) => ErrorCategory::Engine,
            Self::Io(_) => ErrorCategory::Storage,
            Self::Other { .. } => ErrorCategory::Other,
        }
    }
}

impl Error {
    /// Wrap an update failure with the subscription name
    pub fn update(name: impl Into<String>, source: UpdateError) -> Self {
        Self::Update {
            name: name.into(),
            source,
        }
    }

    /// Create a generic error with context and source
    pub fn with_source(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Other {
            context: context.into(),
            source: Some(Box::new(source)),
        }
    }
}

/// Result type alias using the unified Error
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_error_category() {
        let err = Error::update("work", UpdateError::from(FetchError::Status(410)));
        assert_eq!(err.category(), ErrorCategory::Network);
        assert!(!err.is_recoverable());
        assert!(err.to_string().contains("work"));

        let err = Error::update(
            "work",
            UpdateError::from(ValidationError::Rejected("empty".into())),
        );
        assert_eq!(err.category(), ErrorCategory::Validation);
    }

    #[test]
    fn test_exhausted_download_is_recoverable() {
        let err = UpdateError::from(FetchError::MaxRetriesExceeded {
            attempts: 10,
            last: Box::new(FetchError::Timeout),
        });
        assert!(SubkeeperErrorTrait::is_recoverable(&err));
    }

    #[test]
    fn test_config_errors_are_fatal() {
        let err = Error::UnknownSubscription("nope".into());
        assert!(!err.is_recoverable());
        assert_eq!(err.category(), ErrorCategory::Config);
        assert_eq!(err.category().to_string(), "config");
    }

    #[test]
    fn test_with_source() {
        let err = Error::with_source("loading home", io::Error::from(io::ErrorKind::NotFound));
        assert_eq!(err.to_string(), "loading home");
        assert!(std::error::Error::source(&err).is_some());
    }
}
