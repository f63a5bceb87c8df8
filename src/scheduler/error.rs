//! Error types for the scheduler module

use std::fmt;

/// Result type for scheduler operations
pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// Scheduler-specific errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    /// Cron expression is empty
    EmptyExpression,

    /// Cron expression could not be parsed
    InvalidCron { expression: String, reason: String },

    /// Slot index does not exist
    UnknownSlot { index: usize },

    /// Scheduler task ended abnormally
    TaskFailed { reason: String },
}

impl fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyExpression => write!(f, "Cron expression is empty"),
            Self::InvalidCron { expression, reason } => {
                write!(f, "Invalid cron expression '{}': {}", expression, reason)
            }
            Self::UnknownSlot { index } => write!(f, "Unknown schedule slot {}", index),
            Self::TaskFailed { reason } => write!(f, "Scheduler task failed: {}", reason),
        }
    }
}

impl std::error::Error for SchedulerError {}

impl SchedulerError {
    /// Create an invalid cron error
    pub fn invalid_cron(expression: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidCron {
            expression: expression.into(),
            reason: reason.into(),
        }
    }

    /// Check if this error is recoverable
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::TaskFailed { .. })
    }
}
