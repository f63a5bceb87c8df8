//! subkeeper - Remote proxy subscription keeper
//!
//! Keeps a set of remotely hosted proxy configuration documents mirrored on
//! disk, refreshes each on its own cron schedule, and swaps a new version into
//! place only after it downloaded completely and passed validation.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`config`] - Home directory layout and `config.yaml`
//! - [`models`] - Core data structures and types
//! - [`subscribe`] - Download, validation and rollback-safe promotion
//! - [`scheduler`] - Cron-driven periodic updates
//! - [`engine`] - Hand-off of the active document to the proxy engine
//! - [`manager`] - Bootstrap and run loop over all of the above
//! - [`shutdown`] - Graceful shutdown signalling
//! - [`utils`] - Error types and retry policy
//!
//! # Example
//!
//! ```no_run
//! use subkeeper::config::Home;
//! use subkeeper::manager::SubscriptionManager;
//! use subkeeper::shutdown::Shutdown;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let home = Home::resolve("data")?;
//!     let manager = SubscriptionManager::from_home(home)?;
//!     let shutdown = Shutdown::new();
//!     manager.run(shutdown.listener()).await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod manager;
pub mod models;
pub mod preset;
pub mod scheduler;
pub mod shutdown;
pub mod subscribe;
pub mod utils;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{Config, Home};
    pub use crate::engine::{ConfigApplier, ControllerApplier, LogApplier, Publisher};
    pub use crate::error::{Error, ErrorCategory, Result, SubkeeperErrorTrait};
    pub use crate::manager::SubscriptionManager;
    pub use crate::models::{Subscription, UpdateReport, UpdateStage};
    pub use crate::preset::Presets;
    pub use crate::scheduler::Scheduler;
    pub use crate::shutdown::{Shutdown, ShutdownListener};
    pub use crate::subscribe::{DocumentValidator, SubscriptionUpdater, YamlDocumentValidator};
}

// Direct re-exports for convenience
pub use models::{Subscription, UpdateReport, UpdateStage};
