//! Subscription update pipeline
//!
//! - [`fetcher`]: HTTP download with retry into a staging file
//! - [`headers`]: browser-like request headers
//! - [`validator`]: gate a staged document before it is used
//! - [`swap`]: backup, promote and rollback by rename
//! - [`updater`]: one full cycle over the pieces above

pub mod fetcher;
pub mod headers;
pub mod swap;
pub mod updater;
pub mod validator;

pub use fetcher::SubscriptionFetcher;
pub use swap::{FileOps, PromoteOutcome, StdFileOps, SwapEngine};
pub use updater::SubscriptionUpdater;
pub use validator::{DocumentValidator, YamlDocumentValidator};
