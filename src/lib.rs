//! RSS Update Notifier
//!
//! Polls a set of syndication feeds once per invocation, detects which
//! feeds have a new latest entry since the previous run, persists the
//! latest-seen state and sends a single notification summarizing the changes.

pub mod config;
pub mod db;
pub mod diagnostics;
pub mod error;
pub mod feed;
pub mod fetcher;
pub mod notifier;
pub mod reconcile;
pub mod runner;
pub mod snapshot;
pub mod store;

pub use error::{Error, Result};
