use std::fmt;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors that end (or, for `Notify`, merely degrade) a notifier run.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration is missing, unreadable or invalid
    #[error("Configuration error: {0}")]
    Config(String),

    /// One or more feed sources could not be fetched
    #[error("{0}")]
    Fetch(FetchFailures),

    /// A fetched document lacks a feed title or has no usable latest entry
    #[error("Malformed feed from {url}: {reason}")]
    MalformedFeed { url: String, reason: String },

    /// Durable state could not be read or written
    #[error("State store error: {0}")]
    StateStore(String),

    /// The notification sink failed to deliver
    #[error("Notification error: {0}")]
    Notify(String),
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn state_store(msg: impl Into<String>) -> Self {
        Self::StateStore(msg.into())
    }

    pub fn notify(msg: impl Into<String>) -> Self {
        Self::Notify(msg.into())
    }

    pub fn malformed(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedFeed {
            url: url.into(),
            reason: reason.into(),
        }
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Self::StateStore(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::StateStore(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(err.to_string())
    }
}

/// Failure of a single source during the fetch phase.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Connection, DNS or TLS failure
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// Non-2xx response
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// No complete response within the per-source timeout
    #[error("Request timed out")]
    Timeout,
    /// Body is not a parseable RSS/Atom/JSON feed
    #[error("Parse error: {0}")]
    Parse(String),
}

/// A source URL paired with the reason its fetch failed.
#[derive(Debug)]
pub struct SourceFailure {
    pub url: String,
    pub error: FetchError,
}

/// Every failed source of one fetch phase, in configuration order.
#[derive(Debug)]
pub struct FetchFailures {
    pub total: usize,
    pub failures: Vec<SourceFailure>,
}

impl fmt::Display for FetchFailures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} of {} feed(s) failed to fetch",
            self.failures.len(),
            self.total
        )?;
        for failure in &self.failures {
            write!(f, "; {}: {}", failure.url, failure.error)?;
        }
        Ok(())
    }
}
