use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use lettre::Address;
use serde::Deserialize;

use crate::error::{Error, Result};

pub const DEFAULT_ERROR_LOG: &str = "error_log.txt";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub feeds: Vec<FeedConfig>,
    /// Per-source fetch timeout in seconds
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,
    #[serde(default)]
    pub on_fetch_error: FetchPolicy,
    #[serde(default = "default_error_log")]
    pub error_log: PathBuf,
    /// Also push fatal run errors through the notifier
    #[serde(default)]
    pub notify_on_error: bool,
    #[serde(default)]
    pub state: StateConfig,
    pub mail: Option<MailConfig>,
}

fn default_fetch_timeout() -> u64 {
    30
}

fn default_error_log() -> PathBuf {
    PathBuf::from(DEFAULT_ERROR_LOG)
}

#[derive(Debug, Deserialize, Clone)]
pub struct FeedConfig {
    pub url: String,
}

/// What a run does when some sources fail to fetch.
#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FetchPolicy {
    /// Abort the whole run; nothing is committed or notified
    #[default]
    Abort,
    /// Carry on with the sources that succeeded
    Skip,
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StateBackend {
    #[default]
    Sqlite,
    File,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StateConfig {
    #[serde(default)]
    pub backend: StateBackend,
    #[serde(default = "default_state_path")]
    pub path: PathBuf,
}

fn default_state_path() -> PathBuf {
    PathBuf::from("data/rss_feeds.sqlite3")
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            backend: StateBackend::default(),
            path: default_state_path(),
        }
    }
}

#[derive(Deserialize, Clone)]
pub struct MailConfig {
    pub host: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    pub username: String,
    pub password: String,
    #[serde(default = "default_subject")]
    pub subject: String,
    #[serde(default = "default_error_subject")]
    pub error_subject: String,
    pub sender: Recipient,
    pub recipients: Vec<Recipient>,
}

fn default_smtp_port() -> u16 {
    587
}

fn default_subject() -> String {
    "Feed(s) Updated".to_string()
}

fn default_error_subject() -> String {
    "Feed Update Error".to_string()
}

// Keeps the SMTP password out of logs and error output.
impl fmt::Debug for MailConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MailConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("subject", &self.subject)
            .field("error_subject", &self.error_subject)
            .field("sender", &self.sender)
            .field("recipients", &self.recipients)
            .finish()
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct Recipient {
    pub name: String,
    pub email: String,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_str(&content)
    }

    /// Parse config from a TOML string (useful for testing)
    pub fn from_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if let Some(index) = self.feeds.iter().position(|f| f.url.trim().is_empty()) {
            return Err(Error::config(format!("feed #{} has an empty url", index + 1)));
        }
        if self.fetch_timeout_secs == 0 {
            return Err(Error::config("fetch_timeout_secs must be positive"));
        }
        if let Some(mail) = &self.mail {
            if mail.port == 0 {
                return Err(Error::config("mail.port must be non-zero"));
            }
            if mail.recipients.is_empty() {
                return Err(Error::config("mail.recipients must list at least one recipient"));
            }
            for mailbox in std::iter::once(&mail.sender).chain(&mail.recipients) {
                if let Err(e) = mailbox.email.parse::<Address>() {
                    return Err(Error::config(format!(
                        "invalid email address '{}': {}",
                        mailbox.email, e
                    )));
                }
            }
        }
        Ok(())
    }

    /// Feed source URLs in configuration order.
    pub fn sources(&self) -> Vec<&str> {
        self.feeds.iter().map(|f| f.url.as_str()).collect()
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn recipients(&self) -> &[Recipient] {
        self.mail
            .as_ref()
            .map(|m| m.recipients.as_slice())
            .unwrap_or_default()
    }
}
