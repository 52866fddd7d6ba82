//! Daemon configuration.
//!
//! Values come from an optional TOML file and are then overridden by
//! environment variables:
//!
//! ```toml
//! channel_name = "keys"
//!
//! [slack]
//! bot_token = "xoxb-..."
//! app_token = "xapp-..."
//!
//! [timing]
//! overdue_threshold_hours = 48
//! overdue_check_interval_secs = 3600
//! reconnect_backoff_secs = 5
//! ```
//!
//! | variable          | overrides           |
//! |-------------------|---------------------|
//! | `SLACK_BOT_TOKEN` | `slack.bot_token`   |
//! | `SLACK_APP_TOKEN` | `slack.app_token`   |
//! | `CHANNEL_NAME`    | `channel_name`      |

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use keydesk_slack::{SlackConfig, DEFAULT_API_BASE_URL};
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

/// Channel watched when nothing else is configured.
pub const DEFAULT_CHANNEL_NAME: &str = "general";

pub const ENV_BOT_TOKEN: &str = "SLACK_BOT_TOKEN";
pub const ENV_APP_TOKEN: &str = "SLACK_APP_TOKEN";
pub const ENV_CHANNEL_NAME: &str = "CHANNEL_NAME";

// ============================================================================
// Errors
// ============================================================================

/// Configuration loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// A required token is absent from both file and environment.
    #[error("missing {field} (set {env} or add it to the config file)")]
    MissingToken {
        field: &'static str,
        env: &'static str,
    },

    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

// ============================================================================
// Sections
// ============================================================================

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Name of the single channel the bot watches and posts to.
    pub channel_name: String,

    pub slack: SlackSection,

    pub timing: TimingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            channel_name: DEFAULT_CHANNEL_NAME.to_string(),
            slack: SlackSection::default(),
            timing: TimingConfig::default(),
        }
    }
}

/// `[slack]` table.
#[derive(Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SlackSection {
    pub bot_token: Option<String>,
    pub app_token: Option<String>,
    pub api_base_url: Option<String>,
}

impl fmt::Debug for SlackSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlackSection")
            .field("bot_token", &self.bot_token.as_ref().map(|_| "<redacted>"))
            .field("app_token", &self.app_token.as_ref().map(|_| "<redacted>"))
            .field("api_base_url", &self.api_base_url)
            .finish()
    }
}

/// `[timing]` table. All values are whole units to keep the file readable.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TimingConfig {
    /// A loan older than this is overdue.
    pub overdue_threshold_hours: u64,

    /// How often the overdue scan runs.
    pub overdue_check_interval_secs: u64,

    /// Fixed wait between a dropped connection and the next attempt.
    pub reconnect_backoff_secs: u64,

    /// HTTP timeout for Web API calls.
    pub request_timeout_secs: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            overdue_threshold_hours: 48,
            overdue_check_interval_secs: 3600,
            reconnect_backoff_secs: 5,
            request_timeout_secs: 30,
        }
    }
}

impl TimingConfig {
    pub fn overdue_threshold(&self) -> chrono::Duration {
        i64::try_from(self.overdue_threshold_hours)
            .ok()
            .and_then(chrono::Duration::try_hours)
            .unwrap_or(chrono::Duration::MAX)
    }

    pub fn overdue_check_interval(&self) -> Duration {
        Duration::from_secs(self.overdue_check_interval_secs)
    }

    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_secs(self.reconnect_backoff_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

// ============================================================================
// Loading
// ============================================================================

/// Default config file location: `$XDG_CONFIG_HOME/keydesk/config.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("keydesk").join("config.toml"))
}

impl Config {
    /// Parses a TOML document.
    pub fn from_toml(contents: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Reads and parses the file at `path`.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&contents, path)
    }

    /// Loads configuration the way the daemon does at startup.
    ///
    /// An explicit `path` must exist. Without one, the default location is
    /// used if present and defaults otherwise. Environment overrides and
    /// validation run last.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match default_config_path() {
                Some(default) if default.exists() => Self::from_file(&default)?,
                _ => {
                    debug!("No config file found, using defaults");
                    Self::default()
                }
            },
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Applies environment overrides using `lookup` (injectable for tests).
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(token) = non_empty(ENV_BOT_TOKEN) {
            self.slack.bot_token = Some(token);
        }
        if let Some(token) = non_empty(ENV_APP_TOKEN) {
            self.slack.app_token = Some(token);
        }
        if let Some(name) = non_empty(ENV_CHANNEL_NAME) {
            self.channel_name = name;
        }
    }

    /// Checks values that would make the daemon misbehave.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.channel_name.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "channel_name",
                reason: "must not be empty".to_string(),
            });
        }
        let non_zero = [
            ("timing.overdue_threshold_hours", self.timing.overdue_threshold_hours),
            (
                "timing.overdue_check_interval_secs",
                self.timing.overdue_check_interval_secs,
            ),
            ("timing.reconnect_backoff_secs", self.timing.reconnect_backoff_secs),
            ("timing.request_timeout_secs", self.timing.request_timeout_secs),
        ];
        for (field, value) in non_zero {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    field,
                    reason: "must be greater than zero".to_string(),
                });
            }
        }
        Ok(())
    }

    /// Builds the Slack adapter configuration.
    ///
    /// # Errors
    ///
    /// `ConfigError::MissingToken` if either token is unset.
    pub fn slack_config(&self) -> Result<SlackConfig, ConfigError> {
        let bot_token = self.slack.bot_token.clone().ok_or(ConfigError::MissingToken {
            field: "slack.bot_token",
            env: ENV_BOT_TOKEN,
        })?;
        let app_token = self.slack.app_token.clone().ok_or(ConfigError::MissingToken {
            field: "slack.app_token",
            env: ENV_APP_TOKEN,
        })?;

        Ok(SlackConfig {
            bot_token,
            app_token,
            api_base_url: self
                .slack
                .api_base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string()),
            request_timeout: self.timing.request_timeout(),
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
