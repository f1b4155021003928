// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Configuration layout.
//!
//! Specify the layout of the configuration file that Oxidrift reads at
//! startup to simplify the process of serialization and deserialization.
//! File I/O is left to the caller to figure out.

use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Error as FmtError, Formatter, Result as FmtResult},
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

/// Top-level configuration layout.
///
/// Split into two sections: `[session]` drives the change watcher and its
/// delivery queue, `[browsers]` opts browser preference capture in. Every
/// field has a default, so an empty file is a valid configuration.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Config {
    /// Settings for the session watcher.
    #[serde(default)]
    pub session: SessionSettings,

    /// Settings for browser preference capture.
    #[serde(default)]
    pub browsers: BrowserSettings,
}

impl FromStr for Config {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let mut config: Config = toml::de::from_str(data).map_err(ConfigError::Deserialize)?;

        // INVARIANT: Perform shell expansion on all path fields.
        config.session.channel = expand_path(config.session.channel)?;
        config.session.catalog = expand_optional(config.session.catalog)?;
        config.browsers.chromium = expand_optional(config.browsers.chromium)?;
        config.browsers.chrome = expand_optional(config.browsers.chrome)?;
        config.browsers.firefox = expand_optional(config.browsers.firefox)?;
        config.browsers.policy_map = expand_optional(config.browsers.policy_map)?;

        Ok(config)
    }
}

impl Display for Config {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(
            toml::ser::to_string_pretty(self)
                .map_err(ConfigError::Serialize)?
                .as_str(),
        )
    }
}

/// Session watcher settings.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct SessionSettings {
    /// Transport binding used for submissions.
    #[serde(default)]
    pub transport: TransportKind,

    /// Admin endpoint for the http transport.
    #[serde(default = "default_admin_host")]
    pub admin_host: String,

    /// Channel device for the stream transport.
    #[serde(default = "default_channel")]
    pub channel: PathBuf,

    /// Pause between delivery retry rounds, in seconds.
    #[serde(default = "default_retry_secs")]
    pub retry_secs: u64,

    /// Schema catalog file to resolve against. Defaults to the catalog in
    /// the data directory.
    pub catalog: Option<PathBuf>,
}

impl SessionSettings {
    /// Pause between delivery retry rounds.
    pub fn retry(&self) -> Duration {
        Duration::from_secs(self.retry_secs)
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            transport: TransportKind::default(),
            admin_host: default_admin_host(),
            channel: default_channel(),
            retry_secs: default_retry_secs(),
            catalog: None,
        }
    }
}

/// Transport binding selection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// One POST request per delivery attempt.
    #[default]
    Http,

    /// One long-lived framed channel.
    Stream,
}

/// Browser preference capture settings.
///
/// Capture stays off for every browser whose profile directory is left
/// unset.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct BrowserSettings {
    /// Chromium configuration directory, e.g. `~/.config/chromium`.
    pub chromium: Option<PathBuf>,

    /// Chrome configuration directory, e.g. `~/.config/google-chrome`.
    pub chrome: Option<PathBuf>,

    /// Firefox base directory, e.g. `~/.mozilla/firefox`.
    pub firefox: Option<PathBuf>,

    /// Pause between browser file polls, in seconds.
    #[serde(default = "default_poll_secs")]
    pub poll_secs: u64,

    /// Custom preference-to-policy map file. Defaults to the built-in map.
    pub policy_map: Option<PathBuf>,
}

impl BrowserSettings {
    /// Pause between browser file polls.
    pub fn poll(&self) -> Duration {
        Duration::from_secs(self.poll_secs)
    }

    /// Check if capture is off for every browser.
    pub fn is_empty(&self) -> bool {
        self.chromium.is_none() && self.chrome.is_none() && self.firefox.is_none()
    }
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            chromium: None,
            chrome: None,
            firefox: None,
            poll_secs: default_poll_secs(),
            policy_map: None,
        }
    }
}

fn default_admin_host() -> String {
    "localhost:8181".into()
}

fn default_channel() -> PathBuf {
    "/dev/virtio-ports/com.awkless.oxidrift.0".into()
}

fn default_retry_secs() -> u64 {
    5
}

fn default_poll_secs() -> u64 {
    10
}

fn expand_path(path: PathBuf) -> Result<PathBuf> {
    Ok(PathBuf::from(
        shellexpand::full(path.to_string_lossy().as_ref())
            .map_err(ConfigError::ShellExpansion)?
            .into_owned(),
    ))
}

fn expand_optional(path: Option<PathBuf>) -> Result<Option<PathBuf>> {
    path.map(expand_path).transpose()
}

/// Configuration error types.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to deserialize configuration.
    #[error(transparent)]
    Deserialize(#[from] toml::de::Error),

    /// Failed to serialize configuration.
    #[error(transparent)]
    Serialize(#[from] toml::ser::Error),

    /// Failed to perform shell expansion on configuration.
    #[error(transparent)]
    ShellExpansion(#[from] shellexpand::LookupError<std::env::VarError>),
}

impl From<ConfigError> for FmtError {
    fn from(_: ConfigError) -> Self {
        FmtError
    }
}

/// Friendly result alias :3
type Result<T, E = ConfigError> = std::result::Result<T, E>;
