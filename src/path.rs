// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Path resolution utilities.
//!
//! Determine relevent path information for external files that need to be
//! interacted with, or managed in some way.

use std::path::PathBuf;

/// Determine absolute path to user's home directory.
///
/// Does not check if the path returned actually exists.
///
/// # Errors
///
/// - Return [`NoWayHome`] if home directory path cannot be determined.
pub fn home_dir() -> Result<PathBuf> {
    dirs::home_dir().ok_or(NoWayHome)
}

/// Determine default absolute path to the configuration file.
///
/// Uses XDG Base Directory path `$XDG_CONFIG_HOME/oxidrift/config.toml` as
/// the default absolute path. Does not check if the path returned actually
/// exists.
///
/// # Errors
///
/// - Return [`NoWayHome`] if home directory path cannot be determined.
///
/// # See Also
///
/// - [XDG Base Directory](https://wiki.archlinux.org/title/XDG_Base_Directory)
pub fn default_config_file() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|path| path.join("oxidrift").join("config.toml"))
        .ok_or(NoWayHome)
}

/// Determine default absolute path to the schema catalog file.
///
/// Uses XDG Base Directory path `$XDG_DATA_HOME/oxidrift/catalog.toml` as the
/// default absolute path. Does not check if the path returned actually
/// exists.
///
/// # Errors
///
/// - Return [`NoWayHome`] if home directory path cannot be determined.
pub fn default_catalog_file() -> Result<PathBuf> {
    dirs::data_dir()
        .map(|path| path.join("oxidrift").join("catalog.toml"))
        .ok_or(NoWayHome)
}

/// Determine default absolute path to the admin session store file.
///
/// Uses XDG Base Directory path `$XDG_DATA_HOME/oxidrift/session.json` as the
/// default absolute path. Does not check if the path returned actually
/// exists.
///
/// # Errors
///
/// - Return [`NoWayHome`] if home directory path cannot be determined.
pub fn default_session_store() -> Result<PathBuf> {
    dirs::data_dir()
        .map(|path| path.join("oxidrift").join("session.json"))
        .ok_or(NoWayHome)
}

/// Determine absolute path to the office suite's registry write sentinel.
///
/// The office suite bridges its registry writes onto the settings bus only
/// while `libreoffice/dconfwrite` exists under the user configuration
/// directory. Does not check if the path returned actually exists.
///
/// # Errors
///
/// - Return [`NoWayHome`] if home directory path cannot be determined.
pub fn registry_sentinel_file() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|path| path.join("libreoffice").join("dconfwrite"))
        .ok_or(NoWayHome)
}

/// No way to determine user's home directory.
///
/// # See Also
///
/// - [`dirs::home_dir`](https://docs.rs/dirs/latest/dirs/fn.home_dir.html)
#[derive(Clone, Debug, thiserror::Error)]
#[error("cannot determine absolute path to user's home directory")]
pub struct NoWayHome;

/// Friendly result alias :3
pub type Result<T, E = NoWayHome> = std::result::Result<T, E>;
