// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Admin session persistence.
//!
//! The admin front end is a CLI, so collecting changes, selecting them, and
//! assembling a profile happen in separate process invocations. The
//! [`SessionStore`] carries the collector registry across those invocations
//! as one JSON file, `$XDG_DATA_HOME/oxidrift/session.json` by default.
//!
//! A missing store file is not an error: it simply means a fresh session.
//!
//! # See Also
//!
//! - [`crate::collector`]
//! - [`crate::path`]

use crate::collector::CollectorRegistry;

use std::path::{Path, PathBuf};
use tracing::debug;

/// Collector registry persistence at a fixed file path.
pub struct SessionStore {
    store_path: PathBuf,
}

impl SessionStore {
    /// Construct new session store over the given file path.
    pub fn new(store_path: impl Into<PathBuf>) -> Self {
        Self {
            store_path: store_path.into(),
        }
    }

    /// Path the session store reads and writes.
    pub fn path(&self) -> &Path {
        &self.store_path
    }

    /// Load the persisted collector registry, or a fresh one if the store
    /// file does not exist yet.
    ///
    /// # Errors
    ///
    /// - Return [`Error::ReadStore`] if the store file exists but cannot be
    ///   read.
    /// - Return [`Error::DecodeStore`] if the store file holds no valid
    ///   registry.
    pub fn load(&self) -> Result<CollectorRegistry> {
        if !self.store_path.exists() {
            debug!("no session store at {:?}, starting fresh", self.store_path.display());
            return Ok(CollectorRegistry::new());
        }

        let data = std::fs::read_to_string(&self.store_path).map_err(|source| Error::ReadStore {
            source,
            store_path: self.store_path.clone(),
        })?;

        serde_json::from_str(&data).map_err(|source| Error::DecodeStore {
            source,
            store_path: self.store_path.clone(),
        })
    }

    /// Persist the collector registry, creating parent directories as
    /// needed.
    ///
    /// # Errors
    ///
    /// - Return [`Error::EncodeStore`] if the registry cannot be serialized.
    /// - Return [`Error::WriteStore`] if the store file cannot be written.
    pub fn save(&self, registry: &CollectorRegistry) -> Result<()> {
        let data =
            serde_json::to_string_pretty(registry).map_err(|source| Error::EncodeStore { source })?;

        if let Some(parent) = self.store_path.parent() {
            mkdirp::mkdirp(parent).map_err(|source| Error::WriteStore {
                source,
                store_path: self.store_path.clone(),
            })?;
        }

        std::fs::write(&self.store_path, data).map_err(|source| Error::WriteStore {
            source,
            store_path: self.store_path.clone(),
        })
    }
}

/// Session store error types.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Store file cannot be read from.
    #[error("failed to read session store at {:?}", store_path.display())]
    ReadStore {
        #[source]
        source: std::io::Error,
        store_path: PathBuf,
    },

    /// Store file cannot be written to.
    #[error("failed to write session store at {:?}", store_path.display())]
    WriteStore {
        #[source]
        source: std::io::Error,
        store_path: PathBuf,
    },

    /// Store file holds no valid collector registry.
    #[error("failed to decode session store at {:?}", store_path.display())]
    DecodeStore {
        #[source]
        source: serde_json::Error,
        store_path: PathBuf,
    },

    /// Collector registry cannot be serialized.
    #[error("failed to encode session store")]
    EncodeStore {
        #[source]
        source: serde_json::Error,
    },
}

/// Friendly result alias :3
pub type Result<T, E = Error> = std::result::Result<T, E>;
