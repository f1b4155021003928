// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Schema resolution for observed settings changes.
//!
//! Change notifications from the settings bus carry only a path and a list of
//! changed keys. A change record needs more than that: the schema the path
//! belongs to, the current value, and its type signature. This module turns
//! raw notifications into full records.
//!
//! # Relocatable Guessing
//!
//! A schema installed at a fixed path is a plain table lookup. Relocatable
//! schemas are the hard part: the same schema can be instantiated at any
//! number of paths chosen at runtime, so no table can know them ahead of
//! time. The resolver guesses instead. Every key observed at an unresolved
//! path is accumulated, and the candidate set is every relocatable schema
//! whose declared keys cover the accumulated set. Once exactly one candidate
//! is left, the path resolves to it for the rest of the session. While the
//! candidate set holds zero or several schemas the notification produces no
//! records at all, and keys swallowed that way are never reported
//! retroactively. Deployments prefer losing a handful of early keys over
//! attributing them to the wrong schema.
//!
//! # Side Channel
//!
//! The office suite bridges its registry onto the settings bus under one
//! reserved path prefix. Those entries belong to no schema, so resolution is
//! bypassed for them entirely: values are fetched through the external read
//! path of the bus and their signatures are inferred from the printed text.

use crate::{
    bus::SettingsBus,
    catalog::SchemaCatalog,
    record::{CapturedChange, ChangeRecord, Namespace},
};

use serde_json::Value;
use std::{
    collections::{BTreeSet, HashMap},
    sync::Arc,
};
use tracing::{debug, instrument, warn};

/// Path prefix owned by the office suite's registry bridge.
pub const REGISTRY_PREFIX: &str = "/org/libreoffice/registry";

/// Resolution state of one observed path.
#[derive(Clone, Debug)]
enum PathState {
    /// Still guessing. Holds every key observed at the path so far.
    Unresolved { seen: BTreeSet<String> },

    /// Guessing is over. The path belongs to this schema for good.
    Resolved { schema: String },
}

/// Resolve raw change notifications into change records.
pub struct SchemaResolver<B>
where
    B: SettingsBus,
{
    catalog: Arc<SchemaCatalog>,
    bus: B,
    paths: HashMap<String, PathState>,
}

impl<B> SchemaResolver<B>
where
    B: SettingsBus,
{
    /// Construct new resolver over a shared schema catalog.
    pub fn new(catalog: Arc<SchemaCatalog>, bus: B) -> Self {
        Self {
            catalog,
            bus,
            paths: HashMap::new(),
        }
    }

    /// Resolve one change notification into change records.
    ///
    /// A path that does not end in `/` names a single changed key and its
    /// parent directory; otherwise the path is the directory and
    /// `changed_keys` are key names relative to it. Keys whose current value
    /// cannot be read are skipped with a warning rather than failing the
    /// whole notification.
    #[instrument(skip(self), level = "debug")]
    pub fn observe(&mut self, path: &str, changed_keys: &[String]) -> Vec<CapturedChange> {
        let Some((dir, keys)) = normalize(path, changed_keys) else {
            debug!("ignore unusable change path {path:?}");
            return Vec::new();
        };

        if dir.starts_with(REGISTRY_PREFIX) {
            return self.emit_registry(&dir, &keys);
        }

        if let Some(schema) = self.catalog.fixed_schema(&dir) {
            let schema = schema.to_owned();
            return self.emit(&dir, &schema, &keys, Namespace::GSettings);
        }

        let catalog = Arc::clone(&self.catalog);
        let state = self
            .paths
            .entry(dir.clone())
            .or_insert_with(|| PathState::Unresolved {
                seen: BTreeSet::new(),
            });

        let schema = match state {
            // INVARIANT: Resolution is final. A resolved path never re-enters
            // guessing, whatever keys show up later.
            PathState::Resolved { schema } => Some(schema.clone()),
            PathState::Unresolved { seen } => {
                seen.extend(keys.iter().cloned());
                let candidates = catalog.relocatable_candidates(seen);
                match candidates.as_slice() {
                    [only] => {
                        let schema = (*only).to_owned();
                        debug!("path {dir} resolved to relocatable schema {schema}");
                        *state = PathState::Resolved {
                            schema: schema.clone(),
                        };
                        Some(schema)
                    }
                    [] => {
                        debug!("no relocatable schema covers keys observed at {dir}");
                        None
                    }
                    many => {
                        debug!("{} candidate schemas for {dir}, keep accumulating", many.len());
                        None
                    }
                }
            }
        };

        match schema {
            // INVARIANT: Only the current notification's keys produce records.
            // Keys swallowed by earlier ambiguous rounds stay unreported.
            Some(schema) => self.emit(&dir, &schema, &keys, Namespace::GSettings),
            None => Vec::new(),
        }
    }

    fn emit(
        &self,
        dir: &str,
        schema: &str,
        keys: &[String],
        namespace: Namespace,
    ) -> Vec<CapturedChange> {
        let mut captured = Vec::new();
        for key in keys {
            let full = format!("{dir}{key}");
            match self.bus.read(&full) {
                Ok(value) => captured.push(CapturedChange {
                    namespace,
                    record: ChangeRecord {
                        key: full,
                        schema: Some(schema.to_owned()),
                        signature: Some(value.signature),
                        value: Value::String(value.text),
                    },
                }),
                Err(error) => warn!("skip unreadable key {full}: {error}"),
            }
        }

        captured
    }

    fn emit_registry(&self, dir: &str, keys: &[String]) -> Vec<CapturedChange> {
        let mut captured = Vec::new();
        for key in keys {
            let full = format!("{dir}{key}");
            match self.bus.read_external(&full) {
                Ok(value) => captured.push(CapturedChange {
                    namespace: Namespace::LibreOffice,
                    record: ChangeRecord {
                        key: full,
                        schema: None,
                        signature: Some(value.signature),
                        value: Value::String(value.text),
                    },
                }),
                Err(error) => warn!("skip unreadable registry entry {full}: {error}"),
            }
        }

        captured
    }
}

/// Split a notification into its directory and effective changed keys.
fn normalize(path: &str, changed_keys: &[String]) -> Option<(String, Vec<String>)> {
    if path.ends_with('/') {
        return Some((path.to_owned(), changed_keys.to_vec()));
    }

    let (parent, leaf) = path.rsplit_once('/')?;
    if leaf.is_empty() {
        return None;
    }

    Some((format!("{parent}/"), vec![leaf.to_owned()]))
}
