// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Per-namespace accumulation of submitted changes.
//!
//! The admin side of the pipeline receives a stream of change entries and has
//! to answer three questions about them: what changed, which of those changes
//! does the operator care about, and what do the chosen ones look like as a
//! settings list. A [`ChangeCollector`] answers all three for one namespace,
//! and the [`CollectorRegistry`] holds one collector per known namespace.
//!
//! # Identity
//!
//! Entries are plain JSON objects. Which member identifies an entry depends
//! on the namespace: settings records identify by their `key` path, network
//! connections by their `uuid`. Two entries with the same identity are the
//! same logical setting, so the newer submission wins. An entry without a
//! usable identity member is dropped with a debug log rather than poisoning
//! the batch it arrived in.
//!
//! # See Also
//!
//! - [`crate::merge`]
//! - [`crate::store`]

use crate::record::{self, Envelope, Namespace};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, instrument};

/// How [`ChangeCollector::dump_changes`] renders an entry for listings.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DisplayStyle {
    /// Show the entry's `value` member.
    Value,

    /// Show `"{type} - {id}"`, the network connection convention.
    TypeAndId,
}

/// Operator's choice of which collected changes matter.
///
/// Both deployment styles exist in the wild: scripted callers name keys
/// outright, interactive callers pick rows from the most recent listing and
/// hand back their positions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Selection {
    /// Explicit identity keys.
    Keys(Vec<String>),

    /// Positions into the [`ChangeCollector::dump_changes`] ordering.
    Indices(Vec<usize>),
}

/// Accumulated changes for one namespace with last-write-wins semantics.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct ChangeCollector {
    identity: String,
    display: DisplayStyle,

    #[serde(default)]
    changes: BTreeMap<String, Value>,

    #[serde(default)]
    selected: BTreeSet<String>,
}

impl ChangeCollector {
    /// Construct collector configured for a namespace's entry shape.
    pub fn for_namespace(namespace: Namespace) -> Self {
        let (identity, display) = match namespace {
            Namespace::NetworkManager => ("uuid", DisplayStyle::TypeAndId),
            _ => ("key", DisplayStyle::Value),
        };

        Self {
            identity: identity.into(),
            display,
            changes: BTreeMap::new(),
            selected: BTreeSet::new(),
        }
    }

    /// Record one inbound change entry.
    ///
    /// The newest entry for an identity replaces any older one. Entries whose
    /// identity member is missing or not a string are dropped with a debug
    /// log. A replaced entry that was selected stays selected.
    pub fn handle_change(&mut self, entry: Value) {
        let Some(identity) = entry.get(&self.identity).and_then(Value::as_str) else {
            debug!("drop change entry without usable {:?} member", self.identity);
            return;
        };

        self.changes.insert(identity.to_owned(), entry);
    }

    /// List collected changes as `(identity, display)` rows in ascending
    /// identity order.
    pub fn dump_changes(&self) -> Vec<(String, String)> {
        self.changes
            .iter()
            .map(|(identity, entry)| (identity.clone(), self.display_value(entry)))
            .collect()
    }

    /// Replace the remembered selection.
    ///
    /// Unknown keys and out-of-range indices are ignored. An empty selection
    /// clears any prior one.
    #[instrument(skip(self), level = "debug")]
    pub fn remember_selected(&mut self, selection: &Selection) {
        self.selected = match selection {
            Selection::Keys(keys) => keys
                .iter()
                .filter(|key| self.changes.contains_key(key.as_str()))
                .cloned()
                .collect(),
            Selection::Indices(indices) => {
                let ordered: Vec<&String> = self.changes.keys().collect();
                indices
                    .iter()
                    .filter_map(|&index| ordered.get(index))
                    .map(|key| (*key).clone())
                    .collect()
            }
        };
    }

    /// Selected entries in ascending identity order.
    pub fn get_settings(&self) -> Vec<Value> {
        self.changes
            .iter()
            .filter(|(identity, _)| self.selected.contains(identity.as_str()))
            .map(|(_, entry)| entry.clone())
            .collect()
    }

    /// Overlay the selected entries on an existing settings list.
    ///
    /// Entries in `base` whose identity is selected here are replaced in
    /// place; selected identities absent from `base` are appended in
    /// ascending order. Base entries without an identity member are dropped
    /// with a debug log.
    pub fn merge_settings(&self, base: &[Value]) -> Vec<Value> {
        let mut merged: IndexMap<String, Value> = IndexMap::new();
        for entry in base {
            let Some(identity) = entry.get(&self.identity).and_then(Value::as_str) else {
                debug!("drop base entry without usable {:?} member", self.identity);
                continue;
            };
            merged.insert(identity.to_owned(), entry.clone());
        }

        for entry in self.get_settings() {
            if let Some(identity) = entry.get(&self.identity).and_then(Value::as_str) {
                merged.insert(identity.to_owned(), entry.clone());
            }
        }

        merged.into_values().collect()
    }

    /// Amount of collected changes.
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    /// Check if nothing has been collected yet.
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    fn display_value(&self, entry: &Value) -> String {
        match self.display {
            DisplayStyle::Value => match entry.get("value") {
                Some(Value::String(text)) => text.clone(),
                Some(other) => other.to_string(),
                None => String::new(),
            },
            DisplayStyle::TypeAndId => format!(
                "{} - {}",
                text_member(entry, "type"),
                text_member(entry, "id")
            ),
        }
    }
}

/// One collector per known namespace.
///
/// Serializable so an admin session survives process restarts, see
/// [`crate::store`].
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct CollectorRegistry {
    collectors: BTreeMap<Namespace, ChangeCollector>,
}

impl CollectorRegistry {
    /// Construct registry with a fresh collector for every known namespace.
    pub fn new() -> Self {
        let collectors = Namespace::ALL
            .iter()
            .map(|&namespace| (namespace, ChangeCollector::for_namespace(namespace)))
            .collect();

        Self { collectors }
    }

    /// Borrow the collector for a namespace.
    pub fn get(&self, namespace: Namespace) -> Option<&ChangeCollector> {
        self.collectors.get(&namespace)
    }

    /// Borrow the collector for a namespace mutably, creating it on demand.
    pub fn collector(&mut self, namespace: Namespace) -> &mut ChangeCollector {
        self.collectors
            .entry(namespace)
            .or_insert_with(|| ChangeCollector::for_namespace(namespace))
    }

    /// Route one wire envelope to its namespace's collector.
    ///
    /// # Errors
    ///
    /// - Return [`Error::Payload`] if the envelope's payload is not valid
    ///   JSON.
    pub fn handle_envelope(&mut self, envelope: &Envelope) -> Result<()> {
        let entry: Value = serde_json::from_str(&envelope.data).map_err(|source| Error::Payload {
            source,
            namespace: envelope.ns,
        })?;
        self.collector(envelope.ns).handle_change(entry);
        Ok(())
    }

    /// Iterate all collectors in namespace order.
    pub fn iter(&self) -> impl Iterator<Item = (Namespace, &ChangeCollector)> {
        self.collectors
            .iter()
            .map(|(&namespace, collector)| (namespace, collector))
    }
}

impl Default for CollectorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn text_member<'e>(entry: &'e Value, member: &str) -> &'e str {
    entry.get(member).and_then(Value::as_str).unwrap_or_default()
}

/// Collection error variants.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Envelope payload is not a JSON document.
    #[error("undecodable payload for namespace {namespace}")]
    Payload {
        /// Decode failure.
        #[source]
        source: serde_json::Error,

        /// Namespace the payload was submitted for.
        namespace: Namespace,
    },

    /// Wire name does not match any known namespace.
    #[error(transparent)]
    Namespace(#[from] record::Error),
}

/// Friendly result alias :3
pub type Result<T, E = Error> = std::result::Result<T, E>;
