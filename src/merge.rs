// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Merge change entries across changesets.
//!
//! Profiles are built up over several admin sessions, so the entries selected
//! today have to be folded into the entries a profile already carries. A
//! [`ChangeMerger`] folds any number of changesets into one list: later
//! changesets win per identity, and output order is the first appearance of
//! each identity across the inputs.
//!
//! # Bookmark Forests
//!
//! One reserved key gets deeper treatment. Browser policy changesets carry
//! their whole bookmark tree under `ManagedBookmarks`, and plain replacement
//! would throw away every bookmark the older changeset knew about. The
//! bookmark-aware merger recurses instead: folders with the same name merge
//! level by level, leaves append unless a structurally equal node is already
//! present. Existing order stays put and new nodes append in input order,
//! which makes the merge idempotent.
//!
//! # See Also
//!
//! - [`crate::collector`]

use crate::record::Namespace;

use indexmap::IndexMap;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::debug;

/// Reserved browser-policy key holding the bookmark forest.
pub const BOOKMARK_KEY: &str = "ManagedBookmarks";

/// Profile settings document: wire namespace name to its entry list.
pub type ProfileSettings = BTreeMap<String, Vec<Value>>;

/// Merge changesets by a configurable identity member.
#[derive(Clone, Debug)]
pub struct ChangeMerger {
    identity: String,
    forest_key: Option<String>,
}

impl ChangeMerger {
    /// Construct merger identifying entries by the given member.
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            forest_key: None,
        }
    }

    /// Construct merger that merges the reserved bookmark key recursively
    /// instead of replacing it.
    pub fn bookmark_aware(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            forest_key: Some(BOOKMARK_KEY.into()),
        }
    }

    /// Merge changesets in priority order, later changesets winning per
    /// identity.
    ///
    /// Output order is the first appearance of each identity across the
    /// inputs. Entries without a usable identity member are skipped with a
    /// debug log.
    pub fn merge<'c, I>(&self, changesets: I) -> Vec<Value>
    where
        I: IntoIterator<Item = &'c [Value]>,
    {
        let mut merged: IndexMap<String, Value> = IndexMap::new();
        for changeset in changesets {
            for entry in changeset {
                let Some(identity) = entry.get(&self.identity).and_then(Value::as_str) else {
                    debug!("skip change entry without usable {:?} member", self.identity);
                    continue;
                };

                let mut entry = entry.clone();
                if self.forest_key.as_deref() == Some(identity) {
                    if let Some(previous) = merged.get(identity) {
                        let forest =
                            merge_forest(array_member(previous), array_member(&entry));
                        if let Value::Object(members) = &mut entry {
                            members.insert("value".into(), Value::Array(forest));
                        }
                    }
                }

                // INVARIANT: IndexMap keeps the original position on
                // replacement, so first appearance decides output order.
                merged.insert(identity.to_owned(), entry);
            }
        }

        merged.into_values().collect()
    }
}

/// Merge a bookmark forest into an existing one.
///
/// A node is a folder (`{name, children}`) or a leaf (`{name, url}`). A
/// folder merges recursively into an existing folder of the same name at its
/// level and appends otherwise. A leaf appends unless a structurally equal
/// node is already at its level. Merging a forest into itself changes
/// nothing.
pub fn merge_forest(old: &[Value], new: &[Value]) -> Vec<Value> {
    let mut merged = old.to_vec();
    for node in new {
        merge_node(&mut merged, node);
    }

    merged
}

fn merge_node(level: &mut Vec<Value>, node: &Value) {
    let name = node.get("name").and_then(Value::as_str);
    if let (Some(name), Some(children)) = (name, node.get("children").and_then(Value::as_array)) {
        let folder = level.iter_mut().find(|existing| {
            existing.get("name").and_then(Value::as_str) == Some(name)
                && existing.get("children").is_some()
        });

        if let Some(folder) = folder {
            let previous = folder
                .get("children")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            let combined = merge_forest(&previous, children);
            if let Value::Object(members) = folder {
                members.insert("children".into(), Value::Array(combined));
            }
            return;
        }

        level.push(node.clone());
        return;
    }

    if !level.iter().any(|existing| existing == node) {
        level.push(node.clone());
    }
}

/// Pick the merger for a namespace, if it has one.
///
/// Firefox namespaces have none: their changesets carry complete snapshots,
/// so profile assembly replaces them wholesale.
pub fn merger_for(namespace: Namespace) -> Option<ChangeMerger> {
    match namespace {
        Namespace::GSettings | Namespace::LibreOffice => Some(ChangeMerger::new("key")),
        Namespace::ChromiumPolicies | Namespace::ChromePolicies => {
            Some(ChangeMerger::bookmark_aware("key"))
        }
        Namespace::NetworkManager => Some(ChangeMerger::new("uuid")),
        Namespace::FirefoxPrefs | Namespace::FirefoxBookmarks => None,
    }
}

/// Fold an incoming changeset into a profile settings document.
pub fn apply_changeset(profile: &mut ProfileSettings, namespace: Namespace, incoming: &[Value]) {
    let slot = profile.entry(namespace.as_str().to_owned()).or_default();
    match merger_for(namespace) {
        Some(merger) => {
            let merged = merger.merge([slot.as_slice(), incoming]);
            *slot = merged;
        }
        None => *slot = incoming.to_vec(),
    }
}

fn array_member(entry: &Value) -> &[Value] {
    entry
        .get("value")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
}
