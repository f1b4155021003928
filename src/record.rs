// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Core data model for captured configuration changes.
//!
//! Everything that travels between the capture side and the admin side of
//! Oxidrift is built from the types in this module. A [`ChangeRecord`] is one
//! observed settings change. A [`Namespace`] names the collection bucket the
//! record belongs to. An [`Envelope`] wraps a serialized payload together with
//! its namespace for wire submission.
//!
//! # Wire Stability
//!
//! Record fields serialize in alphabetical order, and optional fields are
//! omitted instead of being written as null. Admin deployments compare raw
//! payload text when deduplicating submissions, so the emitted JSON for a
//! given record must never change shape between releases.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    str::FromStr,
};

/// A single captured configuration change.
///
/// The `key` is the absolute settings path of the changed entry, e.g.
/// `/org/gnome/desktop/interface/clock-show-date`. Records produced by schema
/// resolution carry a schema identifier and a type signature. Records from
/// browser capture carry neither, only the key and a structured value.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct ChangeRecord {
    /// Absolute settings path of the changed entry.
    pub key: String,

    /// Schema identifier the key resolved to, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,

    /// Type signature of the captured value, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,

    /// Captured value. Printed value text for settings bus reads, arbitrary
    /// JSON for browser capture.
    pub value: Value,
}

impl ChangeRecord {
    /// Construct bare record without schema or signature.
    pub fn new(key: impl Into<String>, value: Value) -> Self {
        Self {
            key: key.into(),
            schema: None,
            signature: None,
            value,
        }
    }
}

/// A change record routed to its collection namespace.
#[derive(Clone, Debug, PartialEq)]
pub struct CapturedChange {
    /// Namespace the record collects under.
    pub namespace: Namespace,

    /// The record itself.
    pub record: ChangeRecord,
}

/// Well-known collection namespaces.
///
/// Every captured change collects under exactly one namespace. The wire name
/// of a namespace is stable and matches the identifier of the system that
/// produces its changes. Callers at process boundaries address namespaces by
/// wire name; everything inside Oxidrift uses the enum.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
pub enum Namespace {
    /// Desktop settings observed through the session settings bus.
    #[serde(rename = "org.gnome.gsettings")]
    GSettings,

    /// Office suite registry entries bridged onto the settings bus.
    #[serde(rename = "org.libreoffice.registry")]
    LibreOffice,

    /// Chromium preference changes mapped to enterprise policies.
    #[serde(rename = "org.chromium.Policies")]
    ChromiumPolicies,

    /// Chrome preference changes mapped to enterprise policies.
    #[serde(rename = "com.google.chrome.Policies")]
    ChromePolicies,

    /// Firefox preference changes.
    #[serde(rename = "org.mozilla.firefox")]
    FirefoxPrefs,

    /// Firefox bookmark changes.
    #[serde(rename = "org.mozilla.firefox.Bookmarks")]
    FirefoxBookmarks,

    /// Network connection profiles.
    #[serde(rename = "org.freedesktop.NetworkManager")]
    NetworkManager,
}

impl Namespace {
    /// Every known namespace in collection order.
    pub const ALL: [Namespace; 7] = [
        Namespace::GSettings,
        Namespace::LibreOffice,
        Namespace::ChromiumPolicies,
        Namespace::ChromePolicies,
        Namespace::FirefoxPrefs,
        Namespace::FirefoxBookmarks,
        Namespace::NetworkManager,
    ];

    /// Wire name of the namespace.
    pub fn as_str(&self) -> &'static str {
        match self {
            Namespace::GSettings => "org.gnome.gsettings",
            Namespace::LibreOffice => "org.libreoffice.registry",
            Namespace::ChromiumPolicies => "org.chromium.Policies",
            Namespace::ChromePolicies => "com.google.chrome.Policies",
            Namespace::FirefoxPrefs => "org.mozilla.firefox",
            Namespace::FirefoxBookmarks => "org.mozilla.firefox.Bookmarks",
            Namespace::NetworkManager => "org.freedesktop.NetworkManager",
        }
    }
}

impl Display for Namespace {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(self.as_str())
    }
}

impl FromStr for Namespace {
    type Err = Error;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        Namespace::ALL
            .into_iter()
            .find(|namespace| namespace.as_str() == name)
            .ok_or_else(|| Error::UnknownNamespace {
                name: name.to_owned(),
            })
    }
}

/// Wire envelope for one queued submission.
///
/// The payload rides as an already serialized JSON document so the queue and
/// transports never need to understand what they carry.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Envelope {
    /// Namespace the payload collects under.
    pub ns: Namespace,

    /// Serialized JSON payload.
    pub data: String,
}

impl Envelope {
    /// Construct new envelope from raw payload text.
    pub fn new(ns: Namespace, data: impl Into<String>) -> Self {
        Self {
            ns,
            data: data.into(),
        }
    }

    /// Construct envelope carrying a serialized change record.
    ///
    /// # Errors
    ///
    /// - Return [`Error::Encode`] if the record cannot be serialized.
    pub fn for_record(ns: Namespace, record: &ChangeRecord) -> Result<Self> {
        let data = serde_json::to_string(record).map_err(Error::Encode)?;
        Ok(Self { ns, data })
    }
}

/// Data model error types.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Wire name does not match any known namespace.
    #[error("unknown change namespace {name:?}")]
    UnknownNamespace { name: String },

    /// Record cannot be serialized into payload text.
    #[error(transparent)]
    Encode(#[from] serde_json::Error),
}

/// Friendly result alias :3
pub type Result<T, E = Error> = std::result::Result<T, E>;
