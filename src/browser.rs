// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Browser preference and bookmark capture.
//!
//! Browsers keep their settings in profile files instead of the session
//! settings bus, so capture here polls those files and diffs snapshots.
//! Chromium flavored browsers report which profiles are live through their
//! __Local State__ file. Each live profile contributes two captures: its
//! `Preferences` document is diffed against a policy map that renames
//! preference paths to policy names, and its `Bookmarks` tree is flattened
//! to rows and diffed so only bookmarks made during the session deploy into
//! the managed bookmark forest. Firefox exposes one default profile through
//! `installs.ini`, whose `prefs.js` is diffed line-wise.
//!
//! Watching is poll based. Each tick compares a cheap fingerprint per file,
//! length plus modification time, and only reads files whose fingerprint
//! moved. A file that fails to decode logs a warning and keeps the previous
//! snapshot, so one half-written save never wipes captured state.
//!
//! # See Also
//!
//! - [`crate::config`]
//! - [`crate::record`]

use crate::{
    config::BrowserSettings,
    merge::BOOKMARK_KEY,
    record::{CapturedChange, ChangeRecord, Envelope, Namespace},
};

use serde_json::{json, Value};
use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
    time::SystemTime,
};
use tokio::{
    sync::mpsc::UnboundedSender,
    task::JoinHandle,
    time::{interval, MissedTickBehavior},
};
use tracing::{debug, instrument, warn};

/// Preference path to policy name renames for Chromium flavored browsers.
pub type PolicyMap = BTreeMap<String, String>;

/// Policy map used when no policy map file is configured.
pub fn builtin_policy_map() -> PolicyMap {
    [
        ("alternate_error_pages.enabled", "AlternateErrorPagesEnabled"),
        ("bookmark_bar.show_on_all_tabs", "BookmarkBarEnabled"),
        ("browser.show_home_button", "ShowHomeButton"),
        ("download.default_directory", "DownloadDirectory"),
        ("homepage", "HomepageLocation"),
        ("homepage_is_newtabpage", "HomepageIsNewTabPage"),
        ("printing.enabled", "PrintingEnabled"),
        ("safebrowsing.enabled", "SafeBrowsingEnabled"),
        ("search.suggest_enabled", "SearchSuggestEnabled"),
        ("translate.enabled", "TranslateEnabled"),
    ]
    .into_iter()
    .map(|(preference, policy)| (preference.to_owned(), policy.to_owned()))
    .collect()
}

/// Load a policy map from a JSON file of preference path to policy name.
///
/// # Errors
///
/// - Return [`Error::ReadPolicies`] if the file cannot be read from.
/// - Return [`Error::DecodePolicies`] if the file holds no valid map.
pub fn load_policy_map(path: &Path) -> Result<PolicyMap> {
    let data = fs::read_to_string(path).map_err(|source| Error::ReadPolicies {
        source,
        path: path.to_owned(),
    })?;

    serde_json::from_str(&data).map_err(|source| Error::DecodePolicies {
        source,
        path: path.to_owned(),
    })
}

/// Look up a dotted preference path inside a preferences document.
///
/// Returns [`None`] when any component along the path is absent.
pub fn pref_value<'p>(prefs: &'p Value, preference: &str) -> Option<&'p Value> {
    let mut current = prefs;
    for part in preference.split('.') {
        current = current.get(part)?;
    }

    Some(current)
}

/// Profile names listed as live sessions by a __Local State__ document.
///
/// A document without the session list is an empty session set, not an
/// error. Early browser runs write the file before its first session entry.
///
/// # Errors
///
/// - Return [`Error::DecodeState`] if the document is not valid JSON.
pub fn last_active_profiles(data: &str) -> Result<Vec<String>> {
    let state: Value =
        serde_json::from_str(data).map_err(|source| Error::DecodeState { source })?;

    let profiles = state
        .pointer("/profile/last_active_profiles")
        .and_then(Value::as_array)
        .map(|sessions| {
            sessions
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_owned)
                .collect()
        })
        .unwrap_or_default();

    Ok(profiles)
}

/// One bookmark leaf flattened out of a Chromium bookmark tree.
///
/// The first path component is the root folder label the browser prints,
/// `Bookmarks bar` and friends. Deployment drops it again.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FlatBookmark {
    /// Folder names from the root down to the containing folder.
    pub path: Vec<String>,

    /// Browser assigned bookmark id.
    pub id: String,

    /// Bookmarked location.
    pub url: String,

    /// Display name.
    pub name: String,
}

/// Flatten every root of a Chromium bookmark tree into leaf rows.
pub fn flatten_bookmarks(tree: &Value) -> Vec<FlatBookmark> {
    let mut rows = Vec::new();
    let Some(roots) = tree.get("roots").and_then(Value::as_object) else {
        return rows;
    };

    for root in roots.values() {
        flatten_node(&[], root, &mut rows);
    }

    rows
}

fn flatten_node(path: &[String], node: &Value, rows: &mut Vec<FlatBookmark>) {
    match node.get("type").and_then(Value::as_str) {
        Some("folder") => {
            let mut deeper = path.to_vec();
            deeper.push(text_of(node, "name"));
            let children = node.get("children").and_then(Value::as_array);
            for child in children.into_iter().flatten() {
                flatten_node(&deeper, child, rows);
            }
        }
        Some("url") => rows.push(FlatBookmark {
            path: path.to_vec(),
            id: text_of(node, "id"),
            url: text_of(node, "url"),
            name: text_of(node, "name"),
        }),
        _ => {}
    }
}

fn text_of(node: &Value, member: &str) -> String {
    node.get(member)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned()
}

/// Rows present in `current` but not in `previous`.
///
/// The difference is a multiset one. Each row in `previous` cancels at most
/// one structurally equal row in `current`, so duplicated bookmarks survive
/// by count.
pub fn modified_bookmarks(previous: &[FlatBookmark], current: &[FlatBookmark]) -> Vec<FlatBookmark> {
    let mut difference = current.to_vec();
    for row in previous {
        if let Some(position) = difference.iter().position(|candidate| candidate == row) {
            difference.remove(position);
        }
    }

    difference
}

/// Rebuild flattened rows into a managed bookmark forest.
///
/// Folder nodes are `{name, children}`, leaves are `{name, url}`. The first
/// path component of each row, the browser's root folder label, is dropped
/// so rows from every root land in one forest.
pub fn bookmark_forest(rows: &[FlatBookmark]) -> Vec<Value> {
    let mut forest = Vec::new();
    for row in rows {
        let folders = row.path.get(1..).unwrap_or_default();
        insert_row(&mut forest, folders, row);
    }

    forest
}

fn insert_row(forest: &mut Vec<Value>, folders: &[String], row: &FlatBookmark) {
    let mut level = forest;
    for name in folders {
        let found = level.iter().position(|node| {
            node.get("name").and_then(Value::as_str) == Some(name.as_str())
                && node.get("children").is_some()
        });
        let index = match found {
            Some(index) => index,
            None => {
                level.push(json!({ "name": name, "children": [] }));
                level.len() - 1
            }
        };

        let Some(children) = level
            .get_mut(index)
            .and_then(|node| node.get_mut("children"))
            .and_then(Value::as_array_mut)
        else {
            return;
        };
        level = children;
    }

    level.push(json!({ "name": row.name, "url": row.url }));
}

/// Diff a preferences document against the flat snapshot of seen values.
///
/// Only preference paths named by the policy map participate. Every mapped
/// preference present in the document updates the snapshot; the ones whose
/// value moved come back as change records keyed by policy name.
pub fn diff_preferences(
    policy_map: &PolicyMap,
    seen: &mut BTreeMap<String, Value>,
    prefs: &Value,
) -> Vec<ChangeRecord> {
    let mut records = Vec::new();
    for (preference, policy) in policy_map {
        let Some(value) = pref_value(prefs, preference) else {
            continue;
        };

        if seen.get(preference) != Some(value) {
            debug!("preference {preference} moved to {value}");
            records.push(ChangeRecord::new(policy.clone(), value.clone()));
        }
        seen.insert(preference.clone(), value.clone());
    }

    records
}

/// Parse `user_pref("key", value);` lines out of a Firefox `prefs.js`.
///
/// Each pref line body is a JSON fragment once wrapped in an array, which
/// yields key and value without a JavaScript parser. Lines that do not
/// parse are skipped.
pub fn parse_prefs(data: &str) -> BTreeMap<String, Value> {
    let mut prefs = BTreeMap::new();
    for line in data.lines() {
        let Some(body) = line
            .strip_prefix("user_pref(")
            .and_then(|rest| rest.strip_suffix(");"))
        else {
            continue;
        };

        let wrapped = format!("[{body}]");
        match serde_json::from_str::<Vec<Value>>(&wrapped) {
            Ok(fields) => {
                let mut fields = fields.into_iter();
                match (fields.next(), fields.next()) {
                    (Some(Value::String(key)), Some(value)) => {
                        prefs.insert(key, value);
                    }
                    _ => debug!("preference line {line:?} has no key and value"),
                }
            }
            Err(err) => debug!("ignoring unparsable preference line {line:?}: {err}"),
        }
    }

    prefs
}

/// Profile directory named by a Firefox `installs.ini` or `profiles.ini`.
///
/// Install sections point `Default=` at the profile directory while profile
/// sections use it as a boolean marker, so bare `0`/`1` values are skipped.
pub fn default_profile_dir(ini: &str) -> Option<String> {
    for line in ini.lines() {
        if let Some(value) = line.trim().strip_prefix("Default=") {
            if !value.is_empty() && value != "0" && value != "1" {
                return Some(value.to_owned());
            }
        }
    }

    None
}

/// Poll driven capture over one Chromium flavored data directory.
#[derive(Debug)]
pub struct ChromiumTracker {
    datadir: PathBuf,
    namespace: Namespace,
    policy_map: PolicyMap,
    state_print: Option<Fingerprint>,
    profiles: BTreeMap<String, ProfileFiles>,
}

impl ChromiumTracker {
    /// Construct new capture over `datadir`, reporting into `namespace`.
    pub fn new(datadir: impl Into<PathBuf>, namespace: Namespace, policy_map: PolicyMap) -> Self {
        let datadir = datadir.into();
        debug!(
            "tracking browser profiles under {:?} for {namespace}",
            datadir.display()
        );

        Self {
            datadir,
            namespace,
            policy_map,
            state_print: None,
            profiles: BTreeMap::new(),
        }
    }

    /// Re-read files whose fingerprint moved and capture their changes.
    ///
    /// The first sight of a profile primes baseline snapshots without
    /// capturing anything. Any bookmark redeployment reports the forests of
    /// every tracked profile concatenated under one [`BOOKMARK_KEY`] record.
    #[instrument(skip(self), level = "debug")]
    pub fn poll(&mut self) -> Vec<CapturedChange> {
        self.poll_sessions();

        let mut records = Vec::new();
        let mut redeployed = false;
        for files in self.profiles.values_mut() {
            records.extend(poll_profile_prefs(&self.policy_map, files));
            redeployed |= poll_profile_bookmarks(files);
        }

        if redeployed {
            let forest = self
                .profiles
                .values()
                .flat_map(|files| files.deployed.iter().cloned())
                .collect();
            records.push(ChangeRecord::new(BOOKMARK_KEY, Value::Array(forest)));
        }

        records
            .into_iter()
            .map(|record| CapturedChange {
                namespace: self.namespace,
                record,
            })
            .collect()
    }

    fn poll_sessions(&mut self) {
        let state_path = self.datadir.join("Local State");
        let Some(print) = fingerprint(&state_path) else {
            return;
        };
        if self.state_print == Some(print) {
            return;
        }
        self.state_print = Some(print);

        let data = match fs::read_to_string(&state_path) {
            Ok(data) => data,
            Err(err) => {
                warn!(
                    "cannot read browser state at {:?}: {err}",
                    state_path.display()
                );
                return;
            }
        };
        let sessions = match last_active_profiles(&data) {
            Ok(sessions) => sessions,
            Err(err) => {
                warn!(
                    "keeping known sessions, browser state at {:?} defeats decoding: {err:?}",
                    state_path.display()
                );
                return;
            }
        };

        for session in sessions {
            if !self.profiles.contains_key(&session) {
                debug!("browser session {session:?} started");
                let files = ProfileFiles::prime(self.datadir.join(&session), &self.policy_map);
                self.profiles.insert(session, files);
            }
        }
    }
}

/// Poll driven capture over one Firefox data directory.
#[derive(Debug)]
pub struct FirefoxTracker {
    datadir: PathBuf,
    prefs_path: Option<PathBuf>,
    prefs_print: Option<Fingerprint>,
    seen: Option<BTreeMap<String, Value>>,
}

impl FirefoxTracker {
    /// Construct new capture over `datadir`.
    pub fn new(datadir: impl Into<PathBuf>) -> Self {
        let datadir = datadir.into();
        debug!(
            "tracking browser preferences under {:?}",
            datadir.display()
        );

        Self {
            datadir,
            prefs_path: None,
            prefs_print: None,
            seen: None,
        }
    }

    /// Re-read the default profile's preferences when they moved.
    ///
    /// The first successful read primes the baseline snapshot without
    /// capturing anything. Later reads capture preferences that appeared or
    /// changed; a preference deleted from the file stays in the snapshot.
    #[instrument(skip(self), level = "debug")]
    pub fn poll(&mut self) -> Vec<CapturedChange> {
        if self.prefs_path.is_none() {
            self.locate_profile();
        }
        let Some(prefs_path) = self.prefs_path.clone() else {
            return Vec::new();
        };

        let Some(print) = fingerprint(&prefs_path) else {
            debug!(
                "preferences at {:?} do not exist yet",
                prefs_path.display()
            );
            return Vec::new();
        };
        if self.prefs_print == Some(print) {
            return Vec::new();
        }
        self.prefs_print = Some(print);

        let data = match fs::read_to_string(&prefs_path) {
            Ok(data) => data,
            Err(err) => {
                warn!(
                    "keeping previous snapshot, cannot read preferences at {:?}: {err}",
                    prefs_path.display()
                );
                return Vec::new();
            }
        };
        let prefs = parse_prefs(&data);

        let Some(seen) = self.seen.as_mut() else {
            debug!("baseline preferences loaded from {:?}", prefs_path.display());
            self.seen = Some(prefs);
            return Vec::new();
        };

        let mut captured = Vec::new();
        for (key, value) in prefs {
            if seen.get(&key) != Some(&value) {
                debug!("preference {key} moved to {value}");
                captured.push(CapturedChange {
                    namespace: Namespace::FirefoxPrefs,
                    record: ChangeRecord::new(key.clone(), value.clone()),
                });
            }
            seen.insert(key, value);
        }

        captured
    }

    fn locate_profile(&mut self) {
        for name in ["installs.ini", "profiles.ini"] {
            let ini_path = self.datadir.join(name);
            let Ok(ini) = fs::read_to_string(&ini_path) else {
                continue;
            };
            if let Some(profile) = default_profile_dir(&ini) {
                let prefs_path = self.datadir.join(profile).join("prefs.js");
                debug!(
                    "watching default profile preferences at {:?}",
                    prefs_path.display()
                );
                self.prefs_path = Some(prefs_path);
                return;
            }
        }
    }
}

/// Per profile file snapshots for one Chromium session.
#[derive(Debug)]
struct ProfileFiles {
    prefs_path: PathBuf,
    prefs_print: Option<Fingerprint>,
    prefs_seen: BTreeMap<String, Value>,
    bookmarks_path: PathBuf,
    bookmarks_print: Option<Fingerprint>,
    bookmarks_baseline: Vec<FlatBookmark>,
    deployed: Vec<Value>,
}

impl ProfileFiles {
    /// Snapshot a profile directory as the capture baseline.
    ///
    /// Files missing at prime time baseline as empty, so their first
    /// appearance captures everything they hold.
    fn prime(profile_dir: PathBuf, policy_map: &PolicyMap) -> Self {
        let prefs_path = profile_dir.join("Preferences");
        let bookmarks_path = profile_dir.join("Bookmarks");

        let prefs_print = fingerprint(&prefs_path);
        let mut prefs_seen = BTreeMap::new();
        if prefs_print.is_some() {
            match read_json(&prefs_path) {
                Ok(prefs) => {
                    for preference in policy_map.keys() {
                        if let Some(value) = pref_value(&prefs, preference) {
                            prefs_seen.insert(preference.clone(), value.clone());
                        }
                    }
                }
                Err(err) => warn!("baseline preference read failed: {err:?}"),
            }
        } else {
            debug!(
                "preferences at {:?} do not exist yet",
                prefs_path.display()
            );
        }

        let bookmarks_print = fingerprint(&bookmarks_path);
        let mut bookmarks_baseline = Vec::new();
        if bookmarks_print.is_some() {
            match read_json(&bookmarks_path) {
                Ok(tree) => bookmarks_baseline = flatten_bookmarks(&tree),
                Err(err) => warn!("baseline bookmark read failed: {err:?}"),
            }
        } else {
            debug!(
                "bookmarks at {:?} do not exist yet",
                bookmarks_path.display()
            );
        }

        Self {
            prefs_path,
            prefs_print,
            prefs_seen,
            bookmarks_path,
            bookmarks_print,
            bookmarks_baseline,
            deployed: Vec::new(),
        }
    }
}

fn poll_profile_prefs(policy_map: &PolicyMap, files: &mut ProfileFiles) -> Vec<ChangeRecord> {
    let Some(print) = fingerprint(&files.prefs_path) else {
        return Vec::new();
    };
    if files.prefs_print == Some(print) {
        return Vec::new();
    }
    files.prefs_print = Some(print);

    let prefs = match read_json(&files.prefs_path) {
        Ok(prefs) => prefs,
        Err(err) => {
            warn!("keeping previous snapshot: {err:?}");
            return Vec::new();
        }
    };

    diff_preferences(policy_map, &mut files.prefs_seen, &prefs)
}

fn poll_profile_bookmarks(files: &mut ProfileFiles) -> bool {
    let Some(print) = fingerprint(&files.bookmarks_path) else {
        return false;
    };
    if files.bookmarks_print == Some(print) {
        return false;
    }
    files.bookmarks_print = Some(print);

    let tree = match read_json(&files.bookmarks_path) {
        Ok(tree) => tree,
        Err(err) => {
            warn!("keeping previous deployment: {err:?}");
            return false;
        }
    };

    let rows = flatten_bookmarks(&tree);
    let changed = modified_bookmarks(&files.bookmarks_baseline, &rows);
    files.deployed = bookmark_forest(&changed);
    true
}

/// Length plus modification time, cheap file change detection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Fingerprint {
    length: u64,
    modified: Option<SystemTime>,
}

fn fingerprint(path: &Path) -> Option<Fingerprint> {
    let metadata = fs::metadata(path).ok()?;
    Some(Fingerprint {
        length: metadata.len(),
        modified: metadata.modified().ok(),
    })
}

fn read_json(path: &Path) -> Result<Value> {
    let data = fs::read_to_string(path).map_err(|source| Error::ReadFile {
        source,
        path: path.to_owned(),
    })?;

    serde_json::from_str(&data).map_err(|source| Error::DecodeFile {
        source,
        path: path.to_owned(),
    })
}

/// Background task polling every configured browser data directory.
#[derive(Debug)]
pub struct BrowserWatch {
    handle: JoinHandle<()>,
}

impl BrowserWatch {
    /// Spawn the poll task, reporting captures into `outbox`.
    ///
    /// A configured policy map file that fails to load logs a warning and
    /// falls back to the built in map. The task ends on its own once the
    /// outbox has no receiver left.
    pub fn spawn(settings: BrowserSettings, outbox: UnboundedSender<Envelope>) -> Self {
        let policy_map = match settings.policy_map.as_deref() {
            Some(path) => load_policy_map(path).unwrap_or_else(|err| {
                warn!("using built in policy map: {err:?}");
                builtin_policy_map()
            }),
            None => builtin_policy_map(),
        };

        let mut chromium = Vec::new();
        if let Some(datadir) = &settings.chromium {
            chromium.push(ChromiumTracker::new(
                datadir,
                Namespace::ChromiumPolicies,
                policy_map.clone(),
            ));
        }
        if let Some(datadir) = &settings.chrome {
            chromium.push(ChromiumTracker::new(
                datadir,
                Namespace::ChromePolicies,
                policy_map,
            ));
        }
        let mut firefox = settings.firefox.as_ref().map(FirefoxTracker::new);

        let cadence = settings.poll();
        let handle = tokio::spawn(async move {
            let mut timer = interval(cadence);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                timer.tick().await;

                let mut captured = Vec::new();
                for tracker in &mut chromium {
                    captured.extend(tracker.poll());
                }
                if let Some(tracker) = firefox.as_mut() {
                    captured.extend(tracker.poll());
                }

                for change in captured {
                    let envelope = match Envelope::for_record(change.namespace, &change.record) {
                        Ok(envelope) => envelope,
                        Err(err) => {
                            warn!("dropping unencodable browser change: {err:?}");
                            continue;
                        }
                    };
                    if outbox.send(envelope).is_err() {
                        return;
                    }
                }
            }
        });

        Self { handle }
    }

    /// Stop polling by aborting the watch task.
    pub fn shutdown(self) {
        self.handle.abort();
    }
}

/// Browser capture error types.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Policy map file cannot be read from.
    #[error("failed to read policy map at {:?}", path.display())]
    ReadPolicies {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Policy map file holds no valid rename map.
    #[error("failed to decode policy map at {:?}", path.display())]
    DecodePolicies {
        #[source]
        source: serde_json::Error,
        path: PathBuf,
    },

    /// Browser profile file cannot be read from.
    #[error("failed to read browser file at {:?}", path.display())]
    ReadFile {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Browser profile file is not valid JSON.
    #[error("failed to decode browser file at {:?}", path.display())]
    DecodeFile {
        #[source]
        source: serde_json::Error,
        path: PathBuf,
    },

    /// Browser state document is not valid JSON.
    #[error("failed to decode browser state document")]
    DecodeState {
        #[source]
        source: serde_json::Error,
    },
}

/// Friendly result alias :3
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;

    fn row(path: &[&str], id: &str, url: &str, name: &str) -> FlatBookmark {
        FlatBookmark {
            path: path.iter().map(|part| (*part).to_owned()).collect(),
            id: id.into(),
            url: url.into(),
            name: name.into(),
        }
    }

    fn bookmark_fixture() -> Value {
        json!({
            "roots": {
                "bookmark_bar": {
                    "id": "1",
                    "name": "Bookmarks bar",
                    "type": "folder",
                    "children": [
                        {
                            "id": "9",
                            "name": "Fedora",
                            "type": "folder",
                            "children": [
                                { "id": "8", "name": "Get Fedora", "type": "url", "url": "https://getfedora.org/" },
                                { "id": "5", "name": "Fedora Project", "type": "url", "url": "https://start.fedoraproject.org/" },
                            ],
                        },
                        { "id": "10", "name": "The Chromium Projects", "type": "url", "url": "https://www.chromium.org/" },
                        { "id": "11", "name": "GNOME", "type": "url", "url": "https://www.gnome.org/" },
                    ],
                },
                "other": {
                    "id": "2",
                    "name": "Other bookmarks",
                    "type": "folder",
                    "children": [
                        { "id": "12", "name": "GNOME Gitlab", "type": "url", "url": "https://gitlab.gnome.org/" },
                    ],
                },
                "synced": { "id": "3", "name": "Mobile bookmarks", "type": "folder", "children": [] },
            },
        })
    }

    fn modified_bookmark_fixture() -> Value {
        json!({
            "roots": {
                "bookmark_bar": {
                    "id": "1",
                    "name": "Bookmarks bar",
                    "type": "folder",
                    "children": [
                        {
                            "id": "9",
                            "name": "Fedora",
                            "type": "folder",
                            "children": [
                                { "id": "8", "name": "Get Fedora NOW!!!", "type": "url", "url": "https://getfedora.org/" },
                                { "id": "5", "name": "Fedora Project", "type": "url", "url": "https://start.fedoraproject.org/" },
                                { "id": "10", "name": "The Chromium Projects", "type": "url", "url": "https://www.chromium.org/" },
                                { "id": "14", "name": "SSSD", "type": "url", "url": "https://pagure.io/SSSD" },
                            ],
                        },
                        { "id": "11", "name": "GNOME Docs", "type": "url", "url": "https://developer.gnome.org/" },
                        { "id": "13", "name": "FreeIPA", "type": "url", "url": "https://www.freeipa.org/" },
                    ],
                },
                "other": {
                    "id": "2",
                    "name": "Other bookmarks",
                    "type": "folder",
                    "children": [
                        { "id": "12", "name": "GNOME Gitlab", "type": "url", "url": "https://gitlab.gnome.org/" },
                    ],
                },
                "synced": { "id": "3", "name": "Mobile bookmarks", "type": "folder", "children": [] },
            },
        })
    }

    fn deployed_diff_fixture() -> Vec<Value> {
        vec![
            json!({
                "name": "Fedora",
                "children": [
                    { "name": "Get Fedora NOW!!!", "url": "https://getfedora.org/" },
                    { "name": "The Chromium Projects", "url": "https://www.chromium.org/" },
                    { "name": "SSSD", "url": "https://pagure.io/SSSD" },
                ],
            }),
            json!({ "name": "GNOME Docs", "url": "https://developer.gnome.org/" }),
            json!({ "name": "FreeIPA", "url": "https://www.freeipa.org/" }),
        ]
    }

    fn seed_chromium(sessions: &[&str]) -> anyhow::Result<()> {
        std::fs::create_dir_all("chromium/Profile 1")?;
        std::fs::create_dir_all("chromium/Profile 2")?;
        std::fs::write(
            "chromium/Local State",
            serde_json::to_string(&json!({ "profile": { "last_active_profiles": sessions } }))?,
        )?;
        std::fs::write(
            "chromium/Profile 1/Preferences",
            serde_json::to_string(&json!({ "browser": { "show_home_button": true } }))?,
        )?;
        std::fs::write(
            "chromium/Profile 2/Preferences",
            serde_json::to_string(&json!({ "bookmark_bar": { "show_on_all_tabs": false } }))?,
        )?;
        std::fs::write(
            "chromium/Profile 1/Bookmarks",
            serde_json::to_string(&bookmark_fixture())?,
        )?;
        std::fs::write(
            "chromium/Profile 2/Bookmarks",
            serde_json::to_string(&bookmark_fixture())?,
        )?;

        Ok(())
    }

    #[test]
    fn resolves_nested_preference_values() {
        let prefs = json!({ "browser": { "show_home_button": true } });

        assert_eq!(
            pref_value(&prefs, "browser.show_home_button"),
            Some(&Value::Bool(true))
        );
        assert_eq!(pref_value(&prefs, "nonexistent.key.name"), None);
    }

    #[test]
    fn flattens_bookmark_roots_with_paths() {
        let rows = flatten_bookmarks(&bookmark_fixture());

        let expect = vec![
            row(
                &["Bookmarks bar", "Fedora"],
                "8",
                "https://getfedora.org/",
                "Get Fedora",
            ),
            row(
                &["Bookmarks bar", "Fedora"],
                "5",
                "https://start.fedoraproject.org/",
                "Fedora Project",
            ),
            row(
                &["Bookmarks bar"],
                "10",
                "https://www.chromium.org/",
                "The Chromium Projects",
            ),
            row(&["Bookmarks bar"], "11", "https://www.gnome.org/", "GNOME"),
            row(
                &["Other bookmarks"],
                "12",
                "https://gitlab.gnome.org/",
                "GNOME Gitlab",
            ),
        ];
        assert_eq!(rows, expect);
    }

    #[test]
    fn modified_bookmarks_is_a_multiset_difference() {
        let previous = flatten_bookmarks(&bookmark_fixture());
        let current = flatten_bookmarks(&modified_bookmark_fixture());

        assert_eq!(modified_bookmarks(&previous, &previous), Vec::new());

        let expect = vec![
            row(
                &["Bookmarks bar", "Fedora"],
                "8",
                "https://getfedora.org/",
                "Get Fedora NOW!!!",
            ),
            row(
                &["Bookmarks bar", "Fedora"],
                "10",
                "https://www.chromium.org/",
                "The Chromium Projects",
            ),
            row(
                &["Bookmarks bar", "Fedora"],
                "14",
                "https://pagure.io/SSSD",
                "SSSD",
            ),
            row(
                &["Bookmarks bar"],
                "11",
                "https://developer.gnome.org/",
                "GNOME Docs",
            ),
            row(
                &["Bookmarks bar"],
                "13",
                "https://www.freeipa.org/",
                "FreeIPA",
            ),
        ];
        assert_eq!(modified_bookmarks(&previous, &current), expect);
    }

    #[test]
    fn bookmark_forest_rebuilds_folder_hierarchy() {
        let rows = flatten_bookmarks(&bookmark_fixture());

        let expect = vec![
            json!({
                "name": "Fedora",
                "children": [
                    { "name": "Get Fedora", "url": "https://getfedora.org/" },
                    { "name": "Fedora Project", "url": "https://start.fedoraproject.org/" },
                ],
            }),
            json!({ "name": "The Chromium Projects", "url": "https://www.chromium.org/" }),
            json!({ "name": "GNOME", "url": "https://www.gnome.org/" }),
            json!({ "name": "GNOME Gitlab", "url": "https://gitlab.gnome.org/" }),
        ];
        assert_eq!(bookmark_forest(&rows), expect);
    }

    #[test]
    fn diff_preferences_reports_policy_names() {
        let policy_map = builtin_policy_map();
        let mut seen = BTreeMap::new();

        let prefs = json!({
            "browser": { "show_home_button": true },
            "media": { "autoplay": false },
        });
        let records = diff_preferences(&policy_map, &mut seen, &prefs);
        assert_eq!(
            records,
            vec![ChangeRecord::new("ShowHomeButton", Value::Bool(true))]
        );

        // Unchanged values go quiet on the next diff.
        let records = diff_preferences(&policy_map, &mut seen, &prefs);
        assert_eq!(records, Vec::new());
    }

    #[test]
    fn parses_user_pref_lines_ignoring_garbage() {
        let data = indoc! {r#"
            # Mozilla User Preferences
            user_pref("accessibility.typeaheadfind.flashBar", 0);
            user_pref("browser.startup.homepage", "https://start.fedoraproject.org");
            user_pref("browser.bookmarks.restore_default_bookmarks", false);
            user_pref("broken", );
            not a pref line at all
        "#};

        let prefs = parse_prefs(data);

        let expect: BTreeMap<String, Value> = [
            (
                "accessibility.typeaheadfind.flashBar".to_owned(),
                json!(0),
            ),
            (
                "browser.startup.homepage".to_owned(),
                json!("https://start.fedoraproject.org"),
            ),
            (
                "browser.bookmarks.restore_default_bookmarks".to_owned(),
                json!(false),
            ),
        ]
        .into_iter()
        .collect();
        assert_eq!(prefs, expect);
    }

    #[test]
    fn finds_default_profile_directory() {
        let installs = indoc! {"
            [308046B0AF4A39CB]
            Default=abcd1234.default-release
            Locked=1
        "};
        assert_eq!(
            default_profile_dir(installs),
            Some("abcd1234.default-release".to_owned())
        );

        let profiles = indoc! {"
            [Profile0]
            Name=default
            IsRelative=1
            Path=abcd1234.default
            Default=1

            [Install308046B0AF4A39CB]
            Default=abcd1234.default-release
        "};
        assert_eq!(
            default_profile_dir(profiles),
            Some("abcd1234.default-release".to_owned())
        );

        assert_eq!(default_profile_dir("[Profile0]\nName=default\n"), None);
    }

    #[test]
    fn reads_live_sessions_from_state_document() -> anyhow::Result<()> {
        let state = serde_json::to_string(&json!({
            "profile": { "last_active_profiles": ["Profile 1", "Profile 2"] }
        }))?;
        assert_eq!(
            last_active_profiles(&state)?,
            vec!["Profile 1".to_owned(), "Profile 2".to_owned()]
        );

        assert_eq!(last_active_profiles("{}")?, Vec::<String>::new());
        assert!(matches!(
            last_active_profiles("not json"),
            Err(Error::DecodeState { .. })
        ));

        Ok(())
    }

    #[sealed_test]
    fn loads_policy_map_from_file() -> anyhow::Result<()> {
        std::fs::write(
            "policies.json",
            serde_json::to_string(&json!({ "browser.show_home_button": "ShowHomeButton" }))?,
        )?;

        let policy_map = load_policy_map(Path::new("policies.json"))?;
        assert_eq!(
            policy_map.get("browser.show_home_button"),
            Some(&"ShowHomeButton".to_owned())
        );

        let result = load_policy_map(Path::new("missing.json"));
        assert!(matches!(result, Err(Error::ReadPolicies { .. })));

        Ok(())
    }

    #[sealed_test]
    fn chromium_tracker_baselines_then_reports_new_preferences() -> anyhow::Result<()> {
        seed_chromium(&["Profile 1"])?;
        let mut tracker =
            ChromiumTracker::new("chromium", Namespace::ChromiumPolicies, builtin_policy_map());

        assert_eq!(tracker.poll(), Vec::new());

        std::fs::write(
            "chromium/Profile 1/Preferences",
            serde_json::to_string(&json!({
                "browser": { "show_home_button": true },
                "bookmark_bar": { "show_on_all_tabs": true },
            }))?,
        )?;
        let captured = tracker.poll();
        assert_eq!(captured.len(), 1);
        assert_eq!(captured[0].namespace, Namespace::ChromiumPolicies);
        assert_eq!(
            captured[0].record,
            ChangeRecord::new("BookmarkBarEnabled", Value::Bool(true))
        );

        // Unmapped preferences never report.
        std::fs::write(
            "chromium/Profile 1/Preferences",
            serde_json::to_string(&json!({
                "browser": { "show_home_button": true },
                "bookmark_bar": { "show_on_all_tabs": true },
                "nonexistent": { "unknownkey": true },
            }))?,
        )?;
        assert_eq!(tracker.poll(), Vec::new());

        Ok(())
    }

    #[sealed_test]
    fn sessions_appear_from_state_updates() -> anyhow::Result<()> {
        seed_chromium(&[])?;
        let mut tracker =
            ChromiumTracker::new("chromium", Namespace::ChromiumPolicies, builtin_policy_map());
        assert_eq!(tracker.poll(), Vec::new());

        std::fs::write(
            "chromium/Local State",
            serde_json::to_string(&json!({ "profile": { "last_active_profiles": ["Profile 1"] } }))?,
        )?;
        assert_eq!(tracker.poll(), Vec::new());

        std::fs::write(
            "chromium/Profile 1/Preferences",
            serde_json::to_string(&json!({ "browser": { "show_home_button": false } }))?,
        )?;
        let captured = tracker.poll();
        assert_eq!(captured.len(), 1);
        assert_eq!(
            captured[0].record,
            ChangeRecord::new("ShowHomeButton", Value::Bool(false))
        );

        Ok(())
    }

    #[sealed_test]
    fn bookmark_changes_deploy_across_sessions() -> anyhow::Result<()> {
        seed_chromium(&["Profile 1", "Profile 2"])?;
        let mut tracker =
            ChromiumTracker::new("chromium", Namespace::ChromiumPolicies, builtin_policy_map());
        assert_eq!(tracker.poll(), Vec::new());

        std::fs::write(
            "chromium/Profile 1/Bookmarks",
            serde_json::to_string(&modified_bookmark_fixture())?,
        )?;
        let captured = tracker.poll();
        assert_eq!(captured.len(), 1);
        assert_eq!(
            captured[0].record,
            ChangeRecord::new(BOOKMARK_KEY, Value::Array(deployed_diff_fixture()))
        );

        std::fs::write(
            "chromium/Profile 2/Bookmarks",
            serde_json::to_string(&modified_bookmark_fixture())?,
        )?;
        let captured = tracker.poll();
        let mut doubled = deployed_diff_fixture();
        doubled.extend(deployed_diff_fixture());
        assert_eq!(captured.len(), 1);
        assert_eq!(
            captured[0].record,
            ChangeRecord::new(BOOKMARK_KEY, Value::Array(doubled))
        );

        Ok(())
    }

    #[sealed_test]
    fn malformed_preference_write_keeps_previous_snapshot() -> anyhow::Result<()> {
        seed_chromium(&["Profile 1"])?;
        let mut tracker =
            ChromiumTracker::new("chromium", Namespace::ChromiumPolicies, builtin_policy_map());
        assert_eq!(tracker.poll(), Vec::new());

        std::fs::write("chromium/Profile 1/Preferences", "{ not json")?;
        assert_eq!(tracker.poll(), Vec::new());

        std::fs::write(
            "chromium/Profile 1/Preferences",
            serde_json::to_string(&json!({ "browser": { "show_home_button": false } }))?,
        )?;
        let captured = tracker.poll();
        assert_eq!(captured.len(), 1);
        assert_eq!(
            captured[0].record,
            ChangeRecord::new("ShowHomeButton", Value::Bool(false))
        );

        Ok(())
    }

    #[sealed_test]
    fn firefox_tracker_reports_changed_preferences() -> anyhow::Result<()> {
        std::fs::create_dir_all("firefox/abcd.default")?;
        std::fs::write(
            "firefox/installs.ini",
            indoc! {"
                [308046B0AF4A39CB]
                Default=abcd.default
                Locked=1
            "},
        )?;
        std::fs::write(
            "firefox/abcd.default/prefs.js",
            indoc! {r#"
                user_pref("accessibility.typeaheadfind.flashBar", 0);
                user_pref("browser.startup.homepage", "https://start.fedoraproject.org");
            "#},
        )?;

        let mut tracker = FirefoxTracker::new("firefox");
        assert_eq!(tracker.poll(), Vec::new());

        std::fs::write(
            "firefox/abcd.default/prefs.js",
            indoc! {r#"
                user_pref("accessibility.typeaheadfind.flashBar", 0);
                user_pref("browser.startup.homepage", "https://www.gnome.org");
                user_pref("browser.toolbars.bookmarks.visibility", "always");
            "#},
        )?;
        let captured = tracker.poll();

        assert!(captured
            .iter()
            .all(|change| change.namespace == Namespace::FirefoxPrefs));
        let records: Vec<ChangeRecord> =
            captured.iter().map(|change| change.record.clone()).collect();
        assert_eq!(
            records,
            vec![
                ChangeRecord::new(
                    "browser.startup.homepage",
                    Value::String("https://www.gnome.org".into())
                ),
                ChangeRecord::new(
                    "browser.toolbars.bookmarks.visibility",
                    Value::String("always".into())
                ),
            ]
        );

        Ok(())
    }

    #[sealed_test]
    fn firefox_tracker_stays_quiet_without_a_profile() {
        let mut tracker = FirefoxTracker::new("firefox");
        assert_eq!(tracker.poll(), Vec::new());
    }
}
