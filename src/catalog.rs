// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Schema catalog loading and lookup.
//!
//! Schema resolution needs to know two things about the host: which schemas
//! live at a __fixed path__, and which schemas are __relocatable__, i.e.
//! instantiable at any number of paths chosen at runtime. The catalog holds
//! both tables and never changes after it is loaded, so one instance is
//! shared by reference across the whole capture session.
//!
//! # Catalog File Layout
//!
//! The catalog is a plain TOML file. The `[fixed]` table maps settings paths
//! to schema identifiers. The `[relocatable]` table maps schema identifiers
//! to the full list of keys the schema declares:
//!
//! ```toml
//! [fixed]
//! "/org/gnome/desktop/interface/" = "org.gnome.desktop.interface"
//!
//! [relocatable]
//! "org.gnome.Terminal.Legacy.Profile" = ["font", "use-system-font"]
//! ```
//!
//! # Catalog Acquisition
//!
//! A catalog file can be written by hand, but the usual way to produce one is
//! [`SchemaCatalog::scan`], which interrogates the host through the
//! `gsettings` binary and records every schema it reports.

use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, BTreeSet},
    ffi::OsStr,
    fmt::{Display, Error as FmtError, Formatter, Result as FmtResult},
    fs::read_to_string,
    path::{Path, PathBuf},
    process::Command,
    str::FromStr,
};
use tracing::{debug, instrument, warn};

/// Read-only schema lookup tables for one host.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct SchemaCatalog {
    /// Schemas installed at a fixed path, keyed by settings path.
    #[serde(default)]
    pub fixed: BTreeMap<String, String>,

    /// Relocatable schemas, keyed by schema identifier, each listing the full
    /// set of keys the schema declares.
    #[serde(default)]
    pub relocatable: BTreeMap<String, BTreeSet<String>>,
}

impl SchemaCatalog {
    /// Load catalog from a TOML catalog file.
    ///
    /// # Errors
    ///
    /// - Return [`Error::ReadCatalog`] if the catalog file cannot be read.
    /// - Return [`Error::Deserialize`] if the catalog file is not valid TOML.
    /// - Return [`Error::NoRelocatableSchemas`] if the file defines no
    ///   relocatable schemas.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = read_to_string(path.as_ref()).map_err(|err| Error::ReadCatalog {
            source: err,
            path: path.as_ref().to_path_buf(),
        })?;

        content.parse()
    }

    /// Build catalog by interrogating the host through the `gsettings` binary.
    ///
    /// Walks every installed schema: fixed-path schemas land in the fixed
    /// table together with their path, relocatable schemas land in the
    /// relocatable table together with their declared keys. A relocatable
    /// schema whose keys cannot be listed is skipped with a warning.
    ///
    /// # Errors
    ///
    /// - Return [`Error::Invoke`] if the `gsettings` binary cannot be run.
    /// - Return [`Error::Syscall`] if the `gsettings` binary reports failure.
    /// - Return [`Error::NoRelocatableSchemas`] if the host reports no
    ///   relocatable schemas.
    #[instrument(level = "debug")]
    pub fn scan() -> Result<Self> {
        let mut catalog = SchemaCatalog::default();

        let listing = syscall_non_interactive("gsettings", ["list-schemas", "--print-paths"])?;
        for line in listing.lines() {
            let mut fields = line.split_whitespace();
            match (fields.next(), fields.next()) {
                (Some(schema), Some(path)) => {
                    catalog
                        .fixed
                        .insert(normalize_dir(path), schema.to_owned());
                }
                _ => debug!("skip unparsable schema listing line {line:?}"),
            }
        }

        let listing = syscall_non_interactive("gsettings", ["list-relocatable-schemas"])?;
        for schema in listing.lines().map(str::trim).filter(|id| !id.is_empty()) {
            let keys = match syscall_non_interactive("gsettings", ["list-keys", schema]) {
                Ok(listing) => listing
                    .lines()
                    .map(str::trim)
                    .filter(|key| !key.is_empty())
                    .map(str::to_owned)
                    .collect::<BTreeSet<_>>(),
                Err(error) => {
                    warn!("cannot list keys of relocatable schema {schema}: {error}");
                    continue;
                }
            };
            catalog.relocatable.insert(schema.to_owned(), keys);
        }

        catalog.validate()?;
        Ok(catalog)
    }

    /// Look up the schema installed at a fixed settings path.
    pub fn fixed_schema(&self, path: &str) -> Option<&str> {
        self.fixed.get(path).map(String::as_str)
    }

    /// List relocatable schemas whose declared keys cover every observed key.
    pub fn relocatable_candidates(&self, seen: &BTreeSet<String>) -> Vec<&str> {
        self.relocatable
            .iter()
            .filter(|(_, keys)| seen.is_subset(keys))
            .map(|(schema, _)| schema.as_str())
            .collect()
    }

    fn validate(&self) -> Result<()> {
        if self.relocatable.is_empty() {
            return Err(Error::NoRelocatableSchemas);
        }

        Ok(())
    }
}

impl FromStr for SchemaCatalog {
    type Err = Error;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let parsed: SchemaCatalog = toml::de::from_str(data).map_err(Error::Deserialize)?;

        // INVARIANT: Fixed paths always carry their trailing separator.
        let fixed = parsed
            .fixed
            .into_iter()
            .map(|(path, schema)| (normalize_dir(&path), schema))
            .collect();

        let catalog = SchemaCatalog {
            fixed,
            relocatable: parsed.relocatable,
        };
        catalog.validate()?;

        Ok(catalog)
    }
}

impl Display for SchemaCatalog {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(
            toml::ser::to_string_pretty(self)
                .map_err(Error::Serialize)?
                .as_str(),
        )
    }
}

fn normalize_dir(path: &str) -> String {
    if path.ends_with('/') {
        path.to_owned()
    } else {
        format!("{path}/")
    }
}

fn syscall_non_interactive(
    cmd: impl AsRef<OsStr>,
    args: impl IntoIterator<Item = impl AsRef<OsStr>>,
) -> Result<String> {
    let output = Command::new(cmd.as_ref())
        .args(args)
        .output()
        .map_err(|err| Error::Invoke {
            source: err,
            program: cmd.as_ref().to_string_lossy().into_owned(),
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(output.stderr.as_slice()).into_owned();
        return Err(Error::Syscall {
            program: cmd.as_ref().to_string_lossy().into_owned(),
            message: stderr.trim_end().to_owned(),
        });
    }

    let stdout = String::from_utf8_lossy(output.stdout.as_slice()).into_owned();
    Ok(stdout.trim_end().to_owned())
}

/// Schema catalog error types.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Catalog file cannot be read.
    #[error("failed to read schema catalog at {:?}", path.display())]
    ReadCatalog {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Catalog file is not valid TOML.
    #[error(transparent)]
    Deserialize(#[from] toml::de::Error),

    /// Catalog cannot be serialized back into TOML.
    #[error(transparent)]
    Serialize(#[from] toml::ser::Error),

    /// Catalog defines no relocatable schemas to resolve against.
    #[error("schema catalog defines no relocatable schemas")]
    NoRelocatableSchemas,

    /// Schema interrogation binary cannot be run.
    #[error("failed to invoke {program:?}")]
    Invoke {
        #[source]
        source: std::io::Error,
        program: String,
    },

    /// Schema interrogation binary reported failure.
    #[error("command {program:?} failed:\n{message}")]
    Syscall { program: String, message: String },
}

impl From<Error> for FmtError {
    fn from(_: Error) -> Self {
        FmtError
    }
}

/// Friendly result alias :3
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    fn catalog() -> SchemaCatalog {
        indoc! {r#"
            [fixed]
            "/org/gnome/desktop/interface" = "org.gnome.desktop.interface"
            "/org/gnome/desktop/background/" = "org.gnome.desktop.background"

            [relocatable]
            "org.gnome.Terminal.Legacy.Profile" = ["font", "use-system-font", "background-color"]
            "org.gnome.desktop.app-folders.folder" = ["name", "apps", "categories"]
        "#}
        .parse()
        .unwrap()
    }

    #[test]
    fn fixed_paths_gain_trailing_separator_on_parse() {
        let catalog = catalog();

        assert_eq!(
            catalog.fixed_schema("/org/gnome/desktop/interface/"),
            Some("org.gnome.desktop.interface")
        );
        assert_eq!(
            catalog.fixed_schema("/org/gnome/desktop/background/"),
            Some("org.gnome.desktop.background")
        );
        assert_eq!(catalog.fixed_schema("/org/gnome/desktop/interface"), None);
    }

    #[test]
    fn candidates_cover_every_observed_key() {
        let catalog = catalog();

        let seen: BTreeSet<String> = ["font".to_string()].into();
        assert_eq!(
            catalog.relocatable_candidates(&seen),
            vec!["org.gnome.Terminal.Legacy.Profile"]
        );

        let seen: BTreeSet<String> = ["font".to_string(), "name".to_string()].into();
        assert_eq!(catalog.relocatable_candidates(&seen), Vec::<&str>::new());

        let seen = BTreeSet::new();
        assert_eq!(catalog.relocatable_candidates(&seen).len(), 2);
    }

    #[test]
    fn rejects_catalog_without_relocatable_schemas() {
        let result = indoc! {r#"
            [fixed]
            "/org/gnome/desktop/interface/" = "org.gnome.desktop.interface"
        "#}
        .parse::<SchemaCatalog>();

        assert!(matches!(result, Err(Error::NoRelocatableSchemas)));
    }

    #[test]
    fn serializes_back_into_catalog_file_layout() {
        let result = catalog().to_string();
        let expect = indoc! {r#"
            [fixed]
            "/org/gnome/desktop/background/" = "org.gnome.desktop.background"
            "/org/gnome/desktop/interface/" = "org.gnome.desktop.interface"

            [relocatable]
            "org.gnome.Terminal.Legacy.Profile" = [
                "background-color",
                "font",
                "use-system-font",
            ]
            "org.gnome.desktop.app-folders.folder" = [
                "apps",
                "categories",
                "name",
            ]
        "#};

        assert_eq!(result, expect);
    }

    #[test]
    fn round_trips_through_display_and_parse() {
        let original = catalog();
        let result: SchemaCatalog = original.to_string().parse().unwrap();
        assert_eq!(result, original);
    }
}
