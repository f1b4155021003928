// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use oxidrift::{
    catalog::SchemaCatalog,
    collector::{ChangeCollector, Selection},
    config::Config,
    delivery::stream::decode_frames,
    merge::{apply_changeset, ProfileSettings},
    path::{default_catalog_file, default_config_file, default_session_store},
    record::Namespace,
    session,
    store::SessionStore,
};

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use inquire::MultiSelect;
use serde_json::Value;
use std::{path::PathBuf, process::exit};
use tracing::{debug, error, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Parser)]
#[command(
    about,
    override_usage = "\n  oxidrift [options] watch\n  oxidrift [options] <admin-command>",
    subcommand_help_heading = "Commands",
    version
)]
struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    async fn run(self) -> Result<()> {
        match self.command {
            Command::Watch(opts) => run_watch(opts).await,
            Command::Catalog(CatalogCommand::Scan(opts)) => run_catalog_scan(opts),
            Command::Catalog(CatalogCommand::Check(opts)) => run_catalog_check(opts),
            Command::Ingest(opts) => run_ingest(opts),
            Command::Changes(opts) => run_changes(opts),
            Command::Select(opts) => run_select(opts),
            Command::Merge(opts) => run_merge(opts),
        }
    }
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Watch the session and deliver captured changes.
    #[command(override_usage = "oxidrift watch [options]")]
    Watch(WatchOptions),

    /// Build or validate the schema catalog.
    #[command(subcommand)]
    Catalog(CatalogCommand),

    /// Ingest delivered change frames into the admin session.
    #[command(override_usage = "oxidrift ingest [options] [<frame_file>]")]
    Ingest(IngestOptions),

    /// List collected changes for one namespace.
    #[command(override_usage = "oxidrift changes [options] <namespace>")]
    Changes(ChangesOptions),

    /// Mark which collected changes a profile should keep.
    #[command(override_usage = "oxidrift select [options] <namespace> [<key>]...")]
    Select(SelectOptions),

    /// Merge selected changes into a profile document.
    #[command(override_usage = "oxidrift merge [options] <profile>")]
    Merge(MergeOptions),
}

#[derive(Debug, Clone, Subcommand)]
enum CatalogCommand {
    /// Interrogate the host's schemas into a catalog file.
    #[command(override_usage = "oxidrift catalog scan [options]")]
    Scan(CatalogScanOptions),

    /// Validate an existing catalog file.
    #[command(override_usage = "oxidrift catalog check [options] [<catalog>]")]
    Check(CatalogCheckOptions),
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct WatchOptions {
    /// Path to configuration file.
    #[arg(short, long, value_name = "path")]
    pub config: Option<PathBuf>,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct CatalogScanOptions {
    /// Where to write the catalog file.
    #[arg(short, long, value_name = "path")]
    pub output: Option<PathBuf>,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct CatalogCheckOptions {
    /// Catalog file to validate.
    #[arg(value_name = "catalog")]
    pub catalog: Option<PathBuf>,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct IngestOptions {
    /// File holding framed changes from a device channel.
    ///
    /// Frames are read from stdin when no file is given.
    #[arg(value_name = "frame_file")]
    pub frame_file: Option<PathBuf>,

    /// Path to session store file.
    #[arg(short, long, value_name = "path")]
    pub store: Option<PathBuf>,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct ChangesOptions {
    /// Namespace whose collected changes to list.
    #[arg(required = true, value_name = "namespace")]
    pub namespace: String,

    /// Path to session store file.
    #[arg(short, long, value_name = "path")]
    pub store: Option<PathBuf>,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct SelectOptions {
    /// Namespace whose changes to select from.
    #[arg(required = true, value_name = "namespace")]
    pub namespace: String,

    /// Identity keys of the changes to keep.
    ///
    /// Leaving both keys and positions out prompts interactively.
    #[arg(group = "picks", value_name = "key")]
    pub keys: Vec<String>,

    /// Keep changes by listing position instead of key.
    #[arg(short, long, group = "picks", value_name = "position")]
    pub index: Vec<usize>,

    /// Path to session store file.
    #[arg(short, long, value_name = "path")]
    pub store: Option<PathBuf>,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct MergeOptions {
    /// Profile document to merge selected changes into.
    #[arg(required = true, value_name = "profile")]
    pub profile: PathBuf,

    /// Where to write the merged document instead of in place.
    #[arg(short, long, value_name = "path")]
    pub output: Option<PathBuf>,

    /// Path to session store file.
    #[arg(short, long, value_name = "path")]
    pub store: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    let layer = fmt::layer()
        .compact()
        .with_target(false)
        .with_timer(false)
        .without_time();
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap();
    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .init();

    if let Err(error) = run().await {
        error!("{error:?}");
        exit(1);
    }

    exit(0)
}

async fn run() -> Result<()> {
    Cli::parse().run().await
}

async fn run_watch(opts: WatchOptions) -> Result<()> {
    let config_path = match opts.config {
        Some(path) => path,
        None => default_config_file()?,
    };
    let config = match std::fs::read_to_string(&config_path) {
        Ok(content) => content.parse::<Config>()?,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            debug!(
                "no configuration at {:?}, using defaults",
                config_path.display()
            );
            Config::default()
        }
        Err(err) => return Err(err.into()),
    };

    session::run(config).await?;

    Ok(())
}

fn run_catalog_scan(opts: CatalogScanOptions) -> Result<()> {
    let catalog = SchemaCatalog::scan()?;

    let output = match opts.output {
        Some(path) => path,
        None => default_catalog_file()?,
    };
    if let Some(parent) = output.parent() {
        mkdirp::mkdirp(parent)?;
    }
    std::fs::write(&output, catalog.to_string())?;

    println!(
        "cataloged {} fixed and {} relocatable schemas into {:?}",
        catalog.fixed.len(),
        catalog.relocatable.len(),
        output.display()
    );

    Ok(())
}

fn run_catalog_check(opts: CatalogCheckOptions) -> Result<()> {
    let target = match opts.catalog {
        Some(path) => path,
        None => default_catalog_file()?,
    };
    let catalog = SchemaCatalog::load(&target)?;

    println!(
        "catalog {:?} holds {} fixed and {} relocatable schemas",
        target.display(),
        catalog.fixed.len(),
        catalog.relocatable.len()
    );

    Ok(())
}

fn run_ingest(opts: IngestOptions) -> Result<()> {
    let raw = match &opts.frame_file {
        Some(path) => std::fs::read_to_string(path)?,
        None => std::io::read_to_string(std::io::stdin())?,
    };

    let decoded = decode_frames(&raw);
    if decoded.skipped > 0 {
        warn!("skipped {} undecodable frames", decoded.skipped);
    }
    if decoded.partial.is_some() {
        warn!("stream ends mid frame, trailing bytes ignored");
    }

    let store = SessionStore::new(store_path(opts.store)?);
    let mut registry = store.load()?;
    let mut ingested = 0usize;
    for envelope in &decoded.envelopes {
        match registry.handle_envelope(envelope) {
            Ok(()) => ingested += 1,
            Err(err) => warn!("skipping envelope: {err:?}"),
        }
    }
    store.save(&registry)?;

    println!(
        "ingested {ingested} changes from {} frames",
        decoded.envelopes.len()
    );

    Ok(())
}

fn run_changes(opts: ChangesOptions) -> Result<()> {
    let namespace: Namespace = opts.namespace.parse()?;
    let store = SessionStore::new(store_path(opts.store)?);
    let registry = store.load()?;

    let dump = registry
        .get(namespace)
        .map(ChangeCollector::dump_changes)
        .unwrap_or_default();
    if dump.is_empty() {
        println!("nothing collected for {namespace} yet");
        return Ok(());
    }
    for (key, display) in dump {
        println!("{key}\t{display}");
    }

    Ok(())
}

fn run_select(opts: SelectOptions) -> Result<()> {
    let namespace: Namespace = opts.namespace.parse()?;
    let store = SessionStore::new(store_path(opts.store)?);
    let mut registry = store.load()?;

    let selection = if !opts.keys.is_empty() {
        Selection::Keys(opts.keys)
    } else if !opts.index.is_empty() {
        Selection::Indices(opts.index)
    } else {
        let dump = registry
            .get(namespace)
            .map(ChangeCollector::dump_changes)
            .unwrap_or_default();
        if dump.is_empty() {
            println!("nothing collected for {namespace} yet");
            return Ok(());
        }

        let options: Vec<String> = dump
            .into_iter()
            .map(|(key, display)| format!("{key} = {display}"))
            .collect();
        let chosen =
            MultiSelect::new("Select changes to keep in the profile:", options).raw_prompt()?;
        Selection::Indices(chosen.into_iter().map(|option| option.index).collect())
    };

    registry.collector(namespace).remember_selected(&selection);
    store.save(&registry)?;

    Ok(())
}

fn run_merge(opts: MergeOptions) -> Result<()> {
    let store = SessionStore::new(store_path(opts.store)?);
    let registry = store.load()?;

    let content = std::fs::read_to_string(&opts.profile)?;
    let mut profile: Value = serde_json::from_str(&content)?;
    let Some(members) = profile.as_object_mut() else {
        bail!(
            "profile document {:?} must be a JSON object",
            opts.profile.display()
        );
    };

    let mut settings: ProfileSettings = match members.get("settings") {
        Some(value) => serde_json::from_value(value.clone())?,
        None => ProfileSettings::new(),
    };

    let mut merged = 0usize;
    for (namespace, collector) in registry.iter() {
        let selected = collector.get_settings();
        if selected.is_empty() {
            continue;
        }
        apply_changeset(&mut settings, namespace, &selected);
        merged += 1;
    }
    members.insert("settings".into(), serde_json::to_value(&settings)?);

    let output = opts.output.unwrap_or(opts.profile);
    std::fs::write(&output, serde_json::to_string_pretty(&profile)?)?;
    println!(
        "merged changes from {merged} namespaces into {:?}",
        output.display()
    );

    Ok(())
}

fn store_path(explicit: Option<PathBuf>) -> Result<PathBuf> {
    match explicit {
        Some(path) => Ok(path),
        None => Ok(default_session_store()?),
    }
}
