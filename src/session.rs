// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Watch session wiring.
//!
//! `oxidrift watch` stitches the pieces of this crate into one long-running
//! session. A bus watch streams raw change notifications, the resolver turns
//! them into captured changes, browser trackers poll profile files on the
//! side, and everything funnels through one delivery queue toward the admin
//! service over the configured transport.
//!
//! Before watching begins the session drops the office registry sentinel
//! file, which tells the office suite to route its registry writes through
//! the settings bus where the watch can see them. Failure to create it is
//! worth a warning, never a dead session.
//!
//! # Shutdown
//!
//! The session ends on `Ctrl-C` or when the bus watch closes its stream.
//! Teardown drains in order: the bus watch dies first, browser polling is
//! aborted, then the delivery inbox closes so the queue worker runs its
//! final flush before the session returns.
//!
//! # See Also
//!
//! - [`crate::delivery`]
//! - [`crate::resolver`]

use crate::{
    browser::BrowserWatch,
    bus::{DconfCli, Notification, SessionWatch, SettingsBus},
    catalog::SchemaCatalog,
    config::{Config, TransportKind},
    delivery::{http::HttpTransport, stream::StreamTransport, DeliveryQueue},
    path,
    record::Envelope,
    resolver::SchemaResolver,
};

use std::sync::Arc;
use tokio::{
    signal,
    sync::mpsc::{self, UnboundedReceiver, UnboundedSender},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

/// Run the watch session until `Ctrl-C` or the bus watch stream ends.
///
/// # Errors
///
/// - Return [`Error::NoWayHome`] if no home directory exists to locate the
///   default catalog file.
/// - Return [`Error::Catalog`] if the schema catalog cannot be loaded.
/// - Return [`Error::Http`] if the HTTP transport cannot be constructed.
/// - Return [`Error::Bus`] if the bus watch cannot spawn or its stream
///   cannot be read.
pub async fn run(config: Config) -> Result<()> {
    write_registry_sentinel();

    let catalog_path = match &config.session.catalog {
        Some(path) => path.clone(),
        None => path::default_catalog_file()?,
    };
    let catalog = Arc::new(SchemaCatalog::load(&catalog_path)?);

    let (outbox, inbox) = mpsc::unbounded_channel();
    let worker = spawn_delivery(&config, inbox)?;
    let browsers = (!config.browsers.is_empty())
        .then(|| BrowserWatch::spawn(config.browsers.clone(), outbox.clone()));

    let mut watch = SessionWatch::spawn()?;
    let mut resolver = SchemaResolver::new(catalog, DconfCli::new());
    info!("watching session settings bus");

    let interrupt = signal::ctrl_c();
    tokio::pin!(interrupt);
    loop {
        tokio::select! {
            notification = watch.next() => match notification? {
                Some(notification) => forward(&mut resolver, &notification, &outbox),
                None => {
                    warn!("bus watch stream ended");
                    break;
                }
            },
            _ = &mut interrupt => {
                info!("interrupt received, session ending");
                break;
            }
        }
    }

    if let Err(err) = watch.shutdown().await {
        warn!("bus watch did not stop cleanly: {err:?}");
    }
    if let Some(browsers) = browsers {
        browsers.shutdown();
    }

    // INVARIANT: Dropping the last sender closes the queue inbox, which
    // lets the worker run its final flush before the session returns.
    drop(outbox);
    if let Err(err) = worker.await {
        warn!("delivery worker ended abruptly: {err}");
    }

    Ok(())
}

/// Resolve one notification and hand its captures to the delivery queue.
fn forward<B>(
    resolver: &mut SchemaResolver<B>,
    notification: &Notification,
    outbox: &UnboundedSender<Envelope>,
) where
    B: SettingsBus,
{
    for change in resolver.observe(&notification.path, &notification.keys) {
        let envelope = match Envelope::for_record(change.namespace, &change.record) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!("dropping unencodable change: {err:?}");
                continue;
            }
        };
        if outbox.send(envelope).is_err() {
            warn!("delivery queue is gone, dropping change");
        }
    }
}

/// Spawn the delivery worker over the configured transport.
fn spawn_delivery(config: &Config, inbox: UnboundedReceiver<Envelope>) -> Result<JoinHandle<()>> {
    let retry = config.session.retry();
    let worker = match config.session.transport {
        TransportKind::Http => {
            let transport = HttpTransport::new(&config.session.admin_host)?;
            info!("delivering changes to {}", config.session.admin_host);
            tokio::spawn(DeliveryQueue::with_retry(transport, retry).run(inbox))
        }
        TransportKind::Stream => {
            let transport = StreamTransport::new(&config.session.channel);
            info!(
                "delivering changes through {:?}",
                config.session.channel.display()
            );
            tokio::spawn(DeliveryQueue::with_retry(transport, retry).run(inbox))
        }
    };

    Ok(worker)
}

/// Create the office registry sentinel file if it does not exist yet.
fn write_registry_sentinel() {
    let sentinel = match path::registry_sentinel_file() {
        Ok(sentinel) => sentinel,
        Err(err) => {
            warn!("office registry writes stay direct: {err}");
            return;
        }
    };

    if sentinel.exists() {
        debug!(
            "registry sentinel already present at {:?}",
            sentinel.display()
        );
        return;
    }

    let written = sentinel
        .parent()
        .map_or(Ok(None), mkdirp::mkdirp)
        .and_then(|_| std::fs::write(&sentinel, ""));
    match written {
        Ok(()) => info!("registry sentinel created at {:?}", sentinel.display()),
        Err(err) => warn!("office registry writes stay direct: {err}"),
    }
}

/// Watch session error types.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No home directory to locate default file paths.
    #[error(transparent)]
    NoWayHome(#[from] path::NoWayHome),

    /// Schema catalog loading fails.
    #[error(transparent)]
    Catalog(#[from] crate::catalog::Error),

    /// Settings bus access fails.
    #[error(transparent)]
    Bus(#[from] crate::bus::Error),

    /// HTTP transport construction fails.
    #[error(transparent)]
    Http(#[from] crate::delivery::http::Error),
}

/// Friendly result alias :3
pub type Result<T, E = Error> = std::result::Result<T, E>;
