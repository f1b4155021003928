// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Capture a desktop session's configuration drift and deliver it to a
//! profile building admin service.
//!
//! The session side watches the settings bus and browser profile files,
//! resolves raw key paths to schema names through a [`catalog`] of the
//! host's schemas, and ships change records over HTTP or a virtio device
//! channel with retry. The admin side collects delivered records per
//! namespace, remembers which changes the operator selected, and merges
//! changesets into deployment profiles.

pub mod browser;
pub mod bus;
pub mod catalog;
pub mod collector;
pub mod config;
pub mod delivery;
pub mod merge;
pub mod path;
pub mod record;
pub mod resolver;
pub mod session;
pub mod store;
pub mod variant;
