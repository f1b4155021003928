// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Session settings bus access.
//!
//! Oxidrift observes the session settings bus two ways: a long-lived watch
//! that streams raw change notifications, and point reads that fetch the
//! current value of one key. Both go through the `dconf` binary, which every
//! session with a settings bus ships. Reads are modeled behind the
//! [`SettingsBus`] trait so resolution logic can run against a fake bus in
//! tests.
//!
//! # Watch Stream Layout
//!
//! `dconf watch /` reports one event as a path line followed by indented
//! detail lines and a terminating blank line. A path ending in `/` names a
//! directory whose changed keys follow as the detail lines. Any other path
//! names a single changed key whose printed value follows as the detail
//! lines. Printed values in the stream are ignored here; every emitted value
//! is re-read through the bus so value text and signature come from one
//! source.

use crate::variant;

use std::{
    ffi::OsStr,
    io::Error as IoError,
    process::{Command, Stdio},
};
use tokio::{
    io::{AsyncBufReadExt, BufReader, Lines},
    process::{Child, ChildStdout, Command as AsyncCommand},
};

/// Point read access to the session settings bus.
pub trait SettingsBus {
    /// Read current value and type signature of an absolute key.
    ///
    /// # Errors
    ///
    /// - Return [`Error::UnsetKey`] if the key has no value set.
    fn read(&self, key: &str) -> Result<TypedValue>;

    /// Read a key owned by an external registry bridge.
    ///
    /// Registry bridges write through the bus but are not introspectable
    /// through it, so this read goes through an external command and its
    /// signature is inferred from the printed value text.
    ///
    /// # Errors
    ///
    /// - Return [`Error::UnsetKey`] if the key has no value set.
    fn read_external(&self, key: &str) -> Result<TypedValue>;
}

/// A printed value together with its type signature.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TypedValue {
    /// Printed value text.
    pub text: String,

    /// Type signature of the value.
    pub signature: String,
}

/// Settings bus access through the `dconf` binary.
#[derive(Clone, Debug)]
pub struct DconfCli {
    program: String,
}

impl DconfCli {
    /// Construct new bus access through the `dconf` binary on `$PATH`.
    pub fn new() -> Self {
        Self {
            program: "dconf".into(),
        }
    }

    fn read_key(&self, key: &str) -> Result<TypedValue> {
        let text = syscall_non_interactive(&self.program, ["read", key])?;
        if text.is_empty() {
            return Err(Error::UnsetKey {
                key: key.to_owned(),
            });
        }

        let signature = variant::infer_signature(&text).map_err(|err| Error::Signature {
            source: err,
            key: key.to_owned(),
        })?;

        Ok(TypedValue { text, signature })
    }
}

impl Default for DconfCli {
    fn default() -> Self {
        Self::new()
    }
}

impl SettingsBus for DconfCli {
    fn read(&self, key: &str) -> Result<TypedValue> {
        self.read_key(key)
    }

    fn read_external(&self, key: &str) -> Result<TypedValue> {
        self.read_key(key)
    }
}

/// A raw change notification from the watch stream.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Notification {
    /// Changed path. A directory when it ends in `/`, a single key otherwise.
    pub path: String,

    /// Key names relative to the path for directory notifications.
    pub keys: Vec<String>,
}

/// Long-lived watch over the whole settings bus.
#[derive(Debug)]
pub struct SessionWatch {
    child: Child,
    lines: Lines<BufReader<ChildStdout>>,
    assembler: EventAssembler,
}

impl SessionWatch {
    /// Spawn `dconf watch /` and stream its notifications.
    ///
    /// # Errors
    ///
    /// - Return [`Error::Invoke`] if the watcher process cannot be spawned.
    /// - Return [`Error::NoWatchOutput`] if the watcher process exposes no
    ///   readable output.
    pub fn spawn() -> Result<Self> {
        let mut child = AsyncCommand::new("dconf")
            .args(["watch", "/"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| Error::Invoke {
                source: err,
                program: "dconf".into(),
            })?;

        let stdout = child.stdout.take().ok_or(Error::NoWatchOutput)?;

        Ok(Self {
            child,
            lines: BufReader::new(stdout).lines(),
            assembler: EventAssembler::default(),
        })
    }

    /// Wait for the next complete change notification.
    ///
    /// Returns `None` once the watcher process closes its output.
    ///
    /// # Errors
    ///
    /// - Return [`Error::WatchRead`] if the watch stream cannot be read.
    pub async fn next(&mut self) -> Result<Option<Notification>> {
        loop {
            let line = self
                .lines
                .next_line()
                .await
                .map_err(|err| Error::WatchRead { source: err })?;

            match line {
                Some(line) => {
                    if let Some(notification) = self.assembler.feed(&line) {
                        return Ok(Some(notification));
                    }
                }
                None => return Ok(self.assembler.finish()),
            }
        }
    }

    /// Stop watching by killing the watcher process.
    ///
    /// # Errors
    ///
    /// - Return [`Error::WatchStop`] if the watcher process will not die.
    pub async fn shutdown(mut self) -> Result<()> {
        self.child
            .kill()
            .await
            .map_err(|err| Error::WatchStop { source: err })
    }
}

/// Assemble complete notifications out of raw watch stream lines.
#[derive(Debug, Default)]
struct EventAssembler {
    pending: Option<Notification>,
}

impl EventAssembler {
    fn feed(&mut self, line: &str) -> Option<Notification> {
        if line.starts_with('/') {
            // INVARIANT: A new path line completes any event still pending.
            let finished = self.pending.take();
            self.pending = Some(Notification {
                path: line.trim_end().to_owned(),
                keys: Vec::new(),
            });
            return finished;
        }

        if line.trim().is_empty() {
            return self.pending.take();
        }

        if let Some(pending) = self.pending.as_mut() {
            if pending.path.ends_with('/') {
                pending.keys.push(line.trim().to_owned());
            }
        }

        None
    }

    fn finish(&mut self) -> Option<Notification> {
        self.pending.take()
    }
}

fn syscall_non_interactive(
    cmd: impl AsRef<OsStr>,
    args: impl IntoIterator<Item = impl AsRef<OsStr>>,
) -> Result<String> {
    let output = Command::new(cmd.as_ref())
        .args(args)
        .stdin(Stdio::null())
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

/// Settings bus error types.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Bus binary cannot be run.
    #[error("failed to invoke {program:?}")]
    Invoke {
        #[source]
        source: IoError,
        program: String,
    },

    /// Bus binary reported failure.
    #[error("command {program:?} failed:\n{message}")]
    Syscall { program: String, message: String },

    /// Key has no value set.
    #[error("no value set at {key}")]
    UnsetKey { key: String },

    /// Printed value text defeats signature inference.
    #[error("cannot infer type signature for {key}")]
    Signature {
        #[source]
        source: variant::Error,
        key: String,
    },

    /// Watcher process exposes no readable output.
    #[error("watcher process has no readable output")]
    NoWatchOutput,

    /// Watch stream cannot be read.
    #[error("failed to read from watcher process")]
    WatchRead {
        #[source]
        source: IoError,
    },

    /// Watcher process will not die.
    #[error("failed to stop watcher process")]
    WatchStop {
        #[source]
        source: IoError,
    },
}

/// Friendly result alias :3
pub type Result<T, E = Error> = std::result::Result<T, E>;
