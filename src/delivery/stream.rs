// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Persistent framed stream transport.
//!
//! Virtual machine sessions have no network route to the admin endpoint, but
//! they do get a guest channel device whose far end the admin reads. This
//! transport writes envelopes onto such a channel as a framed byte stream.
//!
//! # Framing
//!
//! Opening the channel writes the protocol preamble [`PREAMBLE`] once. Every
//! envelope then goes out as its serialized JSON followed by [`TERMINATOR`],
//! written in chunks of at most [`CHUNK_SIZE`] bytes. A write failure closes
//! the channel; the next delivery attempt reopens it and starts with a fresh
//! preamble, so the reader may meet a preamble mid-stream after a reconnect.
//!
//! [`decode_frames`] is the symmetric reader: it strips preambles, splits on
//! the terminator, and reports trailing bytes as a partial frame instead of
//! delivering them.

use crate::{
    delivery::{self, Transport},
    record::Envelope,
};

use std::path::PathBuf;
use tokio::{
    fs::{File, OpenOptions},
    io::AsyncWriteExt,
};
use tracing::{debug, error};

/// Protocol preamble written once per channel open.
pub const PREAMBLE: &str = ":ODR_PR:1:";

/// Frame terminator written after every envelope.
pub const TERMINATOR: &str = ":ODR_MSG_END:";

/// Upper bound on a single channel write.
pub const CHUNK_SIZE: usize = 2048;

/// Submit changes over one long-lived framed channel.
pub struct StreamTransport {
    path: PathBuf,
    channel: Option<File>,
}

impl StreamTransport {
    /// Construct new transport over the channel device at `path`.
    ///
    /// The channel is opened lazily on the first delivery.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            channel: None,
        }
    }

    async fn open_channel(&self) -> Result<File> {
        let mut channel = OpenOptions::new()
            .append(true)
            .create(true)
            .open(&self.path)
            .await
            .map_err(|source| Error::Open {
                source,
                path: self.path.clone(),
            })?;

        channel
            .write_all(PREAMBLE.as_bytes())
            .await
            .map_err(|source| Error::Write {
                source,
                path: self.path.clone(),
            })?;
        debug!("opened delivery channel at {:?}", self.path.display());

        Ok(channel)
    }
}

impl Transport for StreamTransport {
    async fn deliver(&mut self, envelope: &Envelope) -> delivery::Result<()> {
        let mut channel = match self.channel.take() {
            Some(channel) => channel,
            None => self.open_channel().await?,
        };

        let frame = encode_frame(envelope)?;
        match write_chunked(&mut channel, frame.as_bytes()).await {
            Ok(()) => {
                // INVARIANT: The channel is kept only after a whole frame
                // made it out. A torn frame must not be continued.
                self.channel = Some(channel);
                Ok(())
            }
            Err(source) => {
                error!(
                    "channel write failed mid frame, reopening on next attempt: {source}"
                );
                Err(Error::Write {
                    source,
                    path: self.path.clone(),
                }
                .into())
            }
        }
    }
}

fn encode_frame(envelope: &Envelope) -> Result<String> {
    let mut frame = serde_json::to_string(envelope).map_err(|source| Error::Encode { source })?;
    frame.push_str(TERMINATOR);
    Ok(frame)
}

async fn write_chunked(channel: &mut File, frame: &[u8]) -> std::io::Result<()> {
    for chunk in frame.chunks(CHUNK_SIZE) {
        channel.write_all(chunk).await?;
    }

    channel.flush().await
}

/// Outcome of decoding a framed byte stream.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Decoded {
    /// Envelopes recovered from complete frames.
    pub envelopes: Vec<Envelope>,

    /// Trailing bytes that never saw their terminator.
    pub partial: Option<String>,

    /// Amount of complete frames that did not decode.
    pub skipped: usize,
}

/// Decode a framed stream back into envelopes.
///
/// Preambles are stripped wherever a frame starts with one, which covers both
/// the initial channel open and reconnects mid-stream. Complete frames that
/// fail to decode are counted, not delivered.
pub fn decode_frames(raw: &str) -> Decoded {
    let mut envelopes = Vec::new();
    let mut skipped = 0;
    let mut rest = raw;

    while let Some((frame, remaining)) = rest.split_once(TERMINATOR) {
        rest = remaining;
        let frame = strip_preambles(frame);
        if frame.is_empty() {
            continue;
        }

        match serde_json::from_str(frame) {
            Ok(envelope) => envelopes.push(envelope),
            Err(error) => {
                debug!("skip undecodable frame: {error}");
                skipped += 1;
            }
        }
    }

    let tail = strip_preambles(rest);
    let partial = (!tail.is_empty()).then(|| tail.to_owned());

    Decoded {
        envelopes,
        partial,
        skipped,
    }
}

fn strip_preambles(frame: &str) -> &str {
    let mut frame = frame;
    while let Some(stripped) = frame.strip_prefix(PREAMBLE) {
        frame = stripped;
    }

    frame
}

/// Stream transport error types.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Channel device cannot be opened.
    #[error("failed to open delivery channel at {:?}", path.display())]
    Open {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Channel write did not complete.
    #[error("failed to write to delivery channel at {:?}", path.display())]
    Write {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Envelope cannot be serialized into a frame.
    #[error("failed to encode envelope frame")]
    Encode {
        #[source]
        source: serde_json::Error,
    },
}

/// Friendly result alias :3
pub type Result<T, E = Error> = std::result::Result<T, E>;
