// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Connection-per-attempt HTTP transport.
//!
//! Each delivery is one independent POST against the admin endpoint, so a
//! failed attempt leaves nothing behind to clean up. The payload travels as
//! the request body and the namespace rides in the URL:
//!
//! ```text
//! POST http://{host}/changes/submit/{namespace}
//! ```
//!
//! Anything but a 2xx answer counts as a failed delivery and stays in the
//! queue. The wire is plain HTTP on a trusted network, like the admin
//! endpoint expects.

use crate::{
    delivery::{self, Transport},
    record::{Envelope, Namespace},
};

use reqwest::{header::CONTENT_TYPE, Client};
use std::time::Duration;

/// Per-request deadline so a wedged endpoint cannot stall the queue.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Submit changes through one POST request per attempt.
pub struct HttpTransport {
    client: Client,
    base: String,
}

impl HttpTransport {
    /// Construct new transport aimed at an admin host like
    /// `localhost:8181`.
    ///
    /// # Errors
    ///
    /// - Return [`Error::Client`] if the HTTP client cannot be constructed.
    pub fn new(host: impl AsRef<str>) -> Result<Self> {
        let client = Client::builder()
            .build()
            .map_err(|source| Error::Client { source })?;

        Ok(Self {
            client,
            base: format!("http://{}", host.as_ref()),
        })
    }

    fn submit_url(&self, ns: Namespace) -> String {
        format!("{}/changes/submit/{}", self.base, ns.as_str())
    }
}

impl Transport for HttpTransport {
    async fn deliver(&mut self, envelope: &Envelope) -> delivery::Result<()> {
        let url = self.submit_url(envelope.ns);
        let response = self
            .client
            .post(&url)
            .header(CONTENT_TYPE, "application/json")
            .body(envelope.data.clone())
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|source| Error::Request {
                source,
                url: url.clone(),
            })?;

        if !response.status().is_success() {
            return Err(Error::Status {
                status: response.status().as_u16(),
                url,
            }
            .into());
        }

        Ok(())
    }
}

/// HTTP transport error types.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// HTTP client cannot be constructed.
    #[error("failed to construct http client")]
    Client {
        #[source]
        source: reqwest::Error,
    },

    /// Request never produced an answer.
    #[error("failed to reach admin endpoint at {url}")]
    Request {
        #[source]
        source: reqwest::Error,
        url: String,
    },

    /// Endpoint answered outside the 2xx range.
    #[error("admin endpoint at {url} answered status {status}")]
    Status { status: u16, url: String },
}

/// Friendly result alias :3
pub type Result<T, E = Error> = std::result::Result<T, E>;
