// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Reliable delivery of change envelopes to the admin side.
//!
//! The session half of the pipeline cannot assume the admin endpoint is
//! reachable whenever a change happens. Submissions therefore go through a
//! [`DeliveryQueue`] that holds envelopes until their delivery is confirmed,
//! in strict submission order.
//!
//! # Flush Discipline
//!
//! A flush walks the backlog front to back. Every confirmed delivery pops its
//! envelope; the first failure ends the flush with everything else still
//! queued. Nothing is reordered and nothing is dropped before the transport
//! reported success for it, so the endpoint sees every envelope at least
//! once. After a failed flush a retry timer drives further rounds until the
//! backlog drains, at which point the timer goes quiet again.
//!
//! # Transports
//!
//! Two bindings implement [`Transport`]: [`http::HttpTransport`] opens an
//! independent connection per attempt, [`stream::StreamTransport`] keeps one
//! framed channel open across attempts. The queue treats both the same.
//!
//! # See Also
//!
//! - [`crate::record`]
//! - [`crate::session`]

pub mod http;
pub mod stream;

use crate::record::{Envelope, Namespace};

use std::collections::VecDeque;
use tokio::{
    sync::mpsc::UnboundedReceiver,
    time::{interval_at, Duration, Instant, MissedTickBehavior},
};
use tracing::{debug, warn};

/// Default pause between delivery retry rounds.
pub const DEFAULT_RETRY: Duration = Duration::from_secs(5);

/// One-way channel to the admin endpoint.
///
/// A delivery either completes or reports failure; the queue decides what to
/// do with failures. Implementations keep whatever connection state they need
/// between attempts.
#[allow(async_fn_in_trait)]
pub trait Transport {
    async fn deliver(&mut self, envelope: &Envelope) -> Result<()>;
}

/// Ordered at-least-once delivery over an unreliable [`Transport`].
pub struct DeliveryQueue<T>
where
    T: Transport,
{
    transport: T,
    backlog: VecDeque<Envelope>,
    retry: Duration,
}

impl<T> DeliveryQueue<T>
where
    T: Transport,
{
    /// Construct new queue with the default retry interval.
    pub fn new(transport: T) -> Self {
        Self::with_retry(transport, DEFAULT_RETRY)
    }

    /// Construct new queue with a custom retry interval.
    pub fn with_retry(transport: T, retry: Duration) -> Self {
        Self {
            transport,
            backlog: VecDeque::new(),
            retry,
        }
    }

    /// Enqueue a payload for a namespace and attempt an immediate flush.
    pub async fn submit(&mut self, ns: Namespace, data: impl Into<String>) {
        self.backlog.push_back(Envelope::new(ns, data));
        self.flush().await;
    }

    /// Deliver the backlog front to back until empty or the first failure.
    ///
    /// Returns whether the backlog drained. An envelope is popped only after
    /// the transport confirmed its delivery.
    pub async fn flush(&mut self) -> bool {
        while let Some(envelope) = self.backlog.front() {
            match self.transport.deliver(envelope).await {
                Ok(()) => {
                    debug!("delivered submission for {}", envelope.ns);
                    self.backlog.pop_front();
                }
                Err(error) => {
                    warn!("delivery failed, {} submissions held back: {error}", self.backlog.len());
                    return false;
                }
            }
        }

        true
    }

    /// Amount of submissions still awaiting delivery.
    pub fn pending(&self) -> usize {
        self.backlog.len()
    }

    /// One last flush attempt, then discard whatever remains.
    pub async fn give_up(&mut self) {
        self.flush().await;
        if !self.backlog.is_empty() {
            warn!("give up on {} undelivered submissions", self.backlog.len());
            self.backlog.clear();
        }
    }

    /// Drive the queue from an inbox until the sending side closes.
    ///
    /// Every received envelope is flushed immediately. While the backlog is
    /// non-empty a retry timer re-runs the flush each interval. Closing the
    /// inbox triggers one final flush before the remainder is abandoned.
    pub async fn run(mut self, mut inbox: UnboundedReceiver<Envelope>) {
        let mut timer = interval_at(Instant::now() + self.retry, self.retry);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                received = inbox.recv() => match received {
                    Some(envelope) => {
                        let was_idle = self.backlog.is_empty();
                        self.backlog.push_back(envelope);

                        // INVARIANT: The retry clock starts fresh when a
                        // drained queue hits its first failure, not when an
                        // already failing queue grows.
                        if !self.flush().await && was_idle {
                            timer.reset();
                        }
                    }
                    None => break,
                },
                _ = timer.tick(), if !self.backlog.is_empty() => {
                    self.flush().await;
                }
            }
        }

        self.give_up().await;
    }
}

/// Delivery error types.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// HTTP binding failure.
    #[error(transparent)]
    Http(#[from] http::Error),

    /// Framed stream binding failure.
    #[error(transparent)]
    Stream(#[from] stream::Error),
}

/// Friendly result alias :3
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::{Arc, Mutex};
    use tokio::sync::mpsc;

    /// Transport that fails a scripted amount of attempts before recovering.
    #[derive(Clone, Default)]
    struct FlakyTransport {
        fail_first: Arc<Mutex<usize>>,
        attempts: Arc<Mutex<usize>>,
        delivered: Arc<Mutex<Vec<Envelope>>>,
    }

    impl FlakyTransport {
        fn failing(amount: usize) -> Self {
            let transport = Self::default();
            *transport.fail_first.lock().unwrap() = amount;
            transport
        }

        fn attempts(&self) -> usize {
            *self.attempts.lock().unwrap()
        }

        fn delivered(&self) -> Vec<Envelope> {
            self.delivered.lock().unwrap().clone()
        }
    }

    impl Transport for FlakyTransport {
        async fn deliver(&mut self, envelope: &Envelope) -> Result<()> {
            *self.attempts.lock().unwrap() += 1;
            let mut fail_first = self.fail_first.lock().unwrap();
            if *fail_first > 0 {
                *fail_first -= 1;
                return Err(http::Error::Status {
                    status: 503,
                    url: "http://admin.test/changes/submit".into(),
                }
                .into());
            }

            self.delivered.lock().unwrap().push(envelope.clone());
            Ok(())
        }
    }

    fn envelope(data: &str) -> Envelope {
        Envelope::new(Namespace::GSettings, data)
    }

    #[tokio::test]
    async fn flush_walks_the_backlog_in_submission_order() {
        let transport = FlakyTransport::default();
        let mut queue = DeliveryQueue::new(transport.clone());

        queue.submit(Namespace::GSettings, "one").await;
        queue.submit(Namespace::GSettings, "two").await;
        queue.submit(Namespace::GSettings, "three").await;

        assert_eq!(queue.pending(), 0);
        assert_eq!(
            transport.delivered(),
            vec![envelope("one"), envelope("two"), envelope("three")]
        );
    }

    #[tokio::test]
    async fn first_failure_stops_the_flush_without_dropping() {
        let transport = FlakyTransport::failing(1);
        let mut queue = DeliveryQueue::new(transport.clone());

        queue.submit(Namespace::GSettings, "one").await;
        queue.submit(Namespace::GSettings, "two").await;

        // First attempt failed, so both submissions are still queued and the
        // second was never attempted out of order.
        assert_eq!(queue.pending(), 2);
        assert_eq!(transport.delivered(), Vec::new());

        assert!(queue.flush().await);
        assert_eq!(transport.delivered(), vec![envelope("one"), envelope("two")]);
    }

    #[tokio::test]
    async fn submissions_pop_only_after_confirmed_delivery() {
        let transport = FlakyTransport::failing(2);
        let mut queue = DeliveryQueue::new(transport.clone());

        queue.submit(Namespace::GSettings, "one").await;
        assert_eq!(queue.pending(), 1);

        queue.flush().await;
        assert_eq!(queue.pending(), 1);

        queue.flush().await;
        assert_eq!(queue.pending(), 0);
        assert_eq!(transport.attempts(), 3);
        assert_eq!(transport.delivered(), vec![envelope("one")]);
    }

    #[tokio::test]
    async fn give_up_discards_the_remainder() {
        let transport = FlakyTransport::failing(usize::MAX);
        let mut queue = DeliveryQueue::new(transport.clone());

        queue.submit(Namespace::GSettings, "one").await;
        queue.submit(Namespace::GSettings, "two").await;
        queue.give_up().await;

        assert_eq!(queue.pending(), 0);
        assert_eq!(transport.delivered(), Vec::new());
    }

    #[tokio::test(start_paused = true)]
    async fn retry_timer_drives_flushes_until_the_backlog_drains() {
        let transport = FlakyTransport::failing(2);
        let queue = DeliveryQueue::new(transport.clone());
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(queue.run(rx));

        tx.send(envelope("one")).unwrap();
        tx.send(envelope("two")).unwrap();

        // Both immediate attempts fail. The next timed round comes one retry
        // interval later and delivers everything in order.
        tokio::time::sleep(DEFAULT_RETRY + Duration::from_secs(1)).await;
        assert_eq!(transport.delivered(), vec![envelope("one"), envelope("two")]);
        assert_eq!(transport.attempts(), 4);

        drop(tx);
        worker.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn closing_the_inbox_flushes_once_more_then_abandons() {
        let transport = FlakyTransport::failing(usize::MAX);
        let queue = DeliveryQueue::with_retry(transport.clone(), Duration::from_millis(50));
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(queue.run(rx));

        tx.send(envelope("doomed")).unwrap();
        drop(tx);
        worker.await.unwrap();

        // One attempt on submission, one during the parting flush.
        assert_eq!(transport.attempts(), 2);
        assert_eq!(transport.delivered(), Vec::new());
    }
}
