use std::{collections::HashMap, sync::Arc, time::Duration};

use async_nats::{Client, HeaderMap, jetstream};
use async_trait::async_trait;
use futures::{StreamExt, future::BoxFuture};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Context, Error, Result};

/// Async handler invoked for every message delivered on a subscribed
/// subject. Invocations for a given subscription are serialized — the
/// subscriber task awaits each handler call before pulling the next message.
pub type Handler = Box<dyn Fn(Vec<u8>) -> BoxFuture<'static, ()> + Send + Sync>;

/// Uniform access to the pub-sub substrate: request/reply over ephemeral
/// subjects, and a durable append-only stream for the raw-memory feed.
/// See `SPEC_FULL.md` §4.A.
#[async_trait]
pub trait BusClient: Send + Sync {
    /// Fire-and-forget publish with arbitrary string headers. Fails only on
    /// irrecoverable transport loss.
    async fn publish(
        &self,
        subject: &str,
        payload: Vec<u8>,
        headers: HashMap<String, String>,
    ) -> Result<()>;

    /// Register an async handler for every message arriving on `subject`.
    async fn subscribe(&self, subject: &str, handler: Handler) -> Result<Subscription>;

    /// Cease delivery; any in-flight handler invocation completes first.
    async fn unsubscribe(&self, subscription: Subscription) -> Result<()>;

    /// Publish to the durable, replayable raw-memory subject.
    async fn publish_stream(&self, subject: &str, payload: Vec<u8>) -> Result<()>;

    /// Whether the underlying connection is currently established.
    fn is_connected(&self) -> bool;
}

/// A live subscription. Dropping it without calling `unsubscribe` leaves the
/// background delivery task running until the process exits — callers
/// should always route it through `BusClient::unsubscribe`.
pub struct Subscription {
    subject: String,
    cancel: CancellationToken,
    task: tokio::task::JoinHandle<()>,
}

impl Subscription {
    #[must_use]
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Build a `Subscription` with no backing delivery task, for
    /// [`BusClient`] fakes in downstream crates' tests.
    #[must_use]
    pub fn noop(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            cancel: CancellationToken::new(),
            task: tokio::spawn(async {}),
        }
    }
}

/// `async-nats`-backed [`BusClient`]. Core pub-sub handles the ephemeral
/// request/reply traffic; JetStream backs the durable raw-memory stream.
pub struct NatsBus {
    client: Client,
    jetstream: jetstream::Context,
    raw_memory_stream: String,
}

impl NatsBus {
    /// Connect to the bus and ensure the durable raw-memory stream exists.
    ///
    /// Reconnection once connected is handled internally by `async-nats`
    /// with the backoff configured below (base 2s, cap 30s, per
    /// `SPEC_FULL.md` §4.A).
    pub async fn connect(url: &str, raw_memory_subject: &str) -> Result<Self> {
        info!(%url, "connecting to bus");

        let client = async_nats::ConnectOptions::new()
            .retry_on_initial_connect()
            .reconnect_delay_callback(|attempts| {
                let secs = 2u64.saturating_mul(1 << attempts.min(4)).min(30);
                Duration::from_secs(secs)
            })
            .connect(url)
            .await
            .map_err(|e| Error::Unavailable(e.to_string()))
            .context("connecting to bus")?;

        let jetstream = jetstream::new(client.clone());
        let raw_memory_stream = "relaygate-memory".to_string();

        let config = jetstream::stream::Config {
            name: raw_memory_stream.clone(),
            subjects: vec![raw_memory_subject.to_string()],
            ..Default::default()
        };

        match jetstream.get_stream(&raw_memory_stream).await {
            Ok(_) => debug!(stream = %raw_memory_stream, "raw-memory stream already exists"),
            Err(_) => {
                info!(stream = %raw_memory_stream, "creating raw-memory stream");
                jetstream
                    .create_stream(config)
                    .await
                    .map_err(|e| Error::Message(e.to_string()))
                    .context("creating raw-memory stream")?;
            },
        }

        Ok(Self {
            client,
            jetstream,
            raw_memory_stream,
        })
    }
}

#[async_trait]
impl BusClient for NatsBus {
    async fn publish(
        &self,
        subject: &str,
        payload: Vec<u8>,
        headers: HashMap<String, String>,
    ) -> Result<()> {
        let mut header_map = HeaderMap::new();
        for (k, v) in headers {
            header_map.insert(k.as_str(), v.as_str());
        }

        self.client
            .publish_with_headers(subject.to_string(), header_map, payload.into())
            .await
            .map_err(|e| Error::Unavailable(e.to_string()))?;

        Ok(())
    }

    async fn subscribe(&self, subject: &str, handler: Handler) -> Result<Subscription> {
        let mut subscriber = self
            .client
            .subscribe(subject.to_string())
            .await
            .map_err(|e| Error::Unavailable(e.to_string()))?;

        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();
        let subject_owned = subject.to_string();

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = task_cancel.cancelled() => break,
                    message = subscriber.next() => {
                        match message {
                            Some(msg) => handler(msg.payload.to_vec()).await,
                            None => break,
                        }
                    }
                }
            }
        });

        Ok(Subscription {
            subject: subject_owned,
            cancel,
            task,
        })
    }

    async fn unsubscribe(&self, subscription: Subscription) -> Result<()> {
        subscription.cancel.cancel();
        let _ = subscription.task.await;
        Ok(())
    }

    async fn publish_stream(&self, subject: &str, payload: Vec<u8>) -> Result<()> {
        let ack = self
            .jetstream
            .publish(subject.to_string(), payload.into())
            .await
            .map_err(|e| Error::Message(e.to_string()))?;

        ack.await
            .map_err(|e| Error::Message(e.to_string()))
            .context("awaiting raw-memory publish ack")?;

        Ok(())
    }

    fn is_connected(&self) -> bool {
        matches!(
            self.client.connection_state(),
            async_nats::connection::State::Connected
        )
    }
}

impl std::fmt::Debug for NatsBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NatsBus")
            .field("raw_memory_stream", &self.raw_memory_stream)
            .field("connected", &self.is_connected())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    /// In-memory fake used by the dispatcher's own tests; exercised here
    /// only to pin down the `Handler` invocation contract.
    #[tokio::test]
    async fn handler_receives_raw_bytes() {
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        let handler: Handler = Box::new(move |payload| {
            let count = count_clone.clone();
            Box::pin(async move {
                assert_eq!(payload, b"hello");
                count.fetch_add(1, Ordering::SeqCst);
            })
        });
        handler(b"hello".to_vec()).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
