use std::{collections::HashMap, sync::Arc, time::Duration};

use relaygate_auth::Identity;
use relaygate_bus::BusClient;
use relaygate_cache::SessionCache;
use relaygate_protocol::{ChatEnvelope, ChunkFrame, ErrorFrame, HotBufferEntry, RawMemoryRecord, Role};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::{
    error::{Error, Result},
    sink::{Chunk, ChunkPayload, Sink},
    ticket::{StreamTicket, TicketRegistry},
};

/// A chat request as submitted by a client (`SPEC_FULL.md` §3).
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub conversation_id: String,
    pub text: String,
    pub model_id: Option<String>,
}

/// How a `dispatch` call concluded. Only `Completed` results in a
/// `RawMemoryRecord` being published (invariants 3 and 4, `SPEC_FULL.md` §8).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    Timeout,
    WorkerError,
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub request_subject: String,
    pub raw_memory_subject: String,
    pub idle_chunk_timeout: Duration,
    pub total_ticket_timeout: Duration,
    pub drain_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            request_subject: relaygate_protocol::DEFAULT_REQUEST_SUBJECT.to_string(),
            raw_memory_subject: relaygate_protocol::DEFAULT_RAW_MEMORY_SUBJECT.to_string(),
            idle_chunk_timeout: Duration::from_secs(120),
            total_ticket_timeout: Duration::from_secs(600),
            drain_timeout: Duration::from_secs(10),
        }
    }
}

enum Delivery {
    Frame(ChunkFrame),
    Error(String),
}

fn parse_worker_payload(payload: &[u8]) -> Option<Delivery> {
    if let Ok(frame) = serde_json::from_slice::<ChunkFrame>(payload) {
        return Some(Delivery::Frame(frame));
    }
    if let Ok(err) = serde_json::from_slice::<ErrorFrame>(payload) {
        return Some(Delivery::Error(err.error));
    }
    None
}

/// The protocol engine (`SPEC_FULL.md` §4.D). Accepts a chat request,
/// allocates reply subjects, subscribes before publishing, relays chunks to
/// the caller's sink, and enforces timeouts and cancellation.
pub struct Dispatcher {
    bus: Arc<dyn BusClient>,
    cache: Arc<dyn SessionCache>,
    registry: Arc<TicketRegistry>,
    config: DispatcherConfig,
}

impl Dispatcher {
    #[must_use]
    pub fn new(
        bus: Arc<dyn BusClient>,
        cache: Arc<dyn SessionCache>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            bus,
            cache,
            registry: Arc::new(TicketRegistry::new()),
            config,
        }
    }

    /// `dispatch(identity, chat_request, sink) -> completes | fails(kind)`.
    /// Awaits the full relay loop; used by the WebSocket Edge, which forwards
    /// every `Chunk` to the client as it arrives.
    pub async fn dispatch(
        &self,
        identity: &Identity,
        request: ChatRequest,
        sink: Sink,
    ) -> Result<Outcome> {
        let ticket = self.admit_ticket(identity, &request)?;

        let outcome = self.run_ticket(ticket.clone(), request, sink).await;
        self.registry.retire(&ticket.owner, &ticket.conversation_id);
        outcome
    }

    /// Admit the request and hand the relay loop off to a background task,
    /// returning the `ticket_id` as soon as admission succeeds. Used by the
    /// HTTP enqueue endpoint, which has no streaming consumer for the
    /// resulting chunks (`SPEC_FULL.md` §4.E's "Ambient addition").
    pub fn enqueue(self: &Arc<Self>, identity: &Identity, request: ChatRequest) -> Result<String> {
        let ticket = self.admit_ticket(identity, &request)?;
        let ticket_id = ticket.ticket_id.clone();

        let (sink, mut drain) = crate::sink::channel(32);
        tokio::spawn(async move { while drain.recv().await.is_some() {} });

        let dispatcher = Arc::clone(self);
        let background_ticket = ticket.clone();
        tokio::spawn(async move {
            let outcome = dispatcher.run_ticket(background_ticket.clone(), request, sink).await;
            dispatcher
                .registry
                .retire(&background_ticket.owner, &background_ticket.conversation_id);
            if let Err(err) = outcome {
                warn!(%err, ticket_id = %background_ticket.ticket_id, "enqueued dispatch failed");
            }
        });

        Ok(ticket_id)
    }

    fn admit_ticket(&self, identity: &Identity, request: &ChatRequest) -> Result<StreamTicket> {
        if request.text.is_empty() {
            return Err(Error::BadRequest("empty message".to_string()));
        }
        if request.conversation_id.is_empty() {
            return Err(Error::BadRequest("empty conversation id".to_string()));
        }

        let owner = identity.subject.clone();
        let ticket = StreamTicket::new(
            owner.clone(),
            request.conversation_id.clone(),
            self.config.total_ticket_timeout,
        );
        self.registry
            .admit(&owner, &request.conversation_id, &ticket.ticket_id)?;
        Ok(ticket)
    }

    async fn run_ticket(
        &self,
        ticket: StreamTicket,
        request: ChatRequest,
        sink: Sink,
    ) -> Result<Outcome> {
        let (tx_internal, mut rx_internal) = mpsc::unbounded_channel::<Vec<u8>>();

        let subscription = {
            let tx_internal = tx_internal.clone();
            self.bus
                .subscribe(
                    &ticket.reply_subject,
                    Box::new(move |payload| {
                        let tx_internal = tx_internal.clone();
                        Box::pin(async move {
                            let _ = tx_internal.send(payload);
                        })
                    }),
                )
                .await
                .map_err(|e| Error::Unavailable(e.to_string()))?
        };
        // The ack subject is reserved; we subscribe so the worker's publish
        // never hits a no-responders error, but currently ascribe it no
        // behaviour (`SPEC_FULL.md` §9, open question).
        let ack_subscription = self
            .bus
            .subscribe(&ticket.ack_subject, Box::new(|_| Box::pin(async {})))
            .await
            .map_err(|e| Error::Unavailable(e.to_string()))?;

        let envelope = ChatEnvelope {
            conversation_id: request.conversation_id.clone(),
            text: request.text.clone(),
            model_id: request.model_id.clone(),
            owner: ticket.owner.clone(),
            ticket_id: ticket.ticket_id.clone(),
        };
        let envelope_bytes = serde_json::to_vec(&envelope).map_err(|e| {
            Error::Internal(format!("failed to serialize chat envelope: {e}"))
        })?;

        let mut headers = HashMap::new();
        headers.insert(
            relaygate_protocol::HEADER_REPLY.to_string(),
            ticket.reply_subject.clone(),
        );
        headers.insert(
            relaygate_protocol::HEADER_ACK.to_string(),
            ticket.ack_subject.clone(),
        );

        if let Err(err) = self
            .bus
            .publish(&self.config.request_subject, envelope_bytes.clone(), headers)
            .await
        {
            let _ = self.bus.unsubscribe(subscription).await;
            let _ = self.bus.unsubscribe(ack_subscription).await;
            return Err(Error::Unavailable(err.to_string()));
        }

        if let Err(err) = self
            .cache
            .append_chunk(
                &request.conversation_id,
                &HotBufferEntry {
                    role: Role::User,
                    text: request.text.clone(),
                    timestamp: chrono::Utc::now(),
                },
            )
            .await
        {
            warn!(%err, ticket_id = %ticket.ticket_id, "failed to mirror request to hot buffer");
        }

        if let Err(err) = self
            .bus
            .publish_stream(&self.config.raw_memory_subject, envelope_bytes)
            .await
        {
            warn!(%err, ticket_id = %ticket.ticket_id, "failed to mirror request to raw-memory stream");
        }

        let outcome = self
            .relay_loop(&ticket, sink, &mut rx_internal, &request)
            .await;

        let _ = self.bus.unsubscribe(subscription).await;
        let _ = self.bus.unsubscribe(ack_subscription).await;

        outcome
    }

    async fn relay_loop(
        &self,
        ticket: &StreamTicket,
        sink: Sink,
        rx_internal: &mut mpsc::UnboundedReceiver<Vec<u8>>,
        request: &ChatRequest,
    ) -> Result<Outcome> {
        let mut sequence_number: u64 = 0;
        let mut response_buf = String::new();
        let mut cancelled = false;
        let mut drain_deadline_remaining = self.config.drain_timeout;
        let far_future = Duration::from_secs(60 * 60 * 24 * 365);

        let outcome = loop {
            let idle_sleep = tokio::time::sleep(self.config.idle_chunk_timeout);
            let total_remaining = ticket
                .deadline
                .checked_duration_since(std::time::Instant::now())
                .unwrap_or(Duration::ZERO);
            let total_sleep = tokio::time::sleep(total_remaining);
            let drain_sleep =
                tokio::time::sleep(if cancelled { drain_deadline_remaining } else { far_future });

            tokio::select! {
                () = idle_sleep, if !cancelled => {
                    let _ = sink.send(timeout_chunk(&ticket.ticket_id, sequence_number)).await;
                    break Outcome::Timeout;
                }
                () = total_sleep, if !cancelled => {
                    let _ = sink.send(timeout_chunk(&ticket.ticket_id, sequence_number)).await;
                    break Outcome::Timeout;
                }
                () = drain_sleep, if cancelled => {
                    break Outcome::Cancelled;
                }
                () = sink.closed(), if !cancelled => {
                    info!(ticket_id = %ticket.ticket_id, "sink closed, entering drain");
                    cancelled = true;
                    drain_deadline_remaining = self.config.drain_timeout;
                }
                maybe = rx_internal.recv() => {
                    let Some(raw) = maybe else {
                        break Outcome::Timeout;
                    };
                    let Some(delivery) = parse_worker_payload(&raw) else {
                        continue;
                    };
                    sequence_number += 1;

                    match delivery {
                        Delivery::Error(reason) => {
                            if !cancelled {
                                let _ = sink
                                    .send(Chunk {
                                        ticket_id: ticket.ticket_id.clone(),
                                        sequence_number,
                                        payload: ChunkPayload::Error(reason),
                                        terminal: true,
                                    })
                                    .await;
                            }
                            break Outcome::WorkerError;
                        }
                        Delivery::Frame(frame) => {
                            if let Some(content) = frame.content() {
                                response_buf.push_str(content);
                            }
                            let terminal = frame.is_terminal();
                            if !cancelled {
                                let send_result = sink
                                    .send(Chunk {
                                        ticket_id: ticket.ticket_id.clone(),
                                        sequence_number,
                                        payload: ChunkPayload::Frame(frame),
                                        terminal,
                                    })
                                    .await;
                                if send_result.is_err() {
                                    cancelled = true;
                                    drain_deadline_remaining = self.config.drain_timeout;
                                }
                            }
                            if terminal {
                                break if cancelled { Outcome::Cancelled } else { Outcome::Completed };
                            }
                        }
                    }
                }
            }
        };

        if outcome == Outcome::Completed {
            if let Err(err) = self
                .cache
                .append_chunk(
                    &request.conversation_id,
                    &HotBufferEntry {
                        role: Role::Assistant,
                        text: response_buf.clone(),
                        timestamp: chrono::Utc::now(),
                    },
                )
                .await
            {
                warn!(%err, ticket_id = %ticket.ticket_id, "failed to mirror response to hot buffer");
            }

            let record = RawMemoryRecord {
                conversation_id: request.conversation_id.clone(),
                owner: ticket.owner.clone(),
                request_text: request.text.clone(),
                response_text: response_buf,
                model_id: request.model_id.clone(),
                submitted_at: ticket.submitted_at,
                completed_at: chrono::Utc::now(),
            };
            let record_bytes = serde_json::to_vec(&record)
                .map_err(|e| Error::Internal(format!("failed to serialize raw-memory record: {e}")))?;
            if let Err(err) = self
                .bus
                .publish_stream(&self.config.raw_memory_subject, record_bytes)
                .await
            {
                warn!(%err, ticket_id = %ticket.ticket_id, "failed to publish raw-memory record");
            }
        }

        Ok(outcome)
    }
}

fn timeout_chunk(ticket_id: &str, sequence_number: u64) -> Chunk {
    Chunk {
        ticket_id: ticket_id.to_string(),
        sequence_number: sequence_number + 1,
        payload: ChunkPayload::Error("timeout".to_string()),
        terminal: true,
    }
}
