//! Wire types shared between the WebSocket/HTTP edge, the dispatcher, and the
//! bus. Every type here is parsed once at an edge and never re-inspected as
//! raw JSON downstream (see `SPEC_FULL.md` §9, "dynamic typing around
//! envelopes").

use serde::{Deserialize, Serialize};

/// Maximum size of an inbound WebSocket text frame, in bytes.
pub const MAX_INBOUND_FRAME_BYTES: usize = 64 * 1024;

/// Default request subject on the bus.
pub const DEFAULT_REQUEST_SUBJECT: &str = "chat.request";
/// Default durable raw-memory subject on the bus.
pub const DEFAULT_RAW_MEMORY_SUBJECT: &str = "memory.raw";

/// Header carrying the ephemeral reply subject on a published request.
pub const HEADER_REPLY: &str = "Reply";
/// Header carrying the (currently vestigial) ack subject.
pub const HEADER_ACK: &str = "Ack";
/// Header a worker sets on an error chunk.
pub const HEADER_ERROR: &str = "Error";

/// Build the ephemeral reply subject for a ticket.
#[must_use]
pub fn reply_subject(ticket_id: &str) -> String {
    format!("resp.{ticket_id}")
}

/// Build the (reserved, currently unused) ack subject for a ticket.
#[must_use]
pub fn ack_subject(ticket_id: &str) -> String {
    format!("inbox.{ticket_id}")
}

/// Session-cache hot buffer list key for a conversation.
#[must_use]
pub fn hot_buffer_key(conversation_id: &str) -> String {
    format!("conv:{conversation_id}:messages")
}

/// Session-cache user-preference key.
#[must_use]
pub fn user_persona_key(subject: &str) -> String {
    format!("user:persona:{subject}")
}

/// Session-cache revocation-set key.
pub const REVOCATION_SET_KEY: &str = "auth:revoked";

// ── Inbound (client → edge) ─────────────────────────────────────────────────

/// A chat request as submitted by a client, either over the WebSocket or the
/// HTTP enqueue endpoint. Field names match the wire contract, not the
/// internal `ChatRequest` model (`room_id`/`msg` are historical client
/// naming kept for wire compatibility).
#[derive(Debug, Clone, Deserialize)]
pub struct InboundChatFrame {
    pub room_id: String,
    pub msg: String,
    #[serde(default)]
    pub model: Option<String>,
}

// ── Outbound (edge → client) ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Delta {
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Choice {
    pub delta: Delta,
    pub finish_reason: Option<String>,
}

/// A single streamed chunk, in the shape both the worker publishes on the
/// bus and the edge forwards to the client unchanged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkFrame {
    pub choices: Vec<Choice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub done: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl ChunkFrame {
    #[must_use]
    pub fn delta(content: impl Into<String>) -> Self {
        Self {
            choices: vec![Choice {
                delta: Delta {
                    content: content.into(),
                },
                finish_reason: None,
            }],
            done: None,
            id: None,
        }
    }

    #[must_use]
    pub fn terminal(content: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            choices: vec![Choice {
                delta: Delta {
                    content: content.into(),
                },
                finish_reason: Some("stop".to_string()),
            }],
            done: Some(true),
            id: Some(id.into()),
        }
    }

    /// The text delta carried in the first choice, if any.
    #[must_use]
    pub fn content(&self) -> Option<&str> {
        self.choices.first().map(|c| c.delta.content.as_str())
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.done.unwrap_or(false)
            || self
                .choices
                .first()
                .and_then(|c| c.finish_reason.as_deref())
                .is_some()
    }
}

/// An error surfaced to the client, either as a standalone frame or as the
/// terminal frame of a failed stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorFrame {
    pub error: String,
}

impl ErrorFrame {
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            error: reason.into(),
        }
    }
}

/// HTTP enqueue endpoint's success response.
#[derive(Debug, Clone, Serialize)]
pub struct QueuedResponse {
    pub status: &'static str,
    pub id: String,
}

impl QueuedResponse {
    #[must_use]
    pub fn new(ticket_id: impl Into<String>) -> Self {
        Self {
            status: "queued",
            id: ticket_id.into(),
        }
    }
}

// ── Bus envelope ─────────────────────────────────────────────────────────────

/// The request envelope published to the request subject, and mirrored to
/// the raw-memory stream as part of a `RawMemoryRecord`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatEnvelope {
    pub conversation_id: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
    pub owner: String,
    pub ticket_id: String,
}

/// The request/response pair published once per completed `StreamTicket` to
/// the durable raw-memory stream, for the (out-of-scope) memory-rollup
/// worker to consume.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawMemoryRecord {
    pub conversation_id: String,
    pub owner: String,
    pub request_text: String,
    pub response_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
    pub submitted_at: chrono::DateTime<chrono::Utc>,
    pub completed_at: chrono::DateTime<chrono::Utc>,
}

/// A hot-buffer entry cached for downstream memory processing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HotBufferEntry {
    pub role: Role,
    pub text: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inbound_frame_parses_room_id_and_msg() {
        let frame: InboundChatFrame =
            serde_json::from_str(r#"{"room_id":"r1","msg":"hi"}"#).unwrap();
        assert_eq!(frame.room_id, "r1");
        assert_eq!(frame.msg, "hi");
        assert!(frame.model.is_none());
    }

    #[test]
    fn chunk_frame_terminal_detection() {
        let delta = ChunkFrame::delta("he");
        assert!(!delta.is_terminal());
        let done = ChunkFrame::terminal("!", "t1");
        assert!(done.is_terminal());
    }

    #[test]
    fn reply_subject_is_namespaced() {
        assert_eq!(reply_subject("abc"), "resp.abc");
        assert_eq!(ack_subject("abc"), "inbox.abc");
    }

    #[test]
    fn error_frame_serializes_to_error_key() {
        let frame = ErrorFrame::new("conflict");
        let json = serde_json::to_string(&frame).unwrap();
        assert_eq!(json, r#"{"error":"conflict"}"#);
    }
}
