use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use relaygate_dispatcher::{ChatRequest, Error as DispatchError};
use relaygate_protocol::{InboundChatFrame, QueuedResponse};
use tracing::warn;

use crate::{auth_middleware::BearerIdentity, state::AppState};

/// `POST /chat` — HTTP enqueue endpoint (`SPEC_FULL.md` §4.E's "Ambient
/// addition"). Bearer-authenticated; queues a dispatch and returns
/// immediately without waiting for the stream to complete.
pub async fn enqueue_chat(
    State(state): State<AppState>,
    BearerIdentity(identity): BearerIdentity,
    Json(frame): Json<InboundChatFrame>,
) -> impl IntoResponse {
    let request = ChatRequest {
        conversation_id: frame.room_id,
        text: frame.msg,
        model_id: frame.model,
    };

    match state.gateway.dispatcher.enqueue(&identity, request) {
        Ok(ticket_id) => (StatusCode::OK, Json(QueuedResponse::new(ticket_id))).into_response(),
        Err(DispatchError::Conflict) => (
            StatusCode::CONFLICT,
            Json(serde_json::json!({ "error": "conflict" })),
        )
            .into_response(),
        Err(DispatchError::BadRequest(reason)) => (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": reason })),
        )
            .into_response(),
        Err(err @ (DispatchError::Unavailable(_) | DispatchError::Internal(_))) => {
            warn!(%err, "chat enqueue failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({ "error": err.token() })),
            )
                .into_response()
        },
    }
}
