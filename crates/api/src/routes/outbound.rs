use axum::{Json, extract::State, http::StatusCode};
use serde::Deserialize;
use threadline_domain::dispatch::{DispatchOutcome, DispatchRequest};
use threadline_domain::messages::MessageType;
use threadline_domain::outbox::{OutboxStatus, SenderKind};
use validator::Validate;

use crate::{error::ApiError, observability, state::AppState, validation};

#[derive(Debug, Deserialize, Validate)]
pub(super) struct SendRequest {
    #[validate(length(min = 1, max = 128))]
    conversation_id: String,
    #[validate(length(max = 128))]
    recipient: Option<String>,
    #[serde(default)]
    #[validate(length(max = 4096))]
    content: String,
    #[serde(default)]
    message_type: MessageType,
    #[validate(url)]
    media_url: Option<String>,
    #[validate(length(min = 1, max = 256))]
    idempotency_key: Option<String>,
    #[serde(default)]
    sender_kind: SenderKind,
}

/// A provider failure is still a recorded outcome: the body carries the
/// failed outbox entry so the caller can decide whether to retry with a new key.
pub(super) async fn send(
    State(state): State<AppState>,
    Json(payload): Json<SendRequest>,
) -> Result<(StatusCode, Json<DispatchOutcome>), ApiError> {
    validation::validate(&payload)?;
    let request = DispatchRequest {
        conversation_id: payload.conversation_id.trim().to_string(),
        recipient: payload.recipient,
        content: payload.content,
        message_type: payload.message_type,
        media_url: payload.media_url,
        idempotency_key: payload.idempotency_key,
        sender_kind: payload.sender_kind,
    };
    let outcome = state.services.dispatcher.dispatch(&request).await?;
    observability::register_dispatch(outcome.status.as_str(), outcome.deduped);

    let status = match outcome.status {
        OutboxStatus::Failed => StatusCode::BAD_GATEWAY,
        _ => StatusCode::OK,
    };
    Ok((status, Json(outcome)))
}
