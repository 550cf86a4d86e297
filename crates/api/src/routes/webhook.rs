use axum::{
    Json,
    extract::State,
    http::{HeaderMap, StatusCode},
};
use threadline_domain::ingest::{InboundEvent, IngestOutcome};

use crate::{error::ApiError, observability, state::AppState};

const CLIENT_TOKEN_HEADER: &str = "client-token";

/// Z-API "on message received". Busy conversations answer 409 so the provider
/// redelivers; redeliveries of stored messages answer 200.
pub(super) async fn receive_zapi(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(event): Json<InboundEvent>,
) -> Result<(StatusCode, Json<IngestOutcome>), ApiError> {
    if let Some(expected) = state.config.webhook_token() {
        let presented = headers
            .get(CLIENT_TOKEN_HEADER)
            .and_then(|value| value.to_str().ok());
        if presented != Some(expected) {
            observability::register_inbound_event("rejected");
            tracing::warn!("webhook rejected, client token mismatch");
            return Err(ApiError::Unauthorized);
        }
    }

    let outcome = match state.services.ingest.handle(&event).await {
        Ok(outcome) => outcome,
        Err(err) => {
            let err = ApiError::from(err);
            if matches!(err, ApiError::LockBusy) {
                observability::register_inbound_event("busy");
                tracing::info!(
                    message_id = event.message_id.as_deref().unwrap_or("-"),
                    "conversation busy, asking provider to redeliver"
                );
            }
            return Err(err);
        }
    };

    let label = match &outcome {
        IngestOutcome::Stored(receipt) if receipt.duplicate => "duplicate",
        IngestOutcome::Stored(_) => "stored",
        IngestOutcome::Ignored { .. } => "ignored",
    };
    observability::register_inbound_event(label);
    Ok((StatusCode::OK, Json(outcome)))
}
