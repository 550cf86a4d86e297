use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::Deserialize;
use threadline_domain::labels::ConversationLabel;
use threadline_domain::ports::UpsertOutcome;
use validator::Validate;

use crate::{error::ApiError, state::AppState, validation};

#[derive(Debug, Deserialize, Validate)]
pub(super) struct AddLabelRequest {
    #[validate(length(min = 1, max = 64))]
    label: String,
}

pub(super) async fn add_label(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
    Json(payload): Json<AddLabelRequest>,
) -> Result<(StatusCode, Json<ConversationLabel>), ApiError> {
    validation::validate(&payload)?;
    let outcome = state
        .services
        .labels
        .add(&conversation_id, &payload.label)
        .await?;
    Ok(match outcome {
        UpsertOutcome::Inserted(label) => (StatusCode::CREATED, Json(label)),
        UpsertOutcome::Existing(label) => (StatusCode::OK, Json(label)),
    })
}

pub(super) async fn list_labels(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
) -> Result<Json<Vec<ConversationLabel>>, ApiError> {
    let labels = state.services.labels.list(&conversation_id).await?;
    Ok(Json(labels))
}
