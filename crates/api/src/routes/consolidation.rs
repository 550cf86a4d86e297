use axum::{Json, extract::State};
use serde::Deserialize;
use threadline_domain::consolidation::{
    ContactMergeReport, ConversationMergeReport, SweepOptions, SweepReport,
};
use validator::Validate;

use crate::{error::ApiError, observability, state::AppState, validation};

#[derive(Debug, Default, Deserialize, Validate)]
pub(super) struct SweepRequest {
    #[serde(default)]
    dry_run: bool,
    #[validate(range(min = 1, max = 10000))]
    limit: Option<usize>,
}

pub(super) async fn sweep(
    State(state): State<AppState>,
    Json(payload): Json<SweepRequest>,
) -> Result<Json<SweepReport>, ApiError> {
    validation::validate(&payload)?;
    let options = SweepOptions {
        dry_run: payload.dry_run,
        limit: payload.limit,
    };
    let report = state.services.consolidation.sweep(&options).await?;
    Ok(Json(report))
}

#[derive(Debug, Deserialize, Validate)]
pub(super) struct MergeRequest {
    #[validate(length(min = 1, max = 128))]
    duplicate_id: String,
    #[validate(length(min = 1, max = 128))]
    canonical_id: String,
}

impl MergeRequest {
    fn ids(&self) -> Result<(&str, &str), ApiError> {
        let duplicate = self.duplicate_id.trim();
        let canonical = self.canonical_id.trim();
        if duplicate == canonical {
            return Err(ApiError::Validation(
                "duplicate_id and canonical_id must differ".into(),
            ));
        }
        Ok((duplicate, canonical))
    }
}

pub(super) async fn merge_conversations(
    State(state): State<AppState>,
    Json(payload): Json<MergeRequest>,
) -> Result<Json<ConversationMergeReport>, ApiError> {
    validation::validate(&payload)?;
    let (duplicate, canonical) = payload.ids()?;
    let report = state
        .services
        .consolidation
        .merge_conversations(duplicate, canonical)
        .await?;
    observability::register_merge("conversation", report.already_merged);
    Ok(Json(report))
}

pub(super) async fn merge_contacts(
    State(state): State<AppState>,
    Json(payload): Json<MergeRequest>,
) -> Result<Json<ContactMergeReport>, ApiError> {
    validation::validate(&payload)?;
    let (duplicate, canonical) = payload.ids()?;
    let report = state
        .services
        .consolidation
        .merge_contacts(duplicate, canonical)
        .await?;
    observability::register_merge("contact", report.already_merged);
    Ok(Json(report))
}
