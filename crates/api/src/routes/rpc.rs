use std::time::Duration;

use axum::{Json, extract::State};
use serde::{Deserialize, Serialize};
use threadline_domain::aliases::Alias;
use threadline_domain::identity::ResolveRequest;
use threadline_domain::locks::LockKey;
use threadline_domain::util::format_ms_rfc3339;
use validator::Validate;

use crate::{error::ApiError, observability, state::AppState, validation};

#[derive(Debug, Deserialize, Validate)]
pub(super) struct ResolveIdentityRequest {
    #[validate(length(max = 128))]
    lid: Option<String>,
    #[validate(length(max = 64))]
    phone: Option<String>,
    #[validate(length(max = 128))]
    chat_lid: Option<String>,
    #[validate(length(max = 128))]
    chat_id: Option<String>,
    #[serde(default)]
    is_group: bool,
    #[validate(length(max = 200))]
    name: Option<String>,
}

#[derive(Serialize)]
pub(super) struct ResolveIdentityResponse {
    contact_id: String,
    created: bool,
    stage: &'static str,
    learned: Vec<Alias>,
}

pub(super) async fn resolve_contact_identity(
    State(state): State<AppState>,
    Json(payload): Json<ResolveIdentityRequest>,
) -> Result<Json<ResolveIdentityResponse>, ApiError> {
    validation::validate(&payload)?;
    let request = ResolveRequest {
        lid: payload.lid,
        phone: payload.phone,
        chat_lid: payload.chat_lid,
        chat_id: payload.chat_id,
        is_group: payload.is_group,
        name: payload.name,
    };
    let resolution = state
        .services
        .ingest
        .resolver()
        .resolve_request(&request)
        .await?;
    observability::register_resolve(resolution.stage.as_str());
    Ok(Json(ResolveIdentityResponse {
        contact_id: resolution.contact.contact_id,
        created: resolution.created,
        stage: resolution.stage.as_str(),
        learned: resolution.learned,
    }))
}

#[derive(Debug, Deserialize, Validate)]
pub(super) struct AcquireLockRequest {
    #[validate(length(min = 1, max = 128))]
    conversation_id: String,
    #[validate(range(min = 1, max = 300))]
    ttl_seconds: u64,
}

#[derive(Debug, Serialize)]
pub(super) struct AcquireLockResponse {
    acquired: bool,
    token: Option<String>,
    expires_at_ms: Option<i64>,
    expires_at: Option<String>,
}

pub(super) async fn acquire_conversation_lock(
    State(state): State<AppState>,
    Json(payload): Json<AcquireLockRequest>,
) -> Result<Json<AcquireLockResponse>, ApiError> {
    validation::validate(&payload)?;
    let key = LockKey::conversation(payload.conversation_id.trim());
    let ttl = Duration::from_secs(payload.ttl_seconds);
    let lease = state.services.locks.acquire(&key, ttl).await?;
    Ok(Json(match lease {
        Some(lease) => AcquireLockResponse {
            acquired: true,
            token: Some(lease.token().to_string()),
            expires_at_ms: Some(lease.expires_at_ms()),
            expires_at: Some(format_ms_rfc3339(lease.expires_at_ms())),
        },
        None => AcquireLockResponse {
            acquired: false,
            token: None,
            expires_at_ms: None,
            expires_at: None,
        },
    }))
}

#[derive(Debug, Deserialize, Validate)]
pub(super) struct ReleaseLockRequest {
    #[validate(length(min = 1, max = 128))]
    conversation_id: String,
    #[validate(length(min = 1, max = 128))]
    token: String,
}

#[derive(Debug, Serialize)]
pub(super) struct ReleaseLockResponse {
    released: bool,
}

pub(super) async fn release_conversation_lock(
    State(state): State<AppState>,
    Json(payload): Json<ReleaseLockRequest>,
) -> Result<Json<ReleaseLockResponse>, ApiError> {
    validation::validate(&payload)?;
    let key = LockKey::conversation(payload.conversation_id.trim());
    let released = state
        .services
        .locks
        .release_token(&key, payload.token.trim())
        .await?;
    Ok(Json(ReleaseLockResponse { released }))
}
