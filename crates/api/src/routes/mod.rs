mod consolidation;
mod labels;
mod outbound;
mod rpc;
mod webhook;

use axum::{
    Json, Router,
    extract::State,
    http::{StatusCode, header},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Serialize;

use crate::{middleware as app_middleware, observability, state::AppState};

pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route(
            "/v1/rpc/resolve_contact_identity",
            post(rpc::resolve_contact_identity),
        )
        .route(
            "/v1/rpc/acquire_conversation_lock",
            post(rpc::acquire_conversation_lock),
        )
        .route(
            "/v1/rpc/release_conversation_lock",
            post(rpc::release_conversation_lock),
        )
        .route("/v1/outbound/send", post(outbound::send))
        .route(
            "/v1/conversations/:conversation_id/labels",
            post(labels::add_label).get(labels::list_labels),
        )
        .route_layer(middleware::from_fn(app_middleware::require_auth_middleware));

    let consolidation = Router::new()
        .route("/v1/consolidation/sweep", post(consolidation::sweep))
        .route(
            "/v1/consolidation/conversations/merge",
            post(consolidation::merge_conversations),
        )
        .route(
            "/v1/consolidation/contacts/merge",
            post(consolidation::merge_contacts),
        )
        .route_layer(middleware::from_fn(
            app_middleware::require_consolidation_role,
        ));

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/v1/webhooks/zapi", post(webhook::receive_zapi))
        .merge(protected)
        .merge(consolidation)
        .layer(middleware::from_fn(app_middleware::metrics_layer))
        .layer(app_middleware::timeout_layer())
        .layer(app_middleware::trace_layer())
        .layer(app_middleware::set_request_id_layer())
        .layer(app_middleware::propagate_request_id_layer())
        .layer(middleware::from_fn_with_state(
            state.clone(),
            app_middleware::auth_middleware,
        ))
        .layer(middleware::from_fn(
            app_middleware::correlation_id_middleware,
        ))
        .with_state(state)
}

#[derive(Serialize)]
struct ComponentHealth {
    component: &'static str,
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    environment: String,
    components: Vec<ComponentHealth>,
}

async fn health(State(state): State<AppState>) -> Response {
    let mut components = Vec::with_capacity(state.services.health.len());
    for probe in &state.services.health {
        let component = match probe.check().await {
            Ok(()) => ComponentHealth {
                component: probe.component(),
                status: "ok",
                error: None,
            },
            Err(err) => {
                tracing::warn!(component = probe.component(), error = %err, "health probe failed");
                ComponentHealth {
                    component: probe.component(),
                    status: "down",
                    error: Some(err.to_string()),
                }
            }
        };
        components.push(component);
    }

    let healthy = components.iter().all(|component| component.status == "ok");
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let body = HealthResponse {
        status: if healthy { "ok" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        environment: state.config.app_env.clone(),
        components,
    };
    (status, Json(body)).into_response()
}

async fn metrics() -> Response {
    match observability::render_metrics() {
        Some(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, "metrics recorder not installed").into_response(),
    }
}
