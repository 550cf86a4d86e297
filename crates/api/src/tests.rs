use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::body::{Body, to_bytes};
use axum::http::header::CONTENT_TYPE;
use axum::http::{Request, Response, StatusCode};
use jsonwebtoken::{EncodingKey, Header, encode};
use serde::Serialize;
use serde_json::{Value, json};
use threadline_domain::DomainResult;
use threadline_domain::conversations::{Conversation, ThreadKey};
use threadline_domain::dispatch::DispatcherConfig;
use threadline_domain::error::DomainError;
use threadline_domain::locks::{LockConfig, LockKey};
use threadline_domain::messages::{Direction, Message, MessageType, SenderType};
use threadline_domain::ports::BoxFuture;
use threadline_domain::ports::provider::{MessagingProvider, ProviderReceipt, ProviderSendRequest};
use threadline_infra::config::AppConfig;
use threadline_infra::services::Services;
use tower::ServiceExt;

use crate::observability;
use crate::routes;
use crate::state::AppState;

const PHONE: &str = "558197438430";

#[derive(Serialize)]
struct Claims {
    sub: String,
    role: String,
    exp: usize,
}

#[derive(Default)]
struct StubProvider {
    calls: AtomicUsize,
    fail: bool,
}

impl MessagingProvider for StubProvider {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn send(&self, _request: &ProviderSendRequest) -> BoxFuture<'_, DomainResult<ProviderReceipt>> {
        Box::pin(async move {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail {
                return Err(DomainError::Provider("z-api upstream error (500)".into()));
            }
            Ok(ProviderReceipt {
                provider_message_id: format!("3EB0{call:04}"),
            })
        })
    }
}

fn test_config() -> AppConfig {
    AppConfig {
        app_env: "test".to_string(),
        port: 0,
        log_level: "info".to_string(),
        data_backend: "memory".to_string(),
        surreal_endpoint: "ws://127.0.0.1:8000".to_string(),
        surreal_ns: "threadline".to_string(),
        surreal_db: "inbox_test".to_string(),
        surreal_user: "root".to_string(),
        surreal_pass: "root".to_string(),
        lock_backend: "memory".to_string(),
        redis_url: "redis://127.0.0.1:6379".to_string(),
        lock_prefix: "threadline:lock:test".to_string(),
        lock_ttl_ms: 5_000,
        lock_acquire_attempts: 3,
        lock_backoff_base_ms: 1,
        lock_backoff_max_ms: 5,
        jwt_secret: "test-secret".to_string(),
        webhook_client_token: String::new(),
        zapi_base_url: "http://127.0.0.1:9".to_string(),
        zapi_instance_id: "instance".to_string(),
        zapi_token: "token".to_string(),
        zapi_client_token: String::new(),
        zapi_timeout_ms: 1_000,
        ai_pause_after_human_ms: 60_000,
        sweep_interval_ms: 60_000,
        sweep_batch_limit: 50,
        outbox_reconcile_interval_ms: 15_000,
    }
}

fn test_token_with_identity(secret: &str, role: &str, sub: &str) -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("time")
        .as_secs();
    let claims = Claims {
        sub: sub.to_string(),
        role: role.to_string(),
        exp: (now + 3600) as usize,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .expect("token")
}

fn agent_token() -> String {
    test_token_with_identity("test-secret", "agent", "agent-1")
}

fn admin_token() -> String {
    test_token_with_identity("test-secret", "admin", "ops-1")
}

fn test_app_state_with(config: AppConfig, provider: Arc<StubProvider>) -> AppState {
    let lock_config: LockConfig = config.lock_config();
    let services = Services::in_memory(provider, lock_config, DispatcherConfig::default());
    AppState::with_services(config, services)
}

fn test_app_state_router() -> (AppState, axum::Router, Arc<StubProvider>) {
    let provider = Arc::new(StubProvider::default());
    let state = test_app_state_with(test_config(), provider.clone());
    let app = routes::router(state.clone());
    (state, app, provider)
}

fn post_json(uri: &str, token: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    builder.body(Body::from(body.to_string())).expect("request")
}

fn get(uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    builder.body(Body::empty()).expect("request")
}

async fn json_body(response: Response<Body>) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    serde_json::from_slice(&bytes).expect("json body")
}

fn zapi_event(message_id: &str, text: &str) -> Value {
    json!({
        "messageId": message_id,
        "phone": PHONE,
        "chatLid": "144723385778292@lid",
        "isGroup": false,
        "fromMe": false,
        "senderName": "Maria",
        "momment": 1_700_000_000_000_i64,
        "text": { "message": text }
    })
}

async fn ingest(app: &axum::Router, message_id: &str) -> Value {
    let response = app
        .clone()
        .oneshot(post_json(
            "/v1/webhooks/zapi",
            None,
            zapi_event(message_id, "oi"),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    json_body(response).await
}

#[tokio::test]
async fn health_reports_ok_without_probes() {
    let (_, app, _) = test_app_state_router();
    let response = app.oneshot(get("/health", None)).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["environment"], "test");
}

#[tokio::test]
async fn webhook_stores_event_and_acknowledges_redelivery() {
    let (state, app, _) = test_app_state_router();

    let first = ingest(&app, "3EB0A1").await;
    assert_eq!(first["outcome"], "stored");
    assert_eq!(first["duplicate"], false);
    assert_eq!(first["contact_created"], true);

    let second = ingest(&app, "3EB0A1").await;
    assert_eq!(second["duplicate"], true);
    assert_eq!(second["message_id"], first["message_id"]);

    let conversation_id = first["conversation_id"].as_str().expect("conversation id");
    let conversation = state
        .services
        .repositories
        .conversations
        .get(conversation_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        conversation.thread_key,
        format!("dm:{}", first["contact_id"].as_str().unwrap())
    );
}

#[tokio::test]
async fn webhook_without_content_is_ignored() {
    let (_, app, _) = test_app_state_router();
    let response = app
        .oneshot(post_json(
            "/v1/webhooks/zapi",
            None,
            json!({ "messageId": "3EB0A2", "phone": PHONE, "type": "PresenceChatCallback" }),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["outcome"], "ignored");
}

#[tokio::test]
async fn webhook_checks_client_token_when_configured() {
    let mut config = test_config();
    config.webhook_client_token = "zapi-secret".to_string();
    let state = test_app_state_with(config, Arc::new(StubProvider::default()));
    let app = routes::router(state);

    let rejected = app
        .clone()
        .oneshot(post_json("/v1/webhooks/zapi", None, zapi_event("3EB0B1", "oi")))
        .await
        .expect("response");
    assert_eq!(rejected.status(), StatusCode::UNAUTHORIZED);

    let mut request = post_json("/v1/webhooks/zapi", None, zapi_event("3EB0B1", "oi"));
    request
        .headers_mut()
        .insert("client-token", "zapi-secret".parse().unwrap());
    let accepted = app.oneshot(request).await.expect("response");
    assert_eq!(accepted.status(), StatusCode::OK);
}

#[tokio::test]
async fn webhook_answers_conflict_while_conversation_is_leased() {
    let (state, app, _) = test_app_state_router();
    let first = ingest(&app, "3EB0C1").await;
    let conversation_id = first["conversation_id"].as_str().unwrap();

    let lease = state
        .services
        .locks
        .acquire(
            &LockKey::conversation(conversation_id),
            Duration::from_secs(30),
        )
        .await
        .unwrap()
        .expect("lease");

    let response = app
        .clone()
        .oneshot(post_json("/v1/webhooks/zapi", None, zapi_event("3EB0C2", "de novo")))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body = json_body(response).await;
    assert_eq!(body["error"]["code"], "lock_busy");

    state.services.locks.release(&lease).await;
    let retried = ingest(&app, "3EB0C2").await;
    assert_eq!(retried["duplicate"], false);
}

#[tokio::test]
async fn rpc_routes_require_a_token() {
    let (_, app, _) = test_app_state_router();
    let response = app
        .oneshot(post_json(
            "/v1/rpc/resolve_contact_identity",
            None,
            json!({ "phone": PHONE }),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn anonymous_role_claim_is_not_authenticated() {
    let (_, app, _) = test_app_state_router();
    let token = test_token_with_identity("test-secret", "anonymous", "nobody");
    let response = app
        .oneshot(post_json(
            "/v1/rpc/resolve_contact_identity",
            Some(&token),
            json!({ "phone": PHONE }),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn resolve_contact_identity_is_stable() {
    let (_, app, _) = test_app_state_router();
    let token = agent_token();

    let created = app
        .clone()
        .oneshot(post_json(
            "/v1/rpc/resolve_contact_identity",
            Some(&token),
            json!({ "chat_lid": "144723385778292@lid" }),
        ))
        .await
        .expect("response");
    assert_eq!(created.status(), StatusCode::OK);
    let created = json_body(created).await;
    assert_eq!(created["created"], true);
    assert_eq!(created["stage"], "created");

    let learned = app
        .clone()
        .oneshot(post_json(
            "/v1/rpc/resolve_contact_identity",
            Some(&token),
            json!({ "chat_lid": "144723385778292@lid", "phone": PHONE }),
        ))
        .await
        .expect("response");
    let learned = json_body(learned).await;
    assert_eq!(learned["contact_id"], created["contact_id"]);
    assert_eq!(learned["created"], false);
    assert_eq!(learned["learned"][0]["kind"], "phone");
}

#[tokio::test]
async fn resolve_without_identifiers_is_rejected() {
    let (_, app, _) = test_app_state_router();
    let response = app
        .oneshot(post_json(
            "/v1/rpc/resolve_contact_identity",
            Some(&agent_token()),
            json!({ "name": "Maria" }),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn conversation_lock_rpc_round_trip() {
    let (_, app, _) = test_app_state_router();
    let token = agent_token();
    let acquire = json!({ "conversation_id": "conv-1", "ttl_seconds": 30 });

    let first = app
        .clone()
        .oneshot(post_json(
            "/v1/rpc/acquire_conversation_lock",
            Some(&token),
            acquire.clone(),
        ))
        .await
        .expect("response");
    let first = json_body(first).await;
    assert_eq!(first["acquired"], true);
    let lease_token = first["token"].as_str().expect("token").to_string();

    let second = app
        .clone()
        .oneshot(post_json(
            "/v1/rpc/acquire_conversation_lock",
            Some(&token),
            acquire.clone(),
        ))
        .await
        .expect("response");
    let second = json_body(second).await;
    assert_eq!(second["acquired"], false);
    assert!(second["token"].is_null());

    let wrong = app
        .clone()
        .oneshot(post_json(
            "/v1/rpc/release_conversation_lock",
            Some(&token),
            json!({ "conversation_id": "conv-1", "token": "not-the-holder" }),
        ))
        .await
        .expect("response");
    assert_eq!(json_body(wrong).await["released"], false);

    let released = app
        .clone()
        .oneshot(post_json(
            "/v1/rpc/release_conversation_lock",
            Some(&token),
            json!({ "conversation_id": "conv-1", "token": lease_token }),
        ))
        .await
        .expect("response");
    assert_eq!(json_body(released).await["released"], true);

    let again = app
        .oneshot(post_json(
            "/v1/rpc/acquire_conversation_lock",
            Some(&token),
            acquire,
        ))
        .await
        .expect("response");
    assert_eq!(json_body(again).await["acquired"], true);
}

#[tokio::test]
async fn conversation_lock_rejects_zero_ttl() {
    let (_, app, _) = test_app_state_router();
    let response = app
        .oneshot(post_json(
            "/v1/rpc/acquire_conversation_lock",
            Some(&agent_token()),
            json!({ "conversation_id": "conv-1", "ttl_seconds": 0 }),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn outbound_send_is_deduplicated() {
    let (_, app, provider) = test_app_state_router();
    let stored = ingest(&app, "3EB0D1").await;
    let payload = json!({
        "conversation_id": stored["conversation_id"],
        "content": "Seu pedido saiu para entrega",
        "sender_kind": "ai"
    });

    let first = app
        .clone()
        .oneshot(post_json("/v1/outbound/send", Some(&agent_token()), payload.clone()))
        .await
        .expect("response");
    assert_eq!(first.status(), StatusCode::OK);
    let first = json_body(first).await;
    assert_eq!(first["status"], "sent");
    assert_eq!(first["deduped"], false);

    let second = app
        .oneshot(post_json("/v1/outbound/send", Some(&agent_token()), payload))
        .await
        .expect("response");
    let second = json_body(second).await;
    assert_eq!(second["deduped"], true);
    assert_eq!(second["provider_message_id"], first["provider_message_id"]);
    assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn outbound_provider_failure_is_bad_gateway() {
    let provider = Arc::new(StubProvider {
        calls: AtomicUsize::new(0),
        fail: true,
    });
    let state = test_app_state_with(test_config(), provider);
    let app = routes::router(state);
    let stored = ingest(&app, "3EB0E1").await;

    let response = app
        .oneshot(post_json(
            "/v1/outbound/send",
            Some(&agent_token()),
            json!({ "conversation_id": stored["conversation_id"], "content": "oi" }),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let body = json_body(response).await;
    assert_eq!(body["status"], "failed");
    assert!(body["error"].as_str().is_some_and(|error| error.contains("500")));
}

#[tokio::test]
async fn outbound_send_to_unknown_conversation_is_not_found() {
    let (_, app, _) = test_app_state_router();
    let response = app
        .oneshot(post_json(
            "/v1/outbound/send",
            Some(&agent_token()),
            json!({ "conversation_id": "missing", "content": "oi" }),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn consolidation_requires_operator_role() {
    let (_, app, _) = test_app_state_router();

    let anonymous = app
        .clone()
        .oneshot(post_json("/v1/consolidation/sweep", None, json!({})))
        .await
        .expect("response");
    assert_eq!(anonymous.status(), StatusCode::UNAUTHORIZED);

    let agent = app
        .clone()
        .oneshot(post_json(
            "/v1/consolidation/sweep",
            Some(&agent_token()),
            json!({}),
        ))
        .await
        .expect("response");
    assert_eq!(agent.status(), StatusCode::FORBIDDEN);

    let admin = app
        .oneshot(post_json(
            "/v1/consolidation/sweep",
            Some(&admin_token()),
            json!({ "dry_run": true }),
        ))
        .await
        .expect("response");
    assert_eq!(admin.status(), StatusCode::OK);
    let body = json_body(admin).await;
    assert_eq!(body["dry_run"], true);
}

#[tokio::test]
async fn merge_conversation_endpoint_is_idempotent() {
    let (state, app, _) = test_app_state_router();
    let stored = ingest(&app, "3EB0F1").await;
    let canonical_id = stored["conversation_id"].as_str().unwrap().to_string();
    let contact_id = stored["contact_id"].as_str().unwrap().to_string();

    let legacy = Conversation::new(
        Some(&contact_id),
        &ThreadKey::parse(&format!("u:{PHONE}")),
        Some(PHONE),
    );
    state
        .services
        .repositories
        .conversations
        .insert_if_absent(&legacy)
        .await
        .unwrap();
    let message = Message::new(
        &legacy.conversation_id,
        Direction::Inbound,
        SenderType::Contact,
        MessageType::Text,
        String::from("mensagem antiga"),
    )
    .with_provider_message_id(Some("3EB0F0".into()))
    .with_sent_at(1_600_000_000_000);
    state.services.repositories.messages.append(&message).await.unwrap();

    let payload = json!({
        "duplicate_id": legacy.conversation_id,
        "canonical_id": canonical_id
    });
    let first = app
        .clone()
        .oneshot(post_json(
            "/v1/consolidation/conversations/merge",
            Some(&admin_token()),
            payload.clone(),
        ))
        .await
        .expect("response");
    assert_eq!(first.status(), StatusCode::OK);
    let first = json_body(first).await;
    assert_eq!(first["already_merged"], false);
    assert_eq!(first["messages"]["moved"], 1);

    let second = app
        .oneshot(post_json(
            "/v1/consolidation/conversations/merge",
            Some(&admin_token()),
            payload,
        ))
        .await
        .expect("response");
    assert_eq!(json_body(second).await["already_merged"], true);

    let messages = state
        .services
        .repositories
        .messages
        .list_by_conversation(&canonical_id)
        .await
        .unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].provider_message_id.as_deref(), Some("3EB0F0"));
}

#[tokio::test]
async fn merge_with_itself_is_rejected() {
    let (_, app, _) = test_app_state_router();
    let response = app
        .oneshot(post_json(
            "/v1/consolidation/contacts/merge",
            Some(&admin_token()),
            json!({ "duplicate_id": "c1", "canonical_id": "c1" }),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn labels_are_unique_per_conversation() {
    let (_, app, _) = test_app_state_router();
    let stored = ingest(&app, "3EB0G1").await;
    let uri = format!(
        "/v1/conversations/{}/labels",
        stored["conversation_id"].as_str().unwrap()
    );

    let created = app
        .clone()
        .oneshot(post_json(&uri, Some(&agent_token()), json!({ "label": "Urgente" })))
        .await
        .expect("response");
    assert_eq!(created.status(), StatusCode::CREATED);

    let existing = app
        .clone()
        .oneshot(post_json(&uri, Some(&agent_token()), json!({ "label": "urgente " })))
        .await
        .expect("response");
    assert_eq!(existing.status(), StatusCode::OK);

    let listed = app
        .clone()
        .oneshot(get(&uri, Some(&agent_token())))
        .await
        .expect("response");
    let listed = json_body(listed).await;
    assert_eq!(listed.as_array().map(Vec::len), Some(1));
    assert_eq!(listed[0]["label"], "urgente");

    let missing = app
        .oneshot(post_json(
            "/v1/conversations/unknown/labels",
            Some(&agent_token()),
            json!({ "label": "vip" }),
        ))
        .await
        .expect("response");
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn correlation_id_is_echoed() {
    let (_, app, _) = test_app_state_router();
    let request = Request::builder()
        .method("GET")
        .uri("/health")
        .header("x-correlation-id", "corr-123")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.expect("response");
    assert_eq!(
        response
            .headers()
            .get("x-correlation-id")
            .and_then(|value| value.to_str().ok()),
        Some("corr-123")
    );
    assert!(response.headers().get("x-request-id").is_some());
}

#[tokio::test]
async fn metrics_endpoint_is_exposed() {
    let _ = observability::init_metrics();
    observability::register_inbound_event("stored");
    let (_, app, _) = test_app_state_router();

    let health = app.clone().oneshot(get("/health", None)).await.expect("response");
    assert_eq!(health.status(), StatusCode::OK);

    let response = app.oneshot(get("/metrics", None)).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    assert!(
        response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.contains("text/plain"))
    );
    let body = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    let body = String::from_utf8(body.to_vec()).expect("metrics body");
    assert!(body.contains("threadline_api_inbound_events_total"));
}
