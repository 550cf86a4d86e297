use std::sync::Arc;
use std::time::Duration;

use surrealdb::Surreal;
use surrealdb::engine::remote::ws::{Client, Ws};
use surrealdb::opt::auth::Root;
use threadline_domain::DomainResult;
use threadline_domain::error::DomainError;
use threadline_domain::ports::BoxFuture;
use threadline_domain::ports::health::HealthProbe;
use tokio::net::TcpStream;
use tokio::time::timeout;
use url::Url;

use crate::config::AppConfig;

/// Tables and unique indexes the engine relies on for convergence. Every
/// statement is idempotent so it runs on each start.
pub const SCHEMA: &str = "
DEFINE TABLE IF NOT EXISTS contact SCHEMALESS;
DEFINE INDEX IF NOT EXISTS contact_id_uniq ON contact FIELDS contact_id UNIQUE;

DEFINE TABLE IF NOT EXISTS contact_alias SCHEMALESS;
DEFINE INDEX IF NOT EXISTS contact_alias_uniq ON contact_alias FIELDS kind, value UNIQUE;
DEFINE INDEX IF NOT EXISTS contact_alias_owner ON contact_alias FIELDS contact_id;

DEFINE TABLE IF NOT EXISTS merge_candidate SCHEMALESS;
DEFINE INDEX IF NOT EXISTS merge_candidate_id_uniq ON merge_candidate FIELDS candidate_id UNIQUE;
DEFINE INDEX IF NOT EXISTS merge_candidate_pair_uniq ON merge_candidate FIELDS pair_key UNIQUE;

DEFINE TABLE IF NOT EXISTS conversation SCHEMALESS;
DEFINE INDEX IF NOT EXISTS conversation_id_uniq ON conversation FIELDS conversation_id UNIQUE;
DEFINE INDEX IF NOT EXISTS conversation_thread_key_uniq ON conversation FIELDS thread_key UNIQUE;
DEFINE INDEX IF NOT EXISTS conversation_contact ON conversation FIELDS contact_id;

DEFINE TABLE IF NOT EXISTS message SCHEMALESS;
DEFINE INDEX IF NOT EXISTS message_id_uniq ON message FIELDS message_id UNIQUE;
DEFINE INDEX IF NOT EXISTS message_dedupe_uniq ON message FIELDS conversation_id, dedupe_key UNIQUE;

DEFINE TABLE IF NOT EXISTS message_outbox SCHEMALESS;
DEFINE INDEX IF NOT EXISTS message_outbox_id_uniq ON message_outbox FIELDS outbox_id UNIQUE;
DEFINE INDEX IF NOT EXISTS message_outbox_key_uniq ON message_outbox FIELDS idempotency_key UNIQUE;
DEFINE INDEX IF NOT EXISTS message_outbox_conversation ON message_outbox FIELDS conversation_id;

DEFINE TABLE IF NOT EXISTS conversation_label SCHEMALESS;
DEFINE INDEX IF NOT EXISTS conversation_label_uniq ON conversation_label FIELDS conversation_id, label UNIQUE;

DEFINE TABLE IF NOT EXISTS conversation_lock SCHEMALESS;
DEFINE INDEX IF NOT EXISTS conversation_lock_key_uniq ON conversation_lock FIELDS lock_key UNIQUE;
";

#[derive(Debug, Clone)]
pub struct DbConfig {
    pub endpoint: String,
    pub namespace: String,
    pub database: String,
    pub username: String,
    pub password: String,
}

impl DbConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            endpoint: config.surreal_endpoint.clone(),
            namespace: config.surreal_ns.clone(),
            database: config.surreal_db.clone(),
            username: config.surreal_user.clone(),
            password: config.surreal_pass.clone(),
        }
    }
}

/// Connects, signs in and selects the namespace/database.
pub async fn connect(db_config: &DbConfig) -> anyhow::Result<Arc<Surreal<Client>>> {
    let db = Surreal::<Client>::init();
    db.connect::<Ws>(&db_config.endpoint).await?;
    db.signin(Root {
        username: &db_config.username,
        password: &db_config.password,
    })
    .await?;
    db.use_ns(&db_config.namespace)
        .use_db(&db_config.database)
        .await?;
    Ok(Arc::new(db))
}

pub async fn apply_schema(client: &Surreal<Client>) -> anyhow::Result<()> {
    client.query(SCHEMA).await?.check()?;
    tracing::info!("surreal schema applied");
    Ok(())
}

pub(crate) fn map_surreal_error(err: surrealdb::Error) -> DomainError {
    let error_message = err.to_string().to_lowercase();
    if error_message.contains("already exists")
        || error_message.contains("already contains")
        || error_message.contains("duplicate")
        || error_message.contains("unique")
        || error_message.contains("conflict")
    {
        return DomainError::Conflict;
    }
    DomainError::Store(format!("surreal query failed: {error_message}"))
}

#[derive(Debug, Clone)]
pub struct SurrealHealth {
    config: DbConfig,
}

impl SurrealHealth {
    pub fn new(config: DbConfig) -> Self {
        Self { config }
    }
}

impl HealthProbe for SurrealHealth {
    fn component(&self) -> &'static str {
        "surrealdb"
    }

    fn check(&self) -> BoxFuture<'_, DomainResult<()>> {
        let endpoint = self.config.endpoint.clone();
        Box::pin(async move {
            let address = parse_socket_address(&endpoint)?;
            timeout(Duration::from_secs(2), TcpStream::connect(&address))
                .await
                .map_err(|_| DomainError::Store("surreal endpoint connect timed out".into()))?
                .map_err(|err| {
                    DomainError::Store(format!("surreal endpoint connect failed: {err}"))
                })?;
            tracing::debug!(endpoint, "surreal health check succeeded");
            Ok(())
        })
    }
}

fn parse_socket_address(endpoint: &str) -> DomainResult<String> {
    let normalized = if endpoint.contains("://") {
        endpoint.to_string()
    } else {
        format!("ws://{endpoint}")
    };
    let parsed = Url::parse(&normalized)
        .map_err(|err| DomainError::Store(format!("invalid surreal endpoint '{endpoint}': {err}")))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| DomainError::Store(format!("missing surreal host in '{endpoint}'")))?;
    let port = match parsed.scheme() {
        "ws" | "http" => parsed.port().unwrap_or(8000),
        _ => parsed.port_or_known_default().unwrap_or(443),
    };
    Ok(format!("{host}:{port}"))
}
