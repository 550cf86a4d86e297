use std::sync::Arc;

use anyhow::{Context, bail};
use surrealdb::Surreal;
use surrealdb::engine::remote::ws::Client;
use threadline_domain::consolidation::ConsolidationService;
use threadline_domain::dispatch::{Dispatcher, DispatcherConfig};
use threadline_domain::ingest::IngestService;
use threadline_domain::labels::LabelService;
use threadline_domain::locks::{ConversationLockService, InMemoryLockStore, LockConfig};
use threadline_domain::ports::health::HealthProbe;
use threadline_domain::ports::locks::LockStore;
use threadline_domain::ports::provider::MessagingProvider;

use crate::config::AppConfig;
use crate::db::{DbConfig, SurrealHealth, apply_schema, connect};
use crate::locks::{RedisLockStore, SurrealLockStore};
use crate::repositories::Repositories;
use crate::zapi_client::ZapiClient;

/// Every domain service wired to one set of repositories and one lock store.
#[derive(Clone)]
pub struct Services {
    pub repositories: Repositories,
    pub locks: ConversationLockService,
    pub ingest: IngestService,
    pub dispatcher: Dispatcher,
    pub consolidation: ConsolidationService,
    pub labels: LabelService,
    pub health: Vec<Arc<dyn HealthProbe>>,
}

impl Services {
    pub fn assemble(
        repositories: Repositories,
        lock_store: Arc<dyn LockStore>,
        provider: Arc<dyn MessagingProvider>,
        lock_config: LockConfig,
        dispatcher_config: DispatcherConfig,
    ) -> Self {
        let locks = ConversationLockService::new(lock_store, lock_config);
        let ingest = IngestService::new(
            repositories.contacts.clone(),
            repositories.conversations.clone(),
            repositories.messages.clone(),
            locks.clone(),
        );
        let dispatcher = Dispatcher::new(
            repositories.conversations.clone(),
            repositories.contacts.clone(),
            repositories.messages.clone(),
            repositories.outbox.clone(),
            provider,
            locks.clone(),
            dispatcher_config,
        );
        let consolidation = ConsolidationService::new(
            repositories.contacts.clone(),
            repositories.conversations.clone(),
            repositories.messages.clone(),
            repositories.outbox.clone(),
            repositories.labels.clone(),
            locks.clone(),
        );
        let labels = LabelService::new(
            repositories.conversations.clone(),
            repositories.labels.clone(),
            locks.clone(),
        );
        Self {
            repositories,
            locks,
            ingest,
            dispatcher,
            consolidation,
            labels,
            health: Vec::new(),
        }
    }

    /// Single-process wiring: in-memory storage and leases.
    pub fn in_memory(
        provider: Arc<dyn MessagingProvider>,
        lock_config: LockConfig,
        dispatcher_config: DispatcherConfig,
    ) -> Self {
        Self::assemble(
            Repositories::in_memory(),
            Arc::new(InMemoryLockStore::new()),
            provider,
            lock_config,
            dispatcher_config,
        )
    }

    pub fn with_health_probe(mut self, probe: Arc<dyn HealthProbe>) -> Self {
        self.health.push(probe);
        self
    }

    pub async fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        let provider: Arc<dyn MessagingProvider> = Arc::new(ZapiClient::from_config(config));
        let db_config = DbConfig::from_app_config(config);
        let mut surreal: Option<Arc<Surreal<Client>>> = None;
        let mut health: Vec<Arc<dyn HealthProbe>> = Vec::new();

        let repositories = match config.data_backend.as_str() {
            "memory" => Repositories::in_memory(),
            "surreal" => {
                let client = surreal_client(&db_config, &mut surreal).await?;
                health.push(Arc::new(SurrealHealth::new(db_config.clone())));
                Repositories::surreal(client)
            }
            other => bail!("unsupported data_backend '{other}'"),
        };

        let lock_store: Arc<dyn LockStore> = match config.lock_backend.as_str() {
            "memory" => {
                if config.is_production() {
                    tracing::warn!("in-memory leases only serialize work inside one process");
                }
                Arc::new(InMemoryLockStore::new())
            }
            "redis" => {
                let store = RedisLockStore::connect(&config.redis_url, config.lock_prefix.clone())
                    .await
                    .context("connecting redis lock store")?;
                let store = Arc::new(store);
                health.push(store.clone());
                store
            }
            "surreal" => {
                let client = surreal_client(&db_config, &mut surreal).await?;
                Arc::new(SurrealLockStore::with_client(client))
            }
            other => bail!("unsupported lock_backend '{other}'"),
        };

        tracing::info!(
            data_backend = %config.data_backend,
            lock_backend = %config.lock_backend,
            "services assembled"
        );
        let mut services = Self::assemble(
            repositories,
            lock_store,
            provider,
            config.lock_config(),
            config.dispatcher_config(),
        );
        services.health = health;
        Ok(services)
    }
}

/// Connects once and applies the schema; later callers share the client.
async fn surreal_client(
    db_config: &DbConfig,
    cached: &mut Option<Arc<Surreal<Client>>>,
) -> anyhow::Result<Arc<Surreal<Client>>> {
    if let Some(client) = cached {
        return Ok(client.clone());
    }
    let client = connect(db_config)
        .await
        .with_context(|| format!("connecting surreal at {}", db_config.endpoint))?;
    apply_schema(&client).await?;
    *cached = Some(client.clone());
    Ok(client)
}
