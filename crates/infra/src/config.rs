use serde::Deserialize;
use std::time::Duration;

use threadline_domain::dispatch::DispatcherConfig;
use threadline_domain::locks::LockConfig;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub app_env: String,
    pub port: u16,
    pub log_level: String,
    pub data_backend: String,
    pub surreal_endpoint: String,
    pub surreal_ns: String,
    pub surreal_db: String,
    pub surreal_user: String,
    pub surreal_pass: String,
    pub lock_backend: String,
    pub redis_url: String,
    pub lock_prefix: String,
    pub lock_ttl_ms: u64,
    pub lock_acquire_attempts: u32,
    pub lock_backoff_base_ms: u64,
    pub lock_backoff_max_ms: u64,
    pub jwt_secret: String,
    pub webhook_client_token: String,
    pub zapi_base_url: String,
    pub zapi_instance_id: String,
    pub zapi_token: String,
    pub zapi_client_token: String,
    pub zapi_timeout_ms: u64,
    pub ai_pause_after_human_ms: u64,
    pub sweep_interval_ms: u64,
    pub sweep_batch_limit: usize,
    pub outbox_reconcile_interval_ms: u64,
}

impl AppConfig {
    pub fn load() -> Result<Self, config::ConfigError> {
        dotenvy::dotenv().ok();
        let cfg = config::Config::builder()
            .set_default("app_env", "development")?
            .set_default("port", 3000)?
            .set_default("log_level", "info")?
            .set_default("data_backend", "memory")?
            .set_default("surreal_endpoint", "ws://127.0.0.1:8000")?
            .set_default("surreal_ns", "threadline")?
            .set_default("surreal_db", "inbox")?
            .set_default("surreal_user", "root")?
            .set_default("surreal_pass", "root")?
            .set_default("lock_backend", "memory")?
            .set_default("redis_url", "redis://127.0.0.1:6379")?
            .set_default("lock_prefix", "threadline:lock")?
            .set_default("lock_ttl_ms", 30_000)?
            .set_default("lock_acquire_attempts", 8)?
            .set_default("lock_backoff_base_ms", 50)?
            .set_default("lock_backoff_max_ms", 2_000)?
            .set_default("jwt_secret", "dev-secret")?
            .set_default("webhook_client_token", "")?
            .set_default("zapi_base_url", "https://api.z-api.io")?
            .set_default("zapi_instance_id", "")?
            .set_default("zapi_token", "")?
            .set_default("zapi_client_token", "")?
            .set_default("zapi_timeout_ms", 15_000)?
            .set_default("ai_pause_after_human_ms", 30 * 60 * 1_000)?
            .set_default("sweep_interval_ms", 5 * 60 * 1_000)?
            .set_default("sweep_batch_limit", 200)?
            .set_default("outbox_reconcile_interval_ms", 15_000)?
            .add_source(config::Environment::default().separator("__"))
            .build()?;
        cfg.try_deserialize()
    }

    pub fn is_production(&self) -> bool {
        self.app_env.eq_ignore_ascii_case("production")
    }

    pub fn lock_config(&self) -> LockConfig {
        LockConfig {
            ttl: Duration::from_millis(self.lock_ttl_ms.max(1)),
            acquire_attempts: self.lock_acquire_attempts.max(1),
            backoff_base: Duration::from_millis(self.lock_backoff_base_ms),
            backoff_max: Duration::from_millis(self.lock_backoff_max_ms),
        }
    }

    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            ai_pause_after_human: Duration::from_millis(self.ai_pause_after_human_ms),
        }
    }

    /// Blank means the webhook accepts unauthenticated calls.
    pub fn webhook_token(&self) -> Option<&str> {
        Some(self.webhook_client_token.trim()).filter(|token| !token.is_empty())
    }
}
