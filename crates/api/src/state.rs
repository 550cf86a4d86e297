use threadline_infra::config::AppConfig;
use threadline_infra::services::Services;

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub services: Services,
}

impl AppState {
    pub async fn new(config: AppConfig) -> anyhow::Result<Self> {
        let services = Services::from_config(&config).await?;
        Ok(Self { config, services })
    }

    #[allow(dead_code)]
    pub fn with_services(config: AppConfig, services: Services) -> Self {
        Self { config, services }
    }
}
