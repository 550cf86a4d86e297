mod observability;
mod tasks;

use std::time::Duration;

use threadline_infra::services::Services;
use threadline_infra::{config::AppConfig, logging::init_tracing};
use tokio::time::{MissedTickBehavior, interval};
use tracing::info;

const MIN_INTERVAL_MS: u64 = 1_000;

fn ticker(period_ms: u64) -> tokio::time::Interval {
    let mut ticker = interval(Duration::from_millis(period_ms.max(MIN_INTERVAL_MS)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load()?;
    init_tracing(&config)?;
    observability::init_metrics()?;

    let services = Services::from_config(&config).await?;
    info!(
        sweep_interval_ms = config.sweep_interval_ms,
        reconcile_interval_ms = config.outbox_reconcile_interval_ms,
        "worker starting"
    );

    let mut sweep = ticker(config.sweep_interval_ms);
    let mut reconcile = ticker(config.outbox_reconcile_interval_ms);
    let mut purge = ticker(config.lock_ttl_ms);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = sweep.tick() => {
                match tasks::run_sweep(&services, config.sweep_batch_limit).await {
                    Ok(report) => info!(
                        contact_merges = report.contact_merges.len(),
                        conversation_merges = report.conversation_merges.len(),
                        rekeyed = report.rekeyed.len(),
                        skipped = report.skipped,
                        "sweep pass finished"
                    ),
                    Err(err) => tracing::error!(error = %err, "sweep pass failed"),
                }
            }
            _ = reconcile.tick() => {
                if let Err(err) = tasks::run_reconcile(&services).await {
                    tracing::error!(error = %err, "outbox reconciliation failed");
                }
            }
            _ = purge.tick() => {
                if let Err(err) = tasks::run_lock_purge(&services).await {
                    tracing::warn!(error = %err, "lease purge failed");
                }
            }
        }
    }

    info!("worker shutdown");
    Ok(())
}
