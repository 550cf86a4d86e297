use std::time::Instant;

use threadline_domain::DomainResult;
use threadline_domain::consolidation::{SweepOptions, SweepReport};
use threadline_infra::services::Services;

use crate::observability;

/// How many unrecorded outbox entries one reconciliation pass handles.
pub const RECONCILE_BATCH: usize = 100;

async fn timed<T>(task: &'static str, run: impl Future<Output = DomainResult<T>>) -> DomainResult<T> {
    let started = Instant::now();
    let result = run.await;
    let outcome = match &result {
        Ok(_) => "success",
        Err(err) if err.is_retryable() => "busy",
        Err(_) => "error",
    };
    observability::register_task_run(task, outcome, started.elapsed().as_secs_f64() * 1_000.0);
    result
}

pub async fn run_sweep(services: &Services, batch_limit: usize) -> DomainResult<SweepReport> {
    let options = SweepOptions {
        dry_run: false,
        limit: (batch_limit > 0).then_some(batch_limit),
    };
    let report = timed("sweep", services.consolidation.sweep(&options)).await?;
    let executed = |merges: &[threadline_domain::consolidation::PlannedMerge]| {
        merges.iter().filter(|merge| merge.executed).count()
    };
    observability::register_sweep(
        executed(&report.contact_merges),
        executed(&report.conversation_merges),
        report.integrity_issues.len(),
    );
    for issue in &report.integrity_issues {
        tracing::warn!(
            kind = ?issue.kind,
            subject_id = %issue.subject_id,
            detail = %issue.detail,
            "integrity issue needs operator attention"
        );
    }
    Ok(report)
}

pub async fn run_reconcile(services: &Services) -> DomainResult<usize> {
    let reconciled = timed(
        "outbox_reconcile",
        services.dispatcher.reconcile_unrecorded(RECONCILE_BATCH),
    )
    .await?;
    observability::register_outbox_reconciled(reconciled);
    if reconciled > 0 {
        tracing::info!(reconciled, "outbound messages recorded");
    }
    Ok(reconciled)
}

pub async fn run_lock_purge(services: &Services) -> DomainResult<usize> {
    let purged = timed("lock_purge", services.locks.purge_expired()).await?;
    observability::register_locks_purged(purged);
    if purged > 0 {
        tracing::debug!(purged, "expired leases removed");
    }
    Ok(purged)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use threadline_domain::DomainResult;
    use threadline_domain::dispatch::{DispatchRequest, DispatcherConfig};
    use threadline_domain::identity::ResolveRequest;
    use threadline_domain::locks::{LockConfig, LockKey};
    use threadline_domain::ports::BoxFuture;
    use threadline_domain::ports::provider::{
        MessagingProvider, ProviderReceipt, ProviderSendRequest,
    };

    use super::*;

    struct EchoProvider;

    impl MessagingProvider for EchoProvider {
        fn name(&self) -> &'static str {
            "echo"
        }

        fn send(
            &self,
            request: &ProviderSendRequest,
        ) -> BoxFuture<'_, DomainResult<ProviderReceipt>> {
            let id = format!("wamid-{}", &request.idempotency_key[..8.min(request.idempotency_key.len())]);
            Box::pin(async move {
                Ok(ProviderReceipt {
                    provider_message_id: id,
                })
            })
        }
    }

    fn services() -> Services {
        Services::in_memory(
            Arc::new(EchoProvider),
            LockConfig {
                ttl: Duration::from_millis(200),
                acquire_attempts: 2,
                backoff_base: Duration::from_millis(1),
                backoff_max: Duration::from_millis(5),
            },
            DispatcherConfig::default(),
        )
    }

    #[tokio::test]
    async fn sweep_merges_phone_variants() {
        let services = services();
        for phone in ["5581997438430", "558197438430"] {
            services
                .ingest
                .resolver()
                .resolve_request(&ResolveRequest {
                    phone: Some(phone.into()),
                    ..ResolveRequest::default()
                })
                .await
                .unwrap();
        }

        let report = run_sweep(&services, 10).await.unwrap();
        assert_eq!(report.contact_merges.len(), 1);
        assert!(report.contact_merges[0].executed);
        assert_eq!(
            services.repositories.contacts.list(0).await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn reconcile_with_nothing_pending_is_a_no_op() {
        let services = services();
        assert_eq!(run_reconcile(&services).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn reconcile_records_sends_that_missed_the_lease() {
        let services = services();
        let contact = services
            .ingest
            .resolver()
            .resolve_request(&ResolveRequest {
                phone: Some("558197438430".into()),
                ..ResolveRequest::default()
            })
            .await
            .unwrap()
            .contact;
        let conversation = services
            .ingest
            .locator()
            .locate(&contact.contact_id, false, None)
            .await
            .unwrap()
            .conversation;

        let held = services
            .locks
            .acquire(
                &LockKey::conversation(&conversation.conversation_id),
                Duration::from_secs(5),
            )
            .await
            .unwrap()
            .expect("lease");
        let outcome = services
            .dispatcher
            .dispatch(&DispatchRequest {
                conversation_id: conversation.conversation_id.clone(),
                content: "pedido confirmado".into(),
                ..DispatchRequest::default()
            })
            .await
            .unwrap();
        assert!(outcome.provider_message_id.is_some());
        services.locks.release(&held).await;

        assert_eq!(run_reconcile(&services).await.unwrap(), 1);
        let messages = services
            .repositories
            .messages
            .list_by_conversation(&conversation.conversation_id)
            .await
            .unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].provider_message_id, outcome.provider_message_id);
        assert_eq!(run_reconcile(&services).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn purge_removes_expired_leases() {
        let services = services();
        services
            .locks
            .acquire(&LockKey::conversation("conv-1"), Duration::from_millis(10))
            .await
            .unwrap()
            .expect("lease");
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(run_lock_purge(&services).await.unwrap(), 1);
    }
}
