use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use threadline_domain::error::DomainError;
use threadline_domain::locks::{ConversationLockService, InMemoryLockStore, LockConfig, LockKey};

fn service(ttl: Duration, attempts: u32) -> ConversationLockService {
    ConversationLockService::new(
        Arc::new(InMemoryLockStore::new()),
        LockConfig {
            ttl,
            acquire_attempts: attempts,
            backoff_base: Duration::from_millis(5),
            backoff_max: Duration::from_millis(20),
        },
    )
}

#[tokio::test]
async fn lease_blocks_until_expiry() {
    let locks = service(Duration::from_millis(80), 1);
    let key = LockKey::conversation("c-1");

    let first = locks
        .acquire(&key, Duration::from_millis(80))
        .await
        .unwrap()
        .expect("first acquire");
    assert!(first.is_live());
    assert!(
        locks
            .acquire(&key, Duration::from_millis(80))
            .await
            .unwrap()
            .is_none()
    );

    tokio::time::sleep(Duration::from_millis(120)).await;
    assert!(!first.is_live());
    assert!(matches!(first.ensure_live(), Err(DomainError::LeaseExpired)));
    assert!(
        locks
            .acquire(&key, Duration::from_millis(80))
            .await
            .unwrap()
            .is_some()
    );
}

#[tokio::test]
async fn release_requires_the_holding_token() {
    let locks = service(Duration::from_secs(5), 1);
    let key = LockKey::conversation("c-2");
    let lease = locks.acquire_with_retry(&key).await.unwrap();

    assert!(!locks.release_token(&key, "not-the-token").await.unwrap());
    assert!(locks.acquire(&key, Duration::from_secs(5)).await.unwrap().is_none());

    assert!(locks.release(&lease).await);
    assert!(!locks.release(&lease).await);
    assert!(locks.acquire(&key, Duration::from_secs(5)).await.unwrap().is_some());
}

#[tokio::test]
async fn exhausted_retries_surface_lock_busy() {
    let locks = service(Duration::from_secs(5), 3);
    let key = LockKey::conversation("c-3");
    let _held = locks.acquire_with_retry(&key).await.unwrap();

    let err = locks.acquire_with_retry(&key).await.unwrap_err();
    assert!(matches!(err, DomainError::LockBusy));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn retry_picks_up_a_lease_released_meanwhile() {
    let locks = service(Duration::from_secs(5), 8);
    let key = LockKey::conversation("c-4");
    let held = locks.acquire_with_retry(&key).await.unwrap();

    let releaser = {
        let locks = locks.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(15)).await;
            locks.release(&held).await
        })
    };
    let lease = locks.acquire_with_retry(&key).await.unwrap();
    assert!(releaser.await.unwrap());
    assert!(lease.is_live());
}

#[tokio::test]
async fn pair_acquisition_releases_the_first_lease_on_failure() {
    let locks = service(Duration::from_secs(5), 2);
    let low = LockKey::conversation("a");
    let high = LockKey::conversation("b");
    let _blocker = locks.acquire_with_retry(&high).await.unwrap();

    let err = locks.acquire_pair(&high, &low).await.unwrap_err();
    assert!(matches!(err, DomainError::LockBusy));
    assert!(locks.acquire(&low, Duration::from_secs(5)).await.unwrap().is_some());
}

#[tokio::test]
async fn with_lease_releases_after_an_error() {
    let locks = service(Duration::from_secs(5), 1);
    let key = LockKey::contact("k-1");

    let result: Result<(), DomainError> = locks
        .with_lease(&key, |_lease| async { Err(DomainError::NotFound) })
        .await;
    assert!(matches!(result, Err(DomainError::NotFound)));
    assert!(locks.acquire(&key, Duration::from_secs(5)).await.unwrap().is_some());
}

#[tokio::test]
async fn zero_ttl_is_rejected() {
    let locks = service(Duration::from_secs(5), 1);
    let err = locks
        .acquire(&LockKey::conversation("c-5"), Duration::ZERO)
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::Validation(_)));
}

#[tokio::test]
async fn overrun_lease_refuses_the_write_and_keeps_the_next_holder() {
    let locks = service(Duration::from_millis(40), 1);
    let key = LockKey::conversation("c-overrun");
    let writes = AtomicUsize::new(0);

    let result = locks
        .with_lease(&key, |lease| {
            let locks = &locks;
            let key = &key;
            let writes = &writes;
            async move {
                tokio::time::sleep(Duration::from_millis(80)).await;
                let next = locks.acquire(key, Duration::from_secs(5)).await?;
                assert!(next.is_some(), "expired lease should be takeable");
                lease.ensure_live()?;
                writes.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .await;

    assert!(matches!(result, Err(DomainError::LeaseExpired)));
    assert_eq!(writes.load(Ordering::SeqCst), 0);
    // The overrun holder's release must not free the new holder's lease.
    assert!(
        locks
            .acquire(&key, Duration::from_millis(40))
            .await
            .unwrap()
            .is_none()
    );
}
