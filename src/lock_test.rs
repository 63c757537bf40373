use super::*;
use tokio::sync::mpsc;
use tokio::time::Instant;

const LONG: Duration = Duration::from_secs(5);

// =============================================================================
// TimeoutPolicy
// =============================================================================

#[test]
fn policy_parses_known_values() {
    assert_eq!(TimeoutPolicy::parse("force_claim").unwrap(), TimeoutPolicy::ForceClaim);
    assert_eq!(TimeoutPolicy::parse(" fail ").unwrap(), TimeoutPolicy::Fail);
}

#[test]
fn policy_rejects_unknown_value() {
    assert!(matches!(TimeoutPolicy::parse("wait_forever"), Err(GuardError::ConfigParse(_))));
}

#[test]
fn policy_defaults_to_force_claim() {
    assert_eq!(TimeoutPolicy::default(), TimeoutPolicy::ForceClaim);
}

// =============================================================================
// acquire / release
// =============================================================================

#[tokio::test]
async fn acquire_free_lock_is_immediate() {
    let lock = MutationLock::new(TimeoutPolicy::Fail);
    assert!(!lock.is_held());

    let permit = lock.acquire(Duration::ZERO).await.unwrap();
    assert!(!permit.forced());
    assert!(lock.is_held());
    assert_eq!(lock.holders(), 1);

    assert!(permit.release());
    assert!(!lock.is_held());
}

#[tokio::test]
async fn serialized_calls_alternate_free_and_held() {
    let lock = MutationLock::new(TimeoutPolicy::Fail);
    for _ in 0..10 {
        assert!(!lock.is_held());
        let permit = lock.acquire(LONG).await.unwrap();
        assert_eq!(lock.holders(), 1);
        drop(permit);
    }
    assert!(!lock.is_held());
}

#[tokio::test(start_paused = true)]
async fn second_acquirer_waits_for_release() {
    let lock = MutationLock::new(TimeoutPolicy::ForceClaim);
    let first = lock.acquire(LONG).await.unwrap();

    let contender = lock.clone();
    let second = tokio::spawn(async move { contender.acquire(LONG).await });

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!second.is_finished());
    assert_eq!(lock.waiters(), 1);
    assert_eq!(lock.holders(), 1);

    // Hand-off keeps the lock held on behalf of the waiter.
    assert!(!first.release());
    let permit = second.await.unwrap().unwrap();
    assert!(!permit.forced());
    assert_eq!(lock.holders(), 1);
    assert_eq!(lock.waiters(), 0);

    drop(permit);
    assert!(!lock.is_held());
}

#[tokio::test(start_paused = true)]
async fn waiters_are_served_in_arrival_order() {
    let lock = MutationLock::new(TimeoutPolicy::Fail);
    let first = lock.acquire(LONG).await.unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();

    for id in 0..3 {
        let lock = lock.clone();
        let tx = tx.clone();
        tokio::spawn(async move {
            let permit = lock.acquire(LONG).await.unwrap();
            tx.send(id).unwrap();
            tokio::time::sleep(Duration::from_millis(10)).await;
            drop(permit);
        });
        // Let each task enqueue before spawning the next.
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    assert_eq!(lock.waiters(), 3);

    drop(first);
    let mut order = Vec::new();
    for _ in 0..3 {
        order.push(rx.recv().await.unwrap());
    }
    assert_eq!(order, vec![0, 1, 2]);
}

#[tokio::test(start_paused = true)]
async fn newcomer_does_not_barge_ahead_of_queue() {
    let lock = MutationLock::new(TimeoutPolicy::Fail);
    let first = lock.acquire(LONG).await.unwrap();

    let queued = lock.clone();
    let waiter = tokio::spawn(async move { queued.acquire(LONG).await });
    tokio::time::sleep(Duration::from_millis(1)).await;

    drop(first);
    // The lock now belongs to the queued task even before it runs.
    assert!(lock.is_held());
    let result = lock.acquire(Duration::from_millis(10)).await;
    assert!(matches!(result, Err(GuardError::AcquireTimeout { .. })));

    drop(waiter.await.unwrap().unwrap());
    assert!(!lock.is_held());
}

// =============================================================================
// timeout policy
// =============================================================================

#[tokio::test(start_paused = true)]
async fn force_claim_returns_within_timeout() {
    let lock = MutationLock::new(TimeoutPolicy::ForceClaim);
    let _holder = lock.acquire(LONG).await.unwrap();

    let started = Instant::now();
    let permit = lock.acquire(Duration::from_millis(300)).await.unwrap();
    let elapsed = started.elapsed();

    assert!(permit.forced());
    assert!(elapsed >= Duration::from_millis(300));
    assert!(elapsed < Duration::from_millis(400));
    assert_eq!(lock.holders(), 2);
    assert_eq!(lock.waiters(), 0);
}

#[tokio::test(start_paused = true)]
async fn fail_policy_reports_timeout_and_leaves_queue() {
    let lock = MutationLock::new(TimeoutPolicy::Fail);
    let _holder = lock.acquire(LONG).await.unwrap();

    let result = lock.acquire(Duration::from_millis(100)).await;
    match result {
        Err(GuardError::AcquireTimeout { waited_ms }) => assert_eq!(waited_ms, 100),
        other => panic!("expected timeout, got {other:?}"),
    }
    assert_eq!(lock.waiters(), 0);
    assert_eq!(lock.holders(), 1);
}

#[tokio::test(start_paused = true)]
async fn forced_holders_release_in_any_order() {
    let lock = MutationLock::new(TimeoutPolicy::ForceClaim);
    let original = lock.acquire(LONG).await.unwrap();
    let forced = lock.acquire(Duration::from_millis(10)).await.unwrap();
    assert_eq!(lock.holders(), 2);

    assert!(!original.release());
    assert!(lock.is_held());
    assert!(forced.release());
    assert!(!lock.is_held());
}

// =============================================================================
// cancellation
// =============================================================================

#[tokio::test(start_paused = true)]
async fn cancelled_waiter_leaves_the_queue() {
    let lock = MutationLock::new(TimeoutPolicy::Fail);
    let holder = lock.acquire(LONG).await.unwrap();

    let queued = lock.clone();
    let waiter = tokio::spawn(async move { queued.acquire(LONG).await });
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(lock.waiters(), 1);

    waiter.abort();
    let _ = waiter.await;
    assert_eq!(lock.waiters(), 0);

    assert!(holder.release());
    assert!(!lock.is_held());
}

#[tokio::test(start_paused = true)]
async fn dropped_acquire_future_returns_handed_off_lock() {
    let lock = MutationLock::new(TimeoutPolicy::Fail);
    let holder = lock.acquire(LONG).await.unwrap();

    {
        let pending = lock.acquire(LONG);
        tokio::pin!(pending);
        // Poll once so the future enqueues itself.
        assert!(futures_poll_once(pending.as_mut()).await.is_none());
        assert_eq!(lock.waiters(), 1);

        // Hand the lock to the queued future, then drop it without polling.
        drop(holder);
        assert!(lock.is_held());
    }

    assert!(!lock.is_held());
    assert_eq!(lock.waiters(), 0);
}

#[tokio::test(start_paused = true)]
async fn on_freed_runs_only_when_cancelled_hand_off_frees_lock() {
    use std::sync::atomic::{AtomicUsize, Ordering};

    let lock = MutationLock::new(TimeoutPolicy::Fail);
    let freed = AtomicUsize::new(0);
    let holder = lock.acquire(LONG).await.unwrap();

    {
        // Still queued when dropped: the holder keeps the lock.
        let pending = lock.acquire_with(LONG, || {
            freed.fetch_add(1, Ordering::SeqCst);
        });
        tokio::pin!(pending);
        assert!(futures_poll_once(pending.as_mut()).await.is_none());
    }
    assert_eq!(freed.load(Ordering::SeqCst), 0);
    assert!(lock.is_held());

    {
        let pending = lock.acquire_with(LONG, || {
            freed.fetch_add(1, Ordering::SeqCst);
        });
        tokio::pin!(pending);
        assert!(futures_poll_once(pending.as_mut()).await.is_none());
        drop(holder);
    }
    assert_eq!(freed.load(Ordering::SeqCst), 1);
    assert!(!lock.is_held());
}

/// Poll a future exactly once, returning its output if it was ready.
async fn futures_poll_once<F: std::future::Future + ?Sized>(fut: std::pin::Pin<&mut F>) -> Option<F::Output> {
    let mut fut = Some(fut);
    std::future::poll_fn(move |cx| {
        let Some(f) = fut.take() else {
            return std::task::Poll::Ready(None);
        };
        match f.poll(cx) {
            std::task::Poll::Ready(out) => std::task::Poll::Ready(Some(out)),
            std::task::Poll::Pending => std::task::Poll::Ready(None),
        }
    })
    .await
}
