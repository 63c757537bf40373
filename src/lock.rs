//! Settings lock — FIFO mutual exclusion with an explicit timeout policy.
//!
//! DESIGN
//! ======
//! Holder count and a FIFO waiter queue live behind one `std::sync::Mutex`
//! that is never held across an await. A free lock is claimed in the same
//! critical section that observes it free, so two back-to-back acquirers can
//! never both win. A releasing holder hands the lock directly to the oldest
//! live waiter through a `oneshot`, which keeps newcomers from barging ahead
//! of the queue.
//!
//! TRADE-OFFS
//! ==========
//! `TimeoutPolicy::ForceClaim` keeps the dashboard's old liveness behaviour:
//! a waiter that times out claims the lock anyway. The overlap is made
//! visible through the holder count and `LockPermit::forced`, instead of
//! two callers silently believing they are alone.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::error::GuardError;

// =============================================================================
// TIMEOUT POLICY
// =============================================================================

/// What an acquirer does when the lock is still held at its deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeoutPolicy {
    /// Claim the lock anyway, overlapping with the current holder.
    #[default]
    ForceClaim,
    /// Give up with `GuardError::AcquireTimeout`.
    Fail,
}

impl TimeoutPolicy {
    /// Parse `force_claim` or `fail`.
    ///
    /// # Errors
    ///
    /// Returns `GuardError::ConfigParse` for any other value.
    pub fn parse(raw: &str) -> Result<Self, GuardError> {
        match raw.trim() {
            "force_claim" => Ok(Self::ForceClaim),
            "fail" => Ok(Self::Fail),
            other => Err(GuardError::ConfigParse(format!(
                "unknown timeout policy '{other}' (expected 'force_claim' or 'fail')"
            ))),
        }
    }
}

// =============================================================================
// LOCK
// =============================================================================

/// Cloneable handle to one shared settings lock.
#[derive(Clone)]
pub struct MutationLock {
    inner: Arc<Mutex<LockState>>,
    policy: TimeoutPolicy,
}

struct LockState {
    /// Active claims. More than one only after a forced claim.
    holders: usize,
    next_ticket: u64,
    waiters: VecDeque<Waiter>,
}

struct Waiter {
    ticket: u64,
    tx: oneshot::Sender<()>,
}

enum Resolution {
    HandedOff,
    Forced(usize),
    Failed,
}

impl MutationLock {
    #[must_use]
    pub fn new(policy: TimeoutPolicy) -> Self {
        Self {
            inner: Arc::new(Mutex::new(LockState { holders: 0, next_ticket: 0, waiters: VecDeque::new() })),
            policy,
        }
    }

    #[must_use]
    pub fn policy(&self) -> TimeoutPolicy {
        self.policy
    }

    #[must_use]
    pub fn is_held(&self) -> bool {
        self.state().holders > 0
    }

    /// Number of active claims.
    #[must_use]
    pub fn holders(&self) -> usize {
        self.state().holders
    }

    /// Number of queued acquirers.
    #[must_use]
    pub fn waiters(&self) -> usize {
        self.state().waiters.len()
    }

    /// Claim the lock, waiting up to `timeout` behind earlier acquirers.
    ///
    /// At the deadline the configured [`TimeoutPolicy`] decides between a
    /// forced claim and `GuardError::AcquireTimeout`. Dropping the returned
    /// future while it waits gives up the place in the queue.
    ///
    /// # Errors
    ///
    /// Returns `GuardError::AcquireTimeout` when the deadline passes under
    /// `TimeoutPolicy::Fail`.
    pub async fn acquire(&self, timeout: Duration) -> Result<LockPermit, GuardError> {
        self.acquire_with(timeout, || {}).await
    }

    /// [`acquire`](Self::acquire), running `on_freed` if the future is
    /// dropped after the lock was handed to it and giving the lock back
    /// leaves it free.
    ///
    /// # Errors
    ///
    /// Same as [`acquire`](Self::acquire).
    pub async fn acquire_with<F>(&self, timeout: Duration, on_freed: F) -> Result<LockPermit, GuardError>
    where
        F: Fn() + Send + Sync,
    {
        let (ticket, mut rx) = {
            let mut state = self.state();
            if state.holders == 0 && state.waiters.is_empty() {
                state.holders = 1;
                return Ok(LockPermit::new(self.clone(), false));
            }
            let ticket = state.next_ticket;
            state.next_ticket += 1;
            let (tx, rx) = oneshot::channel();
            state.waiters.push_back(Waiter { ticket, tx });
            (ticket, rx)
        };

        let mut queued = QueuedClaim { lock: self, ticket, armed: true, on_freed: &on_freed };

        // `rx` stays alive until the claim is resolved, so a hand-off that
        // pops our ticket always lands.
        if let Ok(Ok(())) = tokio::time::timeout(timeout, &mut rx).await {
            queued.armed = false;
            return Ok(LockPermit::new(self.clone(), false));
        }

        // Deadline passed. A hand-off may have raced the timer, so the queue
        // is the source of truth: a missing ticket means we were handed the lock.
        let resolution = {
            let mut state = self.state();
            match state.waiters.iter().position(|w| w.ticket == ticket) {
                None => Resolution::HandedOff,
                Some(idx) => {
                    state.waiters.remove(idx);
                    match self.policy {
                        TimeoutPolicy::ForceClaim => {
                            state.holders += 1;
                            Resolution::Forced(state.holders)
                        }
                        TimeoutPolicy::Fail => Resolution::Failed,
                    }
                }
            }
        };
        queued.armed = false;

        let waited_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        match resolution {
            Resolution::HandedOff => Ok(LockPermit::new(self.clone(), false)),
            Resolution::Forced(holders) => {
                warn!(holders, waited_ms, "settings lock force-claimed after timeout");
                Ok(LockPermit::new(self.clone(), true))
            }
            Resolution::Failed => Err(GuardError::AcquireTimeout { waited_ms }),
        }
    }

    /// Drop one claim. Returns `true` when the lock became free.
    fn release_claim(&self) -> bool {
        let mut state = self.state();
        if state.holders > 1 {
            state.holders -= 1;
            return false;
        }
        while let Some(waiter) = state.waiters.pop_front() {
            if waiter.tx.send(()).is_ok() {
                debug!(ticket = waiter.ticket, "settings lock handed off");
                return false;
            }
        }
        state.holders = 0;
        true
    }

    /// Leave the queue after a cancelled wait, returning the lock if it had
    /// already been handed to us. Returns `true` when the lock became free.
    fn abandon(&self, ticket: u64) -> bool {
        let handed_off = {
            let mut state = self.state();
            match state.waiters.iter().position(|w| w.ticket == ticket) {
                Some(idx) => {
                    state.waiters.remove(idx);
                    false
                }
                None => true,
            }
        };
        handed_off && self.release_claim()
    }

    fn state(&self) -> MutexGuard<'_, LockState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for MutationLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state();
        f.debug_struct("MutationLock")
            .field("policy", &self.policy)
            .field("holders", &state.holders)
            .field("waiters", &state.waiters.len())
            .finish()
    }
}

/// Queue membership of an in-progress `acquire`; cleans up on cancellation.
struct QueuedClaim<'a> {
    lock: &'a MutationLock,
    ticket: u64,
    armed: bool,
    on_freed: &'a (dyn Fn() + Sync),
}

impl Drop for QueuedClaim<'_> {
    fn drop(&mut self) {
        if self.armed && self.lock.abandon(self.ticket) {
            debug!(ticket = self.ticket, "handed-off settings lock returned by cancelled waiter");
            (self.on_freed)();
        }
    }
}

// =============================================================================
// PERMIT
// =============================================================================

/// One claim on a [`MutationLock`]. Released explicitly or on drop.
pub struct LockPermit {
    lock: Option<MutationLock>,
    forced: bool,
}

impl LockPermit {
    fn new(lock: MutationLock, forced: bool) -> Self {
        Self { lock: Some(lock), forced }
    }

    /// `true` when this claim was taken past the deadline while another
    /// holder was still active.
    #[must_use]
    pub fn forced(&self) -> bool {
        self.forced
    }

    /// Release the claim. Returns `true` when the lock became free.
    pub fn release(mut self) -> bool {
        self.release_inner()
    }

    fn release_inner(&mut self) -> bool {
        self.lock.take().is_some_and(|lock| lock.release_claim())
    }
}

impl Drop for LockPermit {
    fn drop(&mut self) {
        self.release_inner();
    }
}

impl fmt::Debug for LockPermit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockPermit")
            .field("forced", &self.forced)
            .field("released", &self.lock.is_none())
            .finish()
    }
}

#[cfg(test)]
#[path = "lock_test.rs"]
mod tests;
