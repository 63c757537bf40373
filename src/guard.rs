//! Settings mutation guard — the shared lock plus deferred reloads.
//!
//! DESIGN
//! ======
//! `SettingsGuard` is a cheap `Clone` handle: every clone shares one
//! [`MutationLock`] and one [`ReloadRegistry`]. Releasing a permit always
//! drains the pending-reload set afterwards, whether the lock went free or
//! was handed to the next waiter. A reload scheduled while the lock is free
//! is delivered immediately, on the caller's stack.

use std::time::Duration;

use tracing::debug;

use crate::config::GuardConfig;
use crate::error::GuardError;
use crate::lock::{LockPermit, MutationLock, TimeoutPolicy};
use crate::reload::{DrainReport, ReloadRegistry, Subscription};

/// Result of [`SettingsGuard::schedule_reload`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReloadScheduled {
    /// The lock is held; the next release delivers the reload.
    Deferred,
    /// The lock was free; subscribers have already run.
    Delivered(DrainReport),
}

#[derive(Debug, Clone)]
pub struct SettingsGuard {
    lock: MutationLock,
    reloads: ReloadRegistry,
    default_timeout: Duration,
}

impl SettingsGuard {
    #[must_use]
    pub fn new(policy: TimeoutPolicy, default_timeout: Duration) -> Self {
        Self { lock: MutationLock::new(policy), reloads: ReloadRegistry::new(), default_timeout }
    }

    #[must_use]
    pub fn from_config(config: &GuardConfig) -> Self {
        Self::new(config.timeout_policy, config.acquire_timeout)
    }

    /// Claim the guard, waiting at most `timeout` for the current holder.
    ///
    /// A waiter cancelled after the lock was handed to it gives the lock
    /// back; if that frees it, pending reloads are drained right there.
    ///
    /// # Errors
    ///
    /// Returns `GuardError::AcquireTimeout` when the deadline passes under
    /// `TimeoutPolicy::Fail`.
    pub async fn acquire(&self, timeout: Duration) -> Result<SettingsPermit, GuardError> {
        let reloads = &self.reloads;
        let permit = self
            .lock
            .acquire_with(timeout, || {
                let report = reloads.drain();
                if !report.is_empty() {
                    debug!(notified = ?report.notified, "reloads delivered after cancelled acquire");
                }
            })
            .await?;
        Ok(SettingsPermit { permit: Some(permit), reloads: self.reloads.clone() })
    }

    /// [`acquire`](Self::acquire) with the configured default timeout.
    ///
    /// # Errors
    ///
    /// Same as [`acquire`](Self::acquire).
    pub async fn acquire_default(&self) -> Result<SettingsPermit, GuardError> {
        self.acquire(self.default_timeout).await
    }

    /// Release `permit` and deliver any reloads that piled up meanwhile.
    pub fn release(&self, permit: SettingsPermit) -> DrainReport {
        permit.release()
    }

    /// Mark `app` stale. Delivered now if the guard is free, otherwise on
    /// the next release.
    ///
    /// # Errors
    ///
    /// Returns `GuardError::NoSubscribers` when nobody listens for `app`.
    pub fn schedule_reload(&self, app: &str) -> Result<ReloadScheduled, GuardError> {
        self.reloads.mark_pending(app)?;
        if self.lock.is_held() {
            debug!(%app, holders = self.lock.holders(), "reload deferred until release");
            return Ok(ReloadScheduled::Deferred);
        }
        Ok(ReloadScheduled::Delivered(self.reloads.drain()))
    }

    /// Register a reload callback for `app`.
    pub fn subscribe<F>(&self, app: impl Into<String>, callback: F) -> Subscription
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.reloads.subscribe(app, callback)
    }

    #[must_use]
    pub fn has_subscribers(&self, app: &str) -> bool {
        self.reloads.has_subscribers(app)
    }

    #[must_use]
    pub fn is_pending(&self, app: &str) -> bool {
        self.reloads.is_pending(app)
    }

    #[must_use]
    pub fn is_held(&self) -> bool {
        self.lock.is_held()
    }

    #[must_use]
    pub fn holders(&self) -> usize {
        self.lock.holders()
    }

    #[must_use]
    pub fn policy(&self) -> TimeoutPolicy {
        self.lock.policy()
    }

    #[must_use]
    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }
}

// =============================================================================
// PERMIT
// =============================================================================

/// Claim on a [`SettingsGuard`]. Release drains pending reloads; dropping
/// the permit does the same.
#[derive(Debug)]
#[must_use = "dropping a SettingsPermit releases the guard immediately"]
pub struct SettingsPermit {
    permit: Option<LockPermit>,
    reloads: ReloadRegistry,
}

impl SettingsPermit {
    #[must_use]
    pub fn forced(&self) -> bool {
        self.permit.as_ref().is_some_and(LockPermit::forced)
    }

    pub fn release(mut self) -> DrainReport {
        self.finish()
    }

    fn finish(&mut self) -> DrainReport {
        let Some(permit) = self.permit.take() else {
            return DrainReport::default();
        };
        permit.release();
        self.reloads.drain()
    }
}

impl Drop for SettingsPermit {
    fn drop(&mut self) {
        self.finish();
    }
}

#[cfg(test)]
#[path = "guard_test.rs"]
mod tests;
