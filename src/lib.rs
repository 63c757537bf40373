//! Settings mutation guard for dashboard settings endpoints.
//!
//! DESIGN
//! ======
//! Several consumers load and persist per-application settings against one
//! HTTP endpoint. [`SettingsGuard`] serializes those requests through a FIFO
//! lock and queues "reload" notifications for consumers whose cached settings
//! went stale while the guard was held. [`GuardedClient`] is the explicit
//! wrapper that sends matching requests through the guard, and
//! [`SettingsApi`] builds per-application load/save/watch on top.

pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod guard;
pub mod lock;
pub mod reload;
pub mod settings;

#[cfg(test)]
mod test_support;

pub use client::{GuardedClient, SettingsRoutes};
pub use config::GuardConfig;
pub use error::GuardError;
pub use guard::{ReloadScheduled, SettingsGuard, SettingsPermit};
pub use lock::{LockPermit, MutationLock, TimeoutPolicy};
pub use reload::{DrainReport, ReloadRegistry, Subscription};
pub use settings::{SettingsApi, SettingsWatch};
