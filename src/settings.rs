//! Settings API — per-application load/save over the guarded client.
//!
//! DESIGN
//! ======
//! Each application's settings live at `path_template` with `{app}`
//! substituted. Saves schedule a reload for the same app so watchers pick up
//! the persisted value once the guard frees up. A [`SettingsWatch`] is a
//! reload subscription that re-fetches on every delivered reload and
//! publishes the result on a `tokio::sync::watch` channel.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::client::GuardedClient;
use crate::config::{APP_PLACEHOLDER, GuardConfig, check_template};
use crate::error::GuardError;
use crate::guard::SettingsGuard;
use crate::reload::Subscription;

#[derive(Debug, Clone)]
pub struct SettingsApi {
    client: GuardedClient,
    path_template: String,
}

impl SettingsApi {
    /// # Errors
    ///
    /// Returns `GuardError::ConfigParse` when `path_template` lacks `{app}`
    /// or builds paths that `client` would not send through the guard.
    pub fn new(client: GuardedClient, path_template: impl Into<String>) -> Result<Self, GuardError> {
        let path_template = path_template.into();
        check_template(client.routes(), &path_template)?;
        Ok(Self { client, path_template })
    }

    /// Build a guard, client and API from one config.
    ///
    /// # Errors
    ///
    /// Same as [`GuardedClient::new`] and [`new`](Self::new).
    pub fn from_config(config: &GuardConfig) -> Result<Self, GuardError> {
        let guard = SettingsGuard::from_config(config);
        let client = GuardedClient::new(config, guard)?;
        Self::new(client, config.path_template.clone())
    }

    #[must_use]
    pub fn client(&self) -> &GuardedClient {
        &self.client
    }

    #[must_use]
    pub fn guard(&self) -> &SettingsGuard {
        self.client.guard()
    }

    /// Request path for `app`'s settings.
    ///
    /// # Errors
    ///
    /// Returns `GuardError::InvalidApp` unless `app` is a non-empty key of
    /// ASCII letters, digits, `-`, `_` and `.` (and not `.` or `..`).
    pub fn settings_path(&self, app: &str) -> Result<String, GuardError> {
        validate_app(app)?;
        Ok(self.path_template.replace(APP_PLACEHOLDER, app))
    }

    /// Fetch `app`'s current settings.
    ///
    /// # Errors
    ///
    /// `GuardError::InvalidApp`, any [`GuardedClient::execute`] error,
    /// `GuardError::Status` for a non-success reply and `GuardError::Json`
    /// for a body that is not JSON.
    pub async fn load(&self, app: &str) -> Result<Value, GuardError> {
        let path = self.settings_path(app)?;
        let response = self.client.send(self.client.get(&path)?).await?;
        read_json(response).await
    }

    /// Persist `value` as `app`'s settings and return the endpoint's reply.
    ///
    /// # Errors
    ///
    /// Same as [`load`](Self::load). Once the endpoint accepted the save,
    /// the reload step cannot fail it.
    pub async fn save(&self, app: &str, value: &Value) -> Result<Value, GuardError> {
        let path = self.settings_path(app)?;
        let response = self.client.send(self.client.post_json(&path, value)?).await?;
        let reply = read_json(response).await?;

        match self.guard().schedule_reload(app) {
            Ok(scheduled) => debug!(%app, ?scheduled, "reload scheduled after save"),
            Err(GuardError::NoSubscribers { .. }) => debug!(%app, "no watchers to reload after save"),
            Err(e) => warn!(%app, error = %e, "reload after save not scheduled"),
        }
        Ok(reply)
    }

    /// Subscribe to reloads of `app`, re-fetching its settings on each one.
    ///
    /// # Errors
    ///
    /// Returns `GuardError::InvalidApp` for a bad key and
    /// `GuardError::NoRuntime` outside a tokio runtime, since every reload
    /// is fetched on a spawned task.
    pub fn watch(&self, app: &str) -> Result<SettingsWatch, GuardError> {
        validate_app(app)?;
        let handle = tokio::runtime::Handle::try_current().map_err(|_| GuardError::NoRuntime)?;
        let (tx, rx) = watch::channel(None);
        let tx = Arc::new(tx);
        let api = self.clone();

        let subscription = self.guard().subscribe(app, move |app: &str| {
            let api = api.clone();
            let tx = Arc::clone(&tx);
            let app = app.to_string();
            handle.spawn(async move {
                match api.load(&app).await {
                    Ok(value) => {
                        tx.send_replace(Some(value));
                    }
                    Err(e) => warn!(%app, error = %e, "settings reload failed"),
                }
            });
        });

        Ok(SettingsWatch { subscription, receiver: rx })
    }
}

async fn read_json(response: reqwest::Response) -> Result<Value, GuardError> {
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        return Err(GuardError::Status { status: status.as_u16(), body });
    }
    if body.trim().is_empty() {
        return Ok(Value::Null);
    }
    Ok(serde_json::from_str(&body)?)
}

fn validate_app(app: &str) -> Result<(), GuardError> {
    let valid = !app.is_empty()
        && app
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        && app != "."
        && app != "..";
    if valid { Ok(()) } else { Err(GuardError::InvalidApp { app: app.to_string() }) }
}

// =============================================================================
// WATCH
// =============================================================================

/// Live view of one application's settings, refreshed on every reload.
/// Dropping it unsubscribes.
#[derive(Debug)]
pub struct SettingsWatch {
    subscription: Subscription,
    receiver: watch::Receiver<Option<Value>>,
}

impl SettingsWatch {
    #[must_use]
    pub fn app(&self) -> &str {
        self.subscription.app()
    }

    /// Most recently fetched settings, if any reload has completed.
    #[must_use]
    pub fn latest(&self) -> Option<Value> {
        self.receiver.borrow().clone()
    }

    /// Wait for the next completed reload.
    pub async fn changed(&mut self) -> Option<Value> {
        self.receiver.changed().await.ok()?;
        self.receiver.borrow_and_update().clone()
    }

    /// Independent receiver for the same stream of values.
    #[must_use]
    pub fn receiver(&self) -> watch::Receiver<Option<Value>> {
        self.receiver.clone()
    }
}

#[cfg(test)]
#[path = "settings_test.rs"]
mod tests;
