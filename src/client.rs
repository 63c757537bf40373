//! Guarded HTTP client — routes settings requests through the guard.
//!
//! DESIGN
//! ======
//! Callers send requests through [`GuardedClient::execute`] on purpose;
//! nothing is intercepted globally. Routes are matched against the request
//! path relative to the base URL, so a dashboard mounted under a subpath
//! (`http://host/dash`) uses the same patterns as one at the root. A request
//! whose path matches one of the [`SettingsRoutes`] acquires the guard before it is sent, and the permit is
//! released `release_delay` after the response (or the failure) is observed,
//! on a spawned task. Every other request goes straight to `reqwest`.
//!
//! Failures are returned to the caller untouched once the delayed release is
//! scheduled. No retries happen here; see `GuardError::retryable`.

use std::time::Duration;

use regex::Regex;
use reqwest::{Request, RequestBuilder, Response, Url};
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::GuardConfig;
use crate::error::GuardError;
use crate::guard::{SettingsGuard, SettingsPermit};

// =============================================================================
// ROUTES
// =============================================================================

/// Path patterns identifying settings requests.
#[derive(Debug, Clone)]
pub struct SettingsRoutes {
    patterns: Vec<Regex>,
}

impl SettingsRoutes {
    /// Compile `patterns`. An empty list matches nothing.
    ///
    /// # Errors
    ///
    /// Returns `GuardError::ConfigParse` naming the first invalid regex.
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self, GuardError> {
        let patterns = patterns
            .iter()
            .map(|p| {
                Regex::new(p.as_ref())
                    .map_err(|e| GuardError::ConfigParse(format!("invalid settings route '{}': {e}", p.as_ref())))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    #[must_use]
    pub fn matches(&self, path: &str) -> bool {
        self.patterns.iter().any(|re| re.is_match(path))
    }
}

// =============================================================================
// CLIENT
// =============================================================================

#[derive(Debug, Clone)]
pub struct GuardedClient {
    http: reqwest::Client,
    guard: SettingsGuard,
    routes: SettingsRoutes,
    base_url: String,
    /// Path component of `base_url`, without a trailing slash.
    base_path: String,
    acquire_timeout: Duration,
    release_delay: Duration,
}

impl GuardedClient {
    /// # Errors
    ///
    /// Returns `GuardError::ConfigParse` for an invalid route pattern and
    /// `GuardError::Http` when the HTTP client cannot be built.
    pub fn new(config: &GuardConfig, guard: SettingsGuard) -> Result<Self, GuardError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        let base_url = config.base_url.trim_end_matches('/').to_string();
        // An unparseable base fails later, in `url`.
        let base_path = Url::parse(&base_url)
            .map(|url| url.path().trim_end_matches('/').to_string())
            .unwrap_or_default();
        Ok(Self {
            http,
            guard,
            routes: SettingsRoutes::new(&config.route_patterns)?,
            base_url,
            base_path,
            acquire_timeout: config.acquire_timeout,
            release_delay: config.release_delay,
        })
    }

    #[must_use]
    pub fn guard(&self) -> &SettingsGuard {
        &self.guard
    }

    #[must_use]
    pub fn routes(&self) -> &SettingsRoutes {
        &self.routes
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Absolute URL for `path` under the configured base URL.
    ///
    /// # Errors
    ///
    /// Returns `GuardError::InvalidUrl` when the joined URL does not parse.
    pub fn url(&self, path: &str) -> Result<Url, GuardError> {
        let raw = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        Url::parse(&raw).map_err(|e| GuardError::InvalidUrl(format!("{raw}: {e}")))
    }

    /// # Errors
    ///
    /// Same as [`url`](Self::url).
    pub fn get(&self, path: &str) -> Result<RequestBuilder, GuardError> {
        Ok(self.http.get(self.url(path)?))
    }

    /// # Errors
    ///
    /// Same as [`url`](Self::url).
    pub fn post_json<T: Serialize + ?Sized>(&self, path: &str, body: &T) -> Result<RequestBuilder, GuardError> {
        Ok(self.http.post(self.url(path)?).json(body))
    }

    /// Build and [`execute`](Self::execute) a request.
    ///
    /// # Errors
    ///
    /// `GuardError::Http` when the builder is invalid, otherwise the same as
    /// [`execute`](Self::execute).
    pub async fn send(&self, builder: RequestBuilder) -> Result<Response, GuardError> {
        let request = builder.build()?;
        self.execute(request).await
    }

    /// Whether a request to `path` (absolute, as sent) is serialized
    /// through the guard.
    #[must_use]
    pub fn is_guarded(&self, path: &str) -> bool {
        self.routes.matches(self.route_path(path))
    }

    /// Send `request`, serializing it through the guard when it targets a
    /// settings route.
    ///
    /// # Errors
    ///
    /// Returns `GuardError::AcquireTimeout` when the guard cannot be claimed
    /// under `TimeoutPolicy::Fail`, and `GuardError::Http` when the request
    /// fails. Non-success statuses are returned as responses.
    pub async fn execute(&self, request: Request) -> Result<Response, GuardError> {
        let path = request.url().path().to_string();
        if !self.is_guarded(&path) {
            return Ok(self.http.execute(request).await?);
        }

        let permit = self.guard.acquire(self.acquire_timeout).await?;
        debug!(%path, method = %request.method(), forced = permit.forced(), "settings request sent");

        let result = self.http.execute(request).await;
        self.release_after_delay(permit, &path);

        match result {
            Ok(response) => {
                debug!(%path, status = response.status().as_u16(), "settings response received");
                Ok(response)
            }
            Err(e) => {
                warn!(%path, error = %e, "settings request failed");
                Err(e.into())
            }
        }
    }

    /// `path` with the base URL's own path stripped, when it sits under it.
    fn route_path<'a>(&self, path: &'a str) -> &'a str {
        if self.base_path.is_empty() {
            return path;
        }
        match path.strip_prefix(self.base_path.as_str()) {
            Some(rest) if rest.is_empty() => "/",
            Some(rest) if rest.starts_with('/') => rest,
            _ => path,
        }
    }

    fn release_after_delay(&self, permit: SettingsPermit, path: &str) {
        let delay = self.release_delay;
        let path = path.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let report = permit.release();
            if !report.is_empty() {
                debug!(%path, notified = ?report.notified, "reloads delivered after settings request");
            }
        });
    }
}

#[cfg(test)]
#[path = "client_test.rs"]
mod tests;
