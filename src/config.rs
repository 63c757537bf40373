//! Guard configuration parsed from environment variables.

use std::time::Duration;

use crate::client::SettingsRoutes;
use crate::error::GuardError;
use crate::lock::TimeoutPolicy;

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:7878";
pub const DEFAULT_ACQUIRE_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_RELEASE_DELAY_MS: u64 = 200;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_ROUTE_PATTERN: &str = r"^/api/settings(/|$)";
pub const DEFAULT_PATH_TEMPLATE: &str = "/api/settings/{app}";

/// Placeholder substituted with the application key in `path_template`.
pub const APP_PLACEHOLDER: &str = "{app}";

/// Key substituted into `path_template` when checking it against the routes.
const SAMPLE_APP: &str = "app";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardConfig {
    /// Origin of the dashboard, without a trailing slash.
    pub base_url: String,
    pub acquire_timeout: Duration,
    /// Delay between observing a settings response and releasing the guard.
    pub release_delay: Duration,
    pub request_timeout: Duration,
    pub timeout_policy: TimeoutPolicy,
    /// Regexes matched against request paths to pick out settings requests.
    pub route_patterns: Vec<String>,
    pub path_template: String,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            acquire_timeout: Duration::from_millis(DEFAULT_ACQUIRE_TIMEOUT_MS),
            release_delay: Duration::from_millis(DEFAULT_RELEASE_DELAY_MS),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            timeout_policy: TimeoutPolicy::default(),
            route_patterns: vec![DEFAULT_ROUTE_PATTERN.to_string()],
            path_template: DEFAULT_PATH_TEMPLATE.to_string(),
        }
    }
}

impl GuardConfig {
    /// Build config from environment variables.
    ///
    /// Optional:
    /// - `SETTINGS_GUARD_BASE_URL`: default `http://127.0.0.1:7878`
    /// - `SETTINGS_GUARD_ACQUIRE_TIMEOUT_MS`: default 5000
    /// - `SETTINGS_GUARD_RELEASE_DELAY_MS`: default 200
    /// - `SETTINGS_GUARD_REQUEST_TIMEOUT_SECS`: default 30
    /// - `SETTINGS_GUARD_TIMEOUT_POLICY`: `force_claim` (default) or `fail`
    /// - `SETTINGS_GUARD_ROUTES`: comma-separated path regexes
    /// - `SETTINGS_GUARD_PATH_TEMPLATE`: default `/api/settings/{app}`
    ///
    /// # Errors
    ///
    /// Returns `GuardError::ConfigParse` when [`validate`](Self::validate)
    /// rejects the result or the timeout policy is unknown.
    pub fn from_env() -> Result<Self, GuardError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with a custom variable source.
    ///
    /// # Errors
    ///
    /// Same as [`from_env`](Self::from_env).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, GuardError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let base_url = lookup("SETTINGS_GUARD_BASE_URL")
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        let timeout_policy = match lookup("SETTINGS_GUARD_TIMEOUT_POLICY") {
            Some(raw) => TimeoutPolicy::parse(&raw)?,
            None => TimeoutPolicy::default(),
        };

        let route_patterns = match lookup("SETTINGS_GUARD_ROUTES") {
            Some(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(ToString::to_string)
                .collect(),
            None => vec![DEFAULT_ROUTE_PATTERN.to_string()],
        };

        let path_template =
            lookup("SETTINGS_GUARD_PATH_TEMPLATE").unwrap_or_else(|| DEFAULT_PATH_TEMPLATE.to_string());

        let parse_u64 = |key: &str, default: u64| {
            lookup(key)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .unwrap_or(default)
        };

        let config = Self {
            base_url,
            acquire_timeout: Duration::from_millis(parse_u64(
                "SETTINGS_GUARD_ACQUIRE_TIMEOUT_MS",
                DEFAULT_ACQUIRE_TIMEOUT_MS,
            )),
            release_delay: Duration::from_millis(parse_u64("SETTINGS_GUARD_RELEASE_DELAY_MS", DEFAULT_RELEASE_DELAY_MS)),
            request_timeout: Duration::from_secs(parse_u64(
                "SETTINGS_GUARD_REQUEST_TIMEOUT_SECS",
                DEFAULT_REQUEST_TIMEOUT_SECS,
            )),
            timeout_policy,
            route_patterns,
            path_template,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check that the routes compile and that settings paths built from
    /// `path_template` are ones the routes send through the guard.
    ///
    /// # Errors
    ///
    /// Returns `GuardError::ConfigParse` describing the first problem.
    pub fn validate(&self) -> Result<(), GuardError> {
        let routes = SettingsRoutes::new(&self.route_patterns)?;
        check_template(&routes, &self.path_template)
    }
}

/// Reject a template without `{app}`, or one whose paths `routes` would not
/// guard.
pub(crate) fn check_template(routes: &SettingsRoutes, template: &str) -> Result<(), GuardError> {
    if !template.contains(APP_PLACEHOLDER) {
        return Err(GuardError::ConfigParse(format!(
            "SETTINGS_GUARD_PATH_TEMPLATE must contain {APP_PLACEHOLDER}: {template}"
        )));
    }
    let sample = template.replace(APP_PLACEHOLDER, SAMPLE_APP);
    if !routes.matches(&sample) {
        return Err(GuardError::ConfigParse(format!(
            "settings path {sample} does not match any SETTINGS_GUARD_ROUTES pattern"
        )));
    }
    Ok(())
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
