//! Error type shared by the guard, the guarded client and the settings API.

// =============================================================================
// ERROR
// =============================================================================

/// Errors produced by settings guard operations.
#[derive(Debug, thiserror::Error)]
pub enum GuardError {
    /// The lock stayed held past the acquire timeout under `TimeoutPolicy::Fail`.
    #[error("timed out after {waited_ms}ms waiting for the settings lock")]
    AcquireTimeout { waited_ms: u64 },

    /// A reload was scheduled for an application nobody listens to.
    #[error("no reload subscribers registered for `{app}`")]
    NoSubscribers { app: String },

    /// The application key cannot be used to address a settings resource.
    #[error("invalid application key `{app}`")]
    InvalidApp { app: String },

    /// The HTTP request itself failed (connect, timeout, body read).
    #[error("settings request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The settings endpoint answered with a non-success status.
    #[error("settings endpoint returned status {status}")]
    Status { status: u16, body: String },

    /// A request URL could not be built from the base URL and path.
    #[error("invalid settings URL: {0}")]
    InvalidUrl(String),

    /// A settings body was not valid JSON.
    #[error("invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),

    /// A configuration value could not be parsed.
    #[error("config parse failed: {0}")]
    ConfigParse(String),

    /// Writing command output failed.
    #[error("output write failed: {0}")]
    Io(#[from] std::io::Error),

    /// Background work was requested outside a tokio runtime.
    #[error("no tokio runtime available")]
    NoRuntime,
}

impl GuardError {
    /// Stable machine-readable code, for callers that surface failures.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::AcquireTimeout { .. } => "E_ACQUIRE_TIMEOUT",
            Self::NoSubscribers { .. } => "E_NO_SUBSCRIBERS",
            Self::InvalidApp { .. } => "E_INVALID_APP",
            Self::Http(_) => "E_HTTP",
            Self::Status { .. } => "E_STATUS",
            Self::InvalidUrl(_) => "E_INVALID_URL",
            Self::Json(_) => "E_JSON",
            Self::ConfigParse(_) => "E_CONFIG_PARSE",
            Self::Io(_) => "E_IO",
            Self::NoRuntime => "E_NO_RUNTIME",
        }
    }

    /// Whether a caller may reasonably retry. The guard never retries on its own.
    #[must_use]
    pub fn retryable(&self) -> bool {
        match self {
            Self::AcquireTimeout { .. } => true,
            Self::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Self::Status { status, .. } => matches!(status, 429 | 500..=599),
            _ => false,
        }
    }
}

#[cfg(test)]
#[path = "error_test.rs"]
mod tests;
