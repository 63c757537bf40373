//! Local settings endpoint for HTTP tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{Value, json};

use crate::config::GuardConfig;

/// App key the server always answers with a 500.
pub const BROKEN_APP: &str = "broken";

#[derive(Clone, Default)]
pub struct ServerState {
    pub store: Arc<Mutex<HashMap<String, Value>>>,
    pub in_flight: Arc<AtomicUsize>,
    pub max_in_flight: Arc<AtomicUsize>,
    pub hits: Arc<AtomicUsize>,
    delay: Duration,
}

impl ServerState {
    async fn track(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.hits.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct TestServer {
    pub base_url: String,
    pub state: ServerState,
}

impl TestServer {
    /// Config pointed at this server, with short delays to keep tests fast.
    pub fn config(&self) -> GuardConfig {
        GuardConfig {
            base_url: self.base_url.clone(),
            release_delay: Duration::from_millis(20),
            ..GuardConfig::default()
        }
    }
}

/// Spawn the server on an ephemeral port. Each handler sleeps `delay`.
pub async fn spawn_server(delay: Duration) -> TestServer {
    let state = ServerState { delay, ..ServerState::default() };
    let app = Router::new()
        .route("/api/settings/{app}", get(load_settings).post(save_settings))
        .route("/health", get(health))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestServer { base_url: format!("http://{addr}"), state }
}

async fn load_settings(State(state): State<ServerState>, Path(app): Path<String>) -> Result<Json<Value>, StatusCode> {
    state.track().await;
    if app == BROKEN_APP {
        return Err(StatusCode::INTERNAL_SERVER_ERROR);
    }
    let store = state.store.lock().unwrap();
    Ok(Json(store.get(&app).cloned().unwrap_or_else(|| json!({}))))
}

async fn save_settings(
    State(state): State<ServerState>,
    Path(app): Path<String>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, StatusCode> {
    state.track().await;
    if app == BROKEN_APP {
        return Err(StatusCode::INTERNAL_SERVER_ERROR);
    }
    state.store.lock().unwrap().insert(app.clone(), body);
    Ok(Json(json!({ "saved": app })))
}

async fn health(State(state): State<ServerState>) -> &'static str {
    state.hits.fetch_add(1, Ordering::SeqCst);
    "ok"
}
