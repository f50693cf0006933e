//! HTTP handler
//!
//! `GET /v1/status` runs the whole battery and answers with the result tree;
//! `GET /health` only tells that the server is up.
//!
//! A run is spawned off the request, so a client that hangs up early does
//! not cut short the teardown or the publish.

use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::trace::TraceLayer;
use tracing::error;

use smoketest_core::{Harness, Publisher, TestResult};

/// Application state
pub struct AppState {
    pub harness: Harness,
    pub publisher: Box<dyn Publisher>,
    /// Runs share resource names in the cluster, so only one at a time
    run_lock: Mutex<()>,
}

impl AppState {
    pub fn new(harness: Harness, publisher: Box<dyn Publisher>) -> Self {
        Self {
            harness,
            publisher,
            run_lock: Mutex::new(()),
        }
    }

    /// Run the battery and publish the results.
    ///
    /// The run lives on its own task; dropping the returned future does not
    /// stop it.
    pub async fn run(self: Arc<Self>) -> Vec<TestResult> {
        let task = tokio::spawn(async move {
            let _guard = self.run_lock.lock().await;
            self.harness.run_and_publish(self.publisher.as_ref()).await
        });

        match task.await {
            Ok(results) => results,
            Err(e) => {
                error!(error = %e, "smoke test run aborted");
                vec![TestResult::failed("Smoke test run", format!("Run aborted: {}", e))]
            }
        }
    }
}

/// Create the router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/v1/status", get(status))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Run every probe; the publish outcome never changes the response
async fn status(State(state): State<Arc<AppState>>) -> Json<Vec<TestResult>> {
    Json(state.run().await)
}
