//! Smoke test server
//!
//! Wires the probe set from configuration and service bindings, serves
//! `GET /v1/status` and publishes every run to the dashboard.

pub mod config;
pub mod handler;
pub mod logging;
pub mod publish;
pub mod registry;

pub use config::{Config, ConfigError, Settings};
pub use handler::{create_router, AppState};
pub use publish::DashboardPublisher;

use smoketest_core::{Harness, HarnessOptions};
use tokio_util::sync::CancellationToken;

/// Build the application state for `config`.
///
/// Cancelling `cancel` stops the running probe at its next wait; it still
/// removes what it created.
pub async fn build_state(config: &Config, cancel: &CancellationToken) -> AppState {
    let probes = registry::build_probes(config).await;
    let harness = Harness::with_options(
        probes,
        HarnessOptions {
            probe_timeout: config.probe_timeout,
            ..Default::default()
        },
    )
    .with_cancellation(cancel.clone());
    AppState::new(harness, publish::publisher(config.dashboard_endpoint.as_deref()))
}
