//! Smoke test entry point

use anyhow::Context;
use clap::{Parser, Subcommand};
use smoketest_server::{build_state, create_router, logging, Config, Settings};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "smoketest")]
#[command(about = "Platform smoke test - probes every bound dependency and reports a result tree")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    settings: Settings,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "8080", env = "PORT")]
        port: u16,

        /// Host to bind to
        #[arg(long, default_value = "0.0.0.0")]
        host: String,
    },

    /// Run the battery once, print and publish the results
    Run,
}

/// Cancel `token` on Ctrl-C
async fn cancel_on_ctrl_c(token: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "unable to listen for shutdown signal");
        return;
    }
    tracing::info!("shutdown requested");
    token.cancel();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(cli.settings.log_format);

    let config = Config::try_from(cli.settings).context("Invalid configuration")?;
    let cancel = CancellationToken::new();
    let state = Arc::new(build_state(&config, &cancel).await);

    match cli.command {
        Commands::Serve { port, host } => {
            let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
            let router = create_router(state.clone());

            tracing::info!("Starting smoke test server on {}", addr);
            tracing::info!(probes = ?state.harness.probe_keys(), "Version: {}", env!("CARGO_PKG_VERSION"));

            let listener = tokio::net::TcpListener::bind(addr).await?;
            let shutdown = cancel.clone();
            tokio::spawn(cancel_on_ctrl_c(cancel.clone()));
            axum::serve(listener, router)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await?;
        }

        Commands::Run => {
            tokio::spawn(cancel_on_ctrl_c(cancel.clone()));
            let results = state.run().await;

            println!("{}", serde_json::to_string_pretty(&results)?);

            if results.iter().any(|r| !r.is_passed()) {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
