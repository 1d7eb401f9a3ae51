//! stubd: a configurable multi-protocol stub responder.
//!
//! Answers canned responses over length-framed binary XML, framed
//! `&key=value`, HTTP, and HTTPS, with a management API for live
//! reconfiguration. Meant to stand in for backend systems in test
//! environments.

mod config;
mod delay;
mod loader;
mod management;
mod protocols;
mod reply;
mod server;
mod store;
mod template;

use crate::config::Config;
use crate::delay::DelayConfig;
use crate::server::Server;
use crate::store::ResponseStore;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!(
        host = %config.host,
        http_port = config.http_port,
        management_port = config.management_port,
        "Starting stubd"
    );

    let store = ResponseStore::new();
    let delays = Arc::new(DelayConfig::new(config.default_delay_ms));

    match loader::seed(&config.response_dir, &store) {
        Ok(loaded) => info!(loaded, dir = %config.response_dir.display(), "Templates loaded"),
        Err(e) => warn!(
            dir = %config.response_dir.display(),
            error = %e,
            "Failed to seed response store, starting empty"
        ),
    }

    let server = Server::new(config, store, delays);
    if let Err(e) = server.run(shutdown_signal()).await {
        error!(error = %e, "Server failed");
        return ExitCode::FAILURE;
    }

    info!("Shutdown complete");
    ExitCode::SUCCESS
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to install shutdown handler");
        std::future::pending::<()>().await;
    }
}
