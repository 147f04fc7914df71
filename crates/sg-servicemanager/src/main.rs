//! Service manager for the secure gateway
//!
//! # Usage
//!
//! ```bash
//! ./servicemanager --host localhost -v
//! ```

use anyhow::Result;
use clap::Parser;
use sg_protocol::Endpoint;
use sg_servicemanager::{Args, ServiceManager, CLIENT_NAME};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(args.log_level()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Some(files) = args.certificate_files() {
        info!(files = ?files, "Using certificates");
    }

    let endpoint = Endpoint::observer(CLIENT_NAME, args.endpoint_settings())?;
    let manager = ServiceManager::new(endpoint);

    manager.start().await?;
    manager
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
        })
        .await?;
    Ok(())
}
