//! CAN adapter for the secure gateway
//!
//! # Usage
//!
//! ```bash
//! ./canadapter config/climateservice_bus.yaml -m config/climateservice_signals.json -i vcan0 -v
//! ```

use anyhow::Result;
use clap::Parser;
use sg_can::create_frame_io;
use sg_canadapter::cli::EXIT_CODE_WRONG_ARGUMENTS;
use sg_canadapter::{build_gateway, Args};
use sg_protocol::Endpoint;
use tracing::error;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // RUST_LOG wins over -v
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(args.log_level()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Err(message) = args.validate() {
        error!("{}", message);
        std::process::exit(EXIT_CODE_WRONG_ARGUMENTS);
    }

    let endpoint = Endpoint::resource(args.mqttname.clone(), args.endpoint_settings())?;
    let io = create_frame_io(&args.frame_io_config())?;
    let gateway = build_gateway(&args, endpoint, io)?;

    gateway.start().await?;
    gateway
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
        })
        .await?;
    Ok(())
}
