//! Command line of the `servicemanager` binary

use std::path::PathBuf;

use clap::Parser;
use sg_protocol::settings::{CA_CERTS, CERTFILE, KEYFILE};
use sg_protocol::EndpointSettings;

/// Keepalive time towards the broker, in seconds
pub const MQTT_KEEPALIVE_SECS: u64 = 10;

const AFTER_HELP: &str = "\
A service manager for the secure gateway network. It tracks which resources
are online, and announces their commands and data as unavailable when they
go offline.";

#[derive(Parser, Debug, Clone)]
#[command(name = "servicemanager")]
#[command(about = "Service manager for the secure gateway")]
#[command(after_help = AFTER_HELP)]
pub struct Args {
    /// Broker host name
    #[arg(long, default_value = "localhost")]
    pub host: String,

    /// Broker port number
    #[arg(long, default_value_t = 1883)]
    pub port: u16,

    /// Directory for certificate files. Plain TCP when not given
    #[arg(long)]
    pub cert: Option<PathBuf>,

    /// MQTT quality of service
    #[arg(long, default_value_t = 0, value_parser = clap::value_parser!(u8).range(0..=2))]
    pub qos: u8,

    /// Increase verbosity, can be repeated
    #[arg(short, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Args {
    pub fn log_level(&self) -> &'static str {
        match self.verbose {
            0 => "warn",
            1 => "info",
            _ => "debug",
        }
    }

    pub fn endpoint_settings(&self) -> EndpointSettings {
        let mut settings = EndpointSettings::default()
            .with_broker(self.host.clone(), self.port)
            .with_qos(self.qos)
            .with_keepalive(MQTT_KEEPALIVE_SECS);
        if let Some(cert) = &self.cert {
            settings = settings.with_certificate_directory(cert.clone());
        }
        settings
    }

    /// Certificate files expected in the certificate directory
    pub fn certificate_files(&self) -> Option<Vec<PathBuf>> {
        self.cert
            .as_ref()
            .map(|dir| [CA_CERTS, CERTFILE, KEYFILE].iter().map(|f| dir.join(f)).collect())
    }
}
