//! Command line of the `canadapter` binary

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use sg_can::{BusDefinition, BusDescription, FrameIo, FrameIoConfig, SignalBus, SocketCanConfig};
use sg_protocol::settings::{CA_CERTS, CERTFILE, KEYFILE};
use sg_protocol::{Endpoint, EndpointSettings};
use tracing::{debug, info};

use crate::converter::Converter;
use crate::error::{AdapterError, AdapterResult};
use crate::gateway::Gateway;
use crate::translation::TranslationTable;

/// Exit code for invalid command line arguments
pub const EXIT_CODE_WRONG_ARGUMENTS: i32 = 2;

/// Largest throttling time a frame can be given, in milliseconds
pub const MAX_FRAME_CYCLETIME_MS: i64 = 65535;

const AFTER_HELP: &str = "\
This is a resource on the secure gateway network. It accepts commands that are
sent on the CAN bus, and forwards signals received from the CAN bus as data.

Connecting with certificates requires a certificate directory holding:
  CA file:          ca_public_certificate.pem
  Certificate file: public_certificate.pem
  Key file:         private_key.pem";

#[derive(Parser, Debug, Clone)]
#[command(name = "canadapter")]
#[command(about = "CAN adapter for the secure gateway")]
#[command(after_help = AFTER_HELP)]
pub struct Args {
    /// Bus description file (YAML)
    pub busfile: PathBuf,

    /// Translation table between MQTT and CAN signal names (JSON)
    #[arg(short, long)]
    pub mqttfile: Option<PathBuf>,

    /// Forward every received CAN signal under its own name. Ignored when a translation table is given
    #[arg(long)]
    pub listen_to_all_can: bool,

    /// CAN interface name
    #[arg(short, long, default_value = "vcan0")]
    pub interface: String,

    /// Broker host name
    #[arg(long, default_value = "localhost")]
    pub host: String,

    /// Broker port number
    #[arg(long, default_value_t = 1883)]
    pub port: u16,

    /// MQTT quality of service
    #[arg(long, default_value_t = 0, value_parser = clap::value_parser!(u8).range(0..=2))]
    pub qos: u8,

    /// Keepalive time towards the broker, in seconds
    #[arg(short, long, default_value_t = 10, allow_negative_numbers = true)]
    pub keepalive: i64,

    /// Directory for certificate files. Plain TCP when not given
    #[arg(long)]
    pub cert: Option<PathBuf>,

    /// Bus name in the bus description. Defaults to the first one alphabetically
    #[arg(long)]
    pub busname: Option<String>,

    /// Resource name used in MQTT topics
    #[arg(long, default_value = "canadapter")]
    pub mqttname: String,

    /// Minimum interval between two received frames of the same id, in milliseconds
    #[arg(short = 't', long, allow_negative_numbers = true)]
    pub throttling_time: Option<i64>,

    /// Ego node ids. Frames they produce are sent, all others are received
    #[arg(long, num_args = 1.., default_values_t = vec!["1".to_string()])]
    pub ego: Vec<String>,

    /// Increase verbosity, can be repeated
    #[arg(short, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Use an in-memory CAN interface instead of SocketCAN
    #[arg(long)]
    pub mock_bus: bool,
}

impl Args {
    /// Checks clap cannot express
    pub fn validate(&self) -> Result<(), String> {
        if let Some(throttling_time) = self.throttling_time {
            if !(0..=MAX_FRAME_CYCLETIME_MS).contains(&throttling_time) {
                return Err(format!(
                    "Throttling time out of range. Given: {} ms",
                    throttling_time
                ));
            }
        }
        if self.keepalive < 0 {
            return Err(format!(
                "Keepalive time out of range. Given: {} s",
                self.keepalive
            ));
        }
        if self.mqttfile.is_none() && !self.listen_to_all_can {
            return Err(
                "You must give the translation file name, or the listen-to-all-can flag"
                    .to_string(),
            );
        }
        Ok(())
    }

    /// Log filter for the verbosity count
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
            .with_keepalive(self.keepalive.max(0) as u64);
        if let Some(cert) = &self.cert {
            settings = settings.with_certificate_directory(cert.clone());
        }
        settings
    }

    pub fn frame_io_config(&self) -> FrameIoConfig {
        if self.mock_bus {
            FrameIoConfig::Mock
        } else {
            FrameIoConfig::SocketCan(SocketCanConfig {
                interface: self.interface.clone(),
            })
        }
    }

    /// Read the bus description and apply the throttling time
    pub fn load_bus(&self) -> AdapterResult<BusDefinition> {
        let description = BusDescription::from_file(&self.busfile).map_err(|e| {
            AdapterError::Configuration(format!(
                "cannot load bus description {}: {}",
                self.busfile.display(),
                e
            ))
        })?;
        let mut bus = description
            .bus(self.busname.as_deref())
            .map_err(|e| AdapterError::Configuration(e.to_string()))?;

        if let Some(throttling_time) = self.throttling_time {
            bus.set_throttle_for_inbound(&self.ego, throttling_time.max(0) as u64);
        }
        Ok(bus)
    }

    /// The translation table, or None to forward every received signal
    pub fn load_translation(&self) -> AdapterResult<Option<TranslationTable>> {
        self.mqttfile
            .as_ref()
            .map(TranslationTable::from_file)
            .transpose()
    }
}

/// Wire bus, converter and endpoint together
pub fn build_gateway(
    args: &Args,
    endpoint: Endpoint,
    io: Arc<dyn FrameIo>,
) -> AdapterResult<Gateway> {
    info!(interface = io.interface(), "Starting canadapter");
    info!(
        busfile = %args.busfile.display(),
        busname = ?args.busname,
        mqttfile = ?args.mqttfile,
        mqttname = %args.mqttname,
        "Configuration files"
    );
    if let Some(cert) = &args.cert {
        info!(
            directory = %cert.display(),
            files = ?[CA_CERTS, CERTFILE, KEYFILE],
            "Using certificates"
        );
    }

    let bus = args.load_bus()?;
    let table = args.load_translation()?;
    let signal_bus = SignalBus::new(bus.clone(), args.ego.clone(), io);
    debug!("{}", bus.describe(&args.ego));

    let converter = Converter::new(bus, args.ego.clone(), table)?;
    debug!("{}", converter.describe());

    Gateway::new(endpoint, signal_bus, converter)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Args {
        Args::try_parse_from(args).unwrap()
    }

    #[test]
    fn test_defaults() {
        let args = parse(&["canadapter", "bus.yaml", "-m", "signals.json"]);
        assert_eq!(args.interface, "vcan0");
        assert_eq!(args.host, "localhost");
        assert_eq!(args.port, 1883);
        assert_eq!(args.qos, 0);
        assert_eq!(args.keepalive, 10);
        assert_eq!(args.mqttname, "canadapter");
        assert_eq!(args.ego, vec!["1"]);
        assert_eq!(args.log_level(), "warn");
        assert!(args.validate().is_ok());
        assert_eq!(
            args.frame_io_config(),
            FrameIoConfig::SocketCan(SocketCanConfig {
                interface: "vcan0".to_string()
            })
        );
    }

    #[test]
    fn test_multiple_ego_ids_and_verbosity() {
        let args = parse(&[
            "canadapter",
            "bus.yaml",
            "--listen-to-all-can",
            "--ego",
            "1",
            "2",
            "-vv",
        ]);
        assert_eq!(args.ego, vec!["1", "2"]);
        assert_eq!(args.log_level(), "debug");
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_missing_translation_source() {
        let args = parse(&["canadapter", "bus.yaml"]);
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_throttling_time_range() {
        for value in ["-1", "65536"] {
            let args = parse(&["canadapter", "bus.yaml", "--listen-to-all-can", "-t", value]);
            assert!(args.validate().is_err(), "accepted {}", value);
        }
        let args = parse(&["canadapter", "bus.yaml", "--listen-to-all-can", "-t", "65535"]);
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_negative_keepalive() {
        let args = parse(&["canadapter", "bus.yaml", "--listen-to-all-can", "-k", "-5"]);
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_invalid_qos() {
        assert!(Args::try_parse_from(["canadapter", "bus.yaml", "--qos", "3"]).is_err());
    }

    #[test]
    fn test_endpoint_settings() {
        let args = parse(&[
            "canadapter",
            "bus.yaml",
            "--listen-to-all-can",
            "--host",
            "broker",
            "--port",
            "8883",
            "--qos",
            "2",
            "-k",
            "30",
            "--cert",
            "/etc/certs",
        ]);
        let settings = args.endpoint_settings();
        assert_eq!(settings.host, "broker");
        assert_eq!(settings.port, 8883);
        assert_eq!(settings.qos, 2);
        assert_eq!(settings.keepalive_secs, 30);
        assert_eq!(
            settings.certificate_directory,
            Some(PathBuf::from("/etc/certs"))
        );
    }
}
