//! Endpoint configuration

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::transport::{Qos, TlsFiles, TransportConfig, TransportError};

/// Certificate file names expected inside the certificate directory
pub const CA_CERTS: &str = "ca_public_certificate.pem";
pub const CERTFILE: &str = "public_certificate.pem";
pub const KEYFILE: &str = "private_key.pem";

/// Broker connection and timing settings for an endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointSettings {
    /// Broker host name
    #[serde(default = "default_host")]
    pub host: String,

    /// Broker port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Directory holding the TLS certificate files. None = plain TCP
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate_directory: Option<PathBuf>,

    /// MQTT quality of service (0, 1 or 2)
    #[serde(default = "default_qos")]
    pub qos: u8,

    /// Keepalive towards the broker, in seconds
    #[serde(default = "default_keepalive_secs")]
    pub keepalive_secs: u64,

    /// Upper bound for one cooperative loop iteration
    #[serde(default = "default_loop_timeout_ms")]
    pub loop_timeout_ms: u64,

    /// Wait after a background start, letting the first subscribe complete
    #[serde(default = "default_startup_delay_ms")]
    pub startup_delay_ms: u64,

    /// Wait between the offline announcement and the disconnect
    #[serde(default = "default_shutdown_delay_ms")]
    pub shutdown_delay_ms: u64,

    /// Pause after a failed reconnect attempt
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    /// Outbound request queue depth
    #[serde(default = "default_request_capacity")]
    pub request_capacity: usize,

    #[serde(default)]
    pub transport: TransportConfig,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    1883
}

fn default_qos() -> u8 {
    1
}

fn default_keepalive_secs() -> u64 {
    10
}

fn default_loop_timeout_ms() -> u64 {
    1000
}

fn default_startup_delay_ms() -> u64 {
    1000
}

fn default_shutdown_delay_ms() -> u64 {
    1000
}

fn default_reconnect_delay_ms() -> u64 {
    1000
}

fn default_request_capacity() -> usize {
    1024
}

impl Default for EndpointSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            certificate_directory: None,
            qos: default_qos(),
            keepalive_secs: default_keepalive_secs(),
            loop_timeout_ms: default_loop_timeout_ms(),
            startup_delay_ms: default_startup_delay_ms(),
            shutdown_delay_ms: default_shutdown_delay_ms(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            request_capacity: default_request_capacity(),
            transport: TransportConfig::default(),
        }
    }
}

impl EndpointSettings {
    pub fn with_broker(mut self, host: impl Into<String>, port: u16) -> Self {
        self.host = host.into();
        self.port = port;
        self
    }

    pub fn with_certificate_directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.certificate_directory = Some(directory.into());
        self
    }

    pub fn with_qos(mut self, qos: u8) -> Self {
        self.qos = qos;
        self
    }

    pub fn with_keepalive(mut self, seconds: u64) -> Self {
        self.keepalive_secs = seconds;
        self
    }

    pub fn with_loop_timeout(mut self, timeout: Duration) -> Self {
        self.loop_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Zero every fixed wait. Used with the in-memory broker.
    pub fn without_delays(mut self) -> Self {
        self.startup_delay_ms = 0;
        self.shutdown_delay_ms = 0;
        self.reconnect_delay_ms = 0;
        self
    }

    pub fn qos(&self) -> Result<Qos, TransportError> {
        Qos::try_from(self.qos)
    }

    pub fn keepalive(&self) -> Duration {
        Duration::from_secs(self.keepalive_secs)
    }

    pub fn loop_timeout(&self) -> Duration {
        Duration::from_millis(self.loop_timeout_ms)
    }

    pub fn startup_delay(&self) -> Duration {
        Duration::from_millis(self.startup_delay_ms)
    }

    pub fn shutdown_delay(&self) -> Duration {
        Duration::from_millis(self.shutdown_delay_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    /// Certificate file paths, if a certificate directory is configured
    pub fn tls_files(&self) -> Option<TlsFiles> {
        self.certificate_directory.as_deref().map(tls_files_in)
    }
}

/// Expected certificate files inside a directory
pub fn tls_files_in(directory: &Path) -> TlsFiles {
    TlsFiles {
        ca_file: directory.join(CA_CERTS),
        cert_file: directory.join(CERTFILE),
        key_file: directory.join(KEYFILE),
    }
}
