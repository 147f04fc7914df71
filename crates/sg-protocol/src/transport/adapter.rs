//! Transport traits and session types

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::TransportError;

/// Delivery guarantee requested from the broker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Qos {
    AtMostOnce,
    #[default]
    AtLeastOnce,
    ExactlyOnce,
}

impl TryFrom<u8> for Qos {
    type Error = TransportError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Qos::AtMostOnce),
            1 => Ok(Qos::AtLeastOnce),
            2 => Ok(Qos::ExactlyOnce),
            other => Err(TransportError::InvalidConfig(format!(
                "QoS must be 0, 1 or 2, got {}",
                other
            ))),
        }
    }
}

impl fmt::Display for Qos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self {
            Qos::AtMostOnce => 0,
            Qos::AtLeastOnce => 1,
            Qos::ExactlyOnce => 2,
        };
        write!(f, "{}", level)
    }
}

/// Message the broker publishes on our behalf after an ungraceful disconnect
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastWill {
    pub topic: String,
    pub payload: String,
    pub retained: bool,
}

/// Certificate files for a TLS connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsFiles {
    pub ca_file: PathBuf,
    pub cert_file: PathBuf,
    pub key_file: PathBuf,
}

/// Everything needed to open one broker session
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub client_id: String,
    pub host: String,
    pub port: u16,
    pub keepalive: Duration,
    pub clean_session: bool,
    pub qos: Qos,
    pub last_will: Option<LastWill>,
    pub tls: Option<TlsFiles>,
    /// Queue depth between the client handle and its event loop
    pub request_capacity: usize,
}

/// Event produced by polling a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Broker answered a connection attempt
    ConnAck { accepted: bool, reason: String },
    /// Inbound application message
    Message { topic: String, payload: String },
    /// Session ended by a disconnect
    Disconnected,
    /// Protocol housekeeping the endpoint does not act on
    Other,
}

/// Client handle used for outbound traffic
#[async_trait]
pub trait Transport: Send + Sync {
    async fn publish(&self, topic: &str, payload: &str, retained: bool)
        -> Result<(), TransportError>;

    async fn subscribe(&self, filter: &str) -> Result<(), TransportError>;

    /// Request a graceful disconnect (suppresses the last will)
    async fn disconnect(&self) -> Result<(), TransportError>;
}

/// Network driver of a session
///
/// Polling makes progress on the connection; polling again after a
/// recoverable error attempts a reconnect.
#[async_trait]
pub trait EventLoop: Send {
    async fn poll(&mut self) -> Result<TransportEvent, TransportError>;
}

/// A connected session: the outbound handle plus its driver
pub struct Session {
    pub transport: Arc<dyn Transport>,
    pub event_loop: Box<dyn EventLoop>,
}

/// Opens sessions against a broker
pub trait Connector: Send + Sync {
    /// Prepare a session. The connection itself is established by the
    /// first poll of the returned event loop.
    fn connect(&self, options: &SessionOptions) -> Result<Session, TransportError>;
}
