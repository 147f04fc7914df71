//! Transport layer for the pub/sub protocol
//!
//! This module provides the seam between protocol endpoints and the broker:
//! - MQTT transport (rumqttc) for real brokers
//! - In-memory broker for testing
//!
//! # Example
//!
//! ```ignore
//! use sg_protocol::transport::{create_connector, TransportConfig};
//!
//! let connector = create_connector(&TransportConfig::Mqtt);
//! let session = connector.connect(&options)?;
//! ```

mod adapter;
pub mod error;
pub mod mock;
pub mod mqtt;

pub use adapter::{
    Connector, EventLoop, LastWill, Qos, Session, SessionOptions, TlsFiles, Transport,
    TransportEvent,
};
pub use error::TransportError;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Which transport a process uses
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportConfig {
    #[default]
    Mqtt,
    /// Standalone in-memory broker, for dry runs without a network
    Mock,
}

/// Create a connector based on configuration
pub fn create_connector(config: &TransportConfig) -> Arc<dyn Connector> {
    match config {
        TransportConfig::Mqtt => Arc::new(mqtt::MqttConnector::new()),
        TransportConfig::Mock => mock::MockBroker::without_log().connector(),
    }
}
