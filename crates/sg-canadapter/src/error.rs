//! Error types for the CAN adapter

use sg_can::BusError;
use sg_protocol::ProtocolError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AdapterError {
    /// Bad translation table, bus description or command line. Aborts startup.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A frame or command that does not fit its translation entry
    #[error("translation error: {0}")]
    Translation(String),

    #[error("bus error: {0}")]
    Bus(#[from] BusError),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

pub type AdapterResult<T> = Result<T, AdapterError>;
