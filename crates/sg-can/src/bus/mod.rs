//! Frame I/O and signal-level bus access
//!
//! - SocketCAN raw frames (Linux only)
//! - Mock interface for testing
//!
//! [`SignalBus`] sits on top of a [`FrameIo`] and works in signal values:
//! it only hands out frames other nodes send, and only sends frames the
//! ego nodes produce.
//!
//! # Example
//!
//! ```ignore
//! use sg_can::bus::{create_frame_io, FrameIoConfig, SignalBus};
//!
//! let io = create_frame_io(&FrameIoConfig::Mock)?;
//! let bus = SignalBus::new(definition, vec!["1".to_string()], io);
//! let frame = bus.recv_next_frame(Duration::from_millis(100)).await?;
//! ```

mod adapter;
pub mod error;
pub mod mock;
mod signal_bus;

#[cfg(all(target_os = "linux", feature = "socketcan"))]
pub mod socketcan;

pub use adapter::{CanFrame, FrameIo};
pub use error::BusError;
pub use signal_bus::SignalBus;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// SocketCAN interface settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SocketCanConfig {
    /// Interface name, e.g. `vcan0`
    pub interface: String,
}

impl Default for SocketCanConfig {
    fn default() -> Self {
        Self {
            interface: "vcan0".to_string(),
        }
    }
}

/// Which frame interface to open
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FrameIoConfig {
    SocketCan(SocketCanConfig),
    Mock,
}

/// Open a frame interface based on configuration
pub fn create_frame_io(config: &FrameIoConfig) -> Result<Arc<dyn FrameIo>, BusError> {
    match config {
        #[cfg(all(target_os = "linux", feature = "socketcan"))]
        FrameIoConfig::SocketCan(cfg) => {
            let io = socketcan::SocketCanFrameIo::new(cfg)?;
            Ok(Arc::new(io))
        }
        #[cfg(not(all(target_os = "linux", feature = "socketcan")))]
        FrameIoConfig::SocketCan(_) => Err(BusError::Unsupported(
            "SocketCAN requires Linux and the 'socketcan' feature".to_string(),
        )),
        FrameIoConfig::Mock => Ok(Arc::new(mock::MockFrameIo::new())),
    }
}
