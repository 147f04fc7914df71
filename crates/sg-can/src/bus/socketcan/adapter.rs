//! Raw CAN frames over a SocketCAN interface

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use socketcan::{
    CanFrame as RawFrame, CanSocket, EmbeddedFrame, ExtendedId, Frame, Socket, StandardId,
};
use tracing::{debug, info};

use crate::bus::{BusError, CanFrame, FrameIo, SocketCanConfig};

/// Raw (non ISO-TP) SocketCAN access
pub struct SocketCanFrameIo {
    interface: String,
    socket: Arc<Mutex<CanSocket>>,
}

impl SocketCanFrameIo {
    pub fn new(config: &SocketCanConfig) -> Result<Self, BusError> {
        let socket = CanSocket::open(&config.interface).map_err(|e| {
            BusError::Io(format!(
                "Failed to open raw CAN socket on {}: {}",
                config.interface, e
            ))
        })?;

        // Non-blocking, so a receive can honour its timeout
        socket
            .set_nonblocking(true)
            .map_err(|e| BusError::InvalidConfig(format!("Failed to set non-blocking: {}", e)))?;

        info!(interface = %config.interface, "Opened CAN interface");
        Ok(Self {
            interface: config.interface.clone(),
            socket: Arc::new(Mutex::new(socket)),
        })
    }
}

fn to_raw_frame(frame: &CanFrame) -> Result<RawFrame, BusError> {
    let raw = if frame.extended {
        ExtendedId::new(frame.id).and_then(|id| RawFrame::new(id, &frame.data))
    } else {
        u16::try_from(frame.id)
            .ok()
            .and_then(StandardId::new)
            .and_then(|id| RawFrame::new(id, &frame.data))
    };
    raw.ok_or_else(|| BusError::InvalidConfig(format!("Cannot build CAN frame {}", frame)))
}

#[async_trait]
impl FrameIo for SocketCanFrameIo {
    async fn recv(&self, timeout: Duration) -> Result<CanFrame, BusError> {
        let socket = self.socket.clone();

        tokio::task::spawn_blocking(move || {
            let deadline = Instant::now() + timeout;
            loop {
                if Instant::now() >= deadline {
                    return Err(BusError::Timeout);
                }

                let result = socket.lock().read_frame();
                match result {
                    Ok(RawFrame::Data(frame)) => {
                        return Ok(CanFrame {
                            id: frame.raw_id(),
                            data: frame.data().to_vec(),
                            extended: frame.is_extended(),
                        });
                    }
                    Ok(other) => {
                        debug!(can_id = other.raw_id(), "Ignoring non-data frame");
                    }
                    Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                        std::thread::sleep(Duration::from_millis(1));
                    }
                    Err(e) => return Err(BusError::from(e)),
                }
            }
        })
        .await
        .map_err(|e| BusError::Io(format!("Task join error: {}", e)))?
    }

    async fn send(&self, frame: &CanFrame) -> Result<(), BusError> {
        let raw = to_raw_frame(frame)?;
        let socket = self.socket.clone();

        tokio::task::spawn_blocking(move || socket.lock().write_frame(&raw).map_err(BusError::from))
            .await
            .map_err(|e| BusError::Io(format!("Task join error: {}", e)))?
    }

    fn interface(&self) -> &str {
        &self.interface
    }
}
