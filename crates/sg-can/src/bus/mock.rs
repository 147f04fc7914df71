//! Mock frame adapter for testing

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::{BusError, CanFrame, FrameIo};

/// In-memory CAN interface
///
/// Frames injected with [`MockFrameIo::inject`] are received in order,
/// sent frames are recorded.
pub struct MockFrameIo {
    interface: String,
    incoming_tx: mpsc::UnboundedSender<CanFrame>,
    incoming_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<CanFrame>>,
    sent: Mutex<Vec<CanFrame>>,
    fail_sends: Mutex<bool>,
    fail_receives: Mutex<bool>,
}

impl MockFrameIo {
    pub fn new() -> Self {
        Self::with_interface("mock0")
    }

    pub fn with_interface(interface: impl Into<String>) -> Self {
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
        Self {
            interface: interface.into(),
            incoming_tx,
            incoming_rx: tokio::sync::Mutex::new(incoming_rx),
            sent: Mutex::new(Vec::new()),
            fail_sends: Mutex::new(false),
            fail_receives: Mutex::new(false),
        }
    }

    /// Queue a frame for reception (simulates another node sending)
    pub fn inject(&self, frame: CanFrame) {
        let _ = self.incoming_tx.send(frame);
    }

    /// Every frame sent so far, in order
    pub fn sent(&self) -> Vec<CanFrame> {
        self.sent.lock().clone()
    }

    pub fn clear_sent(&self) {
        self.sent.lock().clear();
    }

    /// Make every following send fail with an I/O error
    pub fn set_fail_sends(&self, fail: bool) {
        *self.fail_sends.lock() = fail;
    }

    /// Make every following receive fail as a downed interface would
    pub fn set_fail_receives(&self, fail: bool) {
        *self.fail_receives.lock() = fail;
    }
}

impl Default for MockFrameIo {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FrameIo for MockFrameIo {
    async fn recv(&self, timeout: Duration) -> Result<CanFrame, BusError> {
        if *self.fail_receives.lock() {
            return Err(BusError::Io("mock receive failure".to_string()));
        }
        let mut rx = self.incoming_rx.lock().await;
        match tokio::time::timeout(timeout, rx.recv()).await {
            Ok(Some(frame)) => Ok(frame),
            Ok(None) => Err(BusError::Closed),
            Err(_) => Err(BusError::Timeout),
        }
    }

    async fn send(&self, frame: &CanFrame) -> Result<(), BusError> {
        if *self.fail_sends.lock() {
            return Err(BusError::Io("mock send failure".to_string()));
        }
        self.sent.lock().push(frame.clone());
        Ok(())
    }

    fn interface(&self) -> &str {
        &self.interface
    }
}
