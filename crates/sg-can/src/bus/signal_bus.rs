//! Signal-level access to one bus

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, trace};

use super::{BusError, CanFrame, FrameIo};
use crate::config::BusDefinition;
use crate::definition::FrameDefinition;
use crate::error::format_frame_id;
use crate::types::SignalValues;

/// A bus definition bound to a frame interface and a set of ego node ids
pub struct SignalBus {
    definition: BusDefinition,
    ego_node_ids: Vec<String>,
    io: Arc<dyn FrameIo>,
    /// Reception time of the last frame handed out, per throttled frame id
    last_received: Mutex<HashMap<u32, Instant>>,
    /// Payload of the last frame sent, per frame id
    last_sent: Mutex<HashMap<u32, Vec<u8>>>,
}

impl SignalBus {
    pub fn new(definition: BusDefinition, ego_node_ids: Vec<String>, io: Arc<dyn FrameIo>) -> Self {
        debug!(
            bus = %definition.name,
            interface = io.interface(),
            ego = ?ego_node_ids,
            "Signal bus ready"
        );
        Self {
            definition,
            ego_node_ids,
            io,
            last_received: Mutex::new(HashMap::new()),
            last_sent: Mutex::new(HashMap::new()),
        }
    }

    pub fn definition(&self) -> &BusDefinition {
        &self.definition
    }

    pub fn ego_node_ids(&self) -> &[String] {
        &self.ego_node_ids
    }

    pub fn interface(&self) -> &str {
        self.io.interface()
    }

    /// Wait for the next inbound frame of this bus.
    ///
    /// Frames not in the definition, frames the ego nodes send, and frames
    /// arriving faster than their `throttle_ms` are skipped. Fails with
    /// [`BusError::Timeout`] when nothing usable arrives in time.
    pub async fn recv_next_frame(&self, timeout: Duration) -> Result<CanFrame, BusError> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(BusError::Timeout);
            }

            let frame = self.io.recv(remaining).await?;
            let Some(definition) = self.definition.frame(frame.id) else {
                trace!(frame = %frame, "Skipping frame not in bus definition");
                continue;
            };
            if definition.is_outbound(&self.ego_node_ids) {
                trace!(frame = %frame, "Skipping frame sent by ego node");
                continue;
            }
            if self.is_throttled(definition) {
                trace!(frame = %frame, "Skipping throttled frame");
                continue;
            }
            return Ok(frame);
        }
    }

    fn is_throttled(&self, definition: &FrameDefinition) -> bool {
        let Some(throttle_ms) = definition.throttle_ms else {
            return false;
        };
        let now = Instant::now();
        let mut last_received = self.last_received.lock();
        if let Some(previous) = last_received.get(&definition.id) {
            if now.duration_since(*previous) < Duration::from_millis(throttle_ms) {
                return true;
            }
        }
        last_received.insert(definition.id, now);
        false
    }

    /// Decode all signals of a received frame
    pub fn unpack(&self, frame: &CanFrame) -> Result<SignalValues, BusError> {
        let definition = self
            .definition
            .frame(frame.id)
            .ok_or(BusError::UnknownFrame(frame.id))?;
        Ok(definition.unpack(&frame.data)?)
    }

    /// Send signal values in the one outbound frame carrying all of them.
    ///
    /// Signals of that frame without a value keep what was sent last time,
    /// or their default on the first send.
    pub async fn send_signals(&self, values: &SignalValues) -> Result<(), BusError> {
        if values.is_empty() {
            return Ok(());
        }

        let definition = self.outbound_frame_for(values)?;
        let previous = self.last_sent.lock().get(&definition.id).cloned();
        let data = definition.pack(values, previous.as_deref())?;
        let frame = CanFrame::new(definition.id, data.clone()).with_extended(definition.extended);

        self.io.send(&frame).await?;
        debug!(frame = %frame, name = %definition.name, "Sent CAN frame");
        self.last_sent.lock().insert(definition.id, data);
        Ok(())
    }

    fn outbound_frame_for(&self, values: &SignalValues) -> Result<&FrameDefinition, BusError> {
        if let Some(unknown) = values
            .keys()
            .find(|name| self.definition.frame_for_signal(name).is_none())
        {
            return Err(BusError::UnknownSignal(unknown.clone()));
        }

        self.definition
            .frames()
            .find(|frame| {
                frame.is_outbound(&self.ego_node_ids)
                    && values.keys().all(|name| frame.signals.contains_key(name))
            })
            .ok_or_else(|| {
                let reason = match self.definition.frame_for_signal(values_first(values)) {
                    Some(frame) if !frame.is_outbound(&self.ego_node_ids) => format!(
                        "frame {} is not sent by ego nodes {:?}",
                        format_frame_id(frame.id),
                        self.ego_node_ids
                    ),
                    _ => "signals are not in one outbound frame".to_string(),
                };
                BusError::NotSendable {
                    signals: values.keys().cloned().collect(),
                    reason,
                }
            })
    }
}

fn values_first(values: &SignalValues) -> &str {
    values.keys().next().map(String::as_str).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::mock::MockFrameIo;
    use crate::definition::SignalDefinition;

    fn bus() -> (SignalBus, Arc<MockFrameIo>) {
        let definition = BusDefinition::new("Test")
            .with_frame(
                FrameDefinition::new(7, "AirCondition")
                    .with_dlc(1)
                    .with_producer("1")
                    .with_signal(SignalDefinition::new("acstatus", 0, 1))
                    .with_signal(SignalDefinition::new("fanlevel", 1, 3).with_default(2.0)),
            )
            .with_frame(
                FrameDefinition::new(9, "Climate")
                    .with_dlc(2)
                    .with_signal(SignalDefinition::new("temperature", 0, 8)),
            );
        let io = Arc::new(MockFrameIo::new());
        let bus = SignalBus::new(definition, vec!["1".to_string()], io.clone());
        (bus, io)
    }

    fn values(pairs: &[(&str, f64)]) -> SignalValues {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[tokio::test]
    async fn test_recv_skips_unknown_and_outbound_frames() {
        let (bus, io) = bus();
        io.inject(CanFrame::new(0x123, vec![0xFF]));
        io.inject(CanFrame::new(7, vec![0x01]));
        io.inject(CanFrame::new(9, vec![0x15, 0x00]));

        let frame = bus.recv_next_frame(Duration::from_millis(100)).await.unwrap();
        assert_eq!(frame.id, 9);
        assert_eq!(bus.unpack(&frame).unwrap()["temperature"], 21.0);

        assert!(matches!(
            bus.recv_next_frame(Duration::from_millis(10)).await,
            Err(BusError::Timeout)
        ));
    }

    #[tokio::test]
    async fn test_send_keeps_previous_bits() {
        let (bus, io) = bus();
        bus.send_signals(&values(&[("acstatus", 1.0)])).await.unwrap();
        bus.send_signals(&values(&[("fanlevel", 5.0)])).await.unwrap();

        let sent = io.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].data, vec![0b0000_0101]);
        assert_eq!(sent[1].data, vec![0b0000_1011]);
    }

    #[tokio::test]
    async fn test_send_rejects_inbound_and_unknown_signals() {
        let (bus, io) = bus();
        assert!(matches!(
            bus.send_signals(&values(&[("temperature", 20.0)])).await,
            Err(BusError::NotSendable { .. })
        ));
        assert!(matches!(
            bus.send_signals(&values(&[("unknown", 1.0)])).await,
            Err(BusError::UnknownSignal(_))
        ));
        assert!(matches!(
            bus.send_signals(&values(&[("acstatus", 1.0), ("temperature", 20.0)]))
                .await,
            Err(BusError::NotSendable { .. })
        ));
        bus.send_signals(&SignalValues::new()).await.unwrap();
        assert!(io.sent().is_empty());
    }

    #[test]
    fn test_unpack_unknown_frame() {
        let (bus, _io) = bus();
        assert!(matches!(
            bus.unpack(&CanFrame::new(0x55, vec![0])),
            Err(BusError::UnknownFrame(0x55))
        ));
    }
}
