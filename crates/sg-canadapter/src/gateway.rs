//! Gateway between one CAN bus and the MQTT broker
//!
//! Frames are pulled from the bus by [`Gateway::step`] and published as
//! data. Commands arrive through the endpoint's own dispatch and are sent
//! on the bus by [`CommandForwarder`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sg_can::SignalBus;
use sg_protocol::{
    shutdown_requested, CommandOptions, Echo, Endpoint, HandlerError, InboundSignal, Networking,
    ProtocolError, SignalHandler,
};
use tracing::{debug, error, info, warn};

use crate::converter::Converter;
use crate::error::{AdapterError, AdapterResult};

/// How long one step waits for a CAN frame
pub const CAN_RECEIVE_TIMEOUT: Duration = Duration::from_secs(1);

/// Sends translated MQTT commands on the bus
pub struct CommandForwarder {
    bus: Arc<SignalBus>,
    converter: Arc<Converter>,
}

impl CommandForwarder {
    pub fn new(bus: Arc<SignalBus>, converter: Arc<Converter>) -> Self {
        Self { bus, converter }
    }
}

#[async_trait]
impl SignalHandler for CommandForwarder {
    async fn on_signal(
        &self,
        _endpoint: &Endpoint,
        signal: &InboundSignal,
    ) -> Result<Echo, HandlerError> {
        let values = self
            .converter
            .mqtt_to_bus_signals(signal.topic.signal(), &signal.payload)?;
        info!(signals = ?values, "Sending CAN signals");

        if !values.is_empty() {
            self.bus.send_signals(&values).await?;
        }
        Ok(Echo::Inbound)
    }
}

pub struct Gateway {
    endpoint: Endpoint,
    bus: Arc<SignalBus>,
    converter: Arc<Converter>,
    receive_timeout: Duration,
}

impl Gateway {
    /// Register the converter's commands and data signals on the endpoint
    pub fn new(endpoint: Endpoint, bus: SignalBus, converter: Converter) -> AdapterResult<Self> {
        let bus = Arc::new(bus);
        let converter = Arc::new(converter);

        let forwarder: Arc<dyn SignalHandler> =
            Arc::new(CommandForwarder::new(bus.clone(), converter.clone()));
        for command in converter.incoming_command_definitions() {
            endpoint.register_incoming_command(
                &command.signal,
                forwarder.clone(),
                CommandOptions::default().with_echo(command.echo),
            )?;
        }
        for signal in converter.outgoing_data_definitions() {
            endpoint.register_outgoing_data(&signal, None, false)?;
        }
        debug!("{}", endpoint.describe());

        Ok(Self {
            endpoint,
            bus,
            converter,
            receive_timeout: CAN_RECEIVE_TIMEOUT,
        })
    }

    pub fn with_receive_timeout(mut self, timeout: Duration) -> Self {
        self.receive_timeout = timeout;
        self
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn bus(&self) -> &SignalBus {
        &self.bus
    }

    pub fn converter(&self) -> &Converter {
        &self.converter
    }

    /// Connect with background networking
    pub async fn start(&self) -> AdapterResult<()> {
        self.endpoint.start(Networking::Background, true).await?;
        Ok(())
    }

    /// Receive at most one frame and publish its translation.
    ///
    /// An idle bus, an untranslatable frame and a failed publish are logged
    /// and leave the gateway running.
    pub async fn step(&self) -> AdapterResult<()> {
        let frame = match self.bus.recv_next_frame(self.receive_timeout).await {
            Ok(frame) => frame,
            Err(e) if e.is_idle() => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        debug!(frame = %frame, "Received CAN frame");

        let messages = match self.converter.frame_to_mqtt(&frame) {
            Ok(messages) => messages,
            Err(e) => {
                error!(error = %e, "Failed to convert incoming CAN frame");
                return Ok(());
            }
        };

        for (signal, payload) in messages {
            debug!(signal = %signal, payload = %payload, "Sending MQTT message");
            match self.endpoint.send_data(&signal, &payload).await {
                Ok(()) => {}
                Err(e @ ProtocolError::Usage(_)) => return Err(e.into()),
                Err(e) => warn!(signal = %signal, error = %e, "Failed to send data"),
            }
        }
        Ok(())
    }

    /// Step until `shutdown` completes, then stop the endpoint.
    ///
    /// Shutdown is checked between steps. A bus failure also stops the
    /// endpoint, so the offline presence goes out before the error is
    /// returned.
    pub async fn run<F>(&self, shutdown: F) -> AdapterResult<()>
    where
        F: Future<Output = ()>,
    {
        let mut shutdown = std::pin::pin!(shutdown);
        let result = loop {
            if let Err(e) = self.step().await {
                error!(error = %e, "CAN adapter stopped by an error");
                break Err(e);
            }
            if shutdown_requested(&mut shutdown).await {
                info!("Shutting down the CAN adapter");
                break Ok(());
            }
        };
        let stopped = self.endpoint.stop().await.map_err(AdapterError::from);
        result.and(stopped)
    }
}
