//! Service manager endpoint
//!
//! Listens to every availability topic on the network and publishes
//! `False` for the commands and data of resources that go offline.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use sg_protocol::{
    shutdown_requested, Echo, Endpoint, HandlerError, InboundSignal, MessageType, Networking,
    ProtocolResult, SignalHandler,
};
use tracing::{info, warn};

use crate::registry::{RegistryUpdate, ServiceRegistry};

/// Endpoint name of the service manager
pub const CLIENT_NAME: &str = "servicemanager";

/// Feeds availability messages to the registry and sends the retractions
pub struct AvailabilityHandler {
    registry: Arc<Mutex<ServiceRegistry>>,
}

impl AvailabilityHandler {
    pub fn new(registry: Arc<Mutex<ServiceRegistry>>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl SignalHandler for AvailabilityHandler {
    async fn on_signal(
        &self,
        endpoint: &Endpoint,
        signal: &InboundSignal,
    ) -> Result<Echo, HandlerError> {
        // Lock released before publishing
        let update = self.registry.lock().apply(&signal.topic, &signal.payload);

        if let RegistryUpdate::Offline(retractions) = update {
            for topic in retractions {
                info!(topic = %topic, "Sending out unavailability");
                if let Err(e) = endpoint
                    .publish_availability(topic.message_type(), topic.service(), topic.signal(), false)
                    .await
                {
                    warn!(topic = %topic, error = %e, "Failed to send unavailability");
                }
            }
        }
        Ok(Echo::Inbound)
    }
}

pub struct ServiceManager {
    endpoint: Endpoint,
    registry: Arc<Mutex<ServiceRegistry>>,
}

impl ServiceManager {
    /// Subscribe the endpoint to all three availability prefixes
    pub fn new(endpoint: Endpoint) -> Self {
        let registry = Arc::new(Mutex::new(ServiceRegistry::new()));
        let handler: Arc<dyn SignalHandler> = Arc::new(AvailabilityHandler::new(registry.clone()));
        for message_type in MessageType::AVAILABILITY {
            endpoint.register_wildcard(message_type, handler.clone());
        }
        Self { endpoint, registry }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Shared view of the registry
    pub fn registry(&self) -> Arc<Mutex<ServiceRegistry>> {
        self.registry.clone()
    }

    /// Connect with cooperative networking
    pub async fn start(&self) -> ProtocolResult<()> {
        info!("Starting servicemanager");
        self.endpoint.start(Networking::Cooperative, true).await
    }

    /// Drive the network loop until `shutdown` completes, then stop.
    ///
    /// Shutdown is checked between loop iterations, so a batch of
    /// retractions is never cut short. A fatal loop error also stops the
    /// endpoint before it is returned.
    pub async fn run<F>(&self, shutdown: F) -> ProtocolResult<()>
    where
        F: Future<Output = ()>,
    {
        let mut shutdown = std::pin::pin!(shutdown);
        let result = loop {
            if let Err(e) = self.endpoint.loop_once().await {
                break Err(e);
            }
            if shutdown_requested(&mut shutdown).await {
                info!("Shutting down the servicemanager");
                break Ok(());
            }
        };
        let stopped = self.endpoint.stop().await;
        result.and(stopped)
    }
}
