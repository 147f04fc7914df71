//! MQTT transport backed by rumqttc
//!
//! The rumqttc request queue is bounded and only drained by polling the
//! event loop. Outbound requests go through an unbounded channel to a
//! forwarding task, and the polling task never waits for queue space.

use std::sync::Arc;

use async_trait::async_trait;
use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, MqttOptions, Outgoing, Packet, QoS,
    TlsConfiguration,
};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::{
    Connector, EventLoop, Qos, Session, SessionOptions, Transport, TransportError, TransportEvent,
};

fn to_mqtt_qos(qos: Qos) -> QoS {
    match qos {
        Qos::AtMostOnce => QoS::AtMostOnce,
        Qos::AtLeastOnce => QoS::AtLeastOnce,
        Qos::ExactlyOnce => QoS::ExactlyOnce,
    }
}

/// Opens rumqttc sessions
#[derive(Debug, Clone, Default)]
pub struct MqttConnector;

impl MqttConnector {
    pub fn new() -> Self {
        Self
    }

    fn build_options(options: &SessionOptions) -> Result<MqttOptions, TransportError> {
        let mut mqtt_options =
            MqttOptions::new(options.client_id.clone(), options.host.clone(), options.port);
        mqtt_options.set_keep_alive(options.keepalive);
        mqtt_options.set_clean_session(options.clean_session);

        if let Some(will) = &options.last_will {
            mqtt_options.set_last_will(rumqttc::LastWill::new(
                will.topic.clone(),
                will.payload.clone(),
                to_mqtt_qos(options.qos),
                will.retained,
            ));
        }

        if let Some(tls) = &options.tls {
            let read = |path: &std::path::Path| {
                std::fs::read(path).map_err(|e| {
                    TransportError::InvalidConfig(format!(
                        "Failed to read certificate file {}: {}",
                        path.display(),
                        e
                    ))
                })
            };
            let ca = read(&tls.ca_file)?;
            let cert = read(&tls.cert_file)?;
            let key = read(&tls.key_file)?;
            mqtt_options.set_transport(rumqttc::Transport::tls_with_config(
                TlsConfiguration::Simple {
                    ca,
                    alpn: None,
                    client_auth: Some((cert, key)),
                },
            ));
        }

        Ok(mqtt_options)
    }
}

impl Connector for MqttConnector {
    fn connect(&self, options: &SessionOptions) -> Result<Session, TransportError> {
        let mqtt_options = Self::build_options(options)?;
        let (client, event_loop) = AsyncClient::new(mqtt_options, options.request_capacity.max(1));
        let (requests, pending) = mpsc::unbounded_channel();
        tokio::spawn(forward_requests(client, to_mqtt_qos(options.qos), pending));

        debug!(
            client_id = %options.client_id,
            host = %options.host,
            port = options.port,
            "MQTT session prepared"
        );

        Ok(Session {
            transport: Arc::new(MqttTransport { requests }),
            event_loop: Box::new(MqttEventLoop {
                inner: event_loop,
                disconnect_sent: false,
            }),
        })
    }
}

#[derive(Debug)]
enum OutboundRequest {
    Publish {
        topic: String,
        payload: Vec<u8>,
        retained: bool,
    },
    Subscribe(String),
    Disconnect,
}

/// Hand queued requests to the client in order, waiting for queue space
async fn forward_requests(
    client: AsyncClient,
    qos: QoS,
    mut pending: mpsc::UnboundedReceiver<OutboundRequest>,
) {
    while let Some(request) = pending.recv().await {
        let result = match &request {
            OutboundRequest::Publish {
                topic,
                payload,
                retained,
            } => client.publish(topic, qos, *retained, payload.clone()).await,
            OutboundRequest::Subscribe(filter) => client.subscribe(filter, qos).await,
            OutboundRequest::Disconnect => client.disconnect().await,
        };
        if let Err(e) = result {
            warn!(request = ?request, error = %e, "MQTT request rejected");
        }
    }
}

/// Outbound handle of an MQTT session
pub struct MqttTransport {
    requests: mpsc::UnboundedSender<OutboundRequest>,
}

impl MqttTransport {
    fn queue(&self, request: OutboundRequest) -> Result<(), TransportError> {
        self.requests
            .send(request)
            .map_err(|_| TransportError::NoConnection("MQTT session ended".to_string()))
    }
}

#[async_trait]
impl Transport for MqttTransport {
    async fn publish(
        &self,
        topic: &str,
        payload: &str,
        retained: bool,
    ) -> Result<(), TransportError> {
        self.queue(OutboundRequest::Publish {
            topic: topic.to_string(),
            payload: payload.as_bytes().to_vec(),
            retained,
        })
    }

    async fn subscribe(&self, filter: &str) -> Result<(), TransportError> {
        self.queue(OutboundRequest::Subscribe(filter.to_string()))
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.queue(OutboundRequest::Disconnect)
    }
}

/// Network driver of an MQTT session
pub struct MqttEventLoop {
    inner: rumqttc::EventLoop,
    disconnect_sent: bool,
}

#[async_trait]
impl EventLoop for MqttEventLoop {
    async fn poll(&mut self) -> Result<TransportEvent, TransportError> {
        // Polling after a graceful disconnect would open a new connection
        if self.disconnect_sent {
            return Err(TransportError::Closed);
        }

        match self.inner.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => Ok(TransportEvent::ConnAck {
                accepted: ack.code == ConnectReturnCode::Success,
                reason: format!("{:?}", ack.code),
            }),
            Ok(Event::Incoming(Packet::Publish(publish))) => Ok(TransportEvent::Message {
                topic: publish.topic.clone(),
                payload: String::from_utf8_lossy(&publish.payload).into_owned(),
            }),
            Ok(Event::Incoming(Packet::Disconnect)) => Ok(TransportEvent::Disconnected),
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                self.disconnect_sent = true;
                Ok(TransportEvent::Disconnected)
            }
            Ok(_) => Ok(TransportEvent::Other),
            Err(e) => Err(map_connection_error(e)),
        }
    }
}

fn map_connection_error(error: ConnectionError) -> TransportError {
    match error {
        ConnectionError::ConnectionRefused(code) => TransportError::Refused(format!("{:?}", code)),
        ConnectionError::Io(e) if e.kind() == std::io::ErrorKind::ConnectionRefused => {
            TransportError::NoConnection(e.to_string())
        }
        ConnectionError::Io(e) => TransportError::ConnectionLost(e.to_string()),
        ConnectionError::RequestsDone => TransportError::Closed,
        other => TransportError::ConnectionLost(other.to_string()),
    }
}
