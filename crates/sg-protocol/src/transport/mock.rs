//! In-memory broker for testing
//!
//! Routes publishes to matching subscriptions, keeps retained messages,
//! fires last wills on dropped connections and records every publish so
//! tests can assert on the traffic an endpoint produced. A broker made with
//! [`MockBroker::without_log`] keeps no record.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::{
    Connector, EventLoop, LastWill, Session, SessionOptions, Transport, TransportError,
    TransportEvent,
};
use crate::topic::filter_matches;

type EventResult = Result<TransportEvent, TransportError>;

/// Client id used for messages injected by tests
pub const BROKER_CLIENT_ID: &str = "<broker>";

/// One publish seen by the broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub client_id: String,
    pub topic: String,
    pub payload: String,
    pub retained: bool,
}

struct ClientState {
    sender: mpsc::UnboundedSender<EventResult>,
    subscriptions: Vec<String>,
    last_will: Option<LastWill>,
    connected: bool,
}

#[derive(Default)]
struct BrokerState {
    clients: BTreeMap<String, ClientState>,
    retained: BTreeMap<String, String>,
    log: Vec<PublishedMessage>,
    log_disabled: bool,
    refuse_connections: bool,
}

impl BrokerState {
    fn route(&mut self, client_id: &str, topic: &str, payload: &str, retained: bool) {
        if !self.log_disabled {
            self.log.push(PublishedMessage {
                client_id: client_id.to_string(),
                topic: topic.to_string(),
                payload: payload.to_string(),
                retained,
            });
        }

        if retained {
            if payload.is_empty() {
                self.retained.remove(topic);
            } else {
                self.retained.insert(topic.to_string(), payload.to_string());
            }
        }

        for client in self.clients.values() {
            if client.connected && client.subscriptions.iter().any(|f| filter_matches(f, topic)) {
                let _ = client.sender.send(Ok(TransportEvent::Message {
                    topic: topic.to_string(),
                    payload: payload.to_string(),
                }));
            }
        }
    }

    fn acknowledge(&mut self, client_id: &str) {
        let refuse = self.refuse_connections;
        if let Some(client) = self.clients.get_mut(client_id) {
            client.connected = !refuse;
            client.subscriptions.clear();
            let reason = if refuse { "NotAuthorized" } else { "Success" };
            let _ = client.sender.send(Ok(TransportEvent::ConnAck {
                accepted: !refuse,
                reason: reason.to_string(),
            }));
        }
    }
}

/// Shared in-memory broker
#[derive(Clone, Default)]
pub struct MockBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl MockBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Broker for long-running dry runs: routes and retains, records nothing
    pub fn without_log() -> Self {
        let broker = Self::default();
        broker.state.lock().log_disabled = true;
        broker
    }

    /// Connector opening sessions on this broker
    pub fn connector(&self) -> Arc<dyn Connector> {
        Arc::new(MockConnector {
            broker: self.clone(),
        })
    }

    /// Publish from outside any session
    pub fn publish(&self, topic: &str, payload: &str, retained: bool) {
        self.state
            .lock()
            .route(BROKER_CLIENT_ID, topic, payload, retained);
    }

    /// Every publish seen so far, in order
    pub fn published(&self) -> Vec<PublishedMessage> {
        self.state.lock().log.clone()
    }

    /// Publishes on one topic, in order
    pub fn published_on(&self, topic: &str) -> Vec<PublishedMessage> {
        self.state
            .lock()
            .log
            .iter()
            .filter(|m| m.topic == topic)
            .cloned()
            .collect()
    }

    pub fn clear_log(&self) {
        self.state.lock().log.clear();
    }

    /// Current retained payload of a topic
    pub fn retained(&self, topic: &str) -> Option<String> {
        self.state.lock().retained.get(topic).cloned()
    }

    pub fn is_connected(&self, client_id: &str) -> bool {
        self.state
            .lock()
            .clients
            .get(client_id)
            .map(|c| c.connected)
            .unwrap_or(false)
    }

    /// Ids of the currently connected clients
    pub fn connected_clients(&self) -> Vec<String> {
        self.state
            .lock()
            .clients
            .iter()
            .filter(|(_, c)| c.connected)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Answer future connection attempts with a refusal
    pub fn set_refuse_connections(&self, refuse: bool) {
        self.state.lock().refuse_connections = refuse;
    }

    /// Sever a client's connection as a network failure would.
    ///
    /// Publishes the client's last will. The client reconnects on its next
    /// poll. Returns false if the client was not connected.
    pub fn drop_connection(&self, client_id: &str) -> bool {
        let mut state = self.state.lock();
        let will = match state.clients.get_mut(client_id) {
            Some(client) if client.connected => {
                client.connected = false;
                client.subscriptions.clear();
                let _ = client.sender.send(Err(TransportError::ConnectionLost(
                    "connection reset by broker".to_string(),
                )));
                client.last_will.clone()
            }
            _ => return false,
        };

        if let Some(will) = will {
            state.route(BROKER_CLIENT_ID, &will.topic, &will.payload, will.retained);
        }
        true
    }

    fn register(&self, options: &SessionOptions) -> mpsc::UnboundedReceiver<EventResult> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let mut state = self.state.lock();
        // Replacing an entry drops the old sender, which closes a stale session
        state.clients.insert(
            options.client_id.clone(),
            ClientState {
                sender,
                subscriptions: Vec::new(),
                last_will: options.last_will.clone(),
                connected: false,
            },
        );
        state.acknowledge(&options.client_id);
        receiver
    }

    fn reconnect(&self, client_id: &str) {
        self.state.lock().acknowledge(client_id);
    }

    fn client_publish(
        &self,
        client_id: &str,
        topic: &str,
        payload: &str,
        retained: bool,
    ) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if !state.clients.get(client_id).is_some_and(|c| c.connected) {
            return Err(TransportError::NoConnection(client_id.to_string()));
        }
        state.route(client_id, topic, payload, retained);
        Ok(())
    }

    fn client_subscribe(&self, client_id: &str, filter: &str) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        let retained: Vec<(String, String)> = state
            .retained
            .iter()
            .filter(|(topic, _)| filter_matches(filter, topic))
            .map(|(t, p)| (t.clone(), p.clone()))
            .collect();

        let client = state
            .clients
            .get_mut(client_id)
            .filter(|c| c.connected)
            .ok_or_else(|| TransportError::NoConnection(client_id.to_string()))?;
        if !client.subscriptions.iter().any(|f| f == filter) {
            client.subscriptions.push(filter.to_string());
        }
        for (topic, payload) in retained {
            let _ = client
                .sender
                .send(Ok(TransportEvent::Message { topic, payload }));
        }
        Ok(())
    }

    fn client_disconnect(&self, client_id: &str) {
        let mut state = self.state.lock();
        if let Some(client) = state.clients.get_mut(client_id) {
            client.connected = false;
            client.subscriptions.clear();
            let _ = client.sender.send(Ok(TransportEvent::Disconnected));
            let _ = client.sender.send(Err(TransportError::Closed));
        }
    }
}

/// Connector for [`MockBroker`] sessions
pub struct MockConnector {
    broker: MockBroker,
}

impl Connector for MockConnector {
    fn connect(&self, options: &SessionOptions) -> Result<Session, TransportError> {
        let receiver = self.broker.register(options);
        Ok(Session {
            transport: Arc::new(MockTransport {
                broker: self.broker.clone(),
                client_id: options.client_id.clone(),
            }),
            event_loop: Box::new(MockEventLoop {
                broker: self.broker.clone(),
                client_id: options.client_id.clone(),
                receiver,
                lost: false,
            }),
        })
    }
}

struct MockTransport {
    broker: MockBroker,
    client_id: String,
}

#[async_trait]
impl Transport for MockTransport {
    async fn publish(
        &self,
        topic: &str,
        payload: &str,
        retained: bool,
    ) -> Result<(), TransportError> {
        self.broker
            .client_publish(&self.client_id, topic, payload, retained)
    }

    async fn subscribe(&self, filter: &str) -> Result<(), TransportError> {
        self.broker.client_subscribe(&self.client_id, filter)
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.broker.client_disconnect(&self.client_id);
        Ok(())
    }
}

struct MockEventLoop {
    broker: MockBroker,
    client_id: String,
    receiver: mpsc::UnboundedReceiver<EventResult>,
    lost: bool,
}

#[async_trait]
impl EventLoop for MockEventLoop {
    async fn poll(&mut self) -> Result<TransportEvent, TransportError> {
        if self.lost {
            self.lost = false;
            self.broker.reconnect(&self.client_id);
        }

        match self.receiver.recv().await {
            Some(Err(e)) => {
                if e.is_recoverable() {
                    self.lost = true;
                }
                Err(e)
            }
            Some(event) => event,
            None => Err(TransportError::Closed),
        }
    }
}
