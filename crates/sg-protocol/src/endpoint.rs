//! Protocol endpoint
//!
//! An endpoint owns one broker session and two registries: inbound topics
//! with their handlers, and outbound data topics with their last value.
//!
//! A [`Role::Resource`] additionally
//! - announces `resourceavailable/<name>/presence` (retained, also the last will)
//! - advertises every registered data and command signal on each connect
//! - republishes default values on each connect
//! - echoes commands back as data
//!
//! Networking either runs in a background task ([`Networking::Background`])
//! or is driven by the caller through [`Endpoint::loop_once`]
//! ([`Networking::Cooperative`]).

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::{HandlerError, ProtocolError, ProtocolResult, TopicError};
use crate::settings::EndpointSettings;
use crate::signal::{
    CommandOptions, Echo, InboundSignal, InputOptions, InputSignal, OutputSignal, SignalHandler,
};
use crate::topic::{bool_payload, MessageType, Topic, PAYLOAD_FALSE, PAYLOAD_TRUE};
use crate::transport::{
    create_connector, Connector, EventLoop, LastWill, Session, SessionOptions, Transport,
    TransportError, TransportEvent,
};

/// Kind of network participant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Provides data and commands, announces presence
    Resource,
    /// Consumes data and sends commands
    App,
    /// Plain participant without own topics, e.g. the service registry
    Observer,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Role::Resource => "Resource",
            Role::App => "App",
            Role::Observer => "Observer",
        };
        f.write_str(s)
    }
}

/// Where the session's network activity runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Networking {
    /// A background task polls the session
    Background,
    /// The caller polls via [`Endpoint::loop_once`]
    Cooperative,
}

type StatusListener = Arc<dyn Fn(&Endpoint, bool) -> Result<(), HandlerError> + Send + Sync>;

struct ActiveSession {
    transport: Arc<dyn Transport>,
    networking: Networking,
    client_id: String,
}

struct Inner {
    name: String,
    role: Role,
    presence: Topic,
    settings: EndpointSettings,
    connector: Arc<dyn Connector>,
    inputs: RwLock<BTreeMap<String, InputSignal>>,
    outputs: RwLock<BTreeMap<String, OutputSignal>>,
    wildcards: RwLock<BTreeMap<MessageType, Arc<dyn SignalHandler>>>,
    status_listener: RwLock<Option<StatusListener>>,
    session: RwLock<Option<ActiveSession>>,
    event_loop: tokio::sync::Mutex<Option<Box<dyn EventLoop>>>,
    task: Mutex<Option<JoinHandle<()>>>,
    connected: AtomicBool,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(handle) = self.task.get_mut().take() {
            handle.abort();
        }
    }
}

enum Lookup {
    Found {
        key: String,
        handler: Arc<dyn SignalHandler>,
        /// Some(retained) when the message is echoed
        echo: Option<bool>,
    },
    Unchanged,
    Unregistered,
}

/// Protocol endpoint. Cheap to clone; clones share the session.
#[derive(Clone)]
pub struct Endpoint {
    inner: Arc<Inner>,
}

impl Endpoint {
    /// Create an endpoint using an explicit connector
    pub fn new(
        name: impl Into<String>,
        role: Role,
        settings: EndpointSettings,
        connector: Arc<dyn Connector>,
    ) -> ProtocolResult<Self> {
        let name = name.into().trim().to_string();
        let presence = Topic::presence(&name).map_err(|e| {
            ProtocolError::Configuration(format!("invalid endpoint name '{}': {}", name, e))
        })?;
        settings
            .qos()
            .map_err(|e| ProtocolError::Configuration(e.to_string()))?;

        Ok(Self {
            inner: Arc::new(Inner {
                name,
                role,
                presence,
                settings,
                connector,
                inputs: RwLock::new(BTreeMap::new()),
                outputs: RwLock::new(BTreeMap::new()),
                wildcards: RwLock::new(BTreeMap::new()),
                status_listener: RwLock::new(None),
                session: RwLock::new(None),
                event_loop: tokio::sync::Mutex::new(None),
                task: Mutex::new(None),
                connected: AtomicBool::new(false),
            }),
        })
    }

    /// Resource using the transport named in the settings
    pub fn resource(name: impl Into<String>, settings: EndpointSettings) -> ProtocolResult<Self> {
        let connector = create_connector(&settings.transport);
        Self::new(name, Role::Resource, settings, connector)
    }

    /// App using the transport named in the settings
    pub fn app(name: impl Into<String>, settings: EndpointSettings) -> ProtocolResult<Self> {
        let connector = create_connector(&settings.transport);
        Self::new(name, Role::App, settings, connector)
    }

    /// Observer using the transport named in the settings
    pub fn observer(name: impl Into<String>, settings: EndpointSettings) -> ProtocolResult<Self> {
        let connector = create_connector(&settings.transport);
        Self::new(name, Role::Observer, settings, connector)
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn role(&self) -> Role {
        self.inner.role
    }

    pub fn settings(&self) -> &EndpointSettings {
        &self.inner.settings
    }

    /// Last connection status reported by the broker
    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    pub fn is_started(&self) -> bool {
        self.inner.session.read().is_some()
    }

    /// Client id of the current session
    pub fn client_id(&self) -> Option<String> {
        self.inner
            .session
            .read()
            .as_ref()
            .map(|s| s.client_id.clone())
    }

    /// Registered inbound topics, sorted
    pub fn incoming_topics(&self) -> Vec<String> {
        self.inner.inputs.read().keys().cloned().collect()
    }

    /// Registered outbound topics, sorted
    pub fn outgoing_topics(&self) -> Vec<String> {
        self.inner.outputs.read().keys().cloned().collect()
    }

    /// Current default value of a registered topic (inbound or outbound)
    pub fn default_value(&self, topic: &str) -> Option<String> {
        if let Some(input) = self.inner.inputs.read().get(topic) {
            return input.default_value.clone();
        }
        self.inner
            .outputs
            .read()
            .get(topic)
            .and_then(|o| o.default_value.clone())
    }

    // =========================================================================
    // Registration
    // =========================================================================

    /// Register a handler for an inbound topic.
    ///
    /// Registering the same topic again replaces the earlier registration.
    /// Subscriptions are made on the next connect.
    pub fn register_incoming(
        &self,
        message_type: &str,
        service: &str,
        signal: &str,
        handler: Arc<dyn SignalHandler>,
        options: InputOptions,
    ) -> ProtocolResult<()> {
        let message_type: MessageType = message_type.parse().map_err(|e: TopicError| {
            ProtocolError::Configuration(format!(
                "trying to register an input signal, but the message type is wrong: {}",
                e
            ))
        })?;
        self.register_input(message_type, service, signal, handler, options)
    }

    /// Register a handler for `data/<service>/<signal>`
    pub fn register_incoming_data(
        &self,
        service: &str,
        signal: &str,
        handler: Arc<dyn SignalHandler>,
        on_change_only: bool,
    ) -> ProtocolResult<()> {
        debug!(service, signal, "Registering incoming data");
        let options = InputOptions {
            on_change_only,
            ..Default::default()
        };
        self.register_input(MessageType::Data, service, signal, handler, options)
    }

    /// Register a handler for an availability topic.
    ///
    /// For `resourceavailable` the signal name is ignored.
    pub fn register_incoming_availability(
        &self,
        message_type: MessageType,
        service: &str,
        signal: &str,
        handler: Arc<dyn SignalHandler>,
    ) -> ProtocolResult<()> {
        if !message_type.is_availability() {
            return Err(ProtocolError::Configuration(format!(
                "wrong availability prefix given: {}",
                message_type
            )));
        }
        debug!(prefix = %message_type, service, signal, "Registering incoming availability");
        self.register_input(message_type, service, signal, handler, InputOptions::default())
    }

    /// Register a handler for `command/<own name>/<signal>` (resources only)
    pub fn register_incoming_command(
        &self,
        signal: &str,
        handler: Arc<dyn SignalHandler>,
        options: CommandOptions,
    ) -> ProtocolResult<()> {
        self.require_resource("register_incoming_command")?;
        debug!(signal, "Registering incoming command");
        let service = self.inner.name.clone();
        self.register_input(MessageType::Command, &service, signal, handler, options.into())
    }

    /// Pre-register `data/<own name>/<signal>` (resources only).
    ///
    /// A non-null default is published on every connect and replaced by
    /// each later [`Endpoint::send_data`].
    pub fn register_outgoing_data(
        &self,
        signal: &str,
        default_value: Option<String>,
        retained: bool,
    ) -> ProtocolResult<()> {
        self.require_resource("register_outgoing_data")?;
        let topic = Topic::new(MessageType::Data, &self.inner.name, signal)
            .map_err(|e| ProtocolError::Configuration(e.to_string()))?;
        debug!(topic = %topic, "Registering outgoing data");
        self.inner.outputs.write().insert(
            topic.to_string(),
            OutputSignal {
                topic,
                default_value,
                retained,
            },
        );
        Ok(())
    }

    /// Handle every topic under a prefix that has no exact registration
    pub fn register_wildcard(&self, message_type: MessageType, handler: Arc<dyn SignalHandler>) {
        debug!(filter = %message_type.wildcard_filter(), "Registering wildcard subscription");
        self.inner.wildcards.write().insert(message_type, handler);
    }

    /// Called with `true`/`false` whenever the broker connection changes
    pub fn on_connection_status<F>(&self, listener: F)
    where
        F: Fn(&Endpoint, bool) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        *self.inner.status_listener.write() = Some(Arc::new(listener));
    }

    fn register_input(
        &self,
        message_type: MessageType,
        service: &str,
        signal: &str,
        handler: Arc<dyn SignalHandler>,
        options: InputOptions,
    ) -> ProtocolResult<()> {
        let topic = Topic::new(message_type, service, signal)
            .map_err(|e| ProtocolError::Configuration(e.to_string()))?;
        if options.echo && message_type.echo_type().is_none() {
            debug!(topic = %topic, "Echo is only performed for commands");
        }
        self.inner.inputs.write().insert(
            topic.to_string(),
            InputSignal {
                topic,
                handler,
                on_change_only: options.on_change_only,
                echo: options.echo,
                echo_retained: options.echo_retained,
                default_value: options.default_value,
                last_payload: None,
            },
        );
        Ok(())
    }

    fn require_resource(&self, operation: &str) -> ProtocolResult<()> {
        if self.inner.role == Role::Resource {
            Ok(())
        } else {
            Err(ProtocolError::Usage(format!(
                "{}() is only available on a resource, '{}' is an {}",
                operation, self.inner.name, self.inner.role
            )))
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Open a broker session, replacing any existing one.
    ///
    /// With a clean session the client id carries the process id, so that
    /// several instances do not collide in the broker.
    pub async fn start(&self, networking: Networking, clean_session: bool) -> ProtocolResult<()> {
        if self.is_started() {
            self.stop().await?;
        }
        self.set_connection_status(false);

        let settings = &self.inner.settings;
        let client_id = if clean_session {
            format!("{}-{}", self.inner.name, std::process::id())
        } else {
            self.inner.name.clone()
        };
        let options = SessionOptions {
            client_id: client_id.clone(),
            host: settings.host.clone(),
            port: settings.port,
            keepalive: settings.keepalive(),
            clean_session,
            qos: settings.qos()?,
            last_will: self.last_will(),
            tls: settings.tls_files(),
            request_capacity: settings.request_capacity,
        };

        info!(
            host = %settings.host,
            port = settings.port,
            qos = %options.qos,
            client_id = %client_id,
            "Setting up connection to the MQTT broker"
        );
        if let Some(tls) = &options.tls {
            info!(
                ca_file = %tls.ca_file.display(),
                cert_file = %tls.cert_file.display(),
                key_file = %tls.key_file.display(),
                "Using certificates for MQTT communication"
            );
        }
        if let Some(will) = &options.last_will {
            debug!(topic = %will.topic, "Setting last will");
        }

        let Session {
            transport,
            event_loop,
        } = self.inner.connector.connect(&options)?;

        *self.inner.session.write() = Some(ActiveSession {
            transport,
            networking,
            client_id,
        });

        match networking {
            Networking::Background => {
                let handle = tokio::spawn(run_event_loop(Arc::downgrade(&self.inner), event_loop));
                *self.inner.task.lock() = Some(handle);
                tokio::time::sleep(settings.startup_delay()).await;
            }
            Networking::Cooperative => {
                *self.inner.event_loop.lock().await = Some(event_loop);
            }
        }
        Ok(())
    }

    /// Run one bounded slice of network activity (cooperative networking).
    ///
    /// Handles at most one event. On a lost or refused connection one
    /// reconnect is attempted. Returns an error only for unrecoverable
    /// transport failures.
    pub async fn loop_once(&self) -> ProtocolResult<()> {
        let networking = self
            .inner
            .session
            .read()
            .as_ref()
            .map(|s| s.networking)
            .ok_or_else(|| {
                ProtocolError::Usage("start() must be called before loop_once()".to_string())
            })?;
        if networking == Networking::Background {
            warn!("loop_once() should not be used with background networking");
            return Ok(());
        }

        match self.poll_cooperative().await? {
            None => Ok(()),
            Some(Ok(event)) => {
                self.handle_event(event).await;
                Ok(())
            }
            Some(Err(e)) => self.handle_loop_error(e).await,
        }
    }

    /// Announce offline presence (resources), then disconnect.
    pub async fn stop(&self) -> ProtocolResult<()> {
        let session = self.inner.session.write().take().ok_or_else(|| {
            ProtocolError::Usage("start() must be called before stop()".to_string())
        })?;
        let settings = &self.inner.settings;
        info!(host = %settings.host, port = settings.port, "Disconnecting from the MQTT broker");

        if self.inner.role == Role::Resource {
            let presence = self.inner.presence.to_string();
            if let Err(e) = session.transport.publish(&presence, PAYLOAD_FALSE, true).await {
                warn!(topic = %presence, error = %e, "Failed to announce offline presence");
            }
        }
        tokio::time::sleep(settings.shutdown_delay()).await;
        if let Err(e) = session.transport.disconnect().await {
            debug!(error = %e, "Disconnect request failed");
        }

        // Give the driver a chance to flush the offline message and disconnect
        let drain_timeout = settings.loop_timeout();
        let handle = self.inner.task.lock().take();
        if let Some(mut handle) = handle {
            if tokio::time::timeout(drain_timeout, &mut handle).await.is_err() {
                handle.abort();
            }
        }
        let event_loop = self.inner.event_loop.lock().await.take();
        if let Some(mut event_loop) = event_loop {
            let drain = async {
                while !matches!(event_loop.poll().await, Err(TransportError::Closed)) {}
            };
            let _ = tokio::time::timeout(drain_timeout, drain).await;
        }

        self.set_connection_status(false);
        Ok(())
    }

    // =========================================================================
    // Sending
    // =========================================================================

    /// Publish `command/<service>/<signal>`
    pub async fn send_command(
        &self,
        service: &str,
        signal: &str,
        value: impl fmt::Display,
        retained: bool,
    ) -> ProtocolResult<()> {
        let topic = Topic::new(MessageType::Command, service, signal)?;
        let transport = self.transport("send_command")?;
        let payload = value.to_string();
        transport
            .publish(&topic.to_string(), &payload, retained)
            .await?;
        debug!(topic = %topic, payload = %payload, "Sending command");
        Ok(())
    }

    /// Publish `data/<own name>/<signal>` on a pre-registered signal.
    ///
    /// Unregistered signals are logged and dropped.
    pub async fn send_data(&self, signal: &str, value: impl fmt::Display) -> ProtocolResult<()> {
        self.require_resource("send_data")?;
        let payload = value.to_string();
        let topic = Topic::new(MessageType::Data, &self.inner.name, signal)?;
        let key = topic.to_string();

        let retained = match self.inner.outputs.read().get(&key) {
            Some(output) => output.retained,
            None => {
                warn!(signal, payload = %payload, "This data signal has not been registered");
                return Ok(());
            }
        };

        let transport = self.transport("send_data")?;
        transport.publish(&key, &payload, retained).await?;
        debug!(topic = %key, payload = %payload, "Sending data");

        if let Some(output) = self.inner.outputs.write().get_mut(&key) {
            if output.default_value.is_some() {
                output.default_value = Some(payload);
            }
        }
        Ok(())
    }

    /// Publish a retained availability announcement
    pub async fn publish_availability(
        &self,
        message_type: MessageType,
        service: &str,
        signal: &str,
        available: bool,
    ) -> ProtocolResult<()> {
        if !message_type.is_availability() {
            return Err(ProtocolError::Configuration(format!(
                "not an availability prefix: {}",
                message_type
            )));
        }
        let topic = Topic::new(message_type, service, signal)?;
        let transport = self.transport("publish_availability")?;
        transport
            .publish(&topic.to_string(), bool_payload(available), true)
            .await?;
        debug!(topic = %topic, available, "Sending availability");
        Ok(())
    }

    /// Multi-line overview of the registered topics
    pub fn describe(&self) -> String {
        let mut text = format!("{} Details:\n", self);
        text.push_str("  Registered incoming topics:\n");
        for (topic, input) in self.inner.inputs.read().iter() {
            text.push_str(&format!("    {}\n", topic));
            text.push_str(&format!(
                "        on_change_only={} echo={} echo_retained={} default={:?}\n",
                input.on_change_only, input.echo, input.echo_retained, input.default_value
            ));
        }
        for message_type in self.inner.wildcards.read().keys() {
            text.push_str(&format!("    {} (wildcard)\n", message_type.wildcard_filter()));
        }
        text.push_str("  Registered outgoing topics:\n");
        for (topic, output) in self.inner.outputs.read().iter() {
            text.push_str(&format!("    {}\n", topic));
            text.push_str(&format!(
                "        retained={} default={:?}\n",
                output.retained, output.default_value
            ));
        }
        text
    }

    // =========================================================================
    // Session internals
    // =========================================================================

    fn last_will(&self) -> Option<LastWill> {
        (self.inner.role == Role::Resource).then(|| LastWill {
            topic: self.inner.presence.to_string(),
            payload: PAYLOAD_FALSE.to_string(),
            retained: true,
        })
    }

    fn transport(&self, operation: &str) -> ProtocolResult<Arc<dyn Transport>> {
        self.inner
            .session
            .read()
            .as_ref()
            .map(|s| s.transport.clone())
            .ok_or_else(|| {
                ProtocolError::Usage(format!("start() must be called before {}()", operation))
            })
    }

    fn set_connection_status(&self, connected: bool) {
        self.inner.connected.store(connected, Ordering::SeqCst);
        let listener = self.inner.status_listener.read().clone();
        if let Some(listener) = listener {
            debug!(connected, "Reporting broker connection status");
            if let Err(e) = listener(self, connected) {
                warn!(connected, error = %e, "Connection status listener failed");
            }
        }
    }

    /// One bounded poll of the cooperative event loop. None on timeout.
    async fn poll_cooperative(
        &self,
    ) -> ProtocolResult<Option<Result<TransportEvent, TransportError>>> {
        let mut guard = self.inner.event_loop.lock().await;
        let event_loop = guard.as_mut().ok_or_else(|| {
            ProtocolError::Usage("no cooperative session is running".to_string())
        })?;
        Ok(tokio::time::timeout(self.inner.settings.loop_timeout(), event_loop.poll())
            .await
            .ok())
    }

    async fn handle_loop_error(&self, error: TransportError) -> ProtocolResult<()> {
        if error.is_fatal() {
            error!(error = %error, "Unrecoverable MQTT error");
            self.set_connection_status(false);
            return Err(error.into());
        }
        if !error.is_recoverable() {
            warn!(error = %error, "MQTT error");
            return Ok(());
        }

        match error {
            TransportError::ConnectionLost(_) => {
                info!(error = %error, "MQTT connection error, trying to reconnect")
            }
            _ => warn!(error = %error, "MQTT connection error, trying to reconnect"),
        }

        match self.poll_cooperative().await? {
            Some(Ok(event)) => {
                self.handle_event(event).await;
                Ok(())
            }
            Some(Err(e)) if e.is_fatal() => {
                error!(error = %e, "Unrecoverable MQTT error");
                self.set_connection_status(false);
                Err(e.into())
            }
            _ => {
                let settings = &self.inner.settings;
                warn!(
                    host = %settings.host,
                    port = settings.port,
                    "Failed to connect to the MQTT broker"
                );
                self.set_connection_status(false);
                tokio::time::sleep(settings.reconnect_delay()).await;
                Ok(())
            }
        }
    }

    async fn handle_event(&self, event: TransportEvent) {
        let settings = &self.inner.settings;
        match event {
            TransportEvent::ConnAck {
                accepted: false,
                reason,
            } => {
                warn!(
                    host = %settings.host,
                    port = settings.port,
                    reason = %reason,
                    "Failed connection to MQTT broker"
                );
                self.set_connection_status(false);
            }
            TransportEvent::ConnAck {
                accepted: true,
                reason,
            } => {
                info!(
                    host = %settings.host,
                    port = settings.port,
                    reason = %reason,
                    "Successful connection to MQTT broker"
                );
                self.set_connection_status(true);
                self.subscribe_to_inputs().await;
                self.publish_capabilities().await;
            }
            TransportEvent::Message { topic, payload } => self.dispatch(&topic, &payload).await,
            TransportEvent::Disconnected => {
                warn!(host = %settings.host, port = settings.port, "Now disconnected from MQTT broker");
                self.set_connection_status(false);
            }
            TransportEvent::Other => {}
        }
    }

    async fn subscribe_to_inputs(&self) {
        let Ok(transport) = self.transport("subscribe") else {
            return;
        };
        let mut filters: Vec<String> = self.inner.inputs.read().keys().cloned().collect();
        filters.extend(
            self.inner
                .wildcards
                .read()
                .keys()
                .map(|t| t.wildcard_filter()),
        );

        for filter in filters {
            debug!(filter = %filter, "Subscribing");
            if let Err(e) = transport.subscribe(&filter).await {
                warn!(filter = %filter, error = %e, "Failed to subscribe");
            }
        }
    }

    /// Presence, availability and default values announced on every connect
    fn capability_announcements(&self) -> Vec<(Topic, String, bool)> {
        let mut messages = vec![(self.inner.presence.clone(), PAYLOAD_TRUE.to_string(), true)];

        for output in self.inner.outputs.read().values() {
            if output.topic.message_type() != MessageType::Data {
                continue;
            }
            messages.push((
                output.topic.with_message_type(MessageType::DataAvailable),
                PAYLOAD_TRUE.to_string(),
                true,
            ));
            if let Some(value) = &output.default_value {
                messages.push((output.topic.clone(), value.clone(), output.retained));
            }
        }

        for input in self.inner.inputs.read().values() {
            if input.topic.message_type() != MessageType::Command {
                continue;
            }
            messages.push((
                input.topic.with_message_type(MessageType::CommandAvailable),
                PAYLOAD_TRUE.to_string(),
                true,
            ));
            if input.echo {
                messages.push((
                    input.topic.with_message_type(MessageType::DataAvailable),
                    PAYLOAD_TRUE.to_string(),
                    true,
                ));
                if let Some(value) = &input.default_value {
                    messages.push((
                        input.topic.with_message_type(MessageType::Data),
                        value.clone(),
                        input.echo_retained,
                    ));
                }
            }
        }
        messages
    }

    async fn publish_capabilities(&self) {
        if self.inner.role != Role::Resource {
            return;
        }
        let Ok(transport) = self.transport("publish") else {
            return;
        };

        for (topic, payload, retained) in self.capability_announcements() {
            match transport.publish(&topic.to_string(), &payload, retained).await {
                Ok(()) if topic.message_type() == MessageType::Data => {
                    info!(topic = %topic, payload = %payload, "Publishing initial value")
                }
                Ok(()) => debug!(topic = %topic, "Capabilities"),
                Err(e) => warn!(topic = %topic, error = %e, "Failed to publish capability"),
            }
        }
    }

    fn lookup(&self, topic: &Topic, payload: &str) -> Lookup {
        let key = topic.to_string();
        {
            let mut inputs = self.inner.inputs.write();
            if let Some(input) = inputs.get_mut(&key) {
                if input.on_change_only {
                    if input.last_payload.as_deref() == Some(payload) {
                        return Lookup::Unchanged;
                    }
                    input.last_payload = Some(payload.to_string());
                }
                return Lookup::Found {
                    handler: input.handler.clone(),
                    echo: input.echo.then_some(input.echo_retained),
                    key,
                };
            }
        }

        match self.inner.wildcards.read().get(&topic.message_type()) {
            Some(handler) => Lookup::Found {
                key,
                handler: handler.clone(),
                echo: None,
            },
            None => Lookup::Unregistered,
        }
    }

    async fn dispatch(&self, raw_topic: &str, raw_payload: &str) {
        let payload = raw_payload.trim();
        let topic = match Topic::parse(raw_topic) {
            Ok(topic) => topic,
            Err(e) => {
                warn!(topic = %raw_topic.trim(), payload, error = %e, "Received wrong MQTT topic structure");
                return;
            }
        };
        debug!(topic = %topic, payload, "Received message");

        let (key, handler, echo) = match self.lookup(&topic, payload) {
            Lookup::Found { key, handler, echo } => (key, handler, echo),
            Lookup::Unchanged => {
                debug!(topic = %topic, payload, "The payload has not changed, skipping callback");
                return;
            }
            Lookup::Unregistered => {
                warn!(topic = %topic, payload, "Received unregistered input message");
                return;
            }
        };

        let signal = InboundSignal {
            topic,
            payload: payload.to_string(),
        };
        let reply = match handler.on_signal(self, &signal).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(topic = %signal.topic, payload, error = %e, "Failed to run callback");
                return;
            }
        };

        let Some(echo_retained) = echo else {
            return;
        };
        let Some(echo_topic) = signal.topic.echo_topic() else {
            return;
        };
        let echo_payload = match reply {
            Echo::Inbound => signal.payload,
            Echo::Payload(payload) => payload,
        };

        match self.transport("echo") {
            Ok(transport) => {
                if let Err(e) = transport
                    .publish(&echo_topic.to_string(), &echo_payload, echo_retained)
                    .await
                {
                    warn!(topic = %echo_topic, error = %e, "Failed to send message echo");
                } else {
                    debug!(topic = %echo_topic, payload = %echo_payload, "Sending message echo");
                }
            }
            Err(e) => warn!(topic = %echo_topic, error = %e, "Cannot send message echo"),
        }

        if let Some(input) = self.inner.inputs.write().get_mut(&key) {
            if input.default_value.is_some() {
                input.default_value = Some(echo_payload);
            }
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SG {}: '{}', connecting to host '{}', port {}. Has {} incoming and {} outgoing topics registered.",
            self.inner.role,
            self.inner.name,
            self.inner.settings.host,
            self.inner.settings.port,
            self.inner.inputs.read().len(),
            self.inner.outputs.read().len()
        )
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("name", &self.inner.name)
            .field("role", &self.inner.role)
            .field("connected", &self.is_connected())
            .finish()
    }
}

async fn run_event_loop(inner: Weak<Inner>, mut event_loop: Box<dyn EventLoop>) {
    loop {
        let result = event_loop.poll().await;
        let Some(inner) = inner.upgrade() else {
            break;
        };
        let endpoint = Endpoint { inner };

        match result {
            Ok(event) => endpoint.handle_event(event).await,
            Err(TransportError::Closed) => {
                debug!("MQTT event loop closed");
                endpoint.set_connection_status(false);
                break;
            }
            Err(e) if e.is_fatal() => {
                error!(error = %e, "Unrecoverable MQTT error, stopping network task");
                endpoint.set_connection_status(false);
                break;
            }
            Err(e) => {
                warn!(error = %e, "MQTT connection error, trying to reconnect");
                endpoint.set_connection_status(false);
                tokio::time::sleep(endpoint.inner.settings.reconnect_delay()).await;
            }
        }
    }
}
