//! Signal registrations and handler types

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::endpoint::Endpoint;
use crate::error::HandlerError;
use crate::topic::Topic;

/// Inbound message handed to a handler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundSignal {
    pub topic: Topic,
    /// Trimmed payload
    pub payload: String,
}

/// What a handler wants echoed back, when echo is enabled
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Echo {
    /// Echo the inbound payload verbatim
    #[default]
    Inbound,
    /// Echo this payload instead
    Payload(String),
}

impl Echo {
    pub fn payload(value: impl fmt::Display) -> Self {
        Echo::Payload(value.to_string())
    }
}

/// Callback for inbound signals
///
/// An error is logged by the endpoint and suppresses the echo.
#[async_trait]
pub trait SignalHandler: Send + Sync {
    async fn on_signal(
        &self,
        endpoint: &Endpoint,
        signal: &InboundSignal,
    ) -> Result<Echo, HandlerError>;
}

struct FnHandler<F>(F);

#[async_trait]
impl<F> SignalHandler for FnHandler<F>
where
    F: Fn(&Endpoint, &InboundSignal) -> Result<Echo, HandlerError> + Send + Sync,
{
    async fn on_signal(
        &self,
        endpoint: &Endpoint,
        signal: &InboundSignal,
    ) -> Result<Echo, HandlerError> {
        (self.0)(endpoint, signal)
    }
}

/// Wrap a synchronous closure as a handler
pub fn handler_fn<F>(f: F) -> Arc<dyn SignalHandler>
where
    F: Fn(&Endpoint, &InboundSignal) -> Result<Echo, HandlerError> + Send + Sync + 'static,
{
    Arc::new(FnHandler(f))
}

/// Options for a generic inbound registration
#[derive(Debug, Clone, Default)]
pub struct InputOptions {
    /// Skip the handler when the payload equals the previous one
    pub on_change_only: bool,
    /// Republish the (possibly transformed) payload as data
    pub echo: bool,
    pub echo_retained: bool,
    /// Value republished on every connect. Replaced by each echo.
    pub default_value: Option<String>,
}

/// Options for a command registration on a resource
#[derive(Debug, Clone)]
pub struct CommandOptions {
    pub on_change_only: bool,
    pub echo: bool,
    pub echo_retained: bool,
    pub default_value: Option<String>,
}

impl Default for CommandOptions {
    fn default() -> Self {
        Self {
            on_change_only: false,
            echo: true,
            echo_retained: false,
            default_value: None,
        }
    }
}

impl CommandOptions {
    pub fn with_echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    pub fn with_echo_retained(mut self, retained: bool) -> Self {
        self.echo_retained = retained;
        self
    }

    pub fn with_default(mut self, value: impl fmt::Display) -> Self {
        self.default_value = Some(value.to_string());
        self
    }

    pub fn on_change_only(mut self) -> Self {
        self.on_change_only = true;
        self
    }
}

impl From<CommandOptions> for InputOptions {
    fn from(options: CommandOptions) -> Self {
        Self {
            on_change_only: options.on_change_only,
            echo: options.echo,
            echo_retained: options.echo_retained,
            default_value: options.default_value,
        }
    }
}

/// Registered inbound topic
#[derive(Clone)]
pub(crate) struct InputSignal {
    pub topic: Topic,
    pub handler: Arc<dyn SignalHandler>,
    pub on_change_only: bool,
    pub echo: bool,
    pub echo_retained: bool,
    pub default_value: Option<String>,
    pub last_payload: Option<String>,
}

impl fmt::Debug for InputSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InputSignal")
            .field("topic", &self.topic.to_string())
            .field("on_change_only", &self.on_change_only)
            .field("echo", &self.echo)
            .field("echo_retained", &self.echo_retained)
            .field("default_value", &self.default_value)
            .field("last_payload", &self.last_payload)
            .finish()
    }
}

/// Registered outbound data topic
#[derive(Debug, Clone)]
pub(crate) struct OutputSignal {
    pub topic: Topic,
    pub default_value: Option<String>,
    pub retained: bool,
}
