//! sg-protocol - Publish/subscribe protocol for secure gateway participants
//!
//! Resources publish data and accept commands, apps consume data and send
//! commands. Everything travels over an MQTT broker using three-part topics:
//!
//! ```text
//! data/<service>/<signal>                 current value of a signal
//! command/<service>/<signal>              request to change a signal
//! dataavailable/<service>/<signal>        True/False, retained
//! commandavailable/<service>/<signal>     True/False, retained
//! resourceavailable/<service>/presence    True/False, retained
//! ```
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use sg_protocol::{handler_fn, CommandOptions, Echo, Endpoint, EndpointSettings, Networking};
//!
//! let taxisign = Endpoint::resource("taxisign", EndpointSettings::default())?;
//! taxisign.register_incoming_command(
//!     "indicator",
//!     handler_fn(|_, signal| {
//!         println!("Turning sign {}", signal.payload);
//!         Ok(Echo::Inbound)
//!     }),
//!     CommandOptions::default().with_default("False"),
//! )?;
//! taxisign.start(Networking::Background, true).await?;
//! ```

pub mod endpoint;
pub mod error;
pub mod settings;
pub mod shutdown;
pub mod signal;
pub mod topic;
pub mod transport;

pub use endpoint::{Endpoint, Networking, Role};
pub use error::{HandlerError, ProtocolError, ProtocolResult, TopicError};
pub use settings::EndpointSettings;
pub use shutdown::shutdown_requested;
pub use signal::{handler_fn, CommandOptions, Echo, InboundSignal, InputOptions, SignalHandler};
pub use topic::{bool_payload, MessageType, Topic, PAYLOAD_FALSE, PAYLOAD_TRUE, PRESENCE};
pub use transport::{create_connector, TransportConfig, TransportError};
