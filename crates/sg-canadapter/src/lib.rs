//! sg-canadapter - CAN to MQTT translation gateway
//!
//! Received CAN frames are decoded and published as `data/<name>/<signal>`,
//! incoming `command/<name>/<signal>` messages are encoded and sent on the
//! bus. A translation table decides which signals travel, under which MQTT
//! names, and how several CAN signals group into one JSON payload.
//!
//! # Example
//!
//! ```ignore
//! use sg_canadapter::{Converter, Gateway, TranslationTable};
//!
//! let converter = Converter::new(bus.clone(), ego.clone(), Some(table))?;
//! let gateway = Gateway::new(endpoint, SignalBus::new(bus, ego, io), converter)?;
//! gateway.start().await?;
//! gateway.run(shutdown).await?;
//! ```

pub mod cli;
pub mod converter;
pub mod error;
pub mod gateway;
pub mod translation;

pub use cli::{build_gateway, Args};
pub use converter::{CommandDefinition, Converter};
pub use error::{AdapterError, AdapterResult};
pub use gateway::{CommandForwarder, Gateway};
pub use translation::{
    AggregateEntry, IndividualEntry, MqttValue, TranslationEntry, TranslationTable, ValueKind,
};
