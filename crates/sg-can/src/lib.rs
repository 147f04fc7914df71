//! sg-can - CAN bus descriptions, signal packing and frame I/O
//!
//! This crate provides the bus side of the secure gateway: which frames a
//! bus carries, how signals sit inside them, and raw frame access.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │                 SignalBus                   │
//! │  inbound filter, throttling, send_signals   │
//! │                                             │
//! │  ┌───────────────┐   ┌───────────────────┐  │
//! │  │ BusDefinition │   │ pack / unpack     │  │
//! │  │ (YAML file)   │   │ (bit layouts)     │  │
//! │  └───────────────┘   └───────────────────┘  │
//! │                    │                        │
//! │            ┌───────┴───────┐                │
//! │            │   FrameIo     │                │
//! │            │(SocketCAN/etc)│                │
//! │            └───────────────┘                │
//! └─────────────────────────────────────────────┘
//! ```

pub mod bus;
pub mod config;
pub mod decode;
pub mod definition;
pub mod encode;
pub mod error;
pub mod precision;
pub mod types;

pub use bus::{
    create_frame_io, BusError, CanFrame, FrameIo, FrameIoConfig, SignalBus, SocketCanConfig,
};
pub use config::{BusDefinition, BusDescription, DescriptionMeta};
pub use definition::{FrameDefinition, SignalDefinition};
pub use error::{format_frame_id, parse_frame_id, CanError, CanResult};
pub use precision::round_for_scale;
pub use types::{ByteOrder, FrameDirection, SignalValues};
