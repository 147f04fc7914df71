//! sg-servicemanager - Availability tracking for the secure gateway
//!
//! Subscribes to `resourceavailable/#`, `commandavailable/#` and
//! `dataavailable/#`. When a resource announces `presence=False` (or its
//! last will does), every command and data signal it had advertised is
//! published as unavailable, retained.

pub mod cli;
pub mod manager;
pub mod registry;

pub use cli::Args;
pub use manager::{AvailabilityHandler, ServiceManager, CLIENT_NAME};
pub use registry::{RegistryUpdate, ServiceRegistry};
