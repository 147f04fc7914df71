//! Availability bookkeeping for the resources on the network
//!
//! The registry only sees availability topics. A service becomes online on
//! `presence=True` or on any capability announcement, and its advertised
//! commands and data are remembered until its presence turns `False`. At
//! that point the registry hands back the capability topics that must be
//! retracted, and forgets the service.

use std::collections::{BTreeMap, BTreeSet};

use sg_protocol::{MessageType, Topic, PAYLOAD_FALSE, PAYLOAD_TRUE, PRESENCE};
use tracing::{debug, info, warn};

/// Outcome of one availability message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryUpdate {
    /// The service is (still) online
    Online,
    /// The service went offline. Each topic must be published as `False`.
    Offline(Vec<Topic>),
    /// Nothing changed
    Ignored,
}

#[derive(Debug, Default)]
struct ServiceEntry {
    commands: BTreeSet<String>,
    data: BTreeSet<String>,
}

#[derive(Debug, Default)]
pub struct ServiceRegistry {
    services: BTreeMap<String, ServiceEntry>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Update the registry with a message received on an availability topic
    pub fn apply(&mut self, topic: &Topic, payload: &str) -> RegistryUpdate {
        let service = topic.service();
        let signal = topic.signal();

        match (topic.message_type(), payload) {
            (MessageType::ResourceAvailable, PAYLOAD_TRUE) if signal == PRESENCE => {
                info!(service, "Available resource");
                self.services.entry(service.to_string()).or_default();
                RegistryUpdate::Online
            }
            (MessageType::CommandAvailable, PAYLOAD_TRUE) => {
                info!(service, command = signal, "Available command");
                self.services
                    .entry(service.to_string())
                    .or_default()
                    .commands
                    .insert(signal.to_string());
                RegistryUpdate::Online
            }
            (MessageType::DataAvailable, PAYLOAD_TRUE) => {
                info!(service, data = signal, "Available data");
                self.services
                    .entry(service.to_string())
                    .or_default()
                    .data
                    .insert(signal.to_string());
                RegistryUpdate::Online
            }
            (MessageType::ResourceAvailable, PAYLOAD_FALSE) if signal == PRESENCE => {
                match self.services.remove(service) {
                    Some(entry) => {
                        info!(service, "Resource now offline");
                        RegistryUpdate::Offline(retractions(service, entry))
                    }
                    None => {
                        warn!(
                            topic = %topic,
                            payload,
                            "Message about offline resource, but it was not listed before"
                        );
                        RegistryUpdate::Ignored
                    }
                }
            }
            (MessageType::CommandAvailable | MessageType::DataAvailable, PAYLOAD_FALSE) => {
                debug!(
                    topic = %topic,
                    payload,
                    "Unavailability message for data or command. Probably old from broker"
                );
                RegistryUpdate::Ignored
            }
            _ => {
                warn!(topic = %topic, payload, "Wrong message structure");
                RegistryUpdate::Ignored
            }
        }
    }

    pub fn is_online(&self, service: &str) -> bool {
        self.services.contains_key(service)
    }

    /// Online services, in name order
    pub fn services(&self) -> Vec<String> {
        self.services.keys().cloned().collect()
    }

    pub fn commands(&self, service: &str) -> Vec<String> {
        self.services
            .get(service)
            .map(|entry| entry.commands.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn data(&self, service: &str) -> Vec<String> {
        self.services
            .get(service)
            .map(|entry| entry.data.iter().cloned().collect())
            .unwrap_or_default()
    }
}

fn retractions(service: &str, entry: ServiceEntry) -> Vec<Topic> {
    let commands = entry
        .commands
        .iter()
        .map(|name| (MessageType::CommandAvailable, name));
    let data = entry
        .data
        .iter()
        .map(|name| (MessageType::DataAvailable, name));

    commands
        .chain(data)
        .filter_map(|(message_type, name)| match Topic::new(message_type, service, name) {
            Ok(topic) => Some(topic),
            Err(e) => {
                warn!(service, signal = %name, error = %e, "Cannot build retraction topic");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topic(s: &str) -> Topic {
        Topic::parse(s).unwrap()
    }

    fn topics(list: &[&str]) -> Vec<Topic> {
        list.iter().map(|s| topic(s)).collect()
    }

    #[test]
    fn test_presence_loss_cascade() {
        let mut registry = ServiceRegistry::new();
        registry.apply(&topic("resourceavailable/X/presence"), "True");
        registry.apply(&topic("commandavailable/X/c1"), "True");
        registry.apply(&topic("dataavailable/X/d1"), "True");
        assert_eq!(registry.commands("X"), vec!["c1"]);
        assert_eq!(registry.data("X"), vec!["d1"]);

        let update = registry.apply(&topic("resourceavailable/X/presence"), "False");
        assert_eq!(
            update,
            RegistryUpdate::Offline(topics(&["commandavailable/X/c1", "dataavailable/X/d1"]))
        );
        assert!(!registry.is_online("X"));
        assert!(registry.commands("X").is_empty());
    }

    #[test]
    fn test_capability_implies_online() {
        let mut registry = ServiceRegistry::new();
        assert_eq!(
            registry.apply(&topic("dataavailable/climateservice/vehiclespeed"), "True"),
            RegistryUpdate::Online
        );
        assert!(registry.is_online("climateservice"));
        assert_eq!(registry.services(), vec!["climateservice"]);
    }

    #[test]
    fn test_offline_without_capabilities() {
        let mut registry = ServiceRegistry::new();
        registry.apply(&topic("resourceavailable/X/presence"), "True");
        assert_eq!(
            registry.apply(&topic("resourceavailable/X/presence"), "False"),
            RegistryUpdate::Offline(Vec::new())
        );
    }

    #[test]
    fn test_unknown_service_offline_is_ignored() {
        let mut registry = ServiceRegistry::new();
        assert_eq!(
            registry.apply(&topic("resourceavailable/Y/presence"), "False"),
            RegistryUpdate::Ignored
        );
        assert!(registry.services().is_empty());
    }

    #[test]
    fn test_capability_unavailable_is_ignored() {
        let mut registry = ServiceRegistry::new();
        registry.apply(&topic("commandavailable/X/c1"), "True");
        assert_eq!(
            registry.apply(&topic("commandavailable/X/c1"), "False"),
            RegistryUpdate::Ignored
        );
        assert_eq!(registry.commands("X"), vec!["c1"]);
    }

    #[test]
    fn test_wrong_message_structure() {
        let mut registry = ServiceRegistry::new();
        for (t, payload) in [
            ("resourceavailable/X/presence", "maybe"),
            ("resourceavailable/X/battery", "True"),
            ("dataavailable/X/d1", "1"),
            ("data/X/d1", "True"),
        ] {
            assert_eq!(registry.apply(&topic(t), payload), RegistryUpdate::Ignored, "{}", t);
        }
        assert!(registry.services().is_empty());
    }

    #[test]
    fn test_back_online_starts_fresh() {
        let mut registry = ServiceRegistry::new();
        registry.apply(&topic("commandavailable/X/c1"), "True");
        registry.apply(&topic("resourceavailable/X/presence"), "False");
        registry.apply(&topic("resourceavailable/X/presence"), "True");
        registry.apply(&topic("commandavailable/X/c2"), "True");

        assert_eq!(
            registry.apply(&topic("resourceavailable/X/presence"), "False"),
            RegistryUpdate::Offline(topics(&["commandavailable/X/c2"]))
        );
    }
}
