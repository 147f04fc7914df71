//! Topic naming
//!
//! Every protocol topic has exactly three segments:
//! `<messagetype>/<servicename>/<signalname>`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TopicError;

/// Segment separator inside a topic
pub const TOPIC_SEPARATOR: char = '/';

/// Number of segments in a valid topic
pub const TOPIC_DEPTH: usize = 3;

/// Multi-level wildcard used for registry subscriptions
pub const WILDCARD_MULTILEVEL: &str = "#";

/// Signal name reserved for `resourceavailable` topics
pub const PRESENCE: &str = "presence";

/// Boolean payloads are sent as these literal strings
pub const PAYLOAD_TRUE: &str = "True";
pub const PAYLOAD_FALSE: &str = "False";

/// Format a boolean the way it travels on the wire
pub fn bool_payload(value: bool) -> &'static str {
    if value {
        PAYLOAD_TRUE
    } else {
        PAYLOAD_FALSE
    }
}

/// The five recognized message-type prefixes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Data,
    Command,
    DataAvailable,
    CommandAvailable,
    ResourceAvailable,
}

impl MessageType {
    pub const ALL: [MessageType; 5] = [
        MessageType::Data,
        MessageType::Command,
        MessageType::DataAvailable,
        MessageType::CommandAvailable,
        MessageType::ResourceAvailable,
    ];

    /// Prefixes carrying availability announcements (always retained)
    pub const AVAILABILITY: [MessageType; 3] = [
        MessageType::ResourceAvailable,
        MessageType::CommandAvailable,
        MessageType::DataAvailable,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Data => "data",
            MessageType::Command => "command",
            MessageType::DataAvailable => "dataavailable",
            MessageType::CommandAvailable => "commandavailable",
            MessageType::ResourceAvailable => "resourceavailable",
        }
    }

    /// Message type an inbound message is echoed back as, if any
    pub fn echo_type(&self) -> Option<MessageType> {
        match self {
            MessageType::Command => Some(MessageType::Data),
            _ => None,
        }
    }

    pub fn is_availability(&self) -> bool {
        Self::AVAILABILITY.contains(self)
    }

    /// Wildcard filter covering every topic with this prefix
    pub fn wildcard_filter(&self) -> String {
        format!("{}{}{}", self.as_str(), TOPIC_SEPARATOR, WILDCARD_MULTILEVEL)
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageType {
    type Err = TopicError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| TopicError::UnknownMessageType(s.to_string()))
    }
}

/// A parsed three-part topic
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Topic {
    message_type: MessageType,
    service: String,
    signal: String,
}

impl Topic {
    /// Build a topic, trimming the names.
    ///
    /// For `resourceavailable` the signal name is always [`PRESENCE`].
    pub fn new(
        message_type: MessageType,
        service: impl AsRef<str>,
        signal: impl AsRef<str>,
    ) -> Result<Self, TopicError> {
        let service = validate_segment("service", service.as_ref())?;
        let signal = if message_type == MessageType::ResourceAvailable {
            PRESENCE.to_string()
        } else {
            validate_segment("signal", signal.as_ref())?
        };
        Ok(Self {
            message_type,
            service,
            signal,
        })
    }

    /// Presence topic of a service
    pub fn presence(service: impl AsRef<str>) -> Result<Self, TopicError> {
        Self::new(MessageType::ResourceAvailable, service, PRESENCE)
    }

    /// Parse `messagetype/servicename/signalname`
    pub fn parse(topic: &str) -> Result<Self, TopicError> {
        let segments: Vec<&str> = topic.trim().split(TOPIC_SEPARATOR).collect();
        if segments.len() != TOPIC_DEPTH {
            return Err(TopicError::WrongDepth {
                topic: topic.to_string(),
                depth: segments.len(),
            });
        }

        let message_type: MessageType = segments[0].parse()?;
        let service = validate_segment("service", segments[1])?;
        let signal = validate_segment("signal", segments[2])?;
        Ok(Self {
            message_type,
            service,
            signal,
        })
    }

    pub fn message_type(&self) -> MessageType {
        self.message_type
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn signal(&self) -> &str {
        &self.signal
    }

    /// Same service and signal under another prefix
    pub fn with_message_type(&self, message_type: MessageType) -> Self {
        let signal = if message_type == MessageType::ResourceAvailable {
            PRESENCE.to_string()
        } else {
            self.signal.clone()
        };
        Self {
            message_type,
            service: self.service.clone(),
            signal,
        }
    }

    /// Topic the echo of an inbound message is published on
    pub fn echo_topic(&self) -> Option<Topic> {
        self.message_type
            .echo_type()
            .map(|message_type| self.with_message_type(message_type))
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{sep}{}{sep}{}",
            self.message_type,
            self.service,
            self.signal,
            sep = TOPIC_SEPARATOR
        )
    }
}

impl FromStr for Topic {
    type Err = TopicError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn validate_segment(kind: &'static str, value: &str) -> Result<String, TopicError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(TopicError::EmptySegment(kind));
    }
    if value.contains(TOPIC_SEPARATOR) || value.contains('#') || value.contains('+') {
        return Err(TopicError::InvalidSegment {
            kind,
            value: value.to_string(),
        });
    }
    Ok(value.to_string())
}

/// Check whether an MQTT-style subscription filter matches a topic
pub fn filter_matches(filter: &str, topic: &str) -> bool {
    let mut filter_parts = filter.split(TOPIC_SEPARATOR);
    let mut topic_parts = topic.split(TOPIC_SEPARATOR);

    loop {
        match (filter_parts.next(), topic_parts.next()) {
            (Some(WILDCARD_MULTILEVEL), _) => return true,
            (Some("+"), Some(_)) => continue,
            (Some(f), Some(t)) if f == t => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}
