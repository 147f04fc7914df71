//! Bus description files
//!
//! A description holds one or more buses, each with its frames keyed by id:
//!
//! ```yaml
//! meta:
//!   name: Climate demo
//!   version: "1.0"
//!
//! buses:
//!   Mainbus:
//!     frames:
//!       0x008:
//!         name: VehicleStatus
//!         producers: ["10"]
//!         signals:
//!           vehiclespeed:
//!             start_bit: 7
//!             length: 16
//!             byte_order: big
//!             scale: 0.01
//!             unit: km/h
//! ```

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::definition::{FrameDefinition, SignalDefinition};
use crate::error::{format_frame_id, parse_frame_id, CanError, CanResult, MAX_STANDARD_ID};
use crate::types::FrameDirection;

/// Metadata of a description file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DescriptionMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DescriptionFile {
    #[serde(default)]
    meta: Option<DescriptionMeta>,
    #[serde(default)]
    buses: BTreeMap<String, BusFile>,
}

#[derive(Debug, Deserialize)]
struct BusFile {
    #[serde(default)]
    frames: BTreeMap<String, FrameDefinition>,
}

/// Frames of one bus
#[derive(Debug, Clone, Default)]
pub struct BusDefinition {
    pub name: String,
    frames: BTreeMap<u32, FrameDefinition>,
}

impl BusDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            frames: BTreeMap::new(),
        }
    }

    /// Add a frame, replacing any frame with the same id
    pub fn with_frame(mut self, frame: FrameDefinition) -> Self {
        self.insert(frame);
        self
    }

    pub fn insert(&mut self, frame: FrameDefinition) {
        self.frames.insert(frame.id, frame);
    }

    pub fn frame(&self, id: u32) -> Option<&FrameDefinition> {
        self.frames.get(&id)
    }

    /// Frames in id order
    pub fn frames(&self) -> impl Iterator<Item = &FrameDefinition> {
        self.frames.values()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// First frame (in id order) carrying a signal with this name
    pub fn frame_for_signal(&self, signal: &str) -> Option<&FrameDefinition> {
        self.frames.values().find(|f| f.signals.contains_key(signal))
    }

    pub fn signal(&self, signal: &str) -> Option<&SignalDefinition> {
        self.frame_for_signal(signal).and_then(|f| f.signal(signal))
    }

    pub fn inbound_frame_ids(&self, ego_node_ids: &[String]) -> Vec<u32> {
        self.frame_ids(ego_node_ids, FrameDirection::Inbound)
    }

    pub fn outbound_frame_ids(&self, ego_node_ids: &[String]) -> Vec<u32> {
        self.frame_ids(ego_node_ids, FrameDirection::Outbound)
    }

    fn frame_ids(&self, ego_node_ids: &[String], direction: FrameDirection) -> Vec<u32> {
        self.frames
            .values()
            .filter(|f| f.direction(ego_node_ids) == direction)
            .map(|f| f.id)
            .collect()
    }

    /// Set the receive throttling of every frame not sent by the ego nodes
    pub fn set_throttle_for_inbound(&mut self, ego_node_ids: &[String], throttle_ms: u64) {
        for frame in self.frames.values_mut() {
            if !frame.is_outbound(ego_node_ids) {
                frame.throttle_ms = Some(throttle_ms);
            }
        }
    }

    /// Multi-line overview of the frames and their direction
    pub fn describe(&self, ego_node_ids: &[String]) -> String {
        let mut text = format!(
            "Bus '{}' with {} frames, ego node ids {:?}:\n",
            self.name,
            self.frames.len(),
            ego_node_ids
        );
        for frame in self.frames.values() {
            let _ = writeln!(
                text,
                "  {} {} ({}, dlc {}{})",
                format_frame_id(frame.id),
                frame.name,
                frame.direction(ego_node_ids),
                frame.dlc,
                frame
                    .throttle_ms
                    .map(|ms| format!(", throttle {} ms", ms))
                    .unwrap_or_default()
            );
            for signal in frame.signals.values() {
                let _ = writeln!(
                    text,
                    "      {} start {} length {} {}",
                    signal.name, signal.start_bit, signal.length, signal.byte_order
                );
            }
        }
        text
    }
}

/// Parsed bus description with one or more buses
#[derive(Debug, Clone, Default)]
pub struct BusDescription {
    pub meta: DescriptionMeta,
    buses: BTreeMap<String, BusDefinition>,
}

impl BusDescription {
    /// Load a description from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> CanResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Load a description from a YAML string
    pub fn from_yaml(yaml: &str) -> CanResult<Self> {
        let file: DescriptionFile = serde_yaml::from_str(yaml)?;

        let mut buses = BTreeMap::new();
        for (bus_name, bus_file) in file.buses {
            let mut bus = BusDefinition::new(bus_name.clone());
            for (id_str, mut frame) in bus_file.frames {
                frame.id = parse_frame_id(&id_str)?;
                frame.extended |= frame.id > MAX_STANDARD_ID;
                for (name, signal) in frame.signals.iter_mut() {
                    signal.name = name.clone();
                }
                frame.validate()?;
                bus.insert(frame);
            }
            debug!(bus = %bus_name, frames = bus.len(), "Loaded bus definition");
            buses.insert(bus_name, bus);
        }

        Ok(Self {
            meta: file.meta.unwrap_or_default(),
            buses,
        })
    }

    /// Bus names in alphabetical order
    pub fn bus_names(&self) -> Vec<String> {
        self.buses.keys().cloned().collect()
    }

    /// Pick a bus by name, or the first one alphabetically
    pub fn bus(&self, name: Option<&str>) -> CanResult<BusDefinition> {
        match name {
            Some(name) => self
                .buses
                .get(name)
                .cloned()
                .ok_or_else(|| CanError::UnknownBus(name.to_string())),
            None => self.buses.values().next().cloned().ok_or(CanError::NoBuses),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DESCRIPTION: &str = r#"
meta:
  name: Test
buses:
  Zbus:
    frames:
      1:
        name: Other
  Comfort:
    frames:
      0x008:
        name: VehicleStatus
        producers: ["10"]
        signals:
          vehiclespeed:
            start_bit: 7
            length: 16
            byte_order: big
            scale: 0.01
      7:
        name: AirCondition
        dlc: 1
        producers: ["1"]
        signals:
          acstatus:
            start_bit: 0
            length: 1
      0x18FF0001:
        name: Extended
        signals:
          vehiclespeed:
            start_bit: 0
            length: 8
"#;

    fn ego() -> Vec<String> {
        vec!["1".to_string()]
    }

    #[test]
    fn test_load_description() {
        let description = BusDescription::from_yaml(DESCRIPTION).unwrap();
        assert_eq!(description.meta.name.as_deref(), Some("Test"));
        assert_eq!(description.bus_names(), vec!["Comfort", "Zbus"]);

        let bus = description.bus(None).unwrap();
        assert_eq!(bus.name, "Comfort");
        assert_eq!(bus.len(), 3);

        let frame = bus.frame(8).unwrap();
        assert_eq!(frame.dlc, 8);
        assert_eq!(frame.signal("vehiclespeed").unwrap().name, "vehiclespeed");
        assert!(bus.frame(0x18FF0001).unwrap().extended);
        assert!(!frame.extended);
    }

    #[test]
    fn test_select_bus_by_name() {
        let description = BusDescription::from_yaml(DESCRIPTION).unwrap();
        assert_eq!(description.bus(Some("Zbus")).unwrap().len(), 1);
        assert!(matches!(
            description.bus(Some("Powertrain")),
            Err(CanError::UnknownBus(_))
        ));
        assert!(matches!(
            BusDescription::from_yaml("buses: {}").unwrap().bus(None),
            Err(CanError::NoBuses)
        ));
    }

    #[test]
    fn test_frame_for_signal_uses_lowest_id() {
        let bus = BusDescription::from_yaml(DESCRIPTION)
            .unwrap()
            .bus(Some("Comfort"))
            .unwrap();
        assert_eq!(bus.frame_for_signal("vehiclespeed").unwrap().id, 8);
        assert!(bus.frame_for_signal("unknown").is_none());
    }

    #[test]
    fn test_directions_and_throttling() {
        let mut bus = BusDescription::from_yaml(DESCRIPTION)
            .unwrap()
            .bus(None)
            .unwrap();
        assert_eq!(bus.outbound_frame_ids(&ego()), vec![7]);
        assert_eq!(bus.inbound_frame_ids(&ego()), vec![8, 0x18FF0001]);

        bus.set_throttle_for_inbound(&ego(), 100);
        assert_eq!(bus.frame(8).unwrap().throttle_ms, Some(100));
        assert_eq!(bus.frame(7).unwrap().throttle_ms, None);
        assert!(bus.describe(&ego()).contains("0x008 VehicleStatus (inbound, dlc 8, throttle 100 ms)"));
    }

    #[test]
    fn test_invalid_descriptions() {
        let bad_id = "buses:\n  A:\n    frames:\n      frame8:\n        name: X\n";
        assert!(matches!(
            BusDescription::from_yaml(bad_id),
            Err(CanError::InvalidFrameId(_))
        ));

        let bad_signal = r#"
buses:
  A:
    frames:
      1:
        dlc: 1
        signals:
          wide:
            start_bit: 4
            length: 8
"#;
        assert!(matches!(
            BusDescription::from_yaml(bad_signal),
            Err(CanError::InvalidSignal { .. })
        ));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bus.yaml");
        std::fs::write(&path, DESCRIPTION).unwrap();
        assert_eq!(BusDescription::from_file(&path).unwrap().bus_names().len(), 2);
        assert!(matches!(
            BusDescription::from_file(dir.path().join("missing.yaml")),
            Err(CanError::IoError(_))
        ));
    }
}
