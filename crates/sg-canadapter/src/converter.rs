//! Conversion between CAN frames and MQTT messages
//!
//! The converter holds no message state. It indexes the translation table
//! twice:
//! - by MQTT name, for commands that end up as CAN signals (only entries
//!   whose frame the ego nodes send)
//! - by frame id, for frames that end up as MQTT data (only entries whose
//!   frame the ego nodes receive)

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde_json::{Map, Value};
use sg_can::{format_frame_id, BusDefinition, CanFrame, SignalValues};
use tracing::{debug, error};

use crate::error::{AdapterError, AdapterResult};
use crate::translation::{
    AggregateEntry, IndividualEntry, TranslationEntry, TranslationTable, AGGREGATE_VALUES_KEY,
};

/// Arguments for registering one incoming command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandDefinition {
    pub signal: String,
    pub echo: bool,
}

#[derive(Debug, Clone)]
struct ResolvedEntry {
    entry: TranslationEntry,
    frame_id: u32,
}

/// Translates in both directions for one bus and one set of ego node ids
#[derive(Debug)]
pub struct Converter {
    bus: BusDefinition,
    ego_node_ids: Vec<String>,
    /// MQTT command name -> entry
    to_bus: BTreeMap<String, ResolvedEntry>,
    /// Frame id -> entries, in table order
    from_bus: BTreeMap<u32, Vec<ResolvedEntry>>,
}

impl Converter {
    /// Build a converter.
    ///
    /// Without a table every signal of every received frame is forwarded
    /// under its own name.
    pub fn new(
        bus: BusDefinition,
        ego_node_ids: Vec<String>,
        table: Option<TranslationTable>,
    ) -> AdapterResult<Self> {
        let table = match table {
            Some(table) => table,
            None => {
                let table = TranslationTable::listen_to_all(&bus, &ego_node_ids);
                if table.is_empty() {
                    return Err(AdapterError::Configuration(format!(
                        "no CAN signals defined for incoming frames of bus '{}'",
                        bus.name
                    )));
                }
                table
            }
        };

        let mut to_bus = BTreeMap::new();
        let mut from_bus: BTreeMap<u32, Vec<ResolvedEntry>> = BTreeMap::new();

        for entry in table {
            let frame_id = resolve_frame_id(&bus, &entry)?;
            let outbound = bus
                .frame(frame_id)
                .map(|frame| frame.is_outbound(&ego_node_ids))
                .unwrap_or(false);
            let resolved = ResolvedEntry { entry, frame_id };

            if resolved.entry.send_to_bus() {
                if outbound {
                    match to_bus.entry(resolved.entry.mqtt_name().to_string()) {
                        Entry::Occupied(slot) => {
                            return Err(AdapterError::Configuration(format!(
                                "MQTT command '{}' is defined more than once in the translation table",
                                slot.key()
                            )));
                        }
                        Entry::Vacant(slot) => {
                            slot.insert(resolved.clone());
                        }
                    }
                } else {
                    error!(
                        signal = resolved.entry.mqtt_name(),
                        frame = %format_frame_id(frame_id),
                        ego = ?ego_node_ids,
                        "An incoming MQTT command would be sent on a CAN frame that is not outbound for the ego nodes"
                    );
                }
            }

            if resolved.entry.receive_from_bus() {
                if !outbound {
                    from_bus.entry(frame_id).or_default().push(resolved);
                } else {
                    error!(
                        signal = resolved.entry.mqtt_name(),
                        frame = %format_frame_id(frame_id),
                        ego = ?ego_node_ids,
                        "An outgoing MQTT message would take its data from a CAN frame that is not inbound for the ego nodes"
                    );
                }
            }
        }

        let converter = Self {
            bus,
            ego_node_ids,
            to_bus,
            from_bus,
        };
        debug!("{}", converter);
        Ok(converter)
    }

    pub fn definition(&self) -> &BusDefinition {
        &self.bus
    }

    pub fn ego_node_ids(&self) -> &[String] {
        &self.ego_node_ids
    }

    /// Decode a frame and translate it to `(mqtt signal, payload)` pairs
    pub fn frame_to_mqtt(&self, frame: &CanFrame) -> AdapterResult<Vec<(String, String)>> {
        let definition = self.bus.frame(frame.id).ok_or_else(|| {
            AdapterError::Translation(format!("frame {} is not defined", format_frame_id(frame.id)))
        })?;
        let values = definition
            .unpack(&frame.data)
            .map_err(|e| AdapterError::Translation(format!("frame {}: {}", frame, e)))?;
        self.signals_to_mqtt(frame.id, &values)
    }

    /// Translate decoded signal values of one frame
    pub fn signals_to_mqtt(
        &self,
        frame_id: u32,
        values: &SignalValues,
    ) -> AdapterResult<Vec<(String, String)>> {
        let Some(entries) = self.from_bus.get(&frame_id) else {
            return Ok(Vec::new());
        };

        entries
            .iter()
            .map(|resolved| match &resolved.entry {
                TranslationEntry::Individual(entry) => {
                    let value = bus_value(values, entry, frame_id)?;
                    Ok((entry.mqtt_name.clone(), entry.to_mqtt(value).to_string()))
                }
                TranslationEntry::Aggregate(entry) => {
                    Ok((entry.mqtt_name.clone(), aggregate_payload(entry, values, frame_id)?))
                }
            })
            .collect()
    }

    /// Translate an MQTT command to CAN signal values.
    ///
    /// Unknown command names give an empty map.
    pub fn mqtt_to_bus_signals(&self, signal: &str, payload: &str) -> AdapterResult<SignalValues> {
        let mut values = SignalValues::new();
        let Some(resolved) = self.to_bus.get(signal) else {
            debug!(signal, "No CAN translation for command");
            return Ok(values);
        };

        match &resolved.entry {
            TranslationEntry::Individual(entry) => {
                let value = payload.trim().parse::<f64>().map_err(|_| {
                    AdapterError::Translation(format!(
                        "command '{}' payload is not numerical: '{}'",
                        signal, payload
                    ))
                })?;
                values.insert(entry.can_name.clone(), entry.to_bus(value));
            }
            TranslationEntry::Aggregate(entry) => {
                let json: Value = serde_json::from_str(payload).map_err(|e| {
                    AdapterError::Translation(format!(
                        "command '{}' payload is not valid JSON: {}",
                        signal, e
                    ))
                })?;
                for sub in &entry.signals {
                    let value = json
                        .get(AGGREGATE_VALUES_KEY)
                        .and_then(|v| v.get(&sub.mqtt_name))
                        .and_then(json_number)
                        .ok_or_else(|| {
                            AdapterError::Translation(format!(
                                "command '{}' has no numerical value for '{}'",
                                signal, sub.mqtt_name
                            ))
                        })?;
                    values.insert(sub.can_name.clone(), sub.to_bus(value));
                }
            }
        }
        Ok(values)
    }

    /// Commands to register on the resource, in name order
    pub fn incoming_command_definitions(&self) -> Vec<CommandDefinition> {
        self.to_bus
            .values()
            .map(|resolved| CommandDefinition {
                signal: resolved.entry.mqtt_name().to_string(),
                echo: resolved.entry.echo(),
            })
            .collect()
    }

    /// Data signals to register on the resource, in name order
    pub fn outgoing_data_definitions(&self) -> Vec<String> {
        self.from_bus
            .values()
            .flatten()
            .map(|resolved| resolved.entry.mqtt_name().to_string())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Multi-line summary of the translations in use
    pub fn describe(&self) -> String {
        let used_inbound: BTreeSet<u32> = self.from_bus.keys().copied().collect();
        let used_outbound: BTreeSet<u32> = self.to_bus.values().map(|r| r.frame_id).collect();
        let commands: Vec<String> = self.to_bus.keys().cloned().collect();

        let mut text = format!("{} Summary:\n", self);
        text.push_str(&format!(
            "  Using incoming CAN frame ids: {}. All incoming CAN frame ids for this node: {}\n",
            frame_list(used_inbound.iter().copied()),
            frame_list(self.bus.inbound_frame_ids(&self.ego_node_ids))
        ));
        text.push_str(&format!(
            "    Outgoing MQTT data names: {:?}\n",
            self.outgoing_data_definitions()
        ));
        text.push_str(&format!("  Incoming MQTT command names: {:?}\n", commands));
        text.push_str(&format!(
            "    Using outgoing CAN frame ids: {}. All outgoing CAN frame ids for this node: {}\n",
            frame_list(used_outbound.iter().copied()),
            frame_list(self.bus.outbound_frame_ids(&self.ego_node_ids))
        ));
        text.push_str("  Details:\n");

        let mut details: Vec<&ResolvedEntry> = self
            .from_bus
            .values()
            .flatten()
            .chain(self.to_bus.values())
            .collect();
        details.sort_by(|a, b| {
            (a.frame_id, a.entry.mqtt_name()).cmp(&(b.frame_id, b.entry.mqtt_name()))
        });
        details.dedup_by(|a, b| a.frame_id == b.frame_id && a.entry == b.entry);
        for resolved in details {
            for line in resolved.entry.to_string().lines() {
                text.push_str(&format!(
                    "    {} {}\n",
                    format_frame_id(resolved.frame_id),
                    line
                ));
            }
        }
        text.trim_end().to_string()
    }
}

impl fmt::Display for Converter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Converter with {} incoming CAN frames and {} incoming MQTT commands. Ego node ids {:?}.",
            self.from_bus.len(),
            self.to_bus.len(),
            self.ego_node_ids
        )
    }
}

fn resolve_frame_id(bus: &BusDefinition, entry: &TranslationEntry) -> AdapterResult<u32> {
    let mut frame_ids = BTreeSet::new();
    for can_name in entry.can_names() {
        let frame = bus.frame_for_signal(can_name).ok_or_else(|| {
            AdapterError::Configuration(format!(
                "signal '{}' was not found in bus '{}'",
                can_name, bus.name
            ))
        })?;
        frame_ids.insert(frame.id);
    }

    match (frame_ids.len(), frame_ids.first()) {
        (1, Some(&frame_id)) => Ok(frame_id),
        _ => Err(AdapterError::Configuration(format!(
            "aggregate '{}' has signals from several (or no) CAN frames: [{}]",
            entry.mqtt_name(),
            frame_list(frame_ids.iter().copied())
        ))),
    }
}

fn bus_value(values: &SignalValues, entry: &IndividualEntry, frame_id: u32) -> AdapterResult<f64> {
    values.get(&entry.can_name).copied().ok_or_else(|| {
        AdapterError::Translation(format!(
            "signal '{}' missing from frame {}",
            entry.can_name,
            format_frame_id(frame_id)
        ))
    })
}

fn aggregate_payload(
    entry: &AggregateEntry,
    values: &SignalValues,
    frame_id: u32,
) -> AdapterResult<String> {
    let mut sub_values = Map::new();
    for sub in &entry.signals {
        let value = bus_value(values, sub, frame_id)?;
        sub_values.insert(sub.mqtt_name.clone(), sub.to_mqtt(value).to_json());
    }
    let mut payload = Map::new();
    payload.insert(AGGREGATE_VALUES_KEY.to_string(), Value::Object(sub_values));
    serde_json::to_string(&Value::Object(payload))
        .map_err(|e| AdapterError::Translation(format!("cannot serialize '{}': {}", entry.mqtt_name, e)))
}

fn json_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

fn frame_list(ids: impl IntoIterator<Item = u32>) -> String {
    ids.into_iter()
        .map(format_frame_id)
        .collect::<Vec<_>>()
        .join(", ")
}
