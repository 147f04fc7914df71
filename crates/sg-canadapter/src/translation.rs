//! Translation table between CAN signal names and MQTT signal names
//!
//! The table is a JSON file:
//!
//! ```json
//! {
//!   "entities": {
//!     "signals": [
//!       {"canName": "indoortemperature", "mqttName": "actualindoortemperature"},
//!       {"canName": "acstatus", "mqttName": "aircondition", "mqttType": "int",
//!        "toCan": "True", "fromCan": "False", "mqttEcho": "True"}
//!     ],
//!     "aggregates": [
//!       {"mqttName": "ADAS_Posn_2", "signals": [
//!         {"canName": "ADAS_Posn_PosProbb"},
//!         {"canName": "ADAS_Posn_CurLane", "mqttType": "int"}
//!       ]}
//!     ]
//!   }
//! }
//! ```
//!
//! Aggregates travel on MQTT as `{"values": {"<mqttName>": <value>, ...}}`.

use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;

use serde::Deserialize;
use serde_json::Value;
use sg_can::BusDefinition;
use tracing::info;

use crate::error::{AdapterError, AdapterResult};

/// Key of the sub-signal object in an aggregate payload
pub const AGGREGATE_VALUES_KEY: &str = "values";

/// Type a value is cast to before it goes out on MQTT
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ValueKind {
    #[default]
    Float,
    /// Truncated towards zero
    Int,
}

impl ValueKind {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "float" => Some(ValueKind::Float),
            "int" => Some(ValueKind::Int),
            _ => None,
        }
    }

    pub fn cast(self, value: f64) -> MqttValue {
        match self {
            ValueKind::Float => MqttValue::Float(value),
            ValueKind::Int => MqttValue::Int(value.trunc() as i64),
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ValueKind::Float => "float",
            ValueKind::Int => "int",
        })
    }
}

/// A value on its way to MQTT
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MqttValue {
    Float(f64),
    Int(i64),
}

impl MqttValue {
    pub fn to_json(self) -> Value {
        match self {
            MqttValue::Float(value) => Value::from(value),
            MqttValue::Int(value) => Value::from(value),
        }
    }
}

impl fmt::Display for MqttValue {
    /// Floats always carry a decimal point, so `7.0` and not `7`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MqttValue::Float(value) if value.is_finite() && value.fract() == 0.0 => {
                write!(f, "{:.1}", value)
            }
            MqttValue::Float(value) => write!(f, "{}", value),
            MqttValue::Int(value) => write!(f, "{}", value),
        }
    }
}

/// One CAN signal mapped to one MQTT signal
#[derive(Debug, Clone, PartialEq)]
pub struct IndividualEntry {
    pub can_name: String,
    pub mqtt_name: String,
    /// MQTT value = CAN value * multiplier. Never zero.
    pub multiplier: f64,
    pub value_kind: ValueKind,
    pub send_to_bus: bool,
    pub receive_from_bus: bool,
    pub echo: bool,
}

impl IndividualEntry {
    /// Received from the bus under the same name, never sent
    pub fn new(can_name: impl Into<String>) -> Self {
        let can_name = can_name.into();
        Self {
            mqtt_name: can_name.clone(),
            can_name,
            multiplier: 1.0,
            value_kind: ValueKind::Float,
            send_to_bus: false,
            receive_from_bus: true,
            echo: false,
        }
    }

    pub fn to_mqtt(&self, bus_value: f64) -> MqttValue {
        self.value_kind.cast(bus_value * self.multiplier)
    }

    pub fn to_bus(&self, mqtt_value: f64) -> f64 {
        mqtt_value / self.multiplier
    }
}

impl fmt::Display for IndividualEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "canName={} mqttName={} toCan={} fromCan={} mqttEcho={} mqttType={} canMultiplier={}",
            self.can_name,
            self.mqtt_name,
            self.send_to_bus,
            self.receive_from_bus,
            self.echo,
            self.value_kind,
            self.multiplier
        )
    }
}

/// Several CAN signals of one frame mapped to one structured MQTT signal
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateEntry {
    pub mqtt_name: String,
    pub send_to_bus: bool,
    pub receive_from_bus: bool,
    pub echo: bool,
    pub signals: Vec<IndividualEntry>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TranslationEntry {
    Individual(IndividualEntry),
    Aggregate(AggregateEntry),
}

impl TranslationEntry {
    pub fn mqtt_name(&self) -> &str {
        match self {
            TranslationEntry::Individual(entry) => &entry.mqtt_name,
            TranslationEntry::Aggregate(entry) => &entry.mqtt_name,
        }
    }

    pub fn send_to_bus(&self) -> bool {
        match self {
            TranslationEntry::Individual(entry) => entry.send_to_bus,
            TranslationEntry::Aggregate(entry) => entry.send_to_bus,
        }
    }

    pub fn receive_from_bus(&self) -> bool {
        match self {
            TranslationEntry::Individual(entry) => entry.receive_from_bus,
            TranslationEntry::Aggregate(entry) => entry.receive_from_bus,
        }
    }

    pub fn echo(&self) -> bool {
        match self {
            TranslationEntry::Individual(entry) => entry.echo,
            TranslationEntry::Aggregate(entry) => entry.echo,
        }
    }

    /// CAN signal names the entry reads or writes
    pub fn can_names(&self) -> Vec<&str> {
        match self {
            TranslationEntry::Individual(entry) => vec![entry.can_name.as_str()],
            TranslationEntry::Aggregate(entry) => {
                entry.signals.iter().map(|s| s.can_name.as_str()).collect()
            }
        }
    }
}

impl fmt::Display for TranslationEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TranslationEntry::Individual(entry) => write!(f, "Individual {}", entry),
            TranslationEntry::Aggregate(entry) => {
                write!(
                    f,
                    "Aggregate mqttName={} toCan={} fromCan={} mqttEcho={} with {} signals:",
                    entry.mqtt_name,
                    entry.send_to_bus,
                    entry.receive_from_bus,
                    entry.echo,
                    entry.signals.len()
                )?;
                for signal in &entry.signals {
                    write!(f, "\n  {}", signal)?;
                }
                Ok(())
            }
        }
    }
}

// JSON layout. Flags and multipliers stay loosely typed: both native values
// and strings occur in existing files.

#[derive(Debug, Deserialize)]
struct TranslationFile {
    entities: Option<EntitiesJson>,
}

#[derive(Debug, Default, Deserialize)]
struct EntitiesJson {
    #[serde(default)]
    signals: Vec<SignalJson>,
    #[serde(default)]
    aggregates: Vec<AggregateJson>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignalJson {
    can_name: Option<String>,
    mqtt_name: Option<String>,
    can_multiplier: Option<Value>,
    mqtt_type: Option<String>,
    to_can: Option<Value>,
    from_can: Option<Value>,
    mqtt_echo: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AggregateJson {
    mqtt_name: Option<String>,
    signals: Option<Vec<SignalJson>>,
    to_can: Option<Value>,
    from_can: Option<Value>,
    mqtt_echo: Option<Value>,
}

/// Parsed translation table, individual entries first
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TranslationTable {
    entries: Vec<TranslationEntry>,
}

impl TranslationTable {
    pub fn new(entries: Vec<TranslationEntry>) -> Self {
        Self { entries }
    }

    /// Load a table from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> AdapterResult<Self> {
        let path = path.as_ref();
        info!(file = %path.display(), "Reading translation file");
        let content = std::fs::read_to_string(path).map_err(|e| {
            AdapterError::Configuration(format!(
                "cannot read translation file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_json(&content).map_err(|e| match e {
            AdapterError::Configuration(reason) => {
                AdapterError::Configuration(format!("{} (file {})", reason, path.display()))
            }
            other => other,
        })
    }

    /// Load a table from a JSON string
    pub fn from_json(json: &str) -> AdapterResult<Self> {
        let file: TranslationFile = serde_json::from_str(json).map_err(|e| {
            AdapterError::Configuration(format!("invalid translation table JSON: {}", e))
        })?;
        let entities = file.entities.ok_or_else(|| {
            AdapterError::Configuration(
                "there must be an 'entities' object at the top of the translation table"
                    .to_string(),
            )
        })?;

        let mut entries = Vec::with_capacity(entities.signals.len() + entities.aggregates.len());
        for raw in &entities.signals {
            entries.push(TranslationEntry::Individual(parse_signal(raw)?));
        }
        for raw in &entities.aggregates {
            entries.push(TranslationEntry::Aggregate(parse_aggregate(raw)?));
        }
        Ok(Self { entries })
    }

    /// One entry per signal of every frame the ego nodes receive, names kept
    pub fn listen_to_all(bus: &BusDefinition, ego_node_ids: &[String]) -> Self {
        let entries = bus
            .frames()
            .filter(|frame| !frame.is_outbound(ego_node_ids))
            .flat_map(|frame| frame.signals.keys())
            .map(|name| TranslationEntry::Individual(IndividualEntry::new(name.clone())))
            .collect();
        Self { entries }
    }

    pub fn entries(&self) -> &[TranslationEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl IntoIterator for TranslationTable {
    type Item = TranslationEntry;
    type IntoIter = std::vec::IntoIter<TranslationEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

fn parse_signal(raw: &SignalJson) -> AdapterResult<IndividualEntry> {
    let can_name = raw.can_name.clone().ok_or_else(|| {
        AdapterError::Configuration("each signal must have the 'canName' key".to_string())
    })?;
    let value_kind = match raw.mqtt_type.as_deref() {
        None => ValueKind::Float,
        Some(name) => ValueKind::parse(name).ok_or_else(|| {
            AdapterError::Configuration(format!(
                "wrong mqttType '{}' for signal '{}', expected 'float' or 'int'",
                name, can_name
            ))
        })?,
    };

    Ok(IndividualEntry {
        mqtt_name: raw.mqtt_name.clone().unwrap_or_else(|| can_name.clone()),
        multiplier: parse_multiplier(raw.can_multiplier.as_ref(), &can_name)?,
        value_kind,
        send_to_bus: flag(raw.to_can.as_ref(), "toCan", false)?,
        receive_from_bus: flag(raw.from_can.as_ref(), "fromCan", true)?,
        echo: flag(raw.mqtt_echo.as_ref(), "mqttEcho", false)?,
        can_name,
    })
}

fn parse_aggregate(raw: &AggregateJson) -> AdapterResult<AggregateEntry> {
    let mqtt_name = raw.mqtt_name.clone().ok_or_else(|| {
        AdapterError::Configuration("each aggregate must have the 'mqttName' key".to_string())
    })?;
    let signals = raw.signals.as_ref().ok_or_else(|| {
        AdapterError::Configuration(format!(
            "aggregate '{}' is missing its 'signals' list",
            mqtt_name
        ))
    })?;

    let signals = signals
        .iter()
        .map(parse_signal)
        .collect::<AdapterResult<Vec<_>>>()?;
    let mut names = BTreeSet::new();
    if let Some(duplicate) = signals.iter().find(|s| !names.insert(s.mqtt_name.as_str())) {
        return Err(AdapterError::Configuration(format!(
            "aggregate '{}' has more than one value named '{}'",
            mqtt_name, duplicate.mqtt_name
        )));
    }

    Ok(AggregateEntry {
        signals,
        send_to_bus: flag(raw.to_can.as_ref(), "toCan", false)?,
        receive_from_bus: flag(raw.from_can.as_ref(), "fromCan", true)?,
        echo: flag(raw.mqtt_echo.as_ref(), "mqttEcho", false)?,
        mqtt_name,
    })
}

fn parse_multiplier(value: Option<&Value>, can_name: &str) -> AdapterResult<f64> {
    let multiplier = match value {
        None => 1.0,
        Some(Value::Number(number)) => number.as_f64().unwrap_or(f64::NAN),
        Some(Value::String(text)) => text.trim().parse::<f64>().unwrap_or(f64::NAN),
        Some(_) => f64::NAN,
    };
    if !multiplier.is_finite() {
        return Err(AdapterError::Configuration(format!(
            "'canMultiplier' of signal '{}' must be numerical",
            can_name
        )));
    }
    if multiplier == 0.0 {
        return Err(AdapterError::Configuration(format!(
            "'canMultiplier' of signal '{}' must not be zero",
            can_name
        )));
    }
    Ok(multiplier)
}

/// Boolean flag given natively or as a string; only "true" (any case) is true
fn flag(value: Option<&Value>, key: &str, default: bool) -> AdapterResult<bool> {
    match value {
        None => Ok(default),
        Some(Value::Bool(b)) => Ok(*b),
        Some(Value::String(text)) => Ok(text.trim().eq_ignore_ascii_case("true")),
        Some(other) => Err(AdapterError::Configuration(format!(
            "'{}' must be a boolean or a string, got {}",
            key, other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_individual_signal() {
        let table = TranslationTable::from_json(
            r#"{"entities": {"signals": [
                {"canName": "acstatus", "mqttName": "aircondition", "mqttType": "int",
                 "toCan": "True", "fromCan": false, "mqttEcho": "true", "canMultiplier": "2.5"}
            ]}}"#,
        )
        .unwrap();

        assert_eq!(
            table.entries(),
            &[TranslationEntry::Individual(IndividualEntry {
                can_name: "acstatus".to_string(),
                mqtt_name: "aircondition".to_string(),
                multiplier: 2.5,
                value_kind: ValueKind::Int,
                send_to_bus: true,
                receive_from_bus: false,
                echo: true,
            })]
        );
    }

    #[test]
    fn test_signal_defaults() {
        let table =
            TranslationTable::from_json(r#"{"entities": {"signals": [{"canName": "x"}]}}"#)
                .unwrap();
        assert_eq!(
            table.entries(),
            &[TranslationEntry::Individual(IndividualEntry::new("x"))]
        );
    }

    #[test]
    fn test_parse_aggregate() {
        let table = TranslationTable::from_json(
            r#"{"entities": {"aggregates": [
                {"mqttName": "ADAS_Seg", "toCan": "True", "fromCan": "False", "mqttEcho": "True",
                 "signals": [{"canName": "ADAS_Seg_MsgType"}, {"canName": "ADAS_Seg_Offset"}]}
            ]}}"#,
        )
        .unwrap();

        let TranslationEntry::Aggregate(aggregate) = &table.entries()[0] else {
            panic!("expected an aggregate");
        };
        assert_eq!(aggregate.mqtt_name, "ADAS_Seg");
        assert!(aggregate.send_to_bus);
        assert!(!aggregate.receive_from_bus);
        assert!(aggregate.echo);
        assert_eq!(
            table.entries()[0].can_names(),
            vec!["ADAS_Seg_MsgType", "ADAS_Seg_Offset"]
        );
    }

    #[test]
    fn test_zero_and_invalid_multipliers_are_rejected() {
        for multiplier in ["0", "\"0\"", "0.0", "\"abc\"", "[]"] {
            let json = format!(
                r#"{{"entities": {{"signals": [{{"canName": "x", "canMultiplier": {}}}]}}}}"#,
                multiplier
            );
            assert!(
                matches!(
                    TranslationTable::from_json(&json),
                    Err(AdapterError::Configuration(_))
                ),
                "multiplier {} accepted",
                multiplier
            );
        }
    }

    #[test]
    fn test_malformed_tables() {
        for json in [
            "not json",
            r#"{"signals": []}"#,
            r#"{"entities": {"signals": {"canName": "x"}}}"#,
            r#"{"entities": {"signals": [{"mqttName": "x"}]}}"#,
            r#"{"entities": {"signals": [{"canName": "x", "mqttType": "string"}]}}"#,
            r#"{"entities": {"signals": [{"canName": "x", "toCan": 1}]}}"#,
            r#"{"entities": {"aggregates": [{"signals": []}]}}"#,
            r#"{"entities": {"aggregates": [{"mqttName": "a"}]}}"#,
            r#"{"entities": {"aggregates": [{"mqttName": "a", "signals": [
                {"canName": "x", "mqttName": "v"}, {"canName": "y", "mqttName": "v"}
            ]}]}}"#,
        ] {
            assert!(
                matches!(
                    TranslationTable::from_json(json),
                    Err(AdapterError::Configuration(_))
                ),
                "accepted: {}",
                json
            );
        }
    }

    #[test]
    fn test_flag_values() {
        assert!(flag(Some(&Value::from("TRUE")), "toCan", false).unwrap());
        assert!(!flag(Some(&Value::from("yes")), "toCan", true).unwrap());
        assert!(flag(None, "fromCan", true).unwrap());
    }

    #[test]
    fn test_value_kinds() {
        assert_eq!(ValueKind::Int.cast(7.9), MqttValue::Int(7));
        assert_eq!(ValueKind::Int.cast(-1.5), MqttValue::Int(-1));
        assert_eq!(MqttValue::Float(31.7).to_string(), "31.7");
        assert_eq!(MqttValue::Float(1924.0).to_string(), "1924.0");
        assert_eq!(MqttValue::Int(1).to_string(), "1");
        assert_eq!(MqttValue::Float(817.0).to_json(), serde_json::json!(817.0));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("signals.json");
        std::fs::write(&path, r#"{"entities": {"signals": [{"canName": "x"}]}}"#).unwrap();
        assert_eq!(TranslationTable::from_file(&path).unwrap().len(), 1);

        let error = TranslationTable::from_file(dir.path().join("missing.json")).unwrap_err();
        assert!(error.to_string().contains("missing.json"));
    }
}
