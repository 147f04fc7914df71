//! Converter tests against the sample configuration files

use pretty_assertions::assert_eq;
use serde_json::Value;
use sg_can::{BusDefinition, BusDescription, CanFrame, SignalValues};
use sg_canadapter::{AdapterError, CommandDefinition, Converter, TranslationTable};

const CLIMATE_BUS: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/config/climateservice_bus.yaml");
const CLIMATE_SIGNALS: &str = concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/config/climateservice_signals.json"
);
const ADASIS_BUS: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/config/adasis_bus.yaml");
const ADASIS_SIGNALS: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/config/adasis_signals.json");

// =============================================================================
// Helpers
// =============================================================================

fn ego(ids: &[&str]) -> Vec<String> {
    ids.iter().map(|s| s.to_string()).collect()
}

fn load_bus(path: &str) -> BusDefinition {
    BusDescription::from_file(path).unwrap().bus(None).unwrap()
}

fn load_converter(bus: &str, signals: &str, ego_ids: &[&str]) -> Converter {
    let table = TranslationTable::from_file(signals).unwrap();
    Converter::new(load_bus(bus), ego(ego_ids), Some(table)).unwrap()
}

fn sorted(mut messages: Vec<(String, String)>) -> Vec<(String, String)> {
    messages.sort();
    messages
}

fn json(payload: &str) -> Value {
    serde_json::from_str(payload).unwrap()
}

// =============================================================================
// Individual signals
// =============================================================================

#[test]
fn test_climate_definitions() {
    let converter = load_converter(CLIMATE_BUS, CLIMATE_SIGNALS, &["1"]);

    assert_eq!(
        converter.incoming_command_definitions(),
        vec![CommandDefinition {
            signal: "aircondition".to_string(),
            echo: true,
        }]
    );
    assert_eq!(
        converter.outgoing_data_definitions(),
        vec!["actualindoortemperature", "enginespeed", "vehiclespeed"]
    );
}

#[test]
fn test_command_to_can() {
    let converter = load_converter(CLIMATE_BUS, CLIMATE_SIGNALS, &["1"]);

    let signals = converter.mqtt_to_bus_signals("aircondition", "0").unwrap();
    assert_eq!(signals, SignalValues::from([("acstatus".to_string(), 0.0)]));

    let signals = converter.mqtt_to_bus_signals("aircondition", "1").unwrap();
    assert_eq!(signals, SignalValues::from([("acstatus".to_string(), 1.0)]));
}

#[test]
fn test_indoor_temperature_frame() {
    let converter = load_converter(CLIMATE_BUS, CLIMATE_SIGNALS, &["1"]);
    let frame = CanFrame::new(9, vec![0x03, 0x31, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]);

    assert_eq!(
        converter.frame_to_mqtt(&frame).unwrap(),
        vec![("actualindoortemperature".to_string(), "31.7".to_string())]
    );
}

#[test]
fn test_vehicle_status_frame() {
    let converter = load_converter(CLIMATE_BUS, CLIMATE_SIGNALS, &["1"]);
    let frame = CanFrame::new(8, vec![0x14, 0xAD, 0x1E, 0x10, 0x00, 0x00, 0x00, 0x00]);

    assert_eq!(
        sorted(converter.frame_to_mqtt(&frame).unwrap()),
        vec![
            ("enginespeed".to_string(), "1924.0".to_string()),
            ("vehiclespeed".to_string(), "52.93".to_string()),
        ]
    );
}

#[test]
fn test_command_for_frame_of_other_node_is_excluded() {
    // Heater frame is produced by node 2 only
    let converter = load_converter(CLIMATE_BUS, CLIMATE_SIGNALS, &["1"]);
    let commands = converter.incoming_command_definitions();
    assert!(commands.iter().all(|c| c.signal != "heater"));
    assert!(converter
        .mqtt_to_bus_signals("heater", "1")
        .unwrap()
        .is_empty());

    let converter = load_converter(CLIMATE_BUS, CLIMATE_SIGNALS, &["2"]);
    assert_eq!(
        converter.incoming_command_definitions(),
        vec![CommandDefinition {
            signal: "heater".to_string(),
            echo: false,
        }]
    );
}

#[test]
fn test_frames_sent_by_ego_are_not_translated() {
    let converter = load_converter(CLIMATE_BUS, CLIMATE_SIGNALS, &["1", "10"]);
    assert!(converter.outgoing_data_definitions().is_empty());
    let frame = CanFrame::new(9, vec![0x03, 0x31, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]);
    assert!(converter.frame_to_mqtt(&frame).unwrap().is_empty());
}

#[test]
fn test_multiplier() {
    let table = TranslationTable::from_json(
        r#"{"entities": {"signals": [
            {"canName": "vehiclespeed", "mqttName": "speed_mps", "canMultiplier": 0.5}
        ]}}"#,
    )
    .unwrap();
    let converter = Converter::new(load_bus(CLIMATE_BUS), ego(&["1"]), Some(table)).unwrap();
    let frame = CanFrame::new(8, vec![0x27, 0x10, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]);

    assert_eq!(
        converter.frame_to_mqtt(&frame).unwrap(),
        vec![("speed_mps".to_string(), "50.0".to_string())]
    );
}

#[test]
fn test_zero_multiplier_is_rejected() {
    let result = TranslationTable::from_json(
        r#"{"entities": {"signals": [{"canName": "vehiclespeed", "canMultiplier": 0}]}}"#,
    );
    assert!(matches!(result, Err(AdapterError::Configuration(_))));
}

#[test]
fn test_aggregate_spanning_frames_is_rejected() {
    let table = TranslationTable::from_json(
        r#"{"entities": {"aggregates": [
            {"mqttName": "mixed", "signals": [
                {"canName": "vehiclespeed"},
                {"canName": "indoortemperature"}
            ]}
        ]}}"#,
    )
    .unwrap();
    let result = Converter::new(load_bus(CLIMATE_BUS), ego(&["1"]), Some(table));
    assert!(matches!(result, Err(AdapterError::Configuration(_))));
}

#[test]
fn test_empty_aggregate_is_rejected() {
    let table = TranslationTable::from_json(
        r#"{"entities": {"aggregates": [{"mqttName": "nothing", "signals": []}]}}"#,
    )
    .unwrap();
    let result = Converter::new(load_bus(CLIMATE_BUS), ego(&["1"]), Some(table));
    assert!(matches!(result, Err(AdapterError::Configuration(_))));
}

#[test]
fn test_listen_to_all_signals() {
    let converter = Converter::new(load_bus(CLIMATE_BUS), ego(&["1"]), None).unwrap();
    assert_eq!(
        converter.outgoing_data_definitions(),
        vec!["enginespeed", "heaterstatus", "indoortemperature", "vehiclespeed"]
    );
    assert!(converter.incoming_command_definitions().is_empty());

    let frame = CanFrame::new(9, vec![0x03, 0x31, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]);
    assert_eq!(
        converter.frame_to_mqtt(&frame).unwrap(),
        vec![("indoortemperature".to_string(), "31.7".to_string())]
    );
}

// =============================================================================
// Aggregates
// =============================================================================

#[test]
fn test_adasis_definitions() {
    let converter = load_converter(ADASIS_BUS, ADASIS_SIGNALS, &["1"]);

    assert_eq!(
        converter.incoming_command_definitions(),
        vec![CommandDefinition {
            signal: "ADAS_Seg".to_string(),
            echo: true,
        }]
    );
    assert_eq!(
        converter.outgoing_data_definitions(),
        vec![
            "ADAS_Posn_1",
            "ADAS_Posn_2",
            "ADAS_Posn_MsgType",
            "ADAS_Posn_Offset",
            "ADAS_ProfShort_CtrlPoint",
        ]
    );
}

#[test]
fn test_aggregate_command_to_can() {
    let converter = load_converter(ADASIS_BUS, ADASIS_SIGNALS, &["1"]);
    let signals = converter
        .mqtt_to_bus_signals(
            "ADAS_Seg",
            r#"{"values": {"ADAS_Seg_MsgType": 1.0, "ADAS_Seg_Offset": 2.0,
                "ADAS_Seg_CycCnt": 3.0, "ADAS_Seg_EffSpdLmt": 4.0, "ADAS_Seg_EffSpdLmtType": 5.0}}"#,
        )
        .unwrap();

    assert_eq!(
        signals,
        SignalValues::from([
            ("ADAS_Seg_CycCnt".to_string(), 3.0),
            ("ADAS_Seg_EffSpdLmt".to_string(), 4.0),
            ("ADAS_Seg_EffSpdLmtType".to_string(), 5.0),
            ("ADAS_Seg_MsgType".to_string(), 1.0),
            ("ADAS_Seg_Offset".to_string(), 2.0),
        ])
    );
}

#[test]
fn test_aggregate_command_missing_value() {
    let converter = load_converter(ADASIS_BUS, ADASIS_SIGNALS, &["1"]);
    let result = converter.mqtt_to_bus_signals("ADAS_Seg", r#"{"values": {"ADAS_Seg_MsgType": 1}}"#);
    assert!(matches!(result, Err(AdapterError::Translation(_))));

    let result = converter.mqtt_to_bus_signals("ADAS_Seg", "not json");
    assert!(matches!(result, Err(AdapterError::Translation(_))));
}

#[test]
fn test_position_frame_to_aggregates() {
    let converter = load_converter(ADASIS_BUS, ADASIS_SIGNALS, &["1"]);
    let frame = CanFrame::new(0x100, vec![0x03, 0x31, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]);
    let messages = sorted(converter.frame_to_mqtt(&frame).unwrap());

    let names: Vec<&str> = messages.iter().map(|(name, _)| name.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "ADAS_Posn_1",
            "ADAS_Posn_2",
            "ADAS_Posn_MsgType",
            "ADAS_Posn_Offset"
        ]
    );

    let posn_1 = json(&messages[0].1);
    assert_eq!(posn_1["values"]["ADAS_Posn_CycCnt"], 0);
    assert_eq!(posn_1["values"]["ADAS_Posn_MsgType"], 0);
    assert_eq!(posn_1["values"]["ADAS_Posn_Spd"], 0.0);
    assert_eq!(posn_1["values"]["Position_offset"], 817.0);

    let posn_2 = json(&messages[1].1);
    assert_eq!(posn_2["values"]["ADAS_Posn_PosProbb"], 0.0);
    assert_eq!(posn_2["values"]["ADAS_Posn_CurLane"], 0.0);

    assert_eq!(messages[2].1, "0");
    assert_eq!(messages[3].1, "817.0");
}

#[test]
fn test_all_ones_position_frame() {
    let converter = load_converter(ADASIS_BUS, ADASIS_SIGNALS, &["1"]);
    let frame = CanFrame::new(0x100, vec![0xFF; 8]);
    let messages = sorted(converter.frame_to_mqtt(&frame).unwrap());

    let posn_1 = json(&messages[0].1);
    assert_eq!(posn_1["values"]["ADAS_Posn_CycCnt"], 3);
    assert_eq!(posn_1["values"]["ADAS_Posn_MsgType"], 7);
    assert_eq!(posn_1["values"]["ADAS_Posn_Spd"], 511.0);
    assert_eq!(posn_1["values"]["Position_offset"], 8191.0);

    let posn_2 = json(&messages[1].1);
    assert_eq!(posn_2["values"]["ADAS_Posn_PosProbb"], 31.0);
    assert_eq!(posn_2["values"]["ADAS_Posn_CurLane"], 7.0);
}

#[test]
fn test_profile_frame_control_point() {
    let converter = load_converter(ADASIS_BUS, ADASIS_SIGNALS, &["1"]);
    let frame = CanFrame::new(0x104, vec![0xFF; 8]);

    assert_eq!(
        converter.frame_to_mqtt(&frame).unwrap(),
        vec![("ADAS_ProfShort_CtrlPoint".to_string(), "1".to_string())]
    );
}

#[test]
fn test_aggregate_round_trip() {
    let table = r#"{"entities": {"aggregates": [
        {"mqttName": "ADAS_ProfShort", "toCan": true, "fromCan": true, "signals": [
            {"canName": "ADAS_ProfShort_MsgType", "mqttType": "int"},
            {"canName": "ADAS_ProfShort_Offset", "canMultiplier": 0.5},
            {"canName": "ADAS_ProfShort_CycCnt", "mqttType": "int"},
            {"canName": "ADAS_ProfShort_ProfType", "canMultiplier": 2},
            {"canName": "ADAS_ProfShort_Value0", "mqttName": "value"}
        ]}
    ]}}"#;

    // Node 1 receives the profile frame, node 10 sends it
    let receiver = Converter::new(
        load_bus(ADASIS_BUS),
        ego(&["1"]),
        Some(TranslationTable::from_json(table).unwrap()),
    )
    .unwrap();
    let sender = Converter::new(
        load_bus(ADASIS_BUS),
        ego(&["10"]),
        Some(TranslationTable::from_json(table).unwrap()),
    )
    .unwrap();

    let frame = CanFrame::new(0x104, vec![0xFF; 8]);
    let messages = receiver.frame_to_mqtt(&frame).unwrap();
    assert_eq!(messages.len(), 1);
    let (name, payload) = &messages[0];
    assert_eq!(name, "ADAS_ProfShort");

    let mut expected = load_bus(ADASIS_BUS)
        .frame(0x104)
        .unwrap()
        .unpack(&frame.data)
        .unwrap();
    expected.remove("ADAS_ProfShort_CtrlPoint");

    assert_eq!(sender.mqtt_to_bus_signals(name, payload).unwrap(), expected);
    assert_eq!(expected["ADAS_ProfShort_Offset"], 8191.0);
    assert_eq!(expected["ADAS_ProfShort_Value0"], 1023.0);
}
