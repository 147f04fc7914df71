//! Service manager against the in-memory broker

use std::time::Duration;

use pretty_assertions::assert_eq;
use sg_protocol::transport::mock::MockBroker;
use sg_protocol::{
    handler_fn, CommandOptions, Echo, Endpoint, EndpointSettings, Networking, Role,
};
use sg_servicemanager::{ServiceManager, CLIENT_NAME};

// =============================================================================
// Helpers
// =============================================================================

fn endpoint(broker: &MockBroker, name: &str, role: Role) -> Endpoint {
    let settings = EndpointSettings::default()
        .without_delays()
        .with_loop_timeout(Duration::from_millis(20));
    Endpoint::new(name, role, settings, broker.connector()).unwrap()
}

async fn manager(broker: &MockBroker) -> ServiceManager {
    let manager = ServiceManager::new(endpoint(broker, CLIENT_NAME, Role::Observer));
    manager.start().await.unwrap();
    pump(manager.endpoint(), 1).await;
    manager
}

async fn pump(endpoint: &Endpoint, iterations: usize) {
    for _ in 0..iterations {
        endpoint.loop_once().await.unwrap();
    }
}

/// (topic, payload, retained) published by the manager itself
fn sent_by_manager(broker: &MockBroker, manager: &ServiceManager) -> Vec<(String, String, bool)> {
    let client_id = manager.endpoint().client_id().unwrap();
    broker
        .published()
        .into_iter()
        .filter(|m| m.client_id == client_id)
        .map(|m| (m.topic, m.payload, m.retained))
        .collect()
}

// =============================================================================
// Presence loss
// =============================================================================

#[tokio::test]
async fn test_presence_loss_cascade() {
    let broker = MockBroker::new();
    let manager = manager(&broker).await;

    broker.publish("resourceavailable/X/presence", "True", true);
    broker.publish("commandavailable/X/c1", "True", true);
    broker.publish("dataavailable/X/d1", "True", true);
    pump(manager.endpoint(), 3).await;
    assert!(manager.registry().lock().is_online("X"));

    broker.publish("resourceavailable/X/presence", "False", true);
    // The retractions come back to the manager, and are ignored
    pump(manager.endpoint(), 5).await;

    assert_eq!(
        sent_by_manager(&broker, &manager),
        vec![
            ("commandavailable/X/c1".to_string(), "False".to_string(), true),
            ("dataavailable/X/d1".to_string(), "False".to_string(), true),
        ]
    );
    assert_eq!(broker.retained("commandavailable/X/c1").as_deref(), Some("False"));
    assert_eq!(broker.retained("dataavailable/X/d1").as_deref(), Some("False"));
    assert!(manager.registry().lock().services().is_empty());
}

#[tokio::test]
async fn test_unknown_and_malformed_messages() {
    let broker = MockBroker::new();
    let manager = manager(&broker).await;

    broker.publish("resourceavailable/Y/presence", "False", false);
    broker.publish("resourceavailable/Z/presence/extralevel", "True", false);
    broker.publish("dataavailable/Y/d1", "1.2.3", false);
    broker.publish("commandavailable/Y/c1", "False", false);
    pump(manager.endpoint(), 5).await;

    assert!(sent_by_manager(&broker, &manager).is_empty());
    assert!(manager.registry().lock().services().is_empty());
}

#[tokio::test]
async fn test_retained_announcements_before_start() {
    let broker = MockBroker::new();
    broker.publish("resourceavailable/climateservice/presence", "True", true);
    broker.publish("dataavailable/climateservice/vehiclespeed", "True", true);

    let manager = manager(&broker).await;
    pump(manager.endpoint(), 3).await;

    let registry = manager.registry();
    let registry = registry.lock();
    assert!(registry.is_online("climateservice"));
    assert_eq!(registry.data("climateservice"), vec!["vehiclespeed"]);
}

// =============================================================================
// With a real resource
// =============================================================================

async fn climateservice(broker: &MockBroker) -> Endpoint {
    let resource = endpoint(broker, "climateservice", Role::Resource);
    resource
        .register_outgoing_data("vehiclespeed", None, false)
        .unwrap();
    resource
        .register_incoming_command(
            "aircondition",
            handler_fn(|_, _| Ok(Echo::Inbound)),
            CommandOptions::default(),
        )
        .unwrap();
    resource.start(Networking::Cooperative, true).await.unwrap();
    pump(&resource, 1).await;
    resource
}

#[tokio::test]
async fn test_resource_stop() {
    let broker = MockBroker::new();
    let manager = manager(&broker).await;
    let resource = climateservice(&broker).await;
    pump(manager.endpoint(), 6).await;

    {
        let registry = manager.registry();
        let registry = registry.lock();
        assert_eq!(registry.commands("climateservice"), vec!["aircondition"]);
        assert_eq!(
            registry.data("climateservice"),
            vec!["aircondition", "vehiclespeed"]
        );
    }

    resource.stop().await.unwrap();
    pump(manager.endpoint(), 6).await;

    assert_eq!(
        broker.retained("commandavailable/climateservice/aircondition").as_deref(),
        Some("False")
    );
    assert_eq!(
        broker.retained("dataavailable/climateservice/vehiclespeed").as_deref(),
        Some("False")
    );
    assert_eq!(
        broker.retained("dataavailable/climateservice/aircondition").as_deref(),
        Some("False")
    );
    assert!(!manager.registry().lock().is_online("climateservice"));
}

#[tokio::test]
async fn test_resource_last_will() {
    let broker = MockBroker::new();
    let manager = manager(&broker).await;
    let resource = climateservice(&broker).await;
    pump(manager.endpoint(), 6).await;

    assert!(broker.drop_connection(&resource.client_id().unwrap()));
    pump(manager.endpoint(), 6).await;

    assert_eq!(
        broker.retained("resourceavailable/climateservice/presence").as_deref(),
        Some("False")
    );
    assert_eq!(
        broker.retained("commandavailable/climateservice/aircondition").as_deref(),
        Some("False")
    );
}

#[tokio::test]
async fn test_shutdown_lets_retraction_batch_finish() {
    let broker = MockBroker::new();
    let manager = manager(&broker).await;
    broker.publish("resourceavailable/X/presence", "True", true);
    broker.publish("commandavailable/X/c1", "True", true);
    broker.publish("commandavailable/X/c2", "True", true);
    broker.publish("dataavailable/X/d1", "True", true);
    pump(manager.endpoint(), 4).await;

    broker.publish("resourceavailable/X/presence", "False", true);
    let client_id = manager.endpoint().client_id().unwrap();
    manager.run(std::future::ready(())).await.unwrap();

    let retractions: Vec<(String, String, bool)> = broker
        .published()
        .into_iter()
        .filter(|m| m.client_id == client_id)
        .map(|m| (m.topic, m.payload, m.retained))
        .collect();
    assert_eq!(
        retractions,
        vec![
            ("commandavailable/X/c1".to_string(), "False".to_string(), true),
            ("commandavailable/X/c2".to_string(), "False".to_string(), true),
            ("dataavailable/X/d1".to_string(), "False".to_string(), true),
        ]
    );
    assert!(!manager.endpoint().is_started());
}

#[tokio::test]
async fn test_run_until_shutdown() {
    let broker = MockBroker::new();
    let manager = manager(&broker).await;
    broker.publish("commandavailable/X/c1", "True", true);

    manager
        .run(tokio::time::sleep(Duration::from_millis(100)))
        .await
        .unwrap();

    assert!(manager.registry().lock().is_online("X"));
    assert!(!manager.endpoint().is_started());
    // Observers announce nothing on stop
    assert!(broker.retained("resourceavailable/servicemanager/presence").is_none());
}
