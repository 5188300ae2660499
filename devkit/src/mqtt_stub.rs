/*!
Mock pub/sub client for running the router without a broker.

Records every publish and subscription; a failure switch makes every call
return an error so routing around a dead client can be tested.
*/

use async_trait::async_trait;
use edgelink_gateway::error::{ConnectorError, ConnectorResult};
use edgelink_gateway::models::{ActuatorData, SensorData, SystemPerformanceData};
use edgelink_gateway::mqtt::PubSubClient;
use edgelink_gateway::ResourceName;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMessage {
    pub resource: ResourceName,
    pub payload: String,
    pub qos: i32,
}

/// Stands in for `MqttClientConnector` wherever a `PubSubClient` is expected.
#[derive(Clone, Default)]
pub struct MockPubSubClient {
    published: Arc<Mutex<Vec<PublishedMessage>>>,
    subscriptions: Arc<Mutex<Vec<ResourceName>>>,
    connected: Arc<AtomicBool>,
    failing: Arc<AtomicBool>,
}

impl MockPubSubClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every subsequent call fails while set.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> ConnectorResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(ConnectorError::NotConnected("mock broker".into()));
        }
        Ok(())
    }

    pub fn get_published_messages(&self) -> Vec<PublishedMessage> {
        self.published.lock().unwrap().clone()
    }

    pub fn get_subscriptions(&self) -> Vec<ResourceName> {
        self.subscriptions.lock().unwrap().clone()
    }

    pub fn find_messages_by_resource(&self, resource: ResourceName) -> Vec<PublishedMessage> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .filter(|msg| msg.resource == resource)
            .cloned()
            .collect()
    }

    /// Decode the last actuator command published, if any.
    pub fn last_actuator_command(&self) -> anyhow::Result<Option<ActuatorData>> {
        match self.find_messages_by_resource(ResourceName::CdaActuatorCmd).last() {
            Some(msg) => Ok(Some(serde_json::from_str(&msg.payload)?)),
            None => Ok(None),
        }
    }

    pub fn clear(&self) {
        self.published.lock().unwrap().clear();
        self.subscriptions.lock().unwrap().clear();
    }
}

#[async_trait]
impl PubSubClient for MockPubSubClient {
    async fn connect_client(&self) -> ConnectorResult<()> {
        self.check()?;
        self.connected.store(true, Ordering::SeqCst);
        log::info!("🔌 [MOCK] Connected");
        Ok(())
    }

    async fn disconnect_client(&self) -> ConnectorResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        log::info!("🔌 [MOCK] Disconnected");
        Ok(())
    }

    async fn publish_message(&self, resource: ResourceName, msg: &str, qos: i32) -> ConnectorResult<()> {
        self.check()?;
        self.published.lock().unwrap().push(PublishedMessage {
            resource,
            payload: msg.to_string(),
            qos,
        });
        log::info!("📤 [MOCK] Published to {}: {} bytes", resource, msg.len());
        Ok(())
    }

    async fn subscribe_to_topic(&self, resource: ResourceName, _qos: i32) -> ConnectorResult<()> {
        self.check()?;
        self.subscriptions.lock().unwrap().push(resource);
        log::info!("📥 [MOCK] Subscribed to {}", resource);
        Ok(())
    }

    async fn unsubscribe_from_topic(&self, resource: ResourceName) -> ConnectorResult<()> {
        self.check()?;
        self.subscriptions.lock().unwrap().retain(|r| *r != resource);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// Builders for the records tests keep needing.
pub struct SampleData;

impl SampleData {
    pub fn sensor(name: &str, type_id: i32, value: f32) -> SensorData {
        SensorData::new(name, type_id, value)
    }

    pub fn system_performance(cpu: f32, mem: f32) -> SystemPerformanceData {
        SystemPerformanceData::new("constraineddevice001", cpu, mem)
    }

    /// Cloud-side LED toggle payload, as the provider dashboard sends it.
    pub fn led_toggle_json(value: f32) -> String {
        serde_json::json!({
            "name": "LEDActuator",
            "value": value,
            "isResponse": false,
        })
        .to_string()
    }
}
