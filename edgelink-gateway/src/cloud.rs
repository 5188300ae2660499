//! Cloud relay bridge.
//!
//! A second MQTT session pointed at the provider broker. Outbound topics are
//! rewritten under a configured prefix; on every connect the bridge
//! provisions the LED command topic and listens on it for ON/OFF requests.

use crate::codec::DataCodec;
use crate::config::CloudConf;
use crate::error::{ConnectorError, ConnectorResult};
use crate::models::{
    ActuatorData, SensorData, CONSTRAINED_DEVICE, LED_ACTUATOR_NAME, LED_ACTUATOR_TYPE,
    OFF_COMMAND, ON_COMMAND,
};
use crate::mqtt::{ConnectionListener, MqttClientConnector, PubSubClient, TopicListener};
use crate::resource::ResourceName;
use crate::router::DataMessageListener;
use crate::sinks::CloudRelay;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;

const CLOUD_QOS: i32 = 1;
const SENTINEL_VALUE: f32 = -1.0;

/// `None` becomes `/`; anything else ends with exactly one `/`.
pub fn normalize_prefix(prefix: Option<&str>) -> String {
    match prefix {
        None => "/".to_string(),
        Some(p) => format!("{}/", p.trim_end_matches('/')),
    }
}

pub struct CloudClientConnector {
    mqtt: MqttClientConnector,
    topic_prefix: String,
    codec: DataCodec,
    data_listener: Mutex<Option<Arc<dyn DataMessageListener>>>,
}

impl CloudClientConnector {
    /// Builds the bridge and registers it for its own session's connect events.
    pub fn new(conf: CloudConf, default_qos: u8, codec: DataCodec) -> Arc<Self> {
        let mqtt = MqttClientConnector::with_subscriptions(conf.broker, None, default_qos, codec, Vec::new());
        let connector = Arc::new(Self {
            mqtt,
            topic_prefix: normalize_prefix(conf.base_topic.as_deref()),
            codec,
            data_listener: Mutex::new(None),
        });
        connector.mqtt.set_connection_listener(connector.clone());
        connector
    }

    pub fn set_data_message_listener(&self, listener: Arc<dyn DataMessageListener>) {
        *self.data_listener.lock() = Some(listener);
    }

    pub fn topic_prefix(&self) -> &str {
        &self.topic_prefix
    }

    pub fn mqtt(&self) -> &MqttClientConnector {
        &self.mqtt
    }

    /// `{prefix}{deviceName}/{resourceType}-{item}`, for publish and subscribe alike.
    pub fn topic_name(&self, resource: ResourceName, item: &str) -> String {
        format!(
            "{}{}/{}-{}",
            self.topic_prefix,
            resource.device_scope().device_name(),
            resource.resource_type().as_str(),
            item
        )
    }

    pub async fn connect_client(&self) -> ConnectorResult<()> {
        self.mqtt.connect_client().await
    }

    pub async fn disconnect_client(&self) -> ConnectorResult<()> {
        self.mqtt.disconnect_client().await
    }

    pub fn is_connected(&self) -> bool {
        self.mqtt.is_connected()
    }

    async fn publish_to_cloud(&self, resource: ResourceName, item: &str, payload: &str) -> ConnectorResult<()> {
        let topic = self.topic_name(resource, item);
        tracing::info!("Publishing payload value(s) to cloud: {}", topic);
        self.mqtt.publish_topic(&topic, payload, CLOUD_QOS).await
    }

    async fn provision_led_topic(&self) -> ConnectorResult<()> {
        let resource = ResourceName::CdaActuatorCmd;

        // invalid value: creates the topic, and the listener below ignores it
        let mut sentinel = ActuatorData::command(LED_ACTUATOR_NAME, LED_ACTUATOR_TYPE, OFF_COMMAND, SENTINEL_VALUE);
        sentinel.set_as_response();
        let json = self.codec.encode_actuator(&sentinel)?;
        self.publish_to_cloud(resource, LED_ACTUATOR_NAME, &json).await?;

        let listener = Arc::new(LedEnablementListener::new(
            self.codec,
            self.data_listener.lock().clone(),
        ));
        let topic = self.topic_name(resource, LED_ACTUATOR_NAME);
        self.mqtt.subscribe_topic(&topic, CLOUD_QOS, listener).await
    }
}

#[async_trait]
impl CloudRelay for CloudClientConnector {
    async fn send_sensor(&self, resource: ResourceName, data: &SensorData) -> ConnectorResult<()> {
        if !self.mqtt.is_connected() {
            return Err(ConnectorError::NotConnected("cloud".into()));
        }
        let json = self.codec.encode_sensor(data)?;
        self.publish_to_cloud(resource, data.name(), &json).await
    }
}

#[async_trait]
impl ConnectionListener for CloudClientConnector {
    async fn on_connect(&self) {
        tracing::info!("Handling cloud subscriptions and device topic provisioning...");
        match self.provision_led_topic().await {
            Ok(()) => tracing::info!("Cloud connection complete"),
            Err(e) => tracing::error!("Failed to provision cloud LED topic: {}", e),
        }
    }

    async fn on_disconnect(&self) {
        tracing::info!("Cloud MQTT client disconnected. Nothing else to do.");
    }
}

/// Turns cloud-side LED toggles into actuator commands for the device.
pub struct LedEnablementListener {
    codec: DataCodec,
    data_listener: Option<Arc<dyn DataMessageListener>>,
}

impl LedEnablementListener {
    pub fn new(codec: DataCodec, data_listener: Option<Arc<dyn DataMessageListener>>) -> Self {
        Self { codec, data_listener }
    }

    /// Relabel a cloud record as an LED command, or `None` if it is not one.
    pub fn to_led_command(&self, mut data: ActuatorData) -> Option<ActuatorData> {
        if data.is_response() {
            return None;
        }
        let state = match data.value {
            v if v == ON_COMMAND as f32 => "LED switching ON",
            v if v == OFF_COMMAND as f32 => "LED switching OFF",
            _ => return None,
        };
        tracing::info!("Received LED enablement message [{}]", if data.value == ON_COMMAND as f32 { "ON" } else { "OFF" });
        data.command = data.value as i32;
        data.state_data = state.to_string();
        data.header.location_id = CONSTRAINED_DEVICE.to_string();
        data.header.type_id = LED_ACTUATOR_TYPE;
        data.header.name = LED_ACTUATOR_NAME.to_string();
        Some(data)
    }
}

#[async_trait]
impl TopicListener for LedEnablementListener {
    async fn on_message(&self, topic: &str, payload: &[u8]) -> bool {
        let data = match self.codec.decode_bytes::<ActuatorData>("ActuatorData", payload) {
            Ok(data) => data,
            Err(e) => {
                tracing::warn!("Failed to convert payload on {} to ActuatorData: {}", topic, e);
                return false;
            }
        };
        let Some(command) = self.to_led_command(data) else {
            return false;
        };
        let Some(listener) = &self.data_listener else {
            return false;
        };
        match self.codec.encode_actuator(&command) {
            Ok(json) => {
                listener
                    .handle_incoming_message(ResourceName::CdaActuatorCmd, &json)
                    .await
            }
            Err(e) => {
                tracing::warn!("Failed to encode LED command: {}", e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MqttConf;

    fn connector(prefix: Option<&str>) -> Arc<CloudClientConnector> {
        CloudClientConnector::new(
            CloudConf {
                broker: MqttConf::default(),
                base_topic: prefix.map(str::to_string),
            },
            0,
            DataCodec::default(),
        )
    }

    #[test]
    fn test_prefix_normalization() {
        assert_eq!(normalize_prefix(None), "/");
        assert_eq!(normalize_prefix(Some("edgelink")), "edgelink/");
        assert_eq!(normalize_prefix(Some("edgelink/")), "edgelink/");
        assert_eq!(normalize_prefix(Some("edgelink///")), "edgelink/");
    }

    #[test]
    fn test_topic_name() {
        let cloud = connector(Some("edgelink"));
        assert_eq!(
            cloud.topic_name(ResourceName::CdaSensorMsg, "CPU_UTIL"),
            "edgelink/ConstrainedDevice/SensorMsg-CPU_UTIL"
        );
        assert_eq!(
            connector(None).topic_name(ResourceName::CdaActuatorCmd, LED_ACTUATOR_NAME),
            "/ConstrainedDevice/ActuatorCmd-LEDActuator"
        );
    }

    #[test]
    fn test_led_command_filter() {
        let listener = LedEnablementListener::new(DataCodec::default(), None);
        let mut on = ActuatorData::default();
        on.value = 1.0;
        let relabeled = listener.to_led_command(on).unwrap();
        assert_eq!(relabeled.command, ON_COMMAND);
        assert_eq!(relabeled.state_data, "LED switching ON");
        assert_eq!(relabeled.header.location_id, CONSTRAINED_DEVICE);
        assert_eq!(relabeled.header.type_id, LED_ACTUATOR_TYPE);

        let mut bad = ActuatorData::default();
        bad.value = 7.0;
        assert!(listener.to_led_command(bad).is_none());

        let mut sentinel = ActuatorData::default();
        sentinel.value = 0.0;
        sentinel.set_as_response();
        assert!(listener.to_led_command(sentinel).is_none());
    }

    #[tokio::test]
    async fn test_relay_needs_connection() {
        let cloud = connector(None);
        let result = cloud
            .send_sensor(ResourceName::CdaSensorMsg, &SensorData::default())
            .await;
        assert!(matches!(result, Err(ConnectorError::NotConnected(_))));
    }
}
