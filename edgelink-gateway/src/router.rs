/**
 * DEVICE DATA MANAGER - routing core of the gateway
 *
 * ROLE:
 * Every inbound record ends up here, whatever transport carried it: the MQTT
 * client, the CoAP server, the cloud bridge or the local sampler. The manager
 * applies the per-kind policy and fans out to the enabled sinks.
 *
 * ROUTING:
 * - Sensor / performance: store, then relay; alert only when no relay is on
 * - Actuator response: store only, never re-sent as a command
 * - Actuator command (raw text): decode, re-encode, publish on ActuatorCmd
 * - System state: accepted, no routing
 *
 * CONCURRENCY:
 * Handlers take `&self` and are entered concurrently by every adapter. The
 * only mutable state is the `ActuationCell` and the listener slot, both
 * behind their own locks. Sink calls run one after another; a failing sink
 * is logged, the next one still runs, and the handler reports false.
 */

use crate::codec::DataCodec;
use crate::config::AnalysisConf;
use crate::models::{
    ActuatorData, Record, SensorData, SystemPerformanceData, SystemStateData, HUMIDITY_SENSOR_TYPE,
    OFF_COMMAND, ON_COMMAND,
};
use crate::mqtt::PubSubClient;
use crate::resource::ResourceName;
use crate::sinks::{Sink, SinkKind, SinkSet};
use crate::state::ActuationCell;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;

const COMMAND_QOS: i32 = 1;
const DEFAULT_ALERT_TIMEOUT_SECS: u64 = 30;

/// Entry points adapters call with decoded (or raw) inbound data.
#[async_trait]
pub trait DataMessageListener: Send + Sync {
    async fn handle_actuator_command_response(
        &self,
        resource: ResourceName,
        data: &ActuatorData,
    ) -> bool;

    /// Raw text path; the payload is validated by decoding before it is sent on.
    async fn handle_incoming_message(&self, resource: ResourceName, msg: &str) -> bool;

    async fn handle_sensor_message(&self, resource: ResourceName, data: &SensorData) -> bool;

    async fn handle_system_performance_message(
        &self,
        resource: ResourceName,
        data: &SystemPerformanceData,
    ) -> bool;

    async fn handle_system_state_message(
        &self,
        resource: ResourceName,
        data: &SystemStateData,
    ) -> bool;
}

/// Receives actuation commands the gateway decided to act on.
pub trait ActuatorDataListener: Send + Sync {
    fn on_actuator_data_update(&self, data: &ActuatorData) -> bool;
}

/// Humidity threshold actuation. Off unless configured.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HumidityPolicy {
    pub floor: f32,
    pub ceiling: f32,
}

impl HumidityPolicy {
    pub fn from_config(conf: &AnalysisConf) -> Option<Self> {
        conf.enabled.then_some(Self {
            floor: conf.humidity_floor,
            ceiling: conf.humidity_ceiling,
        })
    }

    /// Command implied by a reading, if any.
    pub fn evaluate(&self, data: &SensorData) -> Option<i32> {
        if data.header.type_id != HUMIDITY_SENSOR_TYPE {
            return None;
        }
        if data.value > self.ceiling {
            Some(ON_COMMAND)
        } else if data.value < self.floor {
            Some(OFF_COMMAND)
        } else {
            None
        }
    }
}

#[derive(Clone, Copy)]
enum Telemetry<'a> {
    Sensor(&'a SensorData),
    Performance(&'a SystemPerformanceData),
}

impl Telemetry<'_> {
    fn to_record(&self) -> Record {
        match self {
            Telemetry::Sensor(d) => Record::Sensor((*d).clone()),
            Telemetry::Performance(d) => Record::SystemPerformance((*d).clone()),
        }
    }
}

pub struct DeviceDataManager {
    codec: DataCodec,
    sinks: SinkSet,
    pubsub: Option<Arc<dyn PubSubClient>>,
    actuation: ActuationCell,
    actuator_listener: Mutex<Option<Arc<dyn ActuatorDataListener>>>,
    humidity_policy: Option<HumidityPolicy>,
    store_qos: u8,
    alert_timeout_secs: u64,
}

impl DeviceDataManager {
    pub fn new(codec: DataCodec, sinks: SinkSet) -> Self {
        Self {
            codec,
            sinks,
            pubsub: None,
            actuation: ActuationCell::default(),
            actuator_listener: Mutex::new(None),
            humidity_policy: None,
            store_qos: 0,
            alert_timeout_secs: DEFAULT_ALERT_TIMEOUT_SECS,
        }
    }

    pub fn with_pubsub(mut self, client: Arc<dyn PubSubClient>) -> Self {
        self.pubsub = Some(client);
        self
    }

    pub fn with_actuation_cell(mut self, cell: ActuationCell) -> Self {
        self.actuation = cell;
        self
    }

    pub fn with_humidity_policy(mut self, policy: Option<HumidityPolicy>) -> Self {
        self.humidity_policy = policy;
        self
    }

    pub fn with_store_qos(mut self, qos: u8) -> Self {
        self.store_qos = qos;
        self
    }

    pub fn with_alert_timeout(mut self, secs: u64) -> Self {
        self.alert_timeout_secs = secs;
        self
    }

    pub fn sinks(&self) -> &SinkSet {
        &self.sinks
    }

    pub fn actuation(&self) -> &ActuationCell {
        &self.actuation
    }

    /// Only one listener is kept; a new one replaces the old.
    pub fn set_actuator_data_listener(&self, name: &str, listener: Arc<dyn ActuatorDataListener>) {
        tracing::debug!("Actuator data listener set: {}", name);
        *self.actuator_listener.lock() = Some(listener);
    }

    fn actuator_listener(&self) -> Option<Arc<dyn ActuatorDataListener>> {
        self.actuator_listener.lock().clone()
    }

    async fn store(&self, resource: ResourceName, record: Record) -> bool {
        let mut stored = true;
        for sink in self.sinks.enabled() {
            if let Sink::Store(store) = sink {
                if let Err(e) = store
                    .store(&resource.topic(), self.store_qos, std::slice::from_ref(&record))
                    .await
                {
                    tracing::error!("Failed to store {} for {}: {}", record.kind().label(), resource, e);
                    stored = false;
                }
            }
        }
        stored
    }

    /// Store, relay, and alert when nothing relays. Each sink fails on its own;
    /// the result is true only if every sink that ran succeeded.
    async fn fan_out(&self, resource: ResourceName, telemetry: Telemetry<'_>) -> bool {
        let relay_enabled = self.sinks.is_enabled(SinkKind::Relay);
        let record = telemetry.to_record();
        let mut delivered = true;

        for sink in self.sinks.enabled() {
            match sink {
                Sink::Store(store) => {
                    let result = store
                        .store(&resource.topic(), self.store_qos, std::slice::from_ref(&record))
                        .await;
                    if let Err(e) = result {
                        tracing::error!("Failed to store data for {}: {}", resource, e);
                        delivered = false;
                    }
                }
                Sink::Relay(relay) => {
                    let result = match telemetry {
                        Telemetry::Sensor(d) => relay.send_sensor(resource, d).await,
                        Telemetry::Performance(d) => relay.send_system_performance(resource, d).await,
                    };
                    match result {
                        Ok(()) => tracing::info!("Sent {} upstream to cloud", record.kind().label()),
                        Err(e) => {
                            tracing::error!("Failed to relay data for {}: {}", resource, e);
                            delivered = false;
                        }
                    }
                }
                Sink::Alert(alert) if !relay_enabled => {
                    let payload = match telemetry {
                        Telemetry::Sensor(d) => self.codec.encode_sensor(d),
                        Telemetry::Performance(d) => self.codec.encode_system_performance(d),
                    };
                    let payload = match payload {
                        Ok(p) => p,
                        Err(e) => {
                            tracing::warn!("Failed to encode alert payload for {}: {}", resource, e);
                            delivered = false;
                            continue;
                        }
                    };
                    tracing::info!("Sending alert for {}", resource);
                    if let Err(e) = alert.send(resource, &payload, self.alert_timeout_secs).await {
                        tracing::error!("Failed to send alert for {}: {}", resource, e);
                        delivered = false;
                    }
                }
                Sink::Alert(_) => {}
            }
        }
        delivered
    }

    async fn publish_command(&self, data: &ActuatorData, qos: i32) -> bool {
        let Some(client) = &self.pubsub else {
            return false;
        };
        let json = match self.codec.encode_actuator(data) {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!("Failed to encode actuator command: {}", e);
                return false;
            }
        };
        tracing::info!("Publishing data to MQTT broker: {}", ResourceName::CdaActuatorCmd);
        match client
            .publish_message(ResourceName::CdaActuatorCmd, &json, qos)
            .await
        {
            Ok(()) => true,
            Err(e) => {
                tracing::error!("Failed to publish actuator command: {}", e);
                false
            }
        }
    }

    /// Commands go to the actuation listener; responses stop here.
    fn handle_incoming_data_analysis(&self, data: &ActuatorData) -> bool {
        tracing::info!("Analyzing incoming actuator data: {}", data.name());
        if data.is_response() {
            return false;
        }
        self.actuation.update(data);
        match self.actuator_listener() {
            Some(listener) => listener.on_actuator_data_update(data),
            None => false,
        }
    }

    async fn apply_humidity_policy(&self, data: &SensorData) {
        let Some(policy) = self.humidity_policy else {
            return;
        };
        let Some(command) = policy.evaluate(data) else {
            return;
        };
        let Some(updated) = self.actuation.set_command(command, data.value) else {
            return;
        };
        tracing::info!(
            "Humidity {} outside [{}, {}], switching actuator {}",
            data.value,
            policy.floor,
            policy.ceiling,
            if command == ON_COMMAND { "ON" } else { "OFF" }
        );
        if let Some(listener) = self.actuator_listener() {
            listener.on_actuator_data_update(&updated);
        }
        self.publish_command(&updated, COMMAND_QOS).await;
    }
}

#[async_trait]
impl DataMessageListener for DeviceDataManager {
    async fn handle_actuator_command_response(
        &self,
        resource: ResourceName,
        data: &ActuatorData,
    ) -> bool {
        tracing::info!("Handling actuator response: {}", data.name());
        if data.has_error() {
            tracing::warn!("Error flag set for ActuatorData instance");
        }
        if !data.is_response() {
            tracing::warn!("Actuator record on {} is not flagged as a response", resource);
        }
        self.store(resource, Record::Actuator(data.clone())).await
    }

    async fn handle_incoming_message(&self, resource: ResourceName, msg: &str) -> bool {
        if msg.trim().is_empty() {
            tracing::warn!("Incoming message has no data. Ignoring for resource: {}", resource);
            return false;
        }
        if resource != ResourceName::CdaActuatorCmd {
            tracing::warn!("Failed to handle incoming message. Unsupported resource: {}", resource);
            return false;
        }
        tracing::info!("Handling incoming ActuatorData message: {}", msg);

        // Round trip so only a well-formed ActuatorData reaches the command channel
        let data = match self.codec.decode_actuator(msg) {
            Ok(data) => data,
            Err(e) => {
                tracing::warn!("Failed to process incoming message for {}: {}", resource, e);
                return false;
            }
        };
        let notified = self.handle_incoming_data_analysis(&data);

        if self.pubsub.is_some() {
            self.publish_command(&data, COMMAND_QOS).await
        } else {
            if !notified {
                tracing::warn!("No outbound path for actuator command on {}", resource);
            }
            notified
        }
    }

    async fn handle_sensor_message(&self, resource: ResourceName, data: &SensorData) -> bool {
        tracing::info!("Handling sensor message: {}", data.name());
        if data.has_error() {
            tracing::warn!("Error flag set for SensorData instance");
        }
        self.apply_humidity_policy(data).await;
        self.fan_out(resource, Telemetry::Sensor(data)).await
    }

    async fn handle_system_performance_message(
        &self,
        resource: ResourceName,
        data: &SystemPerformanceData,
    ) -> bool {
        tracing::info!("Handling system performance message: {}", data.name());
        if data.has_error() {
            tracing::warn!("Error flag set for SystemPerformanceData instance");
        }
        self.fan_out(resource, Telemetry::Performance(data)).await
    }

    async fn handle_system_state_message(
        &self,
        resource: ResourceName,
        data: &SystemStateData,
    ) -> bool {
        // advisory only
        tracing::debug!("System state message on {}: {}", resource, data.header.name);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{LED_ACTUATOR_NAME, LED_ACTUATOR_TYPE};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingListener(AtomicUsize);

    impl ActuatorDataListener for CountingListener {
        fn on_actuator_data_update(&self, _data: &ActuatorData) -> bool {
            self.0.fetch_add(1, Ordering::SeqCst);
            true
        }
    }

    fn manager() -> (DeviceDataManager, Arc<CountingListener>) {
        let manager = DeviceDataManager::new(DataCodec::default(), SinkSet::new());
        let listener = Arc::new(CountingListener::default());
        manager.set_actuator_data_listener("test", listener.clone());
        (manager, listener)
    }

    #[tokio::test]
    async fn test_response_never_reaches_listener() {
        let (manager, listener) = manager();
        let mut data = ActuatorData::command(LED_ACTUATOR_NAME, LED_ACTUATOR_TYPE, ON_COMMAND, 1.0);
        data.set_as_response();
        let json = DataCodec::default().encode_actuator(&data).unwrap();

        assert!(!manager
            .handle_incoming_message(ResourceName::CdaActuatorCmd, &json)
            .await);
        assert!(manager
            .handle_actuator_command_response(ResourceName::CdaActuatorResponse, &data)
            .await);
        assert_eq!(listener.0.load(Ordering::SeqCst), 0);
        assert_eq!(manager.actuation().snapshot().command, OFF_COMMAND);
    }

    #[tokio::test]
    async fn test_command_updates_cell_and_listener() {
        let (manager, listener) = manager();
        let data = ActuatorData::command(LED_ACTUATOR_NAME, LED_ACTUATOR_TYPE, ON_COMMAND, 1.0);
        let json = DataCodec::default().encode_actuator(&data).unwrap();

        assert!(manager
            .handle_incoming_message(ResourceName::CdaActuatorCmd, &json)
            .await);
        assert_eq!(listener.0.load(Ordering::SeqCst), 1);
        assert_eq!(manager.actuation().snapshot().command, ON_COMMAND);
    }

    #[tokio::test]
    async fn test_raw_text_rejections() {
        let (manager, listener) = manager();
        assert!(!manager.handle_incoming_message(ResourceName::CdaActuatorCmd, "").await);
        assert!(!manager
            .handle_incoming_message(ResourceName::CdaActuatorCmd, "not json")
            .await);
        assert!(!manager
            .handle_incoming_message(ResourceName::CdaSensorMsg, r#"{"command":1}"#)
            .await);
        assert_eq!(listener.0.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_humidity_policy() {
        let policy = HumidityPolicy { floor: 30.0, ceiling: 50.0 };
        let humid = SensorData::new("HumiditySensor", HUMIDITY_SENSOR_TYPE, 55.0);
        let dry = SensorData::new("HumiditySensor", HUMIDITY_SENSOR_TYPE, 20.0);
        let fine = SensorData::new("HumiditySensor", HUMIDITY_SENSOR_TYPE, 40.0);
        let other = SensorData::new("TempSensor", 1013, 99.0);
        assert_eq!(policy.evaluate(&humid), Some(ON_COMMAND));
        assert_eq!(policy.evaluate(&dry), Some(OFF_COMMAND));
        assert_eq!(policy.evaluate(&fine), None);
        assert_eq!(policy.evaluate(&other), None);
        assert!(HumidityPolicy::from_config(&AnalysisConf::default()).is_none());
    }

    #[tokio::test]
    async fn test_humidity_policy_drives_cell() {
        let (manager, listener) = manager();
        let manager = manager.with_humidity_policy(Some(HumidityPolicy { floor: 30.0, ceiling: 50.0 }));
        let humid = SensorData::new("HumiditySensor", HUMIDITY_SENSOR_TYPE, 55.0);

        assert!(manager.handle_sensor_message(ResourceName::CdaSensorMsg, &humid).await);
        assert!(manager.handle_sensor_message(ResourceName::CdaSensorMsg, &humid).await);
        assert_eq!(manager.actuation().snapshot().command, ON_COMMAND);
        // second reading leaves the command unchanged
        assert_eq!(listener.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_system_state_is_accepted() {
        let (manager, _) = manager();
        assert!(manager
            .handle_system_state_message(ResourceName::GdaMgmtStatus, &SystemStateData::default())
            .await);
    }
}
