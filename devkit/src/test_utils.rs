/*!
Test harness for the gateway router

Wires recording sinks and the mock pub/sub client into a `DeviceDataManager`
and offers count expectations over what each sink received.
*/

use crate::mqtt_stub::MockPubSubClient;
use async_trait::async_trait;
use edgelink_gateway::error::{ConnectorError, ConnectorResult};
use edgelink_gateway::models::{ActuatorData, Record, SensorData};
use edgelink_gateway::router::{ActuatorDataListener, DeviceDataManager};
use edgelink_gateway::sinks::{AlertSink, CloudRelay, PersistenceClient, Sink, SinkKind, SinkSet};
use edgelink_gateway::{DataCodec, ResourceName};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Default)]
pub struct RecordingStore {
    pub stored: Mutex<Vec<(String, u8, Vec<Record>)>>,
    failing: AtomicBool,
}

impl RecordingStore {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn count(&self) -> usize {
        self.stored.lock().unwrap().len()
    }
}

#[async_trait]
impl PersistenceClient for RecordingStore {
    async fn store(&self, topic: &str, qos: u8, records: &[Record]) -> ConnectorResult<()> {
        self.stored
            .lock()
            .unwrap()
            .push((topic.to_string(), qos, records.to_vec()));
        if self.failing.load(Ordering::SeqCst) {
            return Err(ConnectorError::NotConnected("recording store".into()));
        }
        Ok(())
    }
}

/// Records every sensor-shaped send; names in `fail_names` fail after recording.
#[derive(Default)]
pub struct RecordingRelay {
    pub sent: Mutex<Vec<(ResourceName, SensorData)>>,
    fail_names: Mutex<HashSet<String>>,
}

impl RecordingRelay {
    pub fn fail_on(&self, name: &str) {
        self.fail_names.lock().unwrap().insert(name.to_string());
    }

    pub fn count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl CloudRelay for RecordingRelay {
    async fn send_sensor(&self, resource: ResourceName, data: &SensorData) -> ConnectorResult<()> {
        self.sent.lock().unwrap().push((resource, data.clone()));
        if self.fail_names.lock().unwrap().contains(data.name()) {
            return Err(ConnectorError::NotConnected("recording relay".into()));
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingAlert {
    pub sent: Mutex<Vec<(ResourceName, String, u64)>>,
}

impl RecordingAlert {
    pub fn count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl AlertSink for RecordingAlert {
    async fn send(&self, resource: ResourceName, payload: &str, timeout_secs: u64) -> ConnectorResult<()> {
        self.sent
            .lock()
            .unwrap()
            .push((resource, payload.to_string(), timeout_secs));
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingActuatorListener {
    pub updates: Mutex<Vec<ActuatorData>>,
}

impl RecordingActuatorListener {
    pub fn count(&self) -> usize {
        self.updates.lock().unwrap().len()
    }
}

impl ActuatorDataListener for RecordingActuatorListener {
    fn on_actuator_data_update(&self, data: &ActuatorData) -> bool {
        self.updates.lock().unwrap().push(data.clone());
        true
    }
}

/// Which collaborators the harness plugs into the router.
#[derive(Debug, Clone, Copy)]
pub struct HarnessOptions {
    pub store: bool,
    pub relay: bool,
    pub alert: bool,
    pub pubsub: bool,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            store: true,
            relay: true,
            alert: true,
            pubsub: true,
        }
    }
}

#[derive(Debug)]
struct Expectation {
    kind: SinkKind,
    expected_count: usize,
}

pub struct TestHarness {
    pub router: Arc<DeviceDataManager>,
    pub store: Arc<RecordingStore>,
    pub relay: Arc<RecordingRelay>,
    pub alert: Arc<RecordingAlert>,
    pub actuator_listener: Arc<RecordingActuatorListener>,
    pub pubsub: MockPubSubClient,
    pub codec: DataCodec,
    expectations: Vec<Expectation>,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_options(HarnessOptions::default())
    }

    pub fn with_options(options: HarnessOptions) -> Self {
        env_logger::try_init().ok();

        let codec = DataCodec::default();
        let store = Arc::new(RecordingStore::default());
        let relay = Arc::new(RecordingRelay::default());
        let alert = Arc::new(RecordingAlert::default());
        let actuator_listener = Arc::new(RecordingActuatorListener::default());
        let pubsub = MockPubSubClient::new();

        let mut sinks = SinkSet::new();
        if options.store {
            sinks.push(Sink::Store(store.clone()));
        }
        if options.relay {
            sinks.push(Sink::Relay(relay.clone()));
        }
        if options.alert {
            sinks.push(Sink::Alert(alert.clone()));
        }

        let mut router = DeviceDataManager::new(codec, sinks);
        if options.pubsub {
            router = router.with_pubsub(Arc::new(pubsub.clone()));
        }
        let router = Arc::new(router);
        router.set_actuator_data_listener("harness", actuator_listener.clone());
        log::info!("🧪 Harness ready: {:?}", options);

        Self {
            router,
            store,
            relay,
            alert,
            actuator_listener,
            pubsub,
            codec,
            expectations: Vec::new(),
        }
    }

    /// Expect exactly `count` calls on the given sink.
    pub fn expect_calls(&mut self, kind: SinkKind, count: usize) -> &mut Self {
        self.expectations.push(Expectation {
            kind,
            expected_count: count,
        });
        self
    }

    fn count_for(&self, kind: SinkKind) -> usize {
        match kind {
            SinkKind::Store => self.store.count(),
            SinkKind::Relay => self.relay.count(),
            SinkKind::Alert => self.alert.count(),
        }
    }

    pub fn verify_expectations(&self) -> anyhow::Result<()> {
        log::info!("🔍 Verifying {} expectations...", self.expectations.len());
        for expectation in &self.expectations {
            let actual = self.count_for(expectation.kind);
            if actual != expectation.expected_count {
                anyhow::bail!(
                    "Expectation failed for {:?} sink: expected {} calls, got {}",
                    expectation.kind,
                    expectation.expected_count,
                    actual
                );
            }
        }
        Ok(())
    }

    pub fn get_stats(&self) -> TestStats {
        TestStats {
            stores: self.store.count(),
            relays: self.relay.count(),
            alerts: self.alert.count(),
            publishes: self.pubsub.get_published_messages().len(),
            actuator_updates: self.actuator_listener.count(),
        }
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TestStats {
    pub stores: usize,
    pub relays: usize,
    pub alerts: usize,
    pub publishes: usize,
    pub actuator_updates: usize,
}

impl TestStats {
    pub fn print(&self) {
        println!("📊 Router calls:");
        println!("  store: {}", self.stores);
        println!("  relay: {}", self.relays);
        println!("  alert: {}", self.alerts);
        println!("  publish: {}", self.publishes);
        println!("  actuator updates: {}", self.actuator_updates);
    }
}

/// Declares a tokio test with a fresh default harness bound to `$harness`.
/// The body evaluates to `anyhow::Result<()>`.
#[macro_export]
macro_rules! gateway_test {
    ($name:ident, |$harness:ident| $body:block) => {
        #[tokio::test]
        async fn $name() {
            #[allow(unused_mut)]
            let mut $harness = $crate::test_utils::TestHarness::new();
            let result: anyhow::Result<()> = async { $body }.await;
            match result {
                Ok(()) => $harness.get_stats().print(),
                Err(e) => panic!("Test '{}' failed: {}", stringify!($name), e),
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use edgelink_gateway::router::DataMessageListener;

    #[tokio::test]
    async fn test_harness_counts_sink_calls() {
        let mut harness = TestHarness::with_options(HarnessOptions {
            relay: false,
            ..HarnessOptions::default()
        });
        harness.expect_calls(SinkKind::Store, 1).expect_calls(SinkKind::Alert, 1);

        let reading = SensorData::new("TempSensor", 1013, 21.0);
        assert!(harness
            .router
            .handle_sensor_message(ResourceName::CdaSensorMsg, &reading)
            .await);

        harness.verify_expectations().unwrap();
        assert_eq!(harness.get_stats().relays, 0);
    }

    #[tokio::test]
    async fn test_failing_store_still_recorded() {
        let harness = TestHarness::new();
        harness.store.set_failing(true);
        let reading = SensorData::new("TempSensor", 1013, 21.0);
        harness
            .router
            .handle_sensor_message(ResourceName::CdaSensorMsg, &reading)
            .await;
        assert_eq!(harness.store.count(), 1);
        assert_eq!(harness.relay.count(), 1);
    }

    gateway_test!(test_macro_functionality, |harness| {
        let reading = SensorData::new("TempSensor", 1013, 19.5);
        harness
            .router
            .handle_sensor_message(ResourceName::CdaSensorMsg, &reading)
            .await;
        harness
            .expect_calls(SinkKind::Relay, 1)
            .expect_calls(SinkKind::Alert, 0);
        harness.verify_expectations()
    });
}
