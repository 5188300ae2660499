/*!
# EdgeLink DevKit - recording mocks for gateway tests

Lets the router be exercised without a broker, a redis server or a mail relay:
- Mock pub/sub client that records every publish and subscription
- Recording store / relay / alert sinks with failure switches
- A harness wiring them into a `DeviceDataManager`
*/

pub mod mqtt_stub;
pub mod test_utils;

pub use mqtt_stub::{MockPubSubClient, PublishedMessage, SampleData};
pub use test_utils::{
    HarnessOptions, RecordingActuatorListener, RecordingAlert, RecordingRelay, RecordingStore,
    TestHarness,
};
