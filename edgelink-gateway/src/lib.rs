//! EdgeLink gateway: ingests constrained-device telemetry over MQTT and CoAP,
//! normalizes it into four record kinds and fans it out to storage, cloud and
//! alert sinks, while routing actuation commands back to the device.

pub mod cloud;
pub mod coap;
pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod gateway;
pub mod models;
pub mod mqtt;
pub mod persistence;
pub mod resource;
pub mod router;
pub mod sinks;
pub mod smtp;
pub mod state;
pub mod system;

pub use crate::codec::DataCodec;
pub use crate::error::{CodecError, ConfigError, ConnectorError, ConnectorResult};
pub use crate::gateway::GatewayDeviceApp;
pub use crate::models::{ActuatorData, Record, RecordKind, SensorData, SystemPerformanceData, SystemStateData};
pub use crate::resource::ResourceName;
pub use crate::router::{ActuatorDataListener, DataMessageListener, DeviceDataManager};
