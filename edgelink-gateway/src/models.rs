/**
 * CANONICAL DATA MODEL - the four record kinds routed by the gateway
 *
 * ROLE:
 * Every transport decodes into one of these shapes before the router sees it,
 * and every sink receives one of these shapes. Field names on the wire are the
 * camelCase names the constrained device already speaks (typeID, locationID,
 * timeStamp, hasError, isResponse...).
 *
 * LIFECYCLE:
 * Produced by an adapter decode or a sampler tick, routed once, then dropped.
 * The router keeps none of them except the current actuation command held in
 * `state::ActuationCell`.
 */

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const OFF_COMMAND: i32 = 0;
pub const ON_COMMAND: i32 = 1;

pub const DEFAULT_TYPE_ID: i32 = 0;
pub const LED_ACTUATOR_TYPE: i32 = 1001;
pub const HUMIDIFIER_ACTUATOR_TYPE: i32 = 1002;
pub const HUMIDITY_SENSOR_TYPE: i32 = 1012;
pub const SYSTEM_PERF_TYPE: i32 = 9001;

pub const LED_ACTUATOR_NAME: &str = "LEDActuator";
pub const HUMIDIFIER_ACTUATOR_NAME: &str = "HumidifierActuator";
pub const CPU_UTIL_NAME: &str = "CPU_UTIL";
pub const MEM_UTIL_NAME: &str = "MEM_UTIL";
pub const SYSTEM_PERF_NAME: &str = "SystemPerfMsg";
pub const SYSTEM_STATE_NAME: &str = "SystemStateMsg";

pub const CONSTRAINED_DEVICE: &str = "constraineddevice";
pub const NOT_SET: &str = "Not Set";

/// Header shared by every record kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordHeader {
    pub name: String,
    #[serde(rename = "typeID")]
    pub type_id: i32,
    #[serde(rename = "locationID")]
    pub location_id: String,
    #[serde(rename = "statusCode")]
    pub status_code: i32,
    #[serde(rename = "timeStamp")]
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "hasError")]
    pub has_error: bool,
}

impl Default for RecordHeader {
    fn default() -> Self {
        Self {
            name: NOT_SET.to_string(),
            type_id: DEFAULT_TYPE_ID,
            location_id: NOT_SET.to_string(),
            status_code: 0,
            timestamp: Utc::now(),
            has_error: false,
        }
    }
}

impl RecordHeader {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

/// A single measurement from a device sensor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SensorData {
    #[serde(flatten)]
    pub header: RecordHeader,
    pub value: f32,
}

impl SensorData {
    pub fn new(name: impl Into<String>, type_id: i32, value: f32) -> Self {
        Self {
            header: RecordHeader {
                type_id,
                ..RecordHeader::named(name)
            },
            value,
        }
    }

    pub fn name(&self) -> &str {
        &self.header.name
    }

    pub fn has_error(&self) -> bool {
        self.header.has_error
    }
}

/// Actuation command (gateway -> device) or response (device -> gateway).
///
/// The two uses share this shape and differ only by `is_response`. A record
/// with the flag set is feedback and must never be acted on as a command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ActuatorData {
    #[serde(flatten)]
    pub header: RecordHeader,
    pub command: i32,
    pub value: f32,
    #[serde(rename = "stateData")]
    pub state_data: String,
    #[serde(rename = "isResponse")]
    pub is_response: bool,
}

impl ActuatorData {
    pub fn command(name: impl Into<String>, type_id: i32, command: i32, value: f32) -> Self {
        Self {
            header: RecordHeader {
                type_id,
                ..RecordHeader::named(name)
            },
            command,
            value,
            ..Self::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.header.name
    }

    pub fn has_error(&self) -> bool {
        self.header.has_error
    }

    pub fn is_response(&self) -> bool {
        self.is_response
    }

    pub fn set_as_response(&mut self) {
        self.is_response = true;
    }

    /// Copy the actuation-relevant fields of `other` into `self`.
    pub fn update_from(&mut self, other: &ActuatorData) {
        self.header = other.header.clone();
        self.command = other.command;
        self.value = other.value;
        self.state_data = other.state_data.clone();
        self.is_response = other.is_response;
    }
}

/// Local CPU / memory utilization sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemPerformanceData {
    #[serde(flatten)]
    pub header: RecordHeader,
    #[serde(rename = "cpuUtil")]
    pub cpu_utilization: f32,
    #[serde(rename = "memUtil")]
    pub memory_utilization: f32,
}

impl Default for SystemPerformanceData {
    fn default() -> Self {
        Self {
            header: RecordHeader {
                type_id: SYSTEM_PERF_TYPE,
                ..RecordHeader::named(SYSTEM_PERF_NAME)
            },
            cpu_utilization: 0.0,
            memory_utilization: 0.0,
        }
    }
}

impl SystemPerformanceData {
    pub fn new(location_id: impl Into<String>, cpu: f32, mem: f32) -> Self {
        let mut data = Self::default();
        data.header.location_id = location_id.into();
        data.cpu_utilization = cpu;
        data.memory_utilization = mem;
        data
    }

    pub fn name(&self) -> &str {
        &self.header.name
    }

    pub fn has_error(&self) -> bool {
        self.header.has_error
    }

    /// Split into sensor-shaped `CPU_UTIL` and `MEM_UTIL` readings for sinks
    /// that only understand sensor payloads.
    pub fn to_sensor_readings(&self) -> [SensorData; 2] {
        let reading = |name: &str, value: f32| SensorData {
            header: RecordHeader {
                name: name.to_string(),
                ..self.header.clone()
            },
            value,
        };
        [
            reading(CPU_UTIL_NAME, self.cpu_utilization),
            reading(MEM_UTIL_NAME, self.memory_utilization),
        ]
    }
}

/// Aggregate state snapshot. Routed as an advisory no-op.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemStateData {
    #[serde(flatten)]
    pub header: RecordHeader,
    pub command: i32,
    #[serde(rename = "sensorDataList")]
    pub sensor_data: Vec<SensorData>,
    #[serde(rename = "sysPerfDataList")]
    pub system_performance_data: Vec<SystemPerformanceData>,
}

impl Default for SystemStateData {
    fn default() -> Self {
        Self {
            header: RecordHeader::named(SYSTEM_STATE_NAME),
            command: 0,
            sensor_data: Vec::new(),
            system_performance_data: Vec::new(),
        }
    }
}

/// Any routed record, as handed to persistence sinks
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Sensor(SensorData),
    Actuator(ActuatorData),
    SystemPerformance(SystemPerformanceData),
    SystemState(SystemStateData),
}

/// Record kind tag used for listener keys and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    Sensor,
    Actuator,
    SystemPerformance,
    SystemState,
}

impl RecordKind {
    pub fn label(&self) -> &'static str {
        match self {
            RecordKind::Sensor => "SensorData",
            RecordKind::Actuator => "ActuatorData",
            RecordKind::SystemPerformance => "SystemPerformanceData",
            RecordKind::SystemState => "SystemStateData",
        }
    }
}

impl Record {
    pub fn kind(&self) -> RecordKind {
        match self {
            Record::Sensor(_) => RecordKind::Sensor,
            Record::Actuator(_) => RecordKind::Actuator,
            Record::SystemPerformance(_) => RecordKind::SystemPerformance,
            Record::SystemState(_) => RecordKind::SystemState,
        }
    }

    pub fn header(&self) -> &RecordHeader {
        match self {
            Record::Sensor(d) => &d.header,
            Record::Actuator(d) => &d.header,
            Record::SystemPerformance(d) => &d.header,
            Record::SystemState(d) => &d.header,
        }
    }
}
