//! JSON codec for the four record kinds.
//!
//! A `DataCodec` is passed to every adapter at construction; nothing reaches
//! for a process-wide instance.

use crate::error::CodecError;
use crate::models::{ActuatorData, Record, SensorData, SystemPerformanceData, SystemStateData};
use serde::de::DeserializeOwned;
use serde::Serialize;

#[derive(Debug, Clone, Copy, Default)]
pub struct DataCodec {
    pretty: bool,
}

impl DataCodec {
    pub fn new(pretty: bool) -> Self {
        Self { pretty }
    }

    fn encode<T: Serialize>(&self, kind: &'static str, data: &T) -> Result<String, CodecError> {
        let result = if self.pretty {
            serde_json::to_string_pretty(data)
        } else {
            serde_json::to_string(data)
        };
        result.map_err(|source| CodecError::Encode { kind, source })
    }

    fn decode<T: DeserializeOwned>(&self, kind: &'static str, text: &str) -> Result<T, CodecError> {
        if text.trim().is_empty() {
            return Err(CodecError::EmptyPayload);
        }
        serde_json::from_str(text).map_err(|source| CodecError::Decode { kind, source })
    }

    pub fn encode_sensor(&self, data: &SensorData) -> Result<String, CodecError> {
        self.encode("SensorData", data)
    }

    pub fn decode_sensor(&self, text: &str) -> Result<SensorData, CodecError> {
        self.decode("SensorData", text)
    }

    pub fn encode_actuator(&self, data: &ActuatorData) -> Result<String, CodecError> {
        self.encode("ActuatorData", data)
    }

    pub fn decode_actuator(&self, text: &str) -> Result<ActuatorData, CodecError> {
        self.decode("ActuatorData", text)
    }

    pub fn encode_system_performance(
        &self,
        data: &SystemPerformanceData,
    ) -> Result<String, CodecError> {
        self.encode("SystemPerformanceData", data)
    }

    pub fn decode_system_performance(
        &self,
        text: &str,
    ) -> Result<SystemPerformanceData, CodecError> {
        self.decode("SystemPerformanceData", text)
    }

    pub fn encode_system_state(&self, data: &SystemStateData) -> Result<String, CodecError> {
        self.encode("SystemStateData", data)
    }

    pub fn decode_system_state(&self, text: &str) -> Result<SystemStateData, CodecError> {
        self.decode("SystemStateData", text)
    }

    /// Encode whichever record kind is wrapped, as the stores write it.
    pub fn encode_record(&self, record: &Record) -> Result<String, CodecError> {
        match record {
            Record::Sensor(d) => self.encode_sensor(d),
            Record::Actuator(d) => self.encode_actuator(d),
            Record::SystemPerformance(d) => self.encode_system_performance(d),
            Record::SystemState(d) => self.encode_system_state(d),
        }
    }

    /// JSON tree form of [`DataCodec::encode_record`], for embedding in a larger document.
    pub fn record_value(&self, record: &Record) -> Result<serde_json::Value, CodecError> {
        let kind = record.kind().label();
        let text = self.encode_record(record)?;
        serde_json::from_str(&text).map_err(|source| CodecError::Decode { kind, source })
    }

    /// Bytes variant used by the network adapters.
    pub fn decode_bytes<T: DeserializeOwned>(
        &self,
        kind: &'static str,
        bytes: &[u8],
    ) -> Result<T, CodecError> {
        if bytes.is_empty() {
            return Err(CodecError::EmptyPayload);
        }
        serde_json::from_slice(bytes).map_err(|source| CodecError::Decode { kind, source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::*;

    #[test]
    fn test_encode_record_matches_typed_encoders() {
        let codec = DataCodec::default();
        let sensor = SensorData::new("TempSensor", 1013, 3.5);
        let record = Record::Sensor(sensor.clone());
        assert_eq!(codec.encode_record(&record).unwrap(), codec.encode_sensor(&sensor).unwrap());
        let value = codec.record_value(&record).unwrap();
        assert_eq!(value["typeID"], 1013);
        assert_eq!(value["value"], 3.5);
    }

    #[test]
    fn test_actuator_round_trip() {
        let codec = DataCodec::default();
        let mut data = ActuatorData::command(LED_ACTUATOR_NAME, LED_ACTUATOR_TYPE, ON_COMMAND, 12.5);
        data.state_data = "LED switching ON".into();
        data.header.location_id = CONSTRAINED_DEVICE.into();
        data.header.has_error = true;
        data.set_as_response();

        let text = codec.encode_actuator(&data).unwrap();
        assert_eq!(codec.decode_actuator(&text).unwrap(), data);
    }

    #[test]
    fn test_sensor_and_perf_round_trip() {
        let codec = DataCodec::new(true);
        let sensor = SensorData::new("HumiditySensor", HUMIDITY_SENSOR_TYPE, 48.25);
        let text = codec.encode_sensor(&sensor).unwrap();
        assert!(text.contains('\n'));
        assert_eq!(codec.decode_sensor(&text).unwrap(), sensor);

        let perf = SystemPerformanceData::new("gateway001", 42.0, 77.5);
        let text = codec.encode_system_performance(&perf).unwrap();
        assert_eq!(codec.decode_system_performance(&text).unwrap(), perf);
    }

    #[test]
    fn test_system_state_round_trip() {
        let codec = DataCodec::default();
        let mut state = SystemStateData::default();
        state.command = 3;
        state.sensor_data.push(SensorData::new("TempSensor", 1013, 21.0));
        state
            .system_performance_data
            .push(SystemPerformanceData::new("gateway001", 1.0, 2.0));
        let text = codec.encode_system_state(&state).unwrap();
        assert_eq!(codec.decode_system_state(&text).unwrap(), state);
    }

    #[test]
    fn test_missing_fields_take_defaults() {
        let codec = DataCodec::default();
        let data = codec.decode_actuator(r#"{"command": 1}"#).unwrap();
        assert_eq!(data.command, ON_COMMAND);
        assert_eq!(data.name(), NOT_SET);
        assert!(!data.is_response());
    }

    #[test]
    fn test_malformed_payloads_fail() {
        let codec = DataCodec::default();
        assert!(matches!(codec.decode_sensor("   "), Err(CodecError::EmptyPayload)));
        assert!(matches!(
            codec.decode_sensor("[1, 2]"),
            Err(CodecError::Decode { kind: "SensorData", .. })
        ));
        assert!(codec.decode_actuator(r#"{"command": "on"}"#).is_err());
        assert!(codec
            .decode_bytes::<SensorData>("SensorData", b"")
            .is_err());
    }
}
