use super::{CoapReply, CoapResourceHandler, ResourceChangeNotifier};
use crate::codec::DataCodec;
use crate::models::ActuatorData;
use crate::resource::{ResourceName, ResourceType};
use crate::router::{ActuatorDataListener, DataMessageListener};
use crate::state::ActuationCell;
use async_trait::async_trait;
use coap_lite::ResponseType;
use std::sync::Arc;

/// Observable GET for the current actuation command.
pub struct GetActuatorCommandHandler {
    cell: ActuationCell,
    codec: DataCodec,
    notifier: ResourceChangeNotifier,
}

impl GetActuatorCommandHandler {
    pub fn new(cell: ActuationCell, codec: DataCodec, notifier: ResourceChangeNotifier) -> Self {
        Self {
            cell,
            codec,
            notifier,
        }
    }
}

#[async_trait]
impl CoapResourceHandler for GetActuatorCommandHandler {
    fn observable(&self) -> bool {
        true
    }

    async fn handle_get(&self) -> CoapReply {
        match self.codec.encode_actuator(&self.cell.snapshot()) {
            Ok(json) => CoapReply::with_payload(ResponseType::Content, json),
            Err(e) => {
                tracing::warn!("Failed to encode actuator command for CoAP GET: {}", e);
                CoapReply::status(ResponseType::NotAcceptable)
            }
        }
    }
}

impl ActuatorDataListener for GetActuatorCommandHandler {
    fn on_actuator_data_update(&self, data: &ActuatorData) -> bool {
        tracing::debug!("Actuator command changed: {} -> {}", data.name(), data.command);
        if !self.notifier.changed(ResourceName::CdaActuatorCmd) {
            tracing::warn!("CoAP server is not consuming change notifications");
        }
        true
    }
}

/// POST/PUT target for device telemetry. DELETE is acknowledged and ignored.
pub struct UpdateTelemetryHandler {
    resource: ResourceName,
    codec: DataCodec,
    listener: Option<Arc<dyn DataMessageListener>>,
}

impl UpdateTelemetryHandler {
    pub fn new(
        resource: ResourceName,
        codec: DataCodec,
        listener: Option<Arc<dyn DataMessageListener>>,
    ) -> Self {
        Self {
            resource,
            codec,
            listener,
        }
    }

    fn name(&self) -> &'static str {
        self.resource.path_segments()[1]
    }

    async fn update(&self, payload: &[u8], success: ResponseType, verb: &str) -> CoapReply {
        let Some(listener) = &self.listener else {
            tracing::warn!("No data listener for {}; payload not processed", self.resource);
            return CoapReply::status(ResponseType::Continue);
        };

        let handled = match self.resource.resource_type() {
            ResourceType::SystemPerfMsg => {
                match self
                    .codec
                    .decode_bytes("SystemPerformanceData", payload)
                {
                    Ok(data) => {
                        listener
                            .handle_system_performance_message(self.resource, &data)
                            .await
                    }
                    Err(e) => {
                        tracing::warn!("Bad SystemPerformanceData on {}: {}", self.resource, e);
                        return CoapReply::status(ResponseType::BadRequest);
                    }
                }
            }
            _ => match self.codec.decode_bytes("SensorData", payload) {
                Ok(data) => listener.handle_sensor_message(self.resource, &data).await,
                Err(e) => {
                    tracing::warn!("Bad SensorData on {}: {}", self.resource, e);
                    return CoapReply::status(ResponseType::BadRequest);
                }
            },
        };

        if !handled {
            tracing::debug!("Listener declined telemetry on {}", self.resource);
        }
        CoapReply::with_payload(success, format!("{} handled: {}", verb, self.name()))
    }
}

#[async_trait]
impl CoapResourceHandler for UpdateTelemetryHandler {
    async fn handle_post(&self, payload: &[u8]) -> CoapReply {
        self.update(payload, ResponseType::Created, "POST request").await
    }

    async fn handle_put(&self, payload: &[u8]) -> CoapReply {
        self.update(payload, ResponseType::Changed, "PUT data request").await
    }

    async fn handle_delete(&self) -> CoapReply {
        CoapReply::with_payload(ResponseType::Deleted, format!("Deleted: {}", self.name()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        SensorData, SystemPerformanceData, SystemStateData, LED_ACTUATOR_NAME, LED_ACTUATOR_TYPE,
        ON_COMMAND,
    };
    use crate::coap::CoapServerGateway;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Captured {
        sensors: Mutex<Vec<SensorData>>,
        perf: Mutex<Vec<SystemPerformanceData>>,
    }

    #[async_trait]
    impl DataMessageListener for Captured {
        async fn handle_actuator_command_response(&self, _: ResourceName, _: &ActuatorData) -> bool {
            true
        }

        async fn handle_incoming_message(&self, _: ResourceName, _: &str) -> bool {
            true
        }

        async fn handle_sensor_message(&self, _: ResourceName, data: &SensorData) -> bool {
            self.sensors.lock().push(data.clone());
            true
        }

        async fn handle_system_performance_message(
            &self,
            _: ResourceName,
            data: &SystemPerformanceData,
        ) -> bool {
            self.perf.lock().push(data.clone());
            true
        }

        async fn handle_system_state_message(&self, _: ResourceName, _: &SystemStateData) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn test_get_reflects_cell() {
        let gateway = CoapServerGateway::new("127.0.0.1:0");
        let cell = ActuationCell::default();
        let handler = GetActuatorCommandHandler::new(cell.clone(), DataCodec::default(), gateway.change_notifier());

        cell.update(&ActuatorData::command(LED_ACTUATOR_NAME, LED_ACTUATOR_TYPE, ON_COMMAND, 1.0));
        let reply = handler.handle_get().await;
        assert_eq!(reply.status, ResponseType::Content);
        let data = DataCodec::default()
            .decode_bytes::<ActuatorData>("ActuatorData", &reply.payload)
            .unwrap();
        assert_eq!(data.command, ON_COMMAND);

        assert!(handler.observable());
        assert!(handler.on_actuator_data_update(&data));
        assert_eq!(handler.handle_post(b"{}").await.status, ResponseType::MethodNotAllowed);
    }

    #[tokio::test]
    async fn test_telemetry_updates() {
        let listener = Arc::new(Captured::default());
        let codec = DataCodec::default();
        let sensor = UpdateTelemetryHandler::new(ResourceName::CdaSensorMsg, codec, Some(listener.clone()));
        let perf = UpdateTelemetryHandler::new(ResourceName::CdaSystemPerf, codec, Some(listener.clone()));

        let json = codec.encode_sensor(&SensorData::new("TempSensor", 1013, 22.5)).unwrap();
        let created = sensor.handle_post(json.as_bytes()).await;
        assert_eq!(created.status, ResponseType::Created);
        assert_eq!(created.payload, b"POST request handled: cdasensormsg");
        assert_eq!(sensor.handle_put(json.as_bytes()).await.status, ResponseType::Changed);

        let json = codec
            .encode_system_performance(&SystemPerformanceData::new("cda", 10.0, 20.0))
            .unwrap();
        let changed = perf.handle_put(json.as_bytes()).await;
        assert_eq!(changed.status, ResponseType::Changed);
        assert_eq!(changed.payload, b"PUT data request handled: cdasysperf");

        assert_eq!(sensor.handle_post(b"garbage").await.status, ResponseType::BadRequest);
        let deleted = sensor.handle_delete().await;
        assert_eq!(deleted.status, ResponseType::Deleted);
        assert_eq!(deleted.payload, b"Deleted: cdasensormsg");

        assert_eq!(listener.sensors.lock().len(), 2);
        assert_eq!(listener.perf.lock().len(), 1);
        assert_eq!(listener.perf.lock()[0].memory_utilization, 20.0);
    }

    #[tokio::test]
    async fn test_no_listener_continues() {
        let handler = UpdateTelemetryHandler::new(ResourceName::CdaSensorMsg, DataCodec::default(), None);
        assert_eq!(handler.handle_post(b"{}").await.status, ResponseType::Continue);
    }
}
