/**
 * GATEWAY DEVICE APP - bootstrap and lifecycle
 *
 * ROLE:
 * Builds the router and only the adapters enabled in `GatewayConfig`, wires
 * every inbound callback to the router, and drives start/stop.
 *
 * WIRING:
 * - Router sinks: store (redis or memory), cloud relay, SMTP alert
 * - Router pub/sub: the local MQTT client, used for actuation commands
 * - MQTT, cloud bridge, CoAP ingest resources, sampler -> router
 * - Router actuation listener -> CoAP actuator resource (observe push)
 *
 * FAILURES:
 * One adapter failing to start or stop is logged; the others still run.
 */

use crate::cloud::CloudClientConnector;
use crate::coap::{CoapServerGateway, GetActuatorCommandHandler, UpdateTelemetryHandler};
use crate::codec::DataCodec;
use crate::config::GatewayConfig;
use crate::mqtt::{MqttClientConnector, PubSubClient};
use crate::persistence::{ListenerRegistry, MemoryStore, RedisPersistenceAdapter};
use crate::resource::ResourceName;
use crate::router::{DataMessageListener, DeviceDataManager, HumidityPolicy};
use crate::sinks::{Sink, SinkSet};
use crate::smtp::SmtpClientConnector;
use crate::system::SystemPerformanceManager;
use std::sync::Arc;

pub struct GatewayDeviceApp {
    config: GatewayConfig,
    listeners: Arc<ListenerRegistry>,
    router: Arc<DeviceDataManager>,
    mqtt: Option<MqttClientConnector>,
    cloud: Option<Arc<CloudClientConnector>>,
    coap: Option<Arc<CoapServerGateway>>,
    redis: Option<Arc<RedisPersistenceAdapter>>,
    sampler: Option<Arc<SystemPerformanceManager>>,
}

impl GatewayDeviceApp {
    pub fn new(config: GatewayConfig) -> Self {
        let gw = &config.gateway;
        let codec = DataCodec::default();
        let listeners = Arc::new(ListenerRegistry::new());
        let mut sinks = SinkSet::new();

        let mut redis = None;
        if gw.enable_persistence {
            if config.redis.use_memory_store {
                let mut store = MemoryStore::new(codec, listeners.clone());
                if let Some(path) = &config.redis.snapshot_path {
                    store = store.with_snapshot(path);
                }
                sinks.push(Sink::Store(Arc::new(store)));
            } else {
                let adapter = Arc::new(RedisPersistenceAdapter::new(
                    config.redis.url.as_str(),
                    codec,
                    listeners.clone(),
                ));
                sinks.push(Sink::Store(adapter.clone()));
                redis = Some(adapter);
            }
        }

        let cloud = gw
            .enable_cloud
            .then(|| CloudClientConnector::new(config.cloud.clone(), gw.default_qos, codec));
        if let Some(cloud) = &cloud {
            sinks.push(Sink::Relay(cloud.clone()));
        }

        if gw.enable_smtp {
            let smtp = SmtpClientConnector::new(config.smtp.clone(), gw.location_id.as_str());
            sinks.push(Sink::Alert(Arc::new(smtp)));
        }

        let mqtt = gw.enable_mqtt.then(|| {
            MqttClientConnector::new(
                config.mqtt.clone(),
                Some(gw.location_id.as_str()),
                gw.default_qos,
                codec,
            )
        });

        let mut router = DeviceDataManager::new(codec, sinks)
            .with_humidity_policy(HumidityPolicy::from_config(&config.analysis))
            .with_store_qos(gw.default_qos)
            .with_alert_timeout(gw.alert_timeout_secs);
        if let Some(mqtt) = &mqtt {
            router = router.with_pubsub(Arc::new(mqtt.clone()));
        }
        let router = Arc::new(router);
        let data_listener: Arc<dyn DataMessageListener> = router.clone();

        if let Some(mqtt) = &mqtt {
            mqtt.set_data_message_listener(data_listener.clone());
        }
        if let Some(cloud) = &cloud {
            cloud.set_data_message_listener(data_listener.clone());
        }

        let coap = gw.enable_coap.then(|| {
            let server = Arc::new(CoapServerGateway::new(config.coap.bind.as_str()));
            let actuator = Arc::new(GetActuatorCommandHandler::new(
                router.actuation().clone(),
                codec,
                server.change_notifier(),
            ));
            server.add_resource(ResourceName::CdaActuatorCmd, actuator.clone());
            router.set_actuator_data_listener("coap-actuator-cmd", actuator);

            for resource in [ResourceName::CdaSensorMsg, ResourceName::CdaSystemPerf] {
                let handler = UpdateTelemetryHandler::new(resource, codec, Some(data_listener.clone()));
                server.add_resource(resource, Arc::new(handler));
            }
            server
        });

        let sampler = gw.enable_system_perf.then(|| {
            let sampler = Arc::new(SystemPerformanceManager::new(
                gw.location_id.as_str(),
                gw.poll_cycles_secs,
            ));
            sampler.set_data_message_listener(data_listener.clone());
            sampler
        });

        tracing::info!(
            "Gateway {} built: mqtt={} coap={} cloud={} persistence={} smtp={} sysperf={}",
            gw.location_id,
            gw.enable_mqtt,
            gw.enable_coap,
            gw.enable_cloud,
            gw.enable_persistence,
            gw.enable_smtp,
            gw.enable_system_perf
        );

        Self {
            config,
            listeners,
            router,
            mqtt,
            cloud,
            coap,
            redis,
            sampler,
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn router(&self) -> &Arc<DeviceDataManager> {
        &self.router
    }

    pub fn storage_listeners(&self) -> &Arc<ListenerRegistry> {
        &self.listeners
    }

    pub fn mqtt(&self) -> Option<&MqttClientConnector> {
        self.mqtt.as_ref()
    }

    pub fn coap(&self) -> Option<&Arc<CoapServerGateway>> {
        self.coap.as_ref()
    }

    pub fn cloud(&self) -> Option<&Arc<CloudClientConnector>> {
        self.cloud.as_ref()
    }

    pub fn sampler(&self) -> Option<&Arc<SystemPerformanceManager>> {
        self.sampler.as_ref()
    }

    pub async fn start(&self) {
        tracing::info!("Starting gateway {}...", self.config.gateway.location_id);

        if let Some(redis) = &self.redis {
            if let Err(e) = redis.connect().await {
                tracing::error!("Failed to connect to redis: {}", e);
            }
        }
        if let Some(mqtt) = &self.mqtt {
            if let Err(e) = mqtt.connect_client().await {
                tracing::error!("Failed to connect to MQTT broker: {}", e);
            }
        }
        if let Some(cloud) = &self.cloud {
            if let Err(e) = cloud.connect_client().await {
                tracing::error!("Failed to connect to cloud broker: {}", e);
            }
        }
        if let Some(coap) = &self.coap {
            if let Err(e) = coap.start_server().await {
                tracing::error!("Failed to start CoAP server: {}", e);
            }
        }
        if let Some(sampler) = &self.sampler {
            sampler.start_manager();
        }

        tracing::info!("Gateway started");
    }

    /// Reverse order of `start`.
    pub async fn stop(&self) {
        tracing::info!("Stopping gateway {}...", self.config.gateway.location_id);

        if let Some(sampler) = &self.sampler {
            sampler.stop_manager().await;
        }
        if let Some(coap) = &self.coap {
            coap.stop_server();
        }
        if let Some(cloud) = &self.cloud {
            if let Err(e) = cloud.disconnect_client().await {
                tracing::error!("Failed to disconnect from cloud broker: {}", e);
            }
        }
        if let Some(mqtt) = &self.mqtt {
            if let Err(e) = mqtt.disconnect_client().await {
                tracing::error!("Failed to disconnect from MQTT broker: {}", e);
            }
        }
        if let Some(redis) = &self.redis {
            redis.disconnect().await;
        }

        tracing::info!("Gateway stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sinks::SinkKind;

    fn config() -> GatewayConfig {
        let mut config = GatewayConfig::default();
        config.gateway.enable_mqtt = false;
        config.gateway.enable_system_perf = false;
        config
    }

    #[test]
    fn test_only_enabled_adapters_are_built() {
        let app = GatewayDeviceApp::new(config());
        assert!(app.mqtt().is_none());
        assert!(app.coap().is_none());
        assert!(app.cloud().is_none());
        assert!(app.sampler().is_none());
        assert!(app.router().sinks().is_empty());
    }

    #[test]
    fn test_sinks_follow_flags() {
        let mut config = config();
        config.gateway.enable_persistence = true;
        config.gateway.enable_smtp = true;
        config.redis.use_memory_store = true;
        let app = GatewayDeviceApp::new(config);

        let sinks = app.router().sinks();
        assert_eq!(sinks.len(), 2);
        assert!(sinks.is_enabled(SinkKind::Store));
        assert!(sinks.is_enabled(SinkKind::Alert));
        assert!(!sinks.is_enabled(SinkKind::Relay));
    }

    #[tokio::test]
    async fn test_coap_start_and_stop() {
        let mut config = config();
        config.gateway.enable_coap = true;
        config.coap.bind = "127.0.0.1:0".into();
        let app = GatewayDeviceApp::new(config);

        let coap = app.coap().unwrap().clone();
        coap.with_tree(|tree| {
            assert!(tree.find(&ResourceName::CdaActuatorCmd.path()).is_some());
            assert!(tree.find(&ResourceName::CdaSensorMsg.path()).is_some());
            assert!(tree.find(&ResourceName::CdaSystemPerf.path()).is_some());
            assert!(tree.find(&ResourceName::CdaActuatorResponse.path()).is_none());
        });

        app.start().await;
        assert!(coap.is_running());
        assert!(coap.local_addr().is_some());
        app.stop().await;
        assert!(!coap.is_running());
    }
}
