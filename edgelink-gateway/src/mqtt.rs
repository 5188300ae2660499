//! MQTT client adapter.
//!
//! Wraps a rumqttc `AsyncClient` whose event loop runs in its own task.
//! Inbound publishes are decoded and handed to the router from a fresh task
//! each, so a handler that publishes back through this client never blocks
//! the loop that drains its requests.

use crate::codec::DataCodec;
use crate::config::MqttConf;
use crate::connection::ConnectionStatus;
use crate::error::{ConnectorError, ConnectorResult};
use crate::models::{ActuatorData, SensorData, SystemPerformanceData, SystemStateData};
use crate::resource::{ResourceName, ResourceType};
use crate::router::DataMessageListener;
use async_trait::async_trait;
use parking_lot::Mutex;
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS,
    SubscribeFilter,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

const RECONNECT_DELAY: Duration = Duration::from_secs(2);
const STOP_GRACE: Duration = Duration::from_secs(2);

/// Topics the gateway listens on while connected to the local broker.
pub const DEFAULT_SUBSCRIPTIONS: [ResourceName; 4] = [
    ResourceName::GdaMgmtStatus,
    ResourceName::CdaActuatorResponse,
    ResourceName::CdaSensorMsg,
    ResourceName::CdaSystemPerf,
];

/// Broker operations the router depends on.
#[async_trait]
pub trait PubSubClient: Send + Sync {
    async fn connect_client(&self) -> ConnectorResult<()>;
    async fn disconnect_client(&self) -> ConnectorResult<()>;
    async fn publish_message(&self, resource: ResourceName, msg: &str, qos: i32) -> ConnectorResult<()>;
    async fn subscribe_to_topic(&self, resource: ResourceName, qos: i32) -> ConnectorResult<()>;
    async fn unsubscribe_from_topic(&self, resource: ResourceName) -> ConnectorResult<()>;
    fn is_connected(&self) -> bool;
}

/// Handler for a topic outside the canonical resource set.
#[async_trait]
pub trait TopicListener: Send + Sync {
    async fn on_message(&self, topic: &str, payload: &[u8]) -> bool;
}

/// Connection lifecycle hooks, run outside the event loop task.
#[async_trait]
pub trait ConnectionListener: Send + Sync {
    async fn on_connect(&self);
    async fn on_disconnect(&self) {}
}

/// Map an integer level onto QoS, falling back to `default` when out of range.
pub fn clamp_qos(qos: i32, default: QoS) -> QoS {
    match qos {
        0 => QoS::AtMostOnce,
        1 => QoS::AtLeastOnce,
        2 => QoS::ExactlyOnce,
        _ => default,
    }
}

fn qos_from_level(level: u8) -> QoS {
    clamp_qos(i32::from(level), QoS::AtMostOnce)
}

struct Inner {
    conf: MqttConf,
    client_id: String,
    default_qos: QoS,
    codec: DataCodec,
    subscriptions: Vec<ResourceName>,
    status: ConnectionStatus,
    stopping: AtomicBool,
    client: Mutex<Option<AsyncClient>>,
    event_task: Mutex<Option<JoinHandle<()>>>,
    data_listener: Mutex<Option<Arc<dyn DataMessageListener>>>,
    topic_listeners: Mutex<HashMap<String, Arc<dyn TopicListener>>>,
    connection_listener: Mutex<Option<Arc<dyn ConnectionListener>>>,
}

#[derive(Clone)]
pub struct MqttClientConnector {
    inner: Arc<Inner>,
}

impl MqttClientConnector {
    pub fn new(conf: MqttConf, location_id: Option<&str>, default_qos: u8, codec: DataCodec) -> Self {
        Self::with_subscriptions(conf, location_id, default_qos, codec, DEFAULT_SUBSCRIPTIONS.to_vec())
    }

    /// Same as `new` with a custom fixed subscription set (possibly empty).
    pub fn with_subscriptions(
        conf: MqttConf,
        location_id: Option<&str>,
        default_qos: u8,
        codec: DataCodec,
        subscriptions: Vec<ResourceName>,
    ) -> Self {
        let client_id = conf
            .client_id
            .clone()
            .or_else(|| location_id.map(str::to_string))
            .unwrap_or_else(|| format!("edgelink-{}", uuid::Uuid::new_v4()));
        Self {
            inner: Arc::new(Inner {
                conf,
                client_id,
                default_qos: qos_from_level(default_qos),
                codec,
                subscriptions,
                status: ConnectionStatus::new(),
                stopping: AtomicBool::new(false),
                client: Mutex::new(None),
                event_task: Mutex::new(None),
                data_listener: Mutex::new(None),
                topic_listeners: Mutex::new(HashMap::new()),
                connection_listener: Mutex::new(None),
            }),
        }
    }

    pub fn client_id(&self) -> &str {
        &self.inner.client_id
    }

    pub fn status(&self) -> &ConnectionStatus {
        &self.inner.status
    }

    /// True from the start of a connect until disconnect, reconnect attempts included.
    pub fn has_session(&self) -> bool {
        self.inner.client.lock().is_some()
    }

    pub fn subscriptions(&self) -> &[ResourceName] {
        &self.inner.subscriptions
    }

    pub fn set_data_message_listener(&self, listener: Arc<dyn DataMessageListener>) {
        *self.inner.data_listener.lock() = Some(listener);
    }

    pub fn set_connection_listener(&self, listener: Arc<dyn ConnectionListener>) {
        *self.inner.connection_listener.lock() = Some(listener);
    }

    /// Publish on an arbitrary topic string.
    pub async fn publish_topic(&self, topic: &str, payload: &str, qos: i32) -> ConnectorResult<()> {
        let client = self.inner.connected_client()?;
        let qos = clamp_qos(qos, self.inner.default_qos);
        client
            .publish(topic, qos, false, payload.as_bytes().to_vec())
            .await?;
        tracing::debug!("Published {} bytes to {}", payload.len(), topic);
        Ok(())
    }

    /// Subscribe to an arbitrary topic and route its messages to `listener`.
    pub async fn subscribe_topic(
        &self,
        topic: &str,
        qos: i32,
        listener: Arc<dyn TopicListener>,
    ) -> ConnectorResult<()> {
        let client = self.inner.connected_client()?;
        self.inner
            .topic_listeners
            .lock()
            .insert(topic.to_string(), listener);
        let qos = clamp_qos(qos, self.inner.default_qos);
        client.subscribe(topic, qos).await?;
        tracing::info!("Subscribed to topic: {}", topic);
        Ok(())
    }

    /// Decode one inbound message and hand it to its listener.
    pub async fn dispatch_incoming(&self, topic: &str, payload: &[u8]) -> bool {
        self.inner.dispatch_incoming(topic, payload).await
    }
}

impl Inner {
    fn connected_client(&self) -> ConnectorResult<AsyncClient> {
        if !self.status.is_connected() {
            return Err(ConnectorError::NotConnected(self.conf.host.clone()));
        }
        self.client
            .lock()
            .clone()
            .ok_or_else(|| ConnectorError::NotConnected(self.conf.host.clone()))
    }

    fn options(&self) -> MqttOptions {
        let mut opts = MqttOptions::new(&self.client_id, &self.conf.host, self.conf.port);
        opts.set_keep_alive(Duration::from_secs(self.conf.keep_alive_secs.max(5)));
        opts.set_clean_session(true);
        if let (Some(user), Some(pass)) = (&self.conf.username, &self.conf.password) {
            opts.set_credentials(user, pass);
        }
        opts
    }

    async fn on_connected(self: Arc<Self>, client: AsyncClient) {
        if !self.subscriptions.is_empty() {
            let filters: Vec<SubscribeFilter> = self
                .subscriptions
                .iter()
                .map(|r| SubscribeFilter::new(r.topic(), self.default_qos))
                .collect();
            match client.subscribe_many(filters).await {
                Ok(()) => {
                    self.status.mark_subscribed();
                    tracing::info!("Subscribed to {} gateway topics", self.subscriptions.len());
                }
                Err(e) => tracing::error!("Failed to subscribe to gateway topics: {}", e),
            }
        }
        let listener = self.connection_listener.lock().clone();
        if let Some(listener) = listener {
            listener.on_connect().await;
        }
    }

    async fn on_connection_lost(self: Arc<Self>) {
        let listener = self.connection_listener.lock().clone();
        if let Some(listener) = listener {
            listener.on_disconnect().await;
        }
    }

    async fn run_event_loop(
        self: Arc<Self>,
        client: AsyncClient,
        mut eventloop: EventLoop,
        mut connack_tx: Option<oneshot::Sender<()>>,
    ) {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    if ack.code != ConnectReturnCode::Success {
                        tracing::error!("Broker {} refused connection: {:?}", self.conf.host, ack.code);
                        continue;
                    }
                    if self.status.mark_connected() {
                        tracing::info!("MQTT client connected to broker: {}", self.conf.host);
                    }
                    if let Some(tx) = connack_tx.take() {
                        let _ = tx.send(());
                    }
                    tokio::spawn(self.clone().on_connected(client.clone()));
                }
                Ok(Event::Incoming(Packet::Publish(p))) => {
                    let inner = self.clone();
                    tokio::spawn(async move {
                        inner.dispatch_incoming(&p.topic, &p.payload).await;
                    });
                }
                Ok(Event::Outgoing(Outgoing::Disconnect)) if self.stopping.load(Ordering::SeqCst) => {
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    if self.stopping.load(Ordering::SeqCst) {
                        break;
                    }
                    tracing::error!("MQTT connection error ({}): {}", self.conf.host, e);
                    if self.status.mark_disconnected() {
                        tracing::warn!("Lost connection to MQTT broker: {}", self.conf.host);
                        tokio::spawn(self.clone().on_connection_lost());
                    }
                    self.status.increment_reconnects();
                    tokio::time::sleep(RECONNECT_DELAY).await;
                }
            }
        }
        self.status.mark_disconnected();
        tracing::debug!("MQTT event loop stopped for {}", self.client_id);
    }

    async fn dispatch_incoming(&self, topic: &str, payload: &[u8]) -> bool {
        let custom = self.topic_listeners.lock().get(topic).cloned();
        if let Some(listener) = custom {
            return listener.on_message(topic, payload).await;
        }

        let Some(resource) = ResourceName::from_topic(topic) else {
            tracing::warn!("Ignoring message on unknown topic: {}", topic);
            return false;
        };
        let listener = self.data_listener.lock().clone();
        let Some(listener) = listener else {
            tracing::warn!("No data message listener set. Dropping message on {}", topic);
            return false;
        };
        self.dispatch_record(resource, payload, listener).await
    }

    async fn dispatch_record(
        &self,
        resource: ResourceName,
        payload: &[u8],
        listener: Arc<dyn DataMessageListener>,
    ) -> bool {
        let outcome = match resource.resource_type() {
            ResourceType::ActuatorResponse => {
                match self.codec.decode_bytes::<ActuatorData>("ActuatorData", payload) {
                    Ok(d) => Ok(listener.handle_actuator_command_response(resource, &d).await),
                    Err(e) => Err(e),
                }
            }
            ResourceType::SensorMsg => {
                match self.codec.decode_bytes::<SensorData>("SensorData", payload) {
                    Ok(d) => Ok(listener.handle_sensor_message(resource, &d).await),
                    Err(e) => Err(e),
                }
            }
            ResourceType::SystemPerfMsg => {
                match self
                    .codec
                    .decode_bytes::<SystemPerformanceData>("SystemPerformanceData", payload)
                {
                    Ok(d) => Ok(listener.handle_system_performance_message(resource, &d).await),
                    Err(e) => Err(e),
                }
            }
            ResourceType::MgmtStatusMsg => {
                match self.codec.decode_bytes::<SystemStateData>("SystemStateData", payload) {
                    Ok(d) => Ok(listener.handle_system_state_message(resource, &d).await),
                    Err(e) => Err(e),
                }
            }
            // outbound only; routing it would republish onto itself
            ResourceType::ActuatorCmd => {
                tracing::warn!("Ignoring inbound message on outbound topic: {}", resource);
                return false;
            }
        };
        match outcome {
            Ok(handled) => handled,
            Err(e) => {
                tracing::warn!("Failed to decode message on {}: {}", resource, e);
                false
            }
        }
    }
}

#[async_trait]
impl PubSubClient for MqttClientConnector {
    async fn connect_client(&self) -> ConnectorResult<()> {
        let inner = &self.inner;
        // one session per connector, whether it is up, connecting or retrying
        let rx = {
            let mut slot = inner.client.lock();
            if slot.is_some() {
                tracing::warn!("MQTT session to {} already present ({:?})", inner.conf.host, inner.status.state());
                return Ok(());
            }
            inner.stopping.store(false, Ordering::SeqCst);
            inner.status.mark_connecting();
            tracing::info!(
                "Connecting to MQTT broker {}:{} as {}",
                inner.conf.host,
                inner.conf.port,
                inner.client_id
            );

            let (client, eventloop) = AsyncClient::new(inner.options(), inner.conf.capacity.max(10));
            let (tx, rx) = oneshot::channel();
            let handle = tokio::spawn(inner.clone().run_event_loop(client.clone(), eventloop, Some(tx)));
            *slot = Some(client);
            *inner.event_task.lock() = Some(handle);
            rx
        };

        let timeout = inner.conf.connect_timeout_secs.max(1);
        let outcome = tokio::time::timeout(Duration::from_secs(timeout), rx).await;
        if let Ok(Ok(())) = outcome {
            return Ok(());
        }

        inner.stopping.store(true, Ordering::SeqCst);
        let handle = inner.event_task.lock().take();
        if let Some(handle) = handle {
            handle.abort();
        }
        inner.client.lock().take();
        inner.status.mark_disconnected();
        Err(match outcome {
            Err(_) => ConnectorError::Timeout(timeout),
            _ => ConnectorError::ConnectFailed(inner.conf.host.clone()),
        })
    }

    async fn disconnect_client(&self) -> ConnectorResult<()> {
        let inner = &self.inner;
        let client = inner.client.lock().take();
        let Some(client) = client else {
            tracing::warn!("MQTT client not connected to broker: {}", inner.conf.host);
            return Ok(());
        };
        for resource in &inner.subscriptions {
            if let Err(e) = client.unsubscribe(resource.topic()).await {
                tracing::warn!("Failed to unsubscribe from {}: {}", resource, e);
            }
        }
        inner.stopping.store(true, Ordering::SeqCst);
        let result = client.disconnect().await;

        let handle = inner.event_task.lock().take();
        if let Some(mut handle) = handle {
            if tokio::time::timeout(STOP_GRACE, &mut handle).await.is_err() {
                handle.abort();
            }
        }
        inner.status.mark_disconnected();
        inner.topic_listeners.lock().clear();
        tracing::info!("MQTT client disconnected from broker: {}", inner.conf.host);
        result.map_err(ConnectorError::from)
    }

    async fn publish_message(&self, resource: ResourceName, msg: &str, qos: i32) -> ConnectorResult<()> {
        if msg.is_empty() {
            return Err(ConnectorError::InvalidArgument(format!(
                "empty message for {}",
                resource
            )));
        }
        self.publish_topic(&resource.topic(), msg, qos).await
    }

    async fn subscribe_to_topic(&self, resource: ResourceName, qos: i32) -> ConnectorResult<()> {
        let client = self.inner.connected_client()?;
        let qos = clamp_qos(qos, self.inner.default_qos);
        client.subscribe(resource.topic(), qos).await?;
        tracing::info!("Successfully subscribed to topic: {}", resource);
        Ok(())
    }

    async fn unsubscribe_from_topic(&self, resource: ResourceName) -> ConnectorResult<()> {
        let client = self.inner.connected_client()?;
        client.unsubscribe(resource.topic()).await?;
        tracing::info!("Successfully unsubscribed from topic: {}", resource);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.inner.status.is_connected()
    }
}
