//! CoAP server gateway.
//!
//! Resources live in a tree built from each identifier's path segments.
//! Intermediate segments become plain container nodes and are shared between
//! identifiers with a common prefix; the last segment carries the handler.
//! Datagrams are parsed with `coap-lite`. One tokio task receives; each
//! exchange and each observe push then runs in its own spawned task.

pub mod handlers;

pub use self::handlers::{GetActuatorCommandHandler, UpdateTelemetryHandler};

use crate::error::ConnectorResult;
use crate::resource::ResourceName;
use async_trait::async_trait;
use coap_lite::{
    CoapOption, CoapRequest, MessageClass, MessageType, ObserveOption, Packet, RequestType,
    ResponseType,
};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, AtomicU32, Ordering};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const MAX_DATAGRAM: usize = 1152;

/// Status and body produced by a resource handler.
#[derive(Debug, Clone)]
pub struct CoapReply {
    pub status: ResponseType,
    pub payload: Vec<u8>,
}

impl CoapReply {
    pub fn status(status: ResponseType) -> Self {
        Self {
            status,
            payload: Vec::new(),
        }
    }

    pub fn with_payload(status: ResponseType, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            payload: payload.into(),
        }
    }
}

#[async_trait]
pub trait CoapResourceHandler: Send + Sync {
    fn observable(&self) -> bool {
        false
    }

    async fn handle_get(&self) -> CoapReply {
        CoapReply::status(ResponseType::MethodNotAllowed)
    }

    async fn handle_post(&self, _payload: &[u8]) -> CoapReply {
        CoapReply::status(ResponseType::MethodNotAllowed)
    }

    async fn handle_put(&self, _payload: &[u8]) -> CoapReply {
        CoapReply::status(ResponseType::MethodNotAllowed)
    }

    async fn handle_delete(&self) -> CoapReply {
        CoapReply::status(ResponseType::MethodNotAllowed)
    }
}

/// Signals that a resource's state changed and observers should hear about it.
#[derive(Clone)]
pub struct ResourceChangeNotifier {
    tx: mpsc::UnboundedSender<ResourceName>,
}

impl ResourceChangeNotifier {
    pub fn changed(&self, resource: ResourceName) -> bool {
        self.tx.send(resource).is_ok()
    }
}

#[derive(Default)]
pub struct ResourceNode {
    children: BTreeMap<String, ResourceNode>,
    handler: Option<Arc<dyn CoapResourceHandler>>,
}

impl ResourceNode {
    pub fn is_container(&self) -> bool {
        self.handler.is_none()
    }

    pub fn child(&self, name: &str) -> Option<&ResourceNode> {
        self.children.get(name)
    }

    pub fn child_count(&self) -> usize {
        self.children.len()
    }
}

#[derive(Default)]
pub struct ResourceTree {
    root: ResourceNode,
}

impl ResourceTree {
    /// Walk `segments`, creating missing containers, and bind the last one.
    pub fn add_resource_chain(&mut self, segments: &[&str], handler: Arc<dyn CoapResourceHandler>) {
        let mut node = &mut self.root;
        for segment in segments {
            node = node.children.entry(segment.to_string()).or_default();
        }
        if node.handler.is_some() {
            tracing::warn!("Replacing CoAP handler at /{}", segments.join("/"));
        }
        node.handler = Some(handler);
    }

    pub fn find(&self, path: &str) -> Option<Arc<dyn CoapResourceHandler>> {
        let mut node = &self.root;
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            node = node.children.get(segment)?;
        }
        node.handler.clone()
    }

    pub fn root(&self) -> &ResourceNode {
        &self.root
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Observer {
    peer: SocketAddr,
    token: Vec<u8>,
}

/// Observe option value: 24-bit sequence, big endian, no leading zero bytes.
fn observe_value(seq: u32) -> Vec<u8> {
    let bytes = (seq & 0x00FF_FFFF).to_be_bytes();
    let first = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    bytes[first..].to_vec()
}

pub struct CoapServerGateway {
    bind: String,
    tree: RwLock<ResourceTree>,
    observers: Mutex<HashMap<ResourceName, Vec<Observer>>>,
    sequence: AtomicU32,
    message_id: AtomicU16,
    changes_tx: mpsc::UnboundedSender<ResourceName>,
    changes_rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<ResourceName>>>,
    socket: Mutex<Option<Arc<UdpSocket>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl CoapServerGateway {
    pub fn new(bind: impl Into<String>) -> Self {
        let (changes_tx, changes_rx) = mpsc::unbounded_channel();
        Self {
            bind: bind.into(),
            tree: RwLock::new(ResourceTree::default()),
            observers: Mutex::new(HashMap::new()),
            sequence: AtomicU32::new(2),
            message_id: AtomicU16::new(1),
            changes_tx,
            changes_rx: Arc::new(tokio::sync::Mutex::new(changes_rx)),
            socket: Mutex::new(None),
            task: Mutex::new(None),
        }
    }

    pub fn add_resource(&self, resource: ResourceName, handler: Arc<dyn CoapResourceHandler>) {
        self.tree
            .write()
            .add_resource_chain(&resource.path_segments(), handler);
        tracing::info!("Registered CoAP resource {}", resource.path());
    }

    pub fn change_notifier(&self) -> ResourceChangeNotifier {
        ResourceChangeNotifier {
            tx: self.changes_tx.clone(),
        }
    }

    pub fn with_tree<R>(&self, f: impl FnOnce(&ResourceTree) -> R) -> R {
        f(&self.tree.read())
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.lock().as_ref().and_then(|s| s.local_addr().ok())
    }

    pub fn observer_count(&self, resource: ResourceName) -> usize {
        self.observers
            .lock()
            .get(&resource)
            .map_or(0, Vec::len)
    }

    pub fn is_running(&self) -> bool {
        self.task.lock().is_some()
    }

    pub async fn start_server(self: &Arc<Self>) -> ConnectorResult<()> {
        if self.is_running() {
            tracing::warn!("CoAP server already running on {}", self.bind);
            return Ok(());
        }
        let socket = Arc::new(UdpSocket::bind(&self.bind).await?);
        tracing::info!("CoAP server listening on {}", socket.local_addr()?);
        *self.socket.lock() = Some(socket.clone());

        let server = self.clone();
        let handle = tokio::spawn(async move { server.serve(socket).await });
        *self.task.lock() = Some(handle);
        Ok(())
    }

    pub fn stop_server(&self) -> bool {
        let handle = self.task.lock().take();
        self.socket.lock().take();
        self.observers.lock().clear();
        match handle {
            Some(handle) => {
                handle.abort();
                tracing::info!("CoAP server stopped");
                true
            }
            None => false,
        }
    }

    async fn serve(self: Arc<Self>, socket: Arc<UdpSocket>) {
        let mut changes = self.changes_rx.lock().await;
        let mut buf = vec![0u8; MAX_DATAGRAM];
        loop {
            tokio::select! {
                received = socket.recv_from(&mut buf) => match received {
                    Ok((len, peer)) => {
                        let bytes = buf[..len].to_vec();
                        let server = self.clone();
                        let socket = socket.clone();
                        tokio::spawn(async move {
                            if let Some(reply) = server.handle_datagram(&bytes, peer).await {
                                if let Err(e) = socket.send_to(&reply, peer).await {
                                    tracing::warn!("Failed to answer CoAP peer {}: {}", peer, e);
                                }
                            }
                        });
                    }
                    Err(e) => tracing::warn!("CoAP receive failed: {}", e),
                },
                Some(resource) = changes.recv() => {
                    let server = self.clone();
                    let socket = socket.clone();
                    tokio::spawn(async move { server.notify_observers(&socket, resource).await });
                }
            }
        }
    }

    fn next_sequence(&self) -> u32 {
        self.sequence.fetch_add(1, Ordering::Relaxed)
    }

    fn register_observer(&self, resource: ResourceName, observer: Observer) {
        let mut observers = self.observers.lock();
        let list = observers.entry(resource).or_default();
        if !list.contains(&observer) {
            tracing::info!("CoAP observer {} registered on {}", observer.peer, resource.path());
            list.push(observer);
        }
    }

    fn deregister_observer(&self, resource: ResourceName, observer: &Observer) {
        if let Some(list) = self.observers.lock().get_mut(&resource) {
            list.retain(|o| o != observer);
        }
    }

    fn forget_peer(&self, peer: SocketAddr) {
        for list in self.observers.lock().values_mut() {
            list.retain(|o| o.peer != peer);
        }
    }

    /// Parse one request and build the reply datagram, if one is due.
    pub async fn handle_datagram(&self, bytes: &[u8], peer: SocketAddr) -> Option<Vec<u8>> {
        let packet = match Packet::from_bytes(bytes) {
            Ok(packet) => packet,
            Err(e) => {
                tracing::warn!("Dropping malformed CoAP datagram from {}: {:?}", peer, e);
                return None;
            }
        };
        if packet.header.get_type() == MessageType::Reset {
            self.forget_peer(peer);
            return None;
        }

        let mut request: CoapRequest<SocketAddr> = CoapRequest::from_packet(packet, peer);
        let path = request.get_path();
        let handler = self.tree.read().find(&path);
        let mut observing = false;

        let reply = match handler {
            None => CoapReply::status(ResponseType::NotFound),
            Some(handler) => match request.get_method() {
                RequestType::Get => {
                    // coap-lite paths carry no leading separator; observers are keyed by identifier
                    let observed = ResourceName::from_path(&path).filter(|_| handler.observable());
                    if let Some(resource) = observed {
                        let observer = Observer {
                            peer,
                            token: request.message.get_token().to_vec(),
                        };
                        match request.get_observe_flag() {
                            Some(Ok(ObserveOption::Register)) => {
                                self.register_observer(resource, observer);
                                observing = true;
                            }
                            Some(Ok(ObserveOption::Deregister)) => {
                                self.deregister_observer(resource, &observer)
                            }
                            _ => {}
                        }
                    }
                    handler.handle_get().await
                }
                RequestType::Post => handler.handle_post(&request.message.payload).await,
                RequestType::Put => handler.handle_put(&request.message.payload).await,
                RequestType::Delete => handler.handle_delete().await,
                _ => CoapReply::status(ResponseType::MethodNotAllowed),
            },
        };

        let response = request.response.as_mut()?;
        response.set_status(reply.status);
        response.message.payload = reply.payload;
        if observing {
            response
                .message
                .add_option(CoapOption::Observe, observe_value(self.next_sequence()));
        }
        match response.message.to_bytes() {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                tracing::warn!("Failed to encode CoAP response for {}: {:?}", path, e);
                None
            }
        }
    }

    async fn notify_observers(&self, socket: &UdpSocket, resource: ResourceName) {
        let path = resource.path();
        let observers = self.observers.lock().get(&resource).cloned().unwrap_or_default();
        if observers.is_empty() {
            return;
        }
        let handler = self.tree.read().find(&path);
        let Some(handler) = handler else {
            return;
        };
        let reply = handler.handle_get().await;
        let seq = self.next_sequence();

        for observer in observers {
            let mut packet = Packet::new();
            packet.header.set_type(MessageType::NonConfirmable);
            packet.header.code = MessageClass::Response(reply.status);
            packet.header.message_id = self.message_id.fetch_add(1, Ordering::Relaxed);
            packet.set_token(observer.token.clone());
            packet.add_option(CoapOption::Observe, observe_value(seq));
            packet.payload = reply.payload.clone();

            match packet.to_bytes() {
                Ok(bytes) => {
                    if let Err(e) = socket.send_to(&bytes, observer.peer).await {
                        tracing::warn!("Failed to notify CoAP observer {}: {}", observer.peer, e);
                    }
                }
                Err(e) => tracing::warn!("Failed to encode CoAP notification: {:?}", e),
            }
        }
        tracing::debug!("Notified observers of {}", path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl CoapResourceHandler for Echo {
        fn observable(&self) -> bool {
            true
        }

        async fn handle_get(&self) -> CoapReply {
            CoapReply::with_payload(ResponseType::Content, b"hello".to_vec())
        }
    }

    fn peer() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    fn request(method: RequestType, path: &str, observe: Option<u32>) -> Vec<u8> {
        let mut request: CoapRequest<SocketAddr> = CoapRequest::new();
        request.message.header.set_type(MessageType::Confirmable);
        request.message.header.message_id = 7;
        request.message.set_token(vec![0xAB, 0xCD]);
        request.set_method(method);
        request.set_path(path);
        if let Some(value) = observe {
            request.message.add_option(CoapOption::Observe, observe_value(value));
        }
        request.message.to_bytes().unwrap()
    }

    fn status_of(bytes: &[u8]) -> MessageClass {
        Packet::from_bytes(bytes).unwrap().header.code
    }

    #[test]
    fn test_shared_prefix_reuses_container() {
        let mut tree = ResourceTree::default();
        tree.add_resource_chain(&ResourceName::CdaSensorMsg.path_segments(), Arc::new(Echo));
        tree.add_resource_chain(&ResourceName::CdaSystemPerf.path_segments(), Arc::new(Echo));

        assert_eq!(tree.root().child_count(), 1);
        let piot = tree.root().child("piot").unwrap();
        assert!(piot.is_container());
        assert_eq!(piot.child_count(), 2);
        assert!(tree.find("/piot/cdasensormsg").is_some());
        assert!(tree.find("piot/cdasysperf/").is_some());
        assert!(tree.find("/piot").is_none());
        assert!(tree.find("/piot/unknown").is_none());
    }

    #[test]
    fn test_observe_value_encoding() {
        assert!(observe_value(0).is_empty());
        assert_eq!(observe_value(5), vec![5]);
        assert_eq!(observe_value(0x0102), vec![1, 2]);
        assert_eq!(observe_value(0x0101_0203), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_unknown_path_and_method() {
        let gateway = CoapServerGateway::new("127.0.0.1:0");
        gateway.add_resource(ResourceName::CdaActuatorCmd, Arc::new(Echo));

        let reply = gateway
            .handle_datagram(&request(RequestType::Get, "piot/nothing", None), peer())
            .await
            .unwrap();
        assert_eq!(status_of(&reply), MessageClass::Response(ResponseType::NotFound));

        let reply = gateway
            .handle_datagram(&request(RequestType::Post, "piot/cdaactuatorcmd", None), peer())
            .await
            .unwrap();
        assert_eq!(status_of(&reply), MessageClass::Response(ResponseType::MethodNotAllowed));

        assert!(gateway.handle_datagram(b"\x00", peer()).await.is_none());
    }

    #[tokio::test]
    async fn test_observe_register_and_deregister() {
        let gateway = CoapServerGateway::new("127.0.0.1:0");
        gateway.add_resource(ResourceName::CdaActuatorCmd, Arc::new(Echo));

        let reply = gateway
            .handle_datagram(&request(RequestType::Get, "piot/cdaactuatorcmd", Some(0)), peer())
            .await
            .unwrap();
        let packet = Packet::from_bytes(&reply).unwrap();
        assert_eq!(packet.header.code, MessageClass::Response(ResponseType::Content));
        assert_eq!(packet.payload, b"hello");
        assert!(packet.get_option(CoapOption::Observe).is_some());
        assert_eq!(gateway.observer_count(ResourceName::CdaActuatorCmd), 1);

        gateway
            .handle_datagram(&request(RequestType::Get, "piot/cdaactuatorcmd", Some(1)), peer())
            .await;
        assert_eq!(gateway.observer_count(ResourceName::CdaActuatorCmd), 0);
    }

    struct SlowSink;

    #[async_trait]
    impl CoapResourceHandler for SlowSink {
        async fn handle_post(&self, _payload: &[u8]) -> CoapReply {
            tokio::time::sleep(std::time::Duration::from_secs(3)).await;
            CoapReply::status(ResponseType::Created)
        }
    }

    async fn recv_packet(socket: &UdpSocket) -> Packet {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let (len, _) = tokio::time::timeout(std::time::Duration::from_secs(2), socket.recv_from(&mut buf))
            .await
            .expect("no datagram within 2s")
            .unwrap();
        Packet::from_bytes(&buf[..len]).unwrap()
    }

    #[tokio::test]
    async fn test_registered_observer_is_notified() {
        let server = Arc::new(CoapServerGateway::new("127.0.0.1:0"));
        server.add_resource(ResourceName::CdaActuatorCmd, Arc::new(Echo));
        server.start_server().await.unwrap();
        let addr = server.local_addr().unwrap();
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        client
            .send_to(&request(RequestType::Get, "piot/cdaactuatorcmd", Some(0)), addr)
            .await
            .unwrap();
        recv_packet(&client).await;
        assert_eq!(server.observer_count(ResourceName::CdaActuatorCmd), 1);

        assert!(server.change_notifier().changed(ResourceName::CdaActuatorCmd));
        let pushed = recv_packet(&client).await;
        assert_eq!(pushed.header.get_type(), MessageType::NonConfirmable);
        assert_eq!(pushed.get_token(), &[0xAB, 0xCD]);
        assert_eq!(pushed.payload, b"hello");

        server.stop_server();
    }

    #[tokio::test]
    async fn test_slow_exchange_does_not_block_other_peers() {
        let server = Arc::new(CoapServerGateway::new("127.0.0.1:0"));
        server.add_resource(ResourceName::CdaActuatorCmd, Arc::new(Echo));
        server.add_resource(ResourceName::CdaSensorMsg, Arc::new(SlowSink));
        server.start_server().await.unwrap();
        let addr = server.local_addr().unwrap();

        let slow_peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let other_peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        slow_peer
            .send_to(&request(RequestType::Post, "piot/cdasensormsg", None), addr)
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let started = std::time::Instant::now();
        other_peer
            .send_to(&request(RequestType::Get, "piot/cdaactuatorcmd", None), addr)
            .await
            .unwrap();
        let reply = recv_packet(&other_peer).await;
        assert_eq!(reply.header.code, MessageClass::Response(ResponseType::Content));
        assert!(started.elapsed() < std::time::Duration::from_secs(1));

        server.stop_server();
    }
}
