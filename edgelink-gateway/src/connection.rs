use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Broker connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Subscribed,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Subscribed => "subscribed",
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected | ConnectionState::Subscribed)
    }
}

/// Shared view of one adapter's connection, updated from its event loop.
#[derive(Clone)]
pub struct ConnectionStatus {
    state: Arc<Mutex<ConnectionState>>,
    reconnects: Arc<AtomicU32>,
}

impl ConnectionStatus {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(ConnectionState::Disconnected)),
            reconnects: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    pub fn mark_connecting(&self) {
        *self.state.lock() = ConnectionState::Connecting;
    }

    /// Returns true on the Disconnected/Connecting -> Connected edge only.
    pub fn mark_connected(&self) -> bool {
        let mut state = self.state.lock();
        let was_connected = state.is_connected();
        if !was_connected {
            *state = ConnectionState::Connected;
        }
        !was_connected
    }

    pub fn mark_subscribed(&self) {
        let mut state = self.state.lock();
        if state.is_connected() {
            *state = ConnectionState::Subscribed;
        }
    }

    /// Returns true if the connection was up before.
    pub fn mark_disconnected(&self) -> bool {
        let mut state = self.state.lock();
        let was_connected = state.is_connected();
        *state = ConnectionState::Disconnected;
        was_connected
    }

    pub fn increment_reconnects(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn reconnects(&self) -> u32 {
        self.reconnects.load(Ordering::Relaxed)
    }
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        Self::new()
    }
}
