//! Downstream sinks reached by the router.
//!
//! Each capability is a narrow trait; the router only sees a [`SinkSet`] and
//! iterates the enabled entries in registration order.

use crate::error::ConnectorResult;
use crate::models::{Record, SensorData, SystemPerformanceData};
use crate::resource::ResourceName;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Last-value store keyed by topic.
#[async_trait]
pub trait PersistenceClient: Send + Sync {
    async fn store(&self, topic: &str, qos: u8, records: &[Record]) -> ConnectorResult<()>;
}

/// Forwarding toward the cloud side.
#[async_trait]
pub trait CloudRelay: Send + Sync {
    async fn send_sensor(&self, resource: ResourceName, data: &SensorData) -> ConnectorResult<()>;

    /// Sensor-shaped relays get the snapshot as two readings. Both are always
    /// attempted; the call succeeds only if both sends succeed.
    async fn send_system_performance(
        &self,
        resource: ResourceName,
        data: &SystemPerformanceData,
    ) -> ConnectorResult<()> {
        let [cpu, mem] = data.to_sensor_readings();
        let cpu_result = self.send_sensor(resource, &cpu).await;
        let mem_result = self.send_sensor(resource, &mem).await;
        cpu_result.and(mem_result)
    }
}

/// Human notification channel.
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn send(
        &self,
        resource: ResourceName,
        payload: &str,
        timeout_secs: u64,
    ) -> ConnectorResult<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkKind {
    Store,
    Relay,
    Alert,
}

#[derive(Clone)]
pub enum Sink {
    Store(Arc<dyn PersistenceClient>),
    Relay(Arc<dyn CloudRelay>),
    Alert(Arc<dyn AlertSink>),
}

impl Sink {
    pub fn kind(&self) -> SinkKind {
        match self {
            Sink::Store(_) => SinkKind::Store,
            Sink::Relay(_) => SinkKind::Relay,
            Sink::Alert(_) => SinkKind::Alert,
        }
    }
}

struct SinkEntry {
    sink: Sink,
    enabled: AtomicBool,
}

/// Ordered set of sinks, each switchable at runtime.
#[derive(Default)]
pub struct SinkSet {
    entries: Vec<SinkEntry>,
}

impl SinkSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Sink) -> Self {
        self.push(sink);
        self
    }

    pub fn push(&mut self, sink: Sink) {
        self.entries.push(SinkEntry {
            sink,
            enabled: AtomicBool::new(true),
        });
    }

    /// Toggle every sink of the given kind.
    pub fn set_enabled(&self, kind: SinkKind, enabled: bool) {
        for entry in self.entries.iter().filter(|e| e.sink.kind() == kind) {
            entry.enabled.store(enabled, Ordering::Relaxed);
        }
    }

    pub fn is_enabled(&self, kind: SinkKind) -> bool {
        self.entries
            .iter()
            .any(|e| e.sink.kind() == kind && e.enabled.load(Ordering::Relaxed))
    }

    /// Enabled sinks in registration order.
    pub fn enabled(&self) -> impl Iterator<Item = &Sink> {
        self.entries
            .iter()
            .filter(|e| e.enabled.load(Ordering::Relaxed))
            .map(|e| &e.sink)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConnectorError;
    use parking_lot::Mutex;

    struct FlakyRelay {
        sent: Mutex<Vec<(String, f32)>>,
        fail_name: Option<&'static str>,
    }

    #[async_trait]
    impl CloudRelay for FlakyRelay {
        async fn send_sensor(&self, _: ResourceName, data: &SensorData) -> ConnectorResult<()> {
            self.sent.lock().push((data.name().to_string(), data.value));
            if Some(data.name()) == self.fail_name {
                return Err(ConnectorError::NotConnected("cloud".into()));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_perf_relay_requires_both_sends() {
        let perf = SystemPerformanceData::new("gateway001", 42.0, 77.5);
        let ok = FlakyRelay { sent: Mutex::new(Vec::new()), fail_name: None };
        assert!(ok
            .send_system_performance(ResourceName::GdaSystemPerf, &perf)
            .await
            .is_ok());
        assert_eq!(
            *ok.sent.lock(),
            vec![("CPU_UTIL".to_string(), 42.0), ("MEM_UTIL".to_string(), 77.5)]
        );

        let cpu_fails = FlakyRelay { sent: Mutex::new(Vec::new()), fail_name: Some("CPU_UTIL") };
        assert!(cpu_fails
            .send_system_performance(ResourceName::GdaSystemPerf, &perf)
            .await
            .is_err());
        // second send still attempted
        assert_eq!(cpu_fails.sent.lock().len(), 2);
    }

    #[test]
    fn test_toggle_by_kind() {
        let relay = Arc::new(FlakyRelay { sent: Mutex::new(Vec::new()), fail_name: None });
        let set = SinkSet::new().with(Sink::Relay(relay));
        assert!(set.is_enabled(SinkKind::Relay));
        assert!(!set.is_enabled(SinkKind::Store));
        set.set_enabled(SinkKind::Relay, false);
        assert!(!set.is_enabled(SinkKind::Relay));
        assert_eq!(set.enabled().count(), 0);
        assert_eq!(set.len(), 1);
    }
}
