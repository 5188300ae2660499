/**
 * PERSISTENCE - last-value stores behind the router's Store sink
 *
 * ROLE:
 * Two `PersistenceClient` implementations: an in-process `MemoryStore`
 * (optional JSON snapshot on disk) and a `RedisPersistenceAdapter`.
 * Neither keeps history: a new record under a topic replaces the old one.
 *
 * LISTENERS:
 * Consumers can watch stores through the `ListenerRegistry`. Keys are
 * `"{RecordKind}_{topic}"`, with `"all"` standing in for a missing topic,
 * e.g. `SensorData_PIOT/ConstrainedDevice/SensorMsg` or `SensorData_all`.
 */

pub mod memory;
pub mod redis;

pub use self::memory::MemoryStore;
pub use self::redis::RedisPersistenceAdapter;

use crate::models::{Record, RecordKind};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

pub const ALL_TOPICS: &str = "all";

/// Notified after a record was written.
pub trait StorageListener: Send + Sync {
    fn on_stored(&self, topic: &str, record: &Record);
}

pub fn listener_key(kind: Option<RecordKind>, topic: Option<&str>) -> String {
    let topic = topic.unwrap_or(ALL_TOPICS);
    match kind {
        Some(kind) => format!("{}_{}", kind.label(), topic),
        None => topic.to_string(),
    }
}

#[derive(Default)]
pub struct ListenerRegistry {
    listeners: Mutex<HashMap<String, Vec<Arc<dyn StorageListener>>>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the key the listener was registered under.
    pub fn register(
        &self,
        kind: Option<RecordKind>,
        topic: Option<&str>,
        listener: Arc<dyn StorageListener>,
    ) -> String {
        let key = listener_key(kind, topic);
        self.listeners
            .lock()
            .entry(key.clone())
            .or_default()
            .push(listener);
        key
    }

    pub fn unregister(&self, key: &str) -> bool {
        self.listeners.lock().remove(key).is_some()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.listeners.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Notify every listener whose key matches this write, most specific first.
    pub fn notify(&self, topic: &str, record: &Record) {
        let kind = record.kind();
        let candidates = [
            listener_key(Some(kind), Some(topic)),
            listener_key(Some(kind), None),
            listener_key(None, Some(topic)),
            listener_key(None, None),
        ];
        let matched: Vec<Arc<dyn StorageListener>> = {
            let listeners = self.listeners.lock();
            candidates
                .iter()
                .filter_map(|key| listeners.get(key))
                .flat_map(|list| list.iter().cloned())
                .collect()
        };
        for listener in matched {
            listener.on_stored(topic, record);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SensorData;

    struct Counter(Mutex<Vec<String>>);

    impl StorageListener for Counter {
        fn on_stored(&self, topic: &str, _record: &Record) {
            self.0.lock().push(topic.to_string());
        }
    }

    #[test]
    fn test_listener_keys() {
        assert_eq!(listener_key(Some(RecordKind::Sensor), Some("a/b")), "SensorData_a/b");
        assert_eq!(listener_key(Some(RecordKind::Actuator), None), "ActuatorData_all");
        assert_eq!(listener_key(None, None), "all");
    }

    #[test]
    fn test_notify_matches_kind_and_topic() {
        let registry = ListenerRegistry::new();
        let exact = Arc::new(Counter(Mutex::new(Vec::new())));
        let any_sensor = Arc::new(Counter(Mutex::new(Vec::new())));
        let actuators = Arc::new(Counter(Mutex::new(Vec::new())));
        registry.register(Some(RecordKind::Sensor), Some("t1"), exact.clone());
        registry.register(Some(RecordKind::Sensor), None, any_sensor.clone());
        registry.register(Some(RecordKind::Actuator), None, actuators.clone());

        let record = Record::Sensor(SensorData::default());
        registry.notify("t1", &record);
        registry.notify("t2", &record);

        assert_eq!(*exact.0.lock(), vec!["t1"]);
        assert_eq!(*any_sensor.0.lock(), vec!["t1", "t2"]);
        assert!(actuators.0.lock().is_empty());

        assert!(registry.unregister("SensorData_all"));
        assert_eq!(registry.keys(), vec!["ActuatorData_all", "SensorData_t1"]);
    }
}
