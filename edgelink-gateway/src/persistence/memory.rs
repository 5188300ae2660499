use super::ListenerRegistry;
use crate::codec::DataCodec;
use crate::error::{ConnectorError, ConnectorResult};
use crate::models::Record;
use crate::sinks::PersistenceClient;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

/// Snapshot line written for each topic
#[derive(Debug, Clone, Serialize)]
struct StoredEntry {
    kind: &'static str,
    qos: u8,
    stored_at: DateTime<Utc>,
    data: serde_json::Value,
}

/// In-process last-value store. Mostly for tests and brokerless setups.
pub struct MemoryStore {
    snapshot_path: Option<PathBuf>,
    codec: DataCodec,
    cache: parking_lot::Mutex<HashMap<String, (Record, StoredEntry)>>,
    listeners: Arc<ListenerRegistry>,
}

impl MemoryStore {
    pub fn new(codec: DataCodec, listeners: Arc<ListenerRegistry>) -> Self {
        Self {
            snapshot_path: None,
            codec,
            cache: parking_lot::Mutex::new(HashMap::new()),
            listeners,
        }
    }

    /// Also dump the whole map as JSON after each store.
    pub fn with_snapshot<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.snapshot_path = Some(path.into());
        self
    }

    pub fn latest(&self, topic: &str) -> Option<Record> {
        self.cache.lock().get(topic).map(|(record, _)| record.clone())
    }

    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.cache.lock().keys().cloned().collect();
        topics.sort();
        topics
    }

    fn save_to_disk(&self) -> ConnectorResult<()> {
        let Some(path) = &self.snapshot_path else {
            return Ok(());
        };
        let json = {
            let cache = self.cache.lock();
            let view: HashMap<&String, &StoredEntry> =
                cache.iter().map(|(topic, (_, entry))| (topic, entry)).collect();
            serde_json::to_string_pretty(&view)
                .map_err(|e| ConnectorError::InvalidArgument(format!("snapshot encode: {}", e)))?
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, json)?;
        Ok(())
    }
}

#[async_trait]
impl PersistenceClient for MemoryStore {
    async fn store(&self, topic: &str, qos: u8, records: &[Record]) -> ConnectorResult<()> {
        if topic.is_empty() {
            return Err(ConnectorError::InvalidArgument("empty topic".into()));
        }
        for record in records {
            let data = self.codec.record_value(record)?;
            let entry = StoredEntry {
                kind: record.kind().label(),
                qos,
                stored_at: Utc::now(),
                data,
            };
            self.cache
                .lock()
                .insert(topic.to_string(), (record.clone(), entry));
            tracing::debug!("Stored {} under {}", record.kind().label(), topic);
            self.listeners.notify(topic, record);
        }
        self.save_to_disk()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ActuatorData, SensorData};

    #[tokio::test]
    async fn test_last_write_wins() {
        let store = MemoryStore::new(DataCodec::default(), Arc::new(ListenerRegistry::new()));
        let first = Record::Sensor(SensorData::new("TempSensor", 1013, 20.0));
        let second = Record::Sensor(SensorData::new("TempSensor", 1013, 21.5));
        store.store("PIOT/x", 0, &[first]).await.unwrap();
        store.store("PIOT/x", 0, &[second.clone()]).await.unwrap();
        assert_eq!(store.latest("PIOT/x"), Some(second));
        assert_eq!(store.topics(), vec!["PIOT/x"]);
    }

    #[tokio::test]
    async fn test_snapshot_written() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        let store = MemoryStore::new(DataCodec::default(), Arc::new(ListenerRegistry::new())).with_snapshot(path.clone());
        let record = Record::Actuator(ActuatorData::default());
        store.store("PIOT/a", 1, &[record]).await.unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let json: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(json["PIOT/a"]["kind"], "ActuatorData");
        assert_eq!(json["PIOT/a"]["qos"], 1);
        assert_eq!(json["PIOT/a"]["data"]["command"], 0);
    }

    #[tokio::test]
    async fn test_empty_topic_rejected() {
        let store = MemoryStore::new(DataCodec::default(), Arc::new(ListenerRegistry::new()));
        assert!(store.store("", 0, &[]).await.is_err());
    }
}
