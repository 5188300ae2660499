//! Redis-backed last-value store: one `SET topic json` per record.

use super::ListenerRegistry;
use crate::codec::DataCodec;
use crate::error::{ConnectorError, ConnectorResult};
use crate::models::Record;
use crate::sinks::PersistenceClient;
use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands, Client};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

const CONNECT_TIMEOUT_SECS: u64 = 5;

pub struct RedisPersistenceAdapter {
    url: String,
    codec: DataCodec,
    conn: Mutex<Option<ConnectionManager>>,
    listeners: Arc<ListenerRegistry>,
}

impl std::fmt::Debug for RedisPersistenceAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisPersistenceAdapter")
            .field("url", &self.url)
            .field("conn", &"<ConnectionManager>")
            .finish()
    }
}

impl RedisPersistenceAdapter {
    pub fn new(url: impl Into<String>, codec: DataCodec, listeners: Arc<ListenerRegistry>) -> Self {
        Self {
            url: url.into(),
            codec,
            conn: Mutex::new(None),
            listeners,
        }
    }

    /// Connecting twice keeps the first connection.
    pub async fn connect(&self) -> ConnectorResult<()> {
        let mut conn = self.conn.lock().await;
        if conn.is_some() {
            tracing::warn!("Redis client already connected to {}", self.url);
            return Ok(());
        }
        let client = Client::open(self.url.as_str())?;
        let manager = tokio::time::timeout(
            Duration::from_secs(CONNECT_TIMEOUT_SECS),
            ConnectionManager::new(client),
        )
        .await
        .map_err(|_| ConnectorError::Timeout(CONNECT_TIMEOUT_SECS))??;
        *conn = Some(manager);
        tracing::info!("Connected to redis at {}", self.url);
        Ok(())
    }

    pub async fn disconnect(&self) -> bool {
        let was_connected = self.conn.lock().await.take().is_some();
        if was_connected {
            tracing::info!("Disconnected from redis at {}", self.url);
        }
        was_connected
    }

    pub async fn is_connected(&self) -> bool {
        self.conn.lock().await.is_some()
    }
}

#[async_trait]
impl PersistenceClient for RedisPersistenceAdapter {
    async fn store(&self, topic: &str, _qos: u8, records: &[Record]) -> ConnectorResult<()> {
        // ConnectionManager is a cheap clone over one multiplexed connection
        let mut conn = self
            .conn
            .lock()
            .await
            .clone()
            .ok_or_else(|| ConnectorError::NotConnected(self.url.clone()))?;

        for record in records {
            let json = self.codec.encode_record(record)?;
            let _: () = conn.set(topic, json).await?;
            self.listeners.notify(topic, record);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SensorData;

    #[tokio::test]
    async fn test_store_without_connection_fails() {
        let adapter = RedisPersistenceAdapter::new(
            "redis://127.0.0.1:6379",
            DataCodec::default(),
            Arc::new(ListenerRegistry::new()),
        );
        assert!(!adapter.is_connected().await);
        let result = adapter
            .store("PIOT/x", 0, &[Record::Sensor(SensorData::default())])
            .await;
        assert!(matches!(result, Err(ConnectorError::NotConnected(_))));
        assert!(!adapter.disconnect().await);
    }
}
