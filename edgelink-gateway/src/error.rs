//! Error types shared by the gateway modules.
//!
//! Adapters and sinks return these; the router turns them into a logged
//! `false` so that no transport failure ever escapes into a caller.

/// Failures while turning records into wire text and back
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("Empty payload")]
    EmptyPayload,
    #[error("Invalid {kind} payload: {source}")]
    Decode {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("Failed to encode {kind}: {source}")]
    Encode {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// Failures at a transport or sink boundary
#[derive(Debug, thiserror::Error)]
pub enum ConnectorError {
    #[error("Not connected: {0}")]
    NotConnected(String),
    #[error("Connection failed: {0}")]
    ConnectFailed(String),
    #[error("Operation timed out after {0}s")]
    Timeout(u64),
    #[error("MQTT client error: {0}")]
    Mqtt(#[from] rumqttc::ClientError),
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("Mail error: {0}")]
    Mail(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Failures while loading the gateway configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
}

pub type ConnectorResult<T> = Result<T, ConnectorError>;
