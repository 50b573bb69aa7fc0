//! Message body serialization
//!
//! Request and response bodies are opaque bytes inside an envelope. The
//! codec turns typed messages into those bytes; both peers of a channel must
//! agree on the format.

use std::str::FromStr;

use serde::{de::DeserializeOwned, Serialize};
use shardrpc_core::{Error, Result};

/// Serialization format for RPC message bodies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SerializationFormat {
    /// Bincode serialization (binary, fast)
    #[default]
    Bincode,
    /// JSON serialization (human-readable)
    Json,
    /// MessagePack serialization (binary, compact)
    MessagePack,
}

impl SerializationFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            SerializationFormat::Bincode => "bincode",
            SerializationFormat::Json => "json",
            SerializationFormat::MessagePack => "msgpack",
        }
    }
}

impl FromStr for SerializationFormat {
    type Err = Error;
    
    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "bincode" => Ok(SerializationFormat::Bincode),
            "json" => Ok(SerializationFormat::Json),
            "msgpack" | "messagepack" => Ok(SerializationFormat::MessagePack),
            other => Err(Error::InvalidArgument(format!(
                "unknown serialization format '{}'",
                other
            ))),
        }
    }
}

/// Codec for typed message bodies
#[derive(Debug, Clone, Copy, Default)]
pub struct RpcCodec {
    format: SerializationFormat,
}

impl RpcCodec {
    /// Create a codec using the default (bincode) format
    pub fn new() -> Self {
        Self::default()
    }
    
    /// Create a codec with the specified format
    pub fn with_format(format: SerializationFormat) -> Self {
        Self { format }
    }
    
    pub fn format(&self) -> SerializationFormat {
        self.format
    }
    
    /// Serialize typed data to bytes
    pub fn serialize<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>> {
        match self.format {
            SerializationFormat::Json => serde_json::to_vec(value)
                .map_err(|e| Error::Serialization(format!("JSON serialization failed: {}", e))),
            SerializationFormat::MessagePack => rmp_serde::to_vec(value).map_err(|e| {
                Error::Serialization(format!("MessagePack serialization failed: {}", e))
            }),
            SerializationFormat::Bincode => bincode::serialize(value)
                .map_err(|e| Error::Serialization(format!("Bincode serialization failed: {}", e))),
        }
    }
    
    /// Deserialize bytes to typed data
    pub fn deserialize<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T> {
        match self.format {
            SerializationFormat::Json => serde_json::from_slice(data)
                .map_err(|e| Error::Serialization(format!("JSON deserialization failed: {}", e))),
            SerializationFormat::MessagePack => rmp_serde::from_slice(data).map_err(|e| {
                Error::Serialization(format!("MessagePack deserialization failed: {}", e))
            }),
            SerializationFormat::Bincode => bincode::deserialize(data).map_err(|e| {
                Error::Serialization(format!("Bincode deserialization failed: {}", e))
            }),
        }
    }
}
