//! Services and message types shared by the shardrpc demo programs

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use shardrpc::RpcService;
use shardrpc_config::{logging, ConfigLoader, ShardRpcConfig};
use shardrpc_core::{Error, Result};
use tracing::{debug, info};

pub const ECHO_SERVICE: &str = "Echo.Echo";
pub const ECHO_METHOD: &str = "Echo";

pub const KV_SERVICE: &str = "KvService";
pub const KV_GET: &str = "Get";
pub const KV_PUT: &str = "Put";
pub const KV_DELETE: &str = "Delete";

/// Load configuration (an explicit file, or the default search paths) with
/// `SHARDRPC_*` overrides, then install logging.
pub fn init(config_path: Option<&Path>) -> Result<ShardRpcConfig> {
    let loader = ConfigLoader::new();
    let config = match config_path {
        Some(path) => loader.load_file_with_env(path),
        None => loader.load_with_env(),
    }
    .map_err(|e| Error::InvalidArgument(e.to_string()))?;
    
    logging::init(&config.logging).map_err(|e| Error::Internal(e.to_string()))?;
    info!(app = %config.app.name, environment = %config.app.environment, "Configuration loaded");
    Ok(config)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EchoRequest {
    pub payload: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EchoResponse {
    pub payload: String,
}

/// `Echo.Echo` service answering every `Echo` call with its own payload
pub fn echo_service() -> RpcService {
    let mut service = RpcService::new(ECHO_SERVICE).with_description("Returns the request payload");
    service.add_typed_method(ECHO_METHOD, |request: EchoRequest| {
        debug!(bytes = request.payload.len(), "Echo");
        Ok(EchoResponse {
            payload: request.payload,
        })
    });
    service
}

/// Outcome of a key/value operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KvStatus {
    #[serde(rename = "OK")]
    Ok,
    #[serde(rename = "NOT_FOUND")]
    NotFound,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetRequest {
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetResponse {
    pub status: KvStatus,
    pub value: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PutRequest {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PutResponse {
    pub status: KvStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteRequest {
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteResponse {
    pub status: KvStatus,
}

/// In-memory store behind [`kv_service`], shared by every reactor
#[derive(Debug, Default)]
pub struct KvStore {
    entries: RwLock<HashMap<String, String>>,
}

impl KvStore {
    pub fn new() -> Self {
        Self::default()
    }
    
    pub fn get(&self, request: GetRequest) -> GetResponse {
        match self.entries.read().get(&request.key) {
            Some(value) => GetResponse {
                status: KvStatus::Ok,
                value: Some(value.clone()),
            },
            None => GetResponse {
                status: KvStatus::NotFound,
                value: None,
            },
        }
    }
    
    pub fn put(&self, request: PutRequest) -> PutResponse {
        self.entries.write().insert(request.key, request.value);
        PutResponse { status: KvStatus::Ok }
    }
    
    pub fn delete(&self, request: DeleteRequest) -> DeleteResponse {
        let status = match self.entries.write().remove(&request.key) {
            Some(_) => KvStatus::Ok,
            None => KvStatus::NotFound,
        };
        DeleteResponse { status }
    }
    
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }
    
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

/// `KvService` with `Get`, `Put` and `Delete` methods over `store`
pub fn kv_service(store: Arc<KvStore>) -> RpcService {
    let mut service = RpcService::new(KV_SERVICE).with_description("In-memory key/value store");
    
    let get_store = store.clone();
    service.add_typed_method(KV_GET, move |request: GetRequest| Ok(get_store.get(request)));
    
    let put_store = store.clone();
    service.add_typed_method(KV_PUT, move |request: PutRequest| Ok(put_store.put(request)));
    
    service.add_typed_method(KV_DELETE, move |request: DeleteRequest| Ok(store.delete(request)));
    service
}
