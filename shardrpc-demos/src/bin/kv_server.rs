//! Key/value server exposing `KvService` over an in-memory store
//!
//! Usage: `kv_server [config-file]`

use std::path::PathBuf;
use std::sync::Arc;

use shardrpc::{RpcServer, RpcServerConfig};
use shardrpc_core::{ReactorHandle, Result};
use shardrpc_demos::KvStore;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = shardrpc_demos::init(config_path.as_deref())?;
    
    let store = Arc::new(KvStore::new());
    let mut server = RpcServer::new(ReactorHandle::current(0)?, RpcServerConfig::from_config(&config)?)?;
    server.register_service(shardrpc_demos::kv_service(store.clone()));
    
    let handle = server.start()?;
    info!("KV server listening on {}", handle.local_addr());
    
    tokio::signal::ctrl_c().await?;
    info!("Interrupted with {} key(s) stored, shutting down", store.len());
    handle.shutdown().await;
    Ok(())
}
