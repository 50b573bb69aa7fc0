//! Echo server: answers `Echo.Echo` / `Echo` calls with their own payload
//!
//! Usage: `echo_server [config-file]`

use std::path::PathBuf;

use shardrpc::{RpcServer, RpcServerConfig};
use shardrpc_core::{ReactorHandle, Result};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = shardrpc_demos::init(config_path.as_deref())?;
    
    let server_config = RpcServerConfig::from_config(&config)?;
    let mut server = RpcServer::new(ReactorHandle::current(0)?, server_config)?;
    server.register_service(shardrpc_demos::echo_service());
    
    let handle = server.start()?;
    info!(
        "Echo server listening on {} with {} reactor(s)",
        handle.local_addr(),
        handle.thread_count()
    );
    
    tokio::signal::ctrl_c().await?;
    info!("Interrupted, shutting down");
    handle.shutdown().await;
    Ok(())
}
