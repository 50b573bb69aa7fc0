//! Helpers shared by the shardrpc end-to-end tests

use std::time::Duration;

use shardrpc::{RpcClientConfig, RpcServer, RpcServerConfig, RpcService, ServerHandle};
use shardrpc_core::{ReactorHandle, Result};

/// Server configuration bound to an ephemeral localhost port
pub fn server_config(threads: usize) -> RpcServerConfig {
    RpcServerConfig {
        bind_address: ([127, 0, 0, 1], 0).into(),
        threads,
        shutdown_grace: Duration::from_secs(5),
        ..RpcServerConfig::default()
    }
}

/// Client configuration for a server started by [`start_server`]
pub fn client_config(server: &ServerHandle) -> RpcClientConfig {
    RpcClientConfig {
        server_address: server.local_addr(),
        connect_timeout: Duration::from_secs(5),
        request_timeout: Duration::from_secs(5),
        ..RpcClientConfig::default()
    }
}

/// Start a server on the caller's runtime with `services` registered
pub fn start_server(threads: usize, services: Vec<RpcService>) -> Result<ServerHandle> {
    let mut server = RpcServer::new(ReactorHandle::current(0)?, server_config(threads))?;
    for service in services {
        server.register_service(service);
    }
    server.start()
}

/// Poll `condition` every few milliseconds until it holds or `timeout` passes
pub async fn eventually<F: FnMut() -> bool>(timeout: Duration, mut condition: F) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
