//! RPC client implementation
//!
//! [`RpcClient`] wraps one outbound [`RpcChannel`] driven by a private
//! reactor thread, and adds connect and request timeouts on top of it.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};
use shardrpc_config::ShardRpcConfig;
use shardrpc_core::{Error, Reactor, ReactorConfig, Result};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::channel::{CallResult, ChannelOptions, ChannelState, RpcChannel};
use crate::codec::RpcCodec;
use crate::server;
use crate::service::{RpcService, ServiceRegistry};

/// Pause between connect attempts
const CONNECT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// RPC client configuration
#[derive(Debug, Clone)]
pub struct RpcClientConfig {
    /// Server address to connect to
    pub server_address: SocketAddr,
    /// Connection timeout, per attempt
    pub connect_timeout: Duration,
    /// Attempts made while connecting fails with a retryable error
    pub connect_attempts: u32,
    /// Per-call timeout
    pub request_timeout: Duration,
    /// Codec for call bodies
    pub codec: RpcCodec,
    /// Initial read buffer size
    pub read_buffer_size: usize,
    /// Configuration of the client's reactor thread
    pub reactor: ReactorConfig,
}

impl Default for RpcClientConfig {
    fn default() -> Self {
        Self {
            server_address: SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 9090)),
            connect_timeout: Duration::from_secs(5),
            connect_attempts: 3,
            request_timeout: Duration::from_secs(30),
            codec: RpcCodec::default(),
            read_buffer_size: 16 * 1024,
            reactor: ReactorConfig {
                thread_name: "shardrpc-client".to_string(),
                ..ReactorConfig::default()
            },
        }
    }
}

impl RpcClientConfig {
    /// Build from the `client`, `reactor` and `codec` sections of a configuration file
    pub fn from_config(config: &ShardRpcConfig) -> Result<Self> {
        let server_address =
            shardrpc_config::validation::resolve_address("client.server_address", &config.client.server_address)
                .map_err(|e| Error::InvalidArgument(e.to_string()))?;
        
        Ok(Self {
            server_address,
            connect_timeout: config.client.connect_timeout(),
            connect_attempts: config.client.connect_attempts,
            request_timeout: config.client.request_timeout(),
            codec: server::codec(&config.codec)?,
            read_buffer_size: config.client.read_buffer_size,
            reactor: server::reactor_config(&config.reactor),
        })
    }
}

/// Builder for [`RpcClient`]
#[derive(Debug, Default)]
pub struct RpcClientBuilder {
    config: RpcClientConfig,
    services: ServiceRegistry,
}

impl RpcClientBuilder {
    pub fn new() -> Self {
        Self::default()
    }
    
    pub fn config(mut self, config: RpcClientConfig) -> Self {
        self.config = config;
        self
    }
    
    pub fn server_address(mut self, addr: SocketAddr) -> Self {
        self.config.server_address = addr;
        self
    }
    
    pub fn connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.config.connect_timeout = connect_timeout;
        self
    }
    
    pub fn connect_attempts(mut self, attempts: u32) -> Self {
        self.config.connect_attempts = attempts;
        self
    }
    
    pub fn request_timeout(mut self, request_timeout: Duration) -> Self {
        self.config.request_timeout = request_timeout;
        self
    }
    
    pub fn codec(mut self, codec: RpcCodec) -> Self {
        self.config.codec = codec;
        self
    }
    
    /// Serve `service` to the peer over the same connection
    pub fn service(mut self, service: RpcService) -> Self {
        self.services.register(service);
        self
    }
    
    pub async fn connect(self) -> Result<RpcClient> {
        RpcClient::connect_with_services(self.config, self.services).await
    }
}

/// Connected RPC client
pub struct RpcClient {
    config: RpcClientConfig,
    channel: Arc<RpcChannel>,
    reactor: Option<Reactor>,
}

impl RpcClient {
    pub fn builder() -> RpcClientBuilder {
        RpcClientBuilder::new()
    }
    
    /// Connect to `config.server_address`
    pub async fn connect(config: RpcClientConfig) -> Result<Self> {
        Self::connect_with_services(config, ServiceRegistry::new()).await
    }
    
    async fn connect_with_services(config: RpcClientConfig, services: ServiceRegistry) -> Result<Self> {
        let reactor = Reactor::spawn(0, &config.reactor)?;
        let mut options = ChannelOptions {
            codec: config.codec,
            read_buffer_size: config.read_buffer_size,
            ..ChannelOptions::default()
        };
        if !services.is_empty() {
            options = options.with_services(Arc::new(services));
        }
        
        let addr = config.server_address;
        let mut attempt = 1;
        let channel = loop {
            match Self::open_channel(&reactor, &config, options.clone()).await {
                Ok(channel) => break channel,
                Err(e) if e.is_retryable() && attempt < config.connect_attempts => {
                    warn!(%addr, attempt, "Connect failed, retrying: {}", e);
                    attempt += 1;
                    tokio::time::sleep(CONNECT_RETRY_DELAY).await;
                }
                Err(e) => return Err(e),
            }
        };
        
        info!(%addr, channel = channel.id(), attempt, "Connected to RPC server");
        Ok(Self {
            config,
            channel,
            reactor: Some(reactor),
        })
    }
    
    /// One connect attempt on `reactor`, bounded by the connect timeout
    async fn open_channel(
        reactor: &Reactor,
        config: &RpcClientConfig,
        options: ChannelOptions,
    ) -> Result<Arc<RpcChannel>> {
        let addr = config.server_address;
        let channel = RpcChannel::connect(&reactor.handle(), addr, options);
        let state = match timeout(config.connect_timeout, channel.ready()).await {
            Ok(state) => state,
            Err(_) => {
                channel.close();
                return Err(Error::Timeout(format!(
                    "connecting to {} took longer than {:?}",
                    addr, config.connect_timeout
                )));
            }
        };
        
        if state != ChannelState::Connected {
            return Err(Error::Connection(format!("failed to connect to {}", addr)));
        }
        Ok(channel)
    }
    
    /// Call a method and wait for the typed response, bounded by the request timeout
    pub async fn call<Req, Resp>(&self, service: &str, method: &str, request: &Req) -> CallResult<Resp>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned + Send + 'static,
    {
        debug!(service, method, "Calling");
        self.channel
            .call_with_timeout(service, method, request, self.config.request_timeout)
            .await
    }
    
    /// The underlying channel, for callback-style calls
    pub fn channel(&self) -> &Arc<RpcChannel> {
        &self.channel
    }
    
    pub fn config(&self) -> &RpcClientConfig {
        &self.config
    }
    
    pub fn is_connected(&self) -> bool {
        self.channel.state() == ChannelState::Connected
    }
    
    /// Close the connection and stop the client's reactor.
    ///
    /// Outstanding calls fail with [`CallError::ConnectionClosed`](crate::channel::CallError::ConnectionClosed).
    pub async fn close(mut self) {
        self.channel.close();
        let state = self.channel.closed().await;
        debug!(channel = self.channel.id(), ?state, "Client channel closed");
        
        if let Some(reactor) = self.reactor.take() {
            if let Err(e) = tokio::task::spawn_blocking(move || reactor.stop()).await {
                error!("Failed to stop client reactor: {}", e);
            }
        }
    }
}

impl std::fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcClient")
            .field("server_address", &self.config.server_address)
            .field("channel", &self.channel.id())
            .field("state", &self.channel.state())
            .finish()
    }
}
