//! RPC server implementation
//!
//! The server owns a listening socket on its base reactor and spreads
//! accepted connections over a pool of worker reactors in round-robin order.
//! Every accepted connection becomes an [`RpcChannel`] tracked in a live set
//! until it disconnects.

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use shardrpc_config::ShardRpcConfig;
use shardrpc_core::{Error, ReactorConfig, ReactorHandle, ReactorPool, Result, RoundRobin};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::channel::{ChannelId, ChannelObserver, ChannelOptions, ChannelState, RpcChannel};
use crate::codec::{RpcCodec, SerializationFormat};
use crate::connection;
use crate::service::{RpcService, ServiceRegistry};

/// RPC server configuration
#[derive(Debug, Clone)]
pub struct RpcServerConfig {
    /// Address to bind to
    pub bind_address: SocketAddr,
    /// Worker reactors; 0 or 1 serves every connection on the base reactor
    pub threads: usize,
    /// Listen backlog
    pub backlog: u32,
    /// Set SO_REUSEADDR on the listener
    pub reuse_address: bool,
    /// Configuration of worker reactor threads
    pub reactor: ReactorConfig,
    /// Codec for calls the server issues on its channels
    pub codec: RpcCodec,
    /// Initial per-connection read buffer size
    pub read_buffer_size: usize,
    /// How long shutdown waits for live channels to close
    pub shutdown_grace: Duration,
}

impl Default for RpcServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 9090)),
            threads: 1,
            backlog: 1024,
            reuse_address: true,
            reactor: ReactorConfig::default(),
            codec: RpcCodec::default(),
            read_buffer_size: 16 * 1024,
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

impl RpcServerConfig {
    /// Build from the `server`, `reactor` and `codec` sections of a configuration file
    pub fn from_config(config: &ShardRpcConfig) -> Result<Self> {
        let bind_address =
            shardrpc_config::validation::resolve_address("server.bind_address", &config.server.bind_address)
                .map_err(|e| Error::InvalidArgument(e.to_string()))?;
        
        Ok(Self {
            bind_address,
            threads: config.server.threads,
            backlog: config.server.backlog,
            reuse_address: config.server.reuse_address,
            reactor: reactor_config(&config.reactor),
            codec: codec(&config.codec)?,
            read_buffer_size: config.server.read_buffer_size,
            shutdown_grace: config.server.shutdown_grace(),
        })
    }
}

pub(crate) fn reactor_config(section: &shardrpc_config::ReactorConfig) -> ReactorConfig {
    ReactorConfig {
        thread_name: section.thread_name.clone(),
        event_interval: section.event_interval,
        ..ReactorConfig::default()
    }
}

pub(crate) fn codec(section: &shardrpc_config::CodecConfig) -> Result<RpcCodec> {
    let format: SerializationFormat = section.format.parse()?;
    Ok(RpcCodec::with_format(format))
}

/// RPC server under construction.
///
/// Services can only be registered before [`RpcServer::start`], which
/// consumes the server.
pub struct RpcServer {
    config: RpcServerConfig,
    base: ReactorHandle,
    pool: Option<ReactorPool>,
    services: ServiceRegistry,
}

impl RpcServer {
    /// Create a server whose listener runs on `base`
    pub fn new(base: ReactorHandle, config: RpcServerConfig) -> Result<Self> {
        let threads = config.threads;
        let mut server = Self {
            config,
            base,
            pool: None,
            services: ServiceRegistry::new(),
        };
        server.set_thread_count(threads)?;
        Ok(server)
    }
    
    /// Add an RPC service, replacing one registered under the same name
    pub fn register_service(&mut self, service: RpcService) {
        let service_name = service.name().to_string();
        if self.services.register(service).is_some() {
            warn!("Replaced RPC service: {}", service_name);
        }
        info!("Registered RPC service: {}", service_name);
    }
    
    /// Choose how many worker reactors serve connections.
    ///
    /// With `threads > 1` the server starts that many reactors, each on its
    /// own thread. Otherwise connections stay on the base reactor.
    pub fn set_thread_count(&mut self, threads: usize) -> Result<()> {
        if let Some(pool) = self.pool.take() {
            pool.shutdown();
        }
        if threads > 1 {
            self.pool = Some(ReactorPool::new(threads, &self.config.reactor)?);
        }
        self.config.threads = threads;
        debug!("RPC server using {} reactor(s)", self.thread_count());
        Ok(())
    }
    
    /// Number of reactors that will serve connections
    pub fn thread_count(&self) -> usize {
        self.pool.as_ref().map_or(1, ReactorPool::len)
    }
    
    pub fn services(&self) -> &ServiceRegistry {
        &self.services
    }
    
    /// Bind the listener and start accepting on the base reactor
    pub fn start(self) -> Result<ServerHandle> {
        let RpcServer {
            config,
            base,
            pool,
            services,
        } = self;
        
        let listener = {
            // Registers the listener with the base reactor's I/O driver.
            let _runtime = base.runtime().enter();
            TcpListener::from_std(bind_listener(&config)?)?
        };
        let local_addr = listener.local_addr()?;
        
        let reactors = match &pool {
            Some(pool) => pool.handles(),
            None => vec![base.clone()],
        };
        
        let acceptor = Arc::new(Acceptor {
            services: Arc::new(services),
            reactors: RoundRobin::new(reactors)?,
            tracker: Arc::new(ChannelTracker::default()),
            codec: config.codec,
            read_buffer_size: config.read_buffer_size,
        });
        
        let accept_task = base.spawn(accept_loop(listener, acceptor.clone()));
        info!(
            %local_addr,
            reactors = acceptor.reactors.len(),
            services = acceptor.services.len(),
            "RPC server listening"
        );
        
        Ok(ServerHandle {
            local_addr,
            acceptor,
            accept_task: Some(accept_task),
            pool,
            shutdown_grace: config.shutdown_grace,
        })
    }
}

fn bind_listener(config: &RpcServerConfig) -> Result<std::net::TcpListener> {
    let socket = Socket::new(
        Domain::for_address(config.bind_address),
        Type::STREAM,
        Some(Protocol::TCP),
    )?;
    socket.set_reuse_address(config.reuse_address)?;
    socket.set_nonblocking(true)?;
    socket.bind(&config.bind_address.into())?;
    socket.listen(i32::try_from(config.backlog).unwrap_or(i32::MAX))?;
    Ok(socket.into())
}

async fn accept_loop(listener: TcpListener, acceptor: Arc<Acceptor>) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => acceptor.on_accept(stream, peer),
            Err(e) => {
                warn!("Failed to accept RPC connection: {}", e);
                // Small delay to prevent busy loop
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        }
    }
}

/// State shared between the accept loop and the server handle
struct Acceptor {
    services: Arc<ServiceRegistry>,
    reactors: RoundRobin<ReactorHandle>,
    tracker: Arc<ChannelTracker>,
    codec: RpcCodec,
    read_buffer_size: usize,
}

impl Acceptor {
    fn on_accept(&self, stream: TcpStream, peer: SocketAddr) {
        // Detach from the accepting reactor so the target reactor can adopt it.
        let stream = match stream.into_std() {
            Ok(stream) => stream,
            Err(e) => {
                warn!(%peer, error = %e, "Failed to detach accepted socket");
                return;
            }
        };
        
        let (_, reactor) = self.reactors.next();
        let observer: Arc<dyn ChannelObserver> = self.tracker.clone();
        let options = ChannelOptions {
            services: Some(self.services.clone()),
            observer: Some(observer),
            codec: self.codec,
            read_buffer_size: self.read_buffer_size,
        };
        
        let (channel, outbound) = RpcChannel::new(reactor.id(), Some(peer), ChannelState::Connected, options);
        self.tracker.insert(channel.clone());
        info!(channel = channel.id(), reactor = reactor.id(), %peer, "Accepted connection");
        let teardown = connection::Teardown::new(channel);
        reactor.spawn(connection::adopt_and_serve(teardown, stream, outbound));
    }
}

/// Live-channel set of a server
#[derive(Default)]
struct ChannelTracker {
    live: Mutex<HashMap<ChannelId, Arc<RpcChannel>>>,
    drained: Notify,
}

impl ChannelTracker {
    fn insert(&self, channel: Arc<RpcChannel>) {
        let id = channel.id();
        let previous = self.live.lock().insert(id, channel);
        assert!(previous.is_none(), "channel {} tracked twice", id);
    }
    
    fn len(&self) -> usize {
        self.live.lock().len()
    }
    
    fn snapshot(&self) -> Vec<Arc<RpcChannel>> {
        let mut channels: Vec<_> = self.live.lock().values().cloned().collect();
        channels.sort_by_key(|channel| channel.id());
        channels
    }
    
    async fn wait_empty(&self) {
        while self.len() > 0 {
            self.drained.notified().await;
        }
    }
}

impl ChannelObserver for ChannelTracker {
    fn on_disconnect(&self, channel: &Arc<RpcChannel>) {
        let (removed, remaining) = {
            let mut live = self.live.lock();
            let removed = live.remove(&channel.id());
            (removed, live.len())
        };
        
        if removed.is_none() {
            error!(channel = channel.id(), "Channel removed from the live set twice");
            panic!("channel {} removed from the live set twice", channel.id());
        }
        
        debug!(channel = channel.id(), remaining, "Channel removed from live set");
        if remaining == 0 {
            self.drained.notify_one();
        }
    }
}

/// A running RPC server
pub struct ServerHandle {
    local_addr: SocketAddr,
    acceptor: Arc<Acceptor>,
    accept_task: Option<JoinHandle<()>>,
    pool: Option<ReactorPool>,
    shutdown_grace: Duration,
}

impl ServerHandle {
    /// Address the listener is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
    
    /// Number of live channels
    pub fn channel_count(&self) -> usize {
        self.acceptor.tracker.len()
    }
    
    /// Live channels, ordered by acceptance
    pub fn channels(&self) -> Vec<Arc<RpcChannel>> {
        self.acceptor.tracker.snapshot()
    }
    
    /// Number of reactors serving connections
    pub fn thread_count(&self) -> usize {
        self.acceptor.reactors.len()
    }
    
    pub fn services(&self) -> &ServiceRegistry {
        &self.acceptor.services
    }
    
    fn stop_accepting(&mut self) -> Vec<Arc<RpcChannel>> {
        if let Some(task) = self.accept_task.take() {
            task.abort();
        }
        let channels = self.acceptor.tracker.snapshot();
        for channel in &channels {
            channel.close();
        }
        channels
    }
    
    /// Stop accepting, close every live channel and stop the worker reactors.
    ///
    /// Waits up to the configured grace period for channels to disconnect.
    pub async fn shutdown(mut self) {
        let channels = self.stop_accepting();
        info!(channels = channels.len(), "Shutting down RPC server");
        drop(channels);
        
        let tracker = self.acceptor.tracker.clone();
        if tokio::time::timeout(self.shutdown_grace, tracker.wait_empty()).await.is_err() {
            warn!(remaining = tracker.len(), "Shutdown grace period elapsed with live channels");
        }
        
        if let Some(pool) = self.pool.take() {
            if let Err(e) = tokio::task::spawn_blocking(move || pool.shutdown()).await {
                error!("Failed to stop reactor pool: {}", e);
            }
        }
        info!("RPC server stopped");
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        if self.accept_task.is_some() {
            self.stop_accepting();
        }
    }
}

impl std::fmt::Debug for ServerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerHandle")
            .field("local_addr", &self.local_addr)
            .field("reactors", &self.thread_count())
            .field("channels", &self.channel_count())
            .finish()
    }
}
