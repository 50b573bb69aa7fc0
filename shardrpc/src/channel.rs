//! RPC channel: one per connection, issuing and serving calls.
//!
//! A channel plays both roles at once. Outbound calls are recorded in an
//! outstanding-call table and resolved when a response with the same id
//! arrives. Inbound requests are routed to the channel's service registry and
//! answered on the same connection.

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Serialize};
use shardrpc_core::{ReactorHandle, ReactorId};
use tokio::sync::futures::Notified;
use tokio::sync::{mpsc, oneshot, watch, Notify};
use tracing::{debug, info, trace, warn};

use crate::codec::RpcCodec;
use crate::connection;
use crate::frame::{self, FrameError};
use crate::protocol::{MessageType, RequestId, RpcEnvelope, RpcError};
use crate::service::{Responder, ServiceRegistry};

/// Unique identifier of a channel within the process
pub type ChannelId = u64;

static NEXT_CHANNEL_ID: AtomicU64 = AtomicU64::new(1);

/// Connection state of a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelState {
    /// Outbound connection not established yet; calls are queued
    Connecting,
    /// Connection established
    Connected,
    /// Connection ended normally (EOF or local close)
    Closed,
    /// Connection ended with an error (connect, I/O or framing failure)
    Failed,
}

impl ChannelState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ChannelState::Closed | ChannelState::Failed)
    }
}

/// Why an outbound call did not produce a response value
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CallError {
    /// The peer answered with an explicit error
    #[error("remote error: {0}")]
    Remote(RpcError),
    
    /// The connection ended before a response arrived
    #[error("connection closed before a response arrived")]
    ConnectionClosed,
    
    #[error("failed to encode request: {0}")]
    Encode(String),
    
    #[error("failed to decode response: {0}")]
    Decode(String),
    
    #[error("no response within {0:?}")]
    Timeout(Duration),
}

/// Result delivered to an outbound call's completion
pub type CallResult<T> = Result<T, CallError>;

/// Receives channel lifecycle notifications
pub trait ChannelObserver: Send + Sync {
    /// Called exactly once, after the channel reached `Closed` or `Failed`
    /// and every outstanding call was failed.
    fn on_disconnect(&self, channel: &Arc<RpcChannel>);
}

/// Construction options for a channel
#[derive(Clone)]
pub struct ChannelOptions {
    /// Services answering inbound requests; `None` rejects every request
    pub services: Option<Arc<ServiceRegistry>>,
    pub observer: Option<Arc<dyn ChannelObserver>>,
    /// Codec for typed call bodies
    pub codec: RpcCodec,
    /// Initial capacity of the read buffer
    pub read_buffer_size: usize,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            services: None,
            observer: None,
            codec: RpcCodec::default(),
            read_buffer_size: 16 * 1024,
        }
    }
}

impl ChannelOptions {
    pub fn with_services(mut self, services: Arc<ServiceRegistry>) -> Self {
        self.services = Some(services);
        self
    }
    
    pub fn with_observer(mut self, observer: Arc<dyn ChannelObserver>) -> Self {
        self.observer = Some(observer);
        self
    }
    
    pub fn with_codec(mut self, codec: RpcCodec) -> Self {
        self.codec = codec;
        self
    }
}

/// Queue of encoded frames feeding a connection's writer
#[derive(Clone)]
pub(crate) struct FrameSink {
    channel: ChannelId,
    tx: mpsc::UnboundedSender<Bytes>,
}

impl FrameSink {
    pub(crate) fn new(channel: ChannelId, tx: mpsc::UnboundedSender<Bytes>) -> Self {
        Self { channel, tx }
    }
    
    /// Queue a frame; false once the connection's writer is gone
    pub(crate) fn send_frame(&self, frame: Bytes) -> bool {
        self.tx.send(frame).is_ok()
    }
    
    pub(crate) fn send_envelope(&self, envelope: &RpcEnvelope) -> bool {
        match frame::encode(envelope) {
            Ok(frame) => {
                let sent = self.send_frame(frame);
                if !sent {
                    debug!(channel = self.channel, id = envelope.id, "Connection gone, dropping response");
                }
                sent
            }
            Err(e) => {
                warn!(channel = self.channel, id = envelope.id, error = %e, "Failed to encode response");
                false
            }
        }
    }
}

type Completion = Box<dyn FnOnce(CallResult<Vec<u8>>) + Send>;

struct OutstandingCall {
    complete: Completion,
}

#[derive(Default)]
struct CallTable {
    /// Set at teardown; no call may be registered afterwards
    closed: bool,
    calls: HashMap<RequestId, OutstandingCall>,
}

/// One end of an RPC connection
pub struct RpcChannel {
    id: ChannelId,
    reactor: ReactorId,
    peer: Option<SocketAddr>,
    next_request_id: AtomicU64,
    calls: Mutex<CallTable>,
    sink: FrameSink,
    services: Option<Arc<ServiceRegistry>>,
    observer: Option<Arc<dyn ChannelObserver>>,
    codec: RpcCodec,
    read_buffer_size: usize,
    state: watch::Sender<ChannelState>,
    close_requested: Notify,
}

impl RpcChannel {
    /// Create a channel and the receiving end of its outbound frame queue.
    /// The caller is responsible for driving the connection.
    pub(crate) fn new(
        reactor: ReactorId,
        peer: Option<SocketAddr>,
        initial: ChannelState,
        options: ChannelOptions,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<Bytes>) {
        let id = NEXT_CHANNEL_ID.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(initial);
        
        let channel = Arc::new(Self {
            id,
            reactor,
            peer,
            next_request_id: AtomicU64::new(1),
            calls: Mutex::new(CallTable::default()),
            sink: FrameSink::new(id, tx),
            services: options.services,
            observer: options.observer,
            codec: options.codec,
            read_buffer_size: options.read_buffer_size.max(1024),
            state,
            close_requested: Notify::new(),
        });
        (channel, rx)
    }
    
    /// Open an outbound connection to `addr`, driven by `reactor`.
    ///
    /// Returns immediately in the `Connecting` state; calls issued before the
    /// connection is up are sent once it is.
    pub fn connect(reactor: &ReactorHandle, addr: SocketAddr, options: ChannelOptions) -> Arc<Self> {
        let (channel, outbound) = Self::new(reactor.id(), Some(addr), ChannelState::Connecting, options);
        debug!(channel = channel.id, reactor = reactor.id(), %addr, "Connecting");
        let teardown = connection::Teardown::new(channel.clone());
        reactor.spawn(connection::connect_and_serve(teardown, addr, outbound));
        channel
    }
    
    pub fn id(&self) -> ChannelId {
        self.id
    }
    
    /// Reactor driving this channel's connection
    pub fn reactor_id(&self) -> ReactorId {
        self.reactor
    }
    
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }
    
    pub fn state(&self) -> ChannelState {
        *self.state.borrow()
    }
    
    pub fn codec(&self) -> RpcCodec {
        self.codec
    }
    
    /// Wait until the channel has left `Connecting` and return the new state
    pub async fn ready(&self) -> ChannelState {
        let mut rx = self.state.subscribe();
        let result = rx.wait_for(|state| *state != ChannelState::Connecting).await;
        match result {
            Ok(state) => *state,
            Err(_) => self.state(),
        }
    }
    
    /// Wait until the channel reaches `Closed` or `Failed`
    pub async fn closed(&self) -> ChannelState {
        let mut rx = self.state.subscribe();
        let result = rx.wait_for(ChannelState::is_terminal).await;
        match result {
            Ok(state) => *state,
            Err(_) => self.state(),
        }
    }

    /// Number of calls still waiting for a response
    pub fn outstanding_calls(&self) -> usize {
        self.calls.lock().calls.len()
    }
    
    fn allocate_id(&self) -> RequestId {
        self.next_request_id.fetch_add(1, Ordering::Relaxed)
    }
    
    /// Issue a typed call. `on_complete` runs exactly once, on the channel's
    /// reactor when a response or teardown resolves the call, or inline if
    /// the call cannot be issued.
    pub fn call<Req, Resp, F>(&self, service: &str, method: &str, request: &Req, on_complete: F) -> RequestId
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned + 'static,
        F: FnOnce(CallResult<Resp>) + Send + 'static,
    {
        let codec = self.codec;
        let complete = move |result: CallResult<Vec<u8>>| {
            on_complete(result.and_then(|bytes| {
                codec
                    .deserialize(&bytes)
                    .map_err(|e| CallError::Decode(e.to_string()))
            }));
        };
        
        match self.codec.serialize(request) {
            Ok(body) => self.call_raw(service, method, body, complete),
            Err(e) => {
                let id = self.allocate_id();
                complete(Err(CallError::Encode(e.to_string())));
                id
            }
        }
    }
    
    /// Issue a call with an already serialized body
    pub fn call_raw<F>(&self, service: &str, method: &str, request: Vec<u8>, on_complete: F) -> RequestId
    where
        F: FnOnce(CallResult<Vec<u8>>) + Send + 'static,
    {
        let id = self.allocate_id();
        let frame = match frame::encode(&RpcEnvelope::request(id, service, method, request)) {
            Ok(frame) => frame,
            Err(e) => {
                on_complete(Err(CallError::Encode(e.to_string())));
                return id;
            }
        };
        
        // Registered before the frame is queued so a fast response always finds it.
        {
            let mut table = self.calls.lock();
            if table.closed {
                drop(table);
                debug!(channel = self.id, id, "Call issued on a closed channel");
                on_complete(Err(CallError::ConnectionClosed));
                return id;
            }
            table.calls.insert(id, OutstandingCall {
                complete: Box::new(on_complete),
            });
        }
        
        trace!(channel = self.id, id, service, method, "Issuing call");
        if !self.sink.send_frame(frame) {
            let abandoned = self.calls.lock().calls.remove(&id);
            if let Some(call) = abandoned {
                (call.complete)(Err(CallError::ConnectionClosed));
            }
        }
        id
    }
    
    /// Issue a typed call and await its result
    pub async fn call_async<Req, Resp>(&self, service: &str, method: &str, request: &Req) -> CallResult<Resp>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.call(service, method, request, move |result| {
            let _ = tx.send(result);
        });
        rx.await.unwrap_or(Err(CallError::ConnectionClosed))
    }
    
    /// Issue a typed call that fails with [`CallError::Timeout`] if no
    /// response arrives within `timeout`. A late response is discarded.
    pub async fn call_with_timeout<Req, Resp>(
        &self,
        service: &str,
        method: &str,
        request: &Req,
        timeout: Duration,
    ) -> CallResult<Resp>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let id = self.call(service, method, request, move |result| {
            let _ = tx.send(result);
        });
        match tokio::time::timeout(timeout, rx).await {
            Ok(result) => result.unwrap_or(Err(CallError::ConnectionClosed)),
            Err(_) => {
                self.abandon(id);
                debug!(channel = self.id, id, "Call timed out");
                Err(CallError::Timeout(timeout))
            }
        }
    }
    
    /// Forget an outstanding call without completing it. Returns whether the
    /// call was still outstanding.
    pub fn abandon(&self, id: RequestId) -> bool {
        let abandoned = self.calls.lock().calls.remove(&id);
        abandoned.is_some()
    }
    
    /// Ask the connection to shut down. The channel moves to `Closed` and its
    /// observer is notified once the reactor has processed the request.
    pub fn close(&self) {
        self.close_requested.notify_one();
    }
    
    pub(crate) fn close_requested(&self) -> Notified<'_> {
        self.close_requested.notified()
    }
    
    pub(crate) fn read_buffer_size(&self) -> usize {
        self.read_buffer_size
    }
    
    pub(crate) fn on_connected(&self) {
        self.state.send_replace(ChannelState::Connected);
        info!(channel = self.id, reactor = self.reactor, peer = ?self.peer, "Channel connected");
    }
    
    /// Decode every complete frame in `buf` and handle it in arrival order
    pub(crate) fn on_readable(&self, buf: &mut BytesMut) -> Result<usize, FrameError> {
        frame::drain_frames(buf, |envelope| self.on_envelope(envelope))
    }
    
    pub(crate) fn on_envelope(&self, envelope: RpcEnvelope) {
        match envelope.message_type {
            MessageType::Response => self.resolve(envelope),
            MessageType::Request => self.dispatch(envelope),
        }
    }
    
    fn resolve(&self, envelope: RpcEnvelope) {
        let call = self.calls.lock().calls.remove(&envelope.id);
        let Some(call) = call else {
            debug!(channel = self.id, id = envelope.id, "Discarding response for unknown call");
            return;
        };
        
        trace!(channel = self.id, id = envelope.id, "Resolving call");
        let result = match envelope.error {
            Some(error) => Err(CallError::Remote(error)),
            None => Ok(envelope.response),
        };
        (call.complete)(result);
    }
    
    fn dispatch(&self, envelope: RpcEnvelope) {
        let responder = Responder::new(envelope.id, self.sink.clone());
        match &self.services {
            Some(services) => services.dispatch(envelope, responder),
            None => {
                warn!(channel = self.id, id = envelope.id, service = %envelope.service, "Request on a channel without services");
                responder.fail(RpcError::service_not_found(&envelope.service));
            }
        }
    }
    
    /// Final transition: fail every outstanding call, then notify the
    /// observer. Runs at most once per channel.
    pub(crate) fn teardown(self: &Arc<Self>, state: ChannelState) {
        let abandoned: Vec<OutstandingCall> = {
            let mut table = self.calls.lock();
            if table.closed {
                return;
            }
            table.closed = true;
            table.calls.drain().map(|(_, call)| call).collect()
        };
        
        self.state.send_replace(state);
        info!(
            channel = self.id,
            reactor = self.reactor,
            peer = ?self.peer,
            state = ?state,
            abandoned = abandoned.len(),
            "Channel disconnected"
        );
        
        for call in abandoned {
            (call.complete)(Err(CallError::ConnectionClosed));
        }
        
        if let Some(observer) = &self.observer {
            observer.on_disconnect(self);
        }
    }
}

impl fmt::Debug for RpcChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcChannel")
            .field("id", &self.id)
            .field("reactor", &self.reactor)
            .field("peer", &self.peer)
            .field("state", &self.state())
            .finish()
    }
}
