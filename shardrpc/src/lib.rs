//! # shardrpc
//! 
//! Bidirectional RPC over TCP for multi-reactor servers.
//! 
//! This crate provides:
//! - A checksummed length-prefixed frame format (`RPC0` magic, adler-32 trailer)
//! - Channels where either peer can issue calls and serve requests
//! - A server that spreads accepted connections over worker reactors round-robin
//! - Typed and deferred method handlers with Bincode, JSON or MessagePack bodies

pub mod channel;
pub mod client;
pub mod codec;
mod connection;
pub mod frame;
pub mod protocol;
pub mod server;
pub mod service;

// Channel exports
pub use channel::{
    CallError, CallResult, ChannelId, ChannelObserver, ChannelOptions, ChannelState, RpcChannel,
};

// Client exports
pub use client::{RpcClient, RpcClientBuilder, RpcClientConfig};

// Server exports
pub use server::{RpcServer, RpcServerConfig, ServerHandle};

// Service exports
pub use service::{
    ClosureHandler, DeferredHandler, Reply, Responder, RpcMethodHandler, RpcService,
    ServiceRegistry, TypedHandler,
};

// Protocol exports
pub use protocol::{
    MessageType, MethodName, RequestId, RpcEnvelope, RpcError, RpcErrorCode, ServiceName,
};

// Codec exports
pub use codec::{RpcCodec, SerializationFormat};
pub use frame::{Decoded, FrameError};

// Prelude for common imports
pub mod prelude {
    //! Common imports for shardrpc applications
    
    pub use crate::channel::{CallError, CallResult, ChannelState, RpcChannel};
    pub use crate::client::{RpcClient, RpcClientBuilder, RpcClientConfig};
    pub use crate::codec::{RpcCodec, SerializationFormat};
    pub use crate::protocol::{RpcError, RpcErrorCode};
    pub use crate::server::{RpcServer, RpcServerConfig, ServerHandle};
    pub use crate::service::{Reply, RpcService};
    pub use serde::{Deserialize, Serialize};
    pub use shardrpc_core::{Error, Reactor, ReactorHandle, Result};
}
