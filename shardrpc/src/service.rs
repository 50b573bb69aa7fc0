//! Service descriptors, method handlers and the service registry

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

use crate::channel::FrameSink;
use crate::codec::RpcCodec;
use crate::protocol::{MethodName, RequestId, RpcEnvelope, RpcError, ServiceName};

/// Completion handle for one inbound call.
///
/// Consuming it with [`Responder::send`] or [`Responder::fail`] writes the
/// response frame carrying the request id. A responder dropped without
/// being completed answers with an internal error, so the caller is never
/// left waiting.
pub struct Responder {
    id: RequestId,
    sink: Option<FrameSink>,
}

impl Responder {
    pub(crate) fn new(id: RequestId, sink: FrameSink) -> Self {
        Self {
            id,
            sink: Some(sink),
        }
    }
    
    /// Correlation id of the call being answered
    pub fn request_id(&self) -> RequestId {
        self.id
    }
    
    /// Answer with a serialized response body
    pub fn send(mut self, response: Vec<u8>) {
        self.complete(RpcEnvelope::response(self.id, response));
    }
    
    /// Answer with an explicit error
    pub fn fail(mut self, error: RpcError) {
        self.complete(RpcEnvelope::error_response(self.id, error));
    }
    
    fn complete(&mut self, envelope: RpcEnvelope) {
        if let Some(sink) = self.sink.take() {
            sink.send_envelope(&envelope);
        }
    }
}

impl Drop for Responder {
    fn drop(&mut self) {
        if self.sink.is_some() {
            warn!(id = self.id, "Handler dropped a call without replying");
            self.complete(RpcEnvelope::error_response(
                self.id,
                RpcError::internal("handler finished without sending a response"),
            ));
        }
    }
}

impl std::fmt::Debug for Responder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Responder")
            .field("id", &self.id)
            .field("completed", &self.sink.is_none())
            .finish()
    }
}

/// Typed completion handle, serializing the response with the service codec
pub struct Reply<T> {
    responder: Responder,
    codec: RpcCodec,
    _response: PhantomData<fn(T)>,
}

impl<T: Serialize> Reply<T> {
    fn new(responder: Responder, codec: RpcCodec) -> Self {
        Self {
            responder,
            codec,
            _response: PhantomData,
        }
    }
    
    pub fn request_id(&self) -> RequestId {
        self.responder.request_id()
    }
    
    /// Answer with `response`
    pub fn send(self, response: &T) {
        match self.codec.serialize(response) {
            Ok(bytes) => self.responder.send(bytes),
            Err(e) => self.responder.fail(RpcError::internal(e.to_string())),
        }
    }
    
    /// Answer with an explicit error
    pub fn fail(self, error: RpcError) {
        self.responder.fail(error);
    }
    
    /// Answer with either outcome
    pub fn complete(self, result: Result<T, RpcError>) {
        match result {
            Ok(response) => self.send(&response),
            Err(error) => self.fail(error),
        }
    }
}

/// RPC method handler trait
pub trait RpcMethodHandler: Send + Sync {
    /// Handle one call. The handler must eventually complete `responder`,
    /// either before returning or later from any thread.
    fn invoke(&self, request: Vec<u8>, responder: Responder);
    
    /// Get method name
    fn method_name(&self) -> &str;
    
    /// Get method description
    fn description(&self) -> &str {
        ""
    }
}

/// Closure-based handler working on raw bytes
pub struct ClosureHandler<F>
where
    F: Fn(Vec<u8>) -> Result<Vec<u8>, RpcError> + Send + Sync,
{
    name: MethodName,
    description: String,
    handler: F,
}

impl<F> ClosureHandler<F>
where
    F: Fn(Vec<u8>) -> Result<Vec<u8>, RpcError> + Send + Sync,
{
    pub fn new(name: impl Into<MethodName>, handler: F) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            handler,
        }
    }
    
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

impl<F> RpcMethodHandler for ClosureHandler<F>
where
    F: Fn(Vec<u8>) -> Result<Vec<u8>, RpcError> + Send + Sync,
{
    fn invoke(&self, request: Vec<u8>, responder: Responder) {
        match (self.handler)(request) {
            Ok(response) => responder.send(response),
            Err(error) => responder.fail(error),
        }
    }
    
    fn method_name(&self) -> &str {
        &self.name
    }
    
    fn description(&self) -> &str {
        &self.description
    }
}

/// Typed handler answering synchronously
pub struct TypedHandler<Req, Resp, F>
where
    F: Fn(Req) -> Result<Resp, RpcError> + Send + Sync,
{
    name: MethodName,
    description: String,
    handler: F,
    codec: RpcCodec,
    _phantom: PhantomData<fn(Req) -> Resp>,
}

impl<Req, Resp, F> TypedHandler<Req, Resp, F>
where
    Req: DeserializeOwned,
    Resp: Serialize,
    F: Fn(Req) -> Result<Resp, RpcError> + Send + Sync,
{
    pub fn new(name: impl Into<MethodName>, handler: F, codec: RpcCodec) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            handler,
            codec,
            _phantom: PhantomData,
        }
    }
    
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

impl<Req, Resp, F> RpcMethodHandler for TypedHandler<Req, Resp, F>
where
    Req: DeserializeOwned,
    Resp: Serialize,
    F: Fn(Req) -> Result<Resp, RpcError> + Send + Sync,
{
    fn invoke(&self, request: Vec<u8>, responder: Responder) {
        let request: Req = match self.codec.deserialize(&request) {
            Ok(request) => request,
            Err(e) => return responder.fail(RpcError::invalid_request(e.to_string())),
        };
        Reply::new(responder, self.codec).complete((self.handler)(request));
    }
    
    fn method_name(&self) -> &str {
        &self.name
    }
    
    fn description(&self) -> &str {
        &self.description
    }
}

/// Typed handler that receives a [`Reply`] and may answer later
pub struct DeferredHandler<Req, Resp, F>
where
    F: Fn(Req, Reply<Resp>) + Send + Sync,
{
    name: MethodName,
    handler: F,
    codec: RpcCodec,
    _phantom: PhantomData<fn(Req) -> Resp>,
}

impl<Req, Resp, F> DeferredHandler<Req, Resp, F>
where
    Req: DeserializeOwned,
    Resp: Serialize,
    F: Fn(Req, Reply<Resp>) + Send + Sync,
{
    pub fn new(name: impl Into<MethodName>, handler: F, codec: RpcCodec) -> Self {
        Self {
            name: name.into(),
            handler,
            codec,
            _phantom: PhantomData,
        }
    }
}

impl<Req, Resp, F> RpcMethodHandler for DeferredHandler<Req, Resp, F>
where
    Req: DeserializeOwned,
    Resp: Serialize,
    F: Fn(Req, Reply<Resp>) + Send + Sync,
{
    fn invoke(&self, request: Vec<u8>, responder: Responder) {
        match self.codec.deserialize(&request) {
            Ok(request) => (self.handler)(request, Reply::new(responder, self.codec)),
            Err(e) => responder.fail(RpcError::invalid_request(e.to_string())),
        }
    }
    
    fn method_name(&self) -> &str {
        &self.name
    }
}

/// RPC service: a named set of methods sharing one body codec
pub struct RpcService {
    name: ServiceName,
    description: String,
    version: String,
    codec: RpcCodec,
    methods: HashMap<MethodName, Arc<dyn RpcMethodHandler>>,
}

impl RpcService {
    /// Create a new RPC service with the default codec
    pub fn new(name: impl Into<ServiceName>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            version: "1.0".to_string(),
            codec: RpcCodec::default(),
            methods: HashMap::new(),
        }
    }
    
    /// Set service description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
    
    /// Set service version
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }
    
    /// Codec used by typed methods added after this call
    pub fn with_codec(mut self, codec: RpcCodec) -> Self {
        self.codec = codec;
        self
    }
    
    /// Add a method handler, replacing any handler with the same name
    pub fn add_method<H: RpcMethodHandler + 'static>(&mut self, handler: H) -> &mut Self {
        let method_name = handler.method_name().to_string();
        if self.methods.insert(method_name.clone(), Arc::new(handler)).is_some() {
            warn!(service = %self.name, method = %method_name, "Replaced existing method handler");
        }
        self
    }
    
    /// Add a typed method answering synchronously
    pub fn add_typed_method<Req, Resp, F>(&mut self, name: impl Into<MethodName>, handler: F) -> &mut Self
    where
        Req: DeserializeOwned + 'static,
        Resp: Serialize + 'static,
        F: Fn(Req) -> Result<Resp, RpcError> + Send + Sync + 'static,
    {
        let typed_handler = TypedHandler::new(name, handler, self.codec);
        self.add_method(typed_handler)
    }
    
    /// Add a typed method that completes through a [`Reply`]
    pub fn add_deferred_method<Req, Resp, F>(&mut self, name: impl Into<MethodName>, handler: F) -> &mut Self
    where
        Req: DeserializeOwned + 'static,
        Resp: Serialize + 'static,
        F: Fn(Req, Reply<Resp>) + Send + Sync + 'static,
    {
        let deferred_handler = DeferredHandler::new(name, handler, self.codec);
        self.add_method(deferred_handler)
    }
    
    /// Add a closure method working on raw bytes
    pub fn add_closure_method<F>(&mut self, name: impl Into<MethodName>, handler: F) -> &mut Self
    where
        F: Fn(Vec<u8>) -> Result<Vec<u8>, RpcError> + Send + Sync + 'static,
    {
        self.add_method(ClosureHandler::new(name, handler))
    }
    
    pub fn name(&self) -> &str {
        &self.name
    }
    
    pub fn description(&self) -> &str {
        &self.description
    }
    
    pub fn version(&self) -> &str {
        &self.version
    }
    
    pub fn codec(&self) -> RpcCodec {
        self.codec
    }
    
    /// List method names, sorted
    pub fn method_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.methods.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }
    
    /// Get method handler
    pub fn get_method(&self, name: &str) -> Option<&Arc<dyn RpcMethodHandler>> {
        self.methods.get(name)
    }
}

impl std::fmt::Debug for RpcService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcService")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("methods", &self.method_names())
            .finish()
    }
}

/// Services reachable through a channel, keyed by full service name.
///
/// Built before a server starts and shared read-only afterwards.
#[derive(Debug, Default, Clone)]
pub struct ServiceRegistry {
    services: HashMap<ServiceName, Arc<RpcService>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }
    
    /// Register a service, returning the one it replaced
    pub fn register(&mut self, service: RpcService) -> Option<Arc<RpcService>> {
        let name = service.name().to_string();
        self.services.insert(name, Arc::new(service))
    }
    
    pub fn get(&self, name: &str) -> Option<&Arc<RpcService>> {
        self.services.get(name)
    }
    
    pub fn contains(&self, name: &str) -> bool {
        self.services.contains_key(name)
    }
    
    /// Registered service names, sorted
    pub fn service_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.services.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }
    
    pub fn len(&self) -> usize {
        self.services.len()
    }
    
    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
    
    /// Route a request envelope to its handler.
    ///
    /// Unknown services and methods are answered with an explicit error.
    pub fn dispatch(&self, envelope: RpcEnvelope, responder: Responder) {
        let Some(service) = self.services.get(&envelope.service) else {
            warn!(id = envelope.id, service = %envelope.service, "Request for unknown service");
            return responder.fail(RpcError::service_not_found(&envelope.service));
        };
        
        let Some(handler) = service.get_method(&envelope.method) else {
            warn!(
                id = envelope.id,
                service = %envelope.service,
                method = %envelope.method,
                "Request for unknown method"
            );
            return responder.fail(RpcError::method_not_found(&envelope.service, &envelope.method));
        };
        
        debug!(id = envelope.id, service = %envelope.service, method = %envelope.method, "Dispatching request");
        handler.invoke(envelope.request, responder);
    }
}
