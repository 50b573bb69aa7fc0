//! RPC envelope and error definitions

use serde::{Deserialize, Serialize};

/// Correlation key of a call, unique per channel while the call is outstanding
pub type RequestId = u64;

/// Fully qualified service name, e.g. `"Echo.Echo"`
pub type ServiceName = String;

/// Method name within a service
pub type MethodName = String;

/// Kind of envelope carried by a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    Request,
    Response,
}

/// The logical request or response message, independent of wire framing.
///
/// `request` is meaningful on [`MessageType::Request`]; `response` and
/// `error` are meaningful on [`MessageType::Response`]. A response with an
/// `error` reports an explicit remote failure and carries no body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcEnvelope {
    pub message_type: MessageType,
    pub id: RequestId,
    pub service: ServiceName,
    pub method: MethodName,
    pub request: Vec<u8>,
    pub response: Vec<u8>,
    pub error: Option<RpcError>,
}

impl RpcEnvelope {
    /// Build a request envelope
    pub fn request(
        id: RequestId,
        service: impl Into<ServiceName>,
        method: impl Into<MethodName>,
        request: Vec<u8>,
    ) -> Self {
        Self {
            message_type: MessageType::Request,
            id,
            service: service.into(),
            method: method.into(),
            request,
            response: Vec::new(),
            error: None,
        }
    }
    
    /// Build a successful response envelope
    pub fn response(id: RequestId, response: Vec<u8>) -> Self {
        Self {
            message_type: MessageType::Response,
            id,
            service: String::new(),
            method: String::new(),
            request: Vec::new(),
            response,
            error: None,
        }
    }
    
    /// Build a response envelope reporting a remote failure
    pub fn error_response(id: RequestId, error: RpcError) -> Self {
        Self {
            error: Some(error),
            ..Self::response(id, Vec::new())
        }
    }
    
    pub fn is_request(&self) -> bool {
        self.message_type == MessageType::Request
    }
}

/// Standard RPC error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RpcErrorCode {
    /// No service registered under the requested name
    ServiceNotFound,
    /// The service has no method with the requested name
    MethodNotFound,
    /// The request body could not be decoded
    InvalidRequest,
    /// The handler failed or never produced a response
    Internal,
    /// Application defined error
    Custom(i32),
}

impl RpcErrorCode {
    pub fn code(&self) -> i32 {
        match self {
            RpcErrorCode::ServiceNotFound => -32000,
            RpcErrorCode::MethodNotFound => -32601,
            RpcErrorCode::InvalidRequest => -32602,
            RpcErrorCode::Internal => -32603,
            RpcErrorCode::Custom(code) => *code,
        }
    }
    
    pub fn message(&self) -> &'static str {
        match self {
            RpcErrorCode::ServiceNotFound => "Service not found",
            RpcErrorCode::MethodNotFound => "Method not found",
            RpcErrorCode::InvalidRequest => "Invalid request",
            RpcErrorCode::Internal => "Internal error",
            RpcErrorCode::Custom(_) => "Custom error",
        }
    }
}

impl std::fmt::Display for RpcErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message(), self.code())
    }
}

/// Error reported by the remote side of a call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{code}: {message}")]
pub struct RpcError {
    pub code: RpcErrorCode,
    pub message: String,
}

impl RpcError {
    pub fn new(code: RpcErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
    
    pub fn service_not_found(service: &str) -> Self {
        Self::new(
            RpcErrorCode::ServiceNotFound,
            format!("Service '{}' not found", service),
        )
    }
    
    pub fn method_not_found(service: &str, method: &str) -> Self {
        Self::new(
            RpcErrorCode::MethodNotFound,
            format!("Method '{}' not found on service '{}'", method, service),
        )
    }
    
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(RpcErrorCode::InvalidRequest, message)
    }
    
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(RpcErrorCode::Internal, message)
    }
    
    pub fn custom(code: i32, message: impl Into<String>) -> Self {
        Self::new(RpcErrorCode::Custom(code), message)
    }
}
