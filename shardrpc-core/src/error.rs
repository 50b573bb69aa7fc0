//! Error types for shardrpc
//!
//! Defines the error type shared by the reactor, server and configuration layers.

/// Standard error type for shardrpc operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(String),
    
    /// Network operation failed
    #[error("Network error: {0}")]
    Network(String),
    
    /// Invalid argument provided
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    
    /// Timeout occurred
    #[error("Timeout: {0}")]
    Timeout(String),
    
    /// A reactor thread could not be started or has already stopped
    #[error("Reactor unavailable: {0}")]
    ReactorUnavailable(String),
    
    /// Internal framework error
    #[error("Internal error: {0}")]
    Internal(String),
    
    /// Address already in use or resource already registered
    #[error("Already exists: {0}")]
    AlreadyExists(String),
    
    /// Connection error
    #[error("Connection error: {0}")]
    Connection(String),
    
    /// Protocol error
    #[error("Protocol error: {0}")]
    Protocol(String),
    
    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        match error.kind() {
            std::io::ErrorKind::ConnectionRefused
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::ConnectionReset => Error::Connection(error.to_string()),
            std::io::ErrorKind::TimedOut => Error::Timeout(error.to_string()),
            std::io::ErrorKind::AddrInUse => Error::AlreadyExists(error.to_string()),
            std::io::ErrorKind::AddrNotAvailable => Error::Network(error.to_string()),
            _ => Error::Io(error.to_string()),
        }
    }
}

/// Result type for shardrpc operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Check if this is a retryable error
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Timeout(_) | Error::Network(_) | Error::Connection(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    
    #[test]
    fn test_io_error_mapping() {
        let refused = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = Error::from(refused);
        assert!(matches!(err, Error::Connection(_)));
        assert!(err.is_retryable());
        
        let in_use = std::io::Error::new(std::io::ErrorKind::AddrInUse, "in use");
        assert!(matches!(Error::from(in_use), Error::AlreadyExists(_)));
        
        let other = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        let err = Error::from(other);
        assert!(matches!(err, Error::Io(_)));
        assert!(!err.is_retryable());
    }
}
