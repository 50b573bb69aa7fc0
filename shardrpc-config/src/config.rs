//! Core configuration structures

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main shardrpc configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShardRpcConfig {
    /// Application metadata
    #[serde(default)]
    pub app: AppConfig,
    
    /// Reactor thread configuration
    #[serde(default)]
    pub reactor: ReactorConfig,
    
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,
    
    /// Client configuration
    #[serde(default)]
    pub client: ClientConfig,
    
    /// Message body codec
    #[serde(default)]
    pub codec: CodecConfig,
    
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Application metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Application name
    #[serde(default = "default_app_name")]
    pub name: String,
    
    /// Environment (dev, staging, production)
    #[serde(default = "default_environment")]
    pub environment: String,
}

/// Reactor thread configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReactorConfig {
    /// Thread name prefix, the reactor index is appended
    #[serde(default = "default_thread_name")]
    pub thread_name: String,
    
    /// Tasks polled between two I/O driver checks
    #[serde(default = "default_event_interval")]
    pub event_interval: u32,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address, `host:port`
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    
    /// Worker reactors; 0 or 1 keeps everything on the base reactor
    #[serde(default = "default_threads")]
    pub threads: usize,
    
    /// Listen backlog
    #[serde(default = "default_backlog")]
    pub backlog: u32,
    
    /// Set SO_REUSEADDR on the listener
    #[serde(default = "default_true")]
    pub reuse_address: bool,
    
    /// How long shutdown waits for live channels to close
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
    
    /// Initial per-connection read buffer size in bytes
    #[serde(default = "default_read_buffer_size")]
    pub read_buffer_size: usize,
}

/// Client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Server address, `host:port`
    #[serde(default = "default_bind_address")]
    pub server_address: String,
    
    /// Connect timeout in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    
    /// Connect attempts made before a refused or timed-out connect is reported
    #[serde(default = "default_connect_attempts")]
    pub connect_attempts: u32,
    
    /// Per-call timeout in milliseconds
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    
    /// Initial per-connection read buffer size in bytes
    #[serde(default = "default_read_buffer_size")]
    pub read_buffer_size: usize,
}

/// Message body codec
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodecConfig {
    /// `bincode`, `json` or `msgpack`
    #[serde(default = "default_codec_format")]
    pub format: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    
    /// Log format (text, json)
    #[serde(default = "default_log_format")]
    pub format: String,
    
    /// Enable colored output
    #[serde(default = "default_true")]
    pub colored: bool,
    
    /// Filter directives, e.g. `shardrpc=debug,tokio=warn`; overrides `level`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub directives: Option<String>,
}

impl ServerConfig {
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

impl ClientConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
    
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            environment: default_environment(),
        }
    }
}

impl Default for ReactorConfig {
    fn default() -> Self {
        Self {
            thread_name: default_thread_name(),
            event_interval: default_event_interval(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            threads: default_threads(),
            backlog: default_backlog(),
            reuse_address: default_true(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
            read_buffer_size: default_read_buffer_size(),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_address: default_bind_address(),
            connect_timeout_ms: default_connect_timeout_ms(),
            connect_attempts: default_connect_attempts(),
            request_timeout_ms: default_request_timeout_ms(),
            read_buffer_size: default_read_buffer_size(),
        }
    }
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            format: default_codec_format(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            colored: default_true(),
            directives: None,
        }
    }
}

fn default_app_name() -> String { "shardrpc".to_string() }
fn default_environment() -> String { "development".to_string() }
fn default_thread_name() -> String { "shardrpc-reactor".to_string() }
fn default_event_interval() -> u32 { 61 }
fn default_bind_address() -> String { "127.0.0.1:9090".to_string() }
fn default_threads() -> usize { 1 }
fn default_backlog() -> u32 { 1024 }
fn default_shutdown_grace_ms() -> u64 { 5_000 }
fn default_read_buffer_size() -> usize { 16 * 1024 }
fn default_connect_timeout_ms() -> u64 { 5_000 }
fn default_connect_attempts() -> u32 { 3 }
fn default_request_timeout_ms() -> u64 { 30_000 }
fn default_codec_format() -> String { "bincode".to_string() }
fn default_log_level() -> String { "info".to_string() }
fn default_log_format() -> String { "text".to_string() }
fn default_true() -> bool { true }
