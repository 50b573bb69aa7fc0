//! Configuration validation utilities

use crate::{config::*, ConfigError, Result};
use std::net::{SocketAddr, ToSocketAddrs};

const MAX_THREADS: usize = 1024;
const VALID_FORMATS: [&str; 4] = ["bincode", "json", "msgpack", "messagepack"];
const VALID_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Validate complete configuration
pub fn validate_config(config: &ShardRpcConfig) -> Result<()> {
    validate_app_config(&config.app)?;
    validate_reactor_config(&config.reactor)?;
    validate_server_config(&config.server)?;
    validate_client_config(&config.client)?;
    validate_codec_config(&config.codec)?;
    validate_logging_config(&config.logging)?;
    Ok(())
}

/// Validate application configuration
pub fn validate_app_config(config: &AppConfig) -> Result<()> {
    if config.name.is_empty() {
        return Err(ConfigError::Validation("App name cannot be empty".to_string()));
    }
    
    let valid_environments = ["development", "dev", "staging", "stage", "production", "prod", "test"];
    if !valid_environments.contains(&config.environment.as_str()) {
        return Err(ConfigError::Validation(format!(
            "Invalid environment '{}'. Valid values: {:?}",
            config.environment, valid_environments
        )));
    }
    
    Ok(())
}

/// Validate reactor configuration
pub fn validate_reactor_config(config: &ReactorConfig) -> Result<()> {
    if config.thread_name.is_empty() {
        return Err(ConfigError::Validation("Reactor thread name cannot be empty".to_string()));
    }
    
    if config.event_interval == 0 {
        return Err(ConfigError::Validation("Reactor event interval must be greater than 0".to_string()));
    }
    
    Ok(())
}

/// Validate server configuration
pub fn validate_server_config(config: &ServerConfig) -> Result<()> {
    resolve_address("server.bind_address", &config.bind_address)?;
    
    if config.threads > MAX_THREADS {
        return Err(ConfigError::Validation(format!(
            "Server threads should not exceed {}",
            MAX_THREADS
        )));
    }
    
    if config.backlog == 0 {
        return Err(ConfigError::Validation("Listen backlog must be greater than 0".to_string()));
    }
    
    if config.read_buffer_size == 0 {
        return Err(ConfigError::Validation("Read buffer size must be greater than 0".to_string()));
    }
    
    Ok(())
}

/// Validate client configuration
pub fn validate_client_config(config: &ClientConfig) -> Result<()> {
    resolve_address("client.server_address", &config.server_address)?;
    
    if config.connect_timeout_ms == 0 {
        return Err(ConfigError::Validation("Connect timeout must be greater than 0".to_string()));
    }
    
    if config.request_timeout_ms == 0 {
        return Err(ConfigError::Validation("Request timeout must be greater than 0".to_string()));
    }
    
    if config.connect_attempts == 0 {
        return Err(ConfigError::Validation("Connect attempts must be greater than 0".to_string()));
    }
    
    Ok(())
}

/// Validate codec configuration
pub fn validate_codec_config(config: &CodecConfig) -> Result<()> {
    if !VALID_FORMATS.contains(&config.format.to_lowercase().as_str()) {
        return Err(ConfigError::Validation(format!(
            "Invalid codec format '{}'. Valid values: {:?}",
            config.format, VALID_FORMATS
        )));
    }
    Ok(())
}

/// Validate logging configuration
pub fn validate_logging_config(config: &LoggingConfig) -> Result<()> {
    if !VALID_LEVELS.contains(&config.level.to_lowercase().as_str()) {
        return Err(ConfigError::Validation(format!(
            "Invalid log level '{}'. Valid values: {:?}",
            config.level, VALID_LEVELS
        )));
    }
    
    let valid_formats = ["text", "json"];
    if !valid_formats.contains(&config.format.as_str()) {
        return Err(ConfigError::Validation(format!(
            "Invalid log format '{}'. Valid values: {:?}",
            config.format, valid_formats
        )));
    }
    
    Ok(())
}

/// Resolve a `host:port` string to its first socket address
pub fn resolve_address(field: &str, address: &str) -> Result<SocketAddr> {
    address
        .to_socket_addrs()
        .map_err(|e| ConfigError::Validation(format!("Invalid {} '{}': {}", field, address, e)))?
        .next()
        .ok_or_else(|| ConfigError::Validation(format!("{} '{}' resolved to no address", field, address)))
}
