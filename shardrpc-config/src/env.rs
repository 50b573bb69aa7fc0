//! Environment variable override support

use crate::{config::ShardRpcConfig, ConfigError, Result};
use std::env;
use std::str::FromStr;

/// Environment variable override utility
pub struct EnvOverride;

impl EnvOverride {
    /// Apply `SHARDRPC_*` environment variable overrides to configuration
    pub fn apply(config: ShardRpcConfig) -> Result<ShardRpcConfig> {
        Self::apply_from(config, |key| env::var(key).ok())
    }
    
    /// Apply overrides read through `lookup`
    pub fn apply_from<F>(mut config: ShardRpcConfig, lookup: F) -> Result<ShardRpcConfig>
    where
        F: Fn(&str) -> Option<String>,
    {
        // App configuration
        if let Some(name) = lookup("SHARDRPC_APP_NAME") {
            config.app.name = name;
        }
        if let Some(environment) = lookup("SHARDRPC_APP_ENVIRONMENT") {
            config.app.environment = environment;
        }
        
        // Reactor configuration
        if let Some(thread_name) = lookup("SHARDRPC_REACTOR_THREAD_NAME") {
            config.reactor.thread_name = thread_name;
        }
        if let Some(interval) = lookup("SHARDRPC_REACTOR_EVENT_INTERVAL") {
            config.reactor.event_interval = parse_number("SHARDRPC_REACTOR_EVENT_INTERVAL", &interval)?;
        }
        
        // Server configuration
        if let Some(address) = lookup("SHARDRPC_SERVER_BIND_ADDRESS") {
            config.server.bind_address = address;
        }
        if let Some(threads) = lookup("SHARDRPC_SERVER_THREADS") {
            config.server.threads = parse_number("SHARDRPC_SERVER_THREADS", &threads)?;
        }
        if let Some(backlog) = lookup("SHARDRPC_SERVER_BACKLOG") {
            config.server.backlog = parse_number("SHARDRPC_SERVER_BACKLOG", &backlog)?;
        }
        if let Some(reuse) = lookup("SHARDRPC_SERVER_REUSE_ADDRESS") {
            config.server.reuse_address = parse_bool(&reuse)?;
        }
        if let Some(grace) = lookup("SHARDRPC_SERVER_SHUTDOWN_GRACE_MS") {
            config.server.shutdown_grace_ms = parse_number("SHARDRPC_SERVER_SHUTDOWN_GRACE_MS", &grace)?;
        }
        
        // Client configuration
        if let Some(address) = lookup("SHARDRPC_CLIENT_SERVER_ADDRESS") {
            config.client.server_address = address;
        }
        if let Some(timeout) = lookup("SHARDRPC_CLIENT_CONNECT_TIMEOUT_MS") {
            config.client.connect_timeout_ms = parse_number("SHARDRPC_CLIENT_CONNECT_TIMEOUT_MS", &timeout)?;
        }
        if let Some(attempts) = lookup("SHARDRPC_CLIENT_CONNECT_ATTEMPTS") {
            config.client.connect_attempts = parse_number("SHARDRPC_CLIENT_CONNECT_ATTEMPTS", &attempts)?;
        }
        if let Some(timeout) = lookup("SHARDRPC_CLIENT_REQUEST_TIMEOUT_MS") {
            config.client.request_timeout_ms = parse_number("SHARDRPC_CLIENT_REQUEST_TIMEOUT_MS", &timeout)?;
        }
        
        // Codec configuration
        if let Some(format) = lookup("SHARDRPC_CODEC_FORMAT") {
            config.codec.format = format;
        }
        
        // Logging configuration
        if let Some(level) = lookup("SHARDRPC_LOG_LEVEL") {
            config.logging.level = level;
        }
        if let Some(format) = lookup("SHARDRPC_LOG_FORMAT") {
            config.logging.format = format;
        }
        if let Some(colored) = lookup("SHARDRPC_LOG_COLORED") {
            config.logging.colored = parse_bool(&colored)?;
        }
        if let Some(directives) = lookup("SHARDRPC_LOG_DIRECTIVES") {
            config.logging.directives = Some(directives);
        }
        
        Ok(config)
    }
}

fn parse_number<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Environment(format!("Invalid {}: {}", key, value)))
}

fn parse_bool(s: &str) -> Result<bool> {
    match s.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Environment(format!("Invalid boolean value: {}", s))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    
    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }
    
    #[test]
    fn test_env_overrides() {
        let config = EnvOverride::apply_from(
            ShardRpcConfig::default(),
            lookup(&[
                ("SHARDRPC_SERVER_BIND_ADDRESS", "0.0.0.0:9999"),
                ("SHARDRPC_SERVER_THREADS", "8"),
                ("SHARDRPC_SERVER_REUSE_ADDRESS", "off"),
                ("SHARDRPC_CLIENT_REQUEST_TIMEOUT_MS", "1500"),
                ("SHARDRPC_CLIENT_CONNECT_ATTEMPTS", "5"),
                ("SHARDRPC_CODEC_FORMAT", "msgpack"),
                ("SHARDRPC_LOG_LEVEL", "trace"),
                ("SHARDRPC_LOG_DIRECTIVES", "shardrpc=debug"),
            ]),
        )
        .unwrap();
        
        assert_eq!(config.server.bind_address, "0.0.0.0:9999");
        assert_eq!(config.server.threads, 8);
        assert!(!config.server.reuse_address);
        assert_eq!(config.client.request_timeout_ms, 1500);
        assert_eq!(config.client.connect_attempts, 5);
        assert_eq!(config.codec.format, "msgpack");
        assert_eq!(config.logging.level, "trace");
        assert_eq!(config.logging.directives.as_deref(), Some("shardrpc=debug"));
        // Untouched values survive.
        assert_eq!(config.server.backlog, 1024);
    }
    
    #[test]
    fn test_invalid_number_is_rejected() {
        let result = EnvOverride::apply_from(
            ShardRpcConfig::default(),
            lookup(&[("SHARDRPC_SERVER_THREADS", "many")]),
        );
        assert!(matches!(result, Err(ConfigError::Environment(_))));
    }
    
    #[test]
    fn test_process_environment() {
        std::env::set_var("SHARDRPC_APP_NAME", "from-env");
        let config = EnvOverride::apply(ShardRpcConfig::default()).unwrap();
        std::env::remove_var("SHARDRPC_APP_NAME");
        assert_eq!(config.app.name, "from-env");
    }
    
    #[test]
    fn test_parse_bool() {
        assert!(parse_bool("true").unwrap());
        assert!(parse_bool("YES").unwrap());
        assert!(parse_bool("1").unwrap());
        assert!(!parse_bool("off").unwrap());
        assert!(!parse_bool("0").unwrap());
        assert!(parse_bool("maybe").is_err());
    }
}
