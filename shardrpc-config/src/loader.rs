//! Configuration loading utilities

use crate::{config::ShardRpcConfig, ConfigError, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Configuration file formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Yaml,
    Toml,
    Json,
}

impl ConfigFormat {
    /// Detect format from file extension
    pub fn from_extension(path: &Path) -> Option<Self> {
        path.extension()?.to_str().map(|ext| {
            match ext.to_lowercase().as_str() {
                "toml" => ConfigFormat::Toml,
                "json" => ConfigFormat::Json,
                _ => ConfigFormat::Yaml,
            }
        })
    }
}

/// Configuration loader
pub struct ConfigLoader {
    search_paths: Vec<PathBuf>,
    file_names: Vec<String>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self {
            search_paths: vec![
                PathBuf::from("."),
                PathBuf::from("config"),
                PathBuf::from("/etc/shardrpc"),
            ],
            file_names: vec!["shardrpc".to_string(), "config".to_string()],
        }
    }
}

impl ConfigLoader {
    /// Create a new config loader
    pub fn new() -> Self {
        Self::default()
    }
    
    /// Create a loader that only searches `paths`
    pub fn with_search_paths<I, P>(paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            search_paths: paths.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }
    
    /// Add a search path
    pub fn add_search_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.search_paths.push(path.into());
        self
    }
    
    /// Add a file name (without extension) to search for
    pub fn add_file_name<S: Into<String>>(mut self, name: S) -> Self {
        self.file_names.push(name.into());
        self
    }
    
    /// Load configuration from a specific file
    pub fn load_file<P: AsRef<Path>>(&self, path: P) -> Result<ShardRpcConfig> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let format = ConfigFormat::from_extension(path).unwrap_or(ConfigFormat::Yaml);
        parse_content(&content, format)
    }
    
    /// Load configuration by searching for config files, falling back to defaults
    pub fn load(&self) -> Result<ShardRpcConfig> {
        if let Some(path) = self.find_config_file() {
            tracing::info!("Loading configuration from: {}", path.display());
            return self.load_file(&path);
        }
        
        tracing::info!("No configuration file found, using defaults");
        Ok(ShardRpcConfig::default())
    }
    
    /// Find the first available config file
    pub fn find_config_file(&self) -> Option<PathBuf> {
        let extensions = ["yaml", "yml", "toml", "json"];
        
        for search_path in &self.search_paths {
            for file_name in &self.file_names {
                for ext in &extensions {
                    let path = search_path.join(format!("{}.{}", file_name, ext));
                    if path.is_file() {
                        return Some(path);
                    }
                }
            }
        }
        
        None
    }
    
    /// Load configuration, apply `SHARDRPC_*` overrides and validate
    pub fn load_with_env(&self) -> Result<ShardRpcConfig> {
        let config = crate::env::EnvOverride::apply(self.load()?)?;
        crate::validation::validate_config(&config)?;
        Ok(config)
    }
    
    /// Load a specific file, apply `SHARDRPC_*` overrides and validate
    pub fn load_file_with_env<P: AsRef<Path>>(&self, path: P) -> Result<ShardRpcConfig> {
        let config = crate::env::EnvOverride::apply(self.load_file(path)?)?;
        crate::validation::validate_config(&config)?;
        Ok(config)
    }
}

/// Parse configuration content based on format
pub fn parse_content(content: &str, format: ConfigFormat) -> Result<ShardRpcConfig> {
    match format {
        ConfigFormat::Yaml => serde_yaml::from_str(content).map_err(ConfigError::Yaml),
        ConfigFormat::Toml => toml::from_str(content).map_err(ConfigError::Toml),
        ConfigFormat::Json => serde_json::from_str(content).map_err(ConfigError::Json),
    }
}
