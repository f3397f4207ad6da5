//! Configuration management for the preprocessing relay

use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::upload::types::{ChunkLimits, DEFAULT_CHUNK_SIZE, MAX_FILE_SIZE};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub upload: UploadConfig,
    pub processor: ProcessorConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Directory holding one subdirectory per submitted session
    pub root: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadConfig {
    pub chunk_size: usize,
    pub max_file_size: u64,
}

impl UploadConfig {
    pub fn limits(&self) -> ChunkLimits {
        ChunkLimits {
            chunk_size: self.chunk_size,
            max_file_size: self.max_file_size,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProcessorConfig {
    /// Executable to run (resolved through PATH)
    pub program: String,
    /// Arguments placed before the JSON payload arguments
    pub args: Vec<String>,
    /// Hard deadline for one job
    pub timeout: Duration,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {name}: {value:?}")]
    InvalidValue { name: &'static str, value: String },
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 3000,
            },
            storage: StorageConfig {
                root: PathBuf::from("temp"),
            },
            upload: UploadConfig {
                chunk_size: DEFAULT_CHUNK_SIZE,
                max_file_size: MAX_FILE_SIZE,
            },
            processor: ProcessorConfig::default(),
        }
    }
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            program: "python3".to_string(),
            args: vec!["preprocess.py".to_string()],
            timeout: Duration::from_secs(300),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let chunk_size: usize = parse_var("CHUNK_SIZE", DEFAULT_CHUNK_SIZE)?;
        if chunk_size == 0 {
            return Err(ConfigError::InvalidValue {
                name: "CHUNK_SIZE",
                value: "0".to_string(),
            });
        }

        Ok(Config {
            server: ServerConfig {
                host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: parse_var("SERVER_PORT", 3000)?,
            },
            storage: StorageConfig {
                root: env::var("STORAGE_DIR")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| PathBuf::from("temp")),
            },
            upload: UploadConfig {
                chunk_size,
                max_file_size: parse_var("MAX_FILE_SIZE", MAX_FILE_SIZE)?,
            },
            processor: ProcessorConfig {
                program: env::var("PROCESSOR_PROGRAM").unwrap_or_else(|_| "python3".to_string()),
                args: env::var("PROCESSOR_ARGS")
                    .map(|args| args.split_whitespace().map(str::to_string).collect())
                    .unwrap_or_else(|_| vec!["preprocess.py".to_string()]),
                timeout: Duration::from_secs(parse_var("PROCESS_TIMEOUT_SECS", 300)?),
            },
        })
    }
}

/// Parse an optional numeric variable, falling back to `default` when unset
fn parse_var<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue { name, value }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_client_protocol() {
        let config = Config::default();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.upload.limits().chunk_size, 100_000);
        assert_eq!(config.storage.root, PathBuf::from("temp"));
        assert_eq!(config.processor.args, vec!["preprocess.py"]);
    }

    #[test]
    fn test_parse_var() {
        // Unset variables fall back to the default
        assert_eq!(parse_var("PREP_SERVER_TEST_UNSET_VAR", 7u16).unwrap(), 7);

        env::set_var("PREP_SERVER_TEST_BAD_VAR", "seven");
        let result = parse_var::<u16>("PREP_SERVER_TEST_BAD_VAR", 7);
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));

        env::set_var("PREP_SERVER_TEST_GOOD_VAR", " 42 ");
        assert_eq!(parse_var::<u16>("PREP_SERVER_TEST_GOOD_VAR", 7).unwrap(), 42);
    }
}
