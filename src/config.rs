//! Configuration management for layerpack
//!
//! Settings are read from environment variables with fallback defaults.
//!
//! # Environment Variables
//!
//! - `LAYERPACK_CACHE_DIR`: layer cache, image store and container
//!   directories - default: the user cache dir + "layerpack"
//! - `LAYERPACK_LOG_LEVEL`: logging level - default: "info"
//! - `LAYERPACK_NO_CACHE`: always re-execute build steps (true|false) - default: "false"
//! - `LAYERPACK_KEEP_CONTAINERS`: keep instance filesystems after exit (true|false) - default: "false"

use std::env;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

const DEFAULT_LOG_LEVEL: &str = "info";
const CACHE_DIR_NAME: &str = "layerpack";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    #[error("Failed to parse {field}: {error}")]
    ParseError { field: String, error: String },
}

#[derive(Debug, Clone)]
pub struct LayerpackConfig {
    /// Root of the layer cache, image store and container instances
    pub cache_dir: PathBuf,

    /// Re-execute every build step
    pub no_cache: bool,

    /// Keep container filesystems after the process exits
    pub keep_containers: bool,

    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
}

fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(env::temp_dir)
        .join(CACHE_DIR_NAME)
}

fn parse_bool(field: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(ConfigError::ParseError {
            field: field.to_string(),
            error: format!("expected a boolean, got '{}'", other),
        }),
    }
}

fn bool_from_env(field: &str) -> Result<bool, ConfigError> {
    match env::var(field) {
        Ok(value) => parse_bool(field, &value),
        Err(_) => Ok(false),
    }
}

impl Default for LayerpackConfig {
    /// Loads from environment variables; malformed booleans read as `false`
    fn default() -> Self {
        Self::from_env().unwrap_or_else(|_| Self {
            cache_dir: env::var("LAYERPACK_CACHE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| default_cache_dir()),
            no_cache: false,
            keep_containers: false,
            log_level: DEFAULT_LOG_LEVEL.to_string(),
        })
    }
}

impl LayerpackConfig {
    /// Loads from environment variables, reporting malformed values
    pub fn from_env() -> Result<Self, ConfigError> {
        let cache_dir = env::var("LAYERPACK_CACHE_DIR")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(default_cache_dir);

        let log_level = env::var("LAYERPACK_LOG_LEVEL")
            .unwrap_or_else(|_| DEFAULT_LOG_LEVEL.to_string())
            .to_lowercase();

        Ok(Self {
            cache_dir,
            no_cache: bool_from_env("LAYERPACK_NO_CACHE")?,
            keep_containers: bool_from_env("LAYERPACK_KEEP_CONTAINERS")?,
            log_level,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache_dir.as_os_str().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "Cache directory cannot be empty".to_string(),
            ));
        }

        match self.log_level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => {
                return Err(ConfigError::ValidationFailed(format!(
                    "Invalid log level: {}. Valid options: trace, debug, info, warn, error",
                    self.log_level
                )))
            }
        }

        Ok(())
    }
}

impl fmt::Display for LayerpackConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Layerpack Configuration:")?;
        writeln!(f, "  Cache Dir: {}", self.cache_dir.display())?;
        writeln!(f, "  No Cache: {}", self.no_cache)?;
        writeln!(f, "  Keep Containers: {}", self.keep_containers)?;
        writeln!(f, "  Log Level: {}", self.log_level)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    /// Helper to temporarily set environment variables for testing
    struct EnvGuard {
        key: String,
        old_value: Option<String>,
    }

    impl EnvGuard {
        fn set(key: &str, value: &str) -> Self {
            let old_value = env::var(key).ok();
            env::set_var(key, value);
            Self {
                key: key.to_string(),
                old_value,
            }
        }

        fn unset(key: &str) -> Self {
            let old_value = env::var(key).ok();
            env::remove_var(key);
            Self {
                key: key.to_string(),
                old_value,
            }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            match &self.old_value {
                Some(v) => env::set_var(&self.key, v),
                None => env::remove_var(&self.key),
            }
        }
    }

    #[test]
    #[serial]
    fn test_default_configuration() {
        let _guards = vec![
            EnvGuard::unset("LAYERPACK_CACHE_DIR"),
            EnvGuard::unset("LAYERPACK_NO_CACHE"),
            EnvGuard::unset("LAYERPACK_KEEP_CONTAINERS"),
            EnvGuard::unset("LAYERPACK_LOG_LEVEL"),
        ];

        let config = LayerpackConfig::default();
        assert!(config.cache_dir.ends_with(CACHE_DIR_NAME));
        assert!(!config.no_cache);
        assert!(!config.keep_containers);
        assert_eq!(config.log_level, DEFAULT_LOG_LEVEL);
        assert!(config.validate().is_ok());
    }

    #[test]
    #[serial]
    fn test_environment_variable_parsing() {
        let _guards = vec![
            EnvGuard::set("LAYERPACK_CACHE_DIR", "/tmp/layerpack-test"),
            EnvGuard::set("LAYERPACK_NO_CACHE", "true"),
            EnvGuard::set("LAYERPACK_KEEP_CONTAINERS", "1"),
            EnvGuard::set("LAYERPACK_LOG_LEVEL", "DEBUG"),
        ];

        let config = LayerpackConfig::from_env().unwrap();
        assert_eq!(config.cache_dir, PathBuf::from("/tmp/layerpack-test"));
        assert!(config.no_cache);
        assert!(config.keep_containers);
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    #[serial]
    fn test_malformed_boolean() {
        let _guard = EnvGuard::set("LAYERPACK_NO_CACHE", "sometimes");
        assert!(matches!(
            LayerpackConfig::from_env(),
            Err(ConfigError::ParseError { .. })
        ));
        assert!(!LayerpackConfig::default().no_cache);
    }

    #[test]
    fn test_invalid_log_level() {
        let config = LayerpackConfig {
            cache_dir: PathBuf::from("/tmp/cache"),
            no_cache: false,
            keep_containers: false,
            log_level: "loud".to_string(),
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_display() {
        let config = LayerpackConfig {
            cache_dir: PathBuf::from("/tmp/cache"),
            no_cache: true,
            keep_containers: false,
            log_level: "info".to_string(),
        };
        let display = config.to_string();
        assert!(display.contains("Layerpack Configuration:"));
        assert!(display.contains("/tmp/cache"));
    }
}
