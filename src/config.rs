//! Configuration module for the guardrails engine.
//!
//! Loads configuration from YAML files and environment variables.

use config::{Config as ConfigLoader, ConfigError, Environment, File};
use serde::Deserialize;

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub audit: AuditConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

/// Evaluation limits and deadlines.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Maximum accepted input length in characters.
    pub max_input_chars: usize,
    /// Timeout applied to each individual check, in milliseconds.
    pub check_timeout_ms: u64,
    /// Overall deadline for one evaluation, in milliseconds.
    pub evaluation_deadline_ms: u64,
}

/// External content-safety classifier.
#[derive(Debug, Clone, Deserialize)]
pub struct ClassifierConfig {
    /// When false, content-safety checks score every category 0.0.
    pub enabled: bool,
    pub endpoint: String,
    #[serde(default)]
    pub api_key: String,
    /// HTTP timeout for one scoring call, in milliseconds.
    pub timeout_ms: u64,
}

/// Audit trail queue and hashing.
#[derive(Debug, Clone, Deserialize)]
pub struct AuditConfig {
    /// Entries buffered before the oldest are dropped.
    pub queue_capacity: usize,
    /// Pause between write attempts when the store is failing, in milliseconds.
    pub retry_interval_ms: u64,
    /// Salt mixed into the input hash. Override in production.
    pub hash_salt: String,
}

impl Config {
    /// Load configuration from files and environment.
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables (GUARDRAILS_*)
    /// 2. config/local.yaml (if exists)
    /// 3. config/default.yaml
    pub fn load() -> Result<Self, ConfigError> {
        let config = ConfigLoader::builder()
            // Start with default config
            .add_source(File::with_name("config/default").required(false))
            // Layer on local overrides
            .add_source(File::with_name("config/local").required(false))
            // Layer on environment variables with GUARDRAILS_ prefix
            .add_source(
                Environment::with_prefix("GUARDRAILS")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8081,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://guardrails.db?mode=rwc".to_string(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_input_chars: 16_384,
            check_timeout_ms: 500,
            evaluation_deadline_ms: 2_000,
        }
    }
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: "http://localhost:8090/v1/classify".to_string(),
            api_key: String::new(),
            timeout_ms: 800,
        }
    }
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            retry_interval_ms: 500,
            hash_salt: "guardrails-dev-salt".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_engine_config() {
        let config = EngineConfig::default();
        assert_eq!(config.max_input_chars, 16_384);
        assert!(config.check_timeout_ms < config.evaluation_deadline_ms);
    }

    #[test]
    fn test_default_classifier_disabled() {
        let config = ClassifierConfig::default();
        assert!(!config.enabled);
        assert!(config.timeout_ms > 0);
    }

    #[test]
    fn test_default_audit_config() {
        let config = AuditConfig::default();
        assert!(config.queue_capacity > 0);
        assert!(!config.hash_salt.is_empty());
    }
}
