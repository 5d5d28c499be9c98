use crate::error::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Lowest number of impacted member services that can open an application incident
pub const MIN_IMPACTED_SERVICES: usize = 2;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,

    /// State backend configuration
    pub state: StateConfig,

    /// Topology processor configuration
    pub processor: ProcessorConfig,

    /// Workflow event dispatch configuration
    #[serde(default)]
    pub workflow: WorkflowConfig,

    /// Observability configuration
    pub observability: ObservabilityConfig,

    /// Tenancy configuration
    #[serde(default)]
    pub tenancy: TenancyConfig,
}

impl Config {
    /// Load configuration from file and environment
    pub fn load() -> Result<Self> {
        let config_path =
            std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config/default.toml".to_string());

        let config: Config = config::Config::builder()
            // Start with default values
            .add_source(config::File::from_str(
                include_str!("../config/default.toml"),
                config::FileFormat::Toml,
            ))
            // Override with config file if it exists
            .add_source(config::File::with_name(&config_path).required(false))
            // Override with environment variables, e.g. TIM__PROCESSOR__SCAN_ENABLED
            .add_source(
                config::Environment::with_prefix("TIM")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the rest of the system cannot honor
    pub fn validate(&self) -> Result<()> {
        if self.processor.min_impacted_services < MIN_IMPACTED_SERVICES {
            return Err(AppError::Configuration(format!(
                "processor.min_impacted_services must be at least {}",
                MIN_IMPACTED_SERVICES
            )));
        }

        if self.state.backend == StateBackend::Sled && self.state.path.is_none() {
            return Err(AppError::Configuration(
                "Sled backend requires 'state.path'".to_string(),
            ));
        }

        if self.processor.scan_enabled && self.processor.scan_interval_secs == 0 {
            return Err(AppError::Configuration(
                "processor.scan_interval_secs must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            state: StateConfig::default(),
            processor: ProcessorConfig::default(),
            workflow: WorkflowConfig::default(),
            observability: ObservabilityConfig::default(),
            tenancy: TenancyConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP server host
    #[serde(default = "default_host")]
    pub host: String,

    /// HTTP server port
    #[serde(default = "default_http_port")]
    pub http_port: u16,

    /// Request timeout (seconds)
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            http_port: default_http_port(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StateConfig {
    /// State backend type
    #[serde(default)]
    pub backend: StateBackend,

    /// Path for the embedded database (sled)
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum StateBackend {
    #[default]
    Memory,
    Sled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessorConfig {
    /// Distinct impacted member services needed to open an application incident
    #[serde(default = "default_min_impacted_services")]
    pub min_impacted_services: usize,

    /// Run the periodic topology scan
    #[serde(default = "default_true")]
    pub scan_enabled: bool,

    /// Seconds between scans
    #[serde(default = "default_scan_interval")]
    pub scan_interval_secs: u64,

    /// How far back a scan looks for firing alerts (seconds)
    #[serde(default = "default_look_back_window")]
    pub look_back_window_secs: u64,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            min_impacted_services: default_min_impacted_services(),
            scan_enabled: true,
            scan_interval_secs: default_scan_interval(),
            look_back_window_secs: default_look_back_window(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// Capacity of the in-process workflow event channel
    #[serde(default = "default_broadcast_capacity")]
    pub broadcast_capacity: usize,

    /// Enable webhook delivery of workflow events
    #[serde(default)]
    pub webhook_enabled: bool,

    /// Webhook URL receiving workflow events
    pub webhook_url: Option<String>,

    /// Webhook timeout (seconds)
    #[serde(default = "default_webhook_timeout")]
    pub webhook_timeout_secs: u64,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            broadcast_capacity: default_broadcast_capacity(),
            webhook_enabled: false,
            webhook_url: None,
            webhook_timeout_secs: default_webhook_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default)]
    pub json_logs: bool,

    /// Service name
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// Enable Prometheus metrics
    #[serde(default = "default_true")]
    pub prometheus_enabled: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logs: false,
            service_name: default_service_name(),
            prometheus_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenancyConfig {
    /// Tenant used when a request carries no tenant header
    #[serde(default = "default_tenant_id")]
    pub default_tenant_id: String,
}

impl Default for TenancyConfig {
    fn default() -> Self {
        Self {
            default_tenant_id: default_tenant_id(),
        }
    }
}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_http_port() -> u16 {
    8080
}

fn default_request_timeout() -> u64 {
    30
}

fn default_min_impacted_services() -> usize {
    MIN_IMPACTED_SERVICES
}

fn default_scan_interval() -> u64 {
    10
}

fn default_look_back_window() -> u64 {
    900 // 15 minutes
}

fn default_broadcast_capacity() -> usize {
    1024
}

fn default_webhook_timeout() -> u64 {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_service_name() -> String {
    "topology-incident-manager".to_string()
}

fn default_tenant_id() -> String {
    "keep".to_string()
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_values() {
        assert_eq!(default_http_port(), 8080);
        assert_eq!(default_min_impacted_services(), 2);
        assert_eq!(default_look_back_window(), 900);
        assert_eq!(default_log_level(), "info");
        assert!(default_true());
    }

    #[test]
    fn test_state_backend_default() {
        assert_eq!(StateBackend::default(), StateBackend::Memory);
    }

    #[test]
    fn test_embedded_defaults_parse() {
        let config: Config = config::Config::builder()
            .add_source(config::File::from_str(
                include_str!("../config/default.toml"),
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert!(config.validate().is_ok());
        assert_eq!(config.processor.min_impacted_services, 2);
        assert_eq!(config.tenancy.default_tenant_id, "keep");
    }

    #[test]
    fn test_validate_rejects_low_threshold() {
        let mut config = Config::default();
        config.processor.min_impacted_services = 1;
        assert!(matches!(config.validate(), Err(AppError::Configuration(_))));
    }

    #[test]
    fn test_validate_requires_sled_path() {
        let mut config = Config::default();
        config.state.backend = StateBackend::Sled;
        assert!(config.validate().is_err());

        config.state.path = Some(PathBuf::from("./data/topology"));
        assert!(config.validate().is_ok());
    }
}
