use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::errors::ServiceError;

// ============================================================================
// Service Configuration
// ============================================================================
//
// Layered with the `config` crate:
//   defaults -> optional file -> NAUTILUS__* environment variables
//
// Example: NAUTILUS__PORT=9000 NAUTILUS__REGISTRY__BACKEND=redis
//
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Registry name of the service. Model services fall back to the
    /// conventional name when this is left empty.
    #[serde(default)]
    pub name: String,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_true")]
    pub auto_register: bool,

    #[serde(default)]
    pub registry: RegistryConfig,

    /// Action bus. Required when an action handler is configured and no
    /// explicit action source is supplied.
    #[serde(default)]
    pub bus: Option<BusConfig>,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub consumer: ConsumerConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistryBackendKind {
    Consul,
    Redis,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    #[serde(default = "default_registry_backend")]
    pub backend: RegistryBackendKind,

    /// Consul agent base URL or redis connection URL
    #[serde(default = "default_registry_url")]
    pub url: String,

    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,

    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,

    #[serde(default = "default_deregister_after_secs")]
    pub deregister_critical_after_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    pub brokers: String,

    #[serde(default = "default_topic")]
    pub topic: String,

    /// Consumer group; defaults to the service name
    #[serde(default)]
    pub group_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackendKind {
    Memory,
    Scylla,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_backend")]
    pub backend: StoreBackendKind,

    #[serde(default = "default_known_node")]
    pub known_node: String,

    #[serde(default = "default_keyspace")]
    pub keyspace: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumerConfig {
    /// Pause after a bus transport error before reading again
    #[serde(default = "default_error_backoff_ms")]
    pub error_backoff_ms: u64,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_true() -> bool {
    true
}

fn default_registry_backend() -> RegistryBackendKind {
    RegistryBackendKind::Consul
}

fn default_registry_url() -> String {
    "http://127.0.0.1:8500".to_string()
}

fn default_ttl_secs() -> u64 {
    15
}

fn default_heartbeat_secs() -> u64 {
    5
}

fn default_deregister_after_secs() -> u64 {
    60
}

fn default_topic() -> String {
    "actions".to_string()
}

fn default_store_backend() -> StoreBackendKind {
    StoreBackendKind::Memory
}

fn default_known_node() -> String {
    "127.0.0.1:9042".to_string()
}

fn default_keyspace() -> String {
    "nautilus".to_string()
}

fn default_error_backoff_ms() -> u64 {
    500
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            host: default_host(),
            port: default_port(),
            auto_register: true,
            registry: RegistryConfig::default(),
            bus: None,
            store: StoreConfig::default(),
            consumer: ConsumerConfig::default(),
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            backend: default_registry_backend(),
            url: default_registry_url(),
            ttl_secs: default_ttl_secs(),
            heartbeat_secs: default_heartbeat_secs(),
            deregister_critical_after_secs: default_deregister_after_secs(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_store_backend(),
            known_node: default_known_node(),
            keyspace: default_keyspace(),
        }
    }
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            error_backoff_ms: default_error_backoff_ms(),
        }
    }
}

impl RegistryConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs)
    }
}

impl ConsumerConfig {
    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }
}

impl ServiceConfig {
    /// Load configuration from defaults, an optional file and the environment
    pub fn load(path: Option<&str>) -> Result<Self, ServiceError> {
        let mut builder = ::config::Config::builder()
            .add_source(::config::Config::try_from(&ServiceConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(::config::File::with_name(path).required(false));
        }

        builder = builder.add_source(
            ::config::Environment::with_prefix("NAUTILUS")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: ServiceConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that do not depend on what the service is wired with
    pub fn validate(&self) -> Result<(), ServiceError> {
        if self.auto_register {
            if self.registry.ttl_secs == 0 {
                return Err(ServiceError::Configuration(
                    "registry.ttl_secs must be positive".to_string(),
                ));
            }
            if self.registry.heartbeat_secs == 0 || self.registry.heartbeat_secs >= self.registry.ttl_secs {
                return Err(ServiceError::Configuration(format!(
                    "registry.heartbeat_secs ({}) must be positive and below registry.ttl_secs ({})",
                    self.registry.heartbeat_secs, self.registry.ttl_secs
                )));
            }
        }

        if let Some(bus) = &self.bus {
            if bus.brokers.trim().is_empty() {
                return Err(ServiceError::Configuration("bus.brokers must not be empty".to_string()));
            }
        }

        Ok(())
    }

    /// Development profile: no external registry, in-memory store
    pub fn local(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            auto_register: false,
            registry: RegistryConfig {
                backend: RegistryBackendKind::Memory,
                ..Default::default()
            },
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServiceConfig::default();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 8000);
        assert!(config.auto_register);
        assert_eq!(config.registry.backend, RegistryBackendKind::Consul);
        assert_eq!(config.store.backend, StoreBackendKind::Memory);
        assert!(config.bus.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_heartbeat_must_be_below_ttl() {
        let mut config = ServiceConfig::default();
        config.registry.heartbeat_secs = 20;
        assert!(matches!(config.validate(), Err(ServiceError::Configuration(_))));

        // not checked when the service does not register itself
        config.auto_register = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_brokers_rejected() {
        let config = ServiceConfig {
            bus: Some(BusConfig {
                brokers: "  ".to_string(),
                topic: default_topic(),
                group_id: None,
            }),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_deserialize_partial_document() {
        let config: ServiceConfig = serde_json::from_str(
            r#"{"name": "ingredients", "port": 9001, "registry": {"backend": "redis", "url": "redis://127.0.0.1/"}}"#,
        )
        .unwrap();

        assert_eq!(config.name, "ingredients");
        assert_eq!(config.port, 9001);
        assert_eq!(config.registry.backend, RegistryBackendKind::Redis);
        assert_eq!(config.registry.ttl_secs, 15);
        assert_eq!(config.consumer.error_backoff(), Duration::from_millis(500));
    }

    #[test]
    fn test_load_without_file_uses_defaults() {
        let config = ServiceConfig::load(None).unwrap();
        assert!(!config.host.is_empty());
    }

    #[test]
    fn test_local_profile() {
        let config = ServiceConfig::local("ingredients");
        assert!(!config.auto_register);
        assert_eq!(config.registry.backend, RegistryBackendKind::Memory);
    }
}
