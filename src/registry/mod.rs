use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{RegistryBackendKind, RegistryConfig};
use crate::errors::ServiceResult;

// ============================================================================
// Service Registry
// ============================================================================
//
// RegistryClient drives the lifecycle (register, keep-alive, deregister);
// a RegistryBackend speaks to one discovery system:
//
// - ConsulRegistry   : Consul agent HTTP API, TTL checks
// - RedisRegistry    : expiring keys nautilus:services:{name}:{instance}
// - InMemoryRegistry : process-local, for tests and local runs
//
// ============================================================================

mod client;
mod consul;
mod memory;
mod redis_registry;

pub use client::RegistryClient;
pub use consul::ConsulRegistry;
pub use memory::InMemoryRegistry;
pub use redis_registry::RedisRegistry;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceIdentity {
    pub name: String,
    pub host: String,
    pub port: u16,
}

impl ServiceIdentity {
    pub fn new(name: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            port,
        }
    }

    /// Registry key; one active registration per instance id
    pub fn instance_id(&self) -> String {
        format!("{}-{}-{}", self.name, self.host, self.port)
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl std::fmt::Display for ServiceIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.name, self.address())
    }
}

/// How the registry decides an instance is alive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum CheckDescriptor {
    /// The instance must heartbeat within `ttl_secs`
    Ttl { ttl_secs: u64 },
    /// The registry polls `url`
    Http { url: String, interval_secs: u64 },
    /// The registry opens a connection to `address`
    Tcp { address: String, interval_secs: u64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Registration {
    pub identity: ServiceIdentity,
    pub ttl_secs: u64,
    pub check: CheckDescriptor,
    pub metadata: BTreeMap<String, String>,
    pub registered_at: DateTime<Utc>,
    /// Registry-side cleanup for instances left critical this long
    pub deregister_critical_after_secs: u64,
}

impl Registration {
    pub fn new(identity: ServiceIdentity, ttl: Duration, metadata: BTreeMap<String, String>) -> Self {
        let ttl_secs = ttl.as_secs().max(1);
        Self {
            identity,
            ttl_secs,
            check: CheckDescriptor::Ttl { ttl_secs },
            metadata,
            registered_at: Utc::now(),
            deregister_critical_after_secs: 60,
        }
    }

    pub fn with_check(mut self, check: CheckDescriptor) -> Self {
        self.check = check;
        self
    }

    pub fn deregister_critical_after(mut self, after: Duration) -> Self {
        self.deregister_critical_after_secs = after.as_secs();
        self
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

#[async_trait]
pub trait RegistryBackend: Send + Sync {
    /// Create or overwrite the registration for `registration.identity`
    async fn register(&self, registration: &Registration) -> ServiceResult<()>;

    /// Report liveness. `Ok(false)` means the registry no longer knows the
    /// instance (expired or removed) and it must register again.
    async fn heartbeat(&self, identity: &ServiceIdentity) -> ServiceResult<bool>;

    async fn deregister(&self, identity: &ServiceIdentity) -> ServiceResult<()>;

    /// Live instances of the named service
    async fn instances(&self, name: &str) -> ServiceResult<Vec<ServiceIdentity>>;

    fn backend_name(&self) -> &'static str;
}

/// Build the backend selected by configuration. Only the URL is checked;
/// backends reach the network on their first call.
pub fn backend_from_config(config: &RegistryConfig) -> ServiceResult<Arc<dyn RegistryBackend>> {
    let backend: Arc<dyn RegistryBackend> = match config.backend {
        RegistryBackendKind::Consul => Arc::new(ConsulRegistry::new(&config.url)?),
        RegistryBackendKind::Redis => Arc::new(RedisRegistry::new(&config.url)?),
        RegistryBackendKind::Memory => Arc::new(InMemoryRegistry::new()),
    };

    tracing::info!(backend = backend.backend_name(), "Registry backend ready");
    Ok(backend)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_keys() {
        let identity = ServiceIdentity::new("ingredient_service", "10.0.0.5", 8000);
        assert_eq!(identity.instance_id(), "ingredient_service-10.0.0.5-8000");
        assert_eq!(identity.address(), "10.0.0.5:8000");
        assert_eq!(identity.to_string(), "ingredient_service@10.0.0.5:8000");
    }

    #[test]
    fn test_registration_defaults_to_ttl_check() {
        let identity = ServiceIdentity::new("svc", "localhost", 1);
        let registration = Registration::new(identity, Duration::from_millis(200), BTreeMap::new());
        assert_eq!(registration.ttl_secs, 1);
        assert_eq!(registration.check, CheckDescriptor::Ttl { ttl_secs: 1 });

        let json = serde_json::to_value(&registration.check).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "ttl", "ttl_secs": 1}));
    }
}
