use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use crate::errors::{ServiceError, ServiceResult};
use super::{CheckDescriptor, Registration, RegistryBackend, ServiceIdentity};

// ============================================================================
// Consul Registry
// ============================================================================
//
// Agent HTTP API:
//   PUT /v1/agent/service/register
//   PUT /v1/agent/check/pass/service:{id}     (TTL checks)
//   GET /v1/agent/service/{id}                (HTTP/TCP checks)
//   PUT /v1/agent/service/deregister/{id}
//   GET /v1/health/service/{name}?passing=true
//
// ============================================================================

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

pub struct ConsulRegistry {
    client: Client,
    base_url: Url,
    /// Instances registered with a TTL check; these heartbeat by check pass
    ttl_checks: Mutex<HashSet<String>>,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct AgentServiceRegistration<'a> {
    #[serde(rename = "ID")]
    id: String,
    name: &'a str,
    address: &'a str,
    port: u16,
    meta: &'a BTreeMap<String, String>,
    check: AgentCheck,
}

#[derive(Serialize, Default)]
#[serde(rename_all = "PascalCase")]
struct AgentCheck {
    #[serde(rename = "TTL", skip_serializing_if = "Option::is_none")]
    ttl: Option<String>,
    #[serde(rename = "HTTP", skip_serializing_if = "Option::is_none")]
    http: Option<String>,
    #[serde(rename = "TCP", skip_serializing_if = "Option::is_none")]
    tcp: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    interval: Option<String>,
    deregister_critical_service_after: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct HealthEntry {
    service: HealthService,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct HealthService {
    service: String,
    address: String,
    port: u16,
}

fn unavailable(context: &str, e: impl std::fmt::Display) -> ServiceError {
    ServiceError::RegistryUnavailable(format!("Consul {}: {}", context, e))
}

fn consul_duration(secs: u64) -> String {
    format!("{}s", secs)
}

fn agent_check(registration: &Registration) -> AgentCheck {
    let mut check = AgentCheck {
        deregister_critical_service_after: consul_duration(registration.deregister_critical_after_secs),
        ..Default::default()
    };
    match &registration.check {
        CheckDescriptor::Ttl { ttl_secs } => check.ttl = Some(consul_duration(*ttl_secs)),
        CheckDescriptor::Http { url, interval_secs } => {
            check.http = Some(url.clone());
            check.interval = Some(consul_duration(*interval_secs));
        }
        CheckDescriptor::Tcp { address, interval_secs } => {
            check.tcp = Some(address.clone());
            check.interval = Some(consul_duration(*interval_secs));
        }
    }
    check
}

impl ConsulRegistry {
    pub fn new(base_url: &str) -> ServiceResult<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| ServiceError::Configuration(format!("invalid Consul URL '{}': {}", base_url, e)))?;

        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(format!("nautilus/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ServiceError::Configuration(format!("failed to create HTTP client: {}", e)))?;

        tracing::info!(base_url = %base_url, "Created Consul registry client");

        Ok(Self {
            client,
            base_url,
            ttl_checks: Mutex::new(HashSet::new()),
        })
    }

    fn url(&self, path: &str) -> ServiceResult<Url> {
        self.base_url
            .join(path)
            .map_err(|e| ServiceError::Configuration(format!("invalid Consul path '{}': {}", path, e)))
    }

    fn uses_ttl_check(&self, identity: &ServiceIdentity) -> bool {
        self.ttl_checks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains(&identity.instance_id())
    }

    async fn put(&self, path: &str) -> ServiceResult<StatusCode> {
        let response = self
            .client
            .put(self.url(path)?)
            .send()
            .await
            .map_err(|e| unavailable("request failed", e))?;
        Ok(response.status())
    }
}

#[async_trait]
impl RegistryBackend for ConsulRegistry {
    async fn register(&self, registration: &Registration) -> ServiceResult<()> {
        let identity = &registration.identity;
        let body = AgentServiceRegistration {
            id: identity.instance_id(),
            name: &identity.name,
            address: &identity.host,
            port: identity.port,
            meta: &registration.metadata,
            check: agent_check(registration),
        };

        let response = self
            .client
            .put(self.url("/v1/agent/service/register")?)
            .json(&body)
            .send()
            .await
            .map_err(|e| unavailable("register request failed", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(unavailable("register rejected", format!("{} {}", status, text)));
        }

        let mut ttl_checks = self.ttl_checks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if matches!(registration.check, CheckDescriptor::Ttl { .. }) {
            ttl_checks.insert(identity.instance_id());
        } else {
            ttl_checks.remove(&identity.instance_id());
        }
        Ok(())
    }

    async fn heartbeat(&self, identity: &ServiceIdentity) -> ServiceResult<bool> {
        let status = if self.uses_ttl_check(identity) {
            self.put(&format!("/v1/agent/check/pass/service:{}", identity.instance_id()))
                .await?
        } else {
            self.client
                .get(self.url(&format!("/v1/agent/service/{}", identity.instance_id()))?)
                .send()
                .await
                .map_err(|e| unavailable("service lookup failed", e))?
                .status()
        };

        match status {
            s if s.is_success() => Ok(true),
            // unknown check or service: the agent forgot us
            StatusCode::NOT_FOUND | StatusCode::INTERNAL_SERVER_ERROR => Ok(false),
            s => Err(unavailable("heartbeat rejected", s)),
        }
    }

    async fn deregister(&self, identity: &ServiceIdentity) -> ServiceResult<()> {
        let status = self
            .put(&format!("/v1/agent/service/deregister/{}", identity.instance_id()))
            .await?;

        self.ttl_checks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&identity.instance_id());

        if status.is_success() || status == StatusCode::NOT_FOUND {
            Ok(())
        } else {
            Err(unavailable("deregister rejected", status))
        }
    }

    async fn instances(&self, name: &str) -> ServiceResult<Vec<ServiceIdentity>> {
        let mut url = self.url(&format!("/v1/health/service/{}", name))?;
        url.set_query(Some("passing=true"));

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| unavailable("health query failed", e))?;

        if !response.status().is_success() {
            return Err(unavailable("health query rejected", response.status()));
        }

        let entries: Vec<HealthEntry> = response
            .json()
            .await
            .map_err(|e| unavailable("unreadable health response", e))?;

        Ok(entries
            .into_iter()
            .map(|entry| ServiceIdentity::new(entry.service.service, entry.service.address, entry.service.port))
            .collect())
    }

    fn backend_name(&self) -> &'static str {
        "consul"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_registration_body() {
        let identity = ServiceIdentity::new("ingredient_service", "10.0.0.5", 8000);
        let mut metadata = BTreeMap::new();
        metadata.insert("version".to_string(), "1".to_string());
        let registration = Registration::new(identity.clone(), Duration::from_secs(15), metadata.clone());

        let body = AgentServiceRegistration {
            id: identity.instance_id(),
            name: &identity.name,
            address: &identity.host,
            port: identity.port,
            meta: &metadata,
            check: agent_check(&registration),
        };

        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            json!({
                "ID": "ingredient_service-10.0.0.5-8000",
                "Name": "ingredient_service",
                "Address": "10.0.0.5",
                "Port": 8000,
                "Meta": {"version": "1"},
                "Check": {"TTL": "15s", "DeregisterCriticalServiceAfter": "60s"}
            })
        );
    }

    #[test]
    fn test_http_check() {
        let identity = ServiceIdentity::new("svc", "localhost", 8000);
        let registration = Registration::new(identity, Duration::from_secs(15), BTreeMap::new()).with_check(
            CheckDescriptor::Http {
                url: "http://localhost:8000/health".to_string(),
                interval_secs: 10,
            },
        );

        assert_eq!(
            serde_json::to_value(agent_check(&registration)).unwrap(),
            json!({"HTTP": "http://localhost:8000/health", "Interval": "10s", "DeregisterCriticalServiceAfter": "60s"})
        );
    }

    #[test]
    fn test_invalid_url() {
        assert!(matches!(ConsulRegistry::new("::nope"), Err(ServiceError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_unreachable_agent() {
        // nothing listens on port 1
        let registry = ConsulRegistry::new("http://127.0.0.1:1").unwrap();
        let identity = ServiceIdentity::new("svc", "localhost", 8000);
        let registration = Registration::new(identity, Duration::from_secs(15), BTreeMap::new());

        let err = registry.register(&registration).await.unwrap_err();
        assert!(matches!(err, ServiceError::RegistryUnavailable(_)));
    }
}
