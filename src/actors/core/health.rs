use chrono::{DateTime, Utc};
use serde::Serialize;

// ============================================================================
// Health Check Abstractions
// ============================================================================
//
// Components that can report on themselves (registry client, action
// consumer, publisher) implement HealthCheckable. The health monitor polls
// them; the network listener serves the aggregate at /health.
//
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded(String),
    Unhealthy(String),
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }

    pub fn is_unhealthy(&self) -> bool {
        matches!(self, HealthStatus::Unhealthy(_))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ComponentHealth {
    pub name: String,
    pub status: HealthStatus,
    pub last_check: DateTime<Utc>,
    pub details: Option<String>,
}

impl ComponentHealth {
    pub fn new(name: impl Into<String>, status: HealthStatus) -> Self {
        Self {
            name: name.into(),
            status,
            last_check: Utc::now(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

/// Synchronous, cheap self-report. Implementations read atomics or
/// uncontended locks only.
pub trait HealthCheckable: Send + Sync {
    fn check_health(&self) -> ComponentHealth;

    fn component_name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_value(HealthStatus::Degraded("registry unreachable".into())).unwrap();
        assert_eq!(json["status"], "degraded");
        assert_eq!(json["reason"], "registry unreachable");

        let json = serde_json::to_value(HealthStatus::Healthy).unwrap();
        assert_eq!(json["status"], "healthy");
    }

    #[test]
    fn test_component_health_details() {
        let health = ComponentHealth::new("action_consumer", HealthStatus::Healthy).with_details("running");
        assert_eq!(health.name, "action_consumer");
        assert_eq!(health.details.as_deref(), Some("running"));
        assert!(health.status.is_healthy());
    }
}
