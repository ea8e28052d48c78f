use chrono::Utc;
use kameo::actor::ActorRef;
use kameo::error::Infallible;
use kameo::message::{Context, Message};
use kameo::prelude::*;
use kameo::Reply;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::actors::core::{ComponentHealth, HealthCheckable, HealthStatus};

// ============================================================================
// Health Monitor Actor - Aggregates service health
// ============================================================================
//
// Responsibilities:
// - Poll registered checks (registry client, consumer, publisher)
// - Accept pushed updates for components without a check (the listener)
// - Log status transitions
// - Answer /health with the aggregate
//
// ============================================================================

// ============================================================================
// Messages
// ============================================================================

#[derive(Debug)]
pub struct UpdateHealth {
    pub component: String,
    pub status: HealthStatus,
    pub details: Option<String>,
}

#[derive(Debug)]
pub struct GetSystemHealth;

#[derive(Debug)]
struct RefreshProbes;

#[derive(Debug, Clone, Serialize, Reply)]
pub struct SystemHealth {
    pub overall_status: HealthStatus,
    pub components: BTreeMap<String, ComponentHealth>,
    pub check_time: chrono::DateTime<Utc>,
}

// ============================================================================
// Health Monitor Actor
// ============================================================================

pub struct HealthMonitorActor {
    components: BTreeMap<String, ComponentHealth>,
    checks: Vec<Arc<dyn HealthCheckable>>,
    poll_interval: Duration,
}

impl HealthMonitorActor {
    pub fn new(checks: Vec<Arc<dyn HealthCheckable>>, poll_interval: Duration) -> Self {
        Self {
            components: BTreeMap::new(),
            checks,
            poll_interval,
        }
    }

    pub fn start(self) -> ActorRef<Self> {
        HealthMonitorActor::spawn(self)
    }

    fn record(&mut self, health: ComponentHealth) {
        let changed = self
            .components
            .get(&health.name)
            .map(|previous| previous.status != health.status)
            .unwrap_or(true);

        if changed {
            match &health.status {
                HealthStatus::Healthy => tracing::info!(component = %health.name, "Component healthy"),
                HealthStatus::Degraded(reason) => {
                    tracing::warn!(component = %health.name, reason = %reason, "Component degraded")
                }
                HealthStatus::Unhealthy(reason) => {
                    tracing::error!(component = %health.name, reason = %reason, "Component unhealthy")
                }
            }
        }

        self.components.insert(health.name.clone(), health);
    }

    fn refresh_checks(&mut self) {
        let reports: Vec<ComponentHealth> = self.checks.iter().map(|p| p.check_health()).collect();
        for health in reports {
            self.record(health);
        }
    }

    fn compute_overall_status(&self) -> HealthStatus {
        let mut has_degraded = false;
        let mut unhealthy_components = Vec::new();

        for (name, health) in &self.components {
            match &health.status {
                HealthStatus::Unhealthy(msg) => unhealthy_components.push(format!("{}: {}", name, msg)),
                HealthStatus::Degraded(_) => has_degraded = true,
                HealthStatus::Healthy => {}
            }
        }

        if !unhealthy_components.is_empty() {
            HealthStatus::Unhealthy(unhealthy_components.join(", "))
        } else if has_degraded {
            HealthStatus::Degraded("Some components degraded".to_string())
        } else {
            HealthStatus::Healthy
        }
    }
}

impl Actor for HealthMonitorActor {
    type Args = Self;
    type Error = Infallible;

    async fn on_start(mut state: Self::Args, actor_ref: ActorRef<Self>) -> Result<Self, Self::Error> {
        tracing::info!(checks = state.checks.len(), "HealthMonitorActor started");
        state.refresh_checks();

        let poll_interval = state.poll_interval;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(poll_interval);
            interval.tick().await;
            loop {
                interval.tick().await;
                // fails once the monitor has been stopped
                if actor_ref.tell(RefreshProbes).await.is_err() {
                    break;
                }
            }
        });

        Ok(state)
    }
}

// ============================================================================
// Message Handlers
// ============================================================================

impl Message<UpdateHealth> for HealthMonitorActor {
    type Reply = ();

    async fn handle(&mut self, msg: UpdateHealth, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        let mut health = ComponentHealth::new(msg.component, msg.status);
        health.details = msg.details;
        self.record(health);
    }
}

impl Message<RefreshProbes> for HealthMonitorActor {
    type Reply = ();

    async fn handle(&mut self, _msg: RefreshProbes, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        self.refresh_checks();
    }
}

impl Message<GetSystemHealth> for HealthMonitorActor {
    type Reply = SystemHealth;

    async fn handle(&mut self, _msg: GetSystemHealth, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        self.refresh_checks();

        SystemHealth {
            overall_status: self.compute_overall_status(),
            components: self.components.clone(),
            check_time: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct FlagCheck {
        healthy: AtomicBool,
    }

    impl HealthCheckable for FlagCheck {
        fn check_health(&self) -> ComponentHealth {
            let status = if self.healthy.load(Ordering::SeqCst) {
                HealthStatus::Healthy
            } else {
                HealthStatus::Unhealthy("flag cleared".to_string())
            };
            ComponentHealth::new(self.component_name(), status)
        }

        fn component_name(&self) -> &str {
            "flag"
        }
    }

    #[tokio::test]
    async fn test_aggregates_checks_and_updates() {
        let check = Arc::new(FlagCheck {
            healthy: AtomicBool::new(true),
        });
        let monitor = HealthMonitorActor::new(vec![check.clone()], Duration::from_secs(60)).start();

        let health = monitor.ask(GetSystemHealth).await.unwrap();
        assert!(health.overall_status.is_healthy());
        assert!(health.components.contains_key("flag"));

        monitor
            .tell(UpdateHealth {
                component: "listener".to_string(),
                status: HealthStatus::Degraded("warming up".to_string()),
                details: None,
            })
            .await
            .unwrap();

        let health = monitor.ask(GetSystemHealth).await.unwrap();
        assert!(matches!(health.overall_status, HealthStatus::Degraded(_)));

        check.healthy.store(false, Ordering::SeqCst);
        let health = monitor.ask(GetSystemHealth).await.unwrap();
        assert!(health.overall_status.is_unhealthy());
    }
}
