use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::actors::{ComponentHealth, HealthCheckable, HealthStatus};
use crate::config::RegistryConfig;
use crate::errors::{ServiceError, ServiceResult};
use crate::metrics::Metrics;
use crate::utils::{retry_on_transient, RetryConfig};
use super::{CheckDescriptor, Registration, RegistryBackend, ServiceIdentity};

// ============================================================================
// Registry Client - registration lifecycle for one service instance
// ============================================================================
//
//   register()   -> remembers the intended registration, then tries to
//                   create it (retrying transient failures)
//   keep_alive() -> heartbeat task; re-registers when the registry has
//                   forgotten the instance or the first register failed
//   deregister() -> stops the heartbeat, removes the registration, never fails
//
// The registry is the source of truth. `registered` is only what this
// client last observed.
//
// ============================================================================

struct Shared {
    intended: Mutex<Option<Registration>>,
    registered: AtomicBool,
    last_error: Mutex<Option<String>>,
    metrics: Option<Arc<Metrics>>,
}

impl Shared {
    fn intended(&self) -> Option<Registration> {
        self.intended.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).clone()
    }

    fn set_intended(&self, registration: Option<Registration>) {
        *self.intended.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = registration;
    }

    fn last_error(&self) -> Option<String> {
        self.last_error.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).clone()
    }

    fn observe(&self, operation: &str, error: Option<&ServiceError>) {
        if let Some(metrics) = &self.metrics {
            metrics.record_registry_operation(operation, error.is_none());
        }
        *self.last_error.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = error.map(|e| e.to_string());
    }
}

struct KeepAlive {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

pub struct RegistryClient {
    backend: Arc<dyn RegistryBackend>,
    ttl: Duration,
    heartbeat_interval: Duration,
    deregister_critical_after: Duration,
    check: Option<CheckDescriptor>,
    retry_config: RetryConfig,
    shared: Arc<Shared>,
    keep_alive: tokio::sync::Mutex<Option<KeepAlive>>,
}

impl RegistryClient {
    pub fn new(backend: Arc<dyn RegistryBackend>, config: &RegistryConfig) -> Self {
        Self {
            backend,
            ttl: config.ttl(),
            heartbeat_interval: config.heartbeat_interval(),
            deregister_critical_after: Duration::from_secs(config.deregister_critical_after_secs),
            check: None,
            retry_config: RetryConfig::conservative(),
            shared: Arc::new(Shared {
                intended: Mutex::new(None),
                registered: AtomicBool::new(false),
                last_error: Mutex::new(None),
                metrics: None,
            }),
            keep_alive: tokio::sync::Mutex::new(None),
        }
    }

    /// Must be called before anything is registered
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        if let Some(shared) = Arc::get_mut(&mut self.shared) {
            shared.metrics = Some(metrics);
        }
        self
    }

    /// Replace the default TTL check
    pub fn with_check(mut self, check: CheckDescriptor) -> Self {
        self.check = Some(check);
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_retry_config(mut self, retry_config: RetryConfig) -> Self {
        self.retry_config = retry_config;
        self
    }

    pub fn backend(&self) -> &Arc<dyn RegistryBackend> {
        &self.backend
    }

    /// What this client last observed; the registry may disagree
    pub fn is_registered(&self) -> bool {
        self.shared.registered.load(Ordering::SeqCst)
    }

    pub async fn register(
        &self,
        identity: ServiceIdentity,
        metadata: BTreeMap<String, String>,
    ) -> ServiceResult<Registration> {
        let mut registration =
            Registration::new(identity, self.ttl, metadata).deregister_critical_after(self.deregister_critical_after);
        if let Some(check) = &self.check {
            registration = registration.with_check(check.clone());
        }
        self.shared.set_intended(Some(registration.clone()));

        let metrics = self.shared.metrics.clone();
        let result = retry_on_transient(self.retry_config.clone(), |attempt| {
            if let Some(metrics) = &metrics {
                metrics.record_retry_attempt("registry_register", attempt);
            }
            self.backend.register(&registration)
        })
        .await
        .into_result();

        self.shared.observe("register", result.as_ref().err());
        self.shared.registered.store(result.is_ok(), Ordering::SeqCst);

        match result {
            Ok(()) => {
                tracing::info!(
                    service = %registration.identity,
                    backend = self.backend.backend_name(),
                    ttl_secs = registration.ttl_secs,
                    "✅ Service registered"
                );
                Ok(registration)
            }
            Err(e) => {
                tracing::warn!(
                    service = %registration.identity,
                    backend = self.backend.backend_name(),
                    error = %e,
                    "Service registration failed"
                );
                Err(e)
            }
        }
    }

    /// Start the heartbeat task. Calling it again while it runs is a no-op.
    pub async fn keep_alive(&self) -> ServiceResult<()> {
        let mut keep_alive = self.keep_alive.lock().await;
        if keep_alive.as_ref().is_some_and(|k| !k.task.is_finished()) {
            return Ok(());
        }

        let Some(registration) = self.shared.intended() else {
            return Err(ServiceError::Configuration(
                "keep_alive called before register".to_string(),
            ));
        };

        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(heartbeat_loop(
            self.backend.clone(),
            self.shared.clone(),
            self.heartbeat_interval,
            shutdown_rx,
        ));

        tracing::info!(
            service = %registration.identity,
            interval_ms = self.heartbeat_interval.as_millis() as u64,
            "💓 Keep-alive started"
        );
        *keep_alive = Some(KeepAlive { shutdown, task });
        Ok(())
    }

    async fn stop_keep_alive(&self) {
        if let Some(keep_alive) = self.keep_alive.lock().await.take() {
            let _ = keep_alive.shutdown.send(true);
            if let Err(e) = keep_alive.task.await {
                tracing::error!(error = %e, "Keep-alive task failed");
            }
        }
    }

    /// Remove the registration. Failures are logged and swallowed so that
    /// shutdown always proceeds.
    pub async fn deregister(&self) {
        self.stop_keep_alive().await;

        let Some(registration) = self.shared.intended() else {
            return;
        };
        self.shared.set_intended(None);
        self.shared.registered.store(false, Ordering::SeqCst);

        let result = self.backend.deregister(&registration.identity).await;
        self.shared.observe("deregister", result.as_ref().err());

        match result {
            Ok(()) => tracing::info!(service = %registration.identity, "Service deregistered"),
            Err(e) => tracing::warn!(
                service = %registration.identity,
                error = %e,
                "Deregistration failed, continuing shutdown"
            ),
        }
    }

    pub async fn instances(&self, name: &str) -> ServiceResult<Vec<ServiceIdentity>> {
        self.backend.instances(name).await
    }
}

async fn heartbeat_loop(
    backend: Arc<dyn RegistryBackend>,
    shared: Arc<Shared>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            _ = tokio::time::sleep(interval) => {}
        }

        let Some(registration) = shared.intended() else {
            break;
        };

        let alive = if shared.registered.load(Ordering::SeqCst) {
            let result = backend.heartbeat(&registration.identity).await;
            shared.observe("heartbeat", result.as_ref().err());
            match result {
                Ok(alive) => alive,
                Err(e) => {
                    // keep the flag: the next heartbeat tells whether we expired
                    tracing::warn!(service = %registration.identity, error = %e, "Heartbeat failed");
                    continue;
                }
            }
        } else {
            false
        };

        if alive {
            tracing::trace!(service = %registration.identity, "Heartbeat ok");
            continue;
        }

        tracing::info!(service = %registration.identity, "Not registered, registering again");
        let result = backend.register(&registration).await;
        shared.observe("register", result.as_ref().err());
        shared.registered.store(result.is_ok(), Ordering::SeqCst);

        match result {
            Ok(()) => tracing::info!(service = %registration.identity, "✅ Service registered"),
            Err(e) => tracing::warn!(service = %registration.identity, error = %e, "Re-registration failed"),
        }
    }
}

impl HealthCheckable for RegistryClient {
    fn check_health(&self) -> ComponentHealth {
        match self.shared.intended() {
            None => ComponentHealth::new(self.component_name(), HealthStatus::Healthy)
                .with_details("registration disabled"),
            Some(registration) if self.is_registered() => {
                ComponentHealth::new(self.component_name(), HealthStatus::Healthy)
                    .with_details(format!("registered as {}", registration.identity.instance_id()))
            }
            Some(_) => {
                let reason = self.shared.last_error().unwrap_or_else(|| "not registered".to_string());
                ComponentHealth::new(self.component_name(), HealthStatus::Degraded(reason))
            }
        }
    }

    fn component_name(&self) -> &str {
        "registry"
    }
}
