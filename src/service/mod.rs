use kameo::actor::ActorRef;
use serde_json::Value;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, OnceCell};

use crate::actors::{HealthCheckable, HealthMonitorActor};
use crate::config::ServiceConfig;
use crate::consumer::ActionConsumer;
use crate::errors::{ServiceError, ServiceResult};
use crate::handlers::ActionHandler;
use crate::listener::{HttpListener, NetworkListener, QueryEndpoint, RouteConfig};
use crate::messaging::{ActionPublisher, ActionSource, KafkaActionSource, RedpandaClient};
use crate::metrics::Metrics;
use crate::models::ModelSchema;
use crate::registry::{self, RegistryBackend, RegistryClient, ServiceIdentity};
use crate::store::ModelStore;

mod model_service;

pub use model_service::{ModelService, ModelServiceBuilder};

// ============================================================================
// Service - composition root
// ============================================================================
//
// run():  store init -> register + keep-alive -> publisher -> health monitor
//         -> consumer start -> listener (awaited on the calling task)
//
// teardown: consumer stop -> deregister -> listener stop -> store close
//
// `stop()` raises the stopping flag. Every startup step races it, so a stop
// that lands mid-startup ends `run()` instead of being lost. While `run()`
// is active it owns the teardown and `stop()` waits for it to finish; any
// exit from `run()`, errors included, goes through the teardown exactly once.
//
// Registry failures never escape run() or stop(); configuration problems
// are caught by the builder before anything touches the network.
//
// ============================================================================

const HEALTH_POLL_INTERVAL: Duration = Duration::from_secs(10);

pub struct Service {
    identity: ServiceIdentity,
    config: ServiceConfig,
    metadata: BTreeMap<String, String>,
    metrics: Arc<Metrics>,
    store: Option<Arc<dyn ModelStore>>,
    consumer: Option<Arc<ActionConsumer>>,
    registry: Option<Arc<RegistryClient>>,
    publisher: OnceCell<Arc<dyn ActionPublisher>>,
    listener: Arc<dyn NetworkListener>,
    checks: Vec<Arc<dyn HealthCheckable>>,
    monitor: Mutex<Option<ActorRef<HealthMonitorActor>>>,
    stopping: watch::Sender<bool>,
    running: watch::Sender<bool>,
    torn_down: Mutex<bool>,
}

/// Runs `step` unless a stop is requested first
async fn unless_stopped<F: Future>(stopping: &mut watch::Receiver<bool>, step: F) -> Option<F::Output> {
    tokio::select! {
        biased;
        _ = stopping.wait_for(|stop| *stop) => None,
        output = step => Some(output),
    }
}

impl Service {
    pub fn builder(name: impl Into<String>) -> ServiceBuilder {
        ServiceBuilder {
            name: Some(name.into()),
            ..ServiceBuilder::default()
        }
    }

    pub fn identity(&self) -> &ServiceIdentity {
        &self.identity
    }

    pub fn name(&self) -> &str {
        &self.identity.name
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub fn store(&self) -> Option<&Arc<dyn ModelStore>> {
        self.store.as_ref()
    }

    pub fn consumer(&self) -> Option<&Arc<ActionConsumer>> {
        self.consumer.as_ref()
    }

    /// Present when `auto_register` is on
    pub fn registry(&self) -> Option<&Arc<RegistryClient>> {
        self.registry.as_ref()
    }

    /// The builder's publisher, or the Redpanda one `run` creates from `bus`
    pub fn publisher(&self) -> Option<&Arc<dyn ActionPublisher>> {
        self.publisher.get()
    }

    /// Publish an action on the service's bus
    pub async fn dispatch_action(&self, action_type: &str, payload: Value) -> ServiceResult<()> {
        let Some(publisher) = self.publisher() else {
            return Err(ServiceError::Configuration(format!(
                "service '{}' has no publisher: configure a bus or set one on the builder",
                self.identity.name
            )));
        };
        publisher.dispatch_action(action_type, payload).await
    }

    async fn register(&self, client: &RegistryClient) {
        // failures are logged by the client; keep-alive keeps retrying
        let _ = client.register(self.identity.clone(), self.metadata.clone()).await;
        if let Err(e) = client.keep_alive().await {
            tracing::warn!(service = %self.identity, error = %e, "Keep-alive not started");
        }
    }

    /// The Redpanda publisher for `bus`, unless the builder supplied one
    fn bus_publisher(&self) -> ServiceResult<Option<Arc<RedpandaClient>>> {
        if self.publisher.initialized() {
            return Ok(None);
        }
        let Some(bus) = &self.config.bus else {
            return Ok(None);
        };

        let client = Arc::new(RedpandaClient::new(&bus.brokers, &bus.topic)?.with_metrics(self.metrics.clone()));
        let publisher: Arc<dyn ActionPublisher> = client.clone();
        if self.publisher.set(publisher).is_err() {
            return Ok(None);
        }
        Ok(Some(client))
    }

    /// Start everything and serve until the listener stops or `stop` is
    /// called. Resources are released before this returns, also on error.
    pub async fn run(&self) -> ServiceResult<()> {
        self.running.send_replace(true);
        let result = self.serve().await;
        self.teardown().await;
        self.running.send_replace(false);
        result
    }

    async fn serve(&self) -> ServiceResult<()> {
        let mut stopping = self.stopping.subscribe();
        tracing::info!(service = %self.identity, "🚀 Starting service");

        if let Some(store) = &self.store {
            match unless_stopped(&mut stopping, store.init()).await {
                Some(result) => result?,
                None => return Ok(()),
            }
        }

        if let Some(registry) = &self.registry {
            if unless_stopped(&mut stopping, self.register(registry)).await.is_none() {
                return Ok(());
            }
        } else {
            tracing::info!(service = %self.identity, "Auto-registration disabled");
        }

        let mut checks = self.checks.clone();
        if let Some(publisher) = self.bus_publisher()? {
            checks.push(publisher);
        }
        if let Some(consumer) = &self.consumer {
            checks.push(consumer.clone());
        }
        if let Some(registry) = &self.registry {
            checks.push(registry.clone());
        }
        let monitor = HealthMonitorActor::new(checks, HEALTH_POLL_INTERVAL).start();
        self.listener.attach_health_monitor(monitor.clone());
        *self.monitor.lock().await = Some(monitor);

        if let Some(consumer) = &self.consumer {
            match unless_stopped(&mut stopping, consumer.start()).await {
                Some(result) => result?,
                None => return Ok(()),
            }
        }

        if *stopping.borrow() {
            return Ok(());
        }

        // polled first so the listener is stoppable before the stop branch runs
        let serving = self.listener.run(&self.config.host, self.config.port);
        tokio::pin!(serving);
        let finished = tokio::select! {
            biased;
            result = &mut serving => Some(result),
            _ = stopping.wait_for(|stop| *stop) => None,
        };

        match finished {
            Some(result) => result,
            // the teardown stops the listener, which ends `serving`
            None => {
                let ((), result) = tokio::join!(self.teardown(), serving);
                result
            }
        }
    }

    async fn teardown(&self) {
        let mut torn_down = self.torn_down.lock().await;
        if *torn_down {
            return;
        }
        tracing::info!(service = %self.identity, "Stopping service");

        if let Some(consumer) = &self.consumer {
            consumer.stop().await;
        }

        if let Some(registry) = &self.registry {
            registry.deregister().await;
        }

        self.listener.stop().await;

        if let Some(store) = &self.store {
            store.close().await;
        }

        if let Some(monitor) = self.monitor.lock().await.take() {
            if let Err(e) = monitor.stop_gracefully().await {
                tracing::debug!(error = ?e, "Health monitor already stopped");
            }
        }

        *torn_down = true;
        tracing::info!(service = %self.identity, "🛑 Service stopped");
    }

    /// Ask the service to stop and wait until it has. Safe to call more than
    /// once, before `run`, or while `run` is still starting up.
    pub async fn stop(&self) {
        self.stopping.send_replace(true);

        let mut running = self.running.subscribe();
        if *running.borrow_and_update() {
            // `run` sees the flag and tears down on its way out
            let _ = running.wait_for(|running| !*running).await;
        } else {
            self.teardown().await;
        }
    }
}

// ============================================================================
// Builder
// ============================================================================

#[derive(Default)]
pub struct ServiceBuilder {
    name: Option<String>,
    config: Option<ServiceConfig>,
    metadata: BTreeMap<String, String>,
    model: Option<(Arc<ModelSchema>, Arc<dyn ModelStore>)>,
    action_handler: Option<Arc<dyn ActionHandler>>,
    action_source: Option<Box<dyn ActionSource>>,
    registry: Option<Arc<dyn RegistryBackend>>,
    publisher: Option<Arc<dyn ActionPublisher>>,
    listener: Option<Arc<dyn NetworkListener>>,
    routes: Vec<RouteConfig>,
    checks: Vec<Arc<dyn HealthCheckable>>,
    metrics: Option<Arc<Metrics>>,
}

impl ServiceBuilder {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn config(mut self, config: ServiceConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Attached to the registration
    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn model(mut self, schema: Arc<ModelSchema>, store: Arc<dyn ModelStore>) -> Self {
        self.model = Some((schema, store));
        self
    }

    pub fn action_handler(mut self, handler: Arc<dyn ActionHandler>) -> Self {
        self.action_handler = Some(handler);
        self
    }

    /// Overrides the Kafka source built from `bus` configuration
    pub fn action_source(mut self, source: Box<dyn ActionSource>) -> Self {
        self.action_source = Some(source);
        self
    }

    /// Overrides the backend selected by `registry.backend`
    pub fn registry(mut self, backend: Arc<dyn RegistryBackend>) -> Self {
        self.registry = Some(backend);
        self
    }

    /// Used by `Service::dispatch_action` instead of a Redpanda publisher
    pub fn publisher(mut self, publisher: Arc<dyn ActionPublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    /// Replaces the built-in HTTP listener
    pub fn listener(mut self, listener: Arc<dyn NetworkListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Extra HTTP routes on the built-in listener
    pub fn route<F>(mut self, route: F) -> Self
    where
        F: Fn(&mut actix_web::web::ServiceConfig) + Send + Sync + 'static,
    {
        self.routes.push(Arc::new(route));
        self
    }

    pub fn health_check(mut self, check: Arc<dyn HealthCheckable>) -> Self {
        self.checks.push(check);
        self
    }

    /// Share a metrics registry with components built outside the service
    pub fn metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub(crate) fn has_name(&self) -> bool {
        self.name.as_deref().is_some_and(|name| !name.trim().is_empty())
            || self.config.as_ref().is_some_and(|config| !config.name.trim().is_empty())
    }

    /// Validate and wire. Fails with `Configuration` before any network or
    /// registry call is made.
    pub fn build(self) -> ServiceResult<Service> {
        let mut config = self.config.unwrap_or_default();
        if let Some(name) = self.name {
            config.name = name;
        }
        if config.name.trim().is_empty() {
            return Err(ServiceError::Configuration("service name is required".to_string()));
        }
        config.validate()?;

        if let Some((schema, store)) = &self.model {
            if store.schema().as_ref() != schema.as_ref() {
                return Err(ServiceError::Configuration(format!(
                    "store is bound to model '{}', not '{}'",
                    store.schema().name(),
                    schema.name()
                )));
            }
        }

        if self.listener.is_some() && !self.routes.is_empty() {
            return Err(ServiceError::Configuration(
                "custom routes need the built-in HTTP listener".to_string(),
            ));
        }

        let metrics = match self.metrics {
            Some(metrics) => metrics,
            None => Arc::new(
                Metrics::new().map_err(|e| ServiceError::Configuration(format!("metrics registry: {}", e)))?,
            ),
        };

        let consumer = match (self.action_handler, self.action_source) {
            (Some(handler), source) => {
                let source = match source {
                    Some(source) => source,
                    None => default_action_source(&config)?,
                };
                let consumer = ActionConsumer::new(source, handler)
                    .with_metrics(metrics.clone())
                    .with_error_backoff(config.consumer.error_backoff());
                Some(Arc::new(consumer))
            }
            (None, Some(_)) => {
                return Err(ServiceError::Configuration(
                    "an action source was given without an action handler".to_string(),
                ))
            }
            (None, None) => None,
        };

        let store = self.model.map(|(_, store)| store);
        let listener = match self.listener {
            Some(listener) => listener,
            None => {
                let query = store.clone().map(|store| Arc::new(QueryEndpoint::new(store)));
                let listener = self
                    .routes
                    .into_iter()
                    .fold(HttpListener::new(config.name.clone(), metrics.clone(), query), |l, r| l.route(r));
                Arc::new(listener)
            }
        };

        let registry = if config.auto_register {
            let backend = match self.registry {
                Some(backend) => backend,
                None => registry::backend_from_config(&config.registry)?,
            };
            Some(Arc::new(
                RegistryClient::new(backend, &config.registry).with_metrics(metrics.clone()),
            ))
        } else {
            None
        };

        let identity = ServiceIdentity::new(config.name.clone(), config.host.clone(), config.port);
        tracing::debug!(
            service = %identity,
            model = store.is_some(),
            consumer = consumer.is_some(),
            auto_register = config.auto_register,
            "Service built"
        );

        Ok(Service {
            identity,
            config,
            metadata: self.metadata,
            metrics,
            store,
            consumer,
            registry,
            publisher: OnceCell::new_with(self.publisher),
            listener,
            checks: self.checks,
            monitor: Mutex::new(None),
            stopping: watch::channel(false).0,
            running: watch::channel(false).0,
            torn_down: Mutex::new(false),
        })
    }
}

fn default_action_source(config: &ServiceConfig) -> ServiceResult<Box<dyn ActionSource>> {
    let Some(bus) = &config.bus else {
        return Err(ServiceError::Configuration(
            "an action handler needs an action source or a bus configuration".to_string(),
        ));
    };
    let group_id = bus.group_id.clone().unwrap_or_else(|| config.name.clone());
    Ok(Box::new(KafkaActionSource::new(&bus.brokers, &bus.topic, &group_id)))
}
