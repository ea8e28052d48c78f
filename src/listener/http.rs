use actix_web::dev::{Server, ServerHandle};
use actix_web::{web, App, HttpResponse, HttpServer, Responder};
use async_trait::async_trait;
use kameo::actor::ActorRef;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use crate::actors::{GetSystemHealth, HealthMonitorActor, HealthStatus, UpdateHealth};
use crate::errors::{ServiceError, ServiceResult};
use crate::metrics::Metrics;
use super::query::{QueryEndpoint, QueryRequest};
use super::NetworkListener;

// ============================================================================
// HTTP Listener (actix-web)
// ============================================================================
//
//   GET  /health   aggregate from the health monitor (503 when unhealthy)
//   GET  /metrics  prometheus text format
//   POST /query    model query (model services only)
//   GET  /schema   model schema (model services only)
//
// plus any routes registered through `route`.
//
// Bind results and shutdown are pushed to the health monitor as the
// "http_listener" component.
//
// ============================================================================

/// Extra routes, applied to every worker's App
pub type RouteConfig = Arc<dyn Fn(&mut web::ServiceConfig) + Send + Sync>;

const SHUTDOWN_TIMEOUT_SECS: u64 = 5;
const COMPONENT: &str = "http_listener";

struct AppState {
    service_name: String,
    query: Option<Arc<QueryEndpoint>>,
    metrics: Arc<Metrics>,
    monitor: RwLock<Option<ActorRef<HealthMonitorActor>>>,
}

impl AppState {
    fn monitor(&self) -> Option<ActorRef<HealthMonitorActor>> {
        self.monitor.read().unwrap_or_else(|poisoned| poisoned.into_inner()).clone()
    }
}

pub struct HttpListener {
    state: web::Data<AppState>,
    routes: Vec<RouteConfig>,
    workers: Option<usize>,
    handle: Mutex<Option<ServerHandle>>,
}

impl HttpListener {
    /// `query` serves /query and /schema; pass `None` for services without a model
    pub fn new(service_name: impl Into<String>, metrics: Arc<Metrics>, query: Option<Arc<QueryEndpoint>>) -> Self {
        Self {
            state: web::Data::new(AppState {
                service_name: service_name.into(),
                query,
                metrics,
                monitor: RwLock::new(None),
            }),
            routes: Vec::new(),
            workers: None,
            handle: Mutex::new(None),
        }
    }

    pub fn route(mut self, route: RouteConfig) -> Self {
        self.routes.push(route);
        self
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    fn handle(&self) -> std::sync::MutexGuard<'_, Option<ServerHandle>> {
        self.handle.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn report(&self, status: HealthStatus, details: String) {
        let Some(monitor) = self.state.monitor() else {
            return;
        };
        let update = UpdateHealth {
            component: COMPONENT.to_string(),
            status,
            details: Some(details),
        };
        if let Err(e) = monitor.tell(update).await {
            tracing::debug!(error = ?e, "Health monitor gone, listener status not reported");
        }
    }

    fn build_server(&self, host: &str, port: u16) -> ServiceResult<Server> {
        let state = self.state.clone();
        let routes = self.routes.clone();

        let mut server = HttpServer::new(move || {
            let mut app = App::new().configure(|cfg| configure_app(cfg, &state));
            for route in &routes {
                app = app.configure(|cfg| route(cfg));
            }
            app
        })
        .disable_signals()
        .shutdown_timeout(SHUTDOWN_TIMEOUT_SECS);

        if let Some(workers) = self.workers {
            server = server.workers(workers);
        }

        Ok(server
            .bind((host, port))
            .map_err(|e| ServiceError::Listener(format!("failed to bind {}:{}: {}", host, port, e)))?
            .run())
    }
}

fn configure_app(cfg: &mut web::ServiceConfig, state: &web::Data<AppState>) {
    cfg.app_data(state.clone())
        .route("/health", web::get().to(health_handler))
        .route("/metrics", web::get().to(metrics_handler));

    if state.query.is_some() {
        cfg.route("/query", web::post().to(query_handler))
            .route("/schema", web::get().to(schema_handler));
    }
}

#[async_trait]
impl NetworkListener for HttpListener {
    async fn run(&self, host: &str, port: u16) -> ServiceResult<()> {
        let server = match self.build_server(host, port) {
            Ok(server) => server,
            Err(e) => {
                self.report(HealthStatus::Unhealthy(e.to_string()), format!("{}:{}", host, port))
                    .await;
                return Err(e);
            }
        };
        *self.handle() = Some(server.handle());
        tracing::info!(
            service = %self.state.service_name,
            "🌐 Listening on http://{}:{}",
            host,
            port
        );
        self.report(HealthStatus::Healthy, format!("listening on {}:{}", host, port))
            .await;

        server
            .await
            .map_err(|e| ServiceError::Listener(format!("server failed: {}", e)))
    }

    async fn stop(&self) {
        let handle = self.handle().take();
        if let Some(handle) = handle {
            handle.stop(true).await;
            tracing::info!(service = %self.state.service_name, "HTTP listener stopped");
            self.report(HealthStatus::Unhealthy("stopped".to_string()), "not serving".to_string())
                .await;
        }
    }

    fn attach_health_monitor(&self, monitor: ActorRef<HealthMonitorActor>) {
        *self.state.monitor.write().unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(monitor);
    }
}

// ============================================================================
// Handlers
// ============================================================================

async fn health_handler(state: web::Data<AppState>) -> impl Responder {
    let Some(monitor) = state.monitor() else {
        return HttpResponse::Ok().json(serde_json::json!({
            "status": "healthy",
            "service": state.service_name,
        }));
    };

    match tokio::time::timeout(Duration::from_secs(2), monitor.ask(GetSystemHealth)).await {
        Ok(Ok(health)) => {
            let mut response = if health.overall_status.is_unhealthy() {
                HttpResponse::ServiceUnavailable()
            } else {
                HttpResponse::Ok()
            };
            response.json(serde_json::json!({
                "service": state.service_name,
                "health": health,
            }))
        }
        Ok(Err(e)) => {
            tracing::error!(error = ?e, "Health monitor did not answer");
            HttpResponse::ServiceUnavailable().finish()
        }
        Err(_) => {
            tracing::error!("Health monitor timed out");
            HttpResponse::ServiceUnavailable().finish()
        }
    }
}

async fn metrics_handler(state: web::Data<AppState>) -> impl Responder {
    match state.metrics.encode() {
        Ok(buffer) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .body(buffer),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            HttpResponse::InternalServerError().finish()
        }
    }
}

async fn query_handler(state: web::Data<AppState>, body: web::Json<QueryRequest>) -> impl Responder {
    match &state.query {
        Some(query) => HttpResponse::Ok().json(query.execute(body.into_inner()).await),
        None => HttpResponse::NotFound().finish(),
    }
}

async fn schema_handler(state: web::Data<AppState>) -> impl Responder {
    match &state.query {
        Some(query) => HttpResponse::Ok().json(query.schema().as_ref()),
        None => HttpResponse::NotFound().finish(),
    }
}
