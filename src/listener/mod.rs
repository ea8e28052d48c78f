use async_trait::async_trait;
use kameo::actor::ActorRef;

use crate::actors::HealthMonitorActor;
use crate::errors::ServiceResult;

// ============================================================================
// Network Listener
// ============================================================================
//
// The foreground half of a service. `run` serves until `stop` is called
// (or the server fails); the service awaits it on the calling task.
//
// ============================================================================

mod http;
mod query;

pub use http::{HttpListener, RouteConfig};
pub use query::{QueryEndpoint, QueryError, QueryRequest, QueryResponse};

#[async_trait]
pub trait NetworkListener: Send + Sync {
    async fn run(&self, host: &str, port: u16) -> ServiceResult<()>;

    /// Graceful; returns once in-flight requests are done
    async fn stop(&self);

    /// Listeners that report health hook the monitor here
    fn attach_health_monitor(&self, _monitor: ActorRef<HealthMonitorActor>) {}
}
