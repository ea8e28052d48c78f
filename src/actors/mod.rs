// ============================================================================
// Actors Module
// ============================================================================
//
// Structure:
// - core/           - health reporting abstractions (HealthCheckable)
// - infrastructure/ - the health monitor actor
//
// Action handling does NOT run on actors: the consumer owns a plain task so
// that messages are handled strictly one after another.
//
// ============================================================================

mod core;
mod infrastructure;

pub use self::core::{ComponentHealth, HealthCheckable, HealthStatus};
pub use infrastructure::{GetSystemHealth, HealthMonitorActor, SystemHealth, UpdateHealth};
