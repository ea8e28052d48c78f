use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

use crate::utils::CircuitState;

// ============================================================================
// Metrics Module - Prometheus metrics for observability
// ============================================================================
//
// Covers:
// - Action consumption (throughput, failures by reason, latency)
// - Consumer lifecycle
// - Registry operations and their outcomes
// - Publish retries and the publisher circuit breaker
//
// One registry per service, served by the network listener at /metrics.
// ============================================================================

pub struct Metrics {
    registry: Registry,

    // Action Consumption Metrics
    pub actions_processed: IntCounterVec,
    pub actions_failed: IntCounterVec,
    pub action_processing_duration: HistogramVec,
    pub consumer_running: IntGauge,

    // Registry Metrics
    pub registry_operations: IntCounterVec,

    // Publish Metrics
    pub retry_attempts_total: IntCounterVec,
    pub actions_published: IntCounterVec,

    // Circuit Breaker Metrics
    pub circuit_breaker_state: IntGauge,
    pub circuit_breaker_transitions: IntCounterVec,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let actions_processed = IntCounterVec::new(
            Opts::new("actions_processed_total", "Total action messages handled successfully"),
            &["action_type"],
        )?;
        registry.register(Box::new(actions_processed.clone()))?;

        let actions_failed = IntCounterVec::new(
            Opts::new("actions_failed_total", "Total action messages whose handler failed"),
            &["action_type", "reason"],
        )?;
        registry.register(Box::new(actions_failed.clone()))?;

        let action_processing_duration = HistogramVec::new(
            HistogramOpts::new("action_processing_duration_seconds", "Action handling duration")
                .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
            &["action_type"],
        )?;
        registry.register(Box::new(action_processing_duration.clone()))?;

        let consumer_running = IntGauge::new(
            "action_consumer_running",
            "Whether the action consumer loop is running (0/1)",
        )?;
        registry.register(Box::new(consumer_running.clone()))?;

        let registry_operations = IntCounterVec::new(
            Opts::new("registry_operations_total", "Service registry operations"),
            &["operation", "outcome"],
        )?;
        registry.register(Box::new(registry_operations.clone()))?;

        let retry_attempts_total = IntCounterVec::new(
            Opts::new("retry_attempts_total", "Total retry attempts"),
            &["operation", "attempt"],
        )?;
        registry.register(Box::new(retry_attempts_total.clone()))?;

        let actions_published = IntCounterVec::new(
            Opts::new("actions_published_total", "Action messages published to the bus"),
            &["action_type", "outcome"],
        )?;
        registry.register(Box::new(actions_published.clone()))?;

        let circuit_breaker_state = IntGauge::new(
            "circuit_breaker_state",
            "Circuit breaker state (0=Closed, 1=Open, 2=HalfOpen)",
        )?;
        registry.register(Box::new(circuit_breaker_state.clone()))?;

        let circuit_breaker_transitions = IntCounterVec::new(
            Opts::new("circuit_breaker_transitions_total", "Circuit breaker state transitions"),
            &["from_state", "to_state"],
        )?;
        registry.register(Box::new(circuit_breaker_transitions.clone()))?;

        Ok(Self {
            registry,
            actions_processed,
            actions_failed,
            action_processing_duration,
            consumer_running,
            registry_operations,
            retry_attempts_total,
            actions_published,
            circuit_breaker_state,
            circuit_breaker_transitions,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Record the outcome of one consumed action. `failure` is the error kind.
    pub fn record_action(&self, action_type: &str, duration_secs: f64, failure: Option<&str>) {
        match failure {
            None => self.actions_processed.with_label_values(&[action_type]).inc(),
            Some(reason) => self.actions_failed.with_label_values(&[action_type, reason]).inc(),
        }
        self.action_processing_duration
            .with_label_values(&[action_type])
            .observe(duration_secs);
    }

    pub fn set_consumer_running(&self, running: bool) {
        self.consumer_running.set(i64::from(running));
    }

    pub fn record_registry_operation(&self, operation: &str, success: bool) {
        let outcome = if success { "success" } else { "failure" };
        self.registry_operations.with_label_values(&[operation, outcome]).inc();
    }

    pub fn record_retry_attempt(&self, operation: &str, attempt: u32) {
        self.retry_attempts_total
            .with_label_values(&[operation, &attempt.to_string()])
            .inc();
    }

    pub fn record_publish(&self, action_type: &str, success: bool) {
        let outcome = if success { "success" } else { "failure" };
        self.actions_published.with_label_values(&[action_type, outcome]).inc();
    }

    pub fn update_circuit_breaker_state(&self, state: CircuitState) {
        self.circuit_breaker_state.set(state.as_gauge());
    }

    pub fn record_circuit_breaker_transition(&self, from: CircuitState, to: CircuitState) {
        self.circuit_breaker_transitions
            .with_label_values(&[from.as_str(), to.as_str()])
            .inc();
    }

    /// Render the registry in the Prometheus text exposition format
    pub fn encode(&self) -> Result<Vec<u8>, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new().unwrap();
        metrics.set_consumer_running(false);
        assert!(!metrics.registry.gather().is_empty());
    }

    #[test]
    fn test_record_action_outcomes() {
        let metrics = Metrics::new().unwrap();
        metrics.record_action("create_ingredient", 0.01, None);
        metrics.record_action("create_ingredient", 0.02, Some("validation"));

        let gathered = metrics.registry.gather();
        let processed = gathered.iter().find(|m| m.name() == "actions_processed_total").unwrap();
        assert_eq!(processed.metric[0].counter.value, Some(1.0));

        let failed = gathered.iter().find(|m| m.name() == "actions_failed_total").unwrap();
        assert_eq!(failed.metric[0].counter.value, Some(1.0));
    }

    #[test]
    fn test_record_registry_operations() {
        let metrics = Metrics::new().unwrap();
        metrics.record_registry_operation("register", true);
        metrics.record_registry_operation("register", false);
        metrics.record_registry_operation("deregister", true);

        let gathered = metrics.registry.gather();
        let ops = gathered.iter().find(|m| m.name() == "registry_operations_total").unwrap();
        assert_eq!(ops.metric.len(), 3);
    }

    #[test]
    fn test_encode_text_format() {
        let metrics = Metrics::new().unwrap();
        metrics.set_consumer_running(true);
        let body = String::from_utf8(metrics.encode().unwrap()).unwrap();
        assert!(body.contains("action_consumer_running 1"));
    }
}
