use async_trait::async_trait;
use rdkafka::{
    config::ClientConfig,
    consumer::{Consumer, StreamConsumer},
    producer::{FutureProducer, FutureRecord},
    Message,
};
use std::sync::Arc;
use std::time::Duration;

use crate::actors::{ComponentHealth, HealthCheckable, HealthStatus};
use crate::errors::{ServiceError, ServiceResult};
use crate::metrics::Metrics;
use crate::utils::{
    retry_with_backoff, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitState, RetryConfig,
};
use super::{ActionMessage, ActionPublisher, ActionSource};

// ============================================================================
// Redpanda / Kafka transport
// ============================================================================
//
// Publisher: FutureProducer behind a circuit breaker, with exponential
// backoff around each publish. Messages are keyed by action type.
//
// Source: StreamConsumer, created and subscribed on the first read. Offsets
// are stored only when the consumer acknowledges a message and committed in
// the background, so a message in flight during a crash is delivered again
// (at-least-once).
//
// ============================================================================

const SEND_TIMEOUT: Duration = Duration::from_secs(5);

pub struct RedpandaClient {
    producer: FutureProducer,
    topic: String,
    circuit_breaker: CircuitBreaker,
    retry_config: RetryConfig,
    metrics: Option<Arc<Metrics>>,
}

impl RedpandaClient {
    pub fn new(brokers: &str, topic: &str) -> ServiceResult<Self> {
        Self::with_message_timeout(brokers, topic, SEND_TIMEOUT)
    }

    /// How long librdkafka keeps trying to deliver one message
    pub fn with_message_timeout(brokers: &str, topic: &str, timeout: Duration) -> ServiceResult<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", timeout.as_millis().to_string())
            .create()
            .map_err(|e| ServiceError::Configuration(format!("failed to create Redpanda producer: {}", e)))?;

        let cb_config = CircuitBreakerConfig {
            failure_threshold: 5,
            timeout: Duration::from_secs(30),
            success_threshold: 3,
        };

        Ok(Self {
            producer,
            topic: topic.to_string(),
            circuit_breaker: CircuitBreaker::new(cb_config),
            retry_config: RetryConfig::aggressive(),
            metrics: None,
        })
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.circuit_breaker = self.circuit_breaker.with_metrics(metrics.clone());
        self.metrics = Some(metrics);
        self
    }

    pub fn with_retry_config(mut self, retry_config: RetryConfig) -> Self {
        self.retry_config = retry_config;
        self
    }

    pub fn with_circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        let mut breaker = CircuitBreaker::new(config);
        if let Some(metrics) = &self.metrics {
            breaker = breaker.with_metrics(metrics.clone());
        }
        self.circuit_breaker = breaker;
        self
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.circuit_breaker.state()
    }

    async fn send_once(&self, key: &str, payload: &str) -> ServiceResult<()> {
        let result = self
            .circuit_breaker
            .call(async {
                let record = FutureRecord::to(&self.topic).key(key).payload(payload);
                self.producer
                    .send(record, SEND_TIMEOUT)
                    .await
                    .map_err(|(e, _)| ServiceError::Bus(format!("Kafka send error: {}", e)))
            })
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(CircuitBreakerError::CircuitOpen) => Err(ServiceError::Bus(
                "circuit breaker open for Redpanda".to_string(),
            )),
            Err(CircuitBreakerError::OperationFailed(e)) => Err(e),
        }
    }
}

#[async_trait]
impl ActionPublisher for RedpandaClient {
    async fn publish(&self, message: &ActionMessage) -> ServiceResult<()> {
        let payload = message.to_json()?;
        let key = message.action_type.as_str();

        let result = retry_with_backoff(self.retry_config.clone(), |attempt| {
            if let Some(metrics) = &self.metrics {
                metrics.record_retry_attempt("redpanda_publish", attempt);
            }
            self.send_once(key, &payload)
        })
        .await
        .into_result();

        if let Some(metrics) = &self.metrics {
            metrics.record_publish(key, result.is_ok());
        }

        match &result {
            Ok(()) => tracing::info!(topic = %self.topic, action_type = %key, "Published action"),
            Err(e) => tracing::error!(
                topic = %self.topic,
                action_type = %key,
                error = %e,
                "Failed to publish action"
            ),
        }

        result
    }
}

impl HealthCheckable for RedpandaClient {
    fn check_health(&self) -> ComponentHealth {
        let status = match self.circuit_breaker.state() {
            CircuitState::Closed => HealthStatus::Healthy,
            CircuitState::HalfOpen => HealthStatus::Degraded("Circuit breaker half-open".to_string()),
            CircuitState::Open => HealthStatus::Unhealthy("Circuit breaker open".to_string()),
        };
        ComponentHealth::new(self.component_name(), status).with_details(format!("topic {}", self.topic))
    }

    fn component_name(&self) -> &str {
        "action_publisher"
    }
}

pub struct KafkaActionSource {
    config: ClientConfig,
    topic: String,
    consumer: Option<StreamConsumer>,
    /// (partition, offset) of the message awaiting acknowledgement
    pending: Option<(i32, i64)>,
}

impl KafkaActionSource {
    /// No broker is contacted until the first `next_action`
    pub fn new(brokers: &str, topic: &str, group_id: &str) -> Self {
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", brokers)
            .set("group.id", group_id)
            .set("enable.auto.commit", "true")
            .set("enable.auto.offset.store", "false")
            .set("auto.offset.reset", "earliest");

        Self {
            config,
            topic: topic.to_string(),
            consumer: None,
            pending: None,
        }
    }

    pub fn is_subscribed(&self) -> bool {
        self.consumer.is_some()
    }

    fn subscribed(&mut self) -> ServiceResult<&StreamConsumer> {
        if self.consumer.is_none() {
            let consumer: StreamConsumer = self
                .config
                .create()
                .map_err(|e| ServiceError::Bus(format!("failed to create Kafka consumer: {}", e)))?;
            consumer
                .subscribe(&[self.topic.as_str()])
                .map_err(|e| ServiceError::Bus(format!("failed to subscribe to '{}': {}", self.topic, e)))?;

            tracing::info!(
                topic = %self.topic,
                group_id = self.config.get("group.id").unwrap_or_default(),
                "Subscribed to action topic"
            );
            self.consumer = Some(consumer);
        }

        self.consumer
            .as_ref()
            .ok_or_else(|| ServiceError::Bus("Kafka consumer unavailable".to_string()))
    }
}

#[async_trait]
impl ActionSource for KafkaActionSource {
    async fn next_action(&mut self) -> ServiceResult<Option<ActionMessage>> {
        let consumer = self.subscribed()?;
        let message = consumer
            .recv()
            .await
            .map_err(|e| ServiceError::Bus(format!("Kafka receive error: {}", e)))?;

        tracing::debug!(
            topic = %message.topic(),
            partition = message.partition(),
            offset = message.offset(),
            "Received action message"
        );

        let position = (message.partition(), message.offset());
        let parsed = match message.payload() {
            Some(payload) => ActionMessage::from_json(payload),
            None => Err(ServiceError::MalformedMessage("empty Kafka payload".to_string())),
        };
        drop(message);

        self.pending = Some(position);
        parsed.map(Some)
    }

    async fn ack(&mut self) -> ServiceResult<()> {
        let Some((partition, offset)) = self.pending.take() else {
            return Ok(());
        };
        let Some(consumer) = &self.consumer else {
            return Ok(());
        };

        consumer
            .store_offset(&self.topic, partition, offset)
            .map_err(|e| ServiceError::Bus(format!("failed to store offset {} on partition {}: {}", offset, partition, e)))
    }

    fn describe(&self) -> String {
        format!("kafka topic {}", self.topic)
    }
}
