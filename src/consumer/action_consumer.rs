use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

use crate::actors::{ComponentHealth, HealthCheckable, HealthStatus};
use crate::errors::{ServiceError, ServiceResult};
use crate::handlers::ActionHandler;
use crate::messaging::{ActionMessage, ActionSource};
use crate::metrics::Metrics;

// ============================================================================
// Action Consumer - Background loop feeding the action handler
// ============================================================================
//
// Lifecycle:
//
//   Stopped(source) --start()--> Running { shutdown, task } --stop()--> Stopped(source)
//
// The loop task owns the source while running and hands it back when it
// exits, so a stopped consumer can be started again.
//
// Each wait for the next message races the stop signal. A message that has
// been received is always handled to completion before the stop signal is
// looked at again.
//
// ============================================================================

enum State {
    /// `None` only if the loop task panicked and took the source with it
    Stopped(Option<Box<dyn ActionSource>>),
    Running {
        shutdown: watch::Sender<bool>,
        task: JoinHandle<Box<dyn ActionSource>>,
    },
}

#[derive(Default)]
struct ConsumerStats {
    running: AtomicBool,
    processed: AtomicU64,
    failed: AtomicU64,
}

pub struct ActionConsumer {
    handler: Arc<dyn ActionHandler>,
    state: Mutex<State>,
    stats: Arc<ConsumerStats>,
    metrics: Option<Arc<Metrics>>,
    error_backoff: Duration,
}

impl ActionConsumer {
    pub fn new(source: Box<dyn ActionSource>, handler: Arc<dyn ActionHandler>) -> Self {
        Self {
            handler,
            state: Mutex::new(State::Stopped(Some(source))),
            stats: Arc::new(ConsumerStats::default()),
            metrics: None,
            error_backoff: Duration::from_millis(500),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Pause after a transport error before reading again
    pub fn with_error_backoff(mut self, backoff: Duration) -> Self {
        self.error_backoff = backoff;
        self
    }

    pub fn is_running(&self) -> bool {
        self.stats.running.load(Ordering::SeqCst)
    }

    /// Messages handled successfully since creation
    pub fn processed(&self) -> u64 {
        self.stats.processed.load(Ordering::SeqCst)
    }

    /// Messages whose handling failed, malformed ones included
    pub fn failed(&self) -> u64 {
        self.stats.failed.load(Ordering::SeqCst)
    }

    pub async fn start(&self) -> ServiceResult<()> {
        let mut state = self.state.lock().await;

        // the loop may have ended on its own (bus closed); reclaim the source
        let finished = match &*state {
            State::Running { task, .. } => Some(task.is_finished()),
            State::Stopped(_) => None,
        };
        match finished {
            Some(false) => return Err(ServiceError::ConsumerAlreadyRunning),
            Some(true) => {
                let previous = std::mem::replace(&mut *state, State::Stopped(None));
                *state = Self::reclaim(previous).await;
            }
            None => {}
        }

        let source = match std::mem::replace(&mut *state, State::Stopped(None)) {
            State::Stopped(Some(source)) => source,
            State::Stopped(None) => {
                return Err(ServiceError::Bus("action source was lost when the consumer crashed".to_string()))
            }
            State::Running { .. } => return Err(ServiceError::ConsumerAlreadyRunning),
        };

        let (shutdown, shutdown_rx) = watch::channel(false);
        let worker = ConsumerLoop {
            handler: self.handler.clone(),
            stats: self.stats.clone(),
            metrics: self.metrics.clone(),
            error_backoff: self.error_backoff,
        };

        tracing::info!(source = %source.describe(), "🚀 Starting action consumer");
        self.stats.running.store(true, Ordering::SeqCst);
        if let Some(metrics) = &self.metrics {
            metrics.set_consumer_running(true);
        }

        let task = tokio::spawn(worker.run(source, shutdown_rx));
        *state = State::Running { shutdown, task };
        Ok(())
    }

    /// Signals the loop and waits for it to exit. Stopping a stopped
    /// consumer is a no-op.
    pub async fn stop(&self) {
        let mut state = self.state.lock().await;
        let current = std::mem::replace(&mut *state, State::Stopped(None));

        if let State::Running { shutdown, .. } = &current {
            // the receiver is gone only if the loop already exited
            let _ = shutdown.send(true);
        }
        *state = Self::reclaim(current).await;
    }

    async fn reclaim(state: State) -> State {
        match state {
            State::Running { task, .. } => match task.await {
                Ok(source) => {
                    tracing::info!(source = %source.describe(), "🛑 Action consumer stopped");
                    State::Stopped(Some(source))
                }
                Err(e) => {
                    tracing::error!(error = %e, "Action consumer task failed");
                    State::Stopped(None)
                }
            },
            stopped => stopped,
        }
    }
}

impl HealthCheckable for ActionConsumer {
    fn check_health(&self) -> ComponentHealth {
        let status = if self.is_running() {
            HealthStatus::Healthy
        } else {
            HealthStatus::Degraded("consumer not running".to_string())
        };
        ComponentHealth::new(self.component_name(), status)
            .with_details(format!("processed {}, failed {}", self.processed(), self.failed()))
    }

    fn component_name(&self) -> &str {
        "action_consumer"
    }
}

// ============================================================================
// Loop
// ============================================================================

struct ConsumerLoop {
    handler: Arc<dyn ActionHandler>,
    stats: Arc<ConsumerStats>,
    metrics: Option<Arc<Metrics>>,
    error_backoff: Duration,
}

impl ConsumerLoop {
    async fn run(self, mut source: Box<dyn ActionSource>, mut shutdown: watch::Receiver<bool>) -> Box<dyn ActionSource> {
        loop {
            let next = tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                next = source.next_action() => next,
            };

            match next {
                Ok(Some(message)) => {
                    self.process(message).await;
                    Self::acknowledge(source.as_mut()).await;
                }
                Ok(None) => {
                    tracing::info!(source = %source.describe(), "Action source closed");
                    break;
                }
                Err(ServiceError::MalformedMessage(reason)) => {
                    tracing::warn!(reason = %reason, "Skipping malformed action message");
                    self.stats.failed.fetch_add(1, Ordering::SeqCst);
                    if let Some(metrics) = &self.metrics {
                        metrics.record_action("unknown", 0.0, Some("malformed"));
                    }
                    Self::acknowledge(source.as_mut()).await;
                }
                Err(e) => {
                    tracing::error!(
                        error = %e,
                        backoff_ms = self.error_backoff.as_millis() as u64,
                        "Failed to read from action source"
                    );
                    tokio::select! {
                        biased;
                        _ = shutdown.changed() => break,
                        _ = tokio::time::sleep(self.error_backoff) => {}
                    }
                }
            }
        }

        self.stats.running.store(false, Ordering::SeqCst);
        if let Some(metrics) = &self.metrics {
            metrics.set_consumer_running(false);
        }
        source
    }

    async fn acknowledge(source: &mut dyn ActionSource) {
        if let Err(e) = source.ack().await {
            // redelivered after a restart
            tracing::warn!(source = %source.describe(), error = %e, "Failed to acknowledge action message");
        }
    }

    async fn process(&self, message: ActionMessage) {
        let started = Instant::now();
        tracing::debug!(action_type = %message.action_type, "Handling action");

        let result = AssertUnwindSafe(self.handler.handle_action(&message.action_type, &message.payload))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| Err(ServiceError::Handler("action handler panicked".to_string())));
        let elapsed = started.elapsed().as_secs_f64();

        match result {
            Ok(outcome) => {
                self.stats.processed.fetch_add(1, Ordering::SeqCst);
                if let Some(metrics) = &self.metrics {
                    metrics.record_action(&message.action_type, elapsed, None);
                }
                tracing::debug!(action_type = %message.action_type, outcome = ?outcome, "Action handled");
            }
            Err(e) => {
                self.stats.failed.fetch_add(1, Ordering::SeqCst);
                if let Some(metrics) = &self.metrics {
                    metrics.record_action(&message.action_type, elapsed, Some(e.kind()));
                }
                tracing::error!(
                    action_type = %message.action_type,
                    error = %e,
                    "❌ Action handler failed, continuing with next message"
                );
            }
        }
    }
}
