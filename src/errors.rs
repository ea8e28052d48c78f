use uuid::Uuid;

use crate::utils::IsTransient;

// ============================================================================
// Service Errors
// ============================================================================
//
// One taxonomy for the whole framework. Where each variant is allowed to
// surface:
// - Configuration          -> escapes builders synchronously
// - RegistryUnavailable    -> logged by Service::run / Service::stop
// - Validation / NotFound  -> returned by handlers, logged by the consumer
// - Handler                -> user callback failures, logged by the consumer
//
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Invalid service configuration: {0}")]
    Configuration(String),

    #[error("Registry unavailable: {0}")]
    RegistryUnavailable(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Record not found: {0}")]
    NotFound(Uuid),

    #[error("Action handler failed: {0}")]
    Handler(String),

    #[error("Action consumer is already running")]
    ConsumerAlreadyRunning,

    #[error("Message bus error: {0}")]
    Bus(String),

    #[error("Malformed action message: {0}")]
    MalformedMessage(String),

    #[error("Model store error: {0}")]
    Store(String),

    #[error("Network listener error: {0}")]
    Listener(String),
}

impl ServiceError {
    /// Short, stable label used for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            ServiceError::Configuration(_) => "configuration",
            ServiceError::RegistryUnavailable(_) => "registry_unavailable",
            ServiceError::Validation(_) => "validation",
            ServiceError::NotFound(_) => "not_found",
            ServiceError::Handler(_) => "handler",
            ServiceError::ConsumerAlreadyRunning => "consumer_already_running",
            ServiceError::Bus(_) => "bus",
            ServiceError::MalformedMessage(_) => "malformed_message",
            ServiceError::Store(_) => "store",
            ServiceError::Listener(_) => "listener",
        }
    }
}

impl IsTransient for ServiceError {
    fn is_transient(&self) -> bool {
        matches!(
            self,
            ServiceError::RegistryUnavailable(_) | ServiceError::Bus(_) | ServiceError::Store(_)
        )
    }
}

impl From<config::ConfigError> for ServiceError {
    fn from(err: config::ConfigError) -> Self {
        ServiceError::Configuration(err.to_string())
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;
