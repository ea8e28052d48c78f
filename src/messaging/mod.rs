use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::ServiceResult;

// ============================================================================
// Messaging - action messages and the bus they travel on
// ============================================================================
//
// - ActionSource    : the subscription side, owned by exactly one consumer
// - ActionPublisher : the dispatch side, shared freely
//
// Backends: Redpanda/Kafka (rdkafka) and an in-process tokio channel.
//
// ============================================================================

mod channel;
mod redpanda;

pub use channel::{action_channel, ChannelActionSource, ChannelPublisher};
pub use redpanda::{KafkaActionSource, RedpandaClient};

/// Unit of asynchronous work: `{"action_type": "...", "payload": ...}`
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ActionMessage {
    pub action_type: String,
    #[serde(default)]
    pub payload: Value,
}

impl ActionMessage {
    pub fn new(action_type: impl Into<String>, payload: Value) -> Self {
        Self {
            action_type: action_type.into(),
            payload,
        }
    }

    pub fn from_json(bytes: &[u8]) -> ServiceResult<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| crate::errors::ServiceError::MalformedMessage(e.to_string()))
    }

    pub fn to_json(&self) -> ServiceResult<String> {
        serde_json::to_string(self)
            .map_err(|e| crate::errors::ServiceError::MalformedMessage(e.to_string()))
    }
}

#[async_trait]
pub trait ActionSource: Send {
    /// Wait for the next message. `Ok(None)` means the bus is closed for good.
    ///
    /// Must be cancel-safe: the consumer races this against its stop signal.
    async fn next_action(&mut self) -> ServiceResult<Option<ActionMessage>>;

    /// The last message returned by `next_action` (or rejected by it as
    /// malformed) is finished with, handled or not. A source that tracks
    /// positions only advances past a message once it is acknowledged.
    async fn ack(&mut self) -> ServiceResult<()> {
        Ok(())
    }

    fn describe(&self) -> String;
}

#[async_trait]
pub trait ActionPublisher: Send + Sync {
    async fn publish(&self, message: &ActionMessage) -> ServiceResult<()>;

    async fn dispatch_action(&self, action_type: &str, payload: Value) -> ServiceResult<()> {
        self.publish(&ActionMessage::new(action_type, payload)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_format() {
        let message = ActionMessage::new("create_ingredient", json!({"name": "salt"}));
        let json = message.to_json().unwrap();
        assert_eq!(json, r#"{"action_type":"create_ingredient","payload":{"name":"salt"}}"#);
        assert_eq!(ActionMessage::from_json(json.as_bytes()).unwrap(), message);
    }

    #[test]
    fn test_missing_payload_is_null() {
        let message = ActionMessage::from_json(br#"{"action_type": "ping"}"#).unwrap();
        assert_eq!(message.payload, Value::Null);
    }

    #[test]
    fn test_malformed_message() {
        let result = ActionMessage::from_json(b"{\"payload\": 1}");
        assert!(matches!(result, Err(crate::errors::ServiceError::MalformedMessage(_))));
    }
}
