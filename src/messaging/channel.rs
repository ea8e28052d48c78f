use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::errors::{ServiceError, ServiceResult};
use super::{ActionMessage, ActionPublisher, ActionSource};

/// In-process bus: a bounded tokio channel. The source closes once every
/// publisher has been dropped.
pub fn action_channel(capacity: usize) -> (ChannelPublisher, ChannelActionSource) {
    let (tx, rx) = mpsc::channel(capacity);
    (ChannelPublisher { tx }, ChannelActionSource { rx })
}

#[derive(Clone)]
pub struct ChannelPublisher {
    tx: mpsc::Sender<ActionMessage>,
}

pub struct ChannelActionSource {
    rx: mpsc::Receiver<ActionMessage>,
}

#[async_trait]
impl ActionPublisher for ChannelPublisher {
    async fn publish(&self, message: &ActionMessage) -> ServiceResult<()> {
        self.tx
            .send(message.clone())
            .await
            .map_err(|_| ServiceError::Bus("action channel closed".to_string()))
    }
}

#[async_trait]
impl ActionSource for ChannelActionSource {
    async fn next_action(&mut self) -> ServiceResult<Option<ActionMessage>> {
        Ok(self.rx.recv().await)
    }

    fn describe(&self) -> String {
        "in-process channel".to_string()
    }
}
