use async_trait::async_trait;
use futures_util::future::BoxFuture;
use serde_json::Value;
use std::sync::Arc;

use crate::errors::{ServiceError, ServiceResult};
use crate::models::{Record, RecordId};

// ============================================================================
// Action Handlers
// ============================================================================
//
// An action handler turns one (action_type, payload) pair into a side
// effect. Variants:
// - FnActionHandler        : user callback (sync or async)
// - CrudActionHandler      : create/update/delete on one model
// - CompositeActionHandler : CRUD handler chained with an additional handler
//
// ============================================================================

mod composite;
mod crud;

pub use composite::{CompositeActionHandler, DispatchOrder};
pub use crud::CrudActionHandler;

#[derive(Debug, Clone, PartialEq)]
pub enum ActionOutcome {
    Created(Record),
    Updated(Record),
    Deleted(RecordId),
    /// Handled by a callback with no model result
    Handled,
    /// The action type is not one this handler reacts to
    Ignored,
}

#[async_trait]
pub trait ActionHandler: Send + Sync {
    async fn handle_action(&self, action_type: &str, payload: &Value) -> ServiceResult<ActionOutcome>;
}

#[async_trait]
impl<H: ActionHandler + ?Sized> ActionHandler for Arc<H> {
    async fn handle_action(&self, action_type: &str, payload: &Value) -> ServiceResult<ActionOutcome> {
        (**self).handle_action(action_type, payload).await
    }
}

type SyncCallback = dyn Fn(&str, &Value) -> anyhow::Result<()> + Send + Sync;
type AsyncCallback = dyn Fn(String, Value) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync;

enum Callback {
    Sync(Box<SyncCallback>),
    Async(Box<AsyncCallback>),
}

/// Wraps a user callback. Callback errors surface as `ServiceError::Handler`.
pub struct FnActionHandler {
    callback: Callback,
}

impl FnActionHandler {
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(&str, &Value) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self {
            callback: Callback::Sync(Box::new(callback)),
        }
    }

    /// Async callbacks receive owned copies of the action
    pub fn new_async<F>(callback: F) -> Self
    where
        F: Fn(String, Value) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync + 'static,
    {
        Self {
            callback: Callback::Async(Box::new(callback)),
        }
    }
}

#[async_trait]
impl ActionHandler for FnActionHandler {
    async fn handle_action(&self, action_type: &str, payload: &Value) -> ServiceResult<ActionOutcome> {
        let result = match &self.callback {
            Callback::Sync(f) => f(action_type, payload),
            Callback::Async(f) => f(action_type.to_string(), payload.clone()).await,
        };

        result
            .map(|()| ActionOutcome::Handled)
            .map_err(|e| ServiceError::Handler(format!("{:#}", e)))
    }
}
