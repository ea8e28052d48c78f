use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use crate::errors::ServiceResult;
use super::{ActionHandler, ActionOutcome};

/// Which handler sees a message first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DispatchOrder {
    #[default]
    CrudFirst,
    AdditionalFirst,
}

/// Runs the CRUD handler and an optional additional handler for every
/// message.
///
/// Error precedence: a CRUD error wins, then an additional handler error,
/// then the CRUD outcome. With `run_additional_on_crud_failure(false)` and
/// `CrudFirst`, a failed CRUD step short-circuits.
pub struct CompositeActionHandler {
    crud: Arc<dyn ActionHandler>,
    additional: Option<Arc<dyn ActionHandler>>,
    order: DispatchOrder,
    run_additional_on_crud_failure: bool,
}

impl CompositeActionHandler {
    pub fn new(crud: Arc<dyn ActionHandler>, additional: Option<Arc<dyn ActionHandler>>) -> Self {
        Self {
            crud,
            additional,
            order: DispatchOrder::default(),
            run_additional_on_crud_failure: true,
        }
    }

    pub fn dispatch_order(mut self, order: DispatchOrder) -> Self {
        self.order = order;
        self
    }

    pub fn run_additional_on_crud_failure(mut self, enabled: bool) -> Self {
        self.run_additional_on_crud_failure = enabled;
        self
    }

    async fn run_additional(&self, action_type: &str, payload: &Value) -> ServiceResult<()> {
        match &self.additional {
            Some(handler) => handler.handle_action(action_type, payload).await.map(|_| ()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ActionHandler for CompositeActionHandler {
    async fn handle_action(&self, action_type: &str, payload: &Value) -> ServiceResult<ActionOutcome> {
        let (crud, additional) = match self.order {
            DispatchOrder::CrudFirst => {
                let crud = self.crud.handle_action(action_type, payload).await;
                if crud.is_err() && !self.run_additional_on_crud_failure {
                    return crud;
                }
                let additional = self.run_additional(action_type, payload).await;
                (crud, additional)
            }
            DispatchOrder::AdditionalFirst => {
                let additional = self.run_additional(action_type, payload).await;
                let crud = self.crud.handle_action(action_type, payload).await;
                (crud, additional)
            }
        };

        if let Err(e) = &additional {
            tracing::warn!(action_type = %action_type, error = %e, "Additional action handler failed");
        }

        let outcome = crud?;
        additional?;

        // the additional handler claimed a message the CRUD handler ignored
        if outcome == ActionOutcome::Ignored && self.additional.is_some() {
            return Ok(ActionOutcome::Handled);
        }
        Ok(outcome)
    }
}
