use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use crate::conventions::{self, CrudMethod};
use crate::errors::ServiceResult;
use crate::models::parse_identity;
use crate::store::ModelStore;
use super::{ActionHandler, ActionOutcome};

// ============================================================================
// CRUD Action Handler
// ============================================================================
//
// Orchestrates: action type -> CRUD method -> schema validation -> store
//
//   create_<model>  payload {field: value, ...}        -> Created(record)
//   update_<model>  payload {"id": <id>, field: value} -> Updated(record)
//   delete_<model>  payload <id>                       -> Deleted(id)
//
// Anything else is Ignored.
//
// ============================================================================

pub struct CrudActionHandler {
    store: Arc<dyn ModelStore>,
}

impl CrudActionHandler {
    pub fn new(store: Arc<dyn ModelStore>) -> Self {
        Self { store }
    }

    /// The action types this handler reacts to
    pub fn action_types(&self) -> Vec<String> {
        CrudMethod::ALL
            .into_iter()
            .map(|method| conventions::get_crud_action(method, self.store.schema()))
            .collect()
    }

    async fn create(&self, payload: &Value) -> ServiceResult<ActionOutcome> {
        let fields = self.store.schema().validate_create(payload)?;
        let record = self.store.insert(fields).await?;
        tracing::debug!(model = %self.store.schema().name(), id = %record.id, "Record created");
        Ok(ActionOutcome::Created(record))
    }

    async fn update(&self, payload: &Value) -> ServiceResult<ActionOutcome> {
        let (id, changes) = self.store.schema().validate_update(payload)?;
        let record = self.store.update(id, changes).await?;
        tracing::debug!(model = %self.store.schema().name(), id = %id, "Record updated");
        Ok(ActionOutcome::Updated(record))
    }

    async fn delete(&self, payload: &Value) -> ServiceResult<ActionOutcome> {
        let id = parse_identity(payload)?;
        self.store.delete(id).await?;
        tracing::debug!(model = %self.store.schema().name(), id = %id, "Record deleted");
        Ok(ActionOutcome::Deleted(id))
    }
}

#[async_trait]
impl ActionHandler for CrudActionHandler {
    async fn handle_action(&self, action_type: &str, payload: &Value) -> ServiceResult<ActionOutcome> {
        match conventions::parse_crud_action(action_type, self.store.schema()) {
            Some(CrudMethod::Create) => self.create(payload).await,
            Some(CrudMethod::Update) => self.update(payload).await,
            Some(CrudMethod::Delete) => self.delete(payload).await,
            None => Ok(ActionOutcome::Ignored),
        }
    }
}
