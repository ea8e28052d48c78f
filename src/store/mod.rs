use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;

use crate::errors::{ServiceError, ServiceResult};
use crate::models::{ModelSchema, Record, RecordId};

// ============================================================================
// Model Store - persistence handle passed down to handlers and the API
// ============================================================================
//
// A store is constructed explicitly, handed to the service, initialized by
// Service::run and closed by Service::stop. The store serializes conflicting
// writes itself; callers never lock around it.
//
// Payloads are validated against the schema before they reach a store; the
// store enforces identity and uniqueness.
//
// ============================================================================

mod memory;
mod scylla_store;

pub use memory::InMemoryModelStore;
pub use scylla_store::ScyllaModelStore;

#[async_trait]
pub trait ModelStore: Send + Sync {
    fn schema(&self) -> &Arc<ModelSchema>;

    /// Prepare backing storage (tables, keyspaces)
    async fn init(&self) -> ServiceResult<()> {
        Ok(())
    }

    /// Release the handle at service shutdown
    async fn close(&self) {}

    async fn insert(&self, fields: Map<String, Value>) -> ServiceResult<Record>;

    async fn get(&self, id: RecordId) -> ServiceResult<Record>;

    async fn update(&self, id: RecordId, changes: Map<String, Value>) -> ServiceResult<Record>;

    async fn delete(&self, id: RecordId) -> ServiceResult<()>;

    /// Records matching every filter entry, in creation order
    async fn find(&self, filter: &Map<String, Value>, limit: Option<usize>) -> ServiceResult<Vec<Record>>;
}

/// Reject `candidate` if it repeats the value of a unique field held by a
/// record other than `exclude`.
pub(crate) fn check_unique<'a>(
    schema: &ModelSchema,
    existing: impl Iterator<Item = &'a Record>,
    candidate: &Map<String, Value>,
    exclude: Option<RecordId>,
) -> ServiceResult<()> {
    let unique: Vec<(&str, &Value)> = schema
        .unique_fields()
        .filter_map(|f| candidate.get(&f.name).map(|v| (f.name.as_str(), v)))
        .filter(|(_, v)| !v.is_null())
        .collect();

    if unique.is_empty() {
        return Ok(());
    }

    for record in existing.filter(|r| Some(r.id) != exclude) {
        for (field, value) in &unique {
            if record.get(field) == Some(*value) {
                return Err(ServiceError::Validation(format!(
                    "field '{}' must be unique, {} already exists",
                    field, value
                )));
            }
        }
    }

    Ok(())
}
