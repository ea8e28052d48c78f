use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::errors::{ServiceError, ServiceResult};
use crate::models::{ModelSchema, Record, RecordId};
use super::{check_unique, ModelStore};

/// Process-local store, records kept in creation order.
pub struct InMemoryModelStore {
    schema: Arc<ModelSchema>,
    records: RwLock<Vec<Record>>,
}

impl InMemoryModelStore {
    pub fn new(schema: Arc<ModelSchema>) -> Self {
        Self {
            schema,
            records: RwLock::new(Vec::new()),
        }
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }
}

#[async_trait]
impl ModelStore for InMemoryModelStore {
    fn schema(&self) -> &Arc<ModelSchema> {
        &self.schema
    }

    async fn close(&self) {
        let count = self.records.read().await.len();
        tracing::debug!(model = %self.schema.name(), records = count, "In-memory store closed");
    }

    async fn insert(&self, fields: Map<String, Value>) -> ServiceResult<Record> {
        let mut records = self.records.write().await;
        check_unique(&self.schema, records.iter(), &fields, None)?;

        let record = Record::new(fields);
        records.push(record.clone());
        Ok(record)
    }

    async fn get(&self, id: RecordId) -> ServiceResult<Record> {
        self.records
            .read()
            .await
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or(ServiceError::NotFound(id))
    }

    async fn update(&self, id: RecordId, changes: Map<String, Value>) -> ServiceResult<Record> {
        let mut records = self.records.write().await;
        let position = records
            .iter()
            .position(|r| r.id == id)
            .ok_or(ServiceError::NotFound(id))?;
        check_unique(&self.schema, records.iter(), &changes, Some(id))?;

        let record = &mut records[position];
        record.apply(&changes);
        Ok(record.clone())
    }

    async fn delete(&self, id: RecordId) -> ServiceResult<()> {
        let mut records = self.records.write().await;
        let position = records
            .iter()
            .position(|r| r.id == id)
            .ok_or(ServiceError::NotFound(id))?;
        records.remove(position);
        Ok(())
    }

    async fn find(&self, filter: &Map<String, Value>, limit: Option<usize>) -> ServiceResult<Vec<Record>> {
        let records = self.records.read().await;
        Ok(records
            .iter()
            .filter(|r| r.matches(filter))
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FieldDescriptor, FieldType};
    use serde_json::json;

    fn store() -> InMemoryModelStore {
        let schema = ModelSchema::builder("Ingredient")
            .field(FieldDescriptor::new("name", FieldType::Text).unique())
            .field(FieldDescriptor::new("calories", FieldType::Integer).optional())
            .build()
            .unwrap();
        InMemoryModelStore::new(Arc::new(schema))
    }

    fn fields(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_insert_get_delete() {
        let store = store();
        let record = store.insert(fields(json!({"name": "salt"}))).await.unwrap();

        assert_eq!(store.get(record.id).await.unwrap(), record);

        store.delete(record.id).await.unwrap();
        assert!(matches!(store.get(record.id).await, Err(ServiceError::NotFound(id)) if id == record.id));
        assert!(matches!(store.delete(record.id).await, Err(ServiceError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_unique_fields_enforced() {
        let store = store();
        let salt = store.insert(fields(json!({"name": "salt"}))).await.unwrap();
        let pepper = store.insert(fields(json!({"name": "pepper"}))).await.unwrap();

        let dup = store.insert(fields(json!({"name": "salt"}))).await;
        assert!(matches!(dup, Err(ServiceError::Validation(_))));

        // renaming onto another record's value is rejected, keeping your own is not
        let clash = store.update(pepper.id, fields(json!({"name": "salt"}))).await;
        assert!(matches!(clash, Err(ServiceError::Validation(_))));
        store.update(salt.id, fields(json!({"name": "salt", "calories": 0}))).await.unwrap();
    }

    #[tokio::test]
    async fn test_find_in_creation_order() {
        let store = store();
        for name in ["a", "b", "c"] {
            store.insert(fields(json!({"name": name, "calories": 1}))).await.unwrap();
        }

        let all = store.find(&Map::new(), None).await.unwrap();
        let names: Vec<_> = all.iter().map(|r| r.get("name").cloned().unwrap()).collect();
        assert_eq!(names, vec![json!("a"), json!("b"), json!("c")]);

        let limited = store.find(&fields(json!({"calories": 1})), Some(2)).await.unwrap();
        assert_eq!(limited.len(), 2);
        assert_eq!(store.len().await, 3);
    }

    #[tokio::test]
    async fn test_update_missing_record() {
        let store = store();
        let result = store.update(uuid::Uuid::now_v7(), fields(json!({"name": "x"}))).await;
        assert!(matches!(result, Err(ServiceError::NotFound(_))));
    }
}
