use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

use crate::errors::{ServiceError, ServiceResult};
use crate::models::{parse_identity, ModelSchema, Record};
use crate::store::ModelStore;

/// Body of `POST /query`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueryRequest {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub filter: Map<String, Value>,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryError {
    pub message: String,
}

/// Errors are reported in the body next to (possibly empty) data
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResponse {
    pub data: Vec<Record>,
    pub errors: Vec<QueryError>,
}

impl QueryResponse {
    fn failed(error: ServiceError) -> Self {
        Self {
            data: Vec::new(),
            errors: vec![QueryError {
                message: error.to_string(),
            }],
        }
    }
}

/// Read path over one model's store
pub struct QueryEndpoint {
    store: Arc<dyn ModelStore>,
}

impl QueryEndpoint {
    pub fn new(store: Arc<dyn ModelStore>) -> Self {
        Self { store }
    }

    pub fn schema(&self) -> &Arc<ModelSchema> {
        self.store.schema()
    }

    pub async fn execute(&self, request: QueryRequest) -> QueryResponse {
        match self.run(request).await {
            Ok(data) => QueryResponse { data, errors: Vec::new() },
            Err(e) => {
                tracing::debug!(model = %self.schema().name(), error = %e, "Query failed");
                QueryResponse::failed(e)
            }
        }
    }

    async fn run(&self, request: QueryRequest) -> ServiceResult<Vec<Record>> {
        if let Some(id) = &request.id {
            let record = self.store.get(parse_identity(id)?).await?;
            return Ok(if record.matches(&request.filter) { vec![record] } else { Vec::new() });
        }

        self.schema().validate_filter(&request.filter)?;
        self.store.find(&request.filter, request.limit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FieldDescriptor, FieldType};
    use crate::store::InMemoryModelStore;
    use serde_json::json;

    async fn endpoint() -> (QueryEndpoint, Vec<Record>) {
        let schema = ModelSchema::builder("Ingredient")
            .field(FieldDescriptor::new("name", FieldType::Text))
            .field(FieldDescriptor::new("vegan", FieldType::Boolean).default_value(true))
            .build()
            .unwrap();
        let store = Arc::new(InMemoryModelStore::new(Arc::new(schema)));
        let mut records = Vec::new();
        for (name, vegan) in [("salt", true), ("butter", false), ("pepper", true)] {
            let mut fields = Map::new();
            fields.insert("name".to_string(), json!(name));
            fields.insert("vegan".to_string(), json!(vegan));
            records.push(store.insert(fields).await.unwrap());
        }
        (QueryEndpoint::new(store), records)
    }

    fn request(body: Value) -> QueryRequest {
        serde_json::from_value(body).unwrap()
    }

    #[tokio::test]
    async fn test_filter_and_limit() {
        let (endpoint, _records) = endpoint().await;

        let response = endpoint.execute(request(json!({"filter": {"vegan": true}}))).await;
        assert!(response.errors.is_empty());
        let names: Vec<_> = response.data.iter().map(|r| r.get("name").unwrap().clone()).collect();
        assert_eq!(names, vec![json!("salt"), json!("pepper")]);

        let response = endpoint.execute(request(json!({"limit": 1}))).await;
        assert_eq!(response.data.len(), 1);
    }

    #[tokio::test]
    async fn test_lookup_by_id() {
        let (endpoint, records) = endpoint().await;
        let response = endpoint
            .execute(request(json!({"id": records[1].id.to_string()})))
            .await;
        assert_eq!(response.data, vec![records[1].clone()]);
    }

    #[tokio::test]
    async fn test_errors_are_reported_in_body() {
        let (endpoint, _records) = endpoint().await;

        let response = endpoint.execute(request(json!({"filter": {"colour": "red"}}))).await;
        assert!(response.data.is_empty());
        assert_eq!(response.errors.len(), 1);

        let response = endpoint.execute(request(json!({"id": "not-a-uuid"}))).await;
        assert_eq!(response.errors.len(), 1);

        let missing = uuid::Uuid::now_v7().to_string();
        let response = endpoint.execute(request(json!({"id": missing}))).await;
        assert!(response.errors[0].message.contains("not found"));
    }
}
