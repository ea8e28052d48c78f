use async_trait::async_trait;
use scylla::client::session::Session;
use scylla::client::session_builder::SessionBuilder;
use serde_json::{Map, Value};
use std::sync::Arc;
use uuid::Uuid;

use crate::conventions;
use crate::errors::{ServiceError, ServiceResult};
use crate::models::{ModelSchema, Record, RecordId};
use super::{check_unique, ModelStore};

// ============================================================================
// ScyllaDB Model Store
// ============================================================================
//
// All models share one table, partitioned by model key:
//
//   model_records (model text, id uuid, data text, PRIMARY KEY ((model), id))
//
// `data` holds the record fields as JSON. Uniqueness is checked with a
// read before the write, so it holds for a single writer per model; the
// consumer task is that single writer.
//
// ============================================================================

const TABLE: &str = "model_records";

pub struct ScyllaModelStore {
    session: Arc<Session>,
    keyspace: String,
    model: String,
    schema: Arc<ModelSchema>,
}

fn store_err(context: &str, e: impl std::fmt::Display) -> ServiceError {
    ServiceError::Store(format!("{}: {}", context, e))
}

impl ScyllaModelStore {
    /// Connect a new session to `known_node`
    pub async fn connect(known_node: &str, keyspace: &str, schema: Arc<ModelSchema>) -> ServiceResult<Self> {
        tracing::info!(node = %known_node, keyspace = %keyspace, "Connecting to ScyllaDB");
        let session = SessionBuilder::new()
            .known_node(known_node)
            .build()
            .await
            .map_err(|e| store_err("failed to connect", e))?;

        Self::with_session(Arc::new(session), keyspace, schema)
    }

    /// Reuse an existing session (several model stores can share one)
    pub fn with_session(session: Arc<Session>, keyspace: &str, schema: Arc<ModelSchema>) -> ServiceResult<Self> {
        if keyspace.is_empty() || !keyspace.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(ServiceError::Configuration(format!("invalid keyspace name '{}'", keyspace)));
        }

        Ok(Self {
            session,
            keyspace: keyspace.to_string(),
            model: conventions::model_key(&schema),
            schema,
        })
    }

    fn table(&self) -> String {
        format!("{}.{}", self.keyspace, TABLE)
    }

    fn decode(id: Uuid, data: &str) -> ServiceResult<Record> {
        let fields: Map<String, Value> =
            serde_json::from_str(data).map_err(|e| store_err("corrupt record data", e))?;
        Ok(Record { id, fields })
    }

    async fn load_all(&self) -> ServiceResult<Vec<Record>> {
        let result = self
            .session
            .query_unpaged(
                format!("SELECT id, data FROM {} WHERE model = ?", self.table()),
                (self.model.as_str(),),
            )
            .await
            .map_err(|e| store_err("failed to query records", e))?;

        let rows_result = result
            .into_rows_result()
            .map_err(|e| store_err("failed to parse records", e))?;
        let rows = rows_result
            .rows::<(Uuid, String)>()
            .map_err(|e| store_err("failed to read rows", e))?;

        let mut records = Vec::new();
        for row in rows {
            let (id, data) = row.map_err(|e| store_err("failed to parse row", e))?;
            records.push(Self::decode(id, &data)?);
        }

        // v7 identities are time-ordered
        records.sort_by_key(|r| r.id);
        Ok(records)
    }

    async fn write(&self, record: &Record) -> ServiceResult<()> {
        let data = serde_json::to_string(&record.fields).map_err(|e| store_err("failed to encode record", e))?;
        self.session
            .query_unpaged(
                format!("INSERT INTO {} (model, id, data) VALUES (?, ?, ?)", self.table()),
                (self.model.as_str(), record.id, data),
            )
            .await
            .map_err(|e| store_err("failed to write record", e))?;
        Ok(())
    }
}

#[async_trait]
impl ModelStore for ScyllaModelStore {
    fn schema(&self) -> &Arc<ModelSchema> {
        &self.schema
    }

    async fn init(&self) -> ServiceResult<()> {
        self.session
            .query_unpaged(
                format!(
                    "CREATE KEYSPACE IF NOT EXISTS {} WITH REPLICATION = \
                     {{'class': 'SimpleStrategy', 'replication_factor': 1}}",
                    self.keyspace
                ),
                &[],
            )
            .await
            .map_err(|e| store_err("failed to create keyspace", e))?;

        self.session
            .query_unpaged(
                format!(
                    "CREATE TABLE IF NOT EXISTS {} (model text, id uuid, data text, PRIMARY KEY ((model), id))",
                    self.table()
                ),
                &[],
            )
            .await
            .map_err(|e| store_err("failed to create table", e))?;

        tracing::info!(table = %self.table(), model = %self.model, "ScyllaDB model store ready");
        Ok(())
    }

    async fn close(&self) {
        tracing::info!(model = %self.model, "ScyllaDB model store closed");
    }

    async fn insert(&self, fields: Map<String, Value>) -> ServiceResult<Record> {
        if self.schema.unique_fields().next().is_some() {
            let existing = self.load_all().await?;
            check_unique(&self.schema, existing.iter(), &fields, None)?;
        }

        let record = Record::new(fields);
        self.write(&record).await?;
        Ok(record)
    }

    async fn get(&self, id: RecordId) -> ServiceResult<Record> {
        let result = self
            .session
            .query_unpaged(
                format!("SELECT id, data FROM {} WHERE model = ? AND id = ?", self.table()),
                (self.model.as_str(), id),
            )
            .await
            .map_err(|e| store_err("failed to query record", e))?;

        let rows_result = result
            .into_rows_result()
            .map_err(|e| store_err("failed to parse record", e))?;
        let mut rows = rows_result
            .rows::<(Uuid, String)>()
            .map_err(|e| store_err("failed to read rows", e))?;

        match rows.next() {
            Some(row) => {
                let (id, data) = row.map_err(|e| store_err("failed to parse row", e))?;
                Self::decode(id, &data)
            }
            None => Err(ServiceError::NotFound(id)),
        }
    }

    async fn update(&self, id: RecordId, changes: Map<String, Value>) -> ServiceResult<Record> {
        let mut record = self.get(id).await?;

        if self.schema.unique_fields().next().is_some() {
            let existing = self.load_all().await?;
            check_unique(&self.schema, existing.iter(), &changes, Some(id))?;
        }

        record.apply(&changes);
        self.write(&record).await?;
        Ok(record)
    }

    async fn delete(&self, id: RecordId) -> ServiceResult<()> {
        self.get(id).await?;

        self.session
            .query_unpaged(
                format!("DELETE FROM {} WHERE model = ? AND id = ?", self.table()),
                (self.model.as_str(), id),
            )
            .await
            .map_err(|e| store_err("failed to delete record", e))?;
        Ok(())
    }

    async fn find(&self, filter: &Map<String, Value>, limit: Option<usize>) -> ServiceResult<Vec<Record>> {
        Ok(self
            .load_all()
            .await?
            .into_iter()
            .filter(|r| r.matches(filter))
            .take(limit.unwrap_or(usize::MAX))
            .collect())
    }
}
