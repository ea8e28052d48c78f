use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::schema::ID_FIELD;

pub type RecordId = Uuid;

/// One persisted model instance. Serializes flat: `{"id": ..., "name": ...}`
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Record {
    pub id: RecordId,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Record {
    /// New record with a fresh, time-ordered identity
    pub fn new(fields: Map<String, Value>) -> Self {
        Self {
            id: Uuid::now_v7(),
            fields,
        }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn apply(&mut self, changes: &Map<String, Value>) {
        for (key, value) in changes {
            self.fields.insert(key.clone(), value.clone());
        }
    }

    /// Equality match on every filter entry; `id` compares against the identity
    pub fn matches(&self, filter: &Map<String, Value>) -> bool {
        filter.iter().all(|(key, expected)| {
            if key == ID_FIELD {
                expected.as_str() == Some(self.id.to_string().as_str())
            } else {
                self.fields.get(key).unwrap_or(&Value::Null) == expected
            }
        })
    }
}
