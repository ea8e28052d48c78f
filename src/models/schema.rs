use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use uuid::Uuid;

use crate::errors::ServiceError;
use super::record::RecordId;

// ============================================================================
// Model Schema - explicit field descriptors
// ============================================================================
//
// Built once at startup and shared (behind an Arc) by the store, the CRUD
// handler and the query endpoint. All payload validation goes through here.
//
// ============================================================================

pub const ID_FIELD: &str = "id";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Text,
    Integer,
    Float,
    Boolean,
    /// Any JSON value
    Json,
}

impl FieldType {
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            FieldType::Text => value.is_string(),
            FieldType::Integer => value.is_i64() || value.is_u64(),
            FieldType::Float => value.is_number(),
            FieldType::Boolean => value.is_boolean(),
            FieldType::Json => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub name: String,
    pub field_type: FieldType,
    /// Required fields must be present (or defaulted) and non-null
    pub required: bool,
    pub unique: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl FieldDescriptor {
    /// A required, non-unique field without default
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            required: true,
            unique: false,
            default: None,
        }
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    fn check(&self, value: &Value) -> Result<(), ServiceError> {
        if value.is_null() {
            if self.required {
                return Err(ServiceError::Validation(format!("field '{}' must not be null", self.name)));
            }
            return Ok(());
        }
        if !self.field_type.accepts(value) {
            return Err(ServiceError::Validation(format!(
                "field '{}' expects {:?}, got {}",
                self.name, self.field_type, value
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSchema {
    name: String,
    fields: Vec<FieldDescriptor>,
}

pub struct ModelSchemaBuilder {
    name: String,
    fields: Vec<FieldDescriptor>,
}

impl ModelSchemaBuilder {
    pub fn field(mut self, field: FieldDescriptor) -> Self {
        self.fields.push(field);
        self
    }

    pub fn build(self) -> Result<ModelSchema, ServiceError> {
        let name = self.name.trim().to_string();
        if name.is_empty() {
            return Err(ServiceError::Configuration("model name must not be empty".to_string()));
        }
        if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(ServiceError::Configuration(format!(
                "model name '{}' may only contain ASCII letters, digits and '_'",
                name
            )));
        }
        if self.fields.is_empty() {
            return Err(ServiceError::Configuration(format!("model '{}' declares no fields", name)));
        }

        let mut seen = HashSet::new();
        for field in &self.fields {
            if field.name == ID_FIELD {
                return Err(ServiceError::Configuration(
                    "'id' is reserved for the record identity".to_string(),
                ));
            }
            if !seen.insert(field.name.as_str()) {
                return Err(ServiceError::Configuration(format!(
                    "model '{}' declares field '{}' twice",
                    name, field.name
                )));
            }
            if let Some(default) = &field.default {
                field.check(default).map_err(|e| ServiceError::Configuration(e.to_string()))?;
            }
        }

        Ok(ModelSchema { name, fields: self.fields })
    }
}

impl ModelSchema {
    pub fn builder(name: impl Into<String>) -> ModelSchemaBuilder {
        ModelSchemaBuilder {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn unique_fields(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter().filter(|f| f.unique)
    }

    fn known_field(&self, name: &str) -> Result<&FieldDescriptor, ServiceError> {
        self.field(name).ok_or_else(|| {
            ServiceError::Validation(format!("model '{}' has no field '{}'", self.name, name))
        })
    }

    /// Validate a create payload and return the full field map, defaults applied
    pub fn validate_create(&self, payload: &Value) -> Result<Map<String, Value>, ServiceError> {
        let object = payload.as_object().ok_or_else(|| {
            ServiceError::Validation(format!("create payload must be an object, got {}", payload))
        })?;

        if object.contains_key(ID_FIELD) {
            return Err(ServiceError::Validation("'id' is assigned by the store".to_string()));
        }

        for (key, value) in object {
            self.known_field(key)?.check(value)?;
        }

        let mut fields = Map::new();
        for descriptor in &self.fields {
            match object.get(&descriptor.name).or(descriptor.default.as_ref()) {
                Some(value) => {
                    fields.insert(descriptor.name.clone(), value.clone());
                }
                None if descriptor.required => {
                    return Err(ServiceError::Validation(format!(
                        "missing required field '{}'",
                        descriptor.name
                    )));
                }
                None => {
                    fields.insert(descriptor.name.clone(), Value::Null);
                }
            }
        }

        Ok(fields)
    }

    /// Validate an update payload: the record identity plus the fields to change
    pub fn validate_update(&self, payload: &Value) -> Result<(RecordId, Map<String, Value>), ServiceError> {
        let object = payload.as_object().ok_or_else(|| {
            ServiceError::Validation(format!("update payload must be an object, got {}", payload))
        })?;

        let id = object
            .get(ID_FIELD)
            .ok_or_else(|| ServiceError::Validation("update payload is missing 'id'".to_string()))
            .and_then(parse_identity)?;

        let mut changes = Map::new();
        for (key, value) in object.iter().filter(|(key, _)| key.as_str() != ID_FIELD) {
            self.known_field(key)?.check(value)?;
            changes.insert(key.clone(), value.clone());
        }

        Ok((id, changes))
    }

    /// Filters may only name declared fields (or the id)
    pub fn validate_filter(&self, filter: &Map<String, Value>) -> Result<(), ServiceError> {
        for key in filter.keys().filter(|key| key.as_str() != ID_FIELD) {
            self.known_field(key)?;
        }
        Ok(())
    }
}

/// A record identity as carried in payloads: a UUID string
pub fn parse_identity(value: &Value) -> Result<RecordId, ServiceError> {
    value
        .as_str()
        .and_then(|s| Uuid::parse_str(s).ok())
        .ok_or_else(|| ServiceError::Validation(format!("'{}' is not a record identity", value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ingredient() -> ModelSchema {
        ModelSchema::builder("Ingredient")
            .field(FieldDescriptor::new("name", FieldType::Text).unique())
            .field(FieldDescriptor::new("calories", FieldType::Integer).optional())
            .field(FieldDescriptor::new("vegan", FieldType::Boolean).default_value(false))
            .build()
            .unwrap()
    }

    #[test]
    fn test_builder_rejects_bad_schemas() {
        assert!(ModelSchema::builder("").field(FieldDescriptor::new("a", FieldType::Text)).build().is_err());
        assert!(ModelSchema::builder("Empty").build().is_err());
        assert!(ModelSchema::builder("Has Space")
            .field(FieldDescriptor::new("a", FieldType::Text))
            .build()
            .is_err());
        assert!(ModelSchema::builder("Dup")
            .field(FieldDescriptor::new("a", FieldType::Text))
            .field(FieldDescriptor::new("a", FieldType::Integer))
            .build()
            .is_err());
        assert!(ModelSchema::builder("Reserved")
            .field(FieldDescriptor::new("id", FieldType::Text))
            .build()
            .is_err());
        assert!(ModelSchema::builder("BadDefault")
            .field(FieldDescriptor::new("n", FieldType::Integer).default_value("ten"))
            .build()
            .is_err());
    }

    #[test]
    fn test_validate_create_applies_defaults() {
        let fields = ingredient().validate_create(&json!({"name": "salt"})).unwrap();
        assert_eq!(fields["name"], json!("salt"));
        assert_eq!(fields["vegan"], json!(false));
        assert_eq!(fields["calories"], Value::Null);
    }

    #[test]
    fn test_validate_create_errors() {
        let schema = ingredient();
        let cases = [
            json!("salt"),
            json!({}),
            json!({"name": 42}),
            json!({"name": "salt", "colour": "white"}),
            json!({"name": null}),
            json!({"name": "salt", "id": Uuid::now_v7().to_string()}),
        ];
        for payload in cases {
            assert!(
                matches!(schema.validate_create(&payload), Err(ServiceError::Validation(_))),
                "expected validation error for {}",
                payload
            );
        }
    }

    #[test]
    fn test_validate_update() {
        let schema = ingredient();
        let id = Uuid::now_v7();

        let (parsed, changes) = schema
            .validate_update(&json!({"id": id.to_string(), "name": "pepper"}))
            .unwrap();
        assert_eq!(parsed, id);
        assert_eq!(changes.len(), 1);

        assert!(schema.validate_update(&json!({"name": "pepper"})).is_err());
        assert!(schema.validate_update(&json!({"id": "not-a-uuid"})).is_err());
        assert!(schema.validate_update(&json!({"id": id.to_string(), "vegan": "yes"})).is_err());
    }

    #[test]
    fn test_parse_identity() {
        let id = Uuid::now_v7();
        assert_eq!(parse_identity(&json!(id.to_string())).unwrap(), id);
        assert!(parse_identity(&json!({"id": id.to_string()})).is_err());
        assert!(parse_identity(&json!(7)).is_err());
    }

    #[test]
    fn test_float_accepts_integers() {
        assert!(FieldType::Float.accepts(&json!(3)));
        assert!(FieldType::Float.accepts(&json!(3.5)));
        assert!(!FieldType::Integer.accepts(&json!(3.5)));
    }
}
