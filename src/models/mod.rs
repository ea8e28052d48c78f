// ============================================================================
// Model Layer
// ============================================================================
//
// Explicit model declaration: a schema of typed field descriptors and the
// records stored under it. Persistence lives in crate::store.
//
// ============================================================================

pub mod record;
pub mod schema;

pub use record::{Record, RecordId};
pub use schema::{parse_identity, FieldDescriptor, FieldType, ModelSchema, ModelSchemaBuilder, ID_FIELD};
