use crate::models::ModelSchema;

// ============================================================================
// Naming Conventions
// ============================================================================
//
// CRUD action types are "<method>_<model>", with the model name lower-cased:
//   create_ingredient, update_ingredient, delete_ingredient
//
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrudMethod {
    Create,
    Update,
    Delete,
}

impl CrudMethod {
    pub const ALL: [CrudMethod; 3] = [CrudMethod::Create, CrudMethod::Update, CrudMethod::Delete];

    pub fn as_str(&self) -> &'static str {
        match self {
            CrudMethod::Create => "create",
            CrudMethod::Update => "update",
            CrudMethod::Delete => "delete",
        }
    }
}

/// Lower-cased model name used inside action types and service names
pub fn model_key(model: &ModelSchema) -> String {
    model.name().to_lowercase()
}

pub fn get_crud_action(method: CrudMethod, model: &ModelSchema) -> String {
    format!("{}_{}", method.as_str(), model_key(model))
}

/// Reverse of [`get_crud_action`]: which CRUD method, if any, an action type
/// triggers for this model. Matching is exact.
pub fn parse_crud_action(action_type: &str, model: &ModelSchema) -> Option<CrudMethod> {
    CrudMethod::ALL
        .into_iter()
        .find(|method| get_crud_action(*method, model) == action_type)
}

pub fn model_service_name(model: &ModelSchema) -> String {
    format!("{}_service", model_key(model))
}
