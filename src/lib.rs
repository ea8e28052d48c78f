//! Microservice scaffolding: declare a model, get a registered network
//! service with a query API and a background consumer that applies CRUD
//! actions from a message bus.

pub mod actors;
pub mod config;
pub mod consumer;
pub mod conventions;
pub mod errors;
pub mod handlers;
pub mod listener;
pub mod messaging;
pub mod metrics;
pub mod models;
pub mod registry;
pub mod service;
pub mod store;
pub mod utils;

pub use crate::config::ServiceConfig;
pub use errors::{ServiceError, ServiceResult};
pub use handlers::{ActionHandler, ActionOutcome, FnActionHandler};
pub use messaging::{ActionMessage, ActionPublisher, ActionSource};
pub use models::{FieldDescriptor, FieldType, ModelSchema, Record, RecordId};
pub use service::{ModelService, Service, ServiceBuilder};
