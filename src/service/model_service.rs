use std::sync::Arc;

use crate::actors::HealthCheckable;
use crate::config::ServiceConfig;
use crate::conventions;
use crate::errors::{ServiceError, ServiceResult};
use crate::handlers::{ActionHandler, CompositeActionHandler, CrudActionHandler, DispatchOrder};
use crate::listener::NetworkListener;
use crate::messaging::{ActionPublisher, ActionSource};
use crate::metrics::Metrics;
use crate::models::ModelSchema;
use crate::registry::RegistryBackend;
use crate::store::ModelStore;
use super::{Service, ServiceBuilder};

/// A service built around one model: conventional name, query endpoint,
/// and a CRUD handler chained with an optional additional handler.
pub struct ModelService;

impl ModelService {
    pub fn builder() -> ModelServiceBuilder {
        ModelServiceBuilder {
            inner: ServiceBuilder::default(),
            model: None,
            additional: None,
            dispatch_order: DispatchOrder::default(),
            run_additional_on_crud_failure: true,
        }
    }
}

pub struct ModelServiceBuilder {
    inner: ServiceBuilder,
    model: Option<(Arc<ModelSchema>, Arc<dyn ModelStore>)>,
    additional: Option<Arc<dyn ActionHandler>>,
    dispatch_order: DispatchOrder,
    run_additional_on_crud_failure: bool,
}

impl ModelServiceBuilder {
    /// Defaults to `{model}_service`
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.inner = self.inner.name(name);
        self
    }

    pub fn config(mut self, config: ServiceConfig) -> Self {
        self.inner = self.inner.config(config);
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.inner = self.inner.metadata(key, value);
        self
    }

    pub fn model(mut self, schema: Arc<ModelSchema>, store: Arc<dyn ModelStore>) -> Self {
        self.model = Some((schema, store));
        self
    }

    /// Sees every action, CRUD or not
    pub fn additional_action_handler(mut self, handler: Arc<dyn ActionHandler>) -> Self {
        self.additional = Some(handler);
        self
    }

    pub fn dispatch_order(mut self, order: DispatchOrder) -> Self {
        self.dispatch_order = order;
        self
    }

    pub fn run_additional_on_crud_failure(mut self, enabled: bool) -> Self {
        self.run_additional_on_crud_failure = enabled;
        self
    }

    pub fn action_source(mut self, source: Box<dyn ActionSource>) -> Self {
        self.inner = self.inner.action_source(source);
        self
    }

    pub fn registry(mut self, backend: Arc<dyn RegistryBackend>) -> Self {
        self.inner = self.inner.registry(backend);
        self
    }

    pub fn publisher(mut self, publisher: Arc<dyn ActionPublisher>) -> Self {
        self.inner = self.inner.publisher(publisher);
        self
    }

    pub fn listener(mut self, listener: Arc<dyn NetworkListener>) -> Self {
        self.inner = self.inner.listener(listener);
        self
    }

    pub fn route<F>(mut self, route: F) -> Self
    where
        F: Fn(&mut actix_web::web::ServiceConfig) + Send + Sync + 'static,
    {
        self.inner = self.inner.route(route);
        self
    }

    pub fn health_check(mut self, check: Arc<dyn HealthCheckable>) -> Self {
        self.inner = self.inner.health_check(check);
        self
    }

    pub fn metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.inner = self.inner.metrics(metrics);
        self
    }

    pub fn build(self) -> ServiceResult<Service> {
        let Some((schema, store)) = self.model else {
            return Err(ServiceError::Configuration("a model service requires a model".to_string()));
        };

        let mut inner = self.inner;
        if !inner.has_name() {
            inner = inner.name(conventions::model_service_name(&schema));
        }

        let crud: Arc<dyn ActionHandler> = Arc::new(CrudActionHandler::new(store.clone()));
        let handler = CompositeActionHandler::new(crud, self.additional)
            .dispatch_order(self.dispatch_order)
            .run_additional_on_crud_failure(self.run_additional_on_crud_failure);

        inner.model(schema, store).action_handler(Arc::new(handler)).build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::action_channel;
    use crate::models::{FieldDescriptor, FieldType};
    use crate::store::InMemoryModelStore;

    fn model() -> (Arc<ModelSchema>, Arc<dyn ModelStore>) {
        let schema = Arc::new(
            ModelSchema::builder("Ingredient")
                .field(FieldDescriptor::new("name", FieldType::Text))
                .build()
                .unwrap(),
        );
        let store: Arc<dyn ModelStore> = Arc::new(InMemoryModelStore::new(schema.clone()));
        (schema, store)
    }

    #[test]
    fn test_model_is_required() {
        let err = ModelService::builder()
            .config(ServiceConfig::local(""))
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, ServiceError::Configuration(ref msg) if msg.contains("model")));
    }

    #[test]
    fn test_conventional_name() {
        let (schema, store) = model();
        let (_publisher, source) = action_channel(1);
        let service = ModelService::builder()
            .config(ServiceConfig::local(""))
            .model(schema, store)
            .action_source(Box::new(source))
            .build()
            .unwrap();
        assert_eq!(service.name(), "ingredient_service");
        assert!(service.consumer().is_some());
    }

    #[test]
    fn test_configured_name_wins() {
        let (schema, store) = model();
        let (_publisher, source) = action_channel(1);
        let service = ModelService::builder()
            .config(ServiceConfig::local("pantry"))
            .model(schema, store)
            .action_source(Box::new(source))
            .build()
            .unwrap();
        assert_eq!(service.name(), "pantry");
    }
}
