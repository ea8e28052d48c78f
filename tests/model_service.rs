use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

use nautilus::listener::NetworkListener;
use nautilus::messaging::action_channel;
use nautilus::registry::{InMemoryRegistry, ServiceIdentity};
use nautilus::store::{InMemoryModelStore, ModelStore};
use nautilus::{
    ActionPublisher, FieldDescriptor, FieldType, FnActionHandler, ModelSchema, ModelService, ServiceConfig,
    ServiceError, ServiceResult,
};

/// Stands in for the HTTP listener: serves nothing until stopped
#[derive(Default)]
struct ParkedListener {
    stopped: Notify,
}

#[async_trait]
impl NetworkListener for ParkedListener {
    async fn run(&self, _host: &str, _port: u16) -> ServiceResult<()> {
        self.stopped.notified().await;
        Ok(())
    }

    async fn stop(&self) {
        self.stopped.notify_one();
    }
}

fn testmodel() -> Arc<ModelSchema> {
    Arc::new(
        ModelSchema::builder("TestModel")
            .field(FieldDescriptor::new("name", FieldType::Text))
            .build()
            .unwrap(),
    )
}

fn registered_config() -> ServiceConfig {
    let mut config = ServiceConfig::local("");
    config.auto_register = true;
    config
}

fn by_name(name: &str) -> Map<String, Value> {
    let mut filter = Map::new();
    filter.insert("name".to_string(), json!(name));
    filter
}

async fn wait_for(mut condition: impl FnMut() -> bool) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}

/// Waits until `expected` records match `name` (all records when `None`)
async fn wait_for_records(store: &InMemoryModelStore, name: Option<&str>, expected: usize) {
    for _ in 0..400 {
        let found = match name {
            Some(name) => store.find(&by_name(name), None).await.unwrap().len(),
            None => store.len().await,
        };
        if found == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("store never reached {} records", expected);
}

#[tokio::test]
async fn test_missing_model_fails_before_registry_is_touched() {
    let registry = Arc::new(InMemoryRegistry::new());

    let err = ModelService::builder()
        .config(registered_config())
        .registry(registry.clone())
        .build()
        .err()
        .unwrap();

    assert!(matches!(err, ServiceError::Configuration(_)));
    assert_eq!(registry.calls(), 0);
}

#[tokio::test]
async fn test_crud_actions_through_the_bus() {
    let schema = testmodel();
    let store = Arc::new(InMemoryModelStore::new(schema.clone()));
    let registry = Arc::new(InMemoryRegistry::new());
    let (publisher, source) = action_channel(16);

    let spy_calls = Arc::new(Mutex::new(Vec::new()));
    let recorder = spy_calls.clone();
    let spy = FnActionHandler::new(move |action_type, payload| {
        recorder.lock().unwrap().push((action_type.to_string(), payload.clone()));
        Ok(())
    });

    let service = Arc::new(
        ModelService::builder()
            .config(registered_config())
            .model(schema, store.clone())
            .additional_action_handler(Arc::new(spy))
            .action_source(Box::new(source))
            .registry(registry.clone())
            .listener(Arc::new(ParkedListener::default()))
            .build()
            .unwrap(),
    );
    assert_eq!(service.name(), "testmodel_service");

    let running = tokio::spawn({
        let service = service.clone();
        async move { service.run().await }
    });

    let identity = ServiceIdentity::new("testmodel_service", "127.0.0.1", 8000);
    wait_for(|| registry.is_registered(&identity)).await;

    // create
    publisher.dispatch_action("create_testmodel", json!({"name": "foo"})).await.unwrap();
    wait_for_records(&store, Some("foo"), 1).await;
    let id = store.find(&by_name("foo"), None).await.unwrap()[0].id;

    // update
    publisher
        .dispatch_action("update_testmodel", json!({"id": id.to_string(), "name": "barz"}))
        .await
        .unwrap();
    wait_for_records(&store, Some("barz"), 1).await;
    assert!(store.find(&by_name("foo"), None).await.unwrap().is_empty());

    // delete takes the bare id
    publisher.dispatch_action("delete_testmodel", json!(id.to_string())).await.unwrap();
    wait_for_records(&store, None, 0).await;

    // non-CRUD actions reach the additional handler only
    publisher.dispatch_action("asdf", json!("asdf")).await.unwrap();
    wait_for(|| spy_calls.lock().unwrap().len() == 4).await;

    let calls = spy_calls.lock().unwrap().clone();
    let action_types: Vec<&str> = calls.iter().map(|(action_type, _)| action_type.as_str()).collect();
    assert_eq!(
        action_types,
        vec!["create_testmodel", "update_testmodel", "delete_testmodel", "asdf"]
    );
    assert_eq!(calls[3], ("asdf".to_string(), json!("asdf")));

    service.stop().await;
    assert!(running.await.unwrap().is_ok());
    assert!(!registry.is_registered(&identity));
}

#[tokio::test]
async fn test_invalid_action_does_not_stop_the_service() {
    let schema = testmodel();
    let store = Arc::new(InMemoryModelStore::new(schema.clone()));
    let (publisher, source) = action_channel(16);

    let service = Arc::new(
        ModelService::builder()
            .config(ServiceConfig::local("kitchen"))
            .model(schema, store.clone())
            .action_source(Box::new(source))
            .listener(Arc::new(ParkedListener::default()))
            .build()
            .unwrap(),
    );

    let running = tokio::spawn({
        let service = service.clone();
        async move { service.run().await }
    });

    publisher.dispatch_action("create_testmodel", json!({"colour": "red"})).await.unwrap();
    publisher
        .dispatch_action("delete_testmodel", json!(uuid::Uuid::now_v7().to_string()))
        .await
        .unwrap();
    publisher.dispatch_action("create_testmodel", json!({"name": "ok"})).await.unwrap();

    wait_for_records(&store, None, 1).await;
    let consumer = service.consumer().unwrap();
    wait_for(|| consumer.failed() == 2).await;

    service.stop().await;
    assert!(running.await.unwrap().is_ok());
}

#[tokio::test]
async fn test_unreachable_registry_is_not_fatal() {
    let schema = testmodel();
    let store = Arc::new(InMemoryModelStore::new(schema.clone()));
    let registry = Arc::new(InMemoryRegistry::new());
    registry.set_reachable(false);
    let (publisher, source) = action_channel(16);

    let service = Arc::new(
        ModelService::builder()
            .config(registered_config())
            .model(schema, store.clone())
            .action_source(Box::new(source))
            .registry(registry.clone())
            .listener(Arc::new(ParkedListener::default()))
            .build()
            .unwrap(),
    );

    let running = tokio::spawn({
        let service = service.clone();
        async move { service.run().await }
    });

    publisher.dispatch_action("create_testmodel", json!({"name": "foo"})).await.unwrap();
    wait_for_records(&store, None, 1).await;
    assert!(!service.registry().unwrap().is_registered());

    // deregistration errors are swallowed
    service.stop().await;
    assert!(running.await.unwrap().is_ok());
}
