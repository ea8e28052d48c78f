use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};

use nautilus::messaging::action_channel;
use nautilus::registry::{InMemoryRegistry, Registration, RegistryBackend, ServiceIdentity};
use nautilus::store::InMemoryModelStore;
use nautilus::{
    FieldDescriptor, FieldType, ModelSchema, ModelService, Service, ServiceConfig, ServiceError, ServiceResult,
};

/// Registry whose register call takes a while to answer
struct SlowRegistry {
    inner: InMemoryRegistry,
    delay: Duration,
}

#[async_trait]
impl RegistryBackend for SlowRegistry {
    async fn register(&self, registration: &Registration) -> ServiceResult<()> {
        tokio::time::sleep(self.delay).await;
        self.inner.register(registration).await
    }

    async fn heartbeat(&self, identity: &ServiceIdentity) -> ServiceResult<bool> {
        self.inner.heartbeat(identity).await
    }

    async fn deregister(&self, identity: &ServiceIdentity) -> ServiceResult<()> {
        self.inner.deregister(identity).await
    }

    async fn instances(&self, name: &str) -> ServiceResult<Vec<ServiceIdentity>> {
        self.inner.instances(name).await
    }

    fn backend_name(&self) -> &'static str {
        "slow"
    }
}

fn testmodel() -> (Arc<ModelSchema>, Arc<InMemoryModelStore>) {
    let schema = Arc::new(
        ModelSchema::builder("TestModel")
            .field(FieldDescriptor::new("name", FieldType::Text))
            .build()
            .unwrap(),
    );
    let store = Arc::new(InMemoryModelStore::new(schema.clone()));
    (schema, store)
}

fn registered_config(host: &str, port: u16) -> ServiceConfig {
    let mut config = ServiceConfig::local("");
    config.auto_register = true;
    config.host = host.to_string();
    config.port = port;
    config
}

#[tokio::test]
async fn test_stop_during_registration_ends_run() {
    let (schema, store) = testmodel();
    let registry = Arc::new(SlowRegistry {
        inner: InMemoryRegistry::new(),
        delay: Duration::from_millis(300),
    });
    let (_publisher, source) = action_channel(8);

    // the built-in HTTP listener, on any free port
    let service = Arc::new(
        ModelService::builder()
            .config(registered_config("127.0.0.1", 0))
            .model(schema, store)
            .action_source(Box::new(source))
            .registry(registry.clone())
            .build()
            .unwrap(),
    );

    let running = tokio::spawn({
        let service = service.clone();
        async move { service.run().await }
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    service.stop().await;

    let result = tokio::time::timeout(Duration::from_secs(3), running)
        .await
        .expect("run() kept serving after stop()")
        .unwrap();
    assert!(result.is_ok());

    let consumer = service.consumer().unwrap();
    assert!(!consumer.is_running());
    assert!(!service.registry().unwrap().is_registered());

    // nothing shows up once the abandoned registration would have finished
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(!registry.inner.is_registered(service.identity()));
}

#[tokio::test]
async fn test_stop_before_run() {
    let (schema, store) = testmodel();
    let registry = Arc::new(InMemoryRegistry::new());
    let service = ModelService::builder()
        .config(registered_config("127.0.0.1", 0))
        .model(schema, store)
        .action_source(Box::new(action_channel(8).1))
        .registry(registry.clone())
        .build()
        .unwrap();

    service.stop().await;
    let started = Instant::now();
    assert!(service.run().await.is_ok());
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(registry.calls(), 0);
}

#[tokio::test]
async fn test_listener_failure_releases_everything() {
    // keep the port busy so the listener cannot bind it
    let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = taken.local_addr().unwrap().port();

    let (schema, store) = testmodel();
    let registry = Arc::new(InMemoryRegistry::new());
    let (_publisher, source) = action_channel(8);
    let service = ModelService::builder()
        .config(registered_config("127.0.0.1", port))
        .model(schema, store)
        .action_source(Box::new(source))
        .registry(registry.clone())
        .build()
        .unwrap();

    let err = service.run().await.unwrap_err();
    assert!(matches!(err, ServiceError::Listener(_)));

    // registered during startup, then released on the way out
    assert!(registry.calls() > 0);
    assert!(!registry.is_registered(service.identity()));
    assert!(!service.consumer().unwrap().is_running());

    // a later stop() is harmless
    service.stop().await;
    drop(taken);
}

#[tokio::test]
async fn test_dispatch_through_the_service_publisher() {
    let (schema, store) = testmodel();
    let (publisher, source) = action_channel(8);

    let service = Arc::new(
        Service::builder("testmodel_service")
            .config(ServiceConfig::local("testmodel_service"))
            .model(schema.clone(), store.clone())
            .action_handler(Arc::new(nautilus::handlers::CrudActionHandler::new(store.clone())))
            .action_source(Box::new(source))
            .publisher(Arc::new(publisher))
            .listener(Arc::new(ParkedListener::default()))
            .build()
            .unwrap(),
    );

    let running = tokio::spawn({
        let service = service.clone();
        async move { service.run().await }
    });

    service.dispatch_action("create_testmodel", json!({"name": "foo"})).await.unwrap();
    for _ in 0..400 {
        if store.len().await == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(store.len().await, 1);

    service.stop().await;
    assert!(running.await.unwrap().is_ok());
}

#[tokio::test]
async fn test_dispatch_without_publisher_is_configuration_error() {
    let service = Service::builder("plain")
        .config(ServiceConfig::local("plain"))
        .build()
        .unwrap();
    let err = service.dispatch_action("anything", json!(null)).await.unwrap_err();
    assert!(matches!(err, ServiceError::Configuration(_)));
}

/// Serves nothing until stopped
#[derive(Default)]
struct ParkedListener {
    stopped: tokio::sync::Notify,
}

#[async_trait]
impl nautilus::listener::NetworkListener for ParkedListener {
    async fn run(&self, _host: &str, _port: u16) -> ServiceResult<()> {
        self.stopped.notified().await;
        Ok(())
    }

    async fn stop(&self) {
        self.stopped.notify_one();
    }
}
