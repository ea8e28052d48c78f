use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use nautilus::config::StoreBackendKind;
use nautilus::metrics::Metrics;
use nautilus::store::{InMemoryModelStore, ModelStore, ScyllaModelStore};
use nautilus::{FieldDescriptor, FieldType, FnActionHandler, ModelSchema, ModelService, ServiceConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Default to INFO level, can be overridden with RUST_LOG env var
    // Example: RUST_LOG=debug cargo run
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,nautilus=debug")))
        .init();

    tracing::info!("🚀 Starting ingredient service");

    // === 1. Configuration: defaults -> optional file -> NAUTILUS__* env ===
    let config_path = std::env::args().nth(1);
    let config = ServiceConfig::load(config_path.as_deref())?;

    // === 2. Model and store ===
    let schema = Arc::new(
        ModelSchema::builder("Ingredient")
            .field(FieldDescriptor::new("name", FieldType::Text).unique())
            .build()?,
    );

    let store: Arc<dyn ModelStore> = match config.store.backend {
        StoreBackendKind::Memory => Arc::new(InMemoryModelStore::new(schema.clone())),
        StoreBackendKind::Scylla => Arc::new(
            ScyllaModelStore::connect(&config.store.known_node, &config.store.keyspace, schema.clone()).await?,
        ),
    };

    // === 3. Service ===
    let metrics = Arc::new(Metrics::new()?);
    let service = ModelService::builder()
        .config(config.clone())
        .metrics(metrics.clone())
        .model(schema, store)
        .additional_action_handler(Arc::new(FnActionHandler::new(|action_type, payload| {
            tracing::debug!(action_type = %action_type, payload = %payload, "Observed action");
            Ok(())
        })))
        .build()?;
    let service = Arc::new(service);

    // === 4. Run until Ctrl-C ===
    let shutdown = {
        let service = service.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for Ctrl-C");
                return;
            }
            tracing::info!("Ctrl-C received, shutting down");
            service.stop().await;
        })
    };

    // with a bus configured, seed one record through the service's publisher
    if let Some(seed) = std::env::var("NAUTILUS_SEED_INGREDIENT").ok().filter(|_| config.bus.is_some()) {
        let service = service.clone();
        tokio::spawn(async move {
            // the publisher exists once run() is past startup
            while service.publisher().is_none() {
                tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            }
            let payload = serde_json::json!({ "name": seed });
            if let Err(e) = service.dispatch_action("create_ingredient", payload).await {
                tracing::warn!(error = %e, "Seed action not published");
            }
        });
    }

    // run() releases everything before returning, errors included
    let result = service.run().await;
    shutdown.abort();

    result?;
    tracing::info!("🎉 Ingredient service exited cleanly");
    Ok(())
}
