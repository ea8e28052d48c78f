use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use std::time::Duration;
use tokio::sync::OnceCell;

use crate::errors::{ServiceError, ServiceResult};
use super::{Registration, RegistryBackend, ServiceIdentity};

// ============================================================================
// Redis Registry
// ============================================================================
//
// One key per instance, holding the registration as JSON:
//
//   nautilus:services:{name}:{instance_id}   (SET ... EX ttl)
//
// Heartbeat refreshes the TTL with EXPIRE; a 0 reply means the key is gone.
// Discovery SCANs nautilus:services:{name}:* (glob characters in the name
// escaped) and keeps only registrations whose name matches exactly.
//
// The connection is opened by the first command. A failed connect leaves
// nothing cached, so the next command (usually the keep-alive) tries again.
//
// ============================================================================

const KEY_PREFIX: &str = "nautilus:services";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

pub struct RedisRegistry {
    client: redis::Client,
    connection: OnceCell<MultiplexedConnection>,
    connect_timeout: Duration,
    /// TTL applied on heartbeat, keyed by instance id
    ttls: std::sync::Mutex<std::collections::HashMap<String, u64>>,
}

fn unavailable(context: &str, e: redis::RedisError) -> ServiceError {
    ServiceError::RegistryUnavailable(format!("Redis {} failed: {}", context, e))
}

fn key(identity: &ServiceIdentity) -> String {
    format!("{}:{}:{}", KEY_PREFIX, identity.name, identity.instance_id())
}

/// SCAN MATCH pattern for every instance of `name`
fn pattern(name: &str) -> String {
    let mut escaped = String::with_capacity(name.len());
    for c in name.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    format!("{}:{}:*", KEY_PREFIX, escaped)
}

/// Registrations stored for `name`; a longer name sharing the prefix
/// (`orders` vs `orders:audit`) matches the pattern too and is dropped here
fn select_instances(name: &str, values: Vec<(String, String)>) -> Vec<ServiceIdentity> {
    let mut found: Vec<ServiceIdentity> = values
        .into_iter()
        .filter_map(|(key, value)| match serde_json::from_str::<Registration>(&value) {
            Ok(registration) => Some(registration.identity),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Skipping unreadable registration");
                None
            }
        })
        .filter(|identity| identity.name == name)
        .collect();
    found.sort_by_key(|identity| identity.instance_id());
    found
}

impl RedisRegistry {
    /// Validates the URL only; no connection is made until the first command
    pub fn new(url: &str) -> ServiceResult<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| ServiceError::Configuration(format!("invalid Redis URL: {}", e)))?;

        Ok(Self {
            client,
            connection: OnceCell::new(),
            connect_timeout: CONNECT_TIMEOUT,
            ttls: Default::default(),
        })
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    async fn connection(&self) -> ServiceResult<MultiplexedConnection> {
        let connection = self
            .connection
            .get_or_try_init(|| async {
                let connection = tokio::time::timeout(self.connect_timeout, self.client.get_multiplexed_async_connection())
                    .await
                    .map_err(|_| {
                        ServiceError::RegistryUnavailable(format!(
                            "Redis connect timed out after {}ms",
                            self.connect_timeout.as_millis()
                        ))
                    })?
                    .map_err(|e| unavailable("connect", e))?;
                tracing::debug!("Redis registry connected");
                Ok::<_, ServiceError>(connection)
            })
            .await?;
        Ok(connection.clone())
    }

    fn ttl_for(&self, identity: &ServiceIdentity) -> Option<u64> {
        self.ttls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&identity.instance_id())
            .copied()
    }
}

#[async_trait]
impl RegistryBackend for RedisRegistry {
    async fn register(&self, registration: &Registration) -> ServiceResult<()> {
        let mut conn = self.connection().await?;
        let value = serde_json::to_string(registration)
            .map_err(|e| ServiceError::Configuration(format!("unserializable registration: {}", e)))?;

        redis::cmd("SET")
            .arg(key(&registration.identity))
            .arg(value)
            .arg("EX")
            .arg(registration.ttl_secs)
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| unavailable("SET", e))?;

        self.ttls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(registration.identity.instance_id(), registration.ttl_secs);
        Ok(())
    }

    async fn heartbeat(&self, identity: &ServiceIdentity) -> ServiceResult<bool> {
        // never registered through this backend
        let Some(ttl) = self.ttl_for(identity) else {
            return Ok(false);
        };

        let mut conn = self.connection().await?;
        let refreshed: i64 = redis::cmd("EXPIRE")
            .arg(key(identity))
            .arg(ttl)
            .query_async(&mut conn)
            .await
            .map_err(|e| unavailable("EXPIRE", e))?;

        Ok(refreshed == 1)
    }

    async fn deregister(&self, identity: &ServiceIdentity) -> ServiceResult<()> {
        let mut conn = self.connection().await?;
        redis::cmd("DEL")
            .arg(key(identity))
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| unavailable("DEL", e))?;

        self.ttls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&identity.instance_id());
        Ok(())
    }

    async fn instances(&self, name: &str) -> ServiceResult<Vec<ServiceIdentity>> {
        let mut conn = self.connection().await?;
        let pattern = pattern(name);
        let mut keys = Vec::new();
        let mut cursor: u64 = 0;

        loop {
            let (next_cursor, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await
                .map_err(|e| unavailable("SCAN", e))?;

            keys.extend(batch);
            cursor = next_cursor;
            if cursor == 0 {
                break;
            }
        }

        let mut values = Vec::new();
        for key in keys {
            let value: Option<String> = redis::cmd("GET")
                .arg(&key)
                .query_async(&mut conn)
                .await
                .map_err(|e| unavailable("GET", e))?;

            // expired between SCAN and GET
            if let Some(value) = value {
                values.push((key, value));
            }
        }

        Ok(select_instances(name, values))
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}
