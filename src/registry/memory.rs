use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Instant;

use crate::errors::{ServiceError, ServiceResult};
use super::{Registration, RegistryBackend, ServiceIdentity};

struct Entry {
    registration: Registration,
    expires_at: Instant,
}

/// Process-local registry with TTL expiry.
///
/// `set_reachable(false)` makes every call fail with `RegistryUnavailable`,
/// and `expire` drops an entry as if its TTL had run out.
#[derive(Default)]
pub struct InMemoryRegistry {
    entries: Mutex<HashMap<String, Entry>>,
    unreachable: AtomicBool,
    calls: AtomicU64,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.unreachable.store(!reachable, Ordering::SeqCst);
    }

    pub fn expire(&self, identity: &ServiceIdentity) {
        self.lock().remove(&identity.instance_id());
    }

    pub fn is_registered(&self, identity: &ServiceIdentity) -> bool {
        self.registration(identity).is_some()
    }

    pub fn registration(&self, identity: &ServiceIdentity) -> Option<Registration> {
        let now = Instant::now();
        self.lock()
            .get(&identity.instance_id())
            .filter(|entry| entry.expires_at > now)
            .map(|entry| entry.registration.clone())
    }

    /// Number of backend calls made, failed ones included
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check_reachable(&self) -> ServiceResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(ServiceError::RegistryUnavailable("in-memory registry switched off".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl RegistryBackend for InMemoryRegistry {
    async fn register(&self, registration: &Registration) -> ServiceResult<()> {
        self.check_reachable()?;
        let entry = Entry {
            registration: registration.clone(),
            expires_at: Instant::now() + registration.ttl(),
        };
        self.lock().insert(registration.identity.instance_id(), entry);
        Ok(())
    }

    async fn heartbeat(&self, identity: &ServiceIdentity) -> ServiceResult<bool> {
        self.check_reachable()?;
        let now = Instant::now();
        let mut entries = self.lock();
        let key = identity.instance_id();

        let alive = match entries.get_mut(&key) {
            Some(entry) if entry.expires_at > now => {
                entry.expires_at = now + entry.registration.ttl();
                true
            }
            Some(_) => false,
            None => return Ok(false),
        };

        if !alive {
            entries.remove(&key);
        }
        Ok(alive)
    }

    async fn deregister(&self, identity: &ServiceIdentity) -> ServiceResult<()> {
        self.check_reachable()?;
        self.lock().remove(&identity.instance_id());
        Ok(())
    }

    async fn instances(&self, name: &str) -> ServiceResult<Vec<ServiceIdentity>> {
        self.check_reachable()?;
        let now = Instant::now();
        let mut found: Vec<ServiceIdentity> = self
            .lock()
            .values()
            .filter(|entry| entry.expires_at > now && entry.registration.identity.name == name)
            .map(|entry| entry.registration.identity.clone())
            .collect();
        found.sort_by_key(|identity| identity.instance_id());
        Ok(found)
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::time::Duration;

    fn registration(name: &str, port: u16) -> Registration {
        Registration::new(
            ServiceIdentity::new(name, "127.0.0.1", port),
            Duration::from_secs(30),
            BTreeMap::new(),
        )
    }

    #[tokio::test]
    async fn test_register_overwrites_same_instance() {
        let registry = InMemoryRegistry::new();
        let first = registration("svc", 8000);
        registry.register(&first).await.unwrap();
        registry.register(&first).await.unwrap();
        registry.register(&registration("svc", 8001)).await.unwrap();
        registry.register(&registration("other", 8000)).await.unwrap();

        let instances = registry.instances("svc").await.unwrap();
        assert_eq!(instances.len(), 2);
        assert_eq!(instances[0].port, 8000);
    }

    #[tokio::test]
    async fn test_heartbeat_after_expiry_reports_unregistered() {
        let registry = InMemoryRegistry::new();
        let reg = registration("svc", 8000);
        registry.register(&reg).await.unwrap();
        assert!(registry.heartbeat(&reg.identity).await.unwrap());

        registry.expire(&reg.identity);
        assert!(!registry.heartbeat(&reg.identity).await.unwrap());
        assert!(!registry.is_registered(&reg.identity));
    }

    #[tokio::test]
    async fn test_unreachable() {
        let registry = InMemoryRegistry::new();
        registry.set_reachable(false);

        let err = registry.register(&registration("svc", 8000)).await.unwrap_err();
        assert!(matches!(err, ServiceError::RegistryUnavailable(_)));
        assert_eq!(registry.calls(), 1);

        registry.set_reachable(true);
        registry.register(&registration("svc", 8000)).await.unwrap();
        assert_eq!(registry.calls(), 2);
    }
}
