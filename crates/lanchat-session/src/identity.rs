//! The device's own identity, persisted under [`LOCAL_USER_KEY`].

use lanchat_shared::constants::{DEFAULT_NAME_PREFIX, LOCAL_USER_KEY};
use lanchat_shared::PeerId;
use lanchat_store::{KeyValueStore, KeyValueStoreExt, StoreError};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalIdentity {
    pub id: PeerId,
    pub name: String,
}

impl LocalIdentity {
    /// Fresh random id with a `User-xxxx` placeholder name.
    pub fn generate() -> Self {
        let suffix: u16 = rand::thread_rng().gen_range(0..10_000);
        Self {
            id: PeerId::generate(),
            name: format!("{DEFAULT_NAME_PREFIX}{suffix:04}"),
        }
    }
}

/// Loads and persists the [`LocalIdentity`].
///
/// A storage failure never surfaces to the caller: the identity is kept in
/// memory for the rest of the session instead.
pub struct IdentityStore {
    store: Box<dyn KeyValueStore>,
    cached: Option<LocalIdentity>,
}

impl IdentityStore {
    pub fn new(store: Box<dyn KeyValueStore>) -> Self {
        Self {
            store,
            cached: None,
        }
    }

    /// Read the persisted identity, creating one on first use.
    ///
    /// Repeated calls return the same identity until [`rename`](Self::rename).
    pub fn load(&mut self) -> LocalIdentity {
        if let Some(identity) = &self.cached {
            return identity.clone();
        }

        let identity = match self.store.get_json::<LocalIdentity>(LOCAL_USER_KEY) {
            Ok(Some(identity)) if !identity.id.as_str().is_empty() => {
                info!(id = %identity.id.short(), name = %identity.name, "Loaded local identity");
                identity
            }
            Ok(_) => self.create(),
            Err(StoreError::Serialization(e)) => {
                warn!(error = %e, "Stored identity is unreadable, replacing it");
                self.create()
            }
            Err(e) => {
                warn!(error = %e, "Identity storage unavailable, using in-memory identity");
                LocalIdentity::generate()
            }
        };

        self.cached = Some(identity.clone());
        identity
    }

    /// Change the display name and persist it. The id never changes.
    pub fn rename(&mut self, name: &str) -> LocalIdentity {
        let mut identity = self.load();
        identity.name = name.to_string();
        self.persist(&identity);
        self.cached = Some(identity.clone());
        identity
    }

    fn create(&self) -> LocalIdentity {
        let identity = LocalIdentity::generate();
        info!(id = %identity.id.short(), name = %identity.name, "Created local identity");
        self.persist(&identity);
        identity
    }

    fn persist(&self, identity: &LocalIdentity) {
        if let Err(e) = self.store.set_json(LOCAL_USER_KEY, identity) {
            warn!(error = %e, "Failed to persist local identity");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use lanchat_store::{Database, MemoryStore};

    use super::*;

    struct BrokenStore;

    impl KeyValueStore for BrokenStore {
        fn get(&self, _key: &str) -> lanchat_store::Result<Option<String>> {
            Err(StoreError::Unavailable("disk gone".into()))
        }

        fn set(&self, _key: &str, _value: &str) -> lanchat_store::Result<()> {
            Err(StoreError::Unavailable("disk gone".into()))
        }
    }

    /// Counts writes to an inner memory store.
    struct CountingStore {
        inner: MemoryStore,
        writes: Arc<AtomicUsize>,
    }

    impl KeyValueStore for CountingStore {
        fn get(&self, key: &str) -> lanchat_store::Result<Option<String>> {
            self.inner.get(key)
        }

        fn set(&self, key: &str, value: &str) -> lanchat_store::Result<()> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            self.inner.set(key, value)
        }
    }

    #[test]
    fn test_generated_name_has_prefix() {
        let identity = LocalIdentity::generate();
        assert!(identity.name.starts_with(DEFAULT_NAME_PREFIX));
        assert_eq!(identity.name.len(), DEFAULT_NAME_PREFIX.len() + 4);
    }

    #[test]
    fn test_load_is_idempotent() {
        let mut store = IdentityStore::new(Box::new(MemoryStore::new()));
        let first = store.load();
        let second = store.load();
        assert_eq!(first, second);
    }

    #[test]
    fn test_rename_persists_once_and_keeps_id() {
        let writes = Arc::new(AtomicUsize::new(0));
        let mut store = IdentityStore::new(Box::new(CountingStore {
            inner: MemoryStore::new(),
            writes: writes.clone(),
        }));

        let original = store.load();
        assert_eq!(writes.load(Ordering::SeqCst), 1);

        let renamed = store.rename("Alice");
        assert_eq!(writes.load(Ordering::SeqCst), 2);
        assert_eq!(renamed.id, original.id);
        assert_eq!(renamed.name, "Alice");
        assert_eq!(store.load(), renamed);
    }

    #[test]
    fn test_identity_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lanchat.db");

        let first = {
            let mut store = IdentityStore::new(Box::new(Database::open_at(&path).unwrap()));
            store.load();
            store.rename("Bob")
        };

        let mut store = IdentityStore::new(Box::new(Database::open_at(&path).unwrap()));
        assert_eq!(store.load(), first);
    }

    #[test]
    fn test_corrupt_record_is_replaced_and_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lanchat.db");
        Database::open_at(&path)
            .unwrap()
            .set(LOCAL_USER_KEY, "{not json")
            .unwrap();

        let created = IdentityStore::new(Box::new(Database::open_at(&path).unwrap())).load();
        let reloaded = IdentityStore::new(Box::new(Database::open_at(&path).unwrap())).load();
        assert_eq!(reloaded, created);
    }

    #[test]
    fn test_broken_storage_degrades_to_memory() {
        let mut store = IdentityStore::new(Box::new(BrokenStore));
        let identity = store.load();
        assert_eq!(store.load(), identity);

        let renamed = store.rename("Carol");
        assert_eq!(renamed.id, identity.id);
        assert_eq!(store.load().name, "Carol");
    }
}
