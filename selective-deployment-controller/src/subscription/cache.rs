use std::sync::{Arc, Mutex};

use kube::{
    runtime::{
        reflector::{self, store::Writer, ObjectRef, Store},
        watcher::Event,
    },
    Resource,
};
use thiserror::Error;
use tokio::sync::watch;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("{} cache hasn't received its initial listing yet!", .0)]
    Unsynced(&'static str),
    #[error("Cache writer of {} was poisoned!", .0)]
    Poisoned(&'static str),
}

/// Read access to cached objects, keyed by `namespace/name`.
pub trait ObjectCache<K>: Send + Sync {
    fn get_by_key(&self, key: &str) -> Result<Option<Arc<K>>, CacheError>;
}

/// Reflector store of one resource kind. Clones share the store, its writer
/// and the sync flag.
pub struct Cache<K: Resource<DynamicType = ()> + 'static> {
    kind: &'static str,
    store: Store<K>,
    writer: Arc<Mutex<Writer<K>>>,
    synced: Arc<watch::Sender<bool>>,
}

impl<K: Resource<DynamicType = ()> + Clone + 'static> Clone for Cache<K> {
    fn clone(&self) -> Self {
        Self {
            kind: self.kind,
            store: self.store.clone(),
            writer: self.writer.clone(),
            synced: self.synced.clone(),
        }
    }
}

impl<K> Cache<K>
where
    K: Resource<DynamicType = ()> + Clone + 'static,
{
    pub fn new(kind: &'static str) -> Self {
        let (store, writer) = reflector::store();
        let (synced, _) = watch::channel(false);

        Self {
            kind,
            store,
            writer: Arc::new(Mutex::new(writer)),
            synced: Arc::new(synced),
        }
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    pub fn get(&self, key: &ObjectRef<K>) -> Option<Arc<K>> {
        self.store.get(key)
    }

    pub fn list(&self) -> Vec<Arc<K>> {
        self.store.state()
    }

    pub fn apply(&self, event: &Event<K>) -> Result<(), CacheError> {
        self.writer
            .lock()
            .map_err(|_| CacheError::Poisoned(self.kind))?
            .apply_watcher_event(event);

        Ok(())
    }

    /// Flips to `true` once the initial listing has been stored.
    pub fn synced(&self) -> watch::Receiver<bool> {
        self.synced.subscribe()
    }

    pub fn is_synced(&self) -> bool {
        *self.synced.borrow()
    }

    /// Returns whether the cache had already been synced.
    pub fn mark_synced(&self) -> bool {
        self.synced.send_replace(true)
    }

    #[cfg(test)]
    pub fn insert(&self, object: K) {
        self.apply(&Event::Applied(object)).unwrap();
    }

    #[cfg(test)]
    pub fn remove(&self, object: K) {
        self.apply(&Event::Deleted(object)).unwrap();
    }
}

impl<K> ObjectCache<K> for Cache<K>
where
    K: Resource<DynamicType = ()> + Clone + Send + Sync + 'static,
{
    fn get_by_key(&self, key: &str) -> Result<Option<Arc<K>>, CacheError> {
        if !self.is_synced() {
            return Err(CacheError::Unsynced(self.kind));
        }

        let reference = match key.split_once('/') {
            Some((namespace, name)) => ObjectRef::new(name).within(namespace),
            None => ObjectRef::new(key),
        };

        Ok(self.get(&reference))
    }
}
