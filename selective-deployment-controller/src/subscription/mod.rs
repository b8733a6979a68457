use std::{collections::HashMap, fmt::Debug, sync::Arc};

use async_trait::async_trait;
use futures::StreamExt;
use kube::{
    runtime::{
        reflector::ObjectRef,
        watcher::{self, watcher, Event},
        WatchStreamExt,
    },
    Api, Resource,
};
use log::{debug, info, warn};
use selective_deployment_core::helpers::object_key;
use serde::de::DeserializeOwned;
use tokio::sync::watch;

use self::cache::{Cache, CacheError};

pub mod cache;

#[derive(Debug)]
pub enum ResourceEvent<K> {
    Added(Arc<K>),
    Updated { old: Arc<K>, new: Arc<K> },
    Deleted(Arc<K>),
}

impl<K> ResourceEvent<K> {
    pub fn map<T>(self, f: impl Fn(&K) -> T) -> ResourceEvent<T> {
        match self {
            ResourceEvent::Added(object) => ResourceEvent::Added(Arc::new(f(&object))),
            ResourceEvent::Updated { old, new } => ResourceEvent::Updated {
                old: Arc::new(f(&old)),
                new: Arc::new(f(&new)),
            },
            ResourceEvent::Deleted(object) => ResourceEvent::Deleted(Arc::new(f(&object))),
        }
    }
}

#[async_trait]
pub trait EventHandler<K>: Send + Sync {
    async fn handle(&self, event: ResourceEvent<K>);
}

/// Keeps a cache of one resource kind in sync with the cluster and turns raw
/// watch events into add/update/delete notifications.
pub struct Subscription<K: Resource<DynamicType = ()> + 'static> {
    cache: Cache<K>,
}

impl<K> Subscription<K>
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
{
    pub fn new(cache: Cache<K>) -> Self {
        Self { cache }
    }

    pub fn cache(&self) -> Cache<K> {
        self.cache.clone()
    }

    /// Flips to `true` once the initial listing has been cached.
    pub fn synced(&self) -> watch::Receiver<bool> {
        self.cache.synced()
    }

    /// Stores the event and reports it to `handler`. Previous versions are
    /// read from the store before it is written.
    pub async fn apply(
        &self,
        event: Event<K>,
        handler: &dyn EventHandler<K>,
    ) -> Result<(), CacheError> {
        match event {
            Event::Applied(object) => {
                if !self.is_keyed(&object) {
                    return Ok(());
                }

                let old = self.cache.get(&ObjectRef::from_obj(&object));
                let new = Arc::new(object);
                self.cache.apply(&Event::Applied(K::clone(&new)))?;

                let event = match old {
                    Some(old) => ResourceEvent::Updated { old, new },
                    None => ResourceEvent::Added(new),
                };
                handler.handle(event).await;
            }
            Event::Deleted(object) => {
                if !self.is_keyed(&object) {
                    return Ok(());
                }

                let old = self.cache.get(&ObjectRef::from_obj(&object));
                self.cache.apply(&Event::Deleted(object.clone()))?;

                let last_known = old.unwrap_or_else(|| Arc::new(object));
                handler.handle(ResourceEvent::Deleted(last_known)).await;
            }
            Event::Restarted(objects) => {
                let objects: Vec<K> = objects
                    .into_iter()
                    .filter(|object| self.is_keyed(object))
                    .collect();
                let mut before: HashMap<ObjectRef<K>, Arc<K>> = self
                    .cache
                    .list()
                    .into_iter()
                    .map(|object| (ObjectRef::from_obj(&*object), object))
                    .collect();

                let event = Event::Restarted(objects);
                self.cache.apply(&event)?;

                if let Event::Restarted(objects) = event {
                    for object in objects {
                        let new = Arc::new(object);
                        let event = match before.remove(&ObjectRef::from_obj(&*new)) {
                            Some(old) => ResourceEvent::Updated { old, new },
                            None => ResourceEvent::Added(new),
                        };
                        handler.handle(event).await;
                    }
                }

                for (_, gone) in before {
                    handler.handle(ResourceEvent::Deleted(gone)).await;
                }

                if !self.cache.mark_synced() {
                    info!("{} cache synchronized!", self.cache.kind());
                }
            }
        }

        Ok(())
    }

    fn is_keyed(&self, object: &K) -> bool {
        let keyed = object_key(object).is_some();
        if !keyed {
            debug!("Ignoring a {} event without a name!", self.cache.kind());
        }

        keyed
    }

    /// Drives the watch until `stop` fires. Failed polls are retried with the
    /// watcher's default backoff.
    pub async fn run(
        self,
        api: Api<K>,
        handler: Arc<dyn EventHandler<K>>,
        mut stop: watch::Receiver<bool>,
    ) {
        let kind = self.cache.kind();
        let mut stream = watcher(api, watcher::Config::default())
            .backoff(watcher::default_backoff())
            .boxed();

        info!("Starting {kind} subscription...");

        while !*stop.borrow() {
            tokio::select! {
                _ = stop.changed() => break,
                event = stream.next() => match event {
                    Some(Ok(event)) => {
                        if let Err(err) = self.apply(event, handler.as_ref()).await {
                            warn!("Couldn't apply {kind} event! {err:#?}");
                        }
                    }
                    Some(Err(err)) => warn!("{kind} watch failed, backing off! {err:#?}"),
                    None => break,
                }
            }
        }

        info!("{kind} subscription stopped!");
    }
}
