use std::{fmt::Debug, sync::Arc, time::Duration};

use futures::future::{join_all, pending};
use k8s_openapi::api::{
    apps::v1::{DaemonSet, Deployment, StatefulSet},
    core::v1::Node,
};
use kube::{Api, Client, Resource};
use log::{info, warn};
use selective_deployment_core::{
    kubernetes::GetApi, resources::crd::v1alpha::selectivedeployment::SelectiveDeployment,
};
use serde::de::DeserializeOwned;
use tokio::{sync::watch, task::JoinHandle, time::timeout};

use crate::{
    config::EngineConfig,
    dispatcher::{ownership::OwnershipDispatcher, Dispatcher},
    engine::{
        writer::{KubeWorkloadWriter, WorkloadWriter},
        Caches, Engine,
    },
    error::EngineError,
    subscription::{cache::Cache, EventHandler, Subscription},
};

type SyncSignal = (&'static str, watch::Receiver<bool>);

pub async fn main_controller(
    client: Client,
    config: EngineConfig,
    stop: watch::Receiver<bool>,
) -> Result<(), EngineError> {
    let caches = Caches::default();
    let dispatcher = Arc::new(OwnershipDispatcher::new(caches.clone()));
    let writer = Arc::new(KubeWorkloadWriter::new(client.clone()));

    run_engine(client, config, caches, dispatcher, writer, stop).await
}

/// Starts every subscription, waits for the caches and then runs the worker
/// until `stop` fires. Work still queued at that point is abandoned.
pub async fn run_engine(
    client: Client,
    config: EngineConfig,
    caches: Caches,
    dispatcher: Arc<dyn Dispatcher>,
    writer: Arc<dyn WorkloadWriter>,
    stop: watch::Receiver<bool>,
) -> Result<(), EngineError> {
    dispatcher
        .init()
        .await
        .map_err(EngineError::DispatcherError)?;

    let engine = Arc::new(Engine::new(config.clone(), caches.clone(), dispatcher, writer));
    let namespace = config.namespace.as_deref();

    let (tasks, signals): (Vec<_>, Vec<_>) = [
        spawn_subscription::<SelectiveDeployment>(
            client.scoped_api(namespace),
            caches.selective_deployments,
            &engine,
            &stop,
        ),
        spawn_subscription::<Node>(client.global_api(), caches.nodes, &engine, &stop),
        spawn_subscription::<Deployment>(
            client.scoped_api(namespace),
            caches.deployments,
            &engine,
            &stop,
        ),
        spawn_subscription::<DaemonSet>(
            client.scoped_api(namespace),
            caches.daemon_sets,
            &engine,
            &stop,
        ),
        spawn_subscription::<StatefulSet>(
            client.scoped_api(namespace),
            caches.stateful_sets,
            &engine,
            &stop,
        ),
    ]
    .into_iter()
    .unzip();

    let synced = match wait_for_sync(&signals, config.sync_timeout, stop.clone()).await {
        Ok(synced) => synced,
        Err(err) => {
            tasks.iter().for_each(JoinHandle::abort);
            return Err(err);
        }
    };

    if synced {
        engine.run_worker(stop).await;
    }
    engine.queue().shut_down();

    for result in join_all(tasks).await {
        if let Err(err) = result {
            warn!("Subscription task failed! {err:#?}");
        }
    }

    Ok(())
}

fn spawn_subscription<K>(
    api: Api<K>,
    cache: Cache<K>,
    engine: &Arc<Engine>,
    stop: &watch::Receiver<bool>,
) -> (JoinHandle<()>, SyncSignal)
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
    Engine: EventHandler<K>,
{
    let subscription = Subscription::new(cache);
    let kind = subscription.cache().kind();
    let synced = subscription.synced();
    let handler: Arc<dyn EventHandler<K>> = engine.clone();

    let task = tokio::spawn(subscription.run(api, handler, stop.clone()));

    (task, (kind, synced))
}

/// Resolves to `false` when `stop` fires before every cache is synced.
async fn wait_for_sync(
    signals: &[SyncSignal],
    sync_timeout: Duration,
    stop: watch::Receiver<bool>,
) -> Result<bool, EngineError> {
    info!("Waiting for caches to synchronize...");

    let waits = signals.iter().map(|(_, synced)| wait_for_true(synced.clone()));

    tokio::select! {
        _ = wait_for_true(stop) => {
            info!("Stopped before the caches synchronized!");
            return Ok(false);
        }
        _ = timeout(sync_timeout, join_all(waits)) => (),
    }

    let unsynced: Vec<_> = signals
        .iter()
        .filter(|(_, synced)| !*synced.borrow())
        .map(|(kind, _)| *kind)
        .collect();

    if !unsynced.is_empty() {
        return Err(EngineError::CacheSync(sync_timeout, unsynced));
    }

    info!("All caches synchronized!");

    Ok(true)
}

/// Never resolves if the sender is dropped before sending `true`.
async fn wait_for_true(mut receiver: watch::Receiver<bool>) {
    while !*receiver.borrow_and_update() {
        if receiver.changed().await.is_err() {
            pending::<()>().await;
        }
    }
}
