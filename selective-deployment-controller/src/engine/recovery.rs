//! Re-queues selective deployments when node health changes and heals
//! workloads that drifted away from, or vanished under, their owners.

use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::{
    apps::v1::{DaemonSet, Deployment, StatefulSet},
    core::v1::Node,
};
use log::{debug, info, warn};
use selective_deployment_core::{
    helpers::{format_key, object_key},
    resources::{
        crd::v1alpha::selectivedeployment::SelectiveDeployment,
        node::{classify_transition, ready_status, NodeTransition, ReadyStatus},
        workload::Workload,
    },
};

use crate::subscription::{cache::ObjectCache, EventHandler, ResourceEvent};

use super::{
    envelope::{Envelope, Operation},
    Engine,
};

/// Keys of running selective deployments that may want to expand onto a
/// node that just became available.
pub fn select_for_ready_node<'a>(
    objects: impl IntoIterator<Item = &'a SelectiveDeployment>,
) -> Vec<String> {
    objects
        .into_iter()
        .filter(|object| object.is_running())
        .filter(|object| {
            object
                .spec
                .selector
                .iter()
                .any(|selector| selector.count == 0 || object.has_fewer_nodes())
        })
        .filter_map(object_key)
        .collect()
}

/// The drifted object with the previous pod template affinity put back.
pub fn plan_drift_correction(old: &Workload, new: &Workload) -> Workload {
    let mut corrected = new.clone();

    corrected.set_affinity(old.affinity().cloned());
    corrected.strip_last_applied_configuration();
    corrected.meta_mut().resource_version = None;

    corrected
}

/// A fresh copy of the deleted object, owned by `owners` only.
pub fn plan_recreate(deleted: &Workload, owners: &[Arc<SelectiveDeployment>]) -> Workload {
    let mut recreated = deleted.clone();
    recreated.clear_status();
    recreated.strip_last_applied_configuration();

    let meta = recreated.meta_mut();
    meta.uid = None;
    meta.resource_version = None;
    meta.creation_timestamp = None;
    meta.deletion_timestamp = None;
    meta.deletion_grace_period_seconds = None;
    meta.generation = None;
    meta.managed_fields = None;
    meta.self_link = None;
    meta.owner_references = Some(
        owners
            .iter()
            .filter_map(|owner| owner.owner_reference())
            .collect(),
    );

    recreated
}

impl Engine {
    fn recover_ready_node(&self, node: &str) {
        let objects = self.caches.selective_deployments.list();
        debug!("Node '{node}' is ready, scanning {} selective deployment(s)...", objects.len());

        for key in select_for_ready_node(objects.iter().map(Arc::as_ref)) {
            self.enqueue(Envelope::create(key));
        }
    }

    async fn recover_node_placements(&self, node: &str) {
        let placements = match self.dispatcher.get_selective_deployments(node).await {
            Some(placements) => placements,
            None => return,
        };

        for placement in placements {
            let key = format_key(placement.namespace.as_deref(), &placement.name);

            match self.caches.selective_deployments.get_by_key(&key) {
                Ok(Some(_)) => self.enqueue(Envelope::create(key)),
                Ok(None) => debug!("'{key}' placed on '{node}' is gone, skipping."),
                Err(err) => warn!("Couldn't look up '{key}' placed on '{node}'! {err:#?}"),
            }
        }
    }

    async fn handle_workload(&self, event: ResourceEvent<Workload>) {
        match event {
            ResourceEvent::Added(new) => {
                let owners = self
                    .dispatcher
                    .check_controller_status(None, &new, Operation::Create)
                    .await;

                for owner in owners.into_iter().flatten() {
                    if let Some(key) = object_key(&*owner) {
                        self.enqueue(Envelope::create(key));
                    }
                }
            }
            ResourceEvent::Updated { old, new } => {
                if old.resource_version() == new.resource_version() {
                    return;
                }

                let key = new.key().unwrap_or_default();
                if self.is_correction_echo(&key, new.affinity()) {
                    return;
                }

                let owners = self
                    .dispatcher
                    .check_controller_status(Some(&*old), &new, Operation::Update)
                    .await;
                if owners.is_none() {
                    return;
                }

                info!("{} '{key}' drifted from its selective deployment, restoring...", new.kind());

                let corrected = plan_drift_correction(&old, &new);
                match self.writer.replace(&corrected).await {
                    Ok(()) => self.record_correction(key, corrected.affinity().cloned()),
                    Err(err) => warn!("Couldn't restore {} '{key}'! {err}", new.kind()),
                }
            }
            ResourceEvent::Deleted(old) => {
                let key = old.key().unwrap_or_default();
                self.forget_correction(&key);

                let owners = match self
                    .dispatcher
                    .check_controller_status(None, &old, Operation::Delete)
                    .await
                {
                    Some(owners) if !owners.is_empty() => owners,
                    _ => return,
                };

                info!("{} '{key}' is still owned, recreating...", old.kind());

                if let Err(err) = self.writer.create(&plan_recreate(&old, &owners)).await {
                    warn!("Couldn't recreate {} '{key}'! {err}", old.kind());
                }
            }
        }
    }
}

#[async_trait]
impl EventHandler<Node> for Engine {
    async fn handle(&self, event: ResourceEvent<Node>) {
        match event {
            ResourceEvent::Added(node) => {
                if ready_status(&node) == ReadyStatus::True {
                    self.recover_ready_node(node.metadata.name.as_deref().unwrap_or_default());
                }
            }
            ResourceEvent::Updated { old, new } => {
                let name = new.metadata.name.as_deref().unwrap_or_default();

                match classify_transition(&old, &new) {
                    NodeTransition::BecameReady => self.recover_ready_node(name),
                    NodeTransition::BecameUnhealthy | NodeTransition::AddressesChanged => {
                        self.recover_node_placements(name).await
                    }
                    NodeTransition::Unchanged => (),
                }
            }
            ResourceEvent::Deleted(node) => {
                self.recover_node_placements(node.metadata.name.as_deref().unwrap_or_default())
                    .await
            }
        }
    }
}

macro_rules! impl_workload_handler {
    ($($kind:ty),*) => {
        $(
            #[async_trait]
            impl EventHandler<$kind> for Engine {
                async fn handle(&self, event: ResourceEvent<$kind>) {
                    self.handle_workload(event.map(|object| Workload::from(object.clone())))
                        .await
                }
            }
        )*
    };
}

impl_workload_handler!(Deployment, DaemonSet, StatefulSet);
