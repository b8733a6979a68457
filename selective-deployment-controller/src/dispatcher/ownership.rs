use std::{
    collections::BTreeSet,
    sync::{Arc, Mutex, PoisonError},
};

use async_trait::async_trait;
use kube::runtime::reflector::ObjectRef;
use log::{debug, info, warn};
use selective_deployment_core::{
    delta::{parse_deletion_delta, parse_removed},
    helpers::{format_key, object_key},
    resources::{crd::v1alpha::selectivedeployment::SelectiveDeployment, workload::Workload},
};

use crate::{
    engine::{envelope::Operation, Caches},
    subscription::cache::ObjectCache,
};

use super::{Dispatcher, DispatcherError};

/// Dispatcher without placement logic. It resolves which selective
/// deployments own a workload from owner references and keeps track of the
/// selective deployments it has been told about.
pub struct OwnershipDispatcher {
    caches: Caches,
    known: Mutex<BTreeSet<String>>,
}

impl OwnershipDispatcher {
    pub fn new(caches: Caches) -> Self {
        Self {
            caches,
            known: Default::default(),
        }
    }

    pub fn known(&self) -> Vec<String> {
        self.lock_known().iter().cloned().collect()
    }

    fn lock_known(&self) -> std::sync::MutexGuard<'_, BTreeSet<String>> {
        self.known.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Cached selective deployments that reference the workload both ways.
    fn owners_of(&self, workload: &Workload) -> Vec<Arc<SelectiveDeployment>> {
        let name = match workload.name() {
            Some(name) => name,
            None => return Vec::new(),
        };

        workload
            .selective_deployment_owners()
            .filter_map(|owner| {
                let key = format_key(workload.namespace(), &owner.name);

                match self.caches.selective_deployments.get_by_key(&key) {
                    Ok(owner) => owner,
                    Err(err) => {
                        warn!("Couldn't look up owner '{key}'! {err:#?}");
                        None
                    }
                }
            })
            .filter(|owner| owner.controls(workload.kind(), name))
            .collect()
    }
}

#[async_trait]
impl Dispatcher for OwnershipDispatcher {
    async fn init(&self) -> Result<(), DispatcherError> {
        info!("Ownership dispatcher initialized!");

        Ok(())
    }

    async fn object_created(&self, object: &SelectiveDeployment) -> Result<(), DispatcherError> {
        let key = object_key(object).ok_or(DispatcherError::MissingName)?;

        info!(
            "Selective deployment '{key}' manages {} {} controller(s), state: {:?}",
            object.spec.controller.len(),
            object.spec.workload_type,
            object.state()
        );
        self.lock_known().insert(key);

        Ok(())
    }

    async fn object_updated(
        &self,
        object: &SelectiveDeployment,
        delta: &str,
    ) -> Result<(), DispatcherError> {
        let key = object_key(object).ok_or(DispatcherError::MissingName)?;

        for released in parse_removed(delta) {
            info!("Selective deployment '{key}' released {released}");
        }
        self.lock_known().insert(key);

        Ok(())
    }

    async fn object_deleted(&self, key: &str, delta: &str) -> Result<(), DispatcherError> {
        let deleted =
            parse_deletion_delta(delta).ok_or_else(|| DispatcherError::MalformedDelta(key.to_owned()))?;

        self.lock_known().remove(key);
        info!(
            "Selective deployment '{key}' of {} controllers was deleted, {} controller(s) released",
            deleted.workload_type,
            deleted.removed.len()
        );

        Ok(())
    }

    async fn configure_controllers(&self) -> Result<(), DispatcherError> {
        debug!("Tracked selective deployments: {:?}", self.known());

        Ok(())
    }

    async fn get_selective_deployments(
        &self,
        node: &str,
    ) -> Option<Vec<ObjectRef<SelectiveDeployment>>> {
        let placements: BTreeSet<(Option<String>, String)> = self
            .caches
            .workloads()
            .iter()
            .filter(|workload| workload.hostnames().contains(&node))
            .flat_map(|workload| {
                let namespace = workload.namespace().map(str::to_owned);
                workload
                    .selective_deployment_owners()
                    .map(move |owner| (namespace.clone(), owner.name.clone()))
            })
            .collect();

        if placements.is_empty() {
            return None;
        }

        Some(
            placements
                .into_iter()
                .map(|(namespace, name)| match namespace {
                    Some(namespace) => ObjectRef::new(&name).within(&namespace),
                    None => ObjectRef::new(&name),
                })
                .collect(),
        )
    }

    async fn check_controller_status(
        &self,
        old: Option<&Workload>,
        new: &Workload,
        operation: Operation,
    ) -> Option<Vec<Arc<SelectiveDeployment>>> {
        if operation == Operation::Update {
            let drifted = old.map_or(false, |old| old.affinity() != new.affinity());
            if !drifted {
                return None;
            }
        }

        let owners = self.owners_of(new);

        (!owners.is_empty()).then_some(owners)
    }
}

#[cfg(test)]
mod tests {
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
    use selective_deployment_core::{
        delta::deletion_delta,
        resources::{
            crd::v1alpha::selectivedeployment::{ControllerRef, SelectiveDeploymentState},
            workload::WorkloadKind,
        },
    };

    use crate::engine::testing::{deployment, selective_deployment};

    use super::*;

    fn owned_by(mut workload: Workload, owners: &[&str]) -> Workload {
        workload.meta_mut().owner_references = Some(
            owners
                .iter()
                .map(|owner| OwnerReference {
                    api_version: "edgenet.io/v1alpha".to_owned(),
                    kind: "SelectiveDeployment".to_owned(),
                    name: owner.to_string(),
                    uid: format!("{owner}-uid"),
                    ..Default::default()
                })
                .collect(),
        );
        workload
    }

    fn dispatcher_with(objects: &[SelectiveDeployment]) -> OwnershipDispatcher {
        let caches = Caches::default();
        caches.mark_synced();
        for object in objects {
            caches.selective_deployments.insert(object.clone());
        }

        OwnershipDispatcher::new(caches)
    }

    #[tokio::test]
    async fn owners_must_list_the_workload() {
        let mut stranger = selective_deployment("sd-b", None, &[0]);
        stranger.spec.controller = vec![ControllerRef::new(WorkloadKind::Deployment, "other")];
        let dispatcher = dispatcher_with(&[selective_deployment("sd-a", None, &[0]), stranger]);
        let web = owned_by(deployment("web", "1", &["n1"]), &["sd-a", "sd-b", "sd-gone"]);

        let owners = dispatcher
            .check_controller_status(None, &web, Operation::Delete)
            .await
            .unwrap();

        assert_eq!(owners.len(), 1);
        assert_eq!(owners[0].metadata.name.as_deref(), Some("sd-a"));
    }

    #[tokio::test]
    async fn updates_only_match_on_affinity_drift() {
        let dispatcher = dispatcher_with(&[selective_deployment("sd-a", None, &[0])]);
        let old = owned_by(deployment("web", "1", &["n1"]), &["sd-a"]);
        let rescaled = owned_by(deployment("web", "2", &["n1"]), &["sd-a"]);
        let drifted = owned_by(deployment("web", "2", &["n2"]), &["sd-a"]);

        assert!(dispatcher
            .check_controller_status(Some(&old), &rescaled, Operation::Update)
            .await
            .is_none());
        assert!(dispatcher
            .check_controller_status(Some(&old), &drifted, Operation::Update)
            .await
            .is_some());
    }

    #[tokio::test]
    async fn node_placements_come_from_pinned_workloads() {
        let dispatcher = dispatcher_with(&[]);
        let pinned = owned_by(deployment("web", "1", &["n1", "n2"]), &["sd-a"]);
        let elsewhere = owned_by(deployment("db", "1", &["n3"]), &["sd-b"]);
        for workload in [pinned, elsewhere] {
            if let Workload::Deployment(object) = workload {
                dispatcher.caches.deployments.insert(object);
            }
        }

        let placements = dispatcher.get_selective_deployments("n2").await.unwrap();

        assert_eq!(placements, vec![ObjectRef::new("sd-a").within("edge")]);
        assert!(dispatcher.get_selective_deployments("n9").await.is_none());
    }

    #[tokio::test]
    async fn lifecycle_tracks_known_selective_deployments() {
        let dispatcher = dispatcher_with(&[]);
        let object = selective_deployment("sd-a", Some(SelectiveDeploymentState::Running), &[0]);

        dispatcher.object_created(&object).await.unwrap();
        assert_eq!(dispatcher.known(), vec!["edge/sd-a"]);

        dispatcher
            .object_deleted("edge/sd-a", &deletion_delta(&object))
            .await
            .unwrap();
        assert!(dispatcher.known().is_empty());

        assert!(matches!(
            dispatcher.object_deleted("edge/sd-a", "garbage").await,
            Err(DispatcherError::MalformedDelta(_))
        ));
    }
}
