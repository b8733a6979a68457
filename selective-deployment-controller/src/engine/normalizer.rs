use async_trait::async_trait;
use log::debug;
use selective_deployment_core::{
    delta::{deletion_delta, update_delta},
    helpers::object_key,
    resources::crd::v1alpha::selectivedeployment::{status_changed, SelectiveDeployment},
};

use crate::subscription::{EventHandler, ResourceEvent};

use super::{
    envelope::{Envelope, Operation},
    Engine,
};

/// Turns a selective deployment event into queued work. Relists that didn't
/// bump the resource version and status-only writes yield nothing.
pub fn normalize(event: &ResourceEvent<SelectiveDeployment>) -> Option<Envelope> {
    let envelope = match event {
        ResourceEvent::Added(object) => Envelope::new(object_key(&**object)?, Operation::Create, ""),
        ResourceEvent::Updated { old, new } => {
            if old.metadata.resource_version == new.metadata.resource_version {
                return None;
            }
            if status_changed(old, new) {
                debug!(
                    "Ignoring status write of '{}'",
                    object_key(&**new).unwrap_or_default()
                );
                return None;
            }

            Envelope::new(
                object_key(&**new)?,
                Operation::Update,
                update_delta(old, new),
            )
        }
        ResourceEvent::Deleted(object) => Envelope::new(
            object_key(&**object)?,
            Operation::Delete,
            deletion_delta(object),
        ),
    };

    Some(envelope)
}

#[async_trait]
impl EventHandler<SelectiveDeployment> for Engine {
    async fn handle(&self, event: ResourceEvent<SelectiveDeployment>) {
        match normalize(&event) {
            Some(envelope) => self.enqueue(envelope),
            None => debug!("Selective deployment event produced no work."),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use selective_deployment_core::{
        delta::ENTRY_SEPARATOR,
        resources::{
            crd::v1alpha::selectivedeployment::{
                ControllerRef, SelectiveDeploymentState, SelectiveDeploymentStatus,
            },
            workload::WorkloadKind,
        },
    };

    use crate::engine::testing::{engine, selective_deployment};

    use super::*;

    fn with_version(mut object: SelectiveDeployment, version: &str) -> Arc<SelectiveDeployment> {
        object.metadata.resource_version = Some(version.to_owned());
        Arc::new(object)
    }

    #[test]
    fn added_object_becomes_create() {
        let object = Arc::new(selective_deployment("sd", None, &[0]));

        assert_eq!(
            normalize(&ResourceEvent::Added(object)),
            Some(Envelope::create("edge/sd"))
        );
    }

    #[test]
    fn status_write_is_not_queued() {
        let old = selective_deployment("sd", None, &[0]);
        let mut new = old.clone();
        new.status = Some(SelectiveDeploymentStatus {
            state: Some(SelectiveDeploymentState::Running),
            message: "Workload running on 2 nodes".to_owned(),
            fewer_nodes: Some(false),
        });

        let event = ResourceEvent::Updated {
            old: with_version(old, "1"),
            new: with_version(new, "2"),
        };

        assert_eq!(normalize(&event), None);
    }

    #[test]
    fn relist_with_same_resource_version_is_not_queued() {
        let object = with_version(selective_deployment("sd", None, &[0]), "7");

        let event = ResourceEvent::Updated {
            old: object.clone(),
            new: object,
        };

        assert_eq!(normalize(&event), None);
    }

    #[test]
    fn spec_update_carries_removed_controllers() {
        let mut old = selective_deployment("sd", None, &[0]);
        old.spec.controller = vec![
            ControllerRef::new(WorkloadKind::Deployment, "a"),
            ControllerRef::new(WorkloadKind::Deployment, "b"),
        ];
        let mut new = old.clone();
        new.spec.controller.truncate(1);

        let event = ResourceEvent::Updated {
            old: with_version(old, "1"),
            new: with_version(new, "2"),
        };

        assert_eq!(
            normalize(&event),
            Some(Envelope::new(
                "edge/sd",
                Operation::Update,
                format!("Deployment{ENTRY_SEPARATOR}b")
            ))
        );
    }

    #[test]
    fn nameless_object_is_dropped() {
        let mut object = selective_deployment("sd", None, &[0]);
        object.metadata.name = None;

        assert_eq!(normalize(&ResourceEvent::Deleted(Arc::new(object))), None);
    }

    #[tokio::test]
    async fn repeated_events_are_queued_once() {
        let (engine, _, _) = engine();
        let object = Arc::new(selective_deployment("sd", None, &[0]));

        engine.handle(ResourceEvent::Added(object.clone())).await;
        engine.handle(ResourceEvent::Added(object)).await;

        assert_eq!(engine.queue().len(), 1);
    }
}
