use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};

use k8s_openapi::api::{
    apps::v1::{DaemonSet, Deployment, StatefulSet},
    core::v1::{Affinity, Node},
};
use log::debug;
use selective_deployment_core::{
    helpers::pretty_type_name,
    resources::{crd::v1alpha::selectivedeployment::SelectiveDeployment, workload::Workload},
};

use crate::{
    config::EngineConfig,
    dispatcher::Dispatcher,
    queue::WorkQueue,
    subscription::cache::{Cache, ObjectCache},
};

use self::{envelope::Envelope, writer::WorkloadWriter};

pub mod envelope;
pub mod normalizer;
pub mod recovery;
pub mod worker;
pub mod writer;

/// Cache handles of every watched kind.
#[derive(Clone)]
pub struct Caches {
    pub selective_deployments: Cache<SelectiveDeployment>,
    pub nodes: Cache<Node>,
    pub deployments: Cache<Deployment>,
    pub daemon_sets: Cache<DaemonSet>,
    pub stateful_sets: Cache<StatefulSet>,
}

impl Default for Caches {
    fn default() -> Self {
        Self {
            selective_deployments: Cache::new(pretty_type_name::<SelectiveDeployment>()),
            nodes: Cache::new(pretty_type_name::<Node>()),
            deployments: Cache::new(pretty_type_name::<Deployment>()),
            daemon_sets: Cache::new(pretty_type_name::<DaemonSet>()),
            stateful_sets: Cache::new(pretty_type_name::<StatefulSet>()),
        }
    }
}

impl Caches {
    /// Snapshot of every cached workload, regardless of kind.
    pub fn workloads(&self) -> Vec<Workload> {
        let deployments = self.deployments.list();
        let daemon_sets = self.daemon_sets.list();
        let stateful_sets = self.stateful_sets.list();

        deployments
            .iter()
            .map(|object| Workload::from(Deployment::clone(object)))
            .chain(
                daemon_sets
                    .iter()
                    .map(|object| Workload::from(DaemonSet::clone(object))),
            )
            .chain(
                stateful_sets
                    .iter()
                    .map(|object| Workload::from(StatefulSet::clone(object))),
            )
            .collect()
    }

    #[cfg(test)]
    pub fn mark_synced(&self) {
        self.selective_deployments.mark_synced();
        self.nodes.mark_synced();
        self.deployments.mark_synced();
        self.daemon_sets.mark_synced();
        self.stateful_sets.mark_synced();
    }
}

/// Everything the event handlers and the worker share.
pub struct Engine {
    config: EngineConfig,
    queue: WorkQueue<Envelope>,
    caches: Caches,
    lookup: Arc<dyn ObjectCache<SelectiveDeployment>>,
    dispatcher: Arc<dyn Dispatcher>,
    writer: Arc<dyn WorkloadWriter>,
    /// affinity written by the last drift correction of each workload
    corrections: Mutex<HashMap<String, Option<Affinity>>>,
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        caches: Caches,
        dispatcher: Arc<dyn Dispatcher>,
        writer: Arc<dyn WorkloadWriter>,
    ) -> Self {
        let queue = WorkQueue::new(config.retry_base_delay, config.retry_max_delay);

        Self {
            config,
            queue,
            lookup: Arc::new(caches.selective_deployments.clone()),
            caches,
            dispatcher,
            writer,
            corrections: Default::default(),
        }
    }

    pub fn queue(&self) -> &WorkQueue<Envelope> {
        &self.queue
    }

    fn enqueue(&self, envelope: Envelope) {
        debug!(
            "Queueing {} of '{}'...",
            envelope.operation, envelope.key
        );

        self.queue.add(envelope);
    }

    fn record_correction(&self, key: String, affinity: Option<Affinity>) {
        self.corrections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, affinity);
    }

    fn forget_correction(&self, key: &str) {
        self.corrections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }

    /// Whether the update carries the affinity this engine has just written.
    fn is_correction_echo(&self, key: &str, affinity: Option<&Affinity>) -> bool {
        let mut corrections = self
            .corrections
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        match corrections.get(key) {
            Some(written) if written.as_ref() == affinity => {
                corrections.remove(key);
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use k8s_openapi::api::{
        apps::v1::{Deployment, DeploymentSpec},
        core::v1::{
            Affinity, NodeAffinity, NodeSelector, NodeSelectorRequirement, NodeSelectorTerm,
            PodSpec, PodTemplateSpec,
        },
    };
    use kube::{core::ObjectMeta, runtime::reflector::ObjectRef};
    use selective_deployment_core::{
        helpers::object_key,
        resources::{
            crd::v1alpha::selectivedeployment::{
                ControllerRef, SelectiveDeployment, SelectiveDeploymentSpec,
                SelectiveDeploymentState, SelectiveDeploymentStatus, Selector,
            },
            workload::{Workload, WorkloadKind},
        },
        HOSTNAME_LABEL,
    };

    use crate::{
        config::EngineConfig,
        dispatcher::{Dispatcher, DispatcherError},
        engine::{envelope::Operation, writer::WorkloadWriter, Caches, Engine},
        error::EngineError,
    };

    /// Dispatcher fake recording every call as a readable line.
    #[derive(Default)]
    pub struct RecordingDispatcher {
        pub calls: Mutex<Vec<String>>,
        pub node_placements: Mutex<Vec<ObjectRef<SelectiveDeployment>>>,
        pub owners: Mutex<Option<Vec<Arc<SelectiveDeployment>>>>,
    }

    impl RecordingDispatcher {
        pub fn take_calls(&self) -> Vec<String> {
            std::mem::take(&mut *self.calls.lock().unwrap())
        }

        fn record(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }
    }

    #[async_trait]
    impl Dispatcher for RecordingDispatcher {
        async fn init(&self) -> Result<(), DispatcherError> {
            self.record("init".to_owned());
            Ok(())
        }

        async fn object_created(&self, object: &SelectiveDeployment) -> Result<(), DispatcherError> {
            self.record(format!("created {}", object_key(object).unwrap()));
            Ok(())
        }

        async fn object_updated(
            &self,
            object: &SelectiveDeployment,
            delta: &str,
        ) -> Result<(), DispatcherError> {
            self.record(format!("updated {} [{delta}]", object_key(object).unwrap()));
            Ok(())
        }

        async fn object_deleted(&self, key: &str, delta: &str) -> Result<(), DispatcherError> {
            self.record(format!("deleted {key} [{delta}]"));
            Ok(())
        }

        async fn configure_controllers(&self) -> Result<(), DispatcherError> {
            self.record("configure".to_owned());
            Ok(())
        }

        async fn get_selective_deployments(
            &self,
            node: &str,
        ) -> Option<Vec<ObjectRef<SelectiveDeployment>>> {
            self.record(format!("placements {node}"));
            let placements = self.node_placements.lock().unwrap().clone();

            (!placements.is_empty()).then_some(placements)
        }

        async fn check_controller_status(
            &self,
            _old: Option<&Workload>,
            new: &Workload,
            operation: Operation,
        ) -> Option<Vec<Arc<SelectiveDeployment>>> {
            self.record(format!("check {operation} {}", new.key().unwrap()));
            self.owners.lock().unwrap().clone()
        }
    }

    /// Writer fake keeping every written object.
    #[derive(Default)]
    pub struct RecordingWriter {
        pub replaced: Mutex<Vec<Workload>>,
        pub created: Mutex<Vec<Workload>>,
    }

    #[async_trait]
    impl WorkloadWriter for RecordingWriter {
        async fn replace(&self, workload: &Workload) -> Result<(), EngineError> {
            self.replaced.lock().unwrap().push(workload.clone());
            Ok(())
        }

        async fn create(&self, workload: &Workload) -> Result<(), EngineError> {
            self.created.lock().unwrap().push(workload.clone());
            Ok(())
        }
    }

    pub fn config() -> EngineConfig {
        EngineConfig {
            retry_base_delay: std::time::Duration::from_millis(1),
            retry_max_delay: std::time::Duration::from_millis(4),
            ..Default::default()
        }
    }

    pub fn engine() -> (Arc<Engine>, Arc<RecordingDispatcher>, Arc<RecordingWriter>) {
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let writer = Arc::new(RecordingWriter::default());
        let caches = Caches::default();
        caches.mark_synced();
        let engine = Engine::new(
            config(),
            caches,
            dispatcher.clone(),
            writer.clone(),
        );

        (Arc::new(engine), dispatcher, writer)
    }

    pub fn selective_deployment(
        name: &str,
        state: Option<SelectiveDeploymentState>,
        counts: &[u32],
    ) -> SelectiveDeployment {
        SelectiveDeployment {
            metadata: ObjectMeta {
                name: Some(name.to_owned()),
                namespace: Some("edge".to_owned()),
                uid: Some(format!("{name}-uid")),
                resource_version: Some("1".to_owned()),
                ..Default::default()
            },
            spec: SelectiveDeploymentSpec {
                workload_type: WorkloadKind::Deployment,
                controller: vec![ControllerRef::new(WorkloadKind::Deployment, "web")],
                selector: counts
                    .iter()
                    .map(|count| Selector {
                        name: "City".to_owned(),
                        value: vec!["Paris".to_owned()],
                        operator: "In".to_owned(),
                        count: *count,
                    })
                    .collect(),
            },
            status: state.map(|state| SelectiveDeploymentStatus {
                state: Some(state),
                ..Default::default()
            }),
        }
    }

    pub fn deployment(name: &str, resource_version: &str, hostnames: &[&str]) -> Workload {
        let affinity = (!hostnames.is_empty()).then(|| Affinity {
            node_affinity: Some(NodeAffinity {
                required_during_scheduling_ignored_during_execution: Some(NodeSelector {
                    node_selector_terms: vec![NodeSelectorTerm {
                        match_expressions: Some(vec![NodeSelectorRequirement {
                            key: HOSTNAME_LABEL.to_owned(),
                            operator: "In".to_owned(),
                            values: Some(hostnames.iter().map(|h| h.to_string()).collect()),
                        }]),
                        ..Default::default()
                    }],
                }),
                ..Default::default()
            }),
            ..Default::default()
        });

        Deployment {
            metadata: ObjectMeta {
                name: Some(name.to_owned()),
                namespace: Some("edge".to_owned()),
                uid: Some(format!("{name}-uid")),
                resource_version: Some(resource_version.to_owned()),
                generation: Some(3),
                ..Default::default()
            },
            spec: Some(DeploymentSpec {
                template: PodTemplateSpec {
                    spec: Some(PodSpec {
                        affinity,
                        ..Default::default()
                    }),
                    ..Default::default()
                },
                ..Default::default()
            }),
            status: Some(Default::default()),
        }
        .into()
    }
}
