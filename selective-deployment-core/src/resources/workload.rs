use std::fmt::Display;

use k8s_openapi::{
    api::{
        apps::v1::{DaemonSet, Deployment, StatefulSet},
        core::v1::{Affinity, PodSpec},
    },
    apimachinery::pkg::apis::meta::v1::OwnerReference,
};
use kube::{core::ObjectMeta, Resource};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{
    helpers::object_key, HOSTNAME_LABEL, LAST_APPLIED_CONFIGURATION_ANNOTATION, RESOURCE_GROUP,
};

use super::crd::v1alpha::selectivedeployment::SelectiveDeployment;

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, Hash, JsonSchema)]
pub enum WorkloadKind {
    Deployment,
    DaemonSet,
    StatefulSet,
}

impl Display for WorkloadKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            WorkloadKind::Deployment => "Deployment",
            WorkloadKind::DaemonSet => "DaemonSet",
            WorkloadKind::StatefulSet => "StatefulSet",
        })
    }
}

/// A workload controller object that a selective deployment may own.
#[derive(Clone, Debug)]
pub enum Workload {
    Deployment(Deployment),
    DaemonSet(DaemonSet),
    StatefulSet(StatefulSet),
}

impl From<Deployment> for Workload {
    fn from(value: Deployment) -> Self {
        Workload::Deployment(value)
    }
}

impl From<DaemonSet> for Workload {
    fn from(value: DaemonSet) -> Self {
        Workload::DaemonSet(value)
    }
}

impl From<StatefulSet> for Workload {
    fn from(value: StatefulSet) -> Self {
        Workload::StatefulSet(value)
    }
}

impl Workload {
    pub fn kind(&self) -> WorkloadKind {
        match self {
            Workload::Deployment(_) => WorkloadKind::Deployment,
            Workload::DaemonSet(_) => WorkloadKind::DaemonSet,
            Workload::StatefulSet(_) => WorkloadKind::StatefulSet,
        }
    }

    pub fn meta(&self) -> &ObjectMeta {
        match self {
            Workload::Deployment(object) => object.meta(),
            Workload::DaemonSet(object) => object.meta(),
            Workload::StatefulSet(object) => object.meta(),
        }
    }

    pub fn meta_mut(&mut self) -> &mut ObjectMeta {
        match self {
            Workload::Deployment(object) => object.meta_mut(),
            Workload::DaemonSet(object) => object.meta_mut(),
            Workload::StatefulSet(object) => object.meta_mut(),
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.meta().name.as_deref()
    }

    pub fn namespace(&self) -> Option<&str> {
        self.meta().namespace.as_deref()
    }

    pub fn key(&self) -> Option<String> {
        match self {
            Workload::Deployment(object) => object_key(object),
            Workload::DaemonSet(object) => object_key(object),
            Workload::StatefulSet(object) => object_key(object),
        }
    }

    pub fn resource_version(&self) -> Option<&str> {
        self.meta().resource_version.as_deref()
    }

    fn pod_spec(&self) -> Option<&PodSpec> {
        match self {
            Workload::Deployment(object) => object.spec.as_ref()?.template.spec.as_ref(),
            Workload::DaemonSet(object) => object.spec.as_ref()?.template.spec.as_ref(),
            Workload::StatefulSet(object) => object.spec.as_ref()?.template.spec.as_ref(),
        }
    }

    fn pod_spec_mut(&mut self) -> Option<&mut PodSpec> {
        match self {
            Workload::Deployment(object) => object.spec.as_mut()?.template.spec.as_mut(),
            Workload::DaemonSet(object) => object.spec.as_mut()?.template.spec.as_mut(),
            Workload::StatefulSet(object) => object.spec.as_mut()?.template.spec.as_mut(),
        }
    }

    /// Pod template affinity.
    pub fn affinity(&self) -> Option<&Affinity> {
        self.pod_spec()?.affinity.as_ref()
    }

    /// Replaces the pod template affinity. Objects without a pod spec are
    /// left untouched.
    pub fn set_affinity(&mut self, affinity: Option<Affinity>) {
        if let Some(pod_spec) = self.pod_spec_mut() {
            pod_spec.affinity = affinity;
        }
    }

    pub fn clear_status(&mut self) {
        match self {
            Workload::Deployment(object) => object.status = None,
            Workload::DaemonSet(object) => object.status = None,
            Workload::StatefulSet(object) => object.status = None,
        }
    }

    pub fn strip_last_applied_configuration(&mut self) {
        if let Some(annotations) = self.meta_mut().annotations.as_mut() {
            annotations.remove(LAST_APPLIED_CONFIGURATION_ANNOTATION);
        }
    }

    /// Owner references pointing at selective deployments.
    pub fn selective_deployment_owners(&self) -> impl Iterator<Item = &OwnerReference> {
        let kind = SelectiveDeployment::kind(&()).into_owned();

        self.meta()
            .owner_references
            .iter()
            .flatten()
            .filter(move |owner| {
                owner.kind == kind
                    && owner.api_version.split('/').next() == Some(RESOURCE_GROUP)
            })
    }

    /// Node names the pod template is pinned to, either through a
    /// `nodeSelector` or through required node affinity on the hostname label.
    pub fn hostnames(&self) -> Vec<&str> {
        let pod_spec = match self.pod_spec() {
            Some(pod_spec) => pod_spec,
            None => return Vec::new(),
        };

        let selected = pod_spec
            .node_selector
            .as_ref()
            .and_then(|selector| selector.get(HOSTNAME_LABEL))
            .map(String::as_str);

        let required = pod_spec
            .affinity
            .as_ref()
            .and_then(|affinity| affinity.node_affinity.as_ref())
            .and_then(|node_affinity| {
                node_affinity
                    .required_during_scheduling_ignored_during_execution
                    .as_ref()
            })
            .into_iter()
            .flat_map(|selector| selector.node_selector_terms.iter())
            .flat_map(|term| term.match_expressions.iter().flatten())
            .filter(|requirement| requirement.key == HOSTNAME_LABEL && requirement.operator == "In")
            .flat_map(|requirement| requirement.values.iter().flatten())
            .map(String::as_str);

        let mut hostnames: Vec<&str> = selected.into_iter().chain(required).collect();
        hostnames.sort_unstable();
        hostnames.dedup();

        hostnames
    }
}
