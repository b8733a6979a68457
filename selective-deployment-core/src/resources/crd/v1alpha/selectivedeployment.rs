use std::fmt::Display;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{CustomResource, Resource};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::resources::workload::WorkloadKind;

const FEWER_NODES_MARKER: &str = "fewer nodes issue";

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
#[kube(
    group = "edgenet.io",
    version = "v1alpha",
    kind = "SelectiveDeployment",
    namespaced,
    status = "SelectiveDeploymentStatus"
)]
pub struct SelectiveDeploymentSpec {
    /// kind of the workloads this selective deployment manages
    #[serde(rename = "type")]
    pub workload_type: WorkloadKind,
    /// workload objects owned by this selective deployment
    #[serde(default)]
    pub controller: Vec<ControllerRef>,
    /// node selection policy
    #[serde(default)]
    pub selector: Vec<Selector>,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
pub struct ControllerRef {
    #[serde(rename = "type")]
    pub kind: WorkloadKind,
    pub name: String,
}

impl ControllerRef {
    pub fn new(kind: WorkloadKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }
}

impl Display for ControllerRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.kind, self.name)
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct Selector {
    /// selector kind, e.g. City, State, Country, Continent or Polygon
    pub name: String,
    /// values matched against node labels
    #[serde(default)]
    pub value: Vec<String>,
    /// In or NotIn
    #[serde(default)]
    pub operator: String,
    /// number of matching nodes to run on, 0 means every matching node
    #[serde(default)]
    pub count: u32,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SelectiveDeploymentStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<SelectiveDeploymentState>,
    #[serde(default)]
    pub message: String,
    /// set when fewer nodes than requested matched one of the selectors
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fewer_nodes: Option<bool>,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
pub enum SelectiveDeploymentState {
    Failure,
    #[serde(rename = "Running Partially")]
    RunningPartially,
    Running,
}

impl SelectiveDeploymentStatus {
    /// Statuses written without the `fewerNodes` flag only report the
    /// shortage in the message.
    pub fn has_fewer_nodes(&self) -> bool {
        match self.fewer_nodes {
            Some(flag) => flag,
            None => self.message.to_lowercase().contains(FEWER_NODES_MARKER),
        }
    }
}

impl SelectiveDeployment {
    pub fn state(&self) -> Option<SelectiveDeploymentState> {
        self.status.as_ref().and_then(|status| status.state)
    }

    pub fn is_running(&self) -> bool {
        matches!(
            self.state(),
            Some(SelectiveDeploymentState::Running | SelectiveDeploymentState::RunningPartially)
        )
    }

    pub fn has_fewer_nodes(&self) -> bool {
        self.status
            .as_ref()
            .map(SelectiveDeploymentStatus::has_fewer_nodes)
            .unwrap_or(false)
    }

    pub fn controls(&self, kind: WorkloadKind, name: &str) -> bool {
        self.spec
            .controller
            .iter()
            .any(|controller| controller.kind == kind && controller.name == name)
    }

    /// Owner reference for workloads claimed by this selective deployment.
    /// Ownership isn't exclusive, so the reference never takes control.
    pub fn owner_reference(&self) -> Option<OwnerReference> {
        let mut owner = self.controller_owner_ref(&())?;
        owner.controller = Some(false);

        Some(owner)
    }
}

/// Compares the status fields the engine reacts to. A missing status is
/// treated as the default one.
pub fn status_changed(old: &SelectiveDeployment, new: &SelectiveDeployment) -> bool {
    let empty = SelectiveDeploymentStatus::default();
    let old = old.status.as_ref().unwrap_or(&empty);
    let new = new.status.as_ref().unwrap_or(&empty);

    old.state != new.state || old.message != new.message || old.fewer_nodes != new.fewer_nodes
}
