use async_trait::async_trait;
use kube::{api::PostParams, Client};
use log::warn;
use selective_deployment_core::{
    kubernetes::operations::{create_resource, replace_resource},
    resources::workload::Workload,
};

use crate::error::EngineError;

/// Writes workload objects back to the cluster.
#[async_trait]
pub trait WorkloadWriter: Send + Sync {
    async fn replace(&self, workload: &Workload) -> Result<(), EngineError>;
    async fn create(&self, workload: &Workload) -> Result<(), EngineError>;
}

pub struct KubeWorkloadWriter {
    client: Client,
}

impl KubeWorkloadWriter {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl WorkloadWriter for KubeWorkloadWriter {
    async fn replace(&self, workload: &Workload) -> Result<(), EngineError> {
        let params = PostParams::default();
        let result = match workload {
            Workload::Deployment(object) => replace_resource(&self.client, object, &params)
                .await
                .map(|_| ()),
            Workload::DaemonSet(object) => replace_resource(&self.client, object, &params)
                .await
                .map(|_| ()),
            Workload::StatefulSet(object) => replace_resource(&self.client, object, &params)
                .await
                .map(|_| ()),
        };

        result.map_err(|err| write_failed(workload, "replace", err))
    }

    async fn create(&self, workload: &Workload) -> Result<(), EngineError> {
        let params = PostParams::default();
        let result = match workload {
            Workload::Deployment(object) => create_resource(&self.client, object, &params)
                .await
                .map(|_| ()),
            Workload::DaemonSet(object) => create_resource(&self.client, object, &params)
                .await
                .map(|_| ()),
            Workload::StatefulSet(object) => create_resource(&self.client, object, &params)
                .await
                .map(|_| ()),
        };

        result.map_err(|err| write_failed(workload, "create", err))
    }
}

fn write_failed(workload: &Workload, operation: &str, err: kube::Error) -> EngineError {
    warn!(
        "Couldn't {operation} {} '{}' in '{}' namespace! {err:#?}",
        workload.kind(),
        workload.name().unwrap_or("---"),
        workload.namespace().unwrap_or("---"),
    );

    EngineError::KubeApiError(err)
}
