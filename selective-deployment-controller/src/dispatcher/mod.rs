//! Boundary to the component deciding where selective deployments run.

use std::sync::Arc;

use async_trait::async_trait;
use kube::runtime::reflector::ObjectRef;
use selective_deployment_core::resources::{
    crd::v1alpha::selectivedeployment::SelectiveDeployment, workload::Workload,
};
use thiserror::Error;

use crate::engine::envelope::Operation;

pub mod ownership;

#[derive(Debug, Error)]
pub enum DispatcherError {
    #[error("Selective deployment is missing a name!")]
    MissingName,
    #[error("Couldn't parse deletion delta of '{}'!", .0)]
    MalformedDelta(String),
}

#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn init(&self) -> Result<(), DispatcherError>;

    async fn object_created(&self, object: &SelectiveDeployment) -> Result<(), DispatcherError>;

    /// `delta` lists the controllers removed from the spec.
    async fn object_updated(
        &self,
        object: &SelectiveDeployment,
        delta: &str,
    ) -> Result<(), DispatcherError>;

    /// `delta` describes the object that is already gone from the cache.
    async fn object_deleted(&self, key: &str, delta: &str) -> Result<(), DispatcherError>;

    /// Runs once the queue has been drained.
    async fn configure_controllers(&self) -> Result<(), DispatcherError>;

    /// Selective deployments with workloads placed on `node`.
    async fn get_selective_deployments(
        &self,
        node: &str,
    ) -> Option<Vec<ObjectRef<SelectiveDeployment>>>;

    /// Selective deployments that have to react to the workload change, if any.
    async fn check_controller_status(
        &self,
        old: Option<&Workload>,
        new: &Workload,
        operation: Operation,
    ) -> Option<Vec<Arc<SelectiveDeployment>>>;
}
