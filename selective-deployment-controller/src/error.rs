use std::time::Duration;

use thiserror::Error;

use crate::dispatcher::DispatcherError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Caches didn't synchronize within {:?}! Unsynced: {}", .0, .1.join(", "))]
    CacheSync(Duration, Vec<&'static str>),
    #[error("Couldn't write the resource! Reason: {}", .0)]
    KubeApiError(kube::Error),
    #[error("Dispatcher failed! Reason: {}", .0)]
    DispatcherError(DispatcherError),
}
