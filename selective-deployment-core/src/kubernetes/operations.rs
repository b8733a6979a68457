use std::fmt::Debug;

use k8s_openapi::{
    serde::{de::DeserializeOwned, Serialize},
    NamespaceResourceScope,
};
use kube::{api::PostParams, Client, Resource};
use log::info;

use crate::helpers::{pretty_type_name, RequireMetadata};

use super::GetApi;

/// Creates the resource as-is. `metadata.resourceVersion` has to be empty.
pub async fn create_resource<T>(
    client: &Client,
    resource: &T,
    post_params: &PostParams,
) -> Result<T, kube::Error>
where
    T: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
        + Serialize
        + Clone
        + DeserializeOwned
        + Debug,
{
    let (name, namespace) = require_identity(resource)?;

    info!(
        "Creating '{name}' {} resource in '{namespace}' namespace...",
        pretty_type_name::<T>()
    );

    client
        .namespaced_api::<T>(namespace)
        .create(post_params, resource)
        .await
}

/// Overwrites the whole resource. With an empty `metadata.resourceVersion`
/// the write is unconditional, otherwise the API server rejects stale versions.
pub async fn replace_resource<T>(
    client: &Client,
    resource: &T,
    post_params: &PostParams,
) -> Result<T, kube::Error>
where
    T: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
        + Serialize
        + Clone
        + DeserializeOwned
        + Debug,
{
    let (name, namespace) = require_identity(resource)?;

    info!(
        "Replacing '{name}' {} resource in '{namespace}' namespace...",
        pretty_type_name::<T>()
    );

    client
        .namespaced_api::<T>(namespace)
        .replace(name, post_params, resource)
        .await
}

fn require_identity<T: Resource>(resource: &T) -> Result<(&str, &str), kube::Error> {
    Ok((
        resource.require_name_or_else(missing_metadata_error)?,
        resource.require_namespace_or_else(missing_metadata_error)?,
    ))
}

fn missing_metadata_error() -> kube::Error {
    kube::Error::Api(kube::error::ErrorResponse {
        status: "Failure".to_owned(),
        message: "resource is missing a name or a namespace".to_owned(),
        reason: "Invalid".to_owned(),
        code: 422,
    })
}
