pub mod delta;
pub mod helpers;
pub mod kubernetes;
pub mod resources;

pub const RESOURCE_GROUP: &str = "edgenet.io";
pub const RESOURCE_VERSION: &str = "v1alpha";

pub const HOSTNAME_LABEL: &str = "kubernetes.io/hostname";
pub const LAST_APPLIED_CONFIGURATION_ANNOTATION: &str =
    "kubectl.kubernetes.io/last-applied-configuration";
