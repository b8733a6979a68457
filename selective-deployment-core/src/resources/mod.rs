pub mod crd;
pub mod node;
pub mod workload;
