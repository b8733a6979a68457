pub mod v1alpha;
