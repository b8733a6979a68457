use std::any::type_name;

use kube::Resource;

pub fn pretty_type_name<'a, T>() -> &'a str {
    type_name::<T>().split("::").last().unwrap_or_default()
}

pub trait RequireMetadata<E> {
    fn require_name_or_else(&self, error: impl FnOnce() -> E) -> Result<&str, E>;
    fn require_namespace_or_else(&self, error: impl FnOnce() -> E) -> Result<&str, E>;
}

impl<T: Resource, E> RequireMetadata<E> for T {
    fn require_name_or_else(&self, error: impl FnOnce() -> E) -> Result<&str, E> {
        Ok(self.meta().name.as_ref().ok_or_else(error)?.as_str())
    }

    fn require_namespace_or_else(&self, error: impl FnOnce() -> E) -> Result<&str, E> {
        Ok(self.meta().namespace.as_ref().ok_or_else(error)?.as_str())
    }
}

/// Builds the `namespace/name` key of an object (just `name` for cluster scoped ones).
/// Returns `None` for objects that don't carry a name.
pub fn object_key<K: Resource>(object: &K) -> Option<String> {
    let name = object.meta().name.as_deref()?;

    Some(format_key(object.meta().namespace.as_deref(), name))
}

pub fn format_key(namespace: Option<&str>, name: &str) -> String {
    match namespace {
        Some(namespace) if !namespace.is_empty() => format!("{namespace}/{name}"),
        _ => name.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use k8s_openapi::api::core::v1::Node;
    use kube::core::ObjectMeta;

    use super::*;

    #[test]
    fn object_key_includes_namespace_when_present() {
        let node = Node {
            metadata: ObjectMeta {
                name: Some("n1".to_owned()),
                ..Default::default()
            },
            ..Default::default()
        };
        let mut namespaced = node.clone();
        namespaced.metadata.namespace = Some("edge".to_owned());

        assert_eq!(object_key(&node).as_deref(), Some("n1"));
        assert_eq!(object_key(&namespaced).as_deref(), Some("edge/n1"));
        assert_eq!(object_key(&Node::default()), None);
    }

    #[test]
    fn empty_namespace_is_omitted() {
        assert_eq!(format_key(Some(""), "b"), "b");
        assert_eq!(format_key(Some("a"), "b"), "a/b");
    }

    #[test]
    fn missing_metadata_produces_error() {
        let node = Node::default();

        assert_eq!(node.require_name_or_else(|| "no name"), Err("no name"));
        assert_eq!(node.require_namespace_or_else(|| "no namespace"), Err("no namespace"));
    }

    #[test]
    fn pretty_type_name_strips_module_path() {
        assert_eq!(pretty_type_name::<Node>(), "Node");
    }
}
