use k8s_openapi::NamespaceResourceScope;
use kube::{Api, Client, Resource};

pub mod operations;

pub trait GetApi {
    fn global_api<K: Resource<DynamicType = ()>>(&self) -> Api<K>;
    fn namespaced_api<K: Resource<DynamicType = (), Scope = NamespaceResourceScope>>(
        &self,
        namespace: &str,
    ) -> Api<K>;
    /// Namespaced api when a namespace is given, all namespaces otherwise.
    fn scoped_api<K: Resource<DynamicType = (), Scope = NamespaceResourceScope>>(
        &self,
        namespace: Option<&str>,
    ) -> Api<K>;
}

impl GetApi for Client {
    fn global_api<K: Resource<DynamicType = ()>>(&self) -> Api<K> {
        Api::all(self.clone())
    }

    fn namespaced_api<K: Resource<DynamicType = (), Scope = NamespaceResourceScope>>(
        &self,
        namespace: &str,
    ) -> Api<K> {
        Api::namespaced(self.clone(), namespace)
    }

    fn scoped_api<K: Resource<DynamicType = (), Scope = NamespaceResourceScope>>(
        &self,
        namespace: Option<&str>,
    ) -> Api<K> {
        match namespace {
            Some(namespace) => self.namespaced_api(namespace),
            None => self.global_api(),
        }
    }
}
