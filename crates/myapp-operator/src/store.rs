//! Object store seam between the reconciler and the API server.
//!
//! The reconciler only talks to `ObjectStore`; `KubeStore` is the production
//! implementation on top of `kube::Api`.

use std::fmt::{self, Debug};
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, DeleteParams, Patch, PatchParams, PostParams};
use kube::{Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use tracing::debug;

use crate::constants::MANAGER;
use crate::crds::MyApp;
use crate::error::{OperatorError, Result};

/// Namespace and name of a namespaced object.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Key of an existing object. Fails for objects without a namespace.
    pub fn of<K: Resource>(obj: &K) -> Result<Self> {
        let name = obj.name_any();
        let namespace = obj
            .namespace()
            .ok_or_else(|| OperatorError::Invalid(format!("{name} has no namespace")))?;
        Ok(Self { namespace, name })
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Per-kind access to the API server.
///
/// `get` maps "not found" to `Ok(None)`. `replace` and `replace_status` are
/// optimistic: the object's resourceVersion must still be current or the
/// call fails with `OperatorError::Conflict`. `delete` reports a missing
/// object as `OperatorError::NotFound`.
#[async_trait]
pub trait ObjectStore<K: Send + Sync + 'static>: Send + Sync {
    async fn get(&self, key: &ObjectKey) -> Result<Option<K>>;

    async fn create(&self, obj: &K) -> Result<K>;

    async fn replace(&self, obj: &K) -> Result<K>;

    async fn replace_status(&self, obj: &K) -> Result<K>;

    async fn delete(&self, key: &ObjectKey) -> Result<()>;
}

/// `ObjectStore` backed by a kube client.
pub struct KubeStore<K> {
    client: Client,
    _kind: PhantomData<fn() -> K>,
}

impl<K> KubeStore<K> {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            _kind: PhantomData,
        }
    }
}

impl<K> KubeStore<K>
where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>,
{
    fn api(&self, namespace: &str) -> Api<K> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl<K> ObjectStore<K> for KubeStore<K>
where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static,
{
    async fn get(&self, key: &ObjectKey) -> Result<Option<K>> {
        Ok(self.api(&key.namespace).get_opt(&key.name).await?)
    }

    async fn create(&self, obj: &K) -> Result<K> {
        let key = ObjectKey::of(obj)?;
        let pp = PostParams {
            field_manager: Some(MANAGER.into()),
            ..Default::default()
        };
        Ok(self.api(&key.namespace).create(&pp, obj).await?)
    }

    async fn replace(&self, obj: &K) -> Result<K> {
        let key = ObjectKey::of(obj)?;
        let pp = PostParams {
            field_manager: Some(MANAGER.into()),
            ..Default::default()
        };
        Ok(self.api(&key.namespace).replace(&key.name, &pp, obj).await?)
    }

    async fn replace_status(&self, obj: &K) -> Result<K> {
        let key = ObjectKey::of(obj)?;
        // A merge patch carrying resourceVersion is rejected with 409 when stale.
        let status = serde_json::to_value(obj)?
            .get("status")
            .cloned()
            .unwrap_or(serde_json::Value::Null);
        let patch = json!({
            "metadata": { "resourceVersion": obj.resource_version() },
            "status": status,
        });
        Ok(self
            .api(&key.namespace)
            .patch_status(&key.name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?)
    }

    async fn delete(&self, key: &ObjectKey) -> Result<()> {
        self.api(&key.namespace)
            .delete(&key.name, &DeleteParams::background())
            .await?;
        debug!(object = %key, kind = %K::kind(&()), "Delete accepted");
        Ok(())
    }
}

/// The three stores the MyApp reconciler works against.
#[derive(Clone)]
pub struct Stores {
    pub apps: Arc<dyn ObjectStore<MyApp>>,
    pub deployments: Arc<dyn ObjectStore<Deployment>>,
    pub pdbs: Arc<dyn ObjectStore<PodDisruptionBudget>>,
}

impl Stores {
    pub fn kube(client: Client) -> Self {
        Self {
            apps: Arc::new(KubeStore::<MyApp>::new(client.clone())),
            deployments: Arc::new(KubeStore::<Deployment>::new(client.clone())),
            pdbs: Arc::new(KubeStore::<PodDisruptionBudget>::new(client)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crds::MyAppSpec;

    #[test]
    fn test_object_key_display() {
        assert_eq!(ObjectKey::new("apps", "demo").to_string(), "apps/demo");
    }

    #[test]
    fn test_object_key_of_requires_namespace() {
        let mut app = MyApp::new(
            "demo",
            MyAppSpec {
                replicas: 1,
                image: "img:v1".into(),
                args: vec![],
            },
        );
        assert!(matches!(ObjectKey::of(&app), Err(OperatorError::Invalid(_))));

        app.metadata.namespace = Some("apps".into());
        assert_eq!(ObjectKey::of(&app).unwrap(), ObjectKey::new("apps", "demo"));
    }
}
