//! In-memory object store and fixtures shared by the integration tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::{Resource, ResourceExt};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use myapp_operator::crds::{MyApp, MyAppSpec};
use myapp_operator::error::{OperatorError, Result};
use myapp_operator::metrics::PrometheusMetrics;
use myapp_operator::store::{ObjectKey, ObjectStore, Stores};
use myapp_operator::Reconciler;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Create,
    Replace,
    ReplaceStatus,
    Delete,
}

/// Failure injected in place of a store call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Fault {
    Conflict,
    Unavailable,
    /// Never completes.
    Hang,
}

impl Fault {
    fn error(self, method: Method) -> OperatorError {
        match self {
            Fault::Conflict => OperatorError::Conflict(format!("injected on {method:?}")),
            Fault::Unavailable | Fault::Hang => {
                OperatorError::Unavailable(format!("injected on {method:?}"))
            }
        }
    }
}

struct State<K> {
    objects: BTreeMap<ObjectKey, K>,
    writes: Vec<(Method, ObjectKey)>,
    faults: HashMap<Method, Fault>,
    version: u64,
}

/// `ObjectStore` that behaves like the API server where the reconciler cares:
/// resourceVersion checks, status kept apart from the main resource, and
/// deletion blocked by finalizers.
pub struct MemoryStore<K> {
    state: Mutex<State<K>>,
}

impl<K> Default for MemoryStore<K> {
    fn default() -> Self {
        Self {
            state: Mutex::new(State {
                objects: BTreeMap::new(),
                writes: Vec::new(),
                faults: HashMap::new(),
                version: 0,
            }),
        }
    }
}

impl<K> MemoryStore<K>
where
    K: Resource<DynamicType = ()> + Clone + Serialize + DeserializeOwned,
{
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Seed an object without recording a write.
    pub fn insert(&self, mut obj: K) -> K {
        let key = ObjectKey::of(&obj).expect("fixture objects are namespaced");
        let mut state = self.state.lock();
        state.version += 1;
        obj.meta_mut().resource_version = Some(state.version.to_string());
        state.objects.insert(key, obj.clone());
        obj
    }

    /// Request deletion the way a user would, without recording a write.
    pub fn delete_now(&self, key: &ObjectKey) {
        let mut state = self.state.lock();
        let Some(mut stored) = state.objects.get(key).cloned() else {
            return;
        };
        if stored.finalizers().is_empty() {
            state.objects.remove(key);
            return;
        }
        stored.meta_mut().deletion_timestamp = Some(Time(chrono::Utc::now()));
        Self::bump(&mut state, &mut stored);
        state.objects.insert(key.clone(), stored);
    }

    pub fn get_object(&self, key: &ObjectKey) -> Option<K> {
        self.state.lock().objects.get(key).cloned()
    }

    pub fn writes(&self) -> Vec<(Method, ObjectKey)> {
        self.state.lock().writes.clone()
    }

    pub fn write_methods(&self) -> Vec<Method> {
        self.writes().into_iter().map(|(m, _)| m).collect()
    }

    pub fn clear_writes(&self) {
        self.state.lock().writes.clear();
    }

    pub fn fail_on(&self, method: Method, fault: Fault) {
        self.state.lock().faults.insert(method, fault);
    }

    pub fn clear_faults(&self) {
        self.state.lock().faults.clear();
    }

    async fn check(&self, method: Method) -> Result<()> {
        let fault = self.state.lock().faults.get(&method).copied();
        match fault {
            None => Ok(()),
            Some(Fault::Hang) => futures::future::pending().await,
            Some(fault) => Err(fault.error(method)),
        }
    }

    fn record(state: &mut State<K>, method: Method, key: &ObjectKey) {
        state.writes.push((method, key.clone()));
    }

    fn bump(state: &mut State<K>, obj: &mut K) {
        state.version += 1;
        obj.meta_mut().resource_version = Some(state.version.to_string());
    }

    fn check_version(stored: &K, obj: &K, key: &ObjectKey) -> Result<()> {
        match obj.resource_version() {
            Some(rv) if Some(&rv) != stored.meta().resource_version.as_ref() => Err(
                OperatorError::Conflict(format!("{key}: resourceVersion {rv} is stale")),
            ),
            _ => Ok(()),
        }
    }
}

fn status_of<K: Serialize>(obj: &K) -> Result<serde_json::Value> {
    Ok(serde_json::to_value(obj)?
        .get("status")
        .cloned()
        .unwrap_or(serde_json::Value::Null))
}

fn with_status<K: Serialize + DeserializeOwned>(obj: &K, status: serde_json::Value) -> Result<K> {
    let mut value = serde_json::to_value(obj)?;
    if let Some(map) = value.as_object_mut() {
        if status.is_null() {
            map.remove("status");
        } else {
            map.insert("status".into(), status);
        }
    }
    Ok(serde_json::from_value(value)?)
}

#[async_trait]
impl<K> ObjectStore<K> for MemoryStore<K>
where
    K: Resource<DynamicType = ()>
        + Clone
        + Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static,
{
    async fn get(&self, key: &ObjectKey) -> Result<Option<K>> {
        self.check(Method::Get).await?;
        Ok(self.get_object(key))
    }

    async fn create(&self, obj: &K) -> Result<K> {
        self.check(Method::Create).await?;
        let key = ObjectKey::of(obj)?;
        let mut state = self.state.lock();
        if state.objects.contains_key(&key) {
            return Err(OperatorError::Conflict(format!("{key} already exists")));
        }
        let mut created = obj.clone();
        created.meta_mut().uid = Some(format!("uid-{}", key.name));
        Self::bump(&mut state, &mut created);
        Self::record(&mut state, Method::Create, &key);
        state.objects.insert(key, created.clone());
        Ok(created)
    }

    async fn replace(&self, obj: &K) -> Result<K> {
        self.check(Method::Replace).await?;
        let key = ObjectKey::of(obj)?;
        let mut state = self.state.lock();
        let stored = state
            .objects
            .get(&key)
            .cloned()
            .ok_or_else(|| OperatorError::NotFound(key.to_string()))?;
        Self::check_version(&stored, obj, &key)?;

        // The main resource endpoint ignores status and cannot clear deletion.
        let mut replaced = with_status(obj, status_of(&stored)?)?;
        replaced.meta_mut().deletion_timestamp = stored.meta().deletion_timestamp.clone();
        Self::bump(&mut state, &mut replaced);
        Self::record(&mut state, Method::Replace, &key);

        if replaced.meta().deletion_timestamp.is_some() && replaced.finalizers().is_empty() {
            state.objects.remove(&key);
        } else {
            state.objects.insert(key, replaced.clone());
        }
        Ok(replaced)
    }

    async fn replace_status(&self, obj: &K) -> Result<K> {
        self.check(Method::ReplaceStatus).await?;
        let key = ObjectKey::of(obj)?;
        let mut state = self.state.lock();
        let stored = state
            .objects
            .get(&key)
            .cloned()
            .ok_or_else(|| OperatorError::NotFound(key.to_string()))?;
        Self::check_version(&stored, obj, &key)?;

        let mut updated = with_status(&stored, status_of(obj)?)?;
        Self::bump(&mut state, &mut updated);
        Self::record(&mut state, Method::ReplaceStatus, &key);
        state.objects.insert(key, updated.clone());
        Ok(updated)
    }

    async fn delete(&self, key: &ObjectKey) -> Result<()> {
        self.check(Method::Delete).await?;
        let mut state = self.state.lock();
        let Some(mut stored) = state.objects.get(key).cloned() else {
            return Err(OperatorError::NotFound(key.to_string()));
        };
        Self::record(&mut state, Method::Delete, key);
        if stored.finalizers().is_empty() {
            state.objects.remove(key);
        } else if stored.meta().deletion_timestamp.is_none() {
            stored.meta_mut().deletion_timestamp = Some(Time(chrono::Utc::now()));
            Self::bump(&mut state, &mut stored);
            state.objects.insert(key.clone(), stored);
        }
        Ok(())
    }
}

/// A reconciler wired to in-memory stores, with handles to inspect them.
pub struct Harness {
    pub apps: Arc<MemoryStore<MyApp>>,
    pub deployments: Arc<MemoryStore<Deployment>>,
    pub pdbs: Arc<MemoryStore<PodDisruptionBudget>>,
    pub metrics: Arc<PrometheusMetrics>,
    pub reconciler: Reconciler,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_cancellation(CancellationToken::new())
    }

    pub fn with_cancellation(token: CancellationToken) -> Self {
        let apps = MemoryStore::<MyApp>::new();
        let deployments = MemoryStore::<Deployment>::new();
        let pdbs = MemoryStore::<PodDisruptionBudget>::new();
        let metrics = Arc::new(PrometheusMetrics::new().expect("metrics registry"));
        let stores = Stores {
            apps: apps.clone(),
            deployments: deployments.clone(),
            pdbs: pdbs.clone(),
        };
        let reconciler = Reconciler::new(stores, metrics.clone()).with_cancellation(token);
        Self {
            apps,
            deployments,
            pdbs,
            metrics,
            reconciler,
        }
    }

    /// Every write across the three stores.
    pub fn write_count(&self) -> usize {
        self.apps.writes().len() + self.deployments.writes().len() + self.pdbs.writes().len()
    }

    pub fn clear_writes(&self) {
        self.apps.clear_writes();
        self.deployments.clear_writes();
        self.pdbs.clear_writes();
    }
}

pub fn myapp(namespace: &str, name: &str, replicas: i32, image: &str) -> MyApp {
    let mut app = MyApp::new(
        name,
        MyAppSpec {
            replicas,
            image: image.into(),
            args: vec![],
        },
    );
    app.metadata.namespace = Some(namespace.into());
    app.metadata.uid = Some(format!("uid-{name}"));
    app
}

pub fn key(namespace: &str, name: &str) -> ObjectKey {
    ObjectKey::new(namespace, name)
}

pub fn ignored(mut app: MyApp) -> MyApp {
    app.labels_mut()
        .insert("reconciler".into(), "ignore".into());
    app
}
