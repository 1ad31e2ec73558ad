//! Diff and apply for dependent resources.
//!
//! Drift is judged on the fields this controller owns, never on the whole
//! object, so fields the API server defaults (pull policy, port protocol,
//! strategy, revision history) do not trigger updates.

use std::collections::BTreeMap;
use std::fmt::Debug;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Container, PodTemplateSpec};
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{Resource, ResourceExt};
use tracing::info;

use crate::error::Result;
use crate::reconciler::{Operation, Reconciler};
use crate::store::{ObjectKey, ObjectStore};

/// What `reconcile_one` did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Applied {
    Created,
    Updated,
    Unchanged,
}

impl Applied {
    /// True when a write was issued.
    pub fn applied(self) -> bool {
        !matches!(self, Applied::Unchanged)
    }
}

/// A resource kind reconciled from a MyApp.
pub trait Dependent: Resource<DynamicType = ()> + Clone + Debug + Send + Sync + 'static {
    const GET: Operation;
    const CREATE: Operation;
    const UPDATE: Operation;

    /// Projection of the fields this controller owns.
    type Owned: PartialEq + Debug;

    fn owned_fields(&self) -> Self::Owned;

    /// Overwrite the owned spec with `desired`'s, keeping server metadata.
    fn take_spec(&mut self, desired: &Self);
}

/// Owned projection of a container.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContainerFields {
    pub name: String,
    pub image: Option<String>,
    pub args: Vec<String>,
    pub ports: Vec<i32>,
    pub requests: BTreeMap<String, String>,
    pub limits: BTreeMap<String, String>,
}

/// Owned projection of a Deployment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkloadFields {
    pub replicas: Option<i32>,
    pub selector: BTreeMap<String, String>,
    pub template_labels: BTreeMap<String, String>,
    pub containers: Vec<ContainerFields>,
}

/// Owned projection of a PodDisruptionBudget.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GuardFields {
    pub min_available: Option<IntOrString>,
    pub selector: BTreeMap<String, String>,
}

fn quantities(list: Option<&BTreeMap<String, Quantity>>) -> BTreeMap<String, String> {
    list.into_iter()
        .flatten()
        .map(|(k, v)| (k.clone(), v.0.clone()))
        .collect()
}

fn match_labels(selector: Option<&LabelSelector>) -> BTreeMap<String, String> {
    selector
        .and_then(|s| s.match_labels.clone())
        .unwrap_or_default()
}

fn container_fields(c: &Container) -> ContainerFields {
    let resources = c.resources.as_ref();
    ContainerFields {
        name: c.name.clone(),
        image: c.image.clone(),
        args: c.args.clone().unwrap_or_default(),
        ports: c
            .ports
            .iter()
            .flatten()
            .map(|p| p.container_port)
            .collect(),
        requests: quantities(resources.and_then(|r| r.requests.as_ref())),
        limits: quantities(resources.and_then(|r| r.limits.as_ref())),
    }
}

fn template_fields(template: &PodTemplateSpec) -> (BTreeMap<String, String>, Vec<ContainerFields>) {
    let labels = template
        .metadata
        .as_ref()
        .and_then(|m| m.labels.clone())
        .unwrap_or_default();
    let containers = template
        .spec
        .iter()
        .flat_map(|s| s.containers.iter())
        .map(container_fields)
        .collect();
    (labels, containers)
}

impl Dependent for Deployment {
    const GET: Operation = Operation::GetDeployment;
    const CREATE: Operation = Operation::CreateDeployment;
    const UPDATE: Operation = Operation::UpdateDeployment;

    type Owned = Option<WorkloadFields>;

    fn owned_fields(&self) -> Self::Owned {
        self.spec.as_ref().map(|spec| {
            let (template_labels, containers) = template_fields(&spec.template);
            WorkloadFields {
                replicas: spec.replicas,
                selector: match_labels(Some(&spec.selector)),
                template_labels,
                containers,
            }
        })
    }

    fn take_spec(&mut self, desired: &Self) {
        self.spec = desired.spec.clone();
    }
}

impl Dependent for PodDisruptionBudget {
    const GET: Operation = Operation::GetPdb;
    const CREATE: Operation = Operation::CreatePdb;
    const UPDATE: Operation = Operation::UpdatePdb;

    type Owned = Option<GuardFields>;

    fn owned_fields(&self) -> Self::Owned {
        self.spec.as_ref().map(|spec| GuardFields {
            min_available: spec.min_available.clone(),
            selector: match_labels(spec.selector.as_ref()),
        })
    }

    fn take_spec(&mut self, desired: &Self) {
        self.spec = desired.spec.clone();
    }
}

/// True when `current` has drifted from `desired` on owned fields, or has
/// lost one of the desired owner references.
pub fn has_drifted<K: Dependent>(current: &K, desired: &K) -> bool {
    current.owned_fields() != desired.owned_fields() || !has_owner_refs(current, desired)
}

fn has_owner_refs<K: Resource>(current: &K, desired: &K) -> bool {
    let held = current.owner_references();
    desired
        .owner_references()
        .iter()
        .all(|want| held.iter().any(|r| r == want))
}

/// Bring `current` to `desired`: owned spec plus owner references. Other
/// owners are kept, but only `desired` may claim the controller role.
pub fn adopt<K: Dependent>(current: &mut K, desired: &K) {
    current.take_spec(desired);

    let wanted = desired.owner_references();
    let mut refs: Vec<OwnerReference> = current
        .owner_references()
        .iter()
        .filter(|r| r.controller != Some(true) && wanted.iter().all(|w| w.uid != r.uid))
        .cloned()
        .collect();
    refs.extend(wanted.iter().cloned());
    current.meta_mut().owner_references = (!refs.is_empty()).then_some(refs);
}

impl Reconciler {
    /// Create, update, or leave alone one dependent.
    ///
    /// Failures are returned as-is; the caller's requeue handles retry.
    pub(crate) async fn reconcile_one<K: Dependent>(
        &self,
        store: &dyn ObjectStore<K>,
        desired: &K,
    ) -> Result<Applied> {
        let key = ObjectKey::of(desired)?;
        let kind = K::kind(&());

        match self.call(K::GET, store.get(&key)).await? {
            None => {
                info!(namespace = %key.namespace, name = %key.name, %kind, "Creating");
                self.call(K::CREATE, store.create(desired)).await?;
                Ok(Applied::Created)
            }
            Some(mut current) if has_drifted(&current, desired) => {
                info!(namespace = %key.namespace, name = %key.name, %kind, "Updating");
                adopt(&mut current, desired);
                self.call(K::UPDATE, store.replace(&current)).await?;
                Ok(Applied::Updated)
            }
            Some(_) => Ok(Applied::Unchanged),
        }
    }
}
