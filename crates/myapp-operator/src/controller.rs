//! Wiring between `kube::runtime::Controller` and the MyApp reconciler.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use kube::api::{Api, ApiResource, DynamicObject};
use kube::core::GroupVersionKind;
use kube::runtime::controller::{Action, Controller};
use kube::runtime::watcher;
use kube::{Client, Resource, ResourceExt};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::constants::defaults;
use crate::crds::MyApp;
use crate::error::{OperatorError, Result};
use crate::leader_election::LeaderStatus;
use crate::metrics::ReconcileMetrics;
use crate::reconciler::Reconciler;
use crate::store::{ObjectKey, Stores};

/// The kind a controller reconciles and the kinds it owns.
///
/// A change to any owned object is mapped back to its MyApp owner through
/// the controller owner reference.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Registration {
    pub reconciles: GroupVersionKind,
    pub owns: Vec<GroupVersionKind>,
}

impl Registration {
    pub fn myapp() -> Self {
        Self {
            reconciles: gvk_of::<MyApp>(),
            owns: vec![gvk_of::<Deployment>(), gvk_of::<PodDisruptionBudget>()],
        }
    }
}

fn gvk_of<K: Resource<DynamicType = ()>>() -> GroupVersionKind {
    GroupVersionKind::gvk(&K::group(&()), &K::version(&()), &K::kind(&()))
}

/// Consecutive transient failures per MyApp, turned into a retry delay.
#[derive(Default)]
pub struct Backoff {
    failures: Mutex<HashMap<ObjectKey, u32>>,
}

impl Backoff {
    /// Record one more failure for `key` and return the delay before retrying.
    pub fn next_delay(&self, key: &ObjectKey) -> Duration {
        let mut failures = self.failures.lock();
        let attempt = failures.entry(key.clone()).or_insert(0);
        let delay = defaults::ERROR_BACKOFF_BASE_SECS
            .saturating_mul(1u64 << (*attempt).min(16))
            .min(defaults::ERROR_BACKOFF_MAX_SECS);
        *attempt = attempt.saturating_add(1);
        Duration::from_secs(delay)
    }

    pub fn reset(&self, key: &ObjectKey) {
        self.failures.lock().remove(key);
    }
}

/// Shared context for the MyApp controller.
pub struct Context {
    pub reconciler: Reconciler,
    pub leader: LeaderStatus,
    pub backoff: Backoff,
}

impl Context {
    pub fn new(reconciler: Reconciler, leader: LeaderStatus) -> Self {
        Self {
            reconciler,
            leader,
            backoff: Backoff::default(),
        }
    }
}

/// Watch MyApps and the kinds `Registration::myapp` declares as owned until
/// `shutdown` fires.
pub async fn run(
    client: Client,
    metrics: Arc<dyn ReconcileMetrics>,
    leader: LeaderStatus,
    shutdown: CancellationToken,
) {
    let registration = Registration::myapp();
    info!(
        reconciles = ?registration.reconciles,
        owns = ?registration.owns,
        "Starting MyApp controller"
    );

    let apps: Api<MyApp> = Api::all(client.clone());
    let mut controller = Controller::new(apps, watcher::Config::default());
    for gvk in &registration.owns {
        let resource = ApiResource::from_gvk(gvk);
        let api: Api<DynamicObject> = Api::all_with(client.clone(), &resource);
        controller = controller.owns_with(api, resource, watcher::Config::default());
    }

    let reconciler =
        Reconciler::new(Stores::kube(client), metrics).with_cancellation(shutdown.clone());
    let ctx = Arc::new(Context::new(reconciler, leader));

    controller
        .run(reconcile, error_policy, ctx)
        .take_until(shutdown.cancelled_owned())
        .for_each(|res| async move {
            match res {
                Ok((obj, _action)) => debug!(myapp = %obj.name, "Reconciled"),
                Err(e) => error!("Reconciliation error: {e:?}"),
            }
        })
        .await;
}

fn key_of(app: &MyApp) -> ObjectKey {
    ObjectKey::new(app.namespace().unwrap_or_default(), app.name_any())
}

/// Reconcile one MyApp if this replica is the leader.
pub async fn reconcile(app: Arc<MyApp>, ctx: Arc<Context>) -> Result<Action> {
    if !ctx.leader.is_leader() {
        debug!(myapp = %app.name_any(), "Not the leader, skipping");
        return Ok(Reconciler::requeue());
    }
    let key = ObjectKey::of(app.as_ref())?;
    let action = ctx.reconciler.reconcile(&key).await?;
    ctx.backoff.reset(&key);
    Ok(action)
}

/// Transient failures retry with per-object exponential backoff; anything
/// else waits for a spec or cluster change.
pub fn error_policy(app: Arc<MyApp>, error: &OperatorError, ctx: Arc<Context>) -> Action {
    warn!(
        myapp = %app.name_any(),
        category = %error.category(),
        transient = error.is_transient(),
        "Reconcile failed: {error}"
    );
    if error.is_transient() {
        Action::requeue(ctx.backoff.next_delay(&key_of(&app)))
    } else {
        Action::requeue(Duration::from_secs(defaults::PERMANENT_ERROR_REQUEUE_SECS))
    }
}
