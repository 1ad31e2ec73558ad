//! Reconciler for MyApp resources.
//!
//! One invocation loads the MyApp, advances its lifecycle, applies the
//! Deployment and PodDisruptionBudget, and writes status. Retries are never
//! looped here: every path ends in a fixed requeue and the scheduler owns
//! backoff.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use kube::runtime::controller::Action;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::apply::Applied;
use crate::constants::defaults;
use crate::crds::{MyApp, MyAppStatus};
use crate::error::{OperatorError, Result};
use crate::finalizer::{self, Lifecycle, Transition};
use crate::metrics::{ReconcileMetrics, ReconcileResult};
use crate::resources;
use crate::store::{ObjectKey, Stores};

/// Store operation a failure is attributed to. Used as the `kind` metric label.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    GetMyApp,
    AddFinalizer,
    RemoveFinalizer,
    ValidateMyApp,
    UpdateStatus,
    GetDeployment,
    CreateDeployment,
    UpdateDeployment,
    DeleteDeployment,
    GetPdb,
    CreatePdb,
    UpdatePdb,
    DeletePdb,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::GetMyApp => "GetMyApp",
            Operation::AddFinalizer => "AddFinalizer",
            Operation::RemoveFinalizer => "RemoveFinalizer",
            Operation::ValidateMyApp => "ValidateMyApp",
            Operation::UpdateStatus => "UpdateStatus",
            Operation::GetDeployment => "GetDeployment",
            Operation::CreateDeployment => "CreateDeployment",
            Operation::UpdateDeployment => "UpdateDeployment",
            Operation::DeleteDeployment => "DeleteDeployment",
            Operation::GetPdb => "GetPDB",
            Operation::CreatePdb => "CreatePDB",
            Operation::UpdatePdb => "UpdatePDB",
            Operation::DeletePdb => "DeletePDB",
        }
    }
}

/// Result of the lifecycle step.
enum Step {
    /// Carry on with dependent reconciliation on this (possibly re-persisted) MyApp.
    Continue(MyApp),
    /// Nothing more to do this invocation.
    Finished,
}

/// Reconciler for MyApp.
pub struct Reconciler {
    pub(crate) stores: Stores,
    metrics: Arc<dyn ReconcileMetrics>,
    cancel: CancellationToken,
}

impl Reconciler {
    pub fn new(stores: Stores, metrics: Arc<dyn ReconcileMetrics>) -> Self {
        Self {
            stores,
            metrics,
            cancel: CancellationToken::new(),
        }
    }

    /// Fail in-flight store calls once `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// The fixed requeue directive returned on every path.
    pub fn requeue() -> Action {
        Action::requeue(Duration::from_secs(defaults::REQUEUE_SECS))
    }

    /// Drive one MyApp toward its desired state.
    #[instrument(skip_all, fields(myapp = %key))]
    pub async fn reconcile(&self, key: &ObjectKey) -> Result<Action> {
        let started = Instant::now();
        let result = self.reconcile_inner(key).await;
        let outcome = match &result {
            Ok(_) => ReconcileResult::Success,
            Err(_) => ReconcileResult::Error,
        };
        self.metrics
            .observe_reconcile(outcome, started.elapsed().as_secs_f64());
        result
    }

    async fn reconcile_inner(&self, key: &ObjectKey) -> Result<Action> {
        let Some(app) = self.call(Operation::GetMyApp, self.stores.apps.get(key)).await? else {
            debug!("MyApp not found, assuming it was deleted");
            self.metrics.instance_released(key);
            return Ok(Self::requeue());
        };

        let app = match self.advance_lifecycle(key, app).await? {
            Step::Continue(app) => app,
            Step::Finished => return Ok(Self::requeue()),
        };

        if app.is_ignored() {
            info!(
                namespace = %key.namespace,
                name = %key.name,
                "Ignoring MyApp due to reconciler=ignore label"
            );
            return Ok(Self::requeue());
        }

        app.spec
            .validate()
            .map_err(|e| self.fail(Operation::ValidateMyApp, e))?;

        let desired = resources::compile(&app);
        let deployment = self
            .reconcile_one(&*self.stores.deployments, &desired.deployment)
            .await?;
        let pdb = self.reconcile_one(&*self.stores.pdbs, &desired.pdb).await?;
        if deployment.applied() || pdb.applied() {
            info!(?deployment, ?pdb, "Dependents applied");
        } else {
            debug!("Dependents already in desired state");
        }

        self.ensure_running_status(app, deployment, pdb).await?;

        Ok(Self::requeue())
    }

    /// Add the finalizer, or run cleanup, depending on the lifecycle state.
    async fn advance_lifecycle(&self, key: &ObjectKey, mut app: MyApp) -> Result<Step> {
        match Lifecycle::of(&app).transition() {
            Transition::Reconcile => {
                self.metrics.instance_managed(key);
                Ok(Step::Continue(app))
            }
            Transition::AddFinalizer => {
                info!(namespace = %key.namespace, name = %key.name, "Adding finalizer");
                finalizer::add_finalizer(&mut app);
                let app = self
                    .call(Operation::AddFinalizer, self.stores.apps.replace(&app))
                    .await?;
                self.metrics.instance_managed(key);
                Ok(Step::Continue(app))
            }
            Transition::Cleanup => {
                self.cleanup(key, &app).await?;
                finalizer::remove_finalizer(&mut app);
                info!(namespace = %key.namespace, name = %key.name, "Removing finalizer");
                self.call(Operation::RemoveFinalizer, self.stores.apps.replace(&app))
                    .await?;
                self.metrics.instance_released(key);
                Ok(Step::Finished)
            }
            Transition::Nothing => {
                debug!("MyApp is being deleted and already released");
                self.metrics.instance_released(key);
                Ok(Step::Finished)
            }
        }
    }

    /// Delete both dependents. Already-absent dependents count as deleted.
    async fn cleanup(&self, key: &ObjectKey, app: &MyApp) -> Result<()> {
        if app.is_ignored() {
            info!(
                namespace = %key.namespace,
                name = %key.name,
                "Skipping dependent cleanup due to reconciler=ignore label"
            );
            return Ok(());
        }

        let deployment = ObjectKey::new(&key.namespace, resources::deployment_name(&key.name));
        info!(namespace = %key.namespace, name = %deployment.name, "Deleting Deployment");
        self.delete_dependent(
            Operation::DeleteDeployment,
            self.stores.deployments.delete(&deployment),
        )
        .await?;

        let pdb = ObjectKey::new(&key.namespace, resources::pdb_name(&key.name));
        info!(namespace = %key.namespace, name = %pdb.name, "Deleting PodDisruptionBudget");
        self.delete_dependent(Operation::DeletePdb, self.stores.pdbs.delete(&pdb))
            .await
    }

    async fn delete_dependent(
        &self,
        op: Operation,
        fut: impl Future<Output = Result<()>>,
    ) -> Result<()> {
        match self.guarded(fut).await {
            Err(e) if e.is_not_found() => {
                debug!(operation = op.as_str(), "Already deleted");
                Ok(())
            }
            other => other.map_err(|e| self.fail(op, e)),
        }
    }

    async fn ensure_running_status(
        &self,
        mut app: MyApp,
        deployment: Applied,
        pdb: Applied,
    ) -> Result<()> {
        if app.is_running() {
            return Ok(());
        }
        info!(?deployment, ?pdb, "Marking MyApp Running");
        app.status = Some(MyAppStatus::running());
        self.call(Operation::UpdateStatus, self.stores.apps.replace_status(&app))
            .await?;
        Ok(())
    }

    /// Run a store call, failing fast with `Cancelled` once the token fires.
    pub(crate) async fn guarded<T>(&self, fut: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(OperatorError::Cancelled),
            res = fut => res,
        }
    }

    /// `guarded`, attributing any failure to `op`.
    pub(crate) async fn call<T>(
        &self,
        op: Operation,
        fut: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        self.guarded(fut).await.map_err(|e| self.fail(op, e))
    }

    /// Count a failure and hand it back for propagation.
    pub(crate) fn fail(&self, op: Operation, err: OperatorError) -> OperatorError {
        warn!(operation = op.as_str(), category = %err.category(), "Reconcile step failed: {err}");
        self.metrics.record_error(op.as_str(), err.category());
        err
    }
}
