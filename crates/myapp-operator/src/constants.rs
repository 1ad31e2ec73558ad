/// Kubernetes label keys applied to and selected on dependent resources.
pub mod labels {
    /// Selector key shared by the Deployment pods and the PodDisruptionBudget.
    pub const APP: &str = "app";

    /// Label on a MyApp that opts it out of dependent reconciliation.
    pub const RECONCILER: &str = "reconciler";
}

/// Label values.
pub mod values {
    /// `reconciler=ignore` skips dependent reconciliation for the labelled MyApp.
    pub const RECONCILER_IGNORE: &str = "ignore";
}

/// Finalizer held on a MyApp until its dependents are cleaned up.
pub const FINALIZER: &str = "myapp.finalizers.example.com";

/// Field manager name reported to the API server.
pub const MANAGER: &str = "myapp-operator";

/// Dependent resource naming.
pub mod names {
    pub const DEPLOYMENT_SUFFIX: &str = "-deployment";
    pub const PDB_SUFFIX: &str = "-pdb";
    pub const CONTAINER: &str = "myapp-container";
}

/// Ports exposed by the workload container.
pub mod ports {
    pub const HTTP: i32 = 80;
}

/// Fixed resource policy for the workload container.
pub mod resources {
    pub const CPU_REQUEST: &str = "100m";
    pub const MEMORY_REQUEST: &str = "128Mi";
    pub const CPU_LIMIT: &str = "500m";
    pub const MEMORY_LIMIT: &str = "256Mi";
}

/// Policy defaults.
pub mod defaults {
    /// Replica count used when a MyApp omits `spec.replicas`.
    pub const REPLICAS: i32 = 1;

    /// Minimum available pods guarded by the PodDisruptionBudget.
    pub const MIN_AVAILABLE: i32 = 1;

    /// Requeue interval in seconds after a successful reconcile.
    pub const REQUEUE_SECS: u64 = 30;

    /// First retry delay after a transient failure. Doubles per consecutive failure.
    pub const ERROR_BACKOFF_BASE_SECS: u64 = 1;

    /// Upper bound on the transient retry delay.
    pub const ERROR_BACKOFF_MAX_SECS: u64 = 15;

    /// Retry delay after a failure that needs a spec or cluster change.
    pub const PERMANENT_ERROR_REQUEUE_SECS: u64 = 300;

    /// Phase written to status once both dependents are applied.
    pub const PHASE_RUNNING: &str = "Running";
}
