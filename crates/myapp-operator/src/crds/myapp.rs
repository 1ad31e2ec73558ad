use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::constants::{defaults, labels, values};
use crate::error::{OperatorError, Result};

/// Desired state of an application managed by the operator.
#[derive(CustomResource, Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "myapp.example.com",
    version = "v1",
    kind = "MyApp",
    namespaced,
    status = "MyAppStatus",
    shortname = "ma",
    printcolumn = r#"{"name":"Replicas","type":"integer","jsonPath":".spec.replicas"}"#,
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Healthy","type":"boolean","jsonPath":".status.healthy"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct MyAppSpec {
    /// Number of workload replicas.
    #[serde(default = "super::defaults::replicas")]
    pub replicas: i32,

    /// Container image for the workload.
    pub image: String,

    /// Arguments passed to the container.
    #[serde(default)]
    pub args: Vec<String>,
}

/// Status for MyApp.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MyAppStatus {
    /// Current phase. `Running` once both dependents are applied.
    #[serde(default)]
    pub phase: Option<String>,

    /// Whether the dependents are in their desired state.
    #[serde(default)]
    pub healthy: bool,
}

impl MyAppStatus {
    pub fn running() -> Self {
        Self {
            phase: Some(defaults::PHASE_RUNNING.to_string()),
            healthy: true,
        }
    }
}

impl MyAppSpec {
    /// Reject values the API server would refuse on the dependent Deployment.
    pub fn validate(&self) -> Result<()> {
        if self.replicas < 0 {
            return Err(OperatorError::Invalid(format!(
                "spec.replicas must be >= 0, got {}",
                self.replicas
            )));
        }
        if self.image.trim().is_empty() {
            return Err(OperatorError::Invalid("spec.image must not be empty".into()));
        }
        Ok(())
    }
}

impl MyApp {
    /// True when labelled `reconciler=ignore`.
    pub fn is_ignored(&self) -> bool {
        self.labels()
            .get(labels::RECONCILER)
            .is_some_and(|v| v == values::RECONCILER_IGNORE)
    }

    pub fn is_running(&self) -> bool {
        self.status.as_ref() == Some(&MyAppStatus::running())
    }
}
