//! MyApp Kubernetes operator
//!
//! Reconciles `MyApp` resources into a Deployment and a PodDisruptionBudget,
//! guarded by a finalizer so dependents are removed before the MyApp goes.

pub mod apply;
pub mod config;
pub mod constants;
pub mod controller;
pub mod crds;
pub mod error;
pub mod finalizer;
pub mod leader_election;
pub mod metrics;
pub mod reconciler;
pub mod resources;
pub mod store;
pub mod telemetry;

pub use crds::{MyApp, MyAppSpec, MyAppStatus};
pub use error::{OperatorError, Result};
pub use reconciler::Reconciler;
