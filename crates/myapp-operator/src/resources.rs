//! Desired-state compilation for MyApp dependents.
//!
//! Everything here is pure: the same MyApp always compiles to the same
//! Deployment and PodDisruptionBudget, names included.

pub mod deployment_builder;
pub mod pdb_builder;

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{Resource, ResourceExt};

use crate::constants::{labels, names};
use crate::crds::MyApp;

/// The two dependents a MyApp should own.
#[derive(Clone, Debug, PartialEq)]
pub struct DesiredState {
    pub deployment: Deployment,
    pub pdb: PodDisruptionBudget,
}

/// Compile a MyApp into its desired dependents.
///
/// Spec values are passed through unchecked; see `MyAppSpec::validate`.
pub fn compile(app: &MyApp) -> DesiredState {
    let name = app.name_any();
    let namespace = app.namespace().unwrap_or_else(|| "default".into());
    let selector = selector_labels(&name);
    let owner_ref = owner_reference(app);

    DesiredState {
        deployment: deployment_builder::build_deployment(
            &deployment_name(&name),
            &namespace,
            &app.spec,
            selector.clone(),
            owner_ref.clone(),
        ),
        pdb: pdb_builder::build_pdb(&pdb_name(&name), &namespace, selector, owner_ref),
    }
}

pub fn deployment_name(app_name: &str) -> String {
    format!("{app_name}{}", names::DEPLOYMENT_SUFFIX)
}

pub fn pdb_name(app_name: &str) -> String {
    format!("{app_name}{}", names::PDB_SUFFIX)
}

/// Labels shared by the Deployment selector, its pod template and the PDB selector.
pub fn selector_labels(app_name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([(labels::APP.into(), app_name.into())])
}

/// Build an OwnerReference pointing at a MyApp.
pub fn owner_reference(app: &MyApp) -> OwnerReference {
    OwnerReference {
        api_version: MyApp::api_version(&()).to_string(),
        kind: MyApp::kind(&()).to_string(),
        name: app.name_any(),
        uid: app.metadata.uid.clone().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}
