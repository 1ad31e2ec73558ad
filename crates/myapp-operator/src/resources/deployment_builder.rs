use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, PodSpec, PodTemplateSpec, ResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta, OwnerReference};

use crate::constants::{names, ports, resources};
use crate::crds::MyAppSpec;

/// Build the workload Deployment for a MyApp.
pub fn build_deployment(
    deployment_name: &str,
    namespace: &str,
    spec: &MyAppSpec,
    selector_labels: BTreeMap<String, String>,
    owner_ref: OwnerReference,
) -> Deployment {
    Deployment {
        metadata: ObjectMeta {
            name: Some(deployment_name.into()),
            namespace: Some(namespace.into()),
            owner_references: Some(vec![owner_ref]),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(spec.replicas),
            selector: LabelSelector {
                match_labels: Some(selector_labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(selector_labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![build_container(spec)],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn build_container(spec: &MyAppSpec) -> Container {
    Container {
        name: names::CONTAINER.into(),
        image: Some(spec.image.clone()),
        args: (!spec.args.is_empty()).then(|| spec.args.clone()),
        resources: Some(container_resources()),
        ports: Some(vec![ContainerPort {
            container_port: ports::HTTP,
            ..Default::default()
        }]),
        ..Default::default()
    }
}

/// Fixed request/limit policy for the workload container.
pub fn container_resources() -> ResourceRequirements {
    ResourceRequirements {
        requests: Some(BTreeMap::from([
            ("cpu".into(), Quantity(resources::CPU_REQUEST.into())),
            ("memory".into(), Quantity(resources::MEMORY_REQUEST.into())),
        ])),
        limits: Some(BTreeMap::from([
            ("cpu".into(), Quantity(resources::CPU_LIMIT.into())),
            ("memory".into(), Quantity(resources::MEMORY_LIMIT.into())),
        ])),
        ..Default::default()
    }
}
