use std::collections::BTreeMap;

use k8s_openapi::api::policy::v1::{PodDisruptionBudget, PodDisruptionBudgetSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta, OwnerReference};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use crate::constants::defaults;

/// Build the PodDisruptionBudget guarding a MyApp's pods.
pub fn build_pdb(
    pdb_name: &str,
    namespace: &str,
    selector_labels: BTreeMap<String, String>,
    owner_ref: OwnerReference,
) -> PodDisruptionBudget {
    PodDisruptionBudget {
        metadata: ObjectMeta {
            name: Some(pdb_name.into()),
            namespace: Some(namespace.into()),
            owner_references: Some(vec![owner_ref]),
            ..Default::default()
        },
        spec: Some(PodDisruptionBudgetSpec {
            min_available: Some(IntOrString::Int(defaults::MIN_AVAILABLE)),
            selector: Some(LabelSelector {
                match_labels: Some(selector_labels),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::labels;

    fn test_owner_ref() -> OwnerReference {
        OwnerReference {
            api_version: "myapp.example.com/v1".into(),
            kind: "MyApp".into(),
            name: "test".into(),
            uid: "test-uid".into(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        }
    }

    #[test]
    fn test_build_pdb() {
        let selector = BTreeMap::from([(labels::APP.into(), "my-app".into())]);

        let pdb = build_pdb("my-app-pdb", "default", selector, test_owner_ref());

        assert_eq!(pdb.metadata.name.as_deref(), Some("my-app-pdb"));
        let spec = pdb.spec.as_ref().unwrap();
        assert_eq!(spec.min_available, Some(IntOrString::Int(1)));
        assert_eq!(spec.max_unavailable, None);
        let match_labels = spec
            .selector
            .as_ref()
            .unwrap()
            .match_labels
            .as_ref()
            .unwrap();
        assert_eq!(match_labels.get(labels::APP).unwrap(), "my-app");
    }
}
