//! Finalizer bookkeeping and the MyApp lifecycle state machine.

use std::collections::BTreeSet;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::Resource;

use crate::constants::FINALIZER;

/// Set view over `metadata.finalizers`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FinalizerSet(BTreeSet<String>);

impl FinalizerSet {
    pub fn from_meta(meta: &ObjectMeta) -> Self {
        Self(meta.finalizers.iter().flatten().cloned().collect())
    }

    pub fn contains(&self, finalizer: &str) -> bool {
        self.0.contains(finalizer)
    }

    /// Returns false if the finalizer was already present.
    pub fn insert(&mut self, finalizer: &str) -> bool {
        self.0.insert(finalizer.to_string())
    }

    /// Returns false if the finalizer was not present.
    pub fn remove(&mut self, finalizer: &str) -> bool {
        self.0.remove(finalizer)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Write the set back into object metadata.
    pub fn write_to(&self, meta: &mut ObjectMeta) {
        meta.finalizers = if self.is_empty() {
            None
        } else {
            Some(self.0.iter().cloned().collect())
        };
    }
}

/// Where a MyApp stands relative to this controller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Lifecycle {
    /// No deletion requested.
    Active { finalized: bool },
    /// Deletion requested, our finalizer still blocks removal.
    Deleting,
    /// Deletion requested and our finalizer is gone. Removal belongs to the API server.
    ReadyToRemove,
}

/// The single action a lifecycle state calls for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transition {
    AddFinalizer,
    Reconcile,
    Cleanup,
    Nothing,
}

impl Lifecycle {
    pub fn of<K: Resource>(obj: &K) -> Self {
        let meta = obj.meta();
        let finalized = FinalizerSet::from_meta(meta).contains(FINALIZER);
        match (meta.deletion_timestamp.is_some(), finalized) {
            (false, finalized) => Lifecycle::Active { finalized },
            (true, true) => Lifecycle::Deleting,
            (true, false) => Lifecycle::ReadyToRemove,
        }
    }

    pub fn transition(self) -> Transition {
        match self {
            Lifecycle::Active { finalized: false } => Transition::AddFinalizer,
            Lifecycle::Active { finalized: true } => Transition::Reconcile,
            Lifecycle::Deleting => Transition::Cleanup,
            Lifecycle::ReadyToRemove => Transition::Nothing,
        }
    }
}

/// Add our finalizer to an object's metadata. Returns false if already held.
pub fn add_finalizer<K: Resource>(obj: &mut K) -> bool {
    let mut set = FinalizerSet::from_meta(obj.meta());
    let added = set.insert(FINALIZER);
    if added {
        set.write_to(obj.meta_mut());
    }
    added
}

/// Remove our finalizer from an object's metadata. Returns false if it was absent.
pub fn remove_finalizer<K: Resource>(obj: &mut K) -> bool {
    let mut set = FinalizerSet::from_meta(obj.meta());
    let removed = set.remove(FINALIZER);
    if removed {
        set.write_to(obj.meta_mut());
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crds::{MyApp, MyAppSpec};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;

    fn app(finalizers: Option<Vec<&str>>, deleting: bool) -> MyApp {
        let mut app = MyApp::new(
            "demo",
            MyAppSpec {
                replicas: 1,
                image: "img:v1".into(),
                args: vec![],
            },
        );
        app.metadata.finalizers = finalizers.map(|f| f.into_iter().map(String::from).collect());
        if deleting {
            app.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
        }
        app
    }

    #[test]
    fn test_finalizer_set_is_order_independent() {
        let a = FinalizerSet::from_meta(&ObjectMeta {
            finalizers: Some(vec!["x".into(), FINALIZER.into()]),
            ..Default::default()
        });
        let b = FinalizerSet::from_meta(&ObjectMeta {
            finalizers: Some(vec![FINALIZER.into(), "x".into()]),
            ..Default::default()
        });
        assert_eq!(a, b);
        assert!(a.contains(FINALIZER));
    }

    #[test]
    fn test_insert_and_remove_report_changes() {
        let mut set = FinalizerSet::default();
        assert!(set.insert(FINALIZER));
        assert!(!set.insert(FINALIZER));
        assert!(set.remove(FINALIZER));
        assert!(!set.remove(FINALIZER));
        assert!(set.is_empty());
    }

    #[test]
    fn test_write_to_clears_empty_list() {
        let mut meta = ObjectMeta {
            finalizers: Some(vec![FINALIZER.into()]),
            ..Default::default()
        };
        let mut set = FinalizerSet::from_meta(&meta);
        set.remove(FINALIZER);
        set.write_to(&mut meta);
        assert_eq!(meta.finalizers, None);
    }

    #[test]
    fn test_lifecycle_states() {
        assert_eq!(
            Lifecycle::of(&app(None, false)),
            Lifecycle::Active { finalized: false }
        );
        assert_eq!(
            Lifecycle::of(&app(Some(vec![FINALIZER]), false)),
            Lifecycle::Active { finalized: true }
        );
        assert_eq!(
            Lifecycle::of(&app(Some(vec![FINALIZER, "other"]), true)),
            Lifecycle::Deleting
        );
        assert_eq!(
            Lifecycle::of(&app(Some(vec!["other"]), true)),
            Lifecycle::ReadyToRemove
        );
    }

    #[test]
    fn test_transitions() {
        assert_eq!(
            Lifecycle::Active { finalized: false }.transition(),
            Transition::AddFinalizer
        );
        assert_eq!(
            Lifecycle::Active { finalized: true }.transition(),
            Transition::Reconcile
        );
        assert_eq!(Lifecycle::Deleting.transition(), Transition::Cleanup);
        assert_eq!(Lifecycle::ReadyToRemove.transition(), Transition::Nothing);
    }

    #[test]
    fn test_add_and_remove_keep_foreign_finalizers() {
        let mut obj = app(Some(vec!["other"]), false);
        assert!(add_finalizer(&mut obj));
        assert!(!add_finalizer(&mut obj));
        assert_eq!(Lifecycle::of(&obj), Lifecycle::Active { finalized: true });

        assert!(remove_finalizer(&mut obj));
        assert_eq!(obj.metadata.finalizers, Some(vec!["other".to_string()]));
        assert!(!remove_finalizer(&mut obj));
    }
}
