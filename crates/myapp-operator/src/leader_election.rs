//! Lease-based leader election.
//!
//! Only the replica holding the `myapp.leader` Lease reconciles. The lease
//! is renewed by writing an epoch annotation with an optimistic replace; a
//! lease whose annotation is older than its duration may be taken over.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, PostParams};
use kube::Client;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::constants::MANAGER;
use crate::error::{OperatorError, Result};

/// Annotation holding the last renewal time in epoch seconds.
pub const ANNOTATION_RENEW_EPOCH: &str = "myapp.example.com/renew-epoch";

/// Configuration for Lease-based leader election.
#[derive(Clone, Debug)]
pub struct LeaderElectionConfig {
    /// Name of the Lease object.
    pub lease_name: String,
    /// Namespace where the Lease lives.
    pub namespace: String,
    /// Unique identity of this replica (typically the pod name).
    pub holder_id: String,
    /// How long the lease is valid without renewal (seconds).
    pub lease_duration_secs: i32,
    /// How often to attempt renewal (seconds).
    pub renew_interval_secs: u64,
}

/// Shared leader flag read by the controller on every reconcile.
#[derive(Clone, Default)]
pub struct LeaderStatus {
    is_leader: Arc<AtomicBool>,
}

impl LeaderStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_leader(&self) -> bool {
        self.is_leader.load(Ordering::Relaxed)
    }

    /// Used when leader election is disabled.
    pub fn force_leader(&self) {
        self.set_leader(true);
    }

    fn set_leader(&self, v: bool) {
        self.is_leader.store(v, Ordering::Relaxed);
    }
}

/// What to do with the lease as currently stored.
#[derive(Clone, Debug, PartialEq)]
pub enum LeaseAction {
    /// No lease exists yet.
    Create(Lease),
    /// Write this lease back; we hold it or are taking over an expired one.
    Replace(Lease),
    /// Someone else holds a live lease.
    Wait { holder: Option<String> },
}

/// Decide the next lease write for `config.holder_id` at time `now`.
pub fn decide(existing: Option<&Lease>, config: &LeaderElectionConfig, now: u64) -> LeaseAction {
    let Some(existing) = existing else {
        return LeaseAction::Create(new_lease(config, now));
    };

    let spec = existing.spec.as_ref();
    let holder = spec.and_then(|s| s.holder_identity.as_deref());

    if holder == Some(config.holder_id.as_str()) {
        let mut renewed = existing.clone();
        stamp(&mut renewed, now);
        return LeaseAction::Replace(renewed);
    }

    let duration = spec
        .and_then(|s| s.lease_duration_seconds)
        .unwrap_or(config.lease_duration_secs)
        .max(0) as u64;
    let renewed_at = existing
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(ANNOTATION_RENEW_EPOCH))
        .and_then(|s| s.parse::<u64>().ok());
    let expired =
        holder.is_none() || renewed_at.map_or(true, |ts| now > ts.saturating_add(duration));

    if !expired {
        return LeaseAction::Wait {
            holder: holder.map(str::to_string),
        };
    }

    let mut taken = existing.clone();
    let spec = taken.spec.get_or_insert_with(LeaseSpec::default);
    spec.holder_identity = Some(config.holder_id.clone());
    spec.lease_duration_seconds = Some(config.lease_duration_secs);
    spec.lease_transitions = Some(spec.lease_transitions.unwrap_or(0) + 1);
    stamp(&mut taken, now);
    LeaseAction::Replace(taken)
}

fn new_lease(config: &LeaderElectionConfig, now: u64) -> Lease {
    Lease {
        metadata: ObjectMeta {
            name: Some(config.lease_name.clone()),
            namespace: Some(config.namespace.clone()),
            annotations: Some(BTreeMap::from([(
                ANNOTATION_RENEW_EPOCH.to_string(),
                now.to_string(),
            )])),
            ..Default::default()
        },
        spec: Some(LeaseSpec {
            holder_identity: Some(config.holder_id.clone()),
            lease_duration_seconds: Some(config.lease_duration_secs),
            lease_transitions: Some(0),
            ..Default::default()
        }),
    }
}

fn stamp(lease: &mut Lease, now: u64) {
    lease
        .metadata
        .annotations
        .get_or_insert_with(BTreeMap::new)
        .insert(ANNOTATION_RENEW_EPOCH.to_string(), now.to_string());
}

fn epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn post_params() -> PostParams {
    PostParams {
        field_manager: Some(MANAGER.into()),
        ..Default::default()
    }
}

/// Run the election loop until `shutdown` fires.
pub async fn run(
    client: Client,
    config: LeaderElectionConfig,
    status: LeaderStatus,
    shutdown: CancellationToken,
) {
    let api: Api<Lease> = Api::namespaced(client, &config.namespace);

    loop {
        match try_acquire_or_renew(&api, &config).await {
            Ok(acquired) => {
                if acquired && !status.is_leader() {
                    info!(
                        holder = %config.holder_id,
                        lease = %config.lease_name,
                        "Acquired leadership"
                    );
                } else if !acquired && status.is_leader() {
                    warn!(holder = %config.holder_id, "Lost leadership");
                }
                status.set_leader(acquired);
            }
            Err(e) => {
                error!("Leader election error: {e}");
                status.set_leader(false);
            }
        }

        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(Duration::from_secs(config.renew_interval_secs)) => {}
        }
    }
    status.set_leader(false);
}

/// Release the lease on shutdown so another replica can take over at once.
pub async fn step_down(client: &Client, config: &LeaderElectionConfig) {
    let api: Api<Lease> = Api::namespaced(client.clone(), &config.namespace);

    match api.get_opt(&config.lease_name).await {
        Ok(Some(mut lease)) => {
            let holder = lease.spec.as_ref().and_then(|s| s.holder_identity.as_deref());
            if holder != Some(config.holder_id.as_str()) {
                return;
            }
            if let Some(spec) = lease.spec.as_mut() {
                spec.holder_identity = None;
                spec.lease_duration_seconds = Some(1);
            }
            match api.replace(&config.lease_name, &post_params(), &lease).await {
                Ok(_) => info!("Stepped down from leadership"),
                Err(e) => warn!("Failed to step down: {e}"),
            }
        }
        Ok(None) => {}
        Err(e) => debug!("Could not read lease for step-down: {e}"),
    }
}

async fn try_acquire_or_renew(api: &Api<Lease>, config: &LeaderElectionConfig) -> Result<bool> {
    let existing = api.get_opt(&config.lease_name).await?;

    let written = match decide(existing.as_ref(), config, epoch_secs()) {
        LeaseAction::Create(lease) => api.create(&post_params(), &lease).await,
        LeaseAction::Replace(lease) => {
            api.replace(&config.lease_name, &post_params(), &lease)
                .await
        }
        LeaseAction::Wait { holder } => {
            debug!(holder = ?holder, "Lease held by another instance");
            return Ok(false);
        }
    };

    match written.map_err(OperatorError::from) {
        Ok(_) => Ok(true),
        Err(OperatorError::Conflict(_)) => {
            debug!("Lost the race for the lease, will retry");
            Ok(false)
        }
        Err(e) => Err(e),
    }
}
