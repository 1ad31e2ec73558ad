//! Operator configuration from flags and environment.

use clap::Parser;

use crate::error::{OperatorError, Result};
use crate::leader_election::LeaderElectionConfig;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

/// MyApp operator
#[derive(Debug, Clone, Parser)]
#[command(name = "myapp-operator")]
#[command(version, about, long_about = None)]
pub struct OperatorConfig {
    /// Address for the metrics and health server
    #[arg(long, env = "MYAPP_METRICS_ADDR", default_value = "0.0.0.0:8080")]
    pub metrics_addr: String,

    /// Log level used when RUST_LOG is unset
    #[arg(long, env = "MYAPP_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log output format
    #[arg(long, env = "MYAPP_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// Only reconcile while holding the leader lease
    #[arg(
        long,
        env = "MYAPP_LEADER_ELECTION",
        default_value_t = true,
        action = clap::ArgAction::Set
    )]
    pub leader_election: bool,

    /// Name of the Lease object used for leader election
    #[arg(long, env = "MYAPP_LEASE_NAME", default_value = "myapp.leader")]
    pub lease_name: String,

    /// Namespace holding the Lease
    #[arg(long, env = "POD_NAMESPACE", default_value = "default")]
    pub lease_namespace: String,

    /// Identity of this replica. Defaults to a random id
    #[arg(long, env = "POD_NAME")]
    pub holder_id: Option<String>,

    /// Seconds a lease stays valid without renewal
    #[arg(long, env = "MYAPP_LEASE_DURATION_SECS", default_value_t = 15)]
    pub lease_duration_secs: i32,

    /// Seconds between renewal attempts
    #[arg(long, env = "MYAPP_RENEW_INTERVAL_SECS", default_value_t = 5)]
    pub renew_interval_secs: u64,
}

impl OperatorConfig {
    /// Reject settings that would make the lease expire between renewals.
    pub fn validate(&self) -> Result<()> {
        if self.lease_duration_secs <= 0 {
            return Err(OperatorError::Config(format!(
                "lease duration must be positive, got {}",
                self.lease_duration_secs
            )));
        }
        if self.renew_interval_secs == 0
            || self.renew_interval_secs >= self.lease_duration_secs as u64
        {
            return Err(OperatorError::Config(format!(
                "renew interval ({}s) must be between 1s and the lease duration ({}s)",
                self.renew_interval_secs, self.lease_duration_secs
            )));
        }
        Ok(())
    }

    pub fn leader_election_config(&self) -> LeaderElectionConfig {
        LeaderElectionConfig {
            lease_name: self.lease_name.clone(),
            namespace: self.lease_namespace.clone(),
            holder_id: self
                .holder_id
                .clone()
                .unwrap_or_else(|| format!("myapp-operator-{}", uuid::Uuid::new_v4())),
            lease_duration_secs: self.lease_duration_secs,
            renew_interval_secs: self.renew_interval_secs,
        }
    }
}
