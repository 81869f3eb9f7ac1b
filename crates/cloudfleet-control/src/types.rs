//! Request types and configuration for control plane operations.
//!
//! These types define the API contracts for resource creation and resizing.

use std::collections::BTreeMap;

use cloudfleet_core::{InstallationState, ResourceId, WorkerId};
use cloudfleet_store::NodeGroup;
use serde::{Deserialize, Serialize};

use crate::allocator::GroupAllocator;
use crate::error::{ControlError, Result};

/// Request to create a new cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateClusterRequest {
    /// Cloud provider name.
    pub provider: String,
    /// Kubernetes version.
    pub version: String,
    /// Node groups keyed by name.
    pub node_groups: BTreeMap<String, NodeGroup>,
    /// Whether installations may be placed on the cluster.
    #[serde(default = "CreateClusterRequest::default_allow_installations")]
    pub allow_installations: bool,
}

impl CreateClusterRequest {
    const fn default_allow_installations() -> bool {
        true
    }

    /// A request with the given node groups that accepts installations.
    #[must_use]
    pub fn new(
        provider: impl Into<String>,
        version: impl Into<String>,
        node_groups: BTreeMap<String, NodeGroup>,
    ) -> Self {
        Self {
            provider: provider.into(),
            version: version.into(),
            node_groups,
            allow_installations: true,
        }
    }
}

/// New aggregate sizing for a cluster.
///
/// Counts are totals across all node groups, not per-group values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResizeRequest {
    /// New total minimum node count.
    #[serde(default)]
    pub node_min_count: Option<i64>,
    /// New total maximum node count.
    #[serde(default)]
    pub node_max_count: Option<i64>,
    /// New instance type for every node group.
    #[serde(default)]
    pub node_instance_type: Option<String>,
}

impl ResizeRequest {
    /// Resize to exactly `count` nodes in total.
    #[must_use]
    pub const fn fixed(count: i64) -> Self {
        Self {
            node_min_count: Some(count),
            node_max_count: Some(count),
            node_instance_type: None,
        }
    }
}

/// Request to create a new installation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateInstallationRequest {
    /// Owner (tenant) identifier.
    pub owner: String,
    /// Public DNS name.
    pub dns: String,
    /// Application version.
    pub version: String,
    /// Optional configuration group.
    #[serde(default)]
    pub group_id: Option<String>,
}

impl CreateInstallationRequest {
    /// Create a new request outside any group.
    #[must_use]
    pub fn new(
        owner: impl Into<String>,
        dns: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            owner: owner.into(),
            dns: dns.into(),
            version: version.into(),
            group_id: None,
        }
    }
}

/// Request to migrate an installation to another database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateDbMigrationRequest {
    /// The installation to migrate.
    pub installation_id: ResourceId,
    /// Database the installation uses today.
    pub source_database: String,
    /// Database to move to.
    pub destination_database: String,
}

/// Request to restore an installation's database from a backup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateDbRestorationRequest {
    /// The installation to restore.
    pub installation_id: ResourceId,
    /// The backup to restore from.
    pub backup_id: ResourceId,
    /// State to return the installation to afterwards.
    #[serde(default)]
    pub target_installation_state: Option<InstallationState>,
}

/// Configuration for the control plane and supervisors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlConfig {
    /// Identity this process locks resources under.
    #[serde(default = "ControlConfig::default_worker_id")]
    pub worker_id: WorkerId,
    /// Seconds between supervisor passes.
    #[serde(default = "ControlConfig::default_poll_interval_seconds")]
    pub poll_interval_seconds: u64,
    /// How many resources of one kind a single pass works on.
    #[serde(default = "ControlConfig::default_max_concurrent_per_kind")]
    pub max_concurrent_per_kind: usize,
    /// Locks held longer than this are reclaimed by the reaper; `0` disables it.
    #[serde(default = "ControlConfig::default_lock_stale_after_seconds")]
    pub lock_stale_after_seconds: u64,
    /// Strategy for choosing an installation's cluster.
    #[serde(default)]
    pub installation_allocator: GroupAllocator,
    /// Address of the health endpoint.
    #[serde(default = "ControlConfig::default_listen_addr")]
    pub listen_addr: String,
    /// `RocksDB` data directory.
    #[serde(default = "ControlConfig::default_data_dir")]
    pub data_dir: String,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            worker_id: Self::default_worker_id(),
            poll_interval_seconds: Self::default_poll_interval_seconds(),
            max_concurrent_per_kind: Self::default_max_concurrent_per_kind(),
            lock_stale_after_seconds: Self::default_lock_stale_after_seconds(),
            installation_allocator: GroupAllocator::default(),
            listen_addr: Self::default_listen_addr(),
            data_dir: Self::default_data_dir(),
        }
    }
}

impl ControlConfig {
    fn default_worker_id() -> WorkerId {
        WorkerId::generate("supervisor")
    }

    const fn default_poll_interval_seconds() -> u64 {
        30
    }

    const fn default_max_concurrent_per_kind() -> usize {
        10
    }

    const fn default_lock_stale_after_seconds() -> u64 {
        600 // 10 minutes
    }

    fn default_listen_addr() -> String {
        "0.0.0.0:8080".to_string()
    }

    fn default_data_dir() -> String {
        "/data".to_string()
    }

    /// Defaults overlaid with `CLOUDFLEET_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::Config` if a variable is set to an invalid value.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overlaid with values from `lookup`, keyed like the
    /// environment variables read by [`ControlConfig::from_env`].
    ///
    /// # Errors
    ///
    /// Returns `ControlError::Config` if a value is invalid.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(worker) = lookup("CLOUDFLEET_WORKER_ID") {
            config.worker_id = WorkerId::new(worker)
                .map_err(|e| ControlError::Config(format!("CLOUDFLEET_WORKER_ID: {e}")))?;
        }
        if let Some(value) = lookup("CLOUDFLEET_POLL_INTERVAL_SECONDS") {
            config.poll_interval_seconds = parse_var("CLOUDFLEET_POLL_INTERVAL_SECONDS", &value)?;
        }
        if let Some(value) = lookup("CLOUDFLEET_MAX_CONCURRENT_PER_KIND") {
            config.max_concurrent_per_kind =
                parse_var("CLOUDFLEET_MAX_CONCURRENT_PER_KIND", &value)?;
        }
        if let Some(value) = lookup("CLOUDFLEET_LOCK_STALE_AFTER_SECONDS") {
            config.lock_stale_after_seconds =
                parse_var("CLOUDFLEET_LOCK_STALE_AFTER_SECONDS", &value)?;
        }
        if let Some(value) = lookup("CLOUDFLEET_ALLOCATOR") {
            config.installation_allocator = parse_var("CLOUDFLEET_ALLOCATOR", &value)?;
        }
        if let Some(addr) = lookup("CLOUDFLEET_LISTEN_ADDR") {
            config.listen_addr = addr;
        }
        if let Some(dir) = lookup("CLOUDFLEET_DATA_DIR") {
            config.data_dir = dir;
        }

        if config.poll_interval_seconds == 0 {
            return Err(ControlError::Config(
                "CLOUDFLEET_POLL_INTERVAL_SECONDS must be positive".to_string(),
            ));
        }
        Ok(config)
    }

    /// The supervisor poll interval.
    #[must_use]
    pub const fn poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.poll_interval_seconds)
    }

    /// The lock staleness threshold, or `None` when the reaper is disabled.
    #[must_use]
    pub fn lock_stale_after(&self) -> Option<chrono::Duration> {
        if self.lock_stale_after_seconds == 0 {
            return None;
        }
        i64::try_from(self.lock_stale_after_seconds)
            .ok()
            .and_then(chrono::Duration::try_seconds)
    }
}

fn parse_var<T>(key: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| ControlError::Config(format!("{key}={value}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn control_config_defaults() {
        let config = ControlConfig::default();
        assert_eq!(config.poll_interval_seconds, 30);
        assert_eq!(config.max_concurrent_per_kind, 10);
        assert_eq!(config.installation_allocator, GroupAllocator::default());
        assert!(config.worker_id.as_str().starts_with("supervisor"));
        assert_eq!(config.lock_stale_after(), Some(chrono::Duration::minutes(10)));
    }

    #[test]
    fn config_from_lookup() {
        let config = ControlConfig::from_lookup(lookup(&[
            ("CLOUDFLEET_WORKER_ID", "supervisor-a"),
            ("CLOUDFLEET_POLL_INTERVAL_SECONDS", "5"),
            ("CLOUDFLEET_LOCK_STALE_AFTER_SECONDS", "0"),
            ("CLOUDFLEET_ALLOCATOR", "random"),
            ("CLOUDFLEET_DATA_DIR", "/tmp/fleet"),
        ]))
        .unwrap();
        assert_eq!(config.worker_id.as_str(), "supervisor-a");
        assert_eq!(config.poll_interval(), std::time::Duration::from_secs(5));
        assert_eq!(config.lock_stale_after(), None);
        assert_eq!(config.installation_allocator, GroupAllocator::Random);
        assert_eq!(config.data_dir, "/tmp/fleet");
        assert_eq!(config.listen_addr, "0.0.0.0:8080");
    }

    #[test]
    fn invalid_values_are_rejected() {
        for vars in [
            [("CLOUDFLEET_POLL_INTERVAL_SECONDS", "soon")],
            [("CLOUDFLEET_POLL_INTERVAL_SECONDS", "0")],
            [("CLOUDFLEET_ALLOCATOR", "round-robin")],
            [("CLOUDFLEET_WORKER_ID", "   ")],
        ] {
            let err = ControlConfig::from_lookup(lookup(&vars)).unwrap_err();
            assert!(matches!(err, ControlError::Config(_)), "{vars:?}");
        }
    }

    #[test]
    fn config_deserializes_with_defaults() {
        let config: ControlConfig = serde_json::from_str(
            r#"{"worker_id": "w1", "installation_allocator": "lowest-count:stable"}"#,
        )
        .unwrap();
        assert_eq!(config.worker_id.as_str(), "w1");
        assert_eq!(config.poll_interval_seconds, 30);
        assert_eq!(config.installation_allocator.to_string(), "lowest-count:stable");
    }

    #[test]
    fn resize_request_defaults() {
        let request: ResizeRequest = serde_json::from_str(r#"{"node_min_count": 3}"#).unwrap();
        assert_eq!(request.node_min_count, Some(3));
        assert!(request.node_max_count.is_none());
        assert_eq!(ResizeRequest::fixed(2).node_max_count, Some(2));
    }
}
