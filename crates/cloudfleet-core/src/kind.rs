//! Resource kinds managed by the control plane.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

/// The kinds of long-lived resources tracked by cloudfleet.
///
/// Each kind owns an independent lifecycle; there are no transitions
/// across kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum ResourceKind {
    /// A Kubernetes cluster.
    Cluster = 1,
    /// An application installation running on a cluster.
    Installation = 2,
    /// A backup of an installation's data.
    InstallationBackup = 3,
    /// A database migration of an installation.
    InstallationDbMigration = 4,
    /// A database restoration of an installation.
    InstallationDbRestoration = 5,
}

impl ResourceKind {
    /// Every resource kind.
    pub const ALL: [Self; 5] = [
        Self::Cluster,
        Self::Installation,
        Self::InstallationBackup,
        Self::InstallationDbMigration,
        Self::InstallationDbRestoration,
    ];

    /// Convert the kind to its numeric representation.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Stable snake-case name of the kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cluster => "cluster",
            Self::Installation => "installation",
            Self::InstallationBackup => "installation_backup",
            Self::InstallationDbMigration => "installation_db_migration",
            Self::InstallationDbRestoration => "installation_db_restoration",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| CoreError::UnknownKind(s.to_string()))
    }
}
