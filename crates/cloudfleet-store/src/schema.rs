//! Database schema definitions and column families.
//!
//! Each resource kind has a primary column family keyed by resource id and a
//! state index keyed by `state || 0x00 || id`.

use cloudfleet_core::ResourceKind;

/// Column family names for the `RocksDB` database.
pub mod cf {
    /// Cluster records, keyed by id.
    pub const CLUSTERS: &str = "clusters";
    /// Index: clusters by state.
    pub const CLUSTERS_BY_STATE: &str = "clusters_by_state";

    /// Installation records, keyed by id.
    pub const INSTALLATIONS: &str = "installations";
    /// Index: installations by state.
    pub const INSTALLATIONS_BY_STATE: &str = "installations_by_state";

    /// Installation backup records, keyed by id.
    pub const BACKUPS: &str = "installation_backups";
    /// Index: backups by state.
    pub const BACKUPS_BY_STATE: &str = "installation_backups_by_state";

    /// Database migration records, keyed by id.
    pub const DB_MIGRATIONS: &str = "installation_db_migrations";
    /// Index: database migrations by state.
    pub const DB_MIGRATIONS_BY_STATE: &str = "installation_db_migrations_by_state";

    /// Database restoration records, keyed by id.
    pub const DB_RESTORATIONS: &str = "installation_db_restorations";
    /// Index: database restorations by state.
    pub const DB_RESTORATIONS_BY_STATE: &str = "installation_db_restorations_by_state";
}

/// The primary column family for `kind`.
#[must_use]
pub const fn records(kind: ResourceKind) -> &'static str {
    match kind {
        ResourceKind::Cluster => cf::CLUSTERS,
        ResourceKind::Installation => cf::INSTALLATIONS,
        ResourceKind::InstallationBackup => cf::BACKUPS,
        ResourceKind::InstallationDbMigration => cf::DB_MIGRATIONS,
        ResourceKind::InstallationDbRestoration => cf::DB_RESTORATIONS,
    }
}

/// The state index column family for `kind`.
#[must_use]
pub const fn state_index(kind: ResourceKind) -> &'static str {
    match kind {
        ResourceKind::Cluster => cf::CLUSTERS_BY_STATE,
        ResourceKind::Installation => cf::INSTALLATIONS_BY_STATE,
        ResourceKind::InstallationBackup => cf::BACKUPS_BY_STATE,
        ResourceKind::InstallationDbMigration => cf::DB_MIGRATIONS_BY_STATE,
        ResourceKind::InstallationDbRestoration => cf::DB_RESTORATIONS_BY_STATE,
    }
}

/// Returns all column family names for database initialization.
#[must_use]
pub fn all_column_families() -> Vec<&'static str> {
    ResourceKind::ALL
        .iter()
        .flat_map(|&kind| [records(kind), state_index(kind)])
        .collect()
}
