//! Schema definitions and migration runner for SurrealDB.
//!
//! All table definitions use SCHEMAFULL mode for data integrity.
//! UUIDs are stored as strings. Enums are stored as strings with
//! ASSERT constraints for validation. Fact and attribute maps are
//! FLEXIBLE objects.

use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use tracing::info;

use crate::error::DbError;

// -----------------------------------------------------------------------
// Migration tracking
// -----------------------------------------------------------------------

const MIGRATION_TABLE_DDL: &str = "\
DEFINE TABLE IF NOT EXISTS _migration SCHEMAFULL;
DEFINE FIELD IF NOT EXISTS version ON TABLE _migration TYPE int;
DEFINE FIELD IF NOT EXISTS name ON TABLE _migration TYPE string;
DEFINE FIELD IF NOT EXISTS applied_at ON TABLE _migration TYPE datetime \
    DEFAULT time::now();
DEFINE INDEX IF NOT EXISTS idx_migration_version ON TABLE _migration \
    COLUMNS version UNIQUE;
";

#[derive(Debug, SurrealValue)]
struct MigrationRecord {
    version: u32,
    #[allow(dead_code)]
    name: String,
}

struct Migration {
    version: u32,
    name: &'static str,
    sql: &'static str,
}

static MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    name: "initial_schema",
    sql: SCHEMA_V1,
}];

// -----------------------------------------------------------------------
// Schema v1 — initial table definitions
// -----------------------------------------------------------------------

const SCHEMA_V1: &str = "\
-- =======================================================================
-- Owners (tenants; global scope)
-- =======================================================================
DEFINE TABLE owner SCHEMAFULL;
DEFINE FIELD key ON TABLE owner TYPE string;
DEFINE FIELD mode ON TABLE owner TYPE string \
    ASSERT $value IN ['Standalone', 'Hosted'];
DEFINE FIELD autobind_disabled ON TABLE owner TYPE bool DEFAULT false;
DEFINE FIELD created_at ON TABLE owner TYPE datetime \
    DEFAULT time::now();
DEFINE FIELD updated_at ON TABLE owner TYPE datetime \
    DEFAULT time::now();
DEFINE INDEX idx_owner_key ON TABLE owner COLUMNS key UNIQUE;

-- =======================================================================
-- Consumers (owner scope)
-- =======================================================================
DEFINE TABLE consumer SCHEMAFULL;
DEFINE FIELD owner_id ON TABLE consumer TYPE string;
DEFINE FIELD name ON TABLE consumer TYPE string;
DEFINE FIELD ctype ON TABLE consumer TYPE string \
    ASSERT $value IN ['System', 'Hypervisor', 'Person', 'Domain', \
    'Distributor'];
DEFINE FIELD facts ON TABLE consumer TYPE object FLEXIBLE DEFAULT {};
DEFINE FIELD capabilities ON TABLE consumer TYPE array DEFAULT [];
DEFINE FIELD capabilities.* ON TABLE consumer TYPE string;
DEFINE FIELD hypervisor_id ON TABLE consumer TYPE option<string>;
DEFINE FIELD reporter_id ON TABLE consumer TYPE option<string>;
DEFINE FIELD last_checkin ON TABLE consumer TYPE option<datetime>;
DEFINE FIELD created_at ON TABLE consumer TYPE datetime \
    DEFAULT time::now();
DEFINE FIELD updated_at ON TABLE consumer TYPE datetime \
    DEFAULT time::now();
DEFINE INDEX idx_consumer_owner_hypervisor ON TABLE consumer \
    COLUMNS owner_id, hypervisor_id;

-- =======================================================================
-- Guest memberships (owner scope; one host per guest per owner)
-- =======================================================================
DEFINE TABLE guest_membership SCHEMAFULL;
DEFINE FIELD owner_id ON TABLE guest_membership TYPE string;
DEFINE FIELD host_uuid ON TABLE guest_membership TYPE string;
DEFINE FIELD guest_id ON TABLE guest_membership TYPE string;
DEFINE FIELD reported_id ON TABLE guest_membership TYPE string;
DEFINE FIELD attributes ON TABLE guest_membership TYPE object FLEXIBLE \
    DEFAULT {};
DEFINE FIELD created_at ON TABLE guest_membership TYPE datetime \
    DEFAULT time::now();
DEFINE FIELD updated_at ON TABLE guest_membership TYPE datetime \
    DEFAULT time::now();
DEFINE INDEX idx_guest_owner_guest ON TABLE guest_membership \
    COLUMNS owner_id, guest_id UNIQUE;
DEFINE INDEX idx_guest_owner_host ON TABLE guest_membership \
    COLUMNS owner_id, host_uuid;

-- =======================================================================
-- Pools (owner scope)
-- =======================================================================
DEFINE TABLE pool SCHEMAFULL;
DEFINE FIELD owner_id ON TABLE pool TYPE string;
DEFINE FIELD product_id ON TABLE pool TYPE string;
DEFINE FIELD product_name ON TABLE pool TYPE string;
DEFINE FIELD product_attributes ON TABLE pool TYPE object FLEXIBLE \
    DEFAULT {};
DEFINE FIELD quantity ON TABLE pool TYPE int;
DEFINE FIELD attributes ON TABLE pool TYPE object FLEXIBLE DEFAULT {};
DEFINE FIELD subscription_id ON TABLE pool TYPE string;
DEFINE FIELD sub_key ON TABLE pool TYPE string \
    ASSERT $value IN ['Master', 'Derived'];
DEFINE FIELD consumed ON TABLE pool TYPE int DEFAULT 0;
DEFINE FIELD source_entitlement ON TABLE pool TYPE option<string>;
DEFINE FIELD created_at ON TABLE pool TYPE datetime \
    DEFAULT time::now();
DEFINE FIELD updated_at ON TABLE pool TYPE datetime \
    DEFAULT time::now();
DEFINE INDEX idx_pool_owner_subscription ON TABLE pool \
    COLUMNS owner_id, subscription_id;

-- =======================================================================
-- Entitlements (owner scope)
-- =======================================================================
DEFINE TABLE entitlement SCHEMAFULL;
DEFINE FIELD owner_id ON TABLE entitlement TYPE string;
DEFINE FIELD consumer_uuid ON TABLE entitlement TYPE string;
DEFINE FIELD pool_id ON TABLE entitlement TYPE string;
DEFINE FIELD quantity ON TABLE entitlement TYPE int;
DEFINE FIELD start_date ON TABLE entitlement TYPE datetime;
DEFINE FIELD end_date ON TABLE entitlement TYPE datetime;
DEFINE FIELD created_at ON TABLE entitlement TYPE datetime \
    DEFAULT time::now();
DEFINE INDEX idx_entitlement_owner_consumer ON TABLE entitlement \
    COLUMNS owner_id, consumer_uuid;
DEFINE INDEX idx_entitlement_owner_pool ON TABLE entitlement \
    COLUMNS owner_id, pool_id;
";

// -----------------------------------------------------------------------
// Public API
// -----------------------------------------------------------------------

/// Bring the database schema up to date.
///
/// The `_migration` tracking table records every version already
/// applied; anything newer runs in order and is recorded afterwards,
/// so calling this on every startup is safe.
pub async fn run_migrations<C: Connection>(db: &Surreal<C>) -> Result<(), DbError> {
    db.query(MIGRATION_TABLE_DDL)
        .await?
        .check()
        .map_err(|e| DbError::Migration(e.to_string()))?;

    let applied = current_version(db).await?;

    for migration in MIGRATIONS.iter().filter(|m| m.version > applied) {
        info!(
            version = migration.version,
            name = migration.name,
            "Applying schema migration"
        );

        db.query(migration.sql)
            .await?
            .check()
            .map_err(|e| DbError::Migration(e.to_string()))?;

        db.query("CREATE _migration SET version = $version, name = $name")
            .bind(("version", migration.version))
            .bind(("name", migration.name.to_string()))
            .await?
            .check()
            .map_err(|e| DbError::Migration(e.to_string()))?;
    }

    Ok(())
}

async fn current_version<C: Connection>(db: &Surreal<C>) -> Result<u32, DbError> {
    let mut result = db
        .query("SELECT * FROM _migration ORDER BY version DESC LIMIT 1")
        .await?;
    let latest: Vec<MigrationRecord> = result.take(0)?;
    Ok(latest.first().map(|m| m.version).unwrap_or(0))
}
