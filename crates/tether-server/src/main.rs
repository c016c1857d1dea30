//! Tether Server — Application entry point.

use tether_core::TetherResult;
use tether_db::repository::{
    SurrealConsumerRepository, SurrealEntitlementRepository, SurrealGuestMembershipRepository,
    SurrealPoolRepository,
};
use tether_db::{DbConfig, DbError, DbManager};
use tether_engine::{EngineConfig, GuestMappingService, TopologyReconciler};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> TetherResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("tether=info".parse().unwrap()),
        )
        .json()
        .init();

    tracing::info!("Starting Tether server...");

    let config = DbConfig::from_env();
    let manager = DbManager::connect(&config).await.map_err(DbError::from)?;
    tether_db::run_migrations(manager.client()).await?;

    let db = manager.client().clone();
    let reconciler = TopologyReconciler::new(
        SurrealConsumerRepository::new(db.clone()),
        SurrealGuestMembershipRepository::new(db.clone()),
        SurrealEntitlementRepository::new(db.clone()),
        SurrealPoolRepository::new(db.clone()),
        EngineConfig::default(),
    );
    let _guest_mappings = GuestMappingService::new(
        SurrealConsumerRepository::new(db.clone()),
        SurrealGuestMembershipRepository::new(db.clone()),
        SurrealEntitlementRepository::new(db.clone()),
        SurrealPoolRepository::new(db),
    )
    .with_owner_locks(reconciler.owner_locks());

    // TODO: Start the check-in HTTP surface once the transport layer
    // lands; the reconciler and mapping service above are fully wired
    // to storage.

    tracing::info!("Tether server stopped.");
    Ok(())
}
