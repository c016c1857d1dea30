//! SurrealDB implementation of [`EntitlementRepository`].
//!
//! The pool `consumed` counter is maintained here, on the same
//! statement batch as the entitlement write, so it cannot drift from
//! the entitlement rows.

use chrono::{DateTime, Utc};
use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use tether_core::error::TetherResult;
use tether_core::models::entitlement::{Entitlement, NewEntitlement};
use tether_core::models::pool::Pool;
use tether_core::repository::{EntitlementRepository, PoolRepository};
use uuid::Uuid;

use crate::error::DbError;

use super::{parse_uuid, pool::SurrealPoolRepository};

#[derive(Debug, SurrealValue)]
struct EntitlementRow {
    owner_id: String,
    consumer_uuid: String,
    pool_id: String,
    quantity: i64,
    start_date: DateTime<Utc>,
    end_date: DateTime<Utc>,
    created_at: DateTime<Utc>,
}

#[derive(Debug, SurrealValue)]
struct EntitlementRowWithId {
    record_id: String,
    owner_id: String,
    consumer_uuid: String,
    pool_id: String,
    quantity: i64,
    start_date: DateTime<Utc>,
    end_date: DateTime<Utc>,
    created_at: DateTime<Utc>,
}

fn assemble(
    id: Uuid,
    owner_id: &str,
    consumer_uuid: &str,
    pool_id: &str,
    quantity: i64,
    start_date: DateTime<Utc>,
    end_date: DateTime<Utc>,
    created_at: DateTime<Utc>,
) -> Result<Entitlement, DbError> {
    Ok(Entitlement {
        id,
        owner_id: parse_uuid(owner_id, "owner")?,
        consumer_uuid: parse_uuid(consumer_uuid, "consumer")?,
        pool_id: parse_uuid(pool_id, "pool")?,
        quantity,
        start_date,
        end_date,
        created_at,
    })
}

impl EntitlementRow {
    fn try_into_entitlement(self, id: Uuid) -> Result<Entitlement, DbError> {
        assemble(
            id,
            &self.owner_id,
            &self.consumer_uuid,
            &self.pool_id,
            self.quantity,
            self.start_date,
            self.end_date,
            self.created_at,
        )
    }
}

impl EntitlementRowWithId {
    fn try_into_entitlement(self) -> Result<Entitlement, DbError> {
        let id = parse_uuid(&self.record_id, "entitlement")?;
        assemble(
            id,
            &self.owner_id,
            &self.consumer_uuid,
            &self.pool_id,
            self.quantity,
            self.start_date,
            self.end_date,
            self.created_at,
        )
    }
}

const SELECT_WITH_ID: &str = "SELECT *, meta::id(id) AS record_id FROM entitlement";

/// SurrealDB implementation of the entitlement repository.
#[derive(Clone)]
pub struct SurrealEntitlementRepository<C: Connection> {
    db: Surreal<C>,
}

impl<C: Connection> SurrealEntitlementRepository<C> {
    pub fn new(db: Surreal<C>) -> Self {
        Self { db }
    }
}

impl<C: Connection> EntitlementRepository for SurrealEntitlementRepository<C> {
    async fn create(&self, input: NewEntitlement) -> TetherResult<Entitlement> {
        let id = Uuid::new_v4();
        let id_str = id.to_string();

        let mut result = self
            .db
            .query(
                "CREATE type::record('entitlement', $id) SET \
                 owner_id = $owner_id, \
                 consumer_uuid = $consumer_uuid, \
                 pool_id = $pool_id, \
                 quantity = $quantity, \
                 start_date = $start_date, \
                 end_date = $end_date; \
                 UPDATE type::record('pool', $pool_id) SET \
                 consumed = consumed + $quantity \
                 WHERE owner_id = $owner_id",
            )
            .bind(("id", id_str.clone()))
            .bind(("owner_id", input.owner_id.to_string()))
            .bind(("consumer_uuid", input.consumer_uuid.to_string()))
            .bind(("pool_id", input.pool_id.to_string()))
            .bind(("quantity", input.quantity))
            .bind(("start_date", input.start_date))
            .bind(("end_date", input.end_date))
            .await
            .map_err(DbError::from)?;

        let mut result = result.check().map_err(DbError::from)?;

        let rows: Vec<EntitlementRow> = result.take(0).map_err(DbError::from)?;
        let row = rows.into_iter().next().ok_or_else(|| DbError::NotFound {
            entity: "entitlement".into(),
            id: id_str,
        })?;

        Ok(row.try_into_entitlement(id).map_err(DbError::from)?)
    }

    async fn get(&self, owner_id: Uuid, entitlement_id: Uuid) -> TetherResult<Entitlement> {
        let id_str = entitlement_id.to_string();

        let mut result = self
            .db
            .query(
                "SELECT * FROM type::record('entitlement', $id) \
                 WHERE owner_id = $owner_id",
            )
            .bind(("id", id_str.clone()))
            .bind(("owner_id", owner_id.to_string()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<EntitlementRow> = result.take(0).map_err(DbError::from)?;
        let row = rows.into_iter().next().ok_or_else(|| DbError::NotFound {
            entity: "entitlement".into(),
            id: id_str,
        })?;

        Ok(row
            .try_into_entitlement(entitlement_id)
            .map_err(DbError::from)?)
    }

    async fn list_by_consumer(
        &self,
        owner_id: Uuid,
        consumer_uuid: Uuid,
    ) -> TetherResult<Vec<Entitlement>> {
        let mut result = self
            .db
            .query(format!(
                "{SELECT_WITH_ID} \
                 WHERE owner_id = $owner_id AND consumer_uuid = $consumer_uuid \
                 ORDER BY created_at"
            ))
            .bind(("owner_id", owner_id.to_string()))
            .bind(("consumer_uuid", consumer_uuid.to_string()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<EntitlementRowWithId> = result.take(0).map_err(DbError::from)?;
        let mut entitlements = Vec::with_capacity(rows.len());
        for row in rows {
            entitlements.push(row.try_into_entitlement()?);
        }
        Ok(entitlements)
    }

    async fn list_requiring_host(
        &self,
        owner_id: Uuid,
        consumer_uuid: Uuid,
    ) -> TetherResult<Vec<(Entitlement, Pool)>> {
        let entitlements = self.list_by_consumer(owner_id, consumer_uuid).await?;

        let pool_repo = SurrealPoolRepository::new(self.db.clone());
        let mut pairs = Vec::new();
        for ent in entitlements {
            let pool = pool_repo.get_by_id(owner_id, ent.pool_id).await?;
            if pool.requires_host().is_some() {
                pairs.push((ent, pool));
            }
        }
        Ok(pairs)
    }

    async fn revoke(&self, owner_id: Uuid, entitlement_id: Uuid) -> TetherResult<bool> {
        let mut result = self
            .db
            .query(
                "DELETE type::record('entitlement', $id) \
                 WHERE owner_id = $owner_id RETURN BEFORE",
            )
            .bind(("id", entitlement_id.to_string()))
            .bind(("owner_id", owner_id.to_string()))
            .await
            .map_err(DbError::from)?;

        let removed: Vec<EntitlementRow> = result.take(0).map_err(DbError::from)?;
        let Some(row) = removed.into_iter().next() else {
            // Already gone, which revocation treats as success.
            return Ok(false);
        };

        self.db
            .query(
                "UPDATE type::record('pool', $pool_id) SET \
                 consumed = consumed - $quantity \
                 WHERE owner_id = $owner_id",
            )
            .bind(("pool_id", row.pool_id))
            .bind(("owner_id", owner_id.to_string()))
            .bind(("quantity", row.quantity))
            .await
            .map_err(DbError::from)?
            .check()
            .map_err(DbError::from)?;

        Ok(true)
    }
}
