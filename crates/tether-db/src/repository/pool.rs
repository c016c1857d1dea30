//! SurrealDB implementation of [`PoolRepository`].

use chrono::{DateTime, Utc};
use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use tether_core::error::TetherResult;
use tether_core::models::pool::{NewPool, Pool, ProductRef, SubKey};
use tether_core::repository::PoolRepository;
use uuid::Uuid;

use crate::error::DbError;

use super::{map_to_value, parse_uuid, value_to_map};

#[derive(Debug, SurrealValue)]
struct PoolRow {
    owner_id: String,
    product_id: String,
    product_name: String,
    product_attributes: serde_json::Value,
    quantity: i64,
    attributes: serde_json::Value,
    subscription_id: String,
    sub_key: String,
    consumed: i64,
    source_entitlement: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, SurrealValue)]
struct PoolRowWithId {
    record_id: String,
    owner_id: String,
    product_id: String,
    product_name: String,
    product_attributes: serde_json::Value,
    quantity: i64,
    attributes: serde_json::Value,
    subscription_id: String,
    sub_key: String,
    consumed: i64,
    source_entitlement: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

fn parse_sub_key(raw: &str) -> Result<SubKey, DbError> {
    match raw {
        "Master" => Ok(SubKey::Master),
        "Derived" => Ok(SubKey::Derived),
        other => Err(DbError::Decode(format!("unknown sub_key '{other}'"))),
    }
}

fn sub_key_to_string(key: SubKey) -> &'static str {
    match key {
        SubKey::Master => "Master",
        SubKey::Derived => "Derived",
    }
}

#[allow(clippy::too_many_arguments)]
fn assemble(
    id: Uuid,
    owner_id: String,
    product_id: String,
    product_name: String,
    product_attributes: serde_json::Value,
    quantity: i64,
    attributes: serde_json::Value,
    subscription_id: String,
    sub_key: String,
    consumed: i64,
    source_entitlement: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
) -> Result<Pool, DbError> {
    let source_entitlement = match source_entitlement {
        Some(raw) => Some(parse_uuid(&raw, "entitlement")?),
        None => None,
    };
    Ok(Pool {
        id,
        owner_id: parse_uuid(&owner_id, "owner")?,
        product: ProductRef {
            id: product_id,
            name: product_name,
            attributes: value_to_map(product_attributes)?,
        },
        quantity,
        attributes: value_to_map(attributes)?,
        subscription_id,
        sub_key: parse_sub_key(&sub_key)?,
        consumed,
        source_entitlement,
        created_at,
        updated_at,
    })
}

impl PoolRowWithId {
    fn try_into_pool(self) -> Result<Pool, DbError> {
        let id = parse_uuid(&self.record_id, "pool")?;
        assemble(
            id,
            self.owner_id,
            self.product_id,
            self.product_name,
            self.product_attributes,
            self.quantity,
            self.attributes,
            self.subscription_id,
            self.sub_key,
            self.consumed,
            self.source_entitlement,
            self.created_at,
            self.updated_at,
        )
    }
}

impl PoolRow {
    fn try_into_pool(self, id: Uuid) -> Result<Pool, DbError> {
        assemble(
            id,
            self.owner_id,
            self.product_id,
            self.product_name,
            self.product_attributes,
            self.quantity,
            self.attributes,
            self.subscription_id,
            self.sub_key,
            self.consumed,
            self.source_entitlement,
            self.created_at,
            self.updated_at,
        )
    }
}

const SELECT_WITH_ID: &str = "SELECT *, meta::id(id) AS record_id FROM pool";

/// SurrealDB implementation of the pool repository.
#[derive(Clone)]
pub struct SurrealPoolRepository<C: Connection> {
    db: Surreal<C>,
}

impl<C: Connection> SurrealPoolRepository<C> {
    pub fn new(db: Surreal<C>) -> Self {
        Self { db }
    }
}

impl<C: Connection> PoolRepository for SurrealPoolRepository<C> {
    async fn create(&self, input: NewPool) -> TetherResult<Pool> {
        let id = Uuid::new_v4();
        let id_str = id.to_string();

        let mut result = self
            .db
            .query(
                "CREATE type::record('pool', $id) SET \
                 owner_id = $owner_id, \
                 product_id = $product_id, \
                 product_name = $product_name, \
                 product_attributes = $product_attributes, \
                 quantity = $quantity, \
                 attributes = $attributes, \
                 subscription_id = $subscription_id, \
                 sub_key = $sub_key, \
                 source_entitlement = $source_entitlement",
            )
            .bind(("id", id_str.clone()))
            .bind(("owner_id", input.owner_id.to_string()))
            .bind(("product_id", input.product.id))
            .bind(("product_name", input.product.name))
            .bind(("product_attributes", map_to_value(&input.product.attributes)))
            .bind(("quantity", input.quantity))
            .bind(("attributes", map_to_value(&input.attributes)))
            .bind(("subscription_id", input.subscription_id))
            .bind(("sub_key", sub_key_to_string(input.sub_key).to_string()))
            .bind((
                "source_entitlement",
                input.source_entitlement.map(|e| e.to_string()),
            ))
            .await
            .map_err(DbError::from)?;

        let mut result = result.check().map_err(DbError::from)?;

        let rows: Vec<PoolRow> = result.take(0).map_err(DbError::from)?;
        let row = rows.into_iter().next().ok_or_else(|| DbError::NotFound {
            entity: "pool".into(),
            id: id_str,
        })?;

        Ok(row.try_into_pool(id).map_err(DbError::from)?)
    }

    async fn get_by_id(&self, owner_id: Uuid, pool_id: Uuid) -> TetherResult<Pool> {
        let id_str = pool_id.to_string();

        let mut result = self
            .db
            .query(
                "SELECT * FROM type::record('pool', $id) \
                 WHERE owner_id = $owner_id",
            )
            .bind(("id", id_str.clone()))
            .bind(("owner_id", owner_id.to_string()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<PoolRow> = result.take(0).map_err(DbError::from)?;
        let row = rows.into_iter().next().ok_or_else(|| DbError::NotFound {
            entity: "pool".into(),
            id: id_str,
        })?;

        Ok(row.try_into_pool(pool_id).map_err(DbError::from)?)
    }

    async fn adjust_quantity(
        &self,
        owner_id: Uuid,
        pool_id: Uuid,
        delta: i64,
    ) -> TetherResult<Pool> {
        // Pools with quantity -1 are unbounded and never adjusted.
        let mut result = self
            .db
            .query(
                "UPDATE type::record('pool', $id) SET \
                 quantity = quantity + $delta, \
                 updated_at = time::now() \
                 WHERE owner_id = $owner_id AND quantity != -1",
            )
            .bind(("id", pool_id.to_string()))
            .bind(("owner_id", owner_id.to_string()))
            .bind(("delta", delta))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<PoolRow> = result.take(0).map_err(DbError::from)?;
        match rows.into_iter().next() {
            Some(row) => Ok(row.try_into_pool(pool_id).map_err(DbError::from)?),
            // Unbounded pools match no row; return them unchanged.
            None => self.get_by_id(owner_id, pool_id).await,
        }
    }

    async fn find_by_subscription(
        &self,
        owner_id: Uuid,
        subscription_id: &str,
    ) -> TetherResult<Vec<Pool>> {
        let mut result = self
            .db
            .query(format!(
                "{SELECT_WITH_ID} \
                 WHERE owner_id = $owner_id AND subscription_id = $subscription_id \
                 ORDER BY created_at"
            ))
            .bind(("owner_id", owner_id.to_string()))
            .bind(("subscription_id", subscription_id.to_string()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<PoolRowWithId> = result.take(0).map_err(DbError::from)?;
        let mut pools = Vec::with_capacity(rows.len());
        for row in rows {
            pools.push(row.try_into_pool()?);
        }
        Ok(pools)
    }

    async fn find_derived_by_subscription(
        &self,
        owner_id: Uuid,
        subscription_id: &str,
        requires_host: Option<Uuid>,
    ) -> TetherResult<Vec<Pool>> {
        let mut query = format!(
            "{SELECT_WITH_ID} \
             WHERE owner_id = $owner_id AND subscription_id = $subscription_id \
             AND sub_key = 'Derived'"
        );
        if requires_host.is_some() {
            query.push_str(" AND attributes[$host_attr] = $host");
        } else {
            query.push_str(" AND attributes[$host_attr] = NONE");
        }
        query.push_str(" ORDER BY created_at");

        let mut builder = self
            .db
            .query(query)
            .bind(("owner_id", owner_id.to_string()))
            .bind(("subscription_id", subscription_id.to_string()))
            .bind((
                "host_attr",
                tether_core::models::pool::attrs::REQUIRES_HOST.to_string(),
            ));
        if let Some(host) = requires_host {
            builder = builder.bind(("host", host.to_string()));
        }
        let mut result = builder.await.map_err(DbError::from)?;

        let rows: Vec<PoolRowWithId> = result.take(0).map_err(DbError::from)?;
        let mut pools = Vec::with_capacity(rows.len());
        for row in rows {
            pools.push(row.try_into_pool()?);
        }
        Ok(pools)
    }
}
