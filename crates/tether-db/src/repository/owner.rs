//! SurrealDB implementation of [`OwnerRepository`].

use chrono::{DateTime, Utc};
use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use tether_core::error::TetherResult;
use tether_core::models::owner::{CreateOwner, OperatingMode, Owner};
use tether_core::repository::OwnerRepository;
use uuid::Uuid;

use crate::error::DbError;

use super::parse_uuid;

/// DB-side row struct for queries where the UUID is already known.
#[derive(Debug, SurrealValue)]
struct OwnerRow {
    key: String,
    mode: String,
    autobind_disabled: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// DB-side row struct that includes the record ID via `meta::id(id)`.
#[derive(Debug, SurrealValue)]
struct OwnerRowWithId {
    record_id: String,
    key: String,
    mode: String,
    autobind_disabled: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

fn parse_mode(s: &str) -> Result<OperatingMode, DbError> {
    match s {
        "Standalone" => Ok(OperatingMode::Standalone),
        "Hosted" => Ok(OperatingMode::Hosted),
        other => Err(DbError::Decode(format!("unknown operating mode: {other}"))),
    }
}

fn mode_to_string(mode: OperatingMode) -> &'static str {
    match mode {
        OperatingMode::Standalone => "Standalone",
        OperatingMode::Hosted => "Hosted",
    }
}

impl OwnerRow {
    fn into_owner(self, id: Uuid) -> Result<Owner, DbError> {
        Ok(Owner {
            id,
            key: self.key,
            mode: parse_mode(&self.mode)?,
            autobind_disabled: self.autobind_disabled,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

impl OwnerRowWithId {
    fn try_into_owner(self) -> Result<Owner, DbError> {
        let id = parse_uuid(&self.record_id, "owner")?;
        Ok(Owner {
            id,
            key: self.key,
            mode: parse_mode(&self.mode)?,
            autobind_disabled: self.autobind_disabled,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// SurrealDB implementation of the Owner repository.
#[derive(Clone)]
pub struct SurrealOwnerRepository<C: Connection> {
    db: Surreal<C>,
}

impl<C: Connection> SurrealOwnerRepository<C> {
    pub fn new(db: Surreal<C>) -> Self {
        Self { db }
    }
}

impl<C: Connection> OwnerRepository for SurrealOwnerRepository<C> {
    async fn create(&self, input: CreateOwner) -> TetherResult<Owner> {
        let id = Uuid::new_v4();
        let id_str = id.to_string();

        let result = self
            .db
            .query(
                "CREATE type::record('owner', $id) SET \
                 key = $key, mode = $mode, \
                 autobind_disabled = $autobind_disabled",
            )
            .bind(("id", id_str.clone()))
            .bind(("key", input.key))
            .bind(("mode", mode_to_string(input.mode).to_string()))
            .bind(("autobind_disabled", input.autobind_disabled))
            .await
            .map_err(DbError::from)?;

        let mut result = result
            .check()
            .map_err(DbError::from)?;

        let rows: Vec<OwnerRow> = result.take(0).map_err(DbError::from)?;
        let row = rows.into_iter().next().ok_or_else(|| DbError::NotFound {
            entity: "owner".into(),
            id: id_str,
        })?;

        Ok(row.into_owner(id)?)
    }

    async fn get_by_id(&self, id: Uuid) -> TetherResult<Owner> {
        let id_str = id.to_string();

        let mut result = self
            .db
            .query("SELECT * FROM type::record('owner', $id)")
            .bind(("id", id_str.clone()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<OwnerRow> = result.take(0).map_err(DbError::from)?;
        let row = rows.into_iter().next().ok_or_else(|| DbError::NotFound {
            entity: "owner".into(),
            id: id_str,
        })?;

        Ok(row.into_owner(id)?)
    }

    async fn get_by_key(&self, key: &str) -> TetherResult<Owner> {
        let mut result = self
            .db
            .query(
                "SELECT meta::id(id) AS record_id, * FROM owner \
                 WHERE key = $key",
            )
            .bind(("key", key.to_string()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<OwnerRowWithId> = result.take(0).map_err(DbError::from)?;
        let row = rows.into_iter().next().ok_or_else(|| DbError::NotFound {
            entity: "owner".into(),
            id: format!("key={key}"),
        })?;

        Ok(row.try_into_owner()?)
    }
}
