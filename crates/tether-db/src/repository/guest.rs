//! SurrealDB implementation of [`GuestMembershipRepository`].
//!
//! The (owner_id, guest_id) unique index is what enforces the
//! one-host-per-guest invariant, so every write path that may move a
//! guest deletes the competing claim before creating its own.

use chrono::{DateTime, Utc};
use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use tether_core::error::TetherResult;
use tether_core::models::guest::{GuestMembership, NewGuestMembership};
use tether_core::repository::GuestMembershipRepository;
use uuid::Uuid;

use crate::error::DbError;

use super::{map_to_value, parse_uuid, value_to_map};

#[derive(Debug, SurrealValue)]
struct MembershipRow {
    owner_id: String,
    host_uuid: String,
    guest_id: String,
    reported_id: String,
    attributes: serde_json::Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl MembershipRow {
    fn try_into_membership(self) -> Result<GuestMembership, DbError> {
        Ok(GuestMembership {
            owner_id: parse_uuid(&self.owner_id, "owner")?,
            host_uuid: parse_uuid(&self.host_uuid, "host")?,
            guest_id: self.guest_id,
            reported_id: self.reported_id,
            attributes: value_to_map(self.attributes)?,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Row struct for host lookups.
#[derive(Debug, SurrealValue)]
struct HostRow {
    host_uuid: String,
}

/// SurrealDB implementation of the guest membership repository.
#[derive(Clone)]
pub struct SurrealGuestMembershipRepository<C: Connection> {
    db: Surreal<C>,
}

impl<C: Connection> SurrealGuestMembershipRepository<C> {
    pub fn new(db: Surreal<C>) -> Self {
        Self { db }
    }

    async fn rows_to_memberships(
        rows: Vec<MembershipRow>,
    ) -> Result<Vec<GuestMembership>, DbError> {
        let mut memberships = Vec::with_capacity(rows.len());
        for row in rows {
            memberships.push(row.try_into_membership()?);
        }
        Ok(memberships)
    }
}

impl<C: Connection> GuestMembershipRepository for SurrealGuestMembershipRepository<C> {
    async fn list_for_host(
        &self,
        owner_id: Uuid,
        host_uuid: Uuid,
    ) -> TetherResult<Vec<GuestMembership>> {
        let mut result = self
            .db
            .query(
                "SELECT * FROM guest_membership \
                 WHERE owner_id = $owner_id AND host_uuid = $host_uuid \
                 ORDER BY guest_id",
            )
            .bind(("owner_id", owner_id.to_string()))
            .bind(("host_uuid", host_uuid.to_string()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<MembershipRow> = result.take(0).map_err(DbError::from)?;
        Ok(Self::rows_to_memberships(rows).await?)
    }

    async fn get(
        &self,
        owner_id: Uuid,
        host_uuid: Uuid,
        possible_ids: &[String],
    ) -> TetherResult<Option<GuestMembership>> {
        let mut result = self
            .db
            .query(
                "SELECT * FROM guest_membership \
                 WHERE owner_id = $owner_id AND host_uuid = $host_uuid \
                 AND guest_id IN $ids",
            )
            .bind(("owner_id", owner_id.to_string()))
            .bind(("host_uuid", host_uuid.to_string()))
            .bind(("ids", possible_ids.to_vec()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<MembershipRow> = result.take(0).map_err(DbError::from)?;
        match rows.into_iter().next() {
            Some(row) => Ok(Some(row.try_into_membership().map_err(DbError::from)?)),
            None => Ok(None),
        }
    }

    async fn replace_for_host(
        &self,
        owner_id: Uuid,
        host_uuid: Uuid,
        entries: Vec<NewGuestMembership>,
    ) -> TetherResult<Vec<GuestMembership>> {
        let owner_str = owner_id.to_string();
        let host_str = host_uuid.to_string();
        let incoming_ids: Vec<String> = entries.iter().map(|e| e.guest_id.clone()).collect();

        // Drop members no longer reported, then steal incoming guests
        // from any other host within the owner.
        self.db
            .query(
                "DELETE guest_membership \
                 WHERE owner_id = $owner_id AND host_uuid = $host_uuid \
                 AND guest_id NOT IN $ids; \
                 DELETE guest_membership \
                 WHERE owner_id = $owner_id AND host_uuid != $host_uuid \
                 AND guest_id IN $ids",
            )
            .bind(("owner_id", owner_str.clone()))
            .bind(("host_uuid", host_str.clone()))
            .bind(("ids", incoming_ids.clone()))
            .await
            .map_err(DbError::from)?
            .check()
            .map_err(DbError::from)?;

        // Members surviving the delete keep their row (and created_at);
        // only their report-visible fields are refreshed.
        let mut result = self
            .db
            .query(
                "SELECT * FROM guest_membership \
                 WHERE owner_id = $owner_id AND host_uuid = $host_uuid",
            )
            .bind(("owner_id", owner_str.clone()))
            .bind(("host_uuid", host_str.clone()))
            .await
            .map_err(DbError::from)?;
        let existing_rows: Vec<MembershipRow> = result.take(0).map_err(DbError::from)?;
        let existing: std::collections::BTreeSet<String> =
            existing_rows.into_iter().map(|r| r.guest_id).collect();

        for entry in entries {
            if existing.contains(&entry.guest_id) {
                self.db
                    .query(
                        "UPDATE guest_membership SET \
                         reported_id = $reported_id, \
                         attributes = $attributes, \
                         updated_at = time::now() \
                         WHERE owner_id = $owner_id \
                         AND host_uuid = $host_uuid \
                         AND guest_id = $guest_id",
                    )
                    .bind(("owner_id", owner_str.clone()))
                    .bind(("host_uuid", host_str.clone()))
                    .bind(("guest_id", entry.guest_id))
                    .bind(("reported_id", entry.reported_id))
                    .bind(("attributes", map_to_value(&entry.attributes)))
                    .await
                    .map_err(DbError::from)?
                    .check()
                    .map_err(DbError::from)?;
            } else {
                self.db
                    .query(
                        "CREATE guest_membership SET \
                         owner_id = $owner_id, \
                         host_uuid = $host_uuid, \
                         guest_id = $guest_id, \
                         reported_id = $reported_id, \
                         attributes = $attributes",
                    )
                    .bind(("owner_id", owner_str.clone()))
                    .bind(("host_uuid", host_str.clone()))
                    .bind(("guest_id", entry.guest_id))
                    .bind(("reported_id", entry.reported_id))
                    .bind(("attributes", map_to_value(&entry.attributes)))
                    .await
                    .map_err(DbError::from)?
                    .check()
                    .map_err(DbError::from)?;
            }
        }

        self.list_for_host(owner_id, host_uuid).await
    }

    async fn upsert_single(
        &self,
        owner_id: Uuid,
        host_uuid: Uuid,
        entry: NewGuestMembership,
    ) -> TetherResult<GuestMembership> {
        let owner_str = owner_id.to_string();
        let host_str = host_uuid.to_string();

        // Steal the guest from any other host first.
        self.db
            .query(
                "DELETE guest_membership \
                 WHERE owner_id = $owner_id AND host_uuid != $host_uuid \
                 AND guest_id = $guest_id",
            )
            .bind(("owner_id", owner_str.clone()))
            .bind(("host_uuid", host_str.clone()))
            .bind(("guest_id", entry.guest_id.clone()))
            .await
            .map_err(DbError::from)?
            .check()
            .map_err(DbError::from)?;

        let mut result = self
            .db
            .query(
                "UPDATE guest_membership SET \
                 reported_id = $reported_id, \
                 attributes = $attributes, \
                 updated_at = time::now() \
                 WHERE owner_id = $owner_id AND host_uuid = $host_uuid \
                 AND guest_id = $guest_id",
            )
            .bind(("owner_id", owner_str.clone()))
            .bind(("host_uuid", host_str.clone()))
            .bind(("guest_id", entry.guest_id.clone()))
            .bind(("reported_id", entry.reported_id.clone()))
            .bind(("attributes", map_to_value(&entry.attributes)))
            .await
            .map_err(DbError::from)?;

        let updated: Vec<MembershipRow> = result.take(0).map_err(DbError::from)?;
        if let Some(row) = updated.into_iter().next() {
            return Ok(row.try_into_membership().map_err(DbError::from)?);
        }

        let mut result = self
            .db
            .query(
                "CREATE guest_membership SET \
                 owner_id = $owner_id, \
                 host_uuid = $host_uuid, \
                 guest_id = $guest_id, \
                 reported_id = $reported_id, \
                 attributes = $attributes",
            )
            .bind(("owner_id", owner_str))
            .bind(("host_uuid", host_str))
            .bind(("guest_id", entry.guest_id.clone()))
            .bind(("reported_id", entry.reported_id))
            .bind(("attributes", map_to_value(&entry.attributes)))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<MembershipRow> = result.take(0).map_err(DbError::from)?;
        let row = rows.into_iter().next().ok_or_else(|| DbError::NotFound {
            entity: "guest_membership".into(),
            id: entry.guest_id,
        })?;

        Ok(row.try_into_membership().map_err(DbError::from)?)
    }

    async fn delete_single(
        &self,
        owner_id: Uuid,
        host_uuid: Uuid,
        guest_id: &str,
    ) -> TetherResult<()> {
        self.db
            .query(
                "DELETE guest_membership \
                 WHERE owner_id = $owner_id AND host_uuid = $host_uuid \
                 AND guest_id = $guest_id",
            )
            .bind(("owner_id", owner_id.to_string()))
            .bind(("host_uuid", host_uuid.to_string()))
            .bind(("guest_id", guest_id.to_string()))
            .await
            .map_err(DbError::from)?
            .check()
            .map_err(DbError::from)?;

        Ok(())
    }

    async fn hosts_claiming(
        &self,
        owner_id: Uuid,
        possible_ids: &[String],
    ) -> TetherResult<Vec<Uuid>> {
        let mut result = self
            .db
            .query(
                "SELECT host_uuid FROM guest_membership \
                 WHERE owner_id = $owner_id AND guest_id IN $ids",
            )
            .bind(("owner_id", owner_id.to_string()))
            .bind(("ids", possible_ids.to_vec()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<HostRow> = result.take(0).map_err(DbError::from)?;
        let mut hosts = Vec::with_capacity(rows.len());
        for row in rows {
            hosts.push(parse_uuid(&row.host_uuid, "host")?);
        }
        Ok(hosts)
    }
}
