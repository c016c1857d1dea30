//! SurrealDB implementation of [`ConsumerRepository`].
//!
//! Hypervisor and guest lookups are the hot path of check-in
//! reconciliation: `find_by_hypervisor_id` is backed by the
//! (owner_id, hypervisor_id) index, and `find_guest` matches the
//! `virt.uuid` fact against every accepted spelling of a guest id.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use tether_core::error::TetherResult;
use tether_core::models::consumer::{
    Consumer, ConsumerType, CreateConsumer, HypervisorIdentity, UpdateConsumer, facts,
};
use tether_core::repository::ConsumerRepository;
use uuid::Uuid;

use crate::error::DbError;

use super::{map_to_value, parse_uuid, value_to_map};

/// DB-side row struct for queries where the UUID is already known.
#[derive(Debug, SurrealValue)]
struct ConsumerRow {
    owner_id: String,
    name: String,
    ctype: String,
    facts: serde_json::Value,
    capabilities: Vec<String>,
    hypervisor_id: Option<String>,
    reporter_id: Option<String>,
    last_checkin: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// DB-side row struct that includes the record ID via `meta::id(id)`.
#[derive(Debug, SurrealValue)]
struct ConsumerRowWithId {
    record_id: String,
    owner_id: String,
    name: String,
    ctype: String,
    facts: serde_json::Value,
    capabilities: Vec<String>,
    hypervisor_id: Option<String>,
    reporter_id: Option<String>,
    last_checkin: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

fn parse_ctype(s: &str) -> Result<ConsumerType, DbError> {
    match s {
        "System" => Ok(ConsumerType::System),
        "Hypervisor" => Ok(ConsumerType::Hypervisor),
        "Person" => Ok(ConsumerType::Person),
        "Domain" => Ok(ConsumerType::Domain),
        "Distributor" => Ok(ConsumerType::Distributor),
        other => Err(DbError::Decode(format!("unknown consumer type: {other}"))),
    }
}

fn ctype_to_string(t: ConsumerType) -> &'static str {
    match t {
        ConsumerType::System => "System",
        ConsumerType::Hypervisor => "Hypervisor",
        ConsumerType::Person => "Person",
        ConsumerType::Domain => "Domain",
        ConsumerType::Distributor => "Distributor",
    }
}

fn assemble(
    uuid: Uuid,
    owner_id: &str,
    name: String,
    ctype: &str,
    facts_value: serde_json::Value,
    capabilities: Vec<String>,
    hypervisor_id: Option<String>,
    reporter_id: Option<String>,
    last_checkin: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
) -> Result<Consumer, DbError> {
    Ok(Consumer {
        uuid,
        owner_id: parse_uuid(owner_id, "owner")?,
        name,
        ctype: parse_ctype(ctype)?,
        facts: value_to_map(facts_value)?,
        capabilities: capabilities.into_iter().collect::<BTreeSet<_>>(),
        hypervisor: hypervisor_id.map(|id| HypervisorIdentity {
            hypervisor_id: id,
            reporter_id,
        }),
        last_checkin,
        created_at,
        updated_at,
    })
}

impl ConsumerRow {
    fn into_consumer(self, uuid: Uuid) -> Result<Consumer, DbError> {
        assemble(
            uuid,
            &self.owner_id,
            self.name,
            &self.ctype,
            self.facts,
            self.capabilities,
            self.hypervisor_id,
            self.reporter_id,
            self.last_checkin,
            self.created_at,
            self.updated_at,
        )
    }
}

impl ConsumerRowWithId {
    fn try_into_consumer(self) -> Result<Consumer, DbError> {
        let uuid = parse_uuid(&self.record_id, "consumer")?;
        assemble(
            uuid,
            &self.owner_id,
            self.name,
            &self.ctype,
            self.facts,
            self.capabilities,
            self.hypervisor_id,
            self.reporter_id,
            self.last_checkin,
            self.created_at,
            self.updated_at,
        )
    }
}

/// SurrealDB implementation of the Consumer repository.
#[derive(Clone)]
pub struct SurrealConsumerRepository<C: Connection> {
    db: Surreal<C>,
}

impl<C: Connection> SurrealConsumerRepository<C> {
    pub fn new(db: Surreal<C>) -> Self {
        Self { db }
    }
}

impl<C: Connection> ConsumerRepository for SurrealConsumerRepository<C> {
    async fn create(&self, input: CreateConsumer) -> TetherResult<Consumer> {
        let uuid = Uuid::new_v4();
        let id_str = uuid.to_string();
        let (hypervisor_id, reporter_id) = match input.hypervisor {
            Some(h) => (Some(h.hypervisor_id), h.reporter_id),
            None => (None, None),
        };

        let result = self
            .db
            .query(
                "CREATE type::record('consumer', $id) SET \
                 owner_id = $owner_id, \
                 name = $name, ctype = $ctype, \
                 facts = $facts, \
                 capabilities = $capabilities, \
                 hypervisor_id = $hypervisor_id, \
                 reporter_id = $reporter_id, \
                 last_checkin = $last_checkin",
            )
            .bind(("id", id_str.clone()))
            .bind(("owner_id", input.owner_id.to_string()))
            .bind(("name", input.name))
            .bind(("ctype", ctype_to_string(input.ctype).to_string()))
            .bind(("facts", map_to_value(&input.facts)))
            .bind((
                "capabilities",
                input.capabilities.into_iter().collect::<Vec<_>>(),
            ))
            .bind(("hypervisor_id", hypervisor_id))
            .bind(("reporter_id", reporter_id))
            .bind(("last_checkin", input.last_checkin))
            .await
            .map_err(DbError::from)?;

        let mut result = result
            .check()
            .map_err(DbError::from)?;

        let rows: Vec<ConsumerRow> = result.take(0).map_err(DbError::from)?;
        let row = rows.into_iter().next().ok_or_else(|| DbError::NotFound {
            entity: "consumer".into(),
            id: id_str,
        })?;

        Ok(row.into_consumer(uuid)?)
    }

    async fn get_by_uuid(&self, owner_id: Uuid, uuid: Uuid) -> TetherResult<Consumer> {
        let id_str = uuid.to_string();

        let mut result = self
            .db
            .query(
                "SELECT * FROM type::record('consumer', $id) \
                 WHERE owner_id = $owner_id",
            )
            .bind(("id", id_str.clone()))
            .bind(("owner_id", owner_id.to_string()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<ConsumerRow> = result.take(0).map_err(DbError::from)?;
        let row = rows.into_iter().next().ok_or_else(|| DbError::NotFound {
            entity: "consumer".into(),
            id: id_str,
        })?;

        Ok(row.into_consumer(uuid)?)
    }

    async fn find_by_hypervisor_id(
        &self,
        owner_id: Uuid,
        hypervisor_id: &str,
    ) -> TetherResult<Option<Consumer>> {
        let mut result = self
            .db
            .query(
                "SELECT meta::id(id) AS record_id, * FROM consumer \
                 WHERE owner_id = $owner_id \
                 AND hypervisor_id = $hypervisor_id",
            )
            .bind(("owner_id", owner_id.to_string()))
            .bind(("hypervisor_id", hypervisor_id.to_string()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<ConsumerRowWithId> = result.take(0).map_err(DbError::from)?;
        match rows.into_iter().next() {
            Some(row) => Ok(Some(row.try_into_consumer().map_err(DbError::from)?)),
            None => Ok(None),
        }
    }

    async fn find_by_fact(
        &self,
        owner_id: Uuid,
        key: &str,
        value: &str,
    ) -> TetherResult<Vec<Consumer>> {
        let mut result = self
            .db
            .query(
                "SELECT meta::id(id) AS record_id, * FROM consumer \
                 WHERE owner_id = $owner_id \
                 AND facts[$key] = $value",
            )
            .bind(("owner_id", owner_id.to_string()))
            .bind(("key", key.to_string()))
            .bind(("value", value.to_string()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<ConsumerRowWithId> = result.take(0).map_err(DbError::from)?;
        let mut consumers = Vec::with_capacity(rows.len());
        for row in rows {
            consumers.push(row.try_into_consumer().map_err(DbError::from)?);
        }
        Ok(consumers)
    }

    async fn find_guest(
        &self,
        owner_id: Uuid,
        possible_virt_uuids: &[String],
    ) -> TetherResult<Option<Consumer>> {
        let mut result = self
            .db
            .query(
                "SELECT meta::id(id) AS record_id, * FROM consumer \
                 WHERE owner_id = $owner_id \
                 AND string::lowercase(facts[$key] ?? '') IN $ids",
            )
            .bind(("owner_id", owner_id.to_string()))
            .bind(("key", facts::VIRT_UUID.to_string()))
            .bind(("ids", possible_virt_uuids.to_vec()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<ConsumerRowWithId> = result.take(0).map_err(DbError::from)?;
        match rows.into_iter().next() {
            Some(row) => Ok(Some(row.try_into_consumer().map_err(DbError::from)?)),
            None => Ok(None),
        }
    }

    async fn update(
        &self,
        owner_id: Uuid,
        uuid: Uuid,
        input: UpdateConsumer,
    ) -> TetherResult<Consumer> {
        let id_str = uuid.to_string();

        let mut sets = Vec::new();
        if input.name.is_some() {
            sets.push("name = $name");
        }
        if input.ctype.is_some() {
            sets.push("ctype = $ctype");
        }
        if input.facts.is_some() {
            sets.push("facts = $facts");
        }
        if input.hypervisor.is_some() {
            sets.push("hypervisor_id = $hypervisor_id");
            sets.push("reporter_id = $reporter_id");
        }
        if input.last_checkin.is_some() {
            sets.push("last_checkin = $last_checkin");
        }
        sets.push("updated_at = time::now()");

        let query = format!(
            "UPDATE type::record('consumer', $id) SET {} \
             WHERE owner_id = $owner_id",
            sets.join(", ")
        );

        let mut builder = self
            .db
            .query(&query)
            .bind(("id", id_str.clone()))
            .bind(("owner_id", owner_id.to_string()));

        if let Some(name) = input.name {
            builder = builder.bind(("name", name));
        }
        if let Some(ctype) = input.ctype {
            builder = builder.bind(("ctype", ctype_to_string(ctype).to_string()));
        }
        if let Some(facts) = &input.facts {
            builder = builder.bind(("facts", map_to_value(facts)));
        }
        if let Some(hypervisor) = input.hypervisor {
            builder = builder
                .bind(("hypervisor_id", hypervisor.hypervisor_id))
                .bind(("reporter_id", hypervisor.reporter_id));
        }
        if let Some(last_checkin) = input.last_checkin {
            builder = builder.bind(("last_checkin", last_checkin));
        }

        let mut result = builder.await.map_err(DbError::from)?;

        let rows: Vec<ConsumerRow> = result.take(0).map_err(DbError::from)?;
        let row = rows.into_iter().next().ok_or_else(|| DbError::NotFound {
            entity: "consumer".into(),
            id: id_str,
        })?;

        Ok(row.into_consumer(uuid)?)
    }
}
