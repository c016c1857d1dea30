//! SurrealDB repository implementations.

mod consumer;
mod entitlement;
mod guest;
mod owner;
mod pool;

pub use consumer::SurrealConsumerRepository;
pub use entitlement::SurrealEntitlementRepository;
pub use guest::SurrealGuestMembershipRepository;
pub use owner::SurrealOwnerRepository;
pub use pool::SurrealPoolRepository;

use std::collections::BTreeMap;

use uuid::Uuid;

use crate::error::DbError;

/// String-keyed fact/attribute maps are stored as FLEXIBLE objects;
/// convert to the JSON object form on the way in.
fn map_to_value(map: &BTreeMap<String, String>) -> serde_json::Value {
    serde_json::Value::Object(
        map.iter()
            .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
            .collect(),
    )
}

/// And back out again. Non-string values are rejected rather than
/// silently stringified.
fn value_to_map(value: serde_json::Value) -> Result<BTreeMap<String, String>, DbError> {
    match value {
        serde_json::Value::Object(obj) => obj
            .into_iter()
            .map(|(k, v)| match v {
                serde_json::Value::String(s) => Ok((k, s)),
                other => Err(DbError::Decode(format!(
                    "expected string for key {k}, got {other}"
                ))),
            })
            .collect(),
        serde_json::Value::Null => Ok(BTreeMap::new()),
        other => Err(DbError::Decode(format!("expected object, got {other}"))),
    }
}

fn parse_uuid(raw: &str, what: &str) -> Result<Uuid, DbError> {
    Uuid::parse_str(raw).map_err(|e| DbError::Decode(format!("invalid {what} UUID: {e}")))
}
