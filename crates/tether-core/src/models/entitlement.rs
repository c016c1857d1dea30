//! Entitlement domain model.
//!
//! An entitlement binds one consumer to one pool with a quantity and a
//! validity window. Created by bind, destroyed by unbind or revocation;
//! its presence or absence is what the host-scoped auditor inspects.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entitlement {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub consumer_uuid: Uuid,
    pub pool_id: Uuid,
    pub quantity: i64,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Fields required to bind a consumer to a pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewEntitlement {
    pub owner_id: Uuid,
    pub consumer_uuid: Uuid,
    pub pool_id: Uuid,
    pub quantity: i64,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
}
