//! Pool domain model.
//!
//! A pool is a capacity grant against a product. Primary ("master")
//! pools are created from subscriptions by an external refresh process;
//! derived ("bonus") pools are created and sized only by the quantity
//! engine, never by a direct bind.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Well-known pool attribute keys.
pub mod attrs {
    pub const VIRT_ONLY: &str = "virt_only";
    pub const PHYSICAL_ONLY: &str = "physical_only";
    pub const REQUIRES_HOST: &str = "requires_host";
    pub const REQUIRES_CONSUMER: &str = "requires_consumer";
    pub const REQUIRES_CONSUMER_TYPE: &str = "requires_consumer_type";
    pub const UNMAPPED_GUESTS_ONLY: &str = "unmapped_guests_only";
    pub const DERIVED_POOL: &str = "derived_pool";
}

/// Well-known product attribute keys.
pub mod product_attrs {
    pub const VIRT_LIMIT: &str = "virt_limit";
    pub const HOST_LIMITED: &str = "host_limited";
}

/// The `virt_limit` declared on a product, parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VirtLimit {
    Unlimited,
    Finite(i64),
}

/// Reference to the licensed product a pool grants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductRef {
    pub id: String,
    pub name: String,
    pub attributes: BTreeMap<String, String>,
}

impl ProductRef {
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    /// Parsed `virt_limit`, or `None` when absent or invalid
    /// (non-numeric, zero, or negative).
    pub fn virt_limit(&self) -> Option<VirtLimit> {
        match self.attribute(product_attrs::VIRT_LIMIT)? {
            "unlimited" => Some(VirtLimit::Unlimited),
            raw => match raw.parse::<i64>() {
                Ok(n) if n > 0 => Some(VirtLimit::Finite(n)),
                _ => None,
            },
        }
    }

    pub fn host_limited(&self) -> bool {
        self.attribute(product_attrs::HOST_LIMITED) == Some("true")
    }
}

/// Whether a pool is the subscription's primary pool or derived from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubKey {
    Master,
    Derived,
}

/// A capacity grant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pool {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub product: ProductRef,
    /// Remaining grantable units; [`Pool::UNBOUNDED`] means unlimited.
    pub quantity: i64,
    pub attributes: BTreeMap<String, String>,
    pub subscription_id: String,
    pub sub_key: SubKey,
    /// Units currently bound by entitlements.
    pub consumed: i64,
    /// Non-owning back-reference to the entitlement this pool was
    /// derived from; `Some` marks a per-bind derived pool.
    pub source_entitlement: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Pool {
    /// Sentinel quantity for pools without a capacity bound.
    pub const UNBOUNDED: i64 = -1;

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    pub fn is_derived(&self) -> bool {
        self.sub_key == SubKey::Derived || self.attribute(attrs::DERIVED_POOL) == Some("true")
    }

    /// The host consumer UUID this pool is scoped to, if host-limited.
    pub fn requires_host(&self) -> Option<&str> {
        self.attribute(attrs::REQUIRES_HOST)
    }

    pub fn is_unbounded(&self) -> bool {
        self.quantity == Self::UNBOUNDED
    }
}

/// Fields required to create a new pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPool {
    pub owner_id: Uuid,
    pub product: ProductRef,
    pub quantity: i64,
    pub attributes: BTreeMap<String, String>,
    pub subscription_id: String,
    pub sub_key: SubKey,
    pub source_entitlement: Option<Uuid>,
}
