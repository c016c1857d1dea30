//! Owner domain model.
//!
//! Owners are tenants. All consumers, guest memberships, pools, and
//! entitlements are scoped to an owner; two owners reporting the same
//! hypervisor id never interfere with each other.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How an owner's deployment operates.
///
/// Standalone owners manage their own subscriptions on site; hosted
/// owners are served by an upstream service. The distinction changes
/// when derived pools are created and whether host-scoped entitlement
/// revocation runs locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperatingMode {
    Standalone,
    Hosted,
}

/// A tenant owning consumers, pools, and entitlements.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Owner {
    pub id: Uuid,
    /// Unique, URL-safe key (e.g. `admin`, `acme-corp`).
    pub key: String,
    pub mode: OperatingMode,
    /// When set, automatic binding is disabled for this owner.
    pub autobind_disabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields required to create a new owner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateOwner {
    pub key: String,
    pub mode: OperatingMode,
    pub autobind_disabled: bool,
}
