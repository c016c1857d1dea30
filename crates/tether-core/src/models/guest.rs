//! Guest membership domain model.
//!
//! A guest membership records that a host consumer currently claims a
//! guest VM. Within an owner a guest id maps to at most one host;
//! reassignment steals the membership from the prior host at commit
//! time. Deleting a membership never deletes the guest's own consumer.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One host → guest claim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuestMembership {
    pub owner_id: Uuid,
    /// UUID of the host consumer claiming this guest.
    pub host_uuid: Uuid,
    /// Canonical guest id (see [`crate::virt::canonical_guest_id`]).
    pub guest_id: String,
    /// The id exactly as last reported by the agent.
    pub reported_id: String,
    pub attributes: BTreeMap<String, String>,
    /// When this guest was first claimed by this host. Preserved across
    /// bulk replaces that keep the member.
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating or replacing memberships on a host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewGuestMembership {
    pub guest_id: String,
    pub reported_id: String,
    pub attributes: BTreeMap<String, String>,
}
