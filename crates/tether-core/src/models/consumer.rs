//! Consumer domain model.
//!
//! A consumer is a registered endpoint: a physical system, a guest VM,
//! a hypervisor, or a distributor. Consumers are never deleted by the
//! reconciliation core; a non-hypervisor consumer may be upgraded in
//! place to a hypervisor (UUID and entitlements retained) when a
//! check-in report matches its hardware identity.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Well-known fact keys.
pub mod facts {
    /// Hardware identity reported by the agent; used to merge a
    /// previously registered system into a reported hypervisor.
    pub const SYSTEM_UUID: &str = "dmi.system.uuid";
    /// Virtualization identity of a guest VM, matched against guest
    /// memberships (either byte-order spelling).
    pub const VIRT_UUID: &str = "virt.uuid";
    /// `"true"` when the consumer is a guest VM.
    pub const IS_GUEST: &str = "virt.is_guest";
}

/// The kind of endpoint a consumer represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsumerType {
    System,
    Hypervisor,
    Person,
    Domain,
    Distributor,
}

/// Hypervisor identity attached to a hypervisor-typed consumer.
///
/// The id is stored in canonical (lowercase) form. The reporter id
/// records which field agent last reported this hypervisor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HypervisorIdentity {
    pub hypervisor_id: String,
    pub reporter_id: Option<String>,
}

/// A registered endpoint.
///
/// Invariant: `hypervisor` is `Some` only when `ctype` is
/// [`ConsumerType::Hypervisor`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Consumer {
    /// Immutable identity; survives the upgrade to hypervisor type.
    pub uuid: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    pub ctype: ConsumerType,
    /// Arbitrary key-value facts reported by the agent.
    pub facts: BTreeMap<String, String>,
    /// Optional feature names a distributor supports.
    pub capabilities: BTreeSet<String>,
    pub hypervisor: Option<HypervisorIdentity>,
    pub last_checkin: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Consumer {
    pub fn fact(&self, key: &str) -> Option<&str> {
        self.facts.get(key).map(String::as_str)
    }

    /// Whether this consumer is a guest VM per its reported facts.
    pub fn is_guest(&self) -> bool {
        self.fact(facts::IS_GUEST)
            .is_some_and(|v| v.eq_ignore_ascii_case("true") || v == "1")
    }
}

/// Fields required to register a new consumer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateConsumer {
    pub owner_id: Uuid,
    pub name: String,
    pub ctype: ConsumerType,
    pub facts: BTreeMap<String, String>,
    pub capabilities: BTreeSet<String>,
    pub hypervisor: Option<HypervisorIdentity>,
    pub last_checkin: Option<DateTime<Utc>>,
}

/// Fields that can be updated on an existing consumer.
///
/// `None` leaves the stored value untouched. Facts are replaced as a
/// whole map, never merged field by field.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateConsumer {
    pub name: Option<String>,
    pub ctype: Option<ConsumerType>,
    pub facts: Option<BTreeMap<String, String>>,
    pub hypervisor: Option<HypervisorIdentity>,
    pub last_checkin: Option<DateTime<Utc>>,
}
