//! Domain models for Tether.
//!
//! These are the core types shared across all crates: owners (tenants),
//! consumers (registered endpoints), guest memberships (host → guest VM
//! topology), pools (capacity grants), and entitlements (bindings of a
//! consumer to a pool).

pub mod consumer;
pub mod entitlement;
pub mod guest;
pub mod owner;
pub mod pool;
