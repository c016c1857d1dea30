//! Tether Engine — topology reconciliation and derived-pool quantities.
//!
//! The engine absorbs batched host→guest check-in reports, reconciles
//! them against stored topology, revokes host-scoped entitlements that
//! no longer match any claiming host, and sizes virtual-limit bonus
//! pools from physical bind/unbind events. It is generic over the
//! repository traits in `tether-core` and has no dependency on
//! `tether-db`.

pub mod auditor;
pub mod batch;
pub mod bonus;
pub mod checkin;
pub mod config;
pub mod differ;
pub mod error;
pub mod guests;
pub mod locks;
pub mod reconciler;

pub use auditor::HostEntitlementAuditor;
pub use batch::{OperationBatch, apply_batch};
pub use bonus::{BindEvent, BonusPoolEngine};
pub use checkin::{
    CheckInReport, CheckInResult, ConsumerSummary, FailReason, FailedEntry, ReportedGuest,
    ReportedHypervisor,
};
pub use config::EngineConfig;
pub use differ::{GuestDiff, diff_guest_sets};
pub use error::EngineError;
pub use guests::GuestMappingService;
pub use locks::OwnerLocks;
pub use reconciler::TopologyReconciler;
