//! Check-in wire payload and result types.
//!
//! The payload is wire-format agnostic JSON, camelCase on the wire.
//! An empty `hypervisors` list is a valid report; a missing
//! `hypervisors` key is a request error caught at deserialization.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::EngineError;

/// One whole-fleet topology snapshot from a field agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckInReport {
    pub hypervisors: Vec<ReportedHypervisor>,
}

impl CheckInReport {
    /// Parse a raw JSON payload, rejecting schema violations before
    /// any processing happens.
    pub fn from_json(raw: &str) -> Result<Self, EngineError> {
        serde_json::from_str(raw).map_err(|e| EngineError::MalformedReport(e.to_string()))
    }
}

/// One host entry in a check-in report.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportedHypervisor {
    #[serde(default)]
    pub name: Option<String>,
    pub hypervisor_id: ReportedHypervisorId,
    #[serde(default)]
    pub guest_ids: Vec<ReportedGuest>,
    #[serde(default)]
    pub facts: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportedHypervisorId {
    pub hypervisor_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportedGuest {
    pub guest_id: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

/// Why a host entry landed in the failed bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FailReason {
    /// No consumer matched and creation was disallowed.
    NotFoundCreateDisallowed,
    /// The hardware identity resolved to a consumer already bound to a
    /// different hypervisor id.
    IdentityConflict { existing_hypervisor_id: String },
}

impl std::fmt::Display for FailReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFoundCreateDisallowed => {
                write!(f, "unknown hypervisor and creation is disallowed")
            }
            Self::IdentityConflict {
                existing_hypervisor_id,
            } => write!(
                f,
                "hardware identity already bound to hypervisor '{existing_hypervisor_id}'"
            ),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedEntry {
    pub hypervisor_id: String,
    pub reason: FailReason,
}

/// Summary of one consumer touched by a check-in.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerSummary {
    pub uuid: Uuid,
    pub name: String,
    /// The owning tenant's key.
    pub owner: String,
}

/// The aggregate result of one check-in batch.
///
/// Every well-formed host entry ends up in exactly one bucket.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckInResult {
    pub created: Vec<ConsumerSummary>,
    pub updated: Vec<ConsumerSummary>,
    pub unchanged: Vec<ConsumerSummary>,
    #[serde(rename = "failedUpdate")]
    pub failed: Vec<FailedEntry>,
}

impl CheckInResult {
    pub fn total(&self) -> usize {
        self.created.len() + self.updated.len() + self.unchanged.len() + self.failed.len()
    }
}
