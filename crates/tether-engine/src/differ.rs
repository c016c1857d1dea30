//! Guest membership differ.
//!
//! Pure computation of the minimal mutation between a stored and a
//! reported guest-id set. Both sides must already be in canonical form
//! (see [`tether_core::virt::canonical_guest_id`]), so case-only and
//! byte-order respellings never show up as changes here.

use std::collections::BTreeSet;

/// The minimal mutation between stored and reported guest-id sets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GuestDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub unchanged: Vec<String>,
}

impl GuestDiff {
    /// Whether applying this diff would change the membership list.
    pub fn is_changed(&self) -> bool {
        !self.added.is_empty() || !self.removed.is_empty()
    }
}

/// Diff two canonical guest-id sets.
pub fn diff_guest_sets(stored: &BTreeSet<String>, reported: &BTreeSet<String>) -> GuestDiff {
    let mut diff = GuestDiff::default();
    for id in reported {
        if stored.contains(id) {
            diff.unchanged.push(id.clone());
        } else {
            diff.added.push(id.clone());
        }
    }
    for id in stored {
        if !reported.contains(id) {
            diff.removed.push(id.clone());
        }
    }
    diff
}
