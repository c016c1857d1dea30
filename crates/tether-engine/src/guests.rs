//! Guest mapping service.
//!
//! The single-host surface for guest memberships outside check-in:
//! list, lookup, bulk replace, single-entry update, and delete. Edits
//! that change which host claims a guest run the same entitlement
//! audit as a check-in; attribute-only edits do not. Deleting a
//! membership never deletes the guest's own consumer.

use std::collections::BTreeMap;

use tether_core::models::guest::{GuestMembership, NewGuestMembership};
use tether_core::models::owner::Owner;
use tether_core::repository::{
    ConsumerRepository, EntitlementRepository, GuestMembershipRepository, PoolRepository,
};
use tether_core::virt::{canonical_guest_id, possible_guest_ids};
use tether_core::{TetherError, TetherResult};
use tracing::debug;
use uuid::Uuid;

use crate::auditor::HostEntitlementAuditor;
use crate::batch::{OperationBatch, apply_batch};
use crate::locks::OwnerLocks;

pub struct GuestMappingService<C, G, E, P> {
    consumers: C,
    guests: G,
    entitlements: E,
    pools: P,
    owner_locks: OwnerLocks,
}

impl<C, G, E, P> GuestMappingService<C, G, E, P>
where
    C: ConsumerRepository,
    G: GuestMembershipRepository,
    E: EntitlementRepository,
    P: PoolRepository,
{
    pub fn new(consumers: C, guests: G, entitlements: E, pools: P) -> Self {
        Self {
            consumers,
            guests,
            entitlements,
            pools,
            owner_locks: OwnerLocks::default(),
        }
    }

    /// Share serialization points with a reconciler so membership
    /// edits never interleave with a check-in batch for the same
    /// owner.
    pub fn with_owner_locks(mut self, owner_locks: OwnerLocks) -> Self {
        self.owner_locks = owner_locks;
        self
    }

    pub async fn list(&self, owner: &Owner, host_uuid: Uuid) -> TetherResult<Vec<GuestMembership>> {
        self.guests.list_for_host(owner.id, host_uuid).await
    }

    /// Look up one membership; either byte-order spelling resolves.
    pub async fn get(
        &self,
        owner: &Owner,
        host_uuid: Uuid,
        guest_id: &str,
    ) -> TetherResult<Option<GuestMembership>> {
        let spellings = possible_guest_ids(guest_id);
        self.guests.get(owner.id, host_uuid, &spellings).await
    }

    /// Replace the host's whole membership list, auditing every guest
    /// whose host mapping changed.
    pub async fn replace(
        &self,
        owner: &Owner,
        host_uuid: Uuid,
        entries: Vec<NewGuestMembership>,
    ) -> TetherResult<Vec<GuestMembership>> {
        let _guard = self.owner_locks.acquire(owner.id).await;

        let mut canonical: BTreeMap<String, NewGuestMembership> = BTreeMap::new();
        for mut entry in entries {
            let Some(id) = canonical_guest_id(&entry.guest_id) else {
                continue;
            };
            entry.reported_id = std::mem::take(&mut entry.guest_id);
            entry.guest_id = id.clone();
            canonical.insert(id, entry);
        }

        let stored = self.guests.list_for_host(owner.id, host_uuid).await?;
        let removed: Vec<String> = stored
            .iter()
            .filter(|m| !canonical.contains_key(&m.guest_id))
            .map(|m| m.guest_id.clone())
            .collect();
        let added: Vec<String> = canonical
            .keys()
            .filter(|id| !stored.iter().any(|m| &m.guest_id == *id))
            .cloned()
            .collect();

        let replaced = self
            .guests
            .replace_for_host(owner.id, host_uuid, canonical.into_values().collect())
            .await?;

        let mut batch = OperationBatch::new();
        let auditor =
            HostEntitlementAuditor::new(&self.consumers, &self.guests, &self.entitlements);
        for guest_id in removed.iter().chain(added.iter()) {
            auditor.on_guest_removed(owner, guest_id, &mut batch).await?;
        }
        apply_batch(owner.id, &batch, &self.pools, &self.entitlements).await?;

        Ok(replaced)
    }

    /// Update one membership's attributes, creating (and stealing)
    /// the membership when the guest is not yet on this host.
    ///
    /// An attribute-only edit never triggers the entitlement audit;
    /// a host change does.
    pub async fn update(
        &self,
        owner: &Owner,
        host_uuid: Uuid,
        guest_id: &str,
        attributes: BTreeMap<String, String>,
    ) -> TetherResult<GuestMembership> {
        let canonical = canonical_guest_id(guest_id).ok_or_else(|| TetherError::Validation {
            message: "guest id must not be empty".into(),
        })?;
        let spellings = possible_guest_ids(guest_id);

        let _guard = self.owner_locks.acquire(owner.id).await;

        let already_here = self
            .guests
            .get(owner.id, host_uuid, &spellings)
            .await?
            .is_some();

        let membership = self
            .guests
            .upsert_single(
                owner.id,
                host_uuid,
                NewGuestMembership {
                    guest_id: canonical.clone(),
                    reported_id: guest_id.to_string(),
                    attributes,
                },
            )
            .await?;

        if already_here {
            debug!(guest_id = %canonical, "attribute-only membership update");
        } else {
            let mut batch = OperationBatch::new();
            let auditor =
                HostEntitlementAuditor::new(&self.consumers, &self.guests, &self.entitlements);
            auditor.on_guest_removed(owner, &canonical, &mut batch).await?;
            apply_batch(owner.id, &batch, &self.pools, &self.entitlements).await?;
        }

        Ok(membership)
    }

    /// Remove one membership. The guest then has no current host, so
    /// all of its host-scoped entitlements are revoked (standalone
    /// owners). Idempotent; unknown guests are a no-op.
    pub async fn delete(&self, owner: &Owner, host_uuid: Uuid, guest_id: &str) -> TetherResult<()> {
        let Some(canonical) = canonical_guest_id(guest_id) else {
            return Ok(());
        };
        let spellings = possible_guest_ids(guest_id);

        let _guard = self.owner_locks.acquire(owner.id).await;

        let existing = self.guests.get(owner.id, host_uuid, &spellings).await?;
        if existing.is_none() {
            return Ok(());
        }

        self.guests
            .delete_single(owner.id, host_uuid, &canonical)
            .await?;

        let mut batch = OperationBatch::new();
        let auditor =
            HostEntitlementAuditor::new(&self.consumers, &self.guests, &self.entitlements);
        auditor.on_guest_removed(owner, &canonical, &mut batch).await?;
        apply_batch(owner.id, &batch, &self.pools, &self.entitlements).await?;

        Ok(())
    }
}
