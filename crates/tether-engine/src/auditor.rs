//! Host-scoped entitlement auditor.
//!
//! Reacts to guest membership changes: when a guest stops being
//! claimed by a host, any of the guest's entitlements whose pool is
//! scoped to a host that no longer claims it must be revoked. Hosted
//! owners are skipped; an upstream service governs their host-scoped
//! entitlements.

use tether_core::TetherResult;
use tether_core::models::owner::{OperatingMode, Owner};
use tether_core::repository::{
    ConsumerRepository, EntitlementRepository, GuestMembershipRepository,
};
use tether_core::virt::possible_guest_ids;
use tracing::{debug, info};
use uuid::Uuid;

use crate::batch::OperationBatch;

pub struct HostEntitlementAuditor<'a, C, G, E> {
    consumers: &'a C,
    guests: &'a G,
    entitlements: &'a E,
}

impl<'a, C, G, E> HostEntitlementAuditor<'a, C, G, E>
where
    C: ConsumerRepository,
    G: GuestMembershipRepository,
    E: EntitlementRepository,
{
    pub fn new(consumers: &'a C, guests: &'a G, entitlements: &'a E) -> Self {
        Self {
            consumers,
            guests,
            entitlements,
        }
    }

    /// Audit one guest whose host mapping changed (removed from a
    /// host's list, stolen by another host, or deleted outright).
    ///
    /// Looks up the guest's registered consumer via its virtualization
    /// identity fact, then queues revocation of every entitlement
    /// whose pool requires a host that no longer claims this guest.
    /// Unregistered guests are a no-op.
    pub async fn on_guest_removed(
        &self,
        owner: &Owner,
        guest_id: &str,
        batch: &mut OperationBatch,
    ) -> TetherResult<()> {
        if owner.mode == OperatingMode::Hosted {
            return Ok(());
        }

        let spellings = possible_guest_ids(guest_id);
        let Some(guest) = self.consumers.find_guest(owner.id, &spellings).await? else {
            debug!(guest_id, "no registered consumer for removed guest");
            return Ok(());
        };

        let claiming = self.guests.hosts_claiming(owner.id, &spellings).await?;

        for (entitlement, pool) in self
            .entitlements
            .list_requiring_host(owner.id, guest.uuid)
            .await?
        {
            let still_valid = pool
                .requires_host()
                .and_then(|raw| Uuid::parse_str(raw).ok())
                .is_some_and(|required| claiming.contains(&required));
            if !still_valid {
                info!(
                    guest_uuid = %guest.uuid,
                    entitlement_id = %entitlement.id,
                    pool_id = %pool.id,
                    "revoking host-scoped entitlement after guest mapping change"
                );
                batch.add_revoke(entitlement.id);
            }
        }

        Ok(())
    }
}
