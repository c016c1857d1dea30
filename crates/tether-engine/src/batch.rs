//! Operation batch collector.
//!
//! The auditor and the quantity engine never write to storage; they
//! accumulate pool creates, pool quantity adjustments, and entitlement
//! revocations here. Nothing mutates until the caller commits the
//! batch with [`apply_batch`], which keeps both components pure
//! functions of their inputs plus currently stored state.

use std::collections::{BTreeMap, BTreeSet};

use tether_core::TetherResult;
use tether_core::models::pool::NewPool;
use tether_core::repository::{EntitlementRepository, PoolRepository};
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Default)]
pub struct OperationBatch {
    creates: Vec<NewPool>,
    adjusts: BTreeMap<Uuid, i64>,
    revocations: BTreeSet<Uuid>,
}

impl OperationBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_create(&mut self, pool: NewPool) {
        self.creates.push(pool);
    }

    /// Record a signed quantity adjustment. Repeated adjustments on
    /// one pool collapse into a single net delta.
    pub fn add_adjust(&mut self, pool_id: Uuid, delta: i64) {
        *self.adjusts.entry(pool_id).or_insert(0) += delta;
    }

    /// Record an entitlement revocation. Duplicates are collapsed.
    pub fn add_revoke(&mut self, entitlement_id: Uuid) {
        self.revocations.insert(entitlement_id);
    }

    pub fn creates(&self) -> &[NewPool] {
        &self.creates
    }

    /// Net adjustments, zero-sum entries dropped.
    pub fn adjusts(&self) -> impl Iterator<Item = (Uuid, i64)> + '_ {
        self.adjusts
            .iter()
            .filter(|(_, delta)| **delta != 0)
            .map(|(id, delta)| (*id, *delta))
    }

    pub fn revocations(&self) -> impl Iterator<Item = Uuid> + '_ {
        self.revocations.iter().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.creates.is_empty()
            && self.adjusts.values().all(|delta| *delta == 0)
            && self.revocations.is_empty()
    }
}

/// Commit an accumulated batch: revocations first (so freed capacity
/// is visible before adjustments land), then creates, then net
/// quantity adjustments.
pub async fn apply_batch<P, E>(
    owner_id: Uuid,
    batch: &OperationBatch,
    pools: &P,
    entitlements: &E,
) -> TetherResult<()>
where
    P: PoolRepository,
    E: EntitlementRepository,
{
    for entitlement_id in batch.revocations() {
        let removed = entitlements.revoke(owner_id, entitlement_id).await?;
        if !removed {
            // Lost a race with a concurrent removal; idempotent success.
            debug!(%entitlement_id, "entitlement already revoked");
        }
    }

    for pool in batch.creates() {
        let created = pools.create(pool.clone()).await?;
        debug!(pool_id = %created.id, quantity = created.quantity, "created derived pool");
    }

    for (pool_id, delta) in batch.adjusts() {
        pools.adjust_quantity(owner_id, pool_id, delta).await?;
        debug!(%pool_id, delta, "adjusted pool quantity");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_adjustments_collapse_to_net_delta() {
        let mut batch = OperationBatch::new();
        let pool = Uuid::new_v4();
        batch.add_adjust(pool, 30);
        batch.add_adjust(pool, -10);
        batch.add_adjust(pool, 5);

        let adjusts: Vec<_> = batch.adjusts().collect();
        assert_eq!(adjusts, vec![(pool, 25)]);
    }

    #[test]
    fn zero_sum_adjustments_are_dropped() {
        let mut batch = OperationBatch::new();
        let pool = Uuid::new_v4();
        batch.add_adjust(pool, 7);
        batch.add_adjust(pool, -7);

        assert_eq!(batch.adjusts().count(), 0);
        assert!(batch.is_empty());
    }

    #[test]
    fn duplicate_revocations_are_collapsed() {
        let mut batch = OperationBatch::new();
        let ent = Uuid::new_v4();
        batch.add_revoke(ent);
        batch.add_revoke(ent);

        assert_eq!(batch.revocations().count(), 1);
    }

    #[test]
    fn empty_batch_reports_empty() {
        assert!(OperationBatch::new().is_empty());
    }
}
