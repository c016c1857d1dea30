//! Derived-pool ("bonus") quantity engine.
//!
//! Physical binds against products declaring `virt_limit` grant extra
//! virtual capacity: either a host-restricted derived pool per bind
//! (`host_limited` products) or a shared derived pool per subscription
//! whose quantity shrinks as physical units are bound and grows back
//! as they are unbound. For a finite `virt_limit = L` the invariant is
//! that derived quantity plus the sum of bound physical quantities
//! times L stays constant across any bind/unbind sequence; unlimited
//! derived pools stay at quantity −1 and are never adjusted.

use std::collections::BTreeMap;

use tether_core::TetherResult;
use tether_core::models::consumer::ConsumerType;
use tether_core::models::owner::{OperatingMode, Owner};
use tether_core::models::pool::{NewPool, Pool, SubKey, VirtLimit, attrs, product_attrs};
use tether_core::repository::PoolRepository;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::batch::OperationBatch;

/// One entitlement newly bound or unbound in an operation.
#[derive(Debug, Clone)]
pub struct BindEvent {
    pub entitlement_id: Uuid,
    /// The pool bound against (the subscription's primary pool).
    pub pool: Pool,
    pub consumer_uuid: Uuid,
    pub consumer_type: ConsumerType,
    /// Whether the binding consumer is a virtual guest per its facts.
    pub is_guest: bool,
    /// Signed bound quantity: positive for bind, negative for unbind.
    pub delta: i64,
}

impl BindEvent {
    fn participates(&self) -> bool {
        // Distributors carry entitlements downstream and guests consume
        // the bonus capacity; neither grants more of it.
        self.consumer_type != ConsumerType::Distributor && !self.is_guest
    }
}

pub struct BonusPoolEngine<'a, P> {
    pools: &'a P,
}

impl<'a, P: PoolRepository> BonusPoolEngine<'a, P> {
    pub fn new(pools: &'a P) -> Self {
        Self { pools }
    }

    /// Compute the derived-pool operations for one batch of bind and
    /// unbind events, possibly spanning several subscriptions.
    ///
    /// Events against the same shared derived pool collapse into one
    /// net adjustment on the batch.
    pub async fn process(
        &self,
        owner: &Owner,
        events: &[BindEvent],
        batch: &mut OperationBatch,
    ) -> TetherResult<()> {
        // subscription id -> (net physical delta, limit, primary pool)
        let mut shared: BTreeMap<String, (i64, VirtLimit, &Pool)> = BTreeMap::new();

        for event in events {
            let Some(limit) = event.pool.product.virt_limit() else {
                if event.pool.product.attribute(product_attrs::VIRT_LIMIT).is_some() {
                    warn!(
                        pool_id = %event.pool.id,
                        product = %event.pool.product.id,
                        "skipping bind event with unparseable virt_limit"
                    );
                }
                continue;
            };

            if !event.participates() {
                debug!(
                    consumer = %event.consumer_uuid,
                    "consumer type does not interact with bonus pools"
                );
                continue;
            }

            if event.pool.product.host_limited() {
                if event.delta > 0 {
                    batch.add_create(self.host_limited_pool(owner, event, limit));
                }
                // Unbind of a host-limited entitlement revokes the
                // derived pool's bindings through the auditor path;
                // nothing to adjust here.
                continue;
            }

            let entry = shared
                .entry(event.pool.subscription_id.clone())
                .or_insert((0, limit, &event.pool));
            entry.0 += event.delta;
        }

        for (subscription_id, (net_delta, limit, primary)) in shared {
            self.process_shared(owner, &subscription_id, net_delta, limit, primary, batch)
                .await?;
        }

        Ok(())
    }

    /// A per-bind derived pool restricted to the binding host.
    fn host_limited_pool(&self, owner: &Owner, event: &BindEvent, limit: VirtLimit) -> NewPool {
        let quantity = match limit {
            VirtLimit::Unlimited => Pool::UNBOUNDED,
            VirtLimit::Finite(per_unit) => event.delta * per_unit,
        };

        let mut attributes = BTreeMap::new();
        attributes.insert(attrs::VIRT_ONLY.to_string(), "true".to_string());
        attributes.insert(attrs::DERIVED_POOL.to_string(), "true".to_string());
        attributes.insert(
            attrs::REQUIRES_HOST.to_string(),
            event.consumer_uuid.to_string(),
        );

        NewPool {
            owner_id: owner.id,
            product: event.pool.product.clone(),
            quantity,
            attributes,
            subscription_id: event.pool.subscription_id.clone(),
            sub_key: SubKey::Derived,
            source_entitlement: Some(event.entitlement_id),
        }
    }

    /// Adjust (or in hosted mode lazily create) the subscription's
    /// shared derived pool for a net physical delta.
    async fn process_shared(
        &self,
        owner: &Owner,
        subscription_id: &str,
        net_delta: i64,
        limit: VirtLimit,
        primary: &Pool,
        batch: &mut OperationBatch,
    ) -> TetherResult<()> {
        if net_delta == 0 {
            return Ok(());
        }

        let derived = self
            .pools
            .find_derived_by_subscription(owner.id, subscription_id, None)
            .await?;

        if derived.is_empty() {
            if owner.mode != OperatingMode::Hosted || net_delta < 0 {
                warn!(
                    subscription_id,
                    "no shared derived pool for virt_limit subscription"
                );
                return Ok(());
            }
            batch.add_create(self.lazy_shared_pool(owner, subscription_id, net_delta, limit, primary));
            return Ok(());
        }

        if let VirtLimit::Finite(per_unit) = limit {
            for pool in &derived {
                if pool.is_unbounded() {
                    continue;
                }
                batch.add_adjust(pool.id, -net_delta * per_unit);
                // One shared pool per subscription; adjust the first
                // bounded one only.
                break;
            }
        }

        Ok(())
    }

    /// First qualifying bind in hosted mode creates the shared pool,
    /// seeded so the conservation invariant already accounts for this
    /// bind's quantity.
    fn lazy_shared_pool(
        &self,
        owner: &Owner,
        subscription_id: &str,
        net_delta: i64,
        limit: VirtLimit,
        primary: &Pool,
    ) -> NewPool {
        let quantity = match limit {
            VirtLimit::Unlimited => Pool::UNBOUNDED,
            VirtLimit::Finite(per_unit) => (primary.quantity - net_delta) * per_unit,
        };

        let mut attributes = BTreeMap::new();
        attributes.insert(attrs::VIRT_ONLY.to_string(), "true".to_string());
        attributes.insert(attrs::DERIVED_POOL.to_string(), "true".to_string());

        NewPool {
            owner_id: owner.id,
            product: primary.product.clone(),
            quantity,
            attributes,
            subscription_id: subscription_id.to_string(),
            sub_key: SubKey::Derived,
            source_entitlement: None,
        }
    }
}
