//! Repository trait definitions for data access abstraction.
//!
//! All repository operations are async and owner-scoped: every query
//! takes an `owner_id` so two owners reporting the same identifiers
//! never interfere. Implementations live in `tether-db`.

use uuid::Uuid;

use crate::error::TetherResult;
use crate::models::{
    consumer::{Consumer, CreateConsumer, UpdateConsumer},
    entitlement::{Entitlement, NewEntitlement},
    guest::{GuestMembership, NewGuestMembership},
    owner::{CreateOwner, Owner},
    pool::{NewPool, Pool},
};

pub trait OwnerRepository: Send + Sync {
    fn create(&self, input: CreateOwner) -> impl Future<Output = TetherResult<Owner>> + Send;
    fn get_by_id(&self, id: Uuid) -> impl Future<Output = TetherResult<Owner>> + Send;
    fn get_by_key(&self, key: &str) -> impl Future<Output = TetherResult<Owner>> + Send;
}

pub trait ConsumerRepository: Send + Sync {
    fn create(&self, input: CreateConsumer) -> impl Future<Output = TetherResult<Consumer>> + Send;

    fn get_by_uuid(
        &self,
        owner_id: Uuid,
        uuid: Uuid,
    ) -> impl Future<Output = TetherResult<Consumer>> + Send;

    /// Exact match on the canonical hypervisor id within the owner.
    fn find_by_hypervisor_id(
        &self,
        owner_id: Uuid,
        hypervisor_id: &str,
    ) -> impl Future<Output = TetherResult<Option<Consumer>>> + Send;

    /// Consumers within the owner whose fact `key` equals `value`.
    ///
    /// Returns all matches, including consumers that already carry a
    /// hypervisor identity; the identity resolver decides between a
    /// merge and an identity conflict.
    fn find_by_fact(
        &self,
        owner_id: Uuid,
        key: &str,
        value: &str,
    ) -> impl Future<Output = TetherResult<Vec<Consumer>>> + Send;

    /// The registered guest consumer whose `virt.uuid` fact matches any
    /// of the given spellings, if one exists.
    fn find_guest(
        &self,
        owner_id: Uuid,
        possible_virt_uuids: &[String],
    ) -> impl Future<Output = TetherResult<Option<Consumer>>> + Send;

    fn update(
        &self,
        owner_id: Uuid,
        uuid: Uuid,
        input: UpdateConsumer,
    ) -> impl Future<Output = TetherResult<Consumer>> + Send;
}

pub trait GuestMembershipRepository: Send + Sync {
    fn list_for_host(
        &self,
        owner_id: Uuid,
        host_uuid: Uuid,
    ) -> impl Future<Output = TetherResult<Vec<GuestMembership>>> + Send;

    /// Membership of `host_uuid` matching any of the given spellings.
    fn get(
        &self,
        owner_id: Uuid,
        host_uuid: Uuid,
        possible_ids: &[String],
    ) -> impl Future<Output = TetherResult<Option<GuestMembership>>> + Send;

    /// Atomically replace the host's membership list.
    ///
    /// Members kept across the replace retain their `created_at`; a
    /// guest id already claimed by another host within the owner is
    /// stolen from that host.
    fn replace_for_host(
        &self,
        owner_id: Uuid,
        host_uuid: Uuid,
        entries: Vec<NewGuestMembership>,
    ) -> impl Future<Output = TetherResult<Vec<GuestMembership>>> + Send;

    /// Create or update a single membership, stealing the guest from
    /// any other host within the owner.
    fn upsert_single(
        &self,
        owner_id: Uuid,
        host_uuid: Uuid,
        entry: NewGuestMembership,
    ) -> impl Future<Output = TetherResult<GuestMembership>> + Send;

    /// Remove a single membership. Idempotent; never touches the
    /// guest's own consumer.
    fn delete_single(
        &self,
        owner_id: Uuid,
        host_uuid: Uuid,
        guest_id: &str,
    ) -> impl Future<Output = TetherResult<()>> + Send;

    /// UUIDs of hosts currently claiming the guest within the owner.
    fn hosts_claiming(
        &self,
        owner_id: Uuid,
        possible_ids: &[String],
    ) -> impl Future<Output = TetherResult<Vec<Uuid>>> + Send;
}

pub trait PoolRepository: Send + Sync {
    fn create(&self, input: NewPool) -> impl Future<Output = TetherResult<Pool>> + Send;

    fn get_by_id(
        &self,
        owner_id: Uuid,
        id: Uuid,
    ) -> impl Future<Output = TetherResult<Pool>> + Send;

    /// Add `delta` (possibly negative) to the pool's quantity.
    /// Unbounded pools are left untouched by implementations.
    fn adjust_quantity(
        &self,
        owner_id: Uuid,
        pool_id: Uuid,
        delta: i64,
    ) -> impl Future<Output = TetherResult<Pool>> + Send;

    fn find_by_subscription(
        &self,
        owner_id: Uuid,
        subscription_id: &str,
    ) -> impl Future<Output = TetherResult<Vec<Pool>>> + Send;

    /// Derived pools of a subscription, optionally narrowed to those
    /// scoped to one host via `requires_host`.
    fn find_derived_by_subscription(
        &self,
        owner_id: Uuid,
        subscription_id: &str,
        requires_host: Option<Uuid>,
    ) -> impl Future<Output = TetherResult<Vec<Pool>>> + Send;
}

pub trait EntitlementRepository: Send + Sync {
    fn create(
        &self,
        input: NewEntitlement,
    ) -> impl Future<Output = TetherResult<Entitlement>> + Send;

    fn get(
        &self,
        owner_id: Uuid,
        id: Uuid,
    ) -> impl Future<Output = TetherResult<Entitlement>> + Send;

    fn list_by_consumer(
        &self,
        owner_id: Uuid,
        consumer_uuid: Uuid,
    ) -> impl Future<Output = TetherResult<Vec<Entitlement>>> + Send;

    /// The consumer's entitlements whose pool carries `requires_host`,
    /// paired with that pool.
    fn list_requiring_host(
        &self,
        owner_id: Uuid,
        consumer_uuid: Uuid,
    ) -> impl Future<Output = TetherResult<Vec<(Entitlement, Pool)>>> + Send;

    /// Remove an entitlement. Returns `false` when it was already gone;
    /// a concurrent removal is idempotent success, not an error.
    fn revoke(
        &self,
        owner_id: Uuid,
        id: Uuid,
    ) -> impl Future<Output = TetherResult<bool>> + Send;
}
