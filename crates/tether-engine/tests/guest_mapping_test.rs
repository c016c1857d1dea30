//! Guest mapping service tests: the single-host membership surface
//! (list, get, replace, update, delete) and when each edit triggers
//! the host-scoped entitlement audit.

use std::collections::BTreeMap;

use chrono::{Duration, Utc};
use surrealdb::Surreal;
use surrealdb::engine::local::{Db, Mem};
use tether_core::models::consumer::{Consumer, ConsumerType, CreateConsumer, facts};
use tether_core::models::entitlement::{Entitlement, NewEntitlement};
use tether_core::models::guest::NewGuestMembership;
use tether_core::models::owner::{CreateOwner, OperatingMode, Owner};
use tether_core::models::pool::{NewPool, ProductRef, SubKey, attrs};
use tether_core::repository::{
    ConsumerRepository, EntitlementRepository, OwnerRepository, PoolRepository,
};
use tether_db::repository::{
    SurrealConsumerRepository, SurrealEntitlementRepository, SurrealGuestMembershipRepository,
    SurrealOwnerRepository, SurrealPoolRepository,
};
use tether_engine::GuestMappingService;
use uuid::Uuid;

const PLAIN: &str = "78563412-ab90-cdef-0123-456789abcdef";
const SWAPPED: &str = "12345678-90ab-efcd-0123-456789abcdef";

type Service = GuestMappingService<
    SurrealConsumerRepository<Db>,
    SurrealGuestMembershipRepository<Db>,
    SurrealEntitlementRepository<Db>,
    SurrealPoolRepository<Db>,
>;

async fn setup() -> (Surreal<Db>, Owner, Service) {
    let db = Surreal::new::<Mem>(()).await.unwrap();
    db.use_ns("test").use_db("test").await.unwrap();
    tether_db::run_migrations(&db).await.unwrap();

    let owner = SurrealOwnerRepository::new(db.clone())
        .create(CreateOwner {
            key: "acme".into(),
            mode: OperatingMode::Standalone,
            autobind_disabled: false,
        })
        .await
        .unwrap();

    let service = GuestMappingService::new(
        SurrealConsumerRepository::new(db.clone()),
        SurrealGuestMembershipRepository::new(db.clone()),
        SurrealEntitlementRepository::new(db.clone()),
        SurrealPoolRepository::new(db.clone()),
    );

    (db, owner, service)
}

fn entry(guest_id: &str) -> NewGuestMembership {
    NewGuestMembership {
        guest_id: guest_id.into(),
        reported_id: String::new(),
        attributes: BTreeMap::new(),
    }
}

/// Registers a guest consumer and binds it to a derived pool scoped
/// to the given host.
async fn bind_guest_to_host(
    db: &Surreal<Db>,
    owner: &Owner,
    guest_id: &str,
    host: Uuid,
) -> (Consumer, Entitlement) {
    let mut guest_facts = BTreeMap::new();
    guest_facts.insert(facts::VIRT_UUID.into(), guest_id.into());
    guest_facts.insert(facts::IS_GUEST.into(), "true".into());
    let guest = SurrealConsumerRepository::new(db.clone())
        .create(CreateConsumer {
            owner_id: owner.id,
            name: format!("vm-{guest_id}"),
            ctype: ConsumerType::System,
            facts: guest_facts,
            capabilities: Default::default(),
            hypervisor: None,
            last_checkin: None,
        })
        .await
        .unwrap();

    let mut pool_attrs = BTreeMap::new();
    pool_attrs.insert(attrs::REQUIRES_HOST.into(), host.to_string());
    pool_attrs.insert(attrs::DERIVED_POOL.into(), "true".into());
    let pool = SurrealPoolRepository::new(db.clone())
        .create(NewPool {
            owner_id: owner.id,
            product: ProductRef {
                id: "PROD-G".into(),
                name: "Guest Suite".into(),
                attributes: BTreeMap::new(),
            },
            quantity: 4,
            attributes: pool_attrs,
            subscription_id: "sub-g".into(),
            sub_key: SubKey::Derived,
            source_entitlement: None,
        })
        .await
        .unwrap();

    let now = Utc::now();
    let ent = SurrealEntitlementRepository::new(db.clone())
        .create(NewEntitlement {
            owner_id: owner.id,
            consumer_uuid: guest.uuid,
            pool_id: pool.id,
            quantity: 1,
            start_date: now,
            end_date: now + Duration::days(365),
        })
        .await
        .unwrap();

    (guest, ent)
}

#[tokio::test]
async fn list_and_get_resolve_either_spelling() {
    let (_db, owner, service) = setup().await;
    let host = Uuid::new_v4();

    service
        .replace(&owner, host, vec![entry(PLAIN)])
        .await
        .unwrap();

    let listed = service.list(&owner, host).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].guest_id, SWAPPED);
    assert_eq!(listed[0].reported_id, PLAIN);

    let upper = PLAIN.to_uppercase();
    for spelling in [PLAIN, SWAPPED, upper.as_str()] {
        let found = service.get(&owner, host, spelling).await.unwrap();
        assert_eq!(found.unwrap().guest_id, SWAPPED);
    }
}

#[tokio::test]
async fn replace_steals_membership_and_revokes_stale_entitlement() {
    let (db, owner, service) = setup().await;
    let h1 = Uuid::new_v4();
    let h2 = Uuid::new_v4();

    service.replace(&owner, h1, vec![entry("g")]).await.unwrap();
    let (_guest, stale) = bind_guest_to_host(&db, &owner, "g", h1).await;

    service.replace(&owner, h2, vec![entry("g")]).await.unwrap();

    assert!(service.list(&owner, h1).await.unwrap().is_empty());
    assert_eq!(service.list(&owner, h2).await.unwrap().len(), 1);

    let entitlements = SurrealEntitlementRepository::new(db);
    assert!(entitlements.get(owner.id, stale.id).await.is_err());
}

#[tokio::test]
async fn attribute_only_update_keeps_entitlements() {
    let (db, owner, service) = setup().await;
    let host = Uuid::new_v4();

    service.replace(&owner, host, vec![entry("g")]).await.unwrap();
    let (_guest, ent) = bind_guest_to_host(&db, &owner, "g", host).await;

    let mut attributes = BTreeMap::new();
    attributes.insert("active".into(), "1".into());
    let updated = service
        .update(&owner, host, "G", attributes.clone())
        .await
        .unwrap();
    assert_eq!(updated.attributes, attributes);

    let entitlements = SurrealEntitlementRepository::new(db);
    assert!(entitlements.get(owner.id, ent.id).await.is_ok());
}

#[tokio::test]
async fn update_that_changes_host_runs_the_audit() {
    let (db, owner, service) = setup().await;
    let h1 = Uuid::new_v4();
    let h2 = Uuid::new_v4();

    service.replace(&owner, h1, vec![entry("g")]).await.unwrap();
    let (_guest, stale) = bind_guest_to_host(&db, &owner, "g", h1).await;

    service.update(&owner, h2, "g", BTreeMap::new()).await.unwrap();

    assert!(service.list(&owner, h1).await.unwrap().is_empty());
    assert!(service.get(&owner, h2, "g").await.unwrap().is_some());

    let entitlements = SurrealEntitlementRepository::new(db);
    assert!(entitlements.get(owner.id, stale.id).await.is_err());
}

#[tokio::test]
async fn delete_revokes_host_scoped_entitlements_but_keeps_the_consumer() {
    let (db, owner, service) = setup().await;
    let host = Uuid::new_v4();

    service.replace(&owner, host, vec![entry("g")]).await.unwrap();
    let (guest, ent) = bind_guest_to_host(&db, &owner, "g", host).await;

    service.delete(&owner, host, "g").await.unwrap();

    assert!(service.get(&owner, host, "g").await.unwrap().is_none());

    let entitlements = SurrealEntitlementRepository::new(db.clone());
    assert!(entitlements.get(owner.id, ent.id).await.is_err());

    // The guest's own registration survives the mapping removal.
    let consumers = SurrealConsumerRepository::new(db);
    assert!(consumers.get_by_uuid(owner.id, guest.uuid).await.is_ok());

    // Repeating the delete is a no-op.
    service.delete(&owner, host, "g").await.unwrap();
}

#[tokio::test]
async fn delete_of_unknown_or_empty_guest_is_a_noop() {
    let (_db, owner, service) = setup().await;
    let host = Uuid::new_v4();

    service.delete(&owner, host, "never-seen").await.unwrap();
    service.delete(&owner, host, "").await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn edits_serialize_with_a_shared_owner_lock() {
    let (_db, owner, service) = setup().await;
    let locks = tether_engine::OwnerLocks::default();
    let service = std::sync::Arc::new(service.with_owner_locks(locks.clone()));

    service.replace(&owner, Uuid::new_v4(), vec![entry("g")]).await.unwrap();

    // Hold the owner's slot the way a running check-in batch would.
    let batch_guard = locks.acquire(owner.id).await;

    let mut edit = {
        let service = service.clone();
        let owner = owner.clone();
        tokio::spawn(async move {
            service.update(&owner, Uuid::new_v4(), "g", BTreeMap::new()).await
        })
    };

    // The edit cannot proceed while the batch holds the lock.
    let blocked = tokio::time::timeout(std::time::Duration::from_millis(50), &mut edit).await;
    assert!(blocked.is_err(), "edit ran while the batch lock was held");

    drop(batch_guard);
    edit.await.unwrap().unwrap();
}
