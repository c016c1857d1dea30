//! Check-in reconciliation tests against in-memory SurrealDB.

use std::collections::BTreeMap;

use chrono::{Duration, Utc};
use surrealdb::Surreal;
use surrealdb::engine::local::{Db, Mem};
use tether_core::models::consumer::{ConsumerType, CreateConsumer, facts};
use tether_core::models::owner::{CreateOwner, OperatingMode, Owner};
use tether_core::models::pool::{NewPool, ProductRef, SubKey, attrs};
use tether_core::models::entitlement::NewEntitlement;
use tether_core::repository::{
    ConsumerRepository, EntitlementRepository, GuestMembershipRepository, OwnerRepository,
    PoolRepository,
};
use tether_db::repository::{
    SurrealConsumerRepository, SurrealEntitlementRepository, SurrealGuestMembershipRepository,
    SurrealOwnerRepository, SurrealPoolRepository,
};
use tether_engine::checkin::{ReportedGuest, ReportedHypervisor, ReportedHypervisorId};
use tether_engine::{CheckInReport, EngineConfig, FailReason, TopologyReconciler};

type Reconciler = TopologyReconciler<
    SurrealConsumerRepository<Db>,
    SurrealGuestMembershipRepository<Db>,
    SurrealEntitlementRepository<Db>,
    SurrealPoolRepository<Db>,
>;

async fn setup(mode: OperatingMode) -> (Surreal<Db>, Owner, Reconciler) {
    let db = Surreal::new::<Mem>(()).await.unwrap();
    db.use_ns("test").use_db("test").await.unwrap();
    tether_db::run_migrations(&db).await.unwrap();

    let owner = SurrealOwnerRepository::new(db.clone())
        .create(CreateOwner {
            key: "acme".into(),
            mode,
            autobind_disabled: false,
        })
        .await
        .unwrap();

    let reconciler = TopologyReconciler::new(
        SurrealConsumerRepository::new(db.clone()),
        SurrealGuestMembershipRepository::new(db.clone()),
        SurrealEntitlementRepository::new(db.clone()),
        SurrealPoolRepository::new(db.clone()),
        EngineConfig::default(),
    );

    (db, owner, reconciler)
}

fn entry(name: Option<&str>, hypervisor_id: &str, guests: &[&str]) -> ReportedHypervisor {
    ReportedHypervisor {
        name: name.map(str::to_string),
        hypervisor_id: ReportedHypervisorId {
            hypervisor_id: hypervisor_id.into(),
        },
        guest_ids: guests
            .iter()
            .map(|g| ReportedGuest {
                guest_id: g.to_string(),
                attributes: BTreeMap::new(),
            })
            .collect(),
        facts: BTreeMap::new(),
    }
}

fn report(entries: Vec<ReportedHypervisor>) -> CheckInReport {
    CheckInReport {
        hypervisors: entries,
    }
}

#[tokio::test]
async fn new_hypervisor_with_empty_guest_list_is_created() {
    let (db, owner, reconciler) = setup(OperatingMode::Standalone).await;

    let result = reconciler
        .check_in(&owner, Some("agent-1"), true, report(vec![entry(None, "hyp-1", &[])]))
        .await
        .unwrap();

    assert_eq!(result.created.len(), 1);
    assert_eq!(result.updated.len() + result.unchanged.len() + result.failed.len(), 0);
    assert_eq!(result.created[0].owner, "acme");

    let memberships = SurrealGuestMembershipRepository::new(db)
        .list_for_host(owner.id, result.created[0].uuid)
        .await
        .unwrap();
    assert!(memberships.is_empty());
}

#[tokio::test]
async fn identical_resubmission_is_unchanged_with_fresh_checkin() {
    let (db, owner, reconciler) = setup(OperatingMode::Standalone).await;
    let payload = report(vec![entry(Some("host-a"), "hyp-1", &["g1", "g2"])]);

    let first = reconciler
        .check_in(&owner, Some("agent-1"), true, payload.clone())
        .await
        .unwrap();
    assert_eq!(first.created.len(), 1);
    let uuid = first.created[0].uuid;

    let consumers = SurrealConsumerRepository::new(db);
    let checkin_before = consumers
        .get_by_uuid(owner.id, uuid)
        .await
        .unwrap()
        .last_checkin
        .unwrap();

    let second = reconciler
        .check_in(&owner, Some("agent-1"), true, payload)
        .await
        .unwrap();
    assert_eq!(second.unchanged.len(), 1);
    assert!(second.created.is_empty());
    assert!(second.updated.is_empty());

    let checkin_after = consumers
        .get_by_uuid(owner.id, uuid)
        .await
        .unwrap()
        .last_checkin
        .unwrap();
    assert!(checkin_after > checkin_before);
}

#[tokio::test]
async fn case_and_byte_order_respellings_are_unchanged() {
    let (_db, owner, reconciler) = setup(OperatingMode::Standalone).await;

    let first = reconciler
        .check_in(
            &owner,
            None,
            true,
            report(vec![entry(
                None,
                "HYP-1",
                &["ABC-VM", "78563412-ab90-cdef-0123-456789abcdef"],
            )]),
        )
        .await
        .unwrap();
    assert_eq!(first.created.len(), 1);

    let second = reconciler
        .check_in(
            &owner,
            None,
            true,
            report(vec![entry(
                None,
                "hyp-1",
                &["abc-vm", "12345678-90ab-efcd-0123-456789abcdef"],
            )]),
        )
        .await
        .unwrap();
    assert_eq!(second.unchanged.len(), 1);
    assert!(second.updated.is_empty());
}

#[tokio::test]
async fn dropped_guest_marks_host_updated_and_removes_membership() {
    let (db, owner, reconciler) = setup(OperatingMode::Standalone).await;

    let first = reconciler
        .check_in(&owner, None, true, report(vec![entry(None, "hyp-1", &["g1", "g2"])]))
        .await
        .unwrap();
    let host = first.created[0].uuid;

    let second = reconciler
        .check_in(&owner, None, true, report(vec![entry(None, "hyp-1", &["g1"])]))
        .await
        .unwrap();
    assert_eq!(second.updated.len(), 1);

    let remaining = SurrealGuestMembershipRepository::new(db)
        .list_for_host(owner.id, host)
        .await
        .unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].guest_id, "g1");
}

/// A standalone owner revokes the removed guest's host-scoped
/// entitlement; a hosted owner retains it.
async fn removed_guest_entitlement(mode: OperatingMode) -> bool {
    let (db, owner, reconciler) = setup(mode).await;

    let first = reconciler
        .check_in(&owner, None, true, report(vec![entry(None, "hyp-1", &["g1", "g2"])]))
        .await
        .unwrap();
    let host = first.created[0].uuid;

    // Register g2 as a consumer and bind it to a pool requiring hyp-1.
    let consumers = SurrealConsumerRepository::new(db.clone());
    let mut guest_facts = BTreeMap::new();
    guest_facts.insert(facts::VIRT_UUID.into(), "g2".into());
    guest_facts.insert(facts::IS_GUEST.into(), "true".into());
    let guest = consumers
        .create(CreateConsumer {
            owner_id: owner.id,
            name: "vm-g2".into(),
            ctype: ConsumerType::System,
            facts: guest_facts,
            capabilities: Default::default(),
            hypervisor: None,
            last_checkin: None,
        })
        .await
        .unwrap();

    let pools = SurrealPoolRepository::new(db.clone());
    let mut pool_attrs = BTreeMap::new();
    pool_attrs.insert(attrs::REQUIRES_HOST.into(), host.to_string());
    pool_attrs.insert(attrs::DERIVED_POOL.into(), "true".into());
    let pool = pools
        .create(NewPool {
            owner_id: owner.id,
            product: ProductRef {
                id: "PROD-1".into(),
                name: "Guest Suite".into(),
                attributes: BTreeMap::new(),
            },
            quantity: 4,
            attributes: pool_attrs,
            subscription_id: "sub-1".into(),
            sub_key: SubKey::Derived,
            source_entitlement: None,
        })
        .await
        .unwrap();

    let entitlements = SurrealEntitlementRepository::new(db);
    let now = Utc::now();
    let ent = entitlements
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

    // Host drops g2.
    let result = reconciler
        .check_in(&owner, None, true, report(vec![entry(None, "hyp-1", &["g1"])]))
        .await
        .unwrap();
    assert_eq!(result.updated.len(), 1);

    entitlements.get(owner.id, ent.id).await.is_ok()
}

#[tokio::test]
async fn removed_guest_revokes_host_scoped_entitlement_in_standalone() {
    assert!(!removed_guest_entitlement(OperatingMode::Standalone).await);
}

#[tokio::test]
async fn removed_guest_retains_entitlement_in_hosted_mode() {
    assert!(removed_guest_entitlement(OperatingMode::Hosted).await);
}

#[tokio::test]
async fn unknown_hypervisor_with_create_disallowed_fails() {
    let (_db, owner, reconciler) = setup(OperatingMode::Standalone).await;

    let result = reconciler
        .check_in(&owner, None, false, report(vec![entry(None, "hyp-x", &[])]))
        .await
        .unwrap();

    assert_eq!(result.failed.len(), 1);
    assert_eq!(result.failed[0].hypervisor_id, "hyp-x");
    assert_eq!(result.failed[0].reason, FailReason::NotFoundCreateDisallowed);
}

#[tokio::test]
async fn hardware_identity_merge_upgrades_existing_consumer() {
    let (db, owner, reconciler) = setup(OperatingMode::Standalone).await;

    let consumers = SurrealConsumerRepository::new(db);
    let mut system_facts = BTreeMap::new();
    system_facts.insert(facts::SYSTEM_UUID.into(), "hw-42".into());
    let existing = consumers
        .create(CreateConsumer {
            owner_id: owner.id,
            name: "plain-system".into(),
            ctype: ConsumerType::System,
            facts: system_facts.clone(),
            capabilities: Default::default(),
            hypervisor: None,
            last_checkin: None,
        })
        .await
        .unwrap();

    let mut reported = entry(None, "hyp-new", &[]);
    reported.facts = system_facts;
    let result = reconciler
        .check_in(&owner, Some("agent-1"), false, report(vec![reported]))
        .await
        .unwrap();

    // Merge, not create; the consumer keeps its UUID.
    assert_eq!(result.updated.len(), 1);
    assert_eq!(result.updated[0].uuid, existing.uuid);

    let merged = consumers.get_by_uuid(owner.id, existing.uuid).await.unwrap();
    assert_eq!(merged.ctype, ConsumerType::Hypervisor);
    assert_eq!(
        merged.hypervisor.as_ref().map(|h| h.hypervisor_id.as_str()),
        Some("hyp-new")
    );
    assert_eq!(
        merged.hypervisor.as_ref().and_then(|h| h.reporter_id.as_deref()),
        Some("agent-1")
    );
}

#[tokio::test]
async fn conflicting_hardware_identity_fails_the_entry() {
    let (db, owner, reconciler) = setup(OperatingMode::Standalone).await;

    let mut system_facts = BTreeMap::new();
    system_facts.insert(facts::SYSTEM_UUID.into(), "hw-9".into());

    // Existing hypervisor already bound to this hardware identity.
    let mut claimed = entry(None, "hyp-a", &[]);
    claimed.facts = system_facts.clone();
    reconciler
        .check_in(&owner, None, true, report(vec![claimed]))
        .await
        .unwrap();

    // A different hypervisor id reporting the same hardware identity.
    let mut conflicting = entry(None, "hyp-b", &[]);
    conflicting.facts = system_facts;
    let result = reconciler
        .check_in(&owner, None, false, report(vec![conflicting]))
        .await
        .unwrap();

    assert_eq!(result.failed.len(), 1);
    assert!(matches!(
        result.failed[0].reason,
        FailReason::IdentityConflict { ref existing_hypervisor_id }
            if existing_hypervisor_id == "hyp-a"
    ));

    // The original consumer is untouched.
    let consumers = SurrealConsumerRepository::new(db);
    let original = consumers
        .find_by_hypervisor_id(owner.id, "hyp-a")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        original.hypervisor.map(|h| h.hypervisor_id),
        Some("hyp-a".to_string())
    );
}

#[tokio::test]
async fn every_well_formed_entry_lands_in_exactly_one_bucket() {
    let (_db, owner, reconciler) = setup(OperatingMode::Standalone).await;

    reconciler
        .check_in(
            &owner,
            None,
            true,
            report(vec![entry(None, "known-1", &["g1"]), entry(None, "known-2", &[])]),
        )
        .await
        .unwrap();

    let mixed = report(vec![
        entry(None, "known-1", &["g1", "g2"]), // updated
        entry(None, "known-2", &[]),           // unchanged
        entry(None, "brand-new", &[]),         // failed (create disallowed)
        entry(None, "", &["ignored"]),         // dropped during parse
    ]);
    let result = reconciler.check_in(&owner, None, false, mixed).await.unwrap();

    assert_eq!(result.updated.len(), 1);
    assert_eq!(result.unchanged.len(), 1);
    assert_eq!(result.failed.len(), 1);
    assert!(result.created.is_empty());
    assert_eq!(result.total(), 3);

    let mut uuids: Vec<_> = result
        .updated
        .iter()
        .chain(result.unchanged.iter())
        .map(|s| s.uuid)
        .collect();
    uuids.sort();
    uuids.dedup();
    assert_eq!(uuids.len(), 2);
}

#[tokio::test]
async fn duplicate_hypervisor_ids_collapse_to_last_occurrence() {
    let (db, owner, reconciler) = setup(OperatingMode::Standalone).await;

    let result = reconciler
        .check_in(
            &owner,
            None,
            true,
            report(vec![entry(None, "hyp-1", &["g1"]), entry(None, "HYP-1", &["g2"])]),
        )
        .await
        .unwrap();
    assert_eq!(result.total(), 1);

    let host = result.created[0].uuid;
    let memberships = SurrealGuestMembershipRepository::new(db)
        .list_for_host(owner.id, host)
        .await
        .unwrap();
    assert_eq!(memberships.len(), 1);
    assert_eq!(memberships[0].guest_id, "g2");
}

#[tokio::test]
async fn reported_name_is_sanitized_on_create() {
    let (db, owner, reconciler) = setup(OperatingMode::Standalone).await;

    let result = reconciler
        .check_in(
            &owner,
            None,
            true,
            report(vec![entry(Some("## bad name"), "hyp-n", &[])]),
        )
        .await
        .unwrap();

    let consumer = SurrealConsumerRepository::new(db)
        .get_by_uuid(owner.id, result.created[0].uuid)
        .await
        .unwrap();
    assert_eq!(consumer.name, "bad name");
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_batches_for_one_owner_serialize() {
    let (db, owner, reconciler) = setup(OperatingMode::Standalone).await;
    let reconciler = std::sync::Arc::new(reconciler);

    let first = {
        let reconciler = reconciler.clone();
        let owner = owner.clone();
        tokio::spawn(async move {
            reconciler
                .check_in(&owner, None, true, report(vec![entry(None, "hyp-1", &["a1", "a2"])]))
                .await
                .unwrap()
        })
    };
    let second = {
        let reconciler = reconciler.clone();
        let owner = owner.clone();
        tokio::spawn(async move {
            reconciler
                .check_in(&owner, None, true, report(vec![entry(None, "hyp-1", &["b1", "b2"])]))
                .await
                .unwrap()
        })
    };
    let (first, second) = (first.await.unwrap(), second.await.unwrap());

    // Exactly one batch created the host; the other saw it existing.
    assert_eq!(first.created.len() + second.created.len(), 1);
    assert_eq!(first.total() + second.total(), 2);

    // Whole-batch wins: the stored membership is one report's complete
    // guest list, never an interleaving of the two.
    let host = SurrealConsumerRepository::new(db.clone())
        .find_by_hypervisor_id(owner.id, "hyp-1")
        .await
        .unwrap()
        .unwrap();
    let mut stored: Vec<String> = SurrealGuestMembershipRepository::new(db)
        .list_for_host(owner.id, host.uuid)
        .await
        .unwrap()
        .into_iter()
        .map(|m| m.guest_id)
        .collect();
    stored.sort();
    assert!(stored == ["a1", "a2"] || stored == ["b1", "b2"], "stored: {stored:?}");

    // The serialization slot is released once both batches finish.
    assert_eq!(reconciler.owner_locks().active(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn different_owners_check_in_independently() {
    let (db, owner_a, reconciler) = setup(OperatingMode::Standalone).await;
    let owner_b = SurrealOwnerRepository::new(db.clone())
        .create(CreateOwner {
            key: "globex".into(),
            mode: OperatingMode::Standalone,
            autobind_disabled: false,
        })
        .await
        .unwrap();
    let reconciler = std::sync::Arc::new(reconciler);

    let a = {
        let reconciler = reconciler.clone();
        let owner = owner_a.clone();
        tokio::spawn(async move {
            reconciler
                .check_in(&owner, None, true, report(vec![entry(None, "hyp-a", &["ga"])]))
                .await
                .unwrap()
        })
    };
    let b = {
        let reconciler = reconciler.clone();
        let owner = owner_b.clone();
        tokio::spawn(async move {
            reconciler
                .check_in(&owner, None, true, report(vec![entry(None, "hyp-b", &["gb"])]))
                .await
                .unwrap()
        })
    };
    let (a, b) = (a.await.unwrap(), b.await.unwrap());

    assert_eq!(a.created.len(), 1);
    assert_eq!(b.created.len(), 1);
    assert_eq!(a.created[0].owner, "acme");
    assert_eq!(b.created[0].owner, "globex");

    let guests = SurrealGuestMembershipRepository::new(db);
    let on_a = guests.list_for_host(owner_a.id, a.created[0].uuid).await.unwrap();
    let on_b = guests.list_for_host(owner_b.id, b.created[0].uuid).await.unwrap();
    assert_eq!(on_a[0].guest_id, "ga");
    assert_eq!(on_b[0].guest_id, "gb");

    assert_eq!(reconciler.owner_locks().active(), 0);
}
