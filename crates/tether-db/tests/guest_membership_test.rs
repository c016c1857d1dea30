//! Integration tests for the guest membership repository using
//! in-memory SurrealDB.

use std::collections::BTreeMap;

use surrealdb::Surreal;
use surrealdb::engine::local::Mem;
use tether_core::models::guest::NewGuestMembership;
use tether_core::models::owner::{CreateOwner, OperatingMode};
use tether_core::repository::{GuestMembershipRepository, OwnerRepository};
use tether_db::repository::{SurrealGuestMembershipRepository, SurrealOwnerRepository};
use uuid::Uuid;

async fn setup() -> (Surreal<surrealdb::engine::local::Db>, Uuid) {
    let db = Surreal::new::<Mem>(()).await.unwrap();
    db.use_ns("test").use_db("test").await.unwrap();
    tether_db::run_migrations(&db).await.unwrap();

    let owner_repo = SurrealOwnerRepository::new(db.clone());
    let owner = owner_repo
        .create(CreateOwner {
            key: "acme".into(),
            mode: OperatingMode::Standalone,
            autobind_disabled: false,
        })
        .await
        .unwrap();

    (db, owner.id)
}

fn entry(guest_id: &str) -> NewGuestMembership {
    NewGuestMembership {
        guest_id: guest_id.into(),
        reported_id: guest_id.to_uppercase(),
        attributes: BTreeMap::new(),
    }
}

#[tokio::test]
async fn replace_for_host_applies_full_list() {
    let (db, owner_id) = setup().await;
    let repo = SurrealGuestMembershipRepository::new(db);
    let host = Uuid::new_v4();

    let members = repo
        .replace_for_host(owner_id, host, vec![entry("g1"), entry("g2")])
        .await
        .unwrap();
    assert_eq!(members.len(), 2);

    let members = repo
        .replace_for_host(owner_id, host, vec![entry("g2"), entry("g3")])
        .await
        .unwrap();
    let ids: Vec<&str> = members.iter().map(|m| m.guest_id.as_str()).collect();
    assert_eq!(ids, vec!["g2", "g3"]);
}

#[tokio::test]
async fn replace_preserves_created_at_for_kept_members() {
    let (db, owner_id) = setup().await;
    let repo = SurrealGuestMembershipRepository::new(db);
    let host = Uuid::new_v4();

    let first = repo
        .replace_for_host(owner_id, host, vec![entry("g1")])
        .await
        .unwrap();
    let original_created = first[0].created_at;

    let mut updated_entry = entry("g1");
    updated_entry
        .attributes
        .insert("active".into(), "1".into());
    let second = repo
        .replace_for_host(owner_id, host, vec![updated_entry])
        .await
        .unwrap();

    assert_eq!(second[0].created_at, original_created);
    assert_eq!(second[0].attributes.get("active").map(String::as_str), Some("1"));
}

#[tokio::test]
async fn replace_steals_guest_from_other_host() {
    let (db, owner_id) = setup().await;
    let repo = SurrealGuestMembershipRepository::new(db);
    let host_a = Uuid::new_v4();
    let host_b = Uuid::new_v4();

    repo.replace_for_host(owner_id, host_a, vec![entry("g1")])
        .await
        .unwrap();
    repo.replace_for_host(owner_id, host_b, vec![entry("g1")])
        .await
        .unwrap();

    assert!(repo.list_for_host(owner_id, host_a).await.unwrap().is_empty());
    let on_b = repo.list_for_host(owner_id, host_b).await.unwrap();
    assert_eq!(on_b.len(), 1);
    assert_eq!(on_b[0].guest_id, "g1");
}

#[tokio::test]
async fn same_guest_id_under_different_owners_does_not_conflict() {
    let (db, owner_id) = setup().await;

    let owner_repo = SurrealOwnerRepository::new(db.clone());
    let other = owner_repo
        .create(CreateOwner {
            key: "globex".into(),
            mode: OperatingMode::Standalone,
            autobind_disabled: false,
        })
        .await
        .unwrap();

    let repo = SurrealGuestMembershipRepository::new(db);
    let host_a = Uuid::new_v4();
    let host_b = Uuid::new_v4();

    repo.replace_for_host(owner_id, host_a, vec![entry("g1")])
        .await
        .unwrap();
    repo.replace_for_host(other.id, host_b, vec![entry("g1")])
        .await
        .unwrap();

    assert_eq!(repo.list_for_host(owner_id, host_a).await.unwrap().len(), 1);
    assert_eq!(repo.list_for_host(other.id, host_b).await.unwrap().len(), 1);
}

#[tokio::test]
async fn upsert_single_creates_then_updates() {
    let (db, owner_id) = setup().await;
    let repo = SurrealGuestMembershipRepository::new(db);
    let host = Uuid::new_v4();

    let created = repo
        .upsert_single(owner_id, host, entry("g1"))
        .await
        .unwrap();
    assert_eq!(created.guest_id, "g1");

    let mut changed = entry("g1");
    changed.attributes.insert("active".into(), "0".into());
    let updated = repo.upsert_single(owner_id, host, changed).await.unwrap();
    assert_eq!(updated.created_at, created.created_at);
    assert_eq!(updated.attributes.get("active").map(String::as_str), Some("0"));

    assert_eq!(repo.list_for_host(owner_id, host).await.unwrap().len(), 1);
}

#[tokio::test]
async fn delete_single_is_idempotent() {
    let (db, owner_id) = setup().await;
    let repo = SurrealGuestMembershipRepository::new(db);
    let host = Uuid::new_v4();

    repo.upsert_single(owner_id, host, entry("g1"))
        .await
        .unwrap();

    repo.delete_single(owner_id, host, "g1").await.unwrap();
    repo.delete_single(owner_id, host, "g1").await.unwrap();

    assert!(repo.list_for_host(owner_id, host).await.unwrap().is_empty());
}

#[tokio::test]
async fn hosts_claiming_matches_any_spelling() {
    let (db, owner_id) = setup().await;
    let repo = SurrealGuestMembershipRepository::new(db);
    let host = Uuid::new_v4();

    repo.upsert_single(
        owner_id,
        host,
        entry("12345678-90ab-efcd-0123-456789abcdef"),
    )
    .await
    .unwrap();

    let spellings = tether_core::virt::possible_guest_ids("12345678-90ab-efcd-0123-456789abcdef");
    let hosts = repo.hosts_claiming(owner_id, &spellings).await.unwrap();
    assert_eq!(hosts, vec![host]);
}
