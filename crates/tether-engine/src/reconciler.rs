//! Topology reconciliation orchestrator and identity resolver.
//!
//! Drives one check-in batch: canonicalizes reported ids, resolves
//! each host entry to a consumer (exact hypervisor-id match, hardware
//! identity merge, or creation), diffs and replaces guest membership,
//! and classifies every entry into exactly one of created / updated /
//! unchanged / failed. Per-host failures never abort the batch; only
//! storage failures do.

use std::collections::{BTreeMap, BTreeSet};

use chrono::Utc;
use tether_core::TetherResult;
use tether_core::models::consumer::{
    Consumer, ConsumerType, CreateConsumer, HypervisorIdentity, UpdateConsumer, facts,
};
use tether_core::models::guest::NewGuestMembership;
use tether_core::models::owner::Owner;
use tether_core::repository::{
    ConsumerRepository, EntitlementRepository, GuestMembershipRepository, PoolRepository,
};
use tether_core::virt::{canonical_guest_id, canonical_hypervisor_id};
use tracing::{debug, info, warn};

use crate::auditor::HostEntitlementAuditor;
use crate::batch::{OperationBatch, apply_batch};
use crate::checkin::{CheckInReport, CheckInResult, ConsumerSummary, FailReason, FailedEntry};
use crate::config::EngineConfig;
use crate::differ::diff_guest_sets;
use crate::locks::OwnerLocks;

/// One host entry after canonicalization.
struct ParsedEntry {
    hypervisor_id: String,
    name: Option<String>,
    reported_facts: BTreeMap<String, String>,
    /// Canonical guest id → membership input, duplicates collapsed.
    guests: BTreeMap<String, NewGuestMembership>,
}

/// How a host entry resolved to a consumer.
enum Resolution {
    Existing(Consumer),
    Merged(Consumer),
    Created(Consumer),
    Failed(FailReason),
}

pub struct TopologyReconciler<C, G, E, P> {
    consumers: C,
    guests: G,
    entitlements: E,
    pools: P,
    config: EngineConfig,
    /// Two batches for one owner never interleave; different owners
    /// proceed independently.
    owner_locks: OwnerLocks,
}

impl<C, G, E, P> TopologyReconciler<C, G, E, P>
where
    C: ConsumerRepository,
    G: GuestMembershipRepository,
    E: EntitlementRepository,
    P: PoolRepository,
{
    pub fn new(consumers: C, guests: G, entitlements: E, pools: P, config: EngineConfig) -> Self {
        Self {
            consumers,
            guests,
            entitlements,
            pools,
            config,
            owner_locks: OwnerLocks::default(),
        }
    }

    /// The serialization points used by this reconciler. Hand a clone
    /// to a [`GuestMappingService`](crate::guests::GuestMappingService)
    /// so direct membership edits serialize with check-in batches.
    pub fn owner_locks(&self) -> OwnerLocks {
        self.owner_locks.clone()
    }

    /// Process one check-in batch for an owner.
    ///
    /// Returns the aggregate four-bucket classification; every
    /// well-formed entry lands in exactly one bucket. Reconciliation
    /// is idempotent: resubmitting an identical batch yields all
    /// entries unchanged (with a fresh check-in timestamp).
    pub async fn check_in(
        &self,
        owner: &Owner,
        reporter_id: Option<&str>,
        create_missing: bool,
        report: CheckInReport,
    ) -> TetherResult<CheckInResult> {
        let _guard = self.owner_locks.acquire(owner.id).await;

        let entries = self.parse_entries(report);
        info!(
            owner = %owner.key,
            hosts = entries.len(),
            create_missing,
            "processing check-in batch"
        );

        let mut result = CheckInResult::default();
        let mut batch = OperationBatch::new();
        let auditor =
            HostEntitlementAuditor::new(&self.consumers, &self.guests, &self.entitlements);

        for entry in entries {
            match self
                .resolve(owner, &entry, reporter_id, create_missing)
                .await?
            {
                Resolution::Failed(reason) => {
                    debug!(hypervisor_id = %entry.hypervisor_id, %reason, "host entry failed");
                    result.failed.push(FailedEntry {
                        hypervisor_id: entry.hypervisor_id,
                        reason,
                    });
                }
                Resolution::Created(consumer) => {
                    self.install_membership(owner, &consumer, &entry, &auditor, &mut batch)
                        .await?;
                    result.created.push(self.summary(owner, &consumer));
                }
                Resolution::Merged(consumer) => {
                    let (consumer, _) = self
                        .reconcile_existing(owner, consumer, &entry, reporter_id, &auditor, &mut batch)
                        .await?;
                    // The identity merge itself mutated the consumer.
                    result.updated.push(self.summary(owner, &consumer));
                }
                Resolution::Existing(consumer) => {
                    let (consumer, changed) = self
                        .reconcile_existing(owner, consumer, &entry, reporter_id, &auditor, &mut batch)
                        .await?;
                    if changed {
                        result.updated.push(self.summary(owner, &consumer));
                    } else {
                        result.unchanged.push(self.summary(owner, &consumer));
                    }
                }
            }
        }

        apply_batch(owner.id, &batch, &self.pools, &self.entitlements).await?;

        info!(
            owner = %owner.key,
            created = result.created.len(),
            updated = result.updated.len(),
            unchanged = result.unchanged.len(),
            failed = result.failed.len(),
            "check-in batch complete"
        );
        Ok(result)
    }

    /// Canonicalize and dedupe the raw report. Entries with an empty
    /// hypervisor id and guests with empty ids are dropped; a
    /// duplicated hypervisor id collapses to its last occurrence.
    fn parse_entries(&self, report: CheckInReport) -> Vec<ParsedEntry> {
        let mut order: Vec<String> = Vec::new();
        let mut by_id: BTreeMap<String, ParsedEntry> = BTreeMap::new();

        for reported in report.hypervisors {
            let Some(hypervisor_id) =
                canonical_hypervisor_id(&reported.hypervisor_id.hypervisor_id)
            else {
                warn!("dropping report entry with empty hypervisor id");
                continue;
            };

            let mut guests = BTreeMap::new();
            for guest in reported.guest_ids {
                let Some(canonical) = canonical_guest_id(&guest.guest_id) else {
                    continue;
                };
                guests.insert(
                    canonical.clone(),
                    NewGuestMembership {
                        guest_id: canonical,
                        reported_id: guest.guest_id,
                        attributes: guest.attributes,
                    },
                );
            }

            let entry = ParsedEntry {
                hypervisor_id: hypervisor_id.clone(),
                name: reported.name.filter(|n| !n.trim().is_empty()),
                reported_facts: reported.facts,
                guests,
            };
            if by_id.insert(hypervisor_id.clone(), entry).is_none() {
                order.push(hypervisor_id);
            }
        }

        order
            .into_iter()
            .filter_map(|id| by_id.remove(&id))
            .collect()
    }

    /// Resolve a host entry to its consumer: exact hypervisor-id
    /// match, hardware-identity merge, creation, or a failed outcome.
    async fn resolve(
        &self,
        owner: &Owner,
        entry: &ParsedEntry,
        reporter_id: Option<&str>,
        create_missing: bool,
    ) -> TetherResult<Resolution> {
        if let Some(existing) = self
            .consumers
            .find_by_hypervisor_id(owner.id, &entry.hypervisor_id)
            .await?
        {
            return Ok(Resolution::Existing(existing));
        }

        let hardware_id = entry
            .reported_facts
            .get(facts::SYSTEM_UUID)
            .filter(|_| self.config.match_hardware_identity);
        if let Some(hardware_id) = hardware_id {
            let candidates = self
                .consumers
                .find_by_fact(owner.id, facts::SYSTEM_UUID, hardware_id)
                .await?;

            for candidate in &candidates {
                if let Some(identity) = &candidate.hypervisor {
                    if identity.hypervisor_id != entry.hypervisor_id {
                        return Ok(Resolution::Failed(FailReason::IdentityConflict {
                            existing_hypervisor_id: identity.hypervisor_id.clone(),
                        }));
                    }
                }
            }

            if let Some(candidate) = candidates.into_iter().find(|c| c.hypervisor.is_none()) {
                info!(
                    consumer = %candidate.uuid,
                    hypervisor_id = %entry.hypervisor_id,
                    "merging consumer into reported hypervisor by hardware identity"
                );
                let merged = self
                    .consumers
                    .update(
                        owner.id,
                        candidate.uuid,
                        UpdateConsumer {
                            ctype: Some(ConsumerType::Hypervisor),
                            hypervisor: Some(HypervisorIdentity {
                                hypervisor_id: entry.hypervisor_id.clone(),
                                reporter_id: reporter_id.map(str::to_string),
                            }),
                            ..Default::default()
                        },
                    )
                    .await?;
                return Ok(Resolution::Merged(merged));
            }
        }

        if !create_missing {
            return Ok(Resolution::Failed(FailReason::NotFoundCreateDisallowed));
        }

        let name = self.sanitize_name(entry.name.as_deref().unwrap_or(&entry.hypervisor_id));
        let created = self
            .consumers
            .create(CreateConsumer {
                owner_id: owner.id,
                name,
                ctype: ConsumerType::Hypervisor,
                facts: entry.reported_facts.clone(),
                capabilities: BTreeSet::new(),
                hypervisor: Some(HypervisorIdentity {
                    hypervisor_id: entry.hypervisor_id.clone(),
                    reporter_id: reporter_id.map(str::to_string),
                }),
                last_checkin: Some(Utc::now()),
            })
            .await?;
        info!(
            consumer = %created.uuid,
            hypervisor_id = %entry.hypervisor_id,
            "created hypervisor consumer"
        );
        Ok(Resolution::Created(created))
    }

    /// Install the reported membership on a freshly created consumer.
    /// Guests stolen from other hosts still need an audit pass.
    async fn install_membership(
        &self,
        owner: &Owner,
        consumer: &Consumer,
        entry: &ParsedEntry,
        auditor: &HostEntitlementAuditor<'_, C, G, E>,
        batch: &mut OperationBatch,
    ) -> TetherResult<()> {
        if entry.guests.is_empty() {
            return Ok(());
        }
        let entries: Vec<NewGuestMembership> = entry.guests.values().cloned().collect();
        self.guests
            .replace_for_host(owner.id, consumer.uuid, entries)
            .await?;
        for guest_id in entry.guests.keys() {
            auditor.on_guest_removed(owner, guest_id, batch).await?;
        }
        Ok(())
    }

    /// Reconcile an already-resolved consumer with one report entry:
    /// diff and replace membership, refresh name/facts when the guest
    /// list changed, always refresh the check-in timestamp. Returns
    /// the updated consumer and whether the guest list changed.
    async fn reconcile_existing(
        &self,
        owner: &Owner,
        consumer: Consumer,
        entry: &ParsedEntry,
        reporter_id: Option<&str>,
        auditor: &HostEntitlementAuditor<'_, C, G, E>,
        batch: &mut OperationBatch,
    ) -> TetherResult<(Consumer, bool)> {
        let stored = self.guests.list_for_host(owner.id, consumer.uuid).await?;
        let stored_set: BTreeSet<String> = stored.into_iter().map(|m| m.guest_id).collect();
        let reported_set: BTreeSet<String> = entry.guests.keys().cloned().collect();
        let diff = diff_guest_sets(&stored_set, &reported_set);

        let mut update = UpdateConsumer {
            last_checkin: Some(Utc::now()),
            ..Default::default()
        };

        if diff.is_changed() {
            let entries: Vec<NewGuestMembership> = entry.guests.values().cloned().collect();
            self.guests
                .replace_for_host(owner.id, consumer.uuid, entries)
                .await?;

            for guest_id in diff.removed.iter().chain(diff.added.iter()) {
                auditor.on_guest_removed(owner, guest_id, batch).await?;
            }

            if let Some(name) = &entry.name {
                let name = self.sanitize_name(name);
                if name != consumer.name {
                    update.name = Some(name);
                }
            }
            if !entry.reported_facts.is_empty() && entry.reported_facts != consumer.facts {
                update.facts = Some(entry.reported_facts.clone());
            }
        }

        // Refresh the reporting agent on the identity when it changed.
        if let Some(identity) = &consumer.hypervisor {
            if identity.reporter_id.as_deref() != reporter_id {
                update.hypervisor = Some(HypervisorIdentity {
                    hypervisor_id: identity.hypervisor_id.clone(),
                    reporter_id: reporter_id.map(str::to_string),
                });
            }
        }

        let updated = self.consumers.update(owner.id, consumer.uuid, update).await?;
        Ok((updated, diff.is_changed()))
    }

    fn summary(&self, owner: &Owner, consumer: &Consumer) -> ConsumerSummary {
        ConsumerSummary {
            uuid: consumer.uuid,
            name: consumer.name.clone(),
            owner: owner.key.clone(),
        }
    }

    /// Display names never start with '#' and are capped in length.
    fn sanitize_name(&self, raw: &str) -> String {
        let trimmed = raw.trim().trim_start_matches('#').trim_start();
        let mut name = trimmed.to_string();
        if name.len() > self.config.max_consumer_name_len {
            let mut end = self.config.max_consumer_name_len;
            while !name.is_char_boundary(end) {
                end -= 1;
            }
            name.truncate(end);
        }
        name
    }
}
