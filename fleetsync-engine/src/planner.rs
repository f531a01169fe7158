//! Reconciliation planner.
//!
//! Planning is a pure function of the snapshot set. The union population is
//! built once, keyed by identity (never by local id), and every device is
//! diffed against it. Because the union spans all devices, data flows from
//! the primary to the others and back in the same pass.
//!
//! Plans are additive. A slot a device already fills is never overwritten,
//! even when its artifact loses the conflict; the conflict is only logged.

use fleetsync_types::{
    Artifact, DeviceAddr, EnrollmentKey, IdentityKey, LocalId, Modality, Profile,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::ConflictPolicy;
use crate::register::{Origin, Register};
use crate::snapshot::DeviceSnapshot;

/// Snapshots of every reachable device in a round.
pub type SnapshotSet = BTreeMap<DeviceAddr, DeviceSnapshot>;

/// One identity in the union population.
#[derive(Debug, Clone)]
pub struct UnionIdentity {
    pub identity: IdentityKey,
    pub profile: Register<Profile>,
    pub enrollments: BTreeMap<EnrollmentKey, Register<Artifact>>,
    /// Devices that hold this identity.
    pub holders: BTreeSet<DeviceAddr>,
}

/// Merged superset of identities and enrollments across a round.
///
/// Built once per round and shared read-only afterwards.
#[derive(Debug, Clone)]
pub struct UnionPopulation {
    identities: BTreeMap<IdentityKey, UnionIdentity>,
    primary: Option<DeviceAddr>,
    policy: ConflictPolicy,
}

impl UnionPopulation {
    /// Merges every snapshot.
    pub fn build(snapshots: &SnapshotSet, primary: Option<DeviceAddr>, policy: ConflictPolicy) -> Self {
        let mut identities: BTreeMap<IdentityKey, UnionIdentity> = BTreeMap::new();
        for snapshot in snapshots.values() {
            let origin = Origin {
                device: snapshot.device,
                observed_at: snapshot.observed_at,
                primary: primary == Some(snapshot.device),
            };
            for record in snapshot.records.values() {
                let entry = identities
                    .entry(record.identity.clone())
                    .or_insert_with(|| UnionIdentity {
                        identity: record.identity.clone(),
                        profile: Register::new(policy),
                        enrollments: BTreeMap::new(),
                        holders: BTreeSet::new(),
                    });
                entry.holders.insert(snapshot.device);
                entry.profile.offer(record.profile.clone(), origin);
                for (key, artifact) in record.enrollments.iter() {
                    entry
                        .enrollments
                        .entry(*key)
                        .or_insert_with(|| Register::new(policy))
                        .offer(artifact.clone(), origin);
                }
            }
        }

        for identity in identities.values() {
            for (key, register) in &identity.enrollments {
                if register.is_contested() {
                    let digests: Vec<String> = register
                        .candidates()
                        .map(|c| format!("{}@{}", c.value.digest(), c.origin.device))
                        .collect();
                    debug!(
                        "Conflicting {} for {}: {}",
                        key,
                        identity.identity,
                        digests.join(", ")
                    );
                }
            }
        }

        Self {
            identities,
            primary,
            policy,
        }
    }

    /// Merged view of one identity, if any device holds it.
    pub fn get(&self, identity: &IdentityKey) -> Option<&UnionIdentity> {
        self.identities.get(identity)
    }

    /// Identities in key order.
    pub fn iter(&self) -> impl Iterator<Item = &UnionIdentity> {
        self.identities.values()
    }

    /// Number of distinct identities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.identities.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    /// Distinct (identity, modality, slot) triples in the union.
    #[must_use]
    pub fn enrollment_count(&self) -> usize {
        self.identities.values().map(|i| i.enrollments.len()).sum()
    }

    /// Primary device the union was built against.
    #[must_use]
    pub fn primary(&self) -> Option<DeviceAddr> {
        self.primary
    }

    /// Policy the union was built with.
    #[must_use]
    pub fn policy(&self) -> ConflictPolicy {
        self.policy
    }
}

/// The user an enrollment is written to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordRef {
    /// Already on the device under this local id.
    Existing(LocalId),
    /// Created earlier in the same plan; the device assigns the id.
    Created,
}

/// One additive change to a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    CreateIdentity {
        identity: IdentityKey,
        profile: Profile,
    },
    UpdateProfile {
        identity: IdentityKey,
        local_id: LocalId,
        profile: Profile,
    },
    AddEnrollment {
        identity: IdentityKey,
        target: RecordRef,
        key: EnrollmentKey,
        artifact: Artifact,
        source: DeviceAddr,
    },
}

/// Identifies an operation within a round, independent of its payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OperationKey {
    Create(IdentityKey),
    Update(IdentityKey),
    Enroll(IdentityKey, EnrollmentKey),
}

/// Kind of operation, for reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    CreateIdentity,
    UpdateProfile,
    AddEnrollment,
}

impl Operation {
    pub fn identity(&self) -> &IdentityKey {
        match self {
            Operation::CreateIdentity { identity, .. }
            | Operation::UpdateProfile { identity, .. }
            | Operation::AddEnrollment { identity, .. } => identity,
        }
    }

    #[must_use]
    pub fn kind(&self) -> OperationKind {
        match self {
            Operation::CreateIdentity { .. } => OperationKind::CreateIdentity,
            Operation::UpdateProfile { .. } => OperationKind::UpdateProfile,
            Operation::AddEnrollment { .. } => OperationKind::AddEnrollment,
        }
    }

    #[must_use]
    pub fn key(&self) -> OperationKey {
        match self {
            Operation::CreateIdentity { identity, .. } => OperationKey::Create(identity.clone()),
            Operation::UpdateProfile { identity, .. } => OperationKey::Update(identity.clone()),
            Operation::AddEnrollment { identity, key, .. } => {
                OperationKey::Enroll(identity.clone(), *key)
            }
        }
    }

    /// Modality written, for enrollment operations.
    #[must_use]
    pub fn modality(&self) -> Option<Modality> {
        match self {
            Operation::AddEnrollment { key, .. } => Some(key.modality()),
            _ => None,
        }
    }
}

/// Why an enrollment in the union was not planned for a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    /// The device does not support the modality.
    Unsupported,
    /// No candidate matches the device's face algorithm version.
    IncompatibleVersion { device_version: u32 },
}

/// An enrollment deliberately left out of a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Skipped {
    pub identity: IdentityKey,
    pub key: EnrollmentKey,
    #[serde(flatten)]
    pub reason: SkipReason,
}

/// Operations for one target device, in execution order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationPlan {
    pub device: DeviceAddr,
    pub operations: Vec<Operation>,
    #[serde(default)]
    pub skipped: Vec<Skipped>,
}

impl ReconciliationPlan {
    pub fn new(device: DeviceAddr) -> Self {
        Self {
            device,
            operations: Vec::new(),
            skipped: Vec::new(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    /// Number of operations of one kind.
    #[must_use]
    pub fn count(&self, kind: OperationKind) -> usize {
        self.operations.iter().filter(|op| op.kind() == kind).count()
    }

    /// Number of enrollment operations for one modality.
    #[must_use]
    pub fn enrollments(&self, modality: Modality) -> usize {
        self.operations
            .iter()
            .filter(|op| op.modality() == Some(modality))
            .count()
    }
}

/// Output of planning one round.
#[derive(Debug, Clone)]
pub struct PlanSet {
    pub union: Arc<UnionPopulation>,
    pub plans: BTreeMap<DeviceAddr, ReconciliationPlan>,
}

impl PlanSet {
    /// Total operations across every device.
    #[must_use]
    pub fn operation_count(&self) -> usize {
        self.plans.values().map(ReconciliationPlan::len).sum()
    }
}

/// Diffs every device against the union population.
#[derive(Debug, Clone, Copy, Default)]
pub struct Planner {
    policy: ConflictPolicy,
}

impl Planner {
    pub fn new(policy: ConflictPolicy) -> Self {
        Self { policy }
    }

    /// Plans a round. Every snapshot gets a plan, possibly empty.
    pub fn plan(&self, snapshots: &SnapshotSet, primary: Option<DeviceAddr>) -> PlanSet {
        let union = Arc::new(UnionPopulation::build(snapshots, primary, self.policy));
        let plans = snapshots
            .values()
            .map(|snapshot| (snapshot.device, self.plan_device(&union, snapshot)))
            .collect();
        PlanSet { union, plans }
    }

    /// Diffs one device against a union population.
    pub fn plan_device(&self, union: &UnionPopulation, target: &DeviceSnapshot) -> ReconciliationPlan {
        let mut plan = ReconciliationPlan::new(target.device);
        let local = target.by_identity();
        let caps = target.capabilities;
        let mut unsupported: BTreeMap<Modality, usize> = BTreeMap::new();

        for entry in union.iter() {
            let Some(profile) = entry.profile.winner() else {
                continue;
            };
            // Unknown contents; writing could overwrite what could not be read.
            if target.omitted.contains(&entry.identity) {
                debug!("{}: {} unreadable this round; not planned", target.device, entry.identity);
                continue;
            }
            let record = local.get(&entry.identity);
            let target_ref = match record {
                None => {
                    plan.operations.push(Operation::CreateIdentity {
                        identity: entry.identity.clone(),
                        profile: profile.value.clone(),
                    });
                    RecordRef::Created
                }
                Some(record) => {
                    if record.profile != profile.value {
                        plan.operations.push(Operation::UpdateProfile {
                            identity: entry.identity.clone(),
                            local_id: record.local_id,
                            profile: profile.value.clone(),
                        });
                    }
                    RecordRef::Existing(record.local_id)
                }
            };

            for (key, register) in &entry.enrollments {
                if let Some(existing) = record.and_then(|r| r.enrollments.get(key)) {
                    if register.winner().is_some_and(|w| &w.value != existing) {
                        debug!(
                            "{} keeps its own {} for {} ({})",
                            target.device,
                            key,
                            entry.identity,
                            existing.digest()
                        );
                    }
                    continue;
                }
                let modality = key.modality();
                if !caps.supports(modality) {
                    *unsupported.entry(modality).or_default() += 1;
                    plan.skipped.push(Skipped {
                        identity: entry.identity.clone(),
                        key: *key,
                        reason: SkipReason::Unsupported,
                    });
                    continue;
                }
                let chosen = if modality.is_versioned() {
                    register.best_matching(|a| a.is_compatible_with(caps.face_version))
                } else {
                    register.winner()
                };
                match chosen {
                    Some(candidate) => plan.operations.push(Operation::AddEnrollment {
                        identity: entry.identity.clone(),
                        target: target_ref,
                        key: *key,
                        artifact: candidate.value.clone(),
                        source: candidate.origin.device,
                    }),
                    None => {
                        debug!(
                            "No {} for {} compatible with v{} on {}",
                            key, entry.identity, caps.face_version, target.device
                        );
                        plan.skipped.push(Skipped {
                            identity: entry.identity.clone(),
                            key: *key,
                            reason: SkipReason::IncompatibleVersion {
                                device_version: caps.face_version,
                            },
                        });
                    }
                }
            }
        }

        for (modality, count) in unsupported {
            info!(
                "{} does not support {}; skipping {} enrollments",
                target.device, modality, count
            );
        }
        debug!(
            "Plan for {}: {} operations, {} skipped",
            target.device,
            plan.len(),
            plan.skipped.len()
        );
        plan
    }
}
