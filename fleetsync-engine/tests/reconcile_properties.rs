//! Property-based tests for reconciliation.
//!
//! Fleets are generated with overlapping and disjoint identities, colliding
//! local ids, conflicting artifacts and mixed capabilities. Plans are applied
//! to the snapshots in memory the way a terminal would apply them (fresh
//! local id on create), then the fleet is planned again.

mod common;

use chrono::{DateTime, Duration};
use common::*;
use fleetsync_engine::{
    ConflictPolicy, DeviceSnapshot, Operation, Origin, Planner, RecordRef, Register, SnapshotSet,
    elect,
};
use fleetsync_types::{
    Artifact, CapabilitySet, DeviceLocalRecord, EnrollmentKey, IdentityKey, LocalId, Modality,
    Profile,
};
use proptest::prelude::*;
use std::collections::{BTreeMap, BTreeSet};

// =============================================================================
// HELPER STRATEGIES
// =============================================================================

fn key_for(choice: u8) -> EnrollmentKey {
    match choice {
        0..=2 => finger(choice),
        3 => EnrollmentKey::face(),
        _ => EnrollmentKey::photo(),
    }
}

fn artifact_for(key: EnrollmentKey, byte: u8) -> Artifact {
    match key.modality() {
        Modality::Fingerprint => fp(byte),
        Modality::Face => face(byte, 0),
        Modality::Photo => photo(byte),
    }
}

/// (face, photo, local id offset, identity index -> (name variant, [(key choice, byte)]))
type DeviceSpec = (bool, bool, u16, BTreeMap<u8, (bool, Vec<(u8, u8)>)>);

fn device_strategy() -> impl Strategy<Value = DeviceSpec> {
    (
        any::<bool>(),
        any::<bool>(),
        0u16..20,
        prop::collection::btree_map(
            0u8..6,
            (any::<bool>(), prop::collection::vec((0u8..5, 0u8..3), 0..4)),
            0..5,
        ),
    )
}

fn fleet_strategy() -> impl Strategy<Value = Vec<DeviceSpec>> {
    prop::collection::vec(device_strategy(), 1..5)
}

fn build(specs: &[DeviceSpec]) -> SnapshotSet {
    specs
        .iter()
        .enumerate()
        .map(|(n, (has_face, has_photo, offset, users))| {
            let caps = CapabilitySet {
                fingerprint: true,
                face: *has_face,
                photo: *has_photo,
                face_version: 0,
            };
            let mut snapshot = DeviceSnapshot::new(addr(n as u8 + 1), caps);
            for (idx, (variant, enrollments)) in users {
                let name = if *variant { format!("User {idx}") } else { format!("user-{idx}") };
                let mut record = DeviceLocalRecord::new(
                    LocalId(u16::from(*idx) + offset + 1),
                    ident(&format!("10{idx}")),
                    Profile::named(name),
                );
                for (choice, byte) in enrollments {
                    let key = key_for(*choice);
                    if caps.supports(key.modality()) {
                        record.enrollments.insert(key, artifact_for(key, *byte));
                    }
                }
                snapshot.records.insert(record.local_id, record);
            }
            (snapshot.device, snapshot)
        })
        .collect()
}

/// Applies a plan the way a terminal would. Returns the ids it assigned.
fn apply(snapshot: &mut DeviceSnapshot, ops: &[Operation]) -> BTreeMap<IdentityKey, LocalId> {
    let mut created = BTreeMap::new();
    for op in ops {
        match op {
            Operation::CreateIdentity { identity, profile } => {
                let next = snapshot.records.keys().next_back().map_or(1, |id| id.get() + 1);
                let id = LocalId(next);
                snapshot
                    .records
                    .insert(id, DeviceLocalRecord::new(id, identity.clone(), profile.clone()));
                created.insert(identity.clone(), id);
            }
            Operation::UpdateProfile { local_id, profile, .. } => {
                snapshot.records.get_mut(local_id).unwrap().profile = profile.clone();
            }
            Operation::AddEnrollment {
                identity,
                target,
                key,
                artifact,
                ..
            } => {
                let id = match target {
                    RecordRef::Existing(id) => *id,
                    RecordRef::Created => created[identity],
                };
                let record = snapshot.records.get_mut(&id).unwrap();
                assert!(record.enrollments.get(key).is_none(), "overwrote {key}");
                record.enrollments.insert(*key, artifact.clone());
            }
        }
    }
    created
}

fn run_round(snapshots: &mut SnapshotSet, policy: ConflictPolicy) -> BTreeMap<fleetsync_types::DeviceAddr, Vec<Operation>> {
    let primary = elect(snapshots.values());
    let plans = Planner::new(policy).plan(snapshots, primary);
    let mut applied = BTreeMap::new();
    for (addr, plan) in plans.plans {
        apply(snapshots.get_mut(&addr).unwrap(), &plan.operations);
        applied.insert(addr, plan.operations);
    }
    applied
}

// =============================================================================
// ROUND PROPERTIES
// =============================================================================

mod round_properties {
    use super::*;

    proptest! {
        /// Every identity reaches every device with every supported enrollment.
        #[test]
        fn one_round_converges(specs in fleet_strategy()) {
            let mut snapshots = build(&specs);
            run_round(&mut snapshots, ConflictPolicy::PrimaryFirst);

            let mut union: BTreeMap<IdentityKey, BTreeSet<EnrollmentKey>> = BTreeMap::new();
            for snapshot in snapshots.values() {
                for record in snapshot.records.values() {
                    union
                        .entry(record.identity.clone())
                        .or_default()
                        .extend(record.enrollments.keys().copied());
                }
            }
            for snapshot in snapshots.values() {
                for (identity, keys) in &union {
                    let record = snapshot.find(identity);
                    prop_assert!(record.is_some(), "{} missing on {}", identity, snapshot.device);
                    let record = record.unwrap();
                    for key in keys {
                        if snapshot.capabilities.supports(key.modality()) {
                            prop_assert!(record.enrollments.contains(key));
                        }
                    }
                }
            }
        }

        /// A second round plans nothing.
        #[test]
        fn second_round_is_empty(specs in fleet_strategy(), recency in any::<bool>()) {
            let policy = if recency { ConflictPolicy::RecencyFirst } else { ConflictPolicy::PrimaryFirst };
            let mut snapshots = build(&specs);
            run_round(&mut snapshots, policy);
            let again = run_round(&mut snapshots, policy);
            for (addr, ops) in again {
                prop_assert!(ops.is_empty(), "{} got {:?}", addr, ops);
            }
        }

        /// Nothing a device held is removed or replaced.
        #[test]
        fn rounds_never_regress(specs in fleet_strategy()) {
            let before = build(&specs);
            let mut after = before.clone();
            run_round(&mut after, ConflictPolicy::PrimaryFirst);

            for (addr, old) in &before {
                let new = &after[addr];
                prop_assert!(new.enrollment_count() >= old.enrollment_count());
                for (id, record) in &old.records {
                    let kept = &new.records[id];
                    prop_assert_eq!(&kept.identity, &record.identity);
                    for (key, artifact) in record.enrollments.iter() {
                        prop_assert_eq!(kept.enrollments.get(key), Some(artifact));
                    }
                }
            }
        }

        /// Devices without a modality never receive it.
        #[test]
        fn capabilities_are_respected(specs in fleet_strategy()) {
            let mut snapshots = build(&specs);
            let caps: BTreeMap<_, _> = snapshots.iter().map(|(a, s)| (*a, s.capabilities)).collect();
            for (addr, ops) in run_round(&mut snapshots, ConflictPolicy::PrimaryFirst) {
                for op in ops {
                    if let Some(modality) = op.modality() {
                        prop_assert!(caps[&addr].supports(modality));
                    }
                }
            }
        }

        /// Plans address existing users by the target's own local id, and
        /// new identities get ids the device did not already use.
        #[test]
        fn local_ids_stay_device_scoped(specs in fleet_strategy()) {
            let mut snapshots = build(&specs);
            let primary = elect(snapshots.values());
            let plans = Planner::default().plan(&snapshots, primary);
            for (addr, plan) in plans.plans {
                let snapshot = snapshots.get_mut(&addr).unwrap();
                for op in &plan.operations {
                    let existing = match op {
                        Operation::UpdateProfile { local_id, .. } => Some(*local_id),
                        Operation::AddEnrollment { target: RecordRef::Existing(id), .. } => Some(*id),
                        _ => None,
                    };
                    if let Some(id) = existing {
                        prop_assert_eq!(&snapshot.records[&id].identity, op.identity());
                    }
                }
                let taken: BTreeSet<LocalId> = snapshot.records.keys().copied().collect();
                for id in apply(snapshot, &plan.operations).values() {
                    prop_assert!(!taken.contains(id));
                }
            }
        }
    }
}

// =============================================================================
// REGISTER PROPERTIES
// =============================================================================

mod register_properties {
    use super::*;

    fn origin_strategy() -> impl Strategy<Value = (u8, i64, bool)> {
        (1u8..6, 0i64..5, any::<bool>())
    }

    fn register(entries: &[(u8, i64, bool)], values: &[u8], policy: ConflictPolicy) -> Register<u8> {
        let base = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let mut register = Register::new(policy);
        for ((n, secs, primary), value) in entries.iter().zip(values) {
            register.offer(
                *value,
                Origin {
                    device: addr(*n),
                    observed_at: base + Duration::seconds(*secs),
                    primary: *primary,
                },
            );
        }
        register
    }

    proptest! {
        /// Offer order does not change the winner.
        #[test]
        fn winner_is_order_independent(
            entries in prop::collection::vec(origin_strategy(), 1..6),
            values in prop::collection::vec(any::<u8>(), 6),
        ) {
            let forward = register(&entries, &values, ConflictPolicy::PrimaryFirst);
            let rev_entries: Vec<_> = entries.iter().rev().copied().collect();
            let rev_values: Vec<_> = values[..entries.len()].iter().rev().copied().collect();
            let backward = register(&rev_entries, &rev_values, ConflictPolicy::PrimaryFirst);

            prop_assert_eq!(
                forward.winner().map(|c| c.origin),
                backward.winner().map(|c| c.origin)
            );
        }

        /// Merging is commutative.
        #[test]
        fn merge_is_commutative(
            a in prop::collection::vec(origin_strategy(), 0..4),
            b in prop::collection::vec(origin_strategy(), 0..4),
            values in prop::collection::vec(any::<u8>(), 4),
        ) {
            let ra = register(&a, &values, ConflictPolicy::RecencyFirst);
            let rb = register(&b, &values, ConflictPolicy::RecencyFirst);
            prop_assert_eq!(
                ra.merged(&rb).winner().map(|c| c.origin),
                rb.merged(&ra).winner().map(|c| c.origin)
            );
        }
    }
}
