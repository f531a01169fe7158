//! Device snapshots.
//!
//! A snapshot is the read-only view of one terminal taken at the start of a
//! round: its user table plus every artifact of each supported modality,
//! keyed by local id. Reads are batched because terminals have small
//! transfer buffers. When a batch fails, its identities are retried one by
//! one; identities that still cannot be read are omitted from the snapshot
//! (and from everything derived from it) rather than failing the device.

use chrono::{DateTime, Utc};
use fleetsync_types::{
    CapabilitySet, DeviceAddr, DeviceLocalRecord, EnrollmentKey, IdentityKey, LocalId, Modality,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::error::{EngineResult, SyncError};
use crate::retry::with_retry;
use crate::session::Session;

/// Everything one terminal held when it was read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSnapshot {
    pub device: DeviceAddr,
    pub observed_at: DateTime<Utc>,
    pub capabilities: CapabilitySet,
    pub records: BTreeMap<LocalId, DeviceLocalRecord>,
    /// Identities skipped because they could not be read.
    #[serde(default)]
    pub omitted: Vec<IdentityKey>,
}

impl DeviceSnapshot {
    /// Empty snapshot stamped with the current time.
    pub fn new(device: DeviceAddr, capabilities: CapabilitySet) -> Self {
        Self {
            device,
            observed_at: Utc::now(),
            capabilities,
            records: BTreeMap::new(),
            omitted: Vec::new(),
        }
    }

    /// Adds a record (builder style, for fixtures).
    #[must_use]
    pub fn with_record(mut self, record: DeviceLocalRecord) -> Self {
        self.records.insert(record.local_id, record);
        self
    }

    #[must_use]
    pub fn identity_count(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn enrollment_count(&self) -> usize {
        self.records.values().map(|r| r.enrollments.len()).sum()
    }

    /// Record holding `identity`, if any.
    pub fn find(&self, identity: &IdentityKey) -> Option<&DeviceLocalRecord> {
        self.records.values().find(|r| &r.identity == identity)
    }

    /// Records indexed by identity key.
    pub fn by_identity(&self) -> HashMap<&IdentityKey, &DeviceLocalRecord> {
        self.records.values().map(|r| (&r.identity, r)).collect()
    }
}

/// Reads snapshots through a session.
#[derive(Debug, Clone)]
pub struct Snapshotter {
    config: SyncConfig,
}

impl Snapshotter {
    pub fn new(config: SyncConfig) -> Self {
        Self { config }
    }

    /// Reads the full contents of a device.
    ///
    /// Fails only when the user table itself cannot be read or the device
    /// stops answering. A modality the device refuses mid-read is dropped
    /// from the snapshot's capabilities.
    pub async fn snapshot(&self, session: &Session, capabilities: CapabilitySet) -> EngineResult<DeviceSnapshot> {
        let addr = session.addr();
        let attempts = self.config.operation_retries + 1;
        let users = with_retry(&self.config, attempts, addr, "read users", || session.read_users()).await?;

        let mut snapshot = DeviceSnapshot::new(addr, capabilities);
        let mut seen: HashMap<IdentityKey, LocalId> = HashMap::new();
        let mut users = users;
        users.sort_by_key(|u| u.local_id);
        for user in users {
            if let Some(kept) = seen.get(&user.identity) {
                warn!(
                    "{} holds {} under both {} and {}; ignoring {}",
                    addr, user.identity, kept, user.local_id, user.local_id
                );
                continue;
            }
            seen.insert(user.identity.clone(), user.local_id);
            snapshot.records.insert(
                user.local_id,
                DeviceLocalRecord::new(user.local_id, user.identity, user.profile),
            );
        }

        let local_ids: Vec<LocalId> = snapshot.records.keys().copied().collect();
        let (entries, failed) = self
            .read_batched(session, &local_ids, |batch: Vec<LocalId>| async move {
                session.read_fingerprints(&batch).await
            })
            .await?;
        for entry in entries {
            let Some(record) = snapshot.records.get_mut(&entry.local_id) else {
                continue;
            };
            match EnrollmentKey::new(Modality::Fingerprint, entry.slot) {
                Ok(key) => {
                    record.enrollments.insert(key, entry.artifact);
                }
                Err(e) => warn!("{}: dropping fingerprint of {}: {}", addr, record.identity, e),
            }
        }
        let mut omitted: Vec<IdentityKey> = failed
            .iter()
            .filter_map(|id| snapshot.records.get(id).map(|r| r.identity.clone()))
            .collect();

        let identities: Vec<IdentityKey> = snapshot.records.values().map(|r| r.identity.clone()).collect();
        for modality in [Modality::Face, Modality::Photo] {
            if !snapshot.capabilities.supports(modality) {
                continue;
            }
            let read = self
                .read_batched(session, &identities, |batch: Vec<IdentityKey>| async move {
                    session.read_biometric(modality, &batch).await
                })
                .await;
            let (entries, failed) = match read {
                Ok(read) => read,
                Err(SyncError::Unsupported(_)) => {
                    warn!("{} refused {} reads; treating as unsupported", addr, modality);
                    match modality {
                        Modality::Face => snapshot.capabilities.face = false,
                        _ => snapshot.capabilities.photo = false,
                    }
                    continue;
                }
                Err(e) => return Err(e),
            };
            // Hidden face flags leave the generation unknown; stored
            // templates carry it.
            if modality == Modality::Face && snapshot.capabilities.face_version == 0 {
                if let Some(version) = entries.iter().map(|e| e.artifact.version()).find(|v| *v != 0) {
                    debug!("{}: face templates are generation {}", addr, version);
                    snapshot.capabilities.face_version = version;
                }
            }
            let index: HashMap<IdentityKey, LocalId> =
                snapshot.records.values().map(|r| (r.identity.clone(), r.local_id)).collect();
            for entry in entries {
                let Some(record) = index.get(&entry.identity).and_then(|id| snapshot.records.get_mut(id)) else {
                    continue;
                };
                match EnrollmentKey::new(modality, entry.slot) {
                    Ok(key) => {
                        record.enrollments.insert(key, entry.artifact);
                    }
                    Err(e) => warn!("{}: dropping {} of {}: {}", addr, modality, record.identity, e),
                }
            }
            omitted.extend(failed);
        }

        omitted.sort();
        omitted.dedup();
        if !omitted.is_empty() {
            warn!(
                "{}: {} identities unreadable and omitted this round",
                addr,
                omitted.len()
            );
            snapshot.records.retain(|_, r| !omitted.contains(&r.identity));
        }
        snapshot.omitted = omitted;

        info!(
            "Snapshot of {}: {} identities, {} enrollments",
            addr,
            snapshot.identity_count(),
            snapshot.enrollment_count()
        );
        Ok(snapshot)
    }

    /// Reads `keys` in batches. Returns everything read plus the keys that
    /// could not be read even on their own.
    async fn read_batched<K, E, F, Fut>(
        &self,
        session: &Session,
        keys: &[K],
        fetch: F,
    ) -> EngineResult<(Vec<E>, Vec<K>)>
    where
        K: Clone + std::fmt::Display,
        F: Fn(Vec<K>) -> Fut,
        Fut: Future<Output = EngineResult<Vec<E>>>,
    {
        let addr = session.addr();
        let attempts = self.config.operation_retries + 1;
        let mut entries = Vec::new();
        let mut failed = Vec::new();

        for batch in keys.chunks(self.config.snapshot_batch_size) {
            match fetch(batch.to_vec()).await {
                Ok(read) => {
                    entries.extend(read);
                    continue;
                }
                Err(e @ (SyncError::Timeout | SyncError::Unreachable(_) | SyncError::Unsupported(_))) => {
                    return Err(e);
                }
                Err(e) => {
                    debug!("Batch read of {} on {} failed ({}); reading one by one", batch.len(), addr, e);
                }
            }
            for key in batch {
                let single = with_retry(&self.config, attempts, addr, "single read", || fetch(vec![key.clone()])).await;
                match single {
                    Ok(read) => entries.extend(read),
                    Err(e @ (SyncError::Timeout | SyncError::Unreachable(_) | SyncError::Unsupported(_))) => {
                        return Err(e);
                    }
                    Err(e) => {
                        warn!("{}: cannot read {}: {}", addr, key, e);
                        failed.push(key.clone());
                    }
                }
            }
        }
        Ok((entries, failed))
    }
}
