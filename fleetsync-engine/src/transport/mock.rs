//! In-memory terminals for tests and simulations.
//!
//! A [`MockTerminal`] keeps a user table and enrollment store behind a shared
//! lock and hands out channels that behave like the real protocols: the
//! terminal picks local ids on creation, user upserts are create-or-update,
//! and face writes are refused when the template generation does not match
//! the firmware. [`MockFaults`] injects the failure modes seen in the field.

use super::*;
use crate::error::SyncError;
use fleetsync_types::{DeviceAddr, DeviceLocalRecord, EnrollmentKey};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Where a terminal reports its face flags, if anywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlagExposure {
    /// Exposed through the identity protocol's device options.
    #[default]
    IdentityChannel,
    /// Exposed only by the auxiliary protocol.
    BiometricChannel,
    /// Not exposed; only a functional probe can tell.
    Hidden,
}

/// Fixed characteristics of a simulated terminal model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MockHardware {
    pub face: bool,
    pub photo: bool,
    pub face_version: u32,
    pub flags: FlagExposure,
}

impl MockHardware {
    /// Fingerprint-only model.
    pub fn fingerprint_only() -> Self {
        Self {
            face: false,
            photo: false,
            face_version: 0,
            flags: FlagExposure::IdentityChannel,
        }
    }

    /// Face-capable model running the given face algorithm.
    pub fn face(version: u32) -> Self {
        Self {
            face: true,
            photo: true,
            face_version: version,
            flags: FlagExposure::IdentityChannel,
        }
    }

    /// Same model, reporting face flags in a different place.
    #[must_use]
    pub fn with_flags(mut self, flags: FlagExposure) -> Self {
        self.flags = flags;
        self
    }
}

impl Default for MockHardware {
    fn default() -> Self {
        Self::face(0)
    }
}

/// Failure injection.
#[derive(Debug, Clone, Default)]
pub struct MockFaults {
    /// Every connection attempt fails.
    pub offline: bool,
    /// The auxiliary protocol refuses connections.
    pub biometric_down: bool,
    /// The next N identity-channel connection attempts fail.
    pub connect_failures: u32,
    /// Identity-channel connection attempts never complete.
    pub hang_on_connect: bool,
    /// Identity-channel commands never complete.
    pub hang_commands: bool,
    /// Reads that include one of these identities fail.
    pub failing_reads: HashSet<IdentityKey>,
    /// Batch reads larger than this fail.
    pub max_read_batch: Option<usize>,
    /// The next N writes fail with a transient error.
    pub write_failures: u32,
    /// Writes for these identities are always refused.
    pub rejected_identities: HashSet<IdentityKey>,
}

/// Counters for assertions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MockStats {
    pub identity_opens: u32,
    pub biometric_opens: u32,
    pub identity_closes: u32,
    pub biometric_closes: u32,
    pub writes: u32,
}

#[derive(Debug, Default)]
struct TerminalState {
    users: BTreeMap<LocalId, (IdentityKey, Profile)>,
    enrollments: BTreeMap<(LocalId, EnrollmentKey), Artifact>,
    hardware: MockHardware,
    faults: MockFaults,
    stats: MockStats,
}

impl TerminalState {
    fn local_id_of(&self, identity: &IdentityKey) -> Option<LocalId> {
        self.users
            .iter()
            .find(|(_, (key, _))| key == identity)
            .map(|(id, _)| *id)
    }

    fn check_read(&self, batch: usize, identities: impl IntoIterator<Item = IdentityKey>) -> EngineResult<()> {
        if let Some(max) = self.faults.max_read_batch {
            if batch > max {
                return Err(SyncError::Protocol(format!("batch of {batch} exceeds buffer")));
            }
        }
        for identity in identities {
            if self.faults.failing_reads.contains(&identity) {
                return Err(SyncError::Protocol(format!("read of {identity} returned garbage")));
            }
        }
        Ok(())
    }

    fn check_write(&mut self, identity: &IdentityKey) -> EngineResult<()> {
        if self.faults.rejected_identities.contains(identity) {
            return Err(SyncError::Rejected(format!("user {identity} refused")));
        }
        if self.faults.write_failures > 0 {
            self.faults.write_failures -= 1;
            return Err(SyncError::Protocol("write not acknowledged".into()));
        }
        self.stats.writes += 1;
        Ok(())
    }

    fn face_flags(&self) -> FaceFlags {
        FaceFlags {
            enabled: self.hardware.face,
            version: self.hardware.face_version,
        }
    }
}

/// A simulated terminal. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MockTerminal {
    state: Arc<Mutex<TerminalState>>,
}

impl MockTerminal {
    /// Creates an empty terminal of the given model.
    pub fn new(hardware: MockHardware) -> Self {
        let state = TerminalState {
            hardware,
            ..Default::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, TerminalState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Seeds a record exactly as given, local id included.
    #[must_use]
    pub fn with_record(self, record: DeviceLocalRecord) -> Self {
        self.insert_record(record);
        self
    }

    /// Seeds a record exactly as given, local id included.
    pub fn insert_record(&self, record: DeviceLocalRecord) {
        let mut state = self.lock();
        for (key, artifact) in record.enrollments.iter() {
            state
                .enrollments
                .insert((record.local_id, *key), artifact.clone());
        }
        state
            .users
            .insert(record.local_id, (record.identity, record.profile));
    }

    /// Applies fault settings.
    pub fn set_faults(&self, update: impl FnOnce(&mut MockFaults)) {
        update(&mut self.lock().faults);
    }

    /// Current contents, ordered by local id.
    pub fn records(&self) -> Vec<DeviceLocalRecord> {
        let state = self.lock();
        state
            .users
            .iter()
            .map(|(local_id, (identity, profile))| {
                let enrollments = state
                    .enrollments
                    .iter()
                    .filter(|((id, _), _)| id == local_id)
                    .map(|((_, key), artifact)| (*key, artifact.clone()))
                    .collect();
                DeviceLocalRecord {
                    local_id: *local_id,
                    identity: identity.clone(),
                    profile: profile.clone(),
                    enrollments,
                }
            })
            .collect()
    }

    /// Record for one identity, if present.
    pub fn record(&self, identity: &IdentityKey) -> Option<DeviceLocalRecord> {
        self.records().into_iter().find(|r| &r.identity == identity)
    }

    /// Total number of stored artifacts.
    pub fn enrollment_count(&self) -> usize {
        self.lock().enrollments.len()
    }

    pub fn stats(&self) -> MockStats {
        self.lock().stats
    }

    fn hangs_commands(&self) -> bool {
        self.lock().faults.hang_commands
    }
}

struct MockIdentityChannel {
    terminal: MockTerminal,
}

struct MockBiometricChannel {
    terminal: MockTerminal,
}

impl MockIdentityChannel {
    async fn gate(&self) {
        if self.terminal.hangs_commands() {
            std::future::pending::<()>().await;
        }
    }
}

#[async_trait]
impl IdentityChannel for MockIdentityChannel {
    async fn read_users(&mut self) -> EngineResult<Vec<UserEntry>> {
        self.gate().await;
        let state = self.terminal.lock();
        Ok(state
            .users
            .iter()
            .map(|(local_id, (identity, profile))| UserEntry {
                local_id: *local_id,
                identity: identity.clone(),
                profile: profile.clone(),
            })
            .collect())
    }

    async fn read_fingerprints(&mut self, users: &[LocalId]) -> EngineResult<Vec<FingerprintEntry>> {
        self.gate().await;
        let state = self.terminal.lock();
        let identities = users
            .iter()
            .filter_map(|id| state.users.get(id).map(|(key, _)| key.clone()));
        state.check_read(users.len(), identities)?;
        Ok(state
            .enrollments
            .iter()
            .filter(|((id, key), _)| key.modality() == Modality::Fingerprint && users.contains(id))
            .map(|((id, key), artifact)| FingerprintEntry {
                local_id: *id,
                slot: key.slot(),
                artifact: artifact.clone(),
            })
            .collect())
    }

    async fn face_flags(&mut self) -> EngineResult<Option<FaceFlags>> {
        self.gate().await;
        let state = self.terminal.lock();
        Ok((state.hardware.flags == FlagExposure::IdentityChannel).then(|| state.face_flags()))
    }

    async fn upsert_user(&mut self, identity: &IdentityKey, profile: &Profile) -> EngineResult<LocalId> {
        self.gate().await;
        let mut state = self.terminal.lock();
        state.check_write(identity)?;
        let local_id = match state.local_id_of(identity) {
            Some(existing) => existing,
            None => {
                let next = state.users.keys().next_back().map_or(Some(1), |id| id.0.checked_add(1));
                LocalId(next.ok_or_else(|| SyncError::Rejected("user table full".into()))?)
            }
        };
        state.users.insert(local_id, (identity.clone(), profile.clone()));
        Ok(local_id)
    }

    async fn update_profile(&mut self, user: LocalId, profile: &Profile) -> EngineResult<()> {
        self.gate().await;
        let mut state = self.terminal.lock();
        let identity = match state.users.get(&user) {
            Some((identity, _)) => identity.clone(),
            None => return Err(SyncError::Rejected(format!("no user {user}"))),
        };
        state.check_write(&identity)?;
        state.users.insert(user, (identity, profile.clone()));
        Ok(())
    }

    async fn write_fingerprint(&mut self, user: LocalId, slot: Slot, artifact: &Artifact) -> EngineResult<()> {
        self.gate().await;
        let key = EnrollmentKey::new(Modality::Fingerprint, slot)?;
        let mut state = self.terminal.lock();
        let identity = match state.users.get(&user) {
            Some((identity, _)) => identity.clone(),
            None => return Err(SyncError::Rejected(format!("no user {user}"))),
        };
        state.check_write(&identity)?;
        state.enrollments.insert((user, key), artifact.clone());
        Ok(())
    }

    async fn close(&mut self) -> EngineResult<()> {
        self.terminal.lock().stats.identity_closes += 1;
        Ok(())
    }
}

#[async_trait]
impl BiometricChannel for MockBiometricChannel {
    async fn face_flags(&mut self) -> EngineResult<Option<FaceFlags>> {
        let state = self.terminal.lock();
        Ok((state.hardware.flags == FlagExposure::BiometricChannel).then(|| state.face_flags()))
    }

    async fn read(&mut self, modality: Modality, identities: &[IdentityKey]) -> EngineResult<Vec<BiometricEntry>> {
        let state = self.terminal.lock();
        if !supported(&state.hardware, modality) {
            return Err(SyncError::Unsupported(modality));
        }
        state.check_read(identities.len(), identities.iter().cloned())?;
        let mut entries = Vec::new();
        for identity in identities {
            let Some(local_id) = state.local_id_of(identity) else {
                continue;
            };
            for ((_, key), artifact) in state
                .enrollments
                .iter()
                .filter(|((id, key), _)| *id == local_id && key.modality() == modality)
            {
                entries.push(BiometricEntry {
                    identity: identity.clone(),
                    slot: key.slot(),
                    artifact: artifact.clone(),
                });
            }
        }
        Ok(entries)
    }

    async fn write(
        &mut self,
        modality: Modality,
        identity: &IdentityKey,
        slot: Slot,
        artifact: &Artifact,
    ) -> EngineResult<()> {
        let key = EnrollmentKey::new(modality, slot)?;
        let mut state = self.terminal.lock();
        if !supported(&state.hardware, modality) {
            return Err(SyncError::Unsupported(modality));
        }
        if modality.is_versioned() && !artifact.is_compatible_with(state.hardware.face_version) {
            return Err(SyncError::Rejected(format!(
                "template v{} unreadable by firmware v{}",
                artifact.version(),
                state.hardware.face_version
            )));
        }
        let Some(local_id) = state.local_id_of(identity) else {
            return Err(SyncError::Rejected(format!("no user {identity}")));
        };
        state.check_write(identity)?;
        state.enrollments.insert((local_id, key), artifact.clone());
        Ok(())
    }

    async fn close(&mut self) -> EngineResult<()> {
        self.terminal.lock().stats.biometric_closes += 1;
        Ok(())
    }
}

fn supported(hardware: &MockHardware, modality: Modality) -> bool {
    match modality {
        Modality::Fingerprint => false,
        Modality::Face => hardware.face,
        Modality::Photo => hardware.photo,
    }
}

/// A set of simulated terminals reachable by address.
#[derive(Debug, Clone, Default)]
pub struct MockFleet {
    terminals: HashMap<DeviceAddr, MockTerminal>,
}

impl MockFleet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds (or replaces) the terminal at an address.
    pub fn insert(&mut self, addr: DeviceAddr, terminal: MockTerminal) {
        self.terminals.insert(addr, terminal);
    }

    /// Builder form of [`MockFleet::insert`].
    #[must_use]
    pub fn with(mut self, addr: DeviceAddr, terminal: MockTerminal) -> Self {
        self.insert(addr, terminal);
        self
    }

    pub fn terminal(&self, addr: &DeviceAddr) -> Option<&MockTerminal> {
        self.terminals.get(addr)
    }

    fn lookup(&self, device: &Device) -> EngineResult<&MockTerminal> {
        self.terminals.get(&device.addr).ok_or_else(|| SyncError::Connection {
            device: device.addr,
            reason: "no route to host".into(),
        })
    }
}

#[async_trait]
impl DeviceConnector for MockFleet {
    async fn open_identity(&self, device: &Device) -> EngineResult<Box<dyn IdentityChannel>> {
        let terminal = self.lookup(device)?;
        let hang = {
            let mut state = terminal.lock();
            if state.faults.offline {
                return Err(SyncError::Connection {
                    device: device.addr,
                    reason: "host unreachable".into(),
                });
            }
            if state.faults.connect_failures > 0 {
                state.faults.connect_failures -= 1;
                return Err(SyncError::Connection {
                    device: device.addr,
                    reason: "connection refused".into(),
                });
            }
            state.faults.hang_on_connect
        };
        if hang {
            std::future::pending::<()>().await;
        }
        terminal.lock().stats.identity_opens += 1;
        Ok(Box::new(MockIdentityChannel {
            terminal: terminal.clone(),
        }))
    }

    async fn open_biometric(&self, device: &Device) -> EngineResult<Box<dyn BiometricChannel>> {
        let terminal = self.lookup(device)?;
        let mut state = terminal.lock();
        if state.faults.offline || state.faults.biometric_down {
            return Err(SyncError::Connection {
                device: device.addr,
                reason: "auxiliary protocol refused session".into(),
            });
        }
        state.stats.biometric_opens += 1;
        drop(state);
        Ok(Box::new(MockBiometricChannel {
            terminal: terminal.clone(),
        }))
    }
}
