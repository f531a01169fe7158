//! Connection manager and per-round device sessions.
//!
//! A [`Session`] owns both channels of one terminal for the lifetime of one
//! round. Sessions are never pooled across rounds: terminals silently drop
//! idle connections, and a stale session fails in confusing ways.
//!
//! Each channel sits behind its own async mutex, so commands on one channel
//! are serialized while the two channels can be driven concurrently. Every
//! command carries the configured timeout; the first timeout marks the
//! device unreachable and later calls fail fast.

use fleetsync_types::{
    Artifact, Device, DeviceAddr, FaceFlags, IdentityKey, LocalId, Modality, Profile, Slot,
};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::error::{EngineResult, SyncError};
use crate::retry::with_retry;
use crate::transport::{
    BiometricChannel, BiometricEntry, DeviceConnector, FingerprintEntry, IdentityChannel,
    UserEntry,
};

/// Open channels to one terminal.
pub struct Session {
    device: Device,
    identity: Mutex<Box<dyn IdentityChannel>>,
    biometric: Option<Mutex<Box<dyn BiometricChannel>>>,
    biometric_error: Option<String>,
    command_timeout: Duration,
    unreachable: AtomicBool,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("device", &self.device.addr)
            .field("biometric", &self.biometric.is_some())
            .field("unreachable", &self.is_unreachable())
            .finish()
    }
}

impl Session {
    /// Assembles a session from already-open channels.
    pub fn new(
        device: Device,
        identity: Box<dyn IdentityChannel>,
        biometric: Option<Box<dyn BiometricChannel>>,
        command_timeout: Duration,
    ) -> Self {
        Self {
            device,
            identity: Mutex::new(identity),
            biometric: biometric.map(Mutex::new),
            biometric_error: None,
            command_timeout,
            unreachable: AtomicBool::new(false),
        }
    }

    /// Inventory entry this session was opened for.
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Shorthand for `device().addr`.
    pub fn addr(&self) -> DeviceAddr {
        self.device.addr
    }

    /// Whether the auxiliary protocol is available this round.
    pub fn has_biometric_channel(&self) -> bool {
        self.biometric.is_some()
    }

    /// Why the auxiliary channel could not be opened, if it could not.
    pub fn biometric_error(&self) -> Option<&str> {
        self.biometric_error.as_deref()
    }

    /// Whether a command already timed out this round.
    pub fn is_unreachable(&self) -> bool {
        self.unreachable.load(Ordering::SeqCst)
    }

    /// Marks the device unreachable for the rest of the round.
    pub fn mark_unreachable(&self) {
        self.unreachable.store(true, Ordering::SeqCst);
    }

    fn ensure_reachable(&self) -> EngineResult<()> {
        if self.is_unreachable() {
            Err(SyncError::Unreachable(self.device.addr))
        } else {
            Ok(())
        }
    }

    async fn bounded<T>(&self, command: impl Future<Output = EngineResult<T>>) -> EngineResult<T> {
        match tokio::time::timeout(self.command_timeout, command).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    "Command on {} exceeded {:?}; device unreachable for this round",
                    self.device.addr, self.command_timeout
                );
                self.mark_unreachable();
                Err(SyncError::Timeout)
            }
        }
    }

    fn biometric(&self, modality: Modality) -> EngineResult<&Mutex<Box<dyn BiometricChannel>>> {
        self.biometric
            .as_ref()
            .ok_or(SyncError::Unsupported(modality))
    }

    // ── Identity channel ─────────────────────────────────────────

    /// Full user table.
    pub async fn read_users(&self) -> EngineResult<Vec<UserEntry>> {
        self.ensure_reachable()?;
        let mut channel = self.identity.lock().await;
        self.bounded(channel.read_users()).await
    }

    /// Fingerprint templates of `users`, every slot.
    pub async fn read_fingerprints(&self, users: &[LocalId]) -> EngineResult<Vec<FingerprintEntry>> {
        self.ensure_reachable()?;
        let mut channel = self.identity.lock().await;
        self.bounded(channel.read_fingerprints(users)).await
    }

    /// Creates or overwrites the user holding `identity` and returns its
    /// local id on this device.
    pub async fn upsert_user(&self, identity: &IdentityKey, profile: &Profile) -> EngineResult<LocalId> {
        self.ensure_reachable()?;
        let mut channel = self.identity.lock().await;
        self.bounded(channel.upsert_user(identity, profile)).await
    }

    /// Replaces the profile of an existing user.
    pub async fn update_profile(&self, user: LocalId, profile: &Profile) -> EngineResult<()> {
        self.ensure_reachable()?;
        let mut channel = self.identity.lock().await;
        self.bounded(channel.update_profile(user, profile)).await
    }

    /// Stores one fingerprint template for an existing user.
    pub async fn write_fingerprint(&self, user: LocalId, slot: Slot, artifact: &Artifact) -> EngineResult<()> {
        self.ensure_reachable()?;
        let mut channel = self.identity.lock().await;
        self.bounded(channel.write_fingerprint(user, slot, artifact)).await
    }

    // ── Both channels ────────────────────────────────────────────

    /// Face flags from the identity channel, falling back to the auxiliary
    /// channel. `Ok(None)` when neither exposes them.
    pub async fn face_flags(&self) -> EngineResult<Option<FaceFlags>> {
        self.ensure_reachable()?;
        let from_identity = {
            let mut channel = self.identity.lock().await;
            self.bounded(channel.face_flags()).await
        };
        match from_identity {
            Ok(Some(flags)) => return Ok(Some(flags)),
            Ok(None) => {}
            Err(e @ (SyncError::Timeout | SyncError::Unreachable(_))) => return Err(e),
            Err(e) => debug!("Identity channel face flags on {}: {}", self.device.addr, e),
        }
        let Some(biometric) = self.biometric.as_ref() else {
            return Ok(None);
        };
        let mut channel = biometric.lock().await;
        self.bounded(channel.face_flags()).await
    }

    // ── Biometric channel ────────────────────────────────────────

    /// Face or photo artifacts of `identities`. `Unsupported` when the
    /// auxiliary channel is not open.
    pub async fn read_biometric(
        &self,
        modality: Modality,
        identities: &[IdentityKey],
    ) -> EngineResult<Vec<BiometricEntry>> {
        self.ensure_reachable()?;
        let mut channel = self.biometric(modality)?.lock().await;
        self.bounded(channel.read(modality, identities)).await
    }

    /// Stores one face or photo artifact.
    pub async fn write_biometric(
        &self,
        modality: Modality,
        identity: &IdentityKey,
        slot: Slot,
        artifact: &Artifact,
    ) -> EngineResult<()> {
        self.ensure_reachable()?;
        let mut channel = self.biometric(modality)?.lock().await;
        self.bounded(channel.write(modality, identity, slot, artifact)).await
    }

    /// Closes both channels independently. Failures are logged only.
    pub async fn close(self) {
        let addr = self.device.addr;
        if self.is_unreachable() {
            debug!("Skipping close handshake with unreachable {}", addr);
            return;
        }
        let timeout = self.command_timeout;
        let identity = async {
            let mut channel = self.identity.lock().await;
            match tokio::time::timeout(timeout, channel.close()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Closing identity channel on {} failed: {}", addr, e),
                Err(_) => warn!("Closing identity channel on {} timed out", addr),
            }
        };
        let biometric = async {
            if let Some(biometric) = &self.biometric {
                let mut channel = biometric.lock().await;
                match tokio::time::timeout(timeout, channel.close()).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => warn!("Closing biometric channel on {} failed: {}", addr, e),
                    Err(_) => warn!("Closing biometric channel on {} timed out", addr),
                }
            }
        };
        tokio::join!(identity, biometric);
        debug!("Session with {} closed", addr);
    }
}

/// Opens and closes sessions with bounded retries.
pub struct ConnectionManager {
    connector: Arc<dyn DeviceConnector>,
    config: SyncConfig,
}

impl ConnectionManager {
    pub fn new(connector: Arc<dyn DeviceConnector>, config: SyncConfig) -> Self {
        Self { connector, config }
    }

    /// Opens both channels. Fails only when the identity channel cannot be
    /// opened; a missing auxiliary channel is recorded on the session.
    pub async fn open(&self, device: &Device) -> EngineResult<Session> {
        let connect_timeout = self.config.connect_timeout();
        let attempts = self.config.connect_retries;
        let connector = &self.connector;

        let identity = with_retry(&self.config, attempts, device.addr, "identity connect", || async move {
            tokio::time::timeout(connect_timeout, connector.open_identity(device))
                .await
                .unwrap_or(Err(SyncError::Timeout))
        })
        .await
        .map_err(|e| connection_error(device, e))?;

        let biometric = with_retry(&self.config, attempts, device.addr, "biometric connect", || async move {
            tokio::time::timeout(connect_timeout, connector.open_biometric(device))
                .await
                .unwrap_or(Err(SyncError::Timeout))
        })
        .await;

        let mut session = Session::new(device.clone(), identity, None, self.config.command_timeout());
        match biometric {
            Ok(channel) => session.biometric = Some(Mutex::new(channel)),
            Err(e) => {
                warn!(
                    "Auxiliary channel to {} unavailable: {}; face/photo skipped this round",
                    device.label(),
                    e
                );
                session.biometric_error = Some(e.to_string());
            }
        }
        info!(
            "Connected to {} (auxiliary channel: {})",
            device.label(),
            if session.has_biometric_channel() { "up" } else { "down" }
        );
        Ok(session)
    }

    /// Closes a session.
    pub async fn close(&self, session: Session) {
        session.close().await;
    }
}

fn connection_error(device: &Device, error: SyncError) -> SyncError {
    match error {
        e @ SyncError::Connection { .. } => e,
        SyncError::Timeout => SyncError::Connection {
            device: device.addr,
            reason: "connect timed out".into(),
        },
        other => SyncError::Connection {
            device: device.addr,
            reason: other.to_string(),
        },
    }
}
