//! Device channel abstraction.
//!
//! Terminals speak two independent vendor protocols. The identity channel
//! owns the user table and fingerprint templates and addresses users by
//! their [`LocalId`]. The biometric channel carries face templates and
//! enrollment photos and addresses users by [`IdentityKey`]. The two keep
//! separate session state on the terminal, so they are opened, used and torn
//! down separately.
//!
//! The byte layout of either protocol is the device SDK's concern; the
//! engine only needs the operations below.

use async_trait::async_trait;
use fleetsync_types::{
    Artifact, Device, FaceFlags, IdentityKey, LocalId, Modality, Profile, Slot,
};

use crate::error::EngineResult;

pub mod mock;

/// One row of the terminal user table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserEntry {
    pub local_id: LocalId,
    pub identity: IdentityKey,
    pub profile: Profile,
}

/// A fingerprint template read over the identity channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FingerprintEntry {
    pub local_id: LocalId,
    pub slot: Slot,
    pub artifact: Artifact,
}

/// A face template or photo read over the biometric channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BiometricEntry {
    pub identity: IdentityKey,
    pub slot: Slot,
    pub artifact: Artifact,
}

/// Primary protocol: user table and fingerprints.
#[async_trait]
pub trait IdentityChannel: Send {
    /// Reads the whole user table.
    async fn read_users(&mut self) -> EngineResult<Vec<UserEntry>>;

    /// Reads fingerprint templates of the given users.
    async fn read_fingerprints(&mut self, users: &[LocalId]) -> EngineResult<Vec<FingerprintEntry>>;

    /// Face flags from the device options, if this firmware exposes them here.
    async fn face_flags(&mut self) -> EngineResult<Option<FaceFlags>>;

    /// Creates a user, or updates it when the identity already exists.
    /// The terminal chooses the local id of a new user.
    async fn upsert_user(&mut self, identity: &IdentityKey, profile: &Profile) -> EngineResult<LocalId>;

    /// Rewrites the profile fields of an existing user.
    async fn update_profile(&mut self, user: LocalId, profile: &Profile) -> EngineResult<()>;

    /// Stores one complete fingerprint template.
    async fn write_fingerprint(&mut self, user: LocalId, slot: Slot, artifact: &Artifact) -> EngineResult<()>;

    /// Ends the session.
    async fn close(&mut self) -> EngineResult<()>;
}

/// Auxiliary protocol: faces and photos.
#[async_trait]
pub trait BiometricChannel: Send {
    /// Face flags as reported by the auxiliary protocol, if exposed.
    async fn face_flags(&mut self) -> EngineResult<Option<FaceFlags>>;

    /// Reads artifacts of one modality for the given identities. Identities
    /// without an artifact are simply absent from the result.
    async fn read(&mut self, modality: Modality, identities: &[IdentityKey]) -> EngineResult<Vec<BiometricEntry>>;

    /// Stores one complete artifact.
    async fn write(
        &mut self,
        modality: Modality,
        identity: &IdentityKey,
        slot: Slot,
        artifact: &Artifact,
    ) -> EngineResult<()>;

    /// Ends the session.
    async fn close(&mut self) -> EngineResult<()>;
}

/// Opens channels to terminals.
#[async_trait]
pub trait DeviceConnector: Send + Sync {
    /// Opens the identity (primary) channel.
    async fn open_identity(&self, device: &Device) -> EngineResult<Box<dyn IdentityChannel>>;

    /// Opens the biometric (auxiliary) channel.
    async fn open_biometric(&self, device: &Device) -> EngineResult<Box<dyn BiometricChannel>>;
}
