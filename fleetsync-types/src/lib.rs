//! Core type definitions for FleetSync.
//!
//! This crate defines the plain data model shared by the reconciliation
//! engine and its callers:
//! - Device addressing and area (group) identifiers
//! - Business-level identity keys and device-local record ids
//! - Biometric modalities, enrollment keys and opaque artifacts
//! - User profiles and the per-device materialized record
//! - Probed device capabilities
//!
//! Nothing in here performs I/O. Device-local ids ([`LocalId`]) are scoped to
//! a single terminal and must never be compared across devices; the only
//! cross-device key is [`IdentityKey`].

mod b64;
mod biometric;
mod device;
mod ids;
mod record;

pub use biometric::{Artifact, EnrollmentKey, EnrollmentSet, Modality, Slot};
pub use device::{CapabilitySet, Device, FaceFlags, Reachability};
pub use ids::{AreaId, DeviceAddr, IdentityKey, LocalId, DEFAULT_DEVICE_PORT, MAX_IDENTITY_KEY_LEN};
pub use record::{DeviceLocalRecord, Privilege, Profile};

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by validating constructors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid identity key {0:?}: {1}")]
    InvalidIdentityKey(String, &'static str),

    #[error("invalid device address: {0}")]
    InvalidDeviceAddr(String),

    #[error("slot {slot} out of range for {modality} (max {max})")]
    SlotOutOfRange {
        modality: Modality,
        slot: u8,
        max: u8,
    },

    #[error("unknown privilege code: {0}")]
    UnknownPrivilege(u8),

    #[error("empty artifact for {0}")]
    EmptyArtifact(Modality),

    #[error("empty template data")]
    EmptyTemplate,
}
