//! User profiles and per-terminal materialized records.

use serde::{Deserialize, Serialize};

use crate::Error;
use crate::biometric::{Artifact, EnrollmentKey, EnrollmentSet, Modality};
use crate::ids::{IdentityKey, LocalId};

/// Terminal privilege level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Privilege {
    #[default]
    User,
    Enroller,
    Manager,
    Admin,
}

impl Privilege {
    /// Code stored in the terminal user table.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Privilege::User => 0,
            Privilege::Enroller => 2,
            Privilege::Manager => 6,
            Privilege::Admin => 14,
        }
    }

    /// Parses a terminal privilege code.
    pub fn from_code(code: u8) -> crate::Result<Self> {
        match code {
            0 => Ok(Privilege::User),
            2 => Ok(Privilege::Enroller),
            6 => Ok(Privilege::Manager),
            14 => Ok(Privilege::Admin),
            other => Err(Error::UnknownPrivilege(other)),
        }
    }
}

/// Non-biometric user fields. Conflicts resolve last-writer-wins.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Profile {
    pub name: String,
    #[serde(default)]
    pub privilege: Privilege,
    #[serde(default)]
    pub password: Option<String>,
    /// RFID card number; 0 means no card.
    #[serde(default)]
    pub card: u32,
    #[serde(default)]
    pub group: Option<String>,
}

impl Profile {
    /// Profile with just a display name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// An identity as stored on one terminal, under that terminal's local id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceLocalRecord {
    pub local_id: LocalId,
    pub identity: IdentityKey,
    pub profile: Profile,
    #[serde(default)]
    pub enrollments: EnrollmentSet,
}

impl DeviceLocalRecord {
    /// Record with no enrollments.
    pub fn new(local_id: LocalId, identity: IdentityKey, profile: Profile) -> Self {
        Self {
            local_id,
            identity,
            profile,
            enrollments: EnrollmentSet::new(),
        }
    }

    /// Adds an artifact (builder style, mostly for fixtures).
    #[must_use]
    pub fn with_enrollment(mut self, key: EnrollmentKey, artifact: Artifact) -> Self {
        self.enrollments.insert(key, artifact);
        self
    }

    /// Number of artifacts of one modality.
    #[must_use]
    pub fn enrollment_count(&self, modality: Modality) -> usize {
        self.enrollments.count(modality)
    }
}
