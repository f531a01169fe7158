//! Biometric modalities, enrollment keys and artifacts.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

use crate::Error;

/// A kind of biometric artifact a terminal can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    Fingerprint,
    Face,
    Photo,
}

impl Modality {
    /// All modalities, in planning order.
    pub const ALL: [Modality; 3] = [Modality::Fingerprint, Modality::Face, Modality::Photo];

    /// Number of slots a single identity can fill for this modality.
    #[must_use]
    pub const fn slot_count(self) -> u8 {
        match self {
            // one per finger
            Modality::Fingerprint => 10,
            Modality::Face | Modality::Photo => 1,
        }
    }

    /// Whether artifacts of this modality are tied to a firmware algorithm
    /// generation and may be unreadable on other generations.
    #[must_use]
    pub const fn is_versioned(self) -> bool {
        matches!(self, Modality::Face)
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Modality::Fingerprint => "fingerprint",
            Modality::Face => "face",
            Modality::Photo => "photo",
        };
        f.write_str(name)
    }
}

/// Slot index within a modality (finger position for fingerprints).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Slot(pub u8);

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Address of one artifact within an identity's enrollment set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "RawEnrollmentKey")]
pub struct EnrollmentKey {
    modality: Modality,
    slot: Slot,
}

#[derive(Deserialize)]
struct RawEnrollmentKey {
    modality: Modality,
    slot: Slot,
}

impl TryFrom<RawEnrollmentKey> for EnrollmentKey {
    type Error = Error;

    fn try_from(raw: RawEnrollmentKey) -> Result<Self, Self::Error> {
        Self::new(raw.modality, raw.slot)
    }
}

impl EnrollmentKey {
    /// Creates a key, rejecting slots the modality does not have.
    pub fn new(modality: Modality, slot: Slot) -> crate::Result<Self> {
        let max = modality.slot_count() - 1;
        if slot.0 > max {
            return Err(Error::SlotOutOfRange {
                modality,
                slot: slot.0,
                max,
            });
        }
        Ok(Self { modality, slot })
    }

    /// Key of a fingerprint at the given finger position.
    pub fn fingerprint(finger: u8) -> crate::Result<Self> {
        Self::new(Modality::Fingerprint, Slot(finger))
    }

    /// Key of the single face template.
    #[must_use]
    pub const fn face() -> Self {
        Self {
            modality: Modality::Face,
            slot: Slot(0),
        }
    }

    /// Key of the single enrollment photo.
    #[must_use]
    pub const fn photo() -> Self {
        Self {
            modality: Modality::Photo,
            slot: Slot(0),
        }
    }

    #[must_use]
    pub const fn modality(&self) -> Modality {
        self.modality
    }

    #[must_use]
    pub const fn slot(&self) -> Slot {
        self.slot
    }
}

impl fmt::Display for EnrollmentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.modality, self.slot)
    }
}

/// An opaque biometric template plus the algorithm version that produced it.
///
/// The engine never interprets the bytes; equality is byte equality.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawArtifact")]
pub struct Artifact {
    #[serde(with = "crate::b64")]
    data: Vec<u8>,
    /// Algorithm/firmware generation tag; 0 when unknown.
    #[serde(default)]
    version: u32,
}

#[derive(Deserialize)]
struct RawArtifact {
    #[serde(with = "crate::b64")]
    data: Vec<u8>,
    #[serde(default)]
    version: u32,
}

impl TryFrom<RawArtifact> for Artifact {
    type Error = Error;

    fn try_from(raw: RawArtifact) -> Result<Self, Self::Error> {
        if raw.data.is_empty() {
            return Err(Error::EmptyTemplate);
        }
        Ok(Self {
            data: raw.data,
            version: raw.version,
        })
    }
}

impl Artifact {
    /// Wraps template bytes. Empty templates are rejected: a terminal that
    /// returns zero bytes has no enrollment for that slot.
    pub fn new(modality: Modality, data: Vec<u8>, version: u32) -> crate::Result<Self> {
        if data.is_empty() {
            return Err(Error::EmptyArtifact(modality));
        }
        Ok(Self { data, version })
    }

    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    #[must_use]
    pub const fn version(&self) -> u32 {
        self.version
    }

    /// Byte length of the template.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// First 12 hex chars of the SHA-256 of the template, for logs.
    #[must_use]
    pub fn digest(&self) -> String {
        let hash = Sha256::digest(&self.data);
        hex::encode(&hash[..6])
    }

    /// Whether this artifact can be stored on a terminal running the given
    /// algorithm version. Unknown (0) on either side is accepted.
    #[must_use]
    pub fn is_compatible_with(&self, device_version: u32) -> bool {
        self.version == 0 || device_version == 0 || self.version == device_version
    }
}

impl fmt::Debug for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Artifact")
            .field("len", &self.data.len())
            .field("version", &self.version)
            .field("digest", &self.digest())
            .finish()
    }
}

/// All artifacts of one identity, keyed by (modality, slot).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<EnrollmentEntry>", into = "Vec<EnrollmentEntry>")]
pub struct EnrollmentSet(BTreeMap<EnrollmentKey, Artifact>);

/// Flat serialized form of one enrollment:
/// `{"modality", "slot", "data", "version"}`.
#[derive(Serialize, Deserialize)]
struct EnrollmentEntry {
    #[serde(flatten)]
    key: EnrollmentKey,
    #[serde(flatten)]
    artifact: Artifact,
}

impl From<Vec<EnrollmentEntry>> for EnrollmentSet {
    fn from(entries: Vec<EnrollmentEntry>) -> Self {
        Self(entries.into_iter().map(|e| (e.key, e.artifact)).collect())
    }
}

impl From<EnrollmentSet> for Vec<EnrollmentEntry> {
    fn from(set: EnrollmentSet) -> Self {
        set.0
            .into_iter()
            .map(|(key, artifact)| EnrollmentEntry { key, artifact })
            .collect()
    }
}

impl EnrollmentSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores an artifact, returning the one it replaced.
    pub fn insert(&mut self, key: EnrollmentKey, artifact: Artifact) -> Option<Artifact> {
        self.0.insert(key, artifact)
    }

    #[must_use]
    pub fn get(&self, key: &EnrollmentKey) -> Option<&Artifact> {
        self.0.get(key)
    }

    #[must_use]
    pub fn contains(&self, key: &EnrollmentKey) -> bool {
        self.0.contains_key(key)
    }

    /// Total number of artifacts across all modalities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of artifacts of one modality.
    #[must_use]
    pub fn count(&self, modality: Modality) -> usize {
        self.0.keys().filter(|k| k.modality() == modality).count()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&EnrollmentKey, &Artifact)> {
        self.0.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &EnrollmentKey> {
        self.0.keys()
    }
}

impl FromIterator<(EnrollmentKey, Artifact)> for EnrollmentSet {
    fn from_iter<I: IntoIterator<Item = (EnrollmentKey, Artifact)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
