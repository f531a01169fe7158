//! Terminal inventory entries and probed capabilities.

use serde::{Deserialize, Serialize};

use crate::biometric::Modality;
use crate::ids::{AreaId, DeviceAddr};

/// Whether a terminal answered during the current round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reachability {
    #[default]
    Unknown,
    Online,
    Offline,
}

/// A terminal as listed by the inventory collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub addr: DeviceAddr,
    pub area: AreaId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub reachability: Reachability,
}

impl Device {
    /// Creates an inventory entry with unknown reachability.
    pub fn new(addr: DeviceAddr, area: AreaId) -> Self {
        Self {
            addr,
            area,
            name: None,
            reachability: Reachability::Unknown,
        }
    }

    /// Sets a human-readable name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Name for logs: the configured name, or the address.
    #[must_use]
    pub fn label(&self) -> String {
        match &self.name {
            Some(name) => format!("{name} ({})", self.addr),
            None => self.addr.to_string(),
        }
    }
}

/// Face-function flags a terminal may expose in its device options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceFlags {
    /// `FaceFunOn` option.
    pub enabled: bool,
    /// Face algorithm version; 0 when not reported.
    pub version: u32,
}

/// What a terminal was found to support this round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CapabilitySet {
    pub fingerprint: bool,
    pub face: bool,
    pub photo: bool,
    /// Face algorithm generation (0 = unknown).
    pub face_version: u32,
}

impl CapabilitySet {
    /// Capabilities of a terminal that supports every modality.
    #[must_use]
    pub const fn full(face_version: u32) -> Self {
        Self {
            fingerprint: true,
            face: true,
            photo: true,
            face_version,
        }
    }

    /// Capabilities of a fingerprint-only terminal.
    #[must_use]
    pub const fn fingerprint_only() -> Self {
        Self {
            fingerprint: true,
            face: false,
            photo: false,
            face_version: 0,
        }
    }

    /// Whether the modality may be read from or written to this terminal.
    #[must_use]
    pub const fn supports(&self, modality: Modality) -> bool {
        match modality {
            Modality::Fingerprint => self.fingerprint,
            Modality::Face => self.face,
            Modality::Photo => self.photo,
        }
    }

    /// Modalities this terminal supports, in planning order.
    pub fn supported(&self) -> impl Iterator<Item = Modality> + use<> {
        let caps = *self;
        Modality::ALL.into_iter().filter(move |m| caps.supports(*m))
    }
}
