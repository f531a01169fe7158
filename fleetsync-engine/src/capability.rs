//! Capability detection.
//!
//! Firmware reports face support inconsistently: some models expose face
//! flags through the identity protocol, some only through the auxiliary
//! protocol, some not at all. Detection is layered: reported flags first,
//! then a functional read of a small batch. Detection never fails a device;
//! an inconclusive probe simply turns the modality off for the round.

use fleetsync_types::{CapabilitySet, IdentityKey, Modality};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::SyncError;
use crate::session::Session;

/// A modality that could not be confirmed because the probe itself failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeFailure {
    pub modality: Modality,
    pub reason: String,
}

/// Result of probing one device.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapabilityReport {
    pub capabilities: CapabilitySet,
    pub failures: Vec<ProbeFailure>,
}

impl CapabilityReport {
    fn fail(&mut self, modality: Modality, reason: impl Into<String>) {
        self.failures.push(ProbeFailure {
            modality,
            reason: reason.into(),
        });
    }
}

/// Probes what a connected terminal supports.
#[derive(Debug, Clone)]
pub struct CapabilityDetector {
    probe_batch_size: usize,
}

impl CapabilityDetector {
    pub fn new(probe_batch_size: usize) -> Self {
        Self {
            probe_batch_size: probe_batch_size.max(1),
        }
    }

    /// Determines the capability set of one device.
    ///
    /// Fingerprints are always available when the identity channel is open.
    /// Face and photo require the auxiliary channel.
    pub async fn probe(&self, session: &Session) -> CapabilityReport {
        let addr = session.addr();
        let mut report = CapabilityReport {
            capabilities: CapabilitySet::fingerprint_only(),
            failures: Vec::new(),
        };

        if !session.has_biometric_channel() {
            let reason = format!(
                "auxiliary channel unavailable: {}",
                session.biometric_error().unwrap_or("not opened")
            );
            report.fail(Modality::Face, reason.clone());
            report.fail(Modality::Photo, reason);
            info!("{} capabilities: fingerprint only (auxiliary channel down)", addr);
            return report;
        }

        let flags = match session.face_flags().await {
            Ok(flags) => flags,
            Err(e) => {
                debug!("Face flags unavailable on {}: {}", addr, e);
                None
            }
        };

        // Functional probes need a few identities to read against.
        let sample = if session.is_unreachable() {
            Vec::new()
        } else {
            self.sample_identities(session).await
        };

        match flags {
            Some(flags) if !flags.enabled => {
                debug!("{} reports face function off", addr);
            }
            Some(flags) => {
                report.capabilities.face = true;
                report.capabilities.face_version = flags.version;
            }
            None => {
                if let Some(version) = self.functional(session, Modality::Face, &sample, &mut report).await {
                    report.capabilities.face = true;
                    report.capabilities.face_version = version;
                }
            }
        }

        if self
            .functional(session, Modality::Photo, &sample, &mut report)
            .await
            .is_some()
        {
            report.capabilities.photo = true;
        }

        info!(
            "{} capabilities: fingerprint={} face={} (v{}) photo={}",
            addr,
            report.capabilities.fingerprint,
            report.capabilities.face,
            report.capabilities.face_version,
            report.capabilities.photo
        );
        report
    }

    async fn sample_identities(&self, session: &Session) -> Vec<IdentityKey> {
        match session.read_users().await {
            Ok(users) => users
                .into_iter()
                .take(self.probe_batch_size)
                .map(|u| u.identity)
                .collect(),
            Err(e) => {
                debug!("Probe could not sample users on {}: {}", session.addr(), e);
                Vec::new()
            }
        }
    }

    /// Attempts a read. Returns the observed artifact version (0 if none
    /// was read) when the modality works.
    async fn functional(
        &self,
        session: &Session,
        modality: Modality,
        sample: &[IdentityKey],
        report: &mut CapabilityReport,
    ) -> Option<u32> {
        match session.read_biometric(modality, sample).await {
            Ok(entries) => Some(entries.first().map_or(0, |e| e.artifact.version())),
            Err(SyncError::Unsupported(_)) => {
                debug!("{} does not support {}", session.addr(), modality);
                None
            }
            Err(e) => {
                warn!("{} probe on {} failed: {}", modality, session.addr(), e);
                report.fail(modality, e.to_string());
                None
            }
        }
    }
}
