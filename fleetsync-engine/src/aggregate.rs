//! Round results.
//!
//! Aggregation is pure summation over per-device outcomes. A device that
//! failed entirely still gets an outcome, with zero counts and the failure
//! recorded.

use chrono::{DateTime, Utc};
use fleetsync_types::{AreaId, CapabilitySet, Device, DeviceAddr, IdentityKey, Modality, Reachability};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::capability::{CapabilityReport, ProbeFailure};
use crate::error::EngineResult;
use crate::executor::{ExecutionReport, OperationFailure};
use crate::planner::ReconciliationPlan;
use crate::snapshot::DeviceSnapshot;

/// Overall status of a round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundStatus {
    /// Every device reconciled with no failures.
    Completed,
    /// Some device, identity or operation failed.
    Partial,
    /// Cancelled by the caller.
    Cancelled,
}

impl std::fmt::Display for RoundStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RoundStatus::Completed => write!(f, "completed"),
            RoundStatus::Partial => write!(f, "partial"),
            RoundStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// What happened to one device during a round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceOutcome {
    pub device: DeviceAddr,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub reachability: Reachability,
    pub primary: bool,
    /// Why the device could not take part, if it could not.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<CapabilitySet>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub capability_failures: Vec<ProbeFailure>,
    pub identities_before: usize,
    pub enrollments_before: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub omitted_identities: Vec<IdentityKey>,
    pub planned_operations: usize,
    pub skipped_enrollments: usize,
    pub identities_created: usize,
    pub profiles_updated: usize,
    pub enrollments_added: BTreeMap<Modality, usize>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<OperationFailure>,
}

impl DeviceOutcome {
    /// Outcome of a device nothing has happened to yet.
    pub fn new(device: &Device) -> Self {
        Self {
            device: device.addr,
            name: device.name.clone(),
            reachability: Reachability::Unknown,
            primary: false,
            error: None,
            capabilities: None,
            capability_failures: Vec::new(),
            identities_before: 0,
            enrollments_before: 0,
            omitted_identities: Vec::new(),
            planned_operations: 0,
            skipped_enrollments: 0,
            identities_created: 0,
            profiles_updated: 0,
            enrollments_added: BTreeMap::new(),
            failures: Vec::new(),
        }
    }

    /// The device could not be connected or stopped answering.
    pub fn mark_unreachable(&mut self, error: impl Into<String>) {
        self.reachability = Reachability::Offline;
        self.error = Some(error.into());
    }

    pub fn record_capabilities(&mut self, report: &CapabilityReport) {
        self.reachability = Reachability::Online;
        self.capabilities = Some(report.capabilities);
        self.capability_failures = report.failures.clone();
    }

    pub fn record_snapshot(&mut self, snapshot: &DeviceSnapshot) {
        self.capabilities = Some(snapshot.capabilities);
        self.identities_before = snapshot.identity_count();
        self.enrollments_before = snapshot.enrollment_count();
        self.omitted_identities = snapshot.omitted.clone();
    }

    pub fn record_plan(&mut self, plan: &ReconciliationPlan) {
        self.planned_operations = plan.len();
        self.skipped_enrollments = plan.skipped.len();
    }

    pub fn record_execution(&mut self, report: ExecutionReport) {
        self.identities_created += report.identities_created;
        self.profiles_updated += report.profiles_updated;
        for (modality, count) in report.enrollments_added {
            *self.enrollments_added.entry(modality).or_default() += count;
        }
        self.failures.extend(report.failures);
    }

    /// Whether the device took part in the round.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.reachability == Reachability::Online && self.error.is_none()
    }

    #[must_use]
    pub fn total_enrollments_added(&self) -> usize {
        self.enrollments_added.values().sum()
    }
}

/// Round bookkeeping known before any device outcome.
#[derive(Debug, Clone)]
pub struct RoundMeta {
    pub round_id: Uuid,
    pub area: AreaId,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub primary: Option<DeviceAddr>,
    pub union_identities: usize,
    pub cancelled: bool,
}

/// Per-round output handed to the orchestration layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncResult {
    pub round_id: Uuid,
    pub area: AreaId,
    pub status: RoundStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub primary: Option<DeviceAddr>,
    pub union_identities: usize,
    pub identities_created: usize,
    pub profiles_updated: usize,
    pub enrollments_added: BTreeMap<Modality, usize>,
    pub failed_operations: usize,
    pub failed_connections: Vec<DeviceAddr>,
    pub failed_capability_checks: Vec<DeviceAddr>,
    /// Probed capabilities of every connected device, for audit.
    pub capabilities: BTreeMap<DeviceAddr, CapabilitySet>,
    pub devices: BTreeMap<DeviceAddr, DeviceOutcome>,
}

impl SyncResult {
    /// Outcome of one device.
    pub fn device(&self, addr: &DeviceAddr) -> Option<&DeviceOutcome> {
        self.devices.get(addr)
    }

    /// Enrollments added for one modality across the group.
    #[must_use]
    pub fn enrollments(&self, modality: Modality) -> usize {
        self.enrollments_added.get(&modality).copied().unwrap_or(0)
    }

    /// Record for the job-execution audit table.
    pub fn to_job_record(&self, job_id: impl Into<String>, job_name: impl Into<String>) -> EngineResult<JobExecutionRecord> {
        Ok(JobExecutionRecord {
            job_id: job_id.into(),
            job_name: job_name.into(),
            round_id: self.round_id,
            started_at: self.started_at,
            finished_at: self.finished_at,
            status: self.status,
            result_data: serde_json::to_value(self)?,
        })
    }
}

/// One row of the job-execution audit table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobExecutionRecord {
    pub job_id: String,
    pub job_name: String,
    pub round_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub status: RoundStatus,
    pub result_data: serde_json::Value,
}

/// Sums device outcomes into a round result.
pub fn aggregate(meta: RoundMeta, outcomes: impl IntoIterator<Item = DeviceOutcome>) -> SyncResult {
    let mut result = SyncResult {
        round_id: meta.round_id,
        area: meta.area,
        status: RoundStatus::Completed,
        started_at: meta.started_at,
        finished_at: chrono::Duration::try_milliseconds(i64::try_from(meta.elapsed_ms).unwrap_or(i64::MAX))
            .and_then(|elapsed| meta.started_at.checked_add_signed(elapsed))
            .unwrap_or(DateTime::<Utc>::MAX_UTC),
        elapsed_ms: meta.elapsed_ms,
        primary: meta.primary,
        union_identities: meta.union_identities,
        identities_created: 0,
        profiles_updated: 0,
        enrollments_added: BTreeMap::new(),
        failed_operations: 0,
        failed_connections: Vec::new(),
        failed_capability_checks: Vec::new(),
        capabilities: BTreeMap::new(),
        devices: BTreeMap::new(),
    };

    let mut degraded = false;
    for mut outcome in outcomes {
        outcome.primary = meta.primary == Some(outcome.device);
        result.identities_created += outcome.identities_created;
        result.profiles_updated += outcome.profiles_updated;
        for (modality, count) in &outcome.enrollments_added {
            *result.enrollments_added.entry(*modality).or_default() += count;
        }
        result.failed_operations += outcome.failures.len();
        if !outcome.is_connected() {
            result.failed_connections.push(outcome.device);
        }
        if !outcome.capability_failures.is_empty() {
            result.failed_capability_checks.push(outcome.device);
        }
        if let (true, Some(caps)) = (outcome.is_connected(), outcome.capabilities) {
            result.capabilities.insert(outcome.device, caps);
        }
        degraded |= !outcome.is_connected()
            || !outcome.failures.is_empty()
            || !outcome.omitted_identities.is_empty();
        result.devices.insert(outcome.device, outcome);
    }
    result.failed_connections.sort();
    result.failed_capability_checks.sort();

    result.status = if meta.cancelled {
        RoundStatus::Cancelled
    } else if degraded {
        RoundStatus::Partial
    } else {
        RoundStatus::Completed
    };
    result
}
