//! Plan execution.
//!
//! A plan runs in two phases. Identity operations (creates and profile
//! updates) go first because enrollments of a new identity need the local id
//! the device assigns. Enrollments then run in two lanes, fingerprints on the
//! identity channel and face/photo on the auxiliary channel, concurrently.
//!
//! Every lane writes in small batches with a pause between them. Each
//! operation is retried on its own; a failure is recorded and the batch goes
//! on. Operations already confirmed on the device this round are not issued
//! again.

use fleetsync_types::{DeviceAddr, EnrollmentKey, IdentityKey, LocalId, Modality};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::config::SyncConfig;
use crate::error::{EngineResult, SyncError};
use crate::planner::{Operation, OperationKey, OperationKind, ReconciliationPlan, RecordRef};
use crate::retry::with_retry;
use crate::session::Session;

/// Operations confirmed per device within one round.
#[derive(Debug, Default)]
pub struct RoundLedger {
    confirmed: Mutex<HashMap<(DeviceAddr, OperationKey), Option<LocalId>>>,
}

impl RoundLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `key` was already confirmed on `device`.
    pub fn is_confirmed(&self, device: DeviceAddr, key: &OperationKey) -> bool {
        self.lock().contains_key(&(device, key.clone()))
    }

    /// Local id recorded for a confirmed create.
    pub fn created_id(&self, device: DeviceAddr, identity: &IdentityKey) -> Option<LocalId> {
        self.lock()
            .get(&(device, OperationKey::Create(identity.clone())))
            .copied()
            .flatten()
    }

    pub fn confirm(&self, device: DeviceAddr, key: OperationKey, local_id: Option<LocalId>) {
        self.lock().insert((device, key), local_id);
    }

    /// Confirmed operations across all devices.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<(DeviceAddr, OperationKey), Option<LocalId>>> {
        self.confirmed.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// An operation that did not take effect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationFailure {
    pub identity: IdentityKey,
    pub operation: OperationKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<EnrollmentKey>,
    pub reason: String,
}

impl OperationFailure {
    fn new(op: &Operation, reason: impl Into<String>) -> Self {
        let key = match op {
            Operation::AddEnrollment { key, .. } => Some(*key),
            _ => None,
        };
        Self {
            identity: op.identity().clone(),
            operation: op.kind(),
            key,
            reason: reason.into(),
        }
    }
}

/// Outcome of executing one plan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub planned: usize,
    pub identities_created: usize,
    pub profiles_updated: usize,
    pub enrollments_added: BTreeMap<Modality, usize>,
    /// Skipped because the ledger already had them.
    pub already_confirmed: usize,
    /// Left unissued because the round was cancelled.
    pub not_attempted: usize,
    pub failures: Vec<OperationFailure>,
    pub cancelled: bool,
    /// Local ids the device assigned to identities created in this plan.
    pub created_ids: BTreeMap<IdentityKey, LocalId>,
}

impl ExecutionReport {
    /// Enrollments added across all modalities.
    #[must_use]
    pub fn total_enrollments(&self) -> usize {
        self.enrollments_added.values().sum()
    }

    fn merge(&mut self, other: ExecutionReport) {
        self.identities_created += other.identities_created;
        self.profiles_updated += other.profiles_updated;
        for (modality, count) in other.enrollments_added {
            *self.enrollments_added.entry(modality).or_default() += count;
        }
        self.already_confirmed += other.already_confirmed;
        self.not_attempted += other.not_attempted;
        self.failures.extend(other.failures);
        self.cancelled |= other.cancelled;
        self.created_ids.extend(other.created_ids);
    }
}

/// Applies plans through sessions.
#[derive(Debug, Clone)]
pub struct PlanExecutor {
    config: SyncConfig,
    ledger: Arc<RoundLedger>,
}

impl PlanExecutor {
    pub fn new(config: SyncConfig, ledger: Arc<RoundLedger>) -> Self {
        Self { config, ledger }
    }

    pub fn ledger(&self) -> &Arc<RoundLedger> {
        &self.ledger
    }

    /// Executes a plan against the session's device.
    ///
    /// Work stops at the device deadline or on cancellation; operations not
    /// issued by then are reported, never half-applied.
    pub async fn execute(&self, session: &Session, plan: &ReconciliationPlan, cancel: &CancelToken) -> ExecutionReport {
        let addr = session.addr();
        let deadline = Instant::now() + self.config.device_timeout();
        let mut report = ExecutionReport {
            planned: plan.len(),
            ..Default::default()
        };
        if plan.is_empty() {
            return report;
        }
        info!("Executing {} operations on {}", plan.len(), addr);

        let (identity_ops, enroll_ops): (Vec<&Operation>, Vec<&Operation>) = plan
            .operations
            .iter()
            .partition(|op| op.kind() != OperationKind::AddEnrollment);

        let phase1 = self
            .run_lane(session, &identity_ops, &BTreeMap::new(), cancel, deadline)
            .await;
        report.merge(phase1);

        let (fingerprints, biometrics): (Vec<&Operation>, Vec<&Operation>) = enroll_ops
            .into_iter()
            .partition(|op| op.modality() == Some(Modality::Fingerprint));
        let created = report.created_ids.clone();
        let (fp, bio) = tokio::join!(
            self.run_lane(session, &fingerprints, &created, cancel, deadline),
            self.run_lane(session, &biometrics, &created, cancel, deadline),
        );
        report.merge(fp);
        report.merge(bio);

        if report.failures.is_empty() {
            info!(
                "{}: {} created, {} updated, {} enrollments added",
                addr,
                report.identities_created,
                report.profiles_updated,
                report.total_enrollments()
            );
        } else {
            warn!(
                "{}: {} of {} operations failed",
                addr,
                report.failures.len(),
                report.planned
            );
        }
        report
    }

    async fn run_lane(
        &self,
        session: &Session,
        ops: &[&Operation],
        created: &BTreeMap<IdentityKey, LocalId>,
        cancel: &CancelToken,
        deadline: Instant,
    ) -> ExecutionReport {
        let addr = session.addr();
        let mut report = ExecutionReport::default();
        let batches: Vec<&[&Operation]> = ops.chunks(self.config.write_batch_size).collect();
        let total = batches.len();

        for (index, batch) in batches.into_iter().enumerate() {
            if index > 0 && !self.config.batch_pause().is_zero() {
                tokio::time::sleep(self.config.batch_pause()).await;
            }
            if cancel.is_cancelled() {
                report.cancelled = true;
                report.not_attempted += ops.len() - index * self.config.write_batch_size;
                info!("{}: cancelled with {} operations unissued", addr, report.not_attempted);
                break;
            }
            for op in batch {
                if Instant::now() >= deadline && !session.is_unreachable() {
                    warn!("{}: device deadline exceeded; remaining operations fail", addr);
                    session.mark_unreachable();
                }
                self.apply(session, op, created, &mut report).await;
            }
            debug!("{}: batch {}/{} done", addr, index + 1, total);
        }
        report
    }

    async fn apply(
        &self,
        session: &Session,
        op: &Operation,
        created: &BTreeMap<IdentityKey, LocalId>,
        report: &mut ExecutionReport,
    ) {
        let addr = session.addr();
        let key = op.key();
        if self.ledger.is_confirmed(addr, &key) {
            report.already_confirmed += 1;
            if let (Operation::CreateIdentity { identity, .. }, Some(id)) =
                (op, self.ledger.created_id(addr, op.identity()))
            {
                report.created_ids.insert(identity.clone(), id);
            }
            return;
        }

        let attempts = self.config.operation_retries + 1;
        let result = match op {
            Operation::CreateIdentity { identity, profile } => {
                with_retry(&self.config, attempts, addr, "create identity", || {
                    session.upsert_user(identity, profile)
                })
                .await
                .map(Some)
            }
            Operation::UpdateProfile {
                local_id, profile, ..
            } => with_retry(&self.config, attempts, addr, "update profile", || {
                session.update_profile(*local_id, profile)
            })
            .await
            .map(|()| None),
            Operation::AddEnrollment {
                identity,
                target,
                key,
                artifact,
                ..
            } => match key.modality() {
                Modality::Fingerprint => match self.resolve(addr, identity, *target, created) {
                    Ok(local_id) => with_retry(&self.config, attempts, addr, "write fingerprint", || {
                        session.write_fingerprint(local_id, key.slot(), artifact)
                    })
                    .await
                    .map(|()| None),
                    Err(e) => Err(e),
                },
                modality => match self.resolve(addr, identity, *target, created) {
                    Ok(_) => with_retry(&self.config, attempts, addr, "write biometric", || {
                        session.write_biometric(modality, identity, key.slot(), artifact)
                    })
                    .await
                    .map(|()| None),
                    Err(e) => Err(e),
                },
            },
        };

        match result {
            Ok(local_id) => {
                self.ledger.confirm(addr, key, local_id);
                match op {
                    Operation::CreateIdentity { identity, .. } => {
                        report.identities_created += 1;
                        if let Some(id) = local_id {
                            debug!("{}: created {} as {}", addr, identity, id);
                            report.created_ids.insert(identity.clone(), id);
                        }
                    }
                    Operation::UpdateProfile { .. } => report.profiles_updated += 1,
                    Operation::AddEnrollment { key, .. } => {
                        *report.enrollments_added.entry(key.modality()).or_default() += 1;
                    }
                }
            }
            Err(e) => {
                warn!("{}: {:?} for {} failed: {}", addr, op.kind(), op.identity(), e);
                report.failures.push(OperationFailure::new(op, e.to_string()));
            }
        }
    }

    /// Local id an enrollment targets. New identities must have been created
    /// earlier in this plan (or this round).
    fn resolve(
        &self,
        addr: DeviceAddr,
        identity: &IdentityKey,
        target: RecordRef,
        created: &BTreeMap<IdentityKey, LocalId>,
    ) -> EngineResult<LocalId> {
        match target {
            RecordRef::Existing(id) => Ok(id),
            RecordRef::Created => created
                .get(identity)
                .copied()
                .or_else(|| self.ledger.created_id(addr, identity))
                .ok_or_else(|| SyncError::Rejected(format!("dependency failed: {identity} was not created"))),
        }
    }
}
