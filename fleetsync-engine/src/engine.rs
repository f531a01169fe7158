//! Sync engine: runs reconciliation rounds for one area at a time.
//!
//! A round has two fan-out phases separated by a barrier:
//!
//! 1. **Discovery**: per device, open a session, probe capabilities and read
//!    a snapshot. Devices are processed concurrently up to the configured cap.
//! 2. **Planning** (barrier): once every device has settled, elect the
//!    primary, build the union population and plan every device.
//! 3. **Execution**: per device, apply its plan through the still-open
//!    session.
//!
//! Sessions are closed at the end of the round whatever happened. No device
//! failure escapes a round; only configuration errors and a concurrent round
//! on the same area are returned as errors, and both before any device I/O.

use chrono::Utc;
use fleetsync_types::{AreaId, Device, DeviceAddr};
use futures::stream::{self, StreamExt};
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::aggregate::{DeviceOutcome, RoundMeta, SyncResult, aggregate};
use crate::cancel::CancelToken;
use crate::capability::CapabilityDetector;
use crate::config::SyncConfig;
use crate::election::elect;
use crate::error::{EngineResult, SyncError};
use crate::executor::{ExecutionReport, PlanExecutor, RoundLedger};
use crate::group::SyncGroup;
use crate::planner::{Planner, SnapshotSet};
use crate::session::{ConnectionManager, Session};
use crate::snapshot::{DeviceSnapshot, Snapshotter};
use crate::transport::DeviceConnector;

/// Per-device state carried from discovery to the end of the round.
struct Participant {
    session: Option<Session>,
    snapshot: Option<DeviceSnapshot>,
    outcome: DeviceOutcome,
}

/// Releases an area when its round ends, however it ends.
struct AreaGuard<'a> {
    active: &'a Mutex<HashSet<AreaId>>,
    area: AreaId,
}

impl<'a> AreaGuard<'a> {
    fn acquire(active: &'a Mutex<HashSet<AreaId>>, area: AreaId) -> EngineResult<Self> {
        let mut areas = active.lock().unwrap_or_else(PoisonError::into_inner);
        if !areas.insert(area) {
            return Err(SyncError::RoundInProgress(area));
        }
        Ok(Self { active, area })
    }
}

impl Drop for AreaGuard<'_> {
    fn drop(&mut self) {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.area);
    }
}

/// Runs sync rounds against terminals reached through a connector.
pub struct SyncEngine {
    config: SyncConfig,
    connections: ConnectionManager,
    detector: CapabilityDetector,
    snapshotter: Snapshotter,
    planner: Planner,
    active_areas: Mutex<HashSet<AreaId>>,
}

impl SyncEngine {
    /// Creates an engine. Fails on an invalid configuration.
    pub fn new(connector: Arc<dyn DeviceConnector>, config: SyncConfig) -> EngineResult<Self> {
        config.validate()?;
        Ok(Self {
            connections: ConnectionManager::new(connector, config.clone()),
            detector: CapabilityDetector::new(config.probe_batch_size),
            snapshotter: Snapshotter::new(config.clone()),
            planner: Planner::new(config.conflict_policy),
            config,
            active_areas: Mutex::new(HashSet::new()),
        })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Whether a round for `area` is running.
    pub fn is_running(&self, area: AreaId) -> bool {
        self.active_areas
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&area)
    }

    /// Runs one round for a group.
    pub async fn run_round(&self, group: &SyncGroup) -> EngineResult<SyncResult> {
        self.run_round_with_cancel(group, &CancelToken::new()).await
    }

    /// Runs one round for a group, stopping early when `cancel` fires.
    pub async fn run_round_with_cancel(&self, group: &SyncGroup, cancel: &CancelToken) -> EngineResult<SyncResult> {
        if group.len() > self.config.max_group_size {
            return Err(SyncError::Config(format!(
                "{} has {} devices; at most {} per round",
                group.area(),
                group.len(),
                self.config.max_group_size
            )));
        }
        let _guard = AreaGuard::acquire(&self.active_areas, group.area())?;

        let round_id = Uuid::now_v7();
        let started_at = Utc::now();
        let clock = Instant::now();
        info!(
            "Round {} starting for {} ({} devices)",
            round_id,
            group.area(),
            group.len()
        );

        // ── Discovery ────────────────────────────────────────────
        let mut participants: BTreeMap<DeviceAddr, Participant> = stream::iter(group.devices())
            .map(|device| async move { (device.addr, self.discover(device).await) })
            .buffer_unordered(self.config.max_concurrency)
            .collect()
            .await;

        let mut primary = None;
        let mut union_identities = 0;

        // ── Planning ─────────────────────────────────────────────
        if cancel.is_cancelled() {
            info!("Round {} cancelled before planning", round_id);
        } else {
            let snapshots: SnapshotSet = participants
                .iter()
                .filter_map(|(addr, p)| p.snapshot.clone().map(|s| (*addr, s)))
                .collect();
            primary = elect(snapshots.values());
            if let Some(addr) = primary {
                info!("Primary for {}: {}", group.area(), addr);
            }
            let plan_set = self.planner.plan(&snapshots, primary);
            union_identities = plan_set.union.len();
            info!(
                "Union of {} identities ({} enrollments); {} operations planned",
                plan_set.union.len(),
                plan_set.union.enrollment_count(),
                plan_set.operation_count()
            );
            for (addr, plan) in &plan_set.plans {
                if let Some(p) = participants.get_mut(addr) {
                    p.outcome.record_plan(plan);
                }
            }

            // ── Execution ────────────────────────────────────────
            if cancel.is_cancelled() {
                info!("Round {} cancelled before execution", round_id);
            } else {
                let executor = PlanExecutor::new(self.config.clone(), Arc::new(RoundLedger::new()));
                let reports: Vec<(DeviceAddr, ExecutionReport, bool)> = stream::iter(participants.iter())
                    .filter_map(|(addr, p)| {
                        let work = match (&p.session, plan_set.plans.get(addr)) {
                            (Some(session), Some(plan)) if !plan.is_empty() => Some((session, plan)),
                            _ => None,
                        };
                        futures::future::ready(work)
                    })
                    .map(|(session, plan)| {
                        let executor = &executor;
                        async move {
                            let report = executor.execute(session, plan, cancel).await;
                            (session.addr(), report, session.is_unreachable())
                        }
                    })
                    .buffer_unordered(self.config.max_concurrency)
                    .collect()
                    .await;
                for (addr, report, lost) in reports {
                    if let Some(p) = participants.get_mut(&addr) {
                        p.outcome.record_execution(report);
                        if lost {
                            warn!("{} stopped answering during execution", addr);
                            p.outcome.mark_unreachable("device stopped answering during execution");
                        }
                    }
                }
            }
        }

        // ── Teardown ─────────────────────────────────────────────
        let sessions: Vec<Session> = participants
            .values_mut()
            .filter_map(|p| p.session.take())
            .collect();
        futures::future::join_all(sessions.into_iter().map(|s| self.connections.close(s))).await;

        let meta = RoundMeta {
            round_id,
            area: group.area(),
            started_at,
            elapsed_ms: u64::try_from(clock.elapsed().as_millis()).unwrap_or(u64::MAX),
            primary,
            union_identities,
            cancelled: cancel.is_cancelled(),
        };
        let result = aggregate(meta, participants.into_values().map(|p| p.outcome));
        info!(
            round_id = %result.round_id,
            area = %result.area,
            status = %result.status,
            identities_created = result.identities_created,
            enrollments_added = result.enrollments_added.values().sum::<usize>(),
            failed_connections = result.failed_connections.len(),
            failed_operations = result.failed_operations,
            elapsed_ms = result.elapsed_ms,
            "Round finished"
        );
        Ok(result)
    }

    /// Connects, probes and snapshots one device within its deadline.
    async fn discover(&self, device: &Device) -> Participant {
        let mut outcome = DeviceOutcome::new(device);
        let session = match self.connections.open(device).await {
            Ok(session) => session,
            Err(e) => {
                warn!("{} unreachable this round: {}", device.label(), e);
                outcome.mark_unreachable(e.to_string());
                return Participant {
                    session: None,
                    snapshot: None,
                    outcome,
                };
            }
        };

        let work = async {
            let report = self.detector.probe(&session).await;
            let snapshot = self.snapshotter.snapshot(&session, report.capabilities).await;
            (report, snapshot)
        };
        let snapshot = match tokio::time::timeout(self.config.device_timeout(), work).await {
            Ok((report, Ok(snapshot))) => {
                outcome.record_capabilities(&report);
                outcome.record_snapshot(&snapshot);
                Some(snapshot)
            }
            Ok((report, Err(e))) => {
                outcome.record_capabilities(&report);
                warn!("Snapshot of {} failed: {}; excluded from this round", device.label(), e);
                outcome.mark_unreachable(format!("snapshot failed: {e}"));
                None
            }
            Err(_) => {
                warn!("{} exceeded its deadline during discovery", device.label());
                session.mark_unreachable();
                outcome.mark_unreachable("device timed out");
                None
            }
        };

        if snapshot.is_none() {
            self.connections.close(session).await;
            return Participant {
                session: None,
                snapshot: None,
                outcome,
            };
        }
        debug!("{} ready for planning", device.label());
        Participant {
            session: Some(session),
            snapshot,
            outcome,
        }
    }
}
