//! Multi-device biometric reconciliation engine.
//!
//! Brings a group of attendance terminals, each holding its own divergent
//! copy of a shared user population, to a converged superset state without
//! ever removing a record any terminal holds.
//!
//! # Architecture
//!
//! ## Components
//!
//! - **Session**: per-device connection over two independent channels
//! - **Capability**: layered probe of fingerprint, face and photo support
//! - **Snapshot**: batched read of a device's users and enrollments
//! - **Election**: picks the richest device as the round's primary
//! - **Planner**: builds the union population and diffs every device against it
//! - **Executor**: applies plans in batches with retry and a round ledger
//! - **Aggregate**: folds per-device outcomes into a [`SyncResult`]
//!
//! ## Round
//!
//! 1. **Discovery**: open sessions, probe and snapshot every device concurrently
//! 2. **Planning**: once all devices settled, elect and plan (pure)
//! 3. **Execution**: push each plan to its device
//! 4. **Teardown**: close every session and aggregate
//!
//! Devices are matched only by [`IdentityKey`](fleetsync_types::IdentityKey).
//! Local ids are never copied between devices; new users always get an id
//! chosen by the receiving terminal.
//!
//! # Example
//!
//! ```
//! use fleetsync_engine::mock::{MockFleet, MockHardware, MockTerminal};
//! use fleetsync_engine::{SyncConfig, SyncEngine, SyncGroup};
//! use fleetsync_types::{AreaId, Device, DeviceAddr};
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let addr: DeviceAddr = "10.0.0.5".parse()?;
//! let fleet = MockFleet::new().with(addr, MockTerminal::new(MockHardware::default()));
//! let engine = SyncEngine::new(Arc::new(fleet), SyncConfig::default())?;
//!
//! let group = SyncGroup::new(AreaId(1), [Device::new(addr, AreaId(1))])?;
//! let result = engine.run_round(&group).await?;
//! println!("{} identities created", result.identities_created);
//! # Ok(())
//! # }
//! ```

mod aggregate;
mod cancel;
mod capability;
mod config;
mod election;
mod engine;
mod error;
mod executor;
mod group;
mod planner;
mod register;
mod retry;
mod session;
mod snapshot;
pub mod transport;

pub use transport::mock;

pub use aggregate::{DeviceOutcome, JobExecutionRecord, RoundMeta, RoundStatus, SyncResult, aggregate};
pub use cancel::CancelToken;
pub use capability::{CapabilityDetector, CapabilityReport, ProbeFailure};
pub use config::{ConflictPolicy, DEFAULT_SNAPSHOT_BATCH_SIZE, DEFAULT_WRITE_BATCH_SIZE, SyncConfig};
pub use election::{elect, weight};
pub use engine::SyncEngine;
pub use error::{EngineResult, SyncError};
pub use executor::{ExecutionReport, OperationFailure, PlanExecutor, RoundLedger};
pub use group::{SyncGroup, group_by_area};
pub use planner::{
    Operation, OperationKey, OperationKind, PlanSet, Planner, ReconciliationPlan, RecordRef,
    SkipReason, Skipped, SnapshotSet, UnionIdentity, UnionPopulation,
};
pub use register::{Candidate, Origin, Register};
pub use session::{ConnectionManager, Session};
pub use snapshot::{DeviceSnapshot, Snapshotter};
pub use transport::{
    BiometricChannel, BiometricEntry, DeviceConnector, FingerprintEntry, IdentityChannel, UserEntry,
};
