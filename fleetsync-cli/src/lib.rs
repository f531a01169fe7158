//! File formats and commands behind the `fleetsync` binary.
//!
//! `plan` works on snapshot files and never touches a device. `simulate`
//! builds in-memory terminals from a fleet fixture and runs a full round
//! against them.

use anyhow::{Context, Result, bail};
use fleetsync_engine::mock::{FlagExposure, MockFaults, MockFleet, MockHardware, MockTerminal};
use fleetsync_engine::{
    DeviceSnapshot, Planner, ReconciliationPlan, SnapshotSet, SyncConfig, SyncEngine, SyncGroup,
    SyncResult, elect, group_by_area,
};
use fleetsync_types::{AreaId, Device, DeviceAddr, DeviceLocalRecord, IdentityKey};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

// ── Config ───────────────────────────────────────────────────────

/// Loads engine settings from a TOML file, or the defaults when none is given.
pub fn load_config(path: Option<&Path>) -> Result<SyncConfig> {
    let config = match path {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            toml::from_str::<SyncConfig>(&text)
                .with_context(|| format!("parsing config {}", path.display()))?
        }
        None => SyncConfig::default(),
    };
    config.validate()?;
    Ok(config)
}

// ── Plan ─────────────────────────────────────────────────────────

/// Reads a JSON array of device snapshots.
pub fn load_snapshots(path: &Path) -> Result<SnapshotSet> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("reading snapshots {}", path.display()))?;
    let list: Vec<DeviceSnapshot> = serde_json::from_str(&text)
        .with_context(|| format!("parsing snapshots {}", path.display()))?;

    let mut snapshots = SnapshotSet::new();
    for snapshot in list {
        let device = snapshot.device;
        if snapshots.insert(device, snapshot).is_some() {
            bail!("{} appears twice in {}", device, path.display());
        }
    }
    Ok(snapshots)
}

/// What `fleetsync plan` prints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanReport {
    pub primary: Option<DeviceAddr>,
    pub union_identities: usize,
    pub operations: usize,
    pub plans: Vec<ReconciliationPlan>,
}

/// Elects a primary and plans every snapshot against the union.
pub fn plan_snapshots(snapshots: &SnapshotSet, config: &SyncConfig) -> PlanReport {
    let primary = elect(snapshots.values());
    let plans = Planner::new(config.conflict_policy).plan(snapshots, primary);
    info!(
        "Planned {} operations across {} devices",
        plans.operation_count(),
        plans.plans.len()
    );
    PlanReport {
        primary,
        union_identities: plans.union.len(),
        operations: plans.operation_count(),
        plans: plans.plans.into_values().collect(),
    }
}

// ── Simulate ─────────────────────────────────────────────────────

/// A set of simulated terminals.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FleetFixture {
    pub devices: Vec<DeviceFixture>,
}

/// One simulated terminal and what it holds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceFixture {
    pub addr: DeviceAddr,
    pub area: AreaId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub hardware: HardwareFixture,
    #[serde(default)]
    pub faults: FaultFixture,
    #[serde(default)]
    pub records: Vec<DeviceLocalRecord>,
}

/// Terminal model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HardwareFixture {
    pub face: bool,
    pub photo: bool,
    pub face_version: u32,
    pub flags: FlagsFixture,
}

impl Default for HardwareFixture {
    fn default() -> Self {
        Self {
            face: true,
            photo: true,
            face_version: 0,
            flags: FlagsFixture::IdentityChannel,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagsFixture {
    #[default]
    IdentityChannel,
    BiometricChannel,
    Hidden,
}

/// Injected failures.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FaultFixture {
    pub offline: bool,
    pub biometric_down: bool,
    pub connect_failures: u32,
    pub hang_commands: bool,
    pub write_failures: u32,
    pub max_read_batch: Option<usize>,
    pub rejected_identities: Vec<IdentityKey>,
}

impl From<HardwareFixture> for MockHardware {
    fn from(hw: HardwareFixture) -> Self {
        let flags = match hw.flags {
            FlagsFixture::IdentityChannel => FlagExposure::IdentityChannel,
            FlagsFixture::BiometricChannel => FlagExposure::BiometricChannel,
            FlagsFixture::Hidden => FlagExposure::Hidden,
        };
        MockHardware {
            face: hw.face,
            photo: hw.photo,
            face_version: hw.face_version,
            flags,
        }
    }
}

impl FaultFixture {
    fn apply(&self, faults: &mut MockFaults) {
        faults.offline = self.offline;
        faults.biometric_down = self.biometric_down;
        faults.connect_failures = self.connect_failures;
        faults.hang_commands = self.hang_commands;
        faults.write_failures = self.write_failures;
        faults.max_read_batch = self.max_read_batch;
        faults.rejected_identities = self.rejected_identities.iter().cloned().collect();
    }
}

impl FleetFixture {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading fleet {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("parsing fleet {}", path.display()))
    }

    /// Builds the simulated terminals and the inventory that lists them.
    pub fn build(&self) -> Result<(MockFleet, Vec<Device>)> {
        let mut fleet = MockFleet::new();
        let mut inventory = Vec::with_capacity(self.devices.len());
        let mut seen = HashSet::new();

        for entry in &self.devices {
            if !seen.insert(entry.addr) {
                bail!("{} appears twice in the fleet", entry.addr);
            }
            let terminal = MockTerminal::new(entry.hardware.into());
            for record in &entry.records {
                terminal.insert_record(record.clone());
            }
            terminal.set_faults(|faults| entry.faults.apply(faults));
            debug!("Simulating {} with {} records", entry.addr, entry.records.len());
            fleet.insert(entry.addr, terminal);

            let device = Device::new(entry.addr, entry.area);
            inventory.push(match &entry.name {
                Some(name) => device.with_name(name.clone()),
                None => device,
            });
        }
        Ok((fleet, inventory))
    }
}

/// Picks the group to run. Without an explicit area the fleet must span one.
fn select_group(inventory: Vec<Device>, area: Option<AreaId>) -> Result<SyncGroup> {
    let mut groups = group_by_area(inventory)?;
    match area {
        Some(area) => groups
            .remove(&area)
            .with_context(|| format!("no devices in {area}")),
        None => {
            if groups.len() != 1 {
                let areas: Vec<String> = groups.keys().map(ToString::to_string).collect();
                bail!("fleet spans {} areas ({}); pass --area", areas.len(), areas.join(", "));
            }
            groups
                .into_values()
                .next()
                .context("fleet has no devices")
        }
    }
}

/// Runs one round over the simulated fleet.
pub async fn simulate(fixture: &FleetFixture, config: SyncConfig, area: Option<AreaId>) -> Result<SyncResult> {
    let (fleet, inventory) = fixture.build()?;
    let group = select_group(inventory, area)?;
    info!("Simulating round for {} ({} devices)", group.area(), group.len());

    let engine = SyncEngine::new(Arc::new(fleet), config)?;
    Ok(engine.run_round(&group).await?)
}
