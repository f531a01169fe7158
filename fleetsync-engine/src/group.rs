//! Device groups.

use fleetsync_types::{AreaId, Device};
use std::collections::{BTreeMap, HashSet};
use tracing::warn;

use crate::error::{EngineResult, SyncError};

/// The devices of one area reconciled together in a round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncGroup {
    area: AreaId,
    devices: Vec<Device>,
}

impl SyncGroup {
    /// Validates a group. Duplicate addresses are collapsed, keeping the
    /// first entry.
    pub fn new(area: AreaId, devices: impl IntoIterator<Item = Device>) -> EngineResult<Self> {
        let mut seen = HashSet::new();
        let mut kept = Vec::new();
        for device in devices {
            if device.area != area {
                return Err(SyncError::Config(format!(
                    "device {} belongs to {}, not {}",
                    device.addr, device.area, area
                )));
            }
            if !seen.insert(device.addr) {
                warn!("Device {} listed twice in {}; ignoring duplicate", device.addr, area);
                continue;
            }
            kept.push(device);
        }
        if kept.is_empty() {
            return Err(SyncError::Config(format!("{area} has no devices")));
        }
        Ok(Self { area, devices: kept })
    }

    pub fn area(&self) -> AreaId {
        self.area
    }

    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

/// Partitions an inventory into one group per area.
pub fn group_by_area(inventory: impl IntoIterator<Item = Device>) -> EngineResult<BTreeMap<AreaId, SyncGroup>> {
    let mut by_area: BTreeMap<AreaId, Vec<Device>> = BTreeMap::new();
    for device in inventory {
        by_area.entry(device.area).or_default().push(device);
    }
    by_area
        .into_iter()
        .map(|(area, devices)| Ok((area, SyncGroup::new(area, devices)?)))
        .collect()
}
