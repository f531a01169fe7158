//! Shared fixtures for engine tests.

#![allow(dead_code)]

use fleetsync_engine::mock::{MockFleet, MockHardware, MockTerminal};
use fleetsync_engine::{DeviceSnapshot, SyncConfig, SyncEngine, SyncGroup};
use fleetsync_types::{
    AreaId, Artifact, CapabilitySet, Device, DeviceAddr, DeviceLocalRecord, EnrollmentKey,
    IdentityKey, LocalId, Modality, Profile,
};
use std::sync::Arc;

pub const AREA: AreaId = AreaId(1);

/// Address `10.0.0.<n>:4370`.
pub fn addr(n: u8) -> DeviceAddr {
    format!("10.0.0.{n}").parse().unwrap()
}

pub fn ident(key: &str) -> IdentityKey {
    IdentityKey::new(key).unwrap()
}

pub fn device(n: u8) -> Device {
    Device::new(addr(n), AREA)
}

/// Fingerprint template filled with `byte`.
pub fn fp(byte: u8) -> Artifact {
    Artifact::new(Modality::Fingerprint, vec![byte; 32], 0).unwrap()
}

/// Face template filled with `byte`, of the given algorithm version.
pub fn face(byte: u8, version: u32) -> Artifact {
    Artifact::new(Modality::Face, vec![byte; 64], version).unwrap()
}

pub fn photo(byte: u8) -> Artifact {
    Artifact::new(Modality::Photo, vec![byte; 128], 0).unwrap()
}

pub fn finger(slot: u8) -> EnrollmentKey {
    EnrollmentKey::fingerprint(slot).unwrap()
}

/// Record with a named profile and no enrollments.
pub fn user(local_id: u16, key: &str, name: &str) -> DeviceLocalRecord {
    DeviceLocalRecord::new(LocalId(local_id), ident(key), Profile::named(name))
}

/// Config with short timeouts and no pauses.
pub fn fast_config() -> SyncConfig {
    SyncConfig {
        connect_timeout_ms: 1_000,
        command_timeout_ms: 1_000,
        device_timeout_ms: 30_000,
        retry_backoff_ms: 10,
        batch_pause_ms: 0,
        ..SyncConfig::default()
    }
}

pub fn engine(fleet: &MockFleet) -> SyncEngine {
    engine_with(fleet, fast_config())
}

pub fn engine_with(fleet: &MockFleet, config: SyncConfig) -> SyncEngine {
    SyncEngine::new(Arc::new(fleet.clone()), config).unwrap()
}

pub fn group(devices: &[u8]) -> SyncGroup {
    SyncGroup::new(AREA, devices.iter().map(|n| device(*n))).unwrap()
}

pub fn terminal(hardware: MockHardware, records: Vec<DeviceLocalRecord>) -> MockTerminal {
    records
        .into_iter()
        .fold(MockTerminal::new(hardware), MockTerminal::with_record)
}

pub fn snapshot(n: u8, caps: CapabilitySet, records: Vec<DeviceLocalRecord>) -> DeviceSnapshot {
    records
        .into_iter()
        .fold(DeviceSnapshot::new(addr(n), caps), DeviceSnapshot::with_record)
}
