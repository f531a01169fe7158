use fleetsync_cli::{FleetFixture, load_config, load_snapshots, plan_snapshots, simulate};
use fleetsync_engine::{ConflictPolicy, DeviceSnapshot, Operation, RoundStatus};
use fleetsync_types::{
    AreaId, Artifact, CapabilitySet, DeviceAddr, DeviceLocalRecord, EnrollmentKey, IdentityKey,
    LocalId, Modality, Profile,
};
use pretty_assertions::assert_eq;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

fn write(dir: &TempDir, name: &str, contents: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, contents).unwrap();
    path
}

fn addr(s: &str) -> DeviceAddr {
    s.parse().unwrap()
}

const FLEET: &str = r#"{
  "devices": [
    {
      "addr": "10.0.0.1",
      "area": 1,
      "name": "Lobby",
      "records": [
        {
          "local_id": 8,
          "identity": "1001",
          "profile": { "name": "Alice", "privilege": "admin" },
          "enrollments": [
            { "modality": "fingerprint", "slot": 0, "data": "AQID", "version": 0 },
            { "modality": "face", "slot": 0, "data": "BAUG", "version": 0 }
          ]
        }
      ]
    },
    {
      "addr": "10.0.0.2",
      "area": 1,
      "hardware": { "face": false, "photo": false },
      "records": [
        { "local_id": 4, "identity": "1002", "profile": { "name": "Bob" } }
      ]
    },
    {
      "addr": "10.0.0.3",
      "area": 2,
      "faults": { "offline": true }
    }
  ]
}"#;

const FAST: &str = r#"
connect_timeout_ms = 1000
command_timeout_ms = 1000
retry_backoff_ms = 10
batch_pause_ms = 0
"#;

// ── Config ───────────────────────────────────────────────────────

#[test]
fn missing_config_uses_defaults() {
    let config = load_config(None).unwrap();
    assert_eq!(config.write_batch_size, 10);
    assert_eq!(config.conflict_policy, ConflictPolicy::PrimaryFirst);
}

#[test]
fn toml_config_overrides_some_fields() {
    let dir = TempDir::new().unwrap();
    let path = write(
        &dir,
        "engine.toml",
        "write_batch_size = 5\nconflict_policy = \"recency_first\"\n",
    );

    let config = load_config(Some(&path)).unwrap();

    assert_eq!(config.write_batch_size, 5);
    assert_eq!(config.conflict_policy, ConflictPolicy::RecencyFirst);
    assert_eq!(config.snapshot_batch_size, 50);
}

#[test]
fn invalid_config_is_rejected() {
    let dir = TempDir::new().unwrap();
    let zero = write(&dir, "zero.toml", "max_concurrency = 0\n");
    let garbled = write(&dir, "garbled.toml", "write_batch_size = \"many\"\n");

    assert!(load_config(Some(&zero)).is_err());
    assert!(load_config(Some(&garbled)).is_err());
    assert!(load_config(Some(&dir.path().join("absent.toml"))).is_err());
}

// ── Plan ─────────────────────────────────────────────────────────

fn snapshot(device: &str, records: Vec<DeviceLocalRecord>) -> DeviceSnapshot {
    let mut snapshot = DeviceSnapshot::new(addr(device), CapabilitySet::full(0));
    for record in records {
        snapshot.records.insert(record.local_id, record);
    }
    snapshot
}

fn alice() -> DeviceLocalRecord {
    DeviceLocalRecord::new(LocalId(8), IdentityKey::new("1001").unwrap(), Profile::named("Alice"))
        .with_enrollment(
            EnrollmentKey::fingerprint(0).unwrap(),
            Artifact::new(Modality::Fingerprint, vec![1, 2, 3], 0).unwrap(),
        )
}

#[test]
fn plans_missing_identities_from_snapshot_file() {
    let dir = TempDir::new().unwrap();
    let snapshots = vec![snapshot("10.0.0.1", vec![alice()]), snapshot("10.0.0.2", vec![])];
    let path = write(&dir, "snapshots.json", &serde_json::to_string(&snapshots).unwrap());

    let loaded = load_snapshots(&path).unwrap();
    let report = plan_snapshots(&loaded, &load_config(None).unwrap());

    assert_eq!(report.primary, Some(addr("10.0.0.1")));
    assert_eq!(report.union_identities, 1);
    assert_eq!(report.operations, 2);

    let plan = report
        .plans
        .iter()
        .find(|p| p.device == addr("10.0.0.2"))
        .unwrap();
    assert!(matches!(plan.operations[0], Operation::CreateIdentity { .. }));
    assert!(matches!(plan.operations[1], Operation::AddEnrollment { .. }));
    assert!(report.plans.iter().find(|p| p.device == addr("10.0.0.1")).unwrap().is_empty());
}

#[test]
fn plan_report_is_json() {
    let snapshots = [snapshot("10.0.0.1", vec![alice()]), snapshot("10.0.0.2", vec![])]
        .into_iter()
        .map(|s| (s.device, s))
        .collect();
    let report = plan_snapshots(&snapshots, &load_config(None).unwrap());

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["operations"], 2);
    assert_eq!(json["plans"][1]["operations"][0]["op"], "create_identity");
}

#[test]
fn duplicate_snapshot_is_rejected() {
    let dir = TempDir::new().unwrap();
    let snapshots = vec![snapshot("10.0.0.1", vec![]), snapshot("10.0.0.1", vec![alice()])];
    let path = write(&dir, "snapshots.json", &serde_json::to_string(&snapshots).unwrap());

    let err = load_snapshots(&path).unwrap_err();
    assert!(err.to_string().contains("appears twice"));
}

#[test]
fn empty_template_in_snapshot_file_is_rejected() {
    let dir = TempDir::new().unwrap();
    let mut json = serde_json::to_value(vec![snapshot("10.0.0.1", vec![alice()])]).unwrap();
    json[0]["records"]["8"]["enrollments"][0]["data"] = "".into();
    let path = write(&dir, "snapshots.json", &json.to_string());

    let err = load_snapshots(&path).unwrap_err();
    assert!(format!("{err:#}").contains("empty template"));
}

// ── Simulate ─────────────────────────────────────────────────────

#[test]
fn fixture_builds_terminals_and_inventory() {
    let dir = TempDir::new().unwrap();
    let fixture = FleetFixture::load(&write(&dir, "fleet.json", FLEET)).unwrap();

    let (fleet, inventory) = fixture.build().unwrap();

    assert_eq!(inventory.len(), 3);
    assert_eq!(inventory[0].label(), "Lobby (10.0.0.1:4370)");
    let lobby = fleet.terminal(&addr("10.0.0.1")).unwrap();
    assert_eq!(lobby.enrollment_count(), 2);
    assert!(fleet.terminal(&addr("10.0.0.3")).is_some());
}

#[tokio::test]
async fn simulates_one_area() {
    let dir = TempDir::new().unwrap();
    let fixture = FleetFixture::load(&write(&dir, "fleet.json", FLEET)).unwrap();
    let config = load_config(Some(&write(&dir, "engine.toml", FAST))).unwrap();

    let result = simulate(&fixture, config, Some(AreaId(1))).await.unwrap();

    assert_eq!(result.status, RoundStatus::Completed);
    assert_eq!(result.primary, Some(addr("10.0.0.1")));
    assert_eq!(result.union_identities, 2);
    assert_eq!(result.identities_created, 2);
    // The fingerprint-only terminal gets Alice's finger but not her face.
    assert_eq!(result.enrollments(Modality::Fingerprint), 1);
    assert_eq!(result.enrollments(Modality::Face), 0);
}

#[tokio::test]
async fn offline_area_is_partial() {
    let dir = TempDir::new().unwrap();
    let fixture = FleetFixture::load(&write(&dir, "fleet.json", FLEET)).unwrap();
    let config = load_config(Some(&write(&dir, "engine.toml", FAST))).unwrap();

    let result = simulate(&fixture, config, Some(AreaId(2))).await.unwrap();

    assert_eq!(result.status, RoundStatus::Partial);
    assert_eq!(result.failed_connections, vec![addr("10.0.0.3")]);
}

#[tokio::test]
async fn multi_area_fleet_needs_an_area() {
    let dir = TempDir::new().unwrap();
    let fixture = FleetFixture::load(&write(&dir, "fleet.json", FLEET)).unwrap();

    let err = simulate(&fixture, load_config(None).unwrap(), None).await.unwrap_err();
    assert!(err.to_string().contains("pass --area"));

    let err = simulate(&fixture, load_config(None).unwrap(), Some(AreaId(9)))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("no devices"));
}

#[tokio::test]
async fn job_record_wraps_the_result() {
    let dir = TempDir::new().unwrap();
    let fixture = FleetFixture::load(&write(&dir, "fleet.json", FLEET)).unwrap();
    let config = load_config(Some(&write(&dir, "engine.toml", FAST))).unwrap();

    let result = simulate(&fixture, config, Some(AreaId(1))).await.unwrap();
    let record = result.to_job_record("nightly-1", "fleet-sync").unwrap();

    assert_eq!(record.job_id, "nightly-1");
    assert_eq!(record.round_id, result.round_id);
    assert_eq!(record.result_data["identities_created"], 2);
}
