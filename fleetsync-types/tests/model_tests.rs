use fleetsync_types::{
    AreaId, Artifact, CapabilitySet, Device, DeviceAddr, DeviceLocalRecord, EnrollmentKey,
    EnrollmentSet, IdentityKey, LocalId, Modality, Privilege, Profile, Reachability, Slot,
};
use pretty_assertions::assert_eq;

fn artifact(modality: Modality, bytes: &[u8]) -> Artifact {
    Artifact::new(modality, bytes.to_vec(), 0).unwrap()
}

// ── EnrollmentKey ─────────────────────────────────────────────────

#[test]
fn fingerprint_slots_cover_ten_fingers() {
    assert!(EnrollmentKey::fingerprint(0).is_ok());
    assert!(EnrollmentKey::fingerprint(9).is_ok());
    assert!(EnrollmentKey::fingerprint(10).is_err());
}

#[test]
fn face_and_photo_have_single_slot() {
    assert!(EnrollmentKey::new(Modality::Face, Slot(1)).is_err());
    assert!(EnrollmentKey::new(Modality::Photo, Slot(1)).is_err());
    assert_eq!(EnrollmentKey::face().slot(), Slot(0));
    assert_eq!(EnrollmentKey::photo().modality(), Modality::Photo);
}

#[test]
fn enrollment_key_display() {
    let key = EnrollmentKey::fingerprint(3).unwrap();
    assert_eq!(key.to_string(), "fingerprint[3]");
}

#[test]
fn enrollment_key_deserialize_validates_slot() {
    let bad: Result<EnrollmentKey, _> =
        serde_json::from_str(r#"{"modality":"face","slot":4}"#);
    assert!(bad.is_err());
    let good: EnrollmentKey = serde_json::from_str(r#"{"modality":"fingerprint","slot":4}"#).unwrap();
    assert_eq!(good, EnrollmentKey::fingerprint(4).unwrap());
}

// ── Artifact ──────────────────────────────────────────────────────

#[test]
fn artifact_rejects_empty_template() {
    assert!(Artifact::new(Modality::Face, Vec::new(), 7).is_err());
}

#[test]
fn artifact_digest_is_stable_and_short() {
    let a = artifact(Modality::Fingerprint, b"template-a");
    let b = artifact(Modality::Fingerprint, b"template-a");
    let c = artifact(Modality::Fingerprint, b"template-c");
    assert_eq!(a.digest(), b.digest());
    assert_ne!(a.digest(), c.digest());
    assert_eq!(a.digest().len(), 12);
}

#[test]
fn artifact_debug_hides_bytes() {
    let a = artifact(Modality::Photo, b"secret-bytes");
    let debug = format!("{a:?}");
    assert!(debug.contains("digest"));
    assert!(!debug.contains("secret"));
}

#[test]
fn artifact_version_compatibility() {
    let v7 = Artifact::new(Modality::Face, vec![1, 2], 7).unwrap();
    let unknown = Artifact::new(Modality::Face, vec![1, 2], 0).unwrap();
    assert!(v7.is_compatible_with(7));
    assert!(v7.is_compatible_with(0));
    assert!(!v7.is_compatible_with(8));
    assert!(unknown.is_compatible_with(8));
}

#[test]
fn artifact_serializes_base64() {
    let a = Artifact::new(Modality::Fingerprint, b"abc".to_vec(), 10).unwrap();
    let json = serde_json::to_value(&a).unwrap();
    assert_eq!(json["data"], "YWJj");
    assert_eq!(json["version"], 10);
    let back: Artifact = serde_json::from_value(json).unwrap();
    assert_eq!(back, a);
}

#[test]
fn artifact_with_empty_data_does_not_parse() {
    assert!(serde_json::from_str::<Artifact>(r#"{"data":""}"#).is_err());
    assert!(serde_json::from_str::<Artifact>(r#"{"data":"","version":2}"#).is_err());

    let ok: Artifact = serde_json::from_str(r#"{"data":"YWJj"}"#).unwrap();
    assert_eq!(ok.version(), 0);
}

// ── EnrollmentSet ─────────────────────────────────────────────────

#[test]
fn enrollment_set_counts_per_modality() {
    let mut set = EnrollmentSet::new();
    set.insert(EnrollmentKey::fingerprint(0).unwrap(), artifact(Modality::Fingerprint, b"f0"));
    set.insert(EnrollmentKey::fingerprint(1).unwrap(), artifact(Modality::Fingerprint, b"f1"));
    set.insert(EnrollmentKey::face(), artifact(Modality::Face, b"face"));

    assert_eq!(set.len(), 3);
    assert_eq!(set.count(Modality::Fingerprint), 2);
    assert_eq!(set.count(Modality::Face), 1);
    assert_eq!(set.count(Modality::Photo), 0);
    assert!(set.contains(&EnrollmentKey::face()));
}

#[test]
fn enrollment_set_serializes_as_list() {
    let set: EnrollmentSet = [
        (EnrollmentKey::face(), artifact(Modality::Face, b"face")),
        (EnrollmentKey::fingerprint(2).unwrap(), artifact(Modality::Fingerprint, b"f2")),
    ]
    .into_iter()
    .collect();

    let json = serde_json::to_value(&set).unwrap();
    let entries = json.as_array().unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0]["modality"], "fingerprint");
    assert_eq!(entries[0]["slot"], 2);

    let back: EnrollmentSet = serde_json::from_value(json).unwrap();
    assert_eq!(back, set);
}

// ── Profile / record ──────────────────────────────────────────────

#[test]
fn privilege_codes() {
    for p in [Privilege::User, Privilege::Enroller, Privilege::Manager, Privilege::Admin] {
        assert_eq!(Privilege::from_code(p.code()).unwrap(), p);
    }
    assert!(Privilege::from_code(3).is_err());
}

#[test]
fn profile_defaults_from_json() {
    let profile: Profile = serde_json::from_str(r#"{"name":"Alice"}"#).unwrap();
    assert_eq!(profile, Profile::named("Alice"));
    assert_eq!(profile.privilege, Privilege::User);
    assert_eq!(profile.card, 0);
}

#[test]
fn record_counts_enrollments() {
    let record = DeviceLocalRecord::new(
        LocalId(7),
        IdentityKey::new("7001").unwrap(),
        Profile::named("Alice"),
    )
    .with_enrollment(EnrollmentKey::fingerprint(0).unwrap(), artifact(Modality::Fingerprint, b"x"));

    assert_eq!(record.enrollment_count(Modality::Fingerprint), 1);
    assert_eq!(record.enrollment_count(Modality::Face), 0);
}

#[test]
fn record_json_shape_is_flat() {
    let json = r#"{
        "local_id": 8,
        "identity": "1001",
        "profile": { "name": "Alice", "privilege": "admin" },
        "enrollments": [
            { "modality": "fingerprint", "slot": 0, "data": "AQID", "version": 0 },
            { "modality": "face", "slot": 0, "data": "BAUG", "version": 3 }
        ]
    }"#;

    let record: DeviceLocalRecord = serde_json::from_str(json).unwrap();

    assert_eq!(record.local_id, LocalId(8));
    assert_eq!(record.profile.privilege, Privilege::Admin);
    let face = record.enrollments.get(&EnrollmentKey::face()).unwrap();
    assert_eq!(face.data(), &[4, 5, 6]);
    assert_eq!(face.version(), 3);

    let back = serde_json::to_value(&record).unwrap();
    assert_eq!(
        back["enrollments"][1],
        serde_json::json!({ "modality": "face", "slot": 0, "data": "BAUG", "version": 3 })
    );
}

#[test]
fn record_with_empty_template_does_not_parse() {
    let json = r#"{
        "local_id": 1,
        "identity": "1001",
        "profile": { "name": "Alice" },
        "enrollments": [ { "modality": "fingerprint", "slot": 0, "data": "" } ]
    }"#;
    assert!(serde_json::from_str::<DeviceLocalRecord>(json).is_err());
}

// ── Device / capabilities ─────────────────────────────────────────

#[test]
fn device_label_prefers_name() {
    let addr = DeviceAddr::parse("10.0.0.2").unwrap();
    let plain = Device::new(addr, AreaId(1));
    assert_eq!(plain.label(), "10.0.0.2:4370");
    assert_eq!(plain.reachability, Reachability::Unknown);
    let named = plain.with_name("Gate");
    assert_eq!(named.label(), "Gate (10.0.0.2:4370)");
}

#[test]
fn device_deserializes_with_defaults() {
    let device: Device = serde_json::from_str(r#"{"addr":"10.0.0.3","area":2}"#).unwrap();
    assert_eq!(device.area, AreaId(2));
    assert_eq!(device.addr.port(), 4370);
    assert!(device.name.is_none());
}

#[test]
fn capability_supported_modalities() {
    let caps = CapabilitySet::fingerprint_only();
    assert_eq!(caps.supported().collect::<Vec<_>>(), vec![Modality::Fingerprint]);

    let full = CapabilitySet::full(7);
    assert_eq!(full.supported().count(), 3);
    assert!(full.supports(Modality::Photo));
    assert_eq!(full.face_version, 7);
}
