//! Primary election.

use fleetsync_types::DeviceAddr;
use std::cmp::Reverse;

use crate::snapshot::DeviceSnapshot;

/// Elects the reachable device holding the most data (identities plus
/// enrollments). Ties go to the lowest address. `None` for an empty input.
pub fn elect<'a>(snapshots: impl IntoIterator<Item = &'a DeviceSnapshot>) -> Option<DeviceAddr> {
    snapshots
        .into_iter()
        .max_by_key(|s| (weight(s), Reverse(s.device)))
        .map(|s| s.device)
}

/// Election weight of one snapshot.
#[must_use]
pub fn weight(snapshot: &DeviceSnapshot) -> usize {
    snapshot.identity_count() + snapshot.enrollment_count()
}
