use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Last known value per register address
pub type RegisterSnapshot = HashMap<u16, u16>;

/// Changes found in one sweep, ordered by address
pub type ChangeSet = BTreeMap<u16, u16>;

/// Diff a block of freshly read values against the snapshot.
///
/// `values[i]` belongs to address `start + i`. Every read value is written
/// into `previous`, excluded addresses included, so the baseline stays
/// current; excluded addresses are never reported. Values past the end of the
/// address space are ignored.
pub fn detect_changes(
    previous: &mut RegisterSnapshot,
    values: &[u16],
    start: u16,
    excluded: &BTreeSet<u16>,
) -> ChangeSet {
    let mut changes = ChangeSet::new();
    for (address, &value) in (start..=u16::MAX).zip(values) {
        let old = previous.insert(address, value);
        if excluded.contains(&address) {
            continue;
        }
        if old != Some(value) {
            changes.insert(address, value);
        }
    }
    changes
}
