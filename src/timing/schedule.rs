use std::collections::BTreeMap;
use std::time::Duration;

/// Frequency changes applied together at one offset, keyed by drive.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEntry {
    pub offset_ms: u64,
    pub changes: BTreeMap<u8, f64>,
}

/// Time-ordered frequency changes for one song. Offsets are unique and
/// strictly increasing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSchedule {
    entries: Vec<ChangeEntry>,
}

impl ChangeSchedule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a schedule from an offset map. Offsets with no changes are
    /// dropped.
    pub fn from_map(map: BTreeMap<u64, BTreeMap<u8, f64>>) -> Self {
        let entries = map
            .into_iter()
            .filter(|(_, changes)| !changes.is_empty())
            .map(|(offset_ms, changes)| ChangeEntry { offset_ms, changes })
            .collect();
        Self { entries }
    }

    pub fn entries(&self) -> &[ChangeEntry] {
        &self.entries
    }

    pub fn get(&self, index: usize) -> Option<&ChangeEntry> {
        self.entries.get(index)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn offsets(&self) -> impl Iterator<Item = u64> + '_ {
        self.entries.iter().map(|e| e.offset_ms)
    }

    /// Time between entry `index` and the one after it.
    pub fn interval_after(&self, index: usize) -> Option<Duration> {
        let current = self.entries.get(index)?;
        let next = self.entries.get(index + 1)?;
        Some(Duration::from_millis(next.offset_ms - current.offset_ms))
    }

    pub fn duration_ms(&self) -> u64 {
        self.entries.last().map_or(0, |e| e.offset_ms)
    }

    /// Number of drives the schedule addresses, i.e. highest drive + 1.
    pub fn drives_used(&self) -> usize {
        self.entries
            .iter()
            .filter_map(|e| e.changes.keys().next_back())
            .max()
            .map_or(0, |&d| d as usize + 1)
    }
}
