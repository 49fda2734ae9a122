use std::collections::BTreeMap;

use super::{ChangeSchedule, NoteEvent};

/// Turns decoded notes into a change schedule.
///
/// Each note sets its drive at `start_ms` and silences it at its end. When a
/// silence and a note start land on the same drive at the same offset, the
/// start wins whatever the input order, so back-to-back notes never get
/// clipped. Between starts on the same drive and offset, the later note in
/// input order wins. Notes of zero length are skipped: they would start a
/// drive that nothing silences.
pub fn compile(notes: &[NoteEvent]) -> ChangeSchedule {
    let mut map: BTreeMap<u64, BTreeMap<u8, f64>> = BTreeMap::new();

    let audible = || notes.iter().filter(|note| note.duration_ms > 0);

    for note in audible() {
        map.entry(note.end_ms())
            .or_default()
            .entry(note.drive())
            .or_insert(0.0);
    }

    for note in audible() {
        map.entry(note.start_ms)
            .or_default()
            .insert(note.drive(), note.pitch.frequency());
    }

    let skipped = notes.len() - audible().count();
    if skipped > 0 {
        tracing::debug!(skipped, "ignoring zero-length notes");
    }

    let schedule = ChangeSchedule::from_map(map);
    tracing::debug!(
        notes = notes.len(),
        entries = schedule.len(),
        duration_ms = schedule.duration_ms(),
        "compiled change schedule"
    );
    schedule
}
