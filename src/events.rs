//! Boundary with MIDI decoders: timed note messages in, note events out.

use std::collections::HashMap;

use crate::music::{MIDI_DRIVE_SHIFT, PitchSpec};
use crate::timing::NoteEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledEvent {
    pub time_ms: u64,
    pub channel: u8,
    pub message: MidiMessage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MidiMessage {
    NoteOn { pitch: u8, velocity: u8 },
    NoteOff { pitch: u8 },
}

/// Pairs note-ons with their note-offs, one voice per channel.
///
/// Each channel drives a single floppy, so a new note-on on a busy channel
/// ends the sounding note there. A note-on with velocity 0 is a note-off.
/// Pitches are shifted down by [`MIDI_DRIVE_SHIFT`].
pub fn notes_from_midi(events: &[ScheduledEvent]) -> Vec<NoteEvent> {
    let mut ordered: Vec<&ScheduledEvent> = events.iter().collect();
    ordered.sort_by_key(|e| e.time_ms);

    let mut sounding: HashMap<u8, (u8, u64)> = HashMap::new();
    let mut notes = Vec::new();

    let mut close = |channel: u8, pitch: u8, start: u64, end: u64| {
        notes.push(NoteEvent::new(
            channel,
            PitchSpec::Midi(pitch as i32 - MIDI_DRIVE_SHIFT),
            start,
            end - start,
        ));
    };

    for event in ordered {
        match event.message {
            MidiMessage::NoteOn { pitch, velocity } if velocity > 0 => {
                if let Some((held, start)) = sounding.insert(event.channel, (pitch, event.time_ms)) {
                    close(event.channel, held, start, event.time_ms);
                }
            }
            MidiMessage::NoteOn { pitch, .. } | MidiMessage::NoteOff { pitch } => {
                if let Some(&(held, start)) = sounding.get(&event.channel) {
                    if held == pitch {
                        sounding.remove(&event.channel);
                        close(event.channel, held, start, event.time_ms);
                    }
                }
            }
        }
    }

    if !sounding.is_empty() {
        tracing::warn!(count = sounding.len(), "dropping notes that never end");
    }

    notes.sort_by_key(|n| (n.start_ms, n.voice));
    notes
}
