use serde::{Deserialize, Serialize};

use crate::music::PitchSpec;

/// A decoded note. Voices map one to one onto drives.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NoteEvent {
    pub voice: u8,
    pub pitch: PitchSpec,
    pub start_ms: u64,
    pub duration_ms: u64,
}

impl NoteEvent {
    pub fn new(voice: u8, pitch: PitchSpec, start_ms: u64, duration_ms: u64) -> Self {
        Self {
            voice,
            pitch,
            start_ms,
            duration_ms,
        }
    }

    pub fn end_ms(&self) -> u64 {
        self.start_ms.saturating_add(self.duration_ms)
    }

    pub fn drive(&self) -> u8 {
        self.voice
    }
}
