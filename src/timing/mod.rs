mod compiler;
mod playback;
mod schedule;
mod sequence;

pub use compiler::compile;
pub use playback::{
    Playback, PlaybackEvent, PlaybackSnapshot, PlaybackState, PlayerState, Timer, TimerStats,
};
pub use schedule::{ChangeEntry, ChangeSchedule};
pub use sequence::NoteEvent;
