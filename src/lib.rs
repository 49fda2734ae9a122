pub mod config;
pub mod device;
mod engine;
pub mod events;
mod jukebox;
pub mod music;
pub mod song;
pub mod timing;

pub use config::{Config, ConfigError, LibraryConfig, LinkConfig};
pub use device::{DeviceLink, DeviceStatus, DriveController, Endpoint, LinkError, LinkEvent};
pub use engine::{PlayerCommand, PlayerHandle, PlayerUpdate, spawn_player};
pub use jukebox::{DrivePanel, Jukebox, JukeboxError, NowPlaying};
pub use music::{Letter, PitchError, PitchSpec, frequency_of, frequency_of_midi};
pub use song::{
    CatalogEntry, DirectoryLibrary, MemoryLibrary, NoteDecoder, RonNoteDecoder, Song, SongError,
    SongLibrary, load_schedule,
};
pub use timing::{ChangeEntry, ChangeSchedule, NoteEvent, PlaybackSnapshot, PlayerState, compile};
