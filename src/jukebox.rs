use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;

use crate::device::{DeviceLink, LinkError, LinkEvent, SubscriptionId};
use crate::engine::{PlayerHandle, PlayerUpdate, spawn_player};
use crate::music::{Letter, NATURAL, PitchError};
use crate::song::{NoteDecoder, SongError, SongLibrary, load_schedule};
use crate::timing::PlayerState;

#[derive(Debug, Error)]
pub enum JukeboxError {
    #[error(transparent)]
    Pitch(#[from] PitchError),
    #[error(transparent)]
    Link(#[from] LinkError),
    #[error(transparent)]
    Song(#[from] SongError),
    #[error("no drive {0}")]
    NoSuchDrive(u8),
}

/// What a single drive was last told to play from the control surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrivePanel {
    pub number: u8,
    pub letter: Option<Letter>,
    pub accidental: i32,
    pub octave: i32,
    pub playing: bool,
}

impl DrivePanel {
    fn new(number: u8) -> Self {
        Self {
            number,
            letter: None,
            accidental: NATURAL,
            octave: 3,
            playing: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NowPlaying {
    pub id: String,
    pub name: String,
}

/// Ties a device, a player and the per-drive panel together for whatever
/// control surface sits on top.
pub struct Jukebox {
    link: Arc<DeviceLink>,
    player: PlayerHandle,
    panel: Arc<Mutex<Vec<DrivePanel>>>,
    now_playing: Option<NowPlaying>,
    paused: bool,
    /// Loads sent but not yet confirmed. A `Finished` seen while any are
    /// outstanding belongs to an earlier song.
    pending_loads: usize,
    subscription: SubscriptionId,
}

impl Jukebox {
    pub fn new(link: Arc<DeviceLink>) -> Self {
        let panel: Arc<Mutex<Vec<DrivePanel>>> = Arc::new(Mutex::new(
            (0..link.drive_count()).map(DrivePanel::new).collect(),
        ));
        let rebuild = panel.clone();
        let subscription = link.subscribe(move |event| {
            if let LinkEvent::DriveCount(count) = *event {
                *rebuild.lock() = (0..count).map(DrivePanel::new).collect();
            }
        });
        let player = spawn_player(link.clone());

        Self {
            link,
            player,
            panel,
            now_playing: None,
            paused: false,
            pending_loads: 0,
            subscription,
        }
    }

    pub fn link(&self) -> &DeviceLink {
        &self.link
    }

    pub fn player(&self) -> &PlayerHandle {
        &self.player
    }

    pub fn drives(&self) -> Vec<DrivePanel> {
        self.panel.lock().clone()
    }

    pub fn now_playing(&self) -> Option<&NowPlaying> {
        self.now_playing.as_ref()
    }

    pub fn paused(&self) -> bool {
        self.paused
    }

    /// Drains the player's pending updates into the published state and
    /// hands them back for the control surface to forward.
    pub fn process_updates(&mut self) -> Vec<PlayerUpdate> {
        let mut updates = Vec::new();
        while let Ok(update) = self.player.update_rx.try_recv() {
            self.apply(&update);
            updates.push(update);
        }
        updates
    }

    fn apply(&mut self, update: &PlayerUpdate) {
        match update {
            PlayerUpdate::Loaded { .. } => {
                self.pending_loads = self.pending_loads.saturating_sub(1);
            }
            PlayerUpdate::State(PlayerState::Paused) => self.paused = true,
            PlayerUpdate::State(_) => self.paused = false,
            PlayerUpdate::Finished if self.pending_loads == 0 => {
                if let Some(song) = self.now_playing.take() {
                    tracing::info!(id = %song.id, "song finished");
                }
                self.paused = false;
            }
            PlayerUpdate::Finished | PlayerUpdate::Dispatched { .. } => {}
            PlayerUpdate::Error { message } => {
                tracing::warn!(%message, "player reported a device error");
            }
        }
    }

    /// Plays a note on one drive directly, bypassing the player. `None`
    /// silences the drive.
    pub fn set_note(
        &self,
        drive: u8,
        note: Option<(char, i32, i32)>,
    ) -> Result<(), JukeboxError> {
        if usize::from(drive) >= self.panel.lock().len() {
            return Err(JukeboxError::NoSuchDrive(drive));
        }

        match note {
            None => {
                self.link.set_frequency(drive, 0.0)?;
                if let Some(panel) = self.panel.lock().get_mut(usize::from(drive)) {
                    panel.playing = false;
                }
            }
            Some((letter, accidental, octave)) => {
                let letter = Letter::try_from(letter)?;
                self.link.set_note(drive, letter, accidental, octave)?;
                if let Some(panel) = self.panel.lock().get_mut(usize::from(drive)) {
                    panel.letter = Some(letter);
                    panel.accidental = accidental;
                    panel.octave = octave;
                    panel.playing = true;
                }
            }
        }
        Ok(())
    }

    /// Loads a song from the library and starts playing it.
    pub fn queue(
        &mut self,
        library: &dyn SongLibrary,
        decoder: &dyn NoteDecoder,
        id: &str,
    ) -> Result<(), JukeboxError> {
        let schedule = load_schedule(library, decoder, id)?;
        let name = library
            .catalog()
            .into_iter()
            .find(|entry| entry.id == id)
            .map_or_else(|| id.to_string(), |entry| entry.name);
        tracing::info!(%id, %name, "queueing song");

        self.player.load(schedule);
        self.player.play();
        self.pending_loads += 1;
        self.paused = false;
        self.now_playing = Some(NowPlaying {
            id: id.to_string(),
            name,
        });
        Ok(())
    }

    pub fn play(&self) {
        self.player.play();
    }

    pub fn pause(&self) {
        self.player.pause();
    }

    pub fn stop(&mut self) {
        self.player.stop();
        self.now_playing = None;
        self.paused = false;
    }
}

impl Drop for Jukebox {
    fn drop(&mut self) {
        self.link.unsubscribe(self.subscription);
    }
}
