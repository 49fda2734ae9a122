use crate::device::DriveController;
use crate::timing::{ChangeSchedule, Playback, PlaybackEvent, PlaybackSnapshot, PlayerState};
use crossbeam::channel::{Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug, Clone)]
pub enum PlayerCommand {
    Load(ChangeSchedule),
    Play,
    Pause,
    Stop,
    Snapshot(Sender<PlaybackSnapshot>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlayerUpdate {
    Loaded { entries: usize },
    State(PlayerState),
    Dispatched { index: usize, offset_ms: u64 },
    Finished,
    Error { message: String },
}

impl From<PlaybackEvent> for PlayerUpdate {
    fn from(event: PlaybackEvent) -> Self {
        match event {
            PlaybackEvent::Loaded { entries } => PlayerUpdate::Loaded { entries },
            PlaybackEvent::StateChanged(state) => PlayerUpdate::State(state),
            PlaybackEvent::Dispatched { index, offset_ms } => {
                PlayerUpdate::Dispatched { index, offset_ms }
            }
            PlaybackEvent::Finished => PlayerUpdate::Finished,
            PlaybackEvent::DeviceError(message) => PlayerUpdate::Error { message },
        }
    }
}

/// Control surface of a running player thread. Dropping it stops playback
/// and ends the thread.
pub struct PlayerHandle {
    pub command_tx: Sender<PlayerCommand>,
    pub update_rx: Receiver<PlayerUpdate>,
}

impl PlayerHandle {
    pub fn load(&self, schedule: ChangeSchedule) {
        let _ = self.command_tx.send(PlayerCommand::Load(schedule));
    }

    pub fn play(&self) {
        let _ = self.command_tx.send(PlayerCommand::Play);
    }

    pub fn pause(&self) {
        let _ = self.command_tx.send(PlayerCommand::Pause);
    }

    pub fn stop(&self) {
        let _ = self.command_tx.send(PlayerCommand::Stop);
    }

    /// Current position and timer counters, or `None` if the thread is gone.
    pub fn snapshot(&self) -> Option<PlaybackSnapshot> {
        let (tx, rx) = crossbeam::channel::bounded(1);
        self.command_tx.send(PlayerCommand::Snapshot(tx)).ok()?;
        rx.recv_timeout(Duration::from_secs(5)).ok()
    }
}

/// Starts the player thread. Every transition and every timer expiry runs on
/// that one thread, so they never interleave.
pub fn spawn_player(controller: Arc<dyn DriveController>) -> PlayerHandle {
    let (command_tx, command_rx) = crossbeam::channel::unbounded();
    let (update_tx, update_rx) = crossbeam::channel::unbounded();

    std::thread::spawn(move || {
        player_thread(controller, command_rx, update_tx);
    });

    PlayerHandle {
        command_tx,
        update_rx,
    }
}

fn player_thread(
    controller: Arc<dyn DriveController>,
    command_rx: Receiver<PlayerCommand>,
    update_tx: Sender<PlayerUpdate>,
) {
    let controller = controller.as_ref();
    let mut playback = Playback::new();

    loop {
        let received = match playback.pending_timer() {
            Some(timer) => match command_rx.recv_deadline(timer.deadline) {
                Ok(command) => Some(command),
                Err(RecvTimeoutError::Timeout) => {
                    playback.fire(timer.generation, Instant::now(), controller);
                    publish(&mut playback, &update_tx);
                    continue;
                }
                Err(RecvTimeoutError::Disconnected) => None,
            },
            None => command_rx.recv().ok(),
        };

        let Some(command) = received else {
            break;
        };

        match command {
            PlayerCommand::Load(schedule) => playback.load(schedule, controller),
            PlayerCommand::Play => playback.play(Instant::now(), controller),
            PlayerCommand::Pause => playback.pause(Instant::now(), controller),
            PlayerCommand::Stop => playback.stop(controller),
            PlayerCommand::Snapshot(reply) => {
                let _ = reply.send(playback.snapshot());
            }
        }
        publish(&mut playback, &update_tx);
    }

    if playback.phase() != PlayerState::Idle {
        playback.stop(controller);
    }
    debug!("player thread exiting");
}

fn publish(playback: &mut Playback, update_tx: &Sender<PlayerUpdate>) {
    for event in playback.take_events() {
        let _ = update_tx.send(event.into());
    }
}
