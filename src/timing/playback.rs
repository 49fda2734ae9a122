use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, trace, warn};

use super::ChangeSchedule;
use crate::device::DriveController;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerState {
    /// Nothing loaded.
    Idle,
    /// Loaded and rewound.
    Stopped,
    /// Rewound after the last entry played out.
    Finished,
    Playing,
    Paused,
}

/// Where playback is within the loaded schedule.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlaybackState {
    pub current_index: usize,
    /// When the current entry was dispatched. After a resume this is moved
    /// back by the paused offset, so it always measures progress into the
    /// current interval.
    pub fired_at: Option<Instant>,
    /// Progress into the current interval at the moment of pausing.
    pub pause_offset: Duration,
    /// Whether the entry at `current_index` has gone out already.
    pub dispatched: bool,
}

/// Counters for the single-shot timer. `pending()` never exceeds one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimerStats {
    pub armed: u64,
    pub cancelled: u64,
    pub fired: u64,
}

impl TimerStats {
    pub fn pending(&self) -> u64 {
        self.armed - self.cancelled - self.fired
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timer {
    pub generation: u64,
    pub deadline: Instant,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackEvent {
    Loaded { entries: usize },
    StateChanged(PlayerState),
    Dispatched { index: usize, offset_ms: u64 },
    Finished,
    DeviceError(String),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaybackSnapshot {
    pub state: PlayerState,
    pub current_index: usize,
    pub pause_offset_ms: u64,
    pub entries: usize,
    pub timers: TimerStats,
}

/// The play/pause/stop state machine over one loaded schedule.
///
/// It never sleeps: callers pass in the current time and arm a real timer
/// for whatever [`Playback::pending_timer`] reports, then call
/// [`Playback::fire`] with that timer's generation when it expires. A fire
/// for any other generation is ignored, so a cancelled timer can never
/// dispatch.
pub struct Playback {
    schedule: Option<Arc<ChangeSchedule>>,
    state: PlaybackState,
    phase: PlayerState,
    timer: Option<Timer>,
    generation: u64,
    stats: TimerStats,
    events: Vec<PlaybackEvent>,
}

impl Playback {
    pub fn new() -> Self {
        Self {
            schedule: None,
            state: PlaybackState::default(),
            phase: PlayerState::Idle,
            timer: None,
            generation: 0,
            stats: TimerStats::default(),
            events: Vec::new(),
        }
    }

    pub fn phase(&self) -> PlayerState {
        self.phase
    }

    pub fn state(&self) -> &PlaybackState {
        &self.state
    }

    pub fn timer_stats(&self) -> TimerStats {
        self.stats
    }

    pub fn pending_timer(&self) -> Option<Timer> {
        self.timer
    }

    pub fn take_events(&mut self) -> Vec<PlaybackEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn snapshot(&self) -> PlaybackSnapshot {
        PlaybackSnapshot {
            state: self.phase,
            current_index: self.state.current_index,
            pause_offset_ms: self.state.pause_offset.as_millis() as u64,
            entries: self.schedule.as_ref().map_or(0, |s| s.len()),
            timers: self.stats,
        }
    }

    /// Stops whatever is playing, then takes over `schedule`.
    pub fn load(&mut self, schedule: ChangeSchedule, controller: &dyn DriveController) {
        self.stop(controller);
        let available = controller.drive_count();
        if schedule.drives_used() > usize::from(available) {
            warn!(
                needed = schedule.drives_used(),
                available,
                "schedule addresses more drives than the device has"
            );
        }
        info!(
            entries = schedule.len(),
            duration_ms = schedule.duration_ms(),
            "schedule loaded"
        );
        self.events.push(PlaybackEvent::Loaded {
            entries: schedule.len(),
        });
        self.schedule = Some(Arc::new(schedule));
        self.set_phase(PlayerState::Stopped);
    }

    pub fn play(&mut self, now: Instant, controller: &dyn DriveController) {
        let Some(schedule) = self.schedule.clone() else {
            debug!("play ignored: nothing loaded");
            return;
        };
        if self.phase == PlayerState::Playing {
            return;
        }

        self.set_phase(PlayerState::Playing);

        if self.state.dispatched {
            // Resuming mid-interval: the entry already went out before the
            // pause, so only the rest of its interval is left to wait.
            self.state.fired_at = Some(now.checked_sub(self.state.pause_offset).unwrap_or(now));
            debug!(
                index = self.state.current_index,
                offset_ms = self.state.pause_offset.as_millis() as u64,
                "resuming"
            );
            self.arm_next(&schedule, now);
        } else {
            self.advance(&schedule, now, controller);
        }
    }

    pub fn pause(&mut self, now: Instant, controller: &dyn DriveController) {
        if self.phase != PlayerState::Playing {
            return;
        }
        self.silence(controller);
        self.cancel_timer();
        self.state.pause_offset = self
            .state
            .fired_at
            .map_or(Duration::ZERO, |fired| now.saturating_duration_since(fired));
        self.set_phase(PlayerState::Paused);
    }

    /// Silences every drive and rewinds to the start.
    pub fn stop(&mut self, controller: &dyn DriveController) {
        self.silence(controller);
        self.cancel_timer();
        self.state = PlaybackState::default();
        let phase = if self.schedule.is_some() {
            PlayerState::Stopped
        } else {
            PlayerState::Idle
        };
        self.set_phase(phase);
    }

    /// Handles expiry of the timer armed with `generation`.
    pub fn fire(&mut self, generation: u64, now: Instant, controller: &dyn DriveController) {
        match self.timer {
            Some(timer) if timer.generation == generation => {}
            _ => {
                trace!(generation, "ignoring stale timer");
                return;
            }
        }
        self.timer = None;
        self.stats.fired += 1;

        let Some(schedule) = self.schedule.clone() else {
            return;
        };
        self.state.current_index += 1;
        self.state.pause_offset = Duration::ZERO;
        self.state.dispatched = false;
        self.advance(&schedule, now, controller);
    }

    /// Dispatches the current entry and arms the timer for the next one.
    fn advance(&mut self, schedule: &ChangeSchedule, now: Instant, controller: &dyn DriveController) {
        let index = self.state.current_index;
        let Some(entry) = schedule.get(index) else {
            self.finish();
            return;
        };

        trace!(index, offset_ms = entry.offset_ms, "dispatching");
        for (&drive, &hz) in &entry.changes {
            if let Err(err) = controller.set_frequency(drive, hz) {
                warn!(drive, hz, %err, "frequency change failed");
                self.events.push(PlaybackEvent::DeviceError(err.to_string()));
            }
        }
        self.state.dispatched = true;
        self.state.fired_at = Some(now);
        self.events.push(PlaybackEvent::Dispatched {
            index,
            offset_ms: entry.offset_ms,
        });
        self.arm_next(schedule, now);
    }

    fn arm_next(&mut self, schedule: &ChangeSchedule, now: Instant) {
        let Some(interval) = schedule.interval_after(self.state.current_index) else {
            self.finish();
            return;
        };
        let wait = interval.saturating_sub(self.state.pause_offset);
        self.cancel_timer();
        self.generation += 1;
        self.stats.armed += 1;
        self.timer = Some(Timer {
            generation: self.generation,
            deadline: now + wait,
        });
        trace!(generation = self.generation, ?wait, "timer armed");
    }

    fn finish(&mut self) {
        info!("playback finished");
        self.state = PlaybackState::default();
        self.set_phase(PlayerState::Finished);
        self.events.push(PlaybackEvent::Finished);
    }

    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            self.stats.cancelled += 1;
            trace!(generation = timer.generation, "timer cancelled");
        }
    }

    fn silence(&mut self, controller: &dyn DriveController) {
        if let Err(err) = controller.silence_all() {
            warn!(%err, "could not silence drives");
            self.events.push(PlaybackEvent::DeviceError(err.to_string()));
        }
    }

    fn set_phase(&mut self, phase: PlayerState) {
        if self.phase != phase {
            debug!(from = ?self.phase, to = ?phase, "player state changed");
            self.phase = phase;
            self.events.push(PlaybackEvent::StateChanged(phase));
        }
    }
}

impl Default for Playback {
    fn default() -> Self {
        Self::new()
    }
}
