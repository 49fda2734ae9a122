use std::io;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};
use thiserror::Error;
use tracing::{debug, error, info, trace, warn};

use super::bus::{EventBus, LinkEvent, SubscriptionId};
use super::protocol::{self, Command, Frame, ProtocolEvent};
use super::transport::{self, Endpoint, FrameAssembler, FrameReader, FrameWriter};
use crate::config::LinkConfig;
use crate::music::{Letter, letter_frequency};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceStatus {
    Unattached,
    Connecting,
    Connected,
    Ready,
    Error,
}

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("transport failure: {0}")]
    Transport(#[from] io::Error),
    #[error("could not open serial port: {0}")]
    Serial(#[from] serialport::Error),
    #[error("device did not report ready within {0:?}")]
    ReadyTimeout(Duration),
    #[error("device did not report its drive count within {0:?}")]
    DriveCountTimeout(Duration),
}

/// The narrow surface the player needs from a device.
pub trait DriveController: Send + Sync {
    fn set_frequency(&self, drive: u8, hz: f64) -> Result<(), LinkError>;

    fn drive_count(&self) -> u8;

    fn silence_all(&self) -> Result<(), LinkError> {
        for drive in 0..self.drive_count() {
            self.set_frequency(drive, 0.0)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Detached,
    Simulated,
    Wired,
}

struct LinkState {
    status: DeviceStatus,
    mode: Mode,
    drive_count: u8,
    /// Bumped on every drive count report so waiters can tell a fresh answer
    /// from the cached one.
    drive_reports: u64,
    /// Identifies the current attachment. Reader threads of replaced
    /// attachments compare against it and stand down.
    attachment: u64,
}

struct Shared {
    state: Mutex<LinkState>,
    changed: Condvar,
    writer: Mutex<Option<FrameWriter>>,
    bus: EventBus,
}

impl Shared {
    fn set_status(&self, state: &mut LinkState, status: DeviceStatus) {
        if state.status != status {
            debug!(from = ?state.status, to = ?status, "device status changed");
            state.status = status;
        }
    }

    fn handle_frame(&self, attachment: u64, frame: Frame) -> bool {
        let event = protocol::decode(frame);
        let mut state = self.state.lock();
        if state.attachment != attachment {
            return false;
        }
        let published = match event {
            ProtocolEvent::Ready => {
                if state.status == DeviceStatus::Error {
                    return true;
                }
                if state.status != DeviceStatus::Ready {
                    info!("device ready");
                }
                self.set_status(&mut state, DeviceStatus::Ready);
                LinkEvent::Ready
            }
            ProtocolEvent::DriveCount(count) => {
                info!(count, "device reported drive count");
                state.drive_count = count;
                state.drive_reports += 1;
                LinkEvent::DriveCount(count)
            }
            ProtocolEvent::Unknown(frame) => {
                if frame.command() == Some(Command::Invalid) {
                    warn!(?frame, "device rejected the last command");
                } else {
                    warn!(?frame, "dropping unrecognised frame");
                }
                return true;
            }
        };
        drop(state);
        self.changed.notify_all();
        self.bus.publish(published);
        true
    }

    fn fail(&self, attachment: u64, err: &io::Error) {
        let mut state = self.state.lock();
        if state.attachment != attachment || state.status == DeviceStatus::Unattached {
            return;
        }
        if state.status == DeviceStatus::Error {
            return;
        }
        error!(%err, "device connection lost");
        self.set_status(&mut state, DeviceStatus::Error);
        drop(state);
        self.writer.lock().take();
        self.changed.notify_all();
        self.bus.publish(LinkEvent::Closed);
    }

    fn is_current(&self, attachment: u64) -> bool {
        self.state.lock().attachment == attachment
    }
}

/// Owns the connection to the drive controller.
///
/// Without an endpoint the link simulates a controller: it turns ready on its
/// own with a placeholder drive count, and every frame is logged instead of
/// written.
pub struct DeviceLink {
    shared: Arc<Shared>,
    simulated_drive_count: u8,
    ready_timeout: Option<Duration>,
}

impl DeviceLink {
    pub fn new(config: &LinkConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(LinkState {
                    status: DeviceStatus::Unattached,
                    mode: Mode::Detached,
                    drive_count: 0,
                    drive_reports: 0,
                    attachment: 0,
                }),
                changed: Condvar::new(),
                writer: Mutex::new(None),
                bus: EventBus::new(),
            }),
            simulated_drive_count: config.simulated_drive_count,
            ready_timeout: config.ready_timeout(),
        }
    }

    pub fn status(&self) -> DeviceStatus {
        self.shared.state.lock().status
    }

    /// Last drive count the device reported.
    pub fn drive_count(&self) -> u8 {
        self.shared.state.lock().drive_count
    }

    pub fn subscribe<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&LinkEvent) + Send + Sync + 'static,
    {
        self.shared.bus.subscribe(handler)
    }

    pub fn subscribe_channel(&self) -> crossbeam::channel::Receiver<LinkEvent> {
        self.shared.bus.subscribe_channel()
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.shared.bus.unsubscribe(id)
    }

    /// Connects to `endpoint`, or starts a simulated controller when there
    /// is none. Replaces any previous attachment.
    pub fn attach(&self, endpoint: Option<Endpoint>) -> Result<(), LinkError> {
        let Some(endpoint) = endpoint else {
            let attachment = self.begin_attach(Mode::Simulated);
            info!("no port specified; drive commands will be logged only");
            let shared = self.shared.clone();
            let count = self.simulated_drive_count;
            thread::Builder::new()
                .name("floppy-simulator".into())
                .spawn(move || simulate(&shared, attachment, count))?;
            return Ok(());
        };

        let attachment = self.begin_attach(Mode::Wired);
        info!(port = %endpoint.path, baud = endpoint.baud_rate, "opening serial port");
        match transport::open_serial(&endpoint) {
            Ok((reader, writer)) => self.wire(attachment, reader, writer),
            Err(err) => {
                error!(port = %endpoint.path, %err, "could not open serial port");
                let mut state = self.shared.state.lock();
                self.shared.set_status(&mut state, DeviceStatus::Error);
                Err(err.into())
            }
        }
    }

    /// Attaches an already-open byte stream, e.g. a socket bridged to the
    /// controller.
    pub fn attach_stream<R, W>(&self, reader: R, writer: W) -> Result<(), LinkError>
    where
        R: io::Read + Send + 'static,
        W: io::Write + Send + 'static,
    {
        let attachment = self.begin_attach(Mode::Wired);
        self.wire(attachment, Box::new(reader), Box::new(writer))
    }

    pub fn detach(&self) {
        let mut state = self.shared.state.lock();
        state.attachment += 1;
        state.mode = Mode::Detached;
        self.shared.set_status(&mut state, DeviceStatus::Unattached);
        drop(state);
        self.shared.writer.lock().take();
        self.shared.changed.notify_all();
    }

    fn begin_attach(&self, mode: Mode) -> u64 {
        self.shared.writer.lock().take();
        let mut state = self.shared.state.lock();
        state.attachment += 1;
        state.mode = mode;
        state.drive_count = 0;
        self.shared.set_status(&mut state, DeviceStatus::Connecting);
        state.attachment
    }

    fn wire(&self, attachment: u64, reader: FrameReader, writer: FrameWriter) -> Result<(), LinkError> {
        *self.shared.writer.lock() = Some(writer);
        {
            let mut state = self.shared.state.lock();
            self.shared.set_status(&mut state, DeviceStatus::Connected);
        }
        self.shared.changed.notify_all();
        info!("device connection opened");
        self.shared.bus.publish(LinkEvent::Opened);

        let shared = self.shared.clone();
        thread::Builder::new()
            .name("floppy-link-reader".into())
            .spawn(move || read_loop(&shared, attachment, reader))?;
        Ok(())
    }

    /// Writes a raw frame without waiting for readiness.
    pub fn send(&self, command: Command, p1: u8, p2: u8, p3: u8) -> Result<(), LinkError> {
        self.write(Frame::encode(command, p1, p2, p3))
    }

    fn write(&self, frame: Frame) -> Result<(), LinkError> {
        let mut writer = self.shared.writer.lock();
        let Some(port) = writer.as_mut() else {
            info!(?frame, "no device connected; frame not sent");
            return Ok(());
        };
        if let Err(err) = transport::write_frame(port.as_mut(), &frame) {
            writer.take();
            drop(writer);
            let attachment = self.shared.state.lock().attachment;
            self.shared.fail(attachment, &err);
            return Err(err.into());
        }
        trace!(?frame, "frame sent");
        Ok(())
    }

    /// Resolves once the device has signalled ready, pinging it first if it
    /// has not yet. Commands that need a ready device go through the
    /// returned token.
    ///
    /// Without a configured timeout this waits forever, including after the
    /// connection has failed.
    ///
    /// A waiter outlives re-attachment: every new wired connection it sees
    /// gets its own ping.
    pub fn query_ready_state(&self) -> Result<Ready<'_>, LinkError> {
        let deadline = self.ready_timeout.map(|t| Instant::now() + t);
        let mut pinged = None;
        let mut state = self.shared.state.lock();
        loop {
            if state.status == DeviceStatus::Ready || state.mode == Mode::Detached {
                return Ok(Ready { link: self });
            }
            if state.mode == Mode::Wired
                && state.status == DeviceStatus::Connected
                && pinged != Some(state.attachment)
            {
                pinged = Some(state.attachment);
                drop(state);
                self.write(Frame::ping())?;
                state = self.shared.state.lock();
                continue;
            }
            if self.wait(&mut state, deadline) {
                let timeout = self.ready_timeout.unwrap_or_default();
                warn!(?timeout, "timed out waiting for device ready");
                return Err(LinkError::ReadyTimeout(timeout));
            }
        }
    }

    /// Asks the device how many drives it has, caching the answer.
    pub fn query_drive_count(&self) -> Result<u8, LinkError> {
        let ready = self.query_ready_state()?;
        let seen = {
            let state = self.shared.state.lock();
            if state.mode != Mode::Wired {
                return Ok(state.drive_count);
            }
            state.drive_reports
        };
        ready.send(Frame::query_drives())?;

        let deadline = self.ready_timeout.map(|t| Instant::now() + t);
        let mut state = self.shared.state.lock();
        while state.drive_reports == seen {
            if self.wait(&mut state, deadline) {
                return Err(LinkError::DriveCountTimeout(
                    self.ready_timeout.unwrap_or_default(),
                ));
            }
        }
        Ok(state.drive_count)
    }

    /// Returns `true` if the deadline passed.
    fn wait(&self, state: &mut MutexGuard<'_, LinkState>, deadline: Option<Instant>) -> bool {
        match deadline {
            Some(deadline) => self.shared.changed.wait_until(state, deadline).timed_out(),
            None => {
                self.shared.changed.wait(state);
                false
            }
        }
    }

    pub fn set_frequency(&self, drive: u8, hz: f64) -> Result<(), LinkError> {
        self.query_ready_state()?.set_frequency(drive, hz)
    }

    pub fn set_note(&self, drive: u8, letter: Letter, accidental: i32, octave: i32) -> Result<(), LinkError> {
        self.set_frequency(drive, letter_frequency(letter, accidental, octave))
    }

    pub fn silence_all(&self) -> Result<(), LinkError> {
        let ready = self.query_ready_state()?;
        for drive in 0..self.drive_count() {
            ready.set_frequency(drive, 0.0)?;
        }
        Ok(())
    }

    pub fn reset_all(&self) -> Result<(), LinkError> {
        self.query_ready_state()?.send(Frame::reset_all())
    }

    pub fn reset_drive(&self, drive: u8) -> Result<(), LinkError> {
        self.query_ready_state()?.send(Frame::reset_one(drive))
    }
}

impl Drop for DeviceLink {
    fn drop(&mut self) {
        self.detach();
    }
}

impl DriveController for DeviceLink {
    fn set_frequency(&self, drive: u8, hz: f64) -> Result<(), LinkError> {
        DeviceLink::set_frequency(self, drive, hz)
    }

    fn drive_count(&self) -> u8 {
        DeviceLink::drive_count(self)
    }

    fn silence_all(&self) -> Result<(), LinkError> {
        DeviceLink::silence_all(self)
    }
}

/// Proof that the device was ready when this was handed out.
pub struct Ready<'a> {
    link: &'a DeviceLink,
}

impl Ready<'_> {
    pub fn send(&self, frame: Frame) -> Result<(), LinkError> {
        self.link.write(frame)
    }

    pub fn set_frequency(&self, drive: u8, hz: f64) -> Result<(), LinkError> {
        debug!(drive, hz, "set frequency");
        self.send(Frame::set_frequency(drive, hz))
    }
}

fn simulate(shared: &Shared, attachment: u64, drive_count: u8) {
    let mut state = shared.state.lock();
    if state.attachment != attachment {
        return;
    }
    shared.set_status(&mut state, DeviceStatus::Connected);
    drop(state);
    shared.bus.publish(LinkEvent::Opened);

    let mut state = shared.state.lock();
    if state.attachment != attachment {
        return;
    }
    shared.set_status(&mut state, DeviceStatus::Ready);
    state.drive_count = drive_count;
    state.drive_reports += 1;
    drop(state);
    shared.changed.notify_all();
    info!(drive_count, "simulated device ready");
    shared.bus.publish(LinkEvent::Ready);
    shared.bus.publish(LinkEvent::DriveCount(drive_count));
}

fn read_loop(shared: &Shared, attachment: u64, mut reader: FrameReader) {
    let mut assembler = FrameAssembler::default();
    while shared.is_current(attachment) {
        match assembler.poll(reader.as_mut()) {
            Ok(Some(frame)) => {
                trace!(?frame, "frame received");
                if !shared.handle_frame(attachment, frame) {
                    break;
                }
            }
            Ok(None) => {}
            Err(err) => {
                shared.fail(attachment, &err);
                break;
            }
        }
    }
    debug!(attachment, "reader stopped");
}
