#![cfg(unix)]

use std::os::unix::net::UnixStream;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam::channel::{Receiver, unbounded};
use floppy_choir::device::{Command, Frame, read_frame, write_frame};
use floppy_choir::{DeviceLink, DeviceStatus, LinkConfig, LinkError, LinkEvent};

const WAIT: Duration = Duration::from_secs(2);

/// Firmware stand-in on the far end of a socket pair. Answers pings and
/// drive queries and forwards every frame it receives.
fn fake_device(drives: u8, answer_pings: bool) -> (UnixStream, Receiver<Frame>) {
    let (ours, theirs) = UnixStream::pair().unwrap();
    let (tx, rx) = unbounded();
    let mut device = theirs;
    thread::spawn(move || {
        while let Ok(frame) = read_frame(&mut device) {
            let reply = match frame.command() {
                Some(Command::Ping) if answer_pings => Some(Frame::ping()),
                Some(Command::QueryDrives) => Some(Frame::encode(Command::QueryDrives, drives, 0, 0)),
                Some(Command::ResetOne) => Some(Frame::encode(Command::Invalid, 0, 0, 0)),
                _ => None,
            };
            if tx.send(frame).is_err() {
                break;
            }
            if let Some(reply) = reply {
                if write_frame(&mut device, &reply).is_err() {
                    break;
                }
            }
        }
    });
    (ours, rx)
}

fn attach(link: &DeviceLink, stream: UnixStream) {
    let writer = stream.try_clone().unwrap();
    link.attach_stream(stream, writer).unwrap();
}

#[test]
fn handshake_then_frequency_commands() {
    let (stream, frames) = fake_device(6, true);
    let link = DeviceLink::new(&LinkConfig::default());
    let events = link.subscribe_channel();
    attach(&link, stream);

    assert_eq!(events.recv_timeout(WAIT), Ok(LinkEvent::Opened));
    assert_eq!(link.status(), DeviceStatus::Connected);

    link.set_frequency(2, 300.0).unwrap();
    assert_eq!(frames.recv_timeout(WAIT).unwrap(), Frame::ping());
    assert_eq!(
        frames.recv_timeout(WAIT).unwrap().as_bytes(),
        &[16, 2, 255, 45]
    );
    assert_eq!(events.recv_timeout(WAIT), Ok(LinkEvent::Ready));
    assert_eq!(link.status(), DeviceStatus::Ready);

    // already ready: no second ping
    link.set_frequency(0, 110.0).unwrap();
    assert_eq!(frames.recv_timeout(WAIT).unwrap().as_bytes(), &[16, 0, 110, 0]);
}

#[test]
fn drive_count_is_queried_and_cached() {
    let (stream, frames) = fake_device(3, true);
    let link = DeviceLink::new(&LinkConfig::default());
    let events = link.subscribe_channel();
    attach(&link, stream);

    assert_eq!(link.query_drive_count().unwrap(), 3);
    assert_eq!(link.drive_count(), 3);
    assert_eq!(frames.recv_timeout(WAIT).unwrap(), Frame::ping());
    assert_eq!(frames.recv_timeout(WAIT).unwrap(), Frame::query_drives());

    let reported = events
        .iter()
        .find(|e| matches!(e, LinkEvent::DriveCount(_)));
    assert_eq!(reported, Some(LinkEvent::DriveCount(3)));

    link.silence_all().unwrap();
    let silenced: Vec<[u8; 4]> = (0..3)
        .map(|_| *frames.recv_timeout(WAIT).unwrap().as_bytes())
        .collect();
    assert_eq!(silenced, vec![[16, 0, 0, 0], [16, 1, 0, 0], [16, 2, 0, 0]]);
}

#[test]
fn rejected_and_unknown_frames_are_ignored() {
    let (stream, frames) = fake_device(2, true);
    let link = DeviceLink::new(&LinkConfig::default());
    attach(&link, stream);

    link.reset_drive(1).unwrap();
    link.reset_all().unwrap();
    assert_eq!(frames.recv_timeout(WAIT).unwrap(), Frame::ping());
    assert_eq!(frames.recv_timeout(WAIT).unwrap(), Frame::reset_one(1));
    assert_eq!(frames.recv_timeout(WAIT).unwrap(), Frame::reset_all());

    // the INVALID reply to the reset did not disturb the link
    assert_eq!(link.query_drive_count().unwrap(), 2);
    assert_eq!(link.status(), DeviceStatus::Ready);
}

#[test]
fn raw_send_skips_the_ready_gate() {
    let (stream, frames) = fake_device(2, false);
    let link = DeviceLink::new(&LinkConfig::default());
    attach(&link, stream);

    link.send(Command::SetFrequency, 1, 50, 0).unwrap();
    assert_eq!(frames.recv_timeout(WAIT).unwrap().as_bytes(), &[16, 1, 50, 0]);
    assert_eq!(link.status(), DeviceStatus::Connected);
}

#[test]
fn silent_device_times_out_when_configured() {
    let (stream, frames) = fake_device(2, false);
    let config = LinkConfig {
        ready_timeout_ms: Some(50),
        ..LinkConfig::default()
    };
    let link = DeviceLink::new(&config);
    attach(&link, stream);

    assert!(matches!(
        link.set_frequency(0, 220.0),
        Err(LinkError::ReadyTimeout(_))
    ));
    assert_eq!(frames.recv_timeout(WAIT).unwrap(), Frame::ping());
    assert!(frames.try_recv().is_err(), "nothing past the ping");
}

#[test]
fn closed_connection_moves_to_error() {
    let (stream, _frames) = fake_device(2, true);
    let link = DeviceLink::new(&LinkConfig::default());
    let events = link.subscribe_channel();
    let peer = stream.try_clone().unwrap();
    attach(&link, stream);
    link.query_ready_state().unwrap();

    peer.shutdown(std::net::Shutdown::Both).unwrap();

    let closed = events
        .iter()
        .take_while(|e| *e != LinkEvent::Closed)
        .count();
    assert!(closed >= 2);
    assert_eq!(link.status(), DeviceStatus::Error);
}

#[test]
fn reattach_replaces_previous_connection() {
    let link = Arc::new(DeviceLink::new(&LinkConfig::default()));
    let (first, first_frames) = fake_device(2, true);
    attach(&link, first);
    assert_eq!(link.query_drive_count().unwrap(), 2);

    let (second, second_frames) = fake_device(5, true);
    attach(&link, second);
    assert_eq!(link.status(), DeviceStatus::Connected);
    assert_eq!(link.query_drive_count().unwrap(), 5);

    link.set_frequency(0, 100.0).unwrap();
    let last = second_frames.iter().find(|f| f.command() == Some(Command::SetFrequency));
    assert_eq!(last.unwrap().as_bytes(), &[16, 0, 100, 0]);
    assert!(
        first_frames
            .try_iter()
            .all(|f| f.command() != Some(Command::SetFrequency))
    );
}

#[test]
fn blocked_waiter_pings_the_replacement_connection() {
    let link = Arc::new(DeviceLink::new(&LinkConfig::default()));
    let (silent, silent_frames) = fake_device(2, false);
    attach(&link, silent);

    let waiter = {
        let link = link.clone();
        thread::spawn(move || link.set_frequency(1, 200.0))
    };
    assert_eq!(silent_frames.recv_timeout(WAIT).unwrap(), Frame::ping());

    let (live, live_frames) = fake_device(2, true);
    attach(&link, live);

    assert_eq!(live_frames.recv_timeout(WAIT).unwrap(), Frame::ping());
    assert_eq!(live_frames.recv_timeout(WAIT).unwrap().as_bytes(), &[16, 1, 200, 0]);
    waiter.join().unwrap().unwrap();
    assert_eq!(link.status(), DeviceStatus::Ready);
}
