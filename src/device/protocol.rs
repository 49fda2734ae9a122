//! Fixed-size request/response frames spoken by the drive controller firmware.
//!
//! Every frame is exactly four bytes: a command (or status) code followed by
//! three parameters. There is no checksum and no length prefix.

use std::fmt;

pub const FRAME_LEN: usize = 4;

/// Wire codes. These values are part of the firmware contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Command {
    Ping = 0,
    Invalid = 1,
    QueryDrives = 8,
    ResetAll = 9,
    ResetOne = 10,
    SetFrequency = 16,
}

impl TryFrom<u8> for Command {
    type Error = u8;

    fn try_from(code: u8) -> Result<Self, u8> {
        match code {
            0 => Ok(Command::Ping),
            1 => Ok(Command::Invalid),
            8 => Ok(Command::QueryDrives),
            9 => Ok(Command::ResetAll),
            10 => Ok(Command::ResetOne),
            16 => Ok(Command::SetFrequency),
            other => Err(other),
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Frame([u8; FRAME_LEN]);

impl Frame {
    pub fn encode(command: Command, p1: u8, p2: u8, p3: u8) -> Self {
        Frame([command as u8, p1, p2, p3])
    }

    pub fn from_bytes(bytes: [u8; FRAME_LEN]) -> Self {
        Frame(bytes)
    }

    pub fn ping() -> Self {
        Self::encode(Command::Ping, 0, 0, 0)
    }

    pub fn query_drives() -> Self {
        Self::encode(Command::QueryDrives, 0, 0, 0)
    }

    pub fn reset_all() -> Self {
        Self::encode(Command::ResetAll, 0, 0, 0)
    }

    pub fn reset_one(drive: u8) -> Self {
        Self::encode(Command::ResetOne, drive, 0, 0)
    }

    pub fn set_frequency(drive: u8, hz: f64) -> Self {
        let (p2, p3) = encode_frequency(hz);
        Self::encode(Command::SetFrequency, drive, p2, p3)
    }

    pub fn code(&self) -> u8 {
        self.0[0]
    }

    pub fn command(&self) -> Option<Command> {
        Command::try_from(self.code()).ok()
    }

    pub fn params(&self) -> (u8, u8, u8) {
        (self.0[1], self.0[2], self.0[3])
    }

    pub fn as_bytes(&self) -> &[u8; FRAME_LEN] {
        &self.0
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Frame[{:#04o} {} {} {}]",
            self.code(),
            self.0[1],
            self.0[2],
            self.0[3]
        )
    }
}

/// Splits a frequency into the two bytes the firmware expects.
///
/// The first byte saturates at 255; the second carries the remainder above
/// 255 modulo 255. This is lossy and asymmetric, and the firmware depends on
/// exactly this shape.
pub fn encode_frequency(hz: f64) -> (u8, u8) {
    // f64::max drops NaN in favour of 0.0
    let hz = hz.max(0.0);
    if hz > 255.0 {
        let rest = (hz - 255.0).round() as u64 % 255;
        (255, rest as u8)
    } else {
        (hz.round() as u8, 0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolEvent {
    Ready,
    DriveCount(u8),
    Unknown(Frame),
}

pub fn decode(frame: Frame) -> ProtocolEvent {
    match frame.command() {
        Some(Command::Ping) => ProtocolEvent::Ready,
        Some(Command::QueryDrives) => ProtocolEvent::DriveCount(frame.0[1]),
        _ => ProtocolEvent::Unknown(frame),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_codes_are_stable() {
        assert_eq!(Command::Ping as u8, 0);
        assert_eq!(Command::Invalid as u8, 1);
        assert_eq!(Command::QueryDrives as u8, 8);
        assert_eq!(Command::ResetAll as u8, 9);
        assert_eq!(Command::ResetOne as u8, 10);
        assert_eq!(Command::SetFrequency as u8, 16);
        assert_eq!(Command::try_from(17), Err(17));
    }

    #[test]
    fn encodes_defaults_to_zero_params() {
        assert_eq!(Frame::ping().as_bytes(), &[0, 0, 0, 0]);
        assert_eq!(Frame::query_drives().as_bytes(), &[8, 0, 0, 0]);
        assert_eq!(Frame::reset_one(3).as_bytes(), &[10, 3, 0, 0]);
    }

    #[test]
    fn frequency_encoding_boundaries() {
        assert_eq!(encode_frequency(0.0), (0, 0));
        assert_eq!(encode_frequency(255.0), (255, 0));
        assert_eq!(encode_frequency(300.0), (255, 45));
        assert_eq!(encode_frequency(220.4), (220, 0));
        assert_eq!(encode_frequency(254.6), (255, 0));
        assert_eq!(encode_frequency(510.0), (255, 0));
        assert_eq!(encode_frequency(600.0), (255, 90));
    }

    #[test]
    fn negative_and_nan_frequencies_are_silence() {
        assert_eq!(encode_frequency(-12.0), (0, 0));
        assert_eq!(encode_frequency(f64::NAN), (0, 0));
    }

    #[test]
    fn set_frequency_frame_layout() {
        assert_eq!(Frame::set_frequency(2, 300.0).as_bytes(), &[16, 2, 255, 45]);
    }

    #[test]
    fn decodes_responses() {
        assert_eq!(decode(Frame::from_bytes([0, 0, 0, 0])), ProtocolEvent::Ready);
        assert_eq!(
            decode(Frame::from_bytes([8, 6, 0, 0])),
            ProtocolEvent::DriveCount(6)
        );
        let invalid = Frame::from_bytes([1, 16, 0, 0]);
        assert_eq!(decode(invalid), ProtocolEvent::Unknown(invalid));
        let junk = Frame::from_bytes([0xff, 1, 2, 3]);
        assert_eq!(decode(junk), ProtocolEvent::Unknown(junk));
    }
}
