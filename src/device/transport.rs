use std::io::{self, Read, Write};
use std::time::Duration;

use super::protocol::{FRAME_LEN, Frame};

pub type FrameReader = Box<dyn Read + Send>;
pub type FrameWriter = Box<dyn Write + Send>;

/// Serial endpoint of a drive controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub path: String,
    pub baud_rate: u32,
    pub read_timeout: Duration,
}

impl Endpoint {
    pub fn new(path: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            path: path.into(),
            baud_rate,
            read_timeout: Duration::from_secs(1),
        }
    }
}

/// Opens the port and splits it into independent read and write halves.
pub fn open_serial(endpoint: &Endpoint) -> Result<(FrameReader, FrameWriter), serialport::Error> {
    let port = serialport::new(&endpoint.path, endpoint.baud_rate)
        .data_bits(serialport::DataBits::Eight)
        .parity(serialport::Parity::None)
        .stop_bits(serialport::StopBits::One)
        .flow_control(serialport::FlowControl::None)
        .timeout(endpoint.read_timeout)
        .open()?;
    let reader = port.try_clone()?;
    Ok((Box::new(reader), Box::new(port)))
}

/// Collects bytes into frames. Read timeouts are not failures on a quiet
/// line, so a partial frame survives them.
#[derive(Debug, Default)]
pub struct FrameAssembler {
    buf: [u8; FRAME_LEN],
    filled: usize,
}

impl FrameAssembler {
    /// Returns `Ok(None)` when the read timed out before a frame completed.
    pub fn poll<R: Read + ?Sized>(&mut self, reader: &mut R) -> io::Result<Option<Frame>> {
        while self.filled < FRAME_LEN {
            match reader.read(&mut self.buf[self.filled..]) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "device closed the connection",
                    ));
                }
                Ok(n) => self.filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e)
                    if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) =>
                {
                    return Ok(None);
                }
                Err(e) => return Err(e),
            }
        }
        self.filled = 0;
        Ok(Some(Frame::from_bytes(self.buf)))
    }
}

/// Blocks until one whole frame has arrived.
pub fn read_frame<R: Read + ?Sized>(reader: &mut R) -> io::Result<Frame> {
    let mut assembler = FrameAssembler::default();
    loop {
        if let Some(frame) = assembler.poll(reader)? {
            return Ok(frame);
        }
    }
}

pub fn write_frame<W: Write + ?Sized>(writer: &mut W, frame: &Frame) -> io::Result<()> {
    writer.write_all(frame.as_bytes())?;
    writer.flush()
}
