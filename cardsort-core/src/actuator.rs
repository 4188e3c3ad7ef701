//! Actuator link.
//!
//! The sorter controller speaks a framed text protocol: every message is
//! wrapped in `<` and `>`. After each bin label the host blocks until the
//! controller reports it is ready again.

use std::io::{ErrorKind, Read, Write};

use tracing::{debug, info};

use crate::error::{CardsortError, Result};
use crate::router::BinLabel;

pub const START_MARKER: u8 = b'<';
pub const END_MARKER: u8 = b'>';

/// Handshake the controller sends once it can accept another card.
pub const READY_MESSAGE: &str = "Arduino is ready";

/// Destination for routed bin labels.
pub trait BinSink {
    fn send(&mut self, label: &BinLabel) -> Result<()>;
}

/// Sink that only logs; used when no controller is attached.
#[derive(Debug, Default)]
pub struct LogSink {
    sent: usize,
}

impl LogSink {
    pub fn sent(&self) -> usize {
        self.sent
    }
}

impl BinSink for LogSink {
    fn send(&mut self, label: &BinLabel) -> Result<()> {
        self.sent += 1;
        info!(bin = %label, "Bin selected (no actuator attached)");
        Ok(())
    }
}

/// Framed link over any byte stream (serial device, socket, test double).
#[derive(Debug)]
pub struct FramedLink<T> {
    stream: T,
    ready_message: String,
}

impl<T: Read + Write> FramedLink<T> {
    pub fn new(stream: T) -> Self {
        Self {
            stream,
            ready_message: READY_MESSAGE.to_string(),
        }
    }

    pub fn with_ready_message(mut self, message: impl Into<String>) -> Self {
        self.ready_message = message.into();
        self
    }

    /// Open the link: wait for the controller's initial handshake.
    pub fn connect(stream: T) -> Result<Self> {
        let mut link = Self::new(stream);
        link.wait_ready()?;
        Ok(link)
    }

    pub fn into_inner(self) -> T {
        self.stream
    }

    /// Block until a frame containing the ready message arrives.
    pub fn wait_ready(&mut self) -> Result<()> {
        loop {
            let message = self.read_frame()?;
            debug!(message = %message, "Actuator message");
            if message.contains(&self.ready_message) {
                return Ok(());
            }
        }
    }

    /// Read one framed message. Bytes before the start marker are dropped.
    pub fn read_frame(&mut self) -> Result<String> {
        while self.read_byte()? != START_MARKER {}

        let mut payload = Vec::new();
        loop {
            match self.read_byte()? {
                END_MARKER => break,
                START_MARKER => {}
                byte => payload.push(byte),
            }
        }
        Ok(String::from_utf8_lossy(&payload).into_owned())
    }

    fn read_byte(&mut self) -> Result<u8> {
        let mut byte = [0u8; 1];
        loop {
            match self.stream.read(&mut byte) {
                Ok(0) => {
                    return Err(CardsortError::ActuatorError(
                        "Link closed while waiting for the controller".to_string(),
                    ))
                }
                Ok(_) => return Ok(byte[0]),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(CardsortError::ActuatorError(format!("Read failed: {e}"))),
            }
        }
    }
}

impl<T: Read + Write> BinSink for FramedLink<T> {
    fn send(&mut self, label: &BinLabel) -> Result<()> {
        let mut frame = Vec::with_capacity(label.as_str().len() + 2);
        frame.push(START_MARKER);
        frame.extend_from_slice(label.as_str().as_bytes());
        frame.push(END_MARKER);

        self.stream
            .write_all(&frame)
            .and_then(|_| self.stream.flush())
            .map_err(|e| CardsortError::ActuatorError(format!("Write failed: {e}")))?;
        debug!(bin = %label, "Bin label sent");
        self.wait_ready()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// Scripted controller: reads come from `incoming`, writes are captured.
    struct FakePort {
        incoming: Cursor<Vec<u8>>,
        written: Vec<u8>,
    }

    impl FakePort {
        fn new(incoming: &str) -> Self {
            Self {
                incoming: Cursor::new(incoming.as_bytes().to_vec()),
                written: Vec::new(),
            }
        }
    }

    impl Read for FakePort {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.incoming.read(buf)
        }
    }

    impl Write for FakePort {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_send_frames_label_and_waits_for_ready() {
        let port = FakePort::new("noise<Moving tray7><Arduino is ready>");
        let mut link = FramedLink::new(port);
        link.send(&BinLabel::bin("tray7")).unwrap();
        assert_eq!(link.into_inner().written, b"<tray7>");
    }

    #[test]
    fn test_reject_label_payload() {
        let port = FakePort::new("<Arduino is ready>");
        let mut link = FramedLink::new(port);
        link.send(&BinLabel::Reject).unwrap();
        assert_eq!(link.into_inner().written, b"<RejectCard>");
    }

    #[test]
    fn test_read_frame_drops_nested_start_markers() {
        let mut link = FramedLink::new(FakePort::new("xx<a<b>"));
        assert_eq!(link.read_frame().unwrap(), "ab");
    }

    #[test]
    fn test_closed_link_is_error() {
        let mut link = FramedLink::new(FakePort::new("<Busy>"));
        let err = link.send(&BinLabel::bin("tray1")).unwrap_err();
        assert!(matches!(err, CardsortError::ActuatorError(_)));
    }

    #[test]
    fn test_connect_consumes_handshake() {
        let link = FramedLink::connect(FakePort::new("<Arduino is ready>")).unwrap();
        assert!(link.into_inner().written.is_empty());
    }

    #[test]
    fn test_log_sink_counts() {
        let mut sink = LogSink::default();
        sink.send(&BinLabel::bin("Blue")).unwrap();
        sink.send(&BinLabel::Reject).unwrap();
        assert_eq!(sink.sent(), 2);
    }
}
