//! Synchronous request/response exchange and status translation

use log::{debug, error};

use crate::error::{FaultKind, ReaderError, Result, FAULT_NO_TAGS_FOUND};
use crate::frame::{self, Response};
use crate::message::Cursor;
use crate::opcode;
use crate::session::Session;
use crate::transport::RfidTransport;

pub const DEFAULT_COMMAND_TIMEOUT_MS: u32 = 1000;

const ASSERT_MASK: u16 = 0x7F00;

/// Result of an exchange whose "no tags" status is expected
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Done(Vec<u8>),
    NoTagsFound,
}

/// Translate a non-zero status into the caller-facing error.
pub fn status_error(response: &Response) -> ReaderError {
    if response.status & ASSERT_MASK == ASSERT_MASK {
        let mut cursor = Cursor::new(&response.payload);
        let line = cursor.u32().unwrap_or(0);
        let file = String::from_utf8_lossy(cursor.rest())
            .trim_end_matches('\0')
            .to_string();
        return ReaderError::Assertion { line, file };
    }
    ReaderError::fault(response.status)
}

pub struct CommandEngine<T: RfidTransport> {
    session: Session<T>,
    command_timeout_ms: u32,
    /// Set while a streaming read-multiple is still producing frames
    streaming: bool,
    last_opcode: u8,
}

impl<T: RfidTransport> CommandEngine<T> {
    pub fn new(session: Session<T>) -> Self {
        Self {
            session,
            command_timeout_ms: DEFAULT_COMMAND_TIMEOUT_MS,
            streaming: false,
            last_opcode: 0,
        }
    }

    pub fn session(&self) -> &Session<T> {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut Session<T> {
        &mut self.session
    }

    pub fn into_session(self) -> Session<T> {
        self.session
    }

    pub fn command_timeout_ms(&self) -> u32 {
        self.command_timeout_ms
    }

    pub fn set_command_timeout_ms(&mut self, timeout_ms: u32) {
        self.command_timeout_ms = timeout_ms;
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    /// Send with the default command timeout and fail on any non-zero status.
    pub fn execute(&mut self, opcode: u8, payload: &[u8]) -> Result<Vec<u8>> {
        self.execute_timeout(opcode, payload, self.command_timeout_ms)
    }

    pub fn execute_timeout(&mut self, opcode: u8, payload: &[u8], timeout_ms: u32) -> Result<Vec<u8>> {
        let response = self.execute_unchecked(opcode, payload, timeout_ms)?;
        if response.status != 0 {
            let err = status_error(&response);
            if response.status != FAULT_NO_TAGS_FOUND {
                error!("Command 0x{:02X} failed: {}", opcode, err);
            }
            return Err(err);
        }
        Ok(response.payload)
    }

    /// Like `execute_timeout`, but "no tags found" is a value rather than an error.
    pub fn execute_outcome(&mut self, opcode: u8, payload: &[u8], timeout_ms: u32) -> Result<Outcome> {
        match self.execute_timeout(opcode, payload, timeout_ms) {
            Ok(payload) => Ok(Outcome::Done(payload)),
            Err(e) if e.kind() == Some(FaultKind::NoTagsFound) => Ok(Outcome::NoTagsFound),
            Err(e) => Err(e),
        }
    }

    /// Exchange one frame and hand back the raw status. Framing faults still fail.
    pub fn execute_unchecked(&mut self, opcode: u8, payload: &[u8], timeout_ms: u32) -> Result<Response> {
        self.send(opcode, payload)?;
        self.receive(timeout_ms)
    }

    fn send(&mut self, opcode: u8, payload: &[u8]) -> Result<()> {
        let request = frame::encode_request(opcode, payload)?;
        self.last_opcode = opcode;
        self.session.send_frame(&request)
    }

    fn receive(&mut self, timeout_ms: u32) -> Result<Response> {
        let response = self.session.receive_frame(timeout_ms)?;
        let continuation = self.streaming && response.opcode == opcode::MULTI_PROTOCOL_TAG_OP;
        if response.opcode != self.last_opcode && !continuation {
            self.streaming = false;
            return Err(ReaderError::Communication {
                message: format!(
                    "device was reset: sent opcode 0x{:02X}, response opcode 0x{:02X}",
                    self.last_opcode, response.opcode
                ),
                partial: frame::encode_response(response.opcode, response.status, &response.payload),
            });
        }
        Ok(response)
    }

    /// Send a streaming request without waiting; pull frames with [`Self::next_stream_frame`].
    pub fn begin_stream(&mut self, opcode: u8, payload: &[u8]) -> Result<()> {
        self.streaming = true;
        if let Err(e) = self.send(opcode, payload) {
            self.streaming = false;
            return Err(e);
        }
        debug!("Streaming started for opcode 0x{:02X}", opcode);
        Ok(())
    }

    /// Next frame of an active stream. `NoTagsFound` also ends the stream.
    pub fn next_stream_frame(&mut self, timeout_ms: u32) -> Result<Outcome> {
        if !self.streaming {
            return Err(ReaderError::NotReady("no stream in progress".into()));
        }
        let response = match self.receive(timeout_ms) {
            Ok(response) => response,
            Err(e) => {
                self.streaming = false;
                return Err(e);
            }
        };
        match response.status {
            0 => Ok(Outcome::Done(response.payload)),
            FAULT_NO_TAGS_FOUND => {
                self.streaming = false;
                Ok(Outcome::NoTagsFound)
            }
            _ => {
                self.streaming = false;
                Err(status_error(&response))
            }
        }
    }

    pub fn end_stream(&mut self) {
        if self.streaming {
            debug!("Streaming finished");
        }
        self.streaming = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{fault, ok, ScriptedTransport};
    use crate::types::PowerMode;

    fn engine(replies: Vec<Vec<u8>>) -> CommandEngine<ScriptedTransport> {
        let mut session = Session::new(ScriptedTransport::new(replies), 115200);
        session.set_transport_timeout_ms(20);
        session.set_power_mode(Some(PowerMode::Full));
        CommandEngine::new(session)
    }

    #[test]
    fn payload_returned_on_success() {
        let mut e = engine(vec![ok(0x67, &[0x01])]);
        assert_eq!(e.execute(0x67, &[]).unwrap(), vec![0x01]);
    }

    #[test]
    fn status_maps_to_fault_kind() {
        let mut e = engine(vec![fault(0x97, 0x010B)]);
        let err = e.execute(0x97, &[0x42]).unwrap_err();
        assert_eq!(err.kind(), Some(FaultKind::RegionNotSupported));
    }

    #[test]
    fn no_tags_found_is_an_outcome() {
        let mut e = engine(vec![fault(0x22, FAULT_NO_TAGS_FOUND)]);
        assert_eq!(e.execute_outcome(0x22, &[0x00], 100).unwrap(), Outcome::NoTagsFound);
    }

    #[test]
    fn unchecked_exposes_status() {
        let mut e = engine(vec![fault(0x6A, 0x0105)]);
        let response = e.execute_unchecked(0x6A, &[0x01, 0x08], 100).unwrap();
        assert_eq!(response.status, 0x0105);
    }

    #[test]
    fn opcode_mismatch_means_reset() {
        let mut e = engine(vec![ok(0x04, &[])]);
        let err = e.execute(0x63, &[]).unwrap_err();
        assert!(err.is_communication());
        assert!(err.to_string().contains("reset"));
    }

    #[test]
    fn assertion_carries_line_and_file() {
        let mut payload = vec![0x00, 0x00, 0x01, 0x2C];
        payload.extend_from_slice(b"tm_hal.c");
        let mut e = engine(vec![frame::encode_response(0x22, 0x7F01, &payload)]);
        match e.execute(0x22, &[]) {
            Err(ReaderError::Assertion { line, file }) => {
                assert_eq!(line, 300);
                assert_eq!(file, "tm_hal.c");
            }
            other => panic!("expected assertion, got {other:?}"),
        }
    }

    #[test]
    fn stream_pulls_frames_until_no_tags() {
        let mut burst = ok(0x22, &[0x10]);
        burst.extend(ok(opcode::MULTI_PROTOCOL_TAG_OP, &[0x11]));
        burst.extend(fault(0x22, FAULT_NO_TAGS_FOUND));
        let mut e = engine(vec![burst]);

        e.begin_stream(0x22, &[0x00]).unwrap();
        assert_eq!(e.next_stream_frame(100).unwrap(), Outcome::Done(vec![0x10]));
        assert_eq!(e.next_stream_frame(100).unwrap(), Outcome::Done(vec![0x11]));
        assert_eq!(e.next_stream_frame(100).unwrap(), Outcome::NoTagsFound);
        assert!(!e.is_streaming());
    }
}
