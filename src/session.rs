//! Physical channel ownership: wake preamble, deadlines, resync and baud negotiation

use log::{debug, info};
use std::time::{Duration, Instant};

use crate::command::status_error;
use crate::error::{ReaderError, Result};
use crate::frame::{self, Response, MIN_RESPONSE_LEN, START};
use crate::opcode;
use crate::transport::RfidTransport;
use crate::types::PowerMode;

pub const DEFAULT_TRANSPORT_TIMEOUT_MS: u32 = 100;

/// Rates tried after the configured one, most likely first
pub const FALLBACK_BAUD_RATES: [u32; 8] =
    [115200, 9600, 921600, 19200, 38400, 57600, 230400, 460800];

const PROBE_TIMEOUT_MS: u32 = 100;
const WAKE_CHUNK: usize = 64;

pub struct Session<T: RfidTransport> {
    transport: T,
    baud_rate: u32,
    transport_timeout_ms: u32,
    /// `None` until the module reports its mode
    power_mode: Option<PowerMode>,
}

impl<T: RfidTransport> Session<T> {
    pub fn new(transport: T, baud_rate: u32) -> Self {
        Self {
            transport,
            baud_rate,
            transport_timeout_ms: DEFAULT_TRANSPORT_TIMEOUT_MS,
            power_mode: None,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn into_transport(self) -> T {
        self.transport
    }

    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    pub fn transport_timeout_ms(&self) -> u32 {
        self.transport_timeout_ms
    }

    pub fn set_transport_timeout_ms(&mut self, timeout_ms: u32) {
        self.transport_timeout_ms = timeout_ms;
    }

    pub fn power_mode(&self) -> Option<PowerMode> {
        self.power_mode
    }

    pub fn set_power_mode(&mut self, mode: Option<PowerMode>) {
        self.power_mode = mode;
    }

    /// Switch only the host side of the line
    pub fn set_host_baud_rate(&mut self, baud_rate: u32) -> Result<()> {
        self.transport
            .set_baud_rate(baud_rate)
            .map_err(|e| ReaderError::Transport(format!("{:?}", e)))?;
        self.baud_rate = baud_rate;
        Ok(())
    }

    /// Write one request frame, preceded by the wake preamble when the module may be asleep.
    pub fn send_frame(&mut self, frame: &[u8]) -> Result<()> {
        self.transport
            .clear_input()
            .map_err(|e| ReaderError::Transport(format!("{:?}", e)))?;

        if self.power_mode.is_none_or(PowerMode::needs_wake) {
            self.send_wake()?;
        }

        debug!("Sending command: {:02X?}", frame);
        let written = self
            .transport
            .write(frame)
            .map_err(|e| ReaderError::Transport(format!("{:?}", e)))?;
        if written != frame.len() {
            return Err(ReaderError::comm(format!(
                "short write: {} of {} bytes",
                written,
                frame.len()
            )));
        }
        Ok(())
    }

    /// About 100ms of line activity at the current rate.
    fn send_wake(&mut self) -> Result<()> {
        let chunk = [START; WAKE_CHUNK];
        let total = (self.baud_rate / 100) as usize;
        let mut sent = 0;
        while sent < total {
            let n = (total - sent).min(WAKE_CHUNK);
            self.transport
                .write(&chunk[..n])
                .map_err(|e| ReaderError::Transport(format!("{:?}", e)))?;
            sent += n;
        }
        Ok(())
    }

    /// Read one response frame. Waits at most the transport timeout plus `command_timeout_ms`.
    pub fn receive_frame(&mut self, command_timeout_ms: u32) -> Result<Response> {
        let budget = u64::from(self.transport_timeout_ms) + u64::from(command_timeout_ms);
        let deadline = Instant::now() + Duration::from_millis(budget);
        let mut buf = Vec::with_capacity(64);

        self.fill(&mut buf, MIN_RESPONSE_LEN, deadline)?;
        if buf[0] != START {
            match frame::find_start(&buf) {
                Some(offset) => {
                    debug!("Start marker at offset {}, resyncing", offset);
                    buf.drain(..offset);
                    self.fill(&mut buf, MIN_RESPONSE_LEN, deadline)?;
                }
                None => {
                    return Err(ReaderError::Communication {
                        message: "no start marker in response header".into(),
                        partial: buf,
                    });
                }
            }
        }

        let total = buf[1] as usize + MIN_RESPONSE_LEN;
        self.fill(&mut buf, total, deadline)?;
        debug!("Received {} bytes: {:02X?}", buf.len(), buf);
        frame::decode_response(&buf)
    }

    fn fill(&mut self, buf: &mut Vec<u8>, want: usize, deadline: Instant) -> Result<()> {
        let mut chunk = [0u8; 256];
        while buf.len() < want {
            let now = Instant::now();
            if now >= deadline {
                return Err(ReaderError::Communication {
                    message: format!("timeout: expected {} bytes, received {}", want, buf.len()),
                    partial: buf.clone(),
                });
            }
            let remaining = (deadline - now).as_millis().clamp(1, u32::MAX as u128) as u32;
            let n = (want - buf.len()).min(chunk.len());
            let read = self
                .transport
                .read(&mut chunk[..n], remaining)
                .map_err(|e| ReaderError::Transport(format!("{:?}", e)))?;
            buf.extend_from_slice(&chunk[..read]);
        }
        Ok(())
    }

    /// Find the rate the module is listening at. The configured rate goes first.
    pub fn negotiate_baud_rate(&mut self, preferred: u32) -> Result<u32> {
        let probe = frame::encode_request(opcode::VERSION, &[])?;
        let candidates = std::iter::once(preferred)
            .chain(FALLBACK_BAUD_RATES.into_iter().filter(|&rate| rate != preferred));

        let mut last_failure = None;
        for rate in candidates {
            self.set_host_baud_rate(rate)?;
            let answer = self
                .send_frame(&probe)
                .and_then(|_| self.receive_frame(PROBE_TIMEOUT_MS));
            match answer {
                Ok(response) if response.status == 0 => {
                    info!("Reader answered at {} baud", rate);
                    return Ok(rate);
                }
                Ok(response) => return Err(status_error(&response)),
                Err(e) if e.is_communication() => {
                    debug!("No answer at {} baud: {}", rate, e);
                    last_failure = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        let (detail, partial) = match last_failure {
            Some(ReaderError::Communication { message, partial }) => (message, partial),
            _ => (String::new(), Vec::new()),
        };
        Err(ReaderError::Communication {
            message: format!("no response from reader at any baud rate (last: {detail})"),
            partial,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{ok, ScriptedTransport};

    fn session(transport: ScriptedTransport) -> Session<ScriptedTransport> {
        let mut session = Session::new(transport, 115200);
        session.set_transport_timeout_ms(20);
        session
    }

    #[test]
    fn wake_preamble_sized_to_baud_rate() {
        let transport = ScriptedTransport::new(vec![ok(0x03, &[])]);
        let preamble = transport.preamble_bytes.clone();
        let mut s = session(transport);

        s.send_frame(&[0xFF, 0x00, 0x03, 0x1D, 0x0C]).unwrap();
        assert_eq!(*preamble.lock(), 1152);
    }

    #[test]
    fn no_preamble_at_full_power() {
        let transport = ScriptedTransport::new(vec![ok(0x03, &[])]);
        let preamble = transport.preamble_bytes.clone();
        let mut s = session(transport);
        s.set_power_mode(Some(PowerMode::Full));

        s.send_frame(&[0xFF, 0x00, 0x03, 0x1D, 0x0C]).unwrap();
        assert_eq!(*preamble.lock(), 0);
    }

    #[test]
    fn resyncs_on_leading_noise() {
        let transport = ScriptedTransport::new(vec![ok(0x63, &[0x05])]).with_noise(&[0x00, 0x12]);
        let mut s = session(transport);

        s.send_frame(&[0xFF, 0x00, 0x63, 0x1D, 0x6C]).unwrap();
        let response = s.receive_frame(50).unwrap();
        assert_eq!(response.opcode, 0x63);
        assert_eq!(response.payload, vec![0x05]);
    }

    #[test]
    fn timeout_reports_partial_bytes() {
        let full = ok(0x29, &[0x01, 0x02, 0x03]);
        let transport = ScriptedTransport::new(vec![full[..6].to_vec()]);
        let mut s = session(transport);

        s.send_frame(&[0xFF, 0x00, 0x29, 0x1D, 0x26]).unwrap();
        match s.receive_frame(0) {
            Err(ReaderError::Communication { partial, .. }) => assert_eq!(partial, full[..6]),
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[test]
    fn negotiation_walks_fallback_list() {
        let transport = ScriptedTransport::new(vec![ok(0x03, &[0u8; 20])]).answering_at(9600);
        let history = transport.baud_history.clone();
        let mut s = session(transport);

        assert_eq!(s.negotiate_baud_rate(230400).unwrap(), 9600);
        assert_eq!(*history.lock(), vec![230400, 115200, 9600]);
        assert_eq!(s.baud_rate(), 9600);
    }

    #[test]
    fn negotiation_gives_up_after_every_rate() {
        let transport = ScriptedTransport::new(vec![]);
        let history = transport.baud_history.clone();
        let mut s = session(transport);

        let err = s.negotiate_baud_rate(115200).unwrap_err();
        assert!(err.to_string().contains("any baud rate"), "{err}");
        assert_eq!(history.lock().len(), 9);
    }
}
