//! Scripted transports shared by the unit tests

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use crate::frame::{encode_response, START};
use crate::transport::RfidTransport;

/// Successful response frame
pub(crate) fn ok(opcode: u8, payload: &[u8]) -> Vec<u8> {
    encode_response(opcode, 0, payload)
}

/// Response frame carrying a fault status
pub(crate) fn fault(opcode: u8, code: u16) -> Vec<u8> {
    encode_response(opcode, code, &[])
}

/// Answers each request frame with the next queued reply.
///
/// Wake preambles (all 0xFF) are swallowed. A reply may hold several frames
/// back to back, which is how streaming responses are scripted. Once the queue
/// is empty, requests are answered from the per-opcode defaults, if any.
pub(crate) struct ScriptedTransport {
    replies: VecDeque<Vec<u8>>,
    defaults: HashMap<u8, Vec<u8>>,
    pending: VecDeque<u8>,
    /// Only answer while the host is at this rate
    answer_at: Option<u32>,
    baud_rate: u32,
    pub(crate) sent: Arc<Mutex<Vec<Vec<u8>>>>,
    pub(crate) preamble_bytes: Arc<Mutex<usize>>,
    pub(crate) baud_history: Arc<Mutex<Vec<u32>>>,
}

impl ScriptedTransport {
    pub(crate) fn new(replies: Vec<Vec<u8>>) -> Self {
        Self {
            replies: replies.into(),
            defaults: HashMap::new(),
            pending: VecDeque::new(),
            answer_at: None,
            baud_rate: 0,
            sent: Arc::new(Mutex::new(Vec::new())),
            preamble_bytes: Arc::new(Mutex::new(0)),
            baud_history: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub(crate) fn answering_at(mut self, baud_rate: u32) -> Self {
        self.answer_at = Some(baud_rate);
        self
    }

    /// Raw bytes already waiting on the line before any request
    pub(crate) fn with_noise(mut self, noise: &[u8]) -> Self {
        self.pending.extend(noise);
        self
    }

    /// Reply used for `opcode` whenever the scripted queue has run dry
    pub(crate) fn with_default(mut self, opcode: u8, reply: Vec<u8>) -> Self {
        self.defaults.insert(opcode, reply);
        self
    }
}

impl RfidTransport for ScriptedTransport {
    type Error = std::io::Error;

    fn write(&mut self, data: &[u8]) -> Result<usize, Self::Error> {
        if data.iter().all(|&b| b == START) {
            *self.preamble_bytes.lock() += data.len();
            return Ok(data.len());
        }
        self.sent.lock().push(data.to_vec());
        let listening = self.answer_at.is_none_or(|rate| rate == self.baud_rate);
        if listening {
            let reply = self
                .replies
                .pop_front()
                .or_else(|| data.get(2).and_then(|op| self.defaults.get(op).cloned()));
            if let Some(reply) = reply {
                self.pending.extend(reply);
            }
        }
        Ok(data.len())
    }

    fn read(&mut self, buf: &mut [u8], _timeout_ms: u32) -> Result<usize, Self::Error> {
        if self.pending.is_empty() {
            std::thread::sleep(std::time::Duration::from_millis(1));
            return Ok(0);
        }
        let n = buf.len().min(self.pending.len());
        for (slot, byte) in buf.iter_mut().zip(self.pending.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn clear_input(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<(), Self::Error> {
        self.baud_rate = baud_rate;
        self.baud_history.lock().push(baud_rate);
        Ok(())
    }
}
