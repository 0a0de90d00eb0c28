//! Binary frame envelope and CRC-16
//!
//! Request:  `FF | len | opcode | payload | crc_hi crc_lo`
//! Response: `FF | len | opcode | status(2) | payload | crc_hi crc_lo`
//!
//! `len` counts payload bytes only. The CRC covers everything between the start
//! marker and the CRC itself.

use crate::error::{ReaderError, Result};

pub const START: u8 = 0xFF;

/// Largest payload a single frame can carry
pub const MAX_PAYLOAD: usize = 250;

/// Shortest possible response: marker, len, opcode, status, crc
pub const MIN_RESPONSE_LEN: usize = 7;

/// How far into a noisy read the start marker may appear
pub const MAX_MARKER_OFFSET: usize = 5;

const CRC_POLY: u16 = 0x1021;
const CRC_SEED: u16 = 0xFFFF;

/// CCITT polynomial, seed 0xFFFF, MSB first, message bits shifted through the register.
pub fn crc16(bytes: &[u8]) -> u16 {
    let mut crc = CRC_SEED;
    for &byte in bytes {
        for bit in (0..8).rev() {
            let carry = crc & 0x8000 != 0;
            crc = (crc << 1) | u16::from((byte >> bit) & 1);
            if carry {
                crc ^= CRC_POLY;
            }
        }
    }
    crc
}

/// A decoded response frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub opcode: u8,
    pub status: u16,
    pub payload: Vec<u8>,
}

pub fn encode_request(opcode: u8, payload: &[u8]) -> Result<Vec<u8>> {
    if payload.len() > MAX_PAYLOAD {
        return Err(ReaderError::InvalidArgument(format!(
            "payload of {} bytes exceeds frame limit of {}",
            payload.len(),
            MAX_PAYLOAD
        )));
    }

    let mut frame = Vec::with_capacity(payload.len() + 5);
    frame.push(START);
    frame.push(payload.len() as u8);
    frame.push(opcode);
    frame.extend_from_slice(payload);
    let crc = crc16(&frame[1..]);
    frame.extend_from_slice(&crc.to_be_bytes());
    Ok(frame)
}

/// Build a response frame the way the module does. Used by simulators and tests.
pub fn encode_response(opcode: u8, status: u16, payload: &[u8]) -> Vec<u8> {
    let payload = &payload[..payload.len().min(MAX_PAYLOAD)];
    let mut frame = Vec::with_capacity(payload.len() + MIN_RESPONSE_LEN);
    frame.push(START);
    frame.push(payload.len() as u8);
    frame.push(opcode);
    frame.extend_from_slice(&status.to_be_bytes());
    frame.extend_from_slice(payload);
    let crc = crc16(&frame[1..]);
    frame.extend_from_slice(&crc.to_be_bytes());
    frame
}

/// Offset of the start marker within a freshly read header, if any.
pub fn find_start(header: &[u8]) -> Option<usize> {
    header
        .iter()
        .take(MAX_MARKER_OFFSET + 1)
        .position(|&b| b == START)
}

/// Decode one complete response frame beginning at the start marker.
pub fn decode_response(bytes: &[u8]) -> Result<Response> {
    if bytes.len() < MIN_RESPONSE_LEN {
        return Err(ReaderError::Communication {
            message: format!("frame too short: {} bytes", bytes.len()),
            partial: bytes.to_vec(),
        });
    }
    if bytes[0] != START {
        return Err(ReaderError::Communication {
            message: format!("missing start marker, got 0x{:02X}", bytes[0]),
            partial: bytes.to_vec(),
        });
    }

    let len = bytes[1] as usize;
    if bytes.len() != len + MIN_RESPONSE_LEN {
        return Err(ReaderError::Communication {
            message: format!(
                "length byte says {} payload bytes but frame holds {}",
                len,
                bytes.len() as isize - MIN_RESPONSE_LEN as isize
            ),
            partial: bytes.to_vec(),
        });
    }

    let crc_at = bytes.len() - 2;
    let expected = u16::from_be_bytes([bytes[crc_at], bytes[crc_at + 1]]);
    let actual = crc16(&bytes[1..crc_at]);
    if expected != actual {
        return Err(ReaderError::Communication {
            message: format!("CRC mismatch: frame 0x{expected:04X}, computed 0x{actual:04X}"),
            partial: bytes.to_vec(),
        });
    }

    Ok(Response {
        opcode: bytes[2],
        status: u16::from_be_bytes([bytes[3], bytes[4]]),
        payload: bytes[5..crc_at].to_vec(),
    })
}
