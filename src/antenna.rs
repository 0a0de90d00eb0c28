//! Logical antenna numbers and their physical TX/RX port pairs

use std::collections::HashMap;

use crate::error::{ReaderError, Result};

/// One logical antenna and the ports it drives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AntennaMapping {
    pub antenna: u8,
    pub tx: u8,
    pub rx: u8,
}

impl AntennaMapping {
    pub fn new(antenna: u8, tx: u8, rx: u8) -> Self {
        Self { antenna, tx, rx }
    }

    /// Port pair as the module encodes it in tag metadata
    pub fn port_code(&self) -> u8 {
        (self.tx << 4) | (self.rx & 0x0F)
    }
}

/// Forward, reverse and transmit-port lookups, always replaced together.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TxRxMap {
    mappings: Vec<AntennaMapping>,
    forward: HashMap<u8, (u8, u8)>,
    reverse: HashMap<u8, u8>,
    transmit: HashMap<u8, u8>,
}

impl TxRxMap {
    /// Monostatic map: antenna `p` uses port `p` for both directions.
    pub fn monostatic(ports: &[u8]) -> Self {
        let mappings: Vec<_> = ports.iter().map(|&p| AntennaMapping::new(p, p, p)).collect();
        Self::build(&mappings)
    }

    fn build(mappings: &[AntennaMapping]) -> Self {
        let mut map = Self {
            mappings: mappings.to_vec(),
            ..Self::default()
        };
        for m in mappings {
            map.forward.insert(m.antenna, (m.tx, m.rx));
            map.reverse.insert(m.port_code(), m.antenna);
            map.transmit.insert(m.tx, m.antenna);
        }
        map
    }

    /// Replace the whole map. On any invalid entry the current map is left untouched.
    pub fn set(&mut self, mappings: &[AntennaMapping], valid_ports: &[u8]) -> Result<()> {
        let mut seen = Vec::with_capacity(mappings.len());
        for m in mappings {
            for port in [m.tx, m.rx] {
                if !valid_ports.contains(&port) {
                    return Err(ReaderError::InvalidArgument(format!(
                        "antenna {} refers to port {} which is not in the port list {:?}",
                        m.antenna, port, valid_ports
                    )));
                }
            }
            if seen.contains(&m.antenna) {
                return Err(ReaderError::InvalidArgument(format!(
                    "antenna {} mapped twice",
                    m.antenna
                )));
            }
            seen.push(m.antenna);
        }

        *self = Self::build(mappings);
        Ok(())
    }

    pub fn mappings(&self) -> &[AntennaMapping] {
        &self.mappings
    }

    pub fn ports_for(&self, antenna: u8) -> Option<(u8, u8)> {
        self.forward.get(&antenna).copied()
    }

    /// Logical antenna for a `(tx << 4) | rx` code from tag metadata
    pub fn antenna_for_code(&self, code: u8) -> Option<u8> {
        self.reverse.get(&code).copied()
    }

    pub fn antenna_for_transmit_port(&self, tx: u8) -> Option<u8> {
        self.transmit.get(&tx).copied()
    }
}
