//! Read plans, singulation filters and tag operations

use crate::types::{Bank, TagProtocol};

pub const DEFAULT_WEIGHT: u32 = 1000;

/// What to inventory, where, and for what share of the time budget
#[derive(Debug, Clone, PartialEq)]
pub enum ReadPlan {
    Simple(SimpleReadPlan),
    Multi(MultiReadPlan),
}

impl ReadPlan {
    pub fn weight(&self) -> u32 {
        match self {
            Self::Simple(plan) => plan.weight,
            Self::Multi(plan) => plan.weight,
        }
    }
}

impl Default for ReadPlan {
    fn default() -> Self {
        Self::Simple(SimpleReadPlan::default())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimpleReadPlan {
    pub protocol: TagProtocol,
    /// Logical antennas; empty means every connected antenna
    pub antennas: Vec<u8>,
    pub filter: Option<TagFilter>,
    /// Operation performed on every tag found during the round
    pub op: Option<TagOp>,
    pub weight: u32,
}

impl SimpleReadPlan {
    pub fn new(protocol: TagProtocol, antennas: Vec<u8>) -> Self {
        Self {
            protocol,
            antennas,
            ..Self::default()
        }
    }
}

impl Default for SimpleReadPlan {
    fn default() -> Self {
        Self {
            protocol: TagProtocol::Gen2,
            antennas: Vec::new(),
            filter: None,
            op: None,
            weight: DEFAULT_WEIGHT,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MultiReadPlan {
    pub plans: Vec<ReadPlan>,
    pub weight: u32,
}

impl MultiReadPlan {
    pub fn new(plans: Vec<ReadPlan>) -> Self {
        Self {
            plans,
            weight: DEFAULT_WEIGHT,
        }
    }
}

/// Tag singulation criteria
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagFilter {
    /// Match a full EPC
    Epc(Vec<u8>),
    /// Gen2 Select against a bit range of one memory bank
    Gen2Select {
        invert: bool,
        bank: Bank,
        bit_pointer: u32,
        bit_length: u16,
        mask: Vec<u8>,
    },
}

/// Tag memory and state operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagOp {
    ReadData {
        bank: Bank,
        word_address: u32,
        word_count: u8,
    },
    WriteData {
        bank: Bank,
        word_address: u32,
        data: Vec<u16>,
    },
    Lock {
        access_password: u32,
        mask: u16,
        action: u16,
    },
    Kill {
        kill_password: u32,
    },
    /// Rewrite the EPC of the single tag in the field
    WriteEpc {
        epc: Vec<u8>,
    },
}

/// Divide `timeout_ms` by weight. The parts never add up to more than the whole.
pub fn split_timeout(weights: &[u32], timeout_ms: u32) -> Vec<u32> {
    let total: u64 = weights.iter().map(|&w| u64::from(w)).sum();
    if total == 0 {
        let share = if weights.is_empty() {
            0
        } else {
            timeout_ms / weights.len() as u32
        };
        return vec![share; weights.len()];
    }
    weights
        .iter()
        .map(|&w| (u64::from(timeout_ms) * u64::from(w) / total) as u32)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weighted_split() {
        assert_eq!(split_timeout(&[1, 3], 400), vec![100, 300]);
    }

    #[test]
    fn split_never_exceeds_parent() {
        let parts = split_timeout(&[1, 1, 1], 100);
        assert_eq!(parts, vec![33, 33, 33]);
        assert!(parts.iter().sum::<u32>() <= 100);
    }

    #[test]
    fn zero_weights_share_evenly() {
        assert_eq!(split_timeout(&[0, 0], 500), vec![250, 250]);
    }
}
