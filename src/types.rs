//! Types for RFID operations

use serde::{Deserialize, Serialize};

use crate::message::bytes_to_hex;

/// Air-interface protocols the module can speak
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TagProtocol {
    Iso180006b,
    Gen2,
    Ucode,
    Ipx64,
    Ipx256,
}

impl TagProtocol {
    pub fn code(self) -> u8 {
        match self {
            Self::Iso180006b => 0x03,
            Self::Gen2 => 0x05,
            Self::Ucode => 0x06,
            Self::Ipx64 => 0x07,
            Self::Ipx256 => 0x08,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0x03 => Some(Self::Iso180006b),
            0x05 => Some(Self::Gen2),
            0x06 => Some(Self::Ucode),
            0x07 => Some(Self::Ipx64),
            0x08 => Some(Self::Ipx256),
            _ => None,
        }
    }

    /// Decode the supported-protocol bitmask from the version reply: bit i is code i+1.
    pub fn from_mask(mask: u32) -> Vec<Self> {
        (0..32u8)
            .filter(|bit| mask & (1 << bit) != 0)
            .filter_map(|bit| Self::from_code(bit + 1))
            .collect()
    }
}

/// Regulatory regions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Region {
    Na,
    Eu,
    Kr,
    In,
    Jp,
    Prc,
    Eu2,
    Eu3,
    Kr2,
    Open,
}

impl Region {
    pub fn code(self) -> u8 {
        match self {
            Self::Na => 0x01,
            Self::Eu => 0x02,
            Self::Kr => 0x03,
            Self::In => 0x04,
            Self::Jp => 0x05,
            Self::Prc => 0x06,
            Self::Eu2 => 0x07,
            Self::Eu3 => 0x08,
            Self::Kr2 => 0x09,
            Self::Open => 0xFF,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0x01 => Some(Self::Na),
            0x02 => Some(Self::Eu),
            0x03 => Some(Self::Kr),
            0x04 => Some(Self::In),
            0x05 => Some(Self::Jp),
            0x06 => Some(Self::Prc),
            0x07 => Some(Self::Eu2),
            0x08 => Some(Self::Eu3),
            0x09 => Some(Self::Kr2),
            0xFF => Some(Self::Open),
            _ => None,
        }
    }
}

/// Module power-saving mode. Modes from `MedSave` up need a wake preamble.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PowerMode {
    Full = 0,
    MinSave = 1,
    MedSave = 2,
    MaxSave = 3,
}

impl PowerMode {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Full),
            1 => Some(Self::MinSave),
            2 => Some(Self::MedSave),
            3 => Some(Self::MaxSave),
            _ => None,
        }
    }

    pub fn needs_wake(self) -> bool {
        self as u8 >= Self::MedSave as u8
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UserMode {
    None = 0,
    Printer = 1,
    Portal = 3,
}

impl UserMode {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::None),
            1 => Some(Self::Printer),
            3 => Some(Self::Portal),
            _ => None,
        }
    }
}

/// Gen2 memory banks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bank {
    Reserved = 0,
    Epc = 1,
    Tid = 2,
    User = 3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Gen2Session {
    S0 = 0,
    S1 = 1,
    S2 = 2,
    S3 = 3,
}

impl Gen2Session {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::S0),
            1 => Some(Self::S1),
            2 => Some(Self::S2),
            3 => Some(Self::S3),
            _ => None,
        }
    }
}

/// Inventory target flag sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Gen2Target {
    A,
    B,
    AB,
    BA,
}

impl Gen2Target {
    pub fn code(self) -> u16 {
        match self {
            Self::A => 0x0100,
            Self::B => 0x0101,
            Self::AB => 0x0000,
            Self::BA => 0x0001,
        }
    }

    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            0x0100 => Some(Self::A),
            0x0101 => Some(Self::B),
            0x0000 => Some(Self::AB),
            0x0001 => Some(Self::BA),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Gen2TagEncoding {
    Fm0 = 0,
    M2 = 1,
    M4 = 2,
    M8 = 3,
}

impl Gen2TagEncoding {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Fm0),
            1 => Some(Self::M2),
            2 => Some(Self::M4),
            3 => Some(Self::M8),
            _ => None,
        }
    }
}

/// Q algorithm: dynamic, or static with a fixed initial Q
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Gen2Q {
    Dynamic,
    Static(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Gen2Tari {
    Tari25Us = 0,
    Tari12_5Us = 1,
    Tari6_25Us = 2,
}

impl Gen2Tari {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Tari25Us),
            1 => Some(Self::Tari12_5Us),
            2 => Some(Self::Tari6_25Us),
            _ => None,
        }
    }
}

/// How standalone Gen2 memory writes are issued
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Gen2WriteMode {
    WordOnly,
    BlockOnly,
    /// Try block write, fall back to word writes when the tag rejects it
    BlockFallback,
}

/// Which optional metadata fields a tag record carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MetadataFlags(pub u16);

impl MetadataFlags {
    pub const NONE: Self = Self(0x0000);
    pub const READ_COUNT: Self = Self(0x0001);
    pub const RSSI: Self = Self(0x0002);
    pub const ANTENNA_ID: Self = Self(0x0004);
    pub const FREQUENCY: Self = Self(0x0008);
    pub const TIMESTAMP: Self = Self(0x0010);
    pub const PHASE: Self = Self(0x0020);
    pub const PROTOCOL: Self = Self(0x0040);
    pub const DATA: Self = Self(0x0080);
    pub const GPIO: Self = Self(0x0100);
    pub const ALL: Self = Self(0x01FF);

    pub fn bits(self) -> u16 {
        self.0
    }

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for MetadataFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GpioPin {
    pub id: u8,
    pub high: bool,
}

/// Tag identity as it came off the air
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TagData {
    pub protocol: TagProtocol,
    pub epc: Vec<u8>,
    /// Protocol-control word, Gen2 only
    pub pc: Vec<u8>,
    pub crc: Vec<u8>,
}

impl TagData {
    pub fn new(protocol: TagProtocol, epc: Vec<u8>) -> Self {
        Self {
            protocol,
            epc,
            pc: Vec::new(),
            crc: Vec::new(),
        }
    }

    pub fn epc_hex(&self) -> String {
        bytes_to_hex(&self.epc)
    }
}

/// One tag observation with whatever metadata the module reported
#[derive(Debug, Clone, PartialEq)]
pub struct TagReadRecord {
    pub tag: TagData,
    pub metadata: MetadataFlags,
    pub read_count: u32,
    pub rssi: i32,
    /// Logical antenna once mapped; raw `(tx << 4) | rx` straight out of the parser
    pub antenna: u8,
    /// kHz
    pub frequency: u32,
    /// Milliseconds since `base_time_ms`
    pub timestamp: u32,
    pub phase: u16,
    pub read_protocol: Option<TagProtocol>,
    pub data: Vec<u8>,
    pub gpio: Vec<GpioPin>,
    /// Unix milliseconds when the inventory round started
    pub base_time_ms: u64,
}

impl TagReadRecord {
    pub fn new(tag: TagData) -> Self {
        Self {
            tag,
            metadata: MetadataFlags::NONE,
            read_count: 1,
            rssi: 0,
            antenna: 0,
            frequency: 0,
            timestamp: 0,
            phase: 0,
            read_protocol: None,
            data: Vec::new(),
            gpio: Vec::new(),
            base_time_ms: 0,
        }
    }

    pub fn epc_hex(&self) -> String {
        self.tag.epc_hex()
    }

    /// Absolute read time in Unix milliseconds
    pub fn time_ms(&self) -> u64 {
        self.base_time_ms + u64::from(self.timestamp)
    }
}

/// Hardware model identified from the version reply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Model {
    M5e,
    M5eCompact,
    M5eEu,
    M4e,
    M6e,
    Unknown(u8),
}

impl Model {
    pub fn from_code(code: u8) -> Self {
        match code {
            0x00 => Self::M5e,
            0x01 => Self::M5eCompact,
            0x02 => Self::M5eEu,
            0x03 => Self::M4e,
            0x18 => Self::M6e,
            other => Self::Unknown(other),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::M5e => "M5e",
            Self::M5eCompact => "M5e Compact",
            Self::M5eEu => "M5e EU",
            Self::M4e => "M4e",
            Self::M6e => "M6e",
            Self::Unknown(_) => "Unknown",
        }
    }

    /// Number of user GPIO pins
    pub fn gpio_count(self) -> u8 {
        match self {
            Self::M6e => 4,
            _ => 2,
        }
    }
}

/// Parsed VERSION reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionInfo {
    pub bootloader: [u8; 4],
    pub hardware: [u8; 4],
    pub firmware_date: [u8; 4],
    pub firmware_version: [u8; 4],
    pub protocols: Vec<TagProtocol>,
}

impl VersionInfo {
    pub fn model(&self) -> Model {
        Model::from_code(self.hardware[0])
    }

    pub fn hardware_string(&self) -> String {
        dotted(&self.hardware)
    }

    pub fn software_string(&self) -> String {
        format!(
            "{}-{}-BL{}",
            dotted(&self.firmware_version),
            bytes_to_hex(&self.firmware_date),
            dotted(&self.bootloader)
        )
    }
}

fn dotted(bytes: &[u8; 4]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(".")
}
