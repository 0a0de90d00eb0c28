//! Fault taxonomy for reader operations

use thiserror::Error;

use crate::params::ParamType;

/// Status code the module returns when an inventory round saw nothing.
pub const FAULT_NO_TAGS_FOUND: u16 = 0x0400;

/// Classification of a non-zero module status code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultKind {
    /// Opcode or feature not implemented on this firmware
    UnsupportedOperation,
    /// Value rejected by device-side validation
    InvalidParameterValue,
    PowerOutOfRange,
    RegionNotSupported,
    /// Benign end-of-inventory signal
    NoTagsFound,
    /// Tag ID buffer exhausted or full
    TagBuffer,
    /// Operation rejected by the tag itself
    ProtocolSpecificTagFault,
    /// Bootloader or flash fault
    FlashFault,
    UnknownDeviceFault,
}

impl FaultKind {
    pub fn from_status(code: u16) -> Self {
        match code {
            0x0100 | 0x0104 | 0x0105 | 0x010A => Self::InvalidParameterValue,
            0x0101 | 0x0102 | 0x0109 | 0x0407 => Self::UnsupportedOperation,
            0x0103 | 0x0106 => Self::PowerOutOfRange,
            0x010B => Self::RegionNotSupported,
            0x0200..=0x02FF | 0x0300..=0x03FF => Self::FlashFault,
            FAULT_NO_TAGS_FOUND => Self::NoTagsFound,
            0x0401..=0x04FF => Self::ProtocolSpecificTagFault,
            0x0600..=0x06FF => Self::TagBuffer,
            _ => Self::UnknownDeviceFault,
        }
    }

    /// Faults that mean "this hardware/firmware cannot do that".
    pub fn is_unsupported(self) -> bool {
        matches!(
            self,
            Self::UnsupportedOperation | Self::InvalidParameterValue
        )
    }
}

/// Human-readable description of a module status code
pub fn fault_message(code: u16) -> &'static str {
    match code {
        0x0100 => "wrong number of data bytes in message",
        0x0101 => "invalid opcode",
        0x0102 => "unimplemented opcode",
        0x0103 => "requested power too high",
        0x0104 => "invalid frequency",
        0x0105 => "invalid parameter value",
        0x0106 => "requested power too low",
        0x0109 => "unimplemented feature",
        0x010A => "invalid baud rate",
        0x010B => "invalid region",
        0x0200 => "bootloader: invalid image CRC",
        0x0201 => "bootloader: invalid application end address",
        0x0300 => "flash: bad erase password",
        0x0301 => "flash: bad write password",
        0x0302 => "flash: undefined error",
        0x0303 => "flash: illegal sector",
        0x0304 => "flash: write to non-erased area",
        0x0305 => "flash: write to illegal sector",
        0x0306 => "flash: verify failed",
        0x0400 => "no tags found",
        0x0401 => "no protocol defined",
        0x0402 => "invalid protocol specified",
        0x0403 => "write passed, lock failed",
        0x0404 => "no data could be read from tag",
        0x0405 => "analog front end not on",
        0x0406 => "tag write failed",
        0x0407 => "not implemented for this protocol",
        0x0408 => "invalid write data",
        0x0409 => "invalid tag address",
        0x040A => "general tag error",
        0x040B => "data too large",
        0x040C => "invalid kill password",
        0x040E => "kill failed",
        0x040F => "bit decoding failed",
        0x0410 => "invalid EPC",
        0x0411 => "invalid number of data",
        0x0420 => "Gen2 protocol error",
        0x0423 => "Gen2 memory overrun or bad PC",
        0x0424 => "Gen2 memory locked",
        0x042B => "Gen2 insufficient power",
        0x042F => "Gen2 non-specific error",
        0x0430 => "Gen2 unknown error",
        0x0500 => "invalid frequency for analog hardware",
        0x0501 => "channel occupied",
        0x0502 => "transmitter already on",
        0x0503 => "antenna not connected",
        0x0504 => "temperature exceeds limits",
        0x0505 => "high return loss",
        0x0507 => "invalid antenna configuration",
        0x0600 => "not enough tags in tag buffer",
        0x0601 => "tag buffer full",
        0x0602 => "repeated tag ID in buffer",
        0x0603 => "requested tag count too large",
        0x7F00 => "unknown system error",
        _ => "unrecognized fault code",
    }
}

#[derive(Debug, Error)]
pub enum ReaderError {
    /// Timeout, CRC mismatch, lost framing or device reset
    #[error("communication failure: {message}")]
    Communication { message: String, partial: Vec<u8> },

    #[error("{kind:?} (0x{code:04X}): {message}")]
    Fault {
        kind: FaultKind,
        code: u16,
        message: &'static str,
    },

    #[error("module assertion failed at {file}:{line}")]
    Assertion { line: u32, file: String },

    #[error("no such parameter: {0}")]
    NotFound(String),

    #[error("parameter is read-only: {0}")]
    ReadOnly(String),

    #[error("wrong value type for {name}: expected {expected:?}, got {actual:?}")]
    TypeMismatch {
        name: String,
        expected: ParamType,
        actual: ParamType,
    },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Response payload shorter or shaped differently than the command implies
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Reader state does not allow the operation yet
    #[error("{0}")]
    NotReady(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("configuration error: {0}")]
    Config(#[from] serde_json::Error),
}

impl ReaderError {
    pub fn fault(code: u16) -> Self {
        Self::Fault {
            kind: FaultKind::from_status(code),
            code,
            message: fault_message(code),
        }
    }

    pub(crate) fn comm(message: impl Into<String>) -> Self {
        Self::Communication {
            message: message.into(),
            partial: Vec::new(),
        }
    }

    pub fn kind(&self) -> Option<FaultKind> {
        match self {
            Self::Fault { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    pub fn is_communication(&self) -> bool {
        matches!(self, Self::Communication { .. })
    }
}

pub type Result<T> = std::result::Result<T, ReaderError>;
