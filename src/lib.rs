//! Host-side driver for Mercury embedded UHF RFID reader modules.
//!
//! # Features
//!
//! - `serial` - Serial port transport for desktop using serialport crate
//!
//! A [`TcpTransport`] for modules behind a serial-to-network bridge is always available.
//!
//! # Example
//!
//! ```ignore
//! use mercury_rfid::{Reader, ReaderConfig, SerialTransport};
//!
//! let transport = SerialTransport::new("/dev/ttyUSB0", 115200)?;
//! let mut reader = Reader::connect(transport, ReaderConfig::default())?;
//! reader.param_set("/reader/region/id", mercury_rfid::Region::Na)?;
//!
//! for tag in reader.read(500)? {
//!     println!("{} seen {} times on antenna {}", tag.epc_hex(), tag.read_count, tag.antenna);
//! }
//! ```

mod antenna;
mod background;
mod command;
mod config;
mod dedup;
mod device;
mod error;
mod frame;
mod message;
mod opcode;
mod params;
mod parser;
mod plan;
mod reader;
mod session;
mod tcp;
mod transport;
mod types;

#[cfg(feature = "serial")]
mod serial;

#[cfg(test)]
mod mock;

// Re-exports
pub use antenna::{AntennaMapping, TxRxMap};
pub use background::ListenerId;
pub use command::{CommandEngine, Outcome};
pub use config::ReaderConfig;
pub use dedup::DedupPolicy;
pub use device::{Device, ReadMultiple};
pub use error::{FaultKind, ReaderError, Result};
pub use frame::{crc16, Response};
pub use params::{ParamType, ParamValue};
pub use parser::EmbeddedCounts;
pub use plan::{MultiReadPlan, ReadPlan, SimpleReadPlan, TagFilter, TagOp};
pub use reader::Reader;
pub use session::Session;
pub use tcp::TcpTransport;
pub use transport::RfidTransport;
pub use types::{
    Bank, Gen2Q, Gen2Session, Gen2Tari, Gen2TagEncoding, Gen2Target, Gen2WriteMode, GpioPin,
    MetadataFlags, Model, PowerMode, Region, TagData, TagProtocol, TagReadRecord, UserMode,
    VersionInfo,
};

#[cfg(feature = "serial")]
pub use serial::SerialTransport;
