//! Module command set and the state behind the parameter registry
//!
//! Every `cmd_*` method is one request/response exchange. [`Device`] also keeps the
//! host-side view of the module (antenna map, current protocol, search list, region)
//! so the read loop can skip commands whose setting is already in place.

use log::{debug, info, warn};

use crate::antenna::TxRxMap;
use crate::command::{CommandEngine, Outcome};
use crate::config::ReaderConfig;
use crate::dedup::DedupPolicy;
use crate::error::{ReaderError, Result};
use crate::message::{Cursor, MessageBuilder};
use crate::opcode;
use crate::params::{ParamBackend, ParamId, ParamValue};
use crate::parser::{self, EmbeddedCounts, OPTION_METADATA};
use crate::plan::{ReadPlan, TagFilter, TagOp};
use crate::session::Session;
use crate::transport::RfidTransport;
use crate::types::{
    Bank, GpioPin, Gen2Q, Gen2Session, Gen2Tari, Gen2TagEncoding, Gen2Target, Gen2WriteMode,
    MetadataFlags, Model, PowerMode, Region, TagData, TagProtocol, TagReadRecord, UserMode,
    VersionInfo,
};

/// Read-multiple search flags
pub const SEARCH_CONFIGURED_LIST: u16 = 0x0003;
pub const SEARCH_EMBEDDED_OP: u16 = 0x0004;
pub const SEARCH_TAG_STREAMING: u16 = 0x0008;
pub const SEARCH_LARGE_TAG_POPULATION: u16 = 0x0010;

/// Gen2 memory commands move at most this many words
pub const MAX_WORD_COUNT: u8 = 127;

/// Tag-specific write failure, the cue to retry a block write word by word
const FAULT_GEN2_BLOCK_WRITE: u16 = 0x0406;

const PROGRAM_MASK: u8 = 0x03;
const PROGRAM_BOOTLOADER: u8 = 0x01;

/// Reader configuration keys (GET/SET_READER_OPTIONAL_PARAMS)
mod config_key {
    pub const UNIQUE_BY_ANTENNA: u8 = 0x00;
    pub const TRANSMIT_POWER_SAVE: u8 = 0x01;
    pub const EXTENDED_EPC: u8 = 0x02;
    pub const ANTENNA_CONTROL_GPIO: u8 = 0x03;
    pub const SAFETY_ANTENNA_CHECK: u8 = 0x04;
    pub const RECORD_HIGHEST_RSSI: u8 = 0x06;
    pub const UNIQUE_BY_DATA: u8 = 0x08;
    pub const RSSI_IN_DBM: u8 = 0x09;
}

/// Protocol configuration keys (GET/SET_PROTOCOL_PARAM)
mod protocol_key {
    pub const GEN2_SESSION: u8 = 0x00;
    pub const GEN2_TARGET: u8 = 0x01;
    pub const GEN2_TAG_ENCODING: u8 = 0x02;
    pub const BLF: u8 = 0x10;
    pub const GEN2_TARI: u8 = 0x11;
    pub const GEN2_Q: u8 = 0x12;
}

const REGION_KEY_LBT: u8 = 0x40;

const GEN2_BLF_KHZ: [(u8, i32); 4] = [(0, 250), (2, 400), (3, 40), (4, 640)];
const ISO180006B_BLF_KHZ: [(u8, i32); 2] = [(0, 40), (1, 160)];

fn clamp_u16(ms: u32) -> u16 {
    ms.min(u32::from(u16::MAX)) as u16
}

/// Append Gen2 singulation bytes and fill in the option byte at `option_at`.
///
/// With `use_password` the access password precedes the select criteria.
pub(crate) fn gen2_filter_bytes(
    m: &mut MessageBuilder,
    option_at: usize,
    filter: Option<&TagFilter>,
    password: u32,
    use_password: bool,
) -> Result<()> {
    let Some(filter) = filter else {
        m.set_at(option_at, 0);
        return Ok(());
    };

    if use_password {
        m.set_at(option_at, 0x05);
        m.u32(password);
    }

    match filter {
        TagFilter::Epc(epc) => {
            let bits = u8::try_from(epc.len() * 8).map_err(|_| {
                ReaderError::InvalidArgument(format!(
                    "EPC filter of {} bytes exceeds 255 bits",
                    epc.len()
                ))
            })?;
            m.set_at(option_at, 0x01);
            m.u8(bits).bytes(epc);
        }
        TagFilter::Gen2Select {
            invert,
            bank,
            bit_pointer,
            bit_length,
            mask,
        } => {
            let mut option = match bank {
                Bank::Epc => 0x04,
                other => *other as u8,
            };
            if *invert {
                option |= 0x08;
            }
            m.u32(*bit_pointer);
            if *bit_length > 255 {
                option |= 0x20;
                m.u16(*bit_length);
            } else {
                m.u8(*bit_length as u8);
            }
            m.bytes(mask);
            m.set_at(option_at, option);
        }
    }
    Ok(())
}

fn check_word_count(count: usize) -> Result<()> {
    if count > usize::from(MAX_WORD_COUNT) {
        return Err(ReaderError::InvalidArgument(format!(
            "word count {} exceeds {}",
            count, MAX_WORD_COUNT
        )));
    }
    Ok(())
}

fn words_to_bytes(words: &[u16]) -> Vec<u8> {
    words.iter().flat_map(|w| w.to_be_bytes()).collect()
}

/// Sub-command bytes of an op embedded in a read-multiple, sub-opcode first
fn embedded_op_bytes(op: &TagOp, timeout: u16) -> Result<Vec<u8>> {
    let mut m = MessageBuilder::new();
    match op {
        TagOp::ReadData {
            bank,
            word_address,
            word_count,
        } => {
            check_word_count(usize::from(*word_count))?;
            m.u8(opcode::READ_TAG_DATA)
                .u16(timeout)
                .u8(0)
                .u8(*bank as u8)
                .u32(*word_address)
                .u8(*word_count);
        }
        TagOp::WriteData {
            bank,
            word_address,
            data,
        } => {
            check_word_count(data.len())?;
            m.u8(opcode::WRITE_TAG_DATA)
                .u16(timeout)
                .u8(0)
                .u32(*word_address)
                .u8(*bank as u8)
                .bytes(&words_to_bytes(data));
        }
        TagOp::Lock {
            access_password,
            mask,
            action,
        } => {
            m.u8(opcode::LOCK_TAG)
                .u16(timeout)
                .u8(0)
                .u32(*access_password)
                .u16(*mask)
                .u16(*action);
        }
        TagOp::Kill { kill_password } => {
            m.u8(opcode::KILL_TAG)
                .u16(timeout)
                .u8(0)
                .u32(*kill_password)
                .u8(0);
        }
        TagOp::WriteEpc { .. } => {
            return Err(ReaderError::InvalidArgument(
                "WriteEpc cannot be embedded in a read plan".into(),
            ));
        }
    }
    Ok(m.into_vec())
}

/// One read-multiple request
#[derive(Debug, Clone, Default)]
pub struct ReadMultiple<'a> {
    pub timeout_ms: u16,
    pub protocol: Option<TagProtocol>,
    pub filter: Option<&'a TagFilter>,
    pub op: Option<&'a TagOp>,
    pub streaming: bool,
    /// Gen2 access password sent ahead of the filter
    pub access_password: u32,
}

impl ReadMultiple<'_> {
    pub fn search_flags(&self) -> u16 {
        let mut flags = SEARCH_CONFIGURED_LIST;
        if self.streaming {
            flags |= SEARCH_TAG_STREAMING | SEARCH_LARGE_TAG_POPULATION;
        }
        if self.op.is_some() {
            flags |= SEARCH_EMBEDDED_OP;
        }
        flags
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut m = MessageBuilder::new();
        let option_at = m.placeholder();
        m.u16(self.search_flags()).u16(self.timeout_ms);
        if self.streaming {
            m.u16(MetadataFlags::ALL.bits());
        }

        match (self.protocol, self.filter) {
            (Some(TagProtocol::Gen2) | None, filter) => {
                gen2_filter_bytes(&mut m, option_at, filter, self.access_password, true)?;
            }
            (Some(_), None) => {}
            (Some(protocol), Some(_)) => {
                return Err(ReaderError::InvalidArgument(format!(
                    "tag filters are not supported for {:?}",
                    protocol
                )));
            }
        }
        if self.streaming {
            m.or_at(option_at, OPTION_METADATA);
        }

        if let Some(op) = self.op {
            let sub = embedded_op_bytes(op, self.timeout_ms)?;
            m.u8(0x01);
            // sub-command length, not counting its opcode
            m.u8((sub.len() - 1) as u8).bytes(&sub);
        }
        Ok(m.into_vec())
    }
}

pub struct Device<T: RfidTransport> {
    engine: CommandEngine<T>,
    version: Option<VersionInfo>,
    port_list: Vec<u8>,
    map: TxRxMap,
    current_protocol: Option<TagProtocol>,
    current_ports: Option<(u8, u8)>,
    search_list: Vec<(u8, u8)>,
    region: Option<Region>,
    power_limits: Option<(i32, i32)>,
    read_plan: ReadPlan,
    tagop_protocol: TagProtocol,
    tagop_antenna: u8,
    access_password: u32,
    write_mode: Gen2WriteMode,
    async_on_time_ms: u32,
    async_off_time_ms: u32,
    streaming: bool,
    dedup: DedupPolicy,
}

impl<T: RfidTransport> Device<T> {
    pub fn new(session: Session<T>, config: &ReaderConfig) -> Self {
        let mut engine = CommandEngine::new(session);
        engine.set_command_timeout_ms(config.command_timeout_ms);
        engine
            .session_mut()
            .set_transport_timeout_ms(config.transport_timeout_ms);
        Self {
            engine,
            version: None,
            port_list: Vec::new(),
            map: TxRxMap::default(),
            current_protocol: None,
            current_ports: None,
            search_list: Vec::new(),
            region: None,
            power_limits: None,
            read_plan: ReadPlan::default(),
            tagop_protocol: config.protocol,
            tagop_antenna: 0,
            access_password: 0,
            write_mode: Gen2WriteMode::WordOnly,
            async_on_time_ms: config.async_on_time_ms,
            async_off_time_ms: config.async_off_time_ms,
            streaming: config.streaming,
            dedup: DedupPolicy::default(),
        }
    }

    /// Bring the module into a known state: firmware running, power mode and
    /// antenna ports known, protocol and region programmed.
    pub fn initialize(&mut self, config: &ReaderConfig) -> Result<()> {
        let rate = self
            .engine
            .session_mut()
            .negotiate_baud_rate(config.baud_rate)?;
        if rate != config.baud_rate {
            info!("Moving reader from {} to {} baud", rate, config.baud_rate);
            self.cmd_set_baud_rate(config.baud_rate)?;
            self.engine.session_mut().set_host_baud_rate(config.baud_rate)?;
        }

        let mut version = self.cmd_version()?;
        if self.cmd_get_current_program()? & PROGRAM_MASK == PROGRAM_BOOTLOADER {
            info!("Reader is in its bootloader, starting application firmware");
            self.cmd_boot_firmware()?;
            version = self.cmd_version()?;
        }
        info!(
            "Connected to {} (hardware {}, software {})",
            version.model().name(),
            version.hardware_string(),
            version.software_string()
        );
        self.version = Some(version);

        let mode = self.cmd_get_power_mode()?;
        self.engine.session_mut().set_power_mode(Some(mode));

        self.refresh_port_list()?;

        self.cmd_set_protocol(config.protocol)?;
        self.current_protocol = Some(config.protocol);

        let region = self.cmd_get_region()?;
        self.region = Some(region);
        if let Some(wanted) = config.region {
            if wanted != region {
                self.cmd_set_region(wanted)?;
                self.region = Some(wanted);
            }
        }
        Ok(())
    }

    pub fn engine(&self) -> &CommandEngine<T> {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut CommandEngine<T> {
        &mut self.engine
    }

    pub fn into_session(self) -> Session<T> {
        self.engine.into_session()
    }

    pub fn version(&self) -> Option<&VersionInfo> {
        self.version.as_ref()
    }

    pub fn model(&self) -> Model {
        self.version
            .as_ref()
            .map_or(Model::Unknown(0xFF), VersionInfo::model)
    }

    pub fn gpio_count(&self) -> u8 {
        self.model().gpio_count()
    }

    pub fn port_list(&self) -> &[u8] {
        &self.port_list
    }

    pub fn antenna_map(&self) -> &TxRxMap {
        &self.map
    }

    pub fn read_plan(&self) -> &ReadPlan {
        &self.read_plan
    }

    pub fn set_read_plan(&mut self, plan: ReadPlan) {
        self.read_plan = plan;
    }

    pub fn region(&self) -> Option<Region> {
        self.region
    }

    pub fn async_times(&self) -> (u32, u32) {
        (self.async_on_time_ms, self.async_off_time_ms)
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    pub fn access_password(&self) -> u32 {
        self.access_password
    }

    pub fn dedup_policy(&self) -> DedupPolicy {
        self.dedup
    }

    fn command_timeout(&self) -> u16 {
        clamp_u16(self.engine.command_timeout_ms())
    }

    /// Re-read the port count and fall back to a monostatic map over it.
    fn refresh_port_list(&mut self) -> Result<()> {
        let (_, _, terminated) = self.cmd_get_antenna_configuration()?;
        self.port_list = (1..=terminated.len() as u8).collect();
        self.map = TxRxMap::monostatic(&self.port_list);
        self.search_list.clear();
        self.current_ports = None;
        debug!("Antenna ports: {:?}", self.port_list);
        Ok(())
    }

    // ===== firmware and line =====

    pub fn cmd_version(&mut self) -> Result<VersionInfo> {
        let payload = self.engine.execute(opcode::VERSION, &[])?;
        let mut c = Cursor::new(&payload);
        let mut word = || -> Result<[u8; 4]> {
            let b = c.take(4)?;
            Ok([b[0], b[1], b[2], b[3]])
        };
        let bootloader = word()?;
        let hardware = word()?;
        let firmware_date = word()?;
        let firmware_version = word()?;
        let protocols = TagProtocol::from_mask(c.u32()?);
        Ok(VersionInfo {
            bootloader,
            hardware,
            firmware_date,
            firmware_version,
            protocols,
        })
    }

    pub fn cmd_get_current_program(&mut self) -> Result<u8> {
        let payload = self.engine.execute(opcode::GET_CURRENT_PROGRAM, &[])?;
        Cursor::new(&payload).u8()
    }

    pub fn cmd_boot_firmware(&mut self) -> Result<()> {
        self.engine.execute(opcode::BOOT_FIRMWARE, &[])?;
        Ok(())
    }

    /// Standard rates go as a clock divisor, anything else as the raw rate.
    pub fn cmd_set_baud_rate(&mut self, rate: u32) -> Result<()> {
        let divisor: u16 = match rate {
            9600 => 488,
            19200 => 244,
            38400 => 122,
            57600 => 84,
            115200 => 41,
            230400 => 20,
            460800 => 10,
            921600 => 5,
            _ => 0,
        };
        let mut m = MessageBuilder::new();
        if divisor != 0 {
            m.u16(divisor);
        } else {
            m.u32(rate);
        }
        self.engine.execute(opcode::SET_BAUD_RATE, m.as_slice())?;
        Ok(())
    }

    // ===== protocol =====

    pub fn cmd_get_protocol(&mut self) -> Result<TagProtocol> {
        let payload = self.engine.execute(opcode::GET_TAG_PROTOCOL, &[])?;
        let code = Cursor::new(&payload).u16()?;
        u8::try_from(code)
            .ok()
            .and_then(TagProtocol::from_code)
            .ok_or_else(|| ReaderError::InvalidResponse(format!("unknown protocol 0x{:04X}", code)))
    }

    pub fn cmd_set_protocol(&mut self, protocol: TagProtocol) -> Result<()> {
        let code = u16::from(protocol.code()).to_be_bytes();
        self.engine.execute(opcode::SET_TAG_PROTOCOL, &code)?;
        Ok(())
    }

    pub fn cmd_get_available_protocols(&mut self) -> Result<Vec<TagProtocol>> {
        let payload = self.engine.execute(opcode::GET_AVAILABLE_PROTOCOLS, &[])?;
        Ok(payload
            .chunks_exact(2)
            .filter_map(|c| u8::try_from(u16::from_be_bytes([c[0], c[1]])).ok())
            .filter_map(TagProtocol::from_code)
            .collect())
    }

    /// Switch protocol only when it differs from the last one set.
    pub fn ensure_protocol(&mut self, protocol: TagProtocol) -> Result<()> {
        if self.current_protocol != Some(protocol) {
            self.cmd_set_protocol(protocol)?;
            self.current_protocol = Some(protocol);
        }
        Ok(())
    }

    // ===== antennas =====

    pub fn cmd_get_tx_rx_ports(&mut self) -> Result<(u8, u8)> {
        let payload = self.engine.execute(opcode::GET_ANTENNA_PORT, &[])?;
        let mut c = Cursor::new(&payload);
        Ok((c.u8()?, c.u8()?))
    }

    /// Current TX/RX ports and, per physical port, whether it is terminated
    pub fn cmd_get_antenna_configuration(&mut self) -> Result<(u8, u8, Vec<bool>)> {
        let payload = self.engine.execute(opcode::GET_ANTENNA_PORT, &[0x01])?;
        let mut c = Cursor::new(&payload);
        let tx = c.u8()?;
        let rx = c.u8()?;
        let terminated = c.rest().iter().map(|&b| b == 1).collect();
        Ok((tx, rx, terminated))
    }

    pub fn cmd_antenna_detect(&mut self) -> Result<Vec<(u8, bool)>> {
        let payload = self.engine.execute(opcode::GET_ANTENNA_PORT, &[0x05])?;
        let mut c = Cursor::new(&payload);
        c.skip(1)?;
        Ok(c.rest()
            .chunks_exact(2)
            .map(|pair| (pair[0], pair[1] != 0))
            .collect())
    }

    /// Ports with something attached. Older firmware cannot detect, so the
    /// terminated ports stand in for them.
    pub fn connected_ports(&mut self) -> Result<Vec<u8>> {
        match self.cmd_antenna_detect() {
            Ok(detected) => Ok(detected
                .into_iter()
                .filter_map(|(port, present)| present.then_some(port))
                .collect()),
            Err(e @ ReaderError::Fault { .. }) => {
                debug!("Antenna detect unavailable ({}), using terminated ports", e);
                let (_, _, terminated) = self.cmd_get_antenna_configuration()?;
                Ok(terminated
                    .iter()
                    .enumerate()
                    .filter_map(|(i, &t)| t.then_some(i as u8 + 1))
                    .collect())
            }
            Err(e) => Err(e),
        }
    }

    pub fn cmd_set_tx_rx_ports(&mut self, tx: u8, rx: u8) -> Result<()> {
        self.engine.execute(opcode::SET_ANTENNA_PORT, &[tx, rx])?;
        Ok(())
    }

    pub fn cmd_set_search_list(&mut self, list: &[(u8, u8)]) -> Result<()> {
        let mut m = MessageBuilder::new();
        m.u8(0x02);
        for &(tx, rx) in list {
            m.u8(tx).u8(rx);
        }
        self.engine.execute(opcode::SET_ANTENNA_PORT, m.as_slice())?;
        Ok(())
    }

    /// `(port, read power, write power)` per port, centi-dBm
    pub fn cmd_get_port_powers(&mut self) -> Result<Vec<(u8, u16, u16)>> {
        let payload = self.engine.execute(opcode::GET_ANTENNA_PORT, &[0x03])?;
        let mut c = Cursor::new(&payload);
        c.skip(1)?;
        let mut out = Vec::with_capacity(c.remaining() / 5);
        while c.remaining() >= 5 {
            out.push((c.u8()?, c.u16()?, c.u16()?));
        }
        Ok(out)
    }

    pub fn cmd_set_port_powers(&mut self, list: &[(u8, u16, u16)]) -> Result<()> {
        let mut m = MessageBuilder::new();
        m.u8(0x03);
        for &(port, read, write) in list {
            m.u8(port).u16(read).u16(write);
        }
        self.engine.execute(opcode::SET_ANTENNA_PORT, m.as_slice())?;
        Ok(())
    }

    /// `(port, read power, write power, settling time µs)` per port
    pub fn cmd_get_port_powers_and_settling(&mut self) -> Result<Vec<(u8, u16, u16, u16)>> {
        let payload = self.engine.execute(opcode::GET_ANTENNA_PORT, &[0x04])?;
        let mut c = Cursor::new(&payload);
        c.skip(1)?;
        let mut out = Vec::with_capacity(c.remaining() / 7);
        while c.remaining() >= 7 {
            out.push((c.u8()?, c.u16()?, c.u16()?, c.u16()?));
        }
        Ok(out)
    }

    pub fn cmd_set_port_powers_and_settling(&mut self, list: &[(u8, u16, u16, u16)]) -> Result<()> {
        let mut m = MessageBuilder::new();
        m.u8(0x04);
        for &(port, read, write, settle) in list {
            m.u8(port).u16(read).u16(write).u16(settle);
        }
        self.engine.execute(opcode::SET_ANTENNA_PORT, m.as_slice())?;
        Ok(())
    }

    /// Program the search list only when it changed since the last read.
    pub fn ensure_search_list(&mut self, list: &[(u8, u8)]) -> Result<()> {
        if self.search_list != list {
            self.cmd_set_search_list(list)?;
            self.search_list = list.to_vec();
        }
        Ok(())
    }

    /// Port pairs to search for `antennas`; an empty list means every connected antenna.
    pub fn search_ports(&mut self, antennas: &[u8]) -> Result<Vec<(u8, u8)>> {
        let antennas: Vec<u8> = if antennas.is_empty() {
            self.connected_ports()?
                .into_iter()
                .filter_map(|tx| self.map.antenna_for_transmit_port(tx))
                .collect()
        } else {
            antennas.to_vec()
        };
        antennas
            .iter()
            .map(|&a| {
                self.map
                    .ports_for(a)
                    .ok_or_else(|| ReaderError::InvalidArgument(format!("no such antenna {}", a)))
            })
            .collect()
    }

    /// Point the module at `antenna` for a single-tag operation.
    pub fn select_antenna(&mut self, antenna: u8) -> Result<()> {
        let ports = self
            .map
            .ports_for(antenna)
            .ok_or_else(|| ReaderError::InvalidArgument(format!("no such antenna {}", antenna)))?;
        if self.current_ports != Some(ports) {
            self.cmd_set_tx_rx_ports(ports.0, ports.1)?;
            self.current_ports = Some(ports);
        }
        Ok(())
    }

    // ===== radio =====

    pub fn cmd_get_read_power(&mut self) -> Result<u16> {
        self.get_power(opcode::GET_READ_TX_POWER)
    }

    pub fn cmd_get_write_power(&mut self) -> Result<u16> {
        self.get_power(opcode::GET_WRITE_TX_POWER)
    }

    fn get_power(&mut self, op: u8) -> Result<u16> {
        let payload = self.engine.execute(op, &[0x00])?;
        let mut c = Cursor::new(&payload);
        c.skip(1)?;
        c.u16()
    }

    /// Current read power with the module's `(max, min)` limits
    pub fn cmd_get_read_power_limits(&mut self) -> Result<(u16, u16, u16)> {
        let payload = self.engine.execute(opcode::GET_READ_TX_POWER, &[0x01])?;
        let mut c = Cursor::new(&payload);
        c.skip(1)?;
        Ok((c.u16()?, c.u16()?, c.u16()?))
    }

    pub fn cmd_set_read_power(&mut self, centi_dbm: u16) -> Result<()> {
        self.engine
            .execute(opcode::SET_READ_TX_POWER, &centi_dbm.to_be_bytes())?;
        Ok(())
    }

    pub fn cmd_set_write_power(&mut self, centi_dbm: u16) -> Result<()> {
        self.engine
            .execute(opcode::SET_WRITE_TX_POWER, &centi_dbm.to_be_bytes())?;
        Ok(())
    }

    /// `(min, max)` in centi-dBm, fetched once per connection
    pub fn power_limits(&mut self) -> Result<(i32, i32)> {
        if let Some(limits) = self.power_limits {
            return Ok(limits);
        }
        let (_, max, min) = self.cmd_get_read_power_limits()?;
        let limits = (i32::from(min), i32::from(max));
        self.power_limits = Some(limits);
        Ok(limits)
    }

    fn checked_power(&mut self, value: i32) -> Result<u16> {
        let (min, max) = self.power_limits()?;
        if value < min || value > max {
            return Err(ReaderError::InvalidArgument(format!(
                "power {} outside [{}, {}] centi-dBm",
                value, min, max
            )));
        }
        Ok(value as u16)
    }

    pub fn cmd_get_temperature(&mut self) -> Result<i8> {
        let payload = self.engine.execute(opcode::GET_TEMPERATURE, &[])?;
        Cursor::new(&payload).i8()
    }

    // ===== region =====

    pub fn cmd_get_region(&mut self) -> Result<Region> {
        let payload = self.engine.execute(opcode::GET_REGION, &[])?;
        let code = Cursor::new(&payload).u8()?;
        Region::from_code(code)
            .ok_or_else(|| ReaderError::InvalidResponse(format!("unknown region 0x{:02X}", code)))
    }

    pub fn cmd_set_region(&mut self, region: Region) -> Result<()> {
        self.engine.execute(opcode::SET_REGION, &[region.code()])?;
        Ok(())
    }

    pub fn cmd_set_region_lbt(&mut self, region: Region, lbt: bool) -> Result<()> {
        self.engine
            .execute(opcode::SET_REGION, &[region.code(), u8::from(lbt)])?;
        Ok(())
    }

    pub fn cmd_get_region_lbt(&mut self) -> Result<bool> {
        let payload = self
            .engine
            .execute(opcode::GET_REGION, &[0x01, REGION_KEY_LBT])?;
        let mut c = Cursor::new(&payload);
        c.skip(3)?;
        Ok(c.u8()? == 1)
    }

    pub fn cmd_get_available_regions(&mut self) -> Result<Vec<Region>> {
        let payload = self.engine.execute(opcode::GET_AVAILABLE_REGIONS, &[])?;
        Ok(payload.into_iter().filter_map(Region::from_code).collect())
    }

    pub fn cmd_get_hop_table(&mut self) -> Result<Vec<u32>> {
        let payload = self.engine.execute(opcode::GET_FREQ_HOP_TABLE, &[])?;
        Ok(payload
            .chunks_exact(4)
            .map(|c| u32::from_be_bytes([c[0], c[1], c[2], c[3]]))
            .collect())
    }

    pub fn cmd_set_hop_table(&mut self, table: &[u32]) -> Result<()> {
        let mut m = MessageBuilder::new();
        for &freq in table {
            m.u32(freq);
        }
        self.engine.execute(opcode::SET_FREQ_HOP_TABLE, m.as_slice())?;
        Ok(())
    }

    pub fn cmd_get_hop_time(&mut self) -> Result<u32> {
        let payload = self.engine.execute(opcode::GET_FREQ_HOP_TABLE, &[0x01])?;
        let mut c = Cursor::new(&payload);
        c.skip(1)?;
        c.u32()
    }

    pub fn cmd_set_hop_time(&mut self, ms: u32) -> Result<()> {
        let mut m = MessageBuilder::new();
        m.u8(0x01).u32(ms);
        self.engine.execute(opcode::SET_FREQ_HOP_TABLE, m.as_slice())?;
        Ok(())
    }

    // ===== GPIO, power and user mode =====

    pub fn cmd_get_gpio_inputs(&mut self) -> Result<Vec<GpioPin>> {
        let payload = self.engine.execute(opcode::GET_USER_GPIO_INPUTS, &[])?;
        Ok(payload
            .iter()
            .enumerate()
            .map(|(i, &level)| GpioPin {
                id: i as u8 + 1,
                high: level == 1,
            })
            .collect())
    }

    pub fn cmd_set_gpio_output(&mut self, pin: u8, high: bool) -> Result<()> {
        self.engine
            .execute(opcode::SET_USER_GPIO_OUTPUTS, &[pin, u8::from(high)])?;
        Ok(())
    }

    /// True when `pin` is configured as an output
    pub fn cmd_get_gpio_direction(&mut self, pin: u8) -> Result<bool> {
        let payload = self.engine.execute(opcode::SET_USER_GPIO_OUTPUTS, &[pin])?;
        Ok(Cursor::new(&payload).peek_at(1)? == 1)
    }

    pub fn cmd_set_gpio_direction(&mut self, pin: u8, output: bool) -> Result<()> {
        self.engine
            .execute(opcode::SET_USER_GPIO_OUTPUTS, &[0x01, pin, u8::from(output), 0x00])?;
        Ok(())
    }

    /// Pins configured in the given direction. Only the M6e reports directions.
    fn gpio_pins(&mut self, output: bool) -> Result<Vec<u8>> {
        let count = self.gpio_count();
        if self.model() != Model::M6e {
            return Ok((1..=count).collect());
        }
        let mut pins = Vec::new();
        for pin in 1..=count {
            if self.cmd_get_gpio_direction(pin)? == output {
                pins.push(pin);
            }
        }
        Ok(pins)
    }

    pub fn cmd_get_power_mode(&mut self) -> Result<PowerMode> {
        let payload = self.engine.execute(opcode::GET_POWER_MODE, &[])?;
        let code = Cursor::new(&payload).u8()?;
        PowerMode::from_code(code)
            .ok_or_else(|| ReaderError::InvalidResponse(format!("unknown power mode {}", code)))
    }

    pub fn cmd_set_power_mode(&mut self, mode: PowerMode) -> Result<()> {
        self.engine.execute(opcode::SET_POWER_MODE, &[mode as u8])?;
        Ok(())
    }

    pub fn cmd_get_user_mode(&mut self) -> Result<UserMode> {
        let payload = self.engine.execute(opcode::GET_USER_MODE, &[])?;
        let code = Cursor::new(&payload).u8()?;
        UserMode::from_code(code)
            .ok_or_else(|| ReaderError::InvalidResponse(format!("unknown user mode {}", code)))
    }

    pub fn cmd_set_user_mode(&mut self, mode: UserMode) -> Result<()> {
        self.engine.execute(opcode::SET_USER_MODE, &[mode as u8])?;
        Ok(())
    }

    // ===== configuration keys =====

    pub fn cmd_get_reader_config(&mut self, key: u8) -> Result<u8> {
        let payload = self
            .engine
            .execute(opcode::GET_READER_OPTIONAL_PARAMS, &[0x01, key])?;
        let mut c = Cursor::new(&payload);
        c.skip(2)?;
        c.u8()
    }

    pub fn cmd_set_reader_config(&mut self, key: u8, value: u8) -> Result<()> {
        self.engine
            .execute(opcode::SET_READER_OPTIONAL_PARAMS, &[0x01, key, value])?;
        Ok(())
    }

    /// Value bytes of one protocol configuration key
    pub fn cmd_get_protocol_config(&mut self, protocol: TagProtocol, key: u8) -> Result<Vec<u8>> {
        let mut payload = self
            .engine
            .execute(opcode::GET_PROTOCOL_PARAM, &[protocol.code(), key])?;
        if payload.len() < 2 {
            return Err(ReaderError::InvalidResponse(
                "protocol configuration reply too short".into(),
            ));
        }
        Ok(payload.split_off(2))
    }

    pub fn cmd_set_protocol_config(&mut self, protocol: TagProtocol, key: u8, value: &[u8]) -> Result<()> {
        let mut m = MessageBuilder::new();
        m.u8(protocol.code()).u8(key).bytes(value);
        self.engine.execute(opcode::SET_PROTOCOL_PARAM, m.as_slice())?;
        Ok(())
    }

    fn gen2_config_u8(&mut self, key: u8) -> Result<u8> {
        let value = self.cmd_get_protocol_config(TagProtocol::Gen2, key)?;
        Cursor::new(&value).u8()
    }

    // ===== tag buffer =====

    /// `(tags remaining, read index, write index)`
    pub fn cmd_get_tags_remaining(&mut self) -> Result<(u16, u16, u16)> {
        let payload = self.engine.execute(opcode::GET_TAG_ID_BUFFER, &[])?;
        let mut c = Cursor::new(&payload);
        let read = c.u16()?;
        let write = c.u16()?;
        Ok((write.wrapping_sub(read), read, write))
    }

    /// Drain buffered reads with the requested metadata.
    pub fn cmd_get_tag_buffer(
        &mut self,
        flags: MetadataFlags,
        resend: bool,
        hint: Option<TagProtocol>,
    ) -> Result<Vec<TagReadRecord>> {
        let mut m = MessageBuilder::new();
        m.u16(flags.bits()).u8(u8::from(resend));
        let payload = self.engine.execute(opcode::GET_TAG_ID_BUFFER, m.as_slice())?;
        parser::parse_tag_buffer(&payload, hint, self.gpio_count())
    }

    /// Legacy fixed-record dump of buffer entries `start..end`
    pub fn cmd_get_tag_buffer_range(
        &mut self,
        start: u16,
        end: u16,
        protocol: TagProtocol,
    ) -> Result<Vec<TagData>> {
        let mut m = MessageBuilder::new();
        m.u16(start).u16(end);
        let payload = self.engine.execute(opcode::GET_TAG_ID_BUFFER, m.as_slice())?;
        let epc496 = self.cmd_get_reader_config(config_key::EXTENDED_EPC)? != 0;
        parser::parse_fixed_records(&payload, protocol, epc496)
    }

    pub fn cmd_clear_tag_buffer(&mut self) -> Result<()> {
        self.engine.execute(opcode::CLEAR_TAG_ID_BUFFER, &[])?;
        Ok(())
    }

    // ===== inventory =====

    /// Singulate one tag. `None` when nothing answered.
    pub fn cmd_read_single(
        &mut self,
        timeout_ms: u16,
        flags: MetadataFlags,
        filter: Option<&TagFilter>,
        protocol: TagProtocol,
    ) -> Result<Option<TagReadRecord>> {
        let mut m = MessageBuilder::new();
        m.u16(timeout_ms);
        let option_at = m.placeholder();
        if flags != MetadataFlags::NONE {
            m.u16(flags.bits());
        }
        if protocol == TagProtocol::Gen2 {
            gen2_filter_bytes(&mut m, option_at, filter, 0, true)?;
        }
        if flags != MetadataFlags::NONE {
            m.or_at(option_at, OPTION_METADATA);
        }

        let payload = match self.engine.execute_outcome(
            opcode::READ_TAG_ID_SINGLE,
            m.as_slice(),
            u32::from(timeout_ms),
        )? {
            Outcome::Done(payload) => payload,
            Outcome::NoTagsFound => return Ok(None),
        };
        parser::parse_single_read(&payload, flags, protocol, self.gpio_count()).map(Some)
    }

    /// Non-streaming read-multiple. The payload holds the tag count and, with an
    /// embedded op, its outcome counts.
    pub fn cmd_read_multiple(&mut self, request: &ReadMultiple) -> Result<Outcome> {
        let payload = request.encode()?;
        self.engine.execute_outcome(
            opcode::READ_TAG_ID_MULTIPLE,
            &payload,
            u32::from(request.timeout_ms),
        )
    }

    /// Start a streaming read-multiple; frames come from the engine.
    pub fn begin_read_stream(&mut self, request: &ReadMultiple) -> Result<()> {
        let payload = request.encode()?;
        self.engine
            .begin_stream(opcode::READ_TAG_ID_MULTIPLE, &payload)
    }

    pub fn embedded_counts(payload: &[u8]) -> Result<EmbeddedCounts> {
        parser::parse_embedded_counts(payload)
    }

    // ===== standalone Gen2 operations =====

    pub fn cmd_gen2_read_data(
        &mut self,
        timeout_ms: u16,
        bank: Bank,
        word_address: u32,
        word_count: u8,
        password: u32,
        filter: Option<&TagFilter>,
    ) -> Result<Vec<u8>> {
        check_word_count(usize::from(word_count))?;
        let mut m = MessageBuilder::new();
        m.u16(timeout_ms);
        let option_at = m.placeholder();
        m.u8(bank as u8).u32(word_address).u8(word_count);
        gen2_filter_bytes(&mut m, option_at, filter, password, true)?;

        let payload = self
            .engine
            .execute_timeout(opcode::READ_TAG_DATA, m.as_slice(), u32::from(timeout_ms))?;
        let mut c = Cursor::new(&payload);
        c.skip(1)?;
        Ok(c.rest().to_vec())
    }

    pub fn cmd_gen2_write_data(
        &mut self,
        timeout_ms: u16,
        bank: Bank,
        word_address: u32,
        data: &[u8],
        password: u32,
        filter: Option<&TagFilter>,
    ) -> Result<()> {
        check_word_count(data.len() / 2)?;
        let mut m = MessageBuilder::new();
        m.u16(timeout_ms);
        let option_at = m.placeholder();
        m.u32(word_address).u8(bank as u8);
        gen2_filter_bytes(&mut m, option_at, filter, password, true)?;
        m.bytes(data);
        self.engine
            .execute_timeout(opcode::WRITE_TAG_DATA, m.as_slice(), u32::from(timeout_ms))?;
        Ok(())
    }

    pub fn cmd_gen2_block_write(
        &mut self,
        timeout_ms: u16,
        bank: Bank,
        word_address: u32,
        words: &[u16],
        password: u32,
        filter: Option<&TagFilter>,
    ) -> Result<()> {
        check_word_count(words.len())?;
        let mut m = MessageBuilder::new();
        m.u16(timeout_ms).u8(0x00);
        let option_at = m.placeholder();
        m.u8(0x00).u8(0xC7);
        gen2_filter_bytes(&mut m, option_at, filter, password, true)?;
        m.or_at(option_at, 0x40);
        m.u8(0x00)
            .u8(bank as u8)
            .u32(word_address)
            .u8(words.len() as u8)
            .bytes(&words_to_bytes(words));
        self.engine
            .execute_timeout(opcode::WRITE_TAG_SPECIFIC, m.as_slice(), u32::from(timeout_ms))?;
        Ok(())
    }

    pub fn cmd_gen2_lock(
        &mut self,
        timeout_ms: u16,
        password: u32,
        mask: u16,
        action: u16,
        filter: Option<&TagFilter>,
    ) -> Result<()> {
        let mut m = MessageBuilder::new();
        m.u16(timeout_ms);
        let option_at = m.placeholder();
        m.u32(password).u16(mask).u16(action);
        gen2_filter_bytes(&mut m, option_at, filter, 0, false)?;
        self.engine
            .execute_timeout(opcode::LOCK_TAG, m.as_slice(), u32::from(timeout_ms))?;
        Ok(())
    }

    pub fn cmd_gen2_kill(&mut self, timeout_ms: u16, kill_password: u32, filter: Option<&TagFilter>) -> Result<()> {
        let mut m = MessageBuilder::new();
        m.u16(timeout_ms);
        let option_at = m.placeholder();
        m.u32(kill_password).u8(0x00);
        gen2_filter_bytes(&mut m, option_at, filter, 0, false)?;
        self.engine
            .execute_timeout(opcode::KILL_TAG, m.as_slice(), u32::from(timeout_ms))?;
        Ok(())
    }

    pub fn cmd_write_tag_epc(&mut self, timeout_ms: u16, epc: &[u8]) -> Result<()> {
        let mut m = MessageBuilder::new();
        m.u16(timeout_ms).u16(0).bytes(epc);
        self.engine
            .execute_timeout(opcode::WRITE_TAG_ID, m.as_slice(), u32::from(timeout_ms))?;
        Ok(())
    }

    /// Run one operation against a single tag on the tag-op antenna.
    ///
    /// Returns the bytes read for `ReadData`, nothing for the others.
    pub fn execute_tag_op(&mut self, op: &TagOp, filter: Option<&TagFilter>) -> Result<Vec<u8>> {
        if self.region.is_none() {
            return Err(ReaderError::NotReady(
                "Region must be set before RF operation".into(),
            ));
        }
        if self.tagop_antenna == 0 {
            return Err(ReaderError::NotReady(
                "/reader/tagop/antenna must be set before a tag operation".into(),
            ));
        }
        let protocol = self.tagop_protocol;
        if protocol != TagProtocol::Gen2 {
            return Err(ReaderError::InvalidArgument(format!(
                "tag operations are not supported for {:?}",
                protocol
            )));
        }
        self.ensure_protocol(protocol)?;
        self.select_antenna(self.tagop_antenna)?;

        let timeout = self.command_timeout();
        let password = self.access_password;
        match op {
            TagOp::ReadData {
                bank,
                word_address,
                word_count,
            } => self.cmd_gen2_read_data(timeout, *bank, *word_address, *word_count, password, filter),
            TagOp::WriteData {
                bank,
                word_address,
                data,
            } => {
                self.write_words(timeout, *bank, *word_address, data, filter)?;
                Ok(Vec::new())
            }
            TagOp::Lock {
                access_password,
                mask,
                action,
            } => {
                self.cmd_gen2_lock(timeout, *access_password, *mask, *action, filter)?;
                Ok(Vec::new())
            }
            TagOp::Kill { kill_password } => {
                self.cmd_gen2_kill(timeout, *kill_password, filter)?;
                Ok(Vec::new())
            }
            TagOp::WriteEpc { epc } => {
                match filter {
                    None => self.cmd_write_tag_epc(timeout, epc)?,
                    Some(_) => {
                        if epc.len() % 2 != 0 {
                            return Err(ReaderError::InvalidArgument(
                                "EPC must be a whole number of words".into(),
                            ));
                        }
                        self.cmd_gen2_write_data(timeout, Bank::Epc, 2, epc, password, filter)?;
                    }
                }
                Ok(Vec::new())
            }
        }
    }

    fn write_words(
        &mut self,
        timeout: u16,
        bank: Bank,
        word_address: u32,
        words: &[u16],
        filter: Option<&TagFilter>,
    ) -> Result<()> {
        let password = self.access_password;
        match self.write_mode {
            Gen2WriteMode::WordOnly => {
                self.cmd_gen2_write_data(timeout, bank, word_address, &words_to_bytes(words), password, filter)
            }
            Gen2WriteMode::BlockOnly => {
                self.cmd_gen2_block_write(timeout, bank, word_address, words, password, filter)
            }
            Gen2WriteMode::BlockFallback => {
                match self.cmd_gen2_block_write(timeout, bank, word_address, words, password, filter) {
                    Err(ReaderError::Fault {
                        code: FAULT_GEN2_BLOCK_WRITE,
                        ..
                    }) => {
                        debug!("Block write refused, retrying word by word");
                        self.cmd_gen2_write_data(timeout, bank, word_address, &words_to_bytes(words), password, filter)
                    }
                    other => other,
                }
            }
        }
    }

    // ===== parameter helpers =====

    fn config_flag(&mut self, key: u8) -> Result<bool> {
        Ok(self.cmd_get_reader_config(key)? != 0)
    }

    fn set_config_flag(&mut self, key: u8, on: bool) -> Result<()> {
        self.cmd_set_reader_config(key, u8::from(on))
    }

    /// The firmware stores the uniqueness keys as "merge across", the inverse of the parameter.
    fn unique_flag(&mut self, key: u8) -> Result<bool> {
        Ok(self.cmd_get_reader_config(key)? == 0)
    }

    fn set_unique_flag(&mut self, key: u8, unique: bool) -> Result<()> {
        self.cmd_set_reader_config(key, u8::from(!unique))
    }

    fn blf(&mut self, protocol: TagProtocol, table: &[(u8, i32)]) -> Result<i32> {
        let value = self.cmd_get_protocol_config(protocol, protocol_key::BLF)?;
        let code = Cursor::new(&value).u8()?;
        table
            .iter()
            .find(|(c, _)| *c == code)
            .map(|(_, khz)| *khz)
            .ok_or_else(|| ReaderError::InvalidResponse(format!("unknown BLF code {}", code)))
    }

    fn set_blf(&mut self, protocol: TagProtocol, table: &[(u8, i32)], khz: i32) -> Result<()> {
        let code = table
            .iter()
            .find(|(_, k)| *k == khz)
            .map(|(c, _)| *c)
            .ok_or_else(|| {
                ReaderError::InvalidArgument(format!("unsupported {:?} BLF {} kHz", protocol, khz))
            })?;
        self.cmd_set_protocol_config(protocol, protocol_key::BLF, &[code])
    }

    /// `(port, value)` pairs from the power/settling table, picking one column
    fn port_column(&mut self, column: usize) -> Result<Vec<(u8, i32)>> {
        Ok(self
            .cmd_get_port_powers_and_settling()?
            .into_iter()
            .map(|(port, read, write, settle)| {
                let value = match column {
                    0 => read,
                    1 => write,
                    _ => settle,
                };
                (port, i32::from(value))
            })
            .collect())
    }

    /// Merge new values for some ports into one column and write the table back.
    fn set_port_column(&mut self, column: usize, values: &[(u8, i32)]) -> Result<()> {
        let mut table = self.cmd_get_port_powers_and_settling()?;
        for &(port, value) in values {
            if !self.port_list.contains(&port) {
                return Err(ReaderError::InvalidArgument(format!("no such port {}", port)));
            }
            let value = if column < 2 {
                self.checked_power(value)?
            } else {
                u16::try_from(value).map_err(|_| {
                    ReaderError::InvalidArgument(format!("settling time {} out of range", value))
                })?
            };
            match table.iter_mut().find(|row| row.0 == port) {
                Some(row) => match column {
                    0 => row.1 = value,
                    1 => row.2 = value,
                    _ => row.3 = value,
                },
                None => {
                    let mut row = (port, 0, 0, 0);
                    match column {
                        0 => row.1 = value,
                        1 => row.2 = value,
                        _ => row.3 = value,
                    }
                    table.push(row);
                }
            }
        }
        self.cmd_set_port_powers_and_settling(&table)
    }

    fn version_field<R>(&self, f: impl FnOnce(&VersionInfo) -> R) -> Result<R> {
        self.version
            .as_ref()
            .map(f)
            .ok_or_else(|| ReaderError::NotReady("reader not connected".into()))
    }
}

fn expect_int(value: &ParamValue) -> Result<i32> {
    value
        .as_int()
        .ok_or_else(|| ReaderError::InvalidArgument(format!("expected an integer, got {:?}", value)))
}

fn expect_u32(value: &ParamValue) -> Result<u32> {
    u32::try_from(expect_int(value)?)
        .map_err(|_| ReaderError::InvalidArgument(format!("{:?} must not be negative", value)))
}

fn expect_bool(value: &ParamValue) -> Result<bool> {
    value
        .as_bool()
        .ok_or_else(|| ReaderError::InvalidArgument(format!("expected a boolean, got {:?}", value)))
}

impl<T: RfidTransport> ParamBackend for Device<T> {
    fn read_param(&mut self, id: ParamId) -> Result<ParamValue> {
        use ParamValue as V;
        Ok(match id {
            ParamId::BaudRate => V::Int(self.engine.session().baud_rate() as i32),
            ParamId::TransportTimeout => V::Int(self.engine.session().transport_timeout_ms() as i32),
            ParamId::CommandTimeout => V::Int(self.engine.command_timeout_ms() as i32),
            ParamId::PowerMode => {
                let mode = self.cmd_get_power_mode()?;
                self.engine.session_mut().set_power_mode(Some(mode));
                V::PowerMode(mode)
            }
            ParamId::UserMode => V::UserMode(self.cmd_get_user_mode()?),
            ParamId::AsyncOnTime => V::Int(self.async_on_time_ms as i32),
            ParamId::AsyncOffTime => V::Int(self.async_off_time_ms as i32),
            ParamId::ReadPlan => V::ReadPlan(self.read_plan.clone()),
            ParamId::PortList => V::Ports(self.port_list.clone()),
            ParamId::ConnectedPortList => V::Ports(self.connected_ports()?),
            ParamId::TxRxMap => V::AntennaMap(self.map.mappings().to_vec()),
            ParamId::CheckPort => V::Bool(self.config_flag(config_key::SAFETY_ANTENNA_CHECK)?),
            ParamId::PortSwitchGpos => {
                let bits = self.cmd_get_reader_config(config_key::ANTENNA_CONTROL_GPIO)?;
                V::Ports((1..=2).filter(|pin| bits & (1 << (pin - 1)) != 0).collect())
            }
            ParamId::SettlingTimeList => V::PortValues(self.port_column(2)?),
            ParamId::GpiList => V::Ports(self.gpio_pins(false)?),
            ParamId::GpoList => V::Ports(self.gpio_pins(true)?),
            ParamId::AccessPassword => V::Password(self.access_password),
            ParamId::WriteMode => V::WriteMode(self.write_mode),
            ParamId::Session => {
                let code = self.gen2_config_u8(protocol_key::GEN2_SESSION)?;
                V::Session(Gen2Session::from_code(code).ok_or_else(|| {
                    ReaderError::InvalidResponse(format!("unknown session {}", code))
                })?)
            }
            ParamId::Target => {
                let value = self.cmd_get_protocol_config(TagProtocol::Gen2, protocol_key::GEN2_TARGET)?;
                let code = Cursor::new(&value).u16()?;
                V::Target(Gen2Target::from_code(code).ok_or_else(|| {
                    ReaderError::InvalidResponse(format!("unknown target 0x{:04X}", code))
                })?)
            }
            ParamId::TagEncoding => {
                let code = self.gen2_config_u8(protocol_key::GEN2_TAG_ENCODING)?;
                V::TagEncoding(Gen2TagEncoding::from_code(code).ok_or_else(|| {
                    ReaderError::InvalidResponse(format!("unknown tag encoding {}", code))
                })?)
            }
            ParamId::Q => {
                let value = self.cmd_get_protocol_config(TagProtocol::Gen2, protocol_key::GEN2_Q)?;
                let mut c = Cursor::new(&value);
                V::Q(match c.u8()? {
                    0 => Gen2Q::Dynamic,
                    _ => Gen2Q::Static(c.u8()?),
                })
            }
            ParamId::Gen2Blf => V::Int(self.blf(TagProtocol::Gen2, &GEN2_BLF_KHZ)?),
            ParamId::Tari => {
                let code = self.gen2_config_u8(protocol_key::GEN2_TARI)?;
                V::Tari(Gen2Tari::from_code(code).ok_or_else(|| {
                    ReaderError::InvalidResponse(format!("unknown tari {}", code))
                })?)
            }
            ParamId::Iso180006bBlf => V::Int(self.blf(TagProtocol::Iso180006b, &ISO180006B_BLF_KHZ)?),
            ParamId::ReadPower => V::Int(i32::from(self.cmd_get_read_power()?)),
            ParamId::WritePower => V::Int(i32::from(self.cmd_get_write_power()?)),
            ParamId::PowerMin => V::Int(self.power_limits()?.0),
            ParamId::PowerMax => V::Int(self.power_limits()?.1),
            ParamId::EnablePowerSave => V::Bool(self.config_flag(config_key::TRANSMIT_POWER_SAVE)?),
            ParamId::PortReadPowerList => V::PortValues(self.port_column(0)?),
            ParamId::PortWritePowerList => V::PortValues(self.port_column(1)?),
            ParamId::Temperature => V::Int(i32::from(self.cmd_get_temperature()?)),
            ParamId::RegionId => {
                let region = self.cmd_get_region()?;
                self.region = Some(region);
                V::Region(region)
            }
            ParamId::SupportedRegions => V::Regions(self.cmd_get_available_regions()?),
            ParamId::HopTable => V::U32List(self.cmd_get_hop_table()?),
            ParamId::HopTime => V::Int(self.cmd_get_hop_time()? as i32),
            ParamId::LbtEnable => V::Bool(self.cmd_get_region_lbt()?),
            ParamId::TagOpProtocol => V::Protocol(self.tagop_protocol),
            ParamId::TagOpAntenna => V::Int(i32::from(self.tagop_antenna)),
            ParamId::UniqueByAntenna => {
                let on = self.unique_flag(config_key::UNIQUE_BY_ANTENNA)?;
                self.dedup.unique_by_antenna = on;
                V::Bool(on)
            }
            ParamId::UniqueByData => {
                let on = self.unique_flag(config_key::UNIQUE_BY_DATA)?;
                self.dedup.unique_by_data = on;
                V::Bool(on)
            }
            ParamId::RecordHighestRssi => {
                let on = self.config_flag(config_key::RECORD_HIGHEST_RSSI)?;
                self.dedup.record_highest_rssi = on;
                V::Bool(on)
            }
            ParamId::ReportRssiInDbm => V::Bool(self.config_flag(config_key::RSSI_IN_DBM)?),
            ParamId::Model => V::Text(self.version_field(|v| v.model().name().to_string())?),
            ParamId::HardwareVersion => V::Text(self.version_field(VersionInfo::hardware_string)?),
            ParamId::SoftwareVersion => V::Text(self.version_field(VersionInfo::software_string)?),
            ParamId::SupportedProtocols => V::Protocols(self.version_field(|v| v.protocols.clone())?),
        })
    }

    fn write_param(&mut self, id: ParamId, value: ParamValue) -> Result<()> {
        use ParamValue as V;
        match (id, value) {
            (ParamId::BaudRate, v) => {
                let rate = expect_u32(&v)?;
                self.cmd_set_baud_rate(rate)?;
                self.engine.session_mut().set_host_baud_rate(rate)?;
            }
            (ParamId::TransportTimeout, v) => {
                let ms = expect_u32(&v)?;
                self.engine.session_mut().set_transport_timeout_ms(ms);
            }
            (ParamId::CommandTimeout, v) => {
                let ms = expect_u32(&v)?;
                self.engine.set_command_timeout_ms(ms);
            }
            (ParamId::PowerMode, V::PowerMode(mode)) => {
                self.cmd_set_power_mode(mode)?;
                self.engine.session_mut().set_power_mode(Some(mode));
            }
            (ParamId::UserMode, V::UserMode(mode)) => self.cmd_set_user_mode(mode)?,
            (ParamId::AsyncOnTime, v) => self.async_on_time_ms = expect_u32(&v)?,
            (ParamId::AsyncOffTime, v) => self.async_off_time_ms = expect_u32(&v)?,
            (ParamId::ReadPlan, V::ReadPlan(plan)) => self.read_plan = plan,
            (ParamId::TxRxMap, V::AntennaMap(mappings)) => {
                self.map.set(&mappings, &self.port_list)?;
                self.search_list.clear();
                self.current_ports = None;
            }
            (ParamId::CheckPort, v) => {
                let on = expect_bool(&v)?;
                self.set_config_flag(config_key::SAFETY_ANTENNA_CHECK, on)?;
            }
            (ParamId::PortSwitchGpos, V::Ports(pins)) => {
                let mut bits = 0u8;
                for pin in pins {
                    if !(1..=2).contains(&pin) {
                        return Err(ReaderError::InvalidArgument(format!(
                            "pin {} cannot switch antenna ports",
                            pin
                        )));
                    }
                    bits |= 1 << (pin - 1);
                }
                self.cmd_set_reader_config(config_key::ANTENNA_CONTROL_GPIO, bits)?;
                self.refresh_port_list()?;
            }
            (ParamId::SettlingTimeList, V::PortValues(values)) => self.set_port_column(2, &values)?,
            (ParamId::AccessPassword, V::Password(password)) => self.access_password = password,
            (ParamId::WriteMode, V::WriteMode(mode)) => self.write_mode = mode,
            (ParamId::Session, V::Session(session)) => {
                self.cmd_set_protocol_config(TagProtocol::Gen2, protocol_key::GEN2_SESSION, &[session as u8])?
            }
            (ParamId::Target, V::Target(target)) => self.cmd_set_protocol_config(
                TagProtocol::Gen2,
                protocol_key::GEN2_TARGET,
                &target.code().to_be_bytes(),
            )?,
            (ParamId::TagEncoding, V::TagEncoding(encoding)) => self.cmd_set_protocol_config(
                TagProtocol::Gen2,
                protocol_key::GEN2_TAG_ENCODING,
                &[encoding as u8],
            )?,
            (ParamId::Q, V::Q(q)) => {
                let bytes = match q {
                    Gen2Q::Dynamic => vec![0x00],
                    Gen2Q::Static(initial) => vec![0x01, initial],
                };
                self.cmd_set_protocol_config(TagProtocol::Gen2, protocol_key::GEN2_Q, &bytes)?;
            }
            (ParamId::Gen2Blf, v) => {
                let khz = expect_int(&v)?;
                self.set_blf(TagProtocol::Gen2, &GEN2_BLF_KHZ, khz)?;
            }
            (ParamId::Tari, V::Tari(tari)) => {
                self.cmd_set_protocol_config(TagProtocol::Gen2, protocol_key::GEN2_TARI, &[tari as u8])?
            }
            (ParamId::Iso180006bBlf, v) => {
                let khz = expect_int(&v)?;
                self.set_blf(TagProtocol::Iso180006b, &ISO180006B_BLF_KHZ, khz)?;
            }
            (ParamId::ReadPower, v) => {
                let power = self.checked_power(expect_int(&v)?)?;
                self.cmd_set_read_power(power)?;
            }
            (ParamId::WritePower, v) => {
                let power = self.checked_power(expect_int(&v)?)?;
                self.cmd_set_write_power(power)?;
            }
            (ParamId::EnablePowerSave, v) => {
                let on = expect_bool(&v)?;
                self.set_config_flag(config_key::TRANSMIT_POWER_SAVE, on)?;
            }
            (ParamId::PortReadPowerList, V::PortValues(values)) => self.set_port_column(0, &values)?,
            (ParamId::PortWritePowerList, V::PortValues(values)) => self.set_port_column(1, &values)?,
            (ParamId::RegionId, V::Region(region)) => {
                self.cmd_set_region(region)?;
                self.region = Some(region);
            }
            (ParamId::HopTable, V::U32List(table)) => self.cmd_set_hop_table(&table)?,
            (ParamId::HopTime, v) => {
                let ms = expect_u32(&v)?;
                self.cmd_set_hop_time(ms)?;
            }
            (ParamId::LbtEnable, v) => {
                let on = expect_bool(&v)?;
                let region = match self.region {
                    Some(region) => region,
                    None => self.cmd_get_region()?,
                };
                self.cmd_set_region_lbt(region, on)?;
            }
            (ParamId::TagOpProtocol, V::Protocol(protocol)) => self.tagop_protocol = protocol,
            (ParamId::TagOpAntenna, v) => {
                let antenna = u8::try_from(expect_int(&v)?)
                    .map_err(|_| ReaderError::InvalidArgument(format!("no such antenna {:?}", v)))?;
                if self.map.ports_for(antenna).is_none() {
                    return Err(ReaderError::InvalidArgument(format!(
                        "no such antenna {}",
                        antenna
                    )));
                }
                self.tagop_antenna = antenna;
            }
            (ParamId::UniqueByAntenna, v) => {
                let on = expect_bool(&v)?;
                self.set_unique_flag(config_key::UNIQUE_BY_ANTENNA, on)?;
                self.dedup.unique_by_antenna = on;
            }
            (ParamId::UniqueByData, v) => {
                let on = expect_bool(&v)?;
                self.set_unique_flag(config_key::UNIQUE_BY_DATA, on)?;
                self.dedup.unique_by_data = on;
            }
            (ParamId::RecordHighestRssi, v) => {
                let on = expect_bool(&v)?;
                self.set_config_flag(config_key::RECORD_HIGHEST_RSSI, on)?;
                self.dedup.record_highest_rssi = on;
            }
            (ParamId::ReportRssiInDbm, v) => {
                let on = expect_bool(&v)?;
                self.set_config_flag(config_key::RSSI_IN_DBM, on)?;
            }
            (id, value) => {
                warn!("Parameter {:?} cannot take {:?}", id, value);
                return Err(ReaderError::InvalidArgument(format!(
                    "{:?} cannot be set to {:?}",
                    id, value
                )));
            }
        }
        Ok(())
    }
}
