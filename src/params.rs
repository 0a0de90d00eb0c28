//! Named parameter registry with lazy capability probing
//!
//! Every parameter is a row in [`PARAMS`]. The registry only tracks names, types,
//! writability and confirmation; reading or writing the actual value is delegated to a
//! [`ParamBackend`] keyed by [`ParamId`].

use log::{debug, warn};
use std::collections::BTreeMap;

use crate::antenna::AntennaMapping;
use crate::error::{ReaderError, Result};
use crate::plan::ReadPlan;
use crate::types::{
    Gen2Q, Gen2Session, Gen2Tari, Gen2TagEncoding, Gen2Target, Gen2WriteMode, PowerMode, Region,
    TagProtocol, UserMode,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamType {
    Int,
    Bool,
    Text,
    Ports,
    U32List,
    PortValues,
    AntennaMap,
    Protocol,
    Protocols,
    Region,
    Regions,
    PowerMode,
    UserMode,
    Session,
    Target,
    TagEncoding,
    Q,
    Tari,
    WriteMode,
    ReadPlan,
    Password,
}

/// A parameter value of any type
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Int(i32),
    Bool(bool),
    Text(String),
    Ports(Vec<u8>),
    U32List(Vec<u32>),
    /// `(port, value)` pairs: per-port power in centi-dBm or settling time in µs
    PortValues(Vec<(u8, i32)>),
    AntennaMap(Vec<AntennaMapping>),
    Protocol(TagProtocol),
    Protocols(Vec<TagProtocol>),
    Region(Region),
    Regions(Vec<Region>),
    PowerMode(PowerMode),
    UserMode(UserMode),
    Session(Gen2Session),
    Target(Gen2Target),
    TagEncoding(Gen2TagEncoding),
    Q(Gen2Q),
    Tari(Gen2Tari),
    WriteMode(Gen2WriteMode),
    ReadPlan(ReadPlan),
    Password(u32),
}

impl ParamValue {
    pub fn kind(&self) -> ParamType {
        match self {
            Self::Int(_) => ParamType::Int,
            Self::Bool(_) => ParamType::Bool,
            Self::Text(_) => ParamType::Text,
            Self::Ports(_) => ParamType::Ports,
            Self::U32List(_) => ParamType::U32List,
            Self::PortValues(_) => ParamType::PortValues,
            Self::AntennaMap(_) => ParamType::AntennaMap,
            Self::Protocol(_) => ParamType::Protocol,
            Self::Protocols(_) => ParamType::Protocols,
            Self::Region(_) => ParamType::Region,
            Self::Regions(_) => ParamType::Regions,
            Self::PowerMode(_) => ParamType::PowerMode,
            Self::UserMode(_) => ParamType::UserMode,
            Self::Session(_) => ParamType::Session,
            Self::Target(_) => ParamType::Target,
            Self::TagEncoding(_) => ParamType::TagEncoding,
            Self::Q(_) => ParamType::Q,
            Self::Tari(_) => ParamType::Tari,
            Self::WriteMode(_) => ParamType::WriteMode,
            Self::ReadPlan(_) => ParamType::ReadPlan,
            Self::Password(_) => ParamType::Password,
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }
}

impl From<i32> for ParamValue {
    fn from(v: i32) -> Self {
        Self::Int(v)
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<ReadPlan> for ParamValue {
    fn from(v: ReadPlan) -> Self {
        Self::ReadPlan(v)
    }
}

impl From<TagProtocol> for ParamValue {
    fn from(v: TagProtocol) -> Self {
        Self::Protocol(v)
    }
}

impl From<Region> for ParamValue {
    fn from(v: Region) -> Self {
        Self::Region(v)
    }
}

/// Backend-side identity of a parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamId {
    BaudRate,
    TransportTimeout,
    CommandTimeout,
    PowerMode,
    UserMode,
    AsyncOnTime,
    AsyncOffTime,
    ReadPlan,
    PortList,
    ConnectedPortList,
    TxRxMap,
    CheckPort,
    PortSwitchGpos,
    SettlingTimeList,
    GpiList,
    GpoList,
    AccessPassword,
    WriteMode,
    Session,
    Target,
    TagEncoding,
    Q,
    Gen2Blf,
    Tari,
    Iso180006bBlf,
    ReadPower,
    WritePower,
    PowerMin,
    PowerMax,
    EnablePowerSave,
    PortReadPowerList,
    PortWritePowerList,
    Temperature,
    RegionId,
    SupportedRegions,
    HopTable,
    HopTime,
    LbtEnable,
    TagOpProtocol,
    TagOpAntenna,
    UniqueByAntenna,
    UniqueByData,
    RecordHighestRssi,
    ReportRssiInDbm,
    Model,
    HardwareVersion,
    SoftwareVersion,
    SupportedProtocols,
}

/// Static description of one parameter
#[derive(Debug)]
pub struct ParamDef {
    pub name: &'static str,
    pub id: ParamId,
    pub ty: ParamType,
    pub writable: bool,
    /// Known to exist on every module; otherwise probed on first use
    pub confirmed: bool,
}

const fn def(name: &'static str, id: ParamId, ty: ParamType, writable: bool, confirmed: bool) -> ParamDef {
    ParamDef {
        name,
        id,
        ty,
        writable,
        confirmed,
    }
}

const RW: bool = true;
const RO: bool = false;
const SURE: bool = true;
const PROBE: bool = false;

pub static PARAMS: &[ParamDef] = &[
    def("/reader/baudRate", ParamId::BaudRate, ParamType::Int, RW, SURE),
    def("/reader/transportTimeout", ParamId::TransportTimeout, ParamType::Int, RW, SURE),
    def("/reader/commandTimeout", ParamId::CommandTimeout, ParamType::Int, RW, SURE),
    def("/reader/powerMode", ParamId::PowerMode, ParamType::PowerMode, RW, SURE),
    def("/reader/userMode", ParamId::UserMode, ParamType::UserMode, RW, PROBE),
    def("/reader/read/asyncOnTime", ParamId::AsyncOnTime, ParamType::Int, RW, SURE),
    def("/reader/read/asyncOffTime", ParamId::AsyncOffTime, ParamType::Int, RW, SURE),
    def("/reader/read/plan", ParamId::ReadPlan, ParamType::ReadPlan, RW, SURE),
    def("/reader/antenna/portList", ParamId::PortList, ParamType::Ports, RO, SURE),
    def("/reader/antenna/connectedPortList", ParamId::ConnectedPortList, ParamType::Ports, RO, SURE),
    def("/reader/antenna/txRxMap", ParamId::TxRxMap, ParamType::AntennaMap, RW, SURE),
    def("/reader/antenna/checkPort", ParamId::CheckPort, ParamType::Bool, RW, PROBE),
    def("/reader/antenna/portSwitchGpos", ParamId::PortSwitchGpos, ParamType::Ports, RW, PROBE),
    def("/reader/antenna/settlingTimeList", ParamId::SettlingTimeList, ParamType::PortValues, RW, PROBE),
    def("/reader/gpio/inputList", ParamId::GpiList, ParamType::Ports, RO, SURE),
    def("/reader/gpio/outputList", ParamId::GpoList, ParamType::Ports, RO, SURE),
    def("/reader/gen2/accessPassword", ParamId::AccessPassword, ParamType::Password, RW, SURE),
    def("/reader/gen2/writeMode", ParamId::WriteMode, ParamType::WriteMode, RW, SURE),
    def("/reader/gen2/session", ParamId::Session, ParamType::Session, RW, SURE),
    def("/reader/gen2/target", ParamId::Target, ParamType::Target, RW, PROBE),
    def("/reader/gen2/tagEncoding", ParamId::TagEncoding, ParamType::TagEncoding, RW, PROBE),
    def("/reader/gen2/q", ParamId::Q, ParamType::Q, RW, PROBE),
    def("/reader/gen2/BLF", ParamId::Gen2Blf, ParamType::Int, RW, PROBE),
    def("/reader/gen2/tari", ParamId::Tari, ParamType::Tari, RW, PROBE),
    def("/reader/iso180006b/BLF", ParamId::Iso180006bBlf, ParamType::Int, RW, PROBE),
    def("/reader/radio/readPower", ParamId::ReadPower, ParamType::Int, RW, SURE),
    def("/reader/radio/writePower", ParamId::WritePower, ParamType::Int, RW, SURE),
    def("/reader/radio/powerMin", ParamId::PowerMin, ParamType::Int, RO, SURE),
    def("/reader/radio/powerMax", ParamId::PowerMax, ParamType::Int, RO, SURE),
    def("/reader/radio/enablePowerSave", ParamId::EnablePowerSave, ParamType::Bool, RW, SURE),
    def("/reader/radio/portReadPowerList", ParamId::PortReadPowerList, ParamType::PortValues, RW, PROBE),
    def("/reader/radio/portWritePowerList", ParamId::PortWritePowerList, ParamType::PortValues, RW, PROBE),
    def("/reader/radio/temperature", ParamId::Temperature, ParamType::Int, RO, PROBE),
    def("/reader/region/id", ParamId::RegionId, ParamType::Region, RW, SURE),
    def("/reader/region/supportedRegions", ParamId::SupportedRegions, ParamType::Regions, RO, SURE),
    def("/reader/region/hopTable", ParamId::HopTable, ParamType::U32List, RW, SURE),
    def("/reader/region/hopTime", ParamId::HopTime, ParamType::Int, RW, SURE),
    def("/reader/region/lbt/enable", ParamId::LbtEnable, ParamType::Bool, RW, SURE),
    def("/reader/tagop/protocol", ParamId::TagOpProtocol, ParamType::Protocol, RW, SURE),
    def("/reader/tagop/antenna", ParamId::TagOpAntenna, ParamType::Int, RW, SURE),
    def("/reader/tagReadData/uniqueByAntenna", ParamId::UniqueByAntenna, ParamType::Bool, RW, PROBE),
    def("/reader/tagReadData/uniqueByData", ParamId::UniqueByData, ParamType::Bool, RW, PROBE),
    def("/reader/tagReadData/recordHighestRssi", ParamId::RecordHighestRssi, ParamType::Bool, RW, PROBE),
    def("/reader/tagReadData/reportRssiInDbm", ParamId::ReportRssiInDbm, ParamType::Bool, RW, PROBE),
    def("/reader/version/model", ParamId::Model, ParamType::Text, RO, SURE),
    def("/reader/version/hardware", ParamId::HardwareVersion, ParamType::Text, RO, SURE),
    def("/reader/version/software", ParamId::SoftwareVersion, ParamType::Text, RO, SURE),
    def("/reader/version/supportedProtocols", ParamId::SupportedProtocols, ParamType::Protocols, RO, SURE),
];

/// Where parameter values actually live
pub trait ParamBackend {
    fn read_param(&mut self, id: ParamId) -> Result<ParamValue>;
    fn write_param(&mut self, id: ParamId, value: ParamValue) -> Result<()>;
}

#[derive(Debug)]
struct Descriptor {
    def: &'static ParamDef,
    confirmed: bool,
    cached: Option<ParamValue>,
}

/// Case-insensitive table of the parameters this connection supports
#[derive(Debug)]
pub struct ParamRegistry {
    defs: Vec<&'static ParamDef>,
    entries: BTreeMap<String, Descriptor>,
}

impl ParamRegistry {
    pub fn new(defs: impl IntoIterator<Item = &'static ParamDef>) -> Self {
        let mut registry = Self {
            defs: defs.into_iter().collect(),
            entries: BTreeMap::new(),
        };
        registry.reset();
        registry
    }

    /// The full parameter set of an embedded module
    pub fn standard() -> Self {
        Self::new(PARAMS.iter())
    }

    /// Forget every probe result and cached value.
    pub fn reset(&mut self) {
        self.entries = self
            .defs
            .iter()
            .map(|&def| {
                let descriptor = Descriptor {
                    def,
                    confirmed: def.confirmed,
                    cached: None,
                };
                (def.name.to_ascii_lowercase(), descriptor)
            })
            .collect();
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(&name.to_ascii_lowercase())
    }

    pub fn is_confirmed(&self, name: &str) -> bool {
        self.entries
            .get(&name.to_ascii_lowercase())
            .is_some_and(|d| d.confirmed)
    }

    /// Last value read or written, without device I/O
    pub fn cached(&self, name: &str) -> Option<&ParamValue> {
        self.entries
            .get(&name.to_ascii_lowercase())
            .and_then(|d| d.cached.as_ref())
    }

    pub fn get(&mut self, name: &str, backend: &mut dyn ParamBackend) -> Result<ParamValue> {
        let key = name.to_ascii_lowercase();
        let id = self.entry(&key, name)?.def.id;

        match backend.read_param(id) {
            Ok(value) => {
                if let Some(entry) = self.entries.get_mut(&key) {
                    entry.confirmed = true;
                    entry.cached = Some(value.clone());
                }
                Ok(value)
            }
            Err(e) => Err(self.probe_failed(&key, name, e)),
        }
    }

    pub fn set(&mut self, name: &str, value: ParamValue, backend: &mut dyn ParamBackend) -> Result<()> {
        let key = name.to_ascii_lowercase();
        let entry = self.entry(&key, name)?;
        let (def, confirmed) = (entry.def, entry.confirmed);

        if !def.writable {
            return Err(ReaderError::ReadOnly(def.name.to_string()));
        }
        if value.kind() != def.ty {
            return Err(ReaderError::TypeMismatch {
                name: def.name.to_string(),
                expected: def.ty,
                actual: value.kind(),
            });
        }
        if !confirmed {
            self.get(name, backend)?;
        }

        backend.write_param(def.id, value.clone())?;
        if let Some(entry) = self.entries.get_mut(&key) {
            entry.cached = Some(value);
        }
        Ok(())
    }

    /// Names of every parameter that exists on this module, probing the unconfirmed ones.
    pub fn list(&mut self, backend: &mut dyn ParamBackend) -> Vec<String> {
        let unconfirmed: Vec<&'static str> = self
            .entries
            .values()
            .filter(|d| !d.confirmed)
            .map(|d| d.def.name)
            .collect();
        for name in unconfirmed {
            if let Err(e) = self.get(name, backend) {
                debug!("{} not listed: {}", name, e);
            }
        }

        let mut names: Vec<String> = self
            .entries
            .values()
            .filter(|d| d.confirmed)
            .map(|d| d.def.name.to_string())
            .collect();
        names.sort();
        names
    }

    fn entry(&self, key: &str, name: &str) -> Result<&Descriptor> {
        self.entries
            .get(key)
            .ok_or_else(|| ReaderError::NotFound(name.to_string()))
    }

    /// An unconfirmed parameter the hardware cannot support disappears for good.
    fn probe_failed(&mut self, key: &str, name: &str, err: ReaderError) -> ReaderError {
        let unconfirmed = self.entries.get(key).is_some_and(|d| !d.confirmed);
        let unsupported = err.kind().is_some_and(|k| k.is_unsupported());
        if unconfirmed && unsupported {
            warn!("Removing unsupported parameter {}: {}", name, err);
            self.entries.remove(key);
            return ReaderError::NotFound(name.to_string());
        }
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    /// Answers from a table; ids listed in `unsupported` fail like old firmware does.
    #[derive(Default)]
    struct TableBackend {
        values: HashMap<ParamId, ParamValue>,
        unsupported: Vec<ParamId>,
        io: usize,
    }

    impl ParamBackend for TableBackend {
        fn read_param(&mut self, id: ParamId) -> Result<ParamValue> {
            self.io += 1;
            if self.unsupported.contains(&id) {
                return Err(ReaderError::fault(0x0102));
            }
            self.values
                .get(&id)
                .cloned()
                .ok_or_else(|| ReaderError::comm("timeout"))
        }

        fn write_param(&mut self, id: ParamId, value: ParamValue) -> Result<()> {
            self.io += 1;
            self.values.insert(id, value);
            Ok(())
        }
    }

    fn backend() -> TableBackend {
        let mut b = TableBackend::default();
        b.values.insert(ParamId::ReadPower, ParamValue::Int(3000));
        b.values.insert(ParamId::UniqueByAntenna, ParamValue::Bool(false));
        b.values.insert(ParamId::Model, ParamValue::Text("M6e".into()));
        b.unsupported.push(ParamId::Temperature);
        b
    }

    #[test]
    fn names_are_case_insensitive() {
        let mut registry = ParamRegistry::standard();
        let mut b = backend();
        assert_eq!(
            registry.get("/READER/radio/READPOWER", &mut b).unwrap(),
            ParamValue::Int(3000)
        );
    }

    #[test]
    fn unsupported_probe_removes_parameter_for_good() {
        let mut registry = ParamRegistry::standard();
        let mut b = backend();

        for _ in 0..2 {
            assert!(matches!(
                registry.get("/reader/radio/temperature", &mut b),
                Err(ReaderError::NotFound(_))
            ));
        }
        assert!(!registry.contains("/reader/radio/temperature"));
        assert_eq!(b.io, 1);
    }

    #[test]
    fn successful_probe_confirms() {
        let mut registry = ParamRegistry::standard();
        let mut b = backend();
        let name = "/reader/tagReadData/uniqueByAntenna";

        assert!(!registry.is_confirmed(name));
        assert_eq!(registry.get(name, &mut b).unwrap(), ParamValue::Bool(false));
        assert_eq!(registry.get(name, &mut b).unwrap(), ParamValue::Bool(false));
        assert!(registry.is_confirmed(name));
    }

    #[test]
    fn transient_probe_failure_keeps_parameter() {
        let mut registry = ParamRegistry::standard();
        let mut b = backend();
        let name = "/reader/gen2/q";

        assert!(registry.get(name, &mut b).unwrap_err().is_communication());
        assert!(registry.contains(name));
        assert!(!registry.is_confirmed(name));
    }

    #[test]
    fn read_only_rejected_before_io() {
        let mut registry = ParamRegistry::standard();
        let mut b = backend();
        let err = registry
            .set("/reader/version/model", ParamValue::Text("M5e".into()), &mut b)
            .unwrap_err();
        assert!(matches!(err, ReaderError::ReadOnly(_)));
        assert_eq!(b.io, 0);
    }

    #[test]
    fn type_mismatch_rejected_before_io() {
        let mut registry = ParamRegistry::standard();
        let mut b = backend();
        let err = registry
            .set("/reader/radio/readPower", ParamValue::Bool(true), &mut b)
            .unwrap_err();
        assert!(matches!(
            err,
            ReaderError::TypeMismatch { expected: ParamType::Int, actual: ParamType::Bool, .. }
        ));
        assert_eq!(b.io, 0);
    }

    #[test]
    fn set_updates_cache() {
        let mut registry = ParamRegistry::standard();
        let mut b = backend();
        registry
            .set("/reader/radio/readPower", ParamValue::Int(2500), &mut b)
            .unwrap();
        assert_eq!(registry.cached("/reader/radio/readpower"), Some(&ParamValue::Int(2500)));
    }

    #[test]
    fn unknown_name_not_found() {
        let mut registry = ParamRegistry::standard();
        assert!(matches!(
            registry.get("/reader/nope", &mut backend()),
            Err(ReaderError::NotFound(_))
        ));
    }

    #[test]
    fn list_is_sorted_and_drops_unsupported() {
        let defs = PARAMS.iter().filter(|d| {
            matches!(d.id, ParamId::ReadPower | ParamId::Model | ParamId::Temperature | ParamId::UniqueByAntenna)
        });
        let mut registry = ParamRegistry::new(defs);
        let mut b = backend();

        assert_eq!(
            registry.list(&mut b),
            vec![
                "/reader/radio/readPower".to_string(),
                "/reader/tagReadData/uniqueByAntenna".to_string(),
                "/reader/version/model".to_string(),
            ]
        );
    }

    #[test]
    fn reset_restores_removed_parameters() {
        let mut registry = ParamRegistry::standard();
        let mut b = backend();
        let _ = registry.get("/reader/radio/temperature", &mut b);
        registry.reset();
        assert!(registry.contains("/reader/radio/temperature"));
    }
}
