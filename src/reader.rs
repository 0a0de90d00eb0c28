use log::{debug, info, warn};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use crate::background::{BackgroundReader, ExceptionListener, ListenerId, Listeners, ReadListener};
use crate::command::Outcome;
use crate::config::ReaderConfig;
use crate::dedup::deduplicate;
use crate::device::{Device, ReadMultiple};
use crate::error::{ReaderError, Result};
use crate::params::{ParamRegistry, ParamValue};
use crate::parser::{self, EmbeddedCounts};
use crate::plan::{split_timeout, ReadPlan, SimpleReadPlan, TagFilter, TagOp};
use crate::session::Session;
use crate::transport::RfidTransport;
use crate::types::{Bank, GpioPin, MetadataFlags, TagReadRecord};

fn unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Device plus parameter table, shared between the caller and the background worker
pub(crate) struct ReaderCore<T: RfidTransport> {
    pub(crate) device: Device<T>,
    pub(crate) params: ParamRegistry,
}

impl<T: RfidTransport> ReaderCore<T> {
    /// Run the current read plan for `timeout_ms` and merge repeated sightings.
    pub(crate) fn read(&mut self, timeout_ms: u32) -> Result<Vec<TagReadRecord>> {
        self.read_with_counts(timeout_ms).map(|(records, _)| records)
    }

    pub(crate) fn read_with_counts(&mut self, timeout_ms: u32) -> Result<(Vec<TagReadRecord>, EmbeddedCounts)> {
        let plan = self.device.read_plan().clone();
        let mut records = Vec::new();
        let mut counts = EmbeddedCounts::default();
        self.run_plan(&plan, timeout_ms, &mut records, &mut counts)?;
        debug!("Read {} raw records in {} ms", records.len(), timeout_ms);
        Ok((deduplicate(records, self.device.dedup_policy()), counts))
    }

    fn run_plan(
        &mut self,
        plan: &ReadPlan,
        timeout_ms: u32,
        records: &mut Vec<TagReadRecord>,
        counts: &mut EmbeddedCounts,
    ) -> Result<()> {
        match plan {
            ReadPlan::Simple(simple) => self.run_simple(simple, timeout_ms, records, counts),
            ReadPlan::Multi(multi) => {
                let weights: Vec<u32> = multi.plans.iter().map(ReadPlan::weight).collect();
                let slices = split_timeout(&weights, timeout_ms);
                for (sub, slice) in multi.plans.iter().zip(slices) {
                    self.run_plan(sub, slice, records, counts)?;
                }
                Ok(())
            }
        }
    }

    fn run_simple(
        &mut self,
        plan: &SimpleReadPlan,
        timeout_ms: u32,
        records: &mut Vec<TagReadRecord>,
        counts: &mut EmbeddedCounts,
    ) -> Result<()> {
        self.device.ensure_protocol(plan.protocol)?;
        let ports = self.device.search_ports(&plan.antennas)?;
        if ports.is_empty() {
            warn!("No antennas to search for {:?}", plan.protocol);
            return Ok(());
        }
        self.device.ensure_search_list(&ports)?;

        let deadline = Instant::now() + Duration::from_millis(u64::from(timeout_ms));
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now()).as_millis();
            if remaining == 0 {
                break;
            }
            let request = ReadMultiple {
                timeout_ms: remaining.min(u128::from(u16::MAX)) as u16,
                protocol: Some(plan.protocol),
                filter: plan.filter.as_ref(),
                op: plan.op.as_ref(),
                streaming: self.device.is_streaming(),
                access_password: self.device.access_password(),
            };

            self.device.cmd_clear_tag_buffer()?;
            let base_time = unix_ms();
            let before = records.len();
            if request.streaming {
                self.stream_pass(&request, records)?;
            } else {
                self.buffer_pass(&request, records, counts)?;
            }
            for record in &mut records[before..] {
                record.base_time_ms = base_time;
            }
        }
        Ok(())
    }

    /// One non-streaming inventory round, drained from the tag buffer.
    fn buffer_pass(
        &mut self,
        request: &ReadMultiple,
        records: &mut Vec<TagReadRecord>,
        counts: &mut EmbeddedCounts,
    ) -> Result<()> {
        let payload = match self.device.cmd_read_multiple(request)? {
            Outcome::Done(payload) => payload,
            Outcome::NoTagsFound => return Ok(()),
        };
        let found = if request.op.is_some() {
            let embedded = parser::parse_embedded_counts(&payload)?;
            *counts += embedded;
            embedded.found
        } else {
            parser::read_multiple_count(&payload)?
        };

        let mut fetched: u32 = 0;
        while fetched < found {
            let batch = self
                .device
                .cmd_get_tag_buffer(MetadataFlags::ALL, false, request.protocol)?;
            if batch.is_empty() {
                warn!("Tag buffer ran dry after {} of {} tags", fetched, found);
                break;
            }
            fetched += batch.len() as u32;
            records.extend(batch.into_iter().map(|r| self.map_antenna(r)));
        }
        Ok(())
    }

    /// One streaming round: tag frames until the end-of-round frame or "no tags".
    fn stream_pass(&mut self, request: &ReadMultiple, records: &mut Vec<TagReadRecord>) -> Result<()> {
        self.device.begin_read_stream(request)?;
        let result = self.drain_stream(request, records);
        self.device.engine_mut().end_stream();
        result
    }

    fn drain_stream(&mut self, request: &ReadMultiple, records: &mut Vec<TagReadRecord>) -> Result<()> {
        let gpio_count = self.device.gpio_count();
        loop {
            let frame = self
                .device
                .engine_mut()
                .next_stream_frame(u32::from(request.timeout_ms))?;
            let payload = match frame {
                Outcome::Done(payload) => payload,
                Outcome::NoTagsFound => return Ok(()),
            };
            match parser::parse_stream_frame(&payload, request.protocol, gpio_count)? {
                Some(record) => records.push(self.map_antenna(record)),
                None => return Ok(()),
            }
        }
    }

    /// Replace the raw port code from the metadata with the logical antenna.
    fn map_antenna(&self, mut record: TagReadRecord) -> TagReadRecord {
        let code = record.antenna;
        record.antenna = self.device.antenna_map().antenna_for_code(code).unwrap_or_else(|| {
            warn!("Tag seen on unmapped port pair 0x{:02X}", code);
            0
        });
        record
    }
}

/// Connected reader: parameters, synchronous reads, tag operations and
/// background reading with listeners.
pub struct Reader<T: RfidTransport + Send + 'static> {
    core: Arc<Mutex<ReaderCore<T>>>,
    listeners: Arc<Listeners>,
    background: Option<BackgroundReader>,
}

impl<T: RfidTransport + Send + 'static> Reader<T> {
    /// Find the module on `transport`, boot its firmware if needed and load its state.
    pub fn connect(transport: T, config: ReaderConfig) -> Result<Self> {
        let session = Session::new(transport, config.baud_rate);
        let mut device = Device::new(session, &config);
        device.initialize(&config)?;
        info!("Reader ready on ports {:?}", device.port_list());

        Ok(Self {
            core: Arc::new(Mutex::new(ReaderCore {
                device,
                params: ParamRegistry::standard(),
            })),
            listeners: Arc::new(Listeners::default()),
            background: None,
        })
    }

    /// Stop background reading and release the transport.
    pub fn destroy(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(mut background) = self.background.take() {
            background.shutdown();
        }
    }

    /// Inventory with the current read plan for `timeout_ms`.
    pub fn read(&self, timeout_ms: u32) -> Result<Vec<TagReadRecord>> {
        self.core.lock().read(timeout_ms)
    }

    /// Like [`Self::read`], also totalling the outcomes of an embedded tag operation.
    pub fn read_with_op_counts(&self, timeout_ms: u32) -> Result<(Vec<TagReadRecord>, EmbeddedCounts)> {
        self.core.lock().read_with_counts(timeout_ms)
    }

    /// Run one tag operation on `/reader/tagop/antenna`.
    pub fn execute_tag_op(&self, op: &TagOp, filter: Option<&TagFilter>) -> Result<Vec<u8>> {
        self.core.lock().device.execute_tag_op(op, filter)
    }

    pub fn read_tag_mem_words(
        &self,
        filter: Option<&TagFilter>,
        bank: Bank,
        word_address: u32,
        count: u8,
    ) -> Result<Vec<u16>> {
        let op = TagOp::ReadData {
            bank,
            word_address,
            word_count: count,
        };
        let bytes = self.execute_tag_op(&op, filter)?;
        Ok(bytes
            .chunks_exact(2)
            .map(|w| u16::from_be_bytes([w[0], w[1]]))
            .collect())
    }

    /// Byte-addressed read on top of the word-addressed Gen2 read.
    pub fn read_tag_mem_bytes(
        &self,
        filter: Option<&TagFilter>,
        bank: Bank,
        byte_address: u32,
        len: usize,
    ) -> Result<Vec<u8>> {
        let skip = (byte_address % 2) as usize;
        let words = (skip + len).div_ceil(2);
        let word_count = u8::try_from(words)
            .map_err(|_| ReaderError::InvalidArgument(format!("{} bytes is too long a read", len)))?;
        let op = TagOp::ReadData {
            bank,
            word_address: byte_address / 2,
            word_count,
        };
        let bytes = self.execute_tag_op(&op, filter)?;
        bytes
            .get(skip..skip + len)
            .map(<[u8]>::to_vec)
            .ok_or_else(|| ReaderError::InvalidResponse(format!("expected {} bytes, got {}", skip + len, bytes.len())))
    }

    pub fn write_tag_mem_words(
        &self,
        filter: Option<&TagFilter>,
        bank: Bank,
        word_address: u32,
        data: &[u16],
    ) -> Result<()> {
        let op = TagOp::WriteData {
            bank,
            word_address,
            data: data.to_vec(),
        };
        self.execute_tag_op(&op, filter).map(|_| ())
    }

    /// Word-aligned byte write
    pub fn write_tag_mem_bytes(
        &self,
        filter: Option<&TagFilter>,
        bank: Bank,
        byte_address: u32,
        data: &[u8],
    ) -> Result<()> {
        if byte_address % 2 != 0 || data.len() % 2 != 0 {
            return Err(ReaderError::InvalidArgument(
                "byte writes must start and end on a word boundary".into(),
            ));
        }
        let words: Vec<u16> = data
            .chunks_exact(2)
            .map(|w| u16::from_be_bytes([w[0], w[1]]))
            .collect();
        self.write_tag_mem_words(filter, bank, byte_address / 2, &words)
    }

    /// Give the tag matching `filter` (or the only tag in the field) a new EPC.
    pub fn write_tag(&self, filter: Option<&TagFilter>, epc: &[u8]) -> Result<()> {
        let op = TagOp::WriteEpc { epc: epc.to_vec() };
        self.execute_tag_op(&op, filter).map(|_| ())
    }

    /// Lock with `/reader/gen2/accessPassword`
    pub fn lock_tag(&self, filter: Option<&TagFilter>, mask: u16, action: u16) -> Result<()> {
        let mut core = self.core.lock();
        let op = TagOp::Lock {
            access_password: core.device.access_password(),
            mask,
            action,
        };
        core.device.execute_tag_op(&op, filter).map(|_| ())
    }

    pub fn kill_tag(&self, filter: Option<&TagFilter>, kill_password: u32) -> Result<()> {
        self.execute_tag_op(&TagOp::Kill { kill_password }, filter)
            .map(|_| ())
    }

    pub fn gpi_get(&self) -> Result<Vec<GpioPin>> {
        self.core.lock().device.cmd_get_gpio_inputs()
    }

    pub fn gpo_set(&self, pins: &[GpioPin]) -> Result<()> {
        let mut core = self.core.lock();
        for pin in pins {
            core.device.cmd_set_gpio_output(pin.id, pin.high)?;
        }
        Ok(())
    }

    pub fn param_get(&self, name: &str) -> Result<ParamValue> {
        let mut core = self.core.lock();
        let ReaderCore { device, params } = &mut *core;
        params.get(name, device)
    }

    pub fn param_set(&self, name: &str, value: impl Into<ParamValue>) -> Result<()> {
        let mut core = self.core.lock();
        let ReaderCore { device, params } = &mut *core;
        params.set(name, value.into(), device)
    }

    /// Every parameter this module supports, sorted
    pub fn param_list(&self) -> Vec<String> {
        let mut core = self.core.lock();
        let ReaderCore { device, params } = &mut *core;
        params.list(device)
    }

    pub fn add_read_listener(&self, listener: impl Fn(&TagReadRecord) + Send + Sync + 'static) -> ListenerId {
        let listener: ReadListener = Box::new(listener);
        self.listeners.add_read(listener)
    }

    pub fn add_exception_listener(&self, listener: impl Fn(&ReaderError) + Send + Sync + 'static) -> ListenerId {
        let listener: ExceptionListener = Box::new(listener);
        self.listeners.add_exception(listener)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }

    /// Read continuously in `/reader/read/asyncOnTime` bursts until [`Self::stop_reading`].
    pub fn start_reading(&mut self) -> Result<()> {
        if self.background.is_none() {
            self.background = Some(BackgroundReader::spawn(
                self.core.clone(),
                self.listeners.clone(),
            )?);
        }
        match &self.background {
            Some(background) => background.start(),
            None => Err(ReaderError::NotReady("background reader unavailable".into())),
        }
    }

    /// Returns after the burst in progress has been handed to the listeners.
    pub fn stop_reading(&mut self) -> Result<()> {
        match &self.background {
            Some(background) => background.stop(),
            None => Ok(()),
        }
    }
}

impl<T: RfidTransport + Send + 'static> Drop for Reader<T> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::antenna::AntennaMapping;
    use crate::device::tests::connect_script;
    use crate::error::FaultKind;
    use crate::mock::{fault, ok, ScriptedTransport};
    use crate::opcode;
    use crate::types::TagProtocol;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const EPC: [u8; 12] = [
        0xE2, 0x00, 0x34, 0x12, 0x01, 0x23, 0x45, 0x67, 0x89, 0xAB, 0xCD, 0xEF,
    ];

    /// Count, RSSI and antenna metadata, then a Gen2 tag with PC 0x3000 and CRC 0xABCD
    fn tag_record(count: u8, rssi: i8, port_code: u8) -> Vec<u8> {
        let mut bytes = vec![count, rssi as u8, port_code, 0x00, 0x80, 0x30, 0x00];
        bytes.extend_from_slice(&EPC);
        bytes.extend_from_slice(&[0xAB, 0xCD]);
        bytes
    }

    fn tag_buffer(records: &[Vec<u8>]) -> Vec<u8> {
        let mut payload = vec![0x00, 0x07, 0x00, records.len() as u8];
        for record in records {
            payload.extend_from_slice(record);
        }
        ok(opcode::GET_TAG_ID_BUFFER, &payload)
    }

    fn found(count: u8) -> Vec<u8> {
        ok(opcode::READ_TAG_ID_MULTIPLE, &[0x00, 0x00, 0x03, count])
    }

    fn config() -> ReaderConfig {
        ReaderConfig {
            transport_timeout_ms: 20,
            ..ReaderConfig::default()
        }
    }

    /// Reader past `connect` whose idle inventory rounds find nothing
    fn reader_with(
        config: ReaderConfig,
        extra: Vec<Vec<u8>>,
    ) -> (Reader<ScriptedTransport>, Arc<Mutex<Vec<Vec<u8>>>>) {
        let mut replies = connect_script();
        replies.extend(extra);
        let transport = ScriptedTransport::new(replies)
            .with_default(opcode::SET_ANTENNA_PORT, ok(opcode::SET_ANTENNA_PORT, &[]))
            .with_default(opcode::CLEAR_TAG_ID_BUFFER, ok(opcode::CLEAR_TAG_ID_BUFFER, &[]))
            .with_default(opcode::READ_TAG_ID_MULTIPLE, fault(opcode::READ_TAG_ID_MULTIPLE, 0x0400));
        let sent = transport.sent.clone();
        let reader = Reader::connect(transport, config).unwrap();
        sent.lock().clear();
        (reader, sent)
    }

    fn reader(extra: Vec<Vec<u8>>) -> (Reader<ScriptedTransport>, Arc<Mutex<Vec<Vec<u8>>>>) {
        reader_with(config(), extra)
    }

    fn plan(antennas: Vec<u8>) -> ReadPlan {
        ReadPlan::Simple(SimpleReadPlan::new(TagProtocol::Gen2, antennas))
    }

    /// Timeout field of each read-multiple request, in send order
    fn read_timeouts(sent: &[Vec<u8>]) -> Vec<(usize, u16)> {
        sent.iter()
            .enumerate()
            .filter(|(_, f)| f[2] == opcode::READ_TAG_ID_MULTIPLE)
            .map(|(i, f)| (i, u16::from_be_bytes([f[6], f[7]])))
            .collect()
    }

    // ===================
    // Synchronous reads
    // ===================

    #[test]
    fn gen2_tag_read_on_bistatic_antenna() {
        let (reader, sent) = reader(vec![
            ok(opcode::SET_ANTENNA_PORT, &[]),
            ok(opcode::CLEAR_TAG_ID_BUFFER, &[]),
            found(1),
            tag_buffer(&[tag_record(3, -60, 0x12)]),
        ]);
        reader
            .param_set(
                "/reader/antenna/txRxMap",
                ParamValue::AntennaMap(vec![AntennaMapping::new(1, 1, 1), AntennaMapping::new(5, 1, 2)]),
            )
            .unwrap();
        reader.param_set("/reader/read/plan", plan(vec![5])).unwrap();

        let tags = reader.read(50).unwrap();
        assert_eq!(tags.len(), 1);
        let tag = &tags[0];
        assert_eq!(tag.epc_hex(), "E20034120123456789ABCDEF");
        assert_eq!(tag.tag.crc, vec![0xAB, 0xCD]);
        assert_eq!(tag.tag.pc, vec![0x30, 0x00]);
        assert_eq!(tag.antenna, 5);
        assert_eq!(tag.read_count, 3);
        assert_eq!(tag.rssi, -60);
        assert!(tag.base_time_ms > 0);

        let sent = sent.lock();
        // search list holds the single (tx 1, rx 2) pair
        assert_eq!(&sent[0][2..6], &[opcode::SET_ANTENNA_PORT, 0x02, 0x01, 0x02]);
    }

    #[test]
    fn count_and_antenna_only_record_maps_every_field() {
        let mut payload = vec![0x00, 0x05, 0x00, 0x01, 0x04, 0x12, 0x00, 0x80, 0x30, 0x00];
        payload.extend_from_slice(&EPC);
        payload.extend_from_slice(&[0xAB, 0xCD]);
        let (reader, _) = reader(vec![
            ok(opcode::SET_ANTENNA_PORT, &[]),
            ok(opcode::CLEAR_TAG_ID_BUFFER, &[]),
            found(1),
            ok(opcode::GET_TAG_ID_BUFFER, &payload),
        ]);
        reader
            .param_set(
                "/reader/antenna/txRxMap",
                ParamValue::AntennaMap(vec![AntennaMapping::new(1, 1, 1), AntennaMapping::new(5, 1, 2)]),
            )
            .unwrap();
        reader.param_set("/reader/read/plan", plan(vec![5])).unwrap();

        let tags = reader.read(50).unwrap();
        assert_eq!(tags.len(), 1);
        let tag = &tags[0];
        assert_eq!(tag.tag.protocol, TagProtocol::Gen2);
        assert_eq!(tag.tag.epc, EPC);
        assert_eq!(tag.tag.pc, vec![0x30, 0x00]);
        assert_eq!(tag.tag.crc, vec![0xAB, 0xCD]);
        assert_eq!(tag.metadata, MetadataFlags::READ_COUNT | MetadataFlags::ANTENNA_ID);
        assert_eq!(tag.read_count, 4);
        assert_eq!(tag.antenna, 5);
        assert_eq!(tag.rssi, 0);
        assert_eq!(tag.frequency, 0);
        assert_eq!(tag.timestamp, 0);
        assert_eq!(tag.phase, 0);
        assert_eq!(tag.read_protocol, None);
        assert!(tag.data.is_empty());
        assert!(tag.gpio.is_empty());
        assert!(tag.base_time_ms > 0);
    }

    #[test]
    fn no_tags_found_is_an_empty_read() {
        let (reader, _) = reader(vec![]);
        reader.param_set("/reader/read/plan", plan(vec![1])).unwrap();
        assert!(reader.read(30).unwrap().is_empty());
    }

    #[test]
    fn composite_plan_splits_time_by_weight() {
        let (reader, sent) = reader(vec![]);
        let mut first = SimpleReadPlan::new(TagProtocol::Gen2, vec![1]);
        first.weight = 1;
        let mut second = SimpleReadPlan::new(TagProtocol::Gen2, vec![2]);
        second.weight = 3;
        let multi = ReadPlan::Multi(crate::plan::MultiReadPlan::new(vec![
            ReadPlan::Simple(first),
            ReadPlan::Simple(second),
        ]));
        reader.param_set("/reader/read/plan", multi).unwrap();

        reader.read(400).unwrap();

        let sent = sent.lock();
        let timeouts = read_timeouts(&sent);
        let (_, first_timeout) = timeouts[0];
        assert!((80..=100).contains(&first_timeout), "{}", first_timeout);

        let switch = sent
            .iter()
            .position(|f| f[2] == opcode::SET_ANTENNA_PORT && f[3..6] == [0x02, 0x02, 0x02])
            .unwrap();
        let (_, second_timeout) = timeouts.iter().find(|(i, _)| *i > switch).copied().unwrap();
        assert!((250..=300).contains(&second_timeout), "{}", second_timeout);
        assert!(timeouts.iter().all(|&(_, t)| t <= 300));
    }

    fn two_antenna_sighting(unique_by_antenna: bool) -> Vec<TagReadRecord> {
        let mut extra = Vec::new();
        if unique_by_antenna {
            extra.push(ok(opcode::GET_READER_OPTIONAL_PARAMS, &[0x01, 0x00, 0x01]));
            extra.push(ok(opcode::SET_READER_OPTIONAL_PARAMS, &[]));
        }
        extra.extend([
            ok(opcode::SET_ANTENNA_PORT, &[]),
            ok(opcode::CLEAR_TAG_ID_BUFFER, &[]),
            found(2),
            tag_buffer(&[tag_record(2, -50, 0x11), tag_record(4, -40, 0x22)]),
        ]);
        let (reader, _) = reader(extra);
        if unique_by_antenna {
            reader
                .param_set("/reader/tagReadData/uniqueByAntenna", true)
                .unwrap();
        }
        reader.param_set("/reader/read/plan", plan(vec![1, 2])).unwrap();
        reader.read(40).unwrap()
    }

    #[test]
    fn sightings_merge_across_antennas_by_default() {
        let tags = two_antenna_sighting(false);
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0].read_count, 6);
        assert_eq!(tags[0].antenna, 1);
    }

    #[test]
    fn unique_by_antenna_keeps_each_port() {
        let tags = two_antenna_sighting(true);
        assert_eq!(tags.len(), 2);
        assert_eq!(tags[0].antenna, 1);
        assert_eq!(tags[1].antenna, 2);
    }

    #[test]
    fn streamed_reads_are_collected() {
        let mut frame = vec![0x10, 0x00, 0x1B, 0x00, 0x07, 0x01];
        frame.extend(tag_record(1, -45, 0x22));
        let mut reply = ok(opcode::READ_TAG_ID_MULTIPLE, &frame);
        reply.extend(ok(opcode::READ_TAG_ID_MULTIPLE, &[0x10, 0x00, 0x1B, 0x00, 0x07, 0x00]));

        let config = ReaderConfig {
            streaming: true,
            ..config()
        };
        let (reader, sent) = reader_with(
            config,
            vec![
                ok(opcode::SET_ANTENNA_PORT, &[]),
                ok(opcode::CLEAR_TAG_ID_BUFFER, &[]),
                reply,
            ],
        );
        reader.param_set("/reader/read/plan", plan(vec![2])).unwrap();

        let tags = reader.read(50).unwrap();
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0].antenna, 2);
        assert_eq!(tags[0].rssi, -45);

        let sent = sent.lock();
        let request = sent
            .iter()
            .find(|f| f[2] == opcode::READ_TAG_ID_MULTIPLE)
            .unwrap();
        assert_eq!(request[3], 0x10);
        assert_eq!(&request[4..6], &[0x00, 0x1B]);
    }

    #[test]
    fn embedded_op_counts_accumulate() {
        let (reader, _) = reader(vec![
            ok(opcode::SET_ANTENNA_PORT, &[]),
            ok(opcode::CLEAR_TAG_ID_BUFFER, &[]),
            ok(
                opcode::READ_TAG_ID_MULTIPLE,
                &[0x00, 0x00, 0x07, 0x01, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00],
            ),
            tag_buffer(&[tag_record(1, -50, 0x11)]),
        ]);
        let mut simple = SimpleReadPlan::new(TagProtocol::Gen2, vec![1]);
        simple.op = Some(TagOp::ReadData {
            bank: Bank::Tid,
            word_address: 0,
            word_count: 2,
        });
        reader
            .param_set("/reader/read/plan", ReadPlan::Simple(simple))
            .unwrap();

        let (tags, counts) = reader.read_with_op_counts(40).unwrap();
        assert_eq!(tags.len(), 1);
        assert_eq!(
            counts,
            EmbeddedCounts {
                found: 1,
                succeeded: 1,
                failed: 0
            }
        );
    }

    // ===================
    // Parameters
    // ===================

    #[test]
    fn unsupported_parameter_probed_once() {
        let (reader, sent) = reader(vec![fault(opcode::GET_TEMPERATURE, 0x0102)]);
        for _ in 0..2 {
            assert!(matches!(
                reader.param_get("/reader/radio/temperature"),
                Err(ReaderError::NotFound(_))
            ));
        }
        assert_eq!(sent.lock().len(), 1);
    }

    #[test]
    fn rejected_antenna_map_leaves_old_map() {
        let (reader, _) = reader(vec![]);
        let err = reader
            .param_set(
                "/reader/antenna/txRxMap",
                ParamValue::AntennaMap(vec![AntennaMapping::new(1, 1, 1), AntennaMapping::new(2, 2, 9)]),
            )
            .unwrap_err();
        assert!(matches!(err, ReaderError::InvalidArgument(_)));
        assert_eq!(
            reader.param_get("/reader/antenna/txRxMap").unwrap(),
            ParamValue::AntennaMap(vec![AntennaMapping::new(1, 1, 1), AntennaMapping::new(2, 2, 2)])
        );
    }

    #[test]
    fn version_parameters_need_no_io() {
        let (reader, sent) = reader(vec![]);
        assert_eq!(
            reader.param_get("/reader/version/model").unwrap(),
            ParamValue::Text("M6e".into())
        );
        assert_eq!(
            reader.param_get("/READER/VERSION/SUPPORTEDPROTOCOLS").unwrap(),
            ParamValue::Protocols(vec![TagProtocol::Gen2])
        );
        assert!(sent.lock().is_empty());
    }

    #[test]
    fn read_only_parameter_rejected() {
        let (reader, _) = reader(vec![]);
        assert!(matches!(
            reader.param_set("/reader/antenna/portList", ParamValue::Ports(vec![1])),
            Err(ReaderError::ReadOnly(_))
        ));
    }

    // ===================
    // Tag memory and GPIO
    // ===================

    #[test]
    fn unaligned_byte_read_trims_words() {
        let (reader, sent) = reader(vec![
            ok(opcode::SET_ANTENNA_PORT, &[]),
            ok(opcode::READ_TAG_DATA, &[0x00, 0xAA, 0xBB, 0xCC, 0xDD]),
        ]);
        reader.param_set("/reader/tagop/antenna", 1).unwrap();
        let bytes = reader.read_tag_mem_bytes(None, Bank::User, 3, 2).unwrap();
        assert_eq!(bytes, vec![0xBB, 0xCC]);

        let sent = sent.lock();
        let read = &sent[1];
        assert_eq!(read[2], opcode::READ_TAG_DATA);
        // word address 1, two words
        assert_eq!(&read[7..12], &[0x00, 0x00, 0x00, 0x01, 0x02]);
    }

    #[test]
    fn odd_byte_write_rejected() {
        let (reader, sent) = reader(vec![]);
        reader.param_set("/reader/tagop/antenna", 1).unwrap();
        assert!(reader
            .write_tag_mem_bytes(None, Bank::User, 1, &[0x01, 0x02])
            .is_err());
        assert!(sent.lock().is_empty());
    }

    #[test]
    fn gpio_inputs_numbered_from_one() {
        let (reader, _) = reader(vec![ok(opcode::GET_USER_GPIO_INPUTS, &[0x01, 0x00])]);
        assert_eq!(
            reader.gpi_get().unwrap(),
            vec![GpioPin { id: 1, high: true }, GpioPin { id: 2, high: false }]
        );
    }

    // ===================
    // Background reading
    // ===================

    #[test]
    fn background_reads_reach_listeners_until_stopped() {
        let mut extra = vec![ok(opcode::SET_ANTENNA_PORT, &[])];
        for _ in 0..200 {
            extra.push(ok(opcode::CLEAR_TAG_ID_BUFFER, &[]));
            extra.push(found(1));
            extra.push(tag_buffer(&[tag_record(1, -50, 0x11)]));
        }
        let (mut reader, _) = reader(extra);
        reader.param_set("/reader/read/plan", plan(vec![1])).unwrap();
        reader.param_set("/reader/read/asyncOnTime", 20).unwrap();

        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        reader.add_read_listener(move |tag| {
            assert_eq!(tag.antenna, 1);
            counter.fetch_add(1, Ordering::SeqCst);
        });

        reader.start_reading().unwrap();
        std::thread::sleep(Duration::from_millis(150));
        reader.stop_reading().unwrap();

        let after_stop = seen.load(Ordering::SeqCst);
        assert!(after_stop > 0);
        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(seen.load(Ordering::SeqCst), after_stop);
        reader.destroy();
    }

    #[test]
    fn background_fault_goes_to_exception_listener() {
        let (mut reader, _) = reader(vec![
            ok(opcode::SET_ANTENNA_PORT, &[]),
            ok(opcode::CLEAR_TAG_ID_BUFFER, &[]),
            fault(opcode::READ_TAG_ID_MULTIPLE, 0x0105),
        ]);
        reader.param_set("/reader/read/plan", plan(vec![1])).unwrap();

        let faults = Arc::new(Mutex::new(Vec::new()));
        let sink = faults.clone();
        reader.add_exception_listener(move |e| sink.lock().push(e.kind()));

        reader.start_reading().unwrap();
        let deadline = Instant::now() + Duration::from_secs(2);
        while faults.lock().is_empty() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        reader.stop_reading().unwrap();
        assert_eq!(faults.lock().as_slice(), &[Some(FaultKind::InvalidParameterValue)]);
    }
}
