//! Tag record decoding: metadata fields, tag payloads and the buffer/stream shapes

use crate::error::{ReaderError, Result};
use crate::message::Cursor;
use crate::types::{GpioPin, MetadataFlags, TagData, TagProtocol, TagReadRecord};

/// Stride of a legacy tag-buffer record: u16 length, PC, 96-bit EPC, CRC
pub const RECORD_LEN: usize = 18;
/// Stride when the module is configured for 496-bit EPCs
pub const RECORD_LEN_EPC496: usize = 68;

/// Read options bit meaning a metadata-flags word follows
pub const OPTION_METADATA: u8 = 0x10;

/// Optional per-read fields, present only when flagged
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Metadata {
    pub flags: MetadataFlags,
    pub read_count: u32,
    pub rssi: i32,
    pub antenna: u8,
    pub frequency: u32,
    pub timestamp: u32,
    pub phase: u16,
    pub protocol: Option<TagProtocol>,
    pub data: Vec<u8>,
    pub gpio: Vec<GpioPin>,
}

/// Parse metadata in the module's fixed field order. `gpio_count` is the number of user pins.
pub fn parse_metadata(cursor: &mut Cursor, flags: MetadataFlags, gpio_count: u8) -> Result<Metadata> {
    let mut meta = Metadata {
        flags,
        read_count: 1,
        ..Metadata::default()
    };

    if flags.contains(MetadataFlags::READ_COUNT) {
        meta.read_count = u32::from(cursor.u8()?);
    }
    if flags.contains(MetadataFlags::RSSI) {
        meta.rssi = i32::from(cursor.i8()?);
    }
    if flags.contains(MetadataFlags::ANTENNA_ID) {
        meta.antenna = cursor.u8()?;
    }
    if flags.contains(MetadataFlags::FREQUENCY) {
        meta.frequency = cursor.u24()?;
    }
    if flags.contains(MetadataFlags::TIMESTAMP) {
        meta.timestamp = cursor.u32()?;
    }
    if flags.contains(MetadataFlags::PHASE) {
        meta.phase = cursor.u16()?;
    }
    if flags.contains(MetadataFlags::PROTOCOL) {
        meta.protocol = TagProtocol::from_code(cursor.u8()?);
    }
    if flags.contains(MetadataFlags::DATA) {
        let bits = cursor.u16()? as usize;
        meta.data = cursor.take(bits.div_ceil(8))?.to_vec();
    }
    if flags.contains(MetadataFlags::GPIO) {
        let state = cursor.u8()?;
        meta.gpio = (0..gpio_count)
            .map(|i| GpioPin {
                id: i + 1,
                high: state & (1 << i) != 0,
            })
            .collect();
    }

    Ok(meta)
}

/// Parse a tag of `len` bytes (PC and CRC included).
pub fn parse_tag(cursor: &mut Cursor, len: usize, protocol: TagProtocol) -> Result<TagData> {
    let pc_len = if protocol == TagProtocol::Gen2 { 2 } else { 0 };
    let overhead = pc_len + 2;
    if len < overhead {
        return Err(ReaderError::InvalidResponse(format!(
            "{:?} tag of {} bytes is shorter than its {} bytes of PC/CRC",
            protocol, len, overhead
        )));
    }

    let pc = cursor.take(pc_len)?.to_vec();
    let epc = cursor.take(len - overhead)?.to_vec();
    let crc = cursor.take(2)?.to_vec();
    Ok(TagData {
        protocol,
        epc,
        pc,
        crc,
    })
}

/// Metadata, a u16 bit length, then the tag itself.
///
/// The protocol comes from `hint`, or from the metadata when the read plan did not pin one.
pub fn parse_tag_record(
    cursor: &mut Cursor,
    flags: MetadataFlags,
    hint: Option<TagProtocol>,
    gpio_count: u8,
) -> Result<TagReadRecord> {
    let meta = parse_metadata(cursor, flags, gpio_count)?;
    let bits = cursor.u16()? as usize;
    let protocol = hint.or(meta.protocol).ok_or_else(|| {
        ReaderError::InvalidResponse("tag record without a protocol".into())
    })?;
    let tag = parse_tag(cursor, bits / 8, protocol)?;
    Ok(record_from(tag, meta))
}

fn record_from(tag: TagData, meta: Metadata) -> TagReadRecord {
    TagReadRecord {
        tag,
        metadata: meta.flags,
        read_count: meta.read_count,
        rssi: meta.rssi,
        antenna: meta.antenna,
        frequency: meta.frequency,
        timestamp: meta.timestamp,
        phase: meta.phase,
        read_protocol: meta.protocol,
        data: meta.data,
        gpio: meta.gpio,
        base_time_ms: 0,
    }
}

/// READ_TAG_ID_SINGLE reply: metadata, then a tag filling the rest of the payload.
pub fn parse_single_read(
    payload: &[u8],
    flags: MetadataFlags,
    protocol: TagProtocol,
    gpio_count: u8,
) -> Result<TagReadRecord> {
    let mut cursor = Cursor::new(payload);
    let meta = parse_metadata(&mut cursor, flags, gpio_count)?;
    let len = cursor.remaining();
    let tag = parse_tag(&mut cursor, len, protocol)?;
    Ok(record_from(tag, meta))
}

/// Legacy buffer dump: fixed-size records, each starting with a u16 byte length.
pub fn parse_fixed_records(payload: &[u8], protocol: TagProtocol, epc496: bool) -> Result<Vec<TagData>> {
    let stride = if epc496 { RECORD_LEN_EPC496 } else { RECORD_LEN };
    payload
        .chunks_exact(stride)
        .map(|record| {
            let mut cursor = Cursor::new(record);
            let len = cursor.u16()? as usize;
            parse_tag(&mut cursor, len, protocol)
        })
        .collect()
}

/// GET_TAG_ID_BUFFER reply with metadata: the flags the module actually honoured, then records.
pub fn parse_tag_buffer(payload: &[u8], hint: Option<TagProtocol>, gpio_count: u8) -> Result<Vec<TagReadRecord>> {
    let mut cursor = Cursor::new(payload);
    let flags = MetadataFlags(cursor.u16()?);
    cursor.skip(1)?;
    let count = cursor.u8()?;
    (0..count)
        .map(|_| parse_tag_record(&mut cursor, flags, hint, gpio_count))
        .collect()
}

/// One streamed read-multiple frame. `None` marks the end-of-round frame.
pub fn parse_stream_frame(payload: &[u8], hint: Option<TagProtocol>, gpio_count: u8) -> Result<Option<TagReadRecord>> {
    let mut cursor = Cursor::new(payload);
    let options = cursor.u8()?;
    let _search_flags = cursor.u16()?;
    let flags = if options & OPTION_METADATA != 0 {
        MetadataFlags(cursor.u16()?)
    } else {
        MetadataFlags::NONE
    };
    if cursor.u8()? == 0 {
        return Ok(None);
    }
    parse_tag_record(&mut cursor, flags, hint, gpio_count).map(Some)
}

/// Number of tags a non-streaming read-multiple left in the buffer.
///
/// Firmware with large-tag-population support widens the count to u32, and newer
/// firmware inserts a select-option byte before it. The reply length tells which.
pub fn read_multiple_count(payload: &[u8]) -> Result<u32> {
    let mut cursor = Cursor::new(payload);
    match payload.len() {
        4 => cursor.skip(3).and_then(|_| cursor.u8()).map(u32::from),
        5 => cursor.skip(4).and_then(|_| cursor.u8()).map(u32::from),
        7 => cursor.skip(3).and_then(|_| cursor.u32()),
        8 => cursor.skip(4).and_then(|_| cursor.u32()),
        n => Err(ReaderError::InvalidResponse(format!(
            "read-multiple reply of {} bytes has no tag count",
            n
        ))),
    }
}

/// Totals reported for an embedded tag operation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EmbeddedCounts {
    pub found: u32,
    pub succeeded: u32,
    pub failed: u32,
}

impl std::ops::AddAssign for EmbeddedCounts {
    fn add_assign(&mut self, rhs: Self) {
        self.found += rhs.found;
        self.succeeded += rhs.succeeded;
        self.failed += rhs.failed;
    }
}

pub fn parse_embedded_counts(payload: &[u8]) -> Result<EmbeddedCounts> {
    let mut cursor = Cursor::new(payload);
    cursor.skip(3)?;
    let found = u32::from(cursor.u8()?);
    cursor.skip(2)?;
    let succeeded = u32::from(cursor.u16()?);
    let failed = u32::from(cursor.u16()?);
    Ok(EmbeddedCounts {
        found,
        succeeded,
        failed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPC: [u8; 12] = [
        0xE2, 0x00, 0x34, 0x12, 0x01, 0x23, 0x45, 0x67, 0x89, 0xAB, 0xCD, 0xEF,
    ];

    fn gen2_tag_bytes() -> Vec<u8> {
        let mut bytes = vec![0x30, 0x00];
        bytes.extend_from_slice(&EPC);
        bytes.extend_from_slice(&[0xAB, 0xCD]);
        bytes
    }

    #[test]
    fn gen2_record_with_count_and_antenna() {
        let mut payload = vec![0x07, 0x11];
        payload.extend_from_slice(&(16u16 * 8).to_be_bytes());
        payload.extend(gen2_tag_bytes());

        let flags = MetadataFlags::READ_COUNT | MetadataFlags::ANTENNA_ID;
        let mut cursor = Cursor::new(&payload);
        let record = parse_tag_record(&mut cursor, flags, Some(TagProtocol::Gen2), 4).unwrap();

        assert_eq!(record.read_count, 7);
        assert_eq!(record.antenna, 0x11);
        assert_eq!(record.tag.epc, EPC);
        assert_eq!(record.tag.pc, [0x30, 0x00]);
        assert_eq!(record.tag.crc, [0xAB, 0xCD]);
        assert!(record.data.is_empty());
        assert!(cursor.is_empty());
    }

    #[test]
    fn full_metadata_in_canonical_order() {
        let payload = [
            0x02, // read count
            0xC4, // rssi -60
            0x21, // antenna
            0x0D, 0xBB, 0xA0, // 900000 kHz
            0x00, 0x00, 0x01, 0xF4, // timestamp 500
            0x00, 0x5A, // phase
            0x05, // gen2
            0x00, 0x0C, 0xAA, 0xB0, // 12 data bits
            0x05, // gpio 1 and 3 high
        ];
        let mut cursor = Cursor::new(&payload);
        let meta = parse_metadata(&mut cursor, MetadataFlags::ALL, 4).unwrap();

        assert_eq!(meta.read_count, 2);
        assert_eq!(meta.rssi, -60);
        assert_eq!(meta.antenna, 0x21);
        assert_eq!(meta.frequency, 900_000);
        assert_eq!(meta.timestamp, 500);
        assert_eq!(meta.phase, 90);
        assert_eq!(meta.protocol, Some(TagProtocol::Gen2));
        assert_eq!(meta.data, [0xAA, 0xB0]);
        let high: Vec<u8> = meta.gpio.iter().filter(|p| p.high).map(|p| p.id).collect();
        assert_eq!(high, [1, 3]);
        assert!(cursor.is_empty());
    }

    #[test]
    fn non_gen2_tag_has_no_pc() {
        let bytes = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x12, 0x34];
        let tag = parse_tag(&mut Cursor::new(&bytes), 10, TagProtocol::Iso180006b).unwrap();
        assert!(tag.pc.is_empty());
        assert_eq!(tag.epc.len(), 8);
        assert_eq!(tag.crc, [0x12, 0x34]);
    }

    #[test]
    fn fixed_records_advance_by_stride() {
        let mut payload = Vec::new();
        for last in [0x01u8, 0x02] {
            payload.extend_from_slice(&16u16.to_be_bytes());
            let mut tag = gen2_tag_bytes();
            tag[13] = last;
            payload.extend(tag);
        }
        // shorter EPC padded out to the record stride
        payload.extend_from_slice(&8u16.to_be_bytes());
        payload.extend_from_slice(&[0x30, 0x00, 0xDE, 0xAD, 0xBE, 0xEF, 0x11, 0x22]);
        payload.extend_from_slice(&[0u8; 8]);

        let tags = parse_fixed_records(&payload, TagProtocol::Gen2, false).unwrap();
        assert_eq!(tags.len(), 3);
        assert_eq!(tags[0].epc[11], 0x01);
        assert_eq!(tags[1].epc[11], 0x02);
        assert_eq!(tags[2].epc, [0xDE, 0xAD, 0xBE, 0xEF]);
    }

    #[test]
    fn stream_end_frame_is_none() {
        let payload = [0x10, 0x00, 0x0B, 0x00, 0x05, 0x00];
        assert_eq!(parse_stream_frame(&payload, Some(TagProtocol::Gen2), 4).unwrap(), None);
    }

    #[test]
    fn truncated_tag_is_rejected() {
        let bytes = [0x30, 0x00, 0xE2];
        assert!(parse_tag(&mut Cursor::new(&bytes), 3, TagProtocol::Gen2).is_err());
    }

    #[test]
    fn single_read_keeps_data_and_gpio() {
        let mut payload = vec![0x01, 0x00, 0x10, 0xCA, 0xFE, 0x02];
        payload.extend(gen2_tag_bytes());
        let flags = MetadataFlags::READ_COUNT | MetadataFlags::DATA | MetadataFlags::GPIO;
        let record = parse_single_read(&payload, flags, TagProtocol::Gen2, 2).unwrap();
        assert_eq!(record.read_count, 1);
        assert_eq!(record.data, vec![0xCA, 0xFE]);
        assert_eq!(
            record.gpio,
            vec![GpioPin { id: 1, high: false }, GpioPin { id: 2, high: true }]
        );
        assert_eq!(record.tag.epc, EPC);
        assert_eq!(record.metadata, flags);
    }

    #[test]
    fn tag_count_follows_reply_length() {
        assert_eq!(read_multiple_count(&[0x00, 0x00, 0x03, 0x02]).unwrap(), 2);
        assert_eq!(read_multiple_count(&[0x00, 0x00, 0x03, 0x00, 0x03]).unwrap(), 3);
        assert_eq!(
            read_multiple_count(&[0x00, 0x00, 0x03, 0x00, 0x00, 0x00, 0x02]).unwrap(),
            2
        );
        assert_eq!(
            read_multiple_count(&[0x00, 0x00, 0x03, 0x00, 0x00, 0x01, 0x00, 0x04]).unwrap(),
            0x0104
        );
    }

    #[test]
    fn tag_count_rejects_odd_reply() {
        assert!(matches!(
            read_multiple_count(&[0x00, 0x00, 0x03, 0x00, 0x00, 0x01]),
            Err(ReaderError::InvalidResponse(_))
        ));
    }

    #[test]
    fn embedded_counts() {
        let payload = [0x00, 0x00, 0x07, 0x05, 0x01, 0x28, 0x00, 0x04, 0x00, 0x01];
        let counts = parse_embedded_counts(&payload).unwrap();
        assert_eq!(counts, EmbeddedCounts { found: 5, succeeded: 4, failed: 1 });
    }
}
