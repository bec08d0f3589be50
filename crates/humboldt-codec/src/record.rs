//! Record framing and the wire record catalog.

use byteorder::{ByteOrder, LittleEndian};
use bytes::Bytes;
use serde::Serialize;
use thiserror::Error;

/// Size in bytes of the fixed record header.
pub const RECORD_HEADER_SIZE: usize = 16;

/// The unit of the header's length field: record sizes are multiples
/// of four bytes.
pub const LENGTH_UNIT: usize = 4;

/// Sentinel for an undefined timestamp.
pub const UNDEF_TIMESTAMP: u64 = u64::MAX;

/// Symbol field width of the canonical wire version.
pub const SYMBOL_CSTR_LEN: usize = 71;

/// Symbol field width of wire version 1.
pub const SYMBOL_CSTR_LEN_V1: usize = 22;

/// Fixed-point scale of price fields (1 unit = 1e-9).
const PRICE_SCALE: f64 = 1_000_000_000.0;

/// Errors that can occur while decoding the wire format.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The metadata frame did not begin with the expected magic bytes.
    #[error("invalid metadata magic: {0:02x?}")]
    BadMagic([u8; 3]),

    /// The stream declared a wire version this codec does not speak.
    #[error("unsupported wire version: {0}")]
    UnsupportedVersion(u8),

    /// The metadata frame length was implausible.
    #[error("invalid metadata frame length: {0} bytes")]
    BadMetadataLength(u32),

    /// The metadata schema code was not recognized.
    #[error("unknown schema code: {0:#06x}")]
    UnknownSchema(u16),

    /// A record header carried an rtype this codec does not know.
    #[error("unknown record type: {0:#04x}")]
    UnknownRType(u8),

    /// A record header declared a length of zero units.
    #[error("record header declared zero length")]
    ZeroLength,

    /// A record's declared length did not match its type's wire size.
    #[error("record type {rtype:#04x} declared {declared} bytes, expected {expected}")]
    LengthMismatch {
        /// The record type byte.
        rtype: u8,
        /// The size declared by the header.
        declared: usize,
        /// The wire size expected for the type.
        expected: usize,
    },

    /// A buffer was too short to hold what its framing declared.
    #[error("truncated record: have {actual} of {expected} bytes")]
    Truncated {
        /// The size the framing declared.
        expected: usize,
        /// The bytes actually present.
        actual: usize,
    },
}

impl From<DecodeError> for humboldt_types::HumboldtError {
    fn from(err: DecodeError) -> Self {
        Self::Protocol(err.to_string())
    }
}

/// Record type discriminants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum RType {
    /// An individual trade.
    Trade = 0x00,
    /// A trading status change.
    Status = 0x12,
    /// An error reported by the gateway.
    Error = 0x15,
    /// An instrument-id to symbol mapping.
    SymbolMapping = 0x16,
    /// A gateway system message (heartbeats among them).
    System = 0x17,
    /// An OHLCV bar.
    Ohlcv = 0x20,
}

impl RType {
    /// Decodes an rtype byte.
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(Self::Trade),
            0x12 => Some(Self::Status),
            0x15 => Some(Self::Error),
            0x16 => Some(Self::SymbolMapping),
            0x17 => Some(Self::System),
            0x20 => Some(Self::Ohlcv),
            _ => None,
        }
    }

    /// Returns the canonical wire size of this record type in bytes.
    #[must_use]
    pub const fn record_size(&self) -> usize {
        match self {
            Self::Trade => 48,
            Self::Status => 40,
            Self::Error => 320,
            Self::SymbolMapping => 176,
            Self::System => 320,
            Self::Ohlcv => 56,
        }
    }

    /// Returns the wire size of this record type under the given wire
    /// version. Only symbol mappings differ between versions.
    #[must_use]
    pub const fn record_size_v(&self, version: u8) -> usize {
        match (self, version) {
            (Self::SymbolMapping, 1) => 76,
            _ => self.record_size(),
        }
    }
}

/// The fixed header shared by every record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RecordHeader {
    /// The record type.
    pub rtype: RType,
    /// Identifier of the publisher that produced the event.
    pub publisher_id: u16,
    /// Numeric instrument identifier.
    pub instrument_id: u32,
    /// Matching-engine event timestamp, UNIX nanoseconds.
    pub ts_event: u64,
}

impl RecordHeader {
    /// Creates a header for the given record type.
    #[must_use]
    pub const fn new(rtype: RType, publisher_id: u16, instrument_id: u32, ts_event: u64) -> Self {
        Self {
            rtype,
            publisher_id,
            instrument_id,
            ts_event,
        }
    }

    fn parse(data: &[u8]) -> Result<Self, DecodeError> {
        debug_assert!(data.len() >= RECORD_HEADER_SIZE);
        let rtype = RType::from_u8(data[1]).ok_or(DecodeError::UnknownRType(data[1]))?;
        Ok(Self {
            rtype,
            publisher_id: LittleEndian::read_u16(&data[2..4]),
            instrument_id: LittleEndian::read_u32(&data[4..8]),
            ts_event: LittleEndian::read_u64(&data[8..16]),
        })
    }

    fn write(&self, dst: &mut [u8], total_size: usize) {
        dst[0] = (total_size / LENGTH_UNIT) as u8;
        dst[1] = self.rtype as u8;
        LittleEndian::write_u16(&mut dst[2..4], self.publisher_id);
        LittleEndian::write_u32(&mut dst[4..8], self.instrument_id);
        LittleEndian::write_u64(&mut dst[8..16], self.ts_event);
    }
}

/// A single decoded record in canonical wire form.
///
/// The backing buffer is shared; cloning a record is cheap. Records
/// constructed through the decoders are always canonical: version
/// upgrades happen at decode time and the header has been validated
/// against the type's wire size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    bytes: Bytes,
}

impl Record {
    /// Wraps validated canonical record bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the buffer is shorter than a header, the
    /// rtype is unknown, or the declared length does not match both the
    /// buffer and the type's canonical wire size.
    pub fn from_bytes(bytes: Bytes) -> Result<Self, DecodeError> {
        if bytes.len() < RECORD_HEADER_SIZE {
            return Err(DecodeError::Truncated {
                expected: RECORD_HEADER_SIZE,
                actual: bytes.len(),
            });
        }
        let declared = bytes[0] as usize * LENGTH_UNIT;
        if declared == 0 {
            return Err(DecodeError::ZeroLength);
        }
        let rtype = RType::from_u8(bytes[1]).ok_or(DecodeError::UnknownRType(bytes[1]))?;
        if declared != bytes.len() {
            return Err(DecodeError::Truncated {
                expected: declared,
                actual: bytes.len(),
            });
        }
        if declared != rtype.record_size() {
            return Err(DecodeError::LengthMismatch {
                rtype: rtype as u8,
                declared,
                expected: rtype.record_size(),
            });
        }
        Ok(Self { bytes })
    }

    /// Returns the parsed record header.
    #[must_use]
    pub fn header(&self) -> RecordHeader {
        // Validated in from_bytes; reparsing cannot fail.
        RecordHeader {
            rtype: self.rtype(),
            publisher_id: LittleEndian::read_u16(&self.bytes[2..4]),
            instrument_id: LittleEndian::read_u32(&self.bytes[4..8]),
            ts_event: LittleEndian::read_u64(&self.bytes[8..16]),
        }
    }

    /// Returns the record type.
    #[must_use]
    pub fn rtype(&self) -> RType {
        RType::from_u8(self.bytes[1]).unwrap_or(RType::System)
    }

    /// Returns the numeric instrument identifier.
    #[must_use]
    pub fn instrument_id(&self) -> u32 {
        LittleEndian::read_u32(&self.bytes[4..8])
    }

    /// Returns the event timestamp in UNIX nanoseconds, or `None` when
    /// the record carries the undefined sentinel.
    #[must_use]
    pub fn ts_event(&self) -> Option<u64> {
        let ts = LittleEndian::read_u64(&self.bytes[8..16]);
        (ts != UNDEF_TIMESTAMP).then_some(ts)
    }

    /// Returns the canonical wire bytes of this record.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Returns the record size in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    /// Returns the trade view of this record, if it is one.
    #[must_use]
    pub fn as_trade(&self) -> Option<TradeMsg> {
        (self.rtype() == RType::Trade).then(|| TradeMsg::parse_body(self.header(), &self.bytes))
    }

    /// Returns the OHLCV view of this record, if it is one.
    #[must_use]
    pub fn as_ohlcv(&self) -> Option<OhlcvMsg> {
        (self.rtype() == RType::Ohlcv).then(|| OhlcvMsg::parse_body(self.header(), &self.bytes))
    }

    /// Returns the status view of this record, if it is one.
    #[must_use]
    pub fn as_status(&self) -> Option<StatusMsg> {
        (self.rtype() == RType::Status).then(|| StatusMsg::parse_body(self.header(), &self.bytes))
    }

    /// Returns the gateway error view of this record, if it is one.
    #[must_use]
    pub fn as_error(&self) -> Option<ErrorMsg> {
        (self.rtype() == RType::Error).then(|| ErrorMsg::parse_body(self.header(), &self.bytes))
    }

    /// Returns the system-message view of this record, if it is one.
    #[must_use]
    pub fn as_system(&self) -> Option<SystemMsg> {
        (self.rtype() == RType::System).then(|| SystemMsg::parse_body(self.header(), &self.bytes))
    }

    /// Returns the symbol-mapping view of this record, if it is one.
    #[must_use]
    pub fn as_symbol_mapping(&self) -> Option<SymbolMappingMsg> {
        (self.rtype() == RType::SymbolMapping)
            .then(|| SymbolMappingMsg::parse_body(self.header(), &self.bytes))
    }
}

/// An individual trade.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TradeMsg {
    /// The shared record header.
    pub header: RecordHeader,
    /// Trade price, fixed-point with nine decimal places.
    pub price: i64,
    /// Trade quantity.
    pub size: u32,
    /// Event action, e.g. `b'T'` for trade.
    pub action: u8,
    /// Aggressing side: `b'A'`, `b'B'`, or `b'N'`.
    pub side: u8,
    /// Bit flags.
    pub flags: u8,
    /// Book depth at which the trade occurred.
    pub depth: u8,
    /// Capture-server receive timestamp, UNIX nanoseconds.
    pub ts_recv: u64,
    /// Matching-engine sending delta, nanoseconds.
    pub ts_in_delta: i32,
    /// Message sequence number.
    pub sequence: u32,
}

impl TradeMsg {
    fn parse_body(header: RecordHeader, data: &[u8]) -> Self {
        Self {
            header,
            price: LittleEndian::read_i64(&data[16..24]),
            size: LittleEndian::read_u32(&data[24..28]),
            action: data[28],
            side: data[29],
            flags: data[30],
            depth: data[31],
            ts_recv: LittleEndian::read_u64(&data[32..40]),
            ts_in_delta: LittleEndian::read_i32(&data[40..44]),
            sequence: LittleEndian::read_u32(&data[44..48]),
        }
    }

    /// Returns the price as a float.
    #[must_use]
    pub fn price_f64(&self) -> f64 {
        self.price as f64 / PRICE_SCALE
    }

    /// Encodes this trade as a canonical record.
    #[must_use]
    pub fn to_record(&self) -> Record {
        let size = RType::Trade.record_size();
        let mut buf = vec![0u8; size];
        self.header.write(&mut buf, size);
        buf[1] = RType::Trade as u8;
        LittleEndian::write_i64(&mut buf[16..24], self.price);
        LittleEndian::write_u32(&mut buf[24..28], self.size);
        buf[28] = self.action;
        buf[29] = self.side;
        buf[30] = self.flags;
        buf[31] = self.depth;
        LittleEndian::write_u64(&mut buf[32..40], self.ts_recv);
        LittleEndian::write_i32(&mut buf[40..44], self.ts_in_delta);
        LittleEndian::write_u32(&mut buf[44..48], self.sequence);
        Record { bytes: buf.into() }
    }
}

/// An OHLCV bar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OhlcvMsg {
    /// The shared record header.
    pub header: RecordHeader,
    /// Open price, fixed-point with nine decimal places.
    pub open: i64,
    /// High price.
    pub high: i64,
    /// Low price.
    pub low: i64,
    /// Close price.
    pub close: i64,
    /// Total traded volume.
    pub volume: u64,
}

impl OhlcvMsg {
    fn parse_body(header: RecordHeader, data: &[u8]) -> Self {
        Self {
            header,
            open: LittleEndian::read_i64(&data[16..24]),
            high: LittleEndian::read_i64(&data[24..32]),
            low: LittleEndian::read_i64(&data[32..40]),
            close: LittleEndian::read_i64(&data[40..48]),
            volume: LittleEndian::read_u64(&data[48..56]),
        }
    }

    /// Encodes this bar as a canonical record.
    #[must_use]
    pub fn to_record(&self) -> Record {
        let size = RType::Ohlcv.record_size();
        let mut buf = vec![0u8; size];
        self.header.write(&mut buf, size);
        buf[1] = RType::Ohlcv as u8;
        LittleEndian::write_i64(&mut buf[16..24], self.open);
        LittleEndian::write_i64(&mut buf[24..32], self.high);
        LittleEndian::write_i64(&mut buf[32..40], self.low);
        LittleEndian::write_i64(&mut buf[40..48], self.close);
        LittleEndian::write_u64(&mut buf[48..56], self.volume);
        Record { bytes: buf.into() }
    }
}

/// A trading status change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusMsg {
    /// The shared record header.
    pub header: RecordHeader,
    /// Capture-server receive timestamp, UNIX nanoseconds.
    pub ts_recv: u64,
    /// Status action code.
    pub action: u16,
    /// Status reason code.
    pub reason: u16,
    /// Trading event code.
    pub trading_event: u16,
    /// Whether trading is allowed: `b'Y'`, `b'N'`, or `b'~'`.
    pub is_trading: u8,
    /// Whether quoting is allowed.
    pub is_quoting: u8,
    /// Whether short selling is restricted.
    pub is_short_sell_restricted: u8,
}

impl StatusMsg {
    fn parse_body(header: RecordHeader, data: &[u8]) -> Self {
        Self {
            header,
            ts_recv: LittleEndian::read_u64(&data[16..24]),
            action: LittleEndian::read_u16(&data[24..26]),
            reason: LittleEndian::read_u16(&data[26..28]),
            trading_event: LittleEndian::read_u16(&data[28..30]),
            is_trading: data[30],
            is_quoting: data[31],
            is_short_sell_restricted: data[32],
        }
    }

    /// Encodes this status change as a canonical record.
    #[must_use]
    pub fn to_record(&self) -> Record {
        let size = RType::Status.record_size();
        let mut buf = vec![0u8; size];
        self.header.write(&mut buf, size);
        buf[1] = RType::Status as u8;
        LittleEndian::write_u64(&mut buf[16..24], self.ts_recv);
        LittleEndian::write_u16(&mut buf[24..26], self.action);
        LittleEndian::write_u16(&mut buf[26..28], self.reason);
        LittleEndian::write_u16(&mut buf[28..30], self.trading_event);
        buf[30] = self.is_trading;
        buf[31] = self.is_quoting;
        buf[32] = self.is_short_sell_restricted;
        Record { bytes: buf.into() }
    }
}

/// Width of the error message field.
const ERROR_MSG_LEN: usize = 302;

/// An error reported by the gateway as a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorMsg {
    /// The shared record header.
    pub header: RecordHeader,
    /// The error message.
    pub err: String,
    /// Error code.
    pub code: u8,
    /// Whether this is the last error in a sequence.
    pub is_last: u8,
}

impl ErrorMsg {
    /// Creates a gateway error record value.
    #[must_use]
    pub fn new(ts_event: u64, err: &str) -> Self {
        Self {
            header: RecordHeader::new(RType::Error, 0, 0, ts_event),
            err: err.to_string(),
            code: 0,
            is_last: 1,
        }
    }

    fn parse_body(header: RecordHeader, data: &[u8]) -> Self {
        Self {
            header,
            err: read_cstr(&data[16..16 + ERROR_MSG_LEN]),
            code: data[318],
            is_last: data[319],
        }
    }

    /// Encodes this error as a canonical record.
    #[must_use]
    pub fn to_record(&self) -> Record {
        let size = RType::Error.record_size();
        let mut buf = vec![0u8; size];
        self.header.write(&mut buf, size);
        buf[1] = RType::Error as u8;
        write_cstr(&mut buf[16..16 + ERROR_MSG_LEN], &self.err);
        buf[318] = self.code;
        buf[319] = self.is_last;
        Record { bytes: buf.into() }
    }
}

/// Width of the system message field.
const SYSTEM_MSG_LEN: usize = 303;

/// Known system-message codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemCode {
    /// Periodic gateway liveness signal.
    Heartbeat,
    /// Acknowledgement of a subscription request.
    SubscriptionAck,
    /// The consumer is reading too slowly and risks disconnection.
    SlowReaderWarning,
    /// A code this client does not know.
    Unknown(u8),
}

impl SystemCode {
    /// Decodes a system-message code byte.
    #[must_use]
    pub const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Heartbeat,
            1 => Self::SubscriptionAck,
            2 => Self::SlowReaderWarning,
            other => Self::Unknown(other),
        }
    }

    /// Returns the wire byte of this code.
    #[must_use]
    pub const fn as_u8(&self) -> u8 {
        match self {
            Self::Heartbeat => 0,
            Self::SubscriptionAck => 1,
            Self::SlowReaderWarning => 2,
            Self::Unknown(other) => *other,
        }
    }
}

/// A gateway system message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SystemMsg {
    /// The shared record header.
    pub header: RecordHeader,
    /// The message text.
    pub msg: String,
    /// The system-message code.
    pub code: SystemCode,
}

impl SystemMsg {
    /// Creates a heartbeat system message.
    #[must_use]
    pub fn heartbeat(ts_event: u64) -> Self {
        Self {
            header: RecordHeader::new(RType::System, 0, 0, ts_event),
            msg: "Heartbeat".to_string(),
            code: SystemCode::Heartbeat,
        }
    }

    /// Returns true if this message is a heartbeat.
    #[must_use]
    pub fn is_heartbeat(&self) -> bool {
        self.code == SystemCode::Heartbeat
    }

    fn parse_body(header: RecordHeader, data: &[u8]) -> Self {
        Self {
            header,
            msg: read_cstr(&data[16..16 + SYSTEM_MSG_LEN]),
            code: SystemCode::from_u8(data[319]),
        }
    }

    /// Encodes this system message as a canonical record.
    #[must_use]
    pub fn to_record(&self) -> Record {
        let size = RType::System.record_size();
        let mut buf = vec![0u8; size];
        self.header.write(&mut buf, size);
        buf[1] = RType::System as u8;
        write_cstr(&mut buf[16..16 + SYSTEM_MSG_LEN], &self.msg);
        buf[319] = self.code.as_u8();
        Record { bytes: buf.into() }
    }
}

/// An instrument-id to symbol mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SymbolMappingMsg {
    /// The shared record header.
    pub header: RecordHeader,
    /// Input symbology type byte (`SType::UNDEFINED` when unknown).
    pub stype_in: u8,
    /// The symbol in the input symbology.
    pub stype_in_symbol: String,
    /// Output symbology type byte.
    pub stype_out: u8,
    /// The symbol in the output symbology.
    pub stype_out_symbol: String,
    /// Start of the mapping interval, UNIX nanoseconds.
    pub start_ts: u64,
    /// End of the mapping interval, UNIX nanoseconds.
    pub end_ts: u64,
}

impl SymbolMappingMsg {
    /// Creates a mapping record value.
    #[must_use]
    pub fn new(instrument_id: u32, ts_event: u64, symbol: &str) -> Self {
        Self {
            header: RecordHeader::new(RType::SymbolMapping, 0, instrument_id, ts_event),
            stype_in: 0,
            stype_in_symbol: symbol.to_string(),
            stype_out: 1,
            stype_out_symbol: symbol.to_string(),
            start_ts: ts_event,
            end_ts: UNDEF_TIMESTAMP,
        }
    }

    fn parse_body(header: RecordHeader, data: &[u8]) -> Self {
        Self {
            header,
            stype_in: data[16],
            stype_in_symbol: read_cstr(&data[17..17 + SYMBOL_CSTR_LEN]),
            stype_out: data[88],
            stype_out_symbol: read_cstr(&data[89..89 + SYMBOL_CSTR_LEN]),
            start_ts: LittleEndian::read_u64(&data[160..168]),
            end_ts: LittleEndian::read_u64(&data[168..176]),
        }
    }

    /// Encodes this mapping as a canonical record.
    #[must_use]
    pub fn to_record(&self) -> Record {
        let size = RType::SymbolMapping.record_size();
        let mut buf = vec![0u8; size];
        self.header.write(&mut buf, size);
        buf[1] = RType::SymbolMapping as u8;
        buf[16] = self.stype_in;
        write_cstr(&mut buf[17..17 + SYMBOL_CSTR_LEN], &self.stype_in_symbol);
        buf[88] = self.stype_out;
        write_cstr(&mut buf[89..89 + SYMBOL_CSTR_LEN], &self.stype_out_symbol);
        LittleEndian::write_u64(&mut buf[160..168], self.start_ts);
        LittleEndian::write_u64(&mut buf[168..176], self.end_ts);
        Record { bytes: buf.into() }
    }

    /// Encodes this mapping in the version 1 wire shape (22-byte symbol
    /// fields, no stype bytes). Used by tests and gateway mocks.
    #[must_use]
    pub fn to_v1_bytes(&self) -> Vec<u8> {
        let size = RType::SymbolMapping.record_size_v(1);
        let mut buf = vec![0u8; size];
        self.header.write(&mut buf, size);
        buf[1] = RType::SymbolMapping as u8;
        write_cstr(&mut buf[16..16 + SYMBOL_CSTR_LEN_V1], &self.stype_in_symbol);
        write_cstr(&mut buf[38..38 + SYMBOL_CSTR_LEN_V1], &self.stype_out_symbol);
        LittleEndian::write_u64(&mut buf[60..68], self.start_ts);
        LittleEndian::write_u64(&mut buf[68..76], self.end_ts);
        buf
    }
}

/// Upgrades a version 1 record body to the canonical shape.
///
/// Only symbol mappings change between versions; the upgraded record
/// widens both symbol fields and inserts undefined stype bytes.
pub(crate) fn upgrade_v1_record(data: &[u8]) -> Result<Record, DecodeError> {
    let rtype = RType::from_u8(data[1]).ok_or(DecodeError::UnknownRType(data[1]))?;
    if rtype != RType::SymbolMapping {
        return Record::from_bytes(Bytes::copy_from_slice(data));
    }
    let size = RType::SymbolMapping.record_size();
    let mut buf = vec![0u8; size];
    buf[..RECORD_HEADER_SIZE].copy_from_slice(&data[..RECORD_HEADER_SIZE]);
    buf[0] = (size / LENGTH_UNIT) as u8;
    buf[16] = humboldt_types::SType::UNDEFINED;
    let in_symbol = read_cstr(&data[16..16 + SYMBOL_CSTR_LEN_V1]);
    write_cstr(&mut buf[17..17 + SYMBOL_CSTR_LEN], &in_symbol);
    buf[88] = humboldt_types::SType::UNDEFINED;
    let out_symbol = read_cstr(&data[38..38 + SYMBOL_CSTR_LEN_V1]);
    write_cstr(&mut buf[89..89 + SYMBOL_CSTR_LEN], &out_symbol);
    buf[160..176].copy_from_slice(&data[60..76]);
    Record::from_bytes(buf.into())
}

/// Reads a NUL-terminated string from a fixed-width field.
fn read_cstr(data: &[u8]) -> String {
    let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
    String::from_utf8_lossy(&data[..end]).into_owned()
}

/// Writes a string into a fixed-width NUL-padded field, truncating if
/// necessary but always leaving a terminating NUL.
fn write_cstr(dst: &mut [u8], s: &str) {
    let max = dst.len().saturating_sub(1);
    let bytes = s.as_bytes();
    let n = bytes.len().min(max);
    dst[..n].copy_from_slice(&bytes[..n]);
    for b in &mut dst[n..] {
        *b = 0;
    }
}
