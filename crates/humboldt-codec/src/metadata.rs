//! The stream metadata header.

use byteorder::{ByteOrder, LittleEndian};
use bytes::BytesMut;
use humboldt_types::{SType, Schema};
use serde::Serialize;

use crate::record::{DecodeError, SYMBOL_CSTR_LEN};

/// Canonical wire version spoken and emitted by this codec.
pub const HMB_VERSION: u8 = 2;

/// Magic bytes opening a metadata frame body.
const MAGIC: &[u8; 3] = b"HMB";

/// Size of the fixed metadata frame body.
const BODY_LEN: usize = 64;

/// Width of the NUL-padded dataset field.
const DATASET_LEN: usize = 16;

/// Size of the `u32` length prefix framing the body.
const PREFIX_LEN: usize = 4;

/// Upper bound on a declared frame length before it is treated as
/// stream corruption. Frames longer than the fixed body are allowed so
/// newer gateways can append fields; the excess is skipped.
const MAX_FRAME_LEN: usize = 4096;

/// The stream header, sent once after session start.
///
/// All fields describe the stream as the gateway serves it. A fresh
/// header arrives on every reconnect; the first one received is the one
/// a session keeps and prepends to output streams.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Metadata {
    /// Wire version the gateway declared. Records are upgraded to
    /// canonical at decode time regardless of this value, and
    /// [`encode`](Self::encode) always emits the canonical version.
    pub version: u8,
    /// The dataset this stream serves.
    pub dataset: String,
    /// Schema of the stream, `None` when subscriptions mix schemas.
    pub schema: Option<Schema>,
    /// Start of the stream window, UNIX nanoseconds.
    pub start: u64,
    /// End of the stream window, zero for an open-ended live stream.
    pub end: u64,
    /// Record limit, zero when unlimited.
    pub limit: u64,
    /// Input symbology of the subscriptions, `None` when mixed.
    pub stype_in: Option<SType>,
    /// Output symbology of the stream's symbol mappings.
    pub stype_out: Option<SType>,
    /// Whether records carry an appended gateway send timestamp.
    pub ts_out: bool,
    /// Symbol field width, in bytes, of the declared wire version.
    pub symbol_cstr_len: u16,
}

impl Metadata {
    /// Creates a live-stream header with canonical defaults.
    #[must_use]
    pub fn new(dataset: impl Into<String>, schema: Option<Schema>, start: u64) -> Self {
        Self {
            version: HMB_VERSION,
            dataset: dataset.into(),
            schema,
            start,
            end: 0,
            limit: 0,
            stype_in: Some(SType::RawSymbol),
            stype_out: Some(SType::InstrumentId),
            ts_out: false,
            symbol_cstr_len: SYMBOL_CSTR_LEN as u16,
        }
    }

    /// Encodes this header as a length-prefixed canonical frame.
    ///
    /// Headers decoded from an older wire version re-encode as the
    /// canonical version, matching the upgraded records that follow
    /// them in an output stream.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; PREFIX_LEN + BODY_LEN];
        LittleEndian::write_u32(&mut buf[..PREFIX_LEN], BODY_LEN as u32);
        let body = &mut buf[PREFIX_LEN..];
        body[..3].copy_from_slice(MAGIC);
        body[3] = HMB_VERSION;
        let dataset = self.dataset.as_bytes();
        let n = dataset.len().min(DATASET_LEN - 1);
        body[4..4 + n].copy_from_slice(&dataset[..n]);
        let schema = self.schema.map_or(Schema::MIXED, |s| s.as_u16());
        LittleEndian::write_u16(&mut body[20..22], schema);
        LittleEndian::write_u64(&mut body[22..30], self.start);
        LittleEndian::write_u64(&mut body[30..38], self.end);
        LittleEndian::write_u64(&mut body[38..46], self.limit);
        body[46] = self.stype_in.map_or(SType::UNDEFINED, |s| s.as_u8());
        body[47] = self.stype_out.map_or(SType::UNDEFINED, |s| s.as_u8());
        body[48] = u8::from(self.ts_out);
        LittleEndian::write_u16(&mut body[49..51], SYMBOL_CSTR_LEN as u16);
        buf
    }

    /// Decodes a metadata frame body.
    fn decode_body(body: &[u8]) -> Result<Self, DecodeError> {
        debug_assert!(body.len() >= BODY_LEN);
        if &body[..3] != MAGIC {
            return Err(DecodeError::BadMagic([body[0], body[1], body[2]]));
        }
        let version = body[3];
        if version == 0 || version > HMB_VERSION {
            return Err(DecodeError::UnsupportedVersion(version));
        }
        let dataset_end = body[4..4 + DATASET_LEN]
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(DATASET_LEN);
        let dataset = String::from_utf8_lossy(&body[4..4 + dataset_end]).into_owned();
        let schema_code = LittleEndian::read_u16(&body[20..22]);
        let schema = if schema_code == Schema::MIXED {
            None
        } else {
            Some(Schema::from_u16(schema_code).ok_or(DecodeError::UnknownSchema(schema_code))?)
        };
        Ok(Self {
            version,
            dataset,
            schema,
            start: LittleEndian::read_u64(&body[22..30]),
            end: LittleEndian::read_u64(&body[30..38]),
            limit: LittleEndian::read_u64(&body[38..46]),
            stype_in: SType::from_u8(body[46]),
            stype_out: SType::from_u8(body[47]),
            ts_out: body[48] != 0,
            symbol_cstr_len: LittleEndian::read_u16(&body[49..51]),
        })
    }
}

/// Incremental decoder for the length-prefixed metadata frame.
///
/// Feed bytes with [`write`](Self::write) as they arrive;
/// [`decode`](Self::decode) returns the header once the whole frame is
/// buffered. Bytes past the frame belong to the record stream and are
/// recovered with [`into_remainder`](Self::into_remainder).
#[derive(Debug, Default)]
pub struct MetadataDecoder {
    buf: BytesMut,
}

impl MetadataDecoder {
    /// Creates an empty decoder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends raw bytes from the transport.
    pub fn write(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Attempts to decode the metadata frame.
    ///
    /// Returns `Ok(None)` until the full frame has arrived. On success
    /// the frame's bytes are consumed from the buffer.
    ///
    /// # Errors
    ///
    /// Returns an error if the declared frame length is implausible or
    /// the body fails to decode. Decoding errors are not recoverable;
    /// the stream has no resynchronization points.
    pub fn decode(&mut self) -> Result<Option<Metadata>, DecodeError> {
        if self.buf.len() < PREFIX_LEN {
            return Ok(None);
        }
        let frame_len = LittleEndian::read_u32(&self.buf[..PREFIX_LEN]) as usize;
        if !(BODY_LEN..=MAX_FRAME_LEN).contains(&frame_len) {
            return Err(DecodeError::BadMetadataLength(frame_len as u32));
        }
        if self.buf.len() < PREFIX_LEN + frame_len {
            return Ok(None);
        }
        let frame = self.buf.split_to(PREFIX_LEN + frame_len);
        Metadata::decode_body(&frame[PREFIX_LEN..]).map(Some)
    }

    /// Returns the buffered bytes past the decoded frame.
    #[must_use]
    pub fn into_remainder(self) -> BytesMut {
        self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_round_trip() {
        let metadata = Metadata::new("XNAS.BASIC", Some(Schema::Trades), 1_700_000_000_000_000_000);
        let encoded = metadata.encode();
        assert_eq!(encoded.len(), PREFIX_LEN + BODY_LEN);

        let mut decoder = MetadataDecoder::new();
        decoder.write(&encoded);
        let decoded = decoder.decode().unwrap().unwrap();
        assert_eq!(decoded, metadata);
        assert!(decoder.into_remainder().is_empty());
    }

    #[test]
    fn test_metadata_mixed_schema() {
        let metadata = Metadata::new("GLBX.MDP3", None, 0);
        let mut decoder = MetadataDecoder::new();
        decoder.write(&metadata.encode());
        let decoded = decoder.decode().unwrap().unwrap();
        assert_eq!(decoded.schema, None);
    }

    #[test]
    fn test_metadata_incremental_feed() {
        let encoded = Metadata::new("XNAS.BASIC", Some(Schema::Ohlcv1S), 7).encode();
        let mut decoder = MetadataDecoder::new();
        for byte in &encoded[..encoded.len() - 1] {
            decoder.write(std::slice::from_ref(byte));
            assert_eq!(decoder.decode().unwrap(), None);
        }
        decoder.write(&encoded[encoded.len() - 1..]);
        assert!(decoder.decode().unwrap().is_some());
    }

    #[test]
    fn test_metadata_preserves_trailing_bytes() {
        let mut bytes = Metadata::new("XNAS.BASIC", Some(Schema::Trades), 1).encode();
        bytes.extend_from_slice(b"record bytes");
        let mut decoder = MetadataDecoder::new();
        decoder.write(&bytes);
        decoder.decode().unwrap().unwrap();
        assert_eq!(&decoder.into_remainder()[..], b"record bytes");
    }

    #[test]
    fn test_metadata_rejects_bad_magic() {
        let mut encoded = Metadata::new("XNAS.BASIC", Some(Schema::Trades), 1).encode();
        encoded[PREFIX_LEN] = b'X';
        let mut decoder = MetadataDecoder::new();
        decoder.write(&encoded);
        assert!(matches!(decoder.decode(), Err(DecodeError::BadMagic(_))));
    }

    #[test]
    fn test_metadata_rejects_future_version() {
        let mut encoded = Metadata::new("XNAS.BASIC", Some(Schema::Trades), 1).encode();
        encoded[PREFIX_LEN + 3] = HMB_VERSION + 1;
        let mut decoder = MetadataDecoder::new();
        decoder.write(&encoded);
        assert!(matches!(
            decoder.decode(),
            Err(DecodeError::UnsupportedVersion(_))
        ));
    }

    #[test]
    fn test_metadata_rejects_implausible_length() {
        let mut decoder = MetadataDecoder::new();
        decoder.write(&[1, 0, 0, 0]);
        assert_eq!(decoder.decode(), Err(DecodeError::BadMetadataLength(1)));
    }

    #[test]
    fn test_metadata_skips_extended_frame() {
        // A longer frame from a newer gateway decodes from its leading
        // canonical fields.
        let metadata = Metadata::new("XNAS.BASIC", Some(Schema::Trades), 9);
        let mut encoded = metadata.encode();
        encoded.extend_from_slice(&[0u8; 16]);
        LittleEndian::write_u32(&mut encoded[..PREFIX_LEN], (BODY_LEN + 16) as u32);

        let mut decoder = MetadataDecoder::new();
        decoder.write(&encoded);
        let decoded = decoder.decode().unwrap().unwrap();
        assert_eq!(decoded, metadata);
        assert!(decoder.into_remainder().is_empty());
    }
}
