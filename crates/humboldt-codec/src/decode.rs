//! Incremental decoders for the binary record stream.
//!
//! [`RecordDecoder`] frames individual records out of a byte stream.
//! [`StreamDecoder`] layers the metadata header on top, matching the
//! shape of a full session: one header frame, then records until the
//! transport closes.

use bytes::BytesMut;

use crate::metadata::{HMB_VERSION, Metadata, MetadataDecoder};
use crate::record::{DecodeError, LENGTH_UNIT, RType, Record, upgrade_v1_record};

/// Incremental decoder for a stream of records.
///
/// Feed transport bytes with [`write`](Self::write) and drain complete
/// records with [`next_record`](Self::next_record). Records carrying an
/// older wire version are upgraded to the canonical shape as they are
/// framed, so downstream code only ever sees canonical records.
#[derive(Debug)]
pub struct RecordDecoder {
    buf: BytesMut,
    version: u8,
}

impl RecordDecoder {
    /// Creates a decoder for canonical-version records.
    #[must_use]
    pub fn new() -> Self {
        Self {
            buf: BytesMut::new(),
            version: HMB_VERSION,
        }
    }

    /// Creates a decoder for records of the given wire version.
    ///
    /// # Errors
    ///
    /// Returns an error if the version is zero or newer than this
    /// codec speaks.
    pub fn with_version(version: u8) -> Result<Self, DecodeError> {
        if version == 0 || version > HMB_VERSION {
            return Err(DecodeError::UnsupportedVersion(version));
        }
        Ok(Self {
            buf: BytesMut::new(),
            version,
        })
    }

    /// Appends raw bytes from the transport.
    pub fn write(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Attempts to frame and decode the next record.
    ///
    /// Returns `Ok(None)` until a complete record is buffered. The
    /// header is validated as soon as its first two bytes arrive, so a
    /// corrupt stream fails before the declared length is waited on.
    ///
    /// # Errors
    ///
    /// Returns an error on any framing violation. The stream has no
    /// resynchronization points, so errors are not recoverable.
    pub fn next_record(&mut self) -> Result<Option<Record>, DecodeError> {
        if self.buf.len() < 2 {
            return Ok(None);
        }
        let declared = self.buf[0] as usize * LENGTH_UNIT;
        if declared == 0 {
            return Err(DecodeError::ZeroLength);
        }
        let rtype = RType::from_u8(self.buf[1]).ok_or(DecodeError::UnknownRType(self.buf[1]))?;
        let expected = rtype.record_size_v(self.version);
        if declared != expected {
            return Err(DecodeError::LengthMismatch {
                rtype: rtype as u8,
                declared,
                expected,
            });
        }
        if self.buf.len() < declared {
            return Ok(None);
        }
        let frame = self.buf.split_to(declared);
        let record = if self.version < HMB_VERSION {
            upgrade_v1_record(&frame)?
        } else {
            Record::from_bytes(frame.freeze())?
        };
        Ok(Some(record))
    }
}

impl Default for RecordDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Which part of the stream the decoder is waiting on.
#[derive(Debug)]
enum Phase {
    Header(MetadataDecoder),
    Body {
        metadata: Metadata,
        records: RecordDecoder,
    },
}

impl Default for Phase {
    fn default() -> Self {
        Self::Header(MetadataDecoder::new())
    }
}

/// Decoder for a complete stream: a metadata frame, then records.
///
/// Bytes buffered past the header are carried into record decoding, so
/// callers can feed transport reads without aligning them to frame
/// boundaries. The record decoder is pinned to the wire version the
/// header declares.
#[derive(Debug, Default)]
pub struct StreamDecoder {
    phase: Phase,
}

impl StreamDecoder {
    /// Creates a decoder awaiting the metadata frame.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends raw bytes from the transport.
    pub fn write(&mut self, data: &[u8]) {
        match &mut self.phase {
            Phase::Header(decoder) => decoder.write(data),
            Phase::Body { records, .. } => records.write(data),
        }
    }

    /// Returns the stream header, once it has arrived.
    #[must_use]
    pub fn metadata(&self) -> Option<&Metadata> {
        match &self.phase {
            Phase::Header(_) => None,
            Phase::Body { metadata, .. } => Some(metadata),
        }
    }

    /// Attempts to decode the next record.
    ///
    /// Consumes the metadata frame first if it has not been seen yet;
    /// [`metadata`](Self::metadata) is available from then on.
    ///
    /// # Errors
    ///
    /// Returns an error on any framing violation, in either the header
    /// or the records that follow it.
    pub fn next_record(&mut self) -> Result<Option<Record>, DecodeError> {
        if !self.advance_header()? {
            return Ok(None);
        }
        match &mut self.phase {
            Phase::Body { records, .. } => records.next_record(),
            Phase::Header(_) => Ok(None),
        }
    }

    /// Decodes the header and flips to record decoding, carrying over
    /// any buffered record bytes. Returns whether the body phase has
    /// been reached.
    fn advance_header(&mut self) -> Result<bool, DecodeError> {
        let Phase::Header(decoder) = &mut self.phase else {
            return Ok(true);
        };
        let Some(metadata) = decoder.decode()? else {
            return Ok(false);
        };
        let remainder = std::mem::take(decoder).into_remainder();
        let mut records = RecordDecoder::with_version(metadata.version)?;
        records.write(&remainder);
        self.phase = Phase::Body { metadata, records };
        Ok(true)
    }
}
