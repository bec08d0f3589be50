//! Binary record codec for the humboldt live market-data client.
//!
//! This crate owns the wire format the live gateway streams after
//! session start:
//!
//! - [`Metadata`] - The length-prefixed stream header sent once
//! - [`Record`] - A single decoded record in canonical form
//! - [`RecordDecoder`] - Incremental record decoding with version upgrade
//! - [`StreamDecoder`] - Metadata frame followed by records
//!
//! All multi-byte fields are little-endian. Records older than the
//! canonical wire version are upgraded once, at decode time; consumers
//! only ever observe canonical bytes.

#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/factordynamics/humboldt/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod decode;
mod metadata;
mod record;

pub use decode::{RecordDecoder, StreamDecoder};
pub use metadata::{HMB_VERSION, Metadata, MetadataDecoder};
pub use record::{
    DecodeError, ErrorMsg, LENGTH_UNIT, OhlcvMsg, RECORD_HEADER_SIZE, RType, Record, RecordHeader,
    SYMBOL_CSTR_LEN, SYMBOL_CSTR_LEN_V1, StatusMsg, SymbolMappingMsg, SystemCode, SystemMsg,
    TradeMsg, UNDEF_TIMESTAMP,
};
