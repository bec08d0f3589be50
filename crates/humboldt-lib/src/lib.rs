//! Rust client for streaming live market data over the humboldt
//! protocol.
//!
//! This is a facade crate that re-exports functionality from the
//! humboldt workspace crates for convenient access.
//!
//! # Quick Start
//!
//! ```ignore
//! use humboldt_lib::prelude::*;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = LiveClient::new(LiveConfig::new("YOUR_API_KEY"))?;
//!     client.subscribe(Subscription::new(
//!         Dataset::new("XNAS.BASIC")?,
//!         Schema::Trades,
//!         ["AAPL", "MSFT"],
//!     ))?;
//!
//!     for record in client.iter() {
//!         if let Some(trade) = record?.as_trade() {
//!             println!("{} x {} @ {}", trade.header.instrument_id, trade.size, trade.price_f64());
//!         }
//!     }
//!     Ok(())
//! }
//! ```

#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/factordynamics/humboldt/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

// Re-export core types
pub use humboldt_types::*;

// Re-export the wire codec
pub use humboldt_codec::{
    DecodeError, ErrorMsg, HMB_VERSION, Metadata, MetadataDecoder, OhlcvMsg, RType, Record,
    RecordDecoder, RecordHeader, StatusMsg, StreamDecoder, SymbolMappingMsg, SystemCode, SystemMsg,
    TradeMsg,
};

// Re-export the live session
#[cfg(feature = "live")]
pub use humboldt_live::{
    DEFAULT_QUEUE_CAPACITY, ErrorCallback, LiveClient, LiveConfig, QueueError, RecordCallback,
    RecordIter, RecordQueue, ReconnectCallback, ReconnectDecision, ReconnectPolicy, SessionState,
    Subscription,
};

/// Prelude module for convenient imports.
///
/// ```
/// use humboldt_lib::prelude::*;
/// ```
pub mod prelude {
    pub use humboldt_types::{Dataset, HumboldtError, Result, SType, Schema};

    pub use humboldt_codec::{Metadata, RType, Record, TradeMsg};

    #[cfg(feature = "live")]
    pub use humboldt_live::{
        LiveClient, LiveConfig, ReconnectPolicy, SessionState, Subscription,
    };
}
