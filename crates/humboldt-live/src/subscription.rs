//! Subscription requests and symbol chunking.

use chrono::{DateTime, Utc};
use humboldt_types::{Dataset, HumboldtError, Result, SType, Schema};

use crate::gateway::MAX_MESSAGE_SIZE;

/// Symbols per transmitted chunk. Larger symbol lists are split into
/// several wire requests; only the final chunk carries `is_last`.
pub(crate) const SYMBOL_BATCH_SIZE: usize = 64;

/// A request to stream one schema for a list of symbols.
///
/// Subscriptions submitted before the session starts are buffered and
/// flushed on start; submissions afterwards transmit immediately. The
/// request is immutable once submitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    /// Dataset to stream from. A session is bound to one dataset; see
    /// [`LiveClient::subscribe`](crate::LiveClient::subscribe).
    pub dataset: Dataset,
    /// Schema of the requested records.
    pub schema: Schema,
    /// Symbols, in the order they will be transmitted.
    pub symbols: Vec<String>,
    /// Symbology of `symbols`.
    pub stype_in: SType,
    /// Optional replay start point. The gateway streams stored records
    /// from this time before going live.
    pub start: Option<DateTime<Utc>>,
    /// Ask the gateway to prime the stream with current state first.
    pub snapshot: bool,
    /// Client-assigned id echoed back in gateway error responses.
    pub id: Option<u32>,
}

impl Subscription {
    /// Creates a subscription with raw-symbol symbology and no replay.
    pub fn new<S: Into<String>>(
        dataset: Dataset,
        schema: Schema,
        symbols: impl IntoIterator<Item = S>,
    ) -> Self {
        Self {
            dataset,
            schema,
            symbols: symbols.into_iter().map(Into::into).collect(),
            stype_in: SType::RawSymbol,
            start: None,
            snapshot: false,
            id: None,
        }
    }

    /// Returns a copy suitable for replay after a reconnect: the replay
    /// start point has already been consumed and cannot be re-requested.
    pub(crate) fn for_replay(&self) -> Self {
        let mut replay = self.clone();
        replay.start = None;
        replay
    }

    /// Encodes this subscription as wire lines, one per symbol chunk.
    ///
    /// Chunks concatenate to the original symbol list in order, and
    /// exactly the final chunk carries `is_last=1`.
    ///
    /// # Errors
    ///
    /// Fails with [`HumboldtError::Subscription`] before anything is
    /// transmitted if the symbol list is empty, the start timestamp is
    /// unrepresentable, or any single encoded chunk exceeds the maximum
    /// message size.
    pub(crate) fn encode_chunks(&self) -> Result<Vec<String>> {
        if self.symbols.is_empty() {
            return Err(HumboldtError::Subscription(
                "subscription has no symbols".to_owned(),
            ));
        }
        let start_nanos = match self.start {
            Some(start) => Some(start.timestamp_nanos_opt().ok_or_else(|| {
                HumboldtError::Subscription(format!(
                    "start timestamp {start} is outside the representable range"
                ))
            })?),
            None => None,
        };

        let chunks: Vec<&[String]> = self.symbols.chunks(SYMBOL_BATCH_SIZE).collect();
        let last = chunks.len() - 1;
        let mut lines = Vec::with_capacity(chunks.len());
        for (index, chunk) in chunks.iter().enumerate() {
            let line = self.encode_chunk(chunk, start_nanos, index == last);
            if line.len() > MAX_MESSAGE_SIZE {
                return Err(HumboldtError::Subscription(format!(
                    "encoded subscription chunk is {} bytes, over the {} byte limit",
                    line.len(),
                    MAX_MESSAGE_SIZE
                )));
            }
            lines.push(line);
        }
        Ok(lines)
    }

    fn encode_chunk(&self, symbols: &[String], start_nanos: Option<i64>, is_last: bool) -> String {
        let mut line = format!(
            "dataset={}|schema={}|stype_in={}|symbols={}",
            self.dataset,
            self.schema,
            self.stype_in,
            symbols.join(",")
        );
        if let Some(nanos) = start_nanos {
            line.push_str(&format!("|start={nanos}"));
        }
        line.push_str(&format!(
            "|snapshot={}|is_last={}",
            u8::from(self.snapshot),
            u8::from(is_last)
        ));
        if let Some(id) = self.id {
            line.push_str(&format!("|id={id}"));
        }
        line.push('\n');
        line
    }
}
