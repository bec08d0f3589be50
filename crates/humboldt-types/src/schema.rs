//! Record schema definitions.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// The record schema of a subscription.
///
/// Identifies which record type the gateway streams for a subscription.
/// Only the schemas the live gateway serves are listed; historical-only
/// schemas are out of scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Schema {
    /// Individual trades.
    #[default]
    Trades,
    /// 1-second OHLCV bars.
    #[serde(rename = "ohlcv-1s")]
    Ohlcv1S,
    /// 1-minute OHLCV bars.
    #[serde(rename = "ohlcv-1m")]
    Ohlcv1M,
    /// Trading status events.
    Status,
}

impl Schema {
    /// Sentinel wire code for a stream that mixes schemas.
    pub const MIXED: u16 = 0xFFFF;

    /// Returns the schema as its wire identifier.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Trades => "trades",
            Self::Ohlcv1S => "ohlcv-1s",
            Self::Ohlcv1M => "ohlcv-1m",
            Self::Status => "status",
        }
    }

    /// Returns the wire code for this schema.
    #[must_use]
    pub const fn as_u16(&self) -> u16 {
        match self {
            Self::Trades => 0,
            Self::Ohlcv1S => 1,
            Self::Ohlcv1M => 2,
            Self::Status => 3,
        }
    }

    /// Decodes a wire code, returning `None` for the mixed-schema
    /// sentinel or an unknown value.
    #[must_use]
    pub const fn from_u16(value: u16) -> Option<Self> {
        match value {
            0 => Some(Self::Trades),
            1 => Some(Self::Ohlcv1S),
            2 => Some(Self::Ohlcv1M),
            3 => Some(Self::Status),
            _ => None,
        }
    }

    /// Returns all schemas the live gateway serves.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[Self::Trades, Self::Ohlcv1S, Self::Ohlcv1M, Self::Status]
    }
}

impl std::fmt::Display for Schema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Schema {
    type Err = SchemaParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "trades" | "trade" => Ok(Self::Trades),
            "ohlcv-1s" => Ok(Self::Ohlcv1S),
            "ohlcv-1m" => Ok(Self::Ohlcv1M),
            "status" => Ok(Self::Status),
            _ => Err(SchemaParseError(s.to_string())),
        }
    }
}

/// Error returned when parsing an invalid schema string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaParseError(String);

impl std::fmt::Display for SchemaParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "invalid schema '{}', expected one of: trades, ohlcv-1s, ohlcv-1m, status",
            self.0
        )
    }
}

impl std::error::Error for SchemaParseError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_parse() {
        assert_eq!("trades".parse::<Schema>().unwrap(), Schema::Trades);
        assert_eq!("OHLCV-1S".parse::<Schema>().unwrap(), Schema::Ohlcv1S);
        assert!("definition".parse::<Schema>().is_err());
    }

    #[test]
    fn test_schema_round_trip() {
        for schema in Schema::all() {
            assert_eq!(schema.as_str().parse::<Schema>().unwrap(), *schema);
        }
    }

    #[test]
    fn test_schema_wire_codes() {
        for schema in Schema::all() {
            assert_eq!(Schema::from_u16(schema.as_u16()), Some(*schema));
        }
        assert_eq!(Schema::from_u16(Schema::MIXED), None);
    }
}
