//! Symbology types.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// The symbology convention of the identifiers in a symbol list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SType {
    /// Raw exchange symbology, e.g. `AAPL`.
    #[default]
    RawSymbol,
    /// Numeric instrument identifiers assigned by the publisher.
    InstrumentId,
    /// Parent symbology grouping all contracts of a root, e.g. `ES.FUT`.
    Parent,
    /// Continuous contract symbology, e.g. `ES.c.0`.
    Continuous,
}

impl SType {
    /// Sentinel byte for an undefined symbology type on the wire.
    pub const UNDEFINED: u8 = 0xFF;

    /// Returns the symbology type as its wire identifier.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::RawSymbol => "raw_symbol",
            Self::InstrumentId => "instrument_id",
            Self::Parent => "parent",
            Self::Continuous => "continuous",
        }
    }

    /// Returns the wire byte for this symbology type.
    #[must_use]
    pub const fn as_u8(&self) -> u8 {
        match self {
            Self::RawSymbol => 0,
            Self::InstrumentId => 1,
            Self::Parent => 2,
            Self::Continuous => 3,
        }
    }

    /// Decodes a wire byte, returning `None` for the undefined sentinel
    /// or an unknown value.
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::RawSymbol),
            1 => Some(Self::InstrumentId),
            2 => Some(Self::Parent),
            3 => Some(Self::Continuous),
            _ => None,
        }
    }
}

impl std::fmt::Display for SType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SType {
    type Err = STypeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "raw_symbol" | "raw" => Ok(Self::RawSymbol),
            "instrument_id" | "id" => Ok(Self::InstrumentId),
            "parent" => Ok(Self::Parent),
            "continuous" => Ok(Self::Continuous),
            _ => Err(STypeParseError(s.to_string())),
        }
    }
}

/// Error returned when parsing an invalid symbology type string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct STypeParseError(String);

impl std::fmt::Display for STypeParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "invalid symbology type '{}', expected one of: raw_symbol, instrument_id, parent, continuous",
            self.0
        )
    }
}

impl std::error::Error for STypeParseError {}
