//! Dataset identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Default port of a live subscription gateway.
pub const DEFAULT_GATEWAY_PORT: u16 = 13000;

/// A validated dataset identifier, e.g. `XNAS.BASIC`.
///
/// Dataset identifiers follow the `VENUE.FEED` convention: an uppercase
/// venue code and feed name joined by a single dot. A live session is
/// bound to exactly one dataset; the gateway host is derived from it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Dataset(String);

impl Dataset {
    /// Creates a dataset from a raw identifier.
    ///
    /// The identifier is uppercased and validated.
    ///
    /// # Errors
    ///
    /// Returns an error if the identifier is empty, contains characters
    /// outside `[A-Z0-9._-]`, or is not of the form `VENUE.FEED`.
    pub fn new(id: impl AsRef<str>) -> Result<Self, DatasetError> {
        let id = id.as_ref().trim().to_uppercase();
        if id.is_empty() {
            return Err(DatasetError::Empty);
        }
        if !id
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || matches!(c, '.' | '_' | '-'))
        {
            return Err(DatasetError::InvalidCharacters(id));
        }
        let mut parts = id.splitn(2, '.');
        let venue = parts.next().unwrap_or_default();
        let feed = parts.next().unwrap_or_default();
        if venue.is_empty() || feed.is_empty() {
            return Err(DatasetError::MissingComponent(id));
        }
        Ok(Self(id))
    }

    /// Returns the dataset identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the venue component (the part before the first dot).
    #[must_use]
    pub fn venue(&self) -> &str {
        self.0.split('.').next().unwrap_or(&self.0)
    }

    /// Returns the default gateway host for this dataset.
    ///
    /// The host is the lowercased identifier with dots replaced by
    /// dashes, under the `lsg.humboldt.net` domain. For example,
    /// `XNAS.BASIC` resolves to `xnas-basic.lsg.humboldt.net`.
    #[must_use]
    pub fn default_gateway(&self) -> String {
        let subdomain = self.0.to_lowercase().replace('.', "-");
        format!("{subdomain}.lsg.humboldt.net")
    }
}

impl fmt::Display for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Dataset {
    type Err = DatasetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for Dataset {
    type Error = DatasetError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Dataset> for String {
    fn from(dataset: Dataset) -> Self {
        dataset.0
    }
}

/// Error returned when constructing an invalid dataset identifier.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DatasetError {
    /// The identifier was empty.
    #[error("dataset identifier is empty")]
    Empty,

    /// The identifier contained characters outside `[A-Z0-9._-]`.
    #[error("dataset identifier '{0}' contains invalid characters")]
    InvalidCharacters(String),

    /// The identifier was not of the form `VENUE.FEED`.
    #[error("dataset identifier '{0}' must be of the form VENUE.FEED")]
    MissingComponent(String),
}
