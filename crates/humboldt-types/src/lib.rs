//! Core types for the humboldt live market-data client.
//!
//! This crate provides the fundamental data structures used throughout
//! humboldt:
//!
//! - [`Dataset`] - A validated dataset identifier bound to one gateway
//! - [`Schema`] - The record schema of a subscription
//! - [`SType`] - Symbology type for symbol identifiers
//! - [`HumboldtError`] - The error taxonomy shared by all crates

#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/factordynamics/humboldt/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod dataset;
mod error;
mod schema;
mod stype;

pub use dataset::{DEFAULT_GATEWAY_PORT, Dataset, DatasetError};
pub use error::{HumboldtError, Result};
pub use schema::{Schema, SchemaParseError};
pub use stype::{SType, STypeParseError};
