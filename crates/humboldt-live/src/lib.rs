//! Live streaming client for the humboldt market-data gateway.
//!
//! This crate owns the live session from TCP dial to record delivery:
//!
//! - [`LiveClient`] - The facade: subscribe, start, iterate, teardown
//! - [`Subscription`] - A batched, chunked subscription request
//! - [`RecordQueue`] - The bounded buffer behind sync/async iteration
//! - [`ReconnectPolicy`] - What to do when the session drops
//!
//! Sessions authenticate with CRAM over a line-based control protocol,
//! then switch to the framed binary stream decoded by
//! [`humboldt_codec`]. Records fan out in arrival order to registered
//! callbacks, output streams, and the record queue.

#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/factordynamics/humboldt/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod client;
mod cram;
mod gateway;
mod protocol;
mod queue;
mod reconnect;
mod session;
mod subscription;

pub use client::{LiveClient, LiveConfig, RecordIter};
pub use queue::{DEFAULT_QUEUE_CAPACITY, QueueError, RecordQueue};
pub use reconnect::{ReconnectDecision, ReconnectPolicy};
pub use session::{ErrorCallback, RecordCallback, ReconnectCallback, SessionState};
pub use subscription::Subscription;
