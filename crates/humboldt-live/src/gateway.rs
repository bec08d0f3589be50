//! The line-based control protocol spoken before session start.
//!
//! Control messages are newline-terminated, pipe-delimited `key=value`
//! fields; the first key identifies the message. After the client sends
//! `start_session` the gateway switches the stream to binary records
//! and no further control lines arrive.

use bytes::BytesMut;
use humboldt_types::{HumboldtError, Result};

/// Upper bound on one encoded control line, subscription lines
/// included. The gateway rejects longer lines, so oversized requests
/// fail client-side before anything is transmitted.
pub(crate) const MAX_MESSAGE_SIZE: usize = 8 * 1024;

/// A control message received from the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum GatewayMessage {
    /// `lsg_version=<version>`, the first line after connect.
    Greeting {
        /// Version string the gateway announced.
        version: String,
    },
    /// `cram=<challenge>`, the authentication challenge.
    Challenge {
        /// Challenge text to solve.
        challenge: String,
    },
    /// `success=<0|1>|...`, the authentication outcome.
    AuthResponse {
        /// Whether authentication succeeded.
        success: bool,
        /// Session id assigned on success.
        session_id: Option<String>,
        /// Failure reason on rejection.
        error: Option<String>,
    },
}

impl GatewayMessage {
    /// Parses one control line (without its newline).
    pub(crate) fn parse(line: &str) -> Result<Self> {
        let mut fields = line.split('|').filter_map(|field| field.split_once('='));
        let (first_key, first_value) = fields
            .next()
            .ok_or_else(|| HumboldtError::Protocol(format!("malformed control line: {line:?}")))?;
        match first_key {
            "lsg_version" => Ok(Self::Greeting {
                version: first_value.to_owned(),
            }),
            "cram" => Ok(Self::Challenge {
                challenge: first_value.to_owned(),
            }),
            "success" => {
                let mut session_id = None;
                let mut error = None;
                for (key, value) in fields {
                    match key {
                        "session_id" => session_id = Some(value.to_owned()),
                        "error" => error = Some(value.to_owned()),
                        _ => {}
                    }
                }
                Ok(Self::AuthResponse {
                    success: first_value == "1",
                    session_id,
                    error,
                })
            }
            other => Err(HumboldtError::Protocol(format!(
                "unknown control message key: {other}"
            ))),
        }
    }
}

/// Encodes the authentication line answering a challenge.
pub(crate) fn encode_auth(
    auth: &str,
    dataset: &str,
    client: &str,
    heartbeat_interval_s: Option<u64>,
) -> String {
    let mut line = format!("auth={auth}|dataset={dataset}|encoding=hmb|ts_out=0|client={client}");
    if let Some(seconds) = heartbeat_interval_s {
        line.push_str(&format!("|heartbeat_interval_s={seconds}"));
    }
    line.push('\n');
    line
}

/// The line that flips the stream from control lines to binary records.
pub(crate) const START_SESSION_LINE: &str = "start_session=0\n";

/// Accumulates transport bytes and yields complete control lines.
#[derive(Debug, Default)]
pub(crate) struct LineBuffer {
    buf: BytesMut,
}

impl LineBuffer {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn write(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Returns the next complete line without its terminator.
    pub(crate) fn next_line(&mut self) -> Option<String> {
        let pos = self.buf.iter().position(|&b| b == b'\n')?;
        let line = self.buf.split_to(pos + 1);
        let text = String::from_utf8_lossy(&line[..pos]);
        Some(text.trim_end_matches('\r').to_owned())
    }

    /// Returns the bytes buffered past the last consumed line. Once the
    /// stream turns binary these belong to the record decoder.
    pub(crate) fn into_remainder(self) -> BytesMut {
        self.buf
    }
}
