//! CLI command implementations.

use anyhow::{Context, Result};
use humboldt_lib::prelude::*;

pub(crate) mod listen;
pub(crate) mod record;

/// Environment variable consulted when `--key` is absent.
const API_KEY_ENV: &str = "HUMBOLDT_API_KEY";

/// Builds a live client from the shared connection arguments.
pub(crate) fn build_client(
    key: Option<&str>,
    gateway: Option<String>,
    port: u16,
    reconnect: bool,
) -> Result<LiveClient> {
    let key = match key {
        Some(key) => key.to_owned(),
        None => std::env::var(API_KEY_ENV)
            .with_context(|| format!("no API key: pass --key or set {API_KEY_ENV}"))?,
    };
    let mut config = LiveConfig::new(key);
    config.gateway = gateway;
    config.port = port;
    if reconnect {
        config.reconnect_policy = ReconnectPolicy::reconnect();
    }
    LiveClient::new(config).context("cannot construct client")
}
