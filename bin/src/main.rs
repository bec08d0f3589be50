//! humboldt CLI - live market-data streaming client.

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use humboldt_lib::DEFAULT_GATEWAY_PORT;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod display;

use display::Format;

#[derive(Parser)]
#[command(name = "humboldt")]
#[command(about = "Live market-data streaming client", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// API key. Defaults to the HUMBOLDT_API_KEY environment variable.
    #[arg(short, long, global = true)]
    key: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Stream live records to stdout
    Listen {
        /// Dataset identifier (e.g. XNAS.BASIC)
        dataset: String,

        /// Symbols to subscribe to
        #[arg(required = true)]
        symbols: Vec<String>,

        /// Record schema (trades, ohlcv-1s, ohlcv-1m, status)
        #[arg(short, long, default_value = "trades")]
        schema: String,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: Format,

        /// Gateway host override. Defaults to the dataset's gateway.
        #[arg(long)]
        gateway: Option<String>,

        /// Gateway port
        #[arg(long, default_value_t = DEFAULT_GATEWAY_PORT)]
        port: u16,

        /// Replay start point, UNIX nanoseconds
        #[arg(long)]
        start: Option<i64>,

        /// Reconnect automatically when the connection drops
        #[arg(long)]
        reconnect: bool,

        /// Stop after this many records
        #[arg(short, long)]
        limit: Option<u64>,
    },

    /// Record a live session to a file
    Record {
        /// Dataset identifier (e.g. XNAS.BASIC)
        dataset: String,

        /// Symbols to subscribe to
        #[arg(required = true)]
        symbols: Vec<String>,

        /// Record schema (trades, ohlcv-1s, ohlcv-1m, status)
        #[arg(short, long, default_value = "trades")]
        schema: String,

        /// Output file path. Defaults to <dataset>.hmb
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Gateway host override. Defaults to the dataset's gateway.
        #[arg(long)]
        gateway: Option<String>,

        /// Gateway port
        #[arg(long, default_value_t = DEFAULT_GATEWAY_PORT)]
        port: u16,

        /// Reconnect automatically when the connection drops
        #[arg(long)]
        reconnect: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    // Show help if no command provided
    let Some(command) = cli.command else {
        Cli::command().print_help()?;
        return Ok(());
    };

    match command {
        Commands::Listen {
            dataset,
            symbols,
            schema,
            format,
            gateway,
            port,
            start,
            reconnect,
            limit,
        } => {
            commands::listen::listen(
                &dataset,
                symbols,
                &schema,
                format,
                gateway,
                port,
                start,
                reconnect,
                limit,
                cli.key.as_deref(),
            )
            .await
        }
        Commands::Record {
            dataset,
            symbols,
            schema,
            output,
            gateway,
            port,
            reconnect,
        } => {
            commands::record::record(
                &dataset,
                symbols,
                &schema,
                output,
                gateway,
                port,
                reconnect,
                cli.key.as_deref(),
            )
            .await
        }
    }
}

/// Initializes tracing on stderr, keeping stdout for record output.
fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("humboldt={level},humboldt_live={level},humboldt_codec={level}").into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
