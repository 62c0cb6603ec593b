//! Ferry CLI - peer-to-peer file transfer over a single TCP connection
//!
//! One side waits for a peer, the other connects and sends; any number of
//! files move concurrently over the single connection.
//!
//! ## Quick Start
//!
//! ```bash
//! # Receive files
//! ferry serve --output ./incoming
//!
//! # Send files (on the other device)
//! ferry send 192.168.1.20 ./document.pdf ./photo.jpg
//! ```

#![allow(clippy::doc_markdown)]
#![allow(clippy::uninlined_format_args)]

use anyhow::Result;
use clap::Parser;

mod commands;

use commands::{Cli, Command};

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve(args) => commands::serve::run(args).await,
        Command::Send(args) => commands::send::run(args).await,
    }
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,ferry=info,ferry_core=info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).without_time())
        .with(filter)
        .init();
}
