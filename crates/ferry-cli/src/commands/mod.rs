//! CLI command definitions and handlers.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Load configuration with graceful fallback to defaults.
///
/// If the config file doesn't exist or can't be parsed, commands fall back
/// to the built-in defaults rather than refusing to run.
pub fn load_config() -> ferry_core::config::Config {
    ferry_core::config::Config::load().unwrap_or_default()
}

pub mod send;
pub mod serve;

/// Ferry - peer-to-peer file transfer over a single TCP connection
#[derive(Parser)]
#[command(name = "ferry")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand)]
pub enum Command {
    /// Wait for a peer and receive its files
    Serve(ServeArgs),

    /// Connect to a peer and send files
    Send(SendArgs),
}

/// Arguments for the serve command.
#[derive(clap::Args)]
pub struct ServeArgs {
    /// Port to listen on (defaults to the configured port)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Directory received files are saved into
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

/// Arguments for the send command.
#[derive(clap::Args)]
pub struct SendArgs {
    /// Peer address (IP or IP:PORT)
    pub host: String,

    /// Files to send
    #[arg(required = true)]
    pub files: Vec<PathBuf>,
}
