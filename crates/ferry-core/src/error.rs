//! Error types for Ferry.
//!
//! This module provides a unified error type for all Ferry operations,
//! with specific error variants for different failure modes.

use std::io;

use thiserror::Error;

/// A specialized `Result` type for Ferry operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for Ferry.
#[derive(Error, Debug)]
pub enum Error {
    /// The connection has been closed; no further commands are accepted
    #[error("connection closed")]
    ConnectionClosed,

    /// Invalid protocol message
    #[error("invalid protocol message: {0}")]
    Protocol(String),

    /// Frame header byte outside the known set
    #[error("unknown frame header: {0:#04x}")]
    UnknownHeader(u8),

    /// Frame payload exceeds the wire limit
    #[error("frame payload too large: {size} bytes (limit {limit})")]
    PayloadTooLarge {
        /// Declared payload size
        size: usize,
        /// Maximum accepted payload size
        limit: usize,
    },

    /// No transfer registered under the given id
    #[error("no transfer with id {0}")]
    TransferNotFound(u32),

    /// A transfer with the given id is already registered
    #[error("transfer id {0} already registered")]
    DuplicateTransfer(u32),

    /// The transfer has been closed and its file handle released
    #[error("transfer {0} is closed")]
    TransferClosed(u32),

    /// A file name with no usable final component
    #[error("invalid file name: {0}")]
    InvalidFilename(String),

    /// File not found
    #[error("file not found: {0}")]
    FileNotFound(String),

    /// Configuration file error
    #[error("configuration error: {0}")]
    Config(String),

    /// Invalid configuration value
    #[error("invalid configuration value for '{key}': {reason}")]
    InvalidConfig {
        /// Configuration key
        key: String,
        /// Reason for invalidity
        reason: String,
    },

    /// Invalid caller-supplied input
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Returns whether this error is terminal for the connection that
    /// produced it.
    ///
    /// Transport and framing errors poison the stream: once a frame has been
    /// misread, subsequent bytes cannot be trusted. Resource errors only fail
    /// the operation that triggered them.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::ConnectionClosed
                | Self::Protocol(_)
                | Self::UnknownHeader(_)
                | Self::PayloadTooLarge { .. }
                | Self::Io(_)
        )
    }
}
