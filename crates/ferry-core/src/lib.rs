//! # Ferry Core Library
//!
//! `ferry-core` is the engine behind Ferry, a peer-to-peer file transfer
//! tool. Two endpoints exchange files over a single TCP connection using a
//! private length-prefixed binary protocol that multiplexes any number of
//! concurrent uploads and downloads, with per-transfer pause/resume and
//! progress reporting.
//!
//! ## Modules
//!
//! - [`acceptor`] - TCP listener that hands accepted peers to the caller
//! - [`config`] - Configuration management
//! - [`connection`] - Peer session: receive loop, frame dispatch, commands
//! - [`error`] - Error types
//! - [`protocol`] - Wire protocol (framing and field codec)
//! - [`transfer`] - Per-file transfer state and the upload chunk loop
//!
//! ## Example
//!
//! ```rust,ignore
//! use ferry_core::{Acceptor, Connection, ConnectionSettings};
//!
//! // Receiving side
//! let (acceptor, mut incoming) = Acceptor::new();
//! acceptor.start(52770).await?;
//! let peer = incoming.recv().await.unwrap();
//! acceptor.stop();
//! let (conn, mut events) = Connection::accept(peer.stream, ConnectionSettings::default())?;
//! conn.run();
//!
//! // Sending side
//! let (conn, mut events) =
//!     Connection::connect("192.168.1.20:52770".parse()?, ConnectionSettings::default()).await?;
//! conn.run();
//! let transfer = conn.queue_transfer("video.mkv".as_ref()).await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::cast_possible_truncation)]

pub mod acceptor;
pub mod config;
pub mod connection;
pub mod error;
pub mod protocol;
pub mod transfer;

pub use acceptor::{Accepted, Acceptor};
pub use connection::{Connection, ConnectionEvent, ConnectionSettings};
pub use error::{Error, Result};
pub use transfer::{Transfer, TransferKind};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default transfer port (TCP)
pub const DEFAULT_TRANSFER_PORT: u16 = 52770;

/// Default output directory for received files
pub const DEFAULT_OUTPUT_DIR: &str = "Transfers";

/// Default upload chunk size in bytes.
///
/// Sized so that a full chunk frame payload (1-byte header, 4-byte id,
/// 8-byte offset, 4-byte size, data) is exactly 8 KiB on the wire.
pub const DEFAULT_CHUNK_SIZE: usize = 8175;
