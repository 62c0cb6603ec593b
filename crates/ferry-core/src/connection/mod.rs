//! Peer session management for Ferry.
//!
//! A [`Connection`] owns the TCP socket after connect or accept: it runs the
//! receive loop, serializes outbound frames from concurrently running
//! transfers onto the one socket, holds the live transfer map, and dispatches
//! inbound frames to transfer-lifecycle operations.
//!
//! The caller drives the connection through its command methods and observes
//! it through the [`ConnectionEvent`] channel handed back at construction;
//! the core makes no assumption about the caller's threading model.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex as SyncMutex;
use socket2::{SockRef, TcpKeepalive};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::protocol::{self, Frame, MAX_CHUNK_SIZE};
use crate::transfer::{Transfer, TransferKind};
use crate::{DEFAULT_CHUNK_SIZE, DEFAULT_OUTPUT_DIR, DEFAULT_TRANSFER_PORT};

/// Configure TCP keep-alive on a socket.
///
/// This enables OS-level TCP keep-alive to prevent network equipment
/// (routers, firewalls, NAT) from closing idle connections while a transfer
/// sits queued or paused.
///
/// Configuration:
/// - Start probing after 10 seconds of idle time
/// - Send probes every 5 seconds
fn configure_tcp_keepalive(stream: &TcpStream) -> Result<()> {
    let socket_ref = SockRef::from(stream);

    let keepalive = TcpKeepalive::new()
        .with_time(Duration::from_secs(10))
        .with_interval(Duration::from_secs(5));

    socket_ref
        .set_tcp_keepalive(&keepalive)
        .map_err(|e| Error::Io(std::io::Error::other(e)))?;

    tracing::debug!("TCP keep-alive enabled on socket");
    Ok(())
}

/// Per-connection settings handed to [`Connection::connect`] and
/// [`Connection::accept`].
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    /// Directory inbound transfers are saved into
    pub output_dir: PathBuf,
    /// Upload chunk size in bytes
    pub chunk_size: usize,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl ConnectionSettings {
    /// Validate the settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the chunk size is zero or would not fit in one
    /// wire frame.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 || self.chunk_size > MAX_CHUNK_SIZE {
            return Err(Error::InvalidConfig {
                key: "chunk_size".to_string(),
                reason: format!("must be between 1 and {MAX_CHUNK_SIZE} bytes"),
            });
        }
        Ok(())
    }
}

/// Events published by a connection to its caller.
///
/// Transfer-carrying events hand out the same shared [`Transfer`] record the
/// connection uses, so the consumer reads live counters from it.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// A transfer was registered, locally (upload) or by the peer (download)
    Queued(Arc<Transfer>),
    /// A transfer's integer progress percentage increased
    ProgressChanged(Arc<Transfer>),
    /// A transfer was cancelled before completing
    Stopped(Arc<Transfer>),
    /// A transfer moved all of its bytes
    Complete(Arc<Transfer>),
    /// The connection closed; all transfer state has been discarded
    Disconnected,
}

/// One peer session: a TCP socket multiplexing any number of transfers.
///
/// Created on outbound connect or inbound accept, destroyed on any I/O
/// failure or explicit [`close`](Self::close); never reused afterward.
pub struct Connection {
    peer_addr: SocketAddr,
    settings: ConnectionSettings,
    /// Live transfers keyed by id. Mutated by the receive loop, command
    /// callers, and upload workers; all map access is behind this lock.
    transfers: SyncMutex<HashMap<u32, Arc<Transfer>>>,
    /// Write half of the socket. The mutex is the sole guarantee that frames
    /// from concurrently running transfers are never interleaved mid-frame.
    writer: AsyncMutex<Option<BufWriter<OwnedWriteHalf>>>,
    /// Read half, claimed once by [`run`](Self::run).
    reader: SyncMutex<Option<OwnedReadHalf>>,
    /// The single read buffer shared by every upload on this connection.
    /// Exactly one upload worker holds it at a time, serializing their disk
    /// reads and sends against each other to cap peak memory use.
    read_buffer: AsyncMutex<Vec<u8>>,
    closed: AtomicBool,
    shutdown: watch::Sender<bool>,
    events: mpsc::UnboundedSender<ConnectionEvent>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("peer_addr", &self.peer_addr)
            .field("transfers", &self.transfers.lock().len())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Open an outbound connection to a peer.
    ///
    /// Returns the connection and the event channel the caller consumes.
    /// Connect failures are reported as the returned error; the connection
    /// never retries on its own.
    ///
    /// # Errors
    ///
    /// Returns an error if the settings are invalid or the connect fails.
    pub async fn connect(
        addr: SocketAddr,
        settings: ConnectionSettings,
    ) -> Result<(Arc<Self>, mpsc::UnboundedReceiver<ConnectionEvent>)> {
        settings.validate()?;
        let stream = TcpStream::connect(addr).await?;
        tracing::info!(peer = %addr, "connected");
        Self::from_stream(stream, settings)
    }

    /// Wrap an inbound socket handed over by the
    /// [`Acceptor`](crate::acceptor::Acceptor).
    ///
    /// # Errors
    ///
    /// Returns an error if the settings are invalid or the socket is
    /// unusable.
    pub fn accept(
        stream: TcpStream,
        settings: ConnectionSettings,
    ) -> Result<(Arc<Self>, mpsc::UnboundedReceiver<ConnectionEvent>)> {
        settings.validate()?;
        Self::from_stream(stream, settings)
    }

    fn from_stream(
        stream: TcpStream,
        settings: ConnectionSettings,
    ) -> Result<(Arc<Self>, mpsc::UnboundedReceiver<ConnectionEvent>)> {
        configure_tcp_keepalive(&stream)?;
        let peer_addr = stream.peer_addr()?;
        let (read_half, write_half) = stream.into_split();

        let (events, events_rx) = mpsc::unbounded_channel();
        let (shutdown, _) = watch::channel(false);
        let chunk_size = settings.chunk_size;

        let connection = Arc::new(Self {
            peer_addr,
            settings,
            transfers: SyncMutex::new(HashMap::new()),
            writer: AsyncMutex::new(Some(BufWriter::new(write_half))),
            reader: SyncMutex::new(Some(read_half)),
            read_buffer: AsyncMutex::new(vec![0u8; chunk_size]),
            closed: AtomicBool::new(false),
            shutdown,
            events,
        });

        Ok((connection, events_rx))
    }

    /// Address of the remote peer.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Whether the connection has been closed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Look up a live transfer by id.
    pub fn transfer(&self, id: u32) -> Option<Arc<Transfer>> {
        self.transfers.lock().get(&id).cloned()
    }

    /// Snapshot of the live transfers.
    pub fn transfers(&self) -> Vec<Arc<Transfer>> {
        self.transfers.lock().values().cloned().collect()
    }

    /// Overall progress across all live transfers as a percentage.
    ///
    /// Computed as `floor(sum(progress) / count)`; returns 0 when no
    /// transfers are registered.
    pub fn overall_progress(&self) -> u8 {
        let transfers = self.transfers.lock();
        if transfers.is_empty() {
            return 0;
        }
        let sum: u64 = transfers.values().map(|t| u64::from(t.progress())).sum();
        (sum / transfers.len() as u64) as u8
    }

    /// Spawn the receive loop.
    ///
    /// Safe to call repeatedly: the read half is claimed by the first call
    /// and later calls return a task that exits immediately.
    pub fn run(self: &Arc<Self>) -> JoinHandle<()> {
        let connection = Arc::clone(self);
        tokio::spawn(async move {
            let Some(reader) = connection.reader.lock().take() else {
                return;
            };
            connection.receive_loop(reader).await;
        })
    }

    /// The continuous receive loop: read one frame, dispatch, re-arm.
    ///
    /// Any transport or protocol error is terminal for the connection: once
    /// a frame has been misread the stream's framing cannot be trusted.
    async fn receive_loop(self: &Arc<Self>, mut reader: OwnedReadHalf) {
        let mut shutdown = self.shutdown.subscribe();
        loop {
            let frame = tokio::select! {
                _ = shutdown.changed() => break,
                result = protocol::read_frame(&mut reader) => match result {
                    Ok(frame) => frame,
                    Err(e) => {
                        if !self.is_closed() {
                            tracing::debug!(peer = %self.peer_addr, "receive loop ended: {e}");
                        }
                        break;
                    }
                },
            };

            if let Err(e) = self.dispatch(frame).await {
                tracing::warn!(peer = %self.peer_addr, "protocol violation, closing: {e}");
                break;
            }
        }
        self.close().await;
    }

    async fn dispatch(self: &Arc<Self>, frame: Frame) -> Result<()> {
        match frame {
            Frame::Queue {
                id,
                filename,
                length,
            } => {
                self.handle_queue(id, &filename, length).await;
                Ok(())
            }
            Frame::Start { id } => {
                self.handle_start(id);
                Ok(())
            }
            Frame::Stop { id } => {
                self.handle_stop(id).await;
                Ok(())
            }
            Frame::Pause { id } => {
                if let Some(transfer) = self.transfer(id) {
                    let paused = transfer.toggle_pause();
                    tracing::debug!(id, paused, "pause toggled by peer");
                }
                Ok(())
            }
            Frame::Chunk { id, offset, data } => self.handle_chunk(id, offset, &data).await,
        }
    }

    /// Peer announced a file: create the download transfer.
    ///
    /// Failures here are local resource errors: nothing is registered, no
    /// event fires, and the connection stays up.
    async fn handle_queue(&self, id: u32, filename: &str, length: u64) {
        if self.transfer(id).is_some() {
            tracing::warn!(id, "queue for an already registered id, ignoring");
            return;
        }

        // Strip directory components so a hostile name cannot escape the
        // output directory.
        let Some(basename) = Path::new(filename).file_name() else {
            tracing::warn!(id, filename, "queue with unusable file name, ignoring");
            return;
        };
        let name = basename.to_string_lossy().into_owned();
        let save_path = self.settings.output_dir.join(basename);

        let transfer = match Transfer::download(id, save_path, name, length).await {
            Ok(transfer) => Arc::new(transfer),
            Err(e) => {
                tracing::warn!(id, filename, "failed to create download: {e}");
                return;
            }
        };

        if let Err(e) = self.register(Arc::clone(&transfer)) {
            tracing::warn!(id, "failed to register download: {e}");
            transfer.close().await;
            return;
        }

        tracing::info!(id, file = %transfer.filename(), length, "download queued");
        self.emit(ConnectionEvent::Queued(Arc::clone(&transfer)));

        // A zero-length file has no chunks to wait for.
        if length == 0 {
            if let Some(transfer) = self.remove(id) {
                transfer.close().await;
                self.emit(ConnectionEvent::Complete(transfer));
            }
        }
    }

    /// Peer is ready to receive: begin streaming an upload's chunks.
    fn handle_start(self: &Arc<Self>, id: u32) {
        let Some(transfer) = self.transfer(id) else {
            return;
        };
        if transfer.kind() != TransferKind::Upload || transfer.mark_started() {
            return;
        }

        let connection = Arc::clone(self);
        tokio::spawn(async move {
            connection.run_upload(transfer).await;
        });
    }

    /// Peer cancelled a transfer. Unknown ids are a no-op.
    async fn handle_stop(&self, id: u32) {
        let Some(transfer) = self.remove(id) else {
            return;
        };
        transfer.stop();
        transfer.close().await;
        tracing::info!(id, "transfer stopped by peer");
        self.emit(ConnectionEvent::Stopped(transfer));
    }

    /// Write one received chunk at the offset its frame carries.
    ///
    /// A chunk for an unregistered id means the peers disagree about live
    /// transfers; that is a protocol error and closes the connection.
    async fn handle_chunk(&self, id: u32, offset: u64, data: &[u8]) -> Result<()> {
        let transfer = self.transfer(id).ok_or(Error::TransferNotFound(id))?;

        transfer.write_chunk(offset, data).await?;

        if transfer.note_progress().is_some() {
            self.emit(ConnectionEvent::ProgressChanged(Arc::clone(&transfer)));
        }

        if transfer.progress() == 100 {
            if let Some(transfer) = self.remove(id) {
                transfer.close().await;
                tracing::info!(id, file = %transfer.filename(), "download complete");
                self.emit(ConnectionEvent::Complete(transfer));
            }
        }

        Ok(())
    }

    /// Queue a local file for upload.
    ///
    /// Registers the transfer under a fresh connection-unique id, announces
    /// it to the peer with a Queue frame, and emits
    /// [`ConnectionEvent::Queued`]. The peer answers with Start when it is
    /// ready to receive.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is closed, the file cannot be
    /// opened, or the announcement cannot be sent. No transfer is registered
    /// on failure.
    pub async fn queue_transfer(self: &Arc<Self>, path: &Path) -> Result<Arc<Transfer>> {
        if self.is_closed() {
            return Err(Error::ConnectionClosed);
        }

        let id = self.allocate_id();
        let transfer = Arc::new(Transfer::upload(id, path).await?);

        if let Err(e) = self.register(Arc::clone(&transfer)) {
            transfer.close().await;
            return Err(e);
        }

        let frame = Frame::Queue {
            id,
            filename: transfer.filename().to_owned(),
            length: transfer.length(),
        };
        if let Err(e) = self.send_frame(&frame).await {
            self.remove(id);
            transfer.close().await;
            return Err(e);
        }

        tracing::info!(id, file = %transfer.filename(), length = transfer.length(), "upload queued");
        self.emit(ConnectionEvent::Queued(Arc::clone(&transfer)));

        // The peer completes a zero-length transfer on receipt of the Queue
        // frame and never sends Start; mirror that here.
        if transfer.length() == 0 {
            if let Some(transfer) = self.remove(id) {
                transfer.close().await;
                self.emit(ConnectionEvent::Complete(transfer));
            }
        }

        Ok(transfer)
    }

    /// Tell the peer this side is ready to receive the given transfer.
    ///
    /// Meaningful for downloads: the remote upload side begins streaming
    /// chunks when it receives the Start frame.
    ///
    /// # Errors
    ///
    /// Returns an error if no such transfer is registered or the frame
    /// cannot be sent.
    pub async fn start_transfer(&self, id: u32) -> Result<()> {
        if self.transfer(id).is_none() {
            return Err(Error::TransferNotFound(id));
        }
        self.send_frame(&Frame::Start { id }).await
    }

    /// Cancel a transfer: stop its worker, notify the peer, close and remove
    /// the local record.
    ///
    /// An unknown or already removed id is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the Stop frame cannot be sent.
    pub async fn stop_transfer(&self, id: u32) -> Result<()> {
        let Some(transfer) = self.remove(id) else {
            return Ok(());
        };
        transfer.stop();

        let send_result = self.send_frame(&Frame::Stop { id }).await;

        transfer.close().await;
        tracing::info!(id, "transfer stopped");
        self.emit(ConnectionEvent::Stopped(transfer));

        send_result
    }

    /// Toggle a transfer's pause state and mirror it to the peer.
    ///
    /// Only the uploading side's chunk loop actually gates on its own paused
    /// flag; the frame keeps the remote record's flag in sync as advisory
    /// bookkeeping.
    ///
    /// # Errors
    ///
    /// Returns an error if no such transfer is registered or the frame
    /// cannot be sent.
    pub async fn pause_transfer(&self, id: u32) -> Result<()> {
        let transfer = self.transfer(id).ok_or(Error::TransferNotFound(id))?;
        let paused = transfer.toggle_pause();
        tracing::debug!(id, paused, "pause toggled");
        self.send_frame(&Frame::Pause { id }).await
    }

    /// Close the connection: stop every transfer, release their files, clear
    /// the map, shut the socket down, and emit
    /// [`ConnectionEvent::Disconnected`] exactly once. Idempotent.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.shutdown.send(true);

        let drained: Vec<Arc<Transfer>> = {
            let mut transfers = self.transfers.lock();
            transfers.drain().map(|(_, transfer)| transfer).collect()
        };
        for transfer in &drained {
            transfer.stop();
        }
        for transfer in drained {
            transfer.close().await;
        }

        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }

        tracing::info!(peer = %self.peer_addr, "disconnected");
        let _ = self.events.send(ConnectionEvent::Disconnected);
    }

    /// The upload chunk loop, run on its own task per active upload.
    async fn run_upload(self: Arc<Self>, transfer: Arc<Transfer>) {
        tracing::debug!(id = transfer.id(), file = %transfer.filename(), "upload started");
        let result = self.upload_loop(&transfer).await;

        let completed = transfer.is_complete();
        let removed = self.remove(transfer.id());
        transfer.close().await;

        match result {
            Ok(()) => {
                if let Some(transfer) = removed {
                    if completed {
                        tracing::info!(id = transfer.id(), file = %transfer.filename(), "upload complete");
                        self.emit(ConnectionEvent::Complete(transfer));
                    } else {
                        self.emit(ConnectionEvent::Stopped(transfer));
                    }
                }
            }
            Err(e) => {
                // Send failures have already torn the connection down.
                tracing::debug!(id = transfer.id(), "upload ended: {e}");
            }
        }
    }

    async fn upload_loop(&self, transfer: &Arc<Transfer>) -> Result<()> {
        loop {
            if !transfer.wait_until_runnable().await {
                return Ok(());
            }

            let offset = transfer.index();
            if offset >= transfer.length() {
                return Ok(());
            }

            {
                // The shared buffer is held across the send so concurrent
                // uploads serialize whole chunks, not partial reads.
                let mut buffer = self.read_buffer.lock().await;
                let read = transfer.read_chunk(&mut buffer).await?;
                if read == 0 {
                    return Ok(());
                }

                let frame = Frame::Chunk {
                    id: transfer.id(),
                    offset,
                    data: buffer[..read].to_vec(),
                };
                self.send_frame(&frame).await?;
                transfer.advance(read as u64);
            }

            if transfer.note_progress().is_some() {
                self.emit(ConnectionEvent::ProgressChanged(Arc::clone(transfer)));
            }

            tokio::task::yield_now().await;
        }
    }

    /// Send one frame, length-prefixed, as a single uninterleaved write.
    ///
    /// Any write failure closes the connection.
    async fn send_frame(&self, frame: &Frame) -> Result<()> {
        if self.is_closed() {
            return Err(Error::ConnectionClosed);
        }

        let result = {
            let mut guard = self.writer.lock().await;
            let Some(writer) = guard.as_mut() else {
                return Err(Error::ConnectionClosed);
            };
            protocol::write_frame(writer, frame).await
        };

        if let Err(e) = result {
            tracing::debug!(peer = %self.peer_addr, "send failed: {e}");
            self.close().await;
            return Err(e);
        }
        Ok(())
    }

    /// Generate an id not currently in the transfer map.
    ///
    /// Ids are random within one connection's lifetime; collisions across
    /// peers are structurally avoided because each side only locally
    /// originates upload ids while download ids are adopted from the peer.
    fn allocate_id(&self) -> u32 {
        let transfers = self.transfers.lock();
        loop {
            let id = rand::random::<u32>();
            if !transfers.contains_key(&id) {
                return id;
            }
        }
    }

    fn register(&self, transfer: Arc<Transfer>) -> Result<()> {
        match self.transfers.lock().entry(transfer.id()) {
            Entry::Occupied(_) => Err(Error::DuplicateTransfer(transfer.id())),
            Entry::Vacant(slot) => {
                slot.insert(transfer);
                Ok(())
            }
        }
    }

    fn remove(&self, id: u32) -> Option<Arc<Transfer>> {
        self.transfers.lock().remove(&id)
    }

    fn emit(&self, event: ConnectionEvent) {
        if !self.is_closed() {
            let _ = self.events.send(event);
        }
    }
}

/// Parse a peer address string into a `SocketAddr`.
///
/// Accepts formats:
/// - `IP` (e.g., `192.168.1.100`) - uses the default transfer port
/// - `IP:PORT` (e.g., `192.168.1.100:52775`)
/// - `[IPv6]` (e.g., `[::1]`) - uses the default transfer port
/// - `[IPv6]:PORT` (e.g., `[::1]:52775`)
///
/// # Errors
///
/// Returns an error if the address string cannot be parsed.
pub fn parse_peer_address(host: &str) -> Result<SocketAddr> {
    let host = host.trim();

    if let Ok(addr) = host.parse::<SocketAddr>() {
        return Ok(addr);
    }

    if host.starts_with('[') && host.ends_with(']') {
        let ip_str = &host[1..host.len() - 1];
        let ip: IpAddr = ip_str.parse().map_err(|_| {
            Error::InvalidInput(format!(
                "invalid peer address '{host}'; use IP or IP:PORT (e.g., 192.168.1.100:{DEFAULT_TRANSFER_PORT})"
            ))
        })?;
        return Ok(SocketAddr::new(ip, DEFAULT_TRANSFER_PORT));
    }

    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, DEFAULT_TRANSFER_PORT));
    }

    Err(Error::InvalidInput(format!(
        "invalid peer address '{host}'; use IP or IP:PORT (e.g., 192.168.1.100:{DEFAULT_TRANSFER_PORT})"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_peer_ipv4_only() {
        let addr = parse_peer_address("192.168.1.100").unwrap();
        assert_eq!(addr.ip().to_string(), "192.168.1.100");
        assert_eq!(addr.port(), DEFAULT_TRANSFER_PORT);
    }

    #[test]
    fn test_parse_peer_ipv4_with_port() {
        let addr = parse_peer_address("192.168.1.100:52775").unwrap();
        assert_eq!(addr.port(), 52775);
    }

    #[test]
    fn test_parse_peer_ipv6_brackets() {
        let addr = parse_peer_address("[::1]").unwrap();
        assert_eq!(addr.ip().to_string(), "::1");
        assert_eq!(addr.port(), DEFAULT_TRANSFER_PORT);
    }

    #[test]
    fn test_parse_peer_ipv6_with_port() {
        let addr = parse_peer_address("[::1]:52775").unwrap();
        assert_eq!(addr.ip().to_string(), "::1");
        assert_eq!(addr.port(), 52775);
    }

    #[test]
    fn test_parse_peer_whitespace() {
        let addr = parse_peer_address("  127.0.0.1  ").unwrap();
        assert_eq!(addr.ip().to_string(), "127.0.0.1");
    }

    #[test]
    fn test_parse_peer_invalid() {
        assert!(parse_peer_address("not-an-ip").is_err());
        assert!(parse_peer_address("192.168.1.100:abc").is_err());
        assert!(parse_peer_address("192.168.1.256").is_err());
    }

    use tempfile::TempDir;

    async fn loopback_connection() -> (
        Arc<Connection>,
        mpsc::UnboundedReceiver<ConnectionEvent>,
        TcpStream,
    ) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let client = TcpStream::connect(addr).await.expect("connect");
        let (stream, _) = listener.accept().await.expect("accept");
        let (connection, events) =
            Connection::accept(stream, ConnectionSettings::default()).expect("wrap socket");
        (connection, events, client)
    }

    #[tokio::test]
    async fn test_overall_progress_floors_sum() {
        let (connection, _events, _peer) = loopback_connection().await;
        assert_eq!(connection.overall_progress(), 0, "no transfers yields 0");

        let temp_dir = TempDir::new().expect("temp dir");
        let first = Arc::new(
            Transfer::download(1, temp_dir.path().join("a.bin"), "a.bin".to_string(), 100)
                .await
                .expect("download a"),
        );
        let second = Arc::new(
            Transfer::download(2, temp_dir.path().join("b.bin"), "b.bin".to_string(), 100)
                .await
                .expect("download b"),
        );
        connection.register(Arc::clone(&first)).expect("register a");
        connection.register(Arc::clone(&second)).expect("register b");

        first.write_chunk(0, &[0u8; 75]).await.expect("chunk");
        // (75 + 0) / 2 = 37.5, floored
        assert_eq!(connection.overall_progress(), 37);

        first.write_chunk(75, &[0u8; 25]).await.expect("chunk");
        second.write_chunk(0, &[0u8; 100]).await.expect("chunk");
        assert_eq!(connection.overall_progress(), 100);
    }

    #[tokio::test]
    async fn test_register_duplicate_id_rejected() {
        let (connection, _events, _peer) = loopback_connection().await;

        let temp_dir = TempDir::new().expect("temp dir");
        let first = Arc::new(
            Transfer::download(7, temp_dir.path().join("a.bin"), "a.bin".to_string(), 10)
                .await
                .expect("download a"),
        );
        let duplicate = Arc::new(
            Transfer::download(7, temp_dir.path().join("b.bin"), "b.bin".to_string(), 10)
                .await
                .expect("download b"),
        );

        connection.register(first).expect("register");
        assert!(matches!(
            connection.register(duplicate),
            Err(Error::DuplicateTransfer(7))
        ));
    }

    #[test]
    fn test_settings_validate() {
        assert!(ConnectionSettings::default().validate().is_ok());

        let zero = ConnectionSettings {
            chunk_size: 0,
            ..Default::default()
        };
        assert!(zero.validate().is_err());

        let oversized = ConnectionSettings {
            chunk_size: MAX_CHUNK_SIZE + 1,
            ..Default::default()
        };
        assert!(oversized.validate().is_err());
    }
}
