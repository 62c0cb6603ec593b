//! Per-file transfer state for Ferry.
//!
//! A [`Transfer`] is the stateful record of one file moving in one
//! direction: the file handle, byte counters, integer progress, and the
//! pause/stop control the upload chunk loop gates on.
//!
//! Uploads read an existing file; downloads create the destination file
//! pre-sized to the announced length so offset-addressed chunk writes never
//! extend a sparse file unpredictably. A transfer holds at most one open
//! file handle, released exactly once when the transfer closes.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};

use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt, SeekFrom};
use tokio::sync::{watch, Mutex};

use crate::error::{Error, Result};

/// Transfer direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferKind {
    /// Sending a local file to the peer
    Upload,
    /// Receiving a file announced by the peer
    Download,
}

/// Cooperative control state observed by the upload chunk loop.
///
/// `running = false` is terminal intent: the loop exits at its next check,
/// including while blocked on pause. `paused` gates the loop without
/// terminating it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Control {
    running: bool,
    paused: bool,
}

/// The stateful record of one file transfer, upload or download.
pub struct Transfer {
    id: u32,
    kind: TransferKind,
    filename: String,
    length: u64,
    transferred: AtomicU64,
    /// Next read position (upload) or last write position used (download).
    index: AtomicU64,
    /// Last integer percentage reported, to suppress duplicate progress
    /// notifications when integer division lands on the same value.
    last_progress: AtomicU8,
    started: AtomicBool,
    closed: AtomicBool,
    control: watch::Sender<Control>,
    file: Mutex<Option<File>>,
}

impl std::fmt::Debug for Transfer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transfer")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("filename", &self.filename)
            .field("length", &self.length)
            .field("transferred", &self.transferred())
            .field("progress", &self.progress())
            .finish_non_exhaustive()
    }
}

impl Transfer {
    fn new(id: u32, kind: TransferKind, filename: String, length: u64, file: File) -> Self {
        let (control, _) = watch::channel(Control {
            running: true,
            paused: false,
        });
        Self {
            id,
            kind,
            filename,
            length,
            transferred: AtomicU64::new(0),
            index: AtomicU64::new(0),
            last_progress: AtomicU8::new(0),
            started: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            control,
            file: Mutex::new(Some(file)),
        }
    }

    /// Create an upload transfer from a local file.
    ///
    /// The file name sent to the peer is the path's final component only.
    ///
    /// # Errors
    ///
    /// Returns an error if the path has no usable file name or the file
    /// cannot be opened.
    pub(crate) async fn upload(id: u32, path: &Path) -> Result<Self> {
        let filename = path
            .file_name()
            .ok_or_else(|| Error::InvalidFilename(path.display().to_string()))?
            .to_string_lossy()
            .into_owned();

        let file = File::open(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::FileNotFound(path.display().to_string())
            } else {
                Error::Io(e)
            }
        })?;
        let length = file.metadata().await?.len();

        Ok(Self::new(id, TransferKind::Upload, filename, length, file))
    }

    /// Create a download transfer writing to `save_path`.
    ///
    /// The destination file is created and pre-sized to `length` so that
    /// chunks can be written at the offset each frame carries, in any order.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created.
    pub(crate) async fn download(
        id: u32,
        save_path: PathBuf,
        filename: String,
        length: u64,
    ) -> Result<Self> {
        if let Some(parent) = save_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let file = File::create(&save_path).await?;
        file.set_len(length).await?;

        Ok(Self::new(id, TransferKind::Download, filename, length, file))
    }

    /// Transfer id, unique within the connection's lifetime.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Transfer direction.
    pub fn kind(&self) -> TransferKind {
        self.kind
    }

    /// Display/save name of the file (final path component only).
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Total byte size of the file, known at creation.
    pub fn length(&self) -> u64 {
        self.length
    }

    /// Cumulative bytes moved so far.
    pub fn transferred(&self) -> u64 {
        self.transferred.load(Ordering::Acquire)
    }

    /// Next read position (upload) or last write position used (download).
    pub fn index(&self) -> u64 {
        self.index.load(Ordering::Acquire)
    }

    /// Integer progress percentage, `floor(transferred * 100 / length)`,
    /// capped at 100.
    ///
    /// A zero-length transfer is defined as immediately complete.
    pub fn progress(&self) -> u8 {
        if self.length == 0 {
            return 100;
        }
        let pct = self.transferred() * 100 / self.length;
        pct.min(100) as u8
    }

    /// Whether all bytes have been moved.
    pub fn is_complete(&self) -> bool {
        self.transferred() >= self.length
    }

    /// Whether the transfer has been asked to stop or has finished.
    pub fn is_running(&self) -> bool {
        self.control.borrow().running
    }

    /// Whether the transfer is currently paused.
    pub fn is_paused(&self) -> bool {
        self.control.borrow().paused
    }

    /// Whether the transfer has been closed and its file handle released.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Record that the progress percentage changed, returning the new value
    /// only when it strictly increased since the last report.
    pub(crate) fn note_progress(&self) -> Option<u8> {
        let progress = self.progress();
        if progress > self.last_progress.load(Ordering::Acquire) {
            self.last_progress.store(progress, Ordering::Release);
            Some(progress)
        } else {
            None
        }
    }

    /// Flip the paused flag and wake the chunk loop. Returns the new state.
    pub(crate) fn toggle_pause(&self) -> bool {
        let mut paused = false;
        self.control.send_modify(|c| {
            c.paused = !c.paused;
            paused = c.paused;
        });
        paused
    }

    /// Request the chunk loop to exit, waking it if blocked on pause.
    pub(crate) fn stop(&self) {
        self.control.send_modify(|c| c.running = false);
    }

    /// Mark the upload worker as spawned. Returns `true` if it already was.
    pub(crate) fn mark_started(&self) -> bool {
        self.started.swap(true, Ordering::AcqRel)
    }

    /// Block until the transfer is runnable: not paused and still running.
    ///
    /// Returns `false` when the transfer was stopped, including while the
    /// wait was blocked on pause; the stop signal always wakes this wait.
    pub(crate) async fn wait_until_runnable(&self) -> bool {
        let mut control = self.control.subscribe();
        loop {
            let state = *control.borrow_and_update();
            if !state.running {
                return false;
            }
            if !state.paused {
                return true;
            }
            if control.changed().await.is_err() {
                return false;
            }
        }
    }

    /// Read the next chunk of an upload into `buf`, seeking to the current
    /// read index first. Returns the number of bytes read (0 at EOF).
    pub(crate) async fn read_chunk(&self, buf: &mut [u8]) -> Result<usize> {
        let offset = self.index.load(Ordering::Acquire);
        let mut guard = self.file.lock().await;
        let file = guard.as_mut().ok_or(Error::TransferClosed(self.id))?;
        file.seek(SeekFrom::Start(offset)).await?;
        let read = file.read(buf).await?;
        Ok(read)
    }

    /// Advance the upload cursor after a chunk has been sent.
    pub(crate) fn advance(&self, bytes: u64) {
        self.index.fetch_add(bytes, Ordering::AcqRel);
        self.transferred.fetch_add(bytes, Ordering::AcqRel);
    }

    /// Write a received chunk at the offset its frame carried.
    ///
    /// Writes are offset-addressed, not stream-addressed: chunks land where
    /// their frame says, so reordered delivery stays correct. Each write
    /// adds to `transferred`; a duplicate offset from a misbehaving peer is
    /// counted again rather than detected.
    pub(crate) async fn write_chunk(&self, offset: u64, data: &[u8]) -> Result<()> {
        let mut guard = self.file.lock().await;
        let file = guard.as_mut().ok_or(Error::TransferClosed(self.id))?;
        file.seek(SeekFrom::Start(offset)).await?;
        file.write_all(data).await?;
        drop(guard);

        self.index.store(offset, Ordering::Release);
        self.transferred.fetch_add(data.len() as u64, Ordering::AcqRel);
        Ok(())
    }

    /// Release the file handle and stop the chunk loop. Idempotent.
    pub(crate) async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.stop();

        let mut guard = self.file.lock().await;
        if let Some(file) = guard.take() {
            if self.kind == TransferKind::Download {
                if let Err(e) = file.sync_all().await {
                    tracing::warn!(id = self.id, "failed to flush download file: {e}");
                }
            }
        }
        tracing::debug!(id = self.id, kind = ?self.kind, "transfer closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn upload_fixture(content: &[u8]) -> (TempDir, Transfer) {
        let temp_dir = TempDir::new().expect("create temp dir");
        let path = temp_dir.path().join("source.bin");
        std::fs::write(&path, content).expect("write file");
        let transfer = Transfer::upload(1, &path).await.expect("create upload");
        (temp_dir, transfer)
    }

    #[tokio::test]
    async fn test_upload_captures_length_and_basename() {
        let (_dir, transfer) = upload_fixture(&[0u8; 1234]).await;
        assert_eq!(transfer.length(), 1234);
        assert_eq!(transfer.filename(), "source.bin");
        assert_eq!(transfer.kind(), TransferKind::Upload);
        assert_eq!(transfer.progress(), 0);
    }

    #[tokio::test]
    async fn test_upload_missing_file() {
        match Transfer::upload(1, Path::new("/no/such/file.bin")).await {
            Err(Error::FileNotFound(_)) => {}
            other => panic!("expected FileNotFound, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_download_preallocates_file() {
        let temp_dir = TempDir::new().expect("create temp dir");
        let path = temp_dir.path().join("incoming.bin");
        let transfer = Transfer::download(9, path.clone(), "incoming.bin".to_string(), 4096)
            .await
            .expect("create download");

        let meta = std::fs::metadata(&path).expect("stat file");
        assert_eq!(meta.len(), 4096);
        assert_eq!(transfer.length(), 4096);
        transfer.close().await;
    }

    #[tokio::test]
    async fn test_out_of_order_chunk_writes() {
        let temp_dir = TempDir::new().expect("create temp dir");
        let path = temp_dir.path().join("incoming.bin");
        let transfer = Transfer::download(2, path.clone(), "incoming.bin".to_string(), 10)
            .await
            .expect("create download");

        // Later chunk lands first; both end up at their own offsets.
        transfer.write_chunk(5, b"WORLD").await.expect("write tail");
        transfer.write_chunk(0, b"HELLO").await.expect("write head");
        transfer.close().await;

        let content = std::fs::read(&path).expect("read file");
        assert_eq!(&content, b"HELLOWORLD");
        assert_eq!(transfer.transferred(), 10);
        assert_eq!(transfer.progress(), 100);
        assert!(transfer.is_complete());
    }

    #[tokio::test]
    async fn test_progress_is_floored_and_monotonic() {
        let temp_dir = TempDir::new().expect("create temp dir");
        let path = temp_dir.path().join("incoming.bin");
        let transfer = Transfer::download(3, path, "incoming.bin".to_string(), 20_000)
            .await
            .expect("create download");

        transfer
            .write_chunk(0, &vec![0u8; 8175])
            .await
            .expect("chunk 1");
        // 8175 * 100 / 20000 = 40.875 -> 40
        assert_eq!(transfer.progress(), 40);
        assert_eq!(transfer.note_progress(), Some(40));
        assert_eq!(transfer.note_progress(), None);

        transfer
            .write_chunk(8175, &vec![0u8; 8175])
            .await
            .expect("chunk 2");
        // 16350 * 100 / 20000 = 81.75 -> 81
        assert_eq!(transfer.progress(), 81);
        assert_eq!(transfer.note_progress(), Some(81));

        transfer
            .write_chunk(16_350, &vec![0u8; 3650])
            .await
            .expect("chunk 3");
        assert_eq!(transfer.progress(), 100);
        assert_eq!(transfer.note_progress(), Some(100));
        transfer.close().await;
    }

    #[tokio::test]
    async fn test_zero_length_is_immediately_complete() {
        let (_dir, transfer) = upload_fixture(&[]).await;
        assert_eq!(transfer.length(), 0);
        assert_eq!(transfer.progress(), 100);
        assert!(transfer.is_complete());
    }

    #[tokio::test]
    async fn test_stop_wakes_paused_wait() {
        let (_dir, transfer) = upload_fixture(&[0u8; 64]).await;
        let transfer = std::sync::Arc::new(transfer);

        transfer.toggle_pause();
        assert!(transfer.is_paused());

        let waiter = {
            let transfer = std::sync::Arc::clone(&transfer);
            tokio::spawn(async move { transfer.wait_until_runnable().await })
        };

        transfer.stop();

        let runnable = tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .expect("wait must not hang on pause")
            .expect("waiter task");
        assert!(!runnable, "stopped transfer must report not runnable");
    }

    #[tokio::test]
    async fn test_pause_toggle_resumes_wait() {
        let (_dir, transfer) = upload_fixture(&[0u8; 64]).await;
        let transfer = std::sync::Arc::new(transfer);

        transfer.toggle_pause();
        let waiter = {
            let transfer = std::sync::Arc::clone(&transfer);
            tokio::spawn(async move { transfer.wait_until_runnable().await })
        };

        transfer.toggle_pause();
        let runnable = tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .expect("wait must wake on unpause")
            .expect("waiter task");
        assert!(runnable);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (_dir, transfer) = upload_fixture(b"data").await;
        transfer.close().await;
        transfer.close().await;
        assert!(transfer.is_closed());
        assert!(matches!(
            transfer.read_chunk(&mut [0u8; 8]).await,
            Err(Error::TransferClosed(1))
        ));
    }
}
