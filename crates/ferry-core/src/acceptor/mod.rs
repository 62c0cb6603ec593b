//! TCP acceptor for inbound peer connections.
//!
//! The [`Acceptor`] listens on a port and hands each accepted socket to the
//! caller over a channel; the caller decides what to do with it (typically
//! wrap it in a [`Connection`](crate::connection::Connection) and stop the
//! acceptor, keeping the session single-peer by convention). The component
//! itself keeps accepting until stopped and supports being stopped and
//! restarted any number of times.

use std::net::SocketAddr;

use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::Result;

/// An accepted inbound peer.
#[derive(Debug)]
pub struct Accepted {
    /// The accepted socket
    pub stream: TcpStream,
    /// Address of the remote peer
    pub addr: SocketAddr,
}

struct Listening {
    task: JoinHandle<()>,
    local_addr: SocketAddr,
}

/// Asynchronous TCP listener publishing accepted peers to a channel.
pub struct Acceptor {
    events: mpsc::UnboundedSender<Accepted>,
    listening: Mutex<Option<Listening>>,
}

impl Acceptor {
    /// Create an acceptor and the channel its accepted peers arrive on.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Accepted>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        (
            Self {
                events,
                listening: Mutex::new(None),
            },
            events_rx,
        )
    }

    /// Bind the listening socket and begin accepting.
    ///
    /// Idempotent: calling while already running is a no-op. Port 0 binds an
    /// ephemeral port, readable via [`local_addr`](Self::local_addr).
    ///
    /// # Errors
    ///
    /// Returns an error if the bind fails.
    pub async fn start(&self, port: u16) -> Result<()> {
        if self.listening.lock().is_some() {
            return Ok(());
        }

        let listener = TcpListener::bind(("0.0.0.0", port)).await?;
        let local_addr = listener.local_addr()?;

        let events = self.events.clone();
        let task = tokio::spawn(accept_loop(listener, events));

        let mut guard = self.listening.lock();
        if guard.is_some() {
            // Lost a start/start race; the earlier listener wins.
            task.abort();
            return Ok(());
        }
        *guard = Some(Listening { task, local_addr });
        drop(guard);

        tracing::info!(%local_addr, "listening for peers");
        Ok(())
    }

    /// Close the listening socket. Idempotent.
    pub fn stop(&self) {
        if let Some(listening) = self.listening.lock().take() {
            listening.task.abort();
            tracing::info!("listener stopped");
        }
    }

    /// Whether the acceptor is currently listening.
    pub fn is_running(&self) -> bool {
        self.listening.lock().is_some()
    }

    /// The bound local address, if listening.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listening.lock().as_ref().map(|l| l.local_addr)
    }
}

impl Drop for Acceptor {
    fn drop(&mut self) {
        if let Some(listening) = self.listening.lock().take() {
            listening.task.abort();
        }
    }
}

/// Accept peers until aborted.
///
/// A failed accept is transient: it is logged and the loop immediately
/// re-arms, so the listener survives bursts of bad handshakes.
async fn accept_loop(listener: TcpListener, events: mpsc::UnboundedSender<Accepted>) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                tracing::info!(%addr, "accepted peer");
                if events.send(Accepted { stream, addr }).is_err() {
                    // Nobody is listening for peers any more.
                    break;
                }
            }
            Err(e) => {
                tracing::warn!("accept failed: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let (acceptor, _rx) = Acceptor::new();
        acceptor.start(0).await.expect("start");
        let addr = acceptor.local_addr().expect("bound");

        acceptor.start(0).await.expect("second start is a no-op");
        assert_eq!(acceptor.local_addr(), Some(addr));
        acceptor.stop();
    }

    #[tokio::test]
    async fn test_stop_is_idempotent_and_restartable() {
        let (acceptor, _rx) = Acceptor::new();
        acceptor.stop();
        assert!(!acceptor.is_running());

        acceptor.start(0).await.expect("start");
        assert!(acceptor.is_running());
        acceptor.stop();
        acceptor.stop();
        assert!(!acceptor.is_running());

        acceptor.start(0).await.expect("restart");
        assert!(acceptor.is_running());
        acceptor.stop();
    }

    #[tokio::test]
    async fn test_accepted_peer_is_delivered() {
        let (acceptor, mut incoming) = Acceptor::new();
        acceptor.start(0).await.expect("start");
        let addr = acceptor.local_addr().expect("bound");

        let client = TcpStream::connect(("127.0.0.1", addr.port()))
            .await
            .expect("connect");
        let local = client.local_addr().expect("local addr");

        let accepted = tokio::time::timeout(std::time::Duration::from_secs(5), incoming.recv())
            .await
            .expect("accept within timeout")
            .expect("channel open");
        assert_eq!(accepted.addr, local);
        acceptor.stop();
    }

    #[tokio::test]
    async fn test_keeps_accepting_after_first_peer() {
        let (acceptor, mut incoming) = Acceptor::new();
        acceptor.start(0).await.expect("start");
        let port = acceptor.local_addr().expect("bound").port();

        let _first = TcpStream::connect(("127.0.0.1", port)).await.expect("first");
        let _second = TcpStream::connect(("127.0.0.1", port))
            .await
            .expect("second");

        for _ in 0..2 {
            tokio::time::timeout(std::time::Duration::from_secs(5), incoming.recv())
                .await
                .expect("accept within timeout")
                .expect("channel open");
        }
        acceptor.stop();
    }
}
