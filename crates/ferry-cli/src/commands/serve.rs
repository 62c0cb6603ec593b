//! Serve command implementation.
//!
//! Listens for one inbound peer, adopts its connection, and receives every
//! file the peer queues. The acceptor is stopped as soon as the first peer
//! arrives, keeping the session single-peer.

use anyhow::{bail, Context, Result};

use ferry_core::transfer::TransferKind;
use ferry_core::{Acceptor, Connection, ConnectionEvent};

use super::ServeArgs;

/// Run the serve command.
pub async fn run(args: ServeArgs) -> Result<()> {
    let config = super::load_config();
    let port = args.port.unwrap_or(config.network.port);
    let mut settings = config.connection_settings();
    if let Some(output) = args.output {
        settings.output_dir = output;
    }

    let (acceptor, mut incoming) = Acceptor::new();
    acceptor
        .start(port)
        .await
        .with_context(|| format!("failed to listen on port {port}"))?;
    if let Some(addr) = acceptor.local_addr() {
        println!(
            "Listening on {} (saving into {})",
            addr,
            settings.output_dir.display()
        );
    }

    let Some(peer) = incoming.recv().await else {
        bail!("listener closed before a peer connected");
    };
    acceptor.stop();
    println!("Peer connected from {}", peer.addr);

    let (connection, mut events) =
        Connection::accept(peer.stream, settings).context("failed to adopt peer connection")?;
    connection.run();

    while let Some(event) = events.recv().await {
        match event {
            ConnectionEvent::Queued(transfer) => {
                println!(
                    "Queued {} ({} bytes)",
                    transfer.filename(),
                    transfer.length()
                );
                // Zero-length transfers complete on arrival and are already
                // gone from the live map; everything else gets a Start.
                if transfer.kind() == TransferKind::Download
                    && connection.transfer(transfer.id()).is_some()
                {
                    if let Err(e) = connection.start_transfer(transfer.id()).await {
                        tracing::warn!("failed to start transfer: {e}");
                    }
                }
            }
            ConnectionEvent::ProgressChanged(transfer) => {
                let progress = transfer.progress();
                if progress % 10 == 0 {
                    println!("  {} {}%", transfer.filename(), progress);
                }
            }
            ConnectionEvent::Stopped(transfer) => {
                println!("Stopped {}", transfer.filename());
            }
            ConnectionEvent::Complete(transfer) => {
                println!(
                    "Received {} ({} bytes)",
                    transfer.filename(),
                    transfer.transferred()
                );
            }
            ConnectionEvent::Disconnected => {
                println!("Peer disconnected");
                break;
            }
        }
    }

    Ok(())
}
