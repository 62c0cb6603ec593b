//! Send command implementation.
//!
//! Connects to a serving peer, queues every file on the one connection, and
//! waits until each upload has finished streaming.

use std::collections::HashSet;

use anyhow::{bail, Context, Result};

use ferry_core::connection::parse_peer_address;
use ferry_core::{Connection, ConnectionEvent};

use super::SendArgs;

/// Run the send command.
pub async fn run(args: SendArgs) -> Result<()> {
    let config = super::load_config();
    let addr = parse_peer_address(&args.host)?;

    let (connection, mut events) = Connection::connect(addr, config.connection_settings())
        .await
        .with_context(|| format!("failed to connect to {addr}"))?;
    connection.run();
    println!("Connected to {addr}");

    let mut pending = HashSet::new();
    for path in &args.files {
        let transfer = connection
            .queue_transfer(path)
            .await
            .with_context(|| format!("failed to queue {}", path.display()))?;
        println!(
            "Queued {} ({} bytes)",
            transfer.filename(),
            transfer.length()
        );
        // Zero-length uploads complete the moment they are queued.
        if connection.transfer(transfer.id()).is_some() {
            pending.insert(transfer.id());
        }
    }

    while !pending.is_empty() {
        match events.recv().await {
            Some(ConnectionEvent::Complete(transfer)) => {
                pending.remove(&transfer.id());
                println!("Sent {}", transfer.filename());
            }
            Some(ConnectionEvent::Stopped(transfer)) => {
                pending.remove(&transfer.id());
                println!("Peer stopped {}", transfer.filename());
            }
            Some(ConnectionEvent::ProgressChanged(transfer)) => {
                let progress = transfer.progress();
                if progress % 10 == 0 {
                    println!("  {} {}%", transfer.filename(), progress);
                }
            }
            Some(ConnectionEvent::Queued(_)) => {}
            Some(ConnectionEvent::Disconnected) | None => {
                bail!("connection lost before all files were sent");
            }
        }
    }

    connection.close().await;
    println!("Done");
    Ok(())
}
