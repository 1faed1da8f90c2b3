//! Receive loop
//!
//! One task per connection reads into the connection's scratch buffer and
//! reports each completion, re-issuing the next read only after the
//! previous one was handled. Any read failure, including end-of-stream,
//! ends the loop.

use std::sync::Arc;

use tokio::io::AsyncReadExt;

use crate::error::NetError;
use super::connection::{Connection, ConnectionEvents, Inbound};

/// Start the receive task for a freshly established connection
pub(crate) fn spawn(
    connection: Arc<Connection>,
    inbound: Inbound,
    events: Arc<dyn ConnectionEvents>,
) {
    tokio::spawn(receive_loop(connection, inbound, events));
}

async fn receive_loop(
    connection: Arc<Connection>,
    inbound: Inbound,
    events: Arc<dyn ConnectionEvents>,
) {
    let Inbound {
        mut read_half,
        mut shutdown,
        mut buffer,
        strict_utf8,
    } = inbound;
    let handle = connection.handle();

    tracing::debug!("Receive loop started for connection {}", handle);

    let fault = loop {
        let read = tokio::select! {
            biased;
            _ = shutdown.changed() => {
                tracing::debug!("Receive loop for connection {} stopped: closed locally", handle);
                return;
            }
            read = read_half.read(&mut buffer[..]) => read,
        };

        match read {
            Ok(0) => break NetError::ClosedByPeer { handle },
            Ok(n) => {
                connection.record_received(n);
                tracing::trace!("Received {} bytes on connection {}", n, handle);

                match decode(&buffer[..n], strict_utf8) {
                    Ok(text) => events.message(&connection, text),
                    Err(detail) => events.fault(NetError::Decode { handle, detail }),
                }
            }
            Err(e) => {
                break NetError::Receive {
                    handle,
                    source: Arc::new(e),
                }
            }
        }
    };

    if fault.is_disconnect() {
        tracing::debug!("Receive loop for connection {} ended: {}", handle, fault);
    } else {
        tracing::warn!("Receive loop for connection {} failed: {}", handle, fault);
    }

    events.fault(fault);
    if !connection.close() {
        // Closed by disconnect/stop/sweep while the read completed; that
        // path reports the disconnect
        return;
    }
    if !connection.is_connected() {
        events.closed(&connection);
    }
}

/// Decode one chunk. Chunk boundaries are arbitrary, so a multi-byte
/// character split across two reads is invalid in both halves.
fn decode(chunk: &[u8], strict: bool) -> std::result::Result<String, String> {
    if strict {
        std::str::from_utf8(chunk)
            .map(str::to_owned)
            .map_err(|e| e.to_string())
    } else {
        Ok(String::from_utf8_lossy(chunk).into_owned())
    }
}
