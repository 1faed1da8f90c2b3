//! Connection Handler
//!
//! One live TCP connection, shared by the server registry, event payloads
//! and the two tasks that drive it.
//!
//! ## Tasks
//! - Writer task: owns the write half, drains the outbound queue in order
//! - Receive task: owns the read half and the scratch buffer (see `receive`)
//!
//! Both tasks hang off the connection's transport link. Dropping the link
//! (`close`) ends the receive task and lets the writer flush and half-close.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};

use crate::config::Config;
use crate::error::{NetError, Result};

/// Identity of one established connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(u64);

impl Handle {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Hands out unique handles, starting at 1
#[derive(Debug)]
pub(crate) struct HandleAllocator {
    next: AtomicU64,
}

impl HandleAllocator {
    pub(crate) fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    pub(crate) fn next(&self) -> Handle {
        Handle(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

/// Side-specific reactions to what a connection's tasks observe
pub(crate) trait ConnectionEvents: Send + Sync + 'static {
    /// One decoded receive completion
    fn message(&self, connection: &Arc<Connection>, text: String);

    /// A fault caught by a task
    fn fault(&self, fault: NetError);

    /// The receive task stopped and the transport is gone
    fn closed(&self, connection: &Arc<Connection>);
}

type Ack = oneshot::Sender<Result<usize>>;

/// Completion of a confirmed send
pub(crate) type Confirmation = oneshot::Receiver<Result<usize>>;

struct Outbound {
    payload: Bytes,
    ack: Option<Ack>,
}

/// Live transport state. Dropping it closes the connection.
struct Link {
    outbound: mpsc::UnboundedSender<Outbound>,

    /// Never written; the receive task watches for it being dropped
    _shutdown: watch::Sender<()>,
}

/// Receive-side resources handed to the receive task
pub(crate) struct Inbound {
    pub(crate) read_half: OwnedReadHalf,
    pub(crate) shutdown: watch::Receiver<()>,
    pub(crate) buffer: Box<[u8]>,
    pub(crate) strict_utf8: bool,
}

/// A single live TCP connection
pub struct Connection {
    handle: Handle,
    peer_addr: SocketAddr,
    local_addr: SocketAddr,
    client_id: Option<String>,
    link: RwLock<Option<Link>>,
    bytes_sent: Arc<AtomicU64>,
    bytes_received: AtomicU64,
}

impl Connection {
    /// Wrap an established stream
    ///
    /// Spawns the writer task immediately. The returned `Inbound` must be
    /// passed to `receive::spawn` to start receiving.
    pub(crate) fn establish(
        handle: Handle,
        stream: TcpStream,
        client_id: Option<String>,
        config: &Config,
        events: Arc<dyn ConnectionEvents>,
    ) -> Result<(Arc<Self>, Inbound)> {
        let peer_addr = stream.peer_addr()?;
        let local_addr = stream.local_addr()?;
        stream.set_nodelay(config.nodelay)?;

        let (read_half, write_half) = stream.into_split();
        let (outbound, queue) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(());
        let bytes_sent = Arc::new(AtomicU64::new(0));

        tokio::spawn(write_loop(
            handle,
            write_half,
            queue,
            Arc::clone(&bytes_sent),
            events,
        ));

        let connection = Arc::new(Self {
            handle,
            peer_addr,
            local_addr,
            client_id,
            link: RwLock::new(Some(Link {
                outbound,
                _shutdown: shutdown_tx,
            })),
            bytes_sent,
            bytes_received: AtomicU64::new(0),
        });

        let inbound = Inbound {
            read_half,
            shutdown: shutdown_rx,
            buffer: vec![0u8; config.receive_buffer_size].into_boxed_slice(),
            strict_utf8: config.strict_utf8,
        };

        tracing::debug!("Connection {} established with {}", handle, peer_addr);
        Ok((connection, inbound))
    }

    pub fn handle(&self) -> Handle {
        self.handle
    }

    /// Remote end of the connection
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// ID supplied by the client when it connected, if any
    pub fn client_id(&self) -> Option<&str> {
        self.client_id.as_deref()
    }

    /// Total bytes written to the socket so far
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    /// Total bytes read from the socket so far
    pub fn bytes_received(&self) -> u64 {
        self.bytes_received.load(Ordering::Relaxed)
    }

    /// Whether the transport is open and its writer is still running
    ///
    /// Probed on every call.
    pub fn is_connected(&self) -> bool {
        self.link
            .read()
            .as_ref()
            .is_some_and(|link| !link.outbound.is_closed())
    }

    /// Queue a text message for sending (fire-and-forget)
    ///
    /// Messages sent on one connection go out in call order. Write failures
    /// are reported as an `Exception` event.
    pub fn send(&self, message: &str) -> Result<()> {
        self.send_bytes(Bytes::copy_from_slice(message.as_bytes()))
    }

    /// Send a text message and wait until it is written to the socket
    ///
    /// Returns the number of bytes written.
    pub async fn send_confirmed(&self, message: &str) -> Result<usize> {
        let confirmation = self.send_bytes_confirmed(Bytes::copy_from_slice(message.as_bytes()))?;
        await_confirmation(confirmation).await
    }

    /// Close the transport
    ///
    /// Already queued messages are still flushed. Returns false if the
    /// connection was already closed. No events are emitted here.
    pub fn close(&self) -> bool {
        let link = self.link.write().take();
        if link.is_some() {
            tracing::debug!("Connection {} closed locally", self.handle);
        }
        link.is_some()
    }

    pub(crate) fn send_bytes(&self, payload: Bytes) -> Result<()> {
        self.enqueue(Outbound { payload, ack: None })
    }

    pub(crate) fn send_bytes_confirmed(&self, payload: Bytes) -> Result<Confirmation> {
        let (ack, confirmation) = oneshot::channel();
        self.enqueue(Outbound {
            payload,
            ack: Some(ack),
        })?;
        Ok(confirmation)
    }

    pub(crate) fn record_received(&self, n: usize) {
        self.bytes_received.fetch_add(n as u64, Ordering::Relaxed);
    }

    fn enqueue(&self, outbound: Outbound) -> Result<()> {
        let link = self.link.read();
        let link = link.as_ref().ok_or(NetError::NotConnected)?;
        link.outbound
            .send(outbound)
            .map_err(|_| NetError::NotConnected)
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("handle", &self.handle)
            .field("peer_addr", &self.peer_addr)
            .field("client_id", &self.client_id)
            .field("connected", &self.is_connected())
            .finish()
    }
}

/// Wait for the writer task to report on a confirmed send
///
/// A dropped acknowledgement means the connection closed before the
/// payload reached the socket.
pub(crate) async fn await_confirmation(confirmation: Confirmation) -> Result<usize> {
    confirmation.await.unwrap_or(Err(NetError::NotConnected))
}

async fn write_loop(
    handle: Handle,
    mut writer: OwnedWriteHalf,
    mut queue: mpsc::UnboundedReceiver<Outbound>,
    bytes_sent: Arc<AtomicU64>,
    events: Arc<dyn ConnectionEvents>,
) {
    while let Some(Outbound { payload, ack }) = queue.recv().await {
        match writer.write_all(&payload).await {
            Ok(()) => {
                let n = payload.len();
                bytes_sent.fetch_add(n as u64, Ordering::Relaxed);
                tracing::trace!("Sent {} bytes on connection {}", n, handle);
                if let Some(ack) = ack {
                    let _ = ack.send(Ok(n));
                }
            }
            Err(e) => {
                // is_connected() reports false from here on, before anyone
                // can observe the failure
                queue.close();

                let fault = NetError::Send {
                    handle,
                    source: Arc::new(e),
                };
                if fault.is_disconnect() {
                    tracing::debug!("{}", fault);
                } else {
                    tracing::warn!("{}", fault);
                }
                if let Some(ack) = ack {
                    let _ = ack.send(Err(fault.clone()));
                }
                events.fault(fault);
                return;
            }
        }
    }

    if let Err(e) = writer.shutdown().await {
        tracing::trace!("Shutdown of connection {} write half failed: {}", handle, e);
    }
    tracing::trace!("Writer for connection {} finished", handle);
}
