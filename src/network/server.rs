//! TCP Server
//!
//! Accepts connections, tracks them in the registry and broadcasts to them.
//!
//! ## Tasks
//! - One accept task per `start`, looping until `stop`
//! - Per accepted connection: one receive task and one writer task
//!
//! Every accepted connection is wrapped exactly once; the same
//! `Arc<Connection>` is stored in the registry and carried by every event
//! about it.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::error::{NetError, Result};
use crate::event::{EventBus, ServerEvent};
use super::connection::{await_confirmation, Connection, ConnectionEvents, Handle, HandleAllocator};
use super::receive;
use super::registry::Registry;

/// Pause after a failed accept so a persistent error (e.g. EMFILE) does not
/// spin the accept task
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// Outcome of a confirmed broadcast
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SendReport {
    /// Connections that were live when the broadcast started
    pub attempted: usize,

    /// Connections whose write completed
    pub delivered: usize,
}

/// State shared between the server handle and its tasks
struct Shared {
    config: Config,
    registry: Registry,
    events: EventBus<ServerEvent>,
    handles: HandleAllocator,
}

/// A running accept task
struct Listening {
    local_addr: SocketAddr,

    /// Dropped to stop the accept task
    shutdown: watch::Sender<()>,

    task: JoinHandle<()>,
}

/// Asynchronous TCP server
pub struct Server {
    shared: Arc<Shared>,
    listening: Mutex<Option<Listening>>,
}

impl Server {
    /// Create a server with the given config
    ///
    /// Nothing is bound until `start`.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let events = EventBus::new(config.event_capacity);

        Ok(Self {
            shared: Arc::new(Shared {
                config,
                registry: Registry::new(),
                events,
                handles: HandleAllocator::new(),
            }),
            listening: Mutex::new(None),
        })
    }

    /// Subscribe to server events
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<ServerEvent> {
        self.shared.events.subscribe()
    }

    /// Bind to `port` on the configured address and start accepting
    ///
    /// Port 0 binds an ephemeral port; the bound address is returned and
    /// carried by the `Started` event. Must be called inside a Tokio runtime.
    pub fn start(&self, port: u16) -> Result<SocketAddr> {
        let mut listening = self.listening.lock();
        if let Some(current) = listening.as_ref() {
            return Err(NetError::AlreadyListening(current.local_addr));
        }

        let addr = SocketAddr::new(self.shared.config.bind_addr, port);
        let listener = match bind(addr, self.shared.config.backlog) {
            Ok(listener) => listener,
            Err(e) => {
                let fault = NetError::Listen {
                    addr,
                    source: Arc::new(e),
                };
                tracing::warn!("{}", fault);
                self.shared.events.publish(ServerEvent::Exception(fault.clone()));
                return Err(fault);
            }
        };
        let local_addr = listener.local_addr()?;

        let (shutdown, shutdown_rx) = watch::channel(());
        let task = tokio::spawn(accept_loop(listener, Arc::clone(&self.shared), shutdown_rx));
        *listening = Some(Listening {
            local_addr,
            shutdown,
            task,
        });
        drop(listening);

        tracing::info!("Server listening on {}", local_addr);
        self.shared.events.publish(ServerEvent::Started { local_addr });
        Ok(local_addr)
    }

    /// Stop accepting, close every tracked connection and clear the registry
    ///
    /// Fires `Stopped` even if the server was not listening.
    pub async fn stop(&self) {
        let listening = self.listening.lock().take();

        if let Some(Listening {
            local_addr,
            shutdown,
            task,
        }) = listening
        {
            drop(shutdown);
            if let Err(e) = task.await {
                tracing::warn!("Accept task for {} ended abnormally: {}", local_addr, e);
            }
            tracing::info!("Server on {} stopped listening", local_addr);
        }

        let connections = self.shared.registry.drain();
        for connection in &connections {
            connection.close();
        }
        tracing::debug!("Closed {} tracked connections", connections.len());

        self.shared.events.publish(ServerEvent::Stopped);
    }

    /// Address of the active listener
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listening.lock().as_ref().map(|l| l.local_addr)
    }

    pub fn is_listening(&self) -> bool {
        self.listening.lock().is_some()
    }

    pub fn registry(&self) -> &Registry {
        &self.shared.registry
    }

    pub fn client_count(&self) -> usize {
        self.shared.registry.len()
    }

    /// Tracked connections in accept order
    pub fn clients(&self) -> Vec<Arc<Connection>> {
        self.shared.registry.snapshot()
    }

    pub fn client(&self, handle: Handle) -> Option<Arc<Connection>> {
        self.shared.registry.get(handle)
    }

    /// Send `message` to every live client and wait for the writes
    ///
    /// Connections that are not live when the broadcast starts are skipped.
    /// A connection that fails mid-send reports through its own `Exception`
    /// event and is counted as not delivered.
    pub async fn send_to_all(&self, message: &str) -> SendReport {
        let payload = Bytes::copy_from_slice(message.as_bytes());
        let mut report = SendReport::default();
        let mut pending = Vec::new();

        for connection in self.shared.registry.live() {
            report.attempted += 1;
            match connection.send_bytes_confirmed(payload.clone()) {
                Ok(confirmation) => pending.push(confirmation),
                Err(e) => self.shared.report_send_failure(&connection, e),
            }
        }

        for confirmation in pending {
            if await_confirmation(confirmation).await.is_ok() {
                report.delivered += 1;
            }
        }

        tracing::debug!(
            "Broadcast {} bytes: {}/{} delivered",
            payload.len(),
            report.delivered,
            report.attempted
        );
        report
    }

    /// Queue `message` for every live client without waiting
    ///
    /// Returns the number of sends attempted.
    pub fn send_to_all_detached(&self, message: &str) -> usize {
        let payload = Bytes::copy_from_slice(message.as_bytes());
        let live = self.shared.registry.live();

        for connection in &live {
            if let Err(e) = connection.send_bytes(payload.clone()) {
                self.shared.report_send_failure(connection, e);
            }
        }
        live.len()
    }

    /// Drop every tracked connection whose transport is no longer live
    ///
    /// Returns how many were removed. No events are emitted.
    pub fn clear_clients(&self) -> usize {
        let stale = self.shared.registry.sweep_disconnected();
        for connection in &stale {
            connection.close();
        }
        if !stale.is_empty() {
            tracing::debug!("Cleared {} disconnected clients", stale.len());
        }
        stale.len()
    }

    /// Close one client and stop tracking it
    ///
    /// Returns false if the handle is not tracked.
    pub fn disconnect(&self, handle: Handle) -> bool {
        match self.shared.registry.remove(handle) {
            Some(connection) => {
                connection.close();
                tracing::debug!("Disconnected client {}", handle);
                self.shared.events.publish(ServerEvent::Disconnected(connection));
                true
            }
            None => false,
        }
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        if let Some(listening) = self.listening.get_mut().take() {
            listening.task.abort();
        }
        for connection in self.shared.registry.drain() {
            connection.close();
        }
    }
}

impl Shared {
    /// Register a freshly accepted stream and start receiving on it
    fn admit(self: &Arc<Self>, stream: TcpStream, peer: SocketAddr) {
        let handle = self.handles.next();
        let events: Arc<dyn ConnectionEvents> = Arc::clone(self) as Arc<dyn ConnectionEvents>;

        let (connection, inbound) =
            match Connection::establish(handle, stream, None, &self.config, Arc::clone(&events)) {
                Ok(established) => established,
                Err(e) => {
                    tracing::warn!("Failed to set up connection from {}: {}", peer, e);
                    self.events.publish(ServerEvent::Exception(e));
                    return;
                }
            };

        if let Err(e) = self.registry.insert(Arc::clone(&connection)) {
            tracing::warn!("Failed to register connection from {}: {}", peer, e);
            connection.close();
            self.events.publish(ServerEvent::Exception(e));
            return;
        }

        tracing::info!("Client {} connected from {}", handle, peer);
        self.events
            .publish(ServerEvent::ClientConnected(Arc::clone(&connection)));
        receive::spawn(connection, inbound, events);
    }

    /// Report a failed accept and pause before the next one
    ///
    /// Returns false if shutdown was signalled during the pause.
    async fn accept_failed(&self, e: std::io::Error, shutdown: &mut watch::Receiver<()>) -> bool {
        let fault = NetError::Accept(Arc::new(e));
        tracing::warn!("{}; retrying in {:?}", fault, ACCEPT_BACKOFF);
        self.events.publish(ServerEvent::Exception(fault));

        tokio::select! {
            biased;
            _ = shutdown.changed() => false,
            _ = tokio::time::sleep(ACCEPT_BACKOFF) => true,
        }
    }

    fn report_send_failure(&self, connection: &Connection, fault: NetError) {
        tracing::debug!("Send to client {} failed: {}", connection.handle(), fault);
        self.events.publish(ServerEvent::Exception(fault));
    }
}

impl ConnectionEvents for Shared {
    fn message(&self, connection: &Arc<Connection>, text: String) {
        self.events.publish(ServerEvent::MessageReceived {
            connection: Arc::clone(connection),
            text,
        });
    }

    fn fault(&self, fault: NetError) {
        self.events.publish(ServerEvent::Exception(fault));
    }

    fn closed(&self, connection: &Arc<Connection>) {
        let handle = connection.handle();
        // Only the path that removes the entry reports it
        if self.registry.remove(handle).is_some() {
            tracing::info!("Client {} disconnected", handle);
            self.events
                .publish(ServerEvent::Disconnected(Arc::clone(connection)));
        }
    }
}

async fn accept_loop(listener: TcpListener, shared: Arc<Shared>, mut shutdown: watch::Receiver<()>) {
    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => shared.admit(stream, peer),
                Err(e) => {
                    // Accept errors do not stop the listener
                    if !shared.accept_failed(e, &mut shutdown).await {
                        break;
                    }
                }
            },
        }
    }
    tracing::debug!("Accept loop stopped");
}

fn bind(addr: SocketAddr, backlog: u32) -> std::io::Result<TcpListener> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    #[cfg(unix)]
    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;
    socket.listen(backlog)
}
