//! TCP Client
//!
//! A single outbound connection with the same receive and send machinery
//! as the server side.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::net::TcpStream;
use tokio::sync::Mutex as AsyncMutex;

use crate::config::Config;
use crate::error::{NetError, Result};
use crate::event::{ClientEvent, EventBus};
use super::connection::{Connection, ConnectionEvents, HandleAllocator};
use super::receive;

/// State shared between the client handle and its connection's tasks
struct Shared {
    events: EventBus<ClientEvent>,
    connection: RwLock<Option<Arc<Connection>>>,
}

/// Asynchronous TCP client
pub struct Client {
    config: Config,
    shared: Arc<Shared>,
    handles: HandleAllocator,

    /// Held for the duration of a `connect` attempt
    connecting: AsyncMutex<()>,
}

impl Client {
    /// Create a disconnected client
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let events = EventBus::new(config.event_capacity);

        Ok(Self {
            config,
            shared: Arc::new(Shared {
                events,
                connection: RwLock::new(None),
            }),
            handles: HandleAllocator::new(),
            connecting: AsyncMutex::new(()),
        })
    }

    /// Subscribe to client events
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<ClientEvent> {
        self.shared.events.subscribe()
    }

    /// Connect to `host:port`
    ///
    /// On success fires `Connected` and starts receiving. On failure fires
    /// `Exception` and returns the same error. Connecting while a live
    /// connection exists, or while another `connect` is in flight, is
    /// rejected with `AlreadyConnected`.
    pub async fn connect(
        &self,
        host: &str,
        port: u16,
        client_id: Option<String>,
    ) -> Result<Arc<Connection>> {
        let _attempt = self
            .connecting
            .try_lock()
            .map_err(|_| NetError::AlreadyConnected)?;
        if self.is_connected() {
            return Err(NetError::AlreadyConnected);
        }

        let stream = match self.open_stream(host, port).await {
            Ok(stream) => stream,
            Err(fault) => {
                tracing::warn!("{}", fault);
                self.shared.events.publish(ClientEvent::Exception(fault.clone()));
                return Err(fault);
            }
        };

        let events: Arc<dyn ConnectionEvents> = Arc::clone(&self.shared) as Arc<dyn ConnectionEvents>;
        let (connection, inbound) = match Connection::establish(
            self.handles.next(),
            stream,
            client_id,
            &self.config,
            Arc::clone(&events),
        ) {
            Ok(established) => established,
            Err(fault) => {
                tracing::warn!("Failed to set up connection to {}:{}: {}", host, port, fault);
                self.shared.events.publish(ClientEvent::Exception(fault.clone()));
                return Err(fault);
            }
        };

        let previous = self.shared.connection.write().replace(Arc::clone(&connection));
        if let Some(previous) = previous {
            // Half-dead leftover whose receive task has not failed yet
            previous.close();
        }

        tracing::info!(
            "Connected to {} as connection {}",
            connection.peer_addr(),
            connection.handle()
        );
        self.shared.events.publish(ClientEvent::Connected);
        receive::spawn(Arc::clone(&connection), inbound, events);

        Ok(connection)
    }

    /// Close the connection if there is one
    ///
    /// Fires `Disconnected` on every call, connected or not.
    pub fn disconnect(&self) {
        let connection = self.shared.connection.write().take();
        if let Some(connection) = connection {
            connection.close();
            tracing::info!("Disconnected from {}", connection.peer_addr());
        }
        self.shared.events.publish(ClientEvent::Disconnected);
    }

    /// Queue a text message for the server (fire-and-forget)
    pub fn send(&self, message: &str) -> Result<()> {
        let result = self
            .connection()
            .ok_or(NetError::NotConnected)
            .and_then(|connection| connection.send(message));

        if let Err(fault) = &result {
            self.shared.events.publish(ClientEvent::Exception(fault.clone()));
        }
        result
    }

    /// Send a text message and wait until it is written to the socket
    pub async fn send_confirmed(&self, message: &str) -> Result<usize> {
        let connection = match self.connection() {
            Some(connection) => connection,
            None => {
                self.shared
                    .events
                    .publish(ClientEvent::Exception(NetError::NotConnected));
                return Err(NetError::NotConnected);
            }
        };
        connection.send_confirmed(message).await
    }

    /// Live probe of the current connection
    pub fn is_connected(&self) -> bool {
        self.connection().is_some_and(|c| c.is_connected())
    }

    /// The current connection, if any
    pub fn connection(&self) -> Option<Arc<Connection>> {
        self.shared.connection.read().clone()
    }

    /// Address of the server the client is connected to
    pub fn server_addr(&self) -> Option<std::net::SocketAddr> {
        self.connection().map(|c| c.peer_addr())
    }

    /// ID supplied to the current `connect`
    pub fn client_id(&self) -> Option<String> {
        self.connection()
            .and_then(|c| c.client_id().map(str::to_owned))
    }

    async fn open_stream(&self, host: &str, port: u16) -> Result<TcpStream> {
        let addr = format!("{}:{}", host, port);
        tracing::debug!("Connecting to {}", addr);

        let connect = TcpStream::connect((host, port));
        let timeout_ms = self.config.connect_timeout_ms;

        let connected = if timeout_ms > 0 {
            match tokio::time::timeout(Duration::from_millis(timeout_ms), connect).await {
                Ok(connected) => connected,
                Err(_) => return Err(NetError::ConnectTimeout { addr, timeout_ms }),
            }
        } else {
            connect.await
        };

        connected.map_err(|e| NetError::Connect {
            addr,
            source: Arc::new(e),
        })
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        let connection = self.shared.connection.write().take();
        if let Some(connection) = connection {
            connection.close();
        }
    }
}

impl ConnectionEvents for Shared {
    fn message(&self, _connection: &Arc<Connection>, text: String) {
        self.events.publish(ClientEvent::MessageReceived { text });
    }

    fn fault(&self, fault: NetError) {
        self.events.publish(ClientEvent::Exception(fault));
    }

    fn closed(&self, connection: &Arc<Connection>) {
        let was_current = {
            let mut current = self.connection.write();
            let matches = current
                .as_ref()
                .is_some_and(|c| c.handle() == connection.handle());
            if matches {
                *current = None;
            }
            matches
        };

        if was_current {
            tracing::info!("Connection to {} lost", connection.peer_addr());
            self.events.publish(ClientEvent::Disconnected);
        } else {
            tracing::debug!("Stale connection {} closed", connection.handle());
        }
    }
}
