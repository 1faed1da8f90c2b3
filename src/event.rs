//! Event Bus
//!
//! In-process publish/subscribe for lifecycle and data notifications.
//!
//! ## Delivery
//! - Every subscriber sees every event published after it subscribed
//! - Publishing never blocks; events with no subscriber are dropped
//! - A subscriber that falls more than `event_capacity` events behind
//!   receives `RecvError::Lagged` and skips ahead
//! - Events are published from whichever task completed the triggering I/O

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::broadcast;

use crate::error::NetError;
use crate::network::Connection;

/// Notifications emitted by a `Client`
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// The outbound connection was established
    Connected,

    /// The connection is gone (explicit disconnect or transport failure)
    Disconnected,

    /// One receive completion, decoded as text
    MessageReceived { text: String },

    /// A fault caught on any client operation
    Exception(NetError),
}

/// Notifications emitted by a `Server`
#[derive(Debug, Clone)]
pub enum ServerEvent {
    /// The listener is bound and accepting
    Started { local_addr: SocketAddr },

    /// The listener and every tracked connection were closed
    Stopped,

    /// A connection was accepted and registered
    ClientConnected(Arc<Connection>),

    /// One receive completion from a tracked connection
    MessageReceived {
        connection: Arc<Connection>,
        text: String,
    },

    /// A tracked connection was closed and removed from the registry
    Disconnected(Arc<Connection>),

    /// A fault caught on the listener or on any connection
    Exception(NetError),
}

/// Multi-subscriber event channel
#[derive(Debug)]
pub struct EventBus<E> {
    sender: broadcast::Sender<E>,
}

impl<E: Clone + Send + 'static> EventBus<E> {
    /// Create a bus buffering `capacity` events per subscriber
    ///
    /// `capacity` must be non-zero (checked by `Config::validate`).
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Deliver an event to all current subscribers
    pub fn publish(&self, event: E) {
        if self.sender.send(event).is_err() {
            tracing::trace!("Event dropped: no subscribers");
        }
    }

    /// Receive every event published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<E> {
        self.sender.subscribe()
    }

    /// Number of live subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl<E> Clone for EventBus<E> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}
