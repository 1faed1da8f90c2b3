//! # rapidnet
//!
//! A minimal asynchronous TCP client/server library with:
//! - A server that tracks connected peers in a concurrent registry
//! - Text messages received as raw chunks (no framing) and broadcast to all
//! - A single-connection client mirroring the server's receive path
//! - Lifecycle events delivered over an in-process event bus
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Application code                         │
//! │              (subscribes to ServerEvent / ClientEvent)        │
//! └─────────────────────▲───────────────────────────────────────┘
//!                       │ Event Bus (broadcast)
//! ┌─────────────────────┴───────────────────────────────────────┐
//! │                  Server  /  Client                           │
//! └──────────┬──────────────────────────────────┬───────────────┘
//!            │ accept task                       │ connect
//!            ▼                                   ▼
//!   ┌─────────────────┐                 ┌─────────────────┐
//!   │    Registry     │ ──────────────▶ │   Connection    │
//!   │ (map + ordered) │                 │ receive + write │
//!   └─────────────────┘                 └─────────────────┘
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use rapidnet::{Config, Server, ServerEvent};
//!
//! # async fn run() -> rapidnet::Result<()> {
//! let server = Server::new(Config::default())?;
//! let mut events = server.subscribe();
//! server.start(9000)?;
//!
//! while let Ok(event) = events.recv().await {
//!     if let ServerEvent::MessageReceived { text, .. } = event {
//!         server.send_to_all(&text).await;
//!     }
//! }
//! # Ok(())
//! # }
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod event;
pub mod network;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{NetError, Result};
pub use config::Config;
pub use event::{ClientEvent, EventBus, ServerEvent};
pub use network::{Client, Connection, Handle, Registry, SendReport, Server};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of rapidnet
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
