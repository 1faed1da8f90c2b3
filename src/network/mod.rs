//! Network Module
//!
//! TCP server and client handling.
//!
//! ## Architecture
//! - Single accept task per listening server
//! - One receive task and one writer task per connection
//! - Server-side connections tracked in the `Registry`
//! - Everything observable is published on an `EventBus`

mod client;
mod connection;
mod receive;
mod registry;
mod server;

pub use client::Client;
pub use connection::{Connection, Handle};
pub use registry::Registry;
pub use server::{SendReport, Server};
