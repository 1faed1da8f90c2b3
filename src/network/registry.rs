//! Client Registry
//!
//! The server's record of tracked connections: a lookup by handle plus the
//! ordered collection used for broadcasts.
//!
//! ## Concurrency
//! Both structures live behind ONE mutex, so every insert, removal, sweep
//! and drain updates them together. The lock is never held across an
//! `.await`; callers get `Arc<Connection>` clones out.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{NetError, Result};
use super::connection::{Connection, Handle};

#[derive(Default)]
struct Entries {
    by_handle: HashMap<Handle, Arc<Connection>>,
    ordered: Vec<Arc<Connection>>,
}

impl Entries {
    fn remove(&mut self, handle: Handle) -> Option<Arc<Connection>> {
        let connection = self.by_handle.remove(&handle)?;
        self.ordered.retain(|c| c.handle() != handle);
        Some(connection)
    }
}

/// Concurrent registry of server-side connections
#[derive(Default)]
pub struct Registry {
    entries: Mutex<Entries>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a connection in both structures
    ///
    /// Fails if the handle is already tracked.
    pub fn insert(&self, connection: Arc<Connection>) -> Result<()> {
        let mut entries = self.entries.lock();
        let handle = connection.handle();

        if entries.by_handle.contains_key(&handle) {
            return Err(NetError::DuplicateHandle(handle));
        }

        entries.by_handle.insert(handle, Arc::clone(&connection));
        entries.ordered.push(connection);
        Ok(())
    }

    /// Stop tracking a connection; returns it if it was tracked
    pub fn remove(&self, handle: Handle) -> Option<Arc<Connection>> {
        self.entries.lock().remove(handle)
    }

    pub fn get(&self, handle: Handle) -> Option<Arc<Connection>> {
        self.entries.lock().by_handle.get(&handle).cloned()
    }

    pub fn contains(&self, handle: Handle) -> bool {
        self.entries.lock().by_handle.contains_key(&handle)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().by_handle.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All tracked connections in the order they were accepted
    pub fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.entries.lock().ordered.clone()
    }

    /// Tracked connections whose transport is live right now
    pub fn live(&self) -> Vec<Arc<Connection>> {
        self.entries
            .lock()
            .ordered
            .iter()
            .filter(|c| c.is_connected())
            .cloned()
            .collect()
    }

    /// Remove every connection whose transport reports not-connected
    ///
    /// Returns the removed connections in accept order.
    pub fn sweep_disconnected(&self) -> Vec<Arc<Connection>> {
        let mut entries = self.entries.lock();
        let (stale, live): (Vec<_>, Vec<_>) = entries
            .ordered
            .drain(..)
            .partition(|c| !c.is_connected());

        entries.ordered = live;
        for connection in &stale {
            entries.by_handle.remove(&connection.handle());
        }
        stale
    }

    /// Remove everything, returning what was tracked
    pub fn drain(&self) -> Vec<Arc<Connection>> {
        let mut entries = self.entries.lock();
        entries.by_handle.clear();
        std::mem::take(&mut entries.ordered)
    }

    #[cfg(test)]
    fn is_consistent(&self) -> bool {
        let entries = self.entries.lock();
        entries.ordered.len() == entries.by_handle.len()
            && entries
                .ordered
                .iter()
                .all(|c| entries.by_handle.contains_key(&c.handle()))
    }
}
