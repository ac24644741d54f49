//! Client registry
//!
//! The set of receiver endpoints registered with the server. The
//! registration listener mutates it and the pacer reads point-in-time
//! snapshots of it. Every operation holds the lock only for the map access
//! itself, never across a send or a sleep.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Default upper bound on registered clients
pub const DEFAULT_MAX_CLIENTS: usize = 64;

/// Registry errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Registry is full (max {max} clients)")]
    Full { max: usize },
}

/// Result of a registration request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// Endpoint was not registered before
    Added,
    /// Endpoint was already present; nothing changed
    AlreadyRegistered,
}

/// Bookkeeping kept per endpoint; identity is the address alone
#[derive(Debug, Clone, Copy)]
struct ClientEntry {
    registered_at: Instant,
}

/// Concurrent set of registered receiver endpoints
pub struct ClientRegistry {
    clients: Mutex<HashMap<SocketAddr, ClientEntry>>,
    max_clients: usize,
}

impl ClientRegistry {
    /// Create an empty registry
    pub fn new(max_clients: usize) -> Self {
        ClientRegistry {
            clients: Mutex::new(HashMap::new()),
            max_clients,
        }
    }

    /// Register an endpoint. Idempotent.
    pub fn register(&self, addr: SocketAddr) -> Result<Registration, RegistryError> {
        let mut clients = self.clients.lock();
        if clients.contains_key(&addr) {
            return Ok(Registration::AlreadyRegistered);
        }
        if clients.len() >= self.max_clients {
            return Err(RegistryError::Full {
                max: self.max_clients,
            });
        }
        clients.insert(
            addr,
            ClientEntry {
                registered_at: Instant::now(),
            },
        );
        Ok(Registration::Added)
    }

    /// Remove an endpoint, returning whether it was present
    pub fn deregister(&self, addr: &SocketAddr) -> bool {
        self.clients.lock().remove(addr).is_some()
    }

    pub fn contains(&self, addr: &SocketAddr) -> bool {
        self.clients.lock().contains_key(addr)
    }

    pub fn len(&self) -> usize {
        self.clients.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Point-in-time copy of the registered endpoints, sorted by address
    pub fn snapshot(&self) -> Vec<SocketAddr> {
        let mut addrs: Vec<SocketAddr> = self.clients.lock().keys().copied().collect();
        addrs.sort();
        addrs
    }

    /// How long an endpoint has been registered
    pub fn registered_for(&self, addr: &SocketAddr) -> Option<Duration> {
        self.clients
            .lock()
            .get(addr)
            .map(|entry| entry.registered_at.elapsed())
    }

    /// Remove every endpoint, returning what was registered
    pub fn clear(&self) -> Vec<SocketAddr> {
        let mut addrs: Vec<SocketAddr> = self.clients.lock().drain().map(|(a, _)| a).collect();
        addrs.sort();
        addrs
    }
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CLIENTS)
    }
}
