//! Registration listener
//!
//! Runs on its own thread and owns the receive side of the server socket.
//! Answers `registerclient` and `deregisteruser` while the pacer is idle or
//! streaming; everything else is logged and ignored.

use crate::registry::{ClientRegistry, Registration};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use vidcast_io::{MediaSocket, Shutdown};
use vidcast_protocol::{ControlMessage, MAX_DATAGRAM_SIZE};

/// Default read timeout between shutdown checks
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// A zero read timeout means "block forever" to the kernel
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Counters reported when the listener exits
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListenerStats {
    /// New endpoints added
    pub registrations: u64,
    /// Registration requests from endpoints already present
    pub repeat_registrations: u64,
    /// Endpoints removed on request
    pub deregistrations: u64,
    /// Registrations refused because the registry was full
    pub rejected: u64,
    /// Datagrams that were not registration requests
    pub ignored: u64,
}

/// Listener for registration traffic
pub struct RegistrationListener {
    socket: Arc<MediaSocket>,
    registry: Arc<ClientRegistry>,
    shutdown: Shutdown,
    poll_interval: Duration,
    stats: ListenerStats,
}

impl RegistrationListener {
    pub fn new(
        socket: Arc<MediaSocket>,
        registry: Arc<ClientRegistry>,
        shutdown: Shutdown,
        poll_interval: Duration,
    ) -> Self {
        RegistrationListener {
            socket,
            registry,
            shutdown,
            poll_interval: poll_interval.max(MIN_POLL_INTERVAL),
            stats: ListenerStats::default(),
        }
    }

    /// Run the listener on a dedicated thread
    pub fn spawn(self) -> io::Result<JoinHandle<ListenerStats>> {
        thread::Builder::new()
            .name("vidcast-listener".into())
            .spawn(move || self.run())
    }

    /// Serve registration requests until shutdown
    pub fn run(mut self) -> ListenerStats {
        if let Err(e) = self.socket.set_read_timeout(Some(self.poll_interval)) {
            tracing::error!("Failed to set listener read timeout: {}", e);
            return self.stats;
        }

        tracing::info!("Registration listener started");
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

        while !self.shutdown.is_triggered() {
            match self.socket.recv_from(&mut buf) {
                Ok(Some((n, from))) => {
                    self.handle(&buf[..n], from);
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!("Listener receive error: {}", e);
                    // Avoid spinning on a persistent socket error
                    self.shutdown.sleep(self.poll_interval);
                }
            }
        }

        tracing::info!(
            registrations = self.stats.registrations,
            deregistrations = self.stats.deregistrations,
            "Registration listener stopped"
        );
        self.stats
    }

    /// Handle one datagram, replying when the protocol calls for it.
    /// Returns the reply that was sent.
    pub fn handle(&mut self, datagram: &[u8], from: SocketAddr) -> Option<ControlMessage> {
        let reply = match ControlMessage::parse(datagram) {
            Some(ControlMessage::RegisterClient) => match self.registry.register(from) {
                Ok(Registration::Added) => {
                    self.stats.registrations += 1;
                    tracing::info!(
                        "Client registered: {} ({} total)",
                        from,
                        self.registry.len()
                    );
                    ControlMessage::RegisterClientOk
                }
                Ok(Registration::AlreadyRegistered) => {
                    self.stats.repeat_registrations += 1;
                    tracing::debug!("Client {} re-registered", from);
                    ControlMessage::RegisterClientOk
                }
                Err(e) => {
                    self.stats.rejected += 1;
                    tracing::warn!("Refusing registration from {}: {}", from, e);
                    return None;
                }
            },
            Some(ControlMessage::DeregisterUser) => {
                if self.registry.deregister(&from) {
                    self.stats.deregistrations += 1;
                    tracing::info!(
                        "Client deregistered: {} ({} remaining)",
                        from,
                        self.registry.len()
                    );
                }
                ControlMessage::DeregisterUserOk
            }
            _ => {
                self.stats.ignored += 1;
                tracing::debug!("Ignoring {} byte datagram from {}", datagram.len(), from);
                return None;
            }
        };

        if let Err(e) = self.socket.send_to(reply.as_bytes(), from) {
            tracing::warn!("Failed to send {} to {}: {}", reply, from, e);
        }
        Some(reply)
    }

    pub fn stats(&self) -> &ListenerStats {
        &self.stats
    }
}
