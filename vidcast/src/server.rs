//! Server context
//!
//! Owns everything one server process shares between its threads: the
//! socket, the client registry, the registration listener and the shutdown
//! signal. Streams are pushed through it one after another.

use crate::listener::{ListenerStats, RegistrationListener, DEFAULT_POLL_INTERVAL};
use crate::pacer::{Destinations, Pacer, PacerConfig, PacerError, PacerStats};
use crate::registry::{ClientRegistry, DEFAULT_MAX_CLIENTS};
use std::io::{self, Read};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use thiserror::Error;
use vidcast_io::{shutdown_channel, MediaSocket, Shutdown, ShutdownHandle, SocketError};
use vidcast_protocol::MAX_PAYLOAD_SIZE;

/// Default server port
pub const DEFAULT_PORT: u16 = 5004;

/// Default multicast group for broadcast mode
pub const DEFAULT_MULTICAST_GROUP: SocketAddr =
    SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::new(224, 0, 0, 1), DEFAULT_PORT));

/// Server errors
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Socket error: {0}")]
    Socket(#[from] SocketError),

    #[error("Failed to start registration listener: {0}")]
    Listener(io::Error),

    #[error("Stream failed: {0}")]
    Pacer(#[from] PacerError),
}

/// How receivers are reached
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMode {
    /// Receivers register; each stream is bracketed by start and shutdown
    Session,
    /// Fixed destinations, typically one multicast group
    Broadcast { destinations: Vec<SocketAddr> },
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: SocketAddr,
    pub mode: ServerMode,
    pub chunk_size: usize,
    pub evict_after_failures: u32,
    pub poll_interval: Duration,
    pub max_clients: usize,
    pub multicast_ttl: u32,
    /// Socket send buffer; `None` keeps the system default
    pub send_buffer_size: Option<usize>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            bind: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            mode: ServerMode::Session,
            chunk_size: MAX_PAYLOAD_SIZE,
            evict_after_failures: PacerConfig::default().evict_after_failures,
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_clients: DEFAULT_MAX_CLIENTS,
            multicast_ttl: 1,
            send_buffer_size: None,
        }
    }
}

/// Totals reported by [`Server::finish`]
#[derive(Debug, Clone, Default)]
pub struct ServerSummary {
    /// Streams started
    pub streams: u64,
    /// Streams that ran to the end of their source
    pub completed_streams: u64,
    pub pacer: PacerStats,
    pub listener: ListenerStats,
}

struct ListenerThread {
    stop: ShutdownHandle,
    join: JoinHandle<ListenerStats>,
}

/// Running server
pub struct Server {
    socket: Arc<MediaSocket>,
    registry: Arc<ClientRegistry>,
    config: ServerConfig,
    shutdown: Shutdown,
    listener: Option<ListenerThread>,
    summary: ServerSummary,
}

impl Server {
    /// Bind the socket and, in session mode, start the registration listener
    pub fn bind(config: ServerConfig, shutdown: Shutdown) -> Result<Self, ServerError> {
        let socket = MediaSocket::bind(config.bind)?;
        if let Some(size) = config.send_buffer_size {
            socket.set_send_buffer_size(size)?;
        }
        let socket = Arc::new(socket);
        let registry = Arc::new(ClientRegistry::new(config.max_clients));

        let listener = match &config.mode {
            ServerMode::Session => {
                // Separate signal so the listener can be stopped after the
                // final sentinel went out, whatever stopped the server
                let (stop, stop_rx) = shutdown_channel();
                let join = RegistrationListener::new(
                    socket.clone(),
                    registry.clone(),
                    stop_rx,
                    config.poll_interval,
                )
                .spawn()
                .map_err(ServerError::Listener)?;
                Some(ListenerThread { stop, join })
            }
            ServerMode::Broadcast { destinations } => {
                if destinations.iter().any(|d| d.ip().is_multicast()) {
                    socket.set_multicast_ttl(config.multicast_ttl)?;
                }
                None
            }
        };

        tracing::info!(
            "Server listening on {} ({})",
            socket.local_addr()?,
            match &config.mode {
                ServerMode::Session => "session mode".to_string(),
                ServerMode::Broadcast { destinations } =>
                    format!("broadcast to {} destination(s)", destinations.len()),
            }
        );

        Ok(Server {
            socket,
            registry,
            config,
            shutdown,
            listener,
            summary: ServerSummary::default(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.socket.local_addr()?)
    }

    pub fn registry(&self) -> &Arc<ClientRegistry> {
        &self.registry
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_triggered()
    }

    fn destinations(&self) -> Destinations {
        match &self.config.mode {
            ServerMode::Session => Destinations::Registered(self.registry.clone()),
            ServerMode::Broadcast { destinations } => Destinations::Broadcast(destinations.clone()),
        }
    }

    /// Stream one source to the current receivers at `bitrate_bps`
    pub fn stream<R: Read>(&mut self, source: R, bitrate_bps: u64) -> Result<PacerStats, ServerError> {
        let config = PacerConfig {
            chunk_size: self.config.chunk_size,
            evict_after_failures: self.config.evict_after_failures,
        };
        self.summary.streams += 1;
        tracing::info!(
            stream = self.summary.streams,
            bitrate_bps,
            clients = self.registry.len(),
            "Starting stream"
        );

        let mut pacer = Pacer::new(&self.socket, self.destinations(), config, self.shutdown.clone());
        let stats = pacer.stream(source, bitrate_bps)?;

        if stats.completed {
            self.summary.completed_streams += 1;
        }
        self.summary.pacer.absorb(&stats);
        Ok(stats)
    }

    /// Pause between streams. Returns `false` if shutdown interrupted it.
    pub fn wait(&self, gap: Duration) -> bool {
        self.shutdown.sleep(gap)
    }

    /// Stop the listener and report
    pub fn finish(mut self) -> ServerSummary {
        let listener = self.listener.take();
        if let Some(listener) = listener {
            listener.stop.trigger();
            match listener.join.join() {
                Ok(stats) => self.summary.listener = stats,
                Err(_) => tracing::error!("Registration listener panicked"),
            }
        }

        // Receivers still waiting for a stream start are not notified; they
        // ignore anything but a stream start and stop on their own
        let remaining = self.registry.clear();
        if !remaining.is_empty() {
            tracing::debug!("Dropping {} idle registration(s)", remaining.len());
        }

        tracing::info!(
            streams = self.summary.streams,
            packets = self.summary.pacer.packets_sent,
            failures = self.summary.pacer.send_failures,
            "Server stopped"
        );
        std::mem::take(&mut self.summary)
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.stop.trigger();
            let _ = listener.join.join();
        }
    }
}
