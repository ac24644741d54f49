//! Network receiver
//!
//! Drives a [`ReceiverSession`] from a UDP socket: sends the control
//! messages the session queues, feeds it every datagram, fires its
//! registration and idle timers, and writes ordered payloads to the sink.
//!
//! The socket read timeout is the shorter of the idle timeout and the poll
//! interval, so the loop notices shutdown and stalls without extra threads.

use std::io::{self, Write};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use thiserror::Error;
use vidcast_io::{MediaSocket, Shutdown, SocketError, Timer};
use vidcast_protocol::{
    ReceiverSession, ReorderStats, SessionConfig, SessionError, SessionEvent, SessionMode,
    SessionState, MAX_DATAGRAM_SIZE,
};

/// Default time without packets before a stream is considered stalled
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(3);

/// Default interval between `registerclient` attempts
pub const DEFAULT_REGISTRATION_RETRY: Duration = Duration::from_secs(1);

/// Default wait for `deregisteruserok`
pub const DEFAULT_DEREGISTER_TIMEOUT: Duration = Duration::from_secs(1);

/// Receiver errors
#[derive(Error, Debug)]
pub enum ReceiverError {
    #[error("Socket error: {0}")]
    Socket(#[from] SocketError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Output sink failed: {0}")]
    Sink(#[source] io::Error),

    #[error("Session mode needs a server address")]
    MissingServer,
}

/// Receiver configuration
#[derive(Debug, Clone)]
pub struct ReceiverConfig {
    /// Server to register with; unused in broadcast mode
    pub server: Option<SocketAddr>,
    pub idle_timeout: Duration,
    pub registration_retry: Duration,
    pub deregister_timeout: Duration,
    pub poll_interval: Duration,
    /// Emit [`ReceiverEvent::Progress`] this often
    pub stats_interval: Option<Duration>,
    pub session: SessionConfig,
}

impl ReceiverConfig {
    /// Register with `server` and follow its streams
    pub fn session(server: SocketAddr) -> Self {
        ReceiverConfig {
            server: Some(server),
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            registration_retry: DEFAULT_REGISTRATION_RETRY,
            deregister_timeout: DEFAULT_DEREGISTER_TIMEOUT,
            poll_interval: crate::listener::DEFAULT_POLL_INTERVAL,
            stats_interval: None,
            session: SessionConfig::registered(),
        }
    }

    /// Passively receive whatever arrives on the socket
    pub fn broadcast() -> Self {
        ReceiverConfig {
            server: None,
            session: SessionConfig::broadcast(),
            ..Self::session(SocketAddr::from(([127, 0, 0, 1], 0)))
        }
    }
}

/// Notable moments reported to an observer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverEvent {
    Registered,
    StreamStarted,
    /// A stream ended by sentinel; reconciled counters of that stream
    StreamEnded(ReorderStats),
    /// Nothing arrived within the idle timeout; the stream was reset
    Stalled(ReorderStats),
    /// Periodic snapshot
    Progress {
        current: ReorderStats,
        lifetime: ReorderStats,
    },
}

/// Final figures of a receiver run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReceiverReport {
    /// Counters across every stream
    pub lifetime: ReorderStats,
    /// Counters of the most recently finished stream
    pub last_stream: ReorderStats,
    /// Streams ended by a sentinel
    pub streams: u64,
    /// Idle-timeout resets
    pub stalls: u64,
    /// Datagrams that could not be decoded
    pub malformed: u64,
    /// Bytes written to the sink
    pub bytes_written: u64,
    /// Server acknowledged the deregistration (always true in broadcast mode)
    pub deregistered: bool,
}

type Observer = Box<dyn FnMut(&ReceiverEvent) + Send>;

/// Receiver bound to a socket and an output sink
pub struct Receiver<W: Write> {
    socket: MediaSocket,
    config: ReceiverConfig,
    session: ReceiverSession,
    sink: W,
    shutdown: Shutdown,
    observer: Option<Observer>,
    report: ReceiverReport,
}

impl<W: Write> Receiver<W> {
    pub fn new(
        socket: MediaSocket,
        config: ReceiverConfig,
        sink: W,
        shutdown: Shutdown,
    ) -> Result<Self, ReceiverError> {
        if config.session.mode == SessionMode::Registered && config.server.is_none() {
            return Err(ReceiverError::MissingServer);
        }
        Ok(Receiver {
            socket,
            session: ReceiverSession::new(config.session),
            config,
            sink,
            shutdown,
            observer: None,
            report: ReceiverReport::default(),
        })
    }

    /// Report lifecycle events and progress to `observer`
    pub fn with_observer<F>(mut self, observer: F) -> Self
    where
        F: FnMut(&ReceiverEvent) + Send + 'static,
    {
        self.observer = Some(Box::new(observer));
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ReceiverError> {
        Ok(self.socket.local_addr()?)
    }

    pub fn session(&self) -> &ReceiverSession {
        &self.session
    }

    /// Run until the stream ends, registration fails or shutdown is requested
    pub fn run(mut self) -> Result<(ReceiverReport, W), ReceiverError> {
        let read_timeout = self.config.idle_timeout.min(self.config.poll_interval);
        self.socket.set_read_timeout(Some(read_timeout.max(Duration::from_millis(1))))?;

        match self.config.server {
            Some(server) if self.session.mode() == SessionMode::Registered => {
                tracing::info!("Registering with {}", server)
            }
            _ => tracing::info!("Listening for broadcast on {}", self.socket.local_addr()?),
        }

        self.session.start();
        let outcome = self.receive_loop();

        // Whatever ended the loop, release buffered payloads and say goodbye
        if !self.session.is_terminated() {
            let stats = self.session.terminate();
            self.finish_stream(stats);
        }
        let sink_result = self.write_ready().and_then(|()| self.sink.flush());
        self.deregister();

        self.report.lifetime = self.session.lifetime();
        self.report.deregistered = self.session.is_deregistered();
        tracing::info!(
            delivered = self.report.lifetime.delivered_packets,
            lost = self.report.lifetime.lost_packets,
            out_of_order = self.report.lifetime.out_of_order_packets,
            duplicates = self.report.lifetime.duplicate_packets,
            "Receiver stopped"
        );

        outcome?;
        sink_result.map_err(ReceiverError::Sink)?;
        Ok((self.report, self.sink))
    }

    fn receive_loop(&mut self) -> Result<(), ReceiverError> {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        let mut retry = Timer::new(self.config.registration_retry);
        let mut progress = self.config.stats_interval.map(Timer::new);
        let mut last_activity = Instant::now();

        loop {
            self.send_outgoing();

            if self.session.is_terminated() {
                return Ok(());
            }
            if self.shutdown.is_triggered() {
                tracing::info!("Shutdown requested");
                return Ok(());
            }

            if let Some((n, from)) = self.socket.recv_from(&mut buf)? {
                last_activity = Instant::now();
                match self.session.handle_datagram(&buf[..n]) {
                    Ok(event) => self.on_session_event(event),
                    Err(SessionError::Packet(e)) => {
                        self.report.malformed += 1;
                        tracing::debug!("Dropping datagram from {}: {}", from, e);
                    }
                    Err(e) => return Err(e.into()),
                }
            }

            self.write_ready().map_err(ReceiverError::Sink)?;

            if self.session.state() == SessionState::AwaitingRegistration && retry.try_fire() {
                self.session.on_registration_timeout()?;
            }

            if last_activity.elapsed() >= self.config.idle_timeout {
                if let Some(stats) = self.session.on_idle_timeout() {
                    self.report.stalls += 1;
                    tracing::warn!(
                        lost = stats.lost_packets,
                        delivered = stats.delivered_packets,
                        "No packets for {:?}, resetting stream",
                        self.config.idle_timeout
                    );
                    self.report.last_stream = stats;
                    self.notify(ReceiverEvent::Stalled(stats));
                    self.write_ready().map_err(ReceiverError::Sink)?;
                }
                last_activity = Instant::now();
            }

            if let Some(timer) = progress.as_mut() {
                if timer.try_fire() {
                    let event = ReceiverEvent::Progress {
                        current: self.session.stats(),
                        lifetime: self.session.lifetime(),
                    };
                    self.notify(event);
                }
            }
        }
    }

    fn on_session_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Registered => {
                tracing::info!("Registered, waiting for stream start");
                self.notify(ReceiverEvent::Registered);
            }
            SessionEvent::StreamStarted => {
                tracing::info!("Stream started");
                self.notify(ReceiverEvent::StreamStarted);
            }
            SessionEvent::EndOfStream(stats) => {
                tracing::info!("End of stream");
                self.finish_stream(stats);
            }
            SessionEvent::Shutdown(stats) => {
                tracing::info!("Server ended the stream");
                self.finish_stream(stats);
            }
            SessionEvent::Media(_) | SessionEvent::Deregistered | SessionEvent::Ignored => {}
        }
    }

    fn finish_stream(&mut self, stats: ReorderStats) {
        if stats == ReorderStats::default() {
            return;
        }
        self.report.streams += 1;
        self.report.last_stream = stats;
        tracing::info!(
            delivered = stats.delivered_packets,
            bytes = stats.delivered_bytes,
            lost = stats.lost_packets,
            out_of_order = stats.out_of_order_packets,
            duplicates = stats.duplicate_packets,
            "Stream finished"
        );
        self.notify(ReceiverEvent::StreamEnded(stats));
    }

    fn notify(&mut self, event: ReceiverEvent) {
        if let Some(observer) = self.observer.as_mut() {
            observer(&event);
        }
    }

    fn send_outgoing(&mut self) {
        while let Some(message) = self.session.pop_outgoing() {
            let Some(server) = self.config.server else {
                continue;
            };
            if let Err(e) = self.socket.send_to(message.as_bytes(), server) {
                tracing::warn!("Failed to send {} to {}: {}", message, server, e);
            }
        }
    }

    fn write_ready(&mut self) -> io::Result<()> {
        let mut wrote = false;
        while let Some(payload) = self.session.pop_ready() {
            self.sink.write_all(&payload)?;
            self.report.bytes_written += payload.len() as u64;
            wrote = true;
        }
        if wrote {
            self.sink.flush()?;
        }
        Ok(())
    }

    /// Best-effort `deregisteruser`, waiting a bounded time for the reply
    fn deregister(&mut self) {
        if self.session.is_deregistered() {
            return;
        }
        self.send_outgoing();

        let deadline = Instant::now() + self.config.deregister_timeout;
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        while !self.session.is_deregistered() && Instant::now() < deadline {
            match self.socket.recv_from(&mut buf) {
                Ok(Some((n, _))) => {
                    let _ = self.session.handle_datagram(&buf[..n]);
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::debug!("Receive failed while deregistering: {}", e);
                    break;
                }
            }
        }

        if self.session.is_deregistered() {
            tracing::info!("Deregistered");
        } else {
            tracing::warn!("No deregistration acknowledgement, exiting anyway");
        }
    }
}
