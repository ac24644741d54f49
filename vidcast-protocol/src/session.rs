//! Receiver session state machine
//!
//! Drives the registration handshake and stream lifecycle on the receiving
//! side. The machine does no I/O: datagrams and timer expiries are fed in,
//! and control messages to send are queued for the caller to pick up with
//! [`ReceiverSession::pop_outgoing`].
//!
//! ```text
//! AwaitingRegistration --registerclientok--> AwaitingStreamStart
//! AwaitingStreamStart  --streamstart------> Streaming
//! Streaming            --streamshutdown---> Terminated (deregisteruser queued)
//! ```
//!
//! Broadcast sessions have no handshake: they start in `Streaming` and treat
//! `END_OF_STREAM` as a reset, so one receiver can follow many streams.

use crate::packet::{ControlMessage, Datagram, Frame, PacketError, Sentinel};
use crate::reorder::{Anchor, Arrival, ReorderConfig, ReorderStats, ReorderTracker};
use crate::sequence::INITIAL_SEQ;
use bytes::Bytes;
use std::collections::VecDeque;
use thiserror::Error;

/// Default number of `registerclient` attempts before giving up
pub const DEFAULT_REGISTRATION_ATTEMPTS: u32 = 5;

/// Session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// `registerclient` sent, waiting for `registerclientok`
    AwaitingRegistration,
    /// Registered, discarding traffic until `streamstart`
    AwaitingStreamStart,
    /// Delivering media
    Streaming,
    /// Stream over; only `deregisteruserok` is still of interest
    Terminated,
}

/// Whether the receiver registers with the server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    /// Per-client session with registration handshake
    Registered,
    /// Passive receiver of a broadcast or multicast stream
    Broadcast,
}

/// Session configuration
#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    pub mode: SessionMode,
    /// Total `registerclient` sends allowed, including the first
    pub max_registration_attempts: u32,
    pub reorder: ReorderConfig,
}

impl SessionConfig {
    /// Per-client session: fixed base sequence number
    pub fn registered() -> Self {
        SessionConfig {
            mode: SessionMode::Registered,
            max_registration_attempts: DEFAULT_REGISTRATION_ATTEMPTS,
            reorder: ReorderConfig {
                anchor: Anchor::Fixed(INITIAL_SEQ),
                ..ReorderConfig::default()
            },
        }
    }

    /// Broadcast receiver: anchor on the first packet after every reset
    pub fn broadcast() -> Self {
        SessionConfig {
            mode: SessionMode::Broadcast,
            max_registration_attempts: 0,
            reorder: ReorderConfig {
                anchor: Anchor::FirstPacket,
                ..ReorderConfig::default()
            },
        }
    }
}

/// What a datagram did to the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// Server acknowledged the registration
    Registered,
    /// A new stream began; counters were reset
    StreamStarted,
    /// A media packet was processed
    Media(Arrival),
    /// Broadcast stream ended; carries the reconciled counters of that stream
    EndOfStream(ReorderStats),
    /// Session stream ended; carries the reconciled counters
    Shutdown(ReorderStats),
    /// Server acknowledged the deregistration
    Deregistered,
    /// Not meaningful in the current state; dropped
    Ignored,
}

/// Session errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("No registration acknowledgement after {attempts} attempts")]
    RegistrationTimeout { attempts: u32 },

    #[error("Operation not valid in state {0:?}")]
    InvalidState(SessionState),

    #[error("Packet error: {0}")]
    Packet(#[from] PacketError),
}

/// Receiver-side session
pub struct ReceiverSession {
    config: SessionConfig,
    state: SessionState,
    tracker: ReorderTracker,
    outgoing: VecDeque<ControlMessage>,
    registration_attempts: u32,
    deregistered: bool,
    /// Media packets seen since the last reset
    packets_since_reset: u64,
}

impl ReceiverSession {
    /// Create a new session
    pub fn new(config: SessionConfig) -> Self {
        let state = match config.mode {
            SessionMode::Registered => SessionState::AwaitingRegistration,
            SessionMode::Broadcast => SessionState::Streaming,
        };
        ReceiverSession {
            config,
            state,
            tracker: ReorderTracker::new(config.reorder),
            outgoing: VecDeque::new(),
            registration_attempts: 0,
            deregistered: false,
            packets_since_reset: 0,
        }
    }

    /// Begin the session, queueing the first `registerclient` if needed
    pub fn start(&mut self) {
        if self.state == SessionState::AwaitingRegistration && self.registration_attempts == 0 {
            self.queue_registration();
        }
    }

    fn queue_registration(&mut self) {
        self.registration_attempts += 1;
        self.outgoing.push_back(ControlMessage::RegisterClient);
    }

    /// Called when no `registerclientok` arrived within the retry interval
    pub fn on_registration_timeout(&mut self) -> Result<(), SessionError> {
        if self.state != SessionState::AwaitingRegistration {
            return Err(SessionError::InvalidState(self.state));
        }
        if self.registration_attempts >= self.config.max_registration_attempts {
            return Err(SessionError::RegistrationTimeout {
                attempts: self.registration_attempts,
            });
        }
        tracing::debug!(attempt = self.registration_attempts + 1, "retrying registration");
        self.queue_registration();
        Ok(())
    }

    /// Process one received datagram
    pub fn handle_datagram(&mut self, datagram: &[u8]) -> Result<SessionEvent, SessionError> {
        let datagram = Datagram::classify(datagram)?;

        let event = match (self.state, datagram) {
            (SessionState::AwaitingRegistration, Datagram::Control(ControlMessage::RegisterClientOk)) => {
                self.state = SessionState::AwaitingStreamStart;
                SessionEvent::Registered
            }
            // The server only starts streams for registered clients, so a
            // stream start also proves a lost acknowledgement.
            (
                SessionState::AwaitingRegistration | SessionState::AwaitingStreamStart,
                Datagram::Frame(Frame::Sentinel {
                    sentinel: Sentinel::StreamStart,
                    ..
                }),
            ) => self.begin_stream(),
            (SessionState::Streaming, Datagram::Frame(frame)) => self.handle_frame(frame),
            (SessionState::Terminated, Datagram::Control(ControlMessage::DeregisterUserOk)) => {
                self.deregistered = true;
                SessionEvent::Deregistered
            }
            _ => SessionEvent::Ignored,
        };

        Ok(event)
    }

    fn handle_frame(&mut self, frame: Frame) -> SessionEvent {
        match frame {
            Frame::Media(packet) => {
                self.packets_since_reset += 1;
                SessionEvent::Media(self.tracker.push(packet))
            }
            Frame::Sentinel { sentinel, .. } => match sentinel {
                Sentinel::StreamStart => self.begin_stream(),
                Sentinel::EndOfStream => {
                    self.packets_since_reset = 0;
                    SessionEvent::EndOfStream(self.tracker.reset())
                }
                Sentinel::StreamShutdown => SessionEvent::Shutdown(self.terminate()),
            },
        }
    }

    fn begin_stream(&mut self) -> SessionEvent {
        self.state = SessionState::Streaming;
        self.tracker.reset();
        self.packets_since_reset = 0;
        SessionEvent::StreamStarted
    }

    /// Called when no packet arrived within the idle window
    ///
    /// While streaming this flushes the buffer and restarts accounting from
    /// the base sequence number. Returns the counters of the stalled stream,
    /// or `None` when there was nothing to reset.
    pub fn on_idle_timeout(&mut self) -> Option<ReorderStats> {
        if self.state != SessionState::Streaming || self.packets_since_reset == 0 {
            return None;
        }
        self.packets_since_reset = 0;
        Some(self.tracker.reset())
    }

    /// End the session: reconcile counters and, for registered sessions,
    /// queue `deregisteruser`. Idempotent.
    pub fn terminate(&mut self) -> ReorderStats {
        if self.state == SessionState::Terminated {
            return ReorderStats::default();
        }
        let was_registered = self.state != SessionState::AwaitingRegistration;
        self.state = SessionState::Terminated;
        self.packets_since_reset = 0;
        if self.config.mode == SessionMode::Registered && was_registered {
            self.outgoing.push_back(ControlMessage::DeregisterUser);
        } else {
            self.deregistered = true;
        }
        self.tracker.reset()
    }

    /// Next control message to send to the server
    pub fn pop_outgoing(&mut self) -> Option<ControlMessage> {
        self.outgoing.pop_front()
    }

    /// Next payload ready for the output sink
    pub fn pop_ready(&mut self) -> Option<Bytes> {
        self.tracker.pop_ready()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn mode(&self) -> SessionMode {
        self.config.mode
    }

    pub fn registration_attempts(&self) -> u32 {
        self.registration_attempts
    }

    /// Whether deregistration is complete (or was never needed)
    pub fn is_deregistered(&self) -> bool {
        self.deregistered
    }

    pub fn is_terminated(&self) -> bool {
        self.state == SessionState::Terminated
    }

    /// Counters of the current stream
    pub fn stats(&self) -> ReorderStats {
        self.tracker.stats()
    }

    /// Counters across every stream of this session
    pub fn lifetime(&self) -> ReorderStats {
        self.tracker.lifetime()
    }

    pub fn tracker(&self) -> &ReorderTracker {
        &self.tracker
    }
}
