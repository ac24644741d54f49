//! Transmission pacer
//!
//! Reads a finite payload source in fixed-size chunks, frames each chunk
//! with a sequence number and emits it to every destination on an absolute
//! schedule derived from the media bitrate. A failed send to one destination
//! is logged and counted; it never stops delivery to the others.
//!
//! In session mode the destination list is the live client registry. A
//! snapshot is taken for every packet, so clients that join or leave take
//! effect on the next packet. The lock is held only while copying.

use crate::registry::ClientRegistry;
use bytes::Bytes;
use std::collections::HashMap;
use std::io::{self, Read};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use vidcast_io::{MediaSocket, PacingSchedule, Shutdown};
use vidcast_protocol::{Packet, PacketError, SeqNumber, Sentinel, INITIAL_SEQ, MAX_PAYLOAD_SIZE};

/// Default consecutive send failures before a registered client is dropped
pub const DEFAULT_EVICT_AFTER_FAILURES: u32 = 3;

/// Pacer errors
#[derive(Error, Debug)]
pub enum PacerError {
    #[error("Failed to read payload source: {0}")]
    Source(#[from] io::Error),

    #[error("Packet error: {0}")]
    Packet(#[from] PacketError),
}

/// Where packets go
#[derive(Clone)]
pub enum Destinations {
    /// Fixed receivers (unicast list or a multicast group); the stream ends
    /// with `END_OF_STREAM`
    Broadcast(Vec<SocketAddr>),
    /// Registered clients; the stream is bracketed by `streamstart` and
    /// `streamshutdown`
    Registered(Arc<ClientRegistry>),
}

impl Destinations {
    /// Current destination list
    pub fn snapshot(&self) -> Vec<SocketAddr> {
        match self {
            Destinations::Broadcast(addrs) => addrs.clone(),
            Destinations::Registered(registry) => registry.snapshot(),
        }
    }

    /// Sentinel announcing the stream, if the mode has one
    pub fn opening_sentinel(&self) -> Option<Sentinel> {
        match self {
            Destinations::Broadcast(_) => None,
            Destinations::Registered(_) => Some(Sentinel::StreamStart),
        }
    }

    /// Sentinel closing the stream
    pub fn closing_sentinel(&self) -> Sentinel {
        match self {
            Destinations::Broadcast(_) => Sentinel::EndOfStream,
            Destinations::Registered(_) => Sentinel::StreamShutdown,
        }
    }
}

/// Pacer configuration
#[derive(Debug, Clone, Copy)]
pub struct PacerConfig {
    /// Payload bytes per packet
    pub chunk_size: usize,
    /// Drop a registered client after this many consecutive send failures
    /// (0 keeps failing clients)
    pub evict_after_failures: u32,
}

impl Default for PacerConfig {
    fn default() -> Self {
        PacerConfig {
            chunk_size: MAX_PAYLOAD_SIZE,
            evict_after_failures: DEFAULT_EVICT_AFTER_FAILURES,
        }
    }
}

/// Outcome of one stream
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PacerStats {
    /// Media packets dispatched (counted once regardless of fan-out)
    pub packets_sent: u64,
    /// Media payload bytes dispatched (counted once)
    pub bytes_sent: u64,
    /// Individual datagrams that failed to send
    pub send_failures: u64,
    /// Clients dropped after repeated failures
    pub evicted: u64,
    /// Wall time from first to last packet
    pub duration: Duration,
    /// Worst lateness against the schedule
    pub max_lag: Duration,
    /// False if shutdown cut the stream short
    pub completed: bool,
}

impl PacerStats {
    /// Accumulate another stream's figures
    pub fn absorb(&mut self, other: &PacerStats) {
        self.packets_sent += other.packets_sent;
        self.bytes_sent += other.bytes_sent;
        self.send_failures += other.send_failures;
        self.evicted += other.evicted;
        self.duration += other.duration;
        self.max_lag = self.max_lag.max(other.max_lag);
    }
}

/// Rate-paced packet transmitter
pub struct Pacer<'a> {
    socket: &'a MediaSocket,
    destinations: Destinations,
    config: PacerConfig,
    shutdown: Shutdown,
    /// Consecutive failures per destination
    failures: HashMap<SocketAddr, u32>,
}

impl<'a> Pacer<'a> {
    pub fn new(
        socket: &'a MediaSocket,
        destinations: Destinations,
        config: PacerConfig,
        shutdown: Shutdown,
    ) -> Self {
        let chunk_size = config.chunk_size.clamp(1, MAX_PAYLOAD_SIZE);
        Pacer {
            socket,
            destinations,
            config: PacerConfig {
                chunk_size,
                ..config
            },
            shutdown,
            failures: HashMap::new(),
        }
    }

    /// Stream `source` at `bitrate_bps`, then send the closing sentinel
    ///
    /// The closing sentinel is sent even when shutdown interrupts the stream
    /// or the source fails mid-way.
    pub fn stream<R: Read>(&mut self, mut source: R, bitrate_bps: u64) -> Result<PacerStats, PacerError> {
        let mut stats = PacerStats::default();
        let mut seq = INITIAL_SEQ;

        if let Some(opening) = self.destinations.opening_sentinel() {
            let bytes = Packet::sentinel(seq - 1, opening).to_bytes();
            self.dispatch(&bytes, &mut stats);
        }

        let result = self.stream_chunks(&mut source, bitrate_bps, &mut seq, &mut stats);

        let closing = Packet::sentinel(seq, self.destinations.closing_sentinel()).to_bytes();
        self.dispatch(&closing, &mut stats);

        tracing::info!(
            packets = stats.packets_sent,
            bytes = stats.bytes_sent,
            failures = stats.send_failures,
            max_lag_us = stats.max_lag.as_micros() as u64,
            completed = stats.completed,
            "Stream finished"
        );

        result.map(|()| stats)
    }

    fn stream_chunks<R: Read>(
        &mut self,
        source: &mut R,
        bitrate_bps: u64,
        seq: &mut SeqNumber,
        stats: &mut PacerStats,
    ) -> Result<(), PacerError> {
        let mut buf = vec![0u8; self.config.chunk_size];
        let mut schedule = PacingSchedule::new(bitrate_bps);

        loop {
            let n = read_chunk(source, &mut buf)?;
            if n == 0 {
                stats.completed = true;
                break;
            }

            if !self.shutdown.sleep_until(schedule.next_deadline()) {
                tracing::info!("Shutdown requested, stopping stream at packet {}", seq);
                break;
            }
            stats.max_lag = stats.max_lag.max(schedule.lag(Instant::now()));

            let packet = Packet::new(*seq, Bytes::copy_from_slice(&buf[..n]))?;
            self.dispatch(&packet.to_bytes(), stats);

            stats.packets_sent += 1;
            stats.bytes_sent += n as u64;
            schedule.advance(n);
            seq.increment();
        }

        stats.duration = schedule.start().elapsed();
        Ok(())
    }

    /// Send one datagram to the current destination snapshot
    fn dispatch(&mut self, datagram: &[u8], stats: &mut PacerStats) {
        for addr in self.destinations.snapshot() {
            match self.socket.send_to(datagram, addr) {
                Ok(_) => {
                    self.failures.remove(&addr);
                }
                Err(e) => {
                    stats.send_failures += 1;
                    let count = self.failures.entry(addr).or_insert(0);
                    *count += 1;
                    tracing::warn!("Failed to send to {} ({} in a row): {}", addr, count, e);

                    if let Destinations::Registered(registry) = &self.destinations {
                        let limit = self.config.evict_after_failures;
                        if limit > 0 && *count >= limit && registry.deregister(&addr) {
                            stats.evicted += 1;
                            self.failures.remove(&addr);
                            tracing::warn!("Dropped client {} after {} failed sends", addr, limit);
                        }
                    }
                }
            }
        }
    }
}

/// Fill `buf` from `source`, short only at end of input
fn read_chunk<R: Read>(source: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match source.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use vidcast_protocol::{Datagram, Frame};

    fn loopback() -> MediaSocket {
        let socket = MediaSocket::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        socket
            .set_read_timeout(Some(Duration::from_millis(500)))
            .unwrap();
        socket
    }

    fn collect(socket: &MediaSocket) -> Vec<Frame> {
        let mut frames = Vec::new();
        let mut buf = [0u8; 2048];
        while let Ok(Some((n, _))) = socket.recv_from(&mut buf) {
            match Datagram::classify(&buf[..n]).unwrap() {
                Datagram::Frame(frame) => frames.push(frame),
                Datagram::Control(c) => panic!("unexpected control {}", c),
            }
        }
        frames
    }

    #[test]
    fn test_read_chunk_handles_short_reads() {
        struct Trickle(Cursor<Vec<u8>>);
        impl Read for Trickle {
            fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
                let len = buf.len().min(3);
                self.0.read(&mut buf[..len])
            }
        }

        let mut source = Trickle(Cursor::new((0..10u8).collect()));
        let mut buf = [0u8; 8];
        assert_eq!(read_chunk(&mut source, &mut buf).unwrap(), 8);
        assert_eq!(read_chunk(&mut source, &mut buf).unwrap(), 2);
        assert_eq!(read_chunk(&mut source, &mut buf).unwrap(), 0);
    }

    #[test]
    fn test_broadcast_stream_ends_with_end_of_stream() {
        let sender = loopback();
        let receiver = loopback();
        let mut pacer = Pacer::new(
            &sender,
            Destinations::Broadcast(vec![receiver.local_addr().unwrap()]),
            PacerConfig {
                chunk_size: 100,
                ..PacerConfig::default()
            },
            Shutdown::never(),
        );

        let stats = pacer.stream(Cursor::new(vec![7u8; 250]), 10_000_000).unwrap();
        assert_eq!(stats.packets_sent, 3);
        assert_eq!(stats.bytes_sent, 250);
        assert!(stats.completed);

        let frames = collect(&receiver);
        assert_eq!(frames.len(), 4);
        let seqs: Vec<u32> = frames.iter().map(|f| f.seq().as_raw()).collect();
        assert_eq!(seqs, vec![1, 2, 3, 4]);
        match &frames[2] {
            Frame::Media(p) => assert_eq!(p.payload.len(), 50),
            other => panic!("expected media, got {:?}", other),
        }
        assert!(matches!(
            frames[3],
            Frame::Sentinel {
                sentinel: Sentinel::EndOfStream,
                ..
            }
        ));
    }

    #[test]
    fn test_registered_stream_is_bracketed() {
        let sender = loopback();
        let receiver = loopback();
        let registry = Arc::new(ClientRegistry::default());
        registry.register(receiver.local_addr().unwrap()).unwrap();

        let mut pacer = Pacer::new(
            &sender,
            Destinations::Registered(registry),
            PacerConfig::default(),
            Shutdown::never(),
        );
        pacer.stream(Cursor::new(vec![1u8; 10]), 1_000_000).unwrap();

        let frames = collect(&receiver);
        assert_eq!(frames.len(), 3);
        assert!(matches!(
            frames[0],
            Frame::Sentinel {
                sentinel: Sentinel::StreamStart,
                ..
            }
        ));
        assert!(matches!(frames[1], Frame::Media(_)));
        assert!(matches!(
            frames[2],
            Frame::Sentinel {
                sentinel: Sentinel::StreamShutdown,
                ..
            }
        ));
    }

    #[test]
    fn test_empty_registry_streams_without_error() {
        let sender = loopback();
        let mut pacer = Pacer::new(
            &sender,
            Destinations::Registered(Arc::new(ClientRegistry::default())),
            PacerConfig::default(),
            Shutdown::never(),
        );
        let stats = pacer.stream(Cursor::new(vec![0u8; 3000]), 100_000_000).unwrap();
        assert_eq!(stats.packets_sent, 3);
        assert_eq!(stats.send_failures, 0);
    }

    #[test]
    fn test_shutdown_stops_stream_and_still_closes() {
        let sender = loopback();
        let receiver = loopback();
        let (handle, shutdown) = vidcast_io::shutdown_channel();
        handle.trigger();

        let mut pacer = Pacer::new(
            &sender,
            Destinations::Broadcast(vec![receiver.local_addr().unwrap()]),
            PacerConfig::default(),
            shutdown,
        );
        let stats = pacer.stream(Cursor::new(vec![0u8; 10_000]), 1_000).unwrap();
        assert!(!stats.completed);
        assert_eq!(stats.packets_sent, 0);

        let frames = collect(&receiver);
        assert_eq!(frames.len(), 1);
        assert!(matches!(
            frames[0],
            Frame::Sentinel {
                sentinel: Sentinel::EndOfStream,
                ..
            }
        ));
    }

    /// Sending IPv6 from an IPv4 socket fails immediately on every packet
    fn unreachable() -> SocketAddr {
        "[::1]:9".parse().unwrap()
    }

    #[test]
    fn test_failed_destination_does_not_block_others() {
        let sender = loopback();
        let receiver = loopback();
        let mut pacer = Pacer::new(
            &sender,
            Destinations::Broadcast(vec![unreachable(), receiver.local_addr().unwrap()]),
            PacerConfig {
                chunk_size: 100,
                ..PacerConfig::default()
            },
            Shutdown::never(),
        );

        let stats = pacer.stream(Cursor::new(vec![3u8; 300]), 10_000_000).unwrap();
        assert_eq!(stats.packets_sent, 3);
        // Every media packet plus the closing sentinel
        assert_eq!(stats.send_failures, 4);
        // Broadcast destinations are never evicted
        assert_eq!(stats.evicted, 0);

        let seqs: Vec<u32> = collect(&receiver).iter().map(|f| f.seq().as_raw()).collect();
        assert_eq!(seqs, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_unreachable_client_is_evicted() {
        let sender = loopback();
        let receiver = loopback();
        let receiver_addr = receiver.local_addr().unwrap();
        let registry = Arc::new(ClientRegistry::default());
        registry.register(unreachable()).unwrap();
        registry.register(receiver_addr).unwrap();

        let mut pacer = Pacer::new(
            &sender,
            Destinations::Registered(registry.clone()),
            PacerConfig {
                chunk_size: 100,
                evict_after_failures: 3,
            },
            Shutdown::never(),
        );
        let stats = pacer.stream(Cursor::new(vec![5u8; 300]), 10_000_000).unwrap();

        // Opening sentinel and the first two media packets fail, then it is gone
        assert_eq!(stats.send_failures, 3);
        assert_eq!(stats.evicted, 1);
        assert_eq!(registry.snapshot(), vec![receiver_addr]);

        let frames = collect(&receiver);
        assert_eq!(frames.len(), 5);
        assert!(matches!(
            frames[4],
            Frame::Sentinel {
                sentinel: Sentinel::StreamShutdown,
                ..
            }
        ));
    }

    #[test]
    fn test_eviction_disabled_with_zero_limit() {
        let sender = loopback();
        let registry = Arc::new(ClientRegistry::default());
        registry.register(unreachable()).unwrap();

        let mut pacer = Pacer::new(
            &sender,
            Destinations::Registered(registry.clone()),
            PacerConfig {
                chunk_size: 100,
                evict_after_failures: 0,
            },
            Shutdown::never(),
        );
        let stats = pacer.stream(Cursor::new(vec![5u8; 500]), 10_000_000).unwrap();
        assert_eq!(stats.send_failures, 7);
        assert_eq!(stats.evicted, 0);
        assert_eq!(registry.len(), 1);
    }
}
