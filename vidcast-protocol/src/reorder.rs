//! Receiver-side reorder buffer and gap accounting
//!
//! Payloads are released strictly in sequence order. Packets that arrive
//! ahead of their turn wait in an ordered map; packets whose slot has already
//! passed are counted and dropped. A gap is only counted as lost once it is
//! given up on: when the buffer span cap forces the window forward, or when
//! the stream is flushed at an idle timeout or at the end of a stream.
//!
//! Sequence numbers are unwrapped into a 64-bit "extended" space relative to
//! `next_expected`, so the ordered map stays ordered across the 2^32 wrap.

use crate::packet::Packet;
use crate::sequence::{SeqNumber, INITIAL_SEQ};
use bytes::Bytes;
use std::collections::{BTreeMap, VecDeque};

/// Default cap on how far ahead of `next_expected` a packet may be buffered
pub const DEFAULT_MAX_SPAN: u32 = 1024;

/// Offset added to extended sequence numbers so late packets never underflow
const EXT_ORIGIN: u64 = 1 << 32;

/// How `next_expected` is chosen after a reset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Anchor {
    /// Always restart at this sequence number (session mode)
    Fixed(SeqNumber),
    /// Adopt the first sequence number that arrives (broadcast receivers
    /// that may join mid-stream)
    FirstPacket,
}

/// Reorder tracker configuration
#[derive(Debug, Clone, Copy)]
pub struct ReorderConfig {
    pub anchor: Anchor,
    /// Maximum distance ahead of `next_expected` kept in the buffer
    pub max_span: u32,
}

impl Default for ReorderConfig {
    fn default() -> Self {
        ReorderConfig {
            anchor: Anchor::Fixed(INITIAL_SEQ),
            max_span: DEFAULT_MAX_SPAN,
        }
    }
}

/// Per-session delivery counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReorderStats {
    /// Payloads released to the sink
    pub delivered_packets: u64,
    /// Payload bytes released to the sink
    pub delivered_bytes: u64,
    /// Sequence numbers given up on without ever arriving
    pub lost_packets: u64,
    /// Packets that arrived after a higher sequence number had been seen
    pub out_of_order_packets: u64,
    /// Second copies of a packet still waiting in the buffer
    pub duplicate_packets: u64,
}

impl ReorderStats {
    fn accumulate(&mut self, other: &ReorderStats) {
        self.delivered_packets += other.delivered_packets;
        self.delivered_bytes += other.delivered_bytes;
        self.lost_packets += other.lost_packets;
        self.out_of_order_packets += other.out_of_order_packets;
        self.duplicate_packets += other.duplicate_packets;
    }
}

/// Outcome of pushing one packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arrival {
    /// The packet was next in line; `drained` buffered packets followed it
    Delivered { drained: usize },
    /// Arrived early and is waiting for the gap before it
    Buffered,
    /// Its slot has already passed; discarded
    Late,
    /// Already waiting in the buffer; discarded
    Duplicate,
}

/// Reorder buffer with loss and out-of-order accounting
pub struct ReorderTracker {
    config: ReorderConfig,
    /// Extended `next_expected`; `None` until anchored
    next_ext: Option<u64>,
    /// Highest extended sequence number seen this session
    highest_seen: Option<u64>,
    /// Early packets keyed by extended sequence number
    pending: BTreeMap<u64, Bytes>,
    /// Payloads released in order, waiting to be written to the sink
    ready: VecDeque<Bytes>,
    stats: ReorderStats,
    /// Totals of all finished sessions
    finished: ReorderStats,
}

impl ReorderTracker {
    /// Create a new tracker
    pub fn new(config: ReorderConfig) -> Self {
        let max_span = config.max_span.max(1);
        let config = ReorderConfig { max_span, ..config };
        ReorderTracker {
            config,
            next_ext: Self::initial_anchor(config.anchor),
            highest_seen: None,
            pending: BTreeMap::new(),
            ready: VecDeque::new(),
            stats: ReorderStats::default(),
            finished: ReorderStats::default(),
        }
    }

    fn initial_anchor(anchor: Anchor) -> Option<u64> {
        match anchor {
            Anchor::Fixed(seq) => Some(EXT_ORIGIN + seq.as_raw() as u64),
            Anchor::FirstPacket => None,
        }
    }

    /// Map a wire sequence number into the extended space around `next_ext`
    fn extend(seq: SeqNumber, next_ext: u64) -> u64 {
        let next = SeqNumber::new(next_ext as u32);
        (next_ext as i64 + next.distance_to(seq) as i64) as u64
    }

    /// Process one media packet
    pub fn push(&mut self, packet: Packet) -> Arrival {
        let next_ext = match self.next_ext {
            Some(next) => next,
            None => {
                let anchored = EXT_ORIGIN + packet.seq.as_raw() as u64;
                self.next_ext = Some(anchored);
                anchored
            }
        };
        let ext = Self::extend(packet.seq, next_ext);

        if ext < next_ext {
            self.stats.out_of_order_packets += 1;
            tracing::debug!(
                seq = packet.seq.as_raw(),
                expected = next_ext as u32,
                "late packet discarded"
            );
            return Arrival::Late;
        }

        if self.pending.contains_key(&ext) {
            self.stats.duplicate_packets += 1;
            return Arrival::Duplicate;
        }

        match self.highest_seen {
            Some(highest) if ext < highest => self.stats.out_of_order_packets += 1,
            Some(highest) if ext == highest => {}
            _ => self.highest_seen = Some(ext),
        }

        let span = self.config.max_span as u64;
        if ext - next_ext >= span {
            self.give_up_below(ext + 1 - span);
            // The new floor may already be buffered
            self.drain();
        }

        if Some(ext) == self.next_ext {
            self.deliver(packet.payload);
            self.next_ext = Some(ext + 1);
            let drained = self.drain();
            Arrival::Delivered { drained }
        } else {
            self.pending.insert(ext, packet.payload);
            Arrival::Buffered
        }
    }

    fn deliver(&mut self, payload: Bytes) {
        self.stats.delivered_packets += 1;
        self.stats.delivered_bytes += payload.len() as u64;
        self.ready.push_back(payload);
    }

    /// Release consecutive buffered packets starting at `next_expected`
    fn drain(&mut self) -> usize {
        let Some(mut next) = self.next_ext else {
            return 0;
        };
        let mut count = 0;
        while let Some(payload) = self.pending.remove(&next) {
            self.deliver(payload);
            next += 1;
            count += 1;
        }
        self.next_ext = Some(next);
        count
    }

    /// Abandon every slot below `floor`: buffered payloads are released in
    /// order, missing ones are counted lost. Returns the number lost.
    fn give_up_below(&mut self, floor: u64) -> u64 {
        let Some(mut cursor) = self.next_ext else {
            return 0;
        };
        if floor <= cursor {
            return 0;
        }

        let keep = self.pending.split_off(&floor);
        let abandoned = std::mem::replace(&mut self.pending, keep);

        let mut lost = 0;
        for (ext, payload) in abandoned {
            lost += ext - cursor;
            self.deliver(payload);
            cursor = ext + 1;
        }
        lost += floor - cursor;

        if lost > 0 {
            tracing::debug!(lost, "gave up on missing packets");
        }
        self.stats.lost_packets += lost;
        self.next_ext = Some(floor);
        lost
    }

    /// Release everything buffered, counting the gaps in front of buffered
    /// packets as lost. Returns the number of packets counted lost.
    pub fn flush(&mut self) -> u64 {
        match self.pending.last_key_value() {
            Some((&last, _)) => {
                let lost = self.give_up_below(last + 1);
                self.drain();
                lost
            }
            None => 0,
        }
    }

    /// Finish the current session: flush, roll the counters into the
    /// lifetime totals and start over from the configured anchor.
    ///
    /// Returns the reconciled counters of the session that just ended.
    pub fn reset(&mut self) -> ReorderStats {
        self.flush();
        let session = self.stats;
        self.finished.accumulate(&session);
        self.stats = ReorderStats::default();
        self.next_ext = Self::initial_anchor(self.config.anchor);
        self.highest_seen = None;
        session
    }

    /// Pop the next payload ready for the sink
    pub fn pop_ready(&mut self) -> Option<Bytes> {
        self.ready.pop_front()
    }

    /// Number of payloads ready for the sink
    pub fn ready_count(&self) -> usize {
        self.ready.len()
    }

    /// Number of early packets waiting in the buffer
    pub fn buffered(&self) -> usize {
        self.pending.len()
    }

    /// Next sequence number the sink is waiting for
    pub fn next_expected(&self) -> Option<SeqNumber> {
        self.next_ext.map(|ext| SeqNumber::new(ext as u32))
    }

    /// Counters of the current session
    pub fn stats(&self) -> ReorderStats {
        self.stats
    }

    /// Counters of all sessions including the current one
    pub fn lifetime(&self) -> ReorderStats {
        let mut total = self.finished;
        total.accumulate(&self.stats);
        total
    }
}

impl Default for ReorderTracker {
    fn default() -> Self {
        Self::new(ReorderConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet(seq: u32) -> Packet {
        Packet {
            seq: SeqNumber::new(seq),
            payload: Bytes::from(seq.to_be_bytes().to_vec()),
        }
    }

    fn drain_seqs(tracker: &mut ReorderTracker) -> Vec<u32> {
        std::iter::from_fn(|| tracker.pop_ready())
            .map(|p| u32::from_be_bytes([p[0], p[1], p[2], p[3]]))
            .collect()
    }

    #[test]
    fn test_in_order() {
        let mut tracker = ReorderTracker::default();
        for seq in 1..=5 {
            assert_eq!(tracker.push(packet(seq)), Arrival::Delivered { drained: 0 });
        }
        assert_eq!(drain_seqs(&mut tracker), vec![1, 2, 3, 4, 5]);
        assert_eq!(tracker.stats().lost_packets, 0);
        assert_eq!(tracker.stats().out_of_order_packets, 0);
    }

    #[test]
    fn test_swapped_pair() {
        let mut tracker = ReorderTracker::default();
        let arrivals: Vec<Arrival> = [1, 2, 4, 3, 5]
            .into_iter()
            .map(|s| tracker.push(packet(s)))
            .collect();

        assert_eq!(arrivals[2], Arrival::Buffered);
        assert_eq!(arrivals[3], Arrival::Delivered { drained: 1 });
        assert_eq!(drain_seqs(&mut tracker), vec![1, 2, 3, 4, 5]);

        let stats = tracker.stats();
        assert_eq!(stats.lost_packets, 0);
        assert_eq!(stats.out_of_order_packets, 1);
    }

    #[test]
    fn test_gap_counted_on_flush() {
        let mut tracker = ReorderTracker::default();
        for seq in [1, 3, 4] {
            tracker.push(packet(seq));
        }
        assert_eq!(tracker.stats().lost_packets, 0);
        assert_eq!(tracker.buffered(), 2);

        assert_eq!(tracker.flush(), 1);
        assert_eq!(drain_seqs(&mut tracker), vec![1, 3, 4]);
        assert_eq!(tracker.stats().lost_packets, 1);
        assert_eq!(tracker.next_expected(), Some(SeqNumber::new(5)));
    }

    #[test]
    fn test_late_packet_discarded() {
        let mut tracker = ReorderTracker::default();
        tracker.push(packet(1));
        tracker.push(packet(2));
        assert_eq!(tracker.push(packet(1)), Arrival::Late);
        assert_eq!(drain_seqs(&mut tracker), vec![1, 2]);
        assert_eq!(tracker.stats().out_of_order_packets, 1);
    }

    #[test]
    fn test_duplicate_in_buffer() {
        let mut tracker = ReorderTracker::default();
        tracker.push(packet(3));
        assert_eq!(tracker.push(packet(3)), Arrival::Duplicate);
        assert_eq!(tracker.stats().duplicate_packets, 1);
        assert_eq!(tracker.buffered(), 1);
    }

    #[test]
    fn test_wraparound_is_in_order() {
        let mut tracker = ReorderTracker::new(ReorderConfig {
            anchor: Anchor::Fixed(SeqNumber::new(u32::MAX - 1)),
            ..ReorderConfig::default()
        });
        for seq in [u32::MAX - 1, u32::MAX, 0, 1] {
            assert!(matches!(tracker.push(packet(seq)), Arrival::Delivered { .. }));
        }
        assert_eq!(drain_seqs(&mut tracker), vec![u32::MAX - 1, u32::MAX, 0, 1]);
        assert_eq!(tracker.stats().lost_packets, 0);
        assert_eq!(tracker.stats().out_of_order_packets, 0);
    }

    #[test]
    fn test_span_cap_slides_window() {
        let mut tracker = ReorderTracker::new(ReorderConfig {
            anchor: Anchor::Fixed(SeqNumber::new(1)),
            max_span: 4,
        });
        tracker.push(packet(3));
        // 1..=6 must be given up for 10 to fit in a span of 4 (7..=10)
        tracker.push(packet(10));

        assert_eq!(tracker.next_expected(), Some(SeqNumber::new(7)));
        assert_eq!(tracker.stats().lost_packets, 5);
        assert_eq!(drain_seqs(&mut tracker), vec![3]);
        assert_eq!(tracker.buffered(), 1);
    }

    #[test]
    fn test_span_cap_releases_buffered_floor() {
        let mut tracker = ReorderTracker::new(ReorderConfig {
            anchor: Anchor::Fixed(SeqNumber::new(1)),
            max_span: 4,
        });
        tracker.push(packet(3));
        tracker.push(packet(4));
        // Window becomes 3..=6; 3 and 4 are already here
        tracker.push(packet(6));

        assert_eq!(tracker.stats().lost_packets, 2);
        assert_eq!(drain_seqs(&mut tracker), vec![3, 4]);
        assert_eq!(tracker.next_expected(), Some(SeqNumber::new(5)));
        assert_eq!(tracker.buffered(), 1);
    }

    #[test]
    fn test_reset_rolls_into_lifetime() {
        let mut tracker = ReorderTracker::default();
        for seq in [1, 3] {
            tracker.push(packet(seq));
        }
        let session = tracker.reset();
        assert_eq!(session.lost_packets, 1);
        assert_eq!(session.delivered_packets, 2);
        assert_eq!(tracker.stats(), ReorderStats::default());
        assert_eq!(tracker.next_expected(), Some(INITIAL_SEQ));

        tracker.push(packet(1));
        assert_eq!(tracker.lifetime().delivered_packets, 3);
        assert_eq!(tracker.lifetime().lost_packets, 1);
    }

    #[test]
    fn test_first_packet_anchor() {
        let mut tracker = ReorderTracker::new(ReorderConfig {
            anchor: Anchor::FirstPacket,
            ..ReorderConfig::default()
        });
        assert_eq!(tracker.next_expected(), None);
        tracker.push(packet(500));
        tracker.push(packet(501));
        assert_eq!(drain_seqs(&mut tracker), vec![500, 501]);

        tracker.reset();
        assert_eq!(tracker.next_expected(), None);
        tracker.push(packet(7));
        assert_eq!(drain_seqs(&mut tracker), vec![7]);
    }
}
