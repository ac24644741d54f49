//! Property-based tests for the reorder tracker
//!
//! Whatever order packets arrive in, the sink must see each payload once,
//! in strictly increasing sequence order.

use bytes::Bytes;
use proptest::prelude::*;
use vidcast_protocol::{Anchor, Packet, ReorderConfig, ReorderTracker, SeqNumber};

fn packet(seq: u32) -> Packet {
    Packet::new(SeqNumber::new(seq), Bytes::from(seq.to_be_bytes().to_vec())).unwrap()
}

fn delivered(tracker: &mut ReorderTracker) -> Vec<u32> {
    std::iter::from_fn(|| tracker.pop_ready())
        .map(|p| u32::from_be_bytes([p[0], p[1], p[2], p[3]]))
        .collect()
}

fn tracker_at(base: u32) -> ReorderTracker {
    ReorderTracker::new(ReorderConfig {
        anchor: Anchor::Fixed(SeqNumber::new(base)),
        ..ReorderConfig::default()
    })
}

/// A shuffled run of `len` consecutive sequence numbers
fn permutation_strategy(len: std::ops::Range<usize>) -> impl Strategy<Value = Vec<u32>> {
    len.prop_flat_map(|n| Just((0..n as u32).collect::<Vec<_>>()).prop_shuffle())
}

proptest! {
    #[test]
    fn prop_any_permutation_is_delivered_in_order(
        base in any::<u32>(),
        offsets in permutation_strategy(1..200),
    ) {
        let mut tracker = tracker_at(base);
        for offset in &offsets {
            tracker.push(packet(base.wrapping_add(*offset)));
        }

        let expected: Vec<u32> = (0..offsets.len() as u32).map(|o| base.wrapping_add(o)).collect();
        prop_assert_eq!(delivered(&mut tracker), expected);
        prop_assert_eq!(tracker.stats().lost_packets, 0);
        prop_assert_eq!(tracker.stats().duplicate_packets, 0);
        prop_assert_eq!(tracker.buffered(), 0);
    }

    #[test]
    fn prop_duplicates_never_reach_the_sink(
        offsets in permutation_strategy(1..100),
        repeats in prop::collection::vec(0usize..100, 0..50),
    ) {
        let mut arrivals: Vec<u32> = offsets.clone();
        for r in repeats {
            let pos = r % arrivals.len();
            let copy = arrivals[pos];
            arrivals.insert(pos, copy);
        }

        let mut tracker = tracker_at(1);
        for offset in &arrivals {
            tracker.push(packet(1 + offset));
        }

        let expected: Vec<u32> = (1..=offsets.len() as u32).collect();
        prop_assert_eq!(delivered(&mut tracker), expected);
    }

    #[test]
    fn prop_flush_counts_interior_gaps(
        offsets in permutation_strategy(2..150),
        keep in prop::collection::vec(any::<bool>(), 150),
    ) {
        // Drop some packets, but always keep the highest one so every gap
        // is interior and therefore detectable
        let highest = offsets.len() as u32 - 1;
        let arrivals: Vec<u32> = offsets
            .iter()
            .copied()
            .filter(|o| *o == highest || keep[*o as usize])
            .collect();

        let mut tracker = tracker_at(1);
        for offset in &arrivals {
            tracker.push(packet(1 + offset));
        }
        tracker.flush();

        let mut expected: Vec<u32> = arrivals.iter().map(|o| 1 + o).collect();
        expected.sort_unstable();
        prop_assert_eq!(delivered(&mut tracker), expected);
        prop_assert_eq!(
            tracker.stats().lost_packets,
            offsets.len() as u64 - arrivals.len() as u64
        );
    }
}
