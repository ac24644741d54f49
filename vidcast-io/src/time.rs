//! Timing utilities
//!
//! The pacer works against an absolute schedule: the deadline of every
//! packet is derived from the stream start and the number of bits already
//! scheduled, never from the time the previous send happened to finish. A
//! late wakeup therefore shortens the next wait instead of accumulating drift.

use std::time::{Duration, Instant};

/// Time needed to emit `bytes` at `bitrate_bps`
pub fn transmission_time(bytes: usize, bitrate_bps: u64) -> Duration {
    bits_to_duration(bytes as u128 * 8, bitrate_bps)
}

fn bits_to_duration(bits: u128, bitrate_bps: u64) -> Duration {
    let nanos = bits * 1_000_000_000 / bitrate_bps.max(1) as u128;
    Duration::from_nanos(nanos.min(u64::MAX as u128) as u64)
}

/// Absolute send schedule for one stream
///
/// Deadline of packet *n* is `start + (bits of packets 0..n) / bitrate`.
/// Recording each packet's real size keeps a shorter final chunk correct.
#[derive(Debug, Clone)]
pub struct PacingSchedule {
    start: Instant,
    bitrate_bps: u64,
    bits_scheduled: u128,
    packets: u64,
}

impl PacingSchedule {
    /// Start a schedule now
    pub fn new(bitrate_bps: u64) -> Self {
        Self::starting_at(Instant::now(), bitrate_bps)
    }

    /// Start a schedule at a given instant
    pub fn starting_at(start: Instant, bitrate_bps: u64) -> Self {
        PacingSchedule {
            start,
            bitrate_bps: bitrate_bps.max(1),
            bits_scheduled: 0,
            packets: 0,
        }
    }

    /// When the next packet is due
    pub fn next_deadline(&self) -> Instant {
        self.start + bits_to_duration(self.bits_scheduled, self.bitrate_bps)
    }

    /// Record that a packet of `payload_bytes` has been emitted
    pub fn advance(&mut self, payload_bytes: usize) {
        self.bits_scheduled += payload_bytes as u128 * 8;
        self.packets += 1;
    }

    /// How far `now` is behind the next deadline (zero when early)
    pub fn lag(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.next_deadline())
    }

    pub fn start(&self) -> Instant {
        self.start
    }

    /// Packets recorded so far
    pub fn packets(&self) -> u64 {
        self.packets
    }
}

/// Timer for periodic operations
///
/// Used for registration retries and periodic statistics.
pub struct Timer {
    interval: Duration,
    last_fire: Instant,
}

impl Timer {
    /// Create a new timer with the given interval
    pub fn new(interval: Duration) -> Self {
        Timer {
            interval,
            last_fire: Instant::now(),
        }
    }

    /// Check if the timer has expired
    pub fn expired(&self) -> bool {
        self.last_fire.elapsed() >= self.interval
    }

    /// Reset the timer
    pub fn reset(&mut self) {
        self.last_fire = Instant::now();
    }

    /// Fire the timer if expired, returning true if it fired
    pub fn try_fire(&mut self) -> bool {
        if self.expired() {
            self.reset();
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_transmission_time() {
        // 1468 bytes at 2 Mbit/s
        assert_eq!(transmission_time(1468, 2_000_000), Duration::from_micros(5872));
        assert_eq!(transmission_time(1000, 8_000), Duration::from_secs(1));
    }

    #[test]
    fn test_schedule_is_absolute() {
        let start = Instant::now();
        let mut schedule = PacingSchedule::starting_at(start, 8_000);
        assert_eq!(schedule.next_deadline(), start);

        schedule.advance(1000);
        assert_eq!(schedule.next_deadline(), start + Duration::from_secs(1));

        // Shorter final chunk
        schedule.advance(500);
        assert_eq!(schedule.next_deadline(), start + Duration::from_millis(1500));
        assert_eq!(schedule.packets(), 2);
    }

    #[test]
    fn test_lag() {
        let start = Instant::now();
        let schedule = PacingSchedule::starting_at(start, 8_000);
        assert_eq!(schedule.lag(start), Duration::ZERO);
        assert_eq!(
            schedule.lag(start + Duration::from_millis(5)),
            Duration::from_millis(5)
        );
    }

    #[test]
    fn test_timer() {
        let mut timer = Timer::new(Duration::from_millis(10));
        assert!(!timer.expired());

        thread::sleep(Duration::from_millis(11));
        assert!(timer.try_fire());
        assert!(!timer.try_fire());
    }
}
