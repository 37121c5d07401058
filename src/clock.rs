//! Monotonic wall clock for server-assigned audit timestamps.
//!
//! Mutation timestamps must never go backwards on a node, even when the
//! system clock does. The clock remembers the last issued millisecond and
//! steps past it when the wall clock stalls or regresses.

use std::time::{SystemTime, UNIX_EPOCH};

use time::OffsetDateTime;

pub struct WallClock {
    last_ms: u64,
}

impl WallClock {
    pub fn new() -> Self {
        Self { last_ms: 0 }
    }

    /// Next timestamp, strictly greater than every previous one from this
    /// clock.
    pub fn now(&mut self) -> OffsetDateTime {
        let wall = Self::wall_ms();
        self.last_ms = if wall > self.last_ms {
            wall
        } else {
            self.last_ms + 1
        };
        OffsetDateTime::from_unix_timestamp_nanos(self.last_ms as i128 * 1_000_000)
            .expect("millisecond timestamp in range")
    }

    fn wall_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }
}

impl Default for WallClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamps_strictly_increase() {
        let mut clock = WallClock::new();
        let a = clock.now();
        let b = clock.now();
        let c = clock.now();
        assert!(b > a);
        assert!(c > b);
    }

    #[test]
    fn survives_a_stalled_wall_clock() {
        let mut clock = WallClock::new();
        // Force the guard path: pretend we already issued a far-future
        // stamp (year 2096).
        clock.last_ms = 4_000_000_000_000;
        let a = clock.now();
        let b = clock.now();
        assert!(b > a);
    }
}
