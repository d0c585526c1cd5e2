//! # Raw Sample Slot
//!
//! The only data shared between the receive loop and the processor tick.
//! A sample is packed into one `AtomicU64`:
//!
//! ```text
//!  63            32 31             0
//! ┌────────────────┬────────────────┐
//! │ arrival ms     │ heart rate     │
//! │ (u32, wrapping)│ (i32)          │
//! └────────────────┴────────────────┘
//! ```
//!
//! so a reader always sees a complete (value, arrival) pair. Publishing
//! overwrites; there is no queue.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime};

const EMPTY: u64 = u64::MAX;

/// One heart-rate value and the moment it arrived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawSample {
    pub heart_rate: i32,
    pub arrived_at: Instant,
    /// Wall-clock arrival time. Stable for the lifetime of the sample.
    pub received_at: SystemTime,
}

impl RawSample {
    /// Time elapsed between arrival and `now`.
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.arrived_at)
    }
}

/// Single-word, lock-free "latest sample" cell.
#[derive(Debug)]
pub struct RawSampleSlot {
    epoch: Instant,
    wall_epoch: SystemTime,
    word: AtomicU64,
}

impl Default for RawSampleSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl RawSampleSlot {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            wall_epoch: SystemTime::now(),
            word: AtomicU64::new(EMPTY),
        }
    }

    /// Replace the current sample.
    #[allow(clippy::cast_possible_truncation)]
    pub fn publish(&self, heart_rate: i32, arrived_at: Instant) {
        // Wrapping truncation is intended; only differences are used.
        let stamp = self.millis(arrived_at) as u32;
        self.word.store(pack(heart_rate, stamp), Ordering::Release);
    }

    /// Read the current sample, if one has been published since the last clear.
    ///
    /// `now` anchors the arrival reconstruction. A stamp slightly ahead of
    /// `now` (published by another thread after `now` was taken) yields a
    /// sample of age zero. Samples older than ~24 days alias and should be
    /// treated as stale by the caller anyway.
    #[allow(clippy::cast_possible_truncation)]
    pub fn latest(&self, now: Instant) -> Option<RawSample> {
        let word = self.word.load(Ordering::Acquire);
        if word == EMPTY {
            return None;
        }
        let (heart_rate, stamp) = unpack(word);

        let now_ms = self.millis(now);
        let behind = (now_ms as u32).wrapping_sub(stamp);
        let arrival_ms = if behind > u32::MAX / 2 {
            now_ms + u64::from(stamp.wrapping_sub(now_ms as u32))
        } else {
            now_ms.saturating_sub(u64::from(behind))
        };
        let offset = Duration::from_millis(arrival_ms);

        Some(RawSample {
            heart_rate,
            arrived_at: self.epoch + offset,
            received_at: self.wall_epoch + offset,
        })
    }

    /// Drop the current sample.
    pub fn clear(&self) {
        self.word.store(EMPTY, Ordering::Release);
    }

    #[allow(clippy::cast_possible_truncation)]
    fn millis(&self, at: Instant) -> u64 {
        at.saturating_duration_since(self.epoch).as_millis() as u64
    }
}

#[allow(clippy::cast_sign_loss)]
fn pack(heart_rate: i32, stamp: u32) -> u64 {
    (u64::from(stamp) << 32) | u64::from(heart_rate as u32)
}

#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
fn unpack(word: u64) -> (i32, u32) {
    ((word as u32) as i32, (word >> 32) as u32)
}
