//! Tracks the average execution time of endpoints.
//!
//! An [Average](Average) only needs a shared reference to record values as the window is kept
//! in a single atomic. The upper 32 bits hold the sum, the lower 32 bits the number of values
//! within the window. Once the window grows beyond [WINDOW_SIZE](WINDOW_SIZE) values (or the sum
//! would overflow) both halves are divided by two which yields a cheap sliding average.
//!
//! # Example
//!
//! ```
//! # use nanocube::average::Average;
//! let average = Average::default();
//! average.add(100);
//! average.add(300);
//!
//! assert_eq!(average.avg(), 200);
//! assert_eq!(average.count(), 2);
//! assert_eq!(average.to_string(), "200 us (2)");
//! ```
use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::fmt::format_micros;

/// The number of values after which the window is halved.
pub const WINDOW_SIZE: u64 = 100;

/// A lock free sliding average.
#[derive(Default, Debug)]
pub struct Average {
    window: AtomicU64,
    count: AtomicU64,
}

impl Average {
    fn unpack(window: u64) -> (u64, u64) {
        (window >> 32, window & 0xFFFF_FFFF)
    }

    /// Records the given value (usually a duration in microseconds).
    pub fn add(&self, value: u64) {
        let _ = self.count.fetch_add(1, Ordering::Relaxed);

        let value = value.min(u32::MAX as u64);
        let _ = self
            .window
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |window| {
                let (mut sum, mut count) = Average::unpack(window);
                while count > 0 && (count >= WINDOW_SIZE || sum + value > u32::MAX as u64) {
                    sum /= 2;
                    count /= 2;
                }
                if count == 0 {
                    sum = 0;
                }

                Some(((sum + value) << 32) | (count + 1))
            });
    }

    /// Returns the total number of recorded values.
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Returns the average of the current window.
    pub fn avg(&self) -> u64 {
        let (sum, count) = Average::unpack(self.window.load(Ordering::Relaxed));
        if count == 0 {
            0
        } else {
            sum / count
        }
    }
}

impl Display for Average {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", format_micros(self.avg()), self.count())
    }
}

#[cfg(test)]
mod tests {
    use crate::average::Average;

    #[test]
    fn an_empty_average_is_zero() {
        let average = Average::default();
        assert_eq!(average.avg(), 0);
        assert_eq!(average.count(), 0);
    }

    #[test]
    fn the_window_slides() {
        let average = Average::default();
        for _ in 0..1_000 {
            average.add(10);
        }
        for _ in 0..200 {
            average.add(1_000);
        }

        assert_eq!(average.count(), 1_200);
        assert_eq!(average.avg() > 900, true);
    }

    #[test]
    fn huge_values_do_not_overflow() {
        let average = Average::default();
        average.add(u64::MAX);
        average.add(u64::MAX);
        assert_eq!(average.avg(), u32::MAX as u64);
    }
}
