//! Sliding windows used by the processor.
//!
//! - [`SmoothingWindow`]: time-bounded, chronologically ordered samples whose
//!   mean is the smoothed heart rate.
//! - [`TrendWindow`]: the last N smoothed values, FIFO, used for the slope.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Time-bounded moving-average buffer.
#[derive(Debug, Default, Clone)]
pub struct SmoothingWindow {
    entries: VecDeque<(Instant, i32)>,
}

impl SmoothingWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `value` observed at `at`, then drop everything older than
    /// `span` relative to `at`. Returns the mean of what remains.
    pub fn record(&mut self, at: Instant, value: i32, span: Duration) -> f64 {
        self.entries.push_back((at, value));
        self.prune(at, span);
        // Never empty: the entry just pushed has age zero.
        self.mean().unwrap_or(f64::from(value))
    }

    /// Drop entries with `now - timestamp > span`.
    pub fn prune(&mut self, now: Instant, span: Duration) {
        while let Some(&(at, _)) = self.entries.front() {
            if now.saturating_duration_since(at) > span {
                self.entries.pop_front();
            } else {
                break;
            }
        }
    }

    /// Arithmetic mean of the retained values.
    #[allow(clippy::cast_precision_loss)]
    pub fn mean(&self) -> Option<f64> {
        if self.entries.is_empty() {
            return None;
        }
        let sum: f64 = self.entries.iter().map(|&(_, v)| f64::from(v)).sum();
        Some(sum / self.entries.len() as f64)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Fixed-capacity FIFO of recent values.
#[derive(Debug, Default, Clone)]
pub struct TrendWindow {
    values: VecDeque<i32>,
}

impl TrendWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push `value`, evicting the oldest entries so that the window never
    /// exceeds `capacity`. The capacity may change between calls.
    pub fn push(&mut self, value: i32, capacity: usize) {
        if capacity == 0 {
            self.values.clear();
            return;
        }
        while self.values.len() >= capacity {
            self.values.pop_front();
        }
        self.values.push_back(value);
    }

    /// Least-squares slope of value against index, once two values exist.
    pub fn slope(&self) -> Option<f64> {
        if self.values.len() < 2 {
            return None;
        }
        let values: Vec<f64> = self.values.iter().map(|&v| f64::from(v)).collect();
        Some(least_squares_slope(&values))
    }

    pub fn values(&self) -> impl Iterator<Item = i32> + '_ {
        self.values.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }
}

/// Ordinary least-squares slope of `values[i]` against `i`:
///
/// `Σ(i − ī)(vᵢ − v̄) / Σ(i − ī)²`
///
/// Returns `0.0` for fewer than two values.
#[allow(clippy::cast_precision_loss)]
pub fn least_squares_slope(values: &[f64]) -> f64 {
    let count = values.len();
    if count < 2 {
        return 0.0;
    }

    let mean_x = (count - 1) as f64 / 2.0;
    let mean_y = values.iter().sum::<f64>() / count as f64;

    let (sum_xy, sum_xx) = values
        .iter()
        .enumerate()
        .fold((0.0, 0.0), |(xy, xx), (i, &v)| {
            let dx = i as f64 - mean_x;
            (xy + dx * (v - mean_y), xx + dx * dx)
        });

    sum_xy / sum_xx
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    #[test]
    fn test_slope_of_linear_sequence() {
        assert!((least_squares_slope(&[60.0, 62.0, 64.0, 66.0]) - 2.0).abs() < EPS);
        assert!((least_squares_slope(&[10.0, 7.0, 4.0]) + 3.0).abs() < EPS);
    }

    #[test]
    fn test_slope_sign_follows_monotonic_direction() {
        let rising = [61.0, 61.5, 64.0, 70.0, 71.0];
        let falling = [90.0, 88.0, 87.5, 80.0];
        let flat = [72.0; 6];
        assert!(least_squares_slope(&rising) > 0.0);
        assert!(least_squares_slope(&falling) < 0.0);
        assert!(least_squares_slope(&flat).abs() < EPS);
    }

    #[test]
    fn test_slope_needs_two_values() {
        assert!(least_squares_slope(&[]).abs() < EPS);
        assert!(least_squares_slope(&[80.0]).abs() < EPS);
        let mut window = TrendWindow::new();
        window.push(80, 4);
        assert!(window.slope().is_none());
    }

    #[test]
    fn test_trend_window_evicts_oldest_first() {
        let mut window = TrendWindow::new();
        for v in 1..=6 {
            window.push(v, 4);
            assert!(window.len() <= 4);
        }
        assert_eq!(window.values().collect::<Vec<_>>(), vec![3, 4, 5, 6]);
    }

    #[test]
    fn test_trend_window_shrinks_with_capacity() {
        let mut window = TrendWindow::new();
        for v in 1..=5 {
            window.push(v, 5);
        }
        window.push(6, 2);
        assert_eq!(window.values().collect::<Vec<_>>(), vec![5, 6]);

        window.push(7, 0);
        assert!(window.is_empty());
    }

    #[test]
    fn test_smoothing_mean_over_span() {
        let t0 = Instant::now();
        let span = Duration::from_secs(2);
        let mut window = SmoothingWindow::new();

        assert!((window.record(t0, 60, span) - 60.0).abs() < EPS);
        assert!((window.record(t0 + Duration::from_secs(1), 70, span) - 65.0).abs() < EPS);
        assert!((window.record(t0 + Duration::from_secs(2), 80, span) - 70.0).abs() < EPS);
        // t0 is now 3s old and falls out.
        assert!((window.record(t0 + Duration::from_secs(3), 90, span) - 80.0).abs() < EPS);
        assert_eq!(window.len(), 3);
    }

    #[test]
    fn test_smoothing_zero_span_keeps_only_current() {
        let t0 = Instant::now();
        let mut window = SmoothingWindow::new();
        window.record(t0, 50, Duration::ZERO);
        let mean = window.record(t0 + Duration::from_millis(10), 100, Duration::ZERO);
        assert!((mean - 100.0).abs() < EPS);
        assert_eq!(window.len(), 1);
    }
}
