//! Online partition-size estimation.
//!
//! [`LinearRegressionEstimator`] models `duration ≈ alpha + beta * size` with
//! an ordinary-least-squares fit over a sliding window of recent
//! `(size, duration)` samples. The window bounds memory and lets the model
//! track a cost function that drifts over the lifetime of a long-running
//! invocation. The estimator is pluggable: [`PartitionSizeEstimator`] is a
//! narrow capability trait, so a caller can swap in a different strategy
//! (see [`ConstantEstimator`] for the trivial one) without touching the
//! controller.

use std::collections::VecDeque;
use std::time::Duration;

/// A strategy for choosing the next partition size given feedback from
/// completed partitions.
pub trait PartitionSizeEstimator: Send {
    /// Records that a partition of `size` items took `duration` to process.
    fn observe(&mut self, size: usize, duration: Duration);

    /// Recommends a size for the next partition, given `remaining` items
    /// still left to partition. Must return at least `1` and never more than
    /// `remaining.max(1)`.
    fn next_size(&mut self, remaining: usize) -> usize;

    /// A snapshot of the estimator's internal fit, if one exists yet. Used by
    /// `trace::print_profile_trace` to report the model the run converged on.
    fn state(&self) -> Option<EstimatorState>;
}

/// The estimator's fitted linear model at a point in time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EstimatorState {
    pub alpha: f64,
    pub beta: f64,
    pub r_squared: f64,
    pub sample_count: usize,
}

/// Always recommends the same, caller-provided size. Useful as a baseline in
/// tests and for callers who have already profiled their workload and don't
/// want the adaptive loop to second-guess them.
pub struct ConstantEstimator {
    size: usize,
}

impl ConstantEstimator {
    pub fn new(size: usize) -> Self {
        Self { size: size.max(1) }
    }
}

impl PartitionSizeEstimator for ConstantEstimator {
    fn observe(&mut self, _size: usize, _duration: Duration) {}

    fn next_size(&mut self, remaining: usize) -> usize {
        self.size.min(remaining.max(1)).max(1)
    }

    fn state(&self) -> Option<EstimatorState> {
        None
    }
}

/// Windowed ordinary-least-squares estimator.
///
/// Cold start: before `cold_start_samples` observations have been recorded,
/// `next_size` doubles the requested size each call (1, 2, 4, ...) rather than
/// trying to fit a line through too few points. Once enough samples exist, a
/// regression is (re)fit on every call; if the fit is degenerate (`beta <= 0`,
/// meaning duration doesn't grow with size, or `r_squared` below
/// `min_r_squared`), the estimator falls back to the last size it trusted
/// rather than act on a noisy model.
pub struct LinearRegressionEstimator {
    window: VecDeque<(f64, f64)>,
    window_capacity: usize,
    cold_start_samples: usize,
    next_cold_start_size: usize,
    last_known_good: usize,
    min_target_secs: f64,
    max_target_secs: f64,
    min_r_squared: f64,
    last_state: Option<EstimatorState>,
}

impl LinearRegressionEstimator {
    const DEFAULT_WINDOW_CAPACITY: usize = 32;
    const DEFAULT_COLD_START_SAMPLES: usize = 3;
    const DEFAULT_MIN_TARGET_SECS: f64 = 0.05;
    const DEFAULT_MAX_TARGET_SECS: f64 = 2.0;
    const DEFAULT_MIN_R_SQUARED: f64 = 0.2;

    pub fn new() -> Self {
        Self {
            window: VecDeque::with_capacity(Self::DEFAULT_WINDOW_CAPACITY),
            window_capacity: Self::DEFAULT_WINDOW_CAPACITY,
            cold_start_samples: Self::DEFAULT_COLD_START_SAMPLES,
            next_cold_start_size: 1,
            last_known_good: 1,
            min_target_secs: Self::DEFAULT_MIN_TARGET_SECS,
            max_target_secs: Self::DEFAULT_MAX_TARGET_SECS,
            min_r_squared: Self::DEFAULT_MIN_R_SQUARED,
            last_state: None,
        }
    }

    /// Overrides the target-duration clamp band. Useful for workloads whose
    /// per-partition cost is naturally much shorter or longer than the
    /// defaults assume.
    pub fn with_target_range(mut self, min_secs: f64, max_secs: f64) -> Self {
        self.min_target_secs = min_secs;
        self.max_target_secs = max_secs;
        self
    }

    /// Seeds the cold-start doubling sequence to start at `size` instead of
    /// `1`. When a caller supplies an explicit initial partition size, the
    /// controller uses it for the very first partition directly, so this
    /// seeds the *next* cold-start request instead of restarting from one.
    pub fn with_cold_start_size(mut self, size: usize) -> Self {
        self.next_cold_start_size = size.max(1);
        self
    }

    fn median_duration(&self) -> f64 {
        let mut durations: Vec<f64> = self.window.iter().map(|&(_, d)| d).collect();
        durations.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let mid = durations.len() / 2;
        if durations.len() % 2 == 0 {
            (durations[mid - 1] + durations[mid]) / 2.0
        } else {
            durations[mid]
        }
    }

    fn fit(&self) -> Option<(f64, f64, f64)> {
        let n = self.window.len() as f64;
        if n < 2.0 {
            return None;
        }
        let mean_x = self.window.iter().map(|&(x, _)| x).sum::<f64>() / n;
        let mean_y = self.window.iter().map(|&(_, y)| y).sum::<f64>() / n;

        let ss_xx: f64 = self.window.iter().map(|&(x, _)| (x - mean_x).powi(2)).sum();
        if ss_xx == 0.0 {
            return None;
        }
        let ss_xy: f64 = self
            .window
            .iter()
            .map(|&(x, y)| (x - mean_x) * (y - mean_y))
            .sum();

        let beta = ss_xy / ss_xx;
        let alpha = mean_y - beta * mean_x;

        let ss_tot: f64 = self.window.iter().map(|&(_, y)| (y - mean_y).powi(2)).sum();
        let r_squared = if ss_tot == 0.0 {
            1.0
        } else {
            let ss_res: f64 = self
                .window
                .iter()
                .map(|&(x, y)| (y - (alpha + beta * x)).powi(2))
                .sum();
            (1.0 - ss_res / ss_tot).max(0.0)
        };

        Some((alpha, beta, r_squared))
    }
}

impl Default for LinearRegressionEstimator {
    fn default() -> Self {
        Self::new()
    }
}

impl PartitionSizeEstimator for LinearRegressionEstimator {
    fn observe(&mut self, size: usize, duration: Duration) {
        if self.window.len() == self.window_capacity {
            self.window.pop_front();
        }
        self.window.push_back((size as f64, duration.as_secs_f64()));
    }

    fn next_size(&mut self, remaining: usize) -> usize {
        if remaining == 0 {
            return 1;
        }

        if self.window.len() < self.cold_start_samples {
            let size = self.next_cold_start_size.min(remaining);
            self.next_cold_start_size = (self.next_cold_start_size * 2).max(2);
            return size.max(1);
        }

        match self.fit() {
            Some((alpha, beta, r_squared)) if beta > 0.0 && r_squared >= self.min_r_squared => {
                self.last_state = Some(EstimatorState {
                    alpha,
                    beta,
                    r_squared,
                    sample_count: self.window.len(),
                });
                let target = self
                    .median_duration()
                    .clamp(self.min_target_secs, self.max_target_secs);
                let raw = ((target - alpha) / beta).round();
                let size = if raw.is_finite() { raw.max(1.0) as usize } else { self.last_known_good };
                self.last_known_good = size.clamp(1, remaining.max(1));
                self.last_known_good
            }
            _ => self.last_known_good.clamp(1, remaining.max(1)),
        }
    }

    fn state(&self) -> Option<EstimatorState> {
        self.last_state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cold_start_doubles() {
        let mut estimator = LinearRegressionEstimator::new();
        assert_eq!(estimator.next_size(100), 1);
        estimator.observe(1, Duration::from_millis(10));
        assert_eq!(estimator.next_size(100), 2);
        estimator.observe(2, Duration::from_millis(20));
        assert_eq!(estimator.next_size(100), 4);
        estimator.observe(4, Duration::from_millis(40));
        // cold_start_samples (3) reached; estimator now fits a regression.
        let fitted = estimator.next_size(100);
        assert!(fitted >= 1);
    }

    #[test]
    fn converges_toward_target_duration_band() {
        let mut estimator = LinearRegressionEstimator::new().with_target_range(0.1, 0.2);
        // duration = 0.01 * size, noiseless -- beta = 0.01, alpha ~= 0.
        for size in [1usize, 2, 4, 8, 16, 32] {
            estimator.observe(size, Duration::from_secs_f64(0.01 * size as f64));
        }
        let size = estimator.next_size(10_000);
        let state = estimator.state().unwrap();
        assert!(state.beta > 0.0);
        assert!(size > 4);
    }

    #[test]
    fn falls_back_when_fit_is_degenerate() {
        let mut estimator = LinearRegressionEstimator::new();
        // Constant duration regardless of size: beta should come out ~0, so
        // the estimator must fall back to last_known_good rather than divide
        // by a near-zero slope.
        for size in [1usize, 2, 4, 8] {
            estimator.observe(size, Duration::from_millis(50));
        }
        let size = estimator.next_size(1_000);
        assert!(size >= 1);
    }

    #[test]
    fn never_exceeds_remaining() {
        let mut estimator = LinearRegressionEstimator::new();
        for size in [1usize, 2, 4] {
            estimator.observe(size, Duration::from_millis(10));
        }
        assert!(estimator.next_size(2) <= 2);
    }
}
