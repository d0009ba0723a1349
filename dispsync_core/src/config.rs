// Copyright 2026 the Dispsync Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Tunable limits and thresholds.
//!
//! Every constant the model depends on is a field of [`DispSyncConfig`] and is
//! passed in at construction. The defaults are platform-tuned values, not
//! derived quantities; adjust them per display stack.

use crate::time::Duration;

/// Configuration for the vsync model and its dispatcher.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DispSyncConfig {
    /// Capacity of the resync sample ring.
    pub max_resync_samples: usize,
    /// Minimum number of resync samples before the model is (re)fitted.
    ///
    /// Values below 2 are treated as 2 since the period is a mean of deltas.
    pub min_resync_samples_for_update: usize,
    /// Number of present-fence slots used for error tracking.
    pub num_present_samples: usize,
    /// Consecutive resync samples without a present fence after which the
    /// error state is considered unknown and reset.
    pub max_resync_samples_without_present: u32,
    /// Mean squared phase error, in ns², above which resync is requested.
    pub error_threshold: i64,
    /// Constant added to every resolved present-fence time.
    pub present_time_offset: Duration,
    /// Set when the platform has no usable present fences.
    ///
    /// The resync decision then degrades to "at least one listener is
    /// registered".
    pub ignore_present_fences: bool,
    /// Upper bound on the smoothed wake-up latency estimate.
    pub max_wakeup_latency: Duration,
    /// Registers a diagnostic listener at phase offset 0 that emits a
    /// zero-phase trace event every modeled pulse.
    pub zero_phase_tracer: bool,
}

impl DispSyncConfig {
    /// Default configuration.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            max_resync_samples: 32,
            min_resync_samples_for_update: 6,
            num_present_samples: 8,
            max_resync_samples_without_present: 4,
            // 400 µs RMS.
            error_threshold: 160_000_000_000,
            present_time_offset: Duration::ZERO,
            ignore_present_fences: false,
            max_wakeup_latency: Duration::from_micros(500),
            zero_phase_tracer: false,
        }
    }

    /// Sets [`max_resync_samples`](Self::max_resync_samples).
    #[must_use]
    pub const fn with_max_resync_samples(mut self, n: usize) -> Self {
        self.max_resync_samples = n;
        self
    }

    /// Sets [`min_resync_samples_for_update`](Self::min_resync_samples_for_update).
    #[must_use]
    pub const fn with_min_resync_samples_for_update(mut self, n: usize) -> Self {
        self.min_resync_samples_for_update = n;
        self
    }

    /// Sets [`num_present_samples`](Self::num_present_samples).
    #[must_use]
    pub const fn with_num_present_samples(mut self, n: usize) -> Self {
        self.num_present_samples = n;
        self
    }

    /// Sets [`max_resync_samples_without_present`](Self::max_resync_samples_without_present).
    #[must_use]
    pub const fn with_max_resync_samples_without_present(mut self, n: u32) -> Self {
        self.max_resync_samples_without_present = n;
        self
    }

    /// Sets [`error_threshold`](Self::error_threshold).
    #[must_use]
    pub const fn with_error_threshold(mut self, ns2: i64) -> Self {
        self.error_threshold = ns2;
        self
    }

    /// Sets [`present_time_offset`](Self::present_time_offset).
    #[must_use]
    pub const fn with_present_time_offset(mut self, offset: Duration) -> Self {
        self.present_time_offset = offset;
        self
    }

    /// Sets [`ignore_present_fences`](Self::ignore_present_fences).
    #[must_use]
    pub const fn with_ignore_present_fences(mut self, ignore: bool) -> Self {
        self.ignore_present_fences = ignore;
        self
    }

    /// Sets [`max_wakeup_latency`](Self::max_wakeup_latency).
    #[must_use]
    pub const fn with_max_wakeup_latency(mut self, latency: Duration) -> Self {
        self.max_wakeup_latency = latency;
        self
    }

    /// Sets [`zero_phase_tracer`](Self::zero_phase_tracer).
    #[must_use]
    pub const fn with_zero_phase_tracer(mut self, enabled: bool) -> Self {
        self.zero_phase_tracer = enabled;
        self
    }

    /// Effective minimum sample count for a fit, clamped to `[2, max(2, capacity)]`.
    #[must_use]
    pub const fn fit_threshold(&self) -> usize {
        let min = if self.min_resync_samples_for_update < 2 {
            2
        } else {
            self.min_resync_samples_for_update
        };
        let cap = if self.max_resync_samples < 2 {
            2
        } else {
            self.max_resync_samples
        };
        if min > cap { cap } else { min }
    }
}

impl Default for DispSyncConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_overrides_single_fields() {
        let config = DispSyncConfig::new()
            .with_max_resync_samples_without_present(100)
            .with_ignore_present_fences(true);
        assert_eq!(config.max_resync_samples_without_present, 100);
        assert!(config.ignore_present_fences);
        assert_eq!(config.max_resync_samples, 32);
        let expected = DispSyncConfig {
            max_resync_samples_without_present: 100,
            ignore_present_fences: true,
            ..DispSyncConfig::default()
        };
        assert_eq!(config, expected);
    }

    #[test]
    fn fit_threshold_is_clamped() {
        let config = DispSyncConfig::new().with_min_resync_samples_for_update(0);
        assert_eq!(config.fit_threshold(), 2);

        let config = DispSyncConfig::new()
            .with_max_resync_samples(4)
            .with_min_resync_samples_for_update(10);
        assert_eq!(config.fit_threshold(), 4, "capped by the ring size");
    }
}
