// Copyright 2026 the Dispsync Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Resync sample ring and model fitting.
//!
//! [`ResyncSamples`] keeps the most recent hardware vsync timestamps.
//! [`fit`] turns them into a period and phase:
//!
//! - the period is the mean of consecutive sample deltas;
//! - the phase is the *circular* mean of every sample's position within the
//!   period. Each sample is mapped onto the unit circle, the points are
//!   averaged, and the angle of the average is mapped back to time. A plain
//!   mean of `sample mod period` breaks down when samples straddle the wrap
//!   point: samples just before and just after a pulse would average to half
//!   a period away from it.

use alloc::vec::Vec;
use core::f64::consts::TAU;

use crate::time::{Duration, HostTime};

/// Fixed-capacity ring of resync timestamps.
///
/// Insertion is O(1). Once full, each push overwrites the oldest sample.
/// Capacity 0 is promoted to 1.
#[derive(Clone, Debug)]
pub struct ResyncSamples {
    samples: Vec<HostTime>,
    first: usize,
    count: usize,
}

impl ResyncSamples {
    /// Creates an empty ring with room for `capacity` samples.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: alloc::vec![HostTime::ZERO; capacity],
            first: 0,
            count: 0,
        }
    }

    /// Maximum number of retained samples.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.samples.len()
    }

    /// Number of retained samples.
    #[must_use]
    pub fn len(&self) -> usize {
        self.count
    }

    /// Returns `true` when the ring holds no samples.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Appends a sample, overwriting the oldest one when full.
    pub fn push(&mut self, timestamp: HostTime) {
        let capacity = self.capacity();
        let idx = (self.first + self.count) % capacity;
        self.samples[idx] = timestamp;
        if self.count < capacity {
            self.count += 1;
        } else {
            self.first = (self.first + 1) % capacity;
        }
    }

    /// Forgets every sample.
    pub fn clear(&mut self) {
        self.first = 0;
        self.count = 0;
    }

    /// Iterates samples oldest to newest.
    pub fn iter(&self) -> impl ExactSizeIterator<Item = HostTime> + Clone + '_ {
        let capacity = self.capacity();
        (0..self.count).map(move |i| self.samples[(self.first + i) % capacity])
    }
}

/// Result of fitting the resync samples.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Fit {
    /// Effective period, including the refresh skip factor.
    pub period: Duration,
    /// Phase in `[0, hardware period)`.
    pub phase: Duration,
}

/// Fits period and phase to `samples`.
///
/// Returns `None` when fewer than `min_samples` (at least 2) samples are
/// available, or when the samples do not advance in time.
#[must_use]
pub fn fit(samples: &ResyncSamples, min_samples: usize, refresh_skip_count: u32) -> Option<Fit> {
    let count = samples.len();
    if count < min_samples.max(2) {
        return None;
    }

    let mut delta_sum: i128 = 0;
    let mut prev: Option<HostTime> = None;
    for sample in samples.iter() {
        if let Some(prev) = prev {
            delta_sum += i128::from((sample - prev).nanos());
        }
        prev = Some(sample);
    }
    let mean = delta_sum / (count as i128 - 1);
    let period = i64::try_from(mean).ok().filter(|p| *p > 0)?;
    let period = Duration(period);

    let scale = TAU / period.nanos() as f64;
    let mut avg_x = 0.0;
    let mut avg_y = 0.0;
    for sample in samples.iter() {
        let angle = (sample - HostTime::ZERO).rem_euclid(period).nanos() as f64 * scale;
        avg_x += libm::cos(angle);
        avg_y += libm::sin(angle);
    }
    avg_x /= count as f64;
    avg_y /= count as f64;

    #[expect(
        clippy::cast_possible_truncation,
        reason = "atan2 result scaled by one period is bounded by the period"
    )]
    let mut phase = Duration((libm::atan2(avg_y, avg_x) / scale) as i64);
    if phase.nanos() < 0 {
        phase = phase + period;
    }
    // Rounding can land exactly on the period boundary.
    if phase >= period {
        phase = phase - period;
    }

    Some(Fit {
        period: period * (i64::from(refresh_skip_count) + 1),
        phase,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const P: i64 = 16_666_667;

    fn ring(samples: &[i64]) -> ResyncSamples {
        let mut ring = ResyncSamples::with_capacity(32);
        for &s in samples {
            ring.push(HostTime(s));
        }
        ring
    }

    #[test]
    fn push_wraps_and_keeps_newest() {
        let mut ring = ResyncSamples::with_capacity(3);
        for t in 1..=5 {
            ring.push(HostTime(t));
        }
        assert_eq!(ring.len(), 3);
        let got: Vec<_> = ring.iter().map(HostTime::nanos).collect();
        assert_eq!(got, [3, 4, 5]);
    }

    #[test]
    fn zero_capacity_is_promoted_to_one() {
        let mut ring = ResyncSamples::with_capacity(0);
        ring.push(HostTime(10));
        ring.push(HostTime(11));
        assert_eq!(ring.capacity(), 1);
        assert_eq!(ring.iter().collect::<Vec<_>>(), [HostTime(11)]);
    }

    #[test]
    fn clear_empties_ring() {
        let mut ring = ring(&[1, 2, 3]);
        ring.clear();
        assert!(ring.is_empty());
        assert_eq!(ring.iter().count(), 0);
    }

    #[test]
    fn too_few_samples_is_not_a_fit() {
        let ring = ring(&[0, P, 2 * P]);
        assert_eq!(fit(&ring, 6, 0), None);
        assert!(fit(&ring, 3, 0).is_some());
    }

    #[test]
    fn identical_samples_are_not_a_fit() {
        let ring = ring(&[5, 5, 5, 5, 5, 5]);
        assert_eq!(fit(&ring, 2, 0), None);
    }

    #[test]
    fn circular_mean_of_exact_pulses_is_zero() {
        let ring = ring(&[0, P, 2 * P, 3 * P]);
        let fit = fit(&ring, 2, 0).unwrap();
        assert_eq!(fit.period, Duration(P));
        assert!(
            fit.phase.nanos() <= 1 || fit.phase.nanos() >= P - 1,
            "phase should be ~0, got {:?}",
            fit.phase
        );
    }

    #[test]
    fn circular_mean_handles_wraparound() {
        // Pulses alternate 100 ns early and 100 ns late around phase 0. An
        // arithmetic mean of `t mod P` would land near P/2.
        let samples = [
            10 * P - 100,
            11 * P + 100,
            12 * P - 100,
            13 * P + 100,
            14 * P - 100,
            15 * P + 100,
            16 * P - 100,
        ];
        let fit = fit(&ring(&samples), 6, 0).unwrap();
        let phase = fit.phase.nanos();
        let distance_to_zero = phase.min(fit.period.nanos() - phase);
        assert!(distance_to_zero < 200, "phase {phase} is off the wrap");
    }

    #[test]
    fn fit_recovers_offset_phase() {
        let phase = 4_000_000;
        let samples: Vec<i64> = (100..110).map(|k| k * P + phase).collect();
        let fit = fit(&ring(&samples), 6, 0).unwrap();
        assert_eq!(fit.period, Duration(P));
        let phase_error = (fit.phase.nanos() - phase).abs();
        assert!(phase_error <= 2, "got {:?}", fit.phase);
    }

    #[test]
    fn skip_count_scales_period_not_phase() {
        let phase = 1_000_000;
        let samples: Vec<i64> = (0..8).map(|k| k * P + phase).collect();
        let plain = fit(&ring(&samples), 6, 0).unwrap();
        let skipped = fit(&ring(&samples), 6, 1).unwrap();
        assert_eq!(skipped.period, plain.period * 2);
        assert_eq!(skipped.phase, plain.phase);
    }
}
