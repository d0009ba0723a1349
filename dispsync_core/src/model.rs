// Copyright 2026 the Dispsync Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The fitted refresh model.

use crate::time::{Duration, HostTime};

/// Period and phase of the modeled refresh pulse.
///
/// A `period` of zero means the model has not been fitted yet. `phase` lies
/// in `[0, period)`. `period` is the effective period, already multiplied by
/// `1 + refresh_skip_count`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Model {
    /// Effective pulse period.
    pub period: Duration,
    /// Offset of the pulse within one period.
    pub phase: Duration,
    /// Number of hardware pulses skipped between modeled pulses.
    pub refresh_skip_count: u32,
}

impl Model {
    /// Returns `true` once a period is known.
    #[inline]
    #[must_use]
    pub const fn is_set(&self) -> bool {
        self.period.0 > 0
    }

    /// The hardware cadence, with the refresh skip factor removed.
    #[inline]
    #[must_use]
    pub fn hardware_period(&self) -> Duration {
        self.period / (i64::from(self.refresh_skip_count) + 1)
    }

    /// Predicts the pulse `period_offset` periods after the next one
    /// following `now`.
    ///
    /// Returns `None` while the model is unset.
    #[must_use]
    pub fn next_refresh(&self, now: HostTime, period_offset: i64) -> Option<HostTime> {
        if !self.is_set() {
            return None;
        }
        let periods = (now - HostTime(self.phase.0)).div_floor(self.period);
        let pulses = periods + period_offset + 1;
        Some(HostTime::ZERO + self.period * pulses + self.phase)
    }
}

/// A model copy pushed from the façade to the dispatch engine.
///
/// `generation` increases with every façade-side model change. The engine
/// drops updates older than the one it holds.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ModelUpdate {
    /// Effective pulse period; zero parks the engine.
    pub period: Duration,
    /// Pulse phase in `[0, period)`.
    pub phase: Duration,
    /// Ordering stamp assigned under the façade lock.
    pub generation: u64,
}
