// Copyright 2026 the Dispsync Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Model drift tracking from present fences.
//!
//! Present fences report when frames actually reached the display, which is
//! always on a hardware pulse. [`ErrorTracker`] measures how far those times
//! sit from the modeled pulses. The mean squared distance is the drift
//! metric; once it exceeds the configured threshold, hardware resync is
//! requested.

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;

use crate::fence::PresentFence;
use crate::model::Model;
use crate::time::{Duration, HostTime};

/// Observable state of one present-sample slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotState {
    /// Never written, or cleared by an error reset.
    Empty,
    /// Holds a fence that has not signaled yet.
    Pending,
    /// Signal time plus the configured present offset.
    Resolved(HostTime),
}

enum Slot {
    Empty,
    Pending(Arc<dyn PresentFence>),
    Resolved(HostTime),
}

impl Slot {
    fn state(&self) -> SlotState {
        match self {
            Self::Empty => SlotState::Empty,
            Self::Pending(_) => SlotState::Pending,
            Self::Resolved(t) => SlotState::Resolved(*t),
        }
    }
}

/// Fixed set of present-fence slots with a rotating write cursor.
pub struct PresentSamples {
    slots: Vec<Slot>,
    cursor: usize,
    offset: Duration,
}

impl fmt::Debug for PresentSamples {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slots: Vec<_> = self.slots.iter().map(Slot::state).collect();
        f.debug_struct("PresentSamples")
            .field("slots", &slots)
            .field("cursor", &self.cursor)
            .field("offset", &self.offset)
            .finish()
    }
}

impl PresentSamples {
    /// Creates `capacity` empty slots. Capacity 0 is promoted to 1.
    ///
    /// `offset` is added to every resolved signal time.
    #[must_use]
    pub fn with_capacity(capacity: usize, offset: Duration) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: (0..capacity).map(|_| Slot::Empty).collect(),
            cursor: 0,
            offset,
        }
    }

    /// Overwrites the slot under the cursor with `fence` and advances the
    /// cursor.
    pub fn push(&mut self, fence: Arc<dyn PresentFence>) {
        self.slots[self.cursor] = Slot::Pending(fence);
        self.cursor = (self.cursor + 1) % self.slots.len();
    }

    /// Polls every pending fence once, recording those that have signaled.
    pub fn poll(&mut self) {
        for slot in &mut self.slots {
            if let Slot::Pending(fence) = slot {
                if let Some(t) = fence.signal_time() {
                    *slot = Slot::Resolved(t + self.offset);
                }
            }
        }
    }

    /// Empties every slot and rewinds the cursor.
    pub fn clear(&mut self) {
        for slot in &mut self.slots {
            *slot = Slot::Empty;
        }
        self.cursor = 0;
    }

    /// Iterates resolved sample times in slot order.
    pub fn resolved(&self) -> impl Iterator<Item = HostTime> + '_ {
        self.slots.iter().filter_map(|slot| match slot {
            Slot::Resolved(t) => Some(*t),
            _ => None,
        })
    }

    /// Iterates slot states oldest to newest.
    pub fn states(&self) -> impl ExactSizeIterator<Item = SlotState> + '_ {
        let len = self.slots.len();
        (0..len).map(move |i| self.slots[(self.cursor + i) % len].state())
    }
}

/// Computes and holds the drift metric.
#[derive(Debug)]
pub struct ErrorTracker {
    samples: PresentSamples,
    error: i64,
    threshold: i64,
}

impl ErrorTracker {
    /// Creates a tracker with `capacity` present slots.
    #[must_use]
    pub fn new(capacity: usize, offset: Duration, threshold: i64) -> Self {
        Self {
            samples: PresentSamples::with_capacity(capacity, offset),
            error: 0,
            threshold,
        }
    }

    /// Records `fence`, polls pending fences, recomputes the error against
    /// `model`, and returns whether resync is needed.
    pub fn add_present_sample(&mut self, fence: Arc<dyn PresentFence>, model: &Model) -> bool {
        self.samples.push(fence);
        self.samples.poll();
        self.update_error(model);
        self.needs_resync(model)
    }

    /// Recomputes the mean squared phase error, in ns².
    ///
    /// Samples are compared against the hardware period, not the skip-scaled
    /// one: a present can land on any hardware pulse. Only resolved samples
    /// strictly after the model phase count. With no such samples, or no
    /// model, the error is 0.
    pub fn update_error(&mut self, model: &Model) -> i64 {
        if !model.is_set() {
            self.error = 0;
            return 0;
        }
        let period = model.hardware_period();
        if period.nanos() <= 0 {
            self.error = 0;
            return 0;
        }
        let phase = HostTime::ZERO + model.phase;

        let mut sum: i128 = 0;
        let mut count: i128 = 0;
        for sample in self.samples.resolved() {
            if sample <= phase {
                continue;
            }
            let mut err = (sample - phase).rem_euclid(period);
            if err > period / 2 {
                err = err - period;
            }
            sum += i128::from(err.nanos()) * i128::from(err.nanos());
            count += 1;
        }

        self.error = if count > 0 {
            i64::try_from(sum / count).unwrap_or(i64::MAX)
        } else {
            0
        };
        self.error
    }

    /// Resync is needed when no model exists or the error exceeds the
    /// threshold.
    #[must_use]
    pub fn needs_resync(&self, model: &Model) -> bool {
        !model.is_set() || self.error > self.threshold
    }

    /// Clears the error and every present slot.
    pub fn reset(&mut self) {
        self.error = 0;
        self.samples.clear();
    }

    /// Latest computed error, in ns².
    #[must_use]
    pub fn error(&self) -> i64 {
        self.error
    }

    /// The underlying present slots.
    #[must_use]
    pub fn samples(&self) -> &PresentSamples {
        &self.samples
    }
}
