// Copyright 2026 the Dispsync Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Present-fence contract.
//!
//! A present fence signals when a submitted frame actually reached the
//! display. The error tracker only ever polls fences; it never waits on them.

use core::fmt;
use core::sync::atomic::{AtomicI64, Ordering};

use crate::time::HostTime;

/// A completion signal that can be polled without blocking.
pub trait PresentFence: Send + Sync {
    /// Returns the signal time, or `None` if the fence has not signaled yet.
    ///
    /// The time must be on the same clock as hardware vsync samples.
    fn signal_time(&self) -> Option<HostTime>;
}

/// A timestamp is a fence that has already signaled.
impl PresentFence for HostTime {
    fn signal_time(&self) -> Option<HostTime> {
        Some(*self)
    }
}

const PENDING: i64 = i64::MAX;

/// A fence signaled from software.
///
/// Shared between the producer, which calls [`signal`](Self::signal) once the
/// frame is on screen, and the error tracker, which polls it.
pub struct SoftwareFence {
    signal_time: AtomicI64,
}

impl fmt::Debug for SoftwareFence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SoftwareFence")
            .field("signal_time", &self.signal_time())
            .finish()
    }
}

impl SoftwareFence {
    /// Creates an unsignaled fence.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            signal_time: AtomicI64::new(PENDING),
        }
    }

    /// Creates a fence that signaled at `time`.
    #[must_use]
    pub const fn signaled(time: HostTime) -> Self {
        Self {
            signal_time: AtomicI64::new(time.0),
        }
    }

    /// Marks the fence as signaled at `time`. Later calls are ignored.
    pub fn signal(&self, time: HostTime) {
        let _ = self.signal_time.compare_exchange(
            PENDING,
            time.0,
            Ordering::Release,
            Ordering::Relaxed,
        );
    }
}

impl Default for SoftwareFence {
    fn default() -> Self {
        Self::new()
    }
}

impl PresentFence for SoftwareFence {
    fn signal_time(&self) -> Option<HostTime> {
        match self.signal_time.load(Ordering::Acquire) {
            PENDING => None,
            t => Some(HostTime(t)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn software_fence_signals_once() {
        let fence = SoftwareFence::new();
        assert_eq!(fence.signal_time(), None);
        fence.signal(HostTime(10));
        fence.signal(HostTime(20));
        assert_eq!(fence.signal_time(), Some(HostTime(10)));
    }

    #[test]
    fn timestamps_are_signaled_fences() {
        assert_eq!(HostTime(7).signal_time(), Some(HostTime(7)));
        assert_eq!(
            SoftwareFence::signaled(HostTime(3)).signal_time(),
            Some(HostTime(3))
        );
    }
}
