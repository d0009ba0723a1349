// Copyright 2026 the Dispsync Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Host clock reads.
//!
//! Hardware vsync timestamps and present-fence times must come from the same
//! clock as [`now`]. On Linux and Android that is `CLOCK_MONOTONIC`.

use rustix::time::{ClockId, Timespec, clock_gettime};

use dispsync_core::time::HostTime;

const NANOS_PER_SECOND: i128 = 1_000_000_000;

/// Returns the current monotonic host time in nanoseconds.
#[must_use]
pub fn now() -> HostTime {
    timespec_to_host_time(clock_gettime(ClockId::Monotonic))
}

fn timespec_to_host_time(timespec: Timespec) -> HostTime {
    let nanos = i128::from(timespec.tv_nsec).clamp(0, 999_999_999);
    let total = i128::from(timespec.tv_sec)
        .saturating_mul(NANOS_PER_SECOND)
        .saturating_add(nanos);
    let saturated = if total < 0 { i64::MIN } else { i64::MAX };
    HostTime(i64::try_from(total).unwrap_or(saturated))
}
