// Copyright 2026 the Dispsync Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Tracing and diagnostics for the vsync model and dispatcher.
//!
//! This module provides a [`TraceSink`] trait with one method per event. All
//! method bodies default to no-ops, so implementing only the events you care
//! about is fine.
//!
//! Events come from two threads: model and error events from whichever
//! thread feeds samples, and wake-up and firing events from the dispatch
//! thread. Sinks therefore take `&self` and must be `Send + Sync`.
//!
//! [`Tracer`] wraps an optional shared sink. When the `trace` feature is
//! **off**, every `Tracer` method compiles to nothing. When **on**, each
//! method performs a single `Option` branch before dispatching.
//!
//! [`ZeroPhaseTracer`] is a built-in listener that emits a
//! [`ZeroPhaseEvent`] on every modeled pulse, with a parity bit that flips
//! each time. Plotted over time it shows the modeled vsync as a square wave.

use alloc::sync::Arc;
use core::sync::atomic::{AtomicBool, Ordering};

use crate::listener::VsyncListener;
use crate::time::{Duration, HostTime};

// ---------------------------------------------------------------------------
// Event structs
// ---------------------------------------------------------------------------

/// Emitted whenever the façade-side model changes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ModelUpdateEvent {
    /// Host time of the change.
    pub timestamp: HostTime,
    /// Effective period after the change.
    pub period: Duration,
    /// Phase after the change.
    pub phase: Duration,
    /// Refresh skip count in effect.
    pub refresh_skip_count: u32,
    /// Generation stamped on the pushed update.
    pub generation: u64,
}

/// Emitted after the drift metric is recomputed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ErrorUpdateEvent {
    /// Host time of the recomputation.
    pub timestamp: HostTime,
    /// Mean squared phase error, in ns².
    pub error: i64,
    /// Resync decision derived from the error.
    pub need_resync: bool,
}

/// Emitted when too many resync samples arrive without a present fence.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ErrorResetEvent {
    /// Timestamp of the resync sample that triggered the reset.
    pub timestamp: HostTime,
    /// Resync samples counted since the last present fence.
    pub samples_without_present: u32,
}

/// Emitted when the dispatch thread wakes on its timer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WakeupEvent {
    /// Time the thread asked to wake at.
    pub target: HostTime,
    /// Time the thread observed after waking.
    pub actual: HostTime,
    /// Smoothed wake-up latency after this sample.
    pub latency: Duration,
}

/// Emitted for each listener invocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ListenerFireEvent {
    /// Event time handed to the listener.
    pub event_time: HostTime,
    /// Time the invocation batch was collected.
    pub fired_at: HostTime,
    /// The listener's phase offset.
    pub phase_offset: Duration,
}

/// Emitted by [`ZeroPhaseTracer`] on every modeled pulse.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ZeroPhaseEvent {
    /// Modeled pulse time.
    pub event_time: HostTime,
    /// Flips on every pulse.
    pub parity: bool,
}

// ---------------------------------------------------------------------------
// TraceSink trait
// ---------------------------------------------------------------------------

/// Receives trace events from the model and the dispatcher.
///
/// All methods have default no-op implementations, so you only need to
/// override the events you care about.
pub trait TraceSink: Send + Sync {
    /// Called when the model changes.
    fn on_model_update(&self, e: &ModelUpdateEvent) {
        _ = e;
    }

    /// Called when the drift metric is recomputed.
    fn on_error_update(&self, e: &ErrorUpdateEvent) {
        _ = e;
    }

    /// Called when the error state is reset for lack of present fences.
    fn on_error_reset(&self, e: &ErrorResetEvent) {
        _ = e;
    }

    /// Called when the dispatch thread wakes on its timer.
    fn on_wakeup(&self, e: &WakeupEvent) {
        _ = e;
    }

    /// Called for each listener invocation.
    fn on_listener_fire(&self, e: &ListenerFireEvent) {
        _ = e;
    }

    /// Called on each zero-phase pulse.
    fn on_zero_phase(&self, e: &ZeroPhaseEvent) {
        _ = e;
    }
}

// ---------------------------------------------------------------------------
// NoopSink
// ---------------------------------------------------------------------------

/// A [`TraceSink`] that discards all events.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopSink;

impl TraceSink for NoopSink {}

// ---------------------------------------------------------------------------
// Tracer wrapper
// ---------------------------------------------------------------------------

/// Thin wrapper around an optional shared [`TraceSink`].
///
/// Cloning a `Tracer` shares the sink.
#[derive(Clone, Default)]
pub struct Tracer {
    #[cfg(feature = "trace")]
    sink: Option<Arc<dyn TraceSink>>,
}

impl core::fmt::Debug for Tracer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Tracer")
            .field("enabled", &self.is_enabled())
            .finish_non_exhaustive()
    }
}

impl Tracer {
    /// Creates a tracer that dispatches to the given sink.
    #[inline]
    #[must_use]
    pub fn new(sink: Arc<dyn TraceSink>) -> Self {
        #[cfg(feature = "trace")]
        {
            Self { sink: Some(sink) }
        }
        #[cfg(not(feature = "trace"))]
        {
            _ = sink;
            Self {}
        }
    }

    /// Creates a tracer that discards all events.
    #[inline]
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Returns `true` when events reach a sink.
    #[inline]
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        #[cfg(feature = "trace")]
        {
            self.sink.is_some()
        }
        #[cfg(not(feature = "trace"))]
        {
            false
        }
    }

    /// Emits a [`ModelUpdateEvent`].
    #[inline]
    pub fn model_update(&self, e: &ModelUpdateEvent) {
        #[cfg(feature = "trace")]
        if let Some(s) = &self.sink {
            s.on_model_update(e);
        }
        #[cfg(not(feature = "trace"))]
        {
            _ = e;
        }
    }

    /// Emits an [`ErrorUpdateEvent`].
    #[inline]
    pub fn error_update(&self, e: &ErrorUpdateEvent) {
        #[cfg(feature = "trace")]
        if let Some(s) = &self.sink {
            s.on_error_update(e);
        }
        #[cfg(not(feature = "trace"))]
        {
            _ = e;
        }
    }

    /// Emits an [`ErrorResetEvent`].
    #[inline]
    pub fn error_reset(&self, e: &ErrorResetEvent) {
        #[cfg(feature = "trace")]
        if let Some(s) = &self.sink {
            s.on_error_reset(e);
        }
        #[cfg(not(feature = "trace"))]
        {
            _ = e;
        }
    }

    /// Emits a [`WakeupEvent`].
    #[inline]
    pub fn wakeup(&self, e: &WakeupEvent) {
        #[cfg(feature = "trace")]
        if let Some(s) = &self.sink {
            s.on_wakeup(e);
        }
        #[cfg(not(feature = "trace"))]
        {
            _ = e;
        }
    }

    /// Emits a [`ListenerFireEvent`].
    #[inline]
    pub fn listener_fire(&self, e: &ListenerFireEvent) {
        #[cfg(feature = "trace")]
        if let Some(s) = &self.sink {
            s.on_listener_fire(e);
        }
        #[cfg(not(feature = "trace"))]
        {
            _ = e;
        }
    }

    /// Emits a [`ZeroPhaseEvent`].
    #[inline]
    pub fn zero_phase(&self, e: &ZeroPhaseEvent) {
        #[cfg(feature = "trace")]
        if let Some(s) = &self.sink {
            s.on_zero_phase(e);
        }
        #[cfg(not(feature = "trace"))]
        {
            _ = e;
        }
    }
}

// ---------------------------------------------------------------------------
// ZeroPhaseTracer
// ---------------------------------------------------------------------------

/// Diagnostic listener registered at phase offset 0.
#[derive(Debug)]
pub struct ZeroPhaseTracer {
    parity: AtomicBool,
    tracer: Tracer,
}

impl ZeroPhaseTracer {
    /// Creates a tracer listener with parity `false`.
    #[must_use]
    pub fn new(tracer: Tracer) -> Self {
        Self {
            parity: AtomicBool::new(false),
            tracer,
        }
    }

    /// Current parity.
    #[must_use]
    pub fn parity(&self) -> bool {
        self.parity.load(Ordering::Relaxed)
    }
}

impl VsyncListener for ZeroPhaseTracer {
    fn on_event(&self, event_time: HostTime) {
        let parity = !self.parity.fetch_xor(true, Ordering::Relaxed);
        self.tracer.zero_phase(&ZeroPhaseEvent { event_time, parity });
    }

    fn name(&self) -> &str {
        "zero-phase"
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
