// Copyright 2026 the Dispsync Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Human-readable trace output.
//!
//! [`PrettyPrintSink`] implements [`TraceSink`] and writes one line per event
//! to a [`Write`](std::io::Write) destination (default: stderr). Times are
//! printed in microseconds.

use std::io::Write;
use std::sync::{Mutex, PoisonError};

use dispsync_core::trace::{
    ErrorResetEvent, ErrorUpdateEvent, ListenerFireEvent, ModelUpdateEvent, TraceSink,
    WakeupEvent, ZeroPhaseEvent,
};

/// Writes human-readable trace lines to a [`Write`](std::io::Write) destination.
pub struct PrettyPrintSink<W: Write + Send = Box<dyn Write + Send>> {
    writer: Mutex<W>,
}

impl<W: Write + Send> std::fmt::Debug for PrettyPrintSink<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrettyPrintSink").finish_non_exhaustive()
    }
}

impl PrettyPrintSink {
    /// Creates a sink that writes to stderr.
    #[must_use]
    pub fn stderr() -> Self {
        Self::new(Box::new(std::io::stderr()))
    }

    /// Creates a sink that writes to a boxed writer.
    #[must_use]
    pub fn new(writer: Box<dyn Write + Send>) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }
}

impl<W: Write + Send> PrettyPrintSink<W> {
    /// Creates a sink that writes to the given destination.
    #[must_use]
    pub fn with_writer(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    /// Consumes the sink and returns the destination.
    pub fn into_inner(self) -> W {
        match self.writer.into_inner() {
            Ok(writer) => writer,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn line(&self, args: std::fmt::Arguments<'_>) {
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let _ = writer.write_fmt(args);
        let _ = writer.write_all(b"\n");
    }
}

fn us(nanos: i64) -> f64 {
    nanos as f64 / 1000.0
}

impl<W: Write + Send> TraceSink for PrettyPrintSink<W> {
    fn on_model_update(&self, e: &ModelUpdateEvent) {
        self.line(format_args!(
            "[model] gen={} period={:.3}µs phase={:.3}µs skip={} at {:.1}µs",
            e.generation,
            us(e.period.nanos()),
            us(e.phase.nanos()),
            e.refresh_skip_count,
            us(e.timestamp.nanos()),
        ));
    }

    fn on_error_update(&self, e: &ErrorUpdateEvent) {
        let resync = if e.need_resync { "RESYNC" } else { "ok" };
        self.line(format_args!(
            "[error] rms={:.1}µs {resync} at {:.1}µs",
            (e.error as f64).sqrt() / 1000.0,
            us(e.timestamp.nanos()),
        ));
    }

    fn on_error_reset(&self, e: &ErrorResetEvent) {
        self.line(format_args!(
            "[error:reset] {} samples without present at {:.1}µs",
            e.samples_without_present,
            us(e.timestamp.nanos()),
        ));
    }

    fn on_wakeup(&self, e: &WakeupEvent) {
        self.line(format_args!(
            "[wakeup] late={:.1}µs latency={:.1}µs",
            us((e.actual - e.target).nanos()),
            us(e.latency.nanos()),
        ));
    }

    fn on_listener_fire(&self, e: &ListenerFireEvent) {
        self.line(format_args!(
            "[fire] event={:.1}µs offset={:.1}µs late={:.1}µs",
            us(e.event_time.nanos()),
            us(e.phase_offset.nanos()),
            us((e.fired_at - e.event_time).nanos()),
        ));
    }

    fn on_zero_phase(&self, e: &ZeroPhaseEvent) {
        self.line(format_args!(
            "[zero-phase] {} at {:.1}µs",
            u8::from(e.parity),
            us(e.event_time.nanos()),
        ));
    }
}
