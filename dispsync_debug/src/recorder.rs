// Copyright 2026 the Dispsync Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Compact binary event recording and decoding.
//!
//! [`RecorderSink`] implements [`TraceSink`] and encodes events into a
//! `Vec<u8>` as fixed-size little-endian records. [`decode`] reads them back
//! as an iterator of [`RecordedEvent`].
//!
//! Events arrive from both the sample-feeding thread and the dispatch
//! thread, so the buffer sits behind a mutex.

use std::sync::{Mutex, MutexGuard, PoisonError};

use dispsync_core::time::{Duration, HostTime};
use dispsync_core::trace::{
    ErrorResetEvent, ErrorUpdateEvent, ListenerFireEvent, ModelUpdateEvent, TraceSink,
    WakeupEvent, ZeroPhaseEvent,
};

// ---------------------------------------------------------------------------
// Event type discriminants
// ---------------------------------------------------------------------------

const TAG_MODEL_UPDATE: u8 = 1;
const TAG_ERROR_UPDATE: u8 = 2;
const TAG_ERROR_RESET: u8 = 3;
const TAG_WAKEUP: u8 = 4;
const TAG_LISTENER_FIRE: u8 = 5;
const TAG_ZERO_PHASE: u8 = 6;

// ---------------------------------------------------------------------------
// RecorderSink
// ---------------------------------------------------------------------------

/// A [`TraceSink`] that encodes events into a compact binary buffer.
#[derive(Debug, Default)]
pub struct RecorderSink {
    buf: Mutex<Vec<u8>>,
}

/// Appends one record to a locked buffer.
struct Record<'a>(MutexGuard<'a, Vec<u8>>);

impl Record<'_> {
    fn u8(&mut self, v: u8) -> &mut Self {
        self.0.push(v);
        self
    }

    fn u32(&mut self, v: u32) -> &mut Self {
        self.0.extend_from_slice(&v.to_le_bytes());
        self
    }

    fn u64(&mut self, v: u64) -> &mut Self {
        self.0.extend_from_slice(&v.to_le_bytes());
        self
    }

    fn i64(&mut self, v: i64) -> &mut Self {
        self.0.extend_from_slice(&v.to_le_bytes());
        self
    }

    fn bool(&mut self, v: bool) -> &mut Self {
        self.u8(u8::from(v))
    }
}

impl RecorderSink {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the recorded bytes.
    #[must_use]
    pub fn bytes(&self) -> Vec<u8> {
        self.lock().clone()
    }

    /// Consumes the recorder and returns the recorded bytes.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        match self.buf.into_inner() {
            Ok(buf) => buf,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<u8>> {
        self.buf.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, tag: u8) -> Record<'_> {
        let mut record = Record(self.lock());
        record.u8(tag);
        record
    }
}

impl TraceSink for RecorderSink {
    fn on_model_update(&self, e: &ModelUpdateEvent) {
        self.record(TAG_MODEL_UPDATE)
            .i64(e.timestamp.nanos())
            .i64(e.period.nanos())
            .i64(e.phase.nanos())
            .u32(e.refresh_skip_count)
            .u64(e.generation);
    }

    fn on_error_update(&self, e: &ErrorUpdateEvent) {
        self.record(TAG_ERROR_UPDATE)
            .i64(e.timestamp.nanos())
            .i64(e.error)
            .bool(e.need_resync);
    }

    fn on_error_reset(&self, e: &ErrorResetEvent) {
        self.record(TAG_ERROR_RESET)
            .i64(e.timestamp.nanos())
            .u32(e.samples_without_present);
    }

    fn on_wakeup(&self, e: &WakeupEvent) {
        self.record(TAG_WAKEUP)
            .i64(e.target.nanos())
            .i64(e.actual.nanos())
            .i64(e.latency.nanos());
    }

    fn on_listener_fire(&self, e: &ListenerFireEvent) {
        self.record(TAG_LISTENER_FIRE)
            .i64(e.event_time.nanos())
            .i64(e.fired_at.nanos())
            .i64(e.phase_offset.nanos());
    }

    fn on_zero_phase(&self, e: &ZeroPhaseEvent) {
        self.record(TAG_ZERO_PHASE)
            .i64(e.event_time.nanos())
            .bool(e.parity);
    }
}

// ---------------------------------------------------------------------------
// Decoder
// ---------------------------------------------------------------------------

/// A decoded event from a binary recording.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordedEvent {
    /// A [`ModelUpdateEvent`].
    ModelUpdate(ModelUpdateEvent),
    /// An [`ErrorUpdateEvent`].
    ErrorUpdate(ErrorUpdateEvent),
    /// An [`ErrorResetEvent`].
    ErrorReset(ErrorResetEvent),
    /// A [`WakeupEvent`].
    Wakeup(WakeupEvent),
    /// A [`ListenerFireEvent`].
    ListenerFire(ListenerFireEvent),
    /// A [`ZeroPhaseEvent`].
    ZeroPhase(ZeroPhaseEvent),
}

/// Decodes a byte slice produced by [`RecorderSink`] into an iterator of
/// [`RecordedEvent`].
pub fn decode(bytes: &[u8]) -> DecodeIter<'_> {
    DecodeIter {
        data: bytes,
        pos: 0,
    }
}

/// Iterator over decoded events.
#[derive(Debug)]
pub struct DecodeIter<'a> {
    data: &'a [u8],
    pos: usize,
}

impl DecodeIter<'_> {
    fn take<const N: usize>(&mut self) -> Option<[u8; N]> {
        let end = self.pos.checked_add(N)?;
        let bytes = self.data.get(self.pos..end)?.try_into().ok()?;
        self.pos = end;
        Some(bytes)
    }

    fn read_u8(&mut self) -> Option<u8> {
        self.take::<1>().map(|[b]| b)
    }

    fn read_u32(&mut self) -> Option<u32> {
        self.take().map(u32::from_le_bytes)
    }

    fn read_u64(&mut self) -> Option<u64> {
        self.take().map(u64::from_le_bytes)
    }

    fn read_i64(&mut self) -> Option<i64> {
        self.take().map(i64::from_le_bytes)
    }

    fn read_bool(&mut self) -> Option<bool> {
        self.read_u8().map(|v| v != 0)
    }

    fn read_time(&mut self) -> Option<HostTime> {
        self.read_i64().map(HostTime)
    }

    fn read_duration(&mut self) -> Option<Duration> {
        self.read_i64().map(Duration)
    }

    fn decode_model_update(&mut self) -> Option<RecordedEvent> {
        Some(RecordedEvent::ModelUpdate(ModelUpdateEvent {
            timestamp: self.read_time()?,
            period: self.read_duration()?,
            phase: self.read_duration()?,
            refresh_skip_count: self.read_u32()?,
            generation: self.read_u64()?,
        }))
    }

    fn decode_error_update(&mut self) -> Option<RecordedEvent> {
        Some(RecordedEvent::ErrorUpdate(ErrorUpdateEvent {
            timestamp: self.read_time()?,
            error: self.read_i64()?,
            need_resync: self.read_bool()?,
        }))
    }

    fn decode_error_reset(&mut self) -> Option<RecordedEvent> {
        Some(RecordedEvent::ErrorReset(ErrorResetEvent {
            timestamp: self.read_time()?,
            samples_without_present: self.read_u32()?,
        }))
    }

    fn decode_wakeup(&mut self) -> Option<RecordedEvent> {
        Some(RecordedEvent::Wakeup(WakeupEvent {
            target: self.read_time()?,
            actual: self.read_time()?,
            latency: self.read_duration()?,
        }))
    }

    fn decode_listener_fire(&mut self) -> Option<RecordedEvent> {
        Some(RecordedEvent::ListenerFire(ListenerFireEvent {
            event_time: self.read_time()?,
            fired_at: self.read_time()?,
            phase_offset: self.read_duration()?,
        }))
    }

    fn decode_zero_phase(&mut self) -> Option<RecordedEvent> {
        Some(RecordedEvent::ZeroPhase(ZeroPhaseEvent {
            event_time: self.read_time()?,
            parity: self.read_bool()?,
        }))
    }
}

impl Iterator for DecodeIter<'_> {
    type Item = RecordedEvent;

    fn next(&mut self) -> Option<Self::Item> {
        match self.read_u8()? {
            TAG_MODEL_UPDATE => self.decode_model_update(),
            TAG_ERROR_UPDATE => self.decode_error_update(),
            TAG_ERROR_RESET => self.decode_error_reset(),
            TAG_WAKEUP => self.decode_wakeup(),
            TAG_LISTENER_FIRE => self.decode_listener_fire(),
            TAG_ZERO_PHASE => self.decode_zero_phase(),
            _ => None, // unknown tag → stop iteration
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
