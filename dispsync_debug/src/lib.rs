// Copyright 2026 the Dispsync Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Recording, pretty-printing, and Chrome trace export for dispsync
//! diagnostics.
//!
//! This crate provides [`TraceSink`](dispsync_core::trace::TraceSink)
//! implementations for development and post-mortem analysis:
//!
//! - [`pretty::PrettyPrintSink`]: human-readable one-line-per-event output.
//! - [`recorder::RecorderSink`]: compact binary recording with
//!   [`recorder::decode`] for playback.
//! - [`chrome::export`]: writes Chrome Trace Event Format JSON from recorded
//!   bytes.
//!
//! Sinks are shared between threads, so wrap one in an `Arc` and hand a clone
//! to [`Tracer::new`](dispsync_core::trace::Tracer::new).

pub mod chrome;
pub mod pretty;
pub mod recorder;
