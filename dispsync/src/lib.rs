// Copyright 2026 the Dispsync Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Threaded software vsync.
//!
//! [`DispSync`] models the display refresh pulse from hardware vsync
//! timestamps, checks the model against present fences, and calls registered
//! listeners from a dedicated thread once per modeled pulse, each at its own
//! phase offset.
//!
//! ```text
//!   hardware vsync ──► add_resync_sample() ─┐
//!                                           ├──► need resync? ──► caller
//!   present fence  ──► add_present_fence() ─┘
//!                            │
//!                            ▼ model push
//!                   dispatch thread ──► listener.on_event(t)
//! ```
//!
//! The model math and the schedule live in [`dispsync_core`]; this crate adds
//! the clock, the thread and logging through `tracing`.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use dispsync::{DispSync, DispSyncConfig, Duration, HostTime};
//!
//! let sync = DispSync::new(DispSyncConfig::new())?;
//! sync.add_event_listener(
//!     Duration::from_micros(-500),
//!     Arc::new(|t: HostTime| println!("vsync at {}", t.nanos())),
//! )?;
//! // Feed hardware vsync timestamps as they arrive.
//! sync.add_resync_sample(dispsync::clock::now());
//! # Ok::<(), dispsync::DispSyncError>(())
//! ```
//!
//! # Crate features
//!
//! - `trace` (disabled by default): Forwards model and dispatch events to the
//!   [`Tracer`] passed to [`DispSync::with_tracer`].

pub mod clock;
mod disp_sync;
mod engine;
mod error;

pub use disp_sync::DispSync;
pub use error::DispSyncError;

pub use dispsync_core::config::DispSyncConfig;
pub use dispsync_core::dispatch::EngineState;
pub use dispsync_core::fence::{PresentFence, SoftwareFence};
pub use dispsync_core::listener::{ListenerError, VsyncListener};
pub use dispsync_core::model::Model;
pub use dispsync_core::time::{Duration, HostTime};
pub use dispsync_core::trace::{TraceSink, Tracer};
