// Copyright 2026 the Dispsync Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Display refresh model, drift tracking and listener scheduling.
//!
//! `dispsync_core` turns noisy hardware vsync timestamps into a software
//! model of the refresh pulse and decides when listeners are due. It is
//! `no_std` compatible (with `alloc`) and never reads a clock or blocks:
//! every operation takes the current time as an argument. The threaded
//! dispatcher lives in the `dispsync` crate.
//!
//! # Architecture
//!
//! ```text
//!   hardware vsync ──► SyncState::add_resync_sample()
//!                           │
//!                           ▼
//!                 ResyncSamples ──► estimator::fit() ──► Model
//!                                                          │
//!   present fences ──► ErrorTracker ◄──────────────────────┤
//!                           │                              │
//!                           ▼                              ▼
//!                     need_resync                    ModelUpdate
//!                                                          │
//!                                                          ▼
//!                           DispatchState::apply_update() ──► due listeners
//! ```
//!
//! **[`time`]**: Signed nanosecond [`HostTime`](time::HostTime) and
//! [`Duration`](time::Duration).
//!
//! **[`config`]**: [`DispSyncConfig`](config::DispSyncConfig), every tunable
//! limit and threshold.
//!
//! **[`model`]**: The fitted [`Model`](model::Model) and the
//! [`ModelUpdate`](model::ModelUpdate) copy pushed to the dispatcher.
//!
//! **[`estimator`]**: Resync sample ring and the circular-mean fit.
//!
//! **[`fence`]**: The [`PresentFence`](fence::PresentFence) contract and a
//! software fence.
//!
//! **[`tracker`]**: Present-fence slots and the mean squared phase error.
//!
//! **[`listener`]**: The [`VsyncListener`](listener::VsyncListener) trait,
//! the listener registry and due-time math.
//!
//! **[`dispatch`]**: [`DispatchState`](dispatch::DispatchState), the
//! dispatcher's schedule driven by explicit time.
//!
//! **[`sync`]**: [`SyncState`](sync::SyncState), the façade-side model.
//!
//! **[`trace`]**: [`TraceSink`](trace::TraceSink) trait and event types,
//! with the zero-overhead [`Tracer`](trace::Tracer) wrapper.
//!
//! # Crate features
//!
//! - `trace` (disabled by default): Enables `Tracer` method bodies (one branch
//!   per call site).

#![no_std]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

extern crate alloc;

pub mod config;
pub mod dispatch;
pub mod estimator;
pub mod fence;
pub mod listener;
pub mod model;
pub mod sync;
pub mod time;
pub mod trace;
pub mod tracker;
