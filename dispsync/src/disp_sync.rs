// Copyright 2026 the Dispsync Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The software vsync façade.

use std::fmt::{self, Write as _};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use dispsync_core::config::DispSyncConfig;
use dispsync_core::dispatch::EngineState;
use dispsync_core::fence::PresentFence;
use dispsync_core::listener::VsyncListener;
use dispsync_core::model::Model;
use dispsync_core::sync::SyncState;
use dispsync_core::time::{Duration, HostTime};
use dispsync_core::trace::{Tracer, ZeroPhaseTracer};
use tracing::debug;

use crate::clock;
use crate::engine::Engine;
use crate::error::DispSyncError;

/// Software model of the display refresh pulse with a listener dispatcher.
///
/// Feed it hardware vsync timestamps with
/// [`add_resync_sample`](Self::add_resync_sample) and present fences with
/// [`add_present_fence`](Self::add_present_fence). Both return whether more
/// hardware samples are needed; the caller turns the hardware vsync source on
/// or off accordingly.
///
/// Listeners registered with [`add_event_listener`](Self::add_event_listener)
/// are called from a dedicated thread once per modeled pulse, shifted by
/// their phase offset.
///
/// All methods take `&self` and may be called from any thread, including
/// from inside a listener callback.
#[derive(Debug)]
pub struct DispSync {
    state: Mutex<SyncState>,
    engine: Engine,
    ignore_present_fences: bool,
    zero_phase: Option<Arc<ZeroPhaseTracer>>,
}

impl DispSync {
    /// Creates a dispatcher with an unset model and starts its thread.
    pub fn new(config: DispSyncConfig) -> Result<Self, DispSyncError> {
        Self::with_tracer(config, Tracer::none())
    }

    /// Like [`new`](Self::new), with model and dispatch events sent to
    /// `tracer`.
    pub fn with_tracer(config: DispSyncConfig, tracer: Tracer) -> Result<Self, DispSyncError> {
        let engine = Engine::spawn(config.max_wakeup_latency, tracer.clone())?;
        let zero_phase = if config.zero_phase_tracer {
            let listener = Arc::new(ZeroPhaseTracer::new(tracer.clone()));
            engine.add_listener(Duration::ZERO, listener.clone())?;
            Some(listener)
        } else {
            None
        };
        debug!(?config, "dispsync created");
        Ok(Self {
            state: Mutex::new(SyncState::new(config, tracer)),
            engine,
            ignore_present_fences: config.ignore_present_fences,
            zero_phase,
        })
    }

    fn lock_state(&self) -> MutexGuard<'_, SyncState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Forgets all samples and error state and unsets the model.
    ///
    /// Listeners stay registered but are not called until a model is fitted
    /// again.
    pub fn reset(&self) {
        let update = self.lock_state().reset(clock::now());
        self.engine.update_model(update);
    }

    /// Records a present fence. Never blocks on the fence.
    ///
    /// Returns `true` when hardware resync samples are needed.
    pub fn add_present_fence(&self, fence: Arc<dyn PresentFence>) -> bool {
        let need_resync = self.lock_state().add_present_fence(fence, clock::now());
        if self.ignore_present_fences {
            return self.engine.has_listeners();
        }
        need_resync
    }

    /// Starts a fresh burst of hardware samples, discarding buffered ones.
    pub fn begin_resync(&self) {
        self.lock_state().begin_resync();
    }

    /// Records a hardware vsync timestamp.
    ///
    /// Returns `true` when more hardware samples are needed.
    pub fn add_resync_sample(&self, timestamp: HostTime) -> bool {
        let outcome = self.lock_state().add_resync_sample(timestamp);
        if let Some(update) = outcome.update {
            self.engine.update_model(update);
        }
        if outcome.error_reset {
            debug!(
                timestamp = timestamp.nanos(),
                "too many resync samples without a present fence; error reset"
            );
        }
        if self.ignore_present_fences {
            return self.engine.has_listeners();
        }
        outcome.need_resync
    }

    /// Marks the end of a resync burst. Has no effect on the model.
    pub fn end_resync(&self) {}

    /// Registers `callback` to be called once per modeled pulse, shifted by
    /// `phase_offset`.
    pub fn add_event_listener(
        &self,
        phase_offset: Duration,
        callback: Arc<dyn VsyncListener>,
    ) -> Result<(), DispSyncError> {
        self.engine.add_listener(phase_offset, callback)
    }

    /// Unregisters `callback`.
    ///
    /// A callback already in flight still completes.
    pub fn remove_event_listener<L: VsyncListener + ?Sized>(
        &self,
        callback: &Arc<L>,
    ) -> Result<(), DispSyncError> {
        self.engine.remove_listener(callback)
    }

    /// Moves a registered listener to a new phase offset without repeating
    /// or skipping a pulse.
    pub fn change_phase_offset<L: VsyncListener + ?Sized>(
        &self,
        callback: &Arc<L>,
        phase_offset: Duration,
    ) -> Result<(), DispSyncError> {
        self.engine.change_phase_offset(callback, phase_offset)
    }

    /// Sets how many hardware pulses to skip between modeled pulses.
    pub fn set_refresh_skip_count(&self, count: u32) {
        let now = clock::now();
        let update = self.lock_state().set_refresh_skip_count(count, now);
        debug!(count, "refresh skip count set");
        if let Some(update) = update {
            self.engine.update_model(update);
        }
    }

    /// Overrides the modeled period. The phase becomes 0.
    pub fn set_period(&self, period: Duration) {
        let update = self.lock_state().set_period(period, clock::now());
        debug!(period = period.nanos(), "period overridden");
        self.engine.update_model(update);
    }

    /// The modeled period, zero while unset.
    #[must_use]
    pub fn period(&self) -> Duration {
        self.lock_state().model().period
    }

    /// Snapshot of the model.
    #[must_use]
    pub fn model(&self) -> Model {
        self.lock_state().model()
    }

    /// Predicts the pulse `period_offset` periods after the next one.
    ///
    /// Returns `None` while the model is unset.
    #[must_use]
    pub fn compute_next_refresh(&self, period_offset: i64) -> Option<HostTime> {
        let now = clock::now();
        self.lock_state().compute_next_refresh(now, period_offset)
    }

    /// Lifecycle state of the dispatch thread.
    #[must_use]
    pub fn engine_state(&self) -> EngineState {
        self.engine.state()
    }

    /// Returns `true` when at least one listener is registered.
    #[must_use]
    pub fn has_event_listeners(&self) -> bool {
        self.engine.has_listeners()
    }

    /// The built-in zero-phase listener, if enabled in the configuration.
    #[must_use]
    pub fn zero_phase_tracer(&self) -> Option<&Arc<ZeroPhaseTracer>> {
        self.zero_phase.as_ref()
    }

    /// Appends a human-readable description of the model, samples, error and
    /// dispatcher to `out`.
    pub fn dump(&self, out: &mut String) -> fmt::Result {
        let now = clock::now();
        writeln!(out, "dispsync (now={})", now.nanos())?;
        self.lock_state().dump(out, now)?;
        if self.ignore_present_fences {
            writeln!(out, "present fences ignored")?;
        }
        self.engine.dump(out)
    }

    /// Stops the dispatch thread. No listener is called afterwards.
    ///
    /// Listener operations fail with [`DispSyncError::EngineStopped`] once
    /// stopped. Also runs on drop.
    pub fn shutdown(&self) {
        self.engine.shutdown();
    }
}
