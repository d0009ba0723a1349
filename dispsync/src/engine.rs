// Copyright 2026 the Dispsync Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The dispatch thread.
//!
//! [`Engine`] owns one OS thread and a [`DispatchState`] behind a mutex and
//! condition variable. Every mutation notifies the condition variable so the
//! thread recomputes its deadline. Callbacks run with the mutex released.
//!
//! A poisoned mutex or a panicking callback stops the engine for good. The
//! state then reads [`EngineState::Stopped`] and listener operations fail.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use dispsync_core::dispatch::{DispatchState, EngineState};
use dispsync_core::listener::VsyncListener;
use dispsync_core::model::ModelUpdate;
use dispsync_core::time::Duration;
use dispsync_core::trace::Tracer;
use tracing::{error, info};

use crate::clock;
use crate::error::DispSyncError;

const THREAD_NAME: &str = "dispsync";

struct Shared {
    state: Mutex<DispatchState>,
    cond: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, DispatchState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Handle to the dispatch thread.
pub(crate) struct Engine {
    shared: Arc<Shared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Spawns the dispatch thread in the idle state.
    pub(crate) fn spawn(
        max_wakeup_latency: Duration,
        tracer: Tracer,
    ) -> Result<Self, DispSyncError> {
        let shared = Arc::new(Shared {
            state: Mutex::new(DispatchState::new(max_wakeup_latency, tracer)),
            cond: Condvar::new(),
        });
        let thread_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name(THREAD_NAME.into())
            .spawn(move || run(&thread_shared))?;
        Ok(Self {
            shared,
            thread: Mutex::new(Some(handle)),
        })
    }

    /// Installs a model pushed from the façade.
    pub(crate) fn update_model(&self, update: ModelUpdate) {
        let mut state = self.shared.lock();
        if state.apply_update(update) {
            self.shared.cond.notify_all();
        }
    }

    pub(crate) fn add_listener(
        &self,
        phase_offset: Duration,
        callback: Arc<dyn VsyncListener>,
    ) -> Result<(), DispSyncError> {
        let mut state = self.shared.lock();
        if state.is_stopped() {
            return Err(DispSyncError::EngineStopped);
        }
        state.add_listener(clock::now(), phase_offset, callback)?;
        self.shared.cond.notify_all();
        Ok(())
    }

    pub(crate) fn remove_listener<L: VsyncListener + ?Sized>(
        &self,
        callback: &Arc<L>,
    ) -> Result<(), DispSyncError> {
        let mut state = self.shared.lock();
        if state.is_stopped() {
            return Err(DispSyncError::EngineStopped);
        }
        state.remove_listener(callback)?;
        self.shared.cond.notify_all();
        Ok(())
    }

    pub(crate) fn change_phase_offset<L: VsyncListener + ?Sized>(
        &self,
        callback: &Arc<L>,
        phase_offset: Duration,
    ) -> Result<(), DispSyncError> {
        let mut state = self.shared.lock();
        if state.is_stopped() {
            return Err(DispSyncError::EngineStopped);
        }
        state.change_phase_offset(callback, phase_offset)?;
        self.shared.cond.notify_all();
        Ok(())
    }

    pub(crate) fn has_listeners(&self) -> bool {
        self.shared.lock().has_listeners()
    }

    pub(crate) fn state(&self) -> EngineState {
        self.shared.lock().state()
    }

    pub(crate) fn dump(&self, out: &mut String) -> fmt::Result {
        self.shared.lock().dump(out)
    }

    /// Stops the thread and waits for it to exit.
    ///
    /// Called from the dispatch thread itself (from a callback), the thread
    /// is told to stop but not joined; it exits once the callback returns.
    pub(crate) fn shutdown(&self) {
        {
            let mut state = self.shared.lock();
            state.stop();
            self.shared.cond.notify_all();
        }
        let handle = self
            .thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                error!("dispatch thread panicked");
            }
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run(shared: &Shared) {
    info!("dispatch thread started");
    let mut state = shared.lock();
    loop {
        if state.is_stopped() {
            break;
        }

        let now = clock::now();
        let target = state.next_wake_time(now);
        let mut timed_out = false;
        state = match target {
            None => match shared.cond.wait(state) {
                Ok(guard) => guard,
                Err(poisoned) => return fail(poisoned.into_inner(), "engine mutex poisoned"),
            },
            Some(target) => {
                let timeout = (target - now).to_unsigned();
                match shared.cond.wait_timeout(state, timeout) {
                    Ok((guard, result)) => {
                        timed_out = result.timed_out();
                        guard
                    }
                    Err(poisoned) => {
                        return fail(poisoned.into_inner().0, "engine mutex poisoned");
                    }
                }
            }
        };
        if state.is_stopped() {
            break;
        }

        let now = clock::now();
        if let (true, Some(target)) = (timed_out, target) {
            state.record_wakeup(now, target);
        }
        let invocations = state.gather_invocations(now);
        if invocations.is_empty() {
            continue;
        }

        drop(state);
        for invocation in &invocations {
            let fired = panic::catch_unwind(AssertUnwindSafe(|| invocation.fire()));
            if fired.is_err() {
                return fail(shared.lock(), "listener panicked");
            }
        }
        drop(invocations);
        state = match shared.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => return fail(poisoned.into_inner(), "engine mutex poisoned"),
        };
    }
    info!("dispatch thread stopped");
}

fn fail(mut state: MutexGuard<'_, DispatchState>, cause: &str) {
    state.stop();
    error!(cause, "dispatch thread stopped; vsync events end here");
}
