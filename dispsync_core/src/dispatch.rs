// Copyright 2026 the Dispsync Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Scheduling state of the dispatch thread.
//!
//! [`DispatchState`] owns the listener registry and a private copy of the
//! model. It never reads a clock: every operation takes `now` explicitly, so
//! the thread that drives it is a thin loop and the schedule can be tested
//! against simulated time.
//!
//! One iteration of the driving loop:
//!
//! ```text
//!   next_wake_time(now) ──► None ────────► wait for a push
//!          │
//!          ▼
//!   Some(target) ──► wait until target (or a push)
//!                          │
//!                          ▼
//!   record_wakeup(now, target)     (timer wakes only)
//!   gather_invocations(now) ──► fire each, outside the lock
//! ```

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt::{self, Write};

use crate::listener::{
    CallbackInvocation, ListenerError, ListenerRegistry, VsyncListener, due_time,
};
use crate::model::ModelUpdate;
use crate::time::{Duration, HostTime};
use crate::trace::{ListenerFireEvent, Tracer, WakeupEvent};

/// Lifecycle state of the dispatch engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EngineState {
    /// No model or no listeners; waiting without a deadline.
    Idle,
    /// Waiting until the next listener is due.
    Armed,
    /// Terminal; no further callbacks.
    Stopped,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Armed => "armed",
            Self::Stopped => "stopped",
        })
    }
}

/// Listener registry plus the engine's copy of the model.
#[derive(Debug)]
pub struct DispatchState {
    period: Duration,
    phase: Duration,
    generation: u64,
    listeners: ListenerRegistry,
    wakeup_latency: Duration,
    max_wakeup_latency: Duration,
    stopped: bool,
    tracer: Tracer,
}

impl DispatchState {
    /// Creates an idle state with no model.
    #[must_use]
    pub fn new(max_wakeup_latency: Duration, tracer: Tracer) -> Self {
        Self {
            period: Duration::ZERO,
            phase: Duration::ZERO,
            generation: 0,
            listeners: ListenerRegistry::new(),
            wakeup_latency: Duration::ZERO,
            max_wakeup_latency,
            stopped: false,
            tracer,
        }
    }

    /// Installs a model pushed from the façade.
    ///
    /// Returns `false`, leaving the state untouched, if `update` is older
    /// than the model already held.
    pub fn apply_update(&mut self, update: ModelUpdate) -> bool {
        if update.generation < self.generation {
            return false;
        }
        self.period = update.period;
        self.phase = update.phase;
        self.generation = update.generation;
        true
    }

    /// The engine's model period.
    #[must_use]
    pub fn period(&self) -> Duration {
        self.period
    }

    /// The engine's model phase.
    #[must_use]
    pub fn phase(&self) -> Duration {
        self.phase
    }

    /// Generation of the model currently held.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Registers a listener. See [`ListenerRegistry::add`].
    pub fn add_listener(
        &mut self,
        now: HostTime,
        phase_offset: Duration,
        callback: Arc<dyn VsyncListener>,
    ) -> Result<(), ListenerError> {
        self.listeners.add(now, self.period, phase_offset, callback)
    }

    /// Unregisters a listener.
    pub fn remove_listener<L: VsyncListener + ?Sized>(
        &mut self,
        callback: &Arc<L>,
    ) -> Result<(), ListenerError> {
        self.listeners.remove(callback).map(drop)
    }

    /// Moves a listener to a new phase offset.
    pub fn change_phase_offset<L: VsyncListener + ?Sized>(
        &mut self,
        callback: &Arc<L>,
        phase_offset: Duration,
    ) -> Result<(), ListenerError> {
        self.listeners.change_phase_offset(callback, phase_offset, self.period)
    }

    /// Returns `true` when at least one listener is registered.
    #[must_use]
    pub fn has_listeners(&self) -> bool {
        !self.listeners.is_empty()
    }

    /// The registered listeners.
    #[must_use]
    pub fn listeners(&self) -> &ListenerRegistry {
        &self.listeners
    }

    /// Marks the state terminal.
    pub fn stop(&mut self) {
        self.stopped = true;
    }

    /// Returns `true` once [`stop`](Self::stop) was called.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> EngineState {
        if self.stopped {
            EngineState::Stopped
        } else if self.period.nanos() <= 0 || self.listeners.is_empty() {
            EngineState::Idle
        } else {
            EngineState::Armed
        }
    }

    /// Earliest due time over all listeners, using `now` as the reference.
    ///
    /// `None` means wait without a deadline.
    #[must_use]
    pub fn next_wake_time(&self, now: HostTime) -> Option<HostTime> {
        if self.state() != EngineState::Armed {
            return None;
        }
        self.listeners
            .iter()
            .map(|l| due_time(l, now, self.phase, self.period))
            .min()
    }

    /// Feeds one timer wake-up into the latency estimate.
    ///
    /// The estimate is an exponential moving average with weight 1/64,
    /// clamped to the configured maximum. It is diagnostic only and does not
    /// shift the schedule.
    pub fn record_wakeup(&mut self, now: HostTime, target: HostTime) {
        let observed = now - target;
        let mut latency = (self.wakeup_latency * 63 + observed) / 64;
        if latency > self.max_wakeup_latency {
            latency = self.max_wakeup_latency;
        }
        self.wakeup_latency = latency;
        self.tracer.wakeup(&WakeupEvent {
            target,
            actual: now,
            latency,
        });
    }

    /// Smoothed wake-up latency.
    #[must_use]
    pub fn wakeup_latency(&self) -> Duration {
        self.wakeup_latency
    }

    /// Collects every listener due before `now` and records its firing.
    ///
    /// Due times are computed against one period ago, so a listener whose
    /// pulse passed while the thread was waking still fires for it. Every
    /// collected listener has its last event time advanced to the returned
    /// event time.
    pub fn gather_invocations(&mut self, now: HostTime) -> Vec<CallbackInvocation> {
        let mut invocations = Vec::new();
        if self.stopped || self.period.nanos() <= 0 {
            return invocations;
        }
        let reference = now - self.period;
        for listener in self.listeners.iter_mut() {
            let t = due_time(listener, reference, self.phase, self.period);
            if t < now {
                listener.last_event_time = t;
                self.tracer.listener_fire(&ListenerFireEvent {
                    event_time: t,
                    fired_at: now,
                    phase_offset: listener.phase_offset,
                });
                invocations.push(CallbackInvocation {
                    callback: listener.callback.clone(),
                    event_time: t,
                });
            }
        }
        invocations
    }

    /// Appends a human-readable description of the engine to `out`.
    pub fn dump(&self, out: &mut impl Write) -> fmt::Result {
        writeln!(
            out,
            "engine: state={} period={} phase={} generation={}",
            self.state(),
            self.period.nanos(),
            self.phase.nanos(),
            self.generation,
        )?;
        writeln!(
            out,
            "engine: wakeup latency={} ns (max {})",
            self.wakeup_latency.nanos(),
            self.max_wakeup_latency.nanos(),
        )?;
        writeln!(out, "listeners: {}", self.listeners.len())?;
        for listener in self.listeners.iter() {
            writeln!(
                out,
                "  {}: phase offset={} last event={}",
                listener.callback.name(),
                listener.phase_offset.nanos(),
                listener.last_event_time.nanos(),
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use alloc::string::String;
    use std::sync::Mutex;

    const P: i64 = 16_000_000;

    fn state_with_period(period: i64) -> DispatchState {
        let mut state = DispatchState::new(Duration::from_micros(500), Tracer::none());
        state.apply_update(ModelUpdate {
            period: Duration(period),
            phase: Duration::ZERO,
            generation: 1,
        });
        state
    }

    /// Runs the dispatch loop against a simulated clock from `from` until the
    /// next wake would pass `until`.
    ///
    /// The simulated thread wakes 1 ns after each target.
    fn simulate(state: &mut DispatchState, from: i64, until: i64) {
        let mut now = HostTime(from);
        while let Some(target) = state.next_wake_time(now) {
            if target > HostTime(until) {
                break;
            }
            now = target + Duration(1);
            state.record_wakeup(now, target);
            for invocation in state.gather_invocations(now) {
                invocation.fire();
            }
        }
    }

    fn recorder() -> (Arc<Mutex<Vec<HostTime>>>, Arc<dyn VsyncListener>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = log.clone();
        let cb: Arc<dyn VsyncListener> = Arc::new(move |t: HostTime| {
            sink.lock().unwrap().push(t);
        });
        (log, cb)
    }

    fn listen(state: &mut DispatchState, now: i64, offset: i64, cb: Arc<dyn VsyncListener>) {
        let (now, offset) = (HostTime(now), Duration(offset));
        state.add_listener(now, offset, cb).unwrap();
    }

    fn times(log: &Mutex<Vec<HostTime>>) -> Vec<i64> {
        log.lock().unwrap().iter().map(|t| t.nanos()).collect()
    }

    #[test]
    fn no_model_means_idle() {
        let mut state = DispatchState::new(Duration::from_micros(500), Tracer::none());
        let (_, cb) = recorder();
        listen(&mut state, 0, 0, cb);
        assert_eq!(state.state(), EngineState::Idle);
        assert_eq!(state.next_wake_time(HostTime(100)), None);
        assert!(state.gather_invocations(HostTime(10 * P)).is_empty());
    }

    #[test]
    fn no_listeners_means_idle() {
        let state = state_with_period(P);
        assert_eq!(state.state(), EngineState::Idle);
        assert_eq!(state.next_wake_time(HostTime(100)), None);
    }

    #[test]
    fn stale_updates_are_ignored() {
        let mut state = state_with_period(P);
        assert!(state.apply_update(ModelUpdate {
            period: Duration(2 * P),
            phase: Duration(7),
            generation: 5,
        }));
        assert!(!state.apply_update(ModelUpdate {
            period: Duration(P),
            phase: Duration::ZERO,
            generation: 4,
        }));
        assert_eq!(state.period(), Duration(2 * P));
        assert_eq!(state.phase(), Duration(7));
        assert_eq!(state.generation(), 5);
    }

    #[test]
    fn two_listeners_fire_on_their_own_grids() {
        let mut state = state_with_period(P);
        let t0 = P / 2 + 1;
        let h = P / 2;
        let (log_a, a) = recorder();
        let (log_b, b) = recorder();
        listen(&mut state, t0, 0, a);
        listen(&mut state, t0, h, b);
        assert_eq!(state.state(), EngineState::Armed);
        assert_eq!(state.next_wake_time(HostTime(t0)), Some(HostTime(P)));

        simulate(&mut state, t0, 5 * P + h);

        assert_eq!(times(&log_a), [P, 2 * P, 3 * P, 4 * P, 5 * P]);
        assert_eq!(
            times(&log_b),
            [P + h, 2 * P + h, 3 * P + h, 4 * P + h, 5 * P + h]
        );
    }

    #[test]
    fn removed_listener_stops_firing() {
        let mut state = state_with_period(P);
        let t0 = P / 2 + 1;
        let h = P / 2;
        let (log_a, a) = recorder();
        let (log_b, b) = recorder();
        listen(&mut state, t0, 0, a.clone());
        listen(&mut state, t0, h, b);

        simulate(&mut state, t0, 2 * P + h);
        state.remove_listener(&a).unwrap();
        let resume = HostTime(2 * P + h + 1);
        assert_eq!(state.next_wake_time(resume), Some(HostTime(3 * P + h)));
        simulate(&mut state, resume.nanos(), 5 * P + h);

        assert_eq!(times(&log_a), [P, 2 * P]);
        // The survivor keeps the grid it had with both listeners registered.
        assert_eq!(
            times(&log_b),
            [P + h, 2 * P + h, 3 * P + h, 4 * P + h, 5 * P + h]
        );
    }

    #[test]
    fn firings_are_monotonic_and_spaced() {
        let mut state = state_with_period(P);
        let (log, cb) = recorder();
        listen(&mut state, 3, -P / 3, cb);
        simulate(&mut state, 3, 40 * P);

        // Model changes mid-run: period shrinks and phase moves.
        state.apply_update(ModelUpdate {
            period: Duration(P - 1_000),
            phase: Duration(P / 7),
            generation: 2,
        });
        simulate(&mut state, 40 * P + 1, 80 * P);

        let log = log.lock().unwrap();
        assert!(log.len() > 70);
        for pair in log.windows(2) {
            let gap = pair[1] - pair[0];
            assert!(gap.nanos() >= (P - 1_000) / 2, "gap {gap:?} too small");
        }
    }

    #[test]
    fn late_wakeup_fires_missed_pulse_once() {
        let mut state = state_with_period(P);
        let (log, cb) = recorder();
        listen(&mut state, P / 2 + 1, 0, cb);
        // Woken a quarter period late.
        let now = HostTime(P + P / 4);
        for invocation in state.gather_invocations(now) {
            invocation.fire();
        }
        assert!(state.gather_invocations(now).is_empty());
        assert_eq!(*log.lock().unwrap(), [HostTime(P)]);
        assert_eq!(state.next_wake_time(now), Some(HostTime(2 * P)));
    }

    #[test]
    fn change_phase_offset_does_not_double_fire() {
        let mut state = state_with_period(P);
        let t0 = P / 2 + 1;
        let q = P / 4;
        let (log, cb) = recorder();
        listen(&mut state, t0, 0, cb.clone());
        simulate(&mut state, t0, 3 * P);
        state.change_phase_offset(&cb, Duration(q)).unwrap();
        simulate(&mut state, 3 * P + 1, 6 * P);

        assert_eq!(times(&log), [P, 2 * P, 3 * P, 4 * P + q, 5 * P + q]);
    }

    #[test]
    fn wakeup_latency_is_smoothed_and_clamped() {
        let mut state = state_with_period(P);
        state.record_wakeup(HostTime(6_400), HostTime(0));
        assert_eq!(state.wakeup_latency(), Duration(100));
        for _ in 0..10_000 {
            state.record_wakeup(HostTime(10_000_000), HostTime(0));
        }
        assert_eq!(state.wakeup_latency(), Duration::from_micros(500));
    }

    #[test]
    fn stop_is_terminal() {
        let mut state = state_with_period(P);
        let (_, cb) = recorder();
        listen(&mut state, 0, 0, cb);
        state.stop();
        assert_eq!(state.state(), EngineState::Stopped);
        assert_eq!(state.next_wake_time(HostTime(0)), None);
        assert!(state.gather_invocations(HostTime(10 * P)).is_empty());
    }

    #[test]
    fn dump_lists_listeners() {
        let mut state = state_with_period(P);
        let (_, cb) = recorder();
        listen(&mut state, 0, 42, cb);
        let mut out = String::new();
        state.dump(&mut out).unwrap();
        assert!(out.contains("state=armed"));
        assert!(out.contains("listener: phase offset=42"));
    }
}
