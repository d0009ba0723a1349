// Copyright 2026 the Dispsync Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Vsync listeners and their due-time math.
//!
//! A listener is any [`VsyncListener`] behind an `Arc`. The `Arc` address is
//! the listener's identity: registering the same handle twice is rejected,
//! and removal looks the handle up by address.
//!
//! Each registered listener has a phase offset relative to the modeled pulse
//! and remembers when it last fired. [`due_time`] turns those two values and
//! a reference time into the next firing time.

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;

use crate::time::{Duration, HostTime};

/// Receives software vsync events.
///
/// Callbacks run on the dispatch thread with no internal lock held, so they
/// may call back into the dispatcher, including removing themselves.
pub trait VsyncListener: Send + Sync {
    /// Called once per modeled pulse, shifted by the listener's phase offset.
    ///
    /// `event_time` is the predicted event time, not the time of the call.
    fn on_event(&self, event_time: HostTime);

    /// Name shown in diagnostics.
    fn name(&self) -> &str {
        "listener"
    }
}

impl<F> VsyncListener for F
where
    F: Fn(HostTime) + Send + Sync,
{
    fn on_event(&self, event_time: HostTime) {
        self(event_time);
    }
}

/// Returns `true` when `a` and `b` are the same listener allocation.
#[inline]
pub fn same_listener<L: VsyncListener + ?Sized>(a: &Arc<dyn VsyncListener>, b: &Arc<L>) -> bool {
    core::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// Errors from listener registration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ListenerError {
    /// The handle is already registered.
    AlreadyRegistered,
    /// The handle is not registered.
    NotRegistered,
}

impl fmt::Display for ListenerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyRegistered => f.write_str("listener is already registered"),
            Self::NotRegistered => f.write_str("listener is not registered"),
        }
    }
}

impl core::error::Error for ListenerError {}

/// A registered listener.
#[derive(Clone)]
pub struct EventListener {
    /// Offset added to the model phase for this listener.
    pub phase_offset: Duration,
    /// Event time of the most recent firing, or the registration seed.
    pub last_event_time: HostTime,
    /// The listener handle.
    pub callback: Arc<dyn VsyncListener>,
}

impl fmt::Debug for EventListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventListener")
            .field("name", &self.callback.name())
            .field("phase_offset", &self.phase_offset)
            .field("last_event_time", &self.last_event_time)
            .finish()
    }
}

/// A due listener, collected under the engine lock and fired outside it.
#[derive(Clone)]
pub struct CallbackInvocation {
    /// The listener to call.
    pub callback: Arc<dyn VsyncListener>,
    /// Event time passed to the listener.
    pub event_time: HostTime,
}

impl CallbackInvocation {
    /// Calls the listener.
    #[inline]
    pub fn fire(&self) {
        self.callback.on_event(self.event_time);
    }
}

impl fmt::Debug for CallbackInvocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackInvocation")
            .field("name", &self.callback.name())
            .field("event_time", &self.event_time)
            .finish()
    }
}

/// Next firing time of `listener` after `reference`.
///
/// The result is the first pulse of the listener's grid
/// (`phase + phase_offset + k * period`) strictly after
/// `max(reference, last_event_time)`. A candidate closer than half a period
/// to the last firing is pushed out by one period, so firings stay at least
/// `period / 2` apart.
///
/// `period` must be positive.
#[must_use]
pub fn due_time(
    listener: &EventListener,
    reference: HostTime,
    phase: Duration,
    period: Duration,
) -> HostTime {
    let effective = reference.max(listener.last_event_time);
    let combined = phase + listener.phase_offset;
    let periods = (effective - HostTime::ZERO - combined).div_floor(period);
    let mut t = HostTime::ZERO + period * periods + combined + period;
    if t - listener.last_event_time < period / 2 {
        t += period;
    }
    t
}

/// Ordered set of registered listeners.
#[derive(Clone, Debug, Default)]
pub struct ListenerRegistry {
    listeners: Vec<EventListener>,
}

impl ListenerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            listeners: Vec::new(),
        }
    }

    /// Registers `callback`.
    ///
    /// The last firing is seeded at `now - period / 2`, so the first event is
    /// the first grid pulse at least half a period after that.
    pub fn add(
        &mut self,
        now: HostTime,
        period: Duration,
        phase_offset: Duration,
        callback: Arc<dyn VsyncListener>,
    ) -> Result<(), ListenerError> {
        if self.position(&callback).is_some() {
            return Err(ListenerError::AlreadyRegistered);
        }
        self.listeners.push(EventListener {
            phase_offset,
            last_event_time: now - period / 2,
            callback,
        });
        Ok(())
    }

    /// Unregisters `callback`.
    pub fn remove<L: VsyncListener + ?Sized>(
        &mut self,
        callback: &Arc<L>,
    ) -> Result<EventListener, ListenerError> {
        let idx = self.position(callback).ok_or(ListenerError::NotRegistered)?;
        Ok(self.listeners.remove(idx))
    }

    /// Moves `callback` to a new phase offset.
    ///
    /// The last firing is shifted by the offset change, wrapped into
    /// `[-period / 2, period / 2]`, so the next firing lands on the new grid
    /// without repeating or skipping a pulse.
    pub fn change_phase_offset<L: VsyncListener + ?Sized>(
        &mut self,
        callback: &Arc<L>,
        phase_offset: Duration,
        period: Duration,
    ) -> Result<(), ListenerError> {
        let idx = self.position(callback).ok_or(ListenerError::NotRegistered)?;
        let listener = &mut self.listeners[idx];
        let mut diff = listener.phase_offset - phase_offset;
        if period.nanos() > 0 {
            if diff > period / 2 {
                diff = diff - period;
            } else if diff < -(period / 2) {
                diff = diff + period;
            }
        }
        listener.last_event_time -= diff;
        listener.phase_offset = phase_offset;
        Ok(())
    }

    /// Returns `true` when no listener is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Number of registered listeners.
    #[must_use]
    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    /// Iterates listeners in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &EventListener> {
        self.listeners.iter()
    }

    /// Iterates listeners mutably in registration order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut EventListener> {
        self.listeners.iter_mut()
    }

    fn position<L: VsyncListener + ?Sized>(&self, callback: &Arc<L>) -> Option<usize> {
        self.listeners
            .iter()
            .position(|l| same_listener(&l.callback, callback))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::ToString;
    use core::sync::atomic::{AtomicUsize, Ordering};

    const P: i64 = 16_000_000;
    const PERIOD: Duration = Duration(P);

    fn noop() -> Arc<dyn VsyncListener> {
        Arc::new(|_: HostTime| {})
    }

    /// Due time against `reference` on a grid with zero phase.
    fn register(
        reg: &mut ListenerRegistry,
        now: i64,
        cb: Arc<dyn VsyncListener>,
    ) -> Result<(), ListenerError> {
        reg.add(HostTime(now), PERIOD, Duration::ZERO, cb)
    }

    fn due(l: &EventListener, reference: i64) -> HostTime {
        due_time(l, HostTime(reference), Duration::ZERO, PERIOD)
    }

    fn listener(phase_offset: i64, last: i64) -> EventListener {
        EventListener {
            phase_offset: Duration(phase_offset),
            last_event_time: HostTime(last),
            callback: noop(),
        }
    }

    #[test]
    fn due_time_is_next_grid_pulse() {
        let l = listener(0, 0);
        assert_eq!(due(&l, P + 5), HostTime(2 * P));
        let l = listener(1_000, 0);
        assert_eq!(
            due_time(&l, HostTime(P + 5), Duration(500), PERIOD),
            HostTime(P + 1_500)
        );
    }

    #[test]
    fn due_time_on_grid_reference_moves_one_period() {
        let l = listener(0, 0);
        assert_eq!(due(&l, 3 * P), HostTime(4 * P));
    }

    #[test]
    fn due_time_uses_last_event_when_later() {
        let l = listener(0, 5 * P);
        assert_eq!(due(&l, P), HostTime(6 * P));
    }

    #[test]
    fn due_time_keeps_half_period_spacing() {
        // Last firing slightly before a grid pulse: the pulse is too close.
        let l = listener(0, 2 * P - 10);
        assert_eq!(due(&l, P), HostTime(3 * P));
    }

    #[test]
    fn due_time_handles_negative_offsets_and_times() {
        let l = listener(-P / 4, -P);
        let t = due(&l, -P / 2);
        assert_eq!(t, HostTime(-P / 4));
    }

    #[test]
    fn add_rejects_duplicates() {
        let mut reg = ListenerRegistry::new();
        let cb = noop();
        register(&mut reg, P, cb.clone()).unwrap();
        let again = register(&mut reg, P, cb);
        assert_eq!(again, Err(ListenerError::AlreadyRegistered));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn add_seeds_last_event_half_a_period_back() {
        let mut reg = ListenerRegistry::new();
        register(&mut reg, 10 * P, noop()).unwrap();
        let l = reg.iter().next().unwrap();
        assert_eq!(l.last_event_time, HostTime(10 * P - P / 2));
    }

    #[test]
    fn remove_by_concrete_handle() {
        let counter = Arc::new(AtomicUsize::new(0));
        let c = counter.clone();
        let cb = Arc::new(move |_: HostTime| {
            c.fetch_add(1, Ordering::Relaxed);
        });
        let mut reg = ListenerRegistry::new();
        register(&mut reg, 0, cb.clone()).unwrap();
        let removed = reg.remove(&cb).unwrap();
        removed.callback.on_event(HostTime(1));
        assert_eq!(counter.load(Ordering::Relaxed), 1);
        assert!(reg.is_empty());
        let err = reg.remove(&cb).unwrap_err();
        assert_eq!(err, ListenerError::NotRegistered);
    }

    #[test]
    fn distinct_closures_are_distinct_listeners() {
        let mut reg = ListenerRegistry::new();
        register(&mut reg, 0, noop()).unwrap();
        register(&mut reg, 0, noop()).unwrap();
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn change_phase_offset_shifts_last_event() {
        let mut reg = ListenerRegistry::new();
        let cb = noop();
        register(&mut reg, P, cb.clone()).unwrap();
        reg.iter_mut().next().unwrap().last_event_time = HostTime(4 * P);

        let quarter = Duration(P / 4);
        reg.change_phase_offset(&cb, quarter, PERIOD).unwrap();
        let l = reg.iter().next().unwrap();
        assert_eq!(l.phase_offset, Duration(P / 4));
        assert_eq!(l.last_event_time, HostTime(4 * P + P / 4));
        // Next firing is one period after the shifted last firing.
        assert_eq!(due(l, 4 * P), HostTime(5 * P + P / 4));
    }

    #[test]
    fn change_phase_offset_wraps_large_jumps() {
        let mut reg = ListenerRegistry::new();
        let cb = noop();
        register(&mut reg, P, cb.clone()).unwrap();
        reg.iter_mut().next().unwrap().last_event_time = HostTime(4 * P);

        // +3/4 P is the same grid as -1/4 P.
        let shift = Duration(3 * P / 4);
        reg.change_phase_offset(&cb, shift, PERIOD).unwrap();
        let l = reg.iter().next().unwrap();
        assert_eq!(l.last_event_time, HostTime(4 * P - P / 4));
    }

    #[test]
    fn closures_have_default_name() {
        assert_eq!(noop().name(), "listener");
        let message = ListenerError::NotRegistered.to_string();
        assert_eq!(message, "listener is not registered");
    }
}
