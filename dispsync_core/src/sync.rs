// Copyright 2026 the Dispsync Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Model state owned by the façade.
//!
//! [`SyncState`] holds the model, the resync sample ring and the error
//! tracker. Operations that change the model return a [`ModelUpdate`] for
//! the caller to push to the dispatch engine once it has released the lock
//! guarding this state. Generations increase with every returned update.

use alloc::sync::Arc;
use core::fmt::{self, Write};

use crate::config::DispSyncConfig;
use crate::estimator::{ResyncSamples, fit};
use crate::fence::PresentFence;
use crate::model::{Model, ModelUpdate};
use crate::time::{Duration, HostTime};
use crate::trace::{ErrorResetEvent, ErrorUpdateEvent, ModelUpdateEvent, Tracer};
use crate::tracker::{ErrorTracker, SlotState};

/// Result of feeding a sample into [`SyncState`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[must_use]
pub struct SampleOutcome {
    /// Whether hardware resync samples are still needed.
    pub need_resync: bool,
    /// Model to push to the engine, if it changed.
    pub update: Option<ModelUpdate>,
    /// Set when this sample forced an error reset.
    pub error_reset: bool,
}

/// Façade-side model, samples and error tracking.
#[derive(Debug)]
pub struct SyncState {
    config: DispSyncConfig,
    model: Model,
    resync: ResyncSamples,
    tracker: ErrorTracker,
    samples_since_present: u32,
    generation: u64,
    tracer: Tracer,
}

impl SyncState {
    /// Creates state with an unset model.
    #[must_use]
    pub fn new(config: DispSyncConfig, tracer: Tracer) -> Self {
        Self {
            config,
            model: Model::default(),
            resync: ResyncSamples::with_capacity(config.max_resync_samples),
            tracker: ErrorTracker::new(
                config.num_present_samples,
                config.present_time_offset,
                config.error_threshold,
            ),
            samples_since_present: 0,
            generation: 0,
            tracer,
        }
    }

    /// The configuration in effect.
    #[must_use]
    pub fn config(&self) -> &DispSyncConfig {
        &self.config
    }

    /// Snapshot of the model.
    #[must_use]
    pub fn model(&self) -> Model {
        self.model
    }

    /// Latest computed error, in ns².
    #[must_use]
    pub fn error(&self) -> i64 {
        self.tracker.error()
    }

    /// Resync samples counted since the last present fence.
    #[must_use]
    pub fn samples_since_present(&self) -> u32 {
        self.samples_since_present
    }

    /// The resync sample ring.
    #[must_use]
    pub fn resync_samples(&self) -> &ResyncSamples {
        &self.resync
    }

    /// Forgets samples and error state and unsets the model.
    ///
    /// The refresh skip count is kept.
    pub fn reset(&mut self, now: HostTime) -> ModelUpdate {
        self.resync.clear();
        self.tracker.reset();
        self.samples_since_present = 0;
        self.model.period = Duration::ZERO;
        self.model.phase = Duration::ZERO;
        self.publish(now)
    }

    /// Clears the resync ring ahead of a burst of hardware samples.
    pub fn begin_resync(&mut self) {
        self.resync.clear();
    }

    /// Records a hardware vsync timestamp.
    ///
    /// The model is refitted once enough samples are buffered. If too many
    /// samples arrived since the last present fence, the error state is
    /// reset and resync is requested.
    pub fn add_resync_sample(&mut self, timestamp: HostTime) -> SampleOutcome {
        self.resync.push(timestamp);
        let update = self.refit(timestamp);

        self.samples_since_present = self.samples_since_present.saturating_add(1);
        if self.samples_since_present > self.config.max_resync_samples_without_present {
            self.tracker.reset();
            self.tracer.error_reset(&ErrorResetEvent {
                timestamp,
                samples_without_present: self.samples_since_present,
            });
            return SampleOutcome {
                need_resync: true,
                update,
                error_reset: true,
            };
        }

        if update.is_some() {
            self.update_error(timestamp);
        }
        SampleOutcome {
            need_resync: self.tracker.needs_resync(&self.model),
            update,
            error_reset: false,
        }
    }

    /// Records a present fence and returns whether resync is needed.
    pub fn add_present_fence(&mut self, fence: Arc<dyn PresentFence>, now: HostTime) -> bool {
        self.samples_since_present = 0;
        let need_resync = self.tracker.add_present_sample(fence, &self.model);
        self.tracer.error_update(&ErrorUpdateEvent {
            timestamp: now,
            error: self.tracker.error(),
            need_resync,
        });
        need_resync
    }

    /// Sets how many hardware pulses to skip between modeled pulses.
    ///
    /// With enough samples the model is refitted. Otherwise a known period
    /// is rescaled from its hardware period.
    pub fn set_refresh_skip_count(&mut self, count: u32, now: HostTime) -> Option<ModelUpdate> {
        if count == self.model.refresh_skip_count {
            return None;
        }
        let hardware = self.model.hardware_period();
        self.model.refresh_skip_count = count;
        if let Some(update) = self.refit(now) {
            return Some(update);
        }
        if !self.model.is_set() {
            return None;
        }
        self.model.period = hardware * (i64::from(count) + 1);
        Some(self.publish(now))
    }

    /// Overrides the period and zeroes the phase.
    ///
    /// The period is taken as the effective period; the skip count is not
    /// applied to it.
    pub fn set_period(&mut self, period: Duration, now: HostTime) -> ModelUpdate {
        self.model.period = if period.nanos() < 0 {
            Duration::ZERO
        } else {
            period
        };
        self.model.phase = Duration::ZERO;
        self.publish(now)
    }

    /// Predicts the pulse `period_offset` periods after the next one.
    #[must_use]
    pub fn compute_next_refresh(&self, now: HostTime, period_offset: i64) -> Option<HostTime> {
        self.model.next_refresh(now, period_offset)
    }

    /// Appends a human-readable description of the model, samples and error
    /// to `out`.
    pub fn dump(&self, out: &mut impl Write, now: HostTime) -> fmt::Result {
        let model = &self.model;
        let fps = if model.is_set() {
            1e9 / model.period.nanos() as f64
        } else {
            0.0
        };
        writeln!(
            out,
            "model: period={} ns ({fps:.2} Hz) phase={} ns skip={}",
            model.period.nanos(),
            model.phase.nanos(),
            model.refresh_skip_count,
        )?;
        writeln!(
            out,
            "error: {} ns² (rms {:.1} ns) threshold={}",
            self.tracker.error(),
            libm::sqrt(self.tracker.error() as f64),
            self.config.error_threshold,
        )?;
        writeln!(
            out,
            "resync samples: {} / {} (since present: {} / {})",
            self.resync.len(),
            self.resync.capacity(),
            self.samples_since_present,
            self.config.max_resync_samples_without_present,
        )?;
        let mut prev: Option<HostTime> = None;
        for (i, sample) in self.resync.iter().enumerate() {
            write!(out, "  [{i}] {}", sample.nanos())?;
            if let Some(p) = prev {
                write!(out, " (+{})", (sample - p).nanos())?;
            }
            writeln!(out)?;
            prev = Some(sample);
        }
        writeln!(out, "present samples:")?;
        let mut prev: Option<HostTime> = None;
        for (i, slot) in self.tracker.samples().states().enumerate() {
            match slot {
                SlotState::Empty => writeln!(out, "  [{i}] empty")?,
                SlotState::Pending => writeln!(out, "  [{i}] pending")?,
                SlotState::Resolved(t) => {
                    let age = now - t;
                    match prev {
                        Some(p) => writeln!(
                            out,
                            "  [{i}] {} (+{}) age {} ns",
                            t.nanos(),
                            (t - p).nanos(),
                            age.nanos(),
                        )?,
                        None => writeln!(out, "  [{i}] {} age {} ns", t.nanos(), age.nanos())?,
                    }
                    prev = Some(t);
                }
            }
        }
        Ok(())
    }

    fn refit(&mut self, now: HostTime) -> Option<ModelUpdate> {
        let fit = fit(
            &self.resync,
            self.config.fit_threshold(),
            self.model.refresh_skip_count,
        )?;
        self.model.period = fit.period;
        self.model.phase = fit.phase;
        Some(self.publish(now))
    }

    fn update_error(&mut self, now: HostTime) {
        let error = self.tracker.update_error(&self.model);
        self.tracer.error_update(&ErrorUpdateEvent {
            timestamp: now,
            error,
            need_resync: self.tracker.needs_resync(&self.model),
        });
    }

    fn publish(&mut self, now: HostTime) -> ModelUpdate {
        self.generation += 1;
        self.tracer.model_update(&ModelUpdateEvent {
            timestamp: now,
            period: self.model.period,
            phase: self.model.phase,
            refresh_skip_count: self.model.refresh_skip_count,
            generation: self.generation,
        });
        ModelUpdate {
            period: self.model.period,
            phase: self.model.phase,
            generation: self.generation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fence::SoftwareFence;
    use alloc::string::String;

    const P: i64 = 16_666_667;

    fn state() -> SyncState {
        SyncState::new(DispSyncConfig::new(), Tracer::none())
    }

    fn feed(state: &mut SyncState, from: i64, count: i64, phase: i64) -> SampleOutcome {
        let mut last = None;
        for k in from..from + count {
            last = Some(state.add_resync_sample(HostTime(k * P + phase)));
        }
        last.unwrap()
    }

    fn present(state: &mut SyncState, at: i64, now: i64) -> bool {
        state.add_present_fence(Arc::new(HostTime(at)), HostTime(now))
    }

    #[test]
    fn model_converges_after_min_samples() {
        let mut s = state();
        for k in 0..5 {
            let out = s.add_resync_sample(HostTime(k * P));
            assert!(out.need_resync);
            assert_eq!(out.update, None);
        }
        let out = s.add_resync_sample(HostTime(5 * P));
        let update = out.update.unwrap();
        assert_eq!(update.period, Duration(P));
        assert_eq!(update.generation, 1);
        assert_eq!(s.model().period, Duration(P));
    }

    #[test]
    fn resync_is_requested_until_a_present_arrives() {
        let mut s = state();
        // Six samples exceed the limit of four without a present fence.
        let out = feed(&mut s, 0, 6, 0);
        assert!(out.need_resync);
        assert!(out.error_reset);
        assert!(out.update.is_some());

        assert!(!present(&mut s, 7 * P, 7 * P));
        let out = s.add_resync_sample(HostTime(6 * P));
        assert!(!out.need_resync);
        assert!(!out.error_reset);
    }

    #[test]
    fn forced_reset_clears_present_state() {
        let mut s = state();
        feed(&mut s, 0, 6, 0);
        // Half a period off: high error.
        assert!(present(&mut s, 5 * P + P / 2, 6 * P));
        assert!(s.error() > s.config().error_threshold);

        for k in 6..10 {
            let out = s.add_resync_sample(HostTime(k * P));
            assert!(!out.error_reset, "sample {k}");
            assert!(out.need_resync);
        }
        let out = s.add_resync_sample(HostTime(10 * P));
        assert!(out.error_reset);
        assert!(out.need_resync);
        assert_eq!(s.error(), 0);

        // The off-grid present is gone; an on-grid one settles the model.
        assert!(!present(&mut s, 11 * P, 11 * P));
        assert!(!s.add_resync_sample(HostTime(11 * P)).need_resync);
    }

    #[test]
    fn hundred_and_one_samples_keep_requesting_resync() {
        let config = DispSyncConfig::new().with_max_resync_samples_without_present(100);
        let mut s = SyncState::new(config, Tracer::none());
        for k in 0..100 {
            let out = s.add_resync_sample(HostTime(k * P));
            assert!(!out.error_reset, "sample {k}");
        }
        let out = s.add_resync_sample(HostTime(100 * P));
        assert!(out.error_reset);
        assert!(out.need_resync);
        assert_eq!(s.error(), 0);

        // One on-phase present after the reset settles the model.
        assert!(!present(&mut s, 101 * P, 101 * P));
        let out = s.add_resync_sample(HostTime(101 * P));
        assert!(!out.need_resync);
        assert!(!out.error_reset);
    }

    #[test]
    fn reset_is_idempotent() {
        let mut s = state();
        feed(&mut s, 0, 8, 1_000);
        s.set_refresh_skip_count(1, HostTime(9 * P));
        let first = s.reset(HostTime(10 * P));
        let model = s.model();
        let second = s.reset(HostTime(10 * P));
        assert_eq!(s.model(), model);
        assert_eq!(model.period, Duration::ZERO);
        assert_eq!(model.refresh_skip_count, 1);
        assert_eq!(first.period, second.period);
        assert!(second.generation > first.generation);
        assert!(s.resync_samples().is_empty());
        assert_eq!(s.error(), 0);
    }

    #[test]
    fn reset_then_same_samples_match_a_fresh_state() {
        let mut fresh = state();
        let fresh_out = feed(&mut fresh, 100, 10, 3_000);
        let fresh_present = present(&mut fresh, 110 * P + 3_000, 110 * P);

        let mut reused = state();
        feed(&mut reused, 0, 12, 7_000);
        present(&mut reused, 12 * P + P / 2, 12 * P);
        reused.reset(HostTime(50 * P));
        let reused_out = feed(&mut reused, 100, 10, 3_000);
        let reused_present = present(&mut reused, 110 * P + 3_000, 110 * P);

        assert_eq!(reused.model(), fresh.model());
        assert_eq!(reused.error(), fresh.error());
        let since_present = fresh.samples_since_present();
        assert_eq!(reused.samples_since_present(), since_present);
        assert_eq!(reused_out.need_resync, fresh_out.need_resync);
        assert_eq!(reused_out.error_reset, fresh_out.error_reset);
        assert_eq!(reused_present, fresh_present);
        assert!(reused.model().is_set());
    }

    #[test]
    fn begin_resync_clears_samples_but_keeps_model() {
        let mut s = state();
        feed(&mut s, 0, 8, 0);
        s.begin_resync();
        s.begin_resync();
        assert!(s.resync_samples().is_empty());
        assert_eq!(s.model().period, Duration(P));
    }

    #[test]
    fn skip_count_refits_with_samples() {
        let mut s = state();
        feed(&mut s, 0, 8, 0);
        let update = s.set_refresh_skip_count(1, HostTime(9 * P)).unwrap();
        assert_eq!(update.period, Duration(2 * P));
        assert_eq!(s.model().hardware_period(), Duration(P));
    }

    #[test]
    fn skip_count_rescales_without_samples() {
        let mut s = state();
        feed(&mut s, 0, 8, 0);
        s.begin_resync();
        let update = s.set_refresh_skip_count(2, HostTime(9 * P)).unwrap();
        assert_eq!(update.period, Duration(3 * P));
        let update = s.set_refresh_skip_count(0, HostTime(9 * P)).unwrap();
        assert_eq!(update.period, Duration(P));
        assert_eq!(s.set_refresh_skip_count(0, HostTime(9 * P)), None);
    }

    #[test]
    fn set_period_zeroes_phase() {
        let mut s = state();
        feed(&mut s, 0, 8, 3_000);
        let update = s.set_period(Duration(8_333_333), HostTime(9 * P));
        assert_eq!(update.period, Duration(8_333_333));
        assert_eq!(update.phase, Duration::ZERO);
        assert_eq!(
            s.compute_next_refresh(HostTime(8_333_333 * 10 + 5), 0),
            Some(HostTime(8_333_333 * 11))
        );
    }

    #[test]
    fn generations_increase() {
        let mut s = state();
        let a = s.set_period(Duration(P), HostTime(0));
        let b = s.set_period(Duration(P), HostTime(0));
        let c = s.reset(HostTime(0));
        assert!(a.generation < b.generation && b.generation < c.generation);
    }

    #[test]
    fn pending_fence_counts_once_signaled() {
        let mut s = state();
        feed(&mut s, 0, 6, 0);
        let fence = Arc::new(SoftwareFence::new());
        assert!(!s.add_present_fence(fence.clone(), HostTime(7 * P)));
        fence.signal(HostTime(8 * P + P / 2));
        assert!(present(&mut s, 9 * P, 9 * P));
    }

    #[test]
    fn dump_reports_model_and_samples() {
        let mut s = state();
        feed(&mut s, 0, 6, 0);
        present(&mut s, 6 * P, 6 * P + 10);
        let mut out = String::new();
        s.dump(&mut out, HostTime(6 * P + 10)).unwrap();
        assert!(out.contains("period=16666667 ns (60.00 Hz)"), "{out}");
        assert!(out.contains(&alloc::format!("(+{P})")));
        assert!(out.contains("age 10 ns"));
        assert!(out.contains("empty"));
    }
}
