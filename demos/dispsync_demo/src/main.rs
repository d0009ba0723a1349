// Copyright 2026 the Dispsync Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Simulated display driving a live software vsync dispatcher.
//!
//! A "hardware" thread produces 60 Hz pulses with deterministic jitter. It
//! feeds pulse timestamps to [`DispSync`] while resync is requested, and
//! signals one present fence per pulse. Two listeners print how far their
//! events land from the true pulse.
//!
//! Midway through, the demo switches to half rate, back, and moves one
//! listener to a new phase offset.
//!
//! Run with: `cargo run -p dispsync_demo -- [trace.json]`
//!
//! With a path argument, the recorded trace is written there as Chrome Trace
//! Event JSON. Set `RUST_LOG=debug` to see model changes.

use std::fs::File;
use std::io::BufWriter;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use dispsync::{DispSync, DispSyncConfig, Duration, HostTime, SoftwareFence, VsyncListener, clock};
use dispsync_core::trace::Tracer;
use dispsync_debug::chrome;
use dispsync_debug::recorder::RecorderSink;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const PERIOD: Duration = Duration::from_nanos(16_666_667);
const PULSES: i64 = 180;
/// Hardware pulse at which refresh skipping starts.
const HALF_RATE_AT: i64 = 60;
const FULL_RATE_AT: i64 = 90;
const MOVE_OFFSET_AT: i64 = 120;
const MOVED_APP_OFFSET: Duration = Duration::from_millis(-4);

/// Listener that reports its lateness relative to the nearest true pulse.
struct Compositor {
    origin: HostTime,
    events: AtomicU64,
}

impl VsyncListener for Compositor {
    fn on_event(&self, event_time: HostTime) {
        let n = self.events.fetch_add(1, Ordering::Relaxed);
        let into_period = (event_time - self.origin).rem_euclid(PERIOD);
        let late = clock::now() - event_time;
        if n % 15 == 0 {
            info!(
                event = n,
                phase_us = into_period.nanos() / 1_000,
                late_us = late.nanos() / 1_000,
                "compositor vsync"
            );
        }
    }

    fn name(&self) -> &str {
        "compositor"
    }
}

/// Deterministic ±100 µs jitter for pulse `k`.
fn jitter(k: i64) -> Duration {
    Duration::from_micros((k * 7_919).rem_euclid(201) - 100)
}

fn sleep_until(t: HostTime) {
    thread::sleep((t - clock::now()).to_unsigned());
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let trace_path = std::env::args().nth(1);
    let recorder = Arc::new(RecorderSink::new());
    let config = DispSyncConfig::new().with_zero_phase_tracer(true);
    let tracer = Tracer::new(recorder.clone());
    let sync = Arc::new(DispSync::with_tracer(config, tracer)?);

    // Pulses start one period from now.
    let origin = clock::now() + PERIOD;

    let compositor = Arc::new(Compositor {
        origin,
        events: AtomicU64::new(0),
    });
    sync.add_event_listener(Duration::from_millis(1), compositor.clone())?;

    let app_events = Arc::new(AtomicU64::new(0));
    let app: Arc<dyn VsyncListener> = {
        let app_events = app_events.clone();
        Arc::new(move |_: HostTime| {
            app_events.fetch_add(1, Ordering::Relaxed);
        })
    };
    sync.add_event_listener(Duration::from_millis(-2), app.clone())?;

    let hardware = {
        let sync = sync.clone();
        let app = app.clone();
        thread::Builder::new()
            .name("hw-vsync".into())
            .spawn(move || {
                let mut resync = true;
                let mut pending: Option<Arc<SoftwareFence>> = None;
                sync.begin_resync();
                for k in 0..PULSES {
                    let pulse = origin + PERIOD * k + jitter(k);
                    sleep_until(pulse);

                    if let Some(fence) = pending.take() {
                        fence.signal(pulse);
                    }
                    if resync {
                        resync = sync.add_resync_sample(pulse);
                        if !resync {
                            sync.end_resync();
                            info!(pulse = k, "model locked; hardware vsync off");
                        }
                    }

                    // One frame in flight, presented on the next pulse.
                    let fence = Arc::new(SoftwareFence::new());
                    if sync.add_present_fence(fence.clone()) && !resync {
                        resync = true;
                        info!(pulse = k, "drift detected; hardware vsync on");
                        sync.begin_resync();
                    }
                    pending = Some(fence);

                    match k {
                        HALF_RATE_AT => sync.set_refresh_skip_count(1),
                        FULL_RATE_AT => sync.set_refresh_skip_count(0),
                        MOVE_OFFSET_AT => {
                            if let Err(e) = sync.change_phase_offset(&app, MOVED_APP_OFFSET) {
                                warn!(%e, "could not move app listener");
                            }
                        }
                        _ => {}
                    }
                }
            })?
    };

    if hardware.join().is_err() {
        warn!("hardware thread panicked");
    }

    let mut dump = String::new();
    sync.dump(&mut dump)?;
    println!("{dump}");
    println!(
        "compositor events: {}, app events: {}",
        compositor.events.load(Ordering::Relaxed),
        app_events.load(Ordering::Relaxed)
    );

    sync.remove_event_listener(&app)?;
    sync.shutdown();

    if let Some(path) = trace_path {
        let mut out = BufWriter::new(File::create(&path)?);
        chrome::export(&recorder.bytes(), &mut out)?;
        info!(%path, "trace written");
    }
    Ok(())
}
