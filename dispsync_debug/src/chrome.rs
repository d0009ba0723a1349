// Copyright 2026 the Dispsync Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Chrome Trace Event Format exporter.
//!
//! [`export`] reads recorded bytes from a [`RecorderSink`](super::recorder::RecorderSink)
//! and writes [Chrome Trace Event Format][spec] JSON to the given writer.
//!
//! Model, error, latency and zero-phase values become counter tracks;
//! listener firings and error resets become instant events.
//!
//! [spec]: https://docs.google.com/document/d/1CvAClvFfyA5R-PhYUmn5OOQtYMH4h6I0nSsKchNAySU

use std::io::{self, Write};

use serde_json::{Value, json};

use crate::recorder::{RecordedEvent, decode};

const PID: u32 = 0;
const TID_MODEL: u32 = 0;
const TID_DISPATCH: u32 = 1;

/// Exports recorded events as Chrome Trace Event Format JSON.
///
/// The output is a complete JSON array of trace event objects, suitable for
/// loading into `chrome://tracing` or [Perfetto](https://ui.perfetto.dev/).
pub fn export(bytes: &[u8], writer: &mut dyn Write) -> io::Result<()> {
    let mut events: Vec<Value> = Vec::new();

    for recorded in decode(bytes) {
        match recorded {
            RecordedEvent::ModelUpdate(e) => {
                events.push(json!({
                    "ph": "C",
                    "name": "Model",
                    "cat": "Model",
                    "ts": nanos_to_us(e.timestamp.nanos()),
                    "pid": PID,
                    "tid": TID_MODEL,
                    "args": {
                        "period_us": nanos_to_us(e.period.nanos()),
                        "phase_us": nanos_to_us(e.phase.nanos()),
                    }
                }));
            }
            RecordedEvent::ErrorUpdate(e) => {
                events.push(json!({
                    "ph": "C",
                    "name": "Error",
                    "cat": "Model",
                    "ts": nanos_to_us(e.timestamp.nanos()),
                    "pid": PID,
                    "tid": TID_MODEL,
                    "args": {
                        "rms_us": (e.error as f64).sqrt() / 1000.0,
                        "need_resync": u8::from(e.need_resync),
                    }
                }));
            }
            RecordedEvent::ErrorReset(e) => {
                events.push(json!({
                    "ph": "i",
                    "name": "ErrorReset",
                    "cat": "Model",
                    "ts": nanos_to_us(e.timestamp.nanos()),
                    "pid": PID,
                    "tid": TID_MODEL,
                    "s": "p",
                    "args": {
                        "samples_without_present": e.samples_without_present,
                    }
                }));
            }
            RecordedEvent::Wakeup(e) => {
                events.push(json!({
                    "ph": "C",
                    "name": "WakeupLatency",
                    "cat": "Dispatch",
                    "ts": nanos_to_us(e.actual.nanos()),
                    "pid": PID,
                    "tid": TID_DISPATCH,
                    "args": {
                        "latency_us": nanos_to_us(e.latency.nanos()),
                    }
                }));
            }
            RecordedEvent::ListenerFire(e) => {
                events.push(json!({
                    "ph": "i",
                    "name": "Fire",
                    "cat": "Dispatch",
                    "ts": nanos_to_us(e.event_time.nanos()),
                    "pid": PID,
                    "tid": TID_DISPATCH,
                    "s": "t",
                    "args": {
                        "phase_offset_us": nanos_to_us(e.phase_offset.nanos()),
                        "late_us": nanos_to_us((e.fired_at - e.event_time).nanos()),
                    }
                }));
            }
            RecordedEvent::ZeroPhase(e) => {
                events.push(json!({
                    "ph": "C",
                    "name": "ZeroPhase",
                    "cat": "Dispatch",
                    "ts": nanos_to_us(e.event_time.nanos()),
                    "pid": PID,
                    "tid": TID_DISPATCH,
                    "args": {
                        "value": u8::from(e.parity),
                    }
                }));
            }
        }
    }

    serde_json::to_writer_pretty(writer, &events)?;
    Ok(())
}

fn nanos_to_us(nanos: i64) -> f64 {
    nanos as f64 / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recorder::RecorderSink;
    use dispsync_core::time::{Duration, HostTime};
    use dispsync_core::trace::{ListenerFireEvent, ModelUpdateEvent, TraceSink, ZeroPhaseEvent};

    #[test]
    fn export_produces_valid_json() {
        let rec = RecorderSink::new();
        rec.on_model_update(&ModelUpdateEvent {
            timestamp: HostTime(1_000_000),
            period: Duration(16_666_667),
            phase: Duration(2_000),
            refresh_skip_count: 0,
            generation: 1,
        });
        rec.on_listener_fire(&ListenerFireEvent {
            event_time: HostTime(17_668_667),
            fired_at: HostTime(17_718_667),
            phase_offset: Duration(1_000_000),
        });
        rec.on_zero_phase(&ZeroPhaseEvent {
            event_time: HostTime(16_668_667),
            parity: true,
        });

        let mut out = Vec::new();
        export(&rec.bytes(), &mut out).unwrap();
        let json_str = String::from_utf8(out).unwrap();

        let parsed: Vec<Value> = serde_json::from_str(&json_str).unwrap();
        assert_eq!(parsed.len(), 3);

        assert_eq!(parsed[0]["ph"], "C");
        assert_eq!(parsed[0]["name"], "Model");
        assert_eq!(parsed[0]["args"]["phase_us"], 2.0);

        assert_eq!(parsed[1]["ph"], "i");
        assert_eq!(parsed[1]["name"], "Fire");
        assert_eq!(parsed[1]["args"]["late_us"], 50.0);

        assert_eq!(parsed[2]["name"], "ZeroPhase");
        assert_eq!(parsed[2]["args"]["value"], 1);
    }

    #[test]
    fn export_empty_recording() {
        let mut out = Vec::new();
        export(&[], &mut out).unwrap();
        let json_str = String::from_utf8(out).unwrap();
        let parsed: Vec<Value> = serde_json::from_str(&json_str).unwrap();
        assert!(parsed.is_empty());
    }
}
