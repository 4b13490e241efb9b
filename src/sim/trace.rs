//! Chrome Trace-Event Output.
//!
//! Records per-transaction duration events in the Chrome `traceEvents`
//! JSON format, so a run can be inspected in `chrome://tracing` or Perfetto.
//! Each transaction contributes a begin event when its request enters the
//! fabric and an end event when the aggregated response is delivered.

use std::fs::File;
use std::io::{self, BufWriter};
use std::path::Path;

use serde::Serialize;

use crate::common::{Tick, TransactionId};

/// One trace record in the Chrome trace-event format.
#[derive(Serialize)]
struct TraceEvent {
    name: String,
    ph: &'static str,
    ts: Tick,
    pid: String,
    tid: String,
}

#[derive(Serialize)]
struct TraceFile<'a> {
    #[serde(rename = "traceEvents")]
    trace_events: &'a [TraceEvent],
}

/// In-memory collection of trace events for one simulation run.
///
/// When disabled, all recording calls are no-ops.
pub struct TraceBuffer {
    enabled: bool,
    events: Vec<TraceEvent>,
}

impl TraceBuffer {
    /// Creates a trace buffer; a disabled buffer records nothing.
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            events: Vec::new(),
        }
    }

    /// Records the start of a transaction's lifetime on the fabric.
    pub fn begin(&mut self, now: Tick, tid: TransactionId, name: &str) {
        if !self.enabled {
            return;
        }
        self.events.push(TraceEvent {
            name: name.to_string(),
            ph: "B",
            ts: now,
            pid: format!("Req-{}", tid.0),
            tid: tid.0.to_string(),
        });
    }

    /// Records the completion of a transaction.
    pub fn end(&mut self, now: Tick, tid: TransactionId, name: &str) {
        if !self.enabled {
            return;
        }
        self.events.push(TraceEvent {
            name: name.to_string(),
            ph: "E",
            ts: now,
            pid: format!("Req-{}", tid.0),
            tid: tid.0.to_string(),
        });
    }

    /// Returns the number of recorded events.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Returns `true` if no events have been recorded.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Serializes the recorded events to `path` as Chrome trace JSON.
    pub fn write_to(&self, path: &Path) -> io::Result<()> {
        let file = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(
            file,
            &TraceFile {
                trace_events: &self.events,
            },
        )?;
        Ok(())
    }
}
