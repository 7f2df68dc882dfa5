//! Per-run assistant output buffers.
//!
//! At most one buffer exists per run. Text is appended in arrival order and
//! never reordered; [`OutputAccumulator::append_delta`] additionally fences
//! out the second of two parallel delta streams and drops replays.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;

use taskdeck_core::{DeltaSource, RunId};

/// Result of offering a delta to the accumulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// Text was appended; `length` is the buffer length afterwards.
    Appended { length: usize },
    /// The buffer is fed by the other stream.
    Fenced { owner: DeltaSource },
    /// Sequence number already applied.
    Replay { last_seq: u64 },
}

#[derive(Debug, Default)]
struct OutputBuffer {
    text: String,
    source: Option<DeltaSource>,
    last_seq: u64,
    last_persisted: Option<Instant>,
}

/// Accumulates assistant text per in-flight run.
#[derive(Debug, Default)]
pub struct OutputAccumulator {
    buffers: RwLock<HashMap<RunId, OutputBuffer>>,
}

impl OutputAccumulator {
    /// Create an empty accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append text unconditionally and return the buffer contents.
    pub async fn append(&self, run_id: &RunId, text: &str) -> String {
        let mut buffers = self.buffers.write().await;
        let buffer = buffers.entry(run_id.clone()).or_default();
        buffer.text.push_str(text);
        buffer.text.clone()
    }

    /// Append a sequenced delta from one of the two assistant streams.
    ///
    /// The first stream to feed a run owns its buffer. A `seq` of 0 means
    /// the gateway did not number the frame and is never treated as a replay.
    pub async fn append_delta(
        &self,
        run_id: &RunId,
        source: DeltaSource,
        seq: u64,
        text: &str,
    ) -> AppendOutcome {
        let mut buffers = self.buffers.write().await;
        let buffer = buffers.entry(run_id.clone()).or_default();

        let owner = *buffer.source.get_or_insert(source);
        if owner != source {
            debug!(run_id = %run_id, ?owner, ?source, seq, "Fenced delta from parallel stream");
            return AppendOutcome::Fenced { owner };
        }

        if seq > 0 {
            if seq <= buffer.last_seq {
                debug!(run_id = %run_id, seq, last_seq = buffer.last_seq, "Dropped replayed delta");
                return AppendOutcome::Replay {
                    last_seq: buffer.last_seq,
                };
            }
            buffer.last_seq = seq;
        }

        buffer.text.push_str(text);
        AppendOutcome::Appended {
            length: buffer.text.len(),
        }
    }

    /// Remove the run's buffer and return its text. Empty for unknown runs.
    pub async fn flush_and_clear(&self, run_id: &RunId) -> String {
        self.buffers
            .write()
            .await
            .remove(run_id)
            .map(|b| b.text)
            .unwrap_or_default()
    }

    /// Current text for a run. Empty for unknown runs.
    pub async fn peek(&self, run_id: &RunId) -> String {
        self.buffers
            .read()
            .await
            .get(run_id)
            .map(|b| b.text.clone())
            .unwrap_or_default()
    }

    /// Returns true if a buffer exists for the run.
    pub async fn contains(&self, run_id: &RunId) -> bool {
        self.buffers.read().await.contains_key(run_id)
    }

    /// Snapshot the buffer if it has not been persisted within `interval`.
    ///
    /// Marks the buffer persisted when a snapshot is returned.
    pub async fn snapshot_if_due(&self, run_id: &RunId, interval: Duration) -> Option<String> {
        let mut buffers = self.buffers.write().await;
        let buffer = buffers.get_mut(run_id)?;
        let now = Instant::now();
        let due = buffer
            .last_persisted
            .map_or(true, |at| now.duration_since(at) >= interval);
        if !due {
            return None;
        }
        buffer.last_persisted = Some(now);
        Some(buffer.text.clone())
    }

    /// Number of live buffers.
    pub async fn len(&self) -> usize {
        self.buffers.read().await.len()
    }

    /// Returns true if no run is buffering.
    pub async fn is_empty(&self) -> bool {
        self.buffers.read().await.is_empty()
    }
}
