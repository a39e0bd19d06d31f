//! Append scheduling for the playback sink.
//!
//! The sink is single-writer: exactly one append may be in flight at any
//! instant, decided in strict arrival order.  What the original event
//! handlers did with an ad hoc `updating` flag and promise races is an
//! explicit two-state machine here (idle / appending), driven by an explicit
//! completion event, so the ordering invariant is checkable.

use std::collections::VecDeque;

use bytes::Bytes;
use thiserror::Error;
use tracing::{debug, warn};

use crate::sink::{MediaSink, SinkError};

/// Eviction policy for the buffered span.
///
/// Once more than `retention_secs` of media is buffered ahead of the
/// playhead, everything older than `position - trim_margin_secs` is
/// discarded.  The margin keeps a small rewind cushion; nothing at or ahead
/// of the playhead is ever discarded.
#[derive(Debug, Clone, Copy)]
pub struct RetentionPolicy {
    pub retention_secs: f64,
    pub trim_margin_secs: f64,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            retention_secs: 30.0,
            trim_margin_secs: 10.0,
        }
    }
}

/// The sink rejected an append.  The whole pending queue is unsalvageable
/// once order is broken, so the scheduler discards it and refuses further
/// work; only a fresh session replaces it.
#[derive(Debug, Clone, Error)]
#[error("sink append failed after {appended} appends ({dropped} chunks dropped): {source}")]
pub struct AppendFailure {
    pub appended: u64,
    pub dropped: usize,
    #[source]
    pub source: SinkError,
}

/// Serializes appends into one sink, in FIFO order, one at a time.
pub struct AppendScheduler {
    sink: Box<dyn MediaSink>,
    pending: VecDeque<Bytes>,
    appending: bool,
    failed: bool,
    policy: RetentionPolicy,
    appended: u64,
}

impl AppendScheduler {
    pub fn new(sink: Box<dyn MediaSink>, policy: RetentionPolicy) -> Self {
        Self {
            sink,
            pending: VecDeque::new(),
            appending: false,
            failed: false,
            policy,
            appended: 0,
        }
    }

    /// Number of chunks waiting to be appended.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Whether an append is currently in flight.
    pub fn is_appending(&self) -> bool {
        self.appending
    }

    /// Queue a decoded chunk.  If the sink is idle and ready, the head of
    /// the queue is promoted immediately.
    pub fn enqueue(&mut self, chunk: Bytes) -> Result<(), AppendFailure> {
        if self.failed {
            // A failed scheduler never accepts more data; the session is
            // already torn down or about to be.
            debug!("chunk dropped: scheduler already failed");
            return Ok(());
        }
        self.pending.push_back(chunk);
        self.pump()
    }

    /// Handle the sink's completion notification for the in-flight append.
    pub fn on_append_complete(&mut self, result: Result<(), SinkError>) -> Result<(), AppendFailure> {
        if self.failed {
            return Ok(());
        }
        if !self.appending {
            warn!("append completion with no append in flight");
            return Ok(());
        }
        self.appending = false;

        match result {
            Ok(()) => {
                self.appended += 1;
                self.evict();
                self.pump()
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Flag end of stream on the sink.  Pending data that has not been
    /// promoted yet still drains first via completion events.
    pub fn end_of_stream(&mut self) {
        if !self.failed {
            self.sink.end_of_stream();
        }
    }

    /// True once all enqueued data has been handed to the sink.
    pub fn is_drained(&self) -> bool {
        self.pending.is_empty() && !self.appending
    }

    /// Promote queued chunks while the sink is idle and ready.
    fn pump(&mut self) -> Result<(), AppendFailure> {
        while !self.appending && self.sink.is_ready() {
            let Some(chunk) = self.pending.pop_front() else {
                break;
            };
            match self.sink.begin_append(chunk) {
                Ok(()) => self.appending = true,
                Err(e) => return Err(self.fail(e)),
            }
        }
        Ok(())
    }

    /// Discard stale buffered data once the span exceeds the retention
    /// window.  Runs after every completed append.
    fn evict(&mut self) {
        let Some(span) = self.sink.buffered() else {
            return;
        };
        let position = self.sink.position();
        if span.end - position <= self.policy.retention_secs {
            return;
        }
        // Never discard at or ahead of the playhead, and never let the
        // bound go negative (a playhead near zero must not underflow).
        let upper = (position - self.policy.trim_margin_secs)
            .min(position)
            .max(0.0);
        if upper > span.start {
            debug!(from = span.start, to = upper, "evicting buffered media");
            self.sink.discard(span.start, upper);
        }
    }

    fn fail(&mut self, source: SinkError) -> AppendFailure {
        let dropped = self.pending.len();
        self.pending.clear();
        self.appending = false;
        self.failed = true;
        warn!("append failed, {dropped} pending chunks discarded: {source}");
        AppendFailure {
            appended: self.appended,
            dropped,
            source,
        }
    }
}
