//! Playback sink abstraction.
//!
//! The sink is the single-writer playback destination: it accepts appended
//! byte ranges and exposes a buffered time span.  Appends are started with a
//! non-blocking call and finish later with an `AppendComplete` engine event,
//! so the scheduler never has two writes outstanding.

use std::process::Stdio;
use std::time::Instant;

use bytes::Bytes;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::engine::EngineEvent;

/// The sink's contiguous buffered time range, in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BufferedSpan {
    pub start: f64,
    pub end: f64,
}

/// The sink rejected data or is no longer writable.  Session-fatal: the
/// pending queue cannot be reconciled once an append is lost.
#[derive(Debug, Clone, Error)]
pub enum SinkError {
    #[error("sink closed")]
    Closed,
    #[error("sink rejected append: {0}")]
    Rejected(String),
}

/// Single-writer playback destination.
///
/// `begin_append` must not block; completion (success or failure) is
/// delivered later as [`EngineEvent::AppendComplete`] carrying the session
/// generation the sink was created for.
pub trait MediaSink: Send {
    /// Whether the sink can accept a new append right now.
    fn is_ready(&self) -> bool;

    /// Start appending `data`.  An `Err` is an immediate rejection; `Ok`
    /// means a completion event will follow.
    fn begin_append(&mut self, data: Bytes) -> Result<(), SinkError>;

    /// Current contiguous buffered range, if any data has been appended.
    fn buffered(&self) -> Option<BufferedSpan>;

    /// Current playback position in seconds.
    fn position(&self) -> f64;

    /// Discard buffered data in `[from, to)`.  Called only behind the
    /// playhead; the range is already clamped by the scheduler.
    fn discard(&mut self, from: f64, to: f64);

    /// Signal that no further data will arrive.
    fn end_of_stream(&mut self);
}

/// Builds one sink per stream session.  The engine passes the event sender
/// and the session generation so completions can be routed back.
pub type SinkFactory =
    Box<dyn FnMut(mpsc::Sender<EngineEvent>, u64) -> Box<dyn MediaSink> + Send>;

// ── NullSink ──────────────────────────────────────────────────────────────────

/// Sink that acknowledges and discards everything.  Fallback for hosts
/// without a media player, and a convenient stand-in for tests that only
/// care about engine behavior.
pub struct NullSink {
    events: mpsc::Sender<EngineEvent>,
    generation: u64,
    open: bool,
}

impl NullSink {
    pub fn new(events: mpsc::Sender<EngineEvent>, generation: u64) -> Self {
        Self {
            events,
            generation,
            open: true,
        }
    }
}

impl MediaSink for NullSink {
    fn is_ready(&self) -> bool {
        self.open
    }

    fn begin_append(&mut self, _data: Bytes) -> Result<(), SinkError> {
        if !self.open {
            return Err(SinkError::Closed);
        }
        let events = self.events.clone();
        let generation = self.generation;
        tokio::spawn(async move {
            let _ = events
                .send(EngineEvent::AppendComplete {
                    generation,
                    result: Ok(()),
                })
                .await;
        });
        Ok(())
    }

    fn buffered(&self) -> Option<BufferedSpan> {
        None
    }

    fn position(&self) -> f64 {
        0.0
    }

    fn discard(&mut self, _from: f64, _to: f64) {}

    fn end_of_stream(&mut self) {
        self.open = false;
    }
}

// ── PipePlayerSink ────────────────────────────────────────────────────────────

/// Sink that pipes appended bytes into an external player's stdin.
///
/// Headless stand-in for a browser media source: span and position are
/// estimated from the configured nominal byte rate, which is good enough to
/// drive retention-window eviction.  Writes happen on a dedicated task so
/// `begin_append` never blocks; each flushed write produces one completion
/// event.
pub struct PipePlayerSink {
    writer_tx: Option<mpsc::Sender<Bytes>>,
    bytes_per_second: u64,
    appended_bytes: u64,
    span_start: f64,
    started_at: Option<Instant>,
}

impl PipePlayerSink {
    /// Spawn `command` (e.g. `["mpv", "-"]`) and wire its stdin as the sink.
    pub fn spawn(
        command: &[String],
        bytes_per_second: u64,
        events: mpsc::Sender<EngineEvent>,
        generation: u64,
    ) -> anyhow::Result<Self> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| anyhow::anyhow!("empty player command"))?;

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow::anyhow!("player stdin unavailable"))?;

        let (writer_tx, mut writer_rx) = mpsc::channel::<Bytes>(4);
        tokio::spawn(async move {
            while let Some(data) = writer_rx.recv().await {
                let result = async {
                    stdin.write_all(&data).await?;
                    stdin.flush().await?;
                    Ok::<_, std::io::Error>(())
                }
                .await
                .map_err(|e| SinkError::Rejected(e.to_string()));

                if let Err(ref e) = result {
                    warn!("player pipe write failed: {e}");
                }
                let fatal = result.is_err();
                if events
                    .send(EngineEvent::AppendComplete { generation, result })
                    .await
                    .is_err()
                    || fatal
                {
                    break;
                }
            }
            debug!("player pipe writer exiting");
            // EOF on stdin lets the player drain and exit on its own
            drop(stdin);
            let _ = child.wait().await;
        });

        Ok(Self {
            writer_tx: Some(writer_tx),
            bytes_per_second: bytes_per_second.max(1),
            appended_bytes: 0,
            span_start: 0.0,
            started_at: None,
        })
    }
}

impl MediaSink for PipePlayerSink {
    fn is_ready(&self) -> bool {
        self.writer_tx.is_some()
    }

    fn begin_append(&mut self, data: Bytes) -> Result<(), SinkError> {
        let tx = self.writer_tx.as_ref().ok_or(SinkError::Closed)?;
        let len = data.len() as u64;
        // Capacity cannot be exhausted: the scheduler keeps one append in
        // flight, so a full queue means the writer task is gone.
        tx.try_send(data).map_err(|_| SinkError::Closed)?;
        self.appended_bytes += len;
        self.started_at.get_or_insert_with(Instant::now);
        Ok(())
    }

    fn buffered(&self) -> Option<BufferedSpan> {
        if self.appended_bytes == 0 {
            return None;
        }
        Some(BufferedSpan {
            start: self.span_start,
            end: self.appended_bytes as f64 / self.bytes_per_second as f64,
        })
    }

    fn position(&self) -> f64 {
        self.started_at
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }

    fn discard(&mut self, _from: f64, to: f64) {
        // The pipe cannot reclaim bytes already written; track the trim so
        // the reported span stays bounded.
        self.span_start = self.span_start.max(to);
    }

    fn end_of_stream(&mut self) {
        // Dropping the sender closes the pipe; the player sees EOF.
        self.writer_tx = None;
    }
}
