//! Chunk push-channel consumer.
//!
//! One consumer per stream session.  It owns the channel lifecycle: reads
//! the raw SSE byte stream, decodes each chunk payload, and forwards the
//! result into the engine loop in delivery order.  It never touches the
//! scheduler directly — events carry the session generation, and the engine
//! drops anything from a retired generation before it can reach a live sink.

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use vidmesh_proto::chunk::decode_chunk;
use vidmesh_proto::sse::SseDecoder;

use crate::engine::EngineEvent;
use crate::gateway::ByteStream;

/// Handle to the running consumer task for one session.
pub struct ChunkStreamConsumer {
    generation: u64,
    task: JoinHandle<()>,
}

impl ChunkStreamConsumer {
    /// Spawn the consumer over an open chunk stream.
    ///
    /// Per-chunk decode failures are logged and dropped; the stream
    /// continues.  Stream closure and stream errors end the task after
    /// notifying the engine.
    pub fn spawn(
        mut stream: ByteStream,
        generation: u64,
        events: mpsc::Sender<EngineEvent>,
    ) -> Self {
        let task = tokio::spawn(async move {
            let mut decoder = SseDecoder::new();

            while let Some(read) = stream.next().await {
                let bytes = match read {
                    Ok(b) => b,
                    Err(e) => {
                        warn!(generation, "chunk stream error: {e}");
                        let _ = events
                            .send(EngineEvent::StreamInterrupted {
                                generation,
                                error: e,
                            })
                            .await;
                        return;
                    }
                };

                for payload in decoder.feed(&bytes) {
                    match decode_chunk(&payload) {
                        Ok(data) => {
                            if events
                                .send(EngineEvent::Chunk { generation, data })
                                .await
                                .is_err()
                            {
                                return;
                            }
                        }
                        Err(e) => {
                            // Local, non-fatal: this chunk only
                            warn!(generation, "dropping malformed chunk: {e}");
                        }
                    }
                }
            }

            // End of the logical stream is the channel closing, not a
            // sentinel message
            debug!(generation, "chunk stream closed");
            if let Some(payload) = decoder.finish() {
                if let Ok(data) = decode_chunk(&payload) {
                    let _ = events.send(EngineEvent::Chunk { generation, data }).await;
                }
            }
            let _ = events
                .send(EngineEvent::ChunkStreamClosed { generation })
                .await;
        });

        Self { generation, task }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Cancel the pending wait deterministically.  Anything the channel
    /// delivers afterwards is unobservable.
    pub fn close(self) {
        self.task.abort();
    }
}
