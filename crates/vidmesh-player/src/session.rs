//! One playback attempt: one video id bound to one sink + scheduler +
//! consumer.  Sessions are replaced, never reused — starting a new one
//! retires the old generation wholesale, so in-flight chunks from a dead
//! session can never reach a live sink.

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info};
use vidmesh_proto::catalog::VideoId;

use crate::consumer::ChunkStreamConsumer;
use crate::engine::EngineEvent;
use crate::gateway::{Gateway, StartError, StreamError};
use crate::scheduler::{AppendFailure, AppendScheduler, RetentionPolicy};
use crate::sink::{MediaSink, SinkError};

/// The request to begin chunk production failed; no session was created.
#[derive(Debug, Clone, Error)]
pub enum StreamStartFailure {
    #[error(transparent)]
    Request(#[from] StartError),
    #[error("chunk channel failed to open: {0}")]
    Channel(#[from] StreamError),
}

pub struct StreamSession {
    video_id: VideoId,
    generation: u64,
    scheduler: AppendScheduler,
    consumer: Option<ChunkStreamConsumer>,
    /// Channel closed; remaining queued chunks are draining into the sink.
    draining: bool,
    /// End of stream signalled on the sink; nothing more to do.
    ended: bool,
}

impl StreamSession {
    /// Issue the start-stream request and, on success, assemble the fresh
    /// sink + scheduler + consumer.  The sink is only created once the
    /// server has accepted the request.
    pub async fn start(
        gateway: &dyn Gateway,
        video_id: VideoId,
        generation: u64,
        make_sink: impl FnOnce() -> Box<dyn MediaSink>,
        policy: RetentionPolicy,
        events: mpsc::Sender<EngineEvent>,
    ) -> Result<Self, StreamStartFailure> {
        gateway.start_stream(video_id).await?;
        let stream = gateway.open_chunk_stream().await?;

        let scheduler = AppendScheduler::new(make_sink(), policy);
        let consumer = ChunkStreamConsumer::spawn(stream, generation, events);
        info!(video_id, generation, "stream session started");

        Ok(Self {
            video_id,
            generation,
            scheduler,
            consumer: Some(consumer),
            draining: false,
            ended: false,
        })
    }

    pub fn video_id(&self) -> VideoId {
        self.video_id
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_ended(&self) -> bool {
        self.ended
    }

    /// Route one decoded chunk into the scheduler.
    pub fn handle_chunk(&mut self, data: bytes::Bytes) -> Result<(), AppendFailure> {
        self.scheduler.enqueue(data)
    }

    /// Route a sink completion into the scheduler; finishes the stream once
    /// a closed channel has fully drained.
    pub fn handle_append_complete(
        &mut self,
        result: Result<(), SinkError>,
    ) -> Result<(), AppendFailure> {
        self.scheduler.on_append_complete(result)?;
        self.maybe_finish();
        Ok(())
    }

    /// The push channel closed: end of the logical stream.  Queued chunks
    /// still drain; end-of-stream is signalled once they have.
    pub fn mark_stream_closed(&mut self) {
        self.draining = true;
        self.consumer = None;
        self.maybe_finish();
    }

    /// Tear the session down.  `flush` signals end-of-stream on a sink that
    /// should play out its buffer (stop); without it the sink is simply
    /// released (replacement by a new session, or a broken sink).
    pub fn shutdown(mut self, flush: bool) {
        if let Some(consumer) = self.consumer.take() {
            consumer.close();
        }
        if flush && !self.ended {
            self.scheduler.end_of_stream();
        }
        debug!(video_id = self.video_id, generation = self.generation, "session torn down");
    }

    fn maybe_finish(&mut self) {
        if self.draining && !self.ended && self.scheduler.is_drained() {
            self.scheduler.end_of_stream();
            self.ended = true;
            info!(video_id = self.video_id, "stream complete");
        }
    }
}
