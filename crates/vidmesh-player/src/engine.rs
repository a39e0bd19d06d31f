//! Engine — single-owner event loop for all mutable playback state.
//!
//! Every input funnels into this loop as an [`EngineEvent`]: UI commands,
//! connectivity tokens, catalog pushes, refresh completions, decoded chunks,
//! and sink append completions.  The loop owns the subscription machine, the
//! catalog merger, and the current stream session exclusively; no other task
//! touches them.  After each state change it broadcasts an [`EngineUpdate`]
//! to all listeners via a `tokio::sync::broadcast` channel.

use std::sync::Arc;

use bytes::Bytes;
use futures_util::StreamExt;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use vidmesh_proto::catalog::{CatalogSnapshot, ServerCatalogEntry, VideoId};
use vidmesh_proto::sse::SseDecoder;
use vidmesh_proto::subscription::SubscriptionState;

use crate::catalog::CatalogMerger;
use crate::gateway::{Gateway, RefreshError, StreamError};
use crate::scheduler::{AppendFailure, RetentionPolicy};
use crate::session::StreamSession;
use crate::sink::{SinkError, SinkFactory};
use crate::subscription::SubscriptionStateMachine;

// ── Events ────────────────────────────────────────────────────────────────────

/// Commands from the external UI layer.
#[derive(Debug, Clone)]
pub enum EngineCommand {
    Play(VideoId),
    Stop,
    Shutdown,
}

/// All inputs into the engine loop.
#[derive(Debug)]
pub enum EngineEvent {
    Command(EngineCommand),
    /// Plain-text state token from the connectivity channel.
    ConnectivityToken(String),
    /// Raw JSON `(server_id, videos)` pair from the catalog push channel.
    CatalogPush(String),
    /// Completion of a spawned catalog-refresh request.
    RefreshReady(Result<CatalogSnapshot, RefreshError>),
    /// One decoded chunk from the consumer of `generation`.
    Chunk { generation: u64, data: Bytes },
    /// The chunk channel of `generation` closed (end of logical stream).
    ChunkStreamClosed { generation: u64 },
    /// The chunk channel of `generation` failed mid-stream.
    StreamInterrupted { generation: u64, error: StreamError },
    /// The sink of `generation` finished (or failed) its in-flight append.
    AppendComplete {
        generation: u64,
        result: Result<(), SinkError>,
    },
}

/// Playback state of the current session, as shown to the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackStatus {
    #[default]
    Idle,
    /// Start-stream request issued, waiting for acceptance.
    Requesting,
    /// Chunks flowing into the sink.
    Streaming,
    /// Channel closed and all data drained into the sink.
    Ended,
    /// Session-fatal failure; a fresh play request is required.
    Error,
}

/// Broadcasts to the external rendering layer.
#[derive(Debug, Clone)]
pub enum EngineUpdate {
    PlaybackChanged {
        video: Option<VideoId>,
        status: PlaybackStatus,
    },
    SubscriptionChanged(SubscriptionState),
    CatalogUpdated(Vec<ServerCatalogEntry>),
    /// User-visible error report; display is the UI's responsibility.
    ErrorReported(String),
}

// ── Engine ────────────────────────────────────────────────────────────────────

pub struct Engine {
    gateway: Arc<dyn Gateway>,
    sink_factory: SinkFactory,
    policy: RetentionPolicy,
    fsm: SubscriptionStateMachine,
    merger: CatalogMerger,
    session: Option<StreamSession>,
    /// Monotonic session generation; events tagged with an older value are
    /// from a retired session and are dropped.
    generation: u64,
    current_video: Option<VideoId>,
    status: PlaybackStatus,
    event_tx: mpsc::Sender<EngineEvent>,
    update_tx: broadcast::Sender<EngineUpdate>,
}

impl Engine {
    pub fn new(
        gateway: Arc<dyn Gateway>,
        sink_factory: SinkFactory,
        policy: RetentionPolicy,
        event_tx: mpsc::Sender<EngineEvent>,
        update_tx: broadcast::Sender<EngineUpdate>,
    ) -> Self {
        Self {
            gateway,
            sink_factory,
            policy,
            fsm: SubscriptionStateMachine::new(),
            merger: CatalogMerger::new(),
            session: None,
            generation: 0,
            current_video: None,
            status: PlaybackStatus::Idle,
            event_tx,
            update_tx,
        }
    }

    /// Run the engine loop.  Returns when a `Shutdown` command arrives or
    /// the event channel closes.
    pub async fn run(mut self, mut event_rx: mpsc::Receiver<EngineEvent>) {
        info!("engine: starting event loop");

        while let Some(evt) = event_rx.recv().await {
            match evt {
                EngineEvent::Command(EngineCommand::Shutdown) => {
                    info!("engine: shutdown requested");
                    break;
                }
                EngineEvent::Command(EngineCommand::Play(id)) => self.play(id).await,
                EngineEvent::Command(EngineCommand::Stop) => self.stop(),
                EngineEvent::ConnectivityToken(token) => self.on_connectivity_token(&token),
                EngineEvent::CatalogPush(raw) => self.on_catalog_push(&raw),
                EngineEvent::RefreshReady(result) => self.on_refresh_ready(result),
                EngineEvent::Chunk { generation, data } => self.on_chunk(generation, data),
                EngineEvent::ChunkStreamClosed { generation } => {
                    self.on_chunk_stream_closed(generation)
                }
                EngineEvent::StreamInterrupted { generation, error } => {
                    self.on_stream_interrupted(generation, error)
                }
                EngineEvent::AppendComplete { generation, result } => {
                    self.on_append_complete(generation, result)
                }
            }
        }

        if let Some(session) = self.session.take() {
            session.shutdown(true);
        }
        info!("engine: event loop stopped");
    }

    // ── command handlers ──────────────────────────────────────────────────────

    async fn play(&mut self, video: VideoId) {
        // Retire the previous session before anything of the new one exists
        if let Some(old) = self.session.take() {
            debug!(old_video = old.video_id(), "replacing active session");
            old.shutdown(false);
        }
        self.generation += 1;
        let generation = self.generation;
        self.set_status(Some(video), PlaybackStatus::Requesting);

        let events = self.event_tx.clone();
        let gateway = Arc::clone(&self.gateway);
        let result = StreamSession::start(
            gateway.as_ref(),
            video,
            generation,
            || (self.sink_factory)(events.clone(), generation),
            self.policy,
            self.event_tx.clone(),
        )
        .await;

        match result {
            Ok(session) => {
                self.session = Some(session);
                self.set_status(Some(video), PlaybackStatus::Streaming);
            }
            Err(e) => {
                error!(video, "stream start failed: {e}");
                self.report_error(format!("could not start video {video}: {e}"));
                self.set_status(None, PlaybackStatus::Error);
            }
        }
    }

    fn stop(&mut self) {
        if let Some(session) = self.session.take() {
            info!(video = session.video_id(), "stopping playback");
            session.shutdown(true);
        }
        self.set_status(None, PlaybackStatus::Idle);
    }

    // ── subscription / catalog handlers ───────────────────────────────────────

    fn on_connectivity_token(&mut self, token: &str) {
        let before = self.fsm.state();
        match self.fsm.apply(token) {
            Ok(transition) => {
                if transition.to != transition.from {
                    info!("subscription: {} -> {}", transition.from, transition.to);
                    let _ = self
                        .update_tx
                        .send(EngineUpdate::SubscriptionChanged(transition.to));
                }
                if transition.refresh {
                    self.spawn_refresh();
                }
            }
            Err(e) => {
                warn!("connectivity token rejected: {e}");
                if self.fsm.state() != before {
                    let _ = self
                        .update_tx
                        .send(EngineUpdate::SubscriptionChanged(self.fsm.state()));
                }
            }
        }
    }

    fn spawn_refresh(&self) {
        let gateway = Arc::clone(&self.gateway);
        let events = self.event_tx.clone();
        tokio::spawn(async move {
            let result = gateway.refresh_catalog().await;
            let _ = events.send(EngineEvent::RefreshReady(result)).await;
        });
    }

    fn on_catalog_push(&mut self, raw: &str) {
        match CatalogSnapshot::parse(raw) {
            Ok(snapshot) => self.merge_snapshot(snapshot),
            Err(e) => {
                // Scoped to this message; the server's last-good snapshot
                // stays in place
                warn!("ignoring malformed catalog push: {e}");
            }
        }
    }

    fn on_refresh_ready(&mut self, result: Result<CatalogSnapshot, RefreshError>) {
        match result {
            Ok(snapshot) => self.merge_snapshot(snapshot),
            Err(e) => warn!("catalog refresh failed: {e}"),
        }
    }

    fn merge_snapshot(&mut self, snapshot: CatalogSnapshot) {
        if self.merger.apply_snapshot(snapshot) {
            let _ = self
                .update_tx
                .send(EngineUpdate::CatalogUpdated(self.merger.merged_view().to_vec()));
        }
    }

    // ── stream handlers ───────────────────────────────────────────────────────

    fn on_chunk(&mut self, generation: u64, data: Bytes) {
        let Some(session) = self.current_session(generation) else {
            // Late delivery from a retired session: silently dropped
            return;
        };
        if let Err(failure) = session.handle_chunk(data) {
            self.fail_session(failure);
        }
    }

    fn on_append_complete(&mut self, generation: u64, result: Result<(), SinkError>) {
        let Some(session) = self.current_session(generation) else {
            return;
        };
        match session.handle_append_complete(result) {
            Ok(()) => {
                if self.session.as_ref().is_some_and(StreamSession::is_ended) {
                    let video = self.current_video;
                    self.set_status(video, PlaybackStatus::Ended);
                }
            }
            Err(failure) => self.fail_session(failure),
        }
    }

    fn on_chunk_stream_closed(&mut self, generation: u64) {
        let Some(session) = self.current_session(generation) else {
            return;
        };
        session.mark_stream_closed();
        if self.session.as_ref().is_some_and(StreamSession::is_ended) {
            let video = self.current_video;
            self.set_status(video, PlaybackStatus::Ended);
        }
    }

    fn on_stream_interrupted(&mut self, generation: u64, error: StreamError) {
        if self.current_session(generation).is_none() {
            return;
        }
        // No auto-reconnect: resuming mid-stream against a stale sink would
        // corrupt the buffer.  Surface and wait for a fresh play request.
        error!("stream interrupted: {error}");
        self.report_error(format!("stream interrupted: {error}"));
        if let Some(session) = self.session.take() {
            session.shutdown(true);
        }
        let video = self.current_video;
        self.set_status(video, PlaybackStatus::Error);
    }

    fn fail_session(&mut self, failure: AppendFailure) {
        error!("session failed: {failure}");
        self.report_error(format!("playback aborted: {failure}"));
        if let Some(session) = self.session.take() {
            session.shutdown(false);
        }
        let video = self.current_video;
        self.set_status(video, PlaybackStatus::Error);
    }

    // ── helpers ───────────────────────────────────────────────────────────────

    /// The live session, only if `generation` is current.
    fn current_session(&mut self, generation: u64) -> Option<&mut StreamSession> {
        self.session
            .as_mut()
            .filter(|s| s.generation() == generation)
    }

    fn set_status(&mut self, video: Option<VideoId>, status: PlaybackStatus) {
        if self.status != status || self.current_video != video {
            debug!("playback: {:?} -> {:?}", self.status, status);
            self.status = status;
            self.current_video = video;
            let _ = self
                .update_tx
                .send(EngineUpdate::PlaybackChanged { video, status });
        }
    }

    fn report_error(&self, message: String) {
        let _ = self.update_tx.send(EngineUpdate::ErrorReported(message));
    }
}

// ── push-channel adapters ─────────────────────────────────────────────────────

/// Pump the connectivity channel into engine events.  Exits on channel
/// error; reconnection is the orchestrator's decision.
pub fn spawn_status_feed(
    gateway: Arc<dyn Gateway>,
    events: mpsc::Sender<EngineEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let stream = match gateway.open_status_stream().await {
            Ok(s) => s,
            Err(e) => {
                warn!("connectivity channel unavailable: {e}");
                return;
            }
        };
        pump_feed(stream, events, EngineEvent::ConnectivityToken, "connectivity").await;
    })
}

/// Pump the catalog snapshot channel into engine events.
pub fn spawn_catalog_feed(
    gateway: Arc<dyn Gateway>,
    events: mpsc::Sender<EngineEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let stream = match gateway.open_catalog_stream().await {
            Ok(s) => s,
            Err(e) => {
                warn!("catalog channel unavailable: {e}");
                return;
            }
        };
        pump_feed(stream, events, EngineEvent::CatalogPush, "catalog").await;
    })
}

async fn pump_feed(
    mut stream: crate::gateway::ByteStream,
    events: mpsc::Sender<EngineEvent>,
    make_event: fn(String) -> EngineEvent,
    name: &str,
) {
    let mut decoder = SseDecoder::new();
    while let Some(read) = stream.next().await {
        match read {
            Ok(bytes) => {
                for payload in decoder.feed(&bytes) {
                    if events.send(make_event(payload)).await.is_err() {
                        return;
                    }
                }
            }
            Err(e) => {
                warn!("{name} channel error: {e}");
                return;
            }
        }
    }
    debug!("{name} channel closed");
}
