//! Engine loop behavior against a scripted gateway and recording sinks:
//! session replacement isolation, edge-triggered catalog refresh, snapshot
//! merging, stream completion, and append-failure surfacing.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{TimeZone, Utc};
use futures_util::StreamExt;
use tokio::sync::{broadcast, mpsc};

use vidmesh_player::gateway::{ByteStream, Gateway, RefreshError, StartError, StreamError};
use vidmesh_player::sink::{BufferedSpan, MediaSink, SinkError};
use vidmesh_player::{Engine, EngineCommand, EngineEvent, EngineUpdate, PlaybackStatus, RetentionPolicy};
use vidmesh_proto::catalog::{CatalogSnapshot, VideoId, VideoMetadata};
use vidmesh_proto::chunk::encode_chunk;

// ── scripted gateway ──────────────────────────────────────────────────────────

type FrameSender = mpsc::Sender<Result<Bytes, StreamError>>;

#[derive(Default)]
struct MockGateway {
    start_calls: Mutex<Vec<VideoId>>,
    refresh_calls: AtomicUsize,
    fail_start: AtomicBool,
    /// One sender per opened chunk stream, in open order.
    chunk_feeds: Mutex<Vec<FrameSender>>,
}

impl MockGateway {
    fn feed(&self, index: usize) -> FrameSender {
        self.chunk_feeds.lock().unwrap()[index].clone()
    }

    fn opened_streams(&self) -> usize {
        self.chunk_feeds.lock().unwrap().len()
    }
}

fn channel_stream() -> (FrameSender, ByteStream) {
    let (tx, rx) = mpsc::channel::<Result<Bytes, StreamError>>(32);
    let stream = futures_util::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    })
    .boxed();
    (tx, stream)
}

#[async_trait]
impl Gateway for MockGateway {
    async fn start_stream(&self, video: VideoId) -> Result<(), StartError> {
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(StartError::Status(500));
        }
        self.start_calls.lock().unwrap().push(video);
        Ok(())
    }

    async fn refresh_catalog(&self) -> Result<CatalogSnapshot, RefreshError> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        Ok(CatalogSnapshot::new(1, vec![video_meta(100, "refreshed")]))
    }

    async fn open_chunk_stream(&self) -> Result<ByteStream, StreamError> {
        let (tx, stream) = channel_stream();
        self.chunk_feeds.lock().unwrap().push(tx);
        Ok(stream)
    }

    async fn open_catalog_stream(&self) -> Result<ByteStream, StreamError> {
        let (_tx, stream) = channel_stream();
        Ok(stream)
    }

    async fn open_status_stream(&self) -> Result<ByteStream, StreamError> {
        let (_tx, stream) = channel_stream();
        Ok(stream)
    }
}

// ── recording sink ────────────────────────────────────────────────────────────

/// Records every append with its session generation and auto-completes, so
/// the scheduler keeps pumping.
struct RecordingSink {
    generation: u64,
    events: mpsc::Sender<EngineEvent>,
    log: Arc<Mutex<Vec<(u64, Bytes)>>>,
    reject_after: Option<usize>,
    appended: usize,
}

impl MediaSink for RecordingSink {
    fn is_ready(&self) -> bool {
        true
    }

    fn begin_append(&mut self, data: Bytes) -> Result<(), SinkError> {
        if let Some(limit) = self.reject_after {
            if self.appended >= limit {
                return Err(SinkError::Rejected("scripted rejection".into()));
            }
        }
        self.appended += 1;
        self.log.lock().unwrap().push((self.generation, data));
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

    fn end_of_stream(&mut self) {}
}

// ── harness ───────────────────────────────────────────────────────────────────

struct Harness {
    gateway: Arc<MockGateway>,
    event_tx: mpsc::Sender<EngineEvent>,
    update_rx: broadcast::Receiver<EngineUpdate>,
    appends: Arc<Mutex<Vec<(u64, Bytes)>>>,
}

fn start_engine(reject_after: Option<usize>) -> Harness {
    let gateway = Arc::new(MockGateway::default());
    let (event_tx, event_rx) = mpsc::channel(64);
    let (update_tx, update_rx) = broadcast::channel(64);
    let appends: Arc<Mutex<Vec<(u64, Bytes)>>> = Arc::default();

    let log = appends.clone();
    let sink_factory: vidmesh_player::SinkFactory = Box::new(move |events, generation| {
        Box::new(RecordingSink {
            generation,
            events,
            log: log.clone(),
            reject_after,
            appended: 0,
        })
    });

    let engine = Engine::new(
        gateway.clone(),
        sink_factory,
        RetentionPolicy::default(),
        event_tx.clone(),
        update_tx,
    );
    tokio::spawn(engine.run(event_rx));

    Harness {
        gateway,
        event_tx,
        update_rx,
        appends,
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached within timeout");
}

fn sse_chunk(data: &[u8]) -> Result<Bytes, StreamError> {
    Ok(Bytes::from(format!("data: {}\n\n", encode_chunk(data))))
}

fn video_meta(id: VideoId, title: &str) -> VideoMetadata {
    VideoMetadata {
        id,
        title: title.to_string(),
        description: String::new(),
        duration_secs: 30.0,
        mime_type: "video/mp4".to_string(),
        created_at: Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap(),
    }
}

async fn play(h: &Harness, video: VideoId) {
    h.event_tx
        .send(EngineEvent::Command(EngineCommand::Play(video)))
        .await
        .unwrap();
}

// ── tests ─────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn chunks_append_in_delivery_order() {
    let h = start_engine(None);
    play(&h, 7).await;
    wait_until(|| h.gateway.opened_streams() == 1).await;

    let feed = h.gateway.feed(0);
    for n in 0..5u8 {
        feed.send(sse_chunk(&[n; 3])).await.unwrap();
    }
    wait_until(|| h.appends.lock().unwrap().len() == 5).await;

    let log = h.appends.lock().unwrap();
    for (n, (generation, data)) in log.iter().enumerate() {
        assert_eq!(*generation, 1);
        assert_eq!(data[0], n as u8);
    }
}

#[tokio::test]
async fn replacing_a_session_makes_its_chunks_unobservable() {
    let h = start_engine(None);

    play(&h, 1).await;
    wait_until(|| h.gateway.opened_streams() == 1).await;
    let feed_a = h.gateway.feed(0);
    for n in 0..3u8 {
        feed_a.send(sse_chunk(&[n; 3])).await.unwrap();
    }

    // Replace the session while A's chunks are in flight
    play(&h, 2).await;
    wait_until(|| h.gateway.opened_streams() == 2).await;

    // Late traffic on A's channel must never surface
    for n in 10..13u8 {
        let _ = feed_a.send(sse_chunk(&[n; 3])).await;
    }

    let feed_b = h.gateway.feed(1);
    for n in 20..23u8 {
        feed_b.send(sse_chunk(&[n; 3])).await.unwrap();
    }
    wait_until(|| {
        h.appends
            .lock()
            .unwrap()
            .iter()
            .filter(|(generation, _)| *generation == 2)
            .count()
            == 3
    })
    .await;

    let log = h.appends.lock().unwrap();
    let first_b = log.iter().position(|(generation, _)| *generation == 2).unwrap();
    // Zero appends from A's queue once B's sink exists
    assert!(log[first_b..].iter().all(|(generation, _)| *generation == 2));
    // And nothing from A's post-replacement traffic anywhere
    assert!(log.iter().all(|(_, data)| data[0] < 10 || data[0] >= 20));
}

#[tokio::test]
async fn malformed_chunk_is_dropped_and_the_stream_continues() {
    let h = start_engine(None);
    play(&h, 9).await;
    wait_until(|| h.gateway.opened_streams() == 1).await;

    let feed = h.gateway.feed(0);
    feed.send(sse_chunk(b"first")).await.unwrap();
    feed.send(Ok(Bytes::from("data: %%%not-base64%%%\n\n")))
        .await
        .unwrap();
    feed.send(sse_chunk(b"second")).await.unwrap();

    wait_until(|| h.appends.lock().unwrap().len() == 2).await;
    let log = h.appends.lock().unwrap();
    assert_eq!(&log[0].1[..], b"first");
    assert_eq!(&log[1].1[..], b"second");
}

#[tokio::test]
async fn duplicate_subscribed_tokens_refresh_once() {
    let mut h = start_engine(None);

    for token in ["NotSubscribedToServer", "SubscribedToServer", "SubscribedToServer"] {
        h.event_tx
            .send(EngineEvent::ConnectivityToken(token.to_string()))
            .await
            .unwrap();
    }
    wait_until(|| h.gateway.refresh_calls.load(Ordering::SeqCst) >= 1).await;
    // Give the duplicate a chance to (incorrectly) trigger a second refresh
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.gateway.refresh_calls.load(Ordering::SeqCst), 1);

    // The refreshed snapshot lands in the merged view
    let mut saw_catalog = false;
    wait_until(|| {
        while let Ok(update) = h.update_rx.try_recv() {
            if let EngineUpdate::CatalogUpdated(view) = update {
                assert_eq!(view.len(), 1);
                assert_eq!(view[0].server_id, 1);
                assert_eq!(view[0].videos[0].title, "refreshed");
                saw_catalog = true;
            }
        }
        saw_catalog
    })
    .await;
}

#[tokio::test]
async fn malformed_catalog_push_keeps_last_good_snapshot() {
    let mut h = start_engine(None);

    let good = CatalogSnapshot::new(4, vec![video_meta(9, "keeper")]);
    h.event_tx
        .send(EngineEvent::CatalogPush(good.encode().unwrap()))
        .await
        .unwrap();
    h.event_tx
        .send(EngineEvent::CatalogPush("{broken".to_string()))
        .await
        .unwrap();
    // A second well-formed push proves the loop survived the bad one
    let update = CatalogSnapshot::new(5, vec![]);
    h.event_tx
        .send(EngineEvent::CatalogPush(update.encode().unwrap()))
        .await
        .unwrap();

    let mut views = Vec::new();
    wait_until(|| {
        while let Ok(update) = h.update_rx.try_recv() {
            if let EngineUpdate::CatalogUpdated(view) = update {
                views.push(view);
            }
        }
        views.len() == 2
    })
    .await;

    let last = views.last().unwrap();
    assert_eq!(last.len(), 2);
    assert_eq!(last[0].server_id, 4);
    assert_eq!(last[0].videos[0].title, "keeper");
}

#[tokio::test]
async fn closed_channel_drains_then_ends() {
    let mut h = start_engine(None);
    play(&h, 3).await;
    wait_until(|| h.gateway.opened_streams() == 1).await;

    let feed = h.gateway.feed(0);
    feed.send(sse_chunk(b"tail")).await.unwrap();
    drop(feed);

    let mut ended = false;
    wait_until(|| {
        while let Ok(update) = h.update_rx.try_recv() {
            if matches!(
                update,
                EngineUpdate::PlaybackChanged {
                    status: PlaybackStatus::Ended,
                    ..
                }
            ) {
                ended = true;
            }
        }
        ended
    })
    .await;
    assert_eq!(h.appends.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn sink_rejection_fails_session_once_and_requires_fresh_start() {
    let mut h = start_engine(Some(2));
    play(&h, 5).await;
    wait_until(|| h.gateway.opened_streams() == 1).await;

    let feed = h.gateway.feed(0);
    for n in 0..5u8 {
        feed.send(sse_chunk(&[n; 3])).await.unwrap();
    }

    let mut errors = 0;
    let mut error_status = false;
    wait_until(|| {
        while let Ok(update) = h.update_rx.try_recv() {
            match update {
                EngineUpdate::ErrorReported(_) => errors += 1,
                EngineUpdate::PlaybackChanged {
                    status: PlaybackStatus::Error,
                    ..
                } => error_status = true,
                _ => {}
            }
        }
        errors > 0 && error_status
    })
    .await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    while let Ok(update) = h.update_rx.try_recv() {
        if matches!(update, EngineUpdate::ErrorReported(_)) {
            errors += 1;
        }
    }
    assert_eq!(errors, 1);
    assert_eq!(h.appends.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn channel_error_surfaces_as_interruption_without_retry() {
    let mut h = start_engine(None);
    play(&h, 6).await;
    wait_until(|| h.gateway.opened_streams() == 1).await;

    let feed = h.gateway.feed(0);
    feed.send(sse_chunk(b"good")).await.unwrap();
    feed.send(Err(StreamError("connection reset".to_string())))
        .await
        .unwrap();

    let mut interrupted = false;
    wait_until(|| {
        while let Ok(update) = h.update_rx.try_recv() {
            if let EngineUpdate::ErrorReported(message) = update {
                assert!(message.contains("interrupted"));
                interrupted = true;
            }
        }
        interrupted
    })
    .await;
    // No reconnect attempt: still exactly one opened chunk stream
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.gateway.opened_streams(), 1);
}

#[tokio::test]
async fn failed_start_request_leaves_no_session() {
    let mut h = start_engine(None);
    h.gateway.fail_start.store(true, Ordering::SeqCst);
    play(&h, 8).await;

    let mut reported = false;
    wait_until(|| {
        while let Ok(update) = h.update_rx.try_recv() {
            if matches!(update, EngineUpdate::ErrorReported(_)) {
                reported = true;
            }
        }
        reported
    })
    .await;
    assert_eq!(h.gateway.opened_streams(), 0);
    assert!(h.appends.lock().unwrap().is_empty());
}
