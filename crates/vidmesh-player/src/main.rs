use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use vidmesh_proto::config::{data_dir, Config};

use vidmesh_player::engine::{spawn_catalog_feed, spawn_status_feed};
use vidmesh_player::sink::{NullSink, PipePlayerSink};
use vidmesh_player::{Engine, EngineCommand, EngineEvent, EngineUpdate, HttpGateway, RetentionPolicy};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // File logging with env-filter overrides
    let data_dir = data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let log_path = data_dir.join("player.log");
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,vidmesh_player=debug")),
        )
        .init();

    info!("Log file: {:?}", log_path);

    let config = Config::load()?;
    info!("Config loaded from: {:?}", Config::config_path());

    let gateway: Arc<dyn vidmesh_player::Gateway> = Arc::new(HttpGateway::new(&config.server));

    // Event channel — all external inputs funnel into the engine loop
    let (event_tx, event_rx) = mpsc::channel::<EngineEvent>(config.channels.event_capacity);
    let (update_tx, mut update_rx) =
        broadcast::channel::<EngineUpdate>(config.channels.update_capacity);

    let policy = RetentionPolicy {
        retention_secs: config.playback.retention_secs,
        trim_margin_secs: config.playback.trim_margin_secs,
    };

    let player_command = config.playback.player_command.clone();
    let bytes_per_second = config.playback.bytes_per_second;
    let sink_factory: vidmesh_player::SinkFactory = Box::new(move |events, generation| {
        match PipePlayerSink::spawn(&player_command, bytes_per_second, events.clone(), generation) {
            Ok(sink) => Box::new(sink),
            Err(e) => {
                warn!("player process unavailable, using discarding sink: {e}");
                Box::new(NullSink::new(events, generation))
            }
        }
    });

    let engine = Engine::new(gateway.clone(), sink_factory, policy, event_tx.clone(), update_tx);
    let engine_task = tokio::spawn(engine.run(event_rx));

    spawn_status_feed(gateway.clone(), event_tx.clone());
    spawn_catalog_feed(gateway.clone(), event_tx.clone());

    // Optional: play a video straight away (`vidmesh <video-id>`)
    if let Some(arg) = std::env::args().nth(1) {
        match arg.parse() {
            Ok(id) => {
                let _ = event_tx.send(EngineEvent::Command(EngineCommand::Play(id))).await;
            }
            Err(_) => warn!("ignoring non-numeric video id argument: {arg}"),
        }
    }

    // Mirror updates to the log until ctrl-c
    let printer = tokio::spawn(async move {
        loop {
            match update_rx.recv().await {
                Ok(update) => info!("update: {update:?}"),
                Err(broadcast::error::RecvError::Lagged(n)) => warn!("missed {n} updates"),
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    let _ = event_tx.send(EngineEvent::Command(EngineCommand::Shutdown)).await;
    let _ = engine_task.await;
    printer.abort();
    Ok(())
}
