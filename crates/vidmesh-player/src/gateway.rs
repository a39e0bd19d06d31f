//! Collaborator contracts for the server side of every channel, plus the
//! HTTP implementation used in production.
//!
//! The engine only ever sees the [`Gateway`] trait, so tests can swap in a
//! scripted gateway and the engine logic stays independent of the wire.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::{StreamExt, TryStreamExt};
use thiserror::Error;
use tracing::{debug, info};
use vidmesh_proto::catalog::{parse_metadata_record, CatalogSnapshot, ServerId, VideoId};
use vidmesh_proto::config::ServerConfig;
use vidmesh_proto::sse;

/// Raw bytes of one push channel, as delivered by the network.
pub type ByteStream = BoxStream<'static, Result<Bytes, StreamError>>;

/// Channel-level network failure.  Surfaced as a stream interruption; the
/// engine never reconnects on its own.
#[derive(Debug, Clone, Error)]
#[error("stream channel error: {0}")]
pub struct StreamError(pub String);

/// The request to begin producing chunks failed; no session is created.
#[derive(Debug, Clone, Error)]
pub enum StartError {
    #[error("start-stream request failed: {0}")]
    Request(String),
    #[error("start-stream rejected with status {0}")]
    Status(u16),
}

/// The catalog-refresh request failed.  Non-fatal; the merger keeps its
/// last-good state.
#[derive(Debug, Clone, Error)]
pub enum RefreshError {
    #[error("catalog refresh request failed: {0}")]
    Request(String),
    #[error("catalog refresh rejected with status {0}")]
    Status(u16),
    #[error("catalog refresh returned a malformed record: {0}")]
    Malformed(String),
}

/// Everything the engine asks of the remote side: one request to start chunk
/// production, one catalog refresh, and the three push channels.
#[async_trait]
pub trait Gateway: Send + Sync {
    /// Ask the server to start producing chunks for `video`.
    async fn start_stream(&self, video: VideoId) -> Result<(), StartError>;

    /// Fetch the subscribed server's catalog.  Zero records is an empty
    /// catalog, not an error.
    async fn refresh_catalog(&self) -> Result<CatalogSnapshot, RefreshError>;

    /// Open the chunk delivery channel for the current video.
    async fn open_chunk_stream(&self) -> Result<ByteStream, StreamError>;

    /// Open the catalog snapshot push channel.
    async fn open_catalog_stream(&self) -> Result<ByteStream, StreamError>;

    /// Open the connectivity/subscription push channel.
    async fn open_status_stream(&self) -> Result<ByteStream, StreamError>;
}

// ── HTTP implementation ───────────────────────────────────────────────────────

/// Gateway over the mesh client's HTTP routes.
pub struct HttpGateway {
    client: reqwest::Client,
    base_url: String,
    catalog_server_id: ServerId,
}

impl HttpGateway {
    pub fn new(config: &ServerConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            catalog_server_id: config.catalog_server_id,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn open_sse(&self, path: &str) -> Result<ByteStream, StreamError> {
        let response = self
            .client
            .get(self.url(path))
            .send()
            .await
            .map_err(|e| StreamError(e.to_string()))?;
        if !response.status().is_success() {
            return Err(StreamError(format!(
                "{path} returned status {}",
                response.status()
            )));
        }
        debug!("opened push channel {path}");
        Ok(response
            .bytes_stream()
            .map_err(|e| StreamError(e.to_string()))
            .boxed())
    }
}

#[async_trait]
impl Gateway for HttpGateway {
    async fn start_stream(&self, video: VideoId) -> Result<(), StartError> {
        let response = self
            .client
            .get(self.url(&format!("/req-video/{video}")))
            .send()
            .await
            .map_err(|e| StartError::Request(e.to_string()))?;
        if !response.status().is_success() {
            return Err(StartError::Status(response.status().as_u16()));
        }
        info!(video, "stream production requested");
        Ok(())
    }

    async fn refresh_catalog(&self) -> Result<CatalogSnapshot, RefreshError> {
        let response = self
            .client
            .get(self.url("/req-video-list-from-db"))
            .send()
            .await
            .map_err(|e| RefreshError::Request(e.to_string()))?;
        if !response.status().is_success() {
            return Err(RefreshError::Status(response.status().as_u16()));
        }
        let body = response
            .text()
            .await
            .map_err(|e| RefreshError::Request(e.to_string()))?;

        // One `data: <json>` record per video; an empty body is an empty
        // catalog.  The response carries no server identity, so the
        // configured id labels the snapshot.
        let mut videos = Vec::new();
        for record in sse::parse_records(&body) {
            let meta = parse_metadata_record(&record)
                .map_err(|e| RefreshError::Malformed(e.to_string()))?;
            videos.push(meta);
        }
        info!(count = videos.len(), "catalog refreshed");
        Ok(CatalogSnapshot::new(self.catalog_server_id, videos))
    }

    async fn open_chunk_stream(&self) -> Result<ByteStream, StreamError> {
        self.open_sse("/video-stream").await
    }

    async fn open_catalog_stream(&self) -> Result<ByteStream, StreamError> {
        self.open_sse("/video-list-from-server").await
    }

    async fn open_status_stream(&self) -> Result<ByteStream, StreamError> {
        self.open_sse("/fsm-status").await
    }
}
