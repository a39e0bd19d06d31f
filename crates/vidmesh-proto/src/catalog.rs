use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Identity of a remote catalog server on the mesh.
pub type ServerId = u16;

/// Identity of a video within a catalog.  Stable for the life of a stream
/// session; servers may reuse ids across unrelated catalogs.
pub type VideoId = u16;

/// Immutable snapshot describing one catalog entry.  Owned by whichever
/// server last reported it; replaced wholesale on the next snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoMetadata {
    pub id: VideoId,
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// Total duration in seconds as reported by the server.
    pub duration_secs: f64,
    pub mime_type: String,
    pub created_at: DateTime<Utc>,
}

/// One server's most recent catalog snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerCatalogEntry {
    pub server_id: ServerId,
    pub videos: Vec<VideoMetadata>,
}

/// A catalog snapshot as pushed over the wire: a JSON-encoded
/// `(server_id, videos)` pair, one per SSE message.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogSnapshot {
    pub server_id: ServerId,
    pub videos: Vec<VideoMetadata>,
}

/// Malformed catalog push payload.  Never fatal — the caller keeps the
/// last-good snapshot for the affected server.
#[derive(Debug, Error)]
#[error("malformed catalog snapshot: {0}")]
pub struct SnapshotParseError(#[from] serde_json::Error);

impl CatalogSnapshot {
    pub fn new(server_id: ServerId, videos: Vec<VideoMetadata>) -> Self {
        Self { server_id, videos }
    }

    /// Parse a pushed snapshot message body.
    pub fn parse(payload: &str) -> Result<Self, SnapshotParseError> {
        let (server_id, videos): (ServerId, Vec<VideoMetadata>) =
            serde_json::from_str(payload)?;
        Ok(Self { server_id, videos })
    }

    /// Encode as the wire pair.  Used by fixtures and the test server.
    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(&(self.server_id, &self.videos))
    }
}

/// Parse one `VideoMetadata` record from a catalog-refresh response line.
pub fn parse_metadata_record(payload: &str) -> Result<VideoMetadata, SnapshotParseError> {
    Ok(serde_json::from_str(payload)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_video(id: VideoId) -> VideoMetadata {
        VideoMetadata {
            id,
            title: format!("video-{id}"),
            description: "test clip".to_string(),
            duration_secs: 42.5,
            mime_type: "video/mp4".to_string(),
            created_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_snapshot_round_trip() {
        let snap = CatalogSnapshot::new(3, vec![sample_video(1), sample_video(2)]);
        let wire = snap.encode().unwrap();
        let parsed = CatalogSnapshot::parse(&wire).unwrap();
        assert_eq!(parsed, snap);
    }

    #[test]
    fn test_snapshot_wire_shape_is_pair() {
        let snap = CatalogSnapshot::new(7, vec![]);
        let wire = snap.encode().unwrap();
        // The wire format is a JSON array pair, not an object
        assert!(wire.starts_with("[7,"));
    }

    #[test]
    fn test_snapshot_parse_rejects_garbage() {
        assert!(CatalogSnapshot::parse("not json").is_err());
        assert!(CatalogSnapshot::parse("{\"server_id\":1}").is_err());
    }

    #[test]
    fn test_metadata_record_missing_description_defaults_empty() {
        let raw = r#"{"id":4,"title":"t","duration_secs":1.0,
                      "mime_type":"video/mp4","created_at":"2024-05-01T12:00:00Z"}"#;
        let meta = parse_metadata_record(raw).unwrap();
        assert_eq!(meta.description, "");
    }
}
