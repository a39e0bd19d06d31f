//! Merged view of remote catalogs.
//!
//! Each reachable server pushes whole-list snapshots of the videos it
//! exposes.  The merger keys them by server identity, last write wins per
//! server, and keeps first-seen order so the rendered list does not jump
//! around on updates.  Both producers (the push feed and the refresh
//! response) reach it through the engine's single event loop, so updates
//! for one server are never interleaved.

use tracing::debug;
use vidmesh_proto::catalog::{CatalogSnapshot, ServerCatalogEntry, ServerId};

#[derive(Debug, Default)]
pub struct CatalogMerger {
    entries: Vec<ServerCatalogEntry>,
}

impl CatalogMerger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert one server's snapshot, replacing its whole list.  Returns
    /// whether the merged view changed, so callers can skip redundant
    /// re-renders on duplicate snapshots.
    pub fn apply_snapshot(&mut self, snapshot: CatalogSnapshot) -> bool {
        let CatalogSnapshot { server_id, videos } = snapshot;

        match self.entry_index(server_id) {
            Some(idx) => {
                if self.entries[idx].videos == videos {
                    return false;
                }
                debug!(server_id, count = videos.len(), "catalog updated");
                self.entries[idx].videos = videos;
            }
            None => {
                debug!(server_id, count = videos.len(), "catalog discovered");
                self.entries.push(ServerCatalogEntry { server_id, videos });
            }
        }
        true
    }

    /// All known catalogs, in first-seen server order.
    pub fn merged_view(&self) -> &[ServerCatalogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn entry_index(&self, server_id: ServerId) -> Option<usize> {
        self.entries.iter().position(|e| e.server_id == server_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use vidmesh_proto::catalog::{VideoId, VideoMetadata};

    fn video(id: VideoId, title: &str) -> VideoMetadata {
        VideoMetadata {
            id,
            title: title.to_string(),
            description: String::new(),
            duration_secs: 10.0,
            mime_type: "video/mp4".to_string(),
            created_at: Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap(),
        }
    }

    fn snapshot(server_id: u16, videos: Vec<VideoMetadata>) -> CatalogSnapshot {
        CatalogSnapshot::new(server_id, videos)
    }

    #[test]
    fn test_same_snapshot_twice_is_idempotent() {
        let mut merger = CatalogMerger::new();
        let snap = snapshot(1, vec![video(10, "a")]);

        assert!(merger.apply_snapshot(snap.clone()));
        let view_after_first = merger.merged_view().to_vec();

        assert!(!merger.apply_snapshot(snap));
        assert_eq!(merger.merged_view(), view_after_first.as_slice());
    }

    #[test]
    fn test_upsert_keeps_one_entry_per_server_with_latest_data() {
        let mut merger = CatalogMerger::new();
        merger.apply_snapshot(snapshot(1, vec![video(10, "old")]));
        merger.apply_snapshot(snapshot(2, vec![video(20, "b")]));
        merger.apply_snapshot(snapshot(1, vec![video(11, "new")]));

        let view = merger.merged_view();
        assert_eq!(view.len(), 2);
        assert_eq!(view[0].server_id, 1);
        assert_eq!(view[0].videos[0].title, "new");
        assert_eq!(view[1].server_id, 2);
    }

    #[test]
    fn test_first_seen_order_is_stable_across_updates() {
        let mut merger = CatalogMerger::new();
        merger.apply_snapshot(snapshot(5, vec![]));
        merger.apply_snapshot(snapshot(3, vec![]));
        merger.apply_snapshot(snapshot(9, vec![]));
        merger.apply_snapshot(snapshot(3, vec![video(1, "later")]));

        let order: Vec<u16> = merger.merged_view().iter().map(|e| e.server_id).collect();
        assert_eq!(order, vec![5, 3, 9]);
    }

    #[test]
    fn test_whole_list_replacement_drops_absent_videos() {
        let mut merger = CatalogMerger::new();
        merger.apply_snapshot(snapshot(1, vec![video(10, "a"), video(11, "b")]));
        merger.apply_snapshot(snapshot(1, vec![video(11, "b")]));

        let view = merger.merged_view();
        assert_eq!(view[0].videos.len(), 1);
        assert_eq!(view[0].videos[0].id, 11);
    }

    #[test]
    fn test_empty_snapshot_is_a_valid_catalog() {
        let mut merger = CatalogMerger::new();
        merger.apply_snapshot(snapshot(1, vec![video(10, "a")]));
        assert!(merger.apply_snapshot(snapshot(1, vec![])));
        assert!(merger.merged_view()[0].videos.is_empty());
        assert_eq!(merger.len(), 1);
    }
}
