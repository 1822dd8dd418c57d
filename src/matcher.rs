//!
//! src/matcher.rs
//!
//! Resolves a scraped track to the best playlist-addable catalog item.
//! One search per track, top result only; the catalog's own relevance
//! ranking is authoritative
//!

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::errors::SyncError;
use crate::identity::normalize_field;
use crate::scrape::ScrapedTrack;

/// A search hit from the external catalog. Ephemeral; only the uri
/// outlives matching (it feeds the playlist build).
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogCandidate {
    pub id: String,
    pub title: String,
    pub artists: Vec<String>,
    pub album: String,
    pub uri: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CatalogPlaylist {
    pub id: String,
    pub name: String,
}

/// Catalog collaborator seam. `add_playlist_items` chunks internally to
/// the catalog's per-call item limit.
#[async_trait]
pub trait Catalog: Send + Sync {
    async fn search_top_result(&self, query: &str)
        -> Result<Option<CatalogCandidate>, SyncError>;
    async fn my_playlists(&self) -> Result<Vec<CatalogPlaylist>, SyncError>;
    async fn create_playlist(&self, name: &str)
        -> Result<CatalogPlaylist, SyncError>;
    async fn add_playlist_items(&self, playlist_id: &str, uris: &[String])
        -> Result<(), SyncError>;
}

/// Query is built from title and artist only. Album is excluded because
/// the source catalog suffixes albums with " - EP" / " - Single" where
/// Spotify doesn't, and year is excluded because early-January lists
/// can carry tracks from the previous year. Policy, not an oversight.
pub fn build_query(track: &ScrapedTrack) -> String {
    format!(
        "track:{} artist:{}",
        normalize_field(&track.title),
        normalize_field(&track.artist),
    )
}

pub struct Matcher {
    catalog: Arc<dyn Catalog>,
    concurrency: usize,
}

impl Matcher {
    pub fn new(catalog: Arc<dyn Catalog>, concurrency: usize) -> Self {
        Self { catalog, concurrency: concurrency.max(1) }
    }

    /// Exactly one search request; `Ok(None)` when the catalog has no
    /// results. Transport/auth/rate-limit failures surface as errors
    /// and the caller decides (the batch path skips and continues).
    pub async fn match_track(&self, track: &ScrapedTrack)
        -> Result<Option<CatalogCandidate>, SyncError> {
        self.catalog.search_top_result(&build_query(track)).await
    }

    /// Matches a batch under a bounded worker pool. Results line up
    /// with the input by index regardless of completion order. A failed
    /// lookup is recovered here as a miss so one bad catalog call never
    /// sinks the run.
    pub async fn match_all(&self, tracks: &[ScrapedTrack])
        -> Vec<Option<CatalogCandidate>> {

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut handles = Vec::with_capacity(tracks.len());

        for track in tracks {
            let semaphore = semaphore.clone();
            let catalog = self.catalog.clone();
            let query = build_query(track);
            let title = track.title.clone();
            let artist = track.artist.clone();

            handles.push(tokio::spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return None;
                };
                match catalog.search_top_result(&query).await {
                    Ok(candidate) => {
                        if candidate.is_none() {
                            debug!(%title, %artist, "catalog.miss");
                        }
                        candidate
                    }
                    Err(e) => {
                        warn!(
                            error = %e, %title, %artist,
                            "catalog search failed, recording as not found"
                        );
                        None
                    }
                }
            }));
        }

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            results.push(handle.await.unwrap_or(None));
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::time::sleep;

    fn track(title: &str, artist: &str) -> ScrapedTrack {
        ScrapedTrack {
            title: title.to_string(),
            artist: artist.to_string(),
            album: "Album - EP".to_string(),
            duration_ms: 180_000,
            year: 2022,
        }
    }

    fn candidate(id: &str) -> CatalogCandidate {
        CatalogCandidate {
            id: id.to_string(),
            title: id.to_string(),
            artists: vec!["someone".to_string()],
            album: "album".to_string(),
            uri: format!("spotify:track:{id}"),
        }
    }

    struct FakeCatalog {
        hits: HashMap<String, CatalogCandidate>,
        errors: Vec<String>,
        delays: HashMap<String, u64>,
        queries: Mutex<Vec<String>>,
    }

    impl FakeCatalog {
        fn new() -> Self {
            Self {
                hits: HashMap::new(),
                errors: Vec::new(),
                delays: HashMap::new(),
                queries: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Catalog for FakeCatalog {
        async fn search_top_result(&self, query: &str)
            -> Result<Option<CatalogCandidate>, SyncError> {
            self.queries.lock().unwrap().push(query.to_string());
            if let Some(ms) = self.delays.get(query) {
                sleep(Duration::from_millis(*ms)).await;
            }
            if self.errors.iter().any(|q| q == query) {
                return Err(SyncError::Catalog("rate limited".to_string()));
            }
            Ok(self.hits.get(query).cloned())
        }
        async fn my_playlists(&self) -> Result<Vec<CatalogPlaylist>, SyncError> {
            Ok(Vec::new())
        }
        async fn create_playlist(&self, name: &str)
            -> Result<CatalogPlaylist, SyncError> {
            Ok(CatalogPlaylist { id: "p1".to_string(), name: name.to_string() })
        }
        async fn add_playlist_items(&self, _playlist_id: &str, _uris: &[String])
            -> Result<(), SyncError> {
            Ok(())
        }
    }

    #[test]
    fn query_uses_normalized_title_and_artist_only() {
        let q = build_query(&track(" My Song ", "The ARTIST"));
        assert_eq!(q, "track:my song artist:the artist");
        assert!(!q.contains("album"));
        assert!(!q.contains("2022"));
    }

    #[tokio::test]
    async fn no_results_is_none_not_error() {
        let matcher = Matcher::new(Arc::new(FakeCatalog::new()), 2);
        let result = matcher.match_track(&track("unknown", "nobody")).await;
        assert!(matches!(result, Ok(None)));
    }

    #[tokio::test]
    async fn match_track_returns_the_top_hit() {
        let mut catalog = FakeCatalog::new();
        catalog.hits.insert(
            "track:song artist:artist".to_string(), candidate("t1"),
        );
        let matcher = Matcher::new(Arc::new(catalog), 2);

        let hit = matcher.match_track(&track("Song", "Artist")).await.unwrap();
        assert_eq!(hit.unwrap().id, "t1");
    }

    #[tokio::test]
    async fn match_all_preserves_input_order() {
        let mut catalog = FakeCatalog::new();
        catalog.hits.insert("track:slow artist:a".to_string(), candidate("slow"));
        catalog.hits.insert("track:fast artist:b".to_string(), candidate("fast"));
        // first track finishes last
        catalog.delays.insert("track:slow artist:a".to_string(), 80);
        let matcher = Matcher::new(Arc::new(catalog), 4);

        let results = matcher
            .match_all(&[track("slow", "a"), track("fast", "b")])
            .await;

        assert_eq!(results[0].as_ref().unwrap().id, "slow");
        assert_eq!(results[1].as_ref().unwrap().id, "fast");
    }

    #[tokio::test]
    async fn match_all_recovers_per_track_errors() {
        let mut catalog = FakeCatalog::new();
        catalog.hits.insert("track:good artist:a".to_string(), candidate("good"));
        catalog.errors.push("track:bad artist:b".to_string());
        let matcher = Matcher::new(Arc::new(catalog), 2);

        let results = matcher
            .match_all(&[track("bad", "b"), track("good", "a")])
            .await;

        assert!(results[0].is_none());
        assert_eq!(results[1].as_ref().unwrap().id, "good");
    }

    #[tokio::test]
    async fn one_search_per_track() {
        let catalog = Arc::new(FakeCatalog::new());
        let matcher = Matcher::new(catalog.clone(), 2);

        matcher.match_all(&[track("a", "x"), track("b", "y")]).await;
        assert_eq!(catalog.queries.lock().unwrap().len(), 2);
    }
}
