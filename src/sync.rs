//!
//! src/sync.rs
//!
//! Drives a full run for one year: scrape, reconcile against the store
//! snapshot, match against the catalog, append rows, optionally build
//! the playlist
//!

use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use tracing::info;

use crate::errors::SyncError;
use crate::identity::derive_identity;
use crate::matcher::{Catalog, Matcher};
use crate::reconcile::reconcile;
use crate::scrape::LovedSource;
use crate::store::{RecordedRow, RowStore, TrackStore};

#[derive(Debug, Default)]
pub struct SyncReport {
    pub year: i32,
    pub scraped: usize,
    pub new_tracks: usize,
    pub matched: usize,
    pub appended: usize,
    pub playlist: Option<String>,
}

pub struct Orchestrator<S: LovedSource, R: RowStore> {
    source: S,
    store: TrackStore<R>,
    matcher: Matcher,
    catalog: Arc<dyn Catalog>,
    playlist_name_prefix: Option<String>,
}

impl<S: LovedSource, R: RowStore> Orchestrator<S, R> {
    pub fn new(
        source: S,
        store: TrackStore<R>,
        catalog: Arc<dyn Catalog>,
        match_concurrency: usize,
        playlist_name_prefix: Option<String>,
    ) -> Self {
        Self {
            source,
            store,
            matcher: Matcher::new(catalog.clone(), match_concurrency),
            catalog,
            playlist_name_prefix,
        }
    }

    /// One linear pass; scrape and snapshot-load failures abort the
    /// run, per-track catalog misses and failures are recorded as
    /// found=false. A flush failure also aborts, with the append-batch
    /// caveat that the caller must reload before retrying.
    pub async fn run(&mut self, year: i32) -> Result<SyncReport, SyncError> {
        let scraped = self.source.scrape_year(year).await?;
        let scraped_count = scraped.len();
        info!(year, count = scraped_count, "sync.scraped");

        let snapshot = self.store.load().await?;
        info!(existing = snapshot.len(), "sync.snapshot");

        let fresh = reconcile(scraped, &snapshot);
        info!(year, new = fresh.len(), "sync.reconciled");

        let matches = self.matcher.match_all(&fresh).await;
        let matched = matches.iter().filter(|m| m.is_some()).count();
        info!(year, matched, misses = fresh.len() - matched, "sync.matched");

        // every row staged in this run shares the run timestamp
        let added_at = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);

        let mut uris = Vec::new();
        let mut rows = Vec::with_capacity(fresh.len());
        for (track, candidate) in fresh.iter().zip(&matches) {
            if let Some(candidate) = candidate {
                uris.push(candidate.uri.clone());
            }
            rows.push(RecordedRow {
                identity: derive_identity(
                    &track.title,
                    &track.artist,
                    &track.album,
                    &track.year.to_string(),
                ),
                title: track.title.clone(),
                artist: track.artist.clone(),
                album: track.album.clone(),
                year: track.year,
                found: candidate.is_some(),
                added_at: added_at.clone(),
            });
        }

        self.store.stage(rows);
        let appended = self.store.flush().await?;
        info!(year, appended, "sync.flushed");

        let playlist = match &self.playlist_name_prefix {
            Some(prefix) if !uris.is_empty() => {
                let name = format!("{prefix} {year}");
                Some(self.build_playlist(&name, &uris).await?)
            }
            _ => None,
        };

        Ok(SyncReport {
            year,
            scraped: scraped_count,
            new_tracks: fresh.len(),
            matched,
            appended,
            playlist,
        })
    }

    /// Reuses a playlist with the target name when one exists,
    /// otherwise creates it, then adds the matched uris.
    async fn build_playlist(&self, name: &str, uris: &[String])
        -> Result<String, SyncError> {

        let existing = self.catalog.my_playlists().await?;
        let playlist = match existing.into_iter().find(|p| p.name == name) {
            Some(playlist) => playlist,
            None => self.catalog.create_playlist(name).await?,
        };

        self.catalog.add_playlist_items(&playlist.id, uris).await?;
        info!(playlist = %playlist.id, items = uris.len(), "sync.playlist");
        Ok(playlist.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::{CatalogCandidate, CatalogPlaylist, build_query};
    use crate::scrape::ScrapedTrack;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    fn track(title: &str, artist: &str, album: &str, year: i32) -> ScrapedTrack {
        ScrapedTrack {
            title: title.to_string(),
            artist: artist.to_string(),
            album: album.to_string(),
            duration_ms: 200_000,
            year,
        }
    }

    fn recorded(track: &ScrapedTrack) -> RecordedRow {
        RecordedRow {
            identity: derive_identity(
                &track.title, &track.artist, &track.album,
                &track.year.to_string(),
            ),
            title: track.title.clone(),
            artist: track.artist.clone(),
            album: track.album.clone(),
            year: track.year,
            found: true,
            added_at: "2024-04-16T00:00:00.000Z".to_string(),
        }
    }

    struct FakeSource {
        tracks: Vec<ScrapedTrack>,
    }

    #[async_trait]
    impl LovedSource for FakeSource {
        async fn scrape_year(&self, _year: i32)
            -> Result<Vec<ScrapedTrack>, SyncError> {
            Ok(self.tracks.clone())
        }
    }

    #[derive(Default)]
    struct MemoryStore {
        rows: Mutex<Vec<RecordedRow>>,
    }

    #[async_trait]
    impl RowStore for MemoryStore {
        async fn load_all(&self) -> Result<Vec<RecordedRow>, SyncError> {
            Ok(self.rows.lock().unwrap().clone())
        }
        async fn append_batch(&self, rows: &[RecordedRow])
            -> Result<usize, SyncError> {
            self.rows.lock().unwrap().extend_from_slice(rows);
            Ok(rows.len())
        }
    }

    #[derive(Default)]
    struct FakeCatalog {
        hits: HashMap<String, CatalogCandidate>,
        playlists: Mutex<Vec<CatalogPlaylist>>,
        added: Mutex<Vec<(String, Vec<String>)>>,
    }

    impl FakeCatalog {
        fn with_hit_for(mut self, track: &ScrapedTrack) -> Self {
            let id = format!("id-{}", track.title);
            self.hits.insert(build_query(track), CatalogCandidate {
                id: id.clone(),
                title: track.title.clone(),
                artists: vec![track.artist.clone()],
                album: track.album.clone(),
                uri: format!("spotify:track:{id}"),
            });
            self
        }
    }

    #[async_trait]
    impl Catalog for FakeCatalog {
        async fn search_top_result(&self, query: &str)
            -> Result<Option<CatalogCandidate>, SyncError> {
            Ok(self.hits.get(query).cloned())
        }
        async fn my_playlists(&self) -> Result<Vec<CatalogPlaylist>, SyncError> {
            Ok(self.playlists.lock().unwrap().clone())
        }
        async fn create_playlist(&self, name: &str)
            -> Result<CatalogPlaylist, SyncError> {
            let playlist = CatalogPlaylist {
                id: format!("pl-{}", self.playlists.lock().unwrap().len()),
                name: name.to_string(),
            };
            self.playlists.lock().unwrap().push(playlist.clone());
            Ok(playlist)
        }
        async fn add_playlist_items(&self, playlist_id: &str, uris: &[String])
            -> Result<(), SyncError> {
            self.added.lock().unwrap()
                .push((playlist_id.to_string(), uris.to_vec()));
            Ok(())
        }
    }

    #[tokio::test]
    async fn appends_only_new_tracks_with_shared_timestamp() {
        // ten identities already recorded across 2020/2021
        let store_backend = MemoryStore::default();
        for i in 0..9 {
            let t = track(&format!("old {i}"), "artist", "album", 2020 + (i % 2));
            store_backend.rows.lock().unwrap().push(recorded(&t));
        }
        let collider = track("kept around", "artist", "album", 2021);
        store_backend.rows.lock().unwrap().push(recorded(&collider));

        let fresh_a = track("brand new", "artist", "album", 2022);
        let fresh_b = track("also new", "artist", "album", 2022);

        // the 2022 scrape resurfaces a track recorded in the 2021 run
        let source = FakeSource {
            tracks: vec![collider.clone(), fresh_a.clone(), fresh_b.clone()],
        };
        let catalog = Arc::new(
            FakeCatalog::default().with_hit_for(&fresh_a).with_hit_for(&fresh_b),
        );

        let mut orchestrator = Orchestrator::new(
            source, TrackStore::new(store_backend), catalog, 2, None,
        );
        let report = orchestrator.run(2022).await.unwrap();

        assert_eq!(report.scraped, 3);
        assert_eq!(report.new_tracks, 2);
        assert_eq!(report.matched, 2);
        assert_eq!(report.appended, 2);
        assert!(report.playlist.is_none());

        let snapshot = orchestrator.store.load().await.unwrap();
        assert_eq!(snapshot.len(), 12);
        let appended = &snapshot.rows[10..];
        assert_eq!(appended[0].title, "brand new");
        assert_eq!(appended[1].title, "also new");
        assert!(appended.iter().all(|r| r.found));
        assert_eq!(appended[0].added_at, appended[1].added_at);
    }

    #[tokio::test]
    async fn unmatched_track_is_recorded_as_not_found() {
        let found = track("findable", "artist", "album", 2022);
        let missing = track("nowhere", "artist", "album", 2022);

        let source = FakeSource { tracks: vec![found.clone(), missing.clone()] };
        let catalog = Arc::new(FakeCatalog::default().with_hit_for(&found));

        let mut orchestrator = Orchestrator::new(
            source, TrackStore::new(MemoryStore::default()), catalog, 2, None,
        );
        let report = orchestrator.run(2022).await.unwrap();

        assert_eq!(report.new_tracks, 2);
        assert_eq!(report.matched, 1);
        assert_eq!(report.appended, 2);

        let snapshot = orchestrator.store.load().await.unwrap();
        assert!(snapshot.rows[0].found);
        assert!(!snapshot.rows[1].found);
    }

    #[tokio::test]
    async fn builds_playlist_from_matched_uris_only() {
        let found = track("findable", "artist", "album", 2022);
        let missing = track("nowhere", "artist", "album", 2022);

        let source = FakeSource { tracks: vec![found.clone(), missing] };
        let catalog = Arc::new(FakeCatalog::default().with_hit_for(&found));

        let mut orchestrator = Orchestrator::new(
            source,
            TrackStore::new(MemoryStore::default()),
            catalog.clone(),
            2,
            Some("Loved Tracks".to_string()),
        );
        let report = orchestrator.run(2022).await.unwrap();

        let playlist_id = report.playlist.unwrap();
        let playlists = catalog.playlists.lock().unwrap();
        assert_eq!(playlists.len(), 1);
        assert_eq!(playlists[0].name, "Loved Tracks 2022");
        assert_eq!(playlists[0].id, playlist_id);

        let added = catalog.added.lock().unwrap();
        assert_eq!(added.len(), 1);
        assert_eq!(added[0].0, playlist_id);
        assert_eq!(added[0].1, vec!["spotify:track:id-findable".to_string()]);
    }

    #[tokio::test]
    async fn reuses_existing_playlist_by_name() {
        let found = track("findable", "artist", "album", 2022);
        let source = FakeSource { tracks: vec![found.clone()] };

        let catalog = FakeCatalog::default().with_hit_for(&found);
        catalog.playlists.lock().unwrap().push(CatalogPlaylist {
            id: "pl-existing".to_string(),
            name: "Loved Tracks 2022".to_string(),
        });
        let catalog = Arc::new(catalog);

        let mut orchestrator = Orchestrator::new(
            source,
            TrackStore::new(MemoryStore::default()),
            catalog.clone(),
            2,
            Some("Loved Tracks".to_string()),
        );
        let report = orchestrator.run(2022).await.unwrap();

        assert_eq!(report.playlist.as_deref(), Some("pl-existing"));
        assert_eq!(catalog.playlists.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn empty_year_appends_nothing() {
        let source = FakeSource { tracks: vec![] };
        let catalog = Arc::new(FakeCatalog::default());

        let mut orchestrator = Orchestrator::new(
            source,
            TrackStore::new(MemoryStore::default()),
            catalog,
            2,
            Some("Loved Tracks".to_string()),
        );
        let report = orchestrator.run(2023).await.unwrap();

        assert_eq!(report.scraped, 0);
        assert_eq!(report.appended, 0);
        // no uris, so no playlist either
        assert!(report.playlist.is_none());
    }
}
