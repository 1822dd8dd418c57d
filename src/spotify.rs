//!
//! src/spotify.rs
//!
//! Spotify catalog client: refresh-token auth, track search, playlist
//! lookup/creation and batched playlist-item adds
//!

use async_trait::async_trait;
use reqwest::{Client, header};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use url::Url;

use crate::config::{HttpConfig, RetryConfig, SpotifyConfig};
use crate::errors::SyncError;
use crate::http::http_with_retry;
use crate::matcher::{Catalog, CatalogCandidate, CatalogPlaylist};

/// Spotify caps playlist-add calls at 100 uris
pub const ADD_ITEMS_LIMIT: usize = 100;

/// Splits uris into append-order chunks no larger than `limit`.
pub fn uri_batches(uris: &[String], limit: usize)
    -> impl Iterator<Item = &[String]> {
    uris.chunks(limit.max(1))
}

#[derive(Debug, Default, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    tracks: TrackPage,
}

#[derive(Debug, Default, Deserialize)]
struct TrackPage {
    #[serde(default)]
    items: Vec<TrackItem>,
}

#[derive(Debug, Default, Deserialize)]
struct TrackItem {
    #[serde(default)]
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    uri: String,
    #[serde(default)]
    artists: Vec<ArtistRef>,
    #[serde(default)]
    album: AlbumRef,
}

#[derive(Debug, Default, Deserialize)]
struct ArtistRef {
    #[serde(default)]
    name: String,
}

#[derive(Debug, Default, Deserialize)]
struct AlbumRef {
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct Page<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PlaylistItem {
    id: String,
    name: String,
}

pub struct SpotifyClient {
    http: Client,
    cfg: SpotifyConfig,
    retry: RetryConfig,
    bearer: Mutex<Option<String>>,
}

impl SpotifyClient {
    pub fn new(http_cfg: &HttpConfig, cfg: &SpotifyConfig) ->
        Result<Self, SyncError> {

        let http = crate::http::json_client(http_cfg)?;
        Ok( Self {
            http,
            cfg: cfg.clone(),
            retry: http_cfg.retry.clone(),
            bearer: Mutex::new(None),
        })
    }

    /// Access token via the refresh-token grant, fetched lazily and
    /// reused for the rest of the run.
    async fn bearer(&self) -> Result<String, SyncError> {
        let mut guard = self.bearer.lock().await;
        if let Some(token) = guard.as_ref() {
            return Ok(token.clone());
        }

        let request = self.http
            .post(self.cfg.token_url.clone())
            .basic_auth(&self.cfg.client_id, Some(&self.cfg.client_secret))
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", self.cfg.refresh_token.as_str()),
            ]);

        let value = http_with_retry(request, &self.retry, SyncError::Catalog).await?;
        let token = value["access_token"].as_str()
            .ok_or_else(|| SyncError::Catalog(
                "token response missing access_token".to_string()
            ))?
            .to_string();

        *guard = Some(token.clone());
        Ok(token)
    }

    async fn paginated<T: DeserializeOwned>(&self, start: Url, bearer: &str)
        -> Result<Vec<T>, SyncError> {

        let mut next = Some(start);
        let mut items = Vec::new();

        while let Some(url) = next.take() {
            let request = self.http.get(url).bearer_auth(bearer);
            let value = http_with_retry(request, &self.retry, SyncError::Catalog)
                .await?;
            let page: Page<T> = serde_json::from_value(value)?;

            items.extend(page.items);
            next = match page.next {
                Some(url) => Some(Url::parse(&url).map_err(|e| {
                    SyncError::Catalog(format!("bad pagination url: {e}"))
                })?),
                None => None,
            };
        }

        Ok(items)
    }
}

#[async_trait]
impl Catalog for SpotifyClient {
    /// GET /v1/search?type=track&q=...&limit=1
    async fn search_top_result(&self, query: &str)
        -> Result<Option<CatalogCandidate>, SyncError> {

        let bearer = self.bearer().await?;
        let url = self.cfg.api_base.join("search").unwrap();
        let request = self.http.get(url)
            .bearer_auth(&bearer)
            .query(&[
                ("type", "track"),
                ("q", query),
                ("limit", "1"),
            ]);

        let value = http_with_retry(request, &self.retry, SyncError::Catalog).await?;
        let parsed: SearchResponse = serde_json::from_value(value)?;

        Ok(parsed.tracks.items.into_iter().next().map(|item| CatalogCandidate {
            id: item.id,
            title: item.name,
            artists: item.artists.into_iter().map(|a| a.name).collect(),
            album: item.album.name,
            uri: item.uri,
        }))
    }

    /// GET /v1/me/playlists, following `next` links
    async fn my_playlists(&self) -> Result<Vec<CatalogPlaylist>, SyncError> {
        let bearer = self.bearer().await?;
        let mut url = self.cfg.api_base.join("me/playlists").unwrap();
        url.query_pairs_mut().append_pair("limit", "50");

        let items: Vec<PlaylistItem> = self.paginated(url, &bearer).await?;
        Ok(items.into_iter()
            .map(|p| CatalogPlaylist { id: p.id, name: p.name })
            .collect())
    }

    /// POST /v1/users/{user}/playlists
    async fn create_playlist(&self, name: &str)
        -> Result<CatalogPlaylist, SyncError> {

        let bearer = self.bearer().await?;
        let url = self.cfg.api_base
            .join(&format!("users/{}/playlists", self.cfg.user_id))
            .unwrap();
        let request = self.http.post(url)
            .bearer_auth(&bearer)
            .header(header::CONTENT_TYPE, "application/json")
            .json(&serde_json::json!({
                "name": name,
                "description": "",
                "public": true,
                "collaborative": false,
            }));

        let value = http_with_retry(request, &self.retry, SyncError::Catalog).await?;
        let playlist: PlaylistItem = serde_json::from_value(value)?;
        Ok(CatalogPlaylist { id: playlist.id, name: playlist.name })
    }

    /// POST /v1/playlists/{id}/tracks, at most ADD_ITEMS_LIMIT uris per call
    async fn add_playlist_items(&self, playlist_id: &str, uris: &[String])
        -> Result<(), SyncError> {

        let bearer = self.bearer().await?;
        let url = self.cfg.api_base
            .join(&format!("playlists/{playlist_id}/tracks"))
            .unwrap();

        for batch in uri_batches(uris, ADD_ITEMS_LIMIT) {
            let request = self.http.post(url.clone())
                .bearer_auth(&bearer)
                .json(&serde_json::json!({ "uris": batch }));
            http_with_retry(request, &self.retry, SyncError::Catalog).await?;
        }

        Ok(())
    }
}
