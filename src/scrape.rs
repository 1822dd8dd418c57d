//!
//! src/scrape.rs
//!
//! Scrapes a year's loved list: the loved-list page embeds an Apple
//! Music playlist, whose page carries the track list as a serialized
//! JSON island
//!

use async_trait::async_trait;
use reqwest::Client;
use scraper::{Html, Selector};
use serde::Deserialize;
use tracing::info;
use url::Url;

use crate::config::{HttpConfig, ScrapeConfig};
use crate::errors::SyncError;

/// Raw facts pulled off the source page. Lives for one scrape pass.
#[derive(Debug, Clone, PartialEq)]
pub struct ScrapedTrack {
    pub title: String,
    pub artist: String,
    pub album: String,
    pub duration_ms: i64,
    pub year: i32,
}

/// Scraping collaborator seam. An empty list means the year has no
/// published loved list; layout changes and unreachable pages are errors.
#[async_trait]
pub trait LovedSource: Send + Sync {
    async fn scrape_year(&self, year: i32) -> Result<Vec<ScrapedTrack>, SyncError>;
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AppleServerData {
    #[serde(default)]
    intent: AppleIntent,
    #[serde(default)]
    data: AppleSectionData,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AppleIntent {
    #[serde(default)]
    content_descriptor: AppleContentDescriptor,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AppleContentDescriptor {
    #[serde(default)]
    kind: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AppleSectionData {
    #[serde(default)]
    sections: Vec<AppleSection>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AppleSection {
    #[serde(default)]
    item_kind: String,
    #[serde(default)]
    items: Vec<AppleTrackListItem>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AppleTrackListItem {
    #[serde(default)]
    title: String,
    #[serde(default)]
    artist_name: String,
    #[serde(default)]
    duration: i64,
    #[serde(default)]
    tertiary_links: Vec<AppleTertiaryLink>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AppleTertiaryLink {
    #[serde(default)]
    title: String,
    #[serde(default)]
    segue: AppleSegue,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AppleSegue {
    #[serde(default)]
    destination: AppleDestination,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AppleDestination {
    #[serde(default)]
    content_descriptor: AppleContentDescriptor,
}

fn tracks_from_server_data(server_data: &[AppleServerData], year: i32)
    -> Vec<ScrapedTrack> {

    for entry in server_data {
        if entry.intent.content_descriptor.kind != "playlist" {
            continue;
        }
        for section in &entry.data.sections {
            if section.item_kind == "trackLockup" {
                return section.items.iter()
                    .map(|item| ScrapedTrack {
                        title: item.title.clone(),
                        artist: item.artist_name.clone(),
                        album: album_name(item),
                        duration_ms: item.duration,
                        year,
                    })
                    .collect();
            }
        }
    }

    Vec::new()
}

/// The track lockup links out to its album; that link's label is the
/// album name. Tracks without one (singles) get an empty album.
fn album_name(item: &AppleTrackListItem) -> String {
    item.tertiary_links.iter()
        .find(|link| link.segue.destination.content_descriptor.kind == "album")
        .map(|link| link.title.clone())
        .unwrap_or_default()
}

#[derive(Debug, Clone)]
pub struct ScrapeClient {
    http: Client,
    base: Url,
}

impl ScrapeClient {
    pub fn new(http_cfg: &HttpConfig, cfg: &ScrapeConfig) ->
        Result<Self, SyncError> {

        let http = crate::http::page_client(http_cfg, &cfg.user_agent)?;
        Ok( Self { http, base: cfg.loved_list_base.clone() } )
    }

    async fn page_text(&self, url: &str) -> Result<String, SyncError> {
        let resp = self.http.get(url).send().await
            .map_err(|e| SyncError::Scrape(format!("get {url}: {e}")))?;
        if !resp.status().is_success() {
            return Err(SyncError::Scrape(
                format!("get {url}: status {}", resp.status())
            ));
        }
        resp.text().await
            .map_err(|e| SyncError::Scrape(format!("read {url}: {e}")))
    }

    fn embed_playlist_url(page: &str) -> Option<String> {
        let document = Html::parse_document(page);
        let selector = Selector::parse(
            r#"iframe[src^="https://embed.music.apple"]"#
        ).ok()?;
        document.select(&selector)
            .filter_map(|e| e.value().attr("src"))
            .map(str::to_string)
            .next()
    }

    fn server_data_json(page: &str) -> Option<String> {
        let document = Html::parse_document(page);
        let selector = Selector::parse("#serialized-server-data").ok()?;
        document.select(&selector)
            .next()
            .map(|e| e.text().collect::<String>())
    }
}

#[async_trait]
impl LovedSource for ScrapeClient {
    async fn scrape_year(&self, year: i32) -> Result<Vec<ScrapedTrack>, SyncError> {
        let loved_url = self.base.join(&year.to_string())
            .map_err(|e| SyncError::Scrape(format!("loved list url {year}: {e}")))?;
        let page = self.page_text(loved_url.as_str()).await?;

        let Some(embed) = Self::embed_playlist_url(&page) else {
            info!(year, "no apple embed on loved list page, year unpublished");
            return Ok(Vec::new());
        };
        // the embed player page has no track data; the full page does
        let playlist_url = embed.replacen("embed.music.apple", "music.apple", 1);

        let page = self.page_text(&playlist_url).await?;
        let raw = Self::server_data_json(&page).ok_or_else(|| SyncError::Scrape(
            "serialized server data missing from playlist page".to_string()
        ))?;
        let server_data: Vec<AppleServerData> = serde_json::from_str(&raw)
            .map_err(|e| SyncError::Scrape(format!("apple server data: {e}")))?;

        Ok(tracks_from_server_data(&server_data, year))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SERVER_DATA: &str = r#"
    [
      {
        "intent": { "contentDescriptor": { "kind": "album" } },
        "data": { "sections": [] }
      },
      {
        "intent": { "contentDescriptor": { "kind": "playlist" } },
        "data": {
          "sections": [
            { "itemKind": "heroLockup", "items": [] },
            {
              "itemKind": "trackLockup",
              "items": [
                {
                  "title": "Song A",
                  "artistName": "Artist A",
                  "duration": 215000,
                  "tertiaryLinks": [
                    {
                      "title": "Somewhere",
                      "segue": { "destination": { "contentDescriptor": { "kind": "artist" } } }
                    },
                    {
                      "title": "Album A - EP",
                      "segue": { "destination": { "contentDescriptor": { "kind": "album" } } }
                    }
                  ]
                },
                {
                  "title": "Song B",
                  "artistName": "Artist B",
                  "duration": 187000,
                  "tertiaryLinks": []
                }
              ]
            }
          ]
        }
      }
    ]
    "#;

    #[test]
    fn extracts_tracks_from_playlist_intent() {
        let data: Vec<AppleServerData> = serde_json::from_str(SERVER_DATA).unwrap();
        let tracks = tracks_from_server_data(&data, 2022);

        assert_eq!(tracks.len(), 2);
        assert_eq!(tracks[0].title, "Song A");
        assert_eq!(tracks[0].artist, "Artist A");
        assert_eq!(tracks[0].album, "Album A - EP");
        assert_eq!(tracks[0].duration_ms, 215000);
        assert_eq!(tracks[0].year, 2022);
        // no album tertiary link
        assert_eq!(tracks[1].album, "");
    }

    #[test]
    fn no_playlist_intent_yields_empty() {
        let data: Vec<AppleServerData> =
            serde_json::from_str(r#"[{"intent":{"contentDescriptor":{"kind":"album"}},"data":{"sections":[]}}]"#)
                .unwrap();
        assert!(tracks_from_server_data(&data, 2022).is_empty());
    }

    #[test]
    fn finds_embed_iframe() {
        let page = r#"<html><body>
            <iframe src="https://other.example/embed"></iframe>
            <iframe src="https://embed.music.apple.com/us/playlist/p123"></iframe>
        </body></html>"#;
        let url = ScrapeClient::embed_playlist_url(page).unwrap();
        assert_eq!(url, "https://embed.music.apple.com/us/playlist/p123");

        assert!(ScrapeClient::embed_playlist_url("<html></html>").is_none());
    }

    #[test]
    fn finds_server_data_island() {
        let page = r#"<html><body>
            <script id="serialized-server-data" type="application/json">[{"x":1}]</script>
        </body></html>"#;
        let raw = ScrapeClient::server_data_json(page).unwrap();
        assert_eq!(raw.trim(), r#"[{"x":1}]"#);

        assert!(ScrapeClient::server_data_json("<html></html>").is_none());
    }
}
