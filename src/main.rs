//!
//! src/main.rs
//!
//! Entry point: wires configuration, logging and the three collaborators
//! into the orchestrator, then runs a sync for each target year
//!

mod config;
mod errors;
mod logging;

mod http;
mod identity;
mod matcher;
mod reconcile;
mod scrape;
mod sheets;
mod spotify;
mod store;
mod sync;

use std::sync::Arc;

use chrono::{Datelike, Utc};

use crate::errors::SyncError;
use crate::matcher::Catalog;

/// Years come from the command line; no arguments means the current
/// UTC year.
fn target_years() -> Result<Vec<i32>, SyncError> {
    let years: Result<Vec<i32>, SyncError> = std::env::args()
        .skip(1)
        .map(|arg| arg.parse::<i32>().map_err(|_| {
            SyncError::Config(format!("not a year: {arg}"))
        }))
        .collect();

    let years = years?;
    if years.is_empty() {
        return Ok(vec![Utc::now().year()]);
    }
    Ok(years)
}

#[tokio::main]
async fn main() -> Result<(), SyncError> {
    let cfgs   = config::load_config()?;
    let _guard = logging::init_logging(&cfgs.logging)?;

    tracing::info!(
        service="loved-sync",
        version=%env!("CARGO_PKG_VERSION"),
        "starting"
    );

    let source  = scrape::ScrapeClient::new(&cfgs.http, &cfgs.scrape)?;
    let sheets  = sheets::SheetsClient::new(&cfgs.http, &cfgs.sheets)?;
    let catalog: Arc<dyn Catalog> =
        Arc::new(spotify::SpotifyClient::new(&cfgs.http, &cfgs.spotify)?);

    let mut orchestrator = sync::Orchestrator::new(
        source,
        store::TrackStore::new(sheets),
        catalog,
        cfgs.concurrency.match_concurrency,
        cfgs.spotify.playlist_name_prefix.clone(),
    );

    for year in target_years()? {
        let report = orchestrator.run(year).await?;
        tracing::info!(
            year = report.year,
            scraped = report.scraped,
            new = report.new_tracks,
            matched = report.matched,
            appended = report.appended,
            playlist = report.playlist.as_deref().unwrap_or("-"),
            "sync complete"
        );
    }

    Ok(())
}
