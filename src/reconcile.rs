//!
//! src/reconcile.rs
//!
//! Filters a fresh scrape against the already-recorded identities,
//! leaving only new candidates in source-page order
//!

use std::collections::HashSet;

use crate::identity::{TrackIdentity, derive_identity};
use crate::scrape::ScrapedTrack;
use crate::store::TrackStoreSnapshot;

/// Keeps the first occurrence per identity within the batch (source
/// pages occasionally list a track twice), then drops anything already
/// in the store. Input order is preserved so appends stay chronological.
pub fn reconcile(scraped: Vec<ScrapedTrack>, snapshot: &TrackStoreSnapshot)
    -> Vec<ScrapedTrack> {

    let mut seen: HashSet<TrackIdentity> = HashSet::new();

    scraped.into_iter()
        .filter(|track| {
            let identity = derive_identity(
                &track.title,
                &track.artist,
                &track.album,
                &track.year.to_string(),
            );
            if !seen.insert(identity.clone()) {
                return false;
            }
            !snapshot.contains(&identity)
        })
        .collect()
}
