//! Order-preserving removal of repeated track identities.

use std::collections::HashSet;

use crate::recognition::TrackMatch;

fn identity(track: &TrackMatch) -> (String, String) {
    (track.artist.to_lowercase(), track.title.to_lowercase())
}

/// Keep the first match per case-insensitive (artist, title).
pub fn dedupe(matches: Vec<TrackMatch>) -> Vec<TrackMatch> {
    let mut seen = HashSet::new();
    matches
        .into_iter()
        .filter(|track| seen.insert(identity(track)))
        .collect()
}
