//! Segment recognition under a shared rate limit.
//!
//! A [`RecognitionService`] turns an audio artifact into the raw JSON answer
//! of some music-identification backend.  [`RecognitionClient`] wraps a
//! service with a [`RateLimiter`] and normalizes the answer into a
//! [`TrackMatch`].  Failures of any kind are logged and become `None`.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::RecognitionError;
use crate::rate_limiter::RateLimiter;

/// A backend that identifies the music in one audio file.
#[async_trait]
pub trait RecognitionService: Send + Sync {
    /// Short label used in log messages.
    fn name(&self) -> &str;

    /// Identify `artifact`.  The returned document carries a `track` object
    /// when something was found and a `matches` array listing the
    /// fingerprint hits.
    async fn recognize(&self, artifact: &Path) -> Result<Value, RecognitionError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceTier {
    High,
    Medium,
    Low,
}

impl ConfidenceTier {
    /// Few distinct fingerprint hits means an unambiguous answer.
    pub fn from_match_count(match_count: usize) -> Self {
        match match_count {
            0..=5 => ConfidenceTier::High,
            6..=15 => ConfidenceTier::Medium,
            _ => ConfidenceTier::Low,
        }
    }
}

impl fmt::Display for ConfidenceTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConfidenceTier::High => "high",
            ConfidenceTier::Medium => "medium",
            ConfidenceTier::Low => "low",
        };
        f.write_str(s)
    }
}

/// One recognized track at a position in the recording.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackMatch {
    pub title: String,
    pub artist: String,
    pub start_time: String,
    pub start_time_seconds: f64,
    pub source_url: String,
    pub match_count: usize,
    pub confidence_tier: ConfidenceTier,
}

impl TrackMatch {
    /// Build a match from a service response, or `None` when the response
    /// has no `track` object.
    pub fn from_payload(payload: &Value, start_time_seconds: f64) -> Option<Self> {
        let track = payload.get("track")?.as_object()?;
        let text = |key: &str, default: &str| {
            track
                .get(key)
                .and_then(Value::as_str)
                .unwrap_or(default)
                .to_string()
        };

        let match_count = count_distinct_matches(payload);
        Some(TrackMatch {
            title: text("title", "Unknown"),
            artist: text("subtitle", "Unknown"),
            start_time: format_timestamp(start_time_seconds),
            start_time_seconds,
            source_url: text("url", ""),
            match_count,
            confidence_tier: ConfidenceTier::from_match_count(match_count),
        })
    }
}

impl fmt::Display for TrackMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {} - {}", self.start_time, self.title, self.artist)
    }
}

/// `HH:MM:SS`, truncating fractional seconds.
pub fn format_timestamp(seconds: f64) -> String {
    let total = if seconds.is_finite() && seconds > 0.0 {
        seconds as u64
    } else {
        0
    };
    format!("{:02}:{:02}:{:02}", total / 3600, (total % 3600) / 60, total % 60)
}

fn match_id(entry: &Value) -> Option<String> {
    match entry.get("id")? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Number of distinct non-empty `matches[].id` values.
pub fn count_distinct_matches(payload: &Value) -> usize {
    let Some(matches) = payload.get("matches").and_then(Value::as_array) else {
        return 0;
    };
    matches.iter().filter_map(match_id).collect::<HashSet<_>>().len()
}

/// Ids that occur more than once, with their counts.
fn duplicate_ids(payload: &Value) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    if let Some(matches) = payload.get("matches").and_then(Value::as_array) {
        for id in matches.iter().filter_map(match_id) {
            *counts.entry(id).or_insert(0) += 1;
        }
    }
    counts.retain(|_, n| *n > 1);
    counts
}

/// Rate-limited front end to a [`RecognitionService`].
#[derive(Clone)]
pub struct RecognitionClient {
    service: Arc<dyn RecognitionService>,
    limiter: Arc<RateLimiter>,
    debug: bool,
}

impl RecognitionClient {
    pub fn new(service: Arc<dyn RecognitionService>, limiter: Arc<RateLimiter>) -> Self {
        Self {
            service,
            limiter,
            debug: false,
        }
    }

    /// Log full responses and duplicate match ids at debug level.
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Recognize one artifact.  Never fails: every error is logged and
    /// reported as `None`.
    pub async fn recognize(&self, artifact: &Path, start_time_seconds: f64) -> Option<TrackMatch> {
        let timestamp = format_timestamp(start_time_seconds);

        let permit = match self.limiter.acquire().await {
            Ok(permit) => permit,
            Err(e) => {
                error!("[{}] Error recognizing segment at {}: {}", self.service.name(), timestamp, e);
                return None;
            }
        };
        let response = self.service.recognize(artifact).await;
        drop(permit);

        let payload = match response {
            Ok(payload) => {
                self.limiter.report_success().await;
                payload
            }
            Err(e) => {
                self.limiter.report_failure().await;
                error!("[{}] Error recognizing segment at {}: {}", self.service.name(), timestamp, e);
                return None;
            }
        };

        if self.debug {
            debug!("Full response for segment at {}: {}", timestamp, payload);
            let duplicates = duplicate_ids(&payload);
            if !duplicates.is_empty() {
                debug!("Duplicate match ids at {}: {:?}", timestamp, duplicates);
            }
        }

        match TrackMatch::from_payload(&payload, start_time_seconds) {
            Some(track) => {
                info!(
                    "Found track at {}: {} - {} ({} matches, {} confidence)",
                    timestamp, track.title, track.artist, track.match_count, track.confidence_tier
                );
                Some(track)
            }
            None => {
                warn!("No track found at {}", timestamp);
                None
            }
        }
    }
}
