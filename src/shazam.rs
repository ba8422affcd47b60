//! Shazam song recognition API client.
//!
//! Fingerprints audio locally and posts the signature to the
//! reverse-engineered Shazam tag endpoint.
//!
//! # Example
//! ```no_run
//! use tracklister::shazam::Shazam;
//!
//! let shazam = Shazam::new();
//! // From raw 16-bit 16 kHz mono PCM samples:
//! // let response = shazam.recognize_from_pcm(&samples)?;
//! // From a file:
//! // let response = shazam.recognize_from_file(Path::new("segment.wav"))?;
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use rand::seq::SliceRandom;
use serde_json::Value;

use crate::error::RecognitionError;
use crate::fingerprinting::algorithm::SignatureGenerator;
use crate::fingerprinting::communication::{get_signature_json, Signature};
use crate::fingerprinting::signature_format::DecodedSignature;
use crate::recognition::RecognitionService;

const SEARCH_FROM_FILE_URL: &str = concat!(
    "https://amp.shazam.com/discovery/v5/{language}/{endpoint_country}/{device}/-/tag",
    "/{uuid_1}/{uuid_2}?sync=true&webv3=true&sampling=true",
    "&connected=&shazamapiversion=v3&sharehub=true&hubv5minorversion=v5.1&hidelb=true&video=v3"
);

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (iPhone; CPU iPhone OS 15_0 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/15.0 Mobile/15E148 Safari/604.1",
    "Mozilla/5.0 (iPhone; CPU iPhone OS 14_7_1 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/14.1.2 Mobile/15E148 Safari/604.1",
    "Mozilla/5.0 (iPad; CPU OS 15_0 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/15.0 Mobile/15E148 Safari/604.1",
    "Mozilla/5.0 (iPhone; CPU iPhone OS 14_6 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/14.1.1 Mobile/15E148 Safari/604.1",
    "Mozilla/5.0 (iPad; CPU OS 14_7_1 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/14.1.2 Mobile/15E148 Safari/604.1",
];

const DEVICES: &[&str] = &["iphone", "android", "web"];

pub const DEFAULT_SEGMENT_SECONDS: u32 = 12;

/// Shazam API client.  Cheap to clone; clones share the HTTP agent.
#[derive(Clone)]
pub struct Shazam {
    language: String,
    endpoint_country: String,
    segment_seconds: u32,
    agent: ureq::Agent,
}

impl Default for Shazam {
    fn default() -> Self {
        Self::new()
    }
}

impl Shazam {
    /// Default settings: language "en-US", country "GB", 12 s fingerprint window.
    pub fn new() -> Self {
        Self::with_config("en-US", "GB", DEFAULT_SEGMENT_SECONDS)
    }

    pub fn with_config(language: &str, endpoint_country: &str, segment_seconds: u32) -> Self {
        Self {
            language: language.to_string(),
            endpoint_country: endpoint_country.to_string(),
            segment_seconds: segment_seconds.max(1),
            agent: ureq::AgentBuilder::new()
                .timeout(Duration::from_secs(20))
                .build(),
        }
    }

    /// Recognize raw signed 16-bit **16 kHz mono** PCM samples.
    pub fn recognize_from_pcm(&self, samples: &[i16]) -> Result<Value, RecognitionError> {
        self.recognize_signature(&SignatureGenerator::make_signature_from_buffer(samples))
    }

    /// Recognize an audio file (WAV, MP3, OGG, FLAC).
    ///
    /// The file is decoded, converted to 16 kHz mono, and a centred window of
    /// `segment_seconds` is fingerprinted.
    pub fn recognize_from_file(&self, path: &Path) -> Result<Value, RecognitionError> {
        let signature = SignatureGenerator::make_signature_from_file(path, self.segment_seconds)?;
        self.recognize_signature(&signature)
    }

    fn recognize_signature(&self, signature: &DecodedSignature) -> Result<Value, RecognitionError> {
        debug!(
            "Signature: {} peaks over {} ms",
            signature.peak_count(),
            signature.duration_ms()
        );
        let sig = get_signature_json(signature).map_err(|e| RecognitionError::Artifact(e.to_string()))?;
        self.send_recognize_request(&sig)
    }

    fn tag_url(&self, device: &str) -> String {
        SEARCH_FROM_FILE_URL
            .replace("{language}", &self.language)
            .replace("{endpoint_country}", &self.endpoint_country)
            .replace("{device}", device)
            .replace("{uuid_1}", &uuid::Uuid::new_v4().to_string().to_uppercase())
            .replace("{uuid_2}", &uuid::Uuid::new_v4().to_string().to_uppercase())
    }

    fn send_recognize_request(&self, sig: &Signature) -> Result<Value, RecognitionError> {
        let mut rng = rand::thread_rng();
        let device = DEVICES.choose(&mut rng).unwrap_or(&"web");
        let user_agent = USER_AGENTS.choose(&mut rng).unwrap_or(&USER_AGENTS[0]);

        let response = self
            .agent
            .post(&self.tag_url(device))
            .set("X-Shazam-Platform", "IPHONE")
            .set("X-Shazam-AppVersion", "14.1.0")
            .set("Accept", "*/*")
            .set("Accept-Language", &self.language)
            .set("Accept-Encoding", "gzip, deflate")
            .set("User-Agent", user_agent)
            .send_json(serde_json::to_value(sig)?)?;

        response
            .into_json()
            .map_err(|e| RecognitionError::Malformed(e.to_string()))
    }
}

#[async_trait]
impl RecognitionService for Shazam {
    fn name(&self) -> &str {
        "shazam"
    }

    async fn recognize(&self, artifact: &Path) -> Result<Value, RecognitionError> {
        let client = self.clone();
        let path: PathBuf = artifact.to_path_buf();
        tokio::task::spawn_blocking(move || client.recognize_from_file(&path))
            .await
            .map_err(|e| RecognitionError::Task(e.to_string()))?
    }
}
