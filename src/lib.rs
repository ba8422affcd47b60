pub mod audio;
pub mod audio_analysis;
pub mod boundary;
pub mod config;
pub mod dedup;
pub mod error;
pub mod fingerprinting;
pub mod output;
pub mod pipeline;
pub mod rate_limiter;
pub mod recognition;
pub mod segment;
pub mod shazam;
pub mod songrec;
pub mod task_registry;
pub mod wavfile;

pub use audio::{load_audio, AudioBuffer};
pub use boundary::{BoundaryDetector, BoundaryList};
pub use config::Config;
pub use dedup::dedupe;
pub use error::{AnalysisError, ArtifactError, ConfigError, InputError, RecognitionError};
pub use pipeline::{CancelToken, Phase, PipelineConfig, PipelineOrchestrator, Progress, Tracklist};
pub use rate_limiter::RateLimiter;
pub use recognition::{ConfidenceTier, RecognitionClient, RecognitionService, TrackMatch};
pub use segment::{ArtifactWorkspace, Segment, SegmentArtifact};
pub use task_registry::TaskRegistry;
