//! End-to-end analysis of one recording.
//!
//! detect boundaries → extract each segment → recognize under the rate
//! limit → deduplicate.  Segments are processed strictly in order.  The
//! run's artifact workspace is removed on every exit path; if the run
//! future is dropped mid-flight the workspace's own drop does it.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};

use crate::audio::AudioBuffer;
use crate::boundary::BoundaryDetector;
use crate::dedup::dedupe;
use crate::error::AnalysisError;
use crate::recognition::{format_timestamp, RecognitionClient, TrackMatch};
use crate::segment::{ArtifactWorkspace, Segment};

/// Per-run analysis settings.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Seconds; shorter gaps between boundaries are merged.
    pub min_song_duration: f64,
    /// 0..=1; higher values admit more transition peaks.
    pub peak_threshold: f64,
    /// Parent directory for the per-run workspace (system temp dir if unset).
    pub artifact_dir: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            min_song_duration: 30.0,
            peak_threshold: 0.3,
            artifact_dir: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    DetectingBoundaries,
    Recognizing,
    Deduplicating,
    Complete,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    pub current_segment: usize,
    pub total_segments: usize,
    pub phase: Phase,
    pub message: String,
}

impl Progress {
    fn new(current_segment: usize, total_segments: usize, phase: Phase, message: impl Into<String>) -> Self {
        Self {
            current_segment,
            total_segments,
            phase,
            message: message.into(),
        }
    }
}

/// Cooperative cancellation, checked between segments.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Result of a completed run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tracklist {
    pub tracks: Vec<TrackMatch>,
    pub total_segments: usize,
    /// Matches found before deduplication.
    pub total_matches: usize,
}

pub struct PipelineOrchestrator {
    client: RecognitionClient,
    config: PipelineConfig,
}

impl PipelineOrchestrator {
    pub fn new(client: RecognitionClient, config: PipelineConfig) -> Self {
        Self { client, config }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub async fn run<F>(&self, buffer: AudioBuffer, progress: F) -> Result<Tracklist, AnalysisError>
    where
        F: FnMut(&Progress),
    {
        self.run_with_cancel(buffer, progress, &CancelToken::new()).await
    }

    pub async fn run_with_cancel<F>(
        &self,
        buffer: AudioBuffer,
        mut progress: F,
        cancel: &CancelToken,
    ) -> Result<Tracklist, AnalysisError>
    where
        F: FnMut(&Progress),
    {
        info!(
            "Analyzing {:.1}s of audio at {} Hz",
            buffer.duration_seconds(),
            buffer.sample_rate()
        );
        progress(&Progress::new(0, 0, Phase::DetectingBoundaries, "Detecting song boundaries"));

        let detector = BoundaryDetector::new(self.config.min_song_duration, self.config.peak_threshold);
        let (buffer, boundaries) = match tokio::task::spawn_blocking(move || {
            let boundaries = detector.detect(&buffer);
            (buffer, boundaries)
        })
        .await
        {
            Ok(result) => result,
            Err(e) => match e.try_into_panic() {
                Ok(panic) => std::panic::resume_unwind(panic),
                Err(_) => return Err(AnalysisError::Cancelled),
            },
        };
        let segments = boundaries.segments();

        let mut workspace = match &self.config.artifact_dir {
            Some(dir) => ArtifactWorkspace::new_in(dir)?,
            None => ArtifactWorkspace::new()?,
        };
        debug!("Artifact workspace {}", workspace.path().display());

        let outcome = self
            .recognize_segments(&buffer, &segments, &mut workspace, &mut progress, cancel)
            .await;
        drop(buffer);

        match workspace.cleanup() {
            Ok(removed) => debug!("Removed {} leftover artifacts", removed),
            Err(e) => warn!("Artifact cleanup failed: {}", e),
        }

        let matches = outcome?;
        let total_matches = matches.len();
        progress(&Progress::new(
            segments.len(),
            segments.len(),
            Phase::Deduplicating,
            "Removing duplicate tracks",
        ));
        let tracks = dedupe(matches);
        info!(
            "Found {} unique tracks ({} matches in {} segments)",
            tracks.len(),
            total_matches,
            segments.len()
        );
        progress(&Progress::new(segments.len(), segments.len(), Phase::Complete, "Analysis complete"));

        Ok(Tracklist {
            tracks,
            total_segments: segments.len(),
            total_matches,
        })
    }

    async fn recognize_segments<F>(
        &self,
        buffer: &AudioBuffer,
        segments: &[Segment],
        workspace: &mut ArtifactWorkspace,
        progress: &mut F,
        cancel: &CancelToken,
    ) -> Result<Vec<TrackMatch>, AnalysisError>
    where
        F: FnMut(&Progress),
    {
        let total = segments.len();
        let mut matches = Vec::new();

        for segment in segments {
            if cancel.is_cancelled() {
                info!("Analysis cancelled before segment {}/{}", segment.index + 1, total);
                return Err(AnalysisError::Cancelled);
            }

            let start = segment.start_time_seconds(buffer.sample_rate());
            info!(
                "Processing segment {}/{} at {}",
                segment.index + 1,
                total,
                format_timestamp(start)
            );

            match workspace.extract(buffer, segment) {
                Ok(artifact) => {
                    if let Some(track) = self.client.recognize(artifact.path(), start).await {
                        matches.push(track);
                    }
                    workspace.discard(artifact);
                }
                Err(e) if !e.is_systemic() => warn!("Skipping segment {}: {}", segment.index + 1, e),
                Err(e) => {
                    error!("Aborting analysis: {}", e);
                    return Err(e.into());
                }
            }

            progress(&Progress::new(
                segment.index + 1,
                total,
                Phase::Recognizing,
                format!("Processing segment {}/{}", segment.index + 1, total),
            ));
        }

        Ok(matches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boundary::tests::two_track_mix;
    use crate::rate_limiter::RateLimiter;
    use crate::error::RecognitionError;
    use crate::recognition::tests::{track, ScriptedService};
    use crate::recognition::RecognitionService;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::path::Path;
    use std::time::Duration;
    use tokio::sync::Notify;

    fn orchestrator(service: Arc<ScriptedService>, artifact_dir: &Path) -> PipelineOrchestrator {
        orchestrator_with(service, artifact_dir)
    }

    fn orchestrator_with(service: Arc<dyn RecognitionService>, artifact_dir: &Path) -> PipelineOrchestrator {
        let limiter = RateLimiter::new("test", 1, Duration::ZERO, Duration::from_millis(10), 0).shared();
        let config = PipelineConfig {
            artifact_dir: Some(artifact_dir.to_path_buf()),
            ..PipelineConfig::default()
        };
        PipelineOrchestrator::new(RecognitionClient::new(service, limiter), config)
    }

    fn leftover_files(dir: &Path) -> usize {
        std::fs::read_dir(dir).unwrap().count()
    }

    #[tokio::test]
    async fn test_run_dedupes_and_cleans_up() {
        let scratch = tempfile::tempdir().unwrap();
        let service = Arc::new(ScriptedService::new(vec![
            Some(track("One More Time", "Daft Punk", &["A", "A", "B"])),
            Some(track("ONE MORE TIME", "daft punk", &["C"])),
        ]));
        let pipeline = orchestrator(Arc::clone(&service), scratch.path());

        let mut phases = Vec::new();
        let tracklist = pipeline
            .run(two_track_mix(), |p| phases.push((p.phase, p.current_segment, p.total_segments)))
            .await
            .unwrap();

        assert_eq!(tracklist.total_segments, 2);
        assert_eq!(tracklist.total_matches, 2);
        assert_eq!(tracklist.tracks.len(), 1);
        assert_eq!(tracklist.tracks[0].match_count, 2);
        assert_eq!(tracklist.tracks[0].start_time, "00:00:00");
        assert_eq!(service.calls.load(Ordering::SeqCst), 2);

        assert_eq!(
            phases,
            vec![
                (Phase::DetectingBoundaries, 0, 0),
                (Phase::Recognizing, 1, 2),
                (Phase::Recognizing, 2, 2),
                (Phase::Deduplicating, 2, 2),
                (Phase::Complete, 2, 2),
            ]
        );
        assert_eq!(leftover_files(scratch.path()), 0);
    }

    #[tokio::test]
    async fn test_recognition_failures_are_absorbed() {
        let scratch = tempfile::tempdir().unwrap();
        let service = Arc::new(ScriptedService::new(vec![None, Some(track("Second", "Artist", &["X"]))]));
        let tracklist = orchestrator(service, scratch.path())
            .run(two_track_mix(), |_| {})
            .await
            .unwrap();

        assert_eq!(tracklist.tracks.len(), 1);
        assert_eq!(tracklist.tracks[0].title, "Second");
        assert!((tracklist.tracks[0].start_time_seconds - 300.0).abs() < 1.0);
        assert_eq!(leftover_files(scratch.path()), 0);
    }

    #[tokio::test]
    async fn test_cancel_mid_run_leaves_no_artifacts() {
        let scratch = tempfile::tempdir().unwrap();
        let service = Arc::new(ScriptedService::new(vec![
            Some(json!({"matches": []})),
            Some(json!({"matches": []})),
        ]));
        let pipeline = orchestrator(Arc::clone(&service), scratch.path());
        let cancel = CancelToken::new();
        let trigger = cancel.clone();

        let result = pipeline
            .run_with_cancel(
                two_track_mix(),
                move |p| {
                    if p.phase == Phase::Recognizing {
                        trigger.cancel();
                    }
                },
                &cancel,
            )
            .await;

        assert!(matches!(result, Err(AnalysisError::Cancelled)));
        assert_eq!(service.calls.load(Ordering::SeqCst), 1);
        assert_eq!(leftover_files(scratch.path()), 0);
    }

    #[tokio::test]
    async fn test_empty_audio_completes_without_segments() {
        let scratch = tempfile::tempdir().unwrap();
        let service = Arc::new(ScriptedService::new(Vec::new()));
        let tracklist = orchestrator(Arc::clone(&service), scratch.path())
            .run(AudioBuffer::new(Vec::new(), 44100), |_| {})
            .await
            .unwrap();

        assert_eq!(tracklist.total_segments, 0);
        assert!(tracklist.tracks.is_empty());
        assert_eq!(service.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unusable_artifact_dir_aborts() {
        let scratch = tempfile::tempdir().unwrap();
        let blocker = scratch.path().join("not-a-dir");
        std::fs::write(&blocker, b"file").unwrap();

        let service = Arc::new(ScriptedService::new(Vec::new()));
        let result = orchestrator(service, &blocker)
            .run(AudioBuffer::new(vec![0.0; 1000], 1000), |_| {})
            .await;
        assert!(matches!(result, Err(AnalysisError::Artifact(_))));
    }

    /// Removes the whole run workspace while the first segment is recognized.
    struct WorkspaceWrecker;

    #[async_trait]
    impl RecognitionService for WorkspaceWrecker {
        fn name(&self) -> &str {
            "wrecker"
        }

        async fn recognize(&self, artifact: &Path) -> Result<Value, RecognitionError> {
            if let Some(workspace) = artifact.parent() {
                if workspace.exists() {
                    std::fs::remove_dir_all(workspace).unwrap();
                }
            }
            Ok(json!({"matches": []}))
        }
    }

    /// Signals once it has an artifact in hand, then never answers.
    struct StalledService {
        entered: Arc<Notify>,
    }

    #[async_trait]
    impl RecognitionService for StalledService {
        fn name(&self) -> &str {
            "stalled"
        }

        async fn recognize(&self, artifact: &Path) -> Result<Value, RecognitionError> {
            assert!(artifact.exists());
            self.entered.notify_one();
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_lost_workspace_mid_run_aborts() {
        let scratch = tempfile::tempdir().unwrap();
        let result = orchestrator_with(Arc::new(WorkspaceWrecker), scratch.path())
            .run(two_track_mix(), |_| {})
            .await;

        assert!(matches!(result, Err(AnalysisError::Artifact(_))));
        assert_eq!(leftover_files(scratch.path()), 0);
    }

    #[tokio::test]
    async fn test_dropping_the_run_removes_the_workspace() {
        let scratch = tempfile::tempdir().unwrap();
        let entered = Arc::new(Notify::new());
        let service = Arc::new(StalledService {
            entered: Arc::clone(&entered),
        });
        let pipeline = orchestrator_with(service, scratch.path());

        let mut run = Box::pin(pipeline.run(two_track_mix(), |_| {}));
        tokio::select! {
            _ = &mut run => panic!("run finished while recognition was stalled"),
            _ = entered.notified() => {}
        }
        assert_eq!(leftover_files(scratch.path()), 1);

        drop(run);
        assert_eq!(leftover_files(scratch.path()), 0);
    }
}
