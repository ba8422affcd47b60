//! Segment extraction into a per-run artifact workspace.
//!
//! Every run gets its own temporary directory; artifact names carry the run
//! id so concurrent pipelines never collide.  The workspace owns all files it
//! created and removes them on [`ArtifactWorkspace::cleanup`] or on drop,
//! whichever comes first.

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, warn};
use tempfile::TempDir;
use uuid::Uuid;

use crate::audio::AudioBuffer;
use crate::error::ArtifactError;
use crate::wavfile::write_pcm16_wav;

/// The span between two adjacent boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub index: usize,
    pub start: usize,
    pub end: usize,
}

impl Segment {
    pub fn new(index: usize, start: usize, end: usize) -> Self {
        Self { index, start, end }
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn start_time_seconds(&self, sample_rate: u32) -> f64 {
        if sample_rate == 0 {
            return 0.0;
        }
        self.start as f64 / sample_rate as f64
    }
}

/// A segment written to disk, ready to be handed to a recognizer.
#[derive(Debug, Clone)]
pub struct SegmentArtifact {
    path: PathBuf,
    segment: Segment,
}

impl SegmentArtifact {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn segment(&self) -> Segment {
        self.segment
    }
}

/// Scratch directory holding the transient artifacts of one run.
pub struct ArtifactWorkspace {
    dir: TempDir,
    run_id: Uuid,
    created: Vec<PathBuf>,
}

impl ArtifactWorkspace {
    /// Create a workspace under the system temp directory.
    pub fn new() -> Result<Self, ArtifactError> {
        let dir = tempfile::Builder::new()
            .prefix("tracklister-")
            .tempdir()
            .map_err(ArtifactError::Workspace)?;
        Ok(Self::with_dir(dir))
    }

    /// Create a workspace under `base`, creating `base` if needed.
    pub fn new_in(base: &Path) -> Result<Self, ArtifactError> {
        fs::create_dir_all(base).map_err(ArtifactError::Workspace)?;
        let dir = tempfile::Builder::new()
            .prefix("tracklister-")
            .tempdir_in(base)
            .map_err(ArtifactError::Workspace)?;
        Ok(Self::with_dir(dir))
    }

    fn with_dir(dir: TempDir) -> Self {
        Self {
            dir,
            run_id: Uuid::new_v4(),
            created: Vec::new(),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Number of artifacts written so far.
    pub fn artifact_count(&self) -> usize {
        self.created.len()
    }

    /// Slice `segment` out of `buffer` and write it as a mono WAV artifact.
    pub fn extract(&mut self, buffer: &AudioBuffer, segment: &Segment) -> Result<SegmentArtifact, ArtifactError> {
        if segment.is_empty() || segment.end > buffer.len() {
            return Err(ArtifactError::InvalidSegment {
                start: segment.start,
                end: segment.end,
                len: buffer.len(),
            });
        }

        let path = self
            .dir
            .path()
            .join(format!("segment_{}_{}.wav", segment.index, self.run_id.simple()));
        // Track before writing so a half-written file is still cleaned up
        self.created.push(path.clone());
        write_pcm16_wav(&path, &buffer.samples()[segment.start..segment.end], buffer.sample_rate())?;
        debug!("Wrote segment {} to {}", segment.index, path.display());

        Ok(SegmentArtifact {
            path,
            segment: *segment,
        })
    }

    /// Remove one artifact as soon as it is no longer needed.
    pub fn discard(&mut self, artifact: SegmentArtifact) {
        match fs::remove_file(&artifact.path) {
            Ok(()) => self.created.retain(|p| p != &artifact.path),
            Err(e) => warn!("Could not remove {}: {}", artifact.path.display(), e),
        }
    }

    /// Delete every artifact and the workspace directory.
    ///
    /// Returns how many artifact files were removed.
    pub fn cleanup(mut self) -> Result<usize, ArtifactError> {
        let mut removed = 0;
        for path in self.created.drain(..) {
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("Could not remove {}: {}", path.display(), e),
            }
        }
        self.dir.close()?;
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wavfile::read_wav_header_from_path;

    fn ramp_buffer() -> AudioBuffer {
        AudioBuffer::new((0..16000).map(|i| i as f32 / 16000.0).collect(), 8000)
    }

    #[test]
    fn test_start_time_seconds() {
        let segment = Segment::new(3, 24000, 48000);
        assert_eq!(segment.start_time_seconds(8000), 3.0);
        assert_eq!(segment.len(), 24000);
    }

    #[test]
    fn test_extract_writes_slice() {
        let base = tempfile::tempdir().unwrap();
        let mut workspace = ArtifactWorkspace::new_in(base.path()).unwrap();
        let artifact = workspace
            .extract(&ramp_buffer(), &Segment::new(0, 4000, 12000))
            .unwrap();

        assert!(artifact.path().starts_with(workspace.path()));
        let header = read_wav_header_from_path(artifact.path()).unwrap();
        assert_eq!(header.sample_rate, 8000);
        assert_eq!(header.frame_count(), 8000);
        assert_eq!(workspace.artifact_count(), 1);
    }

    #[test]
    fn test_invalid_segment_is_not_systemic() {
        let mut workspace = ArtifactWorkspace::new().unwrap();
        let err = workspace
            .extract(&ramp_buffer(), &Segment::new(0, 10000, 20000))
            .unwrap_err();
        assert!(matches!(err, ArtifactError::InvalidSegment { .. }));
        assert!(!err.is_systemic());

        let err = workspace
            .extract(&ramp_buffer(), &Segment::new(1, 500, 500))
            .unwrap_err();
        assert!(!err.is_systemic());
        assert_eq!(workspace.artifact_count(), 0);
    }

    #[test]
    fn test_artifact_names_are_unique_across_workspaces() {
        let base = tempfile::tempdir().unwrap();
        let mut a = ArtifactWorkspace::new_in(base.path()).unwrap();
        let mut b = ArtifactWorkspace::new_in(base.path()).unwrap();
        let segment = Segment::new(0, 0, 8000);
        let pa = a.extract(&ramp_buffer(), &segment).unwrap();
        let pb = b.extract(&ramp_buffer(), &segment).unwrap();
        assert_ne!(pa.path().file_name(), pb.path().file_name());
        assert_ne!(a.run_id(), b.run_id());
    }

    #[test]
    fn test_cleanup_removes_everything() {
        let base = tempfile::tempdir().unwrap();
        let mut workspace = ArtifactWorkspace::new_in(base.path()).unwrap();
        let buffer = ramp_buffer();
        for (i, start) in [0, 4000, 8000].into_iter().enumerate() {
            workspace.extract(&buffer, &Segment::new(i, start, start + 4000)).unwrap();
        }
        assert_eq!(workspace.cleanup().unwrap(), 3);
        assert_eq!(fs::read_dir(base.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_discard_removes_single_artifact() {
        let mut workspace = ArtifactWorkspace::new().unwrap();
        let first = workspace.extract(&ramp_buffer(), &Segment::new(0, 0, 100)).unwrap();
        let second = workspace.extract(&ramp_buffer(), &Segment::new(1, 100, 200)).unwrap();
        let first_path = first.path().to_path_buf();

        workspace.discard(first);
        assert!(!first_path.exists());
        assert!(second.path().exists());
        assert_eq!(workspace.artifact_count(), 1);
        assert_eq!(workspace.cleanup().unwrap(), 1);
    }

    #[test]
    fn test_drop_removes_everything() {
        let base = tempfile::tempdir().unwrap();
        {
            let mut workspace = ArtifactWorkspace::new_in(base.path()).unwrap();
            workspace.extract(&ramp_buffer(), &Segment::new(0, 0, 100)).unwrap();
        }
        assert_eq!(fs::read_dir(base.path()).unwrap().count(), 0);
    }
}
