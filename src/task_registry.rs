//! Status of background analysis runs, for host applications that start a
//! run and poll it later.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use log::debug;
use serde::Serialize;
use uuid::Uuid;

use crate::pipeline::{Phase, Progress, Tracklist};
use crate::recognition::TrackMatch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Error,
}

impl TaskStatus {
    pub fn is_finished(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Error)
    }
}

/// Snapshot of one task.
#[derive(Debug, Clone, Serialize)]
pub struct TaskState {
    pub task_id: Uuid,
    pub status: TaskStatus,
    /// Percent, 0..=100.
    pub progress: u8,
    pub message: String,
    pub filename: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_segment: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_segments: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<Vec<TrackMatch>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unique_tracks: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_tracks_found: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub json_output: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub txt_output: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip)]
    updated: Instant,
}

impl TaskState {
    fn new(task_id: Uuid, filename: &str) -> Self {
        Self {
            task_id,
            status: TaskStatus::Pending,
            progress: 0,
            message: "Starting analysis...".to_string(),
            filename: filename.to_string(),
            current_segment: None,
            total_segments: None,
            results: None,
            unique_tracks: None,
            total_tracks_found: None,
            json_output: None,
            txt_output: None,
            error: None,
            updated: Instant::now(),
        }
    }
}

/// Map pipeline progress onto an overall percentage.
///
/// Boundary detection sits at 15 %, recognition spans 20–90 %,
/// deduplication is 95 %.
pub fn progress_percent(progress: &Progress) -> u8 {
    match progress.phase {
        Phase::DetectingBoundaries => 15,
        Phase::Recognizing if progress.total_segments > 0 => {
            let done = progress.current_segment.min(progress.total_segments);
            (20 + done * 70 / progress.total_segments) as u8
        }
        Phase::Recognizing => 20,
        Phase::Deduplicating | Phase::Complete => 95,
    }
}

/// Thread-safe task map.  Clones share the same tasks.
#[derive(Debug, Clone, Default)]
pub struct TaskRegistry {
    tasks: Arc<Mutex<HashMap<Uuid, TaskState>>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, TaskState>> {
        // a panic while holding the lock leaves plain data behind; keep serving it
        self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn with_task(&self, id: Uuid, f: impl FnOnce(&mut TaskState)) -> bool {
        match self.lock().get_mut(&id) {
            Some(task) => {
                f(task);
                task.updated = Instant::now();
                true
            }
            None => false,
        }
    }

    /// Register a new pending task for `filename`.
    pub fn create(&self, filename: &str) -> Uuid {
        let id = Uuid::new_v4();
        self.lock().insert(id, TaskState::new(id, filename));
        debug!("Created task {} for {}", id, filename);
        id
    }

    /// Mark the task as processing with the given percent and message.
    pub fn update(&self, id: Uuid, progress: u8, message: &str) -> bool {
        self.with_task(id, |task| {
            task.status = TaskStatus::Processing;
            task.progress = progress.min(100);
            task.message = message.to_string();
        })
    }

    pub fn get(&self, id: Uuid) -> Option<TaskState> {
        self.lock().get(&id).cloned()
    }

    /// A progress callback for [`PipelineOrchestrator::run`] that feeds
    /// this registry.
    ///
    /// [`PipelineOrchestrator::run`]: crate::pipeline::PipelineOrchestrator::run
    pub fn observe(&self, id: Uuid) -> impl FnMut(&Progress) + Send + 'static {
        let registry = self.clone();
        move |progress: &Progress| {
            registry.with_task(id, |task| {
                task.status = TaskStatus::Processing;
                task.progress = progress_percent(progress);
                task.message = match progress.phase {
                    Phase::DetectingBoundaries => "Detecting song boundaries...".to_string(),
                    Phase::Recognizing => format!(
                        "Analyzing track {}/{}...",
                        progress.current_segment, progress.total_segments
                    ),
                    Phase::Deduplicating | Phase::Complete => {
                        "Processing results and removing duplicates...".to_string()
                    }
                };
                if progress.phase != Phase::DetectingBoundaries {
                    task.current_segment = Some(progress.current_segment);
                    task.total_segments = Some(progress.total_segments);
                }
            });
        }
    }

    pub fn complete(&self, id: Uuid, tracklist: &Tracklist) -> bool {
        self.with_task(id, |task| {
            task.status = TaskStatus::Completed;
            task.progress = 100;
            task.message = format!("Found {} unique tracks", tracklist.tracks.len());
            task.results = Some(tracklist.tracks.clone());
            task.total_segments = Some(tracklist.total_segments);
            task.unique_tracks = Some(tracklist.tracks.len());
            task.total_tracks_found = Some(tracklist.total_matches);
            task.error = None;
        })
    }

    /// Record where the tracklist files of a task were written.
    pub fn set_outputs(&self, id: Uuid, json_output: PathBuf, txt_output: PathBuf) -> bool {
        self.with_task(id, |task| {
            task.json_output = Some(json_output);
            task.txt_output = Some(txt_output);
        })
    }

    pub fn fail(&self, id: Uuid, error: impl fmt::Display) -> bool {
        let error = error.to_string();
        self.with_task(id, |task| {
            task.status = TaskStatus::Error;
            task.progress = 0;
            task.message = "Analysis failed".to_string();
            task.error = Some(error);
        })
    }

    /// Read a task; finished tasks are removed by the read.
    pub fn take_finished(&self, id: Uuid) -> Option<TaskState> {
        let mut tasks = self.lock();
        let finished = tasks.get(&id)?.status.is_finished();
        if finished {
            tasks.remove(&id)
        } else {
            tasks.get(&id).cloned()
        }
    }

    /// Drop tasks not updated within `age`.  Returns how many were removed.
    pub fn evict_older_than(&self, age: Duration) -> usize {
        let mut tasks = self.lock();
        let before = tasks.len();
        tasks.retain(|_, task| task.updated.elapsed() < age);
        before - tasks.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recognition::{ConfidenceTier, TrackMatch};

    fn progress(phase: Phase, current: usize, total: usize) -> Progress {
        Progress {
            current_segment: current,
            total_segments: total,
            phase,
            message: String::new(),
        }
    }

    fn tracklist() -> Tracklist {
        Tracklist {
            tracks: vec![TrackMatch {
                title: "Song".to_string(),
                artist: "Artist".to_string(),
                start_time: "00:00:00".to_string(),
                start_time_seconds: 0.0,
                source_url: String::new(),
                match_count: 3,
                confidence_tier: ConfidenceTier::High,
            }],
            total_segments: 4,
            total_matches: 2,
        }
    }

    #[test]
    fn test_progress_mapping() {
        assert_eq!(progress_percent(&progress(Phase::DetectingBoundaries, 0, 0)), 15);
        assert_eq!(progress_percent(&progress(Phase::Recognizing, 0, 10)), 20);
        assert_eq!(progress_percent(&progress(Phase::Recognizing, 5, 10)), 55);
        assert_eq!(progress_percent(&progress(Phase::Recognizing, 10, 10)), 90);
        assert_eq!(progress_percent(&progress(Phase::Recognizing, 0, 0)), 20);
        assert_eq!(progress_percent(&progress(Phase::Deduplicating, 10, 10)), 95);
    }

    #[test]
    fn test_lifecycle() {
        let registry = TaskRegistry::new();
        let id = registry.create("set.mp3");
        assert_eq!(registry.get(id).unwrap().status, TaskStatus::Pending);

        let mut observer = registry.observe(id);
        observer(&progress(Phase::Recognizing, 2, 4));
        let state = registry.get(id).unwrap();
        assert_eq!(state.status, TaskStatus::Processing);
        assert_eq!(state.progress, 55);
        assert_eq!(state.message, "Analyzing track 2/4...");
        assert_eq!(state.total_segments, Some(4));

        assert!(registry.complete(id, &tracklist()));
        let state = registry.get(id).unwrap();
        assert_eq!(state.progress, 100);
        assert_eq!(state.unique_tracks, Some(1));
        assert_eq!(state.total_tracks_found, Some(2));

        assert!(registry.take_finished(id).is_some());
        assert!(registry.get(id).is_none());
    }

    #[test]
    fn test_unfinished_tasks_survive_reads() {
        let registry = TaskRegistry::new();
        let id = registry.create("set.wav");
        registry.update(id, 10, "Loading audio file...");
        assert!(registry.take_finished(id).is_some());
        assert!(registry.get(id).is_some());

        registry.fail(id, "decode error");
        let state = registry.take_finished(id).unwrap();
        assert_eq!(state.status, TaskStatus::Error);
        assert_eq!(state.error.as_deref(), Some("decode error"));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_unknown_task() {
        let registry = TaskRegistry::new();
        let id = Uuid::new_v4();
        assert!(!registry.update(id, 50, "x"));
        assert!(registry.get(id).is_none());
        assert!(registry.take_finished(id).is_none());
    }

    #[test]
    fn test_eviction() {
        let registry = TaskRegistry::new();
        registry.create("a.mp3");
        registry.create("b.mp3");
        assert_eq!(registry.evict_older_than(Duration::from_secs(3600)), 0);
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(registry.evict_older_than(Duration::from_millis(10)), 2);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_serialized_status() {
        let registry = TaskRegistry::new();
        let id = registry.create("a.mp3");
        registry.fail(id, "boom");
        let v = serde_json::to_value(registry.get(id).unwrap()).unwrap();
        assert_eq!(v["status"], "error");
        assert_eq!(v["error"], "boom");
        assert!(v.get("results").is_none());
    }
}
