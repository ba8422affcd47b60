//! Tracklist files: JSON, plain text and CUE sheet.
//!
//! Outputs for an input `set.mp3` are named `set_tracklist.json` /
//! `set_tracklist.txt`; when those exist `set_tracklist(1).json` and so on
//! are used instead, so earlier results are never overwritten.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::pipeline::Tracklist;
use crate::recognition::TrackMatch;

const TRACKLIST_SUFFIX: &str = "_tracklist";

/// Where the files of one run are written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPaths {
    pub json: PathBuf,
    pub txt: PathBuf,
}

impl OutputPaths {
    /// The CUE sheet sits next to the JSON file.
    pub fn cue(&self) -> PathBuf {
        self.json.with_extension("cue")
    }
}

/// First free `<base>_tracklist[(n)].json/.txt` pair in `dir`.
pub fn unique_output_paths(dir: &Path, base_name: &str) -> OutputPaths {
    let paths_for = |suffix: String| OutputPaths {
        json: dir.join(format!("{}{}{}.json", base_name, TRACKLIST_SUFFIX, suffix)),
        txt: dir.join(format!("{}{}{}.txt", base_name, TRACKLIST_SUFFIX, suffix)),
    };

    let mut paths = paths_for(String::new());
    let mut counter = 1;
    while paths.json.exists() {
        paths = paths_for(format!("({})", counter));
        counter += 1;
    }
    paths
}

/// One line per track: `HH:MM:SS - title - artist [n matches]`.
pub fn render_txt(tracks: &[TrackMatch]) -> String {
    tracks
        .iter()
        .map(|t| format!("{} - {} - {} [{} matches]\n", t.start_time, t.title, t.artist, t.match_count))
        .collect()
}

pub fn write_json(path: &Path, tracks: &[TrackMatch]) -> io::Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, tracks)?;
    writer.write_all(b"\n")?;
    writer.flush()
}

pub fn write_txt(path: &Path, tracks: &[TrackMatch]) -> io::Result<()> {
    fs::write(path, render_txt(tracks))
}

/// Write the JSON and TXT files for `tracklist` into `dir`, creating it if needed.
pub fn write_tracklist(dir: &Path, base_name: &str, tracklist: &Tracklist) -> io::Result<OutputPaths> {
    fs::create_dir_all(dir)?;
    let paths = unique_output_paths(dir, base_name);
    write_json(&paths.json, &tracklist.tracks)?;
    write_txt(&paths.txt, &tracklist.tracks)?;
    Ok(paths)
}

fn cue_text(s: &str) -> String {
    s.replace('"', "'")
}

/// `MM:SS:FF` with 75 frames per second.
fn cue_index(seconds: f64) -> String {
    let seconds = seconds.max(0.0);
    let minutes = (seconds / 60.0) as u32;
    let secs = (seconds % 60.0) as u32;
    let frames = ((seconds % 1.0) * 75.0) as u32;
    format!("{:02}:{:02}:{:02}", minutes, secs, frames)
}

/// Generate a CUE sheet indexing every track of the mix in `audio_file`.
pub fn generate_cue_sheet(audio_file: &Path, title: &str, tracks: &[TrackMatch]) -> String {
    let filename = audio_file
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("unknown.wav");
    let file_type = match audio_file.extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("mp3") => "MP3",
        _ => "WAVE",
    };

    let mut cue = String::new();
    cue.push_str("REM GENERATOR \"tracklister\"\n");
    cue.push_str("PERFORMER \"Various Artists\"\n");
    cue.push_str(&format!("TITLE \"{}\"\n", cue_text(title)));
    cue.push_str(&format!("FILE \"{}\" {}\n", cue_text(filename), file_type));

    for (i, track) in tracks.iter().enumerate() {
        cue.push_str(&format!("  TRACK {:02} AUDIO\n", i + 1));
        cue.push_str(&format!("    TITLE \"{}\"\n", cue_text(&track.title)));
        cue.push_str(&format!("    PERFORMER \"{}\"\n", cue_text(&track.artist)));
        cue.push_str(&format!("    INDEX 01 {}\n", cue_index(track.start_time_seconds)));
    }
    cue
}

pub fn write_cue_file(path: &Path, cue_content: &str) -> io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(cue_content.as_bytes())
}

/// A previously written tracklist found in an output directory.
#[derive(Debug, Clone)]
pub struct RecentOutput {
    pub name: String,
    pub track_count: usize,
    pub modified: SystemTime,
    pub json: PathBuf,
    pub txt: Option<PathBuf>,
}

/// The newest `limit` tracklists in `dir`, newest first.  Unreadable files
/// are skipped.
pub fn recent_outputs(dir: &Path, limit: usize) -> io::Result<Vec<RecentOutput>> {
    let mut found = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        if path.extension().and_then(|e| e.to_str()) != Some("json") || !stem.contains(TRACKLIST_SUFFIX) {
            continue;
        }
        let Ok(text) = fs::read_to_string(&path) else {
            continue;
        };
        let Ok(tracks) = serde_json::from_str::<Vec<TrackMatch>>(&text) else {
            continue;
        };
        let modified = fs::metadata(&path).and_then(|m| m.modified()).unwrap_or(SystemTime::UNIX_EPOCH);
        let txt = path.with_extension("txt");
        found.push(RecentOutput {
            name: stem.replacen(TRACKLIST_SUFFIX, "", 1),
            track_count: tracks.len(),
            modified,
            txt: txt.exists().then_some(txt),
            json: path,
        });
    }
    found.sort_by(|a, b| b.modified.cmp(&a.modified));
    found.truncate(limit);
    Ok(found)
}
