//! Build a tracklist for a DJ set or continuous mix.
//!
//! Detects where the music changes, fingerprints each section and writes
//! the recognized tracks as JSON and text (optionally a CUE sheet).
//! Defaults can be saved to ~/.state/tracklister/defaults.toml using
//! --save-defaults.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;

use tracklister::config::{Backend, Config};
use tracklister::output::{generate_cue_sheet, write_cue_file, write_tracklist};
use tracklister::pipeline::{PipelineOrchestrator, Progress};
use tracklister::recognition::{RecognitionClient, RecognitionService};
use tracklister::shazam::{Shazam, DEFAULT_SEGMENT_SECONDS};
use tracklister::songrec::SongrecCli;
use tracklister::{load_audio, Phase};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Audio file of the mix (mp3, wav, flac, m4a, ogg)
    #[arg(required_unless_present_any = ["save_defaults", "show_saved_defaults"])]
    input: Option<PathBuf>,

    /// Output directory, not a file: <input stem>_tracklist.json and .txt are
    /// written inside it, with a (n) counter instead of overwriting
    /// (default: the input's directory)
    #[arg(short, long, value_name = "DIR")]
    output: Option<PathBuf>,

    /// Minimum song length in seconds
    #[arg(long)]
    min_song_duration: Option<f64>,

    /// Transition peak threshold, 0..1 (higher finds more boundaries)
    #[arg(long)]
    threshold: Option<f64>,

    /// Recognition backend
    #[arg(long, value_enum)]
    backend: Option<BackendArg>,

    /// Minimum milliseconds between recognition requests
    #[arg(long)]
    request_interval_ms: Option<u64>,

    /// Also write a CUE sheet
    #[arg(long, default_value_t = false)]
    cue: bool,

    /// Log raw service responses
    #[arg(long, default_value_t = false)]
    debug: bool,

    /// Save the given options as defaults and exit
    #[arg(long, default_value_t = false)]
    save_defaults: bool,

    /// Print the saved defaults and exit
    #[arg(long, default_value_t = false)]
    show_saved_defaults: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum BackendArg {
    Shazam,
    Songrec,
}

impl From<BackendArg> for Backend {
    fn from(arg: BackendArg) -> Self {
        match arg {
            BackendArg::Shazam => Backend::Shazam,
            BackendArg::Songrec => Backend::Songrec,
        }
    }
}

impl Cli {
    /// Only the options given on the command line.
    fn overrides(&self) -> Config {
        Config {
            min_song_duration: self.min_song_duration,
            threshold: self.threshold,
            request_interval_ms: self.request_interval_ms,
            backend: self.backend.map(Backend::from),
            output_dir: self.output.clone(),
            debug: self.debug.then_some(true),
            ..Config::default()
        }
    }
}

fn build_service(config: &Config) -> Arc<dyn RecognitionService> {
    match config.backend.unwrap_or_default() {
        Backend::Shazam => Arc::new(Shazam::with_config(
            config.language.as_deref().unwrap_or("en-US"),
            config.endpoint_country.as_deref().unwrap_or("GB"),
            config.segment_seconds.unwrap_or(DEFAULT_SEGMENT_SECONDS),
        )),
        Backend::Songrec => Arc::new(SongrecCli::new()),
    }
}

/// Default log filter; `RUST_LOG` still overrides it.
fn log_filter(config: &Config) -> &'static str {
    if config.debug.unwrap_or(false) {
        "debug"
    } else {
        "info"
    }
}

fn log_progress(progress: &Progress) {
    match progress.phase {
        Phase::Recognizing => info!(
            "[{}/{}] {}",
            progress.current_segment, progress.total_segments, progress.message
        ),
        _ => info!("{}", progress.message),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let saved_config = Config::load().context("Failed to read saved defaults")?;
    let mut config = saved_config.clone();
    config.merge(&cli.overrides());

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_filter(&config))).init();

    if cli.show_saved_defaults {
        let path = Config::get_config_path()?;
        if path.exists() {
            println!("Saved defaults from {}:", path.display());
            println!();
            saved_config.print("Configuration");
        } else {
            println!("No saved defaults file found at {}", path.display());
            println!("Use --save-defaults to create one.");
        }
        return Ok(());
    }

    if cli.save_defaults {
        let path = config.save().context("Error saving defaults")?;
        println!("Defaults saved to {}", path.display());
        println!();
        config.print("Saved configuration");
        return Ok(());
    }

    let input = cli.input.as_deref().context("No input file given")?;
    let buffer = load_audio(input).with_context(|| format!("Failed to load {}", input.display()))?;
    info!(
        "Loaded {} ({:.1} minutes at {} Hz)",
        input.display(),
        buffer.duration_seconds() / 60.0,
        buffer.sample_rate()
    );

    let client = RecognitionClient::new(build_service(&config), config.rate_limiter())
        .with_debug(config.debug.unwrap_or(false));
    let pipeline = PipelineOrchestrator::new(client, config.pipeline_config());
    let tracklist = pipeline.run(buffer, log_progress).await.context("Analysis failed")?;

    let output_dir = config
        .output_dir
        .clone()
        .or_else(|| input.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."));
    let base_name = input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("tracklist");
    let paths = write_tracklist(&output_dir, base_name, &tracklist)
        .with_context(|| format!("Failed to write tracklist to {}", output_dir.display()))?;

    println!();
    println!("Tracklist:");
    for track in &tracklist.tracks {
        println!(
            "  {} [{} matches, {} confidence]",
            track, track.match_count, track.confidence_tier
        );
    }
    println!();
    println!(
        "{} unique tracks ({} matches in {} segments)",
        tracklist.tracks.len(),
        tracklist.total_matches,
        tracklist.total_segments
    );
    println!("Results saved to:");
    println!("  {}", paths.json.display());
    println!("  {}", paths.txt.display());

    if cli.cue {
        let cue_path = paths.cue();
        write_cue_file(&cue_path, &generate_cue_sheet(input, base_name, &tracklist.tracks))
            .with_context(|| format!("Failed to write {}", cue_path.display()))?;
        println!("  {}", cue_path.display());
    }

    Ok(())
}
