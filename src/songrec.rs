//! Recognition through the external `songrec` command-line tool.

use std::path::Path;

use async_trait::async_trait;
use log::debug;
use serde_json::Value;
use tokio::process::Command;

use crate::error::RecognitionError;
use crate::recognition::RecognitionService;

/// Runs `songrec audio-file-to-recognized-song <file>` and parses its JSON.
#[derive(Debug, Clone)]
pub struct SongrecCli {
    program: String,
}

impl Default for SongrecCli {
    fn default() -> Self {
        Self::new()
    }
}

impl SongrecCli {
    pub fn new() -> Self {
        Self::with_program("songrec")
    }

    /// Use a different executable (path or name on `PATH`).
    pub fn with_program(program: &str) -> Self {
        Self {
            program: program.to_string(),
        }
    }
}

fn parse_output(stdout: &[u8]) -> Result<Value, RecognitionError> {
    let text = String::from_utf8_lossy(stdout);
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(RecognitionError::Malformed("empty songrec output".to_string()));
    }
    Ok(serde_json::from_str(trimmed)?)
}

#[async_trait]
impl RecognitionService for SongrecCli {
    fn name(&self) -> &str {
        "songrec"
    }

    async fn recognize(&self, artifact: &Path) -> Result<Value, RecognitionError> {
        if !artifact.exists() {
            return Err(RecognitionError::Artifact(format!("{} does not exist", artifact.display())));
        }

        let output = Command::new(&self.program)
            .arg("audio-file-to-recognized-song")
            .arg(artifact)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| RecognitionError::Process(format!("cannot run {}: {}", self.program, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(RecognitionError::Process(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }

        debug!("songrec returned {} bytes", output.stdout.len());
        parse_output(&output.stdout)
    }
}
