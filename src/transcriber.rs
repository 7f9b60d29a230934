use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::process::Command;

/// Transcription quality tier, mapped onto whisper model sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    Fast,
    Medium,
    Accurate,
}

impl Quality {
    /// Whisper model name for this tier.
    pub fn model(self) -> &'static str {
        match self {
            Quality::Fast => "base",
            Quality::Medium => "small",
            Quality::Accurate => "medium",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Quality::Fast => "fast",
            Quality::Medium => "medium",
            Quality::Accurate => "accurate",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "fast" => Some(Quality::Fast),
            "medium" => Some(Quality::Medium),
            "accurate" => Some(Quality::Accurate),
            _ => None,
        }
    }
}

/// Map a user-facing language selection to the engine's optional language.
/// "auto", "none" and the empty string all mean automatic detection.
pub fn normalize_language(lang: &str) -> Option<String> {
    let lang = lang.trim();
    if lang.is_empty() || lang.eq_ignore_ascii_case("auto") || lang.eq_ignore_ascii_case("none") {
        None
    } else {
        Some(lang.to_lowercase())
    }
}

/// Callback surface for coarse transcription phase updates.
pub trait TranscribeHooks: Send + Sync {
    fn on_phase(&self, phase: &str);
}

/// Produces text from a local audio file.
#[async_trait]
pub trait TranscriptionEngine: Send + Sync {
    async fn transcribe(
        &self,
        audio: &Path,
        language: Option<&str>,
        quality: Quality,
        context_hint: Option<&str>,
        hooks: &dyn TranscribeHooks,
    ) -> Result<String, Box<dyn std::error::Error + Send + Sync>>;
}

/// Transcription engine that shells out to the `whisper` CLI.
pub struct WhisperCliEngine {
    binary: String,
}

impl Default for WhisperCliEngine {
    fn default() -> Self {
        Self {
            binary: "whisper".into(),
        }
    }
}

impl WhisperCliEngine {
    /// Scratch directory for the CLI's own output files; the transcript is
    /// handed back in-memory and versioned separately.
    fn scratch_dir() -> PathBuf {
        std::env::temp_dir().join("audio-studio")
    }
}

#[async_trait]
impl TranscriptionEngine for WhisperCliEngine {
    async fn transcribe(
        &self,
        audio: &Path,
        language: Option<&str>,
        quality: Quality,
        context_hint: Option<&str>,
        hooks: &dyn TranscribeHooks,
    ) -> Result<String, Box<dyn std::error::Error + Send + Sync>> {
        if !audio.exists() {
            return Err(format!("audio file not found: {}", audio.display()).into());
        }

        match probe_duration(audio).await {
            Some(duration) => {
                hooks.on_phase(&format!(
                    "Transcribing {} ({})",
                    format_duration(duration),
                    quality.label()
                ));
            }
            None => {
                let size_mb = audio.metadata().map(|m| m.len()).unwrap_or(0) / (1024 * 1024);
                hooks.on_phase(&format!("Transcribing {size_mb} MB ({})", quality.label()));
            }
        }

        match language {
            Some(lang) => log::info!("language forced: {lang}"),
            None => log::info!("auto-detecting language"),
        }

        let scratch = Self::scratch_dir();
        tokio::fs::create_dir_all(&scratch).await?;

        let mut cmd = Command::new(&self.binary);
        cmd.arg(audio)
            .args(["--model", quality.model()])
            .args(["--output_format", "txt"])
            .arg("--output_dir")
            .arg(&scratch)
            .args(["--verbose", "False"]);
        if let Some(lang) = language {
            cmd.args(["--language", lang]);
        }
        if let Some(hint) = context_hint {
            cmd.args(["--initial_prompt", hint]);
        }

        let output = cmd
            .output()
            .await
            .map_err(|e| format!("failed to spawn {}: {e}", self.binary))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let reason = stderr.lines().last().unwrap_or("unknown error");
            return Err(format!("{} failed: {reason}", self.binary).into());
        }

        let stem = audio
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or("invalid audio path")?;
        let text = tokio::fs::read_to_string(scratch.join(format!("{stem}.txt"))).await?;

        hooks.on_phase("Done");
        Ok(text.trim().to_string())
    }
}

/// Media duration in seconds via ffprobe. `None` when the probe fails.
async fn probe_duration(audio: &Path) -> Option<f64> {
    let output = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-show_entries",
            "format=duration",
            "-of",
            "default=noprint_wrappers=1:nokey=1",
        ])
        .arg(audio)
        .output()
        .await
        .ok()?;
    String::from_utf8_lossy(&output.stdout).trim().parse().ok()
}

/// Format seconds as M:SS or H:MM:SS.
fn format_duration(seconds: f64) -> String {
    let seconds = seconds as u64;
    if seconds >= 3600 {
        let h = seconds / 3600;
        let m = (seconds % 3600) / 60;
        let s = seconds % 60;
        format!("{h}:{m:02}:{s:02}")
    } else {
        format!("{}:{:02}", seconds / 60, seconds % 60)
    }
}
