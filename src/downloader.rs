use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

/// Extension of the audio artifacts the acquisition engine produces.
pub const AUDIO_EXT: &str = "mp3";

/// How far in the past a file's mtime may lie for the last-resort
/// resolution strategy to still accept it.
const STALE_LIMIT: Duration = Duration::from_secs(60);

/// Callback surface the acquisition engine reports through.
pub trait AcquireHooks: Send + Sync {
    fn on_log(&self, line: &str);
    /// `percent` is 0-100; `message` is free text suitable for display.
    fn on_progress(&self, percent: u8, message: &str);
}

/// Produces a local audio file from a remote URL.
#[async_trait]
pub trait AcquisitionEngine: Send + Sync {
    /// Download `url` into `out_dir` and return the title the engine reports
    /// for the media. The actual file on disk is located afterwards with
    /// [`resolve_download`]; the reported title is only a hint because the
    /// engine sanitizes hostile characters unpredictably.
    async fn acquire(
        &self,
        url: &str,
        out_dir: &Path,
        hooks: &dyn AcquireHooks,
    ) -> Result<String, Box<dyn std::error::Error + Send + Sync>>;
}

/// Canonicalize share links before handing them to the engine.
/// `youtu.be/<id>` becomes a full `watch?v=<id>` URL; everything else
/// passes through trimmed.
pub fn normalize_url(raw: &str) -> String {
    let url = raw.trim();
    for prefix in ["https://youtu.be/", "http://youtu.be/"] {
        if let Some(rest) = url.strip_prefix(prefix) {
            let id = rest.split(['?', '&', '/']).next().unwrap_or("");
            if !id.is_empty() {
                return format!("https://www.youtube.com/watch?v={id}");
            }
        }
    }
    url.to_string()
}

/// Acquisition engine that shells out to yt-dlp.
pub struct YtDlpEngine {
    binary: String,
}

impl Default for YtDlpEngine {
    fn default() -> Self {
        Self {
            binary: "yt-dlp".into(),
        }
    }
}

#[async_trait]
impl AcquisitionEngine for YtDlpEngine {
    async fn acquire(
        &self,
        url: &str,
        out_dir: &Path,
        hooks: &dyn AcquireHooks,
    ) -> Result<String, Box<dyn std::error::Error + Send + Sync>> {
        tokio::fs::create_dir_all(out_dir).await?;
        hooks.on_log(&format!("Starting audio download from: {url}"));

        let mut child = Command::new(&self.binary)
            .args(["--newline", "--no-playlist"])
            .args(["-f", "bestaudio/best"])
            .args(["-x", "--audio-format", AUDIO_EXT, "--audio-quality", "192K"])
            .arg("-o")
            .arg(out_dir.join("%(title)s.%(ext)s"))
            .arg(url)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| format!("failed to spawn {}: {e}", self.binary))?;

        let stdout = child.stdout.take().ok_or("no stdout handle")?;
        let stderr = child.stderr.take().ok_or("no stderr handle")?;

        let progress = async {
            let mut lines = BufReader::new(stdout).lines();
            let mut title = String::new();
            while let Ok(Some(line)) = lines.next_line().await {
                if let Some((percent, message)) = parse_progress_line(&line) {
                    hooks.on_progress(percent, &message);
                } else if let Some(stem) = destination_stem(&line, "[download] Destination:") {
                    title = stem;
                } else if let Some(stem) = destination_stem(&line, "[ExtractAudio] Destination:") {
                    // Raw transfer is done; mp3 conversion still running.
                    title = stem;
                    hooks.on_progress(100, "Converting...");
                }
            }
            title
        };
        let diagnostics = async {
            let mut lines = BufReader::new(stderr).lines();
            let mut last_error = String::new();
            while let Ok(Some(line)) = lines.next_line().await {
                hooks.on_log(&line);
                if line.contains("ERROR") {
                    last_error = line;
                }
            }
            last_error
        };
        let (title, last_error) = tokio::join!(progress, diagnostics);

        let status = child.wait().await?;
        if !status.success() {
            let message = if last_error.is_empty() {
                format!("{} exited with {status}", self.binary)
            } else {
                last_error
            };
            return Err(message.into());
        }

        hooks.on_log(&format!("Download complete, reported title: {title}"));
        Ok(title)
    }
}

/// Parse a yt-dlp `--newline` progress line like
/// `[download]  42.0% of 9.97MiB at 1.30MiB/s ETA 00:05`
/// into `(42, "42.0% · 1.30MiB/s")`.
fn parse_progress_line(line: &str) -> Option<(u8, String)> {
    let rest = line.strip_prefix("[download]")?.trim_start();
    let percent_str = rest.split('%').next()?.trim();
    let percent: f64 = percent_str.parse().ok()?;

    let rate = rest
        .split(" at ")
        .nth(1)
        .and_then(|r| r.split_whitespace().next())
        .filter(|r| !r.starts_with("Unknown"));

    let message = match rate {
        Some(rate) => format!("{percent_str}% · {rate}"),
        None => format!("{percent_str}%"),
    };
    Some((percent.round().clamp(0.0, 100.0) as u8, message))
}

/// Extract the file stem from a `<prefix> <path>` destination line.
fn destination_stem(line: &str, prefix: &str) -> Option<String> {
    let path = line.strip_prefix(prefix)?.trim();
    Path::new(path)
        .file_stem()
        .and_then(|s| s.to_str())
        .map(str::to_string)
}

/// List the audio files currently present in `dir`. Taken before a run so
/// [`resolve_download`] can diff against it afterwards.
pub fn snapshot_audio_files(dir: &Path) -> Vec<PathBuf> {
    list_audio(dir).into_iter().map(|(p, _)| p).collect()
}

fn list_audio(dir: &Path) -> Vec<(PathBuf, SystemTime)> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.extension().and_then(|e| e.to_str()) == Some(AUDIO_EXT))
        .map(|p| {
            let mtime = p
                .metadata()
                .and_then(|m| m.modified())
                .unwrap_or(UNIX_EPOCH);
            (p, mtime)
        })
        .collect()
}

/// Locate the audio file a finished download actually produced.
///
/// The engine's own naming is unreliable for hostile titles, so resolution
/// degrades through decreasing-confidence strategies:
/// 1. exact `<title>.mp3` in `workdir`
/// 2. any audio file whose name contains the title's first 30 chars
/// 3. newest audio file not present in the pre-run `before` snapshot
/// 4. newest audio file overall, if modified within the last 60 seconds
///
/// Returns `None` when every strategy comes up empty.
pub fn resolve_download(workdir: &Path, reported_title: &str, before: &[PathBuf]) -> Option<PathBuf> {
    resolve_download_at(workdir, reported_title, before, SystemTime::now())
}

// The directory is listed exactly once and `now` is captured exactly once,
// so the strategies all judge the same filesystem state.
fn resolve_download_at(
    workdir: &Path,
    reported_title: &str,
    before: &[PathBuf],
    now: SystemTime,
) -> Option<PathBuf> {
    let listing = list_audio(workdir);

    if !reported_title.is_empty() {
        let expected = format!("{reported_title}.{AUDIO_EXT}");
        if let Some((path, _)) = listing
            .iter()
            .find(|(p, _)| p.file_name().and_then(|n| n.to_str()) == Some(expected.as_str()))
        {
            return Some(path.clone());
        }

        let prefix: String = reported_title.chars().take(30).collect();
        if let Some((path, _)) = listing.iter().find(|(p, _)| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.contains(&prefix))
        }) {
            return Some(path.clone());
        }
    }

    if let Some((path, _)) = listing
        .iter()
        .filter(|(p, _)| !before.contains(p))
        .max_by_key(|(_, mtime)| *mtime)
    {
        return Some(path.clone());
    }

    if let Some((path, mtime)) = listing.iter().max_by_key(|(_, mtime)| *mtime) {
        // duration_since fails for mtimes in the future; those are fresh.
        let age = now.duration_since(*mtime).unwrap_or(Duration::ZERO);
        if age <= STALE_LIMIT {
            return Some(path.clone());
        }
    }

    None
}
