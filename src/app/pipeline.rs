use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use super::progress::{PhaseCell, StageTicker};
use super::stages::{StageBoard, StageId, StageState};
use super::DisplayEvent;
use crate::analyzer::{AnalysisEngine, AnalyzeHooks, OpenRouterEngine, DEFAULT_ANALYSIS_PROMPT};
use crate::config::Config;
use crate::downloader::{
    normalize_url, resolve_download, snapshot_audio_files, AcquireHooks, AcquisitionEngine,
    YtDlpEngine,
};
use crate::output;
use crate::transcriber::{
    normalize_language, Quality, TranscribeHooks, TranscriptionEngine, WhisperCliEngine,
};
use crate::vault::CredentialStore;

/// The three external engines the orchestrator drives.
pub struct Engines {
    pub acquisition: Arc<dyn AcquisitionEngine>,
    pub transcription: Arc<dyn TranscriptionEngine>,
    pub analysis: Arc<dyn AnalysisEngine>,
}

impl Engines {
    /// Real engines: yt-dlp, the whisper CLI, and OpenRouter.
    pub fn production(config: &Config) -> Self {
        Self {
            acquisition: Arc::new(YtDlpEngine::default()),
            transcription: Arc::new(WhisperCliEngine::default()),
            analysis: Arc::new(OpenRouterEngine::new(config.analysis_model.clone())),
        }
    }
}

/// Parameters of a transcribe run.
#[derive(Debug, Clone)]
pub struct TranscribeRequest {
    pub url: String,
    /// Language code, or "auto"/empty for automatic detection.
    pub language: String,
    pub quality: Quality,
    /// Optional hint (proper names, jargon) passed to the engine.
    pub context_hint: String,
}

/// Texts and paths produced by the runs so far. Owned exclusively by the
/// orchestrator; a new run is rejected while one is in flight.
#[derive(Default)]
struct RunContext {
    last_audio: Option<PathBuf>,
    transcript: String,
    analysis: String,
}

struct Inner {
    board: Arc<StageBoard>,
    events: async_channel::Sender<DisplayEvent>,
    workdir: PathBuf,
    engines: Engines,
    credentials: Box<dyn CredentialStore>,
    run: Mutex<RunContext>,
    busy: AtomicBool,
}

impl Inner {
    fn notify(&self) {
        let _ = self.events.try_send(DisplayEvent::StagesChanged);
    }

    /// Clear the in-flight flag and tell the display the run is over.
    fn finish_run(&self) {
        self.busy.store(false, Ordering::SeqCst);
        let _ = self.events.try_send(DisplayEvent::RunFinished);
    }
}

/// Drives the three stages in order: download, transcribe, analyze.
///
/// Exactly one run may be in flight at a time; `run_transcribe` and
/// `run_analyze` are no-ops while one is. All engine failures are contained
/// here and surface only as stage error details.
pub struct Studio {
    inner: Arc<Inner>,
    rt: tokio::runtime::Handle,
}

impl Studio {
    pub fn new(
        workdir: PathBuf,
        rt: tokio::runtime::Handle,
        events: async_channel::Sender<DisplayEvent>,
        engines: Engines,
        credentials: Box<dyn CredentialStore>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                board: Arc::new(StageBoard::new()),
                events,
                workdir,
                engines,
                credentials,
                run: Mutex::new(RunContext::default()),
                busy: AtomicBool::new(false),
            }),
            rt,
        }
    }

    // ── Presentation boundary ──

    pub fn stage(&self, id: StageId) -> StageState {
        self.inner.board.stage(id)
    }

    pub fn stages(&self) -> [StageState; 3] {
        self.inner.board.stages()
    }

    pub fn is_busy(&self) -> bool {
        self.inner.busy.load(Ordering::SeqCst)
    }

    pub fn transcript(&self) -> String {
        self.inner.run.lock().unwrap().transcript.clone()
    }

    pub fn analysis(&self) -> String {
        self.inner.run.lock().unwrap().analysis.clone()
    }

    /// Stages 1–2: download the URL's audio, then transcribe it.
    /// No-op if a run is already in flight.
    pub fn run_transcribe(&self, req: TranscribeRequest) {
        let inner = &self.inner;
        if inner
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            log::info!("a run is already in flight, ignoring transcribe request");
            return;
        }

        let url = normalize_url(&req.url);
        if url.is_empty() {
            // Only stage 1 is touched; earlier results stay on the board.
            inner.board.reset_stage(StageId::Acquisition);
            inner.board.begin(StageId::Acquisition);
            inner.board.fail(StageId::Acquisition, "missing URL");
            inner.notify();
            inner.finish_run();
            return;
        }

        inner.board.reset();
        inner.run.lock().unwrap().transcript.clear();
        inner.notify();

        let language = normalize_language(&req.language);
        let hint = match req.context_hint.trim() {
            "" => None,
            hint => Some(hint.to_string()),
        };

        let inner = inner.clone();
        self.rt.spawn(async move {
            transcribe_worker(inner, url, language, req.quality, hint).await;
        });
    }

    /// Stage 3: analyze the stored transcript with the given instruction
    /// (default instruction when blank). No-op if a run is in flight.
    pub fn run_analyze(&self, instruction: &str) {
        let inner = &self.inner;
        if inner
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            log::info!("a run is already in flight, ignoring analyze request");
            return;
        }

        let transcript = inner.run.lock().unwrap().transcript.clone();
        if transcript.is_empty() {
            inner.board.reset_stage(StageId::Analysis);
            inner.board.begin(StageId::Analysis);
            inner.board.fail(StageId::Analysis, "transcribe first");
            inner.notify();
            inner.finish_run();
            return;
        }

        let api_key = inner.credentials.load();
        if api_key.is_empty() {
            inner.board.reset_stage(StageId::Analysis);
            inner.board.begin(StageId::Analysis);
            inner.board.fail(StageId::Analysis, "missing API key");
            inner.notify();
            inner.finish_run();
            return;
        }

        let instruction = match instruction.trim() {
            "" => DEFAULT_ANALYSIS_PROMPT.to_string(),
            text => text.to_string(),
        };

        inner.board.reset_stage(StageId::Analysis);
        inner.notify();

        let inner = inner.clone();
        self.rt.spawn(async move {
            analyze_worker(inner, transcript, instruction, api_key).await;
        });
    }
}

// ── Engine callback forwarders ──

/// Forwards download progress into the phase cell and remembers the most
/// specific error-flagged log line for the stage detail on failure.
struct AcquireForwarder {
    phase: PhaseCell,
    error_line: Mutex<String>,
}

impl AcquireHooks for AcquireForwarder {
    fn on_log(&self, line: &str) {
        log::debug!("[acquire] {line}");
        if line.to_lowercase().contains("error") {
            *self.error_line.lock().unwrap() = line.to_string();
        }
    }

    fn on_progress(&self, _percent: u8, message: &str) {
        self.phase.set(message);
    }
}

struct PhaseForwarder {
    phase: PhaseCell,
}

impl TranscribeHooks for PhaseForwarder {
    fn on_phase(&self, phase: &str) {
        self.phase.set(phase);
    }
}

/// Maps the analysis engine's coarse log lines onto phase text.
struct AnalyzeForwarder {
    phase: PhaseCell,
}

impl AnalyzeHooks for AnalyzeForwarder {
    fn on_log(&self, line: &str) {
        log::debug!("[analyze] {line}");
        if line.starts_with("Sending") {
            self.phase.set("Waiting for response...");
        } else if line.starts_with("Response") {
            self.phase.set("Processing...");
        }
    }
}

// ── Workers ──

async fn transcribe_worker(
    inner: Arc<Inner>,
    url: String,
    language: Option<String>,
    quality: Quality,
    hint: Option<String>,
) {
    let phase = PhaseCell::default();

    // Stage 1: acquisition
    inner.board.begin(StageId::Acquisition);
    phase.set("Connecting...");
    inner.notify();

    let before = snapshot_audio_files(&inner.workdir);
    let started = Instant::now();
    let hooks = AcquireForwarder {
        phase: phase.clone(),
        error_line: Mutex::new(String::new()),
    };
    let ticker = ticker_for(&inner, StageId::Acquisition, &phase);
    let outcome = inner
        .engines
        .acquisition
        .acquire(&url, &inner.workdir, &hooks)
        .await;
    ticker.stop();

    let title = match outcome {
        Ok(title) => title,
        Err(e) => {
            log::warn!("acquisition failed: {e}");
            let engine_line = hooks.error_line.lock().unwrap().clone();
            let detail = if engine_line.is_empty() {
                e.to_string()
            } else {
                engine_line
            };
            inner.board.fail(StageId::Acquisition, &detail);
            inner.notify();
            inner.finish_run();
            return;
        }
    };

    // A nominally successful download with no locatable file is still a failure.
    let Some(audio) = resolve_download(&inner.workdir, &title, &before) else {
        log::warn!("download reported success but no file was found for {title:?}");
        inner.board.fail(StageId::Acquisition, "no file produced");
        inner.notify();
        inner.finish_run();
        return;
    };

    inner
        .board
        .done(StageId::Acquisition, &format!("{}s", started.elapsed().as_secs()));
    inner.run.lock().unwrap().last_audio = Some(audio.clone());
    inner.notify();

    // Stage 2: transcription
    inner.board.begin(StageId::Transcription);
    phase.set("Starting...");
    inner.notify();

    let started = Instant::now();
    let hooks = PhaseForwarder {
        phase: phase.clone(),
    };
    let ticker = ticker_for(&inner, StageId::Transcription, &phase);
    let outcome = inner
        .engines
        .transcription
        .transcribe(&audio, language.as_deref(), quality, hint.as_deref(), &hooks)
        .await;
    ticker.stop();

    match outcome {
        Ok(text) if !text.trim().is_empty() => {
            inner.run.lock().unwrap().transcript = text.clone();
            match output::write_versioned(&audio, "", &text) {
                Ok(path) => log::info!("transcript saved to {}", path.display()),
                Err(e) => log::warn!("failed to save transcript: {e}"),
            }
            inner
                .board
                .done(StageId::Transcription, &format!("{}s", started.elapsed().as_secs()));
            let _ = inner.events.try_send(DisplayEvent::TranscriptReady(text));
        }
        Ok(_) => {
            inner.board.fail(StageId::Transcription, "no result");
        }
        Err(e) => {
            log::warn!("transcription failed: {e}");
            inner.board.fail(StageId::Transcription, "no result");
        }
    }
    inner.notify();
    inner.finish_run();
}

async fn analyze_worker(inner: Arc<Inner>, transcript: String, instruction: String, api_key: String) {
    let phase = PhaseCell::default();

    inner.board.begin(StageId::Analysis);
    phase.set(&format!("Sending {} chars...", transcript.chars().count()));
    inner.notify();

    let started = Instant::now();
    let hooks = AnalyzeForwarder {
        phase: phase.clone(),
    };
    let ticker = ticker_for(&inner, StageId::Analysis, &phase);
    let outcome = inner
        .engines
        .analysis
        .analyze(&transcript, &instruction, &api_key, &hooks)
        .await;
    ticker.stop();

    match outcome {
        Ok(text) if !text.trim().is_empty() => {
            inner.run.lock().unwrap().analysis = text.clone();
            let last_audio = inner.run.lock().unwrap().last_audio.clone();
            if let Some(audio) = last_audio {
                match output::write_versioned(&audio, "_analysis", &text) {
                    Ok(path) => log::info!("analysis saved to {}", path.display()),
                    Err(e) => log::warn!("failed to save analysis: {e}"),
                }
            }
            inner.board.done(
                StageId::Analysis,
                &format!("{:.1}s", started.elapsed().as_secs_f64()),
            );
            let _ = inner.events.try_send(DisplayEvent::AnalysisReady(text));
        }
        Ok(_) => {
            inner.board.fail(StageId::Analysis, "API error");
        }
        Err(e) => {
            log::warn!("analysis failed: {e}");
            inner.board.fail(StageId::Analysis, "API error");
        }
    }
    inner.notify();
    inner.finish_run();
}

fn ticker_for(inner: &Inner, stage: StageId, phase: &PhaseCell) -> StageTicker {
    StageTicker::start(inner.board.clone(), inner.events.clone(), stage, phase.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::stages::StageStatus;
    use async_trait::async_trait;
    use std::fs;
    use std::path::Path;
    use std::time::Duration;

    struct StubAcquire {
        result: Result<String, String>,
        /// File to create in the workdir before returning, simulating the
        /// engine writing its artifact.
        create: Option<&'static str>,
        error_log: Option<&'static str>,
        seen_url: Mutex<String>,
    }

    impl StubAcquire {
        fn ok(title: &str, create: &'static str) -> Self {
            Self {
                result: Ok(title.into()),
                create: Some(create),
                error_log: None,
                seen_url: Mutex::new(String::new()),
            }
        }

        fn failing(message: &str, error_log: Option<&'static str>) -> Self {
            Self {
                result: Err(message.into()),
                create: None,
                error_log,
                seen_url: Mutex::new(String::new()),
            }
        }
    }

    #[async_trait]
    impl AcquisitionEngine for StubAcquire {
        async fn acquire(
            &self,
            url: &str,
            out_dir: &Path,
            hooks: &dyn AcquireHooks,
        ) -> Result<String, Box<dyn std::error::Error + Send + Sync>> {
            *self.seen_url.lock().unwrap() = url.to_string();
            hooks.on_progress(50, "50.0% · 1.0MiB/s");
            if let Some(line) = self.error_log {
                hooks.on_log(line);
            }
            if let Some(name) = self.create {
                fs::write(out_dir.join(name), b"audio").unwrap();
            }
            match &self.result {
                Ok(title) => Ok(title.clone()),
                Err(e) => Err(e.clone().into()),
            }
        }
    }

    /// Acquisition engine that blocks until released, for in-flight tests.
    struct GatedAcquire {
        gate: async_channel::Receiver<()>,
    }

    #[async_trait]
    impl AcquisitionEngine for GatedAcquire {
        async fn acquire(
            &self,
            _url: &str,
            _out_dir: &Path,
            _hooks: &dyn AcquireHooks,
        ) -> Result<String, Box<dyn std::error::Error + Send + Sync>> {
            let _ = self.gate.recv().await;
            Err("released".into())
        }
    }

    struct StubTranscribe {
        result: Result<String, String>,
        called: Arc<AtomicBool>,
    }

    impl StubTranscribe {
        fn ok(text: &str) -> Self {
            Self {
                result: Ok(text.into()),
                called: Arc::new(AtomicBool::new(false)),
            }
        }
    }

    #[async_trait]
    impl TranscriptionEngine for StubTranscribe {
        async fn transcribe(
            &self,
            _audio: &Path,
            _language: Option<&str>,
            _quality: Quality,
            _context_hint: Option<&str>,
            hooks: &dyn TranscribeHooks,
        ) -> Result<String, Box<dyn std::error::Error + Send + Sync>> {
            self.called.store(true, Ordering::SeqCst);
            hooks.on_phase("Transcribing 1:00 (fast)");
            match &self.result {
                Ok(text) => Ok(text.clone()),
                Err(e) => Err(e.clone().into()),
            }
        }
    }

    struct StubAnalyze {
        result: Result<String, String>,
        called: Arc<AtomicBool>,
    }

    impl StubAnalyze {
        fn ok(text: &str) -> Self {
            Self {
                result: Ok(text.into()),
                called: Arc::new(AtomicBool::new(false)),
            }
        }

        fn failing(message: &str) -> Self {
            Self {
                result: Err(message.into()),
                called: Arc::new(AtomicBool::new(false)),
            }
        }
    }

    #[async_trait]
    impl AnalysisEngine for StubAnalyze {
        async fn analyze(
            &self,
            _text: &str,
            _instruction: &str,
            _api_key: &str,
            hooks: &dyn AnalyzeHooks,
        ) -> Result<String, Box<dyn std::error::Error + Send + Sync>> {
            self.called.store(true, Ordering::SeqCst);
            hooks.on_log("Sending to test-model...");
            match &self.result {
                Ok(text) => Ok(text.clone()),
                Err(e) => Err(e.clone().into()),
            }
        }
    }

    struct StubVault(String);

    impl CredentialStore for StubVault {
        fn load(&self) -> String {
            self.0.clone()
        }

        fn save(&self, _key: &str) -> Result<(), Box<dyn std::error::Error>> {
            Ok(())
        }
    }

    fn studio_with(
        workdir: &Path,
        engines: Engines,
        api_key: &str,
    ) -> (Studio, async_channel::Receiver<DisplayEvent>) {
        let (tx, rx) = async_channel::unbounded();
        let studio = Studio::new(
            workdir.to_path_buf(),
            tokio::runtime::Handle::current(),
            tx,
            engines,
            Box::new(StubVault(api_key.into())),
        );
        (studio, rx)
    }

    async fn wait_finished(rx: &async_channel::Receiver<DisplayEvent>) {
        while let Ok(event) = rx.recv().await {
            if matches!(event, DisplayEvent::RunFinished) {
                return;
            }
        }
        panic!("display channel closed before RunFinished");
    }

    fn request(url: &str) -> TranscribeRequest {
        TranscribeRequest {
            url: url.into(),
            language: "auto".into(),
            quality: Quality::Fast,
            context_hint: String::new(),
        }
    }

    fn txt_artifacts(dir: &Path) -> Vec<PathBuf> {
        fs::read_dir(dir)
            .unwrap()
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("txt"))
            .collect()
    }

    #[tokio::test]
    async fn transcribe_happy_path() {
        let dir = tempfile::tempdir().unwrap();
        let acquire = Arc::new(StubAcquire::ok("Episode", "Episode.mp3"));
        let transcribe = Arc::new(StubTranscribe::ok("hello world"));
        let (studio, rx) = studio_with(
            dir.path(),
            Engines {
                acquisition: acquire.clone(),
                transcription: transcribe.clone(),
                analysis: Arc::new(StubAnalyze::ok("unused")),
            },
            "",
        );

        studio.run_transcribe(request("https://youtu.be/abc12345678"));
        wait_finished(&rx).await;

        assert_eq!(
            *acquire.seen_url.lock().unwrap(),
            "https://www.youtube.com/watch?v=abc12345678"
        );
        assert_eq!(studio.stage(StageId::Acquisition).status, StageStatus::Done);
        assert_eq!(studio.stage(StageId::Transcription).status, StageStatus::Done);
        assert_eq!(studio.stage(StageId::Analysis).status, StageStatus::Pending);
        assert_eq!(studio.transcript(), "hello world");
        assert!(!studio.is_busy());

        let artifacts = txt_artifacts(dir.path());
        assert_eq!(artifacts.len(), 1);
        assert_eq!(fs::read_to_string(&artifacts[0]).unwrap(), "hello world");
    }

    #[tokio::test]
    async fn acquisition_failure_prefers_engine_error_line() {
        let dir = tempfile::tempdir().unwrap();
        let transcribe = Arc::new(StubTranscribe::ok("unused"));
        let (studio, rx) = studio_with(
            dir.path(),
            Engines {
                acquisition: Arc::new(StubAcquire::failing(
                    "yt-dlp exited with 1",
                    Some("ERROR: [youtube] abc: Video unavailable"),
                )),
                transcription: transcribe.clone(),
                analysis: Arc::new(StubAnalyze::ok("unused")),
            },
            "",
        );

        studio.run_transcribe(request("https://example.com/video"));
        wait_finished(&rx).await;

        let stage = studio.stage(StageId::Acquisition);
        assert_eq!(stage.status, StageStatus::Error);
        assert_eq!(stage.detail, "ERROR: [youtube] abc: Video unavailable");
        assert_eq!(studio.stage(StageId::Transcription).status, StageStatus::Pending);
        assert!(!transcribe.called.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn unresolved_download_counts_as_acquisition_failure() {
        let dir = tempfile::tempdir().unwrap();
        let acquire = Arc::new(StubAcquire {
            result: Ok("Ghost".into()),
            create: None,
            error_log: None,
            seen_url: Mutex::new(String::new()),
        });
        let (studio, rx) = studio_with(
            dir.path(),
            Engines {
                acquisition: acquire,
                transcription: Arc::new(StubTranscribe::ok("unused")),
                analysis: Arc::new(StubAnalyze::ok("unused")),
            },
            "",
        );

        studio.run_transcribe(request("https://example.com/video"));
        wait_finished(&rx).await;

        let stage = studio.stage(StageId::Acquisition);
        assert_eq!(stage.status, StageStatus::Error);
        assert_eq!(stage.detail, "no file produced");
    }

    #[tokio::test]
    async fn empty_url_is_rejected_synchronously() {
        let dir = tempfile::tempdir().unwrap();
        let (studio, rx) = studio_with(
            dir.path(),
            Engines {
                acquisition: Arc::new(StubAcquire::ok("x", "x.mp3")),
                transcription: Arc::new(StubTranscribe::ok("unused")),
                analysis: Arc::new(StubAnalyze::ok("unused")),
            },
            "",
        );

        studio.run_transcribe(request("   "));
        // A rejected run still ends with RunFinished, or a front-end
        // blocking on the display channel would never wake up.
        wait_finished(&rx).await;

        let stage = studio.stage(StageId::Acquisition);
        assert_eq!(stage.status, StageStatus::Error);
        assert_eq!(stage.detail, "missing URL");
        assert!(!studio.is_busy());
    }

    #[tokio::test]
    async fn rejected_url_keeps_earlier_results_on_the_board() {
        let dir = tempfile::tempdir().unwrap();
        let (studio, rx) = studio_with(
            dir.path(),
            Engines {
                acquisition: Arc::new(StubAcquire::ok("Episode", "Episode.mp3")),
                transcription: Arc::new(StubTranscribe::ok("hello world")),
                analysis: Arc::new(StubAnalyze::ok("unused")),
            },
            "",
        );

        studio.run_transcribe(request("https://example.com/video"));
        wait_finished(&rx).await;

        studio.run_transcribe(request(""));
        wait_finished(&rx).await;

        let stage = studio.stage(StageId::Acquisition);
        assert_eq!(stage.status, StageStatus::Error);
        assert_eq!(stage.detail, "missing URL");
        assert_eq!(studio.stage(StageId::Transcription).status, StageStatus::Done);
        assert_eq!(studio.transcript(), "hello world");
    }

    #[tokio::test]
    async fn empty_transcription_is_no_result() {
        let dir = tempfile::tempdir().unwrap();
        let (studio, rx) = studio_with(
            dir.path(),
            Engines {
                acquisition: Arc::new(StubAcquire::ok("Episode", "Episode.mp3")),
                transcription: Arc::new(StubTranscribe::ok("   ")),
                analysis: Arc::new(StubAnalyze::ok("unused")),
            },
            "",
        );

        studio.run_transcribe(request("https://example.com/video"));
        wait_finished(&rx).await;

        let stage = studio.stage(StageId::Transcription);
        assert_eq!(stage.status, StageStatus::Error);
        assert_eq!(stage.detail, "no result");
        assert_eq!(studio.transcript(), "");
    }

    #[tokio::test]
    async fn analyze_without_transcript_never_calls_the_engine() {
        let dir = tempfile::tempdir().unwrap();
        let analyze = Arc::new(StubAnalyze::ok("unused"));
        let (studio, rx) = studio_with(
            dir.path(),
            Engines {
                acquisition: Arc::new(StubAcquire::ok("x", "x.mp3")),
                transcription: Arc::new(StubTranscribe::ok("unused")),
                analysis: analyze.clone(),
            },
            "sk-or-key",
        );

        studio.run_analyze("");
        wait_finished(&rx).await;

        let stage = studio.stage(StageId::Analysis);
        assert_eq!(stage.status, StageStatus::Error);
        assert_eq!(stage.detail, "transcribe first");
        assert!(!analyze.called.load(Ordering::SeqCst));
        assert!(!studio.is_busy());
    }

    #[tokio::test]
    async fn analyze_without_key_never_calls_the_engine() {
        let dir = tempfile::tempdir().unwrap();
        let analyze = Arc::new(StubAnalyze::ok("unused"));
        let (studio, rx) = studio_with(
            dir.path(),
            Engines {
                acquisition: Arc::new(StubAcquire::ok("Episode", "Episode.mp3")),
                transcription: Arc::new(StubTranscribe::ok("hello world")),
                analysis: analyze.clone(),
            },
            "",
        );

        studio.run_transcribe(request("https://example.com/video"));
        wait_finished(&rx).await;

        studio.run_analyze("find the insights");
        wait_finished(&rx).await;

        let stage = studio.stage(StageId::Analysis);
        assert_eq!(stage.status, StageStatus::Error);
        assert_eq!(stage.detail, "missing API key");
        assert!(!analyze.called.load(Ordering::SeqCst));
        assert_eq!(studio.analysis(), "");
    }

    #[tokio::test]
    async fn analyze_happy_path_persists_a_suffixed_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let (studio, rx) = studio_with(
            dir.path(),
            Engines {
                acquisition: Arc::new(StubAcquire::ok("Episode", "Episode.mp3")),
                transcription: Arc::new(StubTranscribe::ok("hello world")),
                analysis: Arc::new(StubAnalyze::ok("insightful analysis")),
            },
            "sk-or-key",
        );

        studio.run_transcribe(request("https://example.com/video"));
        wait_finished(&rx).await;
        studio.run_analyze("");

        let mut saw_analysis_event = false;
        while let Ok(event) = rx.recv().await {
            match event {
                DisplayEvent::AnalysisReady(text) => {
                    assert_eq!(text, "insightful analysis");
                    saw_analysis_event = true;
                }
                DisplayEvent::RunFinished => break,
                _ => {}
            }
        }
        assert!(saw_analysis_event);

        assert_eq!(studio.stage(StageId::Analysis).status, StageStatus::Done);
        assert_eq!(studio.analysis(), "insightful analysis");
        // Stages 1-2 keep their results across an analyze run.
        assert_eq!(studio.stage(StageId::Acquisition).status, StageStatus::Done);

        let analysis_file = txt_artifacts(dir.path())
            .into_iter()
            .find(|p| p.to_string_lossy().contains("_analysis_"))
            .expect("analysis artifact");
        assert_eq!(
            fs::read_to_string(analysis_file).unwrap(),
            "insightful analysis"
        );
    }

    #[tokio::test]
    async fn analyze_engine_failure_reads_api_error() {
        let dir = tempfile::tempdir().unwrap();
        let (studio, rx) = studio_with(
            dir.path(),
            Engines {
                acquisition: Arc::new(StubAcquire::ok("Episode", "Episode.mp3")),
                transcription: Arc::new(StubTranscribe::ok("hello world")),
                analysis: Arc::new(StubAnalyze::failing("boom")),
            },
            "sk-or-key",
        );

        studio.run_transcribe(request("https://example.com/video"));
        wait_finished(&rx).await;
        studio.run_analyze("");
        wait_finished(&rx).await;

        let stage = studio.stage(StageId::Analysis);
        assert_eq!(stage.status, StageStatus::Error);
        assert_eq!(stage.detail, "API error");
        assert_eq!(studio.analysis(), "");
    }

    #[tokio::test]
    async fn second_run_while_in_flight_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let (gate_tx, gate_rx) = async_channel::unbounded();
        let (studio, rx) = studio_with(
            dir.path(),
            Engines {
                acquisition: Arc::new(GatedAcquire { gate: gate_rx }),
                transcription: Arc::new(StubTranscribe::ok("unused")),
                analysis: Arc::new(StubAnalyze::ok("unused")),
            },
            "sk-or-key",
        );

        studio.run_transcribe(request("https://example.com/video"));
        assert!(studio.is_busy());

        // Wait until the worker has activated stage 1.
        for _ in 0..100 {
            if studio.stage(StageId::Acquisition).status == StageStatus::Active {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let snapshot = studio.stages();

        studio.run_transcribe(request("https://example.com/other"));
        studio.run_analyze("prompt");

        let after = studio.stages();
        for (a, b) in snapshot.iter().zip(after.iter()) {
            assert_eq!(a.status, b.status);
        }
        assert!(studio.is_busy());

        gate_tx.send(()).await.unwrap();
        wait_finished(&rx).await;
        assert!(!studio.is_busy());
    }

    #[tokio::test]
    async fn torn_down_display_does_not_wedge_a_run() {
        let dir = tempfile::tempdir().unwrap();
        let (studio, rx) = studio_with(
            dir.path(),
            Engines {
                acquisition: Arc::new(StubAcquire::ok("Episode", "Episode.mp3")),
                transcription: Arc::new(StubTranscribe::ok("hello world")),
                analysis: Arc::new(StubAnalyze::ok("unused")),
            },
            "",
        );
        drop(rx);

        studio.run_transcribe(request("https://example.com/video"));
        for _ in 0..500 {
            if !studio.is_busy() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        assert!(!studio.is_busy());
        assert_eq!(studio.transcript(), "hello world");
        assert_eq!(studio.stage(StageId::Transcription).status, StageStatus::Done);
    }
}
