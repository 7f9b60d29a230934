use audio_studio::{
    Config, CredentialStore, DisplayEvent, Engines, Quality, StageId, StageStatus, Studio,
    TranscribeRequest, Vault,
};

fn usage() -> ! {
    eprintln!(
        "Usage: audio-studio <URL> [--language LANG] [--quality fast|medium|accurate]\n\
         \x20                  [--context TEXT] [--analyze] [--prompt TEXT]\n\
         \x20      audio-studio --set-key KEY\n\
         \n\
         Downloads the URL's audio, transcribes it, and (with --analyze and a\n\
         saved OpenRouter key) produces a written analysis of the transcript."
    );
    std::process::exit(1);
}

fn main() {
    env_logger::init();
    log::info!("Audio Studio starting");

    let mut url = None;
    let mut language = None;
    let mut quality = None;
    let mut context = String::new();
    let mut analyze = false;
    let mut prompt = String::new();
    let mut set_key = None;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--set-key" => set_key = Some(args.next().unwrap_or_else(|| usage())),
            "--language" => language = Some(args.next().unwrap_or_else(|| usage())),
            "--quality" => {
                let value = args.next().unwrap_or_else(|| usage());
                quality = Some(Quality::parse(&value).unwrap_or_else(|| usage()));
            }
            "--context" => context = args.next().unwrap_or_default(),
            "--analyze" => analyze = true,
            "--prompt" => prompt = args.next().unwrap_or_default(),
            "--help" | "-h" => usage(),
            other if other.starts_with('-') => usage(),
            other => url = Some(other.to_string()),
        }
    }

    let vault = Vault::default_location();
    if let Some(key) = set_key {
        if let Err(e) = vault.save(&key) {
            eprintln!("Failed to save API key: {e}");
            std::process::exit(1);
        }
        println!("API key saved.");
        return;
    }

    let Some(url) = url else { usage() };

    let config = Config::load();
    let rt = tokio::runtime::Runtime::new().expect("failed to create tokio runtime");
    let (tx, rx) = async_channel::unbounded();
    let studio = Studio::new(
        config.downloads_dir.clone(),
        rt.handle().clone(),
        tx,
        Engines::production(&config),
        Box::new(vault),
    );

    studio.run_transcribe(TranscribeRequest {
        url,
        language: language.unwrap_or_else(|| config.language.clone()),
        quality: quality.unwrap_or(config.quality),
        context_hint: context,
    });
    rt.block_on(watch(&studio, &rx));

    if studio.stage(StageId::Transcription).status != StageStatus::Done {
        std::process::exit(1);
    }
    println!("\n--- TRANSCRIPT ---\n{}", studio.transcript());

    if analyze {
        studio.run_analyze(&prompt);
        rt.block_on(watch(&studio, &rx));
        if studio.stage(StageId::Analysis).status != StageStatus::Done {
            std::process::exit(1);
        }
        println!("\n--- ANALYSIS ---\n{}", studio.analysis());
    }
}

/// Print stage lines as they change until the run finishes.
async fn watch(studio: &Studio, rx: &async_channel::Receiver<DisplayEvent>) {
    let mut last = [String::new(), String::new(), String::new()];
    while let Ok(event) = rx.recv().await {
        match event {
            DisplayEvent::StagesChanged => {
                for (i, id) in StageId::ALL.into_iter().enumerate() {
                    let stage = studio.stage(id);
                    let mark = match stage.status {
                        StageStatus::Pending => continue,
                        StageStatus::Active => "…",
                        StageStatus::Done => "✓",
                        StageStatus::Error => "✗",
                    };
                    let line = format!("{mark} {:<13} {}", id.name(), stage.detail);
                    if line != last[i] {
                        println!("{line}");
                        last[i] = line;
                    }
                }
            }
            DisplayEvent::RunFinished => break,
            DisplayEvent::TranscriptReady(_) | DisplayEvent::AnalysisReady(_) => {}
        }
    }
}
