pub mod pipeline;
pub mod progress;
pub mod stages;

/// Events sent from background workers to whatever renders the pipeline.
///
/// The sending half of an `async_channel` is the injected display capability:
/// a dropped receiver means the display was torn down, sends are silently
/// swallowed, and progress tick loops stop on their own.
#[derive(Debug, Clone)]
pub enum DisplayEvent {
    /// Stage status or detail changed; re-read the board.
    StagesChanged,
    TranscriptReady(String),
    /// Analysis finished; the display should switch to the analysis view.
    AnalysisReady(String),
    /// The in-flight run ended, success or failure; controls may re-enable.
    RunFinished,
}
