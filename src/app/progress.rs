use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::time::MissedTickBehavior;

use super::stages::{StageBoard, StageId};
use super::DisplayEvent;

/// Shared phase text written by an engine callback and read by the tick
/// loop. Last write wins; phase text is advisory, not transactional.
#[derive(Clone, Default)]
pub struct PhaseCell(Arc<Mutex<String>>);

impl PhaseCell {
    pub fn set(&self, text: &str) {
        *self.0.lock().unwrap() = text.to_string();
    }

    pub fn get(&self) -> String {
        self.0.lock().unwrap().clone()
    }
}

/// Once-per-second tick loop for one active stage. While it runs it is the
/// sole writer of that stage's detail text and the sole source of display
/// refreshes; engine callbacks only ever touch the [`PhaseCell`].
pub struct StageTicker {
    handle: tokio::task::JoinHandle<()>,
}

impl StageTicker {
    pub fn start(
        board: Arc<StageBoard>,
        events: async_channel::Sender<DisplayEvent>,
        stage: StageId,
        phase: PhaseCell,
    ) -> Self {
        let handle = tokio::spawn(async move {
            let started = Instant::now();
            let mut interval = tokio::time::interval(Duration::from_secs(1));
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let elapsed = started.elapsed().as_secs();
                let text = phase.get();
                let detail = if text.is_empty() {
                    format!("{elapsed}s")
                } else {
                    format!("{text} · {elapsed}s")
                };
                // Stage left Active, or the display is gone: stop ticking.
                if !board.set_detail(stage, &detail) {
                    break;
                }
                if events.try_send(DisplayEvent::StagesChanged).is_err() {
                    break;
                }
            }
        });
        Self { handle }
    }

    /// Terminate the tick loop immediately. Called by the orchestrator the
    /// moment the stage completes, so the ticker never outlives its stage.
    pub fn stop(self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::stages::StageStatus;

    #[test]
    fn phase_cell_last_write_wins() {
        let cell = PhaseCell::default();
        assert_eq!(cell.get(), "");
        cell.set("42% · 1.3MB/s");
        cell.set("Converting...");
        assert_eq!(cell.get(), "Converting...");
    }

    #[tokio::test(start_paused = true)]
    async fn ticker_merges_phase_and_elapsed_into_detail() {
        let board = Arc::new(StageBoard::new());
        board.begin(StageId::Acquisition);
        let (tx, rx) = async_channel::unbounded();
        let phase = PhaseCell::default();
        phase.set("Connecting...");

        let ticker = StageTicker::start(board.clone(), tx, StageId::Acquisition, phase);
        let event = rx.recv().await.unwrap();
        assert!(matches!(event, DisplayEvent::StagesChanged));

        let stage = board.stage(StageId::Acquisition);
        assert_eq!(stage.status, StageStatus::Active);
        assert!(stage.detail.starts_with("Connecting... · "));
        assert!(stage.detail.ends_with('s'));
        ticker.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn ticker_stops_when_display_is_gone() {
        let board = Arc::new(StageBoard::new());
        board.begin(StageId::Transcription);
        let (tx, rx) = async_channel::unbounded::<DisplayEvent>();
        drop(rx);

        let ticker = StageTicker::start(board.clone(), tx, StageId::Transcription, PhaseCell::default());
        tokio::time::sleep(Duration::from_secs(5)).await;
        // First tick wrote a detail, then the closed channel ended the loop.
        assert!(ticker.handle.is_finished());
        ticker.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn ticker_stops_once_the_stage_completes() {
        let board = Arc::new(StageBoard::new());
        board.begin(StageId::Analysis);
        let (tx, rx) = async_channel::unbounded();

        let ticker = StageTicker::start(board.clone(), tx, StageId::Analysis, PhaseCell::default());
        let _ = rx.recv().await.unwrap();
        board.done(StageId::Analysis, "1.5s");

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(ticker.handle.is_finished());
        assert_eq!(board.stage(StageId::Analysis).detail, "1.5s");
        ticker.stop();
    }
}
