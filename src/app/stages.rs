use std::sync::Mutex;

/// One of the three pipeline stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageId {
    Acquisition,
    Transcription,
    Analysis,
}

impl StageId {
    pub const ALL: [StageId; 3] = [StageId::Acquisition, StageId::Transcription, StageId::Analysis];

    pub fn name(self) -> &'static str {
        match self {
            StageId::Acquisition => "Download",
            StageId::Transcription => "Transcription",
            StageId::Analysis => "Analysis",
        }
    }

    fn index(self) -> usize {
        match self {
            StageId::Acquisition => 0,
            StageId::Transcription => 1,
            StageId::Analysis => 2,
        }
    }
}

/// Stage lifecycle: Pending → Active → Done | Error. No transition skips
/// Active, and only a reset returns a stage to Pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StageStatus {
    #[default]
    Pending,
    Active,
    Done,
    Error,
}

#[derive(Debug, Clone, Default)]
pub struct StageState {
    pub status: StageStatus,
    /// Display detail: live progress while active, a duration when done,
    /// the failure reason on error.
    pub detail: String,
}

/// Holds the three stages' lifecycle, decoupled from rendering.
#[derive(Default)]
pub struct StageBoard {
    stages: Mutex<[StageState; 3]>,
}

impl StageBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return all three stages to Pending (start of a fresh transcribe run).
    pub fn reset(&self) {
        *self.stages.lock().unwrap() = Default::default();
    }

    /// Return a single stage to Pending (start of a re-run of that stage).
    pub fn reset_stage(&self, id: StageId) {
        self.stages.lock().unwrap()[id.index()] = StageState::default();
    }

    pub fn begin(&self, id: StageId) {
        let mut stages = self.stages.lock().unwrap();
        let stage = &mut stages[id.index()];
        debug_assert_eq!(stage.status, StageStatus::Pending);
        stage.status = StageStatus::Active;
        stage.detail.clear();
    }

    pub fn done(&self, id: StageId, detail: &str) {
        let mut stages = self.stages.lock().unwrap();
        let stage = &mut stages[id.index()];
        debug_assert_eq!(stage.status, StageStatus::Active);
        stage.status = StageStatus::Done;
        stage.detail = detail.to_string();
    }

    pub fn fail(&self, id: StageId, detail: &str) {
        let mut stages = self.stages.lock().unwrap();
        let stage = &mut stages[id.index()];
        debug_assert_eq!(stage.status, StageStatus::Active);
        stage.status = StageStatus::Error;
        stage.detail = detail.to_string();
    }

    /// Update the live detail text. Only the active stage accepts writes;
    /// returns false once the stage has left Active, which tells the
    /// progress ticker to stop.
    pub fn set_detail(&self, id: StageId, detail: &str) -> bool {
        let mut stages = self.stages.lock().unwrap();
        let stage = &mut stages[id.index()];
        if stage.status != StageStatus::Active {
            return false;
        }
        stage.detail = detail.to_string();
        true
    }

    pub fn stage(&self, id: StageId) -> StageState {
        self.stages.lock().unwrap()[id.index()].clone()
    }

    pub fn stages(&self) -> [StageState; 3] {
        self.stages.lock().unwrap().clone()
    }
}
