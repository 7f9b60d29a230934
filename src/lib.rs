pub mod analyzer;
pub mod app;
pub mod config;
pub mod downloader;
pub mod output;
pub mod transcriber;
pub mod vault;

pub use app::pipeline::{Engines, Studio, TranscribeRequest};
pub use app::stages::{StageId, StageState, StageStatus};
pub use app::DisplayEvent;
pub use config::Config;
pub use transcriber::Quality;
pub use vault::{CredentialStore, Vault};
