use std::fs;
use std::path::PathBuf;

const KEY_NAME: &str = "OPENROUTER_API_KEY";

/// Read/write access to the single stored secret.
pub trait CredentialStore: Send + Sync {
    /// Returns the stored key, or an empty string if none is saved.
    fn load(&self) -> String;
    fn save(&self, key: &str) -> Result<(), Box<dyn std::error::Error>>;
}

/// File-backed credential store: one `OPENROUTER_API_KEY=...` line in an
/// env-style file. Unrelated lines in the file are preserved on save.
pub struct Vault {
    path: PathBuf,
}

impl Vault {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Default location: ~/.config/audio-studio/credentials.env
    pub fn default_location() -> Self {
        Self::new(crate::config::Config::dir().join("credentials.env"))
    }
}

impl CredentialStore for Vault {
    fn load(&self) -> String {
        let Ok(data) = fs::read_to_string(&self.path) else {
            return String::new();
        };
        for line in data.lines() {
            if let Some(value) = line.strip_prefix(KEY_NAME).and_then(|r| r.strip_prefix('=')) {
                return value.trim().to_string();
            }
        }
        String::new()
    }

    fn save(&self, key: &str) -> Result<(), Box<dyn std::error::Error>> {
        let mut lines: Vec<String> = match fs::read_to_string(&self.path) {
            Ok(data) => data
                .lines()
                .filter(|l| !l.starts_with(&format!("{KEY_NAME}=")))
                .map(str::to_string)
                .collect(),
            Err(_) => Vec::new(),
        };
        lines.push(format!("{KEY_NAME}={key}"));

        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }
        fs::write(&self.path, lines.join("\n") + "\n")?;
        Ok(())
    }
}
