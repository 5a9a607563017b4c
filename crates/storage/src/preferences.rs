use crate::sidecar::{read_if_exists, write_atomic};
use crate::StorageError;
use directories::ProjectDirs;
use doc_model::InkPreferences;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

pub const PREFERENCES_FILE: &str = "ink-preferences.json";

const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct Stored {
    version: u32,
    preferences: InkPreferences,
}

/// The preference file of one data directory. Writes replace the file
/// atomically, so a crash mid-save keeps the previous preferences.
#[derive(Debug, Clone)]
pub struct PreferenceStore {
    file: PathBuf,
}

impl PreferenceStore {
    /// Uses `dir` when given, otherwise the platform's local data directory.
    pub fn locate(dir: Option<PathBuf>) -> Result<Self, StorageError> {
        let dir = match dir {
            Some(dir) => dir,
            None => ProjectDirs::from("dev", "ButterPaper", "ButterPaper Ink")
                .ok_or(StorageError::NoDataDirectory)?
                .data_local_dir()
                .to_path_buf(),
        };

        Ok(Self::in_dir(dir))
    }

    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self { file: dir.as_ref().join(PREFERENCES_FILE) }
    }

    pub fn path(&self) -> &Path {
        &self.file
    }

    /// Defaults when the file does not exist yet.
    pub async fn load(&self) -> Result<InkPreferences, StorageError> {
        let Some(bytes) = read_if_exists(&self.file).await? else {
            debug!(path = %self.file.display(), "no preference file, using defaults");
            return Ok(InkPreferences::default());
        };

        let stored: Stored = serde_json::from_slice(&bytes)?;
        if stored.version > SCHEMA_VERSION {
            return Err(StorageError::UnsupportedSchema { found: stored.version, supported: SCHEMA_VERSION });
        }

        Ok(stored.preferences)
    }

    pub async fn save(&self, preferences: &InkPreferences) -> Result<(), StorageError> {
        if let Some(dir) = self.file.parent() {
            fs::create_dir_all(dir).await?;
        }

        let stored = Stored { version: SCHEMA_VERSION, preferences: preferences.clone() };
        write_atomic(&self.file, &serde_json::to_vec_pretty(&stored)?).await?;
        debug!(path = %self.file.display(), "saved preferences");
        Ok(())
    }
}
