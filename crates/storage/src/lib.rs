//! Files that live beside the PDF or outside it: interchange sidecars and the
//! user's ink preferences.

mod preferences;
mod sidecar;

pub use preferences::{PreferenceStore, PREFERENCES_FILE};
pub use sidecar::{read_if_exists, remove_if_exists, sidecar_path, write_atomic, StagedWrite};

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("unable to resolve local data directory")]
    NoDataDirectory,
    #[error("preferences were written by a newer version (schema {found}, supported {supported})")]
    UnsupportedSchema { found: u32, supported: u32 },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}
