use crate::interchange::InterchangeError;
use pdf_engine::PdfEngineError;
use std::fmt;
use std::path::PathBuf;
use storage::StorageError;

/// What a document session is busy with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activity {
    Saving,
    Importing,
}

impl fmt::Display for Activity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Saving => f.write_str("a save"),
            Self::Importing => f.write_str("an import"),
        }
    }
}

/// Underlying cause of a whole-document failure.
#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error(transparent)]
    Engine(#[from] PdfEngineError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Interchange(#[from] InterchangeError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Whole-document failures. Per-page and per-record problems never surface
/// here; they are skipped and reported.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("could not open {}: {source}", path.display())]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: PersistError,
    },
    #[error("could not save {}: {source}", path.display())]
    SaveFailed {
        path: PathBuf,
        #[source]
        source: PersistError,
    },
    #[error("could not close document: {0}")]
    CloseFailed(#[source] PdfEngineError),
    #[error("document is busy: {0} is already in progress")]
    Busy(Activity),
}

impl SessionError {
    pub(crate) fn open(path: impl Into<PathBuf>, source: impl Into<PersistError>) -> Self {
        Self::OpenFailed { path: path.into(), source: source.into() }
    }

    pub(crate) fn save(path: impl Into<PathBuf>, source: impl Into<PersistError>) -> Self {
        Self::SaveFailed { path: path.into(), source: source.into() }
    }
}
