mod overlay;
mod surface;
mod undo;

pub use overlay::OverlayCache;
pub use surface::{CaptureSurface, DrawingObserver, InkSurface, MAX_HISTORY_SIZE};
pub use undo::UndoRedoController;
