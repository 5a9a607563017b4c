use crate::overlay::OverlayCache;
use crate::surface::CaptureSurface;
use doc_model::PageId;

/// Routes undo/redo to the surface of the visible page. History lives in each
/// surface, so switching pages switches histories.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UndoRedoController {
    active: Option<PageId>,
}

impl UndoRedoController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_active(&mut self, page: PageId) {
        self.active = Some(page);
    }

    pub fn clear_active(&mut self) {
        self.active = None;
    }

    pub fn active(&self) -> Option<PageId> {
        self.active
    }

    /// No-op returning `false` without an active surface or an undoable edit.
    pub fn undo<S: CaptureSurface>(&self, overlays: &mut OverlayCache<S>) -> bool {
        match self.active {
            Some(page) => overlays.get_mut(page).is_some_and(|surface| surface.undo()),
            None => false,
        }
    }

    /// No-op returning `false` without an active surface or a redoable edit.
    pub fn redo<S: CaptureSurface>(&self, overlays: &mut OverlayCache<S>) -> bool {
        match self.active {
            Some(page) => overlays.get_mut(page).is_some_and(|surface| surface.redo()),
            None => false,
        }
    }

    pub fn can_undo<S: CaptureSurface>(&self, overlays: &OverlayCache<S>) -> bool {
        self.active.and_then(|page| overlays.get(page)).is_some_and(|surface| surface.can_undo())
    }

    pub fn can_redo<S: CaptureSurface>(&self, overlays: &OverlayCache<S>) -> bool {
        self.active.and_then(|page| overlays.get(page)).is_some_and(|surface| surface.can_redo())
    }
}
