use doc_model::{Drawing, DrawingError, Stroke};
use std::collections::VecDeque;

/// Upper bound on retained edits per surface.
pub const MAX_HISTORY_SIZE: usize = 256;

/// Called with the current drawing after every edit.
pub type DrawingObserver = Box<dyn FnMut(&Drawing)>;

/// A live freehand editing surface bound to one visible page.
///
/// Every method that changes the drawing through editing (including undo and
/// redo) must call the observer before returning. `replace_drawing` installs
/// content from the page and does not notify.
pub trait CaptureSurface {
    fn drawing(&self) -> &Drawing;
    fn replace_drawing(&mut self, drawing: Drawing);
    fn set_observer(&mut self, observer: Option<DrawingObserver>);
    /// Returns whether an edit was undone.
    fn undo(&mut self) -> bool;
    /// Returns whether an edit was redone.
    fn redo(&mut self) -> bool;
    fn can_undo(&self) -> bool;
    fn can_redo(&self) -> bool;
}

#[derive(Debug, Clone, PartialEq)]
enum Edit {
    Add { index: usize, stroke: Stroke },
    Remove { index: usize, stroke: Stroke },
    Clear { strokes: Vec<Stroke> },
}

impl Edit {
    fn revert(&self, drawing: &mut Drawing) -> Result<(), DrawingError> {
        match self {
            Self::Add { index, .. } => drawing.remove(*index).map(|_| ()),
            Self::Remove { index, stroke } => drawing.insert(*index, stroke.clone()),
            Self::Clear { strokes } => {
                *drawing = Drawing::from_strokes(strokes.clone());
                Ok(())
            }
        }
    }

    fn apply(&self, drawing: &mut Drawing) -> Result<(), DrawingError> {
        match self {
            Self::Add { index, stroke } => drawing.insert(*index, stroke.clone()),
            Self::Remove { index, .. } => drawing.remove(*index).map(|_| ()),
            Self::Clear { .. } => {
                drawing.clear();
                Ok(())
            }
        }
    }
}

/// Default capture surface: an in-memory drawing with linear undo/redo.
#[derive(Default)]
pub struct InkSurface {
    drawing: Drawing,
    undo_stack: VecDeque<Edit>,
    redo_stack: Vec<Edit>,
    observer: Option<DrawingObserver>,
}

impl std::fmt::Debug for InkSurface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InkSurface")
            .field("strokes", &self.drawing.len())
            .field("undo", &self.undo_stack.len())
            .field("redo", &self.redo_stack.len())
            .field("observed", &self.observer.is_some())
            .finish()
    }
}

impl InkSurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_stroke(&mut self, stroke: Stroke) {
        let index = self.drawing.len();
        self.drawing.push(stroke.clone());
        self.record(Edit::Add { index, stroke });
    }

    pub fn remove_stroke(&mut self, index: usize) -> Result<Stroke, DrawingError> {
        let stroke = self.drawing.remove(index)?;
        self.record(Edit::Remove { index, stroke: stroke.clone() });
        Ok(stroke)
    }

    /// Removes every stroke as one undoable edit. No-op on an empty drawing.
    pub fn clear(&mut self) {
        if self.drawing.is_empty() {
            return;
        }
        let strokes = self.drawing.strokes().to_vec();
        self.drawing.clear();
        self.record(Edit::Clear { strokes });
    }

    pub fn undo_count(&self) -> usize {
        self.undo_stack.len()
    }

    pub fn redo_count(&self) -> usize {
        self.redo_stack.len()
    }

    fn record(&mut self, edit: Edit) {
        self.redo_stack.clear();
        self.undo_stack.push_back(edit);

        if self.undo_stack.len() > MAX_HISTORY_SIZE {
            self.undo_stack.pop_front();
        }

        self.notify();
    }

    fn notify(&mut self) {
        if let Some(observer) = self.observer.as_mut() {
            observer(&self.drawing);
        }
    }
}

impl CaptureSurface for InkSurface {
    fn drawing(&self) -> &Drawing {
        &self.drawing
    }

    fn replace_drawing(&mut self, drawing: Drawing) {
        if self.drawing == drawing {
            return;
        }
        // edits recorded against other content cannot be replayed onto this one
        self.drawing = drawing;
        self.undo_stack.clear();
        self.redo_stack.clear();
    }

    fn set_observer(&mut self, observer: Option<DrawingObserver>) {
        self.observer = observer;
    }

    fn undo(&mut self) -> bool {
        let Some(edit) = self.undo_stack.pop_back() else {
            return false;
        };
        if edit.revert(&mut self.drawing).is_err() {
            tracing::warn!("dropping undo entry that no longer matches the drawing");
            return false;
        }
        self.redo_stack.push(edit);
        self.notify();
        true
    }

    fn redo(&mut self) -> bool {
        let Some(edit) = self.redo_stack.pop() else {
            return false;
        };
        if edit.apply(&mut self.drawing).is_err() {
            tracing::warn!("dropping redo entry that no longer matches the drawing");
            return false;
        }
        self.undo_stack.push_back(edit);
        self.notify();
        true
    }

    fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }
}
