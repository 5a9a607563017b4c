use crate::drawing::Drawing;
use crate::geometry::Rect;
use std::cell::RefCell;
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PageId {
    pub document: u64,
    pub index: u32,
}

impl PageId {
    pub fn new(document: u64, index: u32) -> Self {
        Self { document, index }
    }
}

/// A page as seen by the drawing layer. The page owns its drawing; overlays
/// and codecs only read and replace it.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    id: PageId,
    bounds: Rect,
    pub drawing: Drawing,
}

/// Pages are shared between the document session and live overlay surfaces,
/// all on the interaction thread.
pub type PageRef = Rc<RefCell<Page>>;

impl Page {
    pub fn new(id: PageId, bounds: Rect) -> Self {
        Self { id, bounds, drawing: Drawing::new() }
    }

    pub fn id(&self) -> PageId {
        self.id
    }

    pub fn index(&self) -> u32 {
        self.id.index
    }

    pub fn bounds(&self) -> Rect {
        self.bounds
    }

    pub fn into_shared(self) -> PageRef {
        Rc::new(RefCell::new(self))
    }
}
