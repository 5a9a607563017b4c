//! Live editing surfaces keyed by page.
//!
//! Lifetime is driven by visibility: `acquire` when a page becomes visible,
//! `release` when it stops being visible, `invalidate_all` before the pages
//! themselves go away. Entries hold pages weakly; the document owns them.

use crate::surface::{CaptureSurface, DrawingObserver, InkSurface};
use doc_model::{Drawing, Page, PageId, PageRef};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::{Rc, Weak};
use tracing::{debug, warn};

struct Entry<S> {
    page: Weak<RefCell<Page>>,
    surface: S,
}

pub struct OverlayCache<S = InkSurface> {
    factory: Box<dyn FnMut(PageId) -> S>,
    entries: BTreeMap<PageId, Entry<S>>,
}

impl<S> std::fmt::Debug for OverlayCache<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OverlayCache").field("pages", &self.entries.keys().collect::<Vec<_>>()).finish()
    }
}

impl<S: CaptureSurface + Default + 'static> Default for OverlayCache<S> {
    fn default() -> Self {
        Self::with_factory(|_| S::default())
    }
}

impl<S: CaptureSurface + Default + 'static> OverlayCache<S> {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<S: CaptureSurface> OverlayCache<S> {
    pub fn with_factory(factory: impl FnMut(PageId) -> S + 'static) -> Self {
        Self { factory: Box::new(factory), entries: BTreeMap::new() }
    }

    /// Returns the page's surface, creating it on first use. The surface always
    /// shows `page.drawing` afterwards and writes every edit straight back to it.
    pub fn acquire(&mut self, page: &PageRef) -> &mut S {
        let (id, drawing) = {
            let page = page.borrow();
            (page.id(), page.drawing.clone())
        };

        let factory = &mut self.factory;
        let entry = self.entries.entry(id).or_insert_with(|| {
            debug!(document = id.document, page = id.index, "creating overlay surface");
            Entry { page: Weak::new(), surface: factory(id) }
        });

        entry.page = Rc::downgrade(page);
        entry.surface.replace_drawing(drawing);
        entry.surface.set_observer(Some(write_back(Rc::downgrade(page))));

        &mut entry.surface
    }

    /// Flushes the surface into `page.drawing` and drops it. Returns whether an
    /// entry existed.
    pub fn release(&mut self, page: &PageRef) -> bool {
        let id = page.borrow().id();
        let Some(mut entry) = self.entries.remove(&id) else {
            return false;
        };

        entry.surface.set_observer(None);
        page.borrow_mut().drawing = entry.surface.drawing().clone();
        debug!(document = id.document, page = id.index, "released overlay surface");
        true
    }

    /// Writes every live surface into its page and keeps the surfaces.
    pub fn flush(&self) {
        for entry in self.entries.values() {
            if let Some(page) = entry.page.upgrade() {
                page.borrow_mut().drawing = entry.surface.drawing().clone();
            }
        }
    }

    /// Flushes and drops every surface.
    pub fn invalidate_all(&mut self) {
        for (id, mut entry) in std::mem::take(&mut self.entries) {
            entry.surface.set_observer(None);
            match entry.page.upgrade() {
                Some(page) => page.borrow_mut().drawing = entry.surface.drawing().clone(),
                None => debug!(document = id.document, page = id.index, "page gone before flush"),
            }
        }
    }

    pub fn get(&self, id: PageId) -> Option<&S> {
        self.entries.get(&id).map(|entry| &entry.surface)
    }

    pub fn get_mut(&mut self, id: PageId) -> Option<&mut S> {
        self.entries.get_mut(&id).map(|entry| &mut entry.surface)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn write_back(page: Weak<RefCell<Page>>) -> DrawingObserver {
    Box::new(move |drawing: &Drawing| {
        let Some(page) = page.upgrade() else {
            return;
        };
        let written = match page.try_borrow_mut() {
            Ok(mut page) => {
                page.drawing = drawing.clone();
                true
            }
            Err(_) => false,
        };
        if !written {
            warn!("page borrowed during surface edit, edit not written back");
        }
    })
}
