//! Replacing page drawings from an interchange import and removing the
//! embedded annotations that represented the previous drawings.

use crate::annotation_codec::{AnnotationKind, DRAWING_DATA_KEY, PAGE_HEIGHT_KEY};
use doc_model::{Drawing, PageRef};
use pdf_engine::{AnnotationRecord, DocumentHandle, PdfEngine, PdfEngineError};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Whether an annotation holds (or once held) a drawing and must be removed
/// before the page's drawing is written again.
///
/// Matches any of: our own annotation kind, any annotation carrying the payload
/// key, or a stamp carrying the page-height key. This is deliberately loose so
/// repeated import/export cycles never leave a second copy behind. It can also
/// remove an unrelated foreign stamp that happens to reuse one of these keys.
pub fn is_drawing_annotation(record: &AnnotationRecord) -> bool {
    let kind = AnnotationKind::of(record);

    kind == AnnotationKind::InkDrawing
        || record.custom.contains_key(DRAWING_DATA_KEY)
        || (kind == AnnotationKind::Stamp && record.custom.contains_key(PAGE_HEIGHT_KEY))
}

#[derive(Debug, Clone, PartialEq)]
pub struct PageFailure {
    pub page_index: u32,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcileReport {
    pub pages_replaced: Vec<u32>,
    /// Removed annotation count per page, pages with no removals omitted.
    pub annotations_removed: BTreeMap<u32, usize>,
    pub skipped_pages: Vec<u32>,
    pub failures: Vec<PageFailure>,
}

impl ReconcileReport {
    pub fn total_removed(&self) -> usize {
        self.annotations_removed.values().sum()
    }
}

/// Installs each decoded drawing on its page (full replace) and strips the
/// page's drawing annotations. Runs over every page even when some fail.
pub fn reconcile<E: PdfEngine + ?Sized>(
    engine: &mut E,
    handle: DocumentHandle,
    pages: &[PageRef],
    decoded: BTreeMap<u32, Drawing>,
) -> ReconcileReport {
    let mut report = ReconcileReport::default();

    for (page_index, drawing) in decoded {
        let Some(page) = pages.get(page_index as usize) else {
            warn!(page = page_index, page_count = pages.len(), "reconcile skipped out-of-range page");
            report.skipped_pages.push(page_index);
            continue;
        };

        page.borrow_mut().drawing = drawing;
        report.pages_replaced.push(page_index);

        match strip_drawing_annotations(engine, handle, page_index) {
            Ok(0) => {}
            Ok(removed) => {
                debug!(page = page_index, removed, "removed stale drawing annotations");
                report.annotations_removed.insert(page_index, removed);
            }
            Err(err) => {
                warn!(page = page_index, %err, "could not strip drawing annotations");
                report.failures.push(PageFailure { page_index, message: err.to_string() });
            }
        }
    }

    report
}

/// Removes every drawing annotation on the page and returns how many went.
pub(crate) fn strip_drawing_annotations<E: PdfEngine + ?Sized>(
    engine: &mut E,
    handle: DocumentHandle,
    page_index: u32,
) -> Result<usize, PdfEngineError> {
    let stale: Vec<_> = engine
        .annotations(handle, page_index)?
        .into_iter()
        .filter(is_drawing_annotation)
        .map(|record| record.id)
        .collect();

    for id in &stale {
        engine.remove_annotation(handle, page_index, *id)?;
    }

    Ok(stale.len())
}
