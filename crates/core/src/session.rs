//! An open document with its page drawings, overlays and persistence.
//!
//! Drawing state lives on the interaction thread (`Rc`/`RefCell`). Open, save,
//! export and import suspend only for file I/O, and at most one of save or
//! import runs at a time; a second attempt fails with [`SessionError::Busy`].

use crate::annotation_codec::{document_paths, embed, extract, EmbeddedAnnotation};
use crate::error::{Activity, PersistError, SessionError};
use crate::interchange::{self, DecodeReport, InterchangeError, InterchangeFile};
use crate::reconcile::{is_drawing_annotation, reconcile, strip_drawing_annotations, ReconcileReport};
use doc_model::{Drawing, EmbedPolicy, InkPreferences, Page, PageId, PageRef, Rect, Stroke};
use pdf_engine::{DocumentHandle, LopdfEngine, PageBox, PdfEngine, PdfEngineError};
use std::cell::{Cell, RefCell};
use std::path::{Path, PathBuf};
use storage::StagedWrite;
use tracing::{debug, info, warn};
use viewer_core::{CaptureSurface, InkSurface, OverlayCache, UndoRedoController};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImportReport {
    pub decode: DecodeReport,
    pub reconcile: ReconcileReport,
}

pub struct DocumentSession<E = LopdfEngine, S = InkSurface> {
    path: PathBuf,
    preferences: InkPreferences,
    engine: RefCell<E>,
    handle: Cell<DocumentHandle>,
    pages: Vec<PageRef>,
    overlays: RefCell<OverlayCache<S>>,
    undo: Cell<UndoRedoController>,
    activity: Cell<Option<Activity>>,
    import_on_open: Option<ImportReport>,
}

impl<E, S> std::fmt::Debug for DocumentSession<E, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentSession")
            .field("path", &self.path)
            .field("handle", &self.handle.get())
            .field("pages", &self.pages.len())
            .field("activity", &self.activity.get())
            .finish()
    }
}

/// Clears the activity flag when the running operation ends, however it ends.
struct ActivityGuard<'a> {
    slot: &'a Cell<Option<Activity>>,
}

impl Drop for ActivityGuard<'_> {
    fn drop(&mut self) {
        self.slot.set(None);
    }
}

impl DocumentSession {
    /// Opens `path` with the lopdf engine and the default capture surface.
    pub async fn open(
        path: impl AsRef<Path>,
        preferences: InkPreferences,
    ) -> Result<Self, SessionError> {
        Self::open_with(LopdfEngine::new(), OverlayCache::new(), path, preferences).await
    }
}

impl<E: PdfEngine, S: CaptureSurface> DocumentSession<E, S> {
    /// Reads the document, rebuilds page drawings from their embedded
    /// annotations, then imports the sidecar when one exists and
    /// `import_sidecar_on_open` is set.
    pub async fn open_with(
        mut engine: E,
        overlays: OverlayCache<S>,
        path: impl AsRef<Path>,
        preferences: InkPreferences,
    ) -> Result<Self, SessionError> {
        let path = path.as_ref().to_path_buf();

        let bytes = tokio::fs::read(&path).await.map_err(|err| SessionError::open(&path, err))?;
        let handle =
            engine.open(bytes).map_err(|err| SessionError::open(&path, err))?;

        let pages = match load_pages(&engine, handle) {
            Ok(pages) => pages,
            Err(err) => {
                let _ = engine.close(handle);
                return Err(SessionError::open(&path, err));
            }
        };

        let mut session = Self {
            path,
            preferences,
            engine: RefCell::new(engine),
            handle: Cell::new(handle),
            pages,
            overlays: RefCell::new(overlays),
            undo: Cell::new(UndoRedoController::new()),
            activity: Cell::new(None),
            import_on_open: None,
        };

        if session.preferences.import_sidecar_on_open {
            let sidecar = session.sidecar_path();
            match storage::read_if_exists(&sidecar).await {
                Ok(Some(bytes)) => match session.apply_interchange(&bytes) {
                    Ok(report) => session.import_on_open = Some(report),
                    Err(err) => warn!(sidecar = %sidecar.display(), %err, "ignoring unreadable sidecar"),
                },
                Ok(None) => {}
                Err(err) => warn!(sidecar = %sidecar.display(), %err, "could not read sidecar"),
            }
        }

        info!(
            path = %session.path.display(),
            pages = session.pages.len(),
            sidecar_imported = session.import_on_open.is_some(),
            "opened document"
        );
        Ok(session)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn preferences(&self) -> &InkPreferences {
        &self.preferences
    }

    pub fn sidecar_path(&self) -> PathBuf {
        storage::sidecar_path(&self.path, &self.preferences.sidecar_extension)
    }

    pub fn page_count(&self) -> u32 {
        self.pages.len() as u32
    }

    pub fn pages(&self) -> &[PageRef] {
        &self.pages
    }

    pub fn page(&self, index: u32) -> Option<PageRef> {
        self.pages.get(index as usize).cloned()
    }

    pub fn activity(&self) -> Option<Activity> {
        self.activity.get()
    }

    /// What the sidecar import during open did, if it ran.
    pub fn import_on_open(&self) -> Option<&ImportReport> {
        self.import_on_open.as_ref()
    }

    /// Drawing annotations currently embedded on a page.
    pub fn embedded_drawing_count(&self, page_index: u32) -> Result<usize, PdfEngineError> {
        let engine = self.engine.borrow();
        let records = engine.annotations(self.handle.get(), page_index)?;
        Ok(records.iter().filter(|record| is_drawing_annotation(record)).count())
    }

    /// The visible region of a page. Falls back to the media box when the page
    /// has no crop box.
    pub fn crop_box(&self, page_index: u32) -> Result<Rect, PdfEngineError> {
        self.engine.borrow().page_bounds(self.handle.get(), page_index, PageBox::Crop)
    }

    /// Makes a page visible: acquires its surface and routes undo/redo to it.
    pub fn show_page(&self, index: u32) -> bool {
        let Some(page) = self.pages.get(index as usize) else {
            return false;
        };
        self.overlays.borrow_mut().acquire(page);

        let mut undo = self.undo.get();
        undo.set_active(page.borrow().id());
        self.undo.set(undo);
        true
    }

    /// Page left the screen: its surface is flushed and dropped.
    pub fn hide_page(&self, index: u32) -> bool {
        let Some(page) = self.pages.get(index as usize) else {
            return false;
        };
        let released = self.overlays.borrow_mut().release(page);

        let mut undo = self.undo.get();
        if undo.active() == Some(page.borrow().id()) {
            undo.clear_active();
            self.undo.set(undo);
        }
        released
    }

    /// Runs `edit` against the live surface of a visible page.
    pub fn with_surface<R>(&self, index: u32, edit: impl FnOnce(&mut S) -> R) -> Option<R> {
        let id = self.pages.get(index as usize)?.borrow().id();
        let mut overlays = self.overlays.borrow_mut();
        overlays.get_mut(id).map(edit)
    }

    pub fn undo(&self) -> bool {
        self.undo.get().undo(&mut *self.overlays.borrow_mut())
    }

    pub fn redo(&self) -> bool {
        self.undo.get().redo(&mut *self.overlays.borrow_mut())
    }

    /// Sparse interchange file for the current page drawings.
    pub fn interchange(&self) -> InterchangeFile {
        self.overlays.borrow().flush();
        let pages: Vec<_> = self.pages.iter().map(|page| page.borrow()).collect();
        interchange::encode(pages.iter().map(|page| (page.index(), page.bounds(), &page.drawing)))
    }

    /// Replaces page drawings from the interchange file at `path` and removes
    /// the embedded annotations they supersede.
    pub async fn import_interchange(
        &self,
        path: impl AsRef<Path>,
    ) -> Result<ImportReport, SessionError> {
        let path = path.as_ref();
        let _guard = self.begin(Activity::Importing)?;

        let bytes = tokio::fs::read(path).await.map_err(|err| SessionError::open(path, err))?;
        let report = self.apply_interchange(&bytes).map_err(|err| SessionError::open(path, err))?;

        info!(
            sidecar = %path.display(),
            imported = report.decode.records_imported,
            skipped = report.decode.skipped.len(),
            removed = report.reconcile.total_removed(),
            "imported interchange file"
        );
        Ok(report)
    }

    /// Saves over the session's own file with the configured embed policy.
    pub async fn save(&self) -> Result<(), SessionError> {
        self.save_with_policy(self.preferences.embed_policy).await
    }

    /// Saves over the session's own file. After a burn-in save the drawings are
    /// part of the page content and the pages start over empty.
    pub async fn save_with_policy(&self, policy: EmbedPolicy) -> Result<(), SessionError> {
        let path = self.path.clone();
        self.write_document(&path, policy, true).await
    }

    /// Writes the document (and sidecar) to another path. The session keeps
    /// its own file, handle and editable drawings.
    pub async fn export_to(
        &self,
        path: impl AsRef<Path>,
        policy: EmbedPolicy,
    ) -> Result<(), SessionError> {
        self.write_document(path.as_ref(), policy, false).await
    }

    /// Writes only the interchange file.
    pub async fn export_interchange(&self, path: impl AsRef<Path>) -> Result<(), SessionError> {
        let path = path.as_ref();
        let _guard = self.begin(Activity::Saving)?;

        let bytes = self.interchange().to_json().map_err(|err| SessionError::save(path, InterchangeError::from(err)))?;
        storage::write_atomic(path, &bytes).await.map_err(|err| SessionError::save(path, err))?;

        info!(sidecar = %path.display(), "wrote interchange file");
        Ok(())
    }

    /// Drops every overlay and closes the document.
    pub fn close(self) -> Result<(), SessionError> {
        self.overlays.borrow_mut().invalidate_all();
        let handle = self.handle.get();
        self.engine.borrow_mut().close(handle).map_err(SessionError::CloseFailed)?;

        info!(path = %self.path.display(), "closed document");
        Ok(())
    }

    fn begin(&self, activity: Activity) -> Result<ActivityGuard<'_>, SessionError> {
        if let Some(current) = self.activity.get() {
            return Err(SessionError::Busy(current));
        }
        self.activity.set(Some(activity));
        Ok(ActivityGuard { slot: &self.activity })
    }

    fn apply_interchange(&self, bytes: &[u8]) -> Result<ImportReport, InterchangeError> {
        let decoded = interchange::decode_slice(bytes, self.page_count())?;

        // no surface may keep editing a drawing that is about to be replaced
        self.overlays.borrow_mut().invalidate_all();

        let mut engine = self.engine.borrow_mut();
        let reconcile = reconcile(&mut *engine, self.handle.get(), &self.pages, decoded.drawings);

        Ok(ImportReport { decode: decoded.report, reconcile })
    }

    async fn write_document(
        &self,
        target: &Path,
        policy: EmbedPolicy,
        adopt: bool,
    ) -> Result<(), SessionError> {
        let _guard = self.begin(Activity::Saving)?;

        // burned-in strokes must not come back from a sidecar on the next open
        let sidecar_bytes = match policy {
            EmbedPolicy::Editable if self.preferences.write_interchange => Some(
                self.interchange()
                    .to_json()
                    .map_err(|err| SessionError::save(target, InterchangeError::from(err)))?,
            ),
            _ => None,
        };

        self.overlays.borrow().flush();
        let written: Vec<Drawing> =
            self.pages.iter().map(|page| page.borrow().drawing.clone()).collect();
        let (scratch, document_bytes) =
            self.compose(policy).map_err(|err| SessionError::save(target, err))?;

        let sidecar = storage::sidecar_path(target, &self.preferences.sidecar_extension);
        let committed =
            commit_files(target, &document_bytes, &sidecar, sidecar_bytes.as_deref()).await;

        if !adopt || committed.is_err() {
            if let Err(err) = self.engine.borrow_mut().close(scratch) {
                debug!(%err, "scratch document already closed");
            }
            committed.map_err(|err| SessionError::save(target, err))?;
        } else {
            let previous = self.handle.replace(scratch);
            if let Err(err) = self.engine.borrow_mut().close(previous) {
                debug!(%err, "previous document already closed");
            }
            if policy == EmbedPolicy::BurnIn {
                self.overlays.borrow_mut().invalidate_all();
                for (page, burned) in self.pages.iter().zip(&written) {
                    let mut page = page.borrow_mut();
                    page.drawing = without_burned(&page.drawing, burned);
                }
            }
        }

        info!(
            path = %target.display(),
            ?policy,
            interchange = sidecar_bytes.is_some(),
            "saved document"
        );
        Ok(())
    }

    /// Applies the page drawings to a fresh copy of the document and returns
    /// the copy's handle and bytes. The live document is left as it was.
    fn compose(&self, policy: EmbedPolicy) -> Result<(DocumentHandle, Vec<u8>), PdfEngineError> {
        let mut engine = self.engine.borrow_mut();
        let bytes = engine.to_bytes(self.handle.get())?;
        let scratch = engine.open(bytes)?;

        let written = write_drawings(&mut *engine, scratch, &self.pages, policy)
            .and_then(|()| engine.to_bytes(scratch));

        match written {
            Ok(bytes) => Ok((scratch, bytes)),
            Err(err) => {
                let _ = engine.close(scratch);
                Err(err)
            }
        }
    }
}

fn load_pages<E: PdfEngine>(engine: &E, handle: DocumentHandle) -> Result<Vec<PageRef>, PdfEngineError> {
    let document = handle.raw();
    let mut pages = Vec::new();

    for index in 0..engine.page_count(handle)? {
        let bounds = engine.page_bounds(handle, index, PageBox::Media)?;
        let mut page = Page::new(PageId::new(document, index), bounds);

        match embedded_drawing(engine, handle, index) {
            Ok(Some(drawing)) => page.drawing = drawing,
            Ok(None) => {}
            Err(err) => warn!(page = index, %err, "could not read page annotations"),
        }

        pages.push(page.into_shared());
    }

    Ok(pages)
}

/// The page's drawing from its single drawing annotation. Several drawing
/// annotations mean an earlier save went wrong; the page then starts empty and
/// the next save removes all of them.
fn embedded_drawing<E: PdfEngine>(
    engine: &E,
    handle: DocumentHandle,
    page_index: u32,
) -> Result<Option<Drawing>, PdfEngineError> {
    let found: Vec<_> =
        engine.annotations(handle, page_index)?.into_iter().filter(is_drawing_annotation).collect();

    match found.as_slice() {
        [] => Ok(None),
        [single] => Ok(extract(&EmbeddedAnnotation::from_record(single))),
        several => {
            warn!(page = page_index, count = several.len(), "multiple drawing annotations, page starts empty");
            Ok(None)
        }
    }
}

fn write_drawings<E: PdfEngine + ?Sized>(
    engine: &mut E,
    handle: DocumentHandle,
    pages: &[PageRef],
    policy: EmbedPolicy,
) -> Result<(), PdfEngineError> {
    for page in pages {
        let page = page.borrow();
        let index = page.index();

        strip_drawing_annotations(engine, handle, index)?;

        match policy {
            EmbedPolicy::Editable => {
                if let Some(annotation) = embed(&page.drawing, &page) {
                    let appearance = document_paths(&page.drawing, page.bounds());
                    engine.add_annotation(handle, index, annotation.to_new_annotation(appearance))?;
                }
            }
            EmbedPolicy::BurnIn => {
                if !page.drawing.is_empty() {
                    engine.append_page_content(handle, index, &document_paths(&page.drawing, page.bounds()))?;
                }
            }
        }
    }

    Ok(())
}

/// Stages every file before replacing any. The sidecar is settled first, so a
/// failure never leaves the new document next to an older sidecar that would
/// be imported over it on the next open. A save without interchange bytes
/// removes any existing sidecar.
async fn commit_files(
    document: &Path,
    document_bytes: &[u8],
    sidecar: &Path,
    sidecar_bytes: Option<&[u8]>,
) -> Result<(), PersistError> {
    let staged_document = StagedWrite::stage(document, document_bytes).await?;

    if let Err(err) = settle_sidecar(sidecar, sidecar_bytes).await {
        staged_document.abort().await;
        return Err(err.into());
    }

    staged_document.commit().await?;
    Ok(())
}

async fn settle_sidecar(sidecar: &Path, bytes: Option<&[u8]>) -> Result<(), storage::StorageError> {
    match bytes {
        Some(bytes) => StagedWrite::stage(sidecar, bytes).await?.commit().await,
        None => {
            if storage::remove_if_exists(sidecar).await? {
                debug!(sidecar = %sidecar.display(), "removed stale sidecar");
            }
            Ok(())
        }
    }
}

/// `current` minus one occurrence of every stroke in `burned`. Strokes drawn
/// while a burn-in save was running survive it.
fn without_burned(current: &Drawing, burned: &Drawing) -> Drawing {
    let mut pending: Vec<&Stroke> = burned.strokes().iter().collect();
    let kept = current
        .strokes()
        .iter()
        .filter(|stroke| match pending.iter().position(|burned| burned == stroke) {
            Some(found) => {
                pending.swap_remove(found);
                false
            }
            None => true,
        })
        .cloned()
        .collect();
    Drawing::from_strokes(kept)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotation_codec::DRAWING_ANNOTATION_NAME;
    use doc_model::{Color, Point, Stroke, Tool};
    use pdf_engine::{blank_document, AnnotationSubtype, PageSize};
    use std::fs;
    use tempfile::TempDir;

    fn stroke(x: f32) -> Stroke {
        Stroke::new(Tool::Pen, Color::new(0.0, 0.0, 1.0, 1.0), vec![
            Point::at(x, 40.0, 0.0, 3.0),
            Point::at(x + 20.0, 60.0, 0.2, 3.0),
        ])
        .expect("valid stroke")
    }

    fn write_pdf(dir: &TempDir, pages: usize) -> PathBuf {
        let path = dir.path().join("notes.pdf");
        let bytes = blank_document(&vec![PageSize::default(); pages]).expect("blank pdf");
        fs::write(&path, bytes).expect("write fixture");
        path
    }

    fn no_sidecar() -> InkPreferences {
        InkPreferences { write_interchange: false, import_sidecar_on_open: false, ..InkPreferences::default() }
    }

    async fn open(path: &Path, preferences: InkPreferences) -> DocumentSession {
        DocumentSession::open(path, preferences).await.expect("document should open")
    }

    fn draw(session: &DocumentSession, page: u32, x: f32) {
        assert!(session.show_page(page));
        session.with_surface(page, |surface| surface.add_stroke(stroke(x))).expect("page is visible");
    }

    fn drawing_of(session: &DocumentSession, page: u32) -> Drawing {
        session.page(page).expect("page exists").borrow().drawing.clone()
    }

    #[tokio::test]
    async fn save_and_reopen_restores_from_annotations() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = write_pdf(&dir, 3);

        let session = open(&path, no_sidecar()).await;
        draw(&session, 1, 10.0);
        session.save().await.expect("save");
        session.close().expect("close");

        let reopened = open(&path, no_sidecar()).await;
        assert_eq!(drawing_of(&reopened, 1).strokes(), &[stroke(10.0)]);
        assert!(drawing_of(&reopened, 0).is_empty());
        assert_eq!(reopened.embedded_drawing_count(1).expect("annotations"), 1);
        assert_eq!(reopened.embedded_drawing_count(0).expect("annotations"), 0);
        assert!(!reopened.sidecar_path().exists());
    }

    #[tokio::test]
    async fn repeated_saves_never_duplicate_annotations() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = write_pdf(&dir, 1);

        let session = open(&path, InkPreferences::default()).await;
        draw(&session, 0, 10.0);
        session.save().await.expect("first save");
        draw(&session, 0, 50.0);
        session.save().await.expect("second save");
        session.close().expect("close");

        let reopened = open(&path, no_sidecar()).await;
        assert_eq!(reopened.embedded_drawing_count(0).expect("annotations"), 1);
        assert_eq!(drawing_of(&reopened, 0).len(), 2);
    }

    #[tokio::test]
    async fn sidecar_is_sparse_and_imported_on_open() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = write_pdf(&dir, 3);

        let session = open(&path, InkPreferences::default()).await;
        draw(&session, 1, 10.0);
        session.save().await.expect("save");
        session.close().expect("close");

        let sidecar: serde_json::Value =
            serde_json::from_slice(&fs::read(dir.path().join("notes.json")).expect("sidecar written"))
                .expect("sidecar is json");
        assert_eq!(sidecar.as_array().map(Vec::len), Some(1));
        assert_eq!(sidecar[0]["pageIndex"], 1);

        let reopened = open(&path, InkPreferences::default()).await;
        let report = reopened.import_on_open().expect("sidecar imported");
        assert_eq!(report.reconcile.pages_replaced, vec![1]);
        assert_eq!(report.reconcile.annotations_removed.get(&1), Some(&1));
        assert_eq!(drawing_of(&reopened, 1).strokes(), &[stroke(10.0)]);
    }

    #[tokio::test]
    async fn importing_twice_leaves_one_annotation_after_save() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = write_pdf(&dir, 2);
        let interchange = dir.path().join("incoming.json");
        fs::write(
            &interchange,
            br#"[{"pageIndex": 0, "mediaBox": {"x":0,"y":0,"width":612,"height":792},
                  "strokes": [{"tool": "com.apple.ink.pencil", "color": {"red":0,"green":0,"blue":0,"alpha":1},
                               "points": [{"x": 5, "y": 5}]}]},
                 {"pageIndex": 99, "strokes": []}]"#,
        )
        .expect("write interchange");

        let session = open(&path, no_sidecar()).await;
        draw(&session, 0, 10.0);
        session.save().await.expect("save");

        let first = session.import_interchange(&interchange).await.expect("first import");
        assert_eq!(first.decode.records_imported, 1);
        assert_eq!(first.decode.skipped.len(), 1);
        assert_eq!(first.reconcile.total_removed(), 1);

        let second = session.import_interchange(&interchange).await.expect("second import");
        assert_eq!(second.reconcile.total_removed(), 0);

        session.save().await.expect("save after import");
        assert_eq!(session.embedded_drawing_count(0).expect("annotations"), 1);
        assert_eq!(drawing_of(&session, 0).strokes()[0].tool(), Tool::Pencil);
    }

    #[tokio::test]
    async fn import_replaces_live_surface_content() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = write_pdf(&dir, 1);
        let interchange = dir.path().join("incoming.json");
        fs::write(&interchange, br#"[{"pageIndex": 0, "strokes": []}]"#).expect("write interchange");

        let session = open(&path, no_sidecar()).await;
        draw(&session, 0, 10.0);
        session.import_interchange(&interchange).await.expect("import");

        assert!(drawing_of(&session, 0).is_empty());
        assert_eq!(session.with_surface(0, |_| ()), None);
        assert!(!session.undo());
    }

    #[tokio::test]
    async fn burn_in_save_leaves_no_editable_annotation() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = write_pdf(&dir, 1);
        let stale_sidecar = dir.path().join("notes.json");
        fs::write(&stale_sidecar, b"[]").expect("stale sidecar");

        let session = open(&path, InkPreferences { import_sidecar_on_open: false, ..InkPreferences::default() }).await;
        draw(&session, 0, 10.0);
        session.save_with_policy(EmbedPolicy::BurnIn).await.expect("burn-in save");

        assert!(drawing_of(&session, 0).is_empty());
        assert_eq!(session.embedded_drawing_count(0).expect("annotations"), 0);
        assert!(!stale_sidecar.exists());

        let bytes = fs::read(&path).expect("saved pdf");
        let doc = lopdf::Document::load_mem(&bytes).expect("saved pdf parses");
        let page_id = *doc.get_pages().get(&1).expect("page 1");
        let content = doc.get_page_content(page_id).expect("page content");
        assert!(String::from_utf8_lossy(&content).lines().any(|line| line == "S"));
    }

    #[tokio::test]
    async fn burn_in_export_keeps_session_editable() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = write_pdf(&dir, 1);
        let original = fs::read(&path).expect("original bytes");
        let flattened = dir.path().join("flat.pdf");

        let session = open(&path, InkPreferences::default()).await;
        draw(&session, 0, 10.0);
        session.export_to(&flattened, EmbedPolicy::BurnIn).await.expect("export");

        assert_eq!(drawing_of(&session, 0).len(), 1);
        assert!(session.undo());
        assert_eq!(fs::read(&path).expect("original bytes"), original);
        assert!(!dir.path().join("flat.json").exists());

        let exported = open(&flattened, no_sidecar()).await;
        assert!(drawing_of(&exported, 0).is_empty());
        assert_eq!(exported.embedded_drawing_count(0).expect("annotations"), 0);
    }

    #[tokio::test]
    async fn multiple_embedded_drawings_start_empty_and_are_cleared_on_save() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("dup.pdf");

        let mut engine = LopdfEngine::new();
        let handle = engine
            .open(blank_document(&[PageSize::default()]).expect("blank pdf"))
            .expect("open");
        let page = Page::new(PageId::new(0, 0), engine.page_bounds(handle, 0, PageBox::Media).expect("bounds"));
        for x in [10.0, 20.0] {
            let drawing = Drawing::from_strokes(vec![stroke(x)]);
            let annotation = embed(&drawing, &page).expect("embed");
            engine
                .add_annotation(handle, 0, annotation.to_new_annotation(Vec::new()))
                .expect("add annotation");
        }
        fs::write(&path, engine.to_bytes(handle).expect("bytes")).expect("write pdf");

        let session = open(&path, no_sidecar()).await;
        assert!(drawing_of(&session, 0).is_empty());
        assert_eq!(session.embedded_drawing_count(0).expect("annotations"), 2);

        session.save().await.expect("save");
        assert_eq!(session.embedded_drawing_count(0).expect("annotations"), 0);
    }

    #[tokio::test]
    async fn corrupt_payload_is_treated_as_no_drawing() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("corrupt.pdf");

        let mut engine = LopdfEngine::new();
        let handle = engine
            .open(blank_document(&[PageSize::default()]).expect("blank pdf"))
            .expect("open");
        let page = Page::new(PageId::new(0, 0), engine.page_bounds(handle, 0, PageBox::Media).expect("bounds"));
        let mut annotation = embed(&Drawing::from_strokes(vec![stroke(1.0)]), &page).expect("embed");
        annotation.payload = Some(b"not a drawing".to_vec());
        engine.add_annotation(handle, 0, annotation.to_new_annotation(Vec::new())).expect("add");
        fs::write(&path, engine.to_bytes(handle).expect("bytes")).expect("write pdf");

        let session = open(&path, no_sidecar()).await;
        assert!(drawing_of(&session, 0).is_empty());
        let records = session.engine.borrow().annotations(session.handle.get(), 0).expect("annotations");
        assert_eq!(records[0].subtype, AnnotationSubtype::Stamp);
        assert_eq!(records[0].name.as_deref(), Some(DRAWING_ANNOTATION_NAME));
    }

    #[tokio::test]
    async fn failed_save_keeps_prior_document() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = write_pdf(&dir, 1);
        let original = fs::read(&path).expect("original bytes");
        // a directory where the staged document would go makes staging fail
        fs::create_dir(dir.path().join("notes.pdf.tmp")).expect("blocker");

        let session = open(&path, InkPreferences::default()).await;
        draw(&session, 0, 10.0);
        let err = session.save().await.expect_err("save should fail");

        assert!(matches!(err, SessionError::SaveFailed { .. }));
        assert_eq!(fs::read(&path).expect("document still there"), original);
        assert!(!dir.path().join("notes.json").exists());
        assert!(!dir.path().join("notes.json.tmp").exists());
        assert_eq!(session.activity(), None);
        assert_eq!(drawing_of(&session, 0).len(), 1);
    }

    #[tokio::test]
    async fn failed_sidecar_commit_keeps_prior_document() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = write_pdf(&dir, 1);

        let session = open(&path, InkPreferences::default()).await;
        draw(&session, 0, 10.0);
        session.save().await.expect("first save");
        let saved = fs::read(&path).expect("saved bytes");

        // a directory in the sidecar's place makes its rename fail
        let sidecar = dir.path().join("notes.json");
        fs::remove_file(&sidecar).expect("remove sidecar");
        fs::create_dir(&sidecar).expect("blocker");
        fs::write(sidecar.join("keep"), b"x").expect("blocker content");

        draw(&session, 0, 50.0);
        let err = session.save().await.expect_err("save should fail");

        assert!(matches!(err, SessionError::SaveFailed { .. }));
        assert_eq!(fs::read(&path).expect("document still there"), saved);
        assert!(!dir.path().join("notes.pdf.tmp").exists());
        assert!(!dir.path().join("notes.json.tmp").exists());
        assert_eq!(session.activity(), None);
    }

    #[tokio::test]
    async fn save_without_interchange_removes_older_sidecar() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = write_pdf(&dir, 1);
        let sidecar = dir.path().join("notes.json");

        let first = open(&path, InkPreferences::default()).await;
        draw(&first, 0, 10.0);
        first.save().await.expect("save with sidecar");
        first.close().expect("close");
        assert!(sidecar.exists());

        let second =
            open(&path, InkPreferences { write_interchange: false, ..InkPreferences::default() }).await;
        draw(&second, 0, 50.0);
        second.save().await.expect("save without sidecar");
        second.close().expect("close");
        assert!(!sidecar.exists());

        let reopened = open(&path, InkPreferences::default()).await;
        assert!(reopened.import_on_open().is_none());
        assert_eq!(drawing_of(&reopened, 0).strokes(), &[stroke(10.0), stroke(50.0)]);
    }

    #[tokio::test]
    async fn strokes_drawn_during_burn_in_save_survive_it() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = write_pdf(&dir, 1);
        let session = open(&path, no_sidecar()).await;
        draw(&session, 0, 10.0);

        let (saved, ()) = tokio::join!(session.save_with_policy(EmbedPolicy::BurnIn), async {
            draw(&session, 0, 50.0);
        });
        saved.expect("burn-in save");

        assert_eq!(drawing_of(&session, 0).strokes(), &[stroke(50.0)]);
    }

    #[test]
    fn without_burned_removes_one_copy_per_burned_stroke() {
        let current = Drawing::from_strokes(vec![stroke(10.0), stroke(50.0), stroke(10.0)]);
        let burned = Drawing::from_strokes(vec![stroke(10.0)]);

        assert_eq!(without_burned(&current, &burned).strokes(), &[stroke(50.0), stroke(10.0)]);
        assert!(without_burned(&burned, &burned).is_empty());
    }

    #[tokio::test]
    async fn crop_box_falls_back_to_media_box() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = write_pdf(&dir, 2);
        let session = open(&path, no_sidecar()).await;

        assert_eq!(session.crop_box(1).expect("crop box"), Rect::new(0.0, 0.0, 612.0, 792.0));
        assert!(matches!(session.crop_box(2), Err(PdfEngineError::PageOutOfRange { page: 2, page_count: 2 })));
    }

    #[tokio::test]
    async fn second_save_while_busy_is_rejected() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = write_pdf(&dir, 1);
        let session = open(&path, no_sidecar()).await;

        let guard = session.begin(Activity::Importing).expect("idle session");
        assert!(matches!(session.save().await, Err(SessionError::Busy(Activity::Importing))));
        drop(guard);

        let (first, second) = tokio::join!(session.save(), session.save());
        assert!(first.is_ok());
        assert!(matches!(second, Err(SessionError::Busy(Activity::Saving))));
        assert_eq!(session.activity(), None);
    }

    #[tokio::test]
    async fn undo_redo_follow_the_visible_page() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = write_pdf(&dir, 2);
        let session = open(&path, no_sidecar()).await;

        assert!(!session.undo());

        draw(&session, 0, 10.0);
        draw(&session, 1, 20.0);
        assert!(session.undo());
        assert!(drawing_of(&session, 1).is_empty());
        assert_eq!(drawing_of(&session, 0).len(), 1);

        assert!(session.hide_page(1));
        assert!(!session.redo());
        assert!(session.show_page(0));
        assert!(session.undo());
        assert!(drawing_of(&session, 0).is_empty());
    }

    #[tokio::test]
    async fn missing_document_fails_to_open() {
        let dir = tempfile::tempdir().expect("temp dir");
        let err = DocumentSession::open(dir.path().join("absent.pdf"), InkPreferences::default())
            .await
            .expect_err("open should fail");

        assert!(matches!(err, SessionError::OpenFailed { .. }));
        assert!(err.to_string().contains("absent.pdf"));
    }

    #[tokio::test]
    async fn unreadable_sidecar_on_open_is_ignored() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = write_pdf(&dir, 1);
        fs::write(dir.path().join("notes.json"), b"{{{").expect("bad sidecar");

        let session = open(&path, InkPreferences::default()).await;
        assert!(session.import_on_open().is_none());

        let err = session.import_interchange(dir.path().join("notes.json")).await.expect_err("bad file");
        assert!(matches!(err, SessionError::OpenFailed { .. }));
    }

    #[tokio::test]
    async fn export_interchange_writes_only_the_sidecar() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = write_pdf(&dir, 2);
        let original = fs::read(&path).expect("original");
        let target = dir.path().join("out.json");

        let session = open(&path, no_sidecar()).await;
        draw(&session, 1, 5.0);
        session.export_interchange(&target).await.expect("export");

        let file: Vec<serde_json::Value> =
            serde_json::from_slice(&fs::read(&target).expect("written")).expect("json array");
        assert_eq!(file.len(), 1);
        assert_eq!(fs::read(&path).expect("document"), original);
    }
}
