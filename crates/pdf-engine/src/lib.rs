use doc_model::Rect;
use std::collections::BTreeMap;

mod blank;
mod content;
mod lopdf_backend;

pub use blank::blank_document;
pub use lopdf_backend::LopdfEngine;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DocumentHandle(u64);

impl DocumentHandle {
    pub fn raw(self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageSize {
    pub width_pt: f32,
    pub height_pt: f32,
}

impl Default for PageSize {
    fn default() -> Self {
        Self { width_pt: 612.0, height_pt: 792.0 }
    }
}

/// Page boundary box to query. `Crop` falls back to `Media` when absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageBox {
    Media,
    Crop,
}

/// Object reference of an annotation inside its document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AnnotationId {
    pub object: u32,
    pub generation: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnnotationSubtype {
    Stamp,
    Ink,
    Other(String),
}

impl AnnotationSubtype {
    pub fn as_pdf_name(&self) -> &str {
        match self {
            Self::Stamp => "Stamp",
            Self::Ink => "Ink",
            Self::Other(name) => name,
        }
    }

    pub fn from_pdf_name(name: &str) -> Self {
        match name {
            "Stamp" => Self::Stamp,
            "Ink" => Self::Ink,
            other => Self::Other(other.to_owned()),
        }
    }
}

/// Value of a non-standard annotation dictionary entry.
#[derive(Debug, Clone, PartialEq)]
pub enum AnnotationValue {
    String(Vec<u8>),
    Number(f32),
    Name(String),
}

impl AnnotationValue {
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::String(bytes) => Some(bytes),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f32> {
        match self {
            Self::Number(value) => Some(*value),
            _ => None,
        }
    }
}

/// An annotation as read back from a page.
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotationRecord {
    pub id: AnnotationId,
    pub subtype: AnnotationSubtype,
    /// The `/Name` entry (stamp icon name), if any.
    pub name: Option<String>,
    pub bounds: Rect,
    pub custom: BTreeMap<String, AnnotationValue>,
}

/// Stroked polyline in document space, used for appearance streams and burn-in.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorPath {
    pub points: Vec<(f32, f32)>,
    pub width: f32,
    pub rgba: [f32; 4],
}

/// An annotation to be added to a page.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAnnotation {
    pub subtype: AnnotationSubtype,
    pub name: Option<String>,
    pub bounds: Rect,
    pub custom: BTreeMap<String, AnnotationValue>,
    /// Drawn into a form XObject used as the normal appearance.
    pub appearance: Vec<VectorPath>,
}

#[derive(Debug, thiserror::Error)]
pub enum PdfEngineError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("PDF parse error: {0}")]
    Parse(#[from] lopdf::Error),
    #[error("invalid handle {0}")]
    InvalidHandle(u64),
    #[error("page {page} out of range (page_count={page_count})")]
    PageOutOfRange { page: u32, page_count: u32 },
    #[error("annotation {object} {generation} R not found on page {page}")]
    AnnotationNotFound { page: u32, object: u32, generation: u16 },
    #[error("encrypted PDFs are not supported in the default backend")]
    EncryptedUnsupported,
    #[error("backend error: {0}")]
    Backend(String),
}

/// The paginated-document primitives the drawing layer relies on.
pub trait PdfEngine {
    /// Parses a document from its serialized bytes.
    fn open(&mut self, bytes: Vec<u8>) -> Result<DocumentHandle, PdfEngineError>;
    fn page_count(&self, handle: DocumentHandle) -> Result<u32, PdfEngineError>;
    fn page_bounds(
        &self,
        handle: DocumentHandle,
        page_index: u32,
        page_box: PageBox,
    ) -> Result<Rect, PdfEngineError>;
    fn annotations(
        &self,
        handle: DocumentHandle,
        page_index: u32,
    ) -> Result<Vec<AnnotationRecord>, PdfEngineError>;
    fn add_annotation(
        &mut self,
        handle: DocumentHandle,
        page_index: u32,
        annotation: NewAnnotation,
    ) -> Result<AnnotationId, PdfEngineError>;
    fn remove_annotation(
        &mut self,
        handle: DocumentHandle,
        page_index: u32,
        id: AnnotationId,
    ) -> Result<(), PdfEngineError>;
    /// Appends paths to the page content. Irreversible once saved.
    fn append_page_content(
        &mut self,
        handle: DocumentHandle,
        page_index: u32,
        paths: &[VectorPath],
    ) -> Result<(), PdfEngineError>;
    fn to_bytes(&mut self, handle: DocumentHandle) -> Result<Vec<u8>, PdfEngineError>;
    fn close(&mut self, handle: DocumentHandle) -> Result<(), PdfEngineError>;
}
