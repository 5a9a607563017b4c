//! Keeps freehand page drawings in sync between the live editing surfaces,
//! annotations embedded in the PDF, and the sidecar interchange file.

pub mod annotation_codec;
pub mod error;
pub mod interchange;
pub mod reconcile;
pub mod render;
pub mod session;

pub use annotation_codec::{
    document_paths, embed, extract, render, AnnotationKind, EmbeddedAnnotation, DRAWING_DATA_KEY,
    PAGE_HEIGHT_KEY,
};
pub use error::{Activity, PersistError, SessionError};
pub use interchange::{
    decode, decode_slice, encode, DecodeReport, DecodeSkipped, Decoded, InterchangeError,
    InterchangeFile, InterchangeRecord, SkipReason,
};
pub use reconcile::{is_drawing_annotation, reconcile, ReconcileReport};
pub use render::{
    snapshot_size, FootprintRasterizer, PageCanvas, RenderError, StrokeRasterizer, MAX_SNAPSHOT_PIXELS,
};
pub use session::{DocumentSession, ImportReport};

pub use doc_model::{Drawing, EmbedPolicy, InkPreferences, Stroke, Tool};
