//! Drawings stored inside the document as stamp annotations.
//!
//! The annotation carries the serialized drawing under [`DRAWING_DATA_KEY`] and
//! the page height it was embedded against under [`PAGE_HEIGHT_KEY`]. Its
//! appearance stream draws the same strokes so other viewers show them.

use crate::render::{snapshot_size, PageCanvas, RenderError, StrokeRasterizer};
use doc_model::{to_document_space, Drawing, Page, Point, Rect};
use image::imageops::{self, FilterType};
use pdf_engine::{AnnotationRecord, AnnotationSubtype, AnnotationValue, NewAnnotation, VectorPath};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

pub const DRAWING_DATA_KEY: &str = "drawingData";
pub const PAGE_HEIGHT_KEY: &str = "pdfPageMediaBoxHeight";
/// Stamp icon name that marks annotations written by this codec.
pub const DRAWING_ANNOTATION_NAME: &str = "InkDrawing";

const PAYLOAD_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnnotationKind {
    /// A stamp written by this codec.
    InkDrawing,
    Stamp,
    Other(String),
}

impl AnnotationKind {
    pub fn of(record: &AnnotationRecord) -> Self {
        match &record.subtype {
            AnnotationSubtype::Stamp if record.name.as_deref() == Some(DRAWING_ANNOTATION_NAME) => {
                Self::InkDrawing
            }
            AnnotationSubtype::Stamp => Self::Stamp,
            other => Self::Other(other.as_pdf_name().to_owned()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddedAnnotation {
    pub bounds: Rect,
    pub kind: AnnotationKind,
    pub payload: Option<Vec<u8>>,
    pub page_height: Option<f32>,
}

#[derive(Serialize, Deserialize)]
struct PayloadEnvelope {
    version: u32,
    drawing: Drawing,
}

#[derive(Debug, thiserror::Error)]
enum PayloadUnreadable {
    #[error("no drawingData entry")]
    Missing,
    #[error("payload version {0} is not supported")]
    Version(u32),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl EmbeddedAnnotation {
    pub fn from_record(record: &AnnotationRecord) -> Self {
        Self {
            bounds: record.bounds,
            kind: AnnotationKind::of(record),
            payload: record.custom.get(DRAWING_DATA_KEY).and_then(AnnotationValue::as_bytes).map(<[u8]>::to_vec),
            page_height: record.custom.get(PAGE_HEIGHT_KEY).and_then(AnnotationValue::as_number),
        }
    }

    /// The engine-level annotation, with `appearance` as its normal appearance.
    pub fn to_new_annotation(&self, appearance: Vec<VectorPath>) -> NewAnnotation {
        let mut custom = BTreeMap::new();
        if let Some(payload) = &self.payload {
            custom.insert(DRAWING_DATA_KEY.to_owned(), AnnotationValue::String(payload.clone()));
        }
        if let Some(height) = self.page_height {
            custom.insert(PAGE_HEIGHT_KEY.to_owned(), AnnotationValue::Number(height));
        }

        NewAnnotation {
            subtype: AnnotationSubtype::Stamp,
            name: Some(DRAWING_ANNOTATION_NAME.to_owned()),
            bounds: self.bounds,
            custom,
            appearance,
        }
    }
}

/// Builds the annotation for `drawing` on `page`. Returns `None` for an empty
/// drawing: no annotation is ever written without strokes.
pub fn embed(drawing: &Drawing, page: &Page) -> Option<EmbeddedAnnotation> {
    if drawing.is_empty() {
        return None;
    }

    let envelope = PayloadEnvelope { version: PAYLOAD_VERSION, drawing: drawing.clone() };
    let payload = match serde_json::to_vec(&envelope) {
        Ok(payload) => payload,
        Err(err) => {
            debug!(%err, "drawing payload did not serialize");
            return None;
        }
    };

    Some(EmbeddedAnnotation {
        bounds: page.bounds(),
        kind: AnnotationKind::InkDrawing,
        payload: Some(payload),
        page_height: Some(page.bounds().height),
    })
}

/// The drawing stored in `annotation`, or `None` when the payload is absent or
/// unreadable.
pub fn extract(annotation: &EmbeddedAnnotation) -> Option<Drawing> {
    match read_payload(annotation) {
        Ok(drawing) => Some(drawing),
        Err(err) => {
            debug!(%err, "annotation payload unreadable, treating as no drawing");
            None
        }
    }
}

fn read_payload(annotation: &EmbeddedAnnotation) -> Result<Drawing, PayloadUnreadable> {
    let bytes = annotation.payload.as_deref().ok_or(PayloadUnreadable::Missing)?;
    let envelope: PayloadEnvelope = serde_json::from_slice(bytes)?;
    if envelope.version != PAYLOAD_VERSION {
        return Err(PayloadUnreadable::Version(envelope.version));
    }
    Ok(envelope.drawing)
}

/// Strokes as document-space polylines inside `bounds`, one path per stroke.
/// Used for appearance streams and burn-in.
pub fn document_paths(drawing: &Drawing, bounds: Rect) -> Vec<VectorPath> {
    drawing
        .strokes()
        .iter()
        .map(|stroke| {
            let color = stroke.color();
            let opacity = stroke.points().iter().map(|point| point.opacity).sum::<f32>()
                / stroke.points().len() as f32;

            VectorPath {
                points: stroke
                    .points()
                    .iter()
                    .map(|point| {
                        let flipped = to_document_space(point, bounds.height);
                        (bounds.x + flipped.x, bounds.y + flipped.y)
                    })
                    .collect(),
                width: stroke.average_width(),
                rgba: [color.red, color.green, color.blue, (color.alpha * opacity).clamp(0.0, 1.0)],
            }
        })
        .collect()
}

/// Draws the annotation onto `canvas`. The drawing is placed with the page
/// height stored at embed time, not the page's current height. Returns whether
/// anything was drawn; fails when the snapshot would exceed the pixel limit.
pub fn render(
    annotation: &EmbeddedAnnotation,
    canvas: &mut PageCanvas,
    rasterizer: &dyn StrokeRasterizer,
) -> Result<bool, RenderError> {
    let Some(page_height) = annotation.page_height.filter(|height| *height > 0.0) else {
        return Ok(false);
    };
    let Some(drawing) = extract(annotation) else {
        return Ok(false);
    };
    if drawing.is_empty() || annotation.bounds.width <= 0.0 {
        return Ok(false);
    }

    let scale = canvas.transform.raster_scale();
    let width = annotation.bounds.width;
    let (snapshot_width, snapshot_height) = snapshot_size(width, page_height, scale)?;

    // input-space corners of the snapshot, flipped into document space
    let top_left = to_document_space(&Point::at(0.0, 0.0, 0.0, 0.0), page_height);
    let bottom_right = to_document_space(&Point::at(width, page_height, 0.0, 0.0), page_height);
    let origin = (annotation.bounds.x, annotation.bounds.y);
    let (x0, y0) = canvas.transform.apply(origin.0 + top_left.x, origin.1 + top_left.y);
    let (x1, y1) = canvas.transform.apply(origin.0 + bottom_right.x, origin.1 + bottom_right.y);

    let target_width = (x1 - x0).abs().round();
    let target_height = (y1 - y0).abs().round();
    if target_width < 1.0 || target_height < 1.0 {
        return Ok(false);
    }
    let (target_width, target_height) = snapshot_size(target_width, target_height, 1.0)?;

    let snapshot = rasterizer.rasterize(&drawing, snapshot_width, snapshot_height, scale);
    let mut placed = if (target_width, target_height) == snapshot.dimensions() {
        snapshot
    } else {
        imageops::resize(&snapshot, target_width, target_height, FilterType::Triangle)
    };
    if x1 < x0 {
        placed = imageops::flip_horizontal(&placed);
    }
    if y1 < y0 {
        placed = imageops::flip_vertical(&placed);
    }

    imageops::overlay(&mut canvas.image, &placed, x0.min(x1).round() as i64, y0.min(y1).round() as i64);
    Ok(true)
}
