//! Sidecar interchange format: one JSON record per page with a drawing.
//!
//! ```text
//! [ { "pageIndex": 1, "mediaBox": {"x":0,"y":0,"width":612,"height":792},
//!     "strokes": [ { "tool": "pen", "color": {...}, "points": [ {...} ] } ] } ]
//! ```
//!
//! Decoding is best-effort: bad records and strokes are dropped one at a time
//! and reported, the rest of the file still imports.

use doc_model::{Color, Drawing, Point, Rect, Stroke, Tool};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterchangeRecord {
    pub page_index: u32,
    pub media_box: Rect,
    pub strokes: Vec<InterchangeStroke>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterchangeStroke {
    pub tool: String,
    pub color: Color,
    pub points: Vec<Point>,
}

impl From<&Stroke> for InterchangeStroke {
    fn from(stroke: &Stroke) -> Self {
        Self {
            tool: stroke.tool().identifier().to_owned(),
            color: stroke.color(),
            points: stroke.points().to_vec(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InterchangeFile {
    pub records: Vec<InterchangeRecord>,
}

impl InterchangeFile {
    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec_pretty(self)
    }

    pub fn page_indices(&self) -> impl Iterator<Item = u32> + '_ {
        self.records.iter().map(|record| record.page_index)
    }
}

/// Builds the sparse interchange file: pages with empty drawings get no record.
pub fn encode<'a>(pages: impl IntoIterator<Item = (u32, Rect, &'a Drawing)>) -> InterchangeFile {
    let records = pages
        .into_iter()
        .filter(|(_, _, drawing)| !drawing.is_empty())
        .map(|(page_index, media_box, drawing)| InterchangeRecord {
            page_index,
            media_box,
            strokes: drawing.strokes().iter().map(InterchangeStroke::from).collect(),
        })
        .collect();

    InterchangeFile { records }
}

#[derive(Debug, thiserror::Error)]
pub enum InterchangeError {
    #[error("interchange file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("interchange file must be a JSON array of page records")]
    NotAnArray,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SkipReason {
    #[error("page index {index} out of range (page_count={page_count})")]
    PageOutOfRange { index: i64, page_count: u32 },
    #[error("missing or non-integer pageIndex")]
    MissingPageIndex,
    #[error("page already has an earlier record")]
    DuplicatePage,
    #[error("stroke has no readable points")]
    NoPoints,
    #[error("malformed: {0}")]
    Malformed(String),
}

/// One record or stroke left out of a decode.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DecodeSkipped {
    #[error("record {position} skipped: {reason}")]
    Record { position: usize, reason: SkipReason },
    #[error("page {page_index} stroke {stroke} skipped: {reason}")]
    Stroke { page_index: u32, stroke: usize, reason: SkipReason },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodeReport {
    pub records_found: usize,
    pub records_imported: usize,
    pub strokes_imported: usize,
    /// Individual points that failed to parse inside otherwise valid strokes.
    pub points_dropped: usize,
    pub skipped: Vec<DecodeSkipped>,
}

impl DecodeReport {
    fn skip(&mut self, entry: DecodeSkipped) {
        warn!(%entry, "interchange entry dropped");
        self.skipped.push(entry);
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Decoded {
    pub drawings: BTreeMap<u32, Drawing>,
    pub report: DecodeReport,
}

pub fn decode_slice(bytes: &[u8], page_count: u32) -> Result<Decoded, InterchangeError> {
    let value: Value = serde_json::from_slice(bytes)?;
    let Value::Array(records) = value else {
        return Err(InterchangeError::NotAnArray);
    };
    Ok(decode(&records, page_count))
}

/// Maps each valid record to its page. A record whose strokes were all dropped
/// still yields an (empty) drawing for its page.
pub fn decode(records: &[Value], page_count: u32) -> Decoded {
    let mut decoded = Decoded::default();
    decoded.report.records_found = records.len();

    for (position, record) in records.iter().enumerate() {
        let page_index = match record_page_index(record, page_count) {
            Ok(index) => index,
            Err(reason) => {
                decoded.report.skip(DecodeSkipped::Record { position, reason });
                continue;
            }
        };

        if decoded.drawings.contains_key(&page_index) {
            let reason = SkipReason::DuplicatePage;
            decoded.report.skip(DecodeSkipped::Record { position, reason });
            continue;
        }

        let strokes = match record.get("strokes") {
            None | Some(Value::Null) => &[][..],
            Some(Value::Array(strokes)) => strokes.as_slice(),
            Some(_) => {
                let reason = SkipReason::Malformed("strokes is not an array".to_owned());
                decoded.report.skip(DecodeSkipped::Record { position, reason });
                continue;
            }
        };

        let mut drawing = Drawing::new();
        for (stroke_position, value) in strokes.iter().enumerate() {
            match decode_stroke(value, &mut decoded.report.points_dropped) {
                Ok(stroke) => drawing.push(stroke),
                Err(reason) => decoded.report.skip(DecodeSkipped::Stroke {
                    page_index,
                    stroke: stroke_position,
                    reason,
                }),
            }
        }

        decoded.report.records_imported += 1;
        decoded.report.strokes_imported += drawing.len();
        decoded.drawings.insert(page_index, drawing);
    }

    decoded
}

fn record_page_index(record: &Value, page_count: u32) -> Result<u32, SkipReason> {
    if !record.is_object() {
        return Err(SkipReason::Malformed("record is not an object".to_owned()));
    }
    let index = record.get("pageIndex").and_then(Value::as_i64).ok_or(SkipReason::MissingPageIndex)?;

    match u32::try_from(index) {
        Ok(index) if index < page_count => Ok(index),
        _ => Err(SkipReason::PageOutOfRange { index, page_count }),
    }
}

#[derive(Deserialize)]
struct WireStroke {
    #[serde(default)]
    tool: Option<String>,
    #[serde(default)]
    color: Option<Color>,
    #[serde(default)]
    points: Vec<Value>,
}

/// Point fields other than the position default the way a plain touch sample
/// would, so files from writers that omit stylus data still import.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WirePoint {
    x: f32,
    y: f32,
    #[serde(default)]
    time_offset: f64,
    #[serde(default = "unit")]
    width: f32,
    #[serde(default = "unit")]
    height: f32,
    #[serde(default = "unit")]
    opacity: f32,
    #[serde(default = "unit")]
    force: f32,
    #[serde(default)]
    azimuth: f32,
    #[serde(default = "upright")]
    altitude: f32,
}

fn unit() -> f32 {
    1.0
}

fn upright() -> f32 {
    std::f32::consts::FRAC_PI_2
}

impl From<WirePoint> for Point {
    fn from(wire: WirePoint) -> Self {
        Point {
            x: wire.x,
            y: wire.y,
            time_offset: wire.time_offset.max(0.0),
            width: wire.width,
            height: wire.height,
            opacity: wire.opacity,
            force: wire.force,
            azimuth: wire.azimuth,
            altitude: wire.altitude,
        }
    }
}

fn decode_stroke(value: &Value, points_dropped: &mut usize) -> Result<Stroke, SkipReason> {
    let wire = WireStroke::deserialize(value).map_err(|err| SkipReason::Malformed(err.to_string()))?;

    let mut points = Vec::with_capacity(wire.points.len());
    for point in &wire.points {
        match WirePoint::deserialize(point) {
            Ok(point) => points.push(Point::from(point)),
            Err(_) => *points_dropped += 1,
        }
    }

    let tool = wire.tool.as_deref().and_then(Tool::from_identifier).unwrap_or_default();
    let color = wire.color.unwrap_or_default();

    Stroke::new(tool, color, points).map_err(|_| SkipReason::NoPoints)
}
