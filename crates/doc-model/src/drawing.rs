use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DrawingError {
    #[error("a stroke needs at least one point")]
    EmptyStroke,
    #[error("stroke {index} out of range (stroke_count={count})")]
    StrokeOutOfRange { index: usize, count: usize },
}

/// One captured input sample.
///
/// Coordinates are in the page's input space (top-left origin, Y down).
/// `width`/`height` describe the tool footprint at this sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Point {
    pub x: f32,
    pub y: f32,
    pub time_offset: f64,
    pub width: f32,
    pub height: f32,
    pub opacity: f32,
    pub force: f32,
    pub azimuth: f32,
    pub altitude: f32,
}

impl Point {
    /// A sample with a square footprint, full opacity and neutral stylus values.
    pub fn at(x: f32, y: f32, time_offset: f64, size: f32) -> Self {
        Self {
            x,
            y,
            time_offset: time_offset.max(0.0),
            width: size,
            height: size,
            opacity: 1.0,
            force: 1.0,
            azimuth: 0.0,
            altitude: std::f32::consts::FRAC_PI_2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Tool {
    #[default]
    Pen,
    Marker,
    Pencil,
    Monoline,
    FountainPen,
    Watercolor,
    Crayon,
}

/// Canonical identifiers first, then the vendor-style aliases accepted on decode.
const TOOL_TABLE: &[(&str, Tool)] = &[
    ("pen", Tool::Pen),
    ("marker", Tool::Marker),
    ("pencil", Tool::Pencil),
    ("monoline", Tool::Monoline),
    ("fountainPen", Tool::FountainPen),
    ("watercolor", Tool::Watercolor),
    ("crayon", Tool::Crayon),
    ("com.apple.ink.pen", Tool::Pen),
    ("com.apple.ink.marker", Tool::Marker),
    ("com.apple.ink.pencil", Tool::Pencil),
    ("com.apple.ink.monoline", Tool::Monoline),
    ("com.apple.ink.fountainpen", Tool::FountainPen),
    ("com.apple.ink.watercolor", Tool::Watercolor),
    ("com.apple.ink.crayon", Tool::Crayon),
];

impl Tool {
    pub const ALL: [Tool; 7] = [
        Tool::Pen,
        Tool::Marker,
        Tool::Pencil,
        Tool::Monoline,
        Tool::FountainPen,
        Tool::Watercolor,
        Tool::Crayon,
    ];

    /// Stable identifier written to interchange files.
    pub fn identifier(self) -> &'static str {
        match self {
            Tool::Pen => "pen",
            Tool::Marker => "marker",
            Tool::Pencil => "pencil",
            Tool::Monoline => "monoline",
            Tool::FountainPen => "fountainPen",
            Tool::Watercolor => "watercolor",
            Tool::Crayon => "crayon",
        }
    }

    /// Looks up a canonical identifier or a known alias. Returns `None` for anything else.
    pub fn from_identifier(identifier: &str) -> Option<Tool> {
        TOOL_TABLE
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(identifier))
            .map(|(_, tool)| *tool)
    }
}

/// RGBA with each channel in `0.0..=1.0`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Color {
    pub red: f32,
    pub green: f32,
    pub blue: f32,
    pub alpha: f32,
}

impl Color {
    pub const BLACK: Color = Color { red: 0.0, green: 0.0, blue: 0.0, alpha: 1.0 };

    pub fn new(red: f32, green: f32, blue: f32, alpha: f32) -> Self {
        Self { red, green, blue, alpha }
    }

    pub fn to_rgba8(self) -> [u8; 4] {
        let channel = |value: f32| (value.clamp(0.0, 1.0) * 255.0).round() as u8;
        [channel(self.red), channel(self.green), channel(self.blue), channel(self.alpha)]
    }
}

impl Default for Color {
    fn default() -> Self {
        Self::BLACK
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "StrokeRepr")]
pub struct Stroke {
    tool: Tool,
    color: Color,
    points: Vec<Point>,
}

#[derive(Deserialize)]
struct StrokeRepr {
    tool: Tool,
    color: Color,
    points: Vec<Point>,
}

impl TryFrom<StrokeRepr> for Stroke {
    type Error = DrawingError;

    fn try_from(repr: StrokeRepr) -> Result<Self, Self::Error> {
        Stroke::new(repr.tool, repr.color, repr.points)
    }
}

impl Stroke {
    pub fn new(tool: Tool, color: Color, points: Vec<Point>) -> Result<Self, DrawingError> {
        if points.is_empty() {
            return Err(DrawingError::EmptyStroke);
        }

        Ok(Self { tool, color, points })
    }

    pub fn tool(&self) -> Tool {
        self.tool
    }

    pub fn color(&self) -> Color {
        self.color
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    /// Mean footprint width, used when the stroke is drawn as a single path.
    pub fn average_width(&self) -> f32 {
        let total: f32 = self.points.iter().map(|point| point.width).sum();
        total / self.points.len() as f32
    }

    pub fn map_points(&self, transform: impl Fn(&Point) -> Point) -> Stroke {
        Stroke {
            tool: self.tool,
            color: self.color,
            points: self.points.iter().map(transform).collect(),
        }
    }
}

/// Ordered strokes for one page. Order is z-order and is preserved by every codec.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Drawing {
    strokes: Vec<Stroke>,
}

impl Drawing {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_strokes(strokes: Vec<Stroke>) -> Self {
        Self { strokes }
    }

    pub fn strokes(&self) -> &[Stroke] {
        &self.strokes
    }

    pub fn is_empty(&self) -> bool {
        self.strokes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.strokes.len()
    }

    pub fn push(&mut self, stroke: Stroke) {
        self.strokes.push(stroke);
    }

    pub fn insert(&mut self, index: usize, stroke: Stroke) -> Result<(), DrawingError> {
        if index > self.strokes.len() {
            return Err(DrawingError::StrokeOutOfRange { index, count: self.strokes.len() });
        }

        self.strokes.insert(index, stroke);
        Ok(())
    }

    pub fn remove(&mut self, index: usize) -> Result<Stroke, DrawingError> {
        if index >= self.strokes.len() {
            return Err(DrawingError::StrokeOutOfRange { index, count: self.strokes.len() });
        }

        Ok(self.strokes.remove(index))
    }

    pub fn clear(&mut self) {
        self.strokes.clear();
    }

    pub fn map_points(&self, transform: impl Fn(&Point) -> Point) -> Drawing {
        Drawing { strokes: self.strokes.iter().map(|stroke| stroke.map_points(&transform)).collect() }
    }
}
