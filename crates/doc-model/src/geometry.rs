use crate::drawing::Point;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height }
    }

    /// Builds a rect from two corners in any order.
    pub fn from_corners(x0: f32, y0: f32, x1: f32, y1: f32) -> Self {
        Self { x: x0.min(x1), y: y0.min(y1), width: (x1 - x0).abs(), height: (y1 - y0).abs() }
    }

    pub fn max_x(&self) -> f32 {
        self.x + self.width
    }

    pub fn max_y(&self) -> f32 {
        self.y + self.height
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }
}

/// Flips an input-space point (top-left origin, Y down) into document space
/// (bottom-left origin, Y up). X and all non-positional fields are untouched.
pub fn to_document_space(point: &Point, page_height: f32) -> Point {
    Point { y: page_height - point.y, ..*point }
}

/// Inverse of [`to_document_space`]. The flip is its own inverse.
pub fn to_input_space(point: &Point, page_height: f32) -> Point {
    to_document_space(point, page_height)
}

/// Affine transform of the active rendering context, `[a b c d tx ty]` in PDF order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderTransform {
    pub a: f32,
    pub b: f32,
    pub c: f32,
    pub d: f32,
    pub tx: f32,
    pub ty: f32,
}

impl RenderTransform {
    pub const IDENTITY: RenderTransform =
        RenderTransform { a: 1.0, b: 0.0, c: 0.0, d: 1.0, tx: 0.0, ty: 0.0 };

    pub fn scale(scale: f32) -> Self {
        Self { a: scale, d: scale, ..Self::IDENTITY }
    }

    pub fn apply(&self, x: f32, y: f32) -> (f32, f32) {
        (self.a * x + self.c * y + self.tx, self.b * x + self.d * y + self.ty)
    }

    /// Scale used for rasterizing snapshots: the horizontal scale component,
    /// never below 1.0.
    pub fn raster_scale(&self) -> f32 {
        self.a.max(1.0)
    }
}

impl Default for RenderTransform {
    fn default() -> Self {
        Self::IDENTITY
    }
}
