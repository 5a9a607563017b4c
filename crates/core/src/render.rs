use doc_model::{Drawing, RenderTransform};
use image::{Pixel, Rgba, RgbaImage};

/// Largest snapshot or preview, in pixels (8192 x 8192).
pub const MAX_SNAPSHOT_PIXELS: u64 = 1 << 26;

/// Upper bound on stamps per segment, so a degenerate point or scale cannot
/// stall rendering.
const MAX_STAMPS_PER_SEGMENT: f32 = 65_536.0;

/// Largest gap between stamps, in pixels.
const STAMP_SPACING: f32 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
pub enum RenderError {
    #[error("{width} x {height} points at scale {scale} exceeds {} pixels", MAX_SNAPSHOT_PIXELS)]
    TooLarge { width: f32, height: f32, scale: f32 },
}

/// Pixel size of a `width` x `height` point area at `scale`, at least 1 x 1.
pub fn snapshot_size(width: f32, height: f32, scale: f32) -> Result<(u32, u32), RenderError> {
    let too_large = RenderError::TooLarge { width, height, scale };
    let pixels_w = (f64::from(width) * f64::from(scale)).ceil().max(1.0);
    let pixels_h = (f64::from(height) * f64::from(scale)).ceil().max(1.0);

    // NaN fails this comparison too
    if !(pixels_w * pixels_h <= MAX_SNAPSHOT_PIXELS as f64) {
        return Err(too_large);
    }
    Ok((pixels_w as u32, pixels_h as u32))
}

/// A page-sized pixel target plus the transform from document space to its
/// pixels.
#[derive(Debug, Clone)]
pub struct PageCanvas {
    pub image: RgbaImage,
    pub transform: RenderTransform,
}

impl PageCanvas {
    pub fn new(image: RgbaImage, transform: RenderTransform) -> Self {
        Self { image, transform }
    }
}

/// Turns a drawing (input space, top-left origin) into a `width` x `height`
/// snapshot at `scale` pixels per point.
pub trait StrokeRasterizer {
    fn rasterize(&self, drawing: &Drawing, width: u32, height: u32, scale: f32) -> RgbaImage;
}

/// Stamps each sample's footprint rectangle along the stroke and blends it
/// with the stroke color. No anti-aliasing.
#[derive(Debug, Clone, Copy, Default)]
pub struct FootprintRasterizer;

impl StrokeRasterizer for FootprintRasterizer {
    fn rasterize(&self, drawing: &Drawing, width: u32, height: u32, scale: f32) -> RgbaImage {
        let mut image = RgbaImage::new(width, height);
        if width == 0 || height == 0 {
            return image;
        }

        for stroke in drawing.strokes() {
            let [red, green, blue, alpha] = stroke.color().to_rgba8();
            let points = stroke.points();

            let mut stamp = |x: f32, y: f32, w: f32, h: f32, opacity: f32| {
                let coverage = (f32::from(alpha) * opacity.clamp(0.0, 1.0)).round() as u8;
                let color = Rgba([red, green, blue, coverage]);
                stamp_rect(&mut image, x * scale, y * scale, w * scale, h * scale, color);
            };

            if let [only] = points {
                stamp(only.x, only.y, only.width, only.height, only.opacity);
                continue;
            }

            for pair in points.windows(2) {
                let (from, to) = (&pair[0], &pair[1]);
                let distance = ((to.x - from.x).powi(2) + (to.y - from.y).powi(2)).sqrt() * scale;
                let steps = ((distance / STAMP_SPACING).ceil().min(MAX_STAMPS_PER_SEGMENT) as u32).max(1);

                for step in 0..=steps {
                    let t = step as f32 / steps as f32;
                    let lerp = |a: f32, b: f32| a + (b - a) * t;
                    stamp(
                        lerp(from.x, to.x),
                        lerp(from.y, to.y),
                        lerp(from.width, to.width),
                        lerp(from.height, to.height),
                        lerp(from.opacity, to.opacity),
                    );
                }
            }
        }

        image
    }
}

fn stamp_rect(image: &mut RgbaImage, cx: f32, cy: f32, w: f32, h: f32, color: Rgba<u8>) {
    let half_w = w.max(1.0) / 2.0;
    let half_h = h.max(1.0) / 2.0;
    let x0 = (cx - half_w).floor().max(0.0) as u32;
    let y0 = (cy - half_h).floor().max(0.0) as u32;
    let x1 = ((cx + half_w).ceil().max(0.0) as u32).min(image.width());
    let y1 = ((cy + half_h).ceil().max(0.0) as u32).min(image.height());

    for y in y0..y1 {
        for x in x0..x1 {
            image.get_pixel_mut(x, y).blend(&color);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use doc_model::{Color, Point, Stroke, Tool};

    fn line(width: f32) -> Drawing {
        Drawing::from_strokes(vec![Stroke::new(
            Tool::Pen,
            Color::new(0.0, 0.0, 1.0, 1.0),
            vec![Point::at(2.0, 5.0, 0.0, width), Point::at(18.0, 5.0, 0.2, width)],
        )
        .expect("valid stroke")])
    }

    #[test]
    fn stroke_covers_its_path() {
        let image = FootprintRasterizer.rasterize(&line(2.0), 20, 10, 1.0);

        assert_eq!(image.get_pixel(10, 5).0, [0, 0, 255, 255]);
        assert_eq!(image.get_pixel(10, 9).0[3], 0);
    }

    #[test]
    fn scale_enlarges_the_snapshot() {
        let image = FootprintRasterizer.rasterize(&line(2.0), 40, 20, 2.0);

        assert_eq!(image.get_pixel(20, 10).0[3], 255);
        assert_eq!(image.get_pixel(20, 18).0[3], 0);
    }

    #[test]
    fn single_point_stroke_is_a_dot() {
        let drawing = Drawing::from_strokes(vec![Stroke::new(
            Tool::Pencil,
            Color::BLACK,
            vec![Point::at(5.0, 5.0, 0.0, 3.0)],
        )
        .expect("valid stroke")]);

        let image = FootprintRasterizer.rasterize(&drawing, 10, 10, 1.0);
        assert_eq!(image.get_pixel(5, 5).0[3], 255);
        assert_eq!(image.get_pixel(0, 0).0[3], 0);
    }

    #[test]
    fn strokes_outside_the_snapshot_are_clipped() {
        let drawing = Drawing::from_strokes(vec![Stroke::new(
            Tool::Pen,
            Color::BLACK,
            vec![Point::at(-50.0, -50.0, 0.0, 2.0), Point::at(500.0, 500.0, 0.1, 2.0)],
        )
        .expect("valid stroke")]);

        let image = FootprintRasterizer.rasterize(&drawing, 8, 8, 1.0);
        assert_eq!(image.dimensions(), (8, 8));
    }

    #[test]
    fn far_apart_points_render_in_bounded_time() {
        let drawing = Drawing::from_strokes(vec![Stroke::new(
            Tool::Pen,
            Color::BLACK,
            vec![Point::at(1.0, 1.0, 0.0, 2.0), Point::at(f32::MAX, 1.0, 0.1, 2.0)],
        )
        .expect("valid stroke")]);

        let image = FootprintRasterizer.rasterize(&drawing, 8, 8, 1.0);
        assert_eq!(image.get_pixel(1, 1).0[3], 255);
    }

    #[test]
    fn snapshot_size_is_capped() {
        assert_eq!(snapshot_size(612.0, 792.0, 2.0), Ok((1224, 1584)));
        assert_eq!(snapshot_size(0.0, 10.0, 1.0), Ok((1, 10)));
        assert!(matches!(snapshot_size(612.0, 792.0, 1000.0), Err(RenderError::TooLarge { .. })));
        assert!(snapshot_size(612.0, 792.0, f32::INFINITY).is_err());
        assert!(snapshot_size(612.0, f32::NAN, 1.0).is_err());
    }

    #[test]
    fn zero_sized_snapshot_is_empty() {
        let image = FootprintRasterizer.rasterize(&line(2.0), 0, 10, 1.0);
        assert_eq!(image.width(), 0);
    }
}
