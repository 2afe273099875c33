//! Annotation model and raster renderer.
//!
//! Geometry is stored in image-local pixels with a top-left origin and is only
//! multiplied by the view scale at draw time. Preview and export both go
//! through [`render_annotations`], so they differ only by resampling of the
//! base image.

use ab_glyph::{Font, FontArc, PxScale, ScaleFont};
use image::{Rgba, RgbaImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_line_segment_mut, draw_polygon_mut, draw_text_mut};
use imageproc::point::Point as PolyPoint;
use log::warn;
use serde::{Deserialize, Serialize};

use crate::types::Point;

/// Arrowhead length per unit of stroke width.
pub const ARROW_HEAD_FACTOR: f64 = 5.0;
/// Half-angle of the arrowhead at its tip.
pub const ARROW_HEAD_HALF_ANGLE: f64 = std::f64::consts::PI / 6.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    pub const RED: Color = Color::rgb(255, 59, 48);
    pub const BLUE: Color = Color::rgb(0, 122, 255);
    pub const GREEN: Color = Color::rgb(52, 199, 89);
    pub const YELLOW: Color = Color::rgb(255, 204, 0);
    pub const BLACK: Color = Color::rgb(0, 0, 0);
    pub const WHITE: Color = Color::rgb(255, 255, 255);

    pub fn to_rgba(self) -> Rgba<u8> {
        Rgba([self.r, self.g, self.b, self.a])
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Annotation {
    Arrow {
        start: Point,
        end: Point,
        color: Color,
        stroke_width: f64,
    },
    Freehand {
        /// Never empty.
        points: Vec<Point>,
        color: Color,
        stroke_width: f64,
    },
    Text {
        content: String,
        /// Baseline origin.
        position: Point,
        font_size: f64,
        color: Color,
    },
}

/// Fonts available to the renderer. Text annotations are skipped when no
/// font could be loaded.
#[derive(Clone, Default)]
pub struct Fonts {
    bold: Option<FontArc>,
}

impl Fonts {
    pub fn new(bold: FontArc) -> Self {
        Self { bold: Some(bold) }
    }

    pub fn none() -> Self {
        Self::default()
    }

    /// Bold system face, found the way the share composer finds its fonts.
    pub fn system() -> Self {
        #[cfg(target_os = "macos")]
        let candidates: &[(&str, u32)] = &[
            ("/System/Library/Fonts/Supplemental/Arial Bold.ttf", 0),
            ("/System/Library/Fonts/Helvetica.ttc", 1),
        ];
        #[cfg(target_os = "windows")]
        let candidates: &[(&str, u32)] = &[("C:\\Windows\\Fonts\\arialbd.ttf", 0)];
        #[cfg(not(any(target_os = "macos", target_os = "windows")))]
        let candidates: &[(&str, u32)] = &[
            ("/usr/share/fonts/truetype/dejavu/DejaVuSans-Bold.ttf", 0),
            ("/usr/share/fonts/TTF/DejaVuSans-Bold.ttf", 0),
            ("/usr/share/fonts/dejavu/DejaVuSans-Bold.ttf", 0),
            ("/usr/share/fonts/truetype/liberation/LiberationSans-Bold.ttf", 0),
        ];

        for (path, index) in candidates {
            let Ok(data) = std::fs::read(path) else { continue };
            match ab_glyph::FontVec::try_from_vec_and_index(data, *index) {
                Ok(font) => return Self::new(FontArc::new(font)),
                Err(e) => warn!("[render] Unusable font {}: {}", path, e),
            }
        }
        warn!("[render] No bold system font found, text annotations will not render");
        Self::none()
    }

    pub fn bold(&self) -> Option<&FontArc> {
        self.bold.as_ref()
    }
}

/// Resolved arrow outline at a given scale.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ArrowGeometry {
    pub shaft_start: Point,
    pub shaft_end: Point,
    /// Tip followed by the two base corners.
    pub head: [Point; 3],
    pub line_width: f64,
}

impl ArrowGeometry {
    pub fn new(start: Point, end: Point, stroke_width: f64, scale: f64) -> Self {
        let start = start.scaled(scale);
        let end = end.scaled(scale);
        let line_width = stroke_width * scale;
        let head_length = ARROW_HEAD_FACTOR * line_width;

        let length = start.distance_to(end);
        let (dx, dy) = if length > 0.0 {
            ((end.x - start.x) / length, (end.y - start.y) / length)
        } else {
            (1.0, 0.0)
        };

        // The shaft stops at the head's base and never pokes through the tip.
        let shaft_length = (length - head_length).max(0.0);
        let shaft_end = Point::new(start.x + dx * shaft_length, start.y + dy * shaft_length);

        let base = Point::new(end.x - dx * head_length, end.y - dy * head_length);
        let half_base = head_length * ARROW_HEAD_HALF_ANGLE.tan();
        let (nx, ny) = (-dy, dx);
        let head = [
            end,
            Point::new(base.x + nx * half_base, base.y + ny * half_base),
            Point::new(base.x - nx * half_base, base.y - ny * half_base),
        ];

        Self {
            shaft_start: start,
            shaft_end,
            head,
            line_width,
        }
    }
}

impl Annotation {
    pub fn color(&self) -> Color {
        match self {
            Annotation::Arrow { color, .. }
            | Annotation::Freehand { color, .. }
            | Annotation::Text { color, .. } => *color,
        }
    }

    /// Draws into `canvas`, multiplying all geometry by `scale`.
    pub fn render(&self, canvas: &mut RgbaImage, scale: f64, fonts: &Fonts) {
        match self {
            Annotation::Arrow {
                start,
                end,
                color,
                stroke_width,
            } => {
                let geometry = ArrowGeometry::new(*start, *end, *stroke_width, scale);
                let color = color.to_rgba();
                if geometry.shaft_start != geometry.shaft_end {
                    stroke_segment(canvas, geometry.shaft_start, geometry.shaft_end, geometry.line_width, color);
                    dot(canvas, geometry.shaft_start, geometry.line_width, color);
                }
                fill_polygon(canvas, &geometry.head, color);
            }
            Annotation::Freehand {
                points,
                color,
                stroke_width,
            } => {
                let color = color.to_rgba();
                let width = stroke_width * scale;
                let scaled: Vec<Point> = points.iter().map(|p| p.scaled(scale)).collect();
                for pair in scaled.windows(2) {
                    stroke_segment(canvas, pair[0], pair[1], width, color);
                }
                // Round joins and caps.
                for p in &scaled {
                    dot(canvas, *p, width, color);
                }
            }
            Annotation::Text {
                content,
                position,
                font_size,
                color,
            } => {
                let Some(font) = fonts.bold() else { return };
                let px = (*font_size * scale) as f32;
                if content.is_empty() || px <= 0.0 {
                    return;
                }
                let ascent = font.as_scaled(PxScale::from(px)).ascent();
                let origin = position.scaled(scale);
                draw_text_mut(
                    canvas,
                    color.to_rgba(),
                    origin.x.round() as i32,
                    (origin.y - ascent as f64).round() as i32,
                    PxScale::from(px),
                    font,
                    content,
                );
            }
        }
    }
}

/// Composites `annotations` onto `canvas` in list order.
pub fn render_annotations(canvas: &mut RgbaImage, annotations: &[Annotation], scale: f64, fonts: &Fonts) {
    for annotation in annotations {
        annotation.render(canvas, scale, fonts);
    }
}

/// Final output: base image at 1:1 with every annotation on top.
pub fn compose_export(base: &RgbaImage, annotations: &[Annotation], fonts: &Fonts) -> RgbaImage {
    let mut canvas = base.clone();
    render_annotations(&mut canvas, annotations, 1.0, fonts);
    canvas
}

/// Preview at `target_width`, height following the base aspect ratio.
/// Returns the canvas and the scale the annotations were drawn at.
pub fn compose_preview(
    base: &RgbaImage,
    annotations: &[Annotation],
    target_width: u32,
    fonts: &Fonts,
) -> (RgbaImage, f64) {
    let (w, h) = base.dimensions();
    if w == 0 || h == 0 || target_width == 0 {
        return (RgbaImage::new(0, 0), 0.0);
    }
    let scale = target_width as f64 / w as f64;
    let target_height = ((h as f64 * scale).round() as u32).max(1);
    let mut canvas = if target_width == w && target_height == h {
        base.clone()
    } else {
        image::imageops::resize(base, target_width, target_height, image::imageops::FilterType::Triangle)
    };
    render_annotations(&mut canvas, annotations, scale, fonts);
    (canvas, scale)
}

fn to_poly(p: Point) -> PolyPoint<i32> {
    PolyPoint::new(p.x.round() as i32, p.y.round() as i32)
}

fn fill_polygon(canvas: &mut RgbaImage, points: &[Point], color: Rgba<u8>) {
    let mut poly: Vec<PolyPoint<i32>> = points.iter().map(|p| to_poly(*p)).collect();
    poly.dedup();
    while poly.len() > 1 && poly.first() == poly.last() {
        poly.pop();
    }
    match poly.len() {
        0 => {}
        1 => draw_filled_circle_mut(canvas, (poly[0].x, poly[0].y), 0, color),
        2 => draw_line_segment_mut(
            canvas,
            (poly[0].x as f32, poly[0].y as f32),
            (poly[1].x as f32, poly[1].y as f32),
            color,
        ),
        _ => draw_polygon_mut(canvas, &poly, color),
    }
}

/// Thick segment with butt ends.
fn stroke_segment(canvas: &mut RgbaImage, a: Point, b: Point, width: f64, color: Rgba<u8>) {
    let length = a.distance_to(b);
    if length == 0.0 {
        return;
    }
    let half = width / 2.0;
    let nx = -(b.y - a.y) / length * half;
    let ny = (b.x - a.x) / length * half;
    let corners = [
        Point::new(a.x + nx, a.y + ny),
        Point::new(b.x + nx, b.y + ny),
        Point::new(b.x - nx, b.y - ny),
        Point::new(a.x - nx, a.y - ny),
    ];
    fill_polygon(canvas, &corners, color);
}

fn dot(canvas: &mut RgbaImage, center: Point, width: f64, color: Rgba<u8>) {
    let radius = (width / 2.0).round() as i32;
    draw_filled_circle_mut(canvas, (center.x.round() as i32, center.y.round() as i32), radius, color);
}
