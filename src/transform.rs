//! Conversions between global, display-local and pixel-buffer coordinates.
//!
//! Global and local space are bottom-left origin in logical points. Pixel
//! space is top-left origin in device pixels. The points-to-pixels factor is
//! always derived from the buffer that was actually captured, so mixed
//! Retina/non-Retina setups need no special casing.

use crate::types::{Display, Point, Rect, Size};

pub fn global_to_local(p: Point, frame: &Rect) -> Point {
    p - frame.origin
}

pub fn local_to_global(p: Point, frame: &Rect) -> Point {
    p + frame.origin
}

pub fn global_rect_to_local(rect: &Rect, frame: &Rect) -> Rect {
    Rect {
        origin: global_to_local(rect.origin, frame),
        size: rect.size,
    }
}

/// Maps one display's local space onto its captured pixel buffer.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PixelMapping {
    pub scale: f64,
    pub pixel_width: u32,
    pub pixel_height: u32,
}

impl PixelMapping {
    /// Returns `None` for a degenerate display size.
    pub fn new(display_size: Size, pixel_width: u32, pixel_height: u32) -> Option<Self> {
        if display_size.width <= 0.0 || pixel_width == 0 || pixel_height == 0 {
            return None;
        }
        Some(Self {
            scale: pixel_width as f64 / display_size.width,
            pixel_width,
            pixel_height,
        })
    }

    pub fn local_to_pixel(&self, p: Point) -> Point {
        Point::new(p.x * self.scale, self.pixel_height as f64 - p.y * self.scale)
    }

    /// The Y origin flips to the rectangle's top edge.
    pub fn local_rect_to_pixel(&self, rect: &Rect) -> Rect {
        Rect::new(
            rect.x() * self.scale,
            self.pixel_height as f64 - (rect.y() + rect.height()) * self.scale,
            rect.width() * self.scale,
            rect.height() * self.scale,
        )
    }

    pub fn global_rect_to_pixel(&self, rect: &Rect, frame: &Rect) -> Rect {
        self.local_rect_to_pixel(&global_rect_to_local(rect, frame))
    }
}

/// The display whose frame contains `p` (global space).
pub fn display_at(displays: &[Display], p: Point) -> Option<&Display> {
    displays.iter().find(|d| d.frame.contains(p))
}
