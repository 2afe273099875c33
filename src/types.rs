use serde::{Deserialize, Serialize};

/// A point in whichever coordinate space the caller is working in.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn scaled(self, factor: f64) -> Self {
        Self::new(self.x * factor, self.y * factor)
    }

    pub fn distance_to(self, other: Point) -> f64 {
        (other.x - self.x).hypot(other.y - self.y)
    }
}

impl std::ops::Sub for Point {
    type Output = Point;

    fn sub(self, rhs: Point) -> Point {
        Point::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl std::ops::Add for Point {
    type Output = Point;

    fn add(self, rhs: Point) -> Point {
        Point::new(self.x + rhs.x, self.y + rhs.y)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

impl Size {
    pub const fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }
}

/// Axis-aligned rectangle. `origin` is the corner with the smallest x and y,
/// which is bottom-left in global/local space and top-left in pixel space.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub origin: Point,
    pub size: Size,
}

impl Rect {
    pub const fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            origin: Point::new(x, y),
            size: Size::new(width, height),
        }
    }

    /// Normalized rectangle spanned by two corners, in any order.
    pub fn from_corners(a: Point, b: Point) -> Self {
        Self::new(
            a.x.min(b.x),
            a.y.min(b.y),
            (b.x - a.x).abs(),
            (b.y - a.y).abs(),
        )
    }

    pub fn x(&self) -> f64 {
        self.origin.x
    }

    pub fn y(&self) -> f64 {
        self.origin.y
    }

    pub fn width(&self) -> f64 {
        self.size.width
    }

    pub fn height(&self) -> f64 {
        self.size.height
    }

    pub fn max_x(&self) -> f64 {
        self.origin.x + self.size.width
    }

    pub fn max_y(&self) -> f64 {
        self.origin.y + self.size.height
    }

    pub fn mid_x(&self) -> f64 {
        self.origin.x + self.size.width / 2.0
    }

    /// Half-open containment: the max edges belong to the neighbouring rect.
    pub fn contains(&self, p: Point) -> bool {
        p.x >= self.origin.x && p.x < self.max_x() && p.y >= self.origin.y && p.y < self.max_y()
    }

    pub fn offset(&self, by: Point) -> Self {
        Self {
            origin: self.origin + by,
            size: self.size,
        }
    }
}

/// Opaque platform display handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DisplayId(pub u32);

impl std::fmt::Display for DisplayId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Snapshot of one physical display, taken at enumeration time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Display {
    pub id: DisplayId,
    pub name: String,
    /// Frame in global space (bottom-left origin, logical points).
    pub frame: Rect,
    pub pixel_width: u32,
    pub pixel_height: u32,
    pub is_primary: bool,
}

/// Drags at or below this size in either dimension are discarded.
pub const MIN_SELECTION_SIZE: f64 = 5.0;

/// What the capture engine is asked to produce.
#[derive(Clone, Debug, PartialEq)]
pub enum CaptureRequest {
    FullScreen(Option<DisplayId>),
    Region { rect: Rect, display: DisplayId },
}

impl CaptureRequest {
    /// Builds a region request, or `None` for a gesture too small to count.
    pub fn region(rect: Rect, display: DisplayId) -> Option<Self> {
        if rect.width() <= MIN_SELECTION_SIZE || rect.height() <= MIN_SELECTION_SIZE {
            return None;
        }
        Some(CaptureRequest::Region { rect, display })
    }
}

/// File encoding for saved screenshots.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    #[default]
    Png,
    Jpeg,
}

impl ImageFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ImageFormat::Png => "png",
            ImageFormat::Jpeg => "jpg",
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "png" => Some(ImageFormat::Png),
            "jpg" | "jpeg" => Some(ImageFormat::Jpeg),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_corners_normalizes_any_drag_direction() {
        let r = Rect::from_corners(Point::new(50.0, 80.0), Point::new(10.0, 20.0));
        assert_eq!(r, Rect::new(10.0, 20.0, 40.0, 60.0));
    }

    #[test]
    fn region_request_rejects_small_gestures() {
        let display = DisplayId(1);
        assert!(CaptureRequest::region(Rect::new(0.0, 0.0, 3.0, 4.0), display).is_none());
        assert!(CaptureRequest::region(Rect::new(0.0, 0.0, 5.0, 100.0), display).is_none());
        assert!(CaptureRequest::region(Rect::new(0.0, 0.0, 6.0, 6.0), display).is_some());
    }

    #[test]
    fn image_format_extensions() {
        assert_eq!(ImageFormat::from_extension("JPEG"), Some(ImageFormat::Jpeg));
        assert_eq!(ImageFormat::from_extension("gif"), None);
        assert_eq!(ImageFormat::Png.extension(), "png");
    }
}
