//! Annotation editor session.
//!
//! Owns the base image, the annotation list with its undo history, and the
//! gesture in progress. Pointer input arrives in image-local coordinates; use
//! [`ViewMapping`] to get there from a letterboxed view.

use image::RgbaImage;
use log::info;

use crate::annotation::{compose_export, compose_preview, Annotation, Color, Fonts};
use crate::catalog::{Catalog, Screenshot, StorageError};
use crate::clipboard::{ClipboardError, ImageClipboard};
use crate::history::EditHistory;
use crate::types::{Point, Rect, Size};

/// Share of the limiting view dimension the image occupies.
const VIEW_FILL: f64 = 0.9;

#[derive(Debug, thiserror::Error)]
pub enum EditorError {
    #[error("Failed to render the edited image: {0}")]
    RenderingFailed(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Clipboard(#[from] ClipboardError),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ToolType {
    #[default]
    Freehand,
    Arrow,
    Text,
}

impl ToolType {
    pub const ALL: [ToolType; 3] = [ToolType::Freehand, ToolType::Arrow, ToolType::Text];

    pub fn display_name(self) -> &'static str {
        match self {
            ToolType::Freehand => "Draw",
            ToolType::Arrow => "Arrow",
            ToolType::Text => "Text",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ToolSettings {
    pub tool: ToolType,
    pub color: Color,
    pub stroke_width: f64,
    pub font_size: f64,
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            tool: ToolType::Freehand,
            color: Color::RED,
            stroke_width: 3.0,
            font_size: 24.0,
        }
    }
}

/// Placement of the image inside an editor view (top-left origin).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ViewMapping {
    pub image_rect: Rect,
    pub image_size: Size,
}

impl ViewMapping {
    /// Centres the image at 90% of whichever view dimension limits it.
    pub fn fit(view: Size, image: Size) -> Option<Self> {
        if view.width <= 0.0 || view.height <= 0.0 || image.width <= 0.0 || image.height <= 0.0 {
            return None;
        }
        let image_aspect = image.width / image.height;
        let view_aspect = view.width / view.height;
        let (width, height) = if image_aspect > view_aspect {
            let width = view.width * VIEW_FILL;
            (width, width / image_aspect)
        } else {
            let height = view.height * VIEW_FILL;
            (height * image_aspect, height)
        };
        Some(Self {
            image_rect: Rect::new((view.width - width) / 2.0, (view.height - height) / 2.0, width, height),
            image_size: image,
        })
    }

    pub fn scale(&self) -> f64 {
        self.image_rect.width() / self.image_size.width
    }

    /// `None` when the point is outside the image.
    pub fn view_to_image(&self, p: Point) -> Option<Point> {
        let r = &self.image_rect;
        if p.x < r.x() || p.x > r.max_x() || p.y < r.y() || p.y > r.max_y() {
            return None;
        }
        Some(Point::new(
            (p.x - r.x()) / r.width() * self.image_size.width,
            (p.y - r.y()) / r.height() * self.image_size.height,
        ))
    }

    pub fn image_to_view(&self, p: Point) -> Point {
        self.image_rect.origin + p.scaled(self.scale())
    }
}

#[derive(Clone, Debug, PartialEq)]
enum Gesture {
    Idle,
    Freehand(Vec<Point>),
    Arrow { start: Point, end: Point },
}

/// What the shell should do after a pointer-down.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ToolAction {
    None,
    /// Ask the user for text to place at this image point.
    RequestText(Point),
}

pub struct EditorSession {
    screenshot: Screenshot,
    base: RgbaImage,
    history: EditHistory<Vec<Annotation>>,
    gesture: Gesture,
    fonts: Fonts,
    pub settings: ToolSettings,
}

impl EditorSession {
    pub fn new(screenshot: Screenshot, base: RgbaImage, fonts: Fonts) -> Self {
        Self {
            screenshot,
            base,
            history: EditHistory::new(Vec::new()),
            gesture: Gesture::Idle,
            fonts,
            settings: ToolSettings::default(),
        }
    }

    pub async fn open(catalog: &Catalog, screenshot: Screenshot, fonts: Fonts) -> Result<Self, EditorError> {
        let base = catalog.load_image(&screenshot).await?;
        Ok(Self::new(screenshot, base, fonts))
    }

    pub fn screenshot(&self) -> &Screenshot {
        &self.screenshot
    }

    pub fn base_image(&self) -> &RgbaImage {
        &self.base
    }

    pub fn image_size(&self) -> Size {
        Size::new(self.base.width() as f64, self.base.height() as f64)
    }

    pub fn annotations(&self) -> &[Annotation] {
        self.history.current()
    }

    pub fn add_annotation(&mut self, annotation: Annotation) {
        self.history.record(|list| list.push(annotation));
    }

    pub fn undo(&mut self) -> bool {
        self.history.undo()
    }

    pub fn redo(&mut self) -> bool {
        self.history.redo()
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    pub fn has_unsaved_changes(&self) -> bool {
        self.history.has_unsaved_changes()
    }

    pub fn pointer_down(&mut self, at: Point) -> ToolAction {
        match self.settings.tool {
            ToolType::Freehand => {
                self.gesture = Gesture::Freehand(vec![at]);
                ToolAction::None
            }
            ToolType::Arrow => {
                self.gesture = Gesture::Arrow { start: at, end: at };
                ToolAction::None
            }
            ToolType::Text => {
                self.gesture = Gesture::Idle;
                ToolAction::RequestText(at)
            }
        }
    }

    pub fn pointer_dragged(&mut self, at: Point) {
        match &mut self.gesture {
            Gesture::Freehand(points) => points.push(at),
            Gesture::Arrow { end, .. } => *end = at,
            Gesture::Idle => {}
        }
    }

    /// Commits the gesture when it amounts to something: at least two
    /// freehand points, or an arrow whose ends differ.
    pub fn pointer_up(&mut self) -> Option<Annotation> {
        let gesture = std::mem::replace(&mut self.gesture, Gesture::Idle);
        let annotation = match gesture {
            Gesture::Freehand(points) if points.len() > 1 => Annotation::Freehand {
                points,
                color: self.settings.color,
                stroke_width: self.settings.stroke_width,
            },
            Gesture::Arrow { start, end } if start != end => Annotation::Arrow {
                start,
                end,
                color: self.settings.color,
                stroke_width: self.settings.stroke_width,
            },
            _ => return None,
        };
        self.add_annotation(annotation.clone());
        Some(annotation)
    }

    /// Empty text is ignored.
    pub fn add_text(&mut self, at: Point, text: &str) -> bool {
        if text.is_empty() {
            return false;
        }
        self.add_annotation(Annotation::Text {
            content: text.to_string(),
            position: at,
            font_size: self.settings.font_size,
            color: self.settings.color,
        });
        true
    }

    fn in_progress(&self) -> Option<Annotation> {
        match &self.gesture {
            Gesture::Freehand(points) if !points.is_empty() => Some(Annotation::Freehand {
                points: points.clone(),
                color: self.settings.color,
                stroke_width: self.settings.stroke_width,
            }),
            Gesture::Arrow { start, end } if start != end => Some(Annotation::Arrow {
                start: *start,
                end: *end,
                color: self.settings.color,
                stroke_width: self.settings.stroke_width,
            }),
            _ => None,
        }
    }

    /// Live view at `target_width`, including the gesture being drawn.
    pub fn preview(&self, target_width: u32) -> (RgbaImage, f64) {
        let mut list = self.annotations().to_vec();
        list.extend(self.in_progress());
        compose_preview(&self.base, &list, target_width, &self.fonts)
    }

    pub fn render_final(&self) -> Result<RgbaImage, EditorError> {
        if self.base.width() == 0 || self.base.height() == 0 {
            return Err(EditorError::RenderingFailed("image has no pixels".into()));
        }
        Ok(compose_export(&self.base, self.annotations(), &self.fonts))
    }

    /// Copies the image with its current annotations, leaving the file and the
    /// history as they are.
    pub fn copy_rendered(&self, clipboard: &dyn ImageClipboard) -> Result<(), EditorError> {
        let rendered = self.render_final()?;
        clipboard.copy_image(&rendered)?;
        info!("[editor] Copied {} annotation(s) to the clipboard", self.annotations().len());
        Ok(())
    }

    /// Writes the composited image back through the catalog. On failure the
    /// session is left untouched so the caller can retry.
    pub async fn save(&mut self, catalog: &Catalog) -> Result<(), EditorError> {
        let rendered = self.render_final()?;
        let updated = catalog.overwrite(&self.screenshot, rendered.clone()).await?;
        info!(
            "[editor] Saved {} annotation(s) into {:?}",
            self.annotations().len(),
            updated.filename
        );
        self.screenshot = updated;
        self.base = rendered;
        self.gesture = Gesture::Idle;
        self.history.reset(Vec::new());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CatalogOptions, ScreenshotId};
    use crate::clipboard::tests::{BrokenClipboard, RecordingClipboard};
    use chrono::Local;
    use image::Rgba;
    use std::path::PathBuf;

    const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);

    fn session(w: u32, h: u32) -> EditorSession {
        let shot = Screenshot {
            id: ScreenshotId(1),
            path: PathBuf::from("/nonexistent/shot.png"),
            created_at: Local::now(),
            filename: "shot.png".into(),
            revision: 0,
        };
        EditorSession::new(shot, RgbaImage::from_pixel(w, h, WHITE), Fonts::none())
    }

    #[test]
    fn fit_letterboxes_wide_images() {
        let m = ViewMapping::fit(Size::new(1000.0, 1000.0), Size::new(2000.0, 1000.0)).unwrap();
        assert_eq!(m.image_rect, Rect::new(50.0, 275.0, 900.0, 450.0));
        assert_eq!(m.scale(), 0.45);
        assert_eq!(m.view_to_image(Point::new(50.0, 275.0)), Some(Point::new(0.0, 0.0)));
        assert_eq!(m.view_to_image(Point::new(950.0, 725.0)), Some(Point::new(2000.0, 1000.0)));
        assert_eq!(m.view_to_image(Point::new(10.0, 10.0)), None);
        assert_eq!(m.image_to_view(Point::new(1000.0, 500.0)), Point::new(500.0, 500.0));
    }

    #[test]
    fn fit_pillarboxes_tall_images() {
        let m = ViewMapping::fit(Size::new(1000.0, 500.0), Size::new(100.0, 200.0)).unwrap();
        assert_eq!(m.image_rect.height(), 450.0);
        assert_eq!(m.image_rect.width(), 225.0);
        assert!(ViewMapping::fit(Size::new(0.0, 10.0), Size::new(1.0, 1.0)).is_none());
    }

    #[test]
    fn freehand_gesture_needs_two_points() {
        let mut s = session(50, 50);
        s.pointer_down(Point::new(1.0, 1.0));
        assert!(s.pointer_up().is_none());
        assert!(!s.can_undo());

        s.pointer_down(Point::new(1.0, 1.0));
        s.pointer_dragged(Point::new(10.0, 10.0));
        s.pointer_dragged(Point::new(20.0, 5.0));
        let committed = s.pointer_up().unwrap();
        assert!(matches!(committed, Annotation::Freehand { ref points, .. } if points.len() == 3));
        assert_eq!(s.annotations().len(), 1);
        assert!(s.has_unsaved_changes());
    }

    #[test]
    fn arrow_gesture_with_same_ends_is_dropped() {
        let mut s = session(50, 50);
        s.settings.tool = ToolType::Arrow;
        s.pointer_down(Point::new(5.0, 5.0));
        assert!(s.pointer_up().is_none());

        s.pointer_down(Point::new(5.0, 5.0));
        s.pointer_dragged(Point::new(30.0, 5.0));
        assert!(matches!(s.pointer_up(), Some(Annotation::Arrow { .. })));
    }

    #[test]
    fn text_tool_requests_input() {
        let mut s = session(50, 50);
        s.settings.tool = ToolType::Text;
        let at = Point::new(4.0, 20.0);
        assert_eq!(s.pointer_down(at), ToolAction::RequestText(at));
        assert!(!s.add_text(at, ""));
        assert!(s.add_text(at, "note"));
        assert!(matches!(&s.annotations()[0], Annotation::Text { content, font_size, .. } if content == "note" && *font_size == 24.0));
    }

    #[test]
    fn preview_shows_gesture_in_progress() {
        let mut s = session(40, 40);
        s.pointer_down(Point::new(5.0, 20.0));
        s.pointer_dragged(Point::new(35.0, 20.0));
        let (live, scale) = s.preview(80);
        assert_eq!(scale, 2.0);
        assert_eq!(*live.get_pixel(40, 40), Color::RED.to_rgba());
        // Not yet part of the document.
        assert!(s.annotations().is_empty());
        assert_eq!(*s.render_final().unwrap().get_pixel(20, 20), WHITE);
    }

    #[test]
    fn undo_redo_through_the_session() {
        let mut s = session(50, 50);
        for x in [10.0, 20.0] {
            s.pointer_down(Point::new(x, 1.0));
            s.pointer_dragged(Point::new(x, 40.0));
            s.pointer_up();
        }
        assert!(s.undo());
        assert_eq!(s.annotations().len(), 1);
        assert!(s.redo());
        assert_eq!(s.annotations().len(), 2);
    }

    #[test]
    fn copy_sends_annotated_image_and_keeps_history() {
        let mut s = session(30, 30);
        s.pointer_down(Point::new(0.0, 15.0));
        s.pointer_dragged(Point::new(29.0, 15.0));
        s.pointer_up();

        let clipboard = RecordingClipboard::default();
        s.copy_rendered(&clipboard).unwrap();
        let copies = clipboard.copies.lock().unwrap();
        assert_eq!(copies.len(), 1);
        assert_eq!(*copies[0].get_pixel(15, 15), Color::RED.to_rgba());
        assert_eq!(*s.base_image().get_pixel(15, 15), WHITE);
        assert!(s.has_unsaved_changes());
    }

    #[test]
    fn copy_failure_is_reported() {
        let s = session(10, 10);
        assert!(matches!(s.copy_rendered(&BrokenClipboard), Err(EditorError::Clipboard(_))));
    }

    #[tokio::test]
    async fn save_overwrites_and_clears_history() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Catalog::open(
            dir.path(),
            CatalogOptions {
                delete_to_trash: false,
                ..CatalogOptions::default()
            },
        )
        .unwrap();
        let shot = catalog.save(RgbaImage::from_pixel(30, 30, WHITE)).await.unwrap();

        let mut s = EditorSession::open(&catalog, shot.clone(), Fonts::none()).await.unwrap();
        s.pointer_down(Point::new(0.0, 15.0));
        s.pointer_dragged(Point::new(29.0, 15.0));
        s.pointer_up();
        s.save(&catalog).await.unwrap();

        assert!(s.annotations().is_empty());
        assert!(!s.can_undo() && !s.can_redo() && !s.has_unsaved_changes());
        assert_eq!(s.screenshot().revision, 1);
        let on_disk = catalog.load_image(&shot).await.unwrap();
        assert_eq!(*on_disk.get_pixel(15, 15), Color::RED.to_rgba());
        assert_eq!(on_disk, *s.base_image());
    }

    #[tokio::test]
    async fn failed_save_keeps_edits_for_retry() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Catalog::open(dir.path(), CatalogOptions::default()).unwrap();
        let mut s = session(10, 10);
        s.add_text(Point::new(1.0, 5.0), "x");
        // The screenshot's directory does not exist, so the write fails.
        assert!(matches!(s.save(&catalog).await, Err(EditorError::Storage(_))));
        assert_eq!(s.annotations().len(), 1);
        assert!(s.has_unsaved_changes());
    }
}
