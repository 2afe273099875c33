//! Screen capture engine
//!
//! Enumerates displays and captures them through a [`CaptureBackend`]. Region
//! captures take the whole display and crop it in pixel space.

use std::sync::Arc;

use image::RgbaImage;
use log::{debug, info, warn};

use crate::catalog::{Catalog, Screenshot, StorageError};
use crate::clipboard::ImageClipboard;
use crate::transform::PixelMapping;
use crate::types::{CaptureRequest, Display, DisplayId, Rect};

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("No display available for capture")]
    NoDisplayAvailable,

    #[error("Display {0} not found")]
    DisplayNotFound(DisplayId),

    #[error(
        "Crop rectangle {requested:?} lies outside the {}x{} capture",
        buffer.0, buffer.1
    )]
    CropFailed { requested: Rect, buffer: (u32, u32) },

    #[error("Screen capture failed: {0}")]
    CaptureFailed(String),
}

/// Platform access to displays and their pixels.
///
/// `displays` must re-enumerate on every call; callers never cache the result
/// across captures.
pub trait CaptureBackend: Send + Sync + 'static {
    fn displays(&self) -> Result<Vec<Display>, CaptureError>;

    /// Full display at native pixel resolution, cursor excluded.
    fn capture_display(&self, display: &Display) -> Result<RgbaImage, CaptureError>;
}

pub struct CaptureEngine<B> {
    backend: Arc<B>,
}

impl<B> Clone for CaptureEngine<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
        }
    }
}

impl<B: CaptureBackend> CaptureEngine<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend: Arc::new(backend),
        }
    }

    /// Blocking enumeration, for callers on the UI context that need the
    /// display layout immediately (overlay creation).
    pub fn enumerate_displays(&self) -> Result<Vec<Display>, CaptureError> {
        list_displays_blocking(self.backend.as_ref())
    }

    pub async fn list_displays(&self) -> Result<Vec<Display>, CaptureError> {
        let backend = Arc::clone(&self.backend);
        run_blocking(move || list_displays_blocking(backend.as_ref())).await
    }

    pub async fn capture_full_screen(
        &self,
        display: Option<DisplayId>,
    ) -> Result<RgbaImage, CaptureError> {
        let backend = Arc::clone(&self.backend);
        let (_, image) = run_blocking(move || capture_display_blocking(backend.as_ref(), display)).await?;
        Ok(image)
    }

    pub async fn capture_region(
        &self,
        rect: Rect,
        display: DisplayId,
    ) -> Result<RgbaImage, CaptureError> {
        let backend = Arc::clone(&self.backend);
        run_blocking(move || {
            let (target, full) = capture_display_blocking(backend.as_ref(), Some(display))?;
            crop_region(&full, &target, &rect)
        })
        .await
    }

    pub async fn capture(&self, request: &CaptureRequest) -> Result<RgbaImage, CaptureError> {
        match request {
            CaptureRequest::FullScreen(display) => self.capture_full_screen(*display).await,
            CaptureRequest::Region { rect, display } => self.capture_region(*rect, *display).await,
        }
    }
}

async fn run_blocking<T, F>(f: F) -> Result<T, CaptureError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, CaptureError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| CaptureError::CaptureFailed(e.to_string()))?
}

fn list_displays_blocking<B: CaptureBackend + ?Sized>(backend: &B) -> Result<Vec<Display>, CaptureError> {
    let displays = backend.displays()?;
    if displays.is_empty() {
        return Err(CaptureError::NoDisplayAvailable);
    }
    Ok(displays)
}

/// Explicit id must match; otherwise the primary display, else the first.
pub fn resolve_display(
    displays: &[Display],
    requested: Option<DisplayId>,
) -> Result<&Display, CaptureError> {
    match requested {
        Some(id) => displays
            .iter()
            .find(|d| d.id == id)
            .ok_or(CaptureError::DisplayNotFound(id)),
        None => displays
            .iter()
            .find(|d| d.is_primary)
            .or_else(|| displays.first())
            .ok_or(CaptureError::NoDisplayAvailable),
    }
}

fn capture_display_blocking<B: CaptureBackend + ?Sized>(
    backend: &B,
    requested: Option<DisplayId>,
) -> Result<(Display, RgbaImage), CaptureError> {
    let displays = list_displays_blocking(backend)?;
    let display = resolve_display(&displays, requested)?.clone();

    let image = backend.capture_display(&display)?;
    info!(
        "[capture] Display {} captured at {}x{}",
        display.id,
        image.width(),
        image.height()
    );
    Ok((display, image))
}

/// Crops a global-space rectangle out of a full capture of `display`.
///
/// Fails with [`CaptureError::CropFailed`] when the rectangle reaches more than
/// half a pixel past the buffer; smaller overshoot is rounding and is clamped.
pub fn crop_region(full: &RgbaImage, display: &Display, rect: &Rect) -> Result<RgbaImage, CaptureError> {
    let (w_px, h_px) = full.dimensions();
    let failed = |requested: Rect| CaptureError::CropFailed {
        requested,
        buffer: (w_px, h_px),
    };

    let mapping = PixelMapping::new(display.frame.size, w_px, h_px).ok_or_else(|| failed(*rect))?;
    let px = mapping.global_rect_to_pixel(rect, &display.frame);
    debug!("[capture] Region {:?} -> pixel rect {:?} (scale {})", rect, px, mapping.scale);

    const SLACK: f64 = 0.5;
    if px.x() < -SLACK
        || px.y() < -SLACK
        || px.max_x() > w_px as f64 + SLACK
        || px.max_y() > h_px as f64 + SLACK
    {
        return Err(failed(px));
    }

    let x0 = (px.x().round().max(0.0) as u32).min(w_px);
    let y0 = (px.y().round().max(0.0) as u32).min(h_px);
    let x1 = (px.max_x().round().max(0.0) as u32).min(w_px);
    let y1 = (px.max_y().round().max(0.0) as u32).min(h_px);
    if x1 <= x0 || y1 <= y0 {
        return Err(failed(px));
    }

    Ok(image::imageops::crop_imm(full, x0, y0, x1 - x0, y1 - y0).to_image())
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Capture followed by persistence, the flow behind every completed session.
/// With a clipboard attached, each saved image is also copied there.
pub struct CapturePipeline<B> {
    engine: CaptureEngine<B>,
    catalog: Catalog,
    clipboard: Option<Arc<dyn ImageClipboard>>,
}

impl<B: CaptureBackend> CapturePipeline<B> {
    pub fn new(engine: CaptureEngine<B>, catalog: Catalog) -> Self {
        Self {
            engine,
            catalog,
            clipboard: None,
        }
    }

    pub fn with_clipboard(mut self, clipboard: Arc<dyn ImageClipboard>) -> Self {
        self.clipboard = Some(clipboard);
        self
    }

    pub fn engine(&self) -> &CaptureEngine<B> {
        &self.engine
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// A failed clipboard copy is logged; the screenshot is still returned.
    pub async fn run(&self, request: CaptureRequest) -> Result<Screenshot, PipelineError> {
        let image = self.engine.capture(&request).await?;
        let copy = self.clipboard.as_ref().map(|_| image.clone());
        let screenshot = self.catalog.save(image).await?;
        info!("[capture] Saved {:?}", screenshot.path);

        if let (Some(clipboard), Some(image)) = (self.clipboard.clone(), copy) {
            let copied = tokio::task::spawn_blocking(move || clipboard.copy_image(&image)).await;
            match copied {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("[capture] Clipboard copy skipped: {}", e),
                Err(e) => warn!("[capture] Clipboard task failed: {}", e),
            }
        }
        Ok(screenshot)
    }
}

#[cfg(feature = "native-capture")]
pub use native::XcapBackend;

#[cfg(feature = "native-capture")]
mod native {
    use super::{CaptureBackend, CaptureError};
    use crate::types::{Display, DisplayId, Rect};
    use image::RgbaImage;
    use xcap::Monitor;

    /// Backend over xcap monitors.
    ///
    /// xcap reports top-left-origin bounds; they are flipped here against the
    /// primary display's height so the rest of the crate sees bottom-left
    /// global frames.
    #[derive(Default)]
    pub struct XcapBackend;

    struct RawMonitor {
        id: u32,
        name: String,
        x: i32,
        y: i32,
        width: u32,
        height: u32,
        scale: f32,
        primary: bool,
    }

    fn err(e: impl std::fmt::Display) -> CaptureError {
        CaptureError::CaptureFailed(e.to_string())
    }

    fn read_monitor(monitor: &Monitor) -> Result<RawMonitor, CaptureError> {
        Ok(RawMonitor {
            id: monitor.id().map_err(err)?,
            name: monitor.name().unwrap_or_default(),
            x: monitor.x().map_err(err)?,
            y: monitor.y().map_err(err)?,
            width: monitor.width().map_err(err)?,
            height: monitor.height().map_err(err)?,
            scale: monitor.scale_factor().unwrap_or(1.0),
            primary: monitor.is_primary().unwrap_or(false),
        })
    }

    impl CaptureBackend for XcapBackend {
        fn displays(&self) -> Result<Vec<Display>, CaptureError> {
            let monitors = Monitor::all().map_err(err)?;
            let raw = monitors
                .iter()
                .map(read_monitor)
                .collect::<Result<Vec<_>, _>>()?;

            let primary_height = raw
                .iter()
                .find(|m| m.primary)
                .or_else(|| raw.first())
                .map(|m| m.height as f64)
                .unwrap_or(0.0);

            Ok(raw
                .into_iter()
                .map(|m| Display {
                    id: DisplayId(m.id),
                    name: m.name,
                    frame: Rect::new(
                        m.x as f64,
                        primary_height - (m.y as f64 + m.height as f64),
                        m.width as f64,
                        m.height as f64,
                    ),
                    pixel_width: (m.width as f32 * m.scale).round() as u32,
                    pixel_height: (m.height as f32 * m.scale).round() as u32,
                    is_primary: m.primary,
                })
                .collect())
        }

        fn capture_display(&self, display: &Display) -> Result<RgbaImage, CaptureError> {
            let monitors = Monitor::all().map_err(err)?;
            let monitor = monitors
                .into_iter()
                .find(|m| m.id().ok() == Some(display.id.0))
                .ok_or(CaptureError::DisplayNotFound(display.id))?;
            monitor.capture_image().map_err(err)
        }
    }
}
