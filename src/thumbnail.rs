//! Gallery thumbnails, generated off the UI context.

use base64::{engine::general_purpose::STANDARD, Engine};
use image::{ImageEncoder, RgbaImage};
use log::warn;
use tokio::sync::mpsc;

use crate::catalog::{read_image, Screenshot, ScreenshotId, StorageError};

pub const THUMBNAIL_WIDTH: u32 = 200;
pub const THUMBNAIL_HEIGHT: u32 = 150;

/// Largest size with the source aspect ratio that fits the bounds. Images
/// already inside the bounds keep their size.
pub fn fit_within(width: u32, height: u32, max_width: u32, max_height: u32) -> (u32, u32) {
    if width == 0 || height == 0 {
        return (0, 0);
    }
    let ratio = (max_width as f64 / width as f64)
        .min(max_height as f64 / height as f64)
        .min(1.0);
    (
        ((width as f64 * ratio).round() as u32).max(1),
        ((height as f64 * ratio).round() as u32).max(1),
    )
}

pub fn make_thumbnail(image: &RgbaImage) -> RgbaImage {
    let (w, h) = fit_within(image.width(), image.height(), THUMBNAIL_WIDTH, THUMBNAIL_HEIGHT);
    image::imageops::thumbnail(image, w, h)
}

/// PNG data URL for embedding in a web view.
pub fn to_data_url(image: &RgbaImage) -> Result<String, StorageError> {
    let mut png_data = Vec::new();
    image::codecs::png::PngEncoder::new(&mut png_data)
        .write_image(
            image.as_raw(),
            image.width(),
            image.height(),
            image::ExtendedColorType::Rgba8,
        )
        .map_err(|e| StorageError::EncodingFailed(e.to_string()))?;
    Ok(format!("data:image/png;base64,{}", STANDARD.encode(&png_data)))
}

#[derive(Debug)]
pub struct ThumbnailReady {
    pub id: ScreenshotId,
    pub revision: u32,
    pub image: RgbaImage,
}

/// Spawns decode-and-shrink jobs and hands results to whoever drains the
/// receiver on the UI context. Failed jobs are logged and dropped.
#[derive(Clone)]
pub struct ThumbnailWorker {
    results: mpsc::UnboundedSender<ThumbnailReady>,
}

impl ThumbnailWorker {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ThumbnailReady>) {
        let (results, rx) = mpsc::unbounded_channel();
        (Self { results }, rx)
    }

    /// Must be called from within a tokio runtime.
    pub fn request(&self, screenshot: &Screenshot) {
        let results = self.results.clone();
        let id = screenshot.id;
        let revision = screenshot.revision;
        let path = screenshot.path.clone();
        tokio::task::spawn_blocking(move || match read_image(&path) {
            Ok(full) => {
                let image = make_thumbnail(&full);
                let _ = results.send(ThumbnailReady { id, revision, image });
            }
            Err(e) => warn!("[thumbnail] {:?}: {}", path, e),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Catalog, CatalogOptions};
    use image::Rgba;

    #[test]
    fn fit_preserves_aspect() {
        assert_eq!(fit_within(400, 300, 200, 150), (200, 150));
        assert_eq!(fit_within(1000, 100, 200, 150), (200, 20));
        assert_eq!(fit_within(100, 1000, 200, 150), (15, 150));
        assert_eq!(fit_within(0, 10, 200, 150), (0, 0));
        assert_eq!(fit_within(100, 60, 200, 150), (100, 60));
    }

    #[test]
    fn data_url_has_png_prefix() {
        let url = to_data_url(&RgbaImage::new(1, 1)).unwrap();
        assert!(url.starts_with("data:image/png;base64,iVBORw0KGgo"));
    }

    #[tokio::test]
    async fn worker_delivers_thumbnail_for_saved_shot() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Catalog::open(dir.path(), CatalogOptions::default()).unwrap();
        let shot = catalog
            .save(RgbaImage::from_pixel(800, 400, Rgba([1, 2, 3, 255])))
            .await
            .unwrap();

        let (worker, mut rx) = ThumbnailWorker::new();
        worker.request(&shot);
        let ready = rx.recv().await.unwrap();
        assert_eq!(ready.id, shot.id);
        assert_eq!(ready.image.dimensions(), (200, 100));
    }
}
