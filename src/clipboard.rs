//! Image copies to the system pasteboard.

use std::borrow::Cow;

use image::RgbaImage;
use log::info;

#[derive(Debug, thiserror::Error)]
pub enum ClipboardError {
    #[error("Clipboard unavailable: {0}")]
    Unavailable(String),

    #[error("Clipboard write failed: {0}")]
    WriteFailed(String),
}

/// Destination for copied images. Calls may block briefly.
pub trait ImageClipboard: Send + Sync {
    fn copy_image(&self, image: &RgbaImage) -> Result<(), ClipboardError>;
}

/// The OS clipboard through arboard. A new handle is opened per copy.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClipboard;

impl ImageClipboard for SystemClipboard {
    fn copy_image(&self, image: &RgbaImage) -> Result<(), ClipboardError> {
        let mut clipboard =
            arboard::Clipboard::new().map_err(|e| ClipboardError::Unavailable(e.to_string()))?;
        clipboard
            .set_image(arboard::ImageData {
                width: image.width() as usize,
                height: image.height() as usize,
                bytes: Cow::Borrowed(image.as_raw()),
            })
            .map_err(|e| ClipboardError::WriteFailed(e.to_string()))?;
        info!("[clipboard] Copied {}x{} image", image.width(), image.height());
        Ok(())
    }
}
