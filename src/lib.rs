//! Screenshot capture, gallery and annotation core.
//!
//! The shell (menu bar app, overlays, editor window) sits on top of this crate
//! and drives it through [`AppContext`]:
//!
//! 1. [`init_logging`] then [`AppContext::start`] once at process start. This
//!    loads the config, opens the storage folder and sets up the hotkey state.
//! 2. On a hotkey press the shell asks [`HotkeyManager::should_fire`] and, if
//!    it may, runs a [`SelectionSession`] from [`AppContext::selection_session`].
//! 3. The gallery follows [`Catalog::subscribe`]; thumbnails arrive on the
//!    receiver returned from `start`.
//! 4. After a `CaptureOutcome::Saved`, the shell plays the sound and shows
//!    the notification as [`AppContext::capture_feedback`] says.
//! 5. [`AppContext::shutdown`] at quit persists the config.

pub mod annotation;
pub mod capture;
pub mod catalog;
pub mod clipboard;
pub mod config;
pub mod editor;
pub mod history;
pub mod hotkey;
pub mod platform;
pub mod selection;
pub mod thumbnail;
pub mod transform;
pub mod types;

use std::path::PathBuf;
use std::sync::Arc;

use log::{info, warn};
use tokio::runtime::Handle;
use tokio::sync::mpsc;

pub use annotation::{Annotation, Color, Fonts};
pub use capture::{CaptureBackend, CaptureEngine, CaptureError, CapturePipeline, PipelineError};
pub use catalog::{Catalog, CatalogOptions, Screenshot, ScreenshotId, StorageError};
pub use clipboard::{ImageClipboard, SystemClipboard};
pub use config::{AppConfig, CaptureFeedback};
pub use editor::{EditorError, EditorSession, ToolType};
pub use hotkey::{HotkeyControl, HotkeyManager, KeyCombo};
pub use selection::{CaptureOutcome, DragOutcome, OverlayHost, SelectionSession, SessionState};
pub use thumbnail::{ThumbnailReady, ThumbnailWorker};
pub use types::{CaptureRequest, Display, DisplayId, ImageFormat, Point, Rect, Size};

#[cfg(feature = "native-capture")]
pub use capture::XcapBackend;

/// Installs the `env_logger` backend, `info` unless `RUST_LOG` says otherwise.
/// Safe to call more than once.
pub fn init_logging() {
    let env = env_logger::Env::default().default_filter_or("info");
    let _ = env_logger::Builder::from_env(env).try_init();
}

/// Process-wide state, created once at startup and passed to whatever needs it.
pub struct AppContext<B> {
    pub config: AppConfig,
    pub config_path: PathBuf,
    pub hotkeys: Arc<HotkeyManager>,
    pub catalog: Catalog,
    pub pipeline: Arc<CapturePipeline<B>>,
    pub thumbnails: ThumbnailWorker,
}

impl<B: CaptureBackend> AppContext<B> {
    /// Starts from the user's config file.
    pub fn start(backend: B) -> Result<(Self, mpsc::UnboundedReceiver<ThumbnailReady>), StorageError> {
        let config_path = config::get_config_path();
        let config = config::load_config_from(&config_path);
        Self::start_with(config, config_path, backend)
    }

    pub fn start_with(
        config: AppConfig,
        config_path: PathBuf,
        backend: B,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ThumbnailReady>), StorageError> {
        let clipboard: Option<Arc<dyn ImageClipboard>> =
            config.copy_to_clipboard.then(|| Arc::new(SystemClipboard) as Arc<dyn ImageClipboard>);
        Self::start_with_clipboard(config, config_path, backend, clipboard)
    }

    /// As [`AppContext::start_with`], with an explicit clipboard (or none)
    /// for captures instead of the one the config selects.
    pub fn start_with_clipboard(
        config: AppConfig,
        config_path: PathBuf,
        backend: B,
        clipboard: Option<Arc<dyn ImageClipboard>>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ThumbnailReady>), StorageError> {
        let catalog = Catalog::open(
            config.storage_dir(),
            CatalogOptions {
                format: config.image_format,
                delete_to_trash: config.delete_to_trash,
            },
        )?;
        let mut pipeline = CapturePipeline::new(CaptureEngine::new(backend), catalog.clone());
        if let Some(clipboard) = clipboard {
            pipeline = pipeline.with_clipboard(clipboard);
        }
        let pipeline = Arc::new(pipeline);
        let hotkeys = Arc::new(HotkeyManager::new(&config, config_path.clone()));
        let (thumbnails, thumbnail_rx) = ThumbnailWorker::new();

        info!("[app] Started, config at {:?}", config_path);
        Ok((
            Self {
                config,
                config_path,
                hotkeys,
                catalog,
                pipeline,
                thumbnails,
            },
            thumbnail_rx,
        ))
    }

    /// A fresh capture session wired to this context's pipeline and hotkey.
    pub fn selection_session<H, A>(&self, host: H, access: A, runtime: Handle) -> SelectionSession<B, H, A>
    where
        H: OverlayHost,
        A: platform::ScreenAccess,
    {
        SelectionSession::new(
            Arc::clone(&self.pipeline),
            Arc::clone(&self.hotkeys) as Arc<dyn HotkeyControl>,
            host,
            access,
            runtime,
        )
    }

    /// Sound and notification preferences for the shell to apply after a
    /// capture is saved.
    pub fn capture_feedback(&self) -> CaptureFeedback {
        self.config.capture_feedback()
    }

    /// Rescans the storage folder and queues a thumbnail for every entry.
    pub async fn refresh_gallery(&self) -> Result<Vec<Screenshot>, StorageError> {
        let screenshots = self.catalog.load_all().await?;
        for screenshot in &screenshots {
            self.thumbnails.request(screenshot);
        }
        Ok(screenshots)
    }

    pub async fn open_editor(&self, screenshot: Screenshot) -> Result<EditorSession, EditorError> {
        EditorSession::open(&self.catalog, screenshot, Fonts::system()).await
    }

    /// Persists the config, with whatever hotkey is current. The hotkey is left
    /// un-paused for the next start.
    pub fn shutdown(self) {
        let mut config = self.config;
        let combo = self.hotkeys.shortcut();
        if combo == KeyCombo::default() {
            config.hotkey_key_code = None;
            config.hotkey_modifiers = None;
        } else {
            config.hotkey_key_code = Some(combo.key_code);
            config.hotkey_modifiers = Some(combo.modifiers);
        }
        if let Err(e) = config::save_config_to(&config, &self.config_path) {
            warn!("[app] Failed to save config on shutdown: {}", e);
        }
        self.hotkeys.resume();
        info!("[app] Shut down");
    }
}

#[cfg(feature = "native-capture")]
impl AppContext<XcapBackend> {
    pub fn start_native() -> Result<(Self, mpsc::UnboundedReceiver<ThumbnailReady>), StorageError> {
        Self::start(XcapBackend)
    }
}
