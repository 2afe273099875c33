//! Interactive capture session.
//!
//! One overlay per display, a toolbar on the display under the pointer, and a
//! drag-to-select gesture that ends in a capture. The session lives on the UI
//! context; the capture itself runs as a tokio task that waits out
//! [`PRE_CAPTURE_DELAY`] (cancellable) so the overlays are gone from screen
//! before pixels are read.
//!
//! The capture hotkey is paused for the whole session and restored exactly
//! once, whichever way the session ends.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::capture::{CaptureBackend, CaptureError, CapturePipeline, PipelineError};
use crate::catalog::Screenshot;
use crate::hotkey::{HotkeyControl, KEY_ESCAPE};
use crate::platform::ScreenAccess;
use crate::transform::display_at;
use crate::types::{CaptureRequest, Display, DisplayId, Point, Rect, MIN_SELECTION_SIZE};

pub const PRE_CAPTURE_DELAY: Duration = Duration::from_millis(200);

const LABEL_GAP: f64 = 5.0;
const LABEL_TOP_MARGIN: f64 = 10.0;
const LABEL_HEIGHT: f64 = 16.0;
const LABEL_CHAR_WIDTH: f64 = 7.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    /// Overlays are up; selection may or may not be enabled yet.
    Active,
    /// A drag is in progress.
    Selecting,
    Completing,
    /// Dismissed while a capture task was still winding down.
    Cancelled,
}

/// What the overlay under a drag should draw, in overlay-local coordinates.
#[derive(Clone, Debug, PartialEq)]
pub struct SelectionPaint {
    pub rect: Rect,
    /// `"W × H"` in whole points.
    pub label: String,
    /// Bottom-left corner of the label.
    pub label_origin: Point,
}

impl SelectionPaint {
    pub fn new(rect: Rect, bounds: &Rect) -> Self {
        let label = format!("{} × {}", rect.width() as i64, rect.height() as i64);
        let label_width = (label.chars().count() + 2) as f64 * LABEL_CHAR_WIDTH;

        let mut label_origin = Point::new(rect.mid_x() - label_width / 2.0, rect.max_y() + LABEL_GAP);
        if label_origin.y + LABEL_HEIGHT > bounds.max_y() - LABEL_TOP_MARGIN {
            label_origin.y = rect.y() - LABEL_HEIGHT - LABEL_GAP;
        }
        Self {
            rect,
            label,
            label_origin,
        }
    }
}

/// Transient surfaces owned by the shell. All calls arrive on the UI context.
pub trait OverlayHost {
    /// Full-screen, click-capturing overlay covering `display`, at the shared
    /// elevated layer.
    fn show_overlay(&mut self, display: &Display);
    fn set_selection_enabled(&mut self, display: DisplayId, enabled: bool);
    fn focus_overlay(&mut self, display: DisplayId);
    fn show_toolbar(&mut self, display: &Display);
    fn hide_toolbar(&mut self);
    fn paint_selection(&mut self, display: DisplayId, paint: Option<&SelectionPaint>);
    /// Removes every overlay and the toolbar.
    fn close_all(&mut self);
    /// Pointer in global space.
    fn pointer_location(&self) -> Option<Point>;
}

#[derive(Debug)]
pub enum CaptureOutcome {
    Saved(Screenshot),
    Failed(PipelineError),
    Cancelled,
}

#[derive(Clone, Debug, PartialEq)]
pub enum DragOutcome {
    /// No drag was in progress on that overlay.
    NotSelecting,
    /// Too small to be a selection; the session stays active.
    Ignored,
    Capturing(CaptureRequest),
}

/// Pause on the capture hotkey, released at most once.
struct HotkeyLease {
    hotkey: Arc<dyn HotkeyControl>,
    released: AtomicBool,
}

impl HotkeyLease {
    fn acquire(hotkey: Arc<dyn HotkeyControl>) -> Arc<Self> {
        hotkey.pause();
        Arc::new(Self {
            hotkey,
            released: AtomicBool::new(false),
        })
    }

    fn release(&self) {
        if !self.released.swap(true, Ordering::SeqCst) {
            self.hotkey.resume();
        }
    }
}

impl Drop for HotkeyLease {
    fn drop(&mut self) {
        self.release();
    }
}

/// Releases the lease when the capture task ends, however it ends.
struct ReleaseOnDrop(Arc<HotkeyLease>);

impl Drop for ReleaseOnDrop {
    fn drop(&mut self) {
        self.0.release();
    }
}

struct Overlay {
    display: Display,
    selection_enabled: bool,
    anchor: Option<Point>,
    current: Rect,
}

struct PendingCapture {
    cancel: CancellationToken,
    outcome: oneshot::Receiver<CaptureOutcome>,
}

pub struct SelectionSession<B, H, A> {
    state: SessionState,
    host: H,
    access: A,
    pipeline: Arc<CapturePipeline<B>>,
    hotkey: Arc<dyn HotkeyControl>,
    runtime: Handle,
    overlays: Vec<Overlay>,
    toolbar_shown: bool,
    lease: Option<Arc<HotkeyLease>>,
    pending: Option<PendingCapture>,
}

impl<B, H, A> SelectionSession<B, H, A>
where
    B: CaptureBackend,
    H: OverlayHost,
    A: ScreenAccess,
{
    pub fn new(
        pipeline: Arc<CapturePipeline<B>>,
        hotkey: Arc<dyn HotkeyControl>,
        host: H,
        access: A,
        runtime: Handle,
    ) -> Self {
        Self {
            state: SessionState::Idle,
            host,
            access,
            pipeline,
            hotkey,
            runtime,
            overlays: Vec::new(),
            toolbar_shown: false,
            lease: None,
            pending: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    /// Shows overlays on every display. A no-op while a session is running;
    /// without screen access it requests it and stays idle.
    pub fn activate(&mut self) -> bool {
        self.poll();
        if self.state != SessionState::Idle {
            debug!("[session] Already active, ignoring activation");
            return false;
        }

        if !self.access.can_capture() {
            info!("[session] Screen capture not permitted, requesting access");
            self.access.request_access();
            return false;
        }

        let displays = match self.pipeline.engine().enumerate_displays() {
            Ok(displays) => displays,
            Err(e) => {
                error!("[session] Cannot start capture session: {}", e);
                return false;
            }
        };

        self.lease = Some(HotkeyLease::acquire(Arc::clone(&self.hotkey)));

        for display in &displays {
            self.host.show_overlay(display);
            self.overlays.push(Overlay {
                display: display.clone(),
                selection_enabled: false,
                anchor: None,
                current: Rect::default(),
            });
        }

        let toolbar_display = self
            .pointer_display(&displays)
            .or_else(|| displays.iter().find(|d| d.is_primary))
            .or_else(|| displays.first());
        if let Some(display) = toolbar_display {
            self.host.show_toolbar(display);
            self.toolbar_shown = true;
        }

        self.state = SessionState::Active;
        info!("[session] Activated on {} display(s)", displays.len());
        true
    }

    /// Switches from the toolbar to drag selection. The overlay under the
    /// pointer takes focus; the others stay as backdrops.
    pub fn select_rectangle_mode(&mut self) {
        if self.state != SessionState::Active {
            return;
        }
        if self.toolbar_shown {
            self.host.hide_toolbar();
            self.toolbar_shown = false;
        }
        for overlay in &mut self.overlays {
            overlay.selection_enabled = true;
            self.host.set_selection_enabled(overlay.display.id, true);
        }

        let displays: Vec<Display> = self.overlays.iter().map(|o| o.display.clone()).collect();
        let focus = self
            .pointer_display(&displays)
            .or_else(|| displays.first())
            .map(|d| d.id);
        if let Some(id) = focus {
            self.host.focus_overlay(id);
        }
    }

    pub fn mouse_down(&mut self, display: DisplayId, local: Point) {
        if self.state != SessionState::Active {
            return;
        }
        let Some(overlay) = self.overlays.iter_mut().find(|o| o.display.id == display) else {
            return;
        };
        if !overlay.selection_enabled {
            return;
        }
        overlay.anchor = Some(local);
        overlay.current = Rect::from_corners(local, local);
        self.state = SessionState::Selecting;
    }

    pub fn mouse_dragged(&mut self, display: DisplayId, local: Point) {
        if self.state != SessionState::Selecting {
            return;
        }
        let Some(overlay) = self.overlays.iter_mut().find(|o| o.display.id == display) else {
            return;
        };
        let Some(anchor) = overlay.anchor else {
            return;
        };
        overlay.current = Rect::from_corners(anchor, local);
        let bounds = Rect {
            origin: Point::default(),
            size: overlay.display.frame.size,
        };
        let paint = SelectionPaint::new(overlay.current, &bounds);
        self.host.paint_selection(display, Some(&paint));
    }

    /// Ends the drag. Selections of 5 points or less in either dimension are
    /// ignored and the session stays active.
    ///
    /// The drag belongs to the overlay that saw the press, so a release
    /// reported by another overlay still ends it.
    pub fn mouse_up(&mut self, display: DisplayId) -> DragOutcome {
        if self.state != SessionState::Selecting {
            return DragOutcome::NotSelecting;
        }
        let Some(overlay) = self.overlays.iter_mut().find(|o| o.anchor.is_some()) else {
            self.state = SessionState::Active;
            return DragOutcome::NotSelecting;
        };
        if overlay.display.id != display {
            debug!(
                "[session] Release on display {} ends drag started on {}",
                display, overlay.display.id
            );
        }
        overlay.anchor = None;
        let local = std::mem::take(&mut overlay.current);
        let global = local.offset(overlay.display.frame.origin);
        let display_id = overlay.display.id;

        match CaptureRequest::region(global, display_id) {
            Some(request) => {
                self.begin_capture(request.clone());
                DragOutcome::Capturing(request)
            }
            None => {
                debug!(
                    "[session] Selection {}x{} below {} points, ignored",
                    local.width(),
                    local.height(),
                    MIN_SELECTION_SIZE
                );
                self.host.paint_selection(display_id, None);
                self.state = SessionState::Active;
                DragOutcome::Ignored
            }
        }
    }

    /// Toolbar action: capture the primary display without a drag.
    pub fn capture_full_screen(&mut self) -> bool {
        if !matches!(self.state, SessionState::Active | SessionState::Selecting) {
            return false;
        }
        self.begin_capture(CaptureRequest::FullScreen(None));
        true
    }

    /// Escape on any overlay or the toolbar dismisses the session.
    pub fn key_down(&mut self, key_code: u32) {
        if key_code == KEY_ESCAPE && matches!(self.state, SessionState::Active | SessionState::Selecting) {
            self.dismiss();
        }
    }

    /// Tears everything down and cancels a capture still waiting out its delay.
    pub fn dismiss(&mut self) {
        if self.state == SessionState::Idle {
            return;
        }
        info!("[session] Dismissed");
        self.teardown_surfaces();
        self.release_hotkey();
        match &self.pending {
            Some(pending) => {
                pending.cancel.cancel();
                self.state = SessionState::Cancelled;
            }
            None => self.state = SessionState::Idle,
        }
    }

    /// Collects a finished capture, returning the session to idle.
    pub fn poll(&mut self) -> Option<CaptureOutcome> {
        let pending = self.pending.as_mut()?;
        let outcome = match pending.outcome.try_recv() {
            Ok(outcome) => outcome,
            Err(oneshot::error::TryRecvError::Empty) => return None,
            Err(oneshot::error::TryRecvError::Closed) => lost_task(),
        };
        self.finish();
        Some(outcome)
    }

    /// Waits for the running capture, if any.
    pub async fn wait(&mut self) -> Option<CaptureOutcome> {
        let pending = self.pending.as_mut()?;
        let outcome = (&mut pending.outcome).await.unwrap_or_else(|_| lost_task());
        self.finish();
        Some(outcome)
    }

    fn begin_capture(&mut self, request: CaptureRequest) {
        self.teardown_surfaces();
        self.state = SessionState::Completing;

        let lease = match &self.lease {
            Some(lease) => Arc::clone(lease),
            None => HotkeyLease::acquire(Arc::clone(&self.hotkey)),
        };
        self.lease = Some(Arc::clone(&lease));

        let cancel = CancellationToken::new();
        let (tx, rx) = oneshot::channel();
        self.pending = Some(PendingCapture {
            cancel: cancel.clone(),
            outcome: rx,
        });

        let pipeline = Arc::clone(&self.pipeline);
        self.runtime.spawn(async move {
            let _release = ReleaseOnDrop(lease);

            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("[session] Capture cancelled before it started");
                    let _ = tx.send(CaptureOutcome::Cancelled);
                    return;
                }
                _ = tokio::time::sleep(PRE_CAPTURE_DELAY) => {}
            }

            let outcome = match pipeline.run(request).await {
                Ok(screenshot) => CaptureOutcome::Saved(screenshot),
                Err(e) => {
                    // Hotkey-driven: log and carry on without a screenshot.
                    error!("[session] Capture failed: {}", e);
                    CaptureOutcome::Failed(e)
                }
            };
            let _ = tx.send(outcome);
        });
    }

    fn finish(&mut self) {
        self.pending = None;
        self.teardown_surfaces();
        self.release_hotkey();
        self.state = SessionState::Idle;
    }

    fn teardown_surfaces(&mut self) {
        if self.overlays.is_empty() && !self.toolbar_shown {
            return;
        }
        self.host.close_all();
        self.overlays.clear();
        self.toolbar_shown = false;
    }

    fn release_hotkey(&mut self) {
        if let Some(lease) = self.lease.take() {
            lease.release();
        }
    }

    fn pointer_display<'d>(&self, displays: &'d [Display]) -> Option<&'d Display> {
        let pointer = self.host.pointer_location()?;
        display_at(displays, pointer)
    }
}

impl<B, H, A> Drop for SelectionSession<B, H, A> {
    fn drop(&mut self) {
        if let Some(pending) = &self.pending {
            pending.cancel.cancel();
        }
        if self.lease.is_some() {
            warn!("[session] Dropped while active");
        }
    }
}

fn lost_task() -> CaptureOutcome {
    CaptureOutcome::Failed(PipelineError::Capture(CaptureError::CaptureFailed(
        "capture task ended without a result".into(),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::tests::{gradient_pixel, retina_and_external, FakeBackend};
    use crate::capture::CaptureEngine;
    use crate::catalog::{Catalog, CatalogOptions};
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    #[derive(Default)]
    struct CountingHotkey {
        pauses: AtomicUsize,
        resumes: AtomicUsize,
    }

    impl HotkeyControl for CountingHotkey {
        fn pause(&self) {
            self.pauses.fetch_add(1, Ordering::SeqCst);
        }

        fn resume(&self) {
            self.resumes.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl CountingHotkey {
        fn counts(&self) -> (usize, usize) {
            (self.pauses.load(Ordering::SeqCst), self.resumes.load(Ordering::SeqCst))
        }
    }

    #[derive(Default)]
    struct RecordingHost {
        overlays: Vec<DisplayId>,
        toolbar: Option<DisplayId>,
        focused: Option<DisplayId>,
        enabled: Vec<DisplayId>,
        painted: Vec<(DisplayId, Option<SelectionPaint>)>,
        close_calls: usize,
        pointer: Option<Point>,
    }

    impl OverlayHost for RecordingHost {
        fn show_overlay(&mut self, display: &Display) {
            self.overlays.push(display.id);
        }

        fn set_selection_enabled(&mut self, display: DisplayId, enabled: bool) {
            if enabled {
                self.enabled.push(display);
            }
        }

        fn focus_overlay(&mut self, display: DisplayId) {
            self.focused = Some(display);
        }

        fn show_toolbar(&mut self, display: &Display) {
            self.toolbar = Some(display.id);
        }

        fn hide_toolbar(&mut self) {
            self.toolbar = None;
        }

        fn paint_selection(&mut self, display: DisplayId, paint: Option<&SelectionPaint>) {
            self.painted.push((display, paint.cloned()));
        }

        fn close_all(&mut self) {
            self.overlays.clear();
            self.toolbar = None;
            self.close_calls += 1;
        }

        fn pointer_location(&self) -> Option<Point> {
            self.pointer
        }
    }

    struct Access {
        granted: bool,
        requests: Mutex<usize>,
    }

    impl ScreenAccess for Access {
        fn can_capture(&self) -> bool {
            self.granted
        }

        fn request_access(&self) {
            *self.requests.lock().unwrap() += 1;
        }
    }

    type TestSession = SelectionSession<FakeBackend, RecordingHost, Access>;

    struct Fixture {
        session: TestSession,
        hotkey: Arc<CountingHotkey>,
        catalog: Catalog,
        _dir: tempfile::TempDir,
    }

    fn fixture(granted: bool, pointer: Option<Point>) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Catalog::open(
            dir.path(),
            CatalogOptions {
                delete_to_trash: false,
                ..CatalogOptions::default()
            },
        )
        .unwrap();
        let engine = CaptureEngine::new(FakeBackend::new(retina_and_external()));
        let pipeline = Arc::new(CapturePipeline::new(engine, catalog.clone()));
        let hotkey = Arc::new(CountingHotkey::default());
        let host = RecordingHost {
            pointer,
            ..RecordingHost::default()
        };
        let access = Access {
            granted,
            requests: Mutex::new(0),
        };
        let session = SelectionSession::new(
            pipeline,
            hotkey.clone() as Arc<dyn HotkeyControl>,
            host,
            access,
            Handle::current(),
        );
        Fixture {
            session,
            hotkey,
            catalog,
            _dir: dir,
        }
    }

    #[tokio::test]
    async fn activation_without_permission_requests_it() {
        let mut f = fixture(false, None);
        assert!(!f.session.activate());
        assert_eq!(f.session.state(), SessionState::Idle);
        assert_eq!(*f.session.access.requests.lock().unwrap(), 1);
        assert!(f.session.host().overlays.is_empty());
        assert_eq!(f.hotkey.counts(), (0, 0));
    }

    #[tokio::test]
    async fn activation_covers_every_display_once() {
        let mut f = fixture(true, Some(Point::new(150.0, 0.0)));
        assert!(f.session.activate());
        assert_eq!(f.session.state(), SessionState::Active);
        assert_eq!(f.session.host().overlays, vec![DisplayId(1), DisplayId(7)]);
        assert_eq!(f.session.host().toolbar, Some(DisplayId(7)));
        assert_eq!(f.hotkey.counts(), (1, 0));

        // Re-entrant activation is ignored.
        assert!(!f.session.activate());
        assert_eq!(f.session.host().overlays.len(), 2);
        assert_eq!(f.hotkey.counts(), (1, 0));
    }

    #[tokio::test]
    async fn toolbar_falls_back_to_primary() {
        let mut f = fixture(true, None);
        f.session.activate();
        assert_eq!(f.session.host().toolbar, Some(DisplayId(1)));
    }

    #[tokio::test]
    async fn drags_ignored_before_rectangle_mode() {
        let mut f = fixture(true, None);
        f.session.activate();
        f.session.mouse_down(DisplayId(1), Point::new(10.0, 10.0));
        assert_eq!(f.session.state(), SessionState::Active);
        assert_eq!(f.session.mouse_up(DisplayId(1)), DragOutcome::NotSelecting);
    }

    #[tokio::test]
    async fn rectangle_mode_focuses_overlay_under_pointer() {
        let mut f = fixture(true, Some(Point::new(120.0, 10.0)));
        f.session.activate();
        f.session.select_rectangle_mode();
        let host = f.session.host();
        assert_eq!(host.toolbar, None);
        assert_eq!(host.enabled, vec![DisplayId(1), DisplayId(7)]);
        assert_eq!(host.focused, Some(DisplayId(7)));
    }

    #[tokio::test]
    async fn small_drag_is_a_no_op_not_a_failure() {
        let mut f = fixture(true, None);
        f.session.activate();
        f.session.select_rectangle_mode();
        f.session.mouse_down(DisplayId(1), Point::new(100.0, 100.0));
        f.session.mouse_dragged(DisplayId(1), Point::new(103.0, 104.0));
        assert_eq!(f.session.mouse_up(DisplayId(1)), DragOutcome::Ignored);
        assert_eq!(f.session.state(), SessionState::Active);
        assert!(f.session.poll().is_none());
        assert_eq!(f.hotkey.counts(), (1, 0));
        assert!(f.catalog.snapshot().is_empty());
    }

    #[tokio::test]
    async fn drag_paints_live_rect_with_label() {
        let mut f = fixture(true, None);
        f.session.activate();
        f.session.select_rectangle_mode();
        f.session.mouse_down(DisplayId(1), Point::new(40.0, 30.0));
        f.session.mouse_dragged(DisplayId(1), Point::new(10.0, 10.0));
        assert_eq!(f.session.state(), SessionState::Selecting);
        let (display, paint) = f.session.host().painted.last().unwrap().clone();
        let paint = paint.unwrap();
        assert_eq!(display, DisplayId(1));
        assert_eq!(paint.rect, Rect::new(10.0, 10.0, 30.0, 20.0));
        assert_eq!(paint.label, "30 × 20");
        // Rect top at 30, label would end at 51 > 60 - 10, so it goes below.
        assert_eq!(paint.label_origin.y, 10.0 - LABEL_HEIGHT - LABEL_GAP);
    }

    #[test]
    fn label_sits_above_when_there_is_room() {
        let bounds = Rect::new(0.0, 0.0, 800.0, 600.0);
        let paint = SelectionPaint::new(Rect::new(100.0, 100.0, 200.0, 50.0), &bounds);
        assert_eq!(paint.label_origin.y, 155.0);
        assert_eq!(paint.label, "200 × 50");
    }

    #[tokio::test]
    async fn completed_drag_captures_in_global_space() {
        let mut f = fixture(true, None);
        f.session.activate();
        f.session.select_rectangle_mode();
        f.session.mouse_down(DisplayId(7), Point::new(10.0, 10.0));
        f.session.mouse_dragged(DisplayId(7), Point::new(40.0, 30.0));

        let outcome = f.session.mouse_up(DisplayId(7));
        assert_eq!(
            outcome,
            DragOutcome::Capturing(CaptureRequest::Region {
                rect: Rect::new(110.0, -10.0, 30.0, 20.0),
                display: DisplayId(7),
            })
        );
        assert_eq!(f.session.state(), SessionState::Completing);
        assert!(f.session.host().overlays.is_empty());
        // Still paused until the capture finishes.
        assert_eq!(f.hotkey.counts(), (1, 0));

        let Some(CaptureOutcome::Saved(shot)) = f.session.wait().await else {
            panic!("capture did not complete");
        };
        assert_eq!(f.session.state(), SessionState::Idle);
        assert_eq!(f.hotkey.counts(), (1, 1));

        let image = f.catalog.load_image(&shot).await.unwrap();
        assert_eq!(image.dimensions(), (30, 20));
        assert_eq!(*image.get_pixel(0, 0), gradient_pixel(10, 20));
        assert_eq!(f.catalog.snapshot()[0].id, shot.id);
    }

    #[tokio::test]
    async fn release_on_another_display_ends_the_drag() {
        let mut f = fixture(true, None);
        f.session.activate();
        f.session.select_rectangle_mode();

        f.session.mouse_down(DisplayId(1), Point::new(10.0, 10.0));
        f.session.mouse_dragged(DisplayId(1), Point::new(12.0, 12.0));
        assert_eq!(f.session.mouse_up(DisplayId(7)), DragOutcome::Ignored);
        assert_eq!(f.session.state(), SessionState::Active);

        // The next drag is accepted and captured on the display it started on.
        f.session.mouse_down(DisplayId(1), Point::new(10.0, 10.0));
        f.session.mouse_dragged(DisplayId(1), Point::new(40.0, 30.0));
        assert_eq!(
            f.session.mouse_up(DisplayId(7)),
            DragOutcome::Capturing(CaptureRequest::Region {
                rect: Rect::new(10.0, 10.0, 30.0, 20.0),
                display: DisplayId(1),
            })
        );
        assert!(matches!(f.session.wait().await, Some(CaptureOutcome::Saved(_))));
    }

    #[tokio::test]
    async fn toolbar_full_screen_uses_primary() {
        let mut f = fixture(true, None);
        f.session.activate();
        assert!(f.session.capture_full_screen());
        let Some(CaptureOutcome::Saved(shot)) = f.session.wait().await else {
            panic!("capture did not complete");
        };
        let image = f.catalog.load_image(&shot).await.unwrap();
        assert_eq!(image.dimensions(), (200, 120));
        assert_eq!(f.hotkey.counts(), (1, 1));
    }

    #[tokio::test]
    async fn escape_mid_drag_tears_down_and_resumes_once() {
        let mut f = fixture(true, None);
        f.session.activate();
        f.session.select_rectangle_mode();
        f.session.mouse_down(DisplayId(1), Point::new(10.0, 10.0));
        f.session.key_down(KEY_ESCAPE);

        assert_eq!(f.session.state(), SessionState::Idle);
        assert!(f.session.host().overlays.is_empty());
        assert_eq!(f.session.host().close_calls, 1);
        assert_eq!(f.hotkey.counts(), (1, 1));

        f.session.dismiss();
        f.session.dismiss();
        assert_eq!(f.session.host().close_calls, 1);
        assert_eq!(f.hotkey.counts(), (1, 1));

        // A fresh session can start afterwards.
        assert!(f.session.activate());
        assert_eq!(f.hotkey.counts(), (2, 1));
    }

    #[tokio::test]
    async fn other_keys_do_not_dismiss() {
        let mut f = fixture(true, None);
        f.session.activate();
        f.session.key_down(36);
        assert_eq!(f.session.state(), SessionState::Active);
    }

    #[tokio::test(start_paused = true)]
    async fn dismiss_during_delay_cancels_capture() {
        let mut f = fixture(true, None);
        f.session.activate();
        f.session.capture_full_screen();

        tokio::time::sleep(PRE_CAPTURE_DELAY / 2).await;
        f.session.dismiss();
        assert_eq!(f.session.state(), SessionState::Cancelled);
        assert_eq!(f.hotkey.counts(), (1, 1));

        assert!(matches!(f.session.wait().await, Some(CaptureOutcome::Cancelled)));
        assert_eq!(f.session.state(), SessionState::Idle);
        assert_eq!(f.hotkey.counts(), (1, 1));
        assert!(f.catalog.snapshot().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn capture_waits_for_overlays_to_clear() {
        let mut f = fixture(true, None);
        f.session.activate();
        f.session.capture_full_screen();

        tokio::time::sleep(PRE_CAPTURE_DELAY - Duration::from_millis(10)).await;
        assert!(f.session.poll().is_none());
        assert_eq!(f.session.state(), SessionState::Completing);
        assert!(matches!(f.session.wait().await, Some(CaptureOutcome::Saved(_))));
    }

    #[tokio::test]
    async fn capture_failure_is_reported_and_cleans_up() {
        let mut f = fixture(true, None);
        f.session.activate();
        f.session.select_rectangle_mode();
        // Displays vanish between activation and capture.
        f.session.pipeline.engine().layout_changed_to(vec![]);
        f.session.mouse_down(DisplayId(1), Point::new(10.0, 10.0));
        f.session.mouse_dragged(DisplayId(1), Point::new(50.0, 50.0));
        f.session.mouse_up(DisplayId(1));

        let outcome = f.session.wait().await;
        assert!(matches!(
            outcome,
            Some(CaptureOutcome::Failed(PipelineError::Capture(CaptureError::NoDisplayAvailable)))
        ));
        assert_eq!(f.session.state(), SessionState::Idle);
        assert_eq!(f.hotkey.counts(), (1, 1));
    }

    #[tokio::test]
    async fn dropping_an_active_session_restores_hotkey() {
        let mut f = fixture(true, None);
        f.session.activate();
        let hotkey = Arc::clone(&f.hotkey);
        drop(f);
        assert_eq!(hotkey.counts(), (1, 1));
    }
}
