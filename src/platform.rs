//! Thin OS glue: screen-capture permission, the settings deep link and the
//! pointer position.

use crate::types::Point;

pub const SCREEN_CAPTURE_SETTINGS_URL: &str =
    "x-apple.systempreferences:com.apple.preference.security?Privacy_ScreenCapture";

/// Capability gate consulted before a capture session starts.
pub trait ScreenAccess {
    /// Whether the process may read screen content. Errors count as `false`.
    fn can_capture(&self) -> bool;

    /// Fire-and-forget request, typically opening the settings pane.
    fn request_access(&self);
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemScreenAccess;

impl ScreenAccess for SystemScreenAccess {
    fn can_capture(&self) -> bool {
        has_screen_capture_access()
    }

    fn request_access(&self) {
        open_screen_recording_settings();
    }
}

#[cfg(target_os = "macos")]
pub fn has_screen_capture_access() -> bool {
    use core_graphics::access::ScreenCaptureAccess;

    ScreenCaptureAccess.preflight()
}

#[cfg(not(target_os = "macos"))]
pub fn has_screen_capture_access() -> bool {
    true
}

/// Opens the Screen Recording privacy pane.
#[cfg(target_os = "macos")]
pub fn open_screen_recording_settings() {
    use cocoa::base::{id, nil};
    use cocoa::foundation::NSString;
    use objc::{class, msg_send, sel, sel_impl};

    unsafe {
        let url_str = NSString::alloc(nil).init_str(SCREEN_CAPTURE_SETTINGS_URL);
        let url: id = msg_send![class!(NSURL), URLWithString: url_str];
        if url == nil {
            log::warn!("[platform] Invalid settings URL");
            return;
        }
        let workspace: id = msg_send![class!(NSWorkspace), sharedWorkspace];
        let opened: objc::runtime::BOOL = msg_send![workspace, openURL: url];
        if opened == objc::runtime::NO {
            log::warn!("[platform] Could not open Screen Recording settings");
        }
    }
}

#[cfg(not(target_os = "macos"))]
pub fn open_screen_recording_settings() {
    log::info!("[platform] No screen recording settings pane on this platform");
}

/// Pointer position in global space (bottom-left origin). The OS reports it
/// top-left relative to the primary display, hence `primary_height`.
#[cfg(feature = "native-capture")]
pub fn pointer_location(primary_height: f64) -> Option<Point> {
    use mouse_position::mouse_position::Mouse;

    match Mouse::get_mouse_position() {
        Mouse::Position { x, y } => Some(Point::new(x as f64, primary_height - y as f64)),
        Mouse::Error => None,
    }
}

#[cfg(not(feature = "native-capture"))]
pub fn pointer_location(_primary_height: f64) -> Option<Point> {
    None
}
