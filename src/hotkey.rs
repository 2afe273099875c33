//! Capture hotkey: the key combination, its persistence, and the pause flag
//! that keeps it from re-entering an active capture session.
//!
//! OS-level registration lives in the shell; it asks [`HotkeyManager::should_fire`]
//! before acting on a key press.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use log::info;

use crate::config::{load_config_from, save_config_to, AppConfig, ConfigError};

/// Carbon modifier bits, as persisted.
pub const CMD_KEY: u32 = 0x0100;
pub const SHIFT_KEY: u32 = 0x0200;
pub const OPTION_KEY: u32 = 0x0800;
pub const CONTROL_KEY: u32 = 0x1000;

/// Carbon virtual key codes used by the crate itself.
pub const KEY_5: u32 = 23;
pub const KEY_ESCAPE: u32 = 53;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KeyCombo {
    pub key_code: u32,
    pub modifiers: u32,
}

impl Default for KeyCombo {
    /// Cmd+Shift+5
    fn default() -> Self {
        Self {
            key_code: KEY_5,
            modifiers: CMD_KEY | SHIFT_KEY,
        }
    }
}

impl KeyCombo {
    pub fn new(key_code: u32, modifiers: u32) -> Self {
        Self { key_code, modifiers }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        config
            .stored_hotkey()
            .map(|(key_code, modifiers)| Self::new(key_code, modifiers))
            .unwrap_or_default()
    }

    /// Glyphs in the conventional ⌃⌥⇧⌘ order followed by the key.
    pub fn display_string(&self) -> String {
        let mut out = String::new();
        for (bit, glyph) in [
            (CONTROL_KEY, '⌃'),
            (OPTION_KEY, '⌥'),
            (SHIFT_KEY, '⇧'),
            (CMD_KEY, '⌘'),
        ] {
            if self.modifiers & bit != 0 {
                out.push(glyph);
            }
        }
        match key_name(self.key_code) {
            Some(name) => out.push_str(name),
            None => out.push_str(&format!("#{}", self.key_code)),
        }
        out
    }
}

fn key_name(code: u32) -> Option<&'static str> {
    const NAMES: &[(u32, &str)] = &[
        (0, "A"), (1, "S"), (2, "D"), (3, "F"), (4, "H"), (5, "G"), (6, "Z"), (7, "X"),
        (8, "C"), (9, "V"), (11, "B"), (12, "Q"), (13, "W"), (14, "E"), (15, "R"),
        (16, "Y"), (17, "T"), (18, "1"), (19, "2"), (20, "3"), (21, "4"), (22, "6"),
        (23, "5"), (24, "="), (25, "9"), (26, "7"), (27, "-"), (28, "8"), (29, "0"),
        (30, "]"), (31, "O"), (32, "U"), (33, "["), (34, "I"), (35, "P"), (36, "↩"),
        (37, "L"), (38, "J"), (39, "'"), (40, "K"), (41, ";"), (42, "\\"), (43, ","),
        (44, "/"), (45, "N"), (46, "M"), (47, "."), (48, "⇥"), (49, "Space"), (50, "`"),
        (51, "⌫"), (53, "⎋"), (96, "F5"), (97, "F6"), (98, "F7"), (99, "F3"),
        (100, "F8"), (101, "F9"), (103, "F11"), (109, "F10"), (111, "F12"),
        (118, "F4"), (120, "F2"), (122, "F1"),
    ];
    NAMES.iter().find(|(c, _)| *c == code).map(|(_, name)| *name)
}

/// Suspends and restores the global capture hotkey.
pub trait HotkeyControl: Send + Sync {
    fn pause(&self);
    fn resume(&self);
}

pub struct HotkeyManager {
    combo: Mutex<KeyCombo>,
    paused: AtomicBool,
    config_path: PathBuf,
}

impl HotkeyManager {
    pub fn new(config: &AppConfig, config_path: PathBuf) -> Self {
        let combo = KeyCombo::from_config(config);
        info!("[hotkey] Capture hotkey is {}", combo.display_string());
        Self {
            combo: Mutex::new(combo),
            paused: AtomicBool::new(false),
            config_path,
        }
    }

    pub fn shortcut(&self) -> KeyCombo {
        *self.combo()
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// True when a press of `combo` should start a capture session.
    pub fn should_fire(&self, combo: KeyCombo) -> bool {
        !self.is_paused() && combo == self.shortcut()
    }

    /// Replaces the hotkey and persists both integers.
    pub fn update_shortcut(&self, combo: KeyCombo) -> Result<(), ConfigError> {
        let mut config = load_config_from(&self.config_path);
        config.hotkey_key_code = Some(combo.key_code);
        config.hotkey_modifiers = Some(combo.modifiers);
        save_config_to(&config, &self.config_path)?;
        *self.combo() = combo;
        info!("[hotkey] Capture hotkey changed to {}", combo.display_string());
        Ok(())
    }

    /// Back to Cmd+Shift+5; the persisted integers are cleared.
    pub fn reset_to_default(&self) -> Result<(), ConfigError> {
        let mut config = load_config_from(&self.config_path);
        config.hotkey_key_code = None;
        config.hotkey_modifiers = None;
        save_config_to(&config, &self.config_path)?;
        *self.combo() = KeyCombo::default();
        Ok(())
    }

    fn combo(&self) -> MutexGuard<'_, KeyCombo> {
        self.combo.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl HotkeyControl for HotkeyManager {
    fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
        log::debug!("[hotkey] Paused");
    }

    fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        log::debug!("[hotkey] Resumed");
    }
}
