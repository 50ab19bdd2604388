//! Keystroke injection into the focused chat window.
//!
//! The driver only talks to the `Injector` trait; the production
//! implementation wraps enigo. Tests substitute a recording fake.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum InjectError {
    /// The pointer is parked in a screen corner: the operator wants the
    /// automation stopped for the current prompt.
    #[error("fail-safe triggered: pointer is in a screen corner")]
    FailSafe,
    #[error("input backend error: {0}")]
    Backend(String),
}

/// Keys the driver presses outside of plain text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlKey {
    Enter,
}

/// Boundary to the OS-level keyboard.
pub trait Injector {
    /// Type `text` one character at a time, pausing `interval` between
    /// keystrokes so the target UI keeps up.
    fn type_text(&mut self, text: &str, interval: Duration) -> Result<(), InjectError>;

    fn press(&mut self, key: ControlKey) -> Result<(), InjectError>;
}

/// Production injector backed by enigo.
///
/// Before every keystroke the pointer position is checked against the screen
/// corners; a corner hit aborts with `InjectError::FailSafe`.
pub struct EnigoInjector {
    enigo: enigo::Enigo,
    corner_margin: i32,
}

impl EnigoInjector {
    pub fn new() -> Result<Self, InjectError> {
        let enigo = enigo::Enigo::new(&enigo::Settings::default())
            .map_err(|e| InjectError::Backend(e.to_string()))?;
        Ok(Self {
            enigo,
            corner_margin: 4,
        })
    }

    fn check_fail_safe(&self) -> Result<(), InjectError> {
        use enigo::Mouse;

        let (x, y) = self
            .enigo
            .location()
            .map_err(|e| InjectError::Backend(e.to_string()))?;
        let (w, h) = self
            .enigo
            .main_display()
            .map_err(|e| InjectError::Backend(e.to_string()))?;

        let m = self.corner_margin;
        let near_x = x <= m || x >= w.saturating_sub(1) - m;
        let near_y = y <= m || y >= h.saturating_sub(1) - m;
        if near_x && near_y {
            return Err(InjectError::FailSafe);
        }
        Ok(())
    }
}

impl Injector for EnigoInjector {
    fn type_text(&mut self, text: &str, interval: Duration) -> Result<(), InjectError> {
        use enigo::Keyboard;

        let mut buf = [0u8; 4];
        for ch in text.chars() {
            self.check_fail_safe()?;
            self.enigo
                .text(ch.encode_utf8(&mut buf))
                .map_err(|e| InjectError::Backend(e.to_string()))?;
            std::thread::sleep(interval);
        }
        Ok(())
    }

    fn press(&mut self, key: ControlKey) -> Result<(), InjectError> {
        use enigo::{Direction, Key, Keyboard};

        self.check_fail_safe()?;
        let key = match key {
            ControlKey::Enter => Key::Return,
        };
        self.enigo
            .key(key, Direction::Click)
            .map_err(|e| InjectError::Backend(e.to_string()))
    }
}
