//! Input the engine sends to the client.
//!
//! Actions are expressed as clicks on windows; how a click reaches the client
//! (window messages, the mouseless cursor, a log) is up to the `InputSink`.

use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use strum::{Display, IntoStaticStr};

use crate::error::{Error, Result};
use crate::graph::EntityRecord;

/// Window rectangle in client coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Rect {
    pub fn center(&self) -> (i32, i32) {
        (
            self.left + (self.right - self.left) / 2,
            self.top + (self.bottom - self.top) / 2,
        )
    }
}

/// A window the engine can click.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowRef {
    pub address: u64,
    pub rect: Rect,
}

impl WindowRef {
    pub fn from_record(window: &EntityRecord) -> Result<Self> {
        let coord = |name: &str| -> Result<i32> {
            let value = window.i64(name)?;
            i32::try_from(value)
                .map_err(|_| Error::InvalidLayout(format!("window {} out of range: {}", name, value)))
        };
        Ok(Self {
            address: window.address,
            rect: Rect {
                left: coord("rect_left")?,
                top: coord("rect_top")?,
                right: coord("rect_right")?,
                bottom: coord("rect_bottom")?,
            },
        })
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, IntoStaticStr,
)]
pub enum CombatButton {
    Pass,
    Flee,
    Draw,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InputEvent {
    Click(WindowRef),
    RightClick(WindowRef),
    Hover(WindowRef),
    /// A button whose window could not be located; the sink decides how to
    /// press it.
    Button(CombatButton),
}

pub trait InputSink: Send + Sync {
    fn post(&self, event: InputEvent) -> Result<()>;
}

/// Keeps every posted event.
#[derive(Debug, Default)]
pub struct RecordingInput {
    events: Mutex<Vec<InputEvent>>,
}

impl RecordingInput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<InputEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn clear(&self) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl InputSink for RecordingInput {
    fn post(&self, event: InputEvent) -> Result<()> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::memory::Value;

    #[test]
    fn test_rect_center() {
        let rect = Rect {
            left: 100,
            top: 40,
            right: 151,
            bottom: 80,
        };
        assert_eq!(rect.center(), (125, 60));
    }

    #[test]
    fn test_window_ref_from_record() {
        let fields = BTreeMap::from([
            ("rect_left".to_string(), Value::I32(10)),
            ("rect_top".to_string(), Value::I32(20)),
            ("rect_right".to_string(), Value::I32(30)),
            ("rect_bottom".to_string(), Value::I32(40)),
        ]);
        let record = EntityRecord {
            address: 0x5000,
            layout: "window".to_string(),
            fields,
        };
        let window = WindowRef::from_record(&record).unwrap();
        assert_eq!(window.address, 0x5000);
        assert_eq!(window.rect.center(), (20, 30));
    }

    #[test]
    fn test_recording_input() {
        let input = RecordingInput::new();
        input.post(InputEvent::Button(CombatButton::Pass)).unwrap();
        assert_eq!(input.events(), vec![InputEvent::Button(CombatButton::Pass)]);
        input.clear();
        assert!(input.events().is_empty());
    }
}
