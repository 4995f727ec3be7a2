//! Input sink used by the CLI.

use tracing::info;
use wizhook_core::Result;
use wizhook_core::combat::{InputEvent, InputSink};

/// Logs each event with the window's center point.
///
/// Delivering input to the client window is left to an external injector;
/// this sink shows what would be sent.
pub struct LoggingInput {
    pid: u32,
}

impl LoggingInput {
    pub fn new(pid: u32) -> Self {
        Self { pid }
    }
}

impl InputSink for LoggingInput {
    fn post(&self, event: InputEvent) -> Result<()> {
        match event {
            InputEvent::Click(window) => {
                let (x, y) = window.rect.center();
                info!("PID {}: click {:#x} at ({}, {})", self.pid, window.address, x, y);
            }
            InputEvent::RightClick(window) => {
                let (x, y) = window.rect.center();
                info!("PID {}: right click {:#x} at ({}, {})", self.pid, window.address, x, y);
            }
            InputEvent::Hover(window) => {
                let (x, y) = window.rect.center();
                info!("PID {}: hover {:#x} at ({}, {})", self.pid, window.address, x, y);
            }
            InputEvent::Button(button) => info!("PID {}: press {}", self.pid, button),
        }
        Ok(())
    }
}
