//! Synthetic input through the XTEST extension
//!
//! Key, button and pointer events injected as if they came from a real
//! device, plus keyboard and modifier mapping changes.

use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::error::Result;
use crate::server::{DisplayServer, FakeInput, WindowId};

/// Input injection manager
#[derive(Clone)]
pub struct InputManager {
    server: Arc<dyn DisplayServer>,
}

impl InputManager {
    pub(crate) fn new(server: Arc<dyn DisplayServer>) -> Self {
        Self { server }
    }

    fn inject(&self, input: FakeInput) -> Result<()> {
        trace!("Injecting {:?}", input);
        self.server.fake_input(input)?;
        self.server.flush()?;
        Ok(())
    }

    pub fn key(&self, keycode: u8, pressed: bool) -> Result<()> {
        self.inject(FakeInput::Key { keycode, pressed })
    }

    /// Press or release `button` with the pointer over `window`
    pub fn button(&self, window: WindowId, button: u8, pressed: bool) -> Result<()> {
        self.inject(FakeInput::Button { window, button, pressed })
    }

    /// Warp the pointer to root coordinates
    pub fn motion(&self, x: i16, y: i16) -> Result<()> {
        self.inject(FakeInput::Motion { x, y })
    }

    /// Replace the keysyms of `keysyms.len() / keysyms_per_keycode` keycodes
    /// starting at `first_keycode`
    pub fn set_keyboard_mapping(&self, first_keycode: u8, keysyms_per_keycode: u8, keysyms: &[u32]) -> Result<()> {
        debug!(
            "Remapping {} keycodes from {}",
            keysyms.len() / usize::from(keysyms_per_keycode.max(1)),
            first_keycode
        );
        self.server.set_keyboard_mapping(first_keycode, keysyms_per_keycode, keysyms)?;
        self.server.flush()?;
        Ok(())
    }

    /// Install a modifier map of eight rows. Returns `false` when the server
    /// refused it, typically because a listed key is currently pressed.
    pub fn set_modifier_mapping(&self, keycodes: &[u8]) -> Result<bool> {
        let accepted = self.server.set_modifier_mapping(keycodes)?;
        if !accepted {
            warn!("Modifier mapping refused by the server");
        }
        Ok(accepted)
    }
}
