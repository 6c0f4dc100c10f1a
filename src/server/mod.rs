//! Display server abstraction
//!
//! Everything the window-management core needs from the display server,
//! expressed as one object-safe trait. `x11` is the production backend on top
//! of x11rb; tests drive the core through an in-memory server instead.

use std::fmt;
use std::time::Duration;

use crate::error::ServerError;
use crate::shared::Rect;
use crate::wm::display::{Extensions, ScreenInfo};

#[cfg(test)]
pub(crate) mod mock;
pub mod x11;

pub use x11::X11Server;

/// Server-side window id
pub type WindowId = u32;
/// Interned atom
pub type Atom = u32;

/// Map state of a window as reported by the server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapState {
    Unmapped,
    Unviewable,
    Viewable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowAttributes {
    pub override_redirect: bool,
    pub map_state: MapState,
}

/// Raw property value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Property {
    pub type_: Atom,
    pub format: u8,
    pub value: Vec<u8>,
}

impl Property {
    pub fn new32(type_: Atom, values: &[u32]) -> Self {
        Self {
            type_,
            format: 32,
            value: values.iter().flat_map(|v| v.to_ne_bytes()).collect(),
        }
    }

    pub fn new8(type_: Atom, bytes: &[u8]) -> Self {
        Self {
            type_,
            format: 8,
            value: bytes.to_vec(),
        }
    }

    /// Values of a format-32 property, empty for any other format
    pub fn value32(&self) -> Vec<u32> {
        if self.format != 32 {
            return Vec::new();
        }
        self.value
            .chunks_exact(4)
            .map(|c| u32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    }
}

/// Stacking order change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackMode {
    Above,
    Below,
}

/// Fields of a configure request; `None` leaves the field untouched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WindowChanges {
    pub x: Option<i32>,
    pub y: Option<i32>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub stack_mode: Option<StackMode>,
}

impl WindowChanges {
    pub fn geometry(rect: Rect) -> Self {
        Self {
            x: Some(rect.x),
            y: Some(rect.y),
            width: Some(rect.width),
            height: Some(rect.height),
            stack_mode: None,
        }
    }

    pub fn stack(mode: StackMode) -> Self {
        Self {
            stack_mode: Some(mode),
            ..Self::default()
        }
    }
}

/// Synthetic input routed through the test-input extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FakeInput {
    Key { keycode: u8, pressed: bool },
    Button { window: WindowId, button: u8, pressed: bool },
    Motion { x: i16, y: i16 },
}

/// Shared memory segment attached to the server connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShmSegment {
    pub seg: u32,
    pub size: usize,
}

/// Pixels fetched from a drawable
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageData {
    pub depth: u8,
    pub data: Vec<u8>,
}

/// Error event delivered asynchronously by the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolError {
    pub code: u8,
    pub resource: u32,
    pub major_opcode: u8,
    pub minor_opcode: u16,
    pub kind: String,
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "protocol error {} ({}) on resource {:#x}, request {}.{}",
            self.code, self.kind, self.resource, self.major_opcode, self.minor_opcode
        )
    }
}

/// Notification from the display server, normalized to what the core consumes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    Damage { drawable: WindowId, area: Rect },
    /// Bounding shape changed
    Shape { window: WindowId, shaped: bool },
    Cursor,
    Create { window: WindowId },
    Destroy { window: WindowId },
    Map { window: WindowId, override_redirect: bool },
    MapRequest { window: WindowId, parent: WindowId },
    /// `synthetic` is set for unmaps sent by a client rather than generated by the server
    Unmap { window: WindowId, synthetic: bool },
    Configure { window: WindowId, rect: Rect },
    ConfigureRequest { window: WindowId, changes: WindowChanges },
    Property { window: WindowId, atom: Atom, deleted: bool },
    Reparent { window: WindowId, parent: WindowId, override_redirect: bool },
    ClientMessage { window: WindowId, type_: Atom, data: [u32; 5] },
    Error(ProtocolError),
}

impl ServerEvent {
    /// Window the notification is about, if any
    pub fn window(&self) -> Option<WindowId> {
        match self {
            ServerEvent::Damage { drawable, .. } => Some(*drawable),
            ServerEvent::Shape { window, .. }
            | ServerEvent::Create { window }
            | ServerEvent::Destroy { window }
            | ServerEvent::Map { window, .. }
            | ServerEvent::MapRequest { window, .. }
            | ServerEvent::Unmap { window, .. }
            | ServerEvent::Configure { window, .. }
            | ServerEvent::ConfigureRequest { window, .. }
            | ServerEvent::Property { window, .. }
            | ServerEvent::Reparent { window, .. }
            | ServerEvent::ClientMessage { window, .. } => Some(*window),
            ServerEvent::Cursor | ServerEvent::Error(_) => None,
        }
    }
}

/// Requests, replies and notifications the core consumes from the display server.
///
/// Requests without a meaningful reply may be buffered; `flush` pushes them out.
/// Errors for buffered requests arrive later as [`ServerEvent::Error`].
pub trait DisplayServer: Send + Sync {
    fn screen(&self) -> ScreenInfo;

    fn extensions(&self) -> Extensions;

    /// Select substructure redirect on the root. Fails if another client holds it.
    fn claim_root(&self) -> Result<(), ServerError>;

    fn selection_owner(&self, selection: Atom) -> Result<Option<WindowId>, ServerError>;

    /// Redirect all children of the root off-screen (manual update)
    fn redirect_subwindows(&self) -> Result<(), ServerError>;

    fn select_cursor_input(&self) -> Result<(), ServerError>;

    /// Property-change and shape notifications for a managed client
    fn select_window_input(&self, window: WindowId) -> Result<(), ServerError>;

    fn attributes(&self, window: WindowId) -> Result<WindowAttributes, ServerError>;

    fn geometry(&self, window: WindowId) -> Result<Rect, ServerError>;

    fn children(&self, window: WindowId) -> Result<Vec<WindowId>, ServerError>;

    /// Bounding-box level damage object on a drawable
    fn create_damage(&self, drawable: WindowId) -> Result<u32, ServerError>;

    fn destroy_damage(&self, damage: u32) -> Result<(), ServerError>;

    /// Subtract `area` from the damage object, or all of it when `None`
    fn subtract_damage(&self, damage: u32, area: Option<Rect>) -> Result<(), ServerError>;

    fn add_damage(&self, drawable: WindowId, area: Rect) -> Result<(), ServerError>;

    fn name_window_pixmap(&self, window: WindowId) -> Result<u32, ServerError>;

    fn free_pixmap(&self, pixmap: u32) -> Result<(), ServerError>;

    /// Create a segment of `size` bytes and attach it to the connection
    fn attach_shm(&self, size: usize) -> Result<ShmSegment, ServerError>;

    fn detach_shm(&self, segment: &ShmSegment) -> Result<(), ServerError>;

    fn intern_atom(&self, name: &str) -> Result<Atom, ServerError>;

    /// Whole property of any type, `None` when unset
    fn get_property(&self, window: WindowId, property: Atom) -> Result<Option<Property>, ServerError>;

    fn set_property32(&self, window: WindowId, property: Atom, type_: Atom, data: &[u32]) -> Result<(), ServerError>;

    fn delete_property(&self, window: WindowId, property: Atom) -> Result<(), ServerError>;

    fn send_client_message(&self, window: WindowId, type_: Atom, data: [u32; 5]) -> Result<(), ServerError>;

    fn kill_client(&self, window: WindowId) -> Result<(), ServerError>;

    fn configure(&self, window: WindowId, changes: &WindowChanges) -> Result<(), ServerError>;

    fn map(&self, window: WindowId) -> Result<(), ServerError>;

    fn unmap(&self, window: WindowId) -> Result<(), ServerError>;

    fn set_input_focus(&self, window: WindowId) -> Result<(), ServerError>;

    /// Bounding shape rectangles, relative to the window
    fn shape_rects(&self, window: WindowId) -> Result<Vec<Rect>, ServerError>;

    fn get_image(&self, drawable: WindowId, area: Rect) -> Result<ImageData, ServerError>;

    /// Read through an attached segment and copy the pixels out of it
    fn get_image_shm(&self, drawable: WindowId, area: Rect, segment: &ShmSegment) -> Result<ImageData, ServerError>;

    fn fake_input(&self, input: FakeInput) -> Result<(), ServerError>;

    fn set_keyboard_mapping(&self, first_keycode: u8, keysyms_per_keycode: u8, keysyms: &[u32]) -> Result<(), ServerError>;

    /// Returns whether the server accepted the mapping
    fn set_modifier_mapping(&self, keycodes: &[u8]) -> Result<bool, ServerError>;

    fn flush(&self) -> Result<(), ServerError>;

    /// Next notification, `Ok(None)` on timeout or wake-up.
    /// An error means the notification stream has ended.
    fn wait_for_event(&self, timeout: Duration) -> Result<Option<ServerEvent>, ServerError>;

    /// Interrupt a concurrent `wait_for_event`
    fn wake(&self);
}
