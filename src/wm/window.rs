//! Managed windows
//!
//! `WindowRecord` is the registry-owned state of one window. `Window` is the
//! caller's handle: an id plus a weak link to the context, resolved through
//! the registry on every call so a window destroyed in the meantime reads as
//! "not found" instead of stale data.

use std::any::Any;
use std::fmt;
use std::sync::{Arc, Weak};

use crate::compositor::capture::{self, Image};
use crate::error::{Error, Result};
use crate::server::{StackMode, WindowChanges, WindowId};
use crate::shared::Rect;
use crate::wm::context::Shared;
use crate::wm::hints::SizeHints;
use crate::wm::metadata::OPAQUE;
use crate::wm::state::{Trigger, WindowState};
use crate::wm::terminate;

/// Opaque per-window data owned by the caller
pub type LocalData = Arc<dyn Any + Send + Sync>;

/// EWMH window type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum WindowType {
    #[default]
    Unknown,
    Normal,
    Dialog,
    Menu,
    Toolbar,
    Utility,
    Splash,
    Tooltip,
    Notification,
    Dock,
    Desktop,
    DropdownMenu,
    PopupMenu,
    Combo,
    Dnd,
}

/// Registry-owned state of one managed window
#[derive(Debug, Clone)]
pub struct WindowRecord {
    pub id: WindowId,
    pub window_type: WindowType,
    pub parent: Option<WindowId>,
    pub transient_for: Option<WindowId>,
    /// Fixed at creation
    pub override_redirect: bool,
    pub mapped: bool,
    pub state: WindowState,
    /// Last configured geometry
    pub bounds: Rect,
    /// Geometry of the last configure notification
    pub notified_bounds: Rect,
    pub size_hints: SizeHints,
    pub delete_supported: bool,
    pub name: String,
    pub opacity: u32,
    /// Bounding shape, only when it differs from the bounds rectangle
    pub shape: Option<Vec<Rect>>,
    pub local_data: Option<LocalData>,
    /// Unmaps we issued ourselves and have not seen the notification for yet
    pub pending_unmaps: u32,
}

impl WindowRecord {
    pub fn new(id: WindowId, bounds: Rect, override_redirect: bool, state: WindowState) -> Self {
        Self {
            id,
            window_type: WindowType::Unknown,
            parent: None,
            transient_for: None,
            override_redirect,
            mapped: false,
            state,
            bounds,
            notified_bounds: bounds,
            size_hints: SizeHints::default(),
            delete_supported: false,
            name: String::new(),
            opacity: OPAQUE,
            shape: None,
            local_data: None,
            pending_unmaps: 0,
        }
    }

    pub fn is_top_level(&self, root: WindowId) -> bool {
        self.parent == Some(root)
    }
}

/// Handle to a managed window
#[derive(Clone)]
pub struct Window {
    id: WindowId,
    shared: Weak<Shared>,
}

impl fmt::Debug for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Window({:#x})", self.id)
    }
}

impl PartialEq for Window {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && Weak::ptr_eq(&self.shared, &other.shared)
    }
}

impl Eq for Window {}

impl Window {
    pub(crate) fn new(id: WindowId, shared: Weak<Shared>) -> Self {
        Self { id, shared }
    }

    pub fn id(&self) -> WindowId {
        self.id
    }

    fn shared(&self) -> Result<Arc<Shared>> {
        self.shared.upgrade().ok_or(Error::Closed)
    }

    fn read<T>(&self, f: impl FnOnce(&WindowRecord) -> T) -> Option<T> {
        let shared = self.shared.upgrade()?;
        let registry = shared.registry();
        registry.find(self.id).map(f)
    }

    /// Resolve a weak id reference, `None` once the target is gone
    fn resolve(&self, target: impl FnOnce(&WindowRecord) -> Option<WindowId>) -> Option<Window> {
        let shared = self.shared.upgrade()?;
        let registry = shared.registry();
        let id = target(registry.find(self.id)?)?;
        registry.contains(id).then(|| Window::new(id, self.shared.clone()))
    }

    fn require(&self) -> Result<Arc<Shared>> {
        let shared = self.shared()?;
        if !shared.registry().contains(self.id) {
            return Err(Error::UnknownWindow(self.id));
        }
        Ok(shared)
    }

    /// Whether the window is still managed
    pub fn exists(&self) -> bool {
        self.read(|_| ()).is_some()
    }

    pub fn window_type(&self) -> Option<WindowType> {
        self.read(|r| r.window_type)
    }

    pub fn parent(&self) -> Option<Window> {
        self.resolve(|r| r.parent)
    }

    pub fn transient_for(&self) -> Option<Window> {
        self.resolve(|r| r.transient_for)
    }

    pub fn override_redirect(&self) -> Option<bool> {
        self.read(|r| r.override_redirect)
    }

    pub fn state(&self) -> Option<WindowState> {
        self.read(|r| r.state)
    }

    pub fn is_mapped(&self) -> Option<bool> {
        self.read(|r| r.mapped)
    }

    pub fn bounds(&self) -> Option<Rect> {
        self.read(|r| r.bounds)
    }

    /// Area changed since the last `remove_damage`, relative to the window
    pub fn damaged_rect(&self) -> Option<Rect> {
        let shared = self.shared.upgrade()?;
        let damage = shared.damage();
        damage.consume(self.id)
    }

    /// Fresh copy of the window title
    pub fn name(&self) -> Option<String> {
        self.read(|r| r.name.clone())
    }

    pub fn size_hints(&self) -> Option<SizeHints> {
        self.read(|r| r.size_hints)
    }

    /// Clamp a requested size to what the client's size hints allow
    pub fn constrain_size(&self, width: u32, height: u32) -> Option<(u32, u32)> {
        self.read(|r| r.size_hints.constrain(width, height))
    }

    pub fn opacity(&self) -> Option<u32> {
        self.read(|r| r.opacity)
    }

    pub fn supports_delete(&self) -> Option<bool> {
        self.read(|r| r.delete_supported)
    }

    /// Bounding shape rectangles. Empty for unshaped windows.
    pub fn shape_rects(&self) -> Option<impl Iterator<Item = Rect>> {
        self.read(|r| r.shape.clone().unwrap_or_default().into_iter())
    }

    pub fn is_shaped(&self) -> Option<bool> {
        self.read(|r| r.shape.is_some())
    }

    pub fn local_data(&self) -> Option<LocalData> {
        self.read(|r| r.local_data.clone()).flatten()
    }

    pub fn set_local_data(&self, data: Option<LocalData>) -> Result<()> {
        let shared = self.shared()?;
        let mut registry = shared.registry_mut();
        let record = registry.find_mut(self.id).ok_or(Error::UnknownWindow(self.id))?;
        record.local_data = data;
        Ok(())
    }

    pub fn raise(&self) -> Result<()> {
        self.restack(StackMode::Above)
    }

    pub fn lower(&self) -> Result<()> {
        self.restack(StackMode::Below)
    }

    fn restack(&self, mode: StackMode) -> Result<()> {
        let shared = self.require()?;
        shared.server.configure(self.id, &WindowChanges::stack(mode))?;
        shared.server.flush()?;
        Ok(())
    }

    pub fn focus(&self) -> Result<()> {
        let shared = self.require()?;
        shared.server.set_input_focus(self.id)?;
        shared.server.flush()?;
        Ok(())
    }

    /// Clear the damaged rectangle after the caller has redrawn it
    pub fn remove_damage(&self) -> Result<()> {
        let shared = self.shared()?;
        if !shared.damage().reset(self.id) {
            return Err(Error::UnknownWindow(self.id));
        }
        Ok(())
    }

    /// Ask the client to close, or kill it if it does not speak the delete protocol
    pub fn request_close(&self) -> Result<()> {
        let shared = self.shared()?;
        terminate::request_close(&shared, self.id)
    }

    /// Move and resize
    pub fn configure(&self, x: i32, y: i32, width: u32, height: u32) -> Result<()> {
        let shared = self.shared()?;
        shared.configure_window(self.id, Rect::new(x, y, width, height))
    }

    pub fn iconify(&self) -> Result<()> {
        let shared = self.shared()?;
        shared.request_transition(self.id, Trigger::Iconify)
    }

    pub fn deiconify(&self) -> Result<()> {
        let shared = self.shared()?;
        shared.request_transition(self.id, Trigger::Deiconify)
    }

    /// Whole window contents
    pub fn capture_full(&self) -> Result<Option<Image>> {
        let shared = self.require()?;
        capture::capture_full(&shared, self.id)
    }

    /// Contents of the damaged rectangle, `None` when nothing is damaged
    pub fn capture_damaged(&self) -> Result<Option<Image>> {
        let shared = self.require()?;
        capture::capture_damaged(&shared, self.id)
    }

    /// Contents of `rect`, relative to the window. `None` for an empty rectangle.
    pub fn capture_rect(&self, rect: Rect) -> Result<Option<Image>> {
        let shared = self.require()?;
        capture::capture_rect(&shared, self.id, rect)
    }
}
