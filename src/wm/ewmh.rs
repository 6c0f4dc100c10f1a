//! EWMH / ICCCM atoms
//!
//! Every atom the core reads or writes, interned once per context.

use crate::error::ServerError;
use crate::server::{Atom, DisplayServer};
use crate::wm::window::WindowType;

/// Holds all interned atoms
#[derive(Debug, Clone)]
pub struct Atoms {
    // Standard X11 atoms
    pub atom: Atom,
    pub cardinal: Atom,
    pub utf8_string: Atom,
    pub wm_protocols: Atom,
    pub wm_delete_window: Atom,
    pub wm_state: Atom,
    pub wm_change_state: Atom,
    pub wm_name: Atom,
    pub wm_hints: Atom,
    pub wm_normal_hints: Atom,
    pub wm_transient_for: Atom,
    // EWMH
    pub net_wm_name: Atom,
    pub net_wm_state: Atom,
    pub net_wm_state_hidden: Atom,
    pub net_wm_window_type: Atom,
    pub net_wm_window_opacity: Atom,
    /// `_NET_WM_CM_S<screen>`, owned by a running compositing manager
    pub net_wm_cm_s: Atom,
    /// `_NET_WM_WINDOW_TYPE_*` atoms and the type each one declares
    pub window_types: Vec<(Atom, WindowType)>,
}

const WINDOW_TYPES: [(&str, WindowType); 14] = [
    ("_NET_WM_WINDOW_TYPE_NORMAL", WindowType::Normal),
    ("_NET_WM_WINDOW_TYPE_DIALOG", WindowType::Dialog),
    ("_NET_WM_WINDOW_TYPE_MENU", WindowType::Menu),
    ("_NET_WM_WINDOW_TYPE_TOOLBAR", WindowType::Toolbar),
    ("_NET_WM_WINDOW_TYPE_UTILITY", WindowType::Utility),
    ("_NET_WM_WINDOW_TYPE_SPLASH", WindowType::Splash),
    ("_NET_WM_WINDOW_TYPE_TOOLTIP", WindowType::Tooltip),
    ("_NET_WM_WINDOW_TYPE_NOTIFICATION", WindowType::Notification),
    ("_NET_WM_WINDOW_TYPE_DOCK", WindowType::Dock),
    ("_NET_WM_WINDOW_TYPE_DESKTOP", WindowType::Desktop),
    ("_NET_WM_WINDOW_TYPE_DROPDOWN_MENU", WindowType::DropdownMenu),
    ("_NET_WM_WINDOW_TYPE_POPUP_MENU", WindowType::PopupMenu),
    ("_NET_WM_WINDOW_TYPE_COMBO", WindowType::Combo),
    ("_NET_WM_WINDOW_TYPE_DND", WindowType::Dnd),
];

impl Atoms {
    /// Intern all required atoms
    pub fn new(server: &dyn DisplayServer, screen_num: usize) -> Result<Self, ServerError> {
        let intern = |name: &str| server.intern_atom(name);

        let window_types = WINDOW_TYPES
            .iter()
            .map(|(name, ty)| Ok((intern(name)?, *ty)))
            .collect::<Result<Vec<_>, ServerError>>()?;

        Ok(Self {
            atom: intern("ATOM")?,
            cardinal: intern("CARDINAL")?,
            utf8_string: intern("UTF8_STRING")?,
            wm_protocols: intern("WM_PROTOCOLS")?,
            wm_delete_window: intern("WM_DELETE_WINDOW")?,
            wm_state: intern("WM_STATE")?,
            wm_change_state: intern("WM_CHANGE_STATE")?,
            wm_name: intern("WM_NAME")?,
            wm_hints: intern("WM_HINTS")?,
            wm_normal_hints: intern("WM_NORMAL_HINTS")?,
            wm_transient_for: intern("WM_TRANSIENT_FOR")?,
            net_wm_name: intern("_NET_WM_NAME")?,
            net_wm_state: intern("_NET_WM_STATE")?,
            net_wm_state_hidden: intern("_NET_WM_STATE_HIDDEN")?,
            net_wm_window_type: intern("_NET_WM_WINDOW_TYPE")?,
            net_wm_window_opacity: intern("_NET_WM_WINDOW_OPACITY")?,
            net_wm_cm_s: intern(&format!("_NET_WM_CM_S{}", screen_num))?,
            window_types,
        })
    }

    /// Window type declared by a `_NET_WM_WINDOW_TYPE_*` atom
    pub fn window_type(&self, atom: Atom) -> Option<WindowType> {
        self.window_types
            .iter()
            .find(|(a, _)| *a == atom)
            .map(|(_, ty)| *ty)
    }
}
