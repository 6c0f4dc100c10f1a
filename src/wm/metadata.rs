//! ICCCM / EWMH metadata
//!
//! Fetches the properties the core caches per window and writes the state
//! properties back. A missing or malformed property always degrades to a
//! default value.

use tracing::{debug, trace};

use crate::error::ServerError;
use crate::server::{Atom, DisplayServer, Property, WindowId};
use crate::wm::ewmh::Atoms;
use crate::wm::events::EventKind;
use crate::wm::hints::{self, SizeHints};
use crate::wm::state::WindowState;
use crate::wm::window::{WindowRecord, WindowType};

/// Opacity of windows without `_NET_WM_WINDOW_OPACITY`
pub const OPAQUE: u32 = 0xFFFF_FFFF;

/// Cached metadata of one window
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metadata {
    pub name: String,
    pub delete_supported: bool,
    pub size_hints: SizeHints,
    pub transient_for: Option<WindowId>,
    pub window_type: WindowType,
    pub opacity: u32,
}

impl Metadata {
    pub fn fetch(server: &dyn DisplayServer, atoms: &Atoms, window: WindowId) -> Self {
        let transient_for = fetch_transient_for(server, atoms, window);
        Self {
            name: fetch_name(server, atoms, window),
            delete_supported: fetch_delete_supported(server, atoms, window),
            size_hints: fetch_size_hints(server, atoms, window),
            transient_for,
            window_type: fetch_window_type(server, atoms, window, transient_for),
            opacity: fetch_opacity(server, atoms, window),
        }
    }

    pub fn apply(self, record: &mut WindowRecord) {
        record.name = self.name;
        record.delete_supported = self.delete_supported;
        record.size_hints = self.size_hints;
        record.transient_for = self.transient_for;
        record.window_type = self.window_type;
        record.opacity = self.opacity;
    }
}

fn property(server: &dyn DisplayServer, window: WindowId, atom: Atom) -> Option<Property> {
    match server.get_property(window, atom) {
        Ok(prop) => prop,
        Err(e) => {
            debug!("Failed to read property {} of window {:#x}: {}", atom, window, e);
            None
        }
    }
}

fn values32(server: &dyn DisplayServer, window: WindowId, atom: Atom) -> Vec<u32> {
    property(server, window, atom)
        .map(|p| p.value32())
        .unwrap_or_default()
}

/// `_NET_WM_NAME`, then `WM_NAME`, then the empty string
pub fn fetch_name(server: &dyn DisplayServer, atoms: &Atoms, window: WindowId) -> String {
    if let Some(prop) = property(server, window, atoms.net_wm_name) {
        if prop.format == 8 && !prop.value.is_empty() {
            return String::from_utf8_lossy(&prop.value).into_owned();
        }
    }

    match property(server, window, atoms.wm_name) {
        Some(prop) if prop.format == 8 => {
            if prop.type_ == atoms.utf8_string {
                String::from_utf8_lossy(&prop.value).into_owned()
            } else {
                // STRING is Latin-1
                prop.value.iter().map(|&b| b as char).collect()
            }
        }
        _ => String::new(),
    }
}

pub fn fetch_delete_supported(server: &dyn DisplayServer, atoms: &Atoms, window: WindowId) -> bool {
    values32(server, window, atoms.wm_protocols).contains(&atoms.wm_delete_window)
}

pub fn fetch_size_hints(server: &dyn DisplayServer, atoms: &Atoms, window: WindowId) -> SizeHints {
    SizeHints::from_values(&values32(server, window, atoms.wm_normal_hints)).unwrap_or_default()
}

pub fn fetch_transient_for(server: &dyn DisplayServer, atoms: &Atoms, window: WindowId) -> Option<WindowId> {
    values32(server, window, atoms.wm_transient_for)
        .first()
        .copied()
        .filter(|&w| w != 0)
}

/// Transient windows default to dialogs; the first known `_NET_WM_WINDOW_TYPE` entry wins
pub fn fetch_window_type(
    server: &dyn DisplayServer,
    atoms: &Atoms,
    window: WindowId,
    transient_for: Option<WindowId>,
) -> WindowType {
    let declared = values32(server, window, atoms.net_wm_window_type)
        .into_iter()
        .find_map(|atom| atoms.window_type(atom));

    declared.unwrap_or(if transient_for.is_some() {
        WindowType::Dialog
    } else {
        WindowType::Normal
    })
}

pub fn fetch_opacity(server: &dyn DisplayServer, atoms: &Atoms, window: WindowId) -> u32 {
    values32(server, window, atoms.net_wm_window_opacity)
        .first()
        .copied()
        .unwrap_or(OPAQUE)
}

/// `WM_HINTS` requests the iconic state on first map
pub fn fetch_initial_iconic(server: &dyn DisplayServer, atoms: &Atoms, window: WindowId) -> bool {
    hints::wants_initial_iconic(&values32(server, window, atoms.wm_hints))
}

/// Lifecycle state recorded in `WM_STATE` by a previous manager
pub fn fetch_wm_state(server: &dyn DisplayServer, atoms: &Atoms, window: WindowId) -> Option<WindowState> {
    values32(server, window, atoms.wm_state)
        .first()
        .and_then(|v| WindowState::from_icccm(*v))
}

/// What a property change refreshes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyKind {
    Name,
    Protocols,
    SizeHints,
    /// Transient-for or window type, which depend on each other
    Type,
    Opacity,
    Other,
}

pub fn classify(atoms: &Atoms, atom: Atom) -> PropertyKind {
    if atom == atoms.net_wm_name || atom == atoms.wm_name {
        PropertyKind::Name
    } else if atom == atoms.wm_protocols {
        PropertyKind::Protocols
    } else if atom == atoms.wm_normal_hints {
        PropertyKind::SizeHints
    } else if atom == atoms.wm_transient_for || atom == atoms.net_wm_window_type {
        PropertyKind::Type
    } else if atom == atoms.net_wm_window_opacity {
        PropertyKind::Opacity
    } else {
        PropertyKind::Other
    }
}

/// Fresh value for one property group, fetched without holding any lock
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataUpdate {
    Name(String),
    Protocols(bool),
    SizeHints(SizeHints),
    Type { transient_for: Option<WindowId>, window_type: WindowType },
    Opacity(u32),
}

impl MetadataUpdate {
    pub fn fetch(server: &dyn DisplayServer, atoms: &Atoms, window: WindowId, kind: PropertyKind) -> Option<Self> {
        let update = match kind {
            PropertyKind::Name => MetadataUpdate::Name(fetch_name(server, atoms, window)),
            PropertyKind::Protocols => MetadataUpdate::Protocols(fetch_delete_supported(server, atoms, window)),
            PropertyKind::SizeHints => MetadataUpdate::SizeHints(fetch_size_hints(server, atoms, window)),
            PropertyKind::Type => {
                let transient_for = fetch_transient_for(server, atoms, window);
                MetadataUpdate::Type {
                    transient_for,
                    window_type: fetch_window_type(server, atoms, window, transient_for),
                }
            }
            PropertyKind::Opacity => MetadataUpdate::Opacity(fetch_opacity(server, atoms, window)),
            PropertyKind::Other => return None,
        };
        Some(update)
    }

    /// Store the value; returns the public event the change maps to, if any
    pub fn apply(self, record: &mut WindowRecord) -> Option<EventKind> {
        trace!("Window {:#x} metadata update: {:?}", record.id, self);
        match self {
            MetadataUpdate::Name(name) => {
                record.name = name;
                return Some(EventKind::WindowName);
            }
            MetadataUpdate::Protocols(supported) => record.delete_supported = supported,
            MetadataUpdate::SizeHints(hints) => record.size_hints = hints,
            MetadataUpdate::Type { transient_for, window_type } => {
                record.transient_for = transient_for;
                record.window_type = window_type;
            }
            MetadataUpdate::Opacity(opacity) => record.opacity = opacity,
        }
        None
    }
}

/// Write `WM_STATE` (top-level, non override-redirect windows only) and
/// `_NET_WM_STATE`, then flush
pub fn set_state(
    server: &dyn DisplayServer,
    atoms: &Atoms,
    record: &WindowRecord,
    root: WindowId,
    state: WindowState,
) -> Result<(), ServerError> {
    let window = record.id;

    if record.is_top_level(root) && !record.override_redirect {
        server.set_property32(window, atoms.wm_state, atoms.wm_state, &[state.icccm_value(), 0])?;
    }

    let mut net_state: Vec<Atom> = values32(server, window, atoms.net_wm_state)
        .into_iter()
        .filter(|&a| a != atoms.net_wm_state_hidden)
        .collect();
    if state == WindowState::Iconic {
        net_state.push(atoms.net_wm_state_hidden);
    }
    server.set_property32(window, atoms.net_wm_state, atoms.atom, &net_state)?;

    server.flush()
}
