//! In-memory display server for tests
//!
//! Keeps a tiny window tree, hands out ids, counts every resource allocation
//! and release, and replays notifications pushed by the test.

use std::collections::{HashMap, HashSet};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::error::ServerError;
use crate::server::{
    Atom, DisplayServer, FakeInput, ImageData, MapState, Property, ProtocolError, ServerEvent,
    ShmSegment, WindowAttributes, WindowChanges, WindowId,
};
use crate::shared::Rect;
use crate::wm::display::{Extensions, ScreenInfo};

pub const ROOT: WindowId = 1;

#[derive(Debug, Clone)]
pub struct MockWindow {
    pub geometry: Rect,
    pub override_redirect: bool,
    pub map_state: MapState,
    pub properties: HashMap<Atom, Property>,
    pub shape: Vec<Rect>,
}

#[derive(Debug, Default)]
pub struct MockState {
    pub windows: HashMap<WindowId, MockWindow>,
    pub root_children: Vec<WindowId>,
    pub atoms: HashMap<String, Atom>,
    pub next_id: u32,

    pub root_claimed: bool,
    pub root_owned_elsewhere: bool,
    pub cm_owner: Option<WindowId>,
    pub fail_shm: bool,
    /// Report every unmap back as an UnmapNotify, as a real server does
    pub notify_unmaps: bool,

    pub pixmaps_named: usize,
    pub pixmaps_freed: usize,
    pub live_pixmaps: HashMap<u32, WindowId>,
    pub shm_attached: usize,
    pub shm_detached: usize,
    pub live_segments: HashSet<u32>,
    pub damages: HashMap<u32, WindowId>,
    pub damages_destroyed: usize,
    pub damage_subtracts: Vec<(u32, Option<Rect>)>,
    pub damage_adds: Vec<(WindowId, Rect)>,

    pub client_messages: Vec<(WindowId, Atom, [u32; 5])>,
    pub killed: Vec<WindowId>,
    pub mapped: Vec<WindowId>,
    pub unmapped: Vec<WindowId>,
    pub configured: Vec<(WindowId, WindowChanges)>,
    pub focused: Option<WindowId>,
    pub fake_inputs: Vec<FakeInput>,
    pub keyboard_mappings: Vec<(u8, u8, Vec<u32>)>,
    pub modifier_mappings: Vec<Vec<u8>>,
    pub shm_reads: usize,
    pub socket_reads: usize,
    pub flushes: usize,
}

enum Item {
    Event(ServerEvent),
    Wake,
    Disconnect,
}

pub struct MockServer {
    screen: ScreenInfo,
    extensions: Extensions,
    state: Mutex<MockState>,
    tx: Mutex<mpsc::Sender<Item>>,
    rx: Mutex<mpsc::Receiver<Item>>,
}

fn bad_window(window: WindowId) -> ServerError {
    ServerError::Protocol(ProtocolError {
        code: 3,
        resource: window,
        major_opcode: 0,
        minor_opcode: 0,
        kind: "Window".to_string(),
    })
}

impl MockServer {
    pub fn new(width: u16, height: u16) -> Arc<Self> {
        Self::with_extensions(width, height, Extensions::all())
    }

    pub fn with_extensions(width: u16, height: u16, extensions: Extensions) -> Arc<Self> {
        let (tx, rx) = mpsc::channel();
        let state = MockState {
            next_id: 0x0040_0000,
            ..MockState::default()
        };
        Arc::new(Self {
            screen: ScreenInfo {
                screen_num: 0,
                root: ROOT,
                width,
                height,
                depth: 24,
                bits_per_pixel: 32,
                scanline_pad: 32,
            },
            extensions,
            state: Mutex::new(state),
            tx: Mutex::new(tx),
            rx: Mutex::new(rx),
        })
    }

    pub fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create a child of the root
    pub fn add_window(&self, id: WindowId, geometry: Rect, viewable: bool) {
        let mut state = self.state();
        state.windows.insert(
            id,
            MockWindow {
                geometry,
                override_redirect: false,
                map_state: if viewable { MapState::Viewable } else { MapState::Unmapped },
                properties: HashMap::new(),
                shape: Vec::new(),
            },
        );
        state.root_children.push(id);
    }

    pub fn atom(&self, name: &str) -> Atom {
        let mut state = self.state();
        Self::intern(&mut state, name)
    }

    fn intern(state: &mut MockState, name: &str) -> Atom {
        if let Some(atom) = state.atoms.get(name) {
            return *atom;
        }
        let atom = 100 + state.atoms.len() as Atom;
        state.atoms.insert(name.to_string(), atom);
        atom
    }

    pub fn set_property(&self, window: WindowId, name: &str, property: Property) {
        let atom = self.atom(name);
        if let Some(w) = self.state().windows.get_mut(&window) {
            w.properties.insert(atom, property);
        }
    }

    pub fn set_atoms(&self, window: WindowId, name: &str, values: &[&str]) {
        let atoms: Vec<Atom> = values.iter().map(|v| self.atom(v)).collect();
        let type_ = self.atom("ATOM");
        self.set_property(window, name, Property::new32(type_, &atoms));
    }

    pub fn push(&self, event: ServerEvent) {
        let _ = self.tx.lock().unwrap_or_else(PoisonError::into_inner).send(Item::Event(event));
    }

    pub fn disconnect(&self) {
        let _ = self.tx.lock().unwrap_or_else(PoisonError::into_inner).send(Item::Disconnect);
    }

    fn next_id(&self) -> u32 {
        let mut state = self.state();
        state.next_id += 1;
        state.next_id
    }

    fn pixels(area: Rect, fill: u8) -> Vec<u8> {
        vec![fill; area.width as usize * area.height as usize * 4]
    }
}

impl DisplayServer for MockServer {
    fn screen(&self) -> ScreenInfo {
        self.screen
    }

    fn extensions(&self) -> Extensions {
        self.extensions
    }

    fn claim_root(&self) -> Result<(), ServerError> {
        let mut state = self.state();
        if state.root_owned_elsewhere {
            return Err(ServerError::Protocol(ProtocolError {
                code: 10,
                resource: ROOT,
                major_opcode: 2,
                minor_opcode: 0,
                kind: "Access".to_string(),
            }));
        }
        state.root_claimed = true;
        Ok(())
    }

    fn selection_owner(&self, _selection: Atom) -> Result<Option<WindowId>, ServerError> {
        Ok(self.state().cm_owner)
    }

    fn redirect_subwindows(&self) -> Result<(), ServerError> {
        Ok(())
    }

    fn select_cursor_input(&self) -> Result<(), ServerError> {
        Ok(())
    }

    fn select_window_input(&self, _window: WindowId) -> Result<(), ServerError> {
        Ok(())
    }

    fn attributes(&self, window: WindowId) -> Result<WindowAttributes, ServerError> {
        let state = self.state();
        let w = state.windows.get(&window).ok_or_else(|| bad_window(window))?;
        Ok(WindowAttributes {
            override_redirect: w.override_redirect,
            map_state: w.map_state,
        })
    }

    fn geometry(&self, window: WindowId) -> Result<Rect, ServerError> {
        if window == ROOT {
            return Ok(Rect::sized(self.screen.width.into(), self.screen.height.into()));
        }
        let state = self.state();
        state
            .windows
            .get(&window)
            .map(|w| w.geometry)
            .ok_or_else(|| bad_window(window))
    }

    fn children(&self, window: WindowId) -> Result<Vec<WindowId>, ServerError> {
        if window == ROOT {
            return Ok(self.state().root_children.clone());
        }
        Ok(Vec::new())
    }

    fn create_damage(&self, drawable: WindowId) -> Result<u32, ServerError> {
        let id = self.next_id();
        self.state().damages.insert(id, drawable);
        Ok(id)
    }

    fn destroy_damage(&self, damage: u32) -> Result<(), ServerError> {
        let mut state = self.state();
        state.damages.remove(&damage);
        state.damages_destroyed += 1;
        Ok(())
    }

    fn subtract_damage(&self, damage: u32, area: Option<Rect>) -> Result<(), ServerError> {
        self.state().damage_subtracts.push((damage, area));
        Ok(())
    }

    fn add_damage(&self, drawable: WindowId, area: Rect) -> Result<(), ServerError> {
        self.state().damage_adds.push((drawable, area));
        Ok(())
    }

    fn name_window_pixmap(&self, window: WindowId) -> Result<u32, ServerError> {
        let id = self.next_id();
        let mut state = self.state();
        state.pixmaps_named += 1;
        state.live_pixmaps.insert(id, window);
        Ok(id)
    }

    fn free_pixmap(&self, pixmap: u32) -> Result<(), ServerError> {
        let mut state = self.state();
        state.pixmaps_freed += 1;
        state.live_pixmaps.remove(&pixmap);
        Ok(())
    }

    fn attach_shm(&self, size: usize) -> Result<ShmSegment, ServerError> {
        if self.state().fail_shm {
            return Err(ServerError::Shm(std::io::Error::from_raw_os_error(libc::ENOMEM)));
        }
        let seg = self.next_id();
        let mut state = self.state();
        state.shm_attached += 1;
        state.live_segments.insert(seg);
        Ok(ShmSegment { seg, size })
    }

    fn detach_shm(&self, segment: &ShmSegment) -> Result<(), ServerError> {
        let mut state = self.state();
        if !state.live_segments.remove(&segment.seg) {
            return Err(ServerError::UnknownSegment(segment.seg));
        }
        state.shm_detached += 1;
        Ok(())
    }

    fn intern_atom(&self, name: &str) -> Result<Atom, ServerError> {
        Ok(self.atom(name))
    }

    fn get_property(&self, window: WindowId, property: Atom) -> Result<Option<Property>, ServerError> {
        let state = self.state();
        let w = state.windows.get(&window).ok_or_else(|| bad_window(window))?;
        Ok(w.properties.get(&property).cloned())
    }

    fn set_property32(&self, window: WindowId, property: Atom, type_: Atom, data: &[u32]) -> Result<(), ServerError> {
        if let Some(w) = self.state().windows.get_mut(&window) {
            w.properties.insert(property, Property::new32(type_, data));
        }
        Ok(())
    }

    fn delete_property(&self, window: WindowId, property: Atom) -> Result<(), ServerError> {
        if let Some(w) = self.state().windows.get_mut(&window) {
            w.properties.remove(&property);
        }
        Ok(())
    }

    fn send_client_message(&self, window: WindowId, type_: Atom, data: [u32; 5]) -> Result<(), ServerError> {
        self.state().client_messages.push((window, type_, data));
        Ok(())
    }

    fn kill_client(&self, window: WindowId) -> Result<(), ServerError> {
        self.state().killed.push(window);
        Ok(())
    }

    fn configure(&self, window: WindowId, changes: &WindowChanges) -> Result<(), ServerError> {
        let mut state = self.state();
        if let Some(w) = state.windows.get_mut(&window) {
            let g = &mut w.geometry;
            g.x = changes.x.unwrap_or(g.x);
            g.y = changes.y.unwrap_or(g.y);
            g.width = changes.width.unwrap_or(g.width);
            g.height = changes.height.unwrap_or(g.height);
        }
        state.configured.push((window, *changes));
        Ok(())
    }

    fn map(&self, window: WindowId) -> Result<(), ServerError> {
        let mut state = self.state();
        if let Some(w) = state.windows.get_mut(&window) {
            w.map_state = MapState::Viewable;
        }
        state.mapped.push(window);
        Ok(())
    }

    fn unmap(&self, window: WindowId) -> Result<(), ServerError> {
        let mut state = self.state();
        if let Some(w) = state.windows.get_mut(&window) {
            w.map_state = MapState::Unmapped;
        }
        state.unmapped.push(window);
        if state.notify_unmaps {
            drop(state);
            self.push(ServerEvent::Unmap { window, synthetic: false });
        }
        Ok(())
    }

    fn set_input_focus(&self, window: WindowId) -> Result<(), ServerError> {
        self.state().focused = Some(window);
        Ok(())
    }

    fn shape_rects(&self, window: WindowId) -> Result<Vec<Rect>, ServerError> {
        let state = self.state();
        let w = state.windows.get(&window).ok_or_else(|| bad_window(window))?;
        Ok(w.shape.clone())
    }

    fn get_image(&self, _drawable: WindowId, area: Rect) -> Result<ImageData, ServerError> {
        self.state().socket_reads += 1;
        Ok(ImageData {
            depth: 24,
            data: Self::pixels(area, 0xab),
        })
    }

    fn get_image_shm(&self, _drawable: WindowId, area: Rect, segment: &ShmSegment) -> Result<ImageData, ServerError> {
        let mut state = self.state();
        if !state.live_segments.contains(&segment.seg) {
            return Err(ServerError::UnknownSegment(segment.seg));
        }
        state.shm_reads += 1;
        Ok(ImageData {
            depth: 24,
            data: Self::pixels(area, 0xcd),
        })
    }

    fn fake_input(&self, input: FakeInput) -> Result<(), ServerError> {
        self.state().fake_inputs.push(input);
        Ok(())
    }

    fn set_keyboard_mapping(&self, first_keycode: u8, keysyms_per_keycode: u8, keysyms: &[u32]) -> Result<(), ServerError> {
        self.state()
            .keyboard_mappings
            .push((first_keycode, keysyms_per_keycode, keysyms.to_vec()));
        Ok(())
    }

    fn set_modifier_mapping(&self, keycodes: &[u8]) -> Result<bool, ServerError> {
        self.state().modifier_mappings.push(keycodes.to_vec());
        Ok(keycodes.len() % 8 == 0)
    }

    fn flush(&self) -> Result<(), ServerError> {
        self.state().flushes += 1;
        Ok(())
    }

    fn wait_for_event(&self, timeout: Duration) -> Result<Option<ServerEvent>, ServerError> {
        let rx = self.rx.lock().unwrap_or_else(PoisonError::into_inner);
        match rx.recv_timeout(timeout) {
            Ok(Item::Event(event)) => Ok(Some(event)),
            Ok(Item::Wake) | Err(RecvTimeoutError::Timeout) => Ok(None),
            Ok(Item::Disconnect) | Err(RecvTimeoutError::Disconnected) => {
                Err(ServerError::Disconnected("mock server closed".to_string()))
            }
        }
    }

    fn wake(&self) {
        let _ = self.tx.lock().unwrap_or_else(PoisonError::into_inner).send(Item::Wake);
    }
}
