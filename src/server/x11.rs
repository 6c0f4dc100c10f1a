//! X11 backend
//!
//! `DisplayServer` on top of an x11rb `RustConnection`. Shared memory segments
//! are created with SysV shm and owned by this backend; callers only see the
//! segment id.

use std::collections::HashMap;
use std::io;
use std::os::unix::io::AsRawFd;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tracing::{debug, info, warn};
use x11rb::connection::{Connection, RequestConnection};
use x11rb::errors::{ConnectionError, ReplyError, ReplyOrIdError};
use x11rb::protocol::Event;
use x11rb::protocol::composite::{self, ConnectionExt as _};
use x11rb::protocol::damage::{self, ConnectionExt as _};
use x11rb::protocol::shape::{self, ConnectionExt as _};
use x11rb::protocol::shm::{self, ConnectionExt as _};
use x11rb::protocol::xfixes::{self, ConnectionExt as _};
use x11rb::protocol::xkb::{self, ConnectionExt as _};
use x11rb::protocol::xproto::{
    self, AtomEnum, ChangeWindowAttributesAux, ClientMessageEvent, ConfigWindow,
    ConfigureWindowAux, ConnectionExt as _, EventMask, ImageFormat, InputFocus, MappingStatus,
    PropMode, Rectangle,
};
use x11rb::protocol::xtest::{self, ConnectionExt as _};
use x11rb::rust_connection::RustConnection;
use x11rb::wrapper::ConnectionExt as _;
use x11rb::x11_utils::X11Error;

use crate::error::ServerError;
use crate::server::{
    Atom, DisplayServer, FakeInput, ImageData, MapState, Property, ProtocolError, ServerEvent,
    ShmSegment, StackMode, WindowAttributes, WindowChanges, WindowId,
};
use crate::shared::Rect;
use crate::wm::display::{Extensions, ScreenInfo};
use crate::x11_async::{FdPoller, Readiness};

impl From<ConnectionError> for ServerError {
    fn from(err: ConnectionError) -> Self {
        ServerError::Disconnected(err.to_string())
    }
}

impl From<ReplyError> for ServerError {
    fn from(err: ReplyError) -> Self {
        match err {
            ReplyError::ConnectionError(err) => err.into(),
            ReplyError::X11Error(err) => ServerError::Protocol(protocol_error(&err)),
        }
    }
}

impl From<ReplyOrIdError> for ServerError {
    fn from(err: ReplyOrIdError) -> Self {
        match err {
            ReplyOrIdError::IdsExhausted => ServerError::IdsExhausted,
            ReplyOrIdError::ConnectionError(err) => err.into(),
            ReplyOrIdError::X11Error(err) => ServerError::Protocol(protocol_error(&err)),
        }
    }
}

fn protocol_error(err: &X11Error) -> ProtocolError {
    ProtocolError {
        code: err.error_code,
        resource: err.bad_value,
        major_opcode: err.major_opcode,
        minor_opcode: err.minor_opcode,
        kind: format!("{:?}", err.error_kind),
    }
}

fn rectangle(rect: Rect) -> Rectangle {
    Rectangle {
        x: rect.x as i16,
        y: rect.y as i16,
        width: rect.width.min(u16::MAX as u32) as u16,
        height: rect.height.min(u16::MAX as u32) as u16,
    }
}

fn rect(r: Rectangle) -> Rect {
    Rect::new(r.x.into(), r.y.into(), r.width.into(), r.height.into())
}

/// Local mapping of an attached segment
#[derive(Debug, Clone, Copy)]
struct ShmMapping {
    addr: usize,
    size: usize,
}

/// X11 display server connection
pub struct X11Server {
    conn: Arc<RustConnection>,
    screen: ScreenInfo,
    extensions: Extensions,
    poller: FdPoller,
    segments: Mutex<HashMap<u32, ShmMapping>>,
}

impl X11Server {
    /// Connect to `display` (or `$DISPLAY`) and probe the extensions we use
    pub fn connect(display: Option<&str>) -> Result<Self, ServerError> {
        let (conn, screen_num) =
            RustConnection::connect(display).map_err(|e| ServerError::Connect(e.to_string()))?;

        let screen = {
            let setup = conn.setup();
            let xscreen = setup.roots.get(screen_num).ok_or_else(|| {
                ServerError::Connect(format!("screen {} does not exist", screen_num))
            })?;
            let format = setup
                .pixmap_formats
                .iter()
                .find(|f| f.depth == xscreen.root_depth);

            ScreenInfo {
                screen_num,
                root: xscreen.root,
                width: xscreen.width_in_pixels,
                height: xscreen.height_in_pixels,
                depth: xscreen.root_depth,
                bits_per_pixel: format.map_or(32, |f| f.bits_per_pixel),
                scanline_pad: format.map_or(32, |f| f.scanline_pad),
            }
        };

        info!(
            "Connected to X11 screen {} ({}x{}, depth {})",
            screen_num, screen.width, screen.height, screen.depth
        );

        let extensions = detect_extensions(&conn)?;
        let poller = FdPoller::new(conn.stream().as_raw_fd())
            .map_err(|e| ServerError::Connect(format!("failed to poll X11 socket: {}", e)))?;

        Ok(Self {
            conn: Arc::new(conn),
            screen,
            extensions,
            poller,
            segments: Mutex::new(HashMap::new()),
        })
    }

    fn region(&self, area: Rect) -> Result<xfixes::Region, ServerError> {
        let region = self.conn.generate_id()?;
        self.conn.xfixes_create_region(region, &[rectangle(area)])?;
        Ok(region)
    }

    fn next_buffered(&self) -> Result<Option<ServerEvent>, ServerError> {
        while let Some(event) = self.conn.poll_for_event()? {
            if let Some(event) = convert_event(event) {
                return Ok(Some(event));
            }
        }
        Ok(None)
    }
}

fn extension_present(conn: &RustConnection, name: &'static str) -> Result<bool, ServerError> {
    Ok(conn.extension_information(name)?.is_some())
}

fn detect_extensions(conn: &RustConnection) -> Result<Extensions, ServerError> {
    let mut ext = Extensions::default();

    if extension_present(conn, composite::X11_EXTENSION_NAME)? {
        match conn.composite_query_version(0, 4)?.reply() {
            Ok(v) => {
                ext.have_composite = true;
                ext.composite_version = (v.major_version, v.minor_version);
            }
            Err(e) => warn!("Composite version handshake failed: {}", e),
        }
    }

    if extension_present(conn, damage::X11_EXTENSION_NAME)? {
        match conn.damage_query_version(1, 1)?.reply() {
            Ok(v) => {
                ext.have_damage = true;
                ext.damage_version = (v.major_version, v.minor_version);
            }
            Err(e) => warn!("DAMAGE version handshake failed: {}", e),
        }
    }

    if extension_present(conn, xfixes::X11_EXTENSION_NAME)? {
        match conn.xfixes_query_version(5, 0)?.reply() {
            Ok(v) => {
                ext.have_fixes = true;
                ext.fixes_version = (v.major_version, v.minor_version);
            }
            Err(e) => warn!("XFIXES version handshake failed: {}", e),
        }
    }

    if extension_present(conn, shape::X11_EXTENSION_NAME)? {
        ext.have_shape = conn.shape_query_version()?.reply().is_ok();
    }

    if extension_present(conn, shm::X11_EXTENSION_NAME)? {
        ext.have_shm = conn.shm_query_version()?.reply().is_ok();
    }

    if extension_present(conn, xtest::X11_EXTENSION_NAME)? {
        ext.have_xtest = conn.xtest_get_version(2, 2)?.reply().is_ok();
    }

    if extension_present(conn, xkb::X11_EXTENSION_NAME)? {
        ext.have_xkb = conn
            .xkb_use_extension(1, 0)?
            .reply()
            .map(|r| r.supported)
            .unwrap_or(false);
    }

    debug!("X11 extensions: {:?}", ext);
    Ok(ext)
}

fn convert_event(event: Event) -> Option<ServerEvent> {
    let event = match event {
        Event::DamageNotify(e) => ServerEvent::Damage {
            drawable: e.drawable,
            area: rect(e.area),
        },
        Event::ShapeNotify(e) if e.shape_kind == shape::SK::BOUNDING => ServerEvent::Shape {
            window: e.affected_window,
            shaped: e.shaped,
        },
        Event::XfixesCursorNotify(_) => ServerEvent::Cursor,
        Event::CreateNotify(e) => ServerEvent::Create { window: e.window },
        Event::DestroyNotify(e) => ServerEvent::Destroy { window: e.window },
        Event::MapNotify(e) => ServerEvent::Map {
            window: e.window,
            override_redirect: e.override_redirect,
        },
        Event::MapRequest(e) => ServerEvent::MapRequest {
            window: e.window,
            parent: e.parent,
        },
        Event::UnmapNotify(e) => ServerEvent::Unmap {
            window: e.window,
            synthetic: e.response_type & 0x80 != 0,
        },
        Event::ConfigureNotify(e) => ServerEvent::Configure {
            window: e.window,
            rect: Rect::new(e.x.into(), e.y.into(), e.width.into(), e.height.into()),
        },
        Event::ConfigureRequest(e) => {
            let mask = u16::from(e.value_mask);
            let has = |flag: ConfigWindow| mask & u16::from(flag) != 0;
            ServerEvent::ConfigureRequest {
                window: e.window,
                changes: WindowChanges {
                    x: has(ConfigWindow::X).then_some(e.x.into()),
                    y: has(ConfigWindow::Y).then_some(e.y.into()),
                    width: has(ConfigWindow::WIDTH).then_some(e.width.into()),
                    height: has(ConfigWindow::HEIGHT).then_some(e.height.into()),
                    stack_mode: None,
                },
            }
        }
        Event::PropertyNotify(e) => ServerEvent::Property {
            window: e.window,
            atom: e.atom,
            deleted: e.state == xproto::Property::DELETE,
        },
        Event::ReparentNotify(e) => ServerEvent::Reparent {
            window: e.window,
            parent: e.parent,
            override_redirect: e.override_redirect,
        },
        Event::ClientMessage(e) => ServerEvent::ClientMessage {
            window: e.window,
            type_: e.type_,
            data: e.data.as_data32(),
        },
        Event::Error(e) => ServerEvent::Error(protocol_error(&e)),
        _ => return None,
    };
    Some(event)
}

impl DisplayServer for X11Server {
    fn screen(&self) -> ScreenInfo {
        self.screen
    }

    fn extensions(&self) -> Extensions {
        self.extensions
    }

    fn claim_root(&self) -> Result<(), ServerError> {
        let mask = EventMask::SUBSTRUCTURE_REDIRECT
            | EventMask::SUBSTRUCTURE_NOTIFY
            | EventMask::STRUCTURE_NOTIFY
            | EventMask::PROPERTY_CHANGE;
        self.conn
            .change_window_attributes(self.screen.root, &ChangeWindowAttributesAux::new().event_mask(mask))?
            .check()?;
        Ok(())
    }

    fn selection_owner(&self, selection: Atom) -> Result<Option<WindowId>, ServerError> {
        let owner = self.conn.get_selection_owner(selection)?.reply()?.owner;
        Ok((owner != x11rb::NONE).then_some(owner))
    }

    fn redirect_subwindows(&self) -> Result<(), ServerError> {
        if !self.extensions.have_composite {
            return Err(ServerError::MissingExtension("Composite"));
        }
        self.conn
            .composite_redirect_subwindows(self.screen.root, composite::Redirect::MANUAL)?
            .check()?;
        Ok(())
    }

    fn select_cursor_input(&self) -> Result<(), ServerError> {
        if !self.extensions.have_fixes {
            return Err(ServerError::MissingExtension("XFIXES"));
        }
        self.conn
            .xfixes_select_cursor_input(self.screen.root, xfixes::CursorNotifyMask::DISPLAY_CURSOR)?;
        Ok(())
    }

    fn select_window_input(&self, window: WindowId) -> Result<(), ServerError> {
        self.conn.change_window_attributes(
            window,
            &ChangeWindowAttributesAux::new().event_mask(EventMask::PROPERTY_CHANGE),
        )?;
        if self.extensions.have_shape {
            self.conn.shape_select_input(window, true)?;
        }
        Ok(())
    }

    fn attributes(&self, window: WindowId) -> Result<WindowAttributes, ServerError> {
        let reply = self.conn.get_window_attributes(window)?.reply()?;
        let map_state = if reply.map_state == xproto::MapState::VIEWABLE {
            MapState::Viewable
        } else if reply.map_state == xproto::MapState::UNVIEWABLE {
            MapState::Unviewable
        } else {
            MapState::Unmapped
        };
        Ok(WindowAttributes {
            override_redirect: reply.override_redirect,
            map_state,
        })
    }

    fn geometry(&self, window: WindowId) -> Result<Rect, ServerError> {
        let g = self.conn.get_geometry(window)?.reply()?;
        Ok(Rect::new(g.x.into(), g.y.into(), g.width.into(), g.height.into()))
    }

    fn children(&self, window: WindowId) -> Result<Vec<WindowId>, ServerError> {
        Ok(self.conn.query_tree(window)?.reply()?.children)
    }

    fn create_damage(&self, drawable: WindowId) -> Result<u32, ServerError> {
        if !self.extensions.have_damage {
            return Err(ServerError::MissingExtension("DAMAGE"));
        }
        let damage = self.conn.generate_id()?;
        self.conn
            .damage_create(damage, drawable, damage::ReportLevel::BOUNDING_BOX)?;
        Ok(damage)
    }

    fn destroy_damage(&self, damage: u32) -> Result<(), ServerError> {
        self.conn.damage_destroy(damage)?;
        Ok(())
    }

    fn subtract_damage(&self, damage: u32, area: Option<Rect>) -> Result<(), ServerError> {
        match area {
            Some(area) if self.extensions.have_fixes => {
                let region = self.region(area)?;
                self.conn.damage_subtract(damage, region, x11rb::NONE)?;
                self.conn.xfixes_destroy_region(region)?;
            }
            _ => {
                self.conn.damage_subtract(damage, x11rb::NONE, x11rb::NONE)?;
            }
        }
        Ok(())
    }

    fn add_damage(&self, drawable: WindowId, area: Rect) -> Result<(), ServerError> {
        if !self.extensions.have_fixes {
            return Err(ServerError::MissingExtension("XFIXES"));
        }
        let region = self.region(area)?;
        self.conn.damage_add(drawable, region)?;
        self.conn.xfixes_destroy_region(region)?;
        Ok(())
    }

    fn name_window_pixmap(&self, window: WindowId) -> Result<u32, ServerError> {
        if !self.extensions.have_name_window_pixmap() {
            return Err(ServerError::MissingExtension("Composite"));
        }
        let pixmap = self.conn.generate_id()?;
        self.conn.composite_name_window_pixmap(window, pixmap)?;
        Ok(pixmap)
    }

    fn free_pixmap(&self, pixmap: u32) -> Result<(), ServerError> {
        self.conn.free_pixmap(pixmap)?;
        Ok(())
    }

    fn attach_shm(&self, size: usize) -> Result<ShmSegment, ServerError> {
        if !self.extensions.have_shm {
            return Err(ServerError::MissingExtension("MIT-SHM"));
        }
        if size == 0 {
            return Err(ServerError::Shm(io::Error::new(
                io::ErrorKind::InvalidInput,
                "zero sized segment",
            )));
        }

        let seg = self.conn.generate_id()?;

        // SAFETY: plain SysV calls; the mapping is only read through
        // `get_image_shm` while it is registered in `segments`.
        let shmid = unsafe { libc::shmget(libc::IPC_PRIVATE, size, libc::IPC_CREAT | 0o600) };
        if shmid < 0 {
            return Err(ServerError::Shm(io::Error::last_os_error()));
        }

        let addr = unsafe { libc::shmat(shmid, std::ptr::null(), 0) };
        if addr as isize == -1 {
            let err = io::Error::last_os_error();
            unsafe { libc::shmctl(shmid, libc::IPC_RMID, std::ptr::null_mut()) };
            return Err(ServerError::Shm(err));
        }

        let attached = self
            .conn
            .shm_attach(seg, shmid as u32, false)
            .map_err(ServerError::from)
            .and_then(|cookie| cookie.check().map_err(ServerError::from));

        // The segment stays alive until both sides detach
        unsafe { libc::shmctl(shmid, libc::IPC_RMID, std::ptr::null_mut()) };

        if let Err(e) = attached {
            unsafe { libc::shmdt(addr) };
            return Err(e);
        }

        self.segments
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(seg, ShmMapping { addr: addr as usize, size });

        debug!("Attached shm segment {:#x} ({} bytes)", seg, size);
        Ok(ShmSegment { seg, size })
    }

    fn detach_shm(&self, segment: &ShmSegment) -> Result<(), ServerError> {
        let mapping = self
            .segments
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&segment.seg)
            .ok_or(ServerError::UnknownSegment(segment.seg))?;

        let result = self.conn.shm_detach(segment.seg).map(|_| ());
        unsafe { libc::shmdt(mapping.addr as *const libc::c_void) };
        result?;
        Ok(())
    }

    fn intern_atom(&self, name: &str) -> Result<Atom, ServerError> {
        Ok(self.conn.intern_atom(false, name.as_bytes())?.reply()?.atom)
    }

    fn get_property(&self, window: WindowId, property: Atom) -> Result<Option<Property>, ServerError> {
        let reply = self
            .conn
            .get_property(false, window, property, AtomEnum::ANY, 0, u32::MAX)?
            .reply()?;
        if reply.type_ == x11rb::NONE {
            return Ok(None);
        }
        Ok(Some(Property {
            type_: reply.type_,
            format: reply.format,
            value: reply.value,
        }))
    }

    fn set_property32(&self, window: WindowId, property: Atom, type_: Atom, data: &[u32]) -> Result<(), ServerError> {
        self.conn
            .change_property32(PropMode::REPLACE, window, property, type_, data)?;
        Ok(())
    }

    fn delete_property(&self, window: WindowId, property: Atom) -> Result<(), ServerError> {
        self.conn.delete_property(window, property)?;
        Ok(())
    }

    fn send_client_message(&self, window: WindowId, type_: Atom, data: [u32; 5]) -> Result<(), ServerError> {
        let event = ClientMessageEvent::new(32, window, type_, data);
        self.conn
            .send_event(false, window, EventMask::NO_EVENT, event)?;
        Ok(())
    }

    fn kill_client(&self, window: WindowId) -> Result<(), ServerError> {
        self.conn.kill_client(window)?;
        Ok(())
    }

    fn configure(&self, window: WindowId, changes: &WindowChanges) -> Result<(), ServerError> {
        let mut aux = ConfigureWindowAux::new();
        if let Some(x) = changes.x {
            aux = aux.x(x);
        }
        if let Some(y) = changes.y {
            aux = aux.y(y);
        }
        if let Some(width) = changes.width {
            aux = aux.width(width);
        }
        if let Some(height) = changes.height {
            aux = aux.height(height);
        }
        if let Some(mode) = changes.stack_mode {
            aux = aux.stack_mode(match mode {
                StackMode::Above => xproto::StackMode::ABOVE,
                StackMode::Below => xproto::StackMode::BELOW,
            });
        }
        self.conn.configure_window(window, &aux)?;
        Ok(())
    }

    fn map(&self, window: WindowId) -> Result<(), ServerError> {
        self.conn.map_window(window)?;
        Ok(())
    }

    fn unmap(&self, window: WindowId) -> Result<(), ServerError> {
        self.conn.unmap_window(window)?;
        Ok(())
    }

    fn set_input_focus(&self, window: WindowId) -> Result<(), ServerError> {
        self.conn
            .set_input_focus(InputFocus::POINTER_ROOT, window, x11rb::CURRENT_TIME)?;
        Ok(())
    }

    fn shape_rects(&self, window: WindowId) -> Result<Vec<Rect>, ServerError> {
        if !self.extensions.have_shape {
            return Ok(Vec::new());
        }
        let reply = self
            .conn
            .shape_get_rectangles(window, shape::SK::BOUNDING)?
            .reply()?;
        Ok(reply.rectangles.into_iter().map(rect).collect())
    }

    fn get_image(&self, drawable: WindowId, area: Rect) -> Result<ImageData, ServerError> {
        let r = rectangle(area);
        let reply = self
            .conn
            .get_image(ImageFormat::Z_PIXMAP, drawable, r.x, r.y, r.width, r.height, !0)?
            .reply()?;
        Ok(ImageData {
            depth: reply.depth,
            data: reply.data,
        })
    }

    fn get_image_shm(&self, drawable: WindowId, area: Rect, segment: &ShmSegment) -> Result<ImageData, ServerError> {
        let segments = self.segments.lock().unwrap_or_else(PoisonError::into_inner);
        let mapping = segments
            .get(&segment.seg)
            .copied()
            .ok_or(ServerError::UnknownSegment(segment.seg))?;

        let r = rectangle(area);
        let reply = self
            .conn
            .shm_get_image(
                drawable,
                r.x,
                r.y,
                r.width,
                r.height,
                !0,
                ImageFormat::Z_PIXMAP.into(),
                segment.seg,
                0,
            )?
            .reply()?;

        let len = (reply.size as usize).min(mapping.size);
        // SAFETY: the mapping is at least `mapping.size` bytes and stays
        // attached while `segments` is locked.
        let data = unsafe { std::slice::from_raw_parts(mapping.addr as *const u8, len) }.to_vec();

        Ok(ImageData {
            depth: reply.depth,
            data,
        })
    }

    fn fake_input(&self, input: FakeInput) -> Result<(), ServerError> {
        if !self.extensions.have_xtest {
            return Err(ServerError::MissingExtension("XTEST"));
        }
        let (type_, detail, root, x, y) = match input {
            FakeInput::Key { keycode, pressed } => {
                let type_ = if pressed { xproto::KEY_PRESS_EVENT } else { xproto::KEY_RELEASE_EVENT };
                (type_, keycode, x11rb::NONE, 0, 0)
            }
            FakeInput::Button { window, button, pressed } => {
                let type_ = if pressed { xproto::BUTTON_PRESS_EVENT } else { xproto::BUTTON_RELEASE_EVENT };
                (type_, button, window, 0, 0)
            }
            FakeInput::Motion { x, y } => (xproto::MOTION_NOTIFY_EVENT, 0, self.screen.root, x, y),
        };
        self.conn
            .xtest_fake_input(type_, detail, x11rb::CURRENT_TIME, root, x, y, 0)?;
        self.conn.flush()?;
        Ok(())
    }

    fn set_keyboard_mapping(&self, first_keycode: u8, keysyms_per_keycode: u8, keysyms: &[u32]) -> Result<(), ServerError> {
        let per = keysyms_per_keycode.max(1) as usize;
        let count = (keysyms.len() / per).min(u8::MAX as usize) as u8;
        self.conn
            .change_keyboard_mapping(count, first_keycode, keysyms_per_keycode, &keysyms[..count as usize * per])?;
        self.conn.flush()?;
        Ok(())
    }

    fn set_modifier_mapping(&self, keycodes: &[u8]) -> Result<bool, ServerError> {
        let reply = self.conn.set_modifier_mapping(keycodes)?.reply()?;
        Ok(reply.status == MappingStatus::SUCCESS)
    }

    fn flush(&self) -> Result<(), ServerError> {
        self.conn.flush()?;
        Ok(())
    }

    fn wait_for_event(&self, timeout: Duration) -> Result<Option<ServerEvent>, ServerError> {
        if let Some(event) = self.next_buffered()? {
            return Ok(Some(event));
        }

        self.conn.flush()?;

        match self.poller.wait(timeout) {
            Ok(Readiness::Readable) => self.next_buffered(),
            Ok(Readiness::Woken) | Ok(Readiness::TimedOut) => Ok(None),
            Err(e) => {
                warn!("X11 socket poll failed: {}", e);
                Ok(None)
            }
        }
    }

    fn wake(&self) {
        if let Err(e) = self.poller.wake() {
            warn!("Failed to wake event loop: {}", e);
        }
    }
}

impl Drop for X11Server {
    fn drop(&mut self) {
        let segments = self.segments.get_mut().unwrap_or_else(PoisonError::into_inner);
        for (seg, mapping) in segments.drain() {
            debug!("Detaching leftover shm segment {:#x}", seg);
            unsafe { libc::shmdt(mapping.addr as *const libc::c_void) };
        }
    }
}
