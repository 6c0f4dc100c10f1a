//! Event loop
//!
//! Runs on its own thread: adopts existing windows, then translates server
//! notifications into registry updates and caller events until the context
//! shuts down or the connection is lost.

use std::collections::HashMap;
use std::ops::ControlFlow;
use std::sync::Arc;

use tracing::{debug, error, info, trace, warn};

use crate::compositor::damage::DamageOutcome;
use crate::server::{Atom, MapState, ProtocolError, ServerEvent, WindowChanges, WindowId};
use crate::shared::Rect;
use crate::wm::context::Shared;
use crate::wm::events::{Event, EventKind, EventSink};
use crate::wm::metadata::{self, MetadataUpdate, PropertyKind};
use crate::wm::state::{Trigger, WindowState};

/// `WM_CHANGE_STATE` payloads
const CHANGE_STATE_NORMAL: u32 = 1;
const CHANGE_STATE_ICONIC: u32 = 3;

pub(crate) struct EventLoop {
    shared: Arc<Shared>,
    sink: EventSink,
    /// Protocol errors seen per resource id
    errors: HashMap<u32, u32>,
}

impl EventLoop {
    pub(crate) fn new(shared: Arc<Shared>, sink: EventSink) -> Self {
        Self {
            shared,
            sink,
            errors: HashMap::new(),
        }
    }

    fn shutting_down(&self) -> bool {
        self.shared.shutting_down()
    }

    fn emit(&mut self, event: Event) {
        self.sink.emit(event);
    }

    fn emit_for(&mut self, kind: EventKind, window: WindowId) {
        let event = self.shared.event(kind, window);
        self.emit(event);
    }

    fn emit_opt(&mut self, event: Option<Event>) {
        if let Some(event) = event {
            self.emit(event);
        }
    }

    pub(crate) fn run(mut self) {
        info!("Event loop started");

        for event in self.shared.adopt_windows() {
            self.emit(event);
        }

        loop {
            if self.shutting_down() {
                break;
            }

            for event in self.shared.take_outbox() {
                self.emit(event);
            }

            match self.shared.server.wait_for_event(self.shared.settings.poll_interval) {
                Ok(Some(event)) => {
                    if self.shared.verbose() {
                        debug!("Server event: {:?}", event);
                    } else {
                        trace!("Server event: {:?}", event);
                    }
                    if self.dispatch(event).is_break() {
                        break;
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    if !self.shutting_down() {
                        error!("Display connection lost: {}", e);
                        self.emit(Event::global(EventKind::Exit));
                    }
                    break;
                }
            }
        }

        info!("Event loop stopped");
    }

    fn dispatch(&mut self, event: ServerEvent) -> ControlFlow<()> {
        match event {
            ServerEvent::Damage { drawable, area } => self.on_damage(drawable, area),
            ServerEvent::Shape { window, shaped } => self.on_shape(window, shaped),
            ServerEvent::Cursor => self.emit(Event::global(EventKind::Cursor)),
            ServerEvent::Create { window } => trace!("Window {:#x} created", window),
            ServerEvent::Destroy { window } => self.on_destroy(window),
            ServerEvent::Map { window, .. } => self.on_map(window),
            ServerEvent::MapRequest { window, parent } => self.on_map_request(window, parent),
            ServerEvent::Unmap { window, synthetic } => self.on_unmap(window, synthetic),
            ServerEvent::Configure { window, rect } => self.on_configure(window, rect),
            ServerEvent::ConfigureRequest { window, changes } => self.on_configure_request(window, changes),
            ServerEvent::Property { window, atom, deleted } => self.on_property(window, atom, deleted),
            ServerEvent::Reparent { window, parent, .. } => self.on_reparent(window, parent),
            ServerEvent::ClientMessage { window, type_, data } => self.on_client_message(window, type_, data),
            ServerEvent::Error(err) => return self.on_error(err),
        }
        ControlFlow::Continue(())
    }

    fn on_damage(&mut self, window: WindowId, area: Rect) {
        let Some(bounds) = self.shared.registry().find(window).map(|r| r.bounds) else {
            trace!("Damage on unmanaged drawable {:#x}", window);
            return;
        };

        let (outcome, object) = {
            let mut damage = self.shared.damage();
            (damage.note_damage(window, bounds, area), damage.object(window))
        };

        match outcome {
            DamageOutcome::Replaced { full } => {
                // The repost arrives as a regular report for the whole window
                self.subtract_damage(window, object, Some(area));
                if let Err(e) = self.shared.server.add_damage(window, full) {
                    debug!("Failed to repost damage of window {:#x}: {}", window, e);
                }
            }
            DamageOutcome::Grew(_) => {
                self.subtract_damage(window, object, None);
                self.emit_for(EventKind::WindowDamage, window);
            }
            DamageOutcome::Unchanged => self.subtract_damage(window, object, None),
            DamageOutcome::UnknownWindow => {}
        }
    }

    /// Acknowledge a report so the server sends the next one
    fn subtract_damage(&self, window: WindowId, object: Option<u32>, area: Option<Rect>) {
        let Some(object) = object else {
            return;
        };
        if let Err(e) = self.shared.server.subtract_damage(object, area) {
            debug!("Failed to subtract damage of window {:#x}: {}", window, e);
        }
    }

    fn on_shape(&mut self, window: WindowId, shaped: bool) {
        let Some(bounds) = self.shared.registry().find(window).map(|r| r.bounds) else {
            return;
        };

        let rects = if shaped {
            match self.shared.server.shape_rects(window) {
                Ok(rects) => Some(rects),
                Err(e) => {
                    debug!("Failed to read shape of window {:#x}: {}", window, e);
                    None
                }
            }
        } else {
            None
        };
        let full = Rect::sized(bounds.width, bounds.height);
        let shape = rects.filter(|rects| !(rects.len() == 1 && rects[0] == full));

        if let Some(record) = self.shared.registry_mut().find_mut(window) {
            record.shape = shape;
        }
        self.emit_for(EventKind::WindowShape, window);
    }

    fn on_destroy(&mut self, window: WindowId) {
        if let Some(record) = self.shared.forget(window) {
            info!("Window {:#x} destroyed", window);
            if record.state != WindowState::Withdrawn {
                self.emit_for(EventKind::WindowDestroy, window);
            }
        }
    }

    fn on_map(&mut self, window: WindowId) {
        let known = self
            .shared
            .registry()
            .find(window)
            .map(|r| (r.state, r.mapped, r.bounds));

        match known {
            None => {
                let event = self.shared.manage(window, self.shared.root, WindowState::Normal);
                self.emit_opt(event);
            }
            Some((WindowState::Normal, mapped, bounds)) => {
                // Already NORMAL: the map we asked for went through
                if !mapped || !self.shared.resources().has(window) {
                    self.shared
                        .resources()
                        .update(self.shared.server.as_ref(), &self.shared.screen, window, bounds);
                    if let Some(record) = self.shared.registry_mut().find_mut(window) {
                        record.mapped = true;
                    }
                }
            }
            Some(_) => {
                let event = self.shared.apply_transition(window, Trigger::Mapped);
                self.emit_opt(event);
            }
        }
    }

    fn on_map_request(&mut self, window: WindowId, parent: WindowId) {
        let shared = &self.shared;
        let initial_iconic = || metadata::fetch_initial_iconic(shared.server.as_ref(), &shared.atoms, window);

        let known = shared.registry().find(window).map(|r| r.state);
        if let Some(state) = known {
            let trigger = if state == WindowState::Withdrawn && initial_iconic() {
                Trigger::Iconify
            } else {
                Trigger::Deiconify
            };
            let event = shared.apply_transition(window, trigger);
            self.emit_opt(event);
            return;
        }

        let state = if initial_iconic() {
            debug!("Window {:#x} starts iconic", window);
            WindowState::Iconic
        } else {
            if let Err(e) = shared.server.map(window) {
                warn!("Failed to map window {:#x}: {}", window, e);
                return;
            }
            WindowState::Normal
        };

        let event = shared.manage(window, parent, state);
        self.emit_opt(event);
    }

    fn on_unmap(&mut self, window: WindowId, synthetic: bool) {
        let ours = {
            // Wait for an iconify in flight to record its unmap
            let _guard = self.shared.lifecycle();
            let mut registry = self.shared.registry_mut();
            let Some(record) = registry.find_mut(window) else {
                return;
            };
            if !synthetic && record.pending_unmaps > 0 {
                record.pending_unmaps -= 1;
                true
            } else {
                false
            }
        };

        if ours {
            trace!("Unmap of window {:#x} was requested by us", window);
            return;
        }

        let event = self.shared.apply_transition(window, Trigger::Withdraw);
        self.emit_opt(event);
    }

    fn on_configure(&mut self, window: WindowId, rect: Rect) {
        let (resized, mapped) = {
            let mut registry = self.shared.registry_mut();
            let Some(record) = registry.find_mut(window) else {
                return;
            };
            if record.notified_bounds == rect {
                return;
            }
            let resized = !record.notified_bounds.same_size(&rect);
            record.notified_bounds = rect;
            record.bounds = rect;
            (resized, record.mapped)
        };

        if resized {
            self.shared.damage().resize(window, rect.width, rect.height);
            if mapped {
                self.shared
                    .resources()
                    .update(self.shared.server.as_ref(), &self.shared.screen, window, rect);
            }
        }
        self.emit_for(EventKind::WindowConfigure, window);
    }

    fn on_configure_request(&mut self, window: WindowId, changes: WindowChanges) {
        // Stacking is left to the caller
        let changes = WindowChanges {
            stack_mode: None,
            ..changes
        };

        if let Err(e) = self.shared.server.configure(window, &changes) {
            warn!("Failed to configure window {:#x}: {}", window, e);
            return;
        }
        if let Err(e) = self.shared.server.flush() {
            debug!("Failed to flush configure of window {:#x}: {}", window, e);
        }

        let resized = {
            let mut registry = self.shared.registry_mut();
            let Some(record) = registry.find_mut(window) else {
                return;
            };
            let old = record.bounds;
            let b = &mut record.bounds;
            b.x = changes.x.unwrap_or(b.x);
            b.y = changes.y.unwrap_or(b.y);
            b.width = changes.width.unwrap_or(b.width);
            b.height = changes.height.unwrap_or(b.height);
            (!old.same_size(b)).then_some(*b)
        };
        if let Some(bounds) = resized {
            self.shared.damage().resize(window, bounds.width, bounds.height);
        }
    }

    fn on_property(&mut self, window: WindowId, atom: Atom, deleted: bool) {
        let shared = &self.shared;
        let kind = metadata::classify(&shared.atoms, atom);
        if kind == PropertyKind::Other || !shared.registry().contains(window) {
            return;
        }
        trace!("Window {:#x} property {} {}", window, atom, if deleted { "deleted" } else { "changed" });

        let Some(update) = MetadataUpdate::fetch(shared.server.as_ref(), &shared.atoms, window, kind) else {
            return;
        };
        let kind = shared
            .registry_mut()
            .find_mut(window)
            .and_then(|record| update.apply(record));

        if let Some(kind) = kind {
            self.emit_for(kind, window);
        }
    }

    fn on_client_message(&mut self, window: WindowId, type_: Atom, data: [u32; 5]) {
        if type_ != self.shared.atoms.wm_change_state {
            return;
        }
        let trigger = match data[0] {
            CHANGE_STATE_ICONIC => Trigger::Iconify,
            CHANGE_STATE_NORMAL => Trigger::Deiconify,
            other => {
                debug!("Ignoring WM_CHANGE_STATE {} for window {:#x}", other, window);
                return;
            }
        };
        let event = self.shared.apply_transition(window, trigger);
        self.emit_opt(event);
    }

    fn on_reparent(&mut self, window: WindowId, parent: WindowId) {
        let known = self.shared.registry().contains(window);

        if parent == self.shared.root {
            if known {
                return;
            }
            let viewable = self
                .shared
                .server
                .attributes(window)
                .is_ok_and(|a| a.map_state == MapState::Viewable);
            if viewable {
                let event = self.shared.manage(window, parent, WindowState::Normal);
                self.emit_opt(event);
            }
        } else if known {
            debug!("Window {:#x} reparented away from the root", window);
            self.on_destroy(window);
        }
    }

    fn on_error(&mut self, err: ProtocolError) -> ControlFlow<()> {
        warn!(
            code = err.code,
            resource = err.resource,
            major = err.major_opcode,
            minor = err.minor_opcode,
            "X error: {}",
            err
        );

        let limit = self.shared.settings.max_errors_per_resource;
        if limit == 0 {
            return ControlFlow::Continue(());
        }

        let count = self.errors.entry(err.resource).or_insert(0);
        *count += 1;
        if *count >= limit {
            error!("Resource {:#x} caused {} errors, stopping", err.resource, count);
            self.emit(Event::global(EventKind::Exit));
            return ControlFlow::Break(());
        }
        ControlFlow::Continue(())
    }
}
