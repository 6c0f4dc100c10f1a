//! Window lifecycle
//!
//! Managing and forgetting windows, and the side effects of every state
//! transition. Locks are taken one at a time; no server round trip happens
//! while the registry is locked for writing.

use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::server::{MapState, WindowChanges, WindowId};
use crate::shared::Rect;
use crate::wm::context::Shared;
use crate::wm::events::{Event, EventKind};
use crate::wm::metadata::{self, Metadata};
use crate::wm::state::{self, Trigger, WindowState};
use crate::wm::window::WindowRecord;

impl Shared {
    /// Start managing `id` in `state`. Returns the creation event, or `None`
    /// when the window is already known or vanished meanwhile.
    pub(crate) fn manage(&self, id: WindowId, parent: WindowId, state: WindowState) -> Option<Event> {
        let _guard = self.lifecycle();

        if self.registry().contains(id) {
            debug!("Window {:#x} already managed", id);
            return None;
        }

        let attributes = match self.server.attributes(id) {
            Ok(attributes) => attributes,
            Err(e) => {
                debug!("Window {:#x} vanished before it could be managed: {}", id, e);
                return None;
            }
        };
        let bounds = match self.server.geometry(id) {
            Ok(bounds) => bounds,
            Err(e) => {
                debug!("No geometry for window {:#x}: {}", id, e);
                return None;
            }
        };

        if let Err(e) = self.server.select_window_input(id) {
            debug!("Failed to select input on window {:#x}: {}", id, e);
        }
        let damage = match self.server.create_damage(id) {
            Ok(damage) => Some(damage),
            Err(e) => {
                debug!("No damage object for window {:#x}: {}", id, e);
                None
            }
        };

        let mut record = WindowRecord::new(id, bounds, attributes.override_redirect, state);
        record.parent = Some(parent);
        record.mapped = state == WindowState::Normal;
        Metadata::fetch(self.server.as_ref(), &self.atoms, id).apply(&mut record);
        let snapshot = record.clone();

        if self.registry_mut().insert(record).is_err() {
            if let Some(damage) = damage {
                let _ = self.server.destroy_damage(damage);
            }
            return None;
        }
        self.damage().track(id, damage, true);

        if snapshot.mapped {
            self.resources().update(self.server.as_ref(), &self.screen, id, bounds);
        }
        if !snapshot.override_redirect {
            if let Err(e) = metadata::set_state(self.server.as_ref(), &self.atoms, &snapshot, self.root, state) {
                debug!("Failed to write state of window {:#x}: {}", id, e);
            }
        }

        info!(
            "Managing window {:#x} {:?} at {:?} ({:?}, \"{}\")",
            id, state, bounds, snapshot.window_type, snapshot.name
        );
        Some(self.event(EventKind::WindowCreate, id))
    }

    /// Release everything the window holds and drop its record
    pub(crate) fn forget(&self, id: WindowId) -> Option<WindowRecord> {
        let _guard = self.lifecycle();

        self.resources().release(self.server.as_ref(), id);
        let damage = self.damage().forget(id);
        if let Some(damage) = damage {
            if let Err(e) = self.server.destroy_damage(damage) {
                debug!("Failed to destroy damage object of window {:#x}: {}", id, e);
            }
        }

        let record = self.registry_mut().remove(id);
        if record.is_some() {
            debug!("Forgot window {:#x}", id);
        }
        record
    }

    /// Run one state transition with its side effects. `None` when the window
    /// is unknown or already in the target state.
    pub(crate) fn apply_transition(&self, id: WindowId, trigger: Trigger) -> Option<Event> {
        let _guard = self.lifecycle();

        let (from, bounds, was_mapped) = {
            let registry = self.registry();
            let record = registry.find(id)?;
            (record.state, record.bounds, record.mapped)
        };
        let transition = state::transition(from, trigger)?;

        if from == WindowState::Withdrawn {
            // Back from withdrawal: the first report may again be root-relative
            self.damage().restart(id);
        }

        let mapped = match trigger {
            Trigger::Mapped => {
                self.resources().update(self.server.as_ref(), &self.screen, id, bounds);
                true
            }
            Trigger::Deiconify => {
                if let Err(e) = self.server.map(id) {
                    warn!("Failed to map window {:#x}: {}", id, e);
                }
                self.resources().update(self.server.as_ref(), &self.screen, id, bounds);
                true
            }
            Trigger::Iconify => {
                if was_mapped {
                    // Counted before the request so the notification always finds it
                    self.adjust_pending_unmaps(id, 1);
                    if let Err(e) = self.server.unmap(id) {
                        warn!("Failed to unmap window {:#x}: {}", id, e);
                        self.adjust_pending_unmaps(id, -1);
                    }
                }
                self.resources().release(self.server.as_ref(), id);
                false
            }
            Trigger::Withdraw => {
                self.resources().release(self.server.as_ref(), id);
                false
            }
        };

        let snapshot = {
            let mut registry = self.registry_mut();
            let record = registry.find_mut(id)?;
            record.state = transition.to;
            record.mapped = mapped;
            record.clone()
        };

        if !snapshot.override_redirect {
            if let Err(e) = metadata::set_state(self.server.as_ref(), &self.atoms, &snapshot, self.root, transition.to) {
                debug!("Failed to write state of window {:#x}: {}", id, e);
            }
        }

        debug!("Window {:#x}: {:?} -> {:?}", id, from, transition.to);
        Some(self.event(transition.event, id))
    }

    fn adjust_pending_unmaps(&self, id: WindowId, delta: i32) {
        if let Some(record) = self.registry_mut().find_mut(id) {
            record.pending_unmaps = record.pending_unmaps.saturating_add_signed(delta);
        }
    }

    /// Transition requested by the caller; the event is delivered by the loop
    pub(crate) fn request_transition(&self, id: WindowId, trigger: Trigger) -> Result<()> {
        if !self.registry().contains(id) {
            return Err(Error::UnknownWindow(id));
        }
        if let Some(event) = self.apply_transition(id, trigger) {
            self.post(event);
        }
        Ok(())
    }

    /// Move and resize on behalf of the caller
    pub(crate) fn configure_window(&self, id: WindowId, rect: Rect) -> Result<()> {
        let old = self
            .registry()
            .find(id)
            .map(|r| r.bounds)
            .ok_or(Error::UnknownWindow(id))?;

        self.server.configure(id, &WindowChanges::geometry(rect))?;
        self.server.flush()?;

        if let Some(record) = self.registry_mut().find_mut(id) {
            record.bounds = rect;
        }
        if !old.same_size(&rect) {
            self.damage().resize(id, rect.width, rect.height);
        }
        Ok(())
    }

    /// Manage the root's existing children: viewable ones as NORMAL, unmapped
    /// ones a previous manager left iconic as ICONIC, the rest as WITHDRAWN.
    /// Withdrawn windows stay invisible to the caller until they are mapped.
    pub(crate) fn adopt_windows(&self) -> Vec<Event> {
        let children = match self.server.children(self.root) {
            Ok(children) => children,
            Err(e) => {
                warn!("Failed to list existing windows: {}", e);
                return Vec::new();
            }
        };

        children
            .into_iter()
            .filter_map(|id| {
                let attributes = self.server.attributes(id).ok()?;
                let state = if attributes.map_state == MapState::Viewable {
                    WindowState::Normal
                } else if metadata::fetch_wm_state(self.server.as_ref(), &self.atoms, id)
                    == Some(WindowState::Iconic)
                {
                    WindowState::Iconic
                } else {
                    WindowState::Withdrawn
                };
                let event = self.manage(id, self.root, state)?;
                (state != WindowState::Withdrawn).then_some(event)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::mock::{MockServer, ROOT};
    use crate::server::{DisplayServer, Property, ServerEvent};
    use crate::wm::context::tests::open;
    use std::time::Duration;

    #[test]
    fn test_adopt_viewable_and_iconic_children() {
        let server = MockServer::new(800, 600);
        server.add_window(100, Rect::new(0, 0, 100, 100), true);
        server.add_window(101, Rect::new(0, 0, 100, 100), false);
        server.add_window(102, Rect::new(0, 0, 100, 100), false);
        let wm_state = server.atom("WM_STATE");
        server.set_property(102, "WM_STATE", Property::new32(wm_state, &[3, 0]));

        let ctx = open(&server);
        let events = ctx.shared.adopt_windows();

        let ids: Vec<WindowId> = events.iter().map(|e| e.window().unwrap().id()).collect();
        assert_eq!(ids, vec![100, 102]);
        assert!(events.iter().all(|e| e.kind() == EventKind::WindowCreate));
        assert_eq!(ctx.window(100).unwrap().state(), Some(WindowState::Normal));
        assert_eq!(ctx.window(102).unwrap().state(), Some(WindowState::Iconic));
        assert_eq!(ctx.window(101).unwrap().state(), Some(WindowState::Withdrawn));

        // Only the mapped window holds composite resources
        assert!(ctx.shared.resources().has(100));
        assert!(!ctx.shared.resources().has(101));
        assert!(!ctx.shared.resources().has(102));
    }

    #[test]
    fn test_manage_twice_is_ignored() {
        let server = MockServer::new(800, 600);
        server.add_window(100, Rect::new(0, 0, 100, 100), true);
        let ctx = open(&server);

        assert!(ctx.shared.manage(100, ROOT, WindowState::Normal).is_some());
        assert!(ctx.shared.manage(100, ROOT, WindowState::Normal).is_none());
        assert_eq!(ctx.windows().len(), 1);
        assert_eq!(server.state().pixmaps_named, 1);
    }

    #[test]
    fn test_manage_vanished_window() {
        let server = MockServer::new(800, 600);
        let ctx = open(&server);
        assert!(ctx.shared.manage(0x777, ROOT, WindowState::Normal).is_none());
        assert!(ctx.windows().is_empty());
    }

    #[test]
    fn test_iconify_twice_has_one_effect() {
        let server = MockServer::new(800, 600);
        server.add_window(100, Rect::new(0, 0, 100, 100), true);
        let ctx = open(&server);
        ctx.shared.manage(100, ROOT, WindowState::Normal);

        let event = ctx.shared.apply_transition(100, Trigger::Iconify).unwrap();
        assert_eq!(event.kind(), EventKind::WindowState);
        assert!(ctx.shared.apply_transition(100, Trigger::Iconify).is_none());

        let state = server.state();
        assert_eq!(state.unmapped, vec![100]);
        assert!(state.live_pixmaps.is_empty());
        drop(state);

        let registry = ctx.shared.registry();
        let record = registry.find(100).unwrap();
        assert_eq!(record.state, WindowState::Iconic);
        assert_eq!(record.pending_unmaps, 1);
        assert!(!record.mapped);
    }

    #[test]
    fn test_deiconify_maps_and_reallocates() {
        let server = MockServer::new(800, 600);
        server.add_window(100, Rect::new(0, 0, 100, 100), true);
        let ctx = open(&server);
        ctx.shared.manage(100, ROOT, WindowState::Normal);
        ctx.shared.apply_transition(100, Trigger::Iconify);

        let event = ctx.shared.apply_transition(100, Trigger::Deiconify).unwrap();
        assert_eq!(event.kind(), EventKind::WindowState);
        assert!(ctx.shared.resources().has(100));

        let state = server.state();
        assert_eq!(state.mapped, vec![100]);
        assert_eq!(state.live_pixmaps.len(), 1);
        assert_eq!(state.live_segments.len(), 1);
    }

    #[test]
    fn test_leaving_withdrawn_is_a_creation() {
        let server = MockServer::new(800, 600);
        server.add_window(100, Rect::new(0, 0, 100, 100), true);
        let ctx = open(&server);
        ctx.shared.manage(100, ROOT, WindowState::Normal);

        let event = ctx.shared.apply_transition(100, Trigger::Withdraw).unwrap();
        assert_eq!(event.kind(), EventKind::WindowDestroy);
        assert!(!ctx.shared.resources().has(100));
        assert!(server.state().live_pixmaps.is_empty());
        assert!(server.state().live_segments.is_empty());

        let event = ctx.shared.apply_transition(100, Trigger::Mapped).unwrap();
        assert_eq!(event.kind(), EventKind::WindowCreate);
        assert_eq!(ctx.window(100).unwrap().state(), Some(WindowState::Normal));
        assert!(ctx.shared.resources().has(100));
        let state = server.state();
        assert_eq!(state.live_pixmaps.values().collect::<Vec<_>>(), vec![&100]);
        assert_eq!(state.live_segments.len(), 1);
    }

    #[test]
    fn test_leaving_withdrawn_expects_initial_damage() {
        let server = MockServer::new(800, 600);
        server.add_window(100, Rect::new(0, 0, 100, 100), true);
        let ctx = open(&server);
        ctx.shared.manage(100, ROOT, WindowState::Normal);
        let bounds = Rect::new(0, 0, 100, 100);
        ctx.shared.damage().note_damage(100, bounds, Rect::new(0, 0, 1, 1));
        ctx.shared.damage().reset(100);
        ctx.shared.damage().note_damage(100, bounds, Rect::new(0, 0, 10, 10));

        ctx.shared.apply_transition(100, Trigger::Withdraw);
        assert!(!ctx.shared.damage().is_initial(100));

        ctx.shared.apply_transition(100, Trigger::Mapped);
        assert!(ctx.shared.damage().is_initial(100));
        assert_eq!(ctx.shared.damage().consume(100), Some(Rect::EMPTY));
    }

    #[test]
    fn test_iconify_counts_unmap_before_issuing_it() {
        let server = MockServer::new(800, 600);
        server.add_window(100, Rect::new(0, 0, 100, 100), true);
        let ctx = open(&server);
        ctx.shared.manage(100, ROOT, WindowState::Normal);
        server.state().notify_unmaps = true;

        ctx.shared.apply_transition(100, Trigger::Iconify);
        assert_eq!(ctx.shared.registry().find(100).unwrap().pending_unmaps, 1);
        assert_eq!(
            server.wait_for_event(Duration::from_millis(50)).unwrap(),
            Some(ServerEvent::Unmap { window: 100, synthetic: false })
        );
    }

    #[test]
    fn test_configure_window_resets_damage_on_resize() {
        let server = MockServer::new(800, 600);
        server.add_window(100, Rect::new(0, 0, 100, 100), true);
        let ctx = open(&server);
        ctx.shared.manage(100, ROOT, WindowState::Normal);
        ctx.shared.damage().reset(100);

        ctx.shared.configure_window(100, Rect::new(5, 5, 100, 100)).unwrap();
        assert_eq!(ctx.shared.damage().consume(100), Some(Rect::EMPTY));

        ctx.shared.configure_window(100, Rect::new(5, 5, 200, 150)).unwrap();
        assert_eq!(ctx.shared.damage().consume(100), Some(Rect::new(0, 0, 200, 150)));
        assert_eq!(ctx.window(100).unwrap().bounds(), Some(Rect::new(5, 5, 200, 150)));
        assert_eq!(server.state().windows[&100].geometry, Rect::new(5, 5, 200, 150));
    }

    #[test]
    fn test_forget_releases_resources() {
        let server = MockServer::new(800, 600);
        server.add_window(100, Rect::new(0, 0, 100, 100), true);
        let ctx = open(&server);
        ctx.shared.manage(100, ROOT, WindowState::Normal);

        let record = ctx.shared.forget(100).unwrap();
        assert_eq!(record.id, 100);
        assert!(ctx.shared.forget(100).is_none());

        let state = server.state();
        assert!(state.live_pixmaps.is_empty());
        assert!(state.live_segments.is_empty());
        assert_eq!(state.damages.len(), 1);
    }

    #[test]
    fn test_request_transition_unknown_window() {
        let server = MockServer::new(800, 600);
        let ctx = open(&server);
        assert!(matches!(
            ctx.shared.request_transition(0x55, Trigger::Iconify),
            Err(Error::UnknownWindow(0x55))
        ));
    }
}
