//! Composite resources
//!
//! For every mapped window: a composite pixmap naming its off-screen contents
//! and, when shared memory is usable, a segment large enough for one full
//! window image. Resources are always released before being reallocated.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::server::{DisplayServer, ShmSegment, WindowId};
use crate::shared::Rect;
use crate::wm::display::ScreenInfo;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Resources {
    pub pixmap: Option<u32>,
    pub shm: Option<ShmSegment>,
}

#[derive(Debug, Default)]
pub struct ResourceManager {
    windows: HashMap<WindowId, Resources>,
    use_shm: bool,
}

impl ResourceManager {
    pub fn new(use_shm: bool) -> Self {
        Self {
            windows: HashMap::new(),
            use_shm,
        }
    }

    /// Drop whatever the window holds and allocate fresh resources for `bounds`
    pub fn update(&mut self, server: &dyn DisplayServer, screen: &ScreenInfo, id: WindowId, bounds: Rect) {
        self.release(server, id);

        let mut resources = Resources::default();

        match server.name_window_pixmap(id) {
            Ok(pixmap) => resources.pixmap = Some(pixmap),
            Err(e) => warn!("No composite pixmap for window {:#x}: {}", id, e),
        }

        if self.use_shm && !bounds.is_empty() {
            let size = screen.image_size(bounds.width, bounds.height);
            match server.attach_shm(size) {
                Ok(segment) => resources.shm = Some(segment),
                Err(e) => debug!("Window {:#x} falls back to socket captures: {}", id, e),
            }
        }

        debug!("Allocated resources for window {:#x}: {:?}", id, resources);
        self.windows.insert(id, resources);
    }

    /// Free the pixmap and segment. Safe to call on a window holding nothing.
    pub fn release(&mut self, server: &dyn DisplayServer, id: WindowId) {
        let Some(resources) = self.windows.remove(&id) else {
            return;
        };

        if let Some(pixmap) = resources.pixmap {
            if let Err(e) = server.free_pixmap(pixmap) {
                warn!("Failed to free pixmap {:#x} of window {:#x}: {}", pixmap, id, e);
            }
        }
        if let Some(segment) = resources.shm {
            if let Err(e) = server.detach_shm(&segment) {
                warn!("Failed to detach shm segment {:#x} of window {:#x}: {}", segment.seg, id, e);
            }
        }
        debug!("Released resources for window {:#x}", id);
    }

    pub fn get(&self, id: WindowId) -> Option<Resources> {
        self.windows.get(&id).copied()
    }

    pub fn has(&self, id: WindowId) -> bool {
        self.windows.contains_key(&id)
    }

    pub fn uses_shm(&self) -> bool {
        self.use_shm
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::mock::MockServer;

    #[test]
    fn test_update_releases_previous() {
        let server = MockServer::new(640, 480);
        let screen = server.screen();
        let mut manager = ResourceManager::new(true);

        for i in 0..5u32 {
            manager.update(server.as_ref(), &screen, 100, Rect::new(0, 0, 100 + i, 100));
        }
        {
            let state = server.state();
            assert_eq!(state.pixmaps_named, 5);
            assert_eq!(state.pixmaps_freed, 4);
            assert_eq!(state.live_pixmaps.len(), 1);
            assert_eq!(state.live_segments.len(), 1);
        }

        manager.release(server.as_ref(), 100);
        manager.release(server.as_ref(), 100);
        let state = server.state();
        assert_eq!(state.pixmaps_named, state.pixmaps_freed);
        assert_eq!(state.shm_attached, state.shm_detached);
        assert!(state.live_pixmaps.is_empty());
        assert!(!manager.has(100));
    }

    #[test]
    fn test_segment_sized_for_window() {
        let server = MockServer::new(640, 480);
        let screen = server.screen();
        let mut manager = ResourceManager::new(true);
        manager.update(server.as_ref(), &screen, 5, Rect::new(3, 4, 300, 200));
        assert_eq!(manager.get(5).unwrap().shm.unwrap().size, 300 * 200 * 4);
    }

    #[test]
    fn test_shm_failure_degrades() {
        let server = MockServer::new(640, 480);
        server.state().fail_shm = true;
        let screen = server.screen();
        let mut manager = ResourceManager::new(true);
        manager.update(server.as_ref(), &screen, 5, Rect::sized(10, 10));
        let resources = manager.get(5).unwrap();
        assert!(resources.pixmap.is_some());
        assert!(resources.shm.is_none());
    }

    #[test]
    fn test_shm_disabled() {
        let server = MockServer::new(640, 480);
        let screen = server.screen();
        let mut manager = ResourceManager::new(false);
        manager.update(server.as_ref(), &screen, 5, Rect::sized(10, 10));
        assert!(manager.get(5).unwrap().shm.is_none());
        assert_eq!(server.state().shm_attached, 0);
    }
}
