//! Window image capture
//!
//! Synchronous pixel reads from a window's composite pixmap. The shared-memory
//! segment is used when one is attached and large enough; any failure there
//! falls back to a plain GetImage over the socket.

use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::server::WindowId;
use crate::shared::Rect;
use crate::wm::context::Shared;

/// Captured pixels in the screen's native ZPixmap format
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    /// Origin of the captured area, relative to the window
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
    pub depth: u8,
    pub data: Vec<u8>,
    /// Read through shared memory rather than the socket
    pub via_shm: bool,
}

impl Image {
    pub fn rect(&self) -> Rect {
        Rect::new(self.x, self.y, self.width, self.height)
    }

    /// Release the pixel buffer
    pub fn destroy(self) {}
}

pub(crate) fn capture_full(shared: &Shared, id: WindowId) -> Result<Option<Image>> {
    let geometry = shared.server.geometry(id)?;
    capture_rect(shared, id, Rect::sized(geometry.width, geometry.height))
}

pub(crate) fn capture_damaged(shared: &Shared, id: WindowId) -> Result<Option<Image>> {
    let damaged = shared
        .damage()
        .consume(id)
        .ok_or(Error::UnknownWindow(id))?;
    if damaged.is_empty() {
        return Ok(None);
    }
    capture_rect(shared, id, damaged)
}

pub(crate) fn capture_rect(shared: &Shared, id: WindowId, rect: Rect) -> Result<Option<Image>> {
    if rect.is_empty() {
        return Ok(None);
    }

    // Held for the whole read so the pixmap and segment cannot be released underneath us
    let resources = shared.resources();
    let held = resources.get(id).unwrap_or_default();
    let drawable = held.pixmap.unwrap_or(id);

    if let Some(segment) = held.shm {
        if segment.size >= shared.screen.image_size(rect.width, rect.height) {
            match shared.server.get_image_shm(drawable, rect, &segment) {
                Ok(image) => {
                    trace!("Captured {:?} of window {:#x} through shm", rect, id);
                    return Ok(Some(Image {
                        x: rect.x,
                        y: rect.y,
                        width: rect.width,
                        height: rect.height,
                        depth: image.depth,
                        data: image.data,
                        via_shm: true,
                    }));
                }
                Err(e) => debug!("Shm capture of window {:#x} failed, using socket: {}", id, e),
            }
        }
    }

    let image = shared.server.get_image(drawable, rect)?;
    Ok(Some(Image {
        x: rect.x,
        y: rect.y,
        width: rect.width,
        height: rect.height,
        depth: image.depth,
        data: image.data,
        via_shm: false,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Flags, Settings};
    use crate::server::mock::{MockServer, ROOT};
    use crate::wm::context::tests::{open, settings};
    use crate::wm::context::Context;
    use crate::wm::state::WindowState;

    const BOUNDS: Rect = Rect { x: 10, y: 20, width: 300, height: 200 };

    #[test]
    fn test_capture_full_through_shm() {
        let server = MockServer::new(800, 600);
        server.add_window(100, BOUNDS, true);
        let ctx = open(&server);
        ctx.shared.manage(100, ROOT, WindowState::Normal);

        let image = ctx.window(100).unwrap().capture_full().unwrap().unwrap();
        assert_eq!(image.rect(), Rect::new(0, 0, 300, 200));
        assert!(image.via_shm);
        assert_eq!(image.data.len(), 300 * 200 * 4);
        assert!(image.data.iter().all(|&b| b == 0xcd));
        assert_eq!(server.state().shm_reads, 1);
        image.destroy();
    }

    #[test]
    fn test_oversized_rect_falls_back_to_socket() {
        let server = MockServer::new(800, 600);
        server.add_window(100, BOUNDS, true);
        let ctx = open(&server);
        ctx.shared.manage(100, ROOT, WindowState::Normal);

        let image = capture_rect(&ctx.shared, 100, Rect::new(0, 0, 600, 400)).unwrap().unwrap();
        assert!(!image.via_shm);
        assert_eq!(server.state().socket_reads, 1);
    }

    #[test]
    fn test_disabled_shm_reads_over_socket() {
        let server = MockServer::new(800, 600);
        server.add_window(100, BOUNDS, true);
        let ctx = Context::with_server(
            server.clone(),
            Settings {
                flags: Flags::DISABLE_SHM,
                ..settings()
            },
        )
        .unwrap();
        ctx.shared.manage(100, ROOT, WindowState::Normal);

        let image = ctx.window(100).unwrap().capture_rect(Rect::new(1, 2, 3, 4)).unwrap().unwrap();
        assert_eq!(image.rect(), Rect::new(1, 2, 3, 4));
        assert!(!image.via_shm);
        assert_eq!(server.state().shm_attached, 0);
    }

    #[test]
    fn test_empty_rect_is_nothing() {
        let server = MockServer::new(800, 600);
        server.add_window(100, BOUNDS, true);
        let ctx = open(&server);
        ctx.shared.manage(100, ROOT, WindowState::Normal);

        assert!(capture_rect(&ctx.shared, 100, Rect::new(5, 5, 0, 10)).unwrap().is_none());
        assert!(capture_damaged(&ctx.shared, 100).unwrap().is_none());

        ctx.shared.damage().note_damage(100, BOUNDS, Rect::new(0, 0, 1, 1));
        let image = capture_damaged(&ctx.shared, 100).unwrap().unwrap();
        assert_eq!(image.rect(), Rect::new(0, 0, 300, 200));

        let state = server.state();
        assert_eq!(state.socket_reads + state.shm_reads, 1);
    }

    #[test]
    fn test_unmanaged_window() {
        let server = MockServer::new(800, 600);
        let ctx = open(&server);
        let window = ctx.root();
        ctx.shared.forget(ROOT);
        assert!(matches!(window.capture_full(), Err(Error::UnknownWindow(ROOT))));
    }
}
