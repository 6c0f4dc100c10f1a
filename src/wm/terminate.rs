//! Terminate Module
//!
//! Polite close requests through `WM_DELETE_WINDOW`, falling back to killing
//! the client connection.

use tracing::debug;

use crate::error::{Error, Result};
use crate::server::WindowId;
use crate::wm::context::Shared;

/// Ask the client owning `id` to close it
pub(crate) fn request_close(shared: &Shared, id: WindowId) -> Result<()> {
    let delete_supported = shared
        .registry()
        .find(id)
        .map(|r| r.delete_supported)
        .ok_or(Error::UnknownWindow(id))?;

    if delete_supported {
        debug!("Sending WM_DELETE_WINDOW to window {:#x}", id);
        let atoms = &shared.atoms;
        shared.server.send_client_message(
            id,
            atoms.wm_protocols,
            [atoms.wm_delete_window, 0, 0, 0, 0],
        )?;
    } else {
        debug!("Window {:#x} does not support WM_DELETE_WINDOW, killing client", id);
        shared.server.kill_client(id)?;
    }

    shared.server.flush()?;
    Ok(())
}
