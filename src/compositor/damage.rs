//! Damage tracking
//!
//! Per-window bounding box of pixels changed since the caller last redrew.
//! The tracker lives behind the context's damage mutex; the event loop writes
//! it and caller threads read and clear it.

use std::collections::HashMap;

use crate::server::WindowId;
use crate::shared::Rect;

#[derive(Debug, Clone, Copy, Default)]
struct DamageState {
    /// Server damage object, absent without the DAMAGE extension
    object: Option<u32>,
    rect: Rect,
    /// First report still pending; it may be in root coordinates
    initial: bool,
}

/// Result of folding one server report into the tracker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DamageOutcome {
    /// Report discarded, the whole window was marked. No event.
    Replaced { full: Rect },
    /// Damaged area grew to the contained rectangle
    Grew(Rect),
    /// Report already covered
    Unchanged,
    UnknownWindow,
}

#[derive(Debug, Default)]
pub struct DamageTracker {
    windows: HashMap<WindowId, DamageState>,
}

impl DamageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(&mut self, id: WindowId, object: Option<u32>, initial: bool) {
        self.windows.insert(
            id,
            DamageState {
                object,
                rect: Rect::EMPTY,
                initial,
            },
        );
    }

    /// Stop tracking, returning the damage object to destroy
    pub fn forget(&mut self, id: WindowId) -> Option<u32> {
        self.windows.remove(&id).and_then(|s| s.object)
    }

    pub fn object(&self, id: WindowId) -> Option<u32> {
        self.windows.get(&id).and_then(|s| s.object)
    }

    /// Fold a report for a window of the given size into its damaged area
    pub fn note_damage(&mut self, id: WindowId, bounds: Rect, reported: Rect) -> DamageOutcome {
        let Some(state) = self.windows.get_mut(&id) else {
            return DamageOutcome::UnknownWindow;
        };

        let full = Rect::sized(bounds.width, bounds.height);
        if state.initial || !full.contains(&reported) {
            state.rect = full;
            state.initial = false;
            return DamageOutcome::Replaced { full };
        }

        let merged = state.rect.union(&reported);
        if merged == state.rect {
            return DamageOutcome::Unchanged;
        }
        state.rect = merged;
        DamageOutcome::Grew(merged)
    }

    /// Current damaged rectangle
    pub fn consume(&self, id: WindowId) -> Option<Rect> {
        self.windows.get(&id).map(|s| s.rect)
    }

    pub fn reset(&mut self, id: WindowId) -> bool {
        match self.windows.get_mut(&id) {
            Some(state) => {
                state.rect = Rect::EMPTY;
                true
            }
            None => false,
        }
    }

    /// Empty the damaged area and expect a fresh initial report, as for a
    /// newly created window
    pub fn restart(&mut self, id: WindowId) {
        if let Some(state) = self.windows.get_mut(&id) {
            state.rect = Rect::EMPTY;
            state.initial = true;
        }
    }

    /// After a resize the whole new area needs redrawing
    pub fn resize(&mut self, id: WindowId, width: u32, height: u32) {
        if let Some(state) = self.windows.get_mut(&id) {
            state.rect = Rect::sized(width, height);
        }
    }

    pub fn is_initial(&self, id: WindowId) -> bool {
        self.windows.get(&id).is_some_and(|s| s.initial)
    }
}
