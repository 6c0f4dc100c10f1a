//! Window registry
//!
//! The single id → record map. Whether a window is managed is decided here and
//! nowhere else.

use std::collections::HashMap;

use tracing::debug;

use crate::error::{Error, Result};
use crate::server::WindowId;
use crate::wm::window::WindowRecord;

#[derive(Debug, Default)]
pub struct Registry {
    windows: HashMap<WindowId, WindowRecord>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a record. Fails without touching the existing one if the id is taken.
    pub fn insert(&mut self, record: WindowRecord) -> Result<WindowId> {
        let id = record.id;
        if self.windows.contains_key(&id) {
            debug!("Window {:#x} already registered, ignoring duplicate", id);
            return Err(Error::DuplicateWindow(id));
        }
        self.windows.insert(id, record);
        Ok(id)
    }

    pub fn remove(&mut self, id: WindowId) -> Option<WindowRecord> {
        self.windows.remove(&id)
    }

    pub fn find(&self, id: WindowId) -> Option<&WindowRecord> {
        self.windows.get(&id)
    }

    pub fn find_mut(&mut self, id: WindowId) -> Option<&mut WindowRecord> {
        self.windows.get_mut(&id)
    }

    pub fn contains(&self, id: WindowId) -> bool {
        self.windows.contains_key(&id)
    }

    pub fn ids(&self) -> Vec<WindowId> {
        let mut ids: Vec<WindowId> = self.windows.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::Rect;
    use crate::wm::state::WindowState;

    fn record(id: WindowId) -> WindowRecord {
        WindowRecord::new(id, Rect::new(0, 0, 10, 10), false, WindowState::Normal)
    }

    #[test]
    fn test_insert_duplicate_fails() {
        let mut registry = Registry::new();
        assert_eq!(registry.insert(record(100)).unwrap(), 100);

        let mut dup = record(100);
        dup.name = "second".to_string();
        assert!(matches!(registry.insert(dup), Err(Error::DuplicateWindow(100))));
        assert_eq!(registry.find(100).unwrap().name, "");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_remove_then_find() {
        let mut registry = Registry::new();
        registry.insert(record(7)).unwrap();
        assert!(registry.remove(7).is_some());
        assert!(registry.find(7).is_none());
        assert!(registry.remove(7).is_none());
        assert!(registry.insert(record(7)).is_ok());
    }

    #[test]
    fn test_ids_sorted() {
        let mut registry = Registry::new();
        for id in [30, 10, 20] {
            registry.insert(record(id)).unwrap();
        }
        assert_eq!(registry.ids(), vec![10, 20, 30]);
    }
}
