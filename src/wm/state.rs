//! Window lifecycle states
//!
//! The transition table is pure; `lifecycle` performs the side effects that go
//! with each transition.

use crate::wm::events::EventKind;

/// ICCCM lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WindowState {
    Withdrawn,
    Iconic,
    Normal,
}

impl WindowState {
    /// Value stored in the `WM_STATE` property
    pub fn icccm_value(self) -> u32 {
        match self {
            WindowState::Withdrawn => 0,
            WindowState::Normal => 1,
            WindowState::Iconic => 3,
        }
    }

    pub fn from_icccm(value: u32) -> Option<Self> {
        match value {
            0 => Some(WindowState::Withdrawn),
            1 => Some(WindowState::Normal),
            3 => Some(WindowState::Iconic),
            _ => None,
        }
    }
}

/// What asked for a state change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// The server reported or granted a map
    Mapped,
    /// Explicit request to show the window again
    Deiconify,
    /// Explicit request, or a client asking for the iconic state
    Iconify,
    /// The client unmapped the window itself
    Withdraw,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub to: WindowState,
    pub event: EventKind,
}

/// Resolve a trigger against the current state. `None` means the request is a
/// no-op (already in the target state) and must not have side effects.
pub fn transition(from: WindowState, trigger: Trigger) -> Option<Transition> {
    use WindowState::*;

    let to = match trigger {
        Trigger::Mapped | Trigger::Deiconify => Normal,
        Trigger::Iconify => Iconic,
        Trigger::Withdraw => Withdrawn,
    };

    if from == to {
        return None;
    }

    // Leaving WITHDRAWN makes the window visible to the caller again
    let event = match (from, to) {
        (Withdrawn, _) => EventKind::WindowCreate,
        (_, Withdrawn) => EventKind::WindowDestroy,
        _ => EventKind::WindowState,
    };

    Some(Transition { to, event })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_from_withdrawn_creates() {
        let t = transition(WindowState::Withdrawn, Trigger::Mapped).unwrap();
        assert_eq!(t.to, WindowState::Normal);
        assert_eq!(t.event, EventKind::WindowCreate);
    }

    #[test]
    fn test_iconify_and_deiconify_emit_state() {
        let t = transition(WindowState::Normal, Trigger::Iconify).unwrap();
        assert_eq!((t.to, t.event), (WindowState::Iconic, EventKind::WindowState));

        let t = transition(WindowState::Iconic, Trigger::Deiconify).unwrap();
        assert_eq!((t.to, t.event), (WindowState::Normal, EventKind::WindowState));
    }

    #[test]
    fn test_withdraw_emits_destroy() {
        for from in [WindowState::Normal, WindowState::Iconic] {
            let t = transition(from, Trigger::Withdraw).unwrap();
            assert_eq!((t.to, t.event), (WindowState::Withdrawn, EventKind::WindowDestroy));
        }
    }

    #[test]
    fn test_same_state_is_noop() {
        assert_eq!(transition(WindowState::Iconic, Trigger::Iconify), None);
        assert_eq!(transition(WindowState::Normal, Trigger::Mapped), None);
        assert_eq!(transition(WindowState::Normal, Trigger::Deiconify), None);
        assert_eq!(transition(WindowState::Withdrawn, Trigger::Withdraw), None);
    }

    #[test]
    fn test_icccm_values() {
        for state in [WindowState::Withdrawn, WindowState::Normal, WindowState::Iconic] {
            assert_eq!(WindowState::from_icccm(state.icccm_value()), Some(state));
        }
        assert_eq!(WindowState::from_icccm(2), None);
    }
}
