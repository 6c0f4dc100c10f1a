//! Window Manager Module
//!
//! Registry, lifecycle, metadata and the event loop that keeps them in sync
//! with the display server.

pub mod context;
pub mod display;
pub mod events;
pub(crate) mod event_loop;
pub mod ewmh;
pub mod hints;
mod lifecycle;
pub mod metadata;
pub mod registry;
pub mod state;
pub(crate) mod terminate;
pub mod window;

pub use ewmh::Atoms;
