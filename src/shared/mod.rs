//! Shared primitives used by both the window-management and compositing halves.

pub mod rect;

pub use rect::Rect;
