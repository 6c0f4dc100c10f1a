//! Area Rootless
//!
//! Window-management core for rootless X11 display bridges: claims the root
//! window, tracks every top-level window with its metadata, lifecycle state
//! and damaged area, and captures window contents on demand.

pub mod compositor;
pub mod config;
pub mod error;
pub mod input;
pub mod server;
pub mod shared;
pub mod wm;
pub(crate) mod x11_async;

pub use compositor::capture::Image;
pub use config::{Config, Flags, Settings};
pub use error::{Error, Result, ServerError};
pub use input::InputManager;
pub use shared::Rect;
pub use wm::context::Context;
pub use wm::events::{Event, EventKind, EventReceiver};
pub use wm::hints::SizeHints;
pub use wm::state::WindowState;
pub use wm::window::{LocalData, Window, WindowType};
