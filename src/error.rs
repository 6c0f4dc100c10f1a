//! Error types
//!
//! `ServerError` covers failures reported by the display server backend,
//! `Error` is what the public API returns.

use thiserror::Error;

use crate::server::{ProtocolError, WindowId};

/// Failure talking to the display server
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to connect to display: {0}")]
    Connect(String),

    #[error("display connection lost: {0}")]
    Disconnected(String),

    #[error("{0}")]
    Protocol(ProtocolError),

    #[error("server resource ids exhausted")]
    IdsExhausted,

    #[error("extension {0} is not available")]
    MissingExtension(&'static str),

    #[error("shared memory segment: {0}")]
    Shm(#[source] std::io::Error),

    #[error("unknown shared memory segment {0:#x}")]
    UnknownSegment(u32),
}

/// Errors returned by the public API
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Server(#[from] ServerError),

    #[error("another window manager is already running on this display")]
    AnotherWindowManager(#[source] ServerError),

    #[error("a compositing manager already owns the display (selection owner {0:#x})")]
    CompositingManagerRunning(WindowId),

    #[error("window {0:#x} is already managed")]
    DuplicateWindow(WindowId),

    #[error("window {0:#x} is not managed")]
    UnknownWindow(WindowId),

    #[error("event loop already started")]
    LoopAlreadyStarted,

    #[error("context is closed")]
    Closed,

    #[error("failed to spawn event loop thread")]
    Spawn(#[source] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
