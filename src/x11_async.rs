//! X11 connection readiness
//!
//! Waits for the X11 file descriptor to become readable using mio, with a
//! waker so another thread can interrupt the wait (used to stop the event loop).

use std::io;
use std::os::unix::io::RawFd;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token, Waker};

const X11_TOKEN: Token = Token(0);
const WAKE_TOKEN: Token = Token(1);

/// Outcome of one wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Readable,
    Woken,
    TimedOut,
}

/// mio poll over the X11 socket plus a cross-thread waker
pub struct FdPoller {
    poll: Mutex<(Poll, Events)>,
    waker: Waker,
}

impl FdPoller {
    pub fn new(fd: RawFd) -> io::Result<Self> {
        let poll = Poll::new()?;
        poll.registry()
            .register(&mut SourceFd(&fd), X11_TOKEN, Interest::READABLE)?;
        let waker = Waker::new(poll.registry(), WAKE_TOKEN)?;

        Ok(Self {
            poll: Mutex::new((poll, Events::with_capacity(4))),
            waker,
        })
    }

    /// Block until the socket is readable, the waker fires, or `timeout` passes
    pub fn wait(&self, timeout: Duration) -> io::Result<Readiness> {
        let mut guard = self.poll.lock().unwrap_or_else(PoisonError::into_inner);
        let (poll, events) = &mut *guard;

        match poll.poll(events, Some(timeout)) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::Interrupted => return Ok(Readiness::TimedOut),
            Err(err) => return Err(err),
        }

        let mut readiness = Readiness::TimedOut;
        for event in events.iter() {
            match event.token() {
                WAKE_TOKEN => return Ok(Readiness::Woken),
                X11_TOKEN => readiness = Readiness::Readable,
                _ => {}
            }
        }
        Ok(readiness)
    }

    pub fn wake(&self) -> io::Result<()> {
        self.waker.wake()
    }
}
