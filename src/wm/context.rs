//! Context
//!
//! One context per display connection. All state lives in `Shared`, owned by
//! the context and borrowed by the event-loop thread; window handles only
//! hold weak references to it.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{
    Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak,
};
use std::thread::{self, JoinHandle};

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::compositor::damage::DamageTracker;
use crate::compositor::resources::ResourceManager;
use crate::config::{Config, Flags, Settings};
use crate::error::{Error, Result, ServerError};
use crate::input::InputManager;
use crate::server::{DisplayServer, WindowId, X11Server};
use crate::shared::Rect;
use crate::wm::display::{Extensions, ScreenInfo};
use crate::wm::event_loop::EventLoop;
use crate::wm::events::{Event, EventKind, EventReceiver, EventSink};
use crate::wm::ewmh::Atoms;
use crate::wm::registry::Registry;
use crate::wm::state::WindowState;
use crate::wm::terminate;
use crate::wm::window::{Window, WindowRecord};

/// State of one open display, shared between the caller and the event loop
pub(crate) struct Shared {
    me: Weak<Shared>,
    pub(crate) server: Arc<dyn DisplayServer>,
    pub(crate) screen: ScreenInfo,
    pub(crate) extensions: Extensions,
    pub(crate) atoms: Atoms,
    pub(crate) settings: Settings,
    pub(crate) root: WindowId,
    registry: RwLock<Registry>,
    damage: Mutex<DamageTracker>,
    resources: Mutex<ResourceManager>,
    /// Serializes state transitions requested from several threads
    lifecycle: Mutex<()>,
    /// Events produced on caller threads, emitted by the loop in order
    outbox: Mutex<VecDeque<Event>>,
    /// Raised once when the context shuts down
    shutdown: watch::Sender<bool>,
    closed: AtomicBool,
}

impl Shared {
    pub(crate) fn registry(&self) -> RwLockReadGuard<'_, Registry> {
        self.registry.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn registry_mut(&self) -> RwLockWriteGuard<'_, Registry> {
        self.registry.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// The context's damage lock. Every read-modify-write of a damaged
    /// rectangle happens under this guard.
    pub(crate) fn damage(&self) -> MutexGuard<'_, DamageTracker> {
        self.damage.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn resources(&self) -> MutexGuard<'_, ResourceManager> {
        self.resources.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn lifecycle(&self) -> MutexGuard<'_, ()> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn handle(&self, id: WindowId) -> Window {
        Window::new(id, self.me.clone())
    }

    pub(crate) fn event(&self, kind: EventKind, id: WindowId) -> Event {
        Event::new(kind, self.handle(id))
    }

    pub(crate) fn verbose(&self) -> bool {
        self.settings.flags.contains(Flags::VERBOSE_EVENTS)
    }

    /// Queue an event for the loop thread and wake it
    pub(crate) fn post(&self, event: Event) {
        self.outbox
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(event);
        self.server.wake();
    }

    pub(crate) fn shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    pub(crate) fn take_outbox(&self) -> Vec<Event> {
        self.outbox
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect()
    }
}

/// An open display with window management claimed
pub struct Context {
    pub(crate) shared: Arc<Shared>,
    event_thread: Mutex<Option<JoinHandle<()>>>,
}

impl Context {
    /// Connect to `display` (`$DISPLAY` when `None`) and take over window management
    pub fn open(display: Option<&str>, flags: Flags) -> Result<Self> {
        let server = X11Server::connect(display)?;
        Self::with_server(Arc::new(server), Settings::with_flags(flags))
    }

    /// Open using every knob of a loaded configuration
    pub fn open_with_config(config: &Config) -> Result<Self> {
        let server = X11Server::connect(config.display.name.as_deref())?;
        Self::with_server(Arc::new(server), config.settings())
    }

    /// Take over window management through any display server backend
    pub fn with_server(server: Arc<dyn DisplayServer>, settings: Settings) -> Result<Self> {
        let screen = server.screen();
        let extensions = server.extensions();
        let root = screen.root;

        server.claim_root().map_err(|e| match e {
            ServerError::Protocol(_) => Error::AnotherWindowManager(e),
            other => Error::Server(other),
        })?;

        let atoms = Atoms::new(server.as_ref(), screen.screen_num)?;
        if let Some(owner) = server.selection_owner(atoms.net_wm_cm_s)? {
            return Err(Error::CompositingManagerRunning(owner));
        }

        if let Err(e) = server.redirect_subwindows() {
            warn!("Subwindows not redirected, captures read on-screen contents: {}", e);
        }
        if let Err(e) = server.select_cursor_input() {
            debug!("Cursor notifications unavailable: {}", e);
        }
        let root_damage = match server.create_damage(root) {
            Ok(damage) => Some(damage),
            Err(e) => {
                debug!("No damage tracking on root: {}", e);
                None
            }
        };

        let use_shm = extensions.have_shm && !settings.flags.contains(Flags::DISABLE_SHM);

        let shared = Arc::new_cyclic(|me| Shared {
            me: me.clone(),
            server: server.clone(),
            screen,
            extensions,
            atoms,
            settings,
            root,
            registry: RwLock::new(Registry::new()),
            damage: Mutex::new(DamageTracker::new()),
            resources: Mutex::new(ResourceManager::new(use_shm)),
            lifecycle: Mutex::new(()),
            outbox: Mutex::new(VecDeque::new()),
            shutdown: watch::channel(false).0,
            closed: AtomicBool::new(false),
        });

        let mut root_record = WindowRecord::new(
            root,
            Rect::sized(screen.width.into(), screen.height.into()),
            false,
            WindowState::Normal,
        );
        root_record.mapped = true;
        shared.registry_mut().insert(root_record)?;
        shared.damage().track(root, root_damage, false);

        server.flush()?;

        info!(
            "Managing screen {} ({}x{}), shm {}",
            screen.screen_num,
            screen.width,
            screen.height,
            if use_shm { "enabled" } else { "disabled" }
        );

        Ok(Self {
            shared,
            event_thread: Mutex::new(None),
        })
    }

    /// Start the event loop, invoking `callback` on the loop thread for every event
    pub fn start_loop<F>(&self, callback: F) -> Result<()>
    where
        F: FnMut(Event) + Send + 'static,
    {
        self.spawn(EventSink::Callback(Box::new(callback)))
    }

    /// Start the event loop, delivering events into a bounded queue
    pub fn start_queue(&self) -> Result<EventReceiver> {
        let (tx, rx) = mpsc::channel(self.shared.settings.queue_capacity.max(1));
        self.spawn(EventSink::queue(tx, self.shared.shutdown.subscribe()))?;
        Ok(EventReceiver::new(rx))
    }

    fn spawn(&self, sink: EventSink) -> Result<()> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }

        let mut slot = self.event_thread.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return Err(Error::LoopAlreadyStarted);
        }

        let shared = self.shared.clone();
        let handle = thread::Builder::new()
            .name("area-rootless-events".to_string())
            .spawn(move || EventLoop::new(shared, sink).run())
            .map_err(Error::Spawn)?;

        *slot = Some(handle);
        Ok(())
    }

    pub fn root(&self) -> Window {
        self.shared.handle(self.shared.root)
    }

    /// Handle to a managed window
    pub fn window(&self, id: WindowId) -> Option<Window> {
        self.shared
            .registry()
            .contains(id)
            .then(|| self.shared.handle(id))
    }

    /// Every managed window except the root
    pub fn windows(&self) -> Vec<Window> {
        self.shared
            .registry()
            .ids()
            .into_iter()
            .filter(|&id| id != self.shared.root)
            .map(|id| self.shared.handle(id))
            .collect()
    }

    pub fn screen(&self) -> ScreenInfo {
        self.shared.screen
    }

    pub fn extensions(&self) -> Extensions {
        self.shared.extensions
    }

    pub fn flags(&self) -> Flags {
        self.shared.settings.flags
    }

    /// Synthetic input and keyboard mapping
    pub fn input(&self) -> InputManager {
        InputManager::new(self.shared.server.clone())
    }

    /// Ask every client to close, release all server resources, stop the loop
    pub fn close(self) {
        self.shutdown();
    }

    fn shutdown(&self) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        self.shared.shutdown.send_replace(true);
        self.shared.server.wake();

        let handle = self
            .event_thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.thread().id() == thread::current().id() {
                debug!("Context closed from its own event loop, not joining");
            } else if handle.join().is_err() {
                warn!("Event loop thread panicked");
            }
        }

        let ids = self.shared.registry().ids();
        let visible: Vec<WindowId> = {
            let registry = self.shared.registry();
            ids.iter()
                .copied()
                .filter(|&id| id != self.shared.root)
                .filter(|&id| registry.find(id).is_some_and(|r| r.state != WindowState::Withdrawn))
                .collect()
        };
        for id in visible {
            if let Err(e) = terminate::request_close(&self.shared, id) {
                debug!("Close request for window {:#x} failed: {}", id, e);
            }
        }
        for id in ids {
            self.shared.forget(id);
        }

        if let Err(e) = self.shared.server.flush() {
            debug!("Final flush failed: {}", e);
        }
        info!("Context closed");
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        self.shutdown();
    }
}
