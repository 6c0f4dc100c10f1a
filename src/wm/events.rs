//! Events delivered to the caller
//!
//! Every event is emitted from the event-loop thread, either into a callback
//! or into a bounded queue drained by the caller.

use std::time::Duration;

use tokio::runtime::{self, Runtime};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;
use tracing::{debug, trace, warn};

use crate::wm::window::Window;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    WindowCreate,
    WindowDestroy,
    WindowDamage,
    WindowConfigure,
    WindowState,
    WindowName,
    WindowShape,
    Cursor,
    Exit,
}

/// One notification for the caller. `window` is absent for `Cursor` and `Exit`.
#[derive(Debug, Clone)]
pub struct Event {
    kind: EventKind,
    window: Option<Window>,
}

impl Event {
    pub(crate) fn new(kind: EventKind, window: Window) -> Self {
        Self { kind, window: Some(window) }
    }

    pub(crate) fn global(kind: EventKind) -> Self {
        Self { kind, window: None }
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn window(&self) -> Option<&Window> {
        self.window.as_ref()
    }
}

pub(crate) type Callback = Box<dyn FnMut(Event) + Send>;

/// Where the loop delivers events
pub(crate) enum EventSink {
    Callback(Callback),
    Queue {
        tx: mpsc::Sender<Event>,
        /// Raised when the context shuts down
        stop: watch::Receiver<bool>,
        /// Parks the loop thread on a full queue; built on first use
        runtime: Option<Runtime>,
    },
}

impl EventSink {
    pub(crate) fn queue(tx: mpsc::Sender<Event>, stop: watch::Receiver<bool>) -> Self {
        EventSink::Queue { tx, stop, runtime: None }
    }

    /// Deliver one event. A full queue blocks the loop until the caller drains
    /// it, unless the context shuts down meanwhile.
    pub(crate) fn emit(&mut self, event: Event) {
        trace!("Emitting {:?}", event);
        match self {
            EventSink::Callback(callback) => callback(event),
            EventSink::Queue { tx, stop, runtime } => {
                let event = match tx.try_send(event) {
                    Ok(()) => return,
                    Err(TrySendError::Closed(event)) => {
                        debug!("Event receiver dropped, discarding {:?}", event.kind());
                        return;
                    }
                    Err(TrySendError::Full(event)) => event,
                };

                if runtime.is_none() {
                    match runtime::Builder::new_current_thread().build() {
                        Ok(rt) => *runtime = Some(rt),
                        Err(e) => {
                            warn!("Cannot wait on the full event queue, dropping {:?}: {}", event.kind(), e);
                            return;
                        }
                    }
                }
                let Some(rt) = runtime.as_ref() else {
                    return;
                };

                rt.block_on(async {
                    tokio::select! {
                        sent = tx.send(event) => {
                            if let Err(e) = sent {
                                debug!("Event receiver dropped, discarding {:?}", e.0.kind());
                            }
                        }
                        _ = stop.wait_for(|&stopping| stopping) => {
                            debug!("Shutting down with a full event queue");
                        }
                    }
                });
            }
        }
    }
}

/// Consumer end of the event queue
#[derive(Debug)]
pub struct EventReceiver {
    rx: mpsc::Receiver<Event>,
}

impl EventReceiver {
    pub(crate) fn new(rx: mpsc::Receiver<Event>) -> Self {
        Self { rx }
    }

    /// Block until the next event. `None` once the loop has stopped and the
    /// queue is drained. Must not be called from inside an async runtime.
    pub fn next_event(&mut self) -> Option<Event> {
        self.rx.blocking_recv()
    }

    /// Like `next_event`, giving up after `timeout`. Same restriction on async
    /// contexts.
    pub fn next_event_timeout(&mut self, timeout: Duration) -> Option<Event> {
        let rt = match runtime::Builder::new_current_thread().enable_time().build() {
            Ok(rt) => rt,
            Err(e) => {
                warn!("Cannot wait for events: {}", e);
                return None;
            }
        };
        rt.block_on(tokio::time::timeout(timeout, self.rx.recv()))
            .ok()
            .flatten()
    }

    pub fn try_next_event(&mut self) -> Option<Event> {
        self.rx.try_recv().ok()
    }

    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::thread;

    fn queue(capacity: usize) -> (EventSink, EventReceiver, watch::Sender<bool>) {
        let (tx, rx) = mpsc::channel(capacity);
        let (stop_tx, stop_rx) = watch::channel(false);
        (EventSink::queue(tx, stop_rx), EventReceiver::new(rx), stop_tx)
    }

    #[test]
    fn test_callback_sink() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_cb = seen.clone();
        let mut sink = EventSink::Callback(Box::new(move |e: Event| seen_cb.lock().unwrap().push(e.kind())));

        sink.emit(Event::global(EventKind::Cursor));
        sink.emit(Event::global(EventKind::Exit));
        assert_eq!(*seen.lock().unwrap(), vec![EventKind::Cursor, EventKind::Exit]);
    }

    #[test]
    fn test_queue_preserves_order() {
        let (mut sink, mut receiver, _stop) = queue(8);

        sink.emit(Event::global(EventKind::Cursor));
        sink.emit(Event::global(EventKind::Exit));
        drop(sink);

        assert_eq!(receiver.next_event().unwrap().kind(), EventKind::Cursor);
        assert_eq!(receiver.next_event().unwrap().kind(), EventKind::Exit);
        assert!(receiver.next_event().is_none());
    }

    #[test]
    fn test_full_queue_waits_for_the_consumer() {
        let (mut sink, mut receiver, _stop) = queue(1);

        let producer = thread::spawn(move || {
            for _ in 0..3 {
                sink.emit(Event::global(EventKind::Cursor));
            }
            sink.emit(Event::global(EventKind::Exit));
        });

        let mut kinds = Vec::new();
        while let Some(event) = receiver.next_event_timeout(Duration::from_secs(2)) {
            kinds.push(event.kind());
            if event.kind() == EventKind::Exit {
                break;
            }
        }
        producer.join().unwrap();
        assert_eq!(
            kinds,
            vec![EventKind::Cursor, EventKind::Cursor, EventKind::Cursor, EventKind::Exit]
        );
    }

    #[test]
    fn test_full_queue_gives_up_on_shutdown() {
        let (mut sink, _receiver, stop) = queue(1);
        sink.emit(Event::global(EventKind::Cursor));

        let producer = thread::spawn(move || {
            // Blocks until the stop signal below
            sink.emit(Event::global(EventKind::Cursor));
        });
        thread::sleep(Duration::from_millis(20));
        stop.send_replace(true);
        producer.join().unwrap();
    }

    #[test]
    fn test_full_queue_already_stopped() {
        let (mut sink, _receiver, stop) = queue(1);
        stop.send_replace(true);
        sink.emit(Event::global(EventKind::Cursor));
        sink.emit(Event::global(EventKind::Cursor));
    }

    #[test]
    fn test_next_event_timeout_expires() {
        let (_sink, mut receiver, _stop) = queue(1);
        assert!(receiver.next_event_timeout(Duration::from_millis(10)).is_none());
    }

    #[test]
    fn test_global_events_have_no_window() {
        assert!(Event::global(EventKind::Exit).window().is_none());
    }
}
