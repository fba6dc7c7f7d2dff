//! Callback dispatch.
//!
//! Anything that runs user code is queued here by the receiver and executed
//! on a dedicated worker thread, one item at a time, in queue order. The
//! receiver never waits on user code.

use std::error::Error;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::thread::{self, JoinHandle};

use serde::Serialize;
use tracing::{debug, error, trace};

use crate::error::{DriverError, Result};
use crate::queue::{Queue, FOREVER};

/// Event codes carried in [`CallbackItem::event_code`].
pub mod event {
    /// Port callbacks.
    pub const DETACHED: u8 = 0;
    pub const ATTACHED: u8 = 1;

    /// Motor and pair callbacks.
    pub const COMPLETE: u8 = 0;
    pub const INTERRUPTED: u8 = 1;
    pub const STALLED: u8 = 2;

    /// Device callbacks: new value data is available.
    pub const DATA: u8 = 0;
}

/// What a callback is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CallbackKind {
    Port,
    Motor,
    Pair,
    Firmware,
    Device,
    Alert,
}

impl CallbackKind {
    pub fn code(self) -> u8 {
        match self {
            Self::Port => 0,
            Self::Motor => 1,
            Self::Pair => 2,
            Self::Firmware => 3,
            Self::Device => 4,
            Self::Alert => 5,
        }
    }
}

/// The view of a queued callback handed to user code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Event {
    pub kind: CallbackKind,
    /// Port, pair, alert id, or firmware operation.
    pub subject_id: u8,
    /// See [`event`]; alerts carry the alert value, firmware events the status.
    pub event_code: u8,
}

pub type HandlerError = Box<dyn Error + Send + Sync>;

/// User code run by the dispatcher.
pub trait EventHandler: Send + Sync {
    fn on_event(&self, event: &Event) -> std::result::Result<(), HandlerError>;
}

impl<F> EventHandler for F
where
    F: Fn(&Event) -> std::result::Result<(), HandlerError> + Send + Sync,
{
    fn on_event(&self, event: &Event) -> std::result::Result<(), HandlerError> {
        self(event)
    }
}

/// One queued callback. The handler is fixed when the item is queued.
pub struct CallbackItem {
    pub kind: CallbackKind,
    pub subject_id: u8,
    pub event_code: u8,
    pub target: Option<Arc<dyn EventHandler>>,
}

impl CallbackItem {
    pub fn event(&self) -> Event {
        Event {
            kind: self.kind,
            subject_id: self.subject_id,
            event_code: self.event_code,
        }
    }
}

impl std::fmt::Debug for CallbackItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackItem")
            .field("kind", &self.kind)
            .field("subject_id", &self.subject_id)
            .field("event_code", &self.event_code)
            .field("target", &self.target.is_some())
            .finish()
    }
}

/// Registered handlers. Firmware events have their own.
#[derive(Default)]
pub struct Handlers {
    events: RwLock<Option<Arc<dyn EventHandler>>>,
    firmware: RwLock<Option<Arc<dyn EventHandler>>>,
}

impl Handlers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_event_handler(&self, handler: Option<Arc<dyn EventHandler>>) {
        *self.events.write().unwrap_or_else(PoisonError::into_inner) = handler;
    }

    pub fn set_firmware_handler(&self, handler: Option<Arc<dyn EventHandler>>) {
        *self.firmware.write().unwrap_or_else(PoisonError::into_inner) = handler;
    }

    /// Handler that should receive an item of `kind`.
    pub fn target_for(&self, kind: CallbackKind) -> Option<Arc<dyn EventHandler>> {
        let slot = match kind {
            CallbackKind::Firmware => &self.firmware,
            _ => &self.events,
        };
        slot.read().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

enum Job {
    Run(CallbackItem),
    Stop,
}

#[derive(Debug, Default)]
struct Stats {
    delivered: AtomicU64,
    failed: AtomicU64,
}

/// Single worker thread fed by a FIFO of [`CallbackItem`]s.
pub struct CallbackDispatcher {
    queue: Arc<Queue<Job>>,
    handlers: Arc<Handlers>,
    stats: Arc<Stats>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl CallbackDispatcher {
    pub fn start(handlers: Arc<Handlers>) -> Result<Self> {
        let queue = Arc::new(Queue::new());
        let stats = Arc::new(Stats::default());

        let worker = {
            let queue = Arc::clone(&queue);
            let stats = Arc::clone(&stats);
            thread::Builder::new()
                .name("hubwire-callbacks".into())
                .spawn(move || run(&queue, &stats))
                .map_err(|e| DriverError::Sync(format!("failed to spawn callback thread: {e}")))?
        };

        Ok(Self {
            queue,
            handlers,
            stats,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Queue a callback for the handler registered for `kind`.
    pub fn queue(&self, kind: CallbackKind, subject_id: u8, event_code: u8) -> Result<()> {
        let item = CallbackItem {
            kind,
            subject_id,
            event_code,
            target: self.handlers.target_for(kind),
        };
        trace!(?item, "callback queued");
        self.queue
            .push(Job::Run(item))
            .map_err(|_| DriverError::Sync("callback queue lock poisoned".into()))
    }

    pub fn handlers(&self) -> &Arc<Handlers> {
        &self.handlers
    }

    /// Callbacks that ran to completion.
    pub fn delivered(&self) -> u64 {
        self.stats.delivered.load(Ordering::Relaxed)
    }

    /// Callbacks that returned an error or panicked.
    pub fn failed(&self) -> u64 {
        self.stats.failed.load(Ordering::Relaxed)
    }

    /// Stop the worker after it has run everything queued so far.
    ///
    /// Idempotent. Called from inside a callback it only asks the worker to
    /// stop; the worker exits once that callback returns.
    pub fn shutdown(&self) {
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(worker) = worker else {
            return;
        };

        if self.queue.push(Job::Stop).is_err() {
            self.queue.shutdown();
        }
        if worker.thread().id() == thread::current().id() {
            debug!("callback dispatcher stopping from its own worker");
            return;
        }
        if worker.join().is_err() {
            error!("callback thread panicked");
        }
        self.queue.shutdown();
        debug!("callback dispatcher stopped");
    }
}

impl Drop for CallbackDispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run(queue: &Queue<Job>, stats: &Stats) {
    loop {
        match queue.pop(FOREVER) {
            Ok(Some(Job::Run(item))) => deliver(item, stats),
            Ok(Some(Job::Stop)) | Ok(None) => break,
            Err(err) => {
                error!(error = %err, "callback queue failed");
                break;
            }
        }
    }
}

fn deliver(item: CallbackItem, stats: &Stats) {
    let event = item.event();
    let Some(target) = item.target else {
        trace!(?event, "no handler registered");
        return;
    };

    match catch_unwind(AssertUnwindSafe(|| target.on_event(&event))) {
        Ok(Ok(())) => {
            stats.delivered.fetch_add(1, Ordering::Relaxed);
        }
        Ok(Err(err)) => {
            stats.failed.fetch_add(1, Ordering::Relaxed);
            error!(?event, error = %err, "callback failed");
        }
        Err(_) => {
            stats.failed.fetch_add(1, Ordering::Relaxed);
            error!(?event, "callback panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::time::Duration;

    use super::*;

    fn recording() -> (Arc<dyn EventHandler>, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        let handler: Arc<dyn EventHandler> =
            Arc::new(move |event: &Event| -> std::result::Result<(), HandlerError> {
                tx.lock().unwrap().send(*event)?;
                Ok(())
            });
        (handler, rx)
    }

    #[test]
    fn callbacks_run_in_queue_order() {
        let handlers = Arc::new(Handlers::new());
        let (handler, rx) = recording();
        handlers.set_event_handler(Some(handler));
        let dispatcher = CallbackDispatcher::start(handlers).unwrap();

        for port in 0..4 {
            dispatcher
                .queue(CallbackKind::Port, port, event::ATTACHED)
                .unwrap();
        }
        dispatcher.shutdown();

        let ports: Vec<u8> = rx.try_iter().map(|e| e.subject_id).collect();
        assert_eq!(ports, vec![0, 1, 2, 3]);
        assert_eq!(dispatcher.delivered(), 4);
    }

    #[test]
    fn panicking_callback_does_not_kill_worker() {
        let handlers = Arc::new(Handlers::new());
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        let handler = move |event: &Event| -> std::result::Result<(), HandlerError> {
            if event.subject_id == 1 {
                panic!("boom");
            }
            if event.subject_id == 2 {
                return Err("handler refused".into());
            }
            tx.lock().unwrap().send(event.subject_id)?;
            Ok(())
        };
        handlers.set_event_handler(Some(Arc::new(handler)));
        let dispatcher = CallbackDispatcher::start(handlers).unwrap();

        for id in 0..4 {
            dispatcher
                .queue(CallbackKind::Motor, id, event::COMPLETE)
                .unwrap();
        }
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 0);
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 3);
        dispatcher.shutdown();
        assert_eq!(dispatcher.failed(), 2);
    }

    #[test]
    fn firmware_events_use_firmware_handler() {
        let handlers = Arc::new(Handlers::new());
        let (events, events_rx) = recording();
        let (firmware, firmware_rx) = recording();
        handlers.set_event_handler(Some(events));
        handlers.set_firmware_handler(Some(firmware));
        let dispatcher = CallbackDispatcher::start(handlers).unwrap();

        dispatcher.queue(CallbackKind::Firmware, 1, 0).unwrap();
        dispatcher.queue(CallbackKind::Alert, 2, 1).unwrap();
        dispatcher.shutdown();

        let fw: Vec<Event> = firmware_rx.try_iter().collect();
        let other: Vec<Event> = events_rx.try_iter().collect();
        assert_eq!(fw.len(), 1);
        assert_eq!(fw[0].kind, CallbackKind::Firmware);
        assert_eq!(other.len(), 1);
        assert_eq!(other[0].kind, CallbackKind::Alert);
    }

    #[test]
    fn items_without_handler_are_skipped() {
        let dispatcher = CallbackDispatcher::start(Arc::new(Handlers::new())).unwrap();
        dispatcher.queue(CallbackKind::Pair, 0x10, event::STALLED).unwrap();
        dispatcher.shutdown();
        assert_eq!(dispatcher.delivered(), 0);
        assert_eq!(dispatcher.failed(), 0);
    }

    #[test]
    fn shutdown_is_idempotent() {
        let dispatcher = CallbackDispatcher::start(Arc::new(Handlers::new())).unwrap();
        dispatcher.shutdown();
        dispatcher.shutdown();
    }

    #[test]
    fn shutdown_from_inside_a_callback_returns() {
        let handlers = Arc::new(Handlers::new());
        let slot: Arc<Mutex<Option<Arc<CallbackDispatcher>>>> = Arc::new(Mutex::new(None));
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        let handler = {
            let slot = Arc::clone(&slot);
            move |_: &Event| -> std::result::Result<(), HandlerError> {
                if let Some(dispatcher) = slot.lock().unwrap().take() {
                    dispatcher.shutdown();
                }
                tx.lock().unwrap().send(())?;
                Ok(())
            }
        };
        handlers.set_event_handler(Some(Arc::new(handler)));
        let dispatcher = Arc::new(CallbackDispatcher::start(handlers).unwrap());
        *slot.lock().unwrap() = Some(Arc::clone(&dispatcher));

        dispatcher
            .queue(CallbackKind::Port, 0, event::DETACHED)
            .unwrap();
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        dispatcher.shutdown();
    }

    #[test]
    fn kind_codes_match_wire_table() {
        assert_eq!(CallbackKind::Port.code(), 0);
        assert_eq!(CallbackKind::Motor.code(), 1);
        assert_eq!(CallbackKind::Pair.code(), 2);
    }
}
