use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use hubwire_transport::{HubStream, Waker};
use tracing::{debug, error, info, warn};

use crate::awaited::AwaitedResponses;
use crate::callback::{CallbackDispatcher, EventHandler, Handlers};
use crate::command::Commands;
use crate::config::DriverConfig;
use crate::error::{DriverError, Result};
use crate::firmware::FirmwareState;
use crate::health::{CommsHealth, CommsState, HealthSnapshot};
use crate::line::LineTransport;
use crate::observer::DeviceObserver;
use crate::queue::FrameQueue;
use crate::router::{Disposition, Router};
use crate::transport::Transport;
use crate::{receiver, transmitter};

#[cfg(target_os = "linux")]
use crate::framed::FramedTransport;

/// State shared by the receiver and transmitter threads.
pub(crate) struct Shared {
    pub router: Router,
    pub outbound: Arc<FrameQueue>,
    pub responses: Arc<FrameQueue>,
    pub awaited: Arc<AwaitedResponses>,
    pub health: Arc<CommsHealth>,
    stop: AtomicBool,
}

impl Shared {
    pub fn is_stopping(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    /// Act on the router's verdict for one inbound unit.
    pub fn dispose(&self, routed: Result<Disposition>) {
        match routed {
            Ok(Disposition::Consumed) => {}
            Ok(Disposition::Forward(frame)) => {
                if let Err(rejected) = self.responses.push(frame) {
                    debug!(len = rejected.into_inner().len(), "response dropped");
                    self.health.record_dropped();
                }
            }
            Err(err) => self.health.record_protocol_error(&err),
        }
    }
}

/// A running driver: transport threads, callback dispatcher and command layer.
///
/// Dropping the hub shuts it down.
pub struct Hub {
    shared: Arc<Shared>,
    commands: Commands,
    callbacks: Arc<CallbackDispatcher>,
    waker: Arc<Waker>,
    closer: Option<HubStream>,
    transport: &'static str,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl Hub {
    /// Start the driver over `transport`.
    ///
    /// `observer` is the device layer: it supplies value formats and is told
    /// about attach/detach, values, feedback and alerts.
    pub fn start(
        transport: impl Transport,
        observer: Arc<dyn DeviceObserver>,
        config: DriverConfig,
    ) -> Result<Self> {
        config.validate()?;
        let parts = transport.into_parts(&config)?;

        let callbacks = Arc::new(CallbackDispatcher::start(Arc::new(Handlers::new()))?);
        let awaited = Arc::new(AwaitedResponses::new());
        let firmware = Arc::new(FirmwareState::new());
        let outbound = Arc::new(FrameQueue::new());
        let responses = Arc::new(FrameQueue::new());

        let shared = Arc::new(Shared {
            router: Router::new(
                observer,
                Arc::clone(&awaited),
                Arc::clone(&callbacks),
                Arc::clone(&firmware),
                config.port_count,
            ),
            outbound: Arc::clone(&outbound),
            responses: Arc::clone(&responses),
            awaited,
            health: Arc::new(CommsHealth::new()),
            stop: AtomicBool::new(false),
        });

        let hub = Self {
            shared: Arc::clone(&shared),
            commands: Commands::new(outbound, responses, firmware, config),
            callbacks,
            waker: parts.waker,
            closer: parts.closer,
            transport: parts.name,
            threads: Mutex::new(Vec::with_capacity(2)),
        };

        // On a spawn failure `hub` drops here and stops whatever did start.
        let rx_shared = Arc::clone(&shared);
        let receiver = parts.receiver;
        hub.spawn("hubwire-rx", move || receiver::run(receiver, rx_shared))?;
        let transmitter = parts.transmitter;
        hub.spawn("hubwire-tx", move || transmitter::run(transmitter, shared))?;

        info!(transport = hub.transport, "hub started");
        Ok(hub)
    }

    /// Binary protocol over I2C, with the wake line and addresses in `config`.
    #[cfg(target_os = "linux")]
    pub fn open_i2c(config: DriverConfig, observer: Arc<dyn DeviceObserver>) -> Result<Self> {
        let transport = FramedTransport::open_i2c(&config.i2c)?;
        Self::start(transport, observer, config)
    }

    /// Console protocol over the serial port in `config`.
    pub fn open_serial(config: DriverConfig, observer: Arc<dyn DeviceObserver>) -> Result<Self> {
        let transport = LineTransport::open_serial(&config.serial)?;
        Self::start(transport, observer, config)
    }

    fn spawn(&self, name: &str, body: impl FnOnce() + Send + 'static) -> Result<()> {
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(body)
            .map_err(|e| DriverError::ResourceExhausted(format!("failed to spawn {name}: {e}")))?;
        self.threads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handle);
        Ok(())
    }

    pub fn commands(&self) -> &Commands {
        &self.commands
    }

    pub fn transport_name(&self) -> &'static str {
        self.transport
    }

    /// Route attach, motor, pair, device and alert events to `handler`.
    pub fn register_event_handler(&self, handler: impl EventHandler + 'static) {
        self.callbacks
            .handlers()
            .set_event_handler(Some(Arc::new(handler)));
    }

    /// Route firmware completion events to `handler`.
    pub fn register_firmware_handler(&self, handler: impl EventHandler + 'static) {
        self.callbacks
            .handlers()
            .set_firmware_handler(Some(Arc::new(handler)));
    }

    pub fn clear_handlers(&self) {
        let handlers = self.callbacks.handlers();
        handlers.set_event_handler(None);
        handlers.set_firmware_handler(None);
    }

    pub fn comms_state(&self) -> CommsState {
        self.shared.health.state()
    }

    /// Fails with [`DriverError::NotResponding`] until the Hub is heard from.
    pub fn check_comms(&self) -> Result<()> {
        self.shared.health.check()
    }

    pub fn health(&self) -> HealthSnapshot {
        self.shared.health.snapshot()
    }

    /// Callbacks run and callbacks that failed, in that order.
    pub fn callback_counts(&self) -> (u64, u64) {
        (self.callbacks.delivered(), self.callbacks.failed())
    }

    /// Stop the I/O threads and the dispatcher. Safe to call more than once.
    ///
    /// Blocked command calls return [`DriverError::Shutdown`].
    pub fn shutdown(&self) {
        if self.shared.stop.swap(true, Ordering::AcqRel) {
            return;
        }
        info!(transport = self.transport, "hub shutting down");

        if let Err(err) = self.waker.wake() {
            warn!(error = %err, "failed to wake receiver");
        }
        if let Some(closer) = &self.closer {
            if let Err(err) = closer.shutdown() {
                debug!(error = %err, "transport shutdown");
            }
        }
        self.shared.outbound.shutdown();
        self.shared.responses.shutdown();

        let handles = std::mem::take(
            &mut *self
                .threads
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for handle in handles {
            let name = handle.thread().name().unwrap_or("hubwire-io").to_string();
            if handle.join().is_err() {
                error!(thread = %name, "I/O thread panicked");
            }
        }

        self.callbacks.shutdown();
    }
}

impl Drop for Hub {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Hub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hub")
            .field("transport", &self.transport)
            .field("state", &self.comms_state())
            .finish_non_exhaustive()
    }
}
