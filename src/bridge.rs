//! Lifecycle of a bridge: create, send, dying, destroy.

use std::io::IoSlice;
use std::os::fd::AsRawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use polling::{Event, Poller};
use tracing::{debug, error, info, warn};

use crate::config::BridgeConfig;
use crate::error::Error;
use crate::frame::Frame;
use crate::hwaddr::MacAddr;
use crate::netmap::NetmapPort;
use crate::port::Port;
use crate::rx;
use crate::sched::{Scheduler, SchedulerExt};
use crate::stats::{Stats, StatsSnapshot};
use crate::tx::{SendOutcome, Transmitter};

/// Receiver of incoming packets.
///
/// Called once per packet, on the receiver thread, with the scheduler token
/// held. The frame is only valid for the duration of the call.
pub trait Deliver: Send + Sync + 'static {
    /// Take one packet.
    fn deliver(&self, frame: &Frame<'_>);
}

impl<F> Deliver for F
where
    F: Fn(&Frame<'_>) + Send + Sync + 'static,
{
    fn deliver(&self, frame: &Frame<'_>) {
        self(frame)
    }
}

/// State shared between the foreground and the receiver thread.
pub(crate) struct Shared<P: Port, S, C> {
    pub(crate) poller: Poller,
    pub(crate) port: P,
    pub(crate) scheduler: Arc<S>,
    pub(crate) consumer: C,
    pub(crate) dying: AtomicBool,
    pub(crate) rx_timeout: Option<Duration>,
    pub(crate) stats: Stats,
}

impl<P: Port, S, C> Shared<P, S, C> {
    pub(crate) fn is_dying(&self) -> bool {
        self.dying.load(Ordering::Acquire)
    }
}

impl<P: Port, S, C> Drop for Shared<P, S, C> {
    fn drop(&mut self) {
        // Never registered if creation failed early; nothing to report then.
        let _ = self.poller.delete(self.port.as_fd());
    }
}

/// A running bridge between a ring device and a packet consumer.
///
/// `P` is the device, `S` the host's scheduler token and `C` the consumer.
pub struct Bridge<P: Port, S: Scheduler, C: Deliver> {
    shared: Arc<Shared<P, S, C>>,
    tx: Transmitter,
    receiver: Option<JoinHandle<()>>,
}

impl<S: Scheduler, C: Deliver> Bridge<NetmapPort, S, C> {
    /// Open `config.ifname()` on the netmap device and start receiving.
    ///
    /// Called with the token held; it is released while the device is set up.
    pub fn create(config: BridgeConfig, scheduler: S, consumer: C) -> Result<Self, Error> {
        Self::create_with(config, scheduler, consumer, NetmapPort::open)
    }
}

impl<P: Port, S: Scheduler, C: Deliver> Bridge<P, S, C> {
    /// Start a bridge on a port that is already open.
    pub fn with_port(port: P, config: BridgeConfig, scheduler: S, consumer: C) -> Result<Self, Error> {
        Self::create_with(config, scheduler, consumer, move |_| Ok(port))
    }

    /// Start a bridge on the port returned by `open`.
    ///
    /// `open` runs with the token released. On any failure everything
    /// allocated so far is released before the error is returned.
    pub fn create_with<F>(config: BridgeConfig, scheduler: S, consumer: C, open: F) -> Result<Self, Error>
    where
        F: FnOnce(&BridgeConfig) -> Result<P, Error>,
    {
        config.validate()?;
        let scheduler = Arc::new(scheduler);
        let _cpu = scheduler.release();

        let port = open(&config)?;

        let poller = Poller::new()?;
        let tx = Transmitter::new(&port, &config)?;
        let shared = Arc::new(Shared {
            poller,
            port,
            scheduler: Arc::clone(&scheduler),
            consumer,
            dying: AtomicBool::new(false),
            rx_timeout: config.receive_timeout(),
            stats: Stats::default(),
        });
        let fd = shared.port.as_fd().as_raw_fd();
        // Removed in `Shared::drop`, before the port closes the descriptor.
        if let Err(e) = unsafe { shared.poller.add(fd, Event::readable(rx::READABLE)) } {
            tx.release(&shared.port);
            return Err(Error::Io(e));
        }

        let receiver = spawn_receiver(&config, Arc::clone(&shared)).map_err(|e| {
            tx.release(&shared.port);
            Error::SpawnFailed(e)
        })?;

        info!(
            "{}: bridge up, hwaddr {}",
            shared.port.interface().name(),
            shared.port.hardware_address()
        );
        Ok(Self {
            shared,
            tx,
            receiver: Some(receiver),
        })
    }

    /// Transmit one packet made of `segments`.
    ///
    /// Waits a bounded time for ring space, then drops the packet. Never fails.
    pub fn send(&mut self, segments: &[IoSlice<'_>]) -> SendOutcome {
        let _cpu = self.shared.scheduler.release();
        self.tx.send(&self.shared.port, segments, &self.shared.stats)
    }

    /// Tell the receiver to stop and wake it if it is blocked.
    ///
    /// Returns immediately; repeat calls are harmless.
    pub fn dying(&self) {
        let _cpu = self.shared.scheduler.release();
        self.signal_dying();
    }

    /// Stop the receiver, close the device and free the bridge.
    ///
    /// Signals termination itself if [`dying`](Self::dying) was not called.
    pub fn destroy(mut self) {
        let scheduler = Arc::clone(&self.shared.scheduler);
        let _cpu = scheduler.release();
        self.join_receiver();
        let name = self.shared.port.interface().name();
        drop(self);
        info!("{}: bridge destroyed", name);
    }

    /// Address of the underlying interface, all zeroes if none was found.
    pub fn hardware_address(&self) -> MacAddr {
        self.shared.port.hardware_address()
    }

    /// The device the bridge runs on.
    pub fn port(&self) -> &P {
        &self.shared.port
    }

    /// Current datapath counters.
    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    fn signal_dying(&self) {
        if self.shared.dying.swap(true, Ordering::AcqRel) {
            return;
        }
        // The flag is authoritative; a lost wakeup only delays shutdown until
        // the next receiver timeout.
        if let Err(e) = self.shared.poller.notify() {
            warn!(
                "{}: failed to signal receiver: {}",
                self.shared.port.interface().name(),
                e
            );
        }
    }

    fn join_receiver(&mut self) {
        let Some(handle) = self.receiver.take() else {
            return;
        };
        self.signal_dying();
        if handle.join().is_err() {
            error!(
                "{}: receiver thread panicked",
                self.shared.port.interface().name()
            );
        }
        debug!("{}: receiver joined", self.shared.port.interface().name());
    }
}

impl<P: Port, S: Scheduler, C: Deliver> Drop for Bridge<P, S, C> {
    fn drop(&mut self) {
        if self.receiver.is_some() {
            let scheduler = Arc::clone(&self.shared.scheduler);
            let _cpu = scheduler.release();
            self.join_receiver();
        }
        self.tx.release(&self.shared.port);
    }
}

fn spawn_receiver<P, S, C>(config: &BridgeConfig, shared: Arc<Shared<P, S, C>>) -> std::io::Result<JoinHandle<()>>
where
    P: Port,
    S: Scheduler,
    C: Deliver,
{
    #[cfg(feature = "affinity")]
    let core = config.receiver_core();

    thread::Builder::new()
        .name(config.receiver_name().to_string())
        .spawn(move || {
            #[cfg(feature = "affinity")]
            if let Some(id) = core {
                if !core_affinity::set_for_current(core_affinity::CoreId { id }) {
                    warn!("failed to pin receiver to core {}", id);
                }
            }
            rx::run(shared)
        })
}
