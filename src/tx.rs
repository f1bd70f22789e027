//! Transmit path: one logical packet into the next free TX slot.

use std::io::{self, IoSlice};
use std::os::fd::AsRawFd;
use std::time::Duration;

use polling::{Event, Events, Poller};
use tracing::{trace, warn};

use crate::config::BridgeConfig;
use crate::port::Port;
use crate::retry::RetryPolicy;
use crate::stats::Stats;

const WRITABLE: usize = 1;

/// What happened to a frame handed to [`Bridge::send`](crate::Bridge::send).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// The frame occupies one TX slot.
    Sent {
        /// Bytes written.
        len: usize,
        /// Whether the frame was cut at the frame cap.
        truncated: bool,
    },
    /// The ring stayed full for the whole retry budget.
    Dropped,
}

/// TX ring owner. Lives behind `&mut Bridge`, so there is one producer.
pub(crate) struct Transmitter {
    poller: Poller,
    events: Events,
    policy: RetryPolicy,
    max_frame: usize,
}

impl Transmitter {
    pub(crate) fn new<P: Port>(port: &P, config: &BridgeConfig) -> io::Result<Self> {
        let poller = Poller::new()?;
        // Deleted again in `release` before the port can close the descriptor.
        unsafe { poller.add(port.tx_fd().as_raw_fd(), Event::none(WRITABLE))? };
        Ok(Self {
            poller,
            events: Events::new(),
            policy: config.retry(),
            max_frame: config.frame_cap(),
        })
    }

    /// Copy `segments` into the TX ring and flush it.
    ///
    /// The caller has already released the scheduler token. Failures are
    /// logged and never returned: a frame either lands in one slot or is lost.
    pub(crate) fn send<P: Port>(
        &mut self,
        port: &P,
        segments: &[IoSlice<'_>],
        stats: &Stats,
    ) -> SendOutcome {
        let iface = port.interface();
        let mut ring = match iface.tx_ring(iface.bound_tx_rings().start) {
            Ok(ring) => ring,
            Err(e) => {
                warn!("{}: no TX ring: {}", iface.name(), e);
                stats.dropped();
                return SendOutcome::Dropped;
            }
        };

        let Self {
            poller,
            events,
            policy,
            max_frame,
        } = self;

        let produced = policy.run(
            || ring.produce(segments, *max_frame),
            |timeout| {
                trace!("cannot send on netmap, ring full");
                wait_writable(poller, events, port, timeout);
            },
        );

        match produced {
            Some(p) => {
                if p.truncated {
                    warn!("{}: truncating long packet to {} bytes", iface.name(), p.len);
                }
                if let Err(e) = port.tx_sync() {
                    warn!("{}: NIOCTXSYNC: {}", iface.name(), e);
                }
                stats.sent(p.len, p.truncated);
                trace!("{}: sent {} bytes", iface.name(), p.len);
                SendOutcome::Sent {
                    len: p.len,
                    truncated: p.truncated,
                }
            }
            None => {
                warn!(
                    "{}: TX ring full for {:?}, dropping packet",
                    iface.name(),
                    policy.budget()
                );
                stats.dropped();
                SendOutcome::Dropped
            }
        }
    }

    pub(crate) fn release<P: Port>(&self, port: &P) {
        if let Err(e) = self.poller.delete(port.tx_fd()) {
            warn!("failed to deregister TX poller: {}", e);
        }
    }
}

fn wait_writable<P: Port>(poller: &Poller, events: &mut Events, port: &P, timeout: Duration) {
    events.clear();
    // The registration is oneshot; arm it for this wait only.
    if let Err(e) = poller.modify(port.tx_fd(), Event::writable(WRITABLE)) {
        warn!("failed to arm TX poller: {}", e);
        return;
    }
    match poller.wait(events, Some(timeout)) {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
        Err(e) => warn!("TX poll failed: {}", e),
    }
}
