//! Receive loop: the only reader of the RX rings.

use std::io;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use polling::{Event, Events};
use tracing::{debug, trace, warn};

use crate::bridge::{Deliver, Shared};
use crate::port::Port;
use crate::sched::{Scheduler, SchedulerExt};

/// Poller key of the device descriptor.
pub(crate) const READABLE: usize = 0;

/// Pause after a failed wait before trying again.
const POLL_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Body of the receiver thread. Returns once the bridge is dying.
pub(crate) fn run<P, S, C>(shared: Arc<Shared<P, S, C>>)
where
    P: Port,
    S: Scheduler,
    C: Deliver,
{
    let name = shared.port.interface().name();
    shared.scheduler.enter_kthread();
    debug!("{}: receiver running", name);

    let mut events = Events::new();
    while !shared.is_dying() {
        events.clear();
        match shared.poller.wait(&mut events, shared.rx_timeout) {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                warn!("{}: poll error: {}", name, e);
                thread::sleep(POLL_ERROR_BACKOFF);
                continue;
            }
        }

        // A wakeup from `dying` carries no event; the flag decides.
        if shared.is_dying() {
            break;
        }
        if !events.iter().any(|ev| ev.key == READABLE && ev.readable) {
            continue;
        }
        if let Err(e) = shared.poller.modify(shared.port.as_fd(), Event::readable(READABLE)) {
            warn!("{}: failed to re-arm receiver: {}", name, e);
        }

        if let Err(e) = shared.port.rx_sync() {
            warn!("{}: NIOCRXSYNC: {}", name, e);
        }
        let delivered = drain(&shared);
        trace!("{}: delivered {} packets", name, delivered);
    }

    debug_assert!(shared.dying.load(Ordering::Acquire));
    debug!("{}: receiver stopping", name);
    shared.scheduler.leave_kthread();
}

/// Hand every ready slot of every bound RX ring to the consumer, ring by ring.
///
/// The token is held only around each delivery.
pub(crate) fn drain<P, S, C>(shared: &Shared<P, S, C>) -> usize
where
    P: Port,
    S: Scheduler,
    C: Deliver,
{
    let iface = shared.port.interface();
    let mut delivered = 0;
    for i in iface.bound_rx_rings() {
        let mut ring = match iface.rx_ring(i) {
            Ok(ring) => ring,
            Err(e) => {
                warn!("{}: {}", iface.name(), e);
                continue;
            }
        };
        while ring.consume(|frame| {
            trace!("got pkt of size {}", frame.len());
            shared.stats.received(frame.len());
            let _cpu = shared.scheduler.hold();
            shared.consumer.deliver(frame);
        }) {
            delivered += 1;
        }
    }
    delivered
}
