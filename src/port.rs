//! The device seam between the bridge and whatever owns the rings.

use std::io;
use std::os::fd::{AsFd, BorrowedFd};
use std::sync::Arc;

use crate::hwaddr::MacAddr;
use crate::ring::Interface;

/// A registered ring device.
///
/// The descriptor returned by [`AsFd`] is what the receive loop polls:
/// readable when a bound RX ring has data. [`tx_fd`](Port::tx_fd) is polled
/// for writability while the TX ring is full. Both sync calls are issued with
/// the scheduler token released.
pub trait Port: AsFd + Send + Sync + 'static {
    /// Rings of the registered port.
    fn interface(&self) -> &Interface;

    /// Make produced TX slots visible to the transmit engine.
    fn tx_sync(&self) -> io::Result<()>;

    /// Release consumed RX slots and pick up newly received ones.
    fn rx_sync(&self) -> io::Result<()>;

    /// Descriptor that turns writable once the TX ring has room again.
    fn tx_fd(&self) -> BorrowedFd<'_> {
        self.as_fd()
    }

    /// Link-layer address of the underlying interface.
    fn hardware_address(&self) -> MacAddr {
        MacAddr::ZERO
    }
}

impl<P: Port> Port for Arc<P> {
    fn interface(&self) -> &Interface {
        (**self).interface()
    }

    fn tx_sync(&self) -> io::Result<()> {
        (**self).tx_sync()
    }

    fn rx_sync(&self) -> io::Result<()> {
        (**self).rx_sync()
    }

    fn tx_fd(&self) -> BorrowedFd<'_> {
        (**self).tx_fd()
    }

    fn hardware_address(&self) -> MacAddr {
        (**self).hardware_address()
    }
}
