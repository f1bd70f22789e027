//! Fallback implementation for platforms without Netmap support
//!
//! [`FallbackPort`] lays out a netmap region in ordinary memory (interface
//! descriptor, ring headers, slot arrays and a buffer pool, exactly where the
//! driver would put them) and plays the kernel side of the bound rings in
//! `tx_sync`/`rx_sync`. The bridge cannot tell it from a real port, which is
//! what the test suite and the benches rely on.
//!
//! Readiness is modelled with two socket pairs. The RX doorbell is readable
//! while packets wait for a bound RX ring. The TX gate is writable unless the
//! TX ring the bridge produces into is full.

use std::alloc::{self, Layout};
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::mem;
use std::os::fd::{AsFd, BorrowedFd};
use std::os::unix::net::UnixStream;
use std::ptr::{self, NonNull};
use std::slice;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use crate::hwaddr::MacAddr;
use crate::port::Port;
use crate::ring::{ring_next, Interface, RawRing};
use crate::sys::{self, RingIdFlags};

const RING_ALIGN: usize = sys::NM_CACHE_ALIGN;
const ARENA_ALIGN: usize = 4096;

fn align_up(n: usize, align: usize) -> Option<usize> {
    Some(n.checked_add(align - 1)? & !(align - 1))
}

fn invalid(msg: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, msg)
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Read everything queued on a non-blocking stream.
fn drain(mut stream: &UnixStream) -> io::Result<()> {
    let mut buf = [0u8; 4096];
    loop {
        match stream.read(&mut buf) {
            Ok(0) => return Ok(()),
            Ok(_) => continue,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
}

/// Write into a non-blocking stream until its send buffer is full.
fn fill(mut stream: &UnixStream) -> io::Result<()> {
    let chunk = [0u8; 4096];
    loop {
        match stream.write(&chunk) {
            Ok(0) => return Ok(()),
            Ok(_) => continue,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
}

/// Byte offsets of the region's parts.
struct Geometry {
    ofs_table: usize,
    first_ring: usize,
    ring_len: usize,
    pool: usize,
    len: usize,
}

impl Geometry {
    fn new(total_rings: usize, slots: usize, buf_size: usize) -> Option<Self> {
        let ofs_table = mem::size_of::<sys::NetmapIf>();
        let first_ring = align_up(
            ofs_table.checked_add(total_rings.checked_mul(mem::size_of::<isize>())?)?,
            RING_ALIGN,
        )?;
        let ring_len = align_up(
            mem::size_of::<sys::NetmapRing>()
                .checked_add(slots.checked_mul(mem::size_of::<sys::NetmapSlot>())?)?,
            RING_ALIGN,
        )?;
        let pool = first_ring.checked_add(total_rings.checked_mul(ring_len)?)?;
        let len = pool.checked_add(total_rings.checked_mul(slots)?.checked_mul(buf_size)?)?;
        Some(Self {
            ofs_table,
            first_ring,
            ring_len,
            pool,
            len,
        })
    }
}

/// Heap memory standing in for the driver's mapping.
struct Arena {
    base: NonNull<u8>,
    layout: Layout,
}

impl Arena {
    fn zeroed(len: usize) -> io::Result<Self> {
        let layout = Layout::from_size_align(len, ARENA_ALIGN)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let base = NonNull::new(unsafe { alloc::alloc_zeroed(layout) })
            .ok_or_else(|| io::Error::from(io::ErrorKind::OutOfMemory))?;
        Ok(Self { base, layout })
    }

    fn at<T>(&self, offset: usize) -> *mut T {
        debug_assert!(offset + mem::size_of::<T>() <= self.layout.size());
        unsafe { self.base.as_ptr().add(offset) as *mut T }
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        unsafe { alloc::dealloc(self.base.as_ptr(), self.layout) }
    }
}

/// Builder for a [`FallbackPort`].
#[derive(Debug, Clone)]
pub struct FallbackBuilder {
    name: String,
    tx_rings: usize,
    rx_rings: usize,
    num_slots: u32,
    buf_size: u32,
    ringid: u16,
    hwaddr: MacAddr,
}

impl FallbackBuilder {
    /// Name reported in the interface descriptor.
    pub fn name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    /// Number of hardware TX rings (default 1).
    pub fn tx_rings(mut self, num: usize) -> Self {
        self.tx_rings = num;
        self
    }

    /// Number of hardware RX rings (default 1).
    pub fn rx_rings(mut self, num: usize) -> Self {
        self.rx_rings = num;
        self
    }

    /// Slots per ring (default 64, at least 2).
    pub fn slots(mut self, num: u32) -> Self {
        self.num_slots = num;
        self
    }

    /// Bytes per buffer (default 2048).
    pub fn buf_size(mut self, len: u32) -> Self {
        self.buf_size = len;
        self
    }

    /// Register as if with this `nr_ringid`, e.g. [`BridgeConfig::ringid`].
    ///
    /// Only the bound rings are synced, exactly as the driver does.
    ///
    /// [`BridgeConfig::ringid`]: crate::config::BridgeConfig::ringid
    pub fn ringid(mut self, ringid: u16) -> Self {
        self.ringid = ringid;
        self
    }

    /// Address reported through [`Port::hardware_address`].
    pub fn hardware_address(mut self, mac: MacAddr) -> Self {
        self.hwaddr = mac;
        self
    }

    /// Lay out the region and set up the readiness sockets.
    pub fn build(self) -> io::Result<FallbackPort> {
        if self.tx_rings == 0
            || self.rx_rings == 0
            || self.num_slots < 2
            || !(64..=u16::MAX as u32).contains(&self.buf_size)
        {
            return Err(invalid(
                "fallback port needs rings, two or more slots and 64..=65535 byte buffers",
            ));
        }
        let ni_tx_rings = u32::try_from(self.tx_rings).map_err(|_| invalid("too many TX rings"))?;
        let ni_rx_rings = u32::try_from(self.rx_rings).map_err(|_| invalid("too many RX rings"))?;

        // Hardware rings plus one host ring in each direction.
        let total_rings = self
            .tx_rings
            .checked_add(self.rx_rings)
            .and_then(|n| n.checked_add(2))
            .ok_or_else(|| invalid("too many rings"))?;
        // Ring headers carry their index in a u16.
        u16::try_from(total_rings - 1).map_err(|_| invalid("too many rings"))?;
        let slots = self.num_slots as usize;
        let geo = Geometry::new(total_rings, slots, self.buf_size as usize)
            .ok_or_else(|| invalid("fallback region size overflows"))?;
        // Slot buffer indices are u32.
        total_rings
            .checked_mul(slots)
            .and_then(|n| u32::try_from(n).ok())
            .ok_or_else(|| invalid("too many buffers"))?;

        let arena = Arena::zeroed(geo.len)?;

        let mut ni_name = [0u8; sys::IFNAMSIZ];
        let n = self.name.len().min(sys::IFNAMSIZ - 1);
        ni_name[..n].copy_from_slice(&self.name.as_bytes()[..n]);
        unsafe {
            ptr::write(
                arena.at::<sys::NetmapIf>(0),
                sys::NetmapIf {
                    ni_name,
                    ni_version: sys::NETMAP_API,
                    ni_flags: 0,
                    ni_tx_rings,
                    ni_rx_rings,
                    ni_bufs_head: 0,
                    ni_spare1: [0; 5],
                },
            );
        }

        for k in 0..total_rings {
            let ring_ofs = geo.first_ring + k * geo.ring_len;
            let is_tx = k < self.tx_rings + 1;
            let ringid = u16::try_from(k).map_err(|_| invalid("too many rings"))?;
            unsafe {
                ptr::write(
                    arena.at::<isize>(geo.ofs_table + k * mem::size_of::<isize>()),
                    ring_ofs as isize,
                );
                ptr::write(
                    arena.at::<sys::NetmapRing>(ring_ofs),
                    sys::NetmapRing {
                        buf_ofs: (geo.pool - ring_ofs) as i64,
                        num_slots: self.num_slots,
                        nr_buf_size: self.buf_size,
                        ringid,
                        dir: if is_tx { sys::NR_TX } else { sys::NR_RX },
                        head: 0,
                        cur: 0,
                        // TX starts with every slot but one free; RX starts empty.
                        tail: if is_tx { self.num_slots - 1 } else { 0 },
                        flags: 0,
                        ts: sys::Timeval::default(),
                        sem: sys::RingSem([0; sys::NM_CACHE_ALIGN]),
                    },
                );
                let slot_base = ring_ofs + mem::size_of::<sys::NetmapRing>();
                for s in 0..slots {
                    ptr::write(
                        arena.at::<sys::NetmapSlot>(slot_base + s * mem::size_of::<sys::NetmapSlot>()),
                        sys::NetmapSlot {
                            // Below `num_bufs`, checked above.
                            buf_idx: (k * slots + s) as u32,
                            len: 0,
                            flags: 0,
                            ptr: 0,
                        },
                    );
                }
            }
        }

        let interface = unsafe { Interface::from_raw(NonNull::new_unchecked(arena.at(0)), self.ringid) }
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

        let (signal, bell) = UnixStream::pair()?;
        signal.set_nonblocking(true)?;
        bell.set_nonblocking(true)?;
        let (tx_gate, tx_sink) = UnixStream::pair()?;
        tx_gate.set_nonblocking(true)?;
        tx_sink.set_nonblocking(true)?;

        Ok(FallbackPort {
            interface,
            arena,
            pending: Mutex::new(vec![VecDeque::new(); self.rx_rings + 1]),
            tx_hwcur: Mutex::new(vec![0; self.tx_rings + 1]),
            transmitted: Mutex::new(Vec::new()),
            tx_stalled: AtomicBool::new(false),
            tx_gate_closed: AtomicBool::new(false),
            tx_syncs: AtomicUsize::new(0),
            rx_syncs: AtomicUsize::new(0),
            signal,
            bell,
            tx_gate,
            tx_sink,
            hwaddr: self.hwaddr,
        })
    }
}

/// An in-memory port with the netmap memory layout and a simulated kernel.
pub struct FallbackPort {
    interface: Interface,
    arena: Arena,
    /// Packets waiting for room, per RX ring; the last queue is the host ring.
    pending: Mutex<Vec<VecDeque<Vec<u8>>>>,
    /// Next slot the simulated kernel will transmit, per TX ring.
    tx_hwcur: Mutex<Vec<u32>>,
    transmitted: Mutex<Vec<Vec<u8>>>,
    tx_stalled: AtomicBool,
    /// Only changed with `tx_hwcur` locked.
    tx_gate_closed: AtomicBool,
    tx_syncs: AtomicUsize,
    rx_syncs: AtomicUsize,
    /// Polled end: readable while RX data is pending.
    signal: UnixStream,
    bell: UnixStream,
    /// Polled end: writable while the bridge's TX ring has room.
    tx_gate: UnixStream,
    tx_sink: UnixStream,
    hwaddr: MacAddr,
}

// The arena is owned; ring cursors are partitioned exactly as on a real port.
unsafe impl Send for FallbackPort {}
unsafe impl Sync for FallbackPort {}

impl FallbackPort {
    /// Start configuring a port.
    pub fn builder() -> FallbackBuilder {
        FallbackBuilder {
            name: "fallback0".to_string(),
            tx_rings: 1,
            rx_rings: 1,
            num_slots: 64,
            buf_size: 2048,
            ringid: RingIdFlags::NO_TX_POLL.bits(),
            hwaddr: MacAddr::ZERO,
        }
    }

    /// Queue a packet for RX ring `ring` as if it had arrived on the wire.
    ///
    /// Index `num_rx_rings()` is the host ring. The packet shows up on the
    /// next `rx_sync` that finds room, and only if the ring is bound.
    ///
    /// # Panics
    /// If `ring` is past the host ring.
    pub fn inject(&self, ring: usize, data: &[u8]) {
        lock(&self.pending)[ring].push_back(data.to_vec());
        if self.interface.bound_rx_rings().contains(&ring) {
            self.ring_bell();
        }
    }

    /// Packets injected but not yet placed in a ring.
    pub fn pending(&self) -> usize {
        lock(&self.pending).iter().map(VecDeque::len).sum()
    }

    /// Every frame the simulated kernel has transmitted so far.
    pub fn transmitted(&self) -> Vec<Vec<u8>> {
        lock(&self.transmitted).clone()
    }

    /// Stop (or resume) reclaiming TX slots, so the ring fills up.
    ///
    /// Resuming transmits whatever is queued right away, the way the driver
    /// does on its next completion interrupt, and wakes a waiting sender.
    pub fn set_tx_stalled(&self, stalled: bool) {
        self.tx_stalled.store(stalled, Ordering::Release);
        if !stalled {
            if let Err(e) = self.kernel_tx(true) {
                tracing::warn!("fallback TX resume failed: {}", e);
            }
        }
    }

    /// Number of `tx_sync` calls seen.
    pub fn tx_syncs(&self) -> usize {
        self.tx_syncs.load(Ordering::Acquire)
    }

    /// Number of `rx_sync` calls seen.
    pub fn rx_syncs(&self) -> usize {
        self.rx_syncs.load(Ordering::Acquire)
    }

    /// Size of the backing region.
    pub fn memsize(&self) -> usize {
        self.arena.layout.size()
    }

    fn ring_bell(&self) {
        match (&self.bell).write(&[1]) {
            Ok(_) => {}
            // A full socket buffer already reads as "pending".
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) => tracing::warn!("fallback doorbell failed: {}", e),
        }
    }

    /// Kernel side of the bound TX rings: put `hwcur..head` on the wire if
    /// `reclaim`, then make the gate match the bridge's ring.
    fn kernel_tx(&self, reclaim: bool) -> io::Result<()> {
        let mut hwcur = lock(&self.tx_hwcur);
        let bound = self.interface.bound_tx_rings();

        if reclaim {
            let mut out = lock(&self.transmitted);
            for i in bound.clone() {
                let ring = self.interface.tx_raw(i).map_err(io::Error::from)?;
                let n = ring.num_slots();
                let head = ring.head();
                while hwcur[i] != head {
                    unsafe {
                        let slot = &*ring.slot(hwcur[i]);
                        let data = slice::from_raw_parts(ring.buf(slot.buf_idx), slot.len as usize);
                        out.push(data.to_vec());
                    }
                    hwcur[i] = ring_next(n, hwcur[i]);
                }
                // Everything up to head is on the wire; all but one slot is free again.
                ring.set_tail(if head == 0 { n - 1 } else { head - 1 });
            }
        }

        let full = self
            .interface
            .tx_raw(bound.start)
            .map_err(io::Error::from)?
            .space()
            == 0;
        if full && !self.tx_gate_closed.swap(true, Ordering::AcqRel) {
            fill(&self.tx_gate)?;
        } else if !full && self.tx_gate_closed.swap(false, Ordering::AcqRel) {
            drain(&self.tx_sink)?;
        }
        Ok(())
    }

    /// Kernel side of an RX ring: fill free slots from `tail` up to `head - 1`.
    fn fill_ring(ring: RawRing<'_>, queue: &mut VecDeque<Vec<u8>>) {
        let n = ring.num_slots();
        let mut tail = ring.tail();
        while ring_next(n, tail) != ring.head() {
            let Some(pkt) = queue.pop_front() else { break };
            let len = pkt.len().min(ring.buf_size());
            unsafe {
                let slot = ring.slot(tail);
                let dst = slice::from_raw_parts_mut(ring.buf((*slot).buf_idx), len);
                dst.copy_from_slice(&pkt[..len]);
                (*slot).len = len as u16;
            }
            tail = ring_next(n, tail);
        }
        ring.set_tail(tail);
    }
}

impl Port for FallbackPort {
    fn interface(&self) -> &Interface {
        &self.interface
    }

    fn tx_sync(&self) -> io::Result<()> {
        self.tx_syncs.fetch_add(1, Ordering::AcqRel);
        self.kernel_tx(!self.tx_stalled.load(Ordering::Acquire))
    }

    fn rx_sync(&self) -> io::Result<()> {
        self.rx_syncs.fetch_add(1, Ordering::AcqRel);
        drain(&self.signal)?;

        let mut pending = lock(&self.pending);
        let bound = self.interface.bound_rx_rings();
        for i in bound.clone() {
            let ring = self.interface.rx_raw(i).map_err(io::Error::from)?;
            Self::fill_ring(ring, &mut pending[i]);
        }
        if bound.clone().any(|i| !pending[i].is_empty()) {
            self.ring_bell();
        }
        Ok(())
    }

    fn tx_fd(&self) -> BorrowedFd<'_> {
        self.tx_gate.as_fd()
    }

    fn hardware_address(&self) -> MacAddr {
        self.hwaddr
    }
}

impl AsFd for FallbackPort {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.signal.as_fd()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polling::{Event, Events, Poller};
    use std::io::IoSlice;
    use std::os::fd::AsRawFd;
    use std::time::Duration;

    #[test]
    fn layout_matches_driver_conventions() {
        let port = FallbackPort::builder().name("vif0").rx_rings(3).slots(8).build().unwrap();
        let iface = port.interface();
        assert_eq!(iface.name(), "vif0");
        assert_eq!(iface.num_tx_rings(), 1);
        assert_eq!(iface.num_rx_rings(), 3);

        let tx = iface.tx_state(0).unwrap();
        assert_eq!((tx.head, tx.cur, tx.tail), (0, 0, 7));
        assert_eq!(tx.space(), 7);
        for i in 0..3 {
            assert_eq!(iface.rx_state(i).unwrap().space(), 0);
        }
    }

    #[test]
    fn rx_ring_keeps_one_slot_for_the_kernel() {
        let port = FallbackPort::builder().slots(4).build().unwrap();
        for i in 0..6u8 {
            port.inject(0, &[i]);
        }
        port.rx_sync().unwrap();
        assert_eq!(port.interface().rx_state(0).unwrap().space(), 3);
        assert_eq!(port.pending(), 3);
    }

    #[test]
    fn oversized_injection_is_clipped_to_buffer() {
        let port = FallbackPort::builder().buf_size(64).build().unwrap();
        port.inject(0, &[9u8; 100]);
        port.rx_sync().unwrap();
        let mut rx = port.interface().rx_ring(0).unwrap();
        assert!(rx.consume(|f| assert_eq!(f.len(), 64)));
    }

    #[test]
    fn stalled_tx_keeps_slots() {
        let port = FallbackPort::builder().slots(4).build().unwrap();
        let mut tx = port.interface().tx_ring(0).unwrap();
        port.set_tx_stalled(true);
        assert!(tx.produce(&[IoSlice::new(b"a")], 64).is_some());
        port.tx_sync().unwrap();
        assert!(port.transmitted().is_empty());

        port.set_tx_stalled(false);
        port.tx_sync().unwrap();
        assert_eq!(port.transmitted(), vec![b"a".to_vec()]);
        assert_eq!(port.interface().tx_state(0).unwrap().space(), 3);
        assert_eq!(port.tx_syncs(), 2);
    }

    #[test]
    fn rejects_degenerate_geometry() {
        assert!(FallbackPort::builder().slots(1).build().is_err());
        assert!(FallbackPort::builder().rx_rings(0).build().is_err());
        assert!(FallbackPort::builder().tx_rings(0).build().is_err());
        assert!(FallbackPort::builder().buf_size(16).build().is_err());
    }

    #[test]
    fn oversized_geometry_is_rejected_before_allocating() {
        let cases = [
            FallbackPort::builder().rx_rings(usize::MAX),
            FallbackPort::builder().tx_rings(1 << 33),
            FallbackPort::builder().rx_rings(70_000),
            FallbackPort::builder().rx_rings(60_000).slots(u32::MAX),
        ];
        for builder in cases {
            let err = builder.build().err().expect("geometry accepted");
            assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
        }
    }

    #[test]
    fn only_bound_rings_are_synced() {
        let ringid = RingIdFlags::HW_RING.bits() | 1;
        let port = FallbackPort::builder().tx_rings(2).rx_rings(2).ringid(ringid).build().unwrap();
        let iface = port.interface();

        port.inject(0, b"elsewhere");
        port.inject(1, b"ours");
        port.rx_sync().unwrap();
        assert_eq!(iface.rx_state(0).unwrap().space(), 0);
        assert_eq!(iface.rx_state(1).unwrap().space(), 1);
        assert_eq!(port.pending(), 1);

        iface.tx_ring(0).unwrap().produce(&[IoSlice::new(b"lost")], 64).unwrap();
        iface.tx_ring(1).unwrap().produce(&[IoSlice::new(b"sent")], 64).unwrap();
        port.tx_sync().unwrap();
        assert_eq!(port.transmitted(), vec![b"sent".to_vec()]);
    }

    fn tx_writable(port: &FallbackPort, timeout: Duration) -> bool {
        let poller = Poller::new().unwrap();
        unsafe { poller.add(port.tx_fd().as_raw_fd(), Event::writable(7)).unwrap() };
        let mut events = Events::new();
        poller.wait(&mut events, Some(timeout)).unwrap();
        poller.delete(port.tx_fd()).unwrap();
        let writable = events.iter().any(|ev| ev.key == 7 && ev.writable);
        writable
    }

    #[test]
    fn tx_gate_follows_ring_space() {
        let port = FallbackPort::builder().slots(4).build().unwrap();
        port.set_tx_stalled(true);
        assert!(tx_writable(&port, Duration::from_millis(100)));

        let mut tx = port.interface().tx_ring(0).unwrap();
        for _ in 0..3 {
            tx.produce(&[IoSlice::new(b"x")], 64).unwrap();
            port.tx_sync().unwrap();
        }
        assert!(!tx_writable(&port, Duration::from_millis(50)));

        port.set_tx_stalled(false);
        assert_eq!(port.transmitted().len(), 3);
        assert!(tx_writable(&port, Duration::from_millis(100)));
    }
}
