use std::io::IoSlice;
use std::marker::PhantomData;
use std::mem;
use std::ops::Range;
use std::ptr::{self, NonNull};
use std::slice;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::error::Error;
use crate::frame::Frame;
use crate::sys::{self, RingIdFlags, NETMAP_RING_MASK};

/// The rings of one registered port, as laid out in the shared region.
///
/// An `Interface` only borrows memory; whoever created it (a mapping or a
/// fallback arena) keeps that memory alive.
#[derive(Debug)]
pub struct Interface {
    nifp: NonNull<sys::NetmapIf>,
    tx_bound: Range<usize>,
    rx_bound: Range<usize>,
}

// The region is shared with the driver by construction. Ring cursors are only
// moved through `TxRing`/`RxRing`, which the crate hands to a single owner each.
unsafe impl Send for Interface {}
unsafe impl Sync for Interface {}

impl Interface {
    /// Wrap a `netmap_if` located inside a live shared region.
    ///
    /// # Safety
    /// `nifp` must point to a valid `netmap_if` whose `ring_ofs` entries locate
    /// valid rings, and the region must outlive the returned value.
    ///
    /// `ringid` is the `nr_ringid` the port was registered with; it decides
    /// which rings the registration binds.
    pub(crate) unsafe fn from_raw(nifp: NonNull<sys::NetmapIf>, ringid: u16) -> Result<Self, Error> {
        let header = nifp.as_ref();
        let (ntx, nrx) = (header.ni_tx_rings as usize, header.ni_rx_rings as usize);
        let flags = RingIdFlags::from_bits_truncate(ringid);

        let (tx_bound, rx_bound) = if flags.contains(RingIdFlags::SW_RING) {
            (ntx..ntx + 1, nrx..nrx + 1)
        } else if flags.contains(RingIdFlags::HW_RING) {
            let i = (ringid & NETMAP_RING_MASK) as usize;
            if i >= ntx || i >= nrx {
                return Err(Error::InvalidRingIndex(i));
            }
            (i..i + 1, i..i + 1)
        } else {
            (0..ntx, 0..nrx)
        };

        Ok(Self {
            nifp,
            tx_bound,
            rx_bound,
        })
    }

    fn header(&self) -> &sys::NetmapIf {
        unsafe { self.nifp.as_ref() }
    }

    /// Name the driver reports for the port.
    pub fn name(&self) -> String {
        let raw = &self.header().ni_name;
        let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
        String::from_utf8_lossy(&raw[..end]).into_owned()
    }

    /// Get number of TX rings
    pub fn num_tx_rings(&self) -> usize {
        self.header().ni_tx_rings as usize
    }

    /// Get number of RX rings
    pub fn num_rx_rings(&self) -> usize {
        self.header().ni_rx_rings as usize
    }

    /// TX rings the registration binds. The host ring, if bound, has index
    /// `num_tx_rings()`.
    pub fn bound_tx_rings(&self) -> Range<usize> {
        self.tx_bound.clone()
    }

    /// RX rings the registration binds. The host ring, if bound, has index
    /// `num_rx_rings()`.
    pub fn bound_rx_rings(&self) -> Range<usize> {
        self.rx_bound.clone()
    }

    /// Snapshot of a TX ring's indices.
    pub fn tx_state(&self, index: usize) -> Result<RingState, Error> {
        self.tx_raw(index).map(|r| r.state())
    }

    /// Snapshot of an RX ring's indices.
    pub fn rx_state(&self, index: usize) -> Result<RingState, Error> {
        self.rx_raw(index).map(|r| r.state())
    }

    /// Producer handle for a TX ring. Only the transmit path calls this.
    pub(crate) fn tx_ring(&self, index: usize) -> Result<TxRing<'_>, Error> {
        self.tx_raw(index).map(TxRing)
    }

    /// Consumer handle for an RX ring. Only the receive loop calls this.
    pub(crate) fn rx_ring(&self, index: usize) -> Result<RxRing<'_>, Error> {
        self.rx_raw(index).map(|raw| RxRing { raw, index })
    }

    // Index `num_*_rings()` is the host ring, which follows the hardware ones.
    pub(crate) fn tx_raw(&self, index: usize) -> Result<RawRing<'_>, Error> {
        if index > self.num_tx_rings() {
            return Err(Error::InvalidRingIndex(index));
        }
        Ok(unsafe { self.ring_at(index) })
    }

    pub(crate) fn rx_raw(&self, index: usize) -> Result<RawRing<'_>, Error> {
        if index > self.num_rx_rings() {
            return Err(Error::InvalidRingIndex(index));
        }
        // RX offsets come after the hardware TX rings and the host TX ring.
        Ok(unsafe { self.ring_at(index + self.num_tx_rings() + 1) })
    }

    /// NETMAP_TXRING / NETMAP_RXRING
    unsafe fn ring_at(&self, ofs_index: usize) -> RawRing<'_> {
        let base = self.nifp.as_ptr() as *mut u8;
        let ring_ofs = base.add(mem::size_of::<sys::NetmapIf>()) as *const isize;
        let offset = ptr::read(ring_ofs.add(ofs_index));
        RawRing::new(NonNull::new_unchecked(base.offset(offset) as *mut sys::NetmapRing))
    }
}

/// Indices of a ring at one point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingState {
    /// Number of slots in the ring.
    pub num_slots: u32,
    /// First slot owned by user space.
    pub head: u32,
    /// Next slot user space will produce into or consume from.
    pub cur: u32,
    /// First slot owned by the kernel.
    pub tail: u32,
}

impl RingState {
    /// Slots immediately usable at `cur`: free slots on TX, filled slots on RX.
    pub fn space(&self) -> u32 {
        ring_space(self.num_slots, self.cur, self.tail)
    }
}

/// nm_ring_space
#[inline]
pub(crate) fn ring_space(num_slots: u32, cur: u32, tail: u32) -> u32 {
    if tail >= cur {
        tail - cur
    } else {
        tail + num_slots - cur
    }
}

/// nm_ring_next
#[inline]
pub(crate) fn ring_next(num_slots: u32, i: u32) -> u32 {
    if i + 1 == num_slots {
        0
    } else {
        i + 1
    }
}

/// Unrestricted view of a ring header. Kept crate-private: the fallback kernel
/// and the typed handles below are its only users.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RawRing<'a> {
    ring: NonNull<sys::NetmapRing>,
    _marker: PhantomData<&'a sys::NetmapRing>,
}

impl<'a> RawRing<'a> {
    pub(crate) fn new(ring: NonNull<sys::NetmapRing>) -> Self {
        Self {
            ring,
            _marker: PhantomData,
        }
    }

    fn header(&self) -> &sys::NetmapRing {
        unsafe { self.ring.as_ref() }
    }

    fn index_field(&self, field: *mut u32) -> &AtomicU32 {
        // u32 and AtomicU32 share a layout; the driver reads these concurrently.
        unsafe { AtomicU32::from_ptr(field) }
    }

    pub(crate) fn num_slots(&self) -> u32 {
        self.header().num_slots
    }

    pub(crate) fn buf_size(&self) -> usize {
        self.header().nr_buf_size as usize
    }

    pub(crate) fn head(&self) -> u32 {
        let p = unsafe { ptr::addr_of_mut!((*self.ring.as_ptr()).head) };
        self.index_field(p).load(Ordering::Acquire)
    }

    pub(crate) fn cur(&self) -> u32 {
        let p = unsafe { ptr::addr_of_mut!((*self.ring.as_ptr()).cur) };
        self.index_field(p).load(Ordering::Acquire)
    }

    pub(crate) fn tail(&self) -> u32 {
        let p = unsafe { ptr::addr_of_mut!((*self.ring.as_ptr()).tail) };
        self.index_field(p).load(Ordering::Acquire)
    }

    /// Move `head` and `cur` together, publishing every slot before `next`.
    pub(crate) fn advance_to(&self, next: u32) {
        debug_assert!(next < self.num_slots());
        let base = self.ring.as_ptr();
        unsafe {
            self.index_field(ptr::addr_of_mut!((*base).cur))
                .store(next, Ordering::Release);
            self.index_field(ptr::addr_of_mut!((*base).head))
                .store(next, Ordering::Release);
        }
    }

    pub(crate) fn set_tail(&self, tail: u32) {
        debug_assert!(tail < self.num_slots());
        let p = unsafe { ptr::addr_of_mut!((*self.ring.as_ptr()).tail) };
        self.index_field(p).store(tail, Ordering::Release);
    }

    pub(crate) fn state(&self) -> RingState {
        RingState {
            num_slots: self.num_slots(),
            head: self.head(),
            cur: self.cur(),
            tail: self.tail(),
        }
    }

    pub(crate) fn space(&self) -> u32 {
        ring_space(self.num_slots(), self.cur(), self.tail())
    }

    pub(crate) fn slot(&self, index: u32) -> *mut sys::NetmapSlot {
        debug_assert!(index < self.num_slots());
        unsafe {
            let slots = (self.ring.as_ptr() as *mut u8).add(mem::size_of::<sys::NetmapRing>())
                as *mut sys::NetmapSlot;
            slots.add(index as usize)
        }
    }

    /// NETMAP_BUF
    pub(crate) fn buf(&self, buf_idx: u32) -> *mut u8 {
        let header = self.header();
        unsafe {
            (self.ring.as_ptr() as *mut u8)
                .offset(header.buf_ofs as isize)
                .add(buf_idx as usize * header.nr_buf_size as usize)
        }
    }
}

/// Result of producing one TX slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Produced {
    /// Bytes written into the slot.
    pub len: usize,
    /// Whether input was cut off at the frame cap.
    pub truncated: bool,
}

/// A TX ring, producer side only.
pub struct TxRing<'a>(RawRing<'a>);

impl<'a> TxRing<'a> {
    /// Free slots available to produce into.
    pub fn space(&self) -> u32 {
        self.0.space()
    }

    /// Largest frame a slot of this ring can hold.
    pub fn buf_size(&self) -> usize {
        self.0.buf_size()
    }

    /// Gather `segments` into the slot at `cur` and advance.
    ///
    /// At most `max_len` bytes are copied (and never more than the slot's
    /// buffer); the rest is dropped. Returns `None` when the ring is full, in
    /// which case nothing is touched.
    pub fn produce(&mut self, segments: &[IoSlice<'_>], max_len: usize) -> Option<Produced> {
        if self.space() == 0 {
            return None;
        }
        let cap = max_len.min(self.0.buf_size()).min(u16::MAX as usize);
        let cur = self.0.cur();
        let slot = self.0.slot(cur);

        let mut total = 0;
        let mut truncated = false;
        unsafe {
            let dst = self.0.buf((*slot).buf_idx);
            for seg in segments {
                if total >= cap {
                    truncated |= !seg.is_empty();
                    continue;
                }
                let mut n = seg.len();
                if total + n > cap {
                    n = cap - total;
                    truncated = true;
                }
                ptr::copy_nonoverlapping(seg.as_ptr(), dst.add(total), n);
                total += n;
            }
            (*slot).len = total as u16;
        }
        self.0.advance_to(ring_next(self.0.num_slots(), cur));

        Some(Produced {
            len: total,
            truncated,
        })
    }
}

/// An RX ring, consumer side only.
pub struct RxRing<'a> {
    raw: RawRing<'a>,
    index: usize,
}

impl<'a> RxRing<'a> {
    /// Filled slots waiting at `cur`.
    pub fn space(&self) -> u32 {
        self.raw.space()
    }

    /// nm_ring_empty
    pub fn is_empty(&self) -> bool {
        self.raw.cur() == self.raw.tail()
    }

    /// Hand the slot at `cur` to `f`, then give it back to the kernel.
    ///
    /// The frame cannot outlive the call. Returns `false` if the ring was empty.
    pub fn consume<F>(&mut self, f: F) -> bool
    where
        F: FnOnce(&Frame<'_>),
    {
        if self.is_empty() {
            return false;
        }
        let cur = self.raw.cur();
        let slot = self.raw.slot(cur);
        let data = unsafe {
            let slot = &*slot;
            let len = (slot.len as usize).min(self.raw.buf_size());
            slice::from_raw_parts(self.raw.buf(slot.buf_idx) as *const u8, len)
        };
        f(&Frame::new(data).with_origin(self.index, cur));
        self.raw.advance_to(ring_next(self.raw.num_slots(), cur));
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fallback::FallbackPort;
    use crate::port::Port;
    use proptest::prelude::*;

    #[test]
    fn space_wraps_around() {
        assert_eq!(ring_space(8, 0, 7), 7);
        assert_eq!(ring_space(8, 6, 2), 4);
        assert_eq!(ring_space(8, 3, 3), 0);
        assert_eq!(ring_next(8, 7), 0);
        assert_eq!(ring_next(8, 3), 4);
    }

    #[test]
    fn invalid_ring_index_is_rejected() {
        let port = FallbackPort::builder().rx_rings(2).build().unwrap();
        let iface = port.interface();
        assert!(matches!(iface.tx_ring(2), Err(Error::InvalidRingIndex(2))));
        assert!(matches!(iface.rx_ring(3), Err(Error::InvalidRingIndex(3))));
        // Host rings sit right after the hardware rings.
        assert!(iface.tx_ring(1).is_ok());
        assert!(iface.rx_ring(2).is_ok());
    }

    #[test]
    fn registration_binds_every_hardware_ring_by_default() {
        let port = FallbackPort::builder().tx_rings(4).rx_rings(2).build().unwrap();
        assert_eq!(port.interface().bound_tx_rings(), 0..4);
        assert_eq!(port.interface().bound_rx_rings(), 0..2);
    }

    #[test]
    fn hw_ring_registration_binds_one_pair() {
        let ringid = (RingIdFlags::HW_RING | RingIdFlags::NO_TX_POLL).bits() | 2;
        let port = FallbackPort::builder().tx_rings(4).rx_rings(4).ringid(ringid).build().unwrap();
        assert_eq!(port.interface().bound_tx_rings(), 2..3);
        assert_eq!(port.interface().bound_rx_rings(), 2..3);
    }

    #[test]
    fn sw_ring_registration_binds_host_rings() {
        let port = FallbackPort::builder()
            .tx_rings(2)
            .rx_rings(3)
            .ringid(RingIdFlags::SW_RING.bits())
            .build()
            .unwrap();
        assert_eq!(port.interface().bound_tx_rings(), 2..3);
        assert_eq!(port.interface().bound_rx_rings(), 3..4);
    }

    #[test]
    fn hw_ring_past_the_last_pair_is_rejected() {
        let ringid = RingIdFlags::HW_RING.bits() | 4;
        let err = FallbackPort::builder().tx_rings(4).rx_rings(4).ringid(ringid).build().err().expect("ring 4 bound");
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidInput);
    }

    #[test]
    fn produce_gathers_segments_in_order() {
        let port = FallbackPort::builder().build().unwrap();
        let mut tx = port.interface().tx_ring(0).unwrap();
        let parts = [IoSlice::new(b"head"), IoSlice::new(b""), IoSlice::new(b"-tail")];
        let out = tx.produce(&parts, 1900).unwrap();
        assert_eq!(out, Produced { len: 9, truncated: false });

        port.tx_sync().unwrap();
        assert_eq!(port.transmitted(), vec![b"head-tail".to_vec()]);
    }

    #[test]
    fn produce_truncates_at_cap() {
        let port = FallbackPort::builder().build().unwrap();
        let mut tx = port.interface().tx_ring(0).unwrap();
        let a = vec![0xaa; 1500];
        let b = vec![0xbb; 500];
        let out = tx.produce(&[IoSlice::new(&a), IoSlice::new(&b)], 1900).unwrap();
        assert_eq!(out, Produced { len: 1900, truncated: true });

        port.tx_sync().unwrap();
        let sent = port.transmitted();
        assert_eq!(sent[0].len(), 1900);
        assert_eq!(&sent[0][..1500], &a[..]);
        assert_eq!(&sent[0][1500..], &b[..400]);
    }

    #[test]
    fn full_tx_ring_is_left_untouched() {
        let port = FallbackPort::builder().slots(4).build().unwrap();
        port.set_tx_stalled(true);
        let mut tx = port.interface().tx_ring(0).unwrap();
        // One slot is always reserved for the kernel.
        for _ in 0..3 {
            assert!(tx.produce(&[IoSlice::new(b"x")], 64).is_some());
        }
        let before = port.interface().tx_state(0).unwrap();
        assert_eq!(before.space(), 0);
        assert!(tx.produce(&[IoSlice::new(b"y")], 64).is_none());
        assert_eq!(port.interface().tx_state(0).unwrap(), before);
    }

    #[test]
    fn consume_delivers_in_ring_order() {
        let port = FallbackPort::builder().build().unwrap();
        for i in 0..5u8 {
            port.inject(0, &[i; 3]);
        }
        port.rx_sync().unwrap();

        let mut rx = port.interface().rx_ring(0).unwrap();
        let mut seen = Vec::new();
        while rx.consume(|f| seen.push(f.payload().to_vec())) {}
        assert_eq!(seen, (0..5u8).map(|i| vec![i; 3]).collect::<Vec<_>>());
        assert!(rx.is_empty());
        assert!(!rx.consume(|_| unreachable!()));
    }

    #[derive(Debug, Clone)]
    enum Op {
        Produce(usize),
        Consume,
        TxSync,
        Inject(usize),
        RxSync,
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0usize..300).prop_map(Op::Produce),
            Just(Op::Consume),
            Just(Op::TxSync),
            (0usize..300).prop_map(Op::Inject),
            Just(Op::RxSync),
        ]
    }

    fn check(state: RingState) -> Result<(), TestCaseError> {
        prop_assert!(state.cur < state.num_slots);
        prop_assert!(state.head < state.num_slots);
        prop_assert!(state.tail < state.num_slots);
        prop_assert!(state.space() < state.num_slots);
        Ok(())
    }

    proptest! {
        #[test]
        fn cursors_stay_in_range(slots in 2u32..16, ops in prop::collection::vec(op(), 0..200)) {
            let port = FallbackPort::builder().slots(slots).buf_size(256).build().unwrap();
            let iface = port.interface();
            let mut sent = 0usize;
            let mut injected = 0usize;
            let mut consumed = 0usize;

            for op in ops {
                match op {
                    Op::Produce(n) => {
                        let data = vec![1u8; n];
                        let before = iface.tx_state(0).unwrap();
                        match iface.tx_ring(0).unwrap().produce(&[IoSlice::new(&data)], 1900) {
                            Some(p) => {
                                prop_assert_eq!(p.len, n.min(256));
                                prop_assert_eq!(iface.tx_state(0).unwrap().space(), before.space() - 1);
                                sent += 1;
                            }
                            None => prop_assert_eq!(before.space(), 0),
                        }
                    }
                    Op::Consume => {
                        let before = iface.rx_state(0).unwrap();
                        if iface.rx_ring(0).unwrap().consume(|_| {}) {
                            prop_assert_eq!(iface.rx_state(0).unwrap().space(), before.space() - 1);
                            consumed += 1;
                        } else {
                            prop_assert_eq!(before.space(), 0);
                        }
                    }
                    Op::TxSync => port.tx_sync().unwrap(),
                    Op::Inject(n) => {
                        port.inject(0, &vec![2u8; n]);
                        injected += 1;
                    }
                    Op::RxSync => port.rx_sync().unwrap(),
                }
                check(iface.tx_state(0).unwrap())?;
                check(iface.rx_state(0).unwrap())?;
            }

            port.tx_sync().unwrap();
            prop_assert_eq!(port.transmitted().len(), sent);
            prop_assert!(consumed <= injected);
        }
    }
}
