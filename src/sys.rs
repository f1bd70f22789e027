//! Netmap user-space ABI.
//!
//! Layouts follow `net/netmap.h` for API version 11, the head/cur/tail ring
//! convention. Everything here is `#[repr(C)]` and lives inside the region
//! the driver maps for us; nothing in this module owns memory.

#![allow(missing_docs)]

use std::mem;

/// API version sent with every registration request.
pub const NETMAP_API: u32 = 11;

/// Size of the fixed interface-name fields.
pub const IFNAMSIZ: usize = 16;

/// Alignment the driver uses for ring headers.
pub const NM_CACHE_ALIGN: usize = 128;

bitflags::bitflags! {
    /// Ring selection and polling flags carried in `nr_ringid`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct RingIdFlags: u16 {
        /// Attach to a single hardware ring (index in the low bits).
        const HW_RING = 0x4000;
        /// Attach to the host (software) rings only.
        const SW_RING = 0x2000;
        /// Do not start transmission from poll().
        const NO_TX_POLL = 0x1000;
        /// Run rxsync from poll() even when POLLIN was not requested.
        const DO_RX_POLL = 0x8000;
    }
}

/// Mask for the ring index bits of `nr_ringid`.
pub const NETMAP_RING_MASK: u16 = 0x0fff;

/// Registration request (`struct nmreq`).
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct NmReq {
    pub nr_name: [u8; IFNAMSIZ],
    pub nr_version: u32,
    pub nr_offset: u32,
    pub nr_memsize: u32,
    pub nr_tx_slots: u32,
    pub nr_rx_slots: u32,
    pub nr_tx_rings: u16,
    pub nr_rx_rings: u16,
    pub nr_ringid: u16,
    pub nr_cmd: u16,
    pub nr_arg1: u16,
    pub nr_arg2: u16,
    pub nr_arg3: u32,
    pub nr_flags: u32,
    pub spare2: [u32; 1],
}

impl NmReq {
    /// A zeroed request for `name` carrying the current API version.
    ///
    /// `name` must already be validated to fit in `IFNAMSIZ - 1` bytes.
    pub fn register(name: &str, ringid: u16) -> Self {
        let mut nr_name = [0u8; IFNAMSIZ];
        let len = name.len().min(IFNAMSIZ - 1);
        nr_name[..len].copy_from_slice(&name.as_bytes()[..len]);
        Self {
            nr_name,
            nr_version: NETMAP_API,
            nr_offset: 0,
            nr_memsize: 0,
            nr_tx_slots: 0,
            nr_rx_slots: 0,
            nr_tx_rings: 0,
            nr_rx_rings: 0,
            nr_ringid: ringid,
            nr_cmd: 0,
            nr_arg1: 0,
            nr_arg2: 0,
            nr_arg3: 0,
            nr_flags: 0,
            spare2: [0],
        }
    }
}

/// Per-port descriptor found at `nr_offset` inside the mapped region
/// (`struct netmap_if`). A `ring_ofs` array of `isize` follows it.
#[repr(C)]
#[derive(Debug)]
pub struct NetmapIf {
    pub ni_name: [u8; IFNAMSIZ],
    pub ni_version: u32,
    pub ni_flags: u32,
    pub ni_tx_rings: u32,
    pub ni_rx_rings: u32,
    pub ni_bufs_head: u32,
    pub ni_spare1: [u32; 5],
}

/// Opaque room the driver reserves after the ring header.
#[repr(C, align(128))]
#[derive(Debug)]
pub struct RingSem(pub [u8; NM_CACHE_ALIGN]);

/// `struct timeval` as stored in ring headers.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct Timeval {
    pub tv_sec: libc::time_t,
    pub tv_usec: libc::suseconds_t,
}

/// Ring header (`struct netmap_ring`). The slot array follows it.
///
/// `head` and `cur` belong to user space, `tail` to the kernel.
#[repr(C)]
#[derive(Debug)]
pub struct NetmapRing {
    pub buf_ofs: i64,
    pub num_slots: u32,
    pub nr_buf_size: u32,
    pub ringid: u16,
    pub dir: u16,
    pub head: u32,
    pub cur: u32,
    pub tail: u32,
    pub flags: u32,
    pub ts: Timeval,
    pub sem: RingSem,
}

/// One ring entry (`struct netmap_slot`).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NetmapSlot {
    pub buf_idx: u32,
    pub len: u16,
    pub flags: u16,
    pub ptr: u64,
}

/// `dir` value of a transmit ring.
pub const NR_TX: u16 = 0;
/// `dir` value of a receive ring.
pub const NR_RX: u16 = 1;

#[cfg(any(target_os = "linux", target_os = "android"))]
mod ioc {
    pub const VOID: u32 = 0;
    pub const INOUT: u32 = 3 << 30;
    pub const SIZE_MASK: u32 = 0x3fff;
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
mod ioc {
    pub const VOID: u32 = 0x2000_0000;
    pub const INOUT: u32 = 0xc000_0000;
    pub const SIZE_MASK: u32 = 0x1fff;
}

const fn ioc(dir: u32, nr: u32, size: usize) -> u32 {
    dir | (((size as u32) & ioc::SIZE_MASK) << 16) | ((b'i' as u32) << 8) | nr
}

/// Register an interface and learn the shared memory size.
pub const NIOCREGIF: u32 = ioc(ioc::INOUT, 146, mem::size_of::<NmReq>());
/// Hand produced TX slots to the driver.
pub const NIOCTXSYNC: u32 = ioc(ioc::VOID, 148, 0);
/// Return consumed RX slots and pick up new ones.
pub const NIOCRXSYNC: u32 = ioc(ioc::VOID, 149, 0);
