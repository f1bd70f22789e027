use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Error;
use crate::hwaddr::MacAddr;
use crate::retry::RetryPolicy;
use crate::sys::{RingIdFlags, IFNAMSIZ, NETMAP_RING_MASK};

/// Default device node.
pub const DEFAULT_DEVICE: &str = "/dev/netmap";

/// Largest frame the transmit path copies into a slot.
pub const MAX_FRAME_SIZE: usize = 1900;

/// Builder for configuring a bridge
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    ifname: String,
    device_path: PathBuf,
    ring_flags: RingIdFlags,
    ring_index: u16,
    max_frame_size: usize,
    tx_retry: RetryPolicy,
    rx_timeout: Option<Duration>,
    thread_name: String,
    hardware_address: Option<MacAddr>,
    #[cfg(feature = "affinity")]
    rx_core: Option<usize>,
}

impl BridgeConfig {
    /// Creates a new config for the given interface.
    ///
    /// A leading `netmap:` is accepted and stripped.
    pub fn new(ifname: &str) -> Self {
        Self {
            ifname: ifname.strip_prefix("netmap:").unwrap_or(ifname).to_string(),
            device_path: PathBuf::from(DEFAULT_DEVICE),
            ring_flags: RingIdFlags::NO_TX_POLL,
            ring_index: 0,
            max_frame_size: MAX_FRAME_SIZE,
            tx_retry: RetryPolicy::default(),
            rx_timeout: None,
            thread_name: "netmap-vif-rx".to_string(),
            hardware_address: None,
            #[cfg(feature = "affinity")]
            rx_core: None,
        }
    }

    /// Device node to open instead of `/dev/netmap`.
    pub fn device_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.device_path = path.into();
        self
    }

    /// Registration flags (`nr_ringid`).
    pub fn ring_flags(mut self, flags: RingIdFlags) -> Self {
        self.ring_flags = flags;
        self
    }

    /// Attach to a single hardware ring pair instead of all of them.
    pub fn hw_ring(mut self, index: u16) -> Self {
        self.ring_flags = (self.ring_flags - RingIdFlags::SW_RING) | RingIdFlags::HW_RING;
        self.ring_index = index;
        self
    }

    /// Truncation cap for outgoing frames.
    pub fn max_frame_size(mut self, len: usize) -> Self {
        self.max_frame_size = len;
        self
    }

    /// How long the transmit path waits for ring space before dropping.
    pub fn tx_retry(mut self, policy: RetryPolicy) -> Self {
        self.tx_retry = policy;
        self
    }

    /// Per-wait timeout for the receive loop. `None` waits indefinitely.
    pub fn rx_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.rx_timeout = timeout;
        self
    }

    /// Name of the receiver thread.
    pub fn thread_name(mut self, name: &str) -> Self {
        self.thread_name = name.to_string();
        self
    }

    /// Use this address instead of looking one up.
    pub fn hardware_address(mut self, mac: MacAddr) -> Self {
        self.hardware_address = Some(mac);
        self
    }

    /// Pin the receiver thread to a core.
    #[cfg(feature = "affinity")]
    pub fn rx_core(mut self, core: usize) -> Self {
        self.rx_core = Some(core);
        self
    }

    /// Interface name as sent to the driver.
    pub fn ifname(&self) -> &str {
        &self.ifname
    }

    /// Path of the device node.
    pub fn device(&self) -> &Path {
        &self.device_path
    }

    /// Value for `nr_ringid`.
    pub fn ringid(&self) -> u16 {
        let index = if self.ring_flags.contains(RingIdFlags::HW_RING) {
            self.ring_index & NETMAP_RING_MASK
        } else {
            0
        };
        self.ring_flags.bits() | index
    }

    /// Registration flags without the ring index.
    pub fn flags(&self) -> RingIdFlags {
        self.ring_flags
    }

    /// Truncation cap for outgoing frames.
    pub fn frame_cap(&self) -> usize {
        self.max_frame_size
    }

    /// Retry policy of the transmit path.
    pub fn retry(&self) -> RetryPolicy {
        self.tx_retry
    }

    /// Per-wait timeout of the receive loop.
    pub fn receive_timeout(&self) -> Option<Duration> {
        self.rx_timeout
    }

    /// Name of the receiver thread.
    pub fn receiver_name(&self) -> &str {
        &self.thread_name
    }

    /// Address override, if any.
    pub fn hardware_address_override(&self) -> Option<MacAddr> {
        self.hardware_address
    }

    /// Core the receiver thread is pinned to, if any.
    #[cfg(feature = "affinity")]
    pub fn receiver_core(&self) -> Option<usize> {
        self.rx_core
    }

    /// Check the settings before any resource is allocated.
    pub fn validate(&self) -> Result<(), Error> {
        if self.ifname.is_empty() || self.ifname.len() >= IFNAMSIZ || self.ifname.contains('\0')
        {
            return Err(Error::InvalidName(self.ifname.clone()));
        }
        if self.max_frame_size == 0 {
            return Err(Error::InvalidConfig("max_frame_size must be non-zero".into()));
        }
        if self.thread_name.contains('\0') {
            return Err(Error::InvalidConfig("thread name contains NUL".into()));
        }
        if self.ring_flags.contains(RingIdFlags::HW_RING | RingIdFlags::SW_RING) {
            return Err(Error::InvalidConfig("HW_RING and SW_RING are exclusive".into()));
        }
        Ok(())
    }
}
