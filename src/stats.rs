use std::sync::atomic::{AtomicU64, Ordering};

/// Datapath counters, updated by the transmit path and the receive loop.
#[derive(Debug, Default)]
pub(crate) struct Stats {
    rx_packets: AtomicU64,
    rx_bytes: AtomicU64,
    tx_packets: AtomicU64,
    tx_bytes: AtomicU64,
    tx_dropped: AtomicU64,
    tx_truncated: AtomicU64,
}

impl Stats {
    pub(crate) fn received(&self, len: usize) {
        self.rx_packets.fetch_add(1, Ordering::Relaxed);
        self.rx_bytes.fetch_add(len as u64, Ordering::Relaxed);
    }

    pub(crate) fn sent(&self, len: usize, truncated: bool) {
        self.tx_packets.fetch_add(1, Ordering::Relaxed);
        self.tx_bytes.fetch_add(len as u64, Ordering::Relaxed);
        if truncated {
            self.tx_truncated.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn dropped(&self) {
        self.tx_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            rx_packets: self.rx_packets.load(Ordering::Relaxed),
            rx_bytes: self.rx_bytes.load(Ordering::Relaxed),
            tx_packets: self.tx_packets.load(Ordering::Relaxed),
            tx_bytes: self.tx_bytes.load(Ordering::Relaxed),
            tx_dropped: self.tx_dropped.load(Ordering::Relaxed),
            tx_truncated: self.tx_truncated.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of a bridge's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Frames handed to the consumer.
    pub rx_packets: u64,
    /// Bytes handed to the consumer.
    pub rx_bytes: u64,
    /// Frames placed in the TX ring.
    pub tx_packets: u64,
    /// Bytes placed in the TX ring.
    pub tx_bytes: u64,
    /// Frames dropped because the TX ring stayed full.
    pub tx_dropped: u64,
    /// Frames cut at the frame cap.
    pub tx_truncated: u64,
}
